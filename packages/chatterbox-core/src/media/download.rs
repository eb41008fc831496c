//! Resumable HTTP download feeding a [`StreamingBuffer`].
//!
//! The downloader appends each received block to the streaming buffer and,
//! when a cache writer is attached, tees the same bytes into a temporary
//! file. Network faults are retried with a `Range` header so playback never
//! restarts from byte zero; the temp file is only promoted to its final
//! path after the whole stream arrived.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::media::buffer::StreamingBuffer;

/// Attempts beyond the first request.
const RETRY_BUDGET: u32 = 3;

/// Patterns in error chains that mark a fault as transient network trouble.
const NETWORK_FAULT_PATTERNS: [&str; 6] = [
    "connection reset",
    "broken pipe",
    "connection refused",
    "connection closed",
    "unexpected eof",
    "timed out",
];

/// Classifies an error message as a transient network fault.
pub(crate) fn is_network_fault_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    NETWORK_FAULT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Classifies a reqwest error, walking its source chain.
fn is_network_fault(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if is_network_fault_message(&current.to_string()) {
            return true;
        }
        source = current.source();
    }
    false
}

/// Tee target for the downloader: a temporary file that becomes the cached
/// MP3 only on a clean, complete download.
pub struct CacheWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: tokio::fs::File,
}

impl CacheWriter {
    /// Opens the temporary file, truncating any stale leftover.
    pub async fn create(tmp_path: &Path, final_path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::File::create(tmp_path).await?;
        Ok(Self {
            tmp_path: tmp_path.to_path_buf(),
            final_path: final_path.to_path_buf(),
            file,
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.file.write_all(chunk).await
    }

    /// Promotes the temp file to its final path. Only called after the
    /// entire stream completed.
    pub async fn commit(mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        drop(self.file);
        tokio::fs::rename(&self.tmp_path, &self.final_path).await
    }

    /// Closes and deletes the temp file.
    pub async fn abort(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.tmp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "[Download] Failed to remove temp file {}: {e}",
                    self.tmp_path.display()
                );
            }
        }
    }
}

/// Runs one download session to completion, cancellation, or exhausted
/// retries. Always terminates the buffer before returning.
pub async fn run_download(
    client: Client,
    url: String,
    buffer: Arc<StreamingBuffer>,
    mut tee: Option<CacheWriter>,
    cancel: CancellationToken,
) {
    let mut downloaded: u64 = 0;
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let delay = Duration::from_secs(1 + u64::from(attempt));
            log::info!(
                "[Download] Retrying (attempt {}/{}) after {:?}, resuming at byte {}",
                attempt + 1,
                RETRY_BUDGET + 1,
                delay,
                downloaded
            );
            tokio::select! {
                () = cancel.cancelled() => {
                    abort_session(buffer, tee).await;
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        let mut request = client.get(&url);
        if downloaded > 0 {
            request = request.header(RANGE, format!("bytes={downloaded}-"));
        }

        let response = tokio::select! {
            () = cancel.cancelled() => {
                abort_session(buffer, tee).await;
                return;
            }
            result = request.send() => result,
        };

        let mut response = match response {
            Ok(r) => r,
            Err(e) => {
                if is_network_fault(&e) && attempt < RETRY_BUDGET {
                    attempt += 1;
                    continue;
                }
                give_up(buffer, tee, &format!("request failed: {e}"), downloaded).await;
                return;
            }
        };

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            if attempt < RETRY_BUDGET {
                attempt += 1;
                continue;
            }
            give_up(buffer, tee, &format!("HTTP status {status}"), downloaded).await;
            return;
        }

        // A 200 after a Range request means the server restarted from zero;
        // skip the bytes we already have.
        let mut skip = if status == StatusCode::OK { downloaded } else { 0 };

        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => {
                    abort_session(buffer, tee).await;
                    return;
                }
                result = response.chunk() => result,
            };
            match chunk {
                Ok(Some(bytes)) => {
                    let block: &[u8] = if skip > 0 {
                        let drop_now = skip.min(bytes.len() as u64);
                        skip -= drop_now;
                        &bytes[drop_now as usize..]
                    } else {
                        &bytes
                    };
                    if block.is_empty() {
                        continue;
                    }
                    buffer.append(block);
                    downloaded += block.len() as u64;
                    if let Some(writer) = tee.as_mut() {
                        if let Err(e) = writer.write(block).await {
                            log::warn!("[Download] Cache tee write failed, detaching: {e}");
                            if let Some(writer) = tee.take() {
                                writer.abort().await;
                            }
                        }
                    }
                }
                Ok(None) => {
                    buffer.finish();
                    if let Some(writer) = tee.take() {
                        match writer.commit().await {
                            Ok(()) => log::debug!("[Download] Cache file committed"),
                            Err(e) => log::warn!("[Download] Cache commit failed: {e}"),
                        }
                    }
                    log::info!("[Download] Complete: {downloaded} bytes");
                    return;
                }
                Err(e) => {
                    if is_network_fault(&e) && attempt < RETRY_BUDGET {
                        attempt += 1;
                        break;
                    }
                    give_up(buffer, tee, &format!("read failed: {e}"), downloaded).await;
                    return;
                }
            }
        }
    }
}

/// Terminal failure. If anything was buffered the decoder still gets to
/// play it (partial-playback tolerance); an empty buffer surfaces the error.
async fn give_up(
    buffer: Arc<StreamingBuffer>,
    tee: Option<CacheWriter>,
    message: &str,
    downloaded: u64,
) {
    log::warn!("[Download] Giving up after {downloaded} bytes: {message}");
    if downloaded > 0 {
        buffer.finish();
    } else {
        buffer.finish_with_error(message);
    }
    if let Some(writer) = tee {
        writer.abort().await;
    }
}

async fn abort_session(buffer: Arc<StreamingBuffer>, tee: Option<CacheWriter>) {
    buffer.cancel();
    if let Some(writer) = tee {
        writer.abort().await;
    }
}
