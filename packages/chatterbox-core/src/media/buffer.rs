//! Incrementally readable byte buffer between the downloader and the decoder.
//!
//! One producer appends compressed bytes as they arrive from the network;
//! one reader (the MP3 decoder) consumes them through a blocking
//! `Read + Seek` handle. The reader parks on a condvar whenever it has
//! caught up with the producer and wakes on every append or finish.
//!
//! The buffer is not a ring: memory grows monotonically for the lifetime of
//! one playback session, bounded by the media item's compressed size. That
//! is what makes `Seek` trivially correct - the past is never truncated.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use symphonia::core::io::MediaSource;

/// Minimum bytes that must be buffered before a seek-from-end is answered
/// while the producer is still running. The MP3 decoder probes the end
/// during initialization; answering too early would hand it a bogus length.
const MIN_SEEK_FROM_END_BYTES: usize = 16 * 1024;

/// How the producer ended the stream.
#[derive(Debug, Clone)]
enum Termination {
    Ok,
    Failed(String),
    Cancelled,
}

struct Inner {
    data: Vec<u8>,
    termination: Option<Termination>,
}

/// Shared state of one streaming session.
pub struct StreamingBuffer {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl StreamingBuffer {
    /// Creates an empty, unfinished buffer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                data: Vec::new(),
                termination: None,
            }),
            available: Condvar::new(),
        })
    }

    /// Appends a block of bytes. No-op after the stream has finished.
    pub fn append(&self, chunk: &[u8]) {
        let mut inner = self.inner.lock();
        if inner.termination.is_some() {
            return;
        }
        inner.data.extend_from_slice(chunk);
        drop(inner);
        self.available.notify_all();
    }

    /// Marks the stream complete; readers drain the remainder and hit EOF.
    pub fn finish(&self) {
        self.terminate(Termination::Ok);
    }

    /// Marks the stream failed; readers drain the remainder and then see
    /// the producer error.
    pub fn finish_with_error(&self, message: impl Into<String>) {
        self.terminate(Termination::Failed(message.into()));
    }

    /// Marks the stream cancelled; blocked readers wake with an
    /// interrupted error.
    pub fn cancel(&self) {
        self.terminate(Termination::Cancelled);
    }

    fn terminate(&self, how: Termination) {
        let mut inner = self.inner.lock();
        if inner.termination.is_none() {
            inner.termination = Some(how);
        }
        drop(inner);
        self.available.notify_all();
    }

    /// Bytes buffered so far.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// True when no bytes have been appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the producer has called any of the finish paths.
    pub fn is_finished(&self) -> bool {
        self.inner.lock().termination.is_some()
    }

}

impl Default for StreamingBuffer {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: Vec::new(),
                termination: None,
            }),
            available: Condvar::new(),
        }
    }
}

/// Blocking `Read + Seek` view over a [`StreamingBuffer`].
///
/// One session has exactly one reader: the decoder.
pub struct StreamReader {
    buffer: Arc<StreamingBuffer>,
    pos: usize,
}

impl StreamReader {
    /// Creates the reader handle for a session.
    pub fn new(buffer: Arc<StreamingBuffer>) -> Self {
        Self { buffer, pos: 0 }
    }

    fn termination_error(how: &Termination) -> Option<io::Error> {
        match how {
            Termination::Ok => None,
            Termination::Failed(msg) => Some(io::Error::other(msg.clone())),
            Termination::Cancelled => Some(io::Error::new(
                io::ErrorKind::Interrupted,
                "stream cancelled",
            )),
        }
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut inner = self.buffer.inner.lock();
        loop {
            if self.pos < inner.data.len() {
                let take = buf.len().min(inner.data.len() - self.pos);
                buf[..take].copy_from_slice(&inner.data[self.pos..self.pos + take]);
                self.pos += take;
                return Ok(take);
            }
            match &inner.termination {
                Some(how) => {
                    return match Self::termination_error(how) {
                        Some(err) => Err(err),
                        None => Ok(0),
                    };
                }
                None => self.buffer.available.wait(&mut inner),
            }
        }
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut inner = self.buffer.inner.lock();
        let target: i64 = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => {
                // Wait for enough of the stream that "the end" is meaningful,
                // then compute against the length at that moment.
                while inner.termination.is_none() && inner.data.len() < MIN_SEEK_FROM_END_BYTES {
                    self.buffer.available.wait(&mut inner);
                }
                if let Some(Termination::Cancelled) = inner.termination {
                    return Err(io::Error::new(
                        io::ErrorKind::Interrupted,
                        "stream cancelled",
                    ));
                }
                inner.data.len() as i64 + delta
            }
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }
}

impl MediaSource for StreamReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        let inner = self.buffer.inner.lock();
        match inner.termination {
            Some(_) => Some(inner.data.len() as u64),
            None => None,
        }
    }
}
