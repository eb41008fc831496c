//! Bounded frame queue between the capture callback and the pipeline.
//!
//! The device callback must never block, so `push` drops the frame when the
//! queue is full and counts the drop. The pipeline consumes frames with an
//! async `pop`; `drain` discards everything queued (used to evict echo after
//! the assistant speaks).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A fixed-length block of normalized mono samples from the capture device.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Normalized samples, exactly `frame_size` of them.
    pub samples: Vec<f32>,
}

struct QueueInner {
    frames: VecDeque<AudioFrame>,
    closed: bool,
}

/// Bounded single-consumer frame queue with drop-on-full semantics.
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// Creates a queue holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Offers a frame without blocking. Drops it (and counts the drop) when
    /// the queue is full or closed.
    pub fn push(&self, frame: AudioFrame) {
        {
            let mut inner = self.inner.lock();
            if inner.closed || inner.frames.len() >= self.capacity {
                drop(inner);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            inner.frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Receives the next frame, waiting until one arrives or the queue is
    /// closed and empty (returns `None`).
    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Discards every queued frame, returning how many were thrown away.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.frames.len();
        inner.frames.clear();
        count
    }

    /// Number of frames the producer dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Closes the queue; `pop` returns `None` once the backlog is consumed.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }
}
