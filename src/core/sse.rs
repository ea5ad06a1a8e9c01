//! SSE Stream
//!
//! One long-lived `text/event-stream` response per session. Frames are pushed
//! through a bounded channel whose receiving half is the HTTP response body.
//! A write fails when the client has gone away (actix dropped the body) or
//! when the client stopped reading and the queue filled up; either way the
//! stream marks itself dead.

use bytes::Bytes;
use futures_util::Stream;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

const KEEP_ALIVE_FRAME: &[u8] = b": keep-alive\n\n";

/// Frames queued for a peer that is not reading before the stream is dropped.
pub const WRITE_QUEUE_CAPACITY: usize = 512;

pub struct SseStream {
    session_id: String,
    alive: AtomicBool,
    /// Single-writer lock; `None` once disposed.
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl SseStream {
    /// Create a stream for `session_id` together with the body that feeds the
    /// HTTP response.
    pub fn new(session_id: String) -> (Self, impl Stream<Item = Result<Bytes, Infallible>> + 'static) {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let stream = Self {
            session_id,
            alive: AtomicBool::new(true),
            sender: Mutex::new(Some(tx)),
        };
        let body = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok(frame), rx))
        });
        (stream, body)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Write a named event. An empty `name` produces a default (unnamed)
    /// event. Returns false if the stream is dead.
    pub fn send_event(&self, name: &str, data: &str) -> bool {
        self.write(Bytes::from(format_event(name, data)))
    }

    /// Write a comment frame, used by the keep-alive loop to detect dead peers.
    pub fn send_keep_alive(&self) -> bool {
        self.write(Bytes::from_static(KEEP_ALIVE_FRAME))
    }

    /// Close the stream. Idempotent; dropping the sender ends the HTTP body.
    pub fn dispose(&self) {
        let mut sender = self.sender.lock();
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::debug!(session_id = %self.session_id, "sse stream disposed");
        }
        sender.take();
    }

    fn write(&self, frame: Bytes) -> bool {
        let mut sender = self.sender.lock();
        if !self.is_alive() {
            return false;
        }
        let outcome = match sender.as_ref() {
            Some(tx) => tx.try_send(frame),
            None => return false,
        };
        match outcome {
            Ok(()) => true,
            Err(e) => {
                self.alive.store(false, Ordering::Release);
                sender.take();
                match e {
                    mpsc::error::TrySendError::Full(_) => tracing::warn!(
                        session_id = %self.session_id,
                        capacity = WRITE_QUEUE_CAPACITY,
                        "sse peer stopped reading, stream dropped"
                    ),
                    mpsc::error::TrySendError::Closed(_) => tracing::debug!(
                        session_id = %self.session_id,
                        "sse write failed, peer gone"
                    ),
                }
                false
            }
        }
    }
}

/// Formats one SSE frame. Each line of `data` gets its own `data:` prefix.
pub fn format_event(name: &str, data: &str) -> String {
    let mut frame = String::with_capacity(name.len() + data.len() + 16);
    if !name.is_empty() {
        frame.push_str("event: ");
        frame.push_str(name);
        frame.push('\n');
    }
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line.strip_suffix('\r').unwrap_or(line));
        frame.push('\n');
    }
    frame.push('\n');
    frame
}
