//! # Message Delivery
//!
//! Fire-and-forget outbound delivery. The scheduler and the request worker
//! never wait on delivery and are never told whether it succeeded; transports
//! plug in behind [`MessageSender`].

use log::info;
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;

pub trait MessageSender: Send + Sync {
    /// Queue a message to a user without blocking the caller. When
    /// `jitter_ms` is non-zero the transport waits a random delay up to that
    /// many milliseconds before sending; school-wide fan-outs use this to
    /// avoid delivering identical messages to every user at once.
    fn send_nonblocking(&self, user_id: i64, text: String, jitter_ms: u64);
}

/// Transport for the slim daemon binary: logs outbound messages.
pub struct LogSender;

impl MessageSender for LogSender {
    fn send_nonblocking(&self, user_id: i64, text: String, jitter_ms: u64) {
        let delay = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        tokio::spawn(async move {
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            info!("-> user {}: {}", user_id, text.replace('\n', " | "));
        });
    }
}

/// Captures outbound messages on a channel; used by tests.
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<(i64, String)>,
}

impl ChannelSender {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(i64, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSender { tx }, rx)
    }
}

impl MessageSender for ChannelSender {
    fn send_nonblocking(&self, user_id: i64, text: String, _jitter_ms: u64) {
        // jitter is skipped so tests stay deterministic
        let _ = self.tx.send((user_id, text));
    }
}
