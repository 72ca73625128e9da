//! Per-job log channels.
//!
//! One unbounded channel per job id, created at submission and replaced
//! on rerun. The receiving end is handed out once to the SSE stream;
//! the slot is removed after a terminal sentinel is consumed.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tv_pipeline::progress::{JobLog, LogEvent};

struct Slot {
    tx: mpsc::UnboundedSender<LogEvent>,
    rx: Option<UnboundedReceiver<LogEvent>>,
}

#[derive(Default)]
pub struct LogRegistry {
    inner: Mutex<HashMap<String, Slot>>,
}

impl LogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the channel for a job, returning the producer
    /// handle. A replaced channel's old receiver ends its stream.
    pub fn open(&self, job_id: &str) -> JobLog {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().insert(
            job_id.to_string(),
            Slot {
                tx: tx.clone(),
                rx: Some(rx),
            },
        );
        JobLog::new(tx)
    }

    /// The producer handle for a job that already has a channel.
    pub fn producer(&self, job_id: &str) -> JobLog {
        match self.inner.lock().get(job_id) {
            Some(slot) => JobLog::new(slot.tx.clone()),
            None => JobLog::discard(),
        }
    }

    /// Hand out the receiving end. Each channel has exactly one
    /// receiver, so a second call returns `None`.
    pub fn take_receiver(&self, job_id: &str) -> Option<UnboundedReceiver<LogEvent>> {
        self.inner.lock().get_mut(job_id).and_then(|s| s.rx.take())
    }

    pub fn remove(&self, job_id: &str) {
        self.inner.lock().remove(job_id);
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.inner.lock().contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_job_fifo_and_independence() {
        let registry = LogRegistry::new();
        let log_a = registry.open("a");
        let log_b = registry.open("b");
        log_a.line("a1");
        log_b.line("b1");
        log_a.line("a2");

        let mut rx_a = registry.take_receiver("a").unwrap();
        let mut rx_b = registry.take_receiver("b").unwrap();
        assert_eq!(rx_a.recv().await, Some(LogEvent::Line("a1".into())));
        assert_eq!(rx_a.recv().await, Some(LogEvent::Line("a2".into())));
        assert_eq!(rx_b.recv().await, Some(LogEvent::Line("b1".into())));
    }

    #[test]
    fn receiver_is_handed_out_once() {
        let registry = LogRegistry::new();
        registry.open("a");
        assert!(registry.take_receiver("a").is_some());
        assert!(registry.take_receiver("a").is_none());
    }

    #[tokio::test]
    async fn reopen_replaces_the_channel() {
        let registry = LogRegistry::new();
        let old = registry.open("a");
        let mut old_rx = registry.take_receiver("a").unwrap();
        registry.open("a");
        old.line("into the old channel");
        // The old sender's slot is gone; the old receiver still drains
        // what was sent on its own channel, then ends.
        assert_eq!(
            old_rx.recv().await,
            Some(LogEvent::Line("into the old channel".into()))
        );
        assert!(registry.take_receiver("a").is_some());
    }
}
