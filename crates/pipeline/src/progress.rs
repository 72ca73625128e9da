//! Job-visible progress lines.
//!
//! Each running job owns one unbounded channel; the gateway's log registry
//! holds the receiving end and forwards it over SSE. A dropped receiver
//! just makes sends no-ops, the pipeline never blocks on a slow reader.

use tokio::sync::mpsc::UnboundedSender;

/// One event on a job's log channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Line(String),
    /// Terminal: the job finished.
    Done,
    /// Terminal: the job failed with this message.
    Failed(String),
}

/// Producer handle the pipeline writes progress through.
#[derive(Clone)]
pub struct JobLog {
    tx: Option<UnboundedSender<LogEvent>>,
}

impl JobLog {
    pub fn new(tx: UnboundedSender<LogEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A log that drops everything, for batch runs without a listener.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    fn send(&self, event: LogEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn line(&self, msg: impl Into<String>) {
        self.send(LogEvent::Line(msg.into()));
    }

    pub fn done(&self) {
        self.send(LogEvent::Done);
    }

    pub fn fail(&self, msg: impl Into<String>) {
        self.send(LogEvent::Failed(msg.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let log = JobLog::new(tx);
        log.line("one");
        log.line("two");
        log.done();
        assert_eq!(rx.recv().await, Some(LogEvent::Line("one".into())));
        assert_eq!(rx.recv().await, Some(LogEvent::Line("two".into())));
        assert_eq!(rx.recv().await, Some(LogEvent::Done));
    }

    #[test]
    fn discard_log_never_panics() {
        let log = JobLog::discard();
        log.line("unheard");
        log.fail("also unheard");
    }
}
