use chrono::{DateTime, Utc};
use crossbeam::channel::Sender;
use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// Human-readable notification from the acquisition worker.
#[derive(Debug, Clone)]
pub struct DetectorEvent {
    pub severity: EventSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Logs and forwards worker events. Sending never blocks and a missing
/// receiver is not an error.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: Sender<DetectorEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: Sender<DetectorEvent>) -> Self {
        Self { tx }
    }

    fn emit(&self, severity: EventSeverity, message: String) {
        let _ = self.tx.try_send(DetectorEvent {
            severity,
            message,
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(EventSeverity::Info, message);
    }

    pub(crate) fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.emit(EventSeverity::Warning, message);
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.emit(EventSeverity::Error, message);
    }
}
