//! Notification port trait.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Fire-and-forget notifications about orders and deactivations.
/// Implementations must not block the caller or report failure.
pub trait EventSink: Send + Sync {
    fn notify(&self, title: &str, body: &str, severity: Severity);
}

/// Sink used when nothing is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn notify(&self, _title: &str, _body: &str, _severity: Severity) {}
}
