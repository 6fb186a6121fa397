//! Event sink that forwards notifications to `tracing`.

use tracing::{error, info, warn};

use crate::ports::event_sink_port::{EventSink, Severity};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn notify(&self, title: &str, body: &str, severity: Severity) {
        match severity {
            Severity::Info => info!(%title, %body, "event"),
            Severity::Warning => warn!(%title, %body, "event"),
            Severity::Error => error!(%title, %body, "event"),
        }
    }
}
