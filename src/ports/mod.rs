//! Port traits for the collaborators the domain depends on.

pub mod backend_port;
pub mod clock_port;
pub mod config_port;
pub mod event_sink_port;
pub mod exchange_port;
pub mod report_port;
