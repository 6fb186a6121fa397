//! Concrete adapter implementations for ports.

pub mod caching_backend;
pub mod clock_adapter;
pub mod csv_adapter;
pub mod csv_report_adapter;
pub mod file_config_adapter;
pub mod memory_backend;
pub mod tracing_event_sink;
