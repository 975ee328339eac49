pub mod alerts;
pub mod log_buffer;
pub mod metrics;

pub use alerts::AlertSink;
pub use log_buffer::LogBuffer;
pub use metrics::Metrics;
