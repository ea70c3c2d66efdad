//! Sensor message ingest

mod decode;
mod pipeline;
mod throttle;
mod writer;

pub use decode::{decode_reading, DecodeError};
pub use pipeline::{BroadcastPayload, IngestOutcome, IngestPipeline, PipelineStats, Trend};
pub use throttle::{PersistenceThrottle, MAX_SAVE_INTERVAL_SECS};
pub use writer::{MeasurementWriter, WriterStats};
