//! Types and traits for recording training statistics.
//!
//! * [`Record`] is a key-value container of [`RecordValue`]s. The update step
//!   of an agent fills a [`Record`] passed by the caller.
//! * [`Recorder`] writes a record somewhere, [`AggregateRecorder`] stores
//!   records and writes their aggregation on flush.
//! * [`RecordStorage`] summarizes stored scalars with min, max, mean and median.
//!
//! ```rust
//! use amago_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("epoch", RecordValue::Scalar(3.0));
//! record.insert("per_gamma", RecordValue::Array1(vec![0.1, 0.2]));
//! ```
mod base;
mod buffered_recorder;
mod log_recorder;
mod null_recorder;
mod recorder;
mod storage;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use log_recorder::LogRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::{AggregateRecorder, Recorder};
pub use storage::RecordStorage;
