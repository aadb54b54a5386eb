use super::Record;

/// Writes a record to an output destination.
pub trait Recorder {
    /// Writes a record.
    fn write(&mut self, record: Record);
}

/// A [`Recorder`] that stores records and writes their aggregation on flush.
///
/// The trainer stores the records of every update and environment rollout,
/// then flushes once per epoch.
pub trait AggregateRecorder {
    /// Stores a record.
    fn store(&mut self, record: Record);

    /// Writes values aggregated from the stored records.
    ///
    /// `step` is attached to the aggregated record, typically the epoch.
    fn flush(&mut self, step: i64);
}
