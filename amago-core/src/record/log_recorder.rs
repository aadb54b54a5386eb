use super::{AggregateRecorder, Record, RecordStorage, RecordValue, Recorder};
use log::info;

/// Writes scalar values of records with the [`log`] facade.
///
/// Non-scalar values are skipped. Keys are printed in sorted order so that
/// consecutive flushes are easy to compare.
#[derive(Default)]
pub struct LogRecorder {
    storage: RecordStorage,
}

impl LogRecorder {
    /// Constructs the recorder.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Recorder for LogRecorder {
    fn write(&mut self, record: Record) {
        let mut scalars = record
            .iter()
            .filter_map(|(k, v)| match v {
                RecordValue::Scalar(v) => Some((k.clone(), *v)),
                _ => None,
            })
            .collect::<Vec<_>>();
        scalars.sort_by(|a, b| a.0.cmp(&b.0));
        for (k, v) in scalars {
            info!("{}: {}", k, v);
        }
    }
}

impl AggregateRecorder for LogRecorder {
    fn store(&mut self, record: Record) {
        self.storage.store(record);
    }

    fn flush(&mut self, step: i64) {
        if self.storage.is_empty() {
            return;
        }
        info!("Records at step {}", step);
        let record = self.storage.aggregate();
        self.write(record);
    }
}
