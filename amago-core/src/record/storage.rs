//! Aggregation of records collected between two flushes.
use super::{Record, RecordValue};
use std::collections::HashSet;
use xxhash_rust::xxh3::Xxh3Builder;

/// Stores records and aggregates them on demand.
///
/// Scalars stored more than once under the same key are summarized with
/// `_min`, `_max`, `_mean` and `_median` suffixes. For any other value type
/// the most recent value is kept.
#[derive(Default)]
pub struct RecordStorage {
    data: Vec<Record>,
}

fn min(vs: &[f32]) -> f32 {
    vs.iter().copied().fold(f32::INFINITY, f32::min)
}

fn max(vs: &[f32]) -> f32 {
    vs.iter().copied().fold(f32::NEG_INFINITY, f32::max)
}

fn mean(vs: &[f32]) -> f32 {
    vs.iter().sum::<f32>() / vs.len() as f32
}

fn median(mut vs: Vec<f32>) -> f32 {
    vs.sort_by(|x, y| x.total_cmp(y));
    vs[vs.len() / 2]
}

impl RecordStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    /// Stores a record.
    pub fn store(&mut self, record: Record) {
        self.data.push(record);
    }

    /// Returns `true` if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn keys(&self) -> HashSet<String, Xxh3Builder> {
        let mut keys = HashSet::<String, Xxh3Builder>::default();
        for record in self.data.iter() {
            keys.extend(record.keys().cloned());
        }
        keys
    }

    fn latest(&self, key: &str) -> Option<RecordValue> {
        self.data
            .iter()
            .rev()
            .find_map(|record| record.get(key).cloned())
    }

    fn scalars(&self, key: &str) -> Vec<f32> {
        self.data
            .iter()
            .filter_map(|record| match record.get(key) {
                Some(RecordValue::Scalar(v)) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Aggregates all stored records and clears the storage.
    pub fn aggregate(&mut self) -> Record {
        let mut record = Record::empty();

        for key in self.keys().iter() {
            match self.latest(key) {
                Some(RecordValue::Scalar(v)) => {
                    let vs = self.scalars(key);
                    if vs.len() == 1 {
                        record.insert_scalar(key.clone(), v);
                    } else {
                        record.insert_scalar(format!("{}_min", key), min(&vs));
                        record.insert_scalar(format!("{}_max", key), max(&vs));
                        record.insert_scalar(format!("{}_mean", key), mean(&vs));
                        record.insert_scalar(format!("{}_median", key), median(vs));
                    }
                }
                Some(value) => record.insert(key.clone(), value),
                None => {}
            }
        }

        self.data.clear();
        record
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_aggregate_scalars() {
        let mut storage = RecordStorage::new();
        for v in [1.0, 5.0, 3.0] {
            storage.store(Record::from_scalar("loss", v));
        }
        storage.store(Record::from_scalar("epoch", 2.0));

        let record = storage.aggregate();
        assert_eq!(record.get_scalar("loss_min").unwrap(), 1.0);
        assert_eq!(record.get_scalar("loss_max").unwrap(), 5.0);
        assert_eq!(record.get_scalar("loss_mean").unwrap(), 3.0);
        assert_eq!(record.get_scalar("loss_median").unwrap(), 3.0);
        assert_eq!(record.get_scalar("epoch").unwrap(), 2.0);
        assert!(storage.is_empty());
    }
}
