//! Key-value records of training statistics.
use crate::error::AmagoError;
use std::collections::{
    hash_map::{IntoIter, Iter, Keys},
    HashMap,
};

/// A value stored in a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A single floating-point value, like a loss.
    Scalar(f32),

    /// A 1-dimensional array, e.g., a per-gamma statistic.
    Array1(Vec<f32>),
}

/// A container of named values produced by an update step, an evaluation
/// run or the replay buffer.
///
/// Update statistics are accumulated into a [`Record`] owned by the caller,
/// so that no process-wide logging state is required.
///
/// ```rust
/// use amago_core::record::{Record, RecordValue};
///
/// let mut record = Record::from_scalar("critic_loss", 0.5);
/// record.insert("actor_loss", RecordValue::Scalar(-1.2));
/// assert_eq!(record.get_scalar("critic_loss").unwrap(), 0.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Creates an empty record.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Creates a record containing a single scalar value.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Creates a record from a slice of key-value pairs.
    pub fn from_slice<K: Into<String> + Clone>(s: &[(K, RecordValue)]) -> Self {
        Self(
            s.iter()
                .map(|(k, v)| (k.clone().into(), v.clone()))
                .collect(),
        )
    }

    /// Returns an iterator over the keys.
    pub fn keys(&self) -> Keys<String, RecordValue> {
        self.0.keys()
    }

    /// Inserts a key-value pair, replacing an existing value with the same key.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Inserts a scalar value.
    pub fn insert_scalar(&mut self, k: impl Into<String>, v: f32) {
        self.0.insert(k.into(), RecordValue::Scalar(v));
    }

    /// Returns an iterator over the key-value pairs.
    pub fn iter(&self) -> Iter<'_, String, RecordValue> {
        self.0.iter()
    }

    /// Returns an iterator that consumes the record.
    pub fn into_iter_in_record(self) -> IntoIter<String, RecordValue> {
        self.0.into_iter()
    }

    /// Gets a reference to the value associated with the given key.
    pub fn get(&self, k: &str) -> Option<&RecordValue> {
        self.0.get(k)
    }

    /// Merges two records. Values of `record` win on key collisions.
    pub fn merge(self, record: Record) -> Self {
        Record(self.0.into_iter().chain(record.0).collect())
    }

    /// Merges another record into this one in place.
    pub fn merge_inplace(&mut self, record: Record) {
        self.0.extend(record.0);
    }

    /// Gets a scalar value.
    ///
    /// # Errors
    ///
    /// Returns [`AmagoError::RecordKeyError`] if the key does not exist and
    /// [`AmagoError::RecordValueTypeError`] if the value is not a scalar.
    pub fn get_scalar(&self, k: &str) -> Result<f32, AmagoError> {
        match self.0.get(k) {
            Some(RecordValue::Scalar(v)) => Ok(*v),
            Some(_) => Err(AmagoError::RecordValueTypeError("Scalar".to_string())),
            None => Err(AmagoError::RecordKeyError(k.to_string())),
        }
    }

    /// Gets a 1-dimensional array.
    pub fn get_array1(&self, k: &str) -> Result<Vec<f32>, AmagoError> {
        match self.0.get(k) {
            Some(RecordValue::Array1(v)) => Ok(v.clone()),
            Some(_) => Err(AmagoError::RecordValueTypeError("Array1".to_string())),
            None => Err(AmagoError::RecordKeyError(k.to_string())),
        }
    }

    /// Returns `true` if the record contains no values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of values in the record.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_get_scalar_errors() {
        let mut record = Record::from_scalar("loss", 1.0);
        record.insert("per_gamma", RecordValue::Array1(vec![0.5, 1.5]));

        assert_eq!(record.get_scalar("loss").unwrap(), 1.0);
        assert!(matches!(
            record.get_scalar("missing"),
            Err(AmagoError::RecordKeyError(_))
        ));
        assert!(matches!(
            record.get_scalar("per_gamma"),
            Err(AmagoError::RecordValueTypeError(_))
        ));
        assert_eq!(record.get_array1("per_gamma").unwrap(), vec![0.5, 1.5]);
        assert!(record.get_array1("loss").is_err());
    }

    #[test]
    fn test_merge_overwrites() {
        let r1 = Record::from_slice(&[
            ("a", RecordValue::Scalar(1.0)),
            ("b", RecordValue::Scalar(2.0)),
        ]);
        let r2 = Record::from_scalar("b", 3.0);
        let r = r1.merge(r2);

        assert_eq!(r.len(), 2);
        assert_eq!(r.get_scalar("b").unwrap(), 3.0);
    }
}
