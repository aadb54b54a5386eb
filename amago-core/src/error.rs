//! Errors in the library.
use thiserror::Error;

/// Errors raised by AMAGO components.
#[derive(Debug, Error)]
pub enum AmagoError {
    /// The key was not found in a record.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// The value in a record has an unexpected type.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),

    /// The experiment is misconfigured.
    ///
    /// This covers unsupported action spaces, ensemble subsets larger than the
    /// ensemble and empty discount factor sets.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A loss term requested a capability the action distribution lacks,
    /// e.g., a reparameterized sample from a categorical distribution.
    #[error("Capability error: {0}")]
    Capability(String),

    /// A tensor does not have the expected shape.
    #[error("Shape error in {name}: expected {expected:?}, got {actual:?}")]
    Shape {
        /// Name of the offending tensor.
        name: String,

        /// Expected dimensions.
        expected: Vec<usize>,

        /// Actual dimensions.
        actual: Vec<usize>,
    },
}

impl AmagoError {
    /// Builds [`AmagoError::Shape`].
    pub fn shape(name: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::Shape {
            name: name.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
