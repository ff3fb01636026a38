//! Provides [`ContagionError`] and wraps other errors.
use std::fmt::{self, Debug, Display};
use std::io;

#[derive(Debug)]
/// The crate-wide error type. Configuration problems, malformed input
/// tables and out-of-range accesses all surface as a `ContagionError`;
/// hot-path invariant violations are asserts instead.
pub enum ContagionError {
    IoError(io::Error),
    JsonError(serde_json::Error),
    CsvError(csv::Error),
    ParseIntError(std::num::ParseIntError),
    ParseFloatError(std::num::ParseFloatError),
    /// A required parameter was absent or malformed.
    MissingParameter(String),
    /// An indexed accessor was called with an index outside the
    /// container, e.g. `EventQueue::get` past the end of a slot.
    OutOfRange(String),
    ContagionError(String),
}

impl From<io::Error> for ContagionError {
    fn from(error: io::Error) -> Self {
        ContagionError::IoError(error)
    }
}

impl From<serde_json::Error> for ContagionError {
    fn from(error: serde_json::Error) -> Self {
        ContagionError::JsonError(error)
    }
}

impl From<csv::Error> for ContagionError {
    fn from(error: csv::Error) -> Self {
        ContagionError::CsvError(error)
    }
}

impl From<std::num::ParseIntError> for ContagionError {
    fn from(error: std::num::ParseIntError) -> Self {
        ContagionError::ParseIntError(error)
    }
}

impl From<std::num::ParseFloatError> for ContagionError {
    fn from(error: std::num::ParseFloatError) -> Self {
        ContagionError::ParseFloatError(error)
    }
}

impl From<String> for ContagionError {
    fn from(error: String) -> Self {
        ContagionError::ContagionError(error)
    }
}

impl From<&str> for ContagionError {
    fn from(error: &str) -> Self {
        ContagionError::ContagionError(error.to_string())
    }
}

impl std::error::Error for ContagionError {}

impl Display for ContagionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {self:?}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_conversion() {
        let e: ContagionError = "bad input".into();
        assert!(matches!(e, ContagionError::ContagionError(_)));
        assert!(format!("{e}").contains("bad input"));
    }

    #[test]
    fn io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let e: ContagionError = io_err.into();
        assert!(matches!(e, ContagionError::IoError(_)));
    }
}
