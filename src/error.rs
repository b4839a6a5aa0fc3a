use crate::units::{DimensionError, UnknownUnitError};
use thiserror::Error;

/// Errors surfaced while decoding cycler files and deriving capacities
#[derive(Debug, Error)]
pub enum CyclerError {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// UTF-8 parsing errors
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// Delimited text errors from the csv reader/writer
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// File does not match any known layout, or declares bytes it does not contain
    #[error("File format error: {0}")]
    FileFormat(String),
    /// A module whose internal layout is not known; the decoder skips these
    #[error("Unsupported layout: {0}")]
    UnsupportedLayout(String),
    /// Charge/discharge current requested but not present in the file
    #[error("Cannot read current: {0}")]
    ReadCurrent(String),
    /// Arithmetic or conversion between incompatible units
    #[error(transparent)]
    Dimension(#[from] DimensionError),
    /// Unknown column requested from a table
    #[error("Cannot find column '{name}'. Choices are {choices:?}")]
    ColumnNotFound { name: String, choices: Vec<String> },
    /// Unknown column requested for one axis of a plot series
    #[error("Cannot find {axis} column '{name}'. Choices are {choices:?}")]
    AxisColumnNotFound {
        axis: &'static str,
        name: String,
        choices: Vec<String>,
    },
    /// Value outside an enumerated set of options
    #[error("Invalid {option} '{value}'. Choices are {choices:?}")]
    InvalidOption {
        option: &'static str,
        value: String,
        choices: Vec<&'static str>,
    },
    /// Cycle index outside the cycles of an experiment
    #[error("Cycle index {index} out of range for {count} cycles")]
    CycleNotFound { index: isize, count: usize },
    /// Paired sequences of different length
    #[error("Length mismatch: expected {expected} values, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    /// Parse errors with context
    #[error("Parse error: {0}")]
    Parse(String),
    /// End of data reached unexpectedly
    #[error("Unexpected end of data")]
    UnexpectedEof,
    /// JSON export errors
    #[cfg(feature = "json")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<UnknownUnitError> for CyclerError {
    fn from(err: UnknownUnitError) -> Self {
        CyclerError::Parse(err.to_string())
    }
}

impl CyclerError {
    /// True for errors that only invalidate a single module, not the file
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CyclerError::UnsupportedLayout(_))
    }
}

pub type Result<T> = std::result::Result<T, CyclerError>;
