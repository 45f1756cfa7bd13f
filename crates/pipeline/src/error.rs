use std::fmt;

/// Failure reported by a store implementation.
///
/// Connectivity, query, write and decode failures are all fatal to the run
/// that hit them; the engine never retries.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Cannot open or reach the store.
    Connect(String),
    /// A read failed.
    Query { op: &'static str, message: String },
    /// A write failed.
    Write { op: &'static str, message: String },
    /// A stored row does not have the expected shape.
    Decode { op: &'static str, message: String },
}

impl StoreError {
    pub fn query(op: &'static str, message: impl Into<String>) -> Self {
        Self::Query { op, message: message.into() }
    }

    pub fn write(op: &'static str, message: impl Into<String>) -> Self {
        Self::Write { op, message: message.into() }
    }

    pub fn decode(op: &'static str, message: impl Into<String>) -> Self {
        Self::Decode { op, message: message.into() }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "store connection error: {msg}"),
            Self::Query { op, message } => write!(f, "{op}: query failed: {message}"),
            Self::Write { op, message } => write!(f, "{op}: write failed: {message}"),
            Self::Decode { op, message } => write!(f, "{op}: unexpected row shape: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug)]
pub enum ExportError {
    /// Date string is not `YYYY-MM-DD`.
    InvalidDate(String),
    /// Date lies after today.
    FutureDate(String),
    /// Start date after end date.
    InvalidRange { start: String, end: String },
    /// Export type is neither `fuel` nor `propane`.
    UnknownExportType(String),
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error.
    ConfigValidation(String),
    /// No staging rows are held for this run id.
    UnknownRun(String),
    /// Store failure outside the consolidation stage.
    Store(StoreError),
}

impl ExportError {
    /// True for errors raised before any pipeline stage touched a store.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidDate(_)
                | Self::FutureDate(_)
                | Self::InvalidRange { .. }
                | Self::UnknownExportType(_)
        )
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDate(value) => {
                write!(f, "invalid date '{value}': expected YYYY-MM-DD")
            }
            Self::FutureDate(value) => {
                write!(f, "invalid date '{value}': date cannot be in the future")
            }
            Self::InvalidRange { start, end } => {
                write!(f, "invalid date range: start {start} is after end {end}")
            }
            Self::UnknownExportType(value) => {
                write!(f, "invalid export type '{value}': expected \"fuel\" or \"propane\"")
            }
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::UnknownRun(run_id) => write!(f, "no staging rows held for run '{run_id}'"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ExportError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}
