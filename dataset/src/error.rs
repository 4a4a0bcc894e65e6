use std::{error::Error, fmt, io};

use crate::config::Mode;

/// The dataset module's result type.
pub type Result<T> = std::result::Result<T, DatasetErr>;

/// Dataset manager failures.
#[derive(Debug)]
pub enum DatasetErr {
    Io(io::Error),
    Json(serde_json::Error),
    InvalidConfig(String),
    /// The on-disk dataset is inconsistent: missing lists, diverging
    /// partition counts or misaligned partitions.
    Integrity(String),
    /// A sample doesn't match the registered field set.
    FieldMismatch(String),
    ModeIsTerminal {
        to: Mode,
    },
    /// No sample is stored in the requested modes.
    Empty(Vec<Mode>),
}

impl fmt::Display for DatasetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetErr::Io(e) => write!(f, "io error: {e}"),
            DatasetErr::Json(e) => write!(f, "json error: {e}"),
            DatasetErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            DatasetErr::Integrity(msg) => write!(f, "dataset integrity error: {msg}"),
            DatasetErr::FieldMismatch(msg) => write!(f, "field mismatch: {msg}"),
            DatasetErr::ModeIsTerminal { to } => {
                write!(f, "can't switch to {to}, the Running mode is terminal")
            }
            DatasetErr::Empty(modes) => write!(f, "no sample stored in {modes:?}"),
        }
    }
}

impl Error for DatasetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DatasetErr::Io(e) => Some(e),
            DatasetErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DatasetErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for DatasetErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
