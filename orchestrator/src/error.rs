use std::{error::Error, fmt, io, path::PathBuf};

use client::{ClientErr, SimError};
use dataset::DatasetErr;
use server::ServerErr;

/// The orchestrator's result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// The error type `Network` implementations report.
pub type NetworkError = Box<dyn Error + Send + Sync>;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before launching anything.
    InvalidConfig(String),
    /// Failed to bind the batch server's listener.
    BindFailed { addr: String, source: io::Error },
    /// A launched simulation client failed or couldn't be started.
    ClientError { client_id: usize, msg: String },
    Client(ClientErr),
    Server(ServerErr),
    Dataset(DatasetErr),
    /// The in-process simulation failed.
    Simulation {
        during: &'static str,
        source: SimError,
    },
    /// Too many samples of the in-process simulation were rejected.
    TooManyWrongSamples { dropped: usize, max: usize },
    InvalidPrediction(String),
    /// No network parameters to load for prediction.
    MissingNetwork(PathBuf),
    Network(NetworkError),
    Json(serde_json::Error),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::BindFailed { addr, source } => write!(f, "failed to bind {addr}: {source}"),
            Self::ClientError { client_id, msg } => write!(f, "client {client_id} error: {msg}"),
            Self::Client(e) => write!(f, "client error: {e}"),
            Self::Server(e) => write!(f, "server error: {e}"),
            Self::Dataset(e) => write!(f, "dataset error: {e}"),
            Self::Simulation { during, source } => {
                write!(f, "simulation failed during {during}: {source}")
            }
            Self::TooManyWrongSamples { dropped, max } => {
                write!(f, "dropped {dropped} samples in a single call, at most {max} allowed")
            }
            Self::InvalidPrediction(msg) => write!(f, "invalid prediction: {msg}"),
            Self::MissingNetwork(path) => write!(f, "no network to load at {}", path.display()),
            Self::Network(e) => write!(f, "network error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::BindFailed { source, .. } => Some(source),
            Self::Client(e) => Some(e),
            Self::Server(e) => Some(e),
            Self::Dataset(e) => Some(e),
            Self::Simulation { source, .. } => Some(source.as_ref()),
            Self::Network(e) => Some(e.as_ref()),
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ClientErr> for OrchestratorError {
    fn from(e: ClientErr) -> Self {
        Self::Client(e)
    }
}

impl From<ServerErr> for OrchestratorError {
    fn from(e: ServerErr) -> Self {
        Self::Server(e)
    }
}

impl From<DatasetErr> for OrchestratorError {
    fn from(e: DatasetErr) -> Self {
        Self::Dataset(e)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
