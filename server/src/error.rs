use std::{error::Error, fmt, io};

/// The server module's result type.
pub type Result<T> = std::result::Result<T, ServerErr>;

/// Batch server failures.
#[derive(Debug)]
pub enum ServerErr {
    Io(io::Error),
    /// A single client broke the exchange, the batch is aborted.
    Client {
        client_id: usize,
        source: io::Error,
    },
    NoClients,
    TooManyWrongSamples {
        dropped: usize,
        max: usize,
    },
    InvalidConfig(String),
    InvalidPrediction(String),
}

impl fmt::Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErr::Io(e) => write!(f, "io error: {e}"),
            ServerErr::Client { client_id, source } => {
                write!(f, "client {client_id} failed: {source}")
            }
            ServerErr::NoClients => write!(f, "no client is connected"),
            ServerErr::TooManyWrongSamples { dropped, max } => {
                write!(f, "dropped {dropped} samples in a single call, at most {max} allowed")
            }
            ServerErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            ServerErr::InvalidPrediction(msg) => write!(f, "invalid prediction: {msg}"),
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerErr::Io(e) => Some(e),
            ServerErr::Client { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for ServerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ServerErr> for io::Error {
    fn from(value: ServerErr) -> Self {
        match value {
            ServerErr::Io(e) | ServerErr::Client { source: e, .. } => e,
            ServerErr::InvalidConfig(_) | ServerErr::InvalidPrediction(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, value.to_string())
            }
            other => io::Error::other(other.to_string()),
        }
    }
}
