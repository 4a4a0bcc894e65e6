use std::{error::Error, fmt, io};

/// The client module's result type.
pub type Result<T> = std::result::Result<T, ClientErr>;

/// The error type simulations report back to the client loop.
pub type SimError = Box<dyn Error + Send + Sync>;

/// Simulation client failures.
#[derive(Debug)]
pub enum ClientErr {
    Io(io::Error),
    UnexpectedCommand {
        step: usize,
        got: comms::Command,
    },
    Simulation {
        step: usize,
        during: &'static str,
        source: SimError,
    },
}

impl fmt::Display for ClientErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErr::Io(e) => write!(f, "io error: {e}"),
            ClientErr::UnexpectedCommand { step, got } => {
                write!(f, "unexpected command at step {step}: got {got}")
            }
            ClientErr::Simulation {
                step,
                during,
                source,
            } => write!(f, "simulation failed at step {step} during {during}: {source}"),
        }
    }
}

impl Error for ClientErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientErr::Io(e) => Some(e),
            ClientErr::Simulation { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ClientErr> for io::Error {
    fn from(value: ClientErr) -> Self {
        match value {
            ClientErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
