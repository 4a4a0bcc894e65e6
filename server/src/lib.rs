mod config;
mod error;
mod server;
mod validate;

pub use config::{BatchServerConfig, DEFAULT_MAX_WRONG_SAMPLES};
pub use error::{Result, ServerErr};
pub use server::{BatchServer, TcpBatchServer};
pub use validate::{Rejection, SampleRegistry};
