mod environment;
mod network;
mod session;

pub use dataset::{DatasetConfig, Mode};
pub use environment::EnvironmentConfig;
pub use network::NetworkConfig;
pub use session::SessionConfig;
