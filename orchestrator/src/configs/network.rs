use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where network parameters are saved to and loaded from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Loads networks from this directory instead of the session's `network/`.
    #[serde(default)]
    pub network_dir: Option<PathBuf>,
    #[serde(default)]
    pub save_each_epoch: bool,
    /// The index `k` of the `<session>_network_<k>` file to load for
    /// prediction, the newest one when absent.
    #[serde(default)]
    pub which_network: Option<usize>,
}
