use comms::Parameters;

use crate::error::{Result, ServerErr};

/// Rejected samples tolerated per call unless configured otherwise.
pub const DEFAULT_MAX_WRONG_SAMPLES: usize = 10;

/// The batch server's round configuration.
#[derive(Debug, Clone)]
pub struct BatchServerConfig {
    /// Steps every client performs per produced sample, the last one being a `cmpt`.
    pub simulations_per_step: usize,
    /// Rejected samples tolerated in a single `get_batch` call.
    pub max_wrong_samples_per_step: usize,
    /// The parameters sent to every client on connection.
    pub parameters: Parameters,
}

impl Default for BatchServerConfig {
    fn default() -> Self {
        Self {
            simulations_per_step: 1,
            max_wrong_samples_per_step: DEFAULT_MAX_WRONG_SAMPLES,
            parameters: Parameters::new(),
        }
    }
}

impl BatchServerConfig {
    /// Checks the config before any client is accepted.
    ///
    /// # Returns
    /// An `InvalidConfig` error if `simulations_per_step` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.simulations_per_step == 0 {
            return Err(ServerErr::InvalidConfig(
                "simulations_per_step must be at least 1".into(),
            ));
        }

        Ok(())
    }
}
