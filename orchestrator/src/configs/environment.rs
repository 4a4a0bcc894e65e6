use std::{
    net::{IpAddr, Ipv4Addr},
    num::NonZeroUsize,
    thread,
};

use comms::Parameters;
use serde::{Deserialize, Serialize};
use server::{BatchServerConfig, DEFAULT_MAX_WRONG_SAMPLES};

use crate::error::{OrchestratorError, Result};

fn default_simulations_per_step() -> usize {
    1
}

fn default_max_wrong_samples_per_step() -> usize {
    DEFAULT_MAX_WRONG_SAMPLES
}

fn default_number_of_thread() -> usize {
    1
}

fn default_ip_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// The environment manager's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Steps performed per produced sample, the last one computes it.
    #[serde(default = "default_simulations_per_step")]
    pub simulations_per_step: usize,
    /// Rejected samples tolerated in a single `get_data` call.
    #[serde(default = "default_max_wrong_samples_per_step")]
    pub max_wrong_samples_per_step: usize,
    /// Produce fresh samples on every training epoch instead of replaying.
    #[serde(default)]
    pub always_create_data: bool,
    /// The amount of simulation clients, clamped to the available parallelism.
    #[serde(default = "default_number_of_thread")]
    pub number_of_thread: usize,
    /// Replayed samples are injected into the simulations before being used.
    #[serde(default)]
    pub use_dataset_in_environment: bool,
    #[serde(default = "default_ip_address")]
    pub ip_address: IpAddr,
    /// `0` binds an ephemeral port.
    #[serde(default)]
    pub port: u16,
    /// Parameters sent to every simulation on connection.
    #[serde(default)]
    pub param_dict: Parameters,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            simulations_per_step: default_simulations_per_step(),
            max_wrong_samples_per_step: default_max_wrong_samples_per_step(),
            always_create_data: false,
            number_of_thread: default_number_of_thread(),
            use_dataset_in_environment: false,
            ip_address: default_ip_address(),
            port: 0,
            param_dict: Parameters::new(),
        }
    }
}

impl EnvironmentConfig {
    /// Checks the config before any client is launched.
    pub fn validate(&self) -> Result<()> {
        if self.simulations_per_step == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "simulations_per_step must be at least 1".into(),
            ));
        }

        if self.number_of_thread == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "number_of_thread must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// The amount of clients to launch, never above the available parallelism.
    pub fn clients(&self) -> usize {
        let cpus = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        self.number_of_thread.clamp(1, cpus)
    }

    /// The batch server's share of the config.
    pub fn server_config(&self) -> BatchServerConfig {
        BatchServerConfig {
            simulations_per_step: self.simulations_per_step,
            max_wrong_samples_per_step: self.max_wrong_samples_per_step,
            parameters: self.param_dict.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_their_defaults() {
        let config: EnvironmentConfig = serde_json::from_str(r#"{ "port": 5000 }"#).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.simulations_per_step, 1);
        assert_eq!(config.max_wrong_samples_per_step, 10);
        assert_eq!(config, EnvironmentConfig { port: 5000, ..Default::default() });
        assert_eq!(config.ip_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn clients_are_clamped_to_the_cpu_count() {
        let config = EnvironmentConfig {
            number_of_thread: usize::MAX,
            ..Default::default()
        };

        let cpus = thread::available_parallelism().unwrap().get();
        assert_eq!(config.clients(), cpus);
    }

    #[test]
    fn zero_steps_per_sample_is_rejected() {
        let config = EnvironmentConfig {
            simulations_per_step: 0,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }
}
