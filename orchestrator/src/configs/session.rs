use std::{fs, path::{Path, PathBuf}};

use dataset::DatasetConfig;
use serde::{Deserialize, Serialize};

use super::{EnvironmentConfig, NetworkConfig};
use crate::error::{OrchestratorError, Result};

fn default_session_dir() -> PathBuf {
    PathBuf::from("sessions")
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

/// Everything a training or prediction session needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// The root every session directory is created in.
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
    pub session_name: String,
    /// Train a network, otherwise run a trained one.
    #[serde(default = "default_true")]
    pub training: bool,
    #[serde(default = "default_one")]
    pub nb_epochs: usize,
    #[serde(default = "default_one")]
    pub nb_batches: usize,
    #[serde(default = "default_one")]
    pub batch_size: usize,
    /// Prediction steps performed by the runner.
    #[serde(default)]
    pub nb_steps: usize,
    /// Push every training prediction back to the simulations.
    #[serde(default)]
    pub apply_prediction: bool,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Record (and replay) samples on disk, nothing is stored when absent.
    #[serde(default)]
    pub dataset: Option<DatasetConfig>,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl SessionConfig {
    /// Creates a training config with every other setting at it's default.
    pub fn new(session_dir: impl Into<PathBuf>, session_name: impl Into<String>) -> Self {
        Self {
            session_dir: session_dir.into(),
            session_name: session_name.into(),
            training: true,
            nb_epochs: 1,
            nb_batches: 1,
            batch_size: 1,
            nb_steps: 0,
            apply_prediction: false,
            environment: EnvironmentConfig::default(),
            dataset: None,
            network: NetworkConfig::default(),
        }
    }

    /// Loads and validates a config stored as JSON.
    ///
    /// # Arguments
    /// * `path` - The config file.
    ///
    /// # Errors
    /// `Io` or `Json` if the file can't be read, `InvalidConfig` if it's
    /// contents are not usable.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read(path)?;
        let config: Self = serde_json::from_slice(&contents)?;
        config.validate()?;
        Ok(config)
    }

    // ---- Validation ----

    /// Checks the whole config before any process is launched or file created.
    pub fn validate(&self) -> Result<()> {
        self.validate_session_name()?;
        self.validate_loop_sizes()?;
        self.environment.validate()?;

        if let Some(dataset) = &self.dataset {
            dataset.validate()?;
        } else if self.environment.use_dataset_in_environment {
            return Err(OrchestratorError::InvalidConfig(
                "use_dataset_in_environment requires a dataset".into(),
            ));
        }

        Ok(())
    }

    fn validate_session_name(&self) -> Result<()> {
        let name = &self.session_name;
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(OrchestratorError::InvalidConfig(format!(
                "session_name {name:?} must be a plain directory name"
            )));
        }

        Ok(())
    }

    fn validate_loop_sizes(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }

        if self.training && (self.nb_epochs == 0 || self.nb_batches == 0) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "training needs at least one epoch and one batch, got {} x {}",
                self.nb_epochs, self.nb_batches
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(
            &path,
            r#"{
                "session_name": "spring",
                "nb_epochs": 3,
                "nb_batches": 10,
                "batch_size": 32,
                "environment": { "number_of_thread": 2, "simulations_per_step": 4 },
                "dataset": { "partition_size": 0.5, "shuffle_dataset": true },
                "network": { "save_each_epoch": true }
            }"#,
        )
        .unwrap();

        let config = SessionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.session_dir, PathBuf::from("sessions"));
        assert!(config.training);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.environment.simulations_per_step, 4);
        assert_eq!(config.dataset.unwrap().partition_size, 0.5);
        assert!(config.network.save_each_epoch);
    }

    #[test]
    fn rejects_unusable_configs() {
        let mut config = SessionConfig::new("root", "a/b");
        assert!(matches!(
            config.validate(),
            Err(OrchestratorError::InvalidConfig(_))
        ));

        config.session_name = "ok".into();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        config.batch_size = 4;
        config.environment.use_dataset_in_environment = true;
        assert!(config.validate().is_err());

        config.dataset = Some(DatasetConfig {
            partition_size: -1.0,
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(OrchestratorError::Dataset(_))));
    }

    #[test]
    fn prediction_sessions_need_no_epochs() {
        let mut config = SessionConfig::new("root", "run");
        config.training = false;
        config.nb_epochs = 0;
        config.nb_steps = 10;
        assert!(config.validate().is_ok());
    }
}
