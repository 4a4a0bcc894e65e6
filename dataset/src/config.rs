use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DatasetErr, Result};

/// The lifecycle phase partitions are written in and read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mode {
    Training,
    Validation,
    Running,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Training, Mode::Validation, Mode::Running];

    /// The position of the mode in a `[_; 3]` per-mode table.
    pub fn index(self) -> usize {
        match self {
            Mode::Training => 0,
            Mode::Validation => 1,
            Mode::Running => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Training => "Training",
            Mode::Validation => "Validation",
            Mode::Running => "Running",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_read_stride() -> usize {
    8
}

/// The dataset manager's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Soft budget of a partition group, in gigabytes.
    pub partition_size: f64,
    #[serde(default)]
    pub shuffle_dataset: bool,
    /// An existing dataset to replay instead of producing a new one.
    #[serde(default)]
    pub dataset_dir: Option<PathBuf>,
    /// The mode the manager starts in, `Training` when absent.
    #[serde(default)]
    pub use_mode: Option<Mode>,
    #[serde(default)]
    pub normalize: bool,
    /// Samples read from each partition per turn of a multi partition load.
    #[serde(default = "default_read_stride")]
    pub read_stride: usize,
    /// Seed of the shuffling rng, taken from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            partition_size: 1.0,
            shuffle_dataset: false,
            dataset_dir: None,
            use_mode: None,
            normalize: false,
            read_stride: default_read_stride(),
            seed: None,
        }
    }
}

impl DatasetConfig {
    /// Checks the config before any file is touched.
    pub fn validate(&self) -> Result<()> {
        if !self.partition_size.is_finite() || self.partition_size <= 0.0 {
            return Err(DatasetErr::InvalidConfig(format!(
                "partition_size must be a positive amount of gigabytes, got {}",
                self.partition_size
            )));
        }

        if self.read_stride == 0 {
            return Err(DatasetErr::InvalidConfig(
                "read_stride must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// The partition budget in bytes.
    pub fn max_bytes(&self) -> u64 {
        ((self.partition_size * 1e9) as u64).max(1)
    }

    pub fn initial_mode(&self) -> Mode {
        self.use_mode.unwrap_or(Mode::Training)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_size_is_in_gigabytes() {
        let config = DatasetConfig {
            partition_size: 1e-6,
            ..Default::default()
        };

        assert_eq!(config.max_bytes(), 1000);
    }

    #[test]
    fn rejects_non_positive_sizes() {
        for partition_size in [0.0, -1.0, f64::NAN] {
            let config = DatasetConfig {
                partition_size,
                ..Default::default()
            };

            assert!(matches!(config.validate(), Err(DatasetErr::InvalidConfig(_))));
        }
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: DatasetConfig =
            serde_json::from_str(r#"{ "partition_size": 0.5, "use_mode": "Running" }"#).unwrap();

        assert_eq!(config.initial_mode(), Mode::Running);
        assert_eq!(config.read_stride, 8);
        assert!(!config.shuffle_dataset);
    }
}
