//! Partitioned on-disk storage of the samples a session produces.

mod config;
mod error;
mod manager;
mod normalization;
mod partition;

pub use config::{DatasetConfig, Mode};
pub use error::{DatasetErr, Result};
pub use manager::{DatasetManager, FIELDS_FILE};
pub use normalization::{NORMALIZATION_FILE, Normalization};
pub use partition::{list_path, partition_name};
