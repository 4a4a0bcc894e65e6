use std::{collections::BTreeMap, fs, path::Path};

use comms::{
    Batch, Sample, Tensor,
    sample::{CHECK, LOSS},
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The file the coefficients are persisted to, inside the dataset directory.
pub const NORMALIZATION_FILE: &str = "normalization.json";

/// Per-field `(mean, std)` coefficients, persisted as `{field: [mean, std]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Normalization {
    coefficients: BTreeMap<String, (f64, f64)>,
}

/// Whether `field` carries values that get normalised, per-sample loss
/// weights and validity flags never do.
pub fn is_normalized(field: &str) -> bool {
    field != LOSS && field != CHECK
}

impl Normalization {
    /// Creates a new `Normalization`, a zero standard deviation is stored as `1`.
    /// Coefficients of fields that are never normalised are dropped.
    pub fn new(coefficients: BTreeMap<String, (f64, f64)>) -> Self {
        let coefficients = coefficients
            .into_iter()
            .filter(|(field, _)| is_normalized(field))
            .map(|(field, (mean, std))| (field, (mean, sanitize(std))))
            .collect();

        Self { coefficients }
    }

    pub fn get(&self, field: &str) -> Option<(f64, f64)> {
        self.coefficients.get(field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Applies `x <- (x - mean) / std` to `tensor`, unknown fields are left untouched.
    pub fn normalize(&self, field: &str, tensor: &mut Tensor) {
        if let Some((mean, std)) = self.get(field) {
            let std = sanitize(std);
            tensor.mapv_inplace(|x| (x - mean) / std);
        }
    }

    /// Applies `x <- x * std + mean` to `tensor`, unknown fields are left untouched.
    pub fn denormalize(&self, field: &str, tensor: &mut Tensor) {
        if let Some((mean, std)) = self.get(field) {
            let std = sanitize(std);
            tensor.mapv_inplace(|x| x * std + mean);
        }
    }

    pub fn normalize_sample(&self, sample: &mut Sample) {
        for (field, &(mean, std)) in &self.coefficients {
            if let Some(tensor) = sample.get_mut(field) {
                let std = sanitize(std);
                tensor.mapv_inplace(|x| (x - mean) / std);
            }
        }
    }

    pub fn normalize_batch(&self, batch: &mut Batch) {
        for sample in batch.samples_mut() {
            self.normalize_sample(sample);
        }
    }

    /// Loads the coefficients persisted in `dir`.
    ///
    /// # Returns
    /// `None` if they were never computed.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(NORMALIZATION_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read(path)?;
        let persisted: Self = serde_json::from_slice(&contents)?;
        Ok(Some(Self::new(persisted.coefficients)))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let contents = serde_json::to_vec_pretty(self)?;
        fs::write(dir.join(NORMALIZATION_FILE), contents)?;
        Ok(())
    }
}

fn sanitize(std: f64) -> f64 {
    if std == 0.0 || !std.is_finite() { 1.0 } else { std }
}

/// Streaming mean and standard deviation (Welford).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// The population `(mean, std)` of the pushed values.
    pub fn finish(self) -> (f64, f64) {
        if self.count == 0 {
            return (0.0, 1.0);
        }

        (self.mean, (self.m2 / self.count as f64).sqrt())
    }
}
