use std::{
    fs,
    path::{Path, PathBuf},
};

use comms::{Batch, Fields, Tensor, sample::INPUT};
use log::info;

use crate::error::{NetworkError, OrchestratorError, Result};

/// The trained model, opaque to the orchestrator.
pub trait Network {
    /// Runs one optimisation step over a stacked batch.
    ///
    /// # Arguments
    /// * `batch` - Every field of the batch, stacked along a leading axis.
    ///
    /// # Returns
    /// The prediction for every sample and the batch loss.
    fn predict_and_optimize(&mut self, batch: &Fields) -> std::result::Result<(Tensor, f64), NetworkError>;

    /// Predicts the output of a stacked `input`.
    fn predict(&mut self, input: &Tensor) -> std::result::Result<Tensor, NetworkError>;

    fn save(&self, path: &Path) -> std::result::Result<(), NetworkError>;

    fn load(&mut self, path: &Path) -> std::result::Result<(), NetworkError>;

    /// The extension of the parameter files.
    fn file_extension(&self) -> &str {
        "json"
    }
}

/// Owns the network and it's parameter files.
pub struct NetworkManager {
    network: Box<dyn Network>,
    dir: PathBuf,
    session_name: String,
    next_index: usize,
}

impl NetworkManager {
    /// Creates a manager saving to `dir`, after any file already there.
    ///
    /// # Arguments
    /// * `network` - The network to train.
    /// * `dir` - The directory parameter files are saved to.
    /// * `session_name` - The prefix of every parameter file.
    pub fn new(network: Box<dyn Network>, dir: impl Into<PathBuf>, session_name: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let next_index = saved_networks(&dir, network.file_extension())?
            .last()
            .map_or(0, |(k, _)| k + 1);

        Ok(Self {
            network,
            dir,
            session_name: session_name.to_string(),
            next_index,
        })
    }

    /// Creates a manager and loads a saved network into it.
    ///
    /// # Arguments
    /// * `which` - The index `k` of the `<session>_network_<k>` file to load out
    ///   of `dir`, the highest one when `None`. The session's own file wins over
    ///   another session's file with the same index.
    ///
    /// # Errors
    /// `MissingNetwork` if there's nothing to load.
    pub fn load(
        network: Box<dyn Network>,
        dir: impl Into<PathBuf>,
        session_name: &str,
        which: Option<usize>,
    ) -> Result<Self> {
        let dir = dir.into();
        let extension = network.file_extension();
        let mut saved = saved_networks(&dir, extension)?;

        let path = match which {
            Some(k) => {
                let own = dir.join(network_file_name(session_name, k, extension));
                if own.is_file() {
                    own
                } else {
                    saved
                        .into_iter()
                        .find(|(index, _)| *index == k)
                        .map(|(_, path)| path)
                        .ok_or(OrchestratorError::MissingNetwork(own))?
                }
            }
            None => saved
                .pop()
                .map(|(_, path)| path)
                .ok_or_else(|| OrchestratorError::MissingNetwork(dir.clone()))?,
        };

        if !path.is_file() {
            return Err(OrchestratorError::MissingNetwork(path));
        }

        let mut manager = Self::new(network, dir, session_name)?;
        manager
            .network
            .load(&path)
            .map_err(OrchestratorError::Network)?;

        info!("network loaded from {}", path.display());
        Ok(manager)
    }

    /// Stacks `batch` and runs one optimisation step.
    pub fn predict_and_optimize(&mut self, batch: &Batch) -> Result<(Tensor, f64)> {
        let fields = batch.stack()?;
        self.network
            .predict_and_optimize(&fields)
            .map_err(OrchestratorError::Network)
    }

    /// Predicts the output of every sample of `batch`.
    pub fn predict(&mut self, batch: &Batch) -> Result<Tensor> {
        let fields = batch.stack()?;
        let input = fields.get(INPUT).ok_or_else(|| {
            OrchestratorError::InvalidPrediction("can't predict an empty batch".into())
        })?;

        self.network.predict(input).map_err(OrchestratorError::Network)
    }

    /// Saves the network as `<session>_network_<k>.<ext>`, `k` increasing on
    /// every call.
    ///
    /// # Returns
    /// The path of the new file.
    pub fn save(&mut self) -> Result<PathBuf> {
        let name = network_file_name(&self.session_name, self.next_index, self.network.file_extension());
        let path = self.dir.join(name);

        self.network.save(&path).map_err(OrchestratorError::Network)?;
        self.next_index += 1;

        info!("network saved to {}", path.display());
        Ok(path)
    }

    pub fn network(&self) -> &dyn Network {
        self.network.as_ref()
    }
}

pub fn network_file_name(session_name: &str, index: usize, extension: &str) -> String {
    format!("{session_name}_network_{index}.{extension}")
}

/// Every `<session>_network_<k>.<ext>` file of `dir`, whatever the session,
/// sorted by `k`.
fn saved_networks(dir: &Path, extension: &str) -> Result<Vec<(usize, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let suffix = format!(".{extension}");
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        let index = name
            .strip_suffix(&suffix)
            .and_then(|stem| stem.rsplit_once("_network_"))
            .and_then(|(_, k)| k.parse::<usize>().ok());

        if let Some(k) = index {
            found.push((k, path));
        }
    }

    found.sort_by_key(|(k, _)| *k);
    Ok(found)
}
