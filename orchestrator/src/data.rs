use comms::{Batch, Tensor, sample::OUTPUT};
use dataset::{DatasetManager, Mode, Normalization};
use log::{debug, info, warn};

use crate::{
    environment::EnvironmentManager,
    error::{OrchestratorError, Result},
};

/// Where the next batch comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Fresh samples out of the environment, recorded when a dataset exists.
    Produce,
    /// Samples replayed from the dataset.
    Replay,
}

/// Routes every batch to the environment, the dataset or both.
pub struct DataManager {
    environment: Option<EnvironmentManager>,
    dataset: Option<DatasetManager>,
    training: bool,
    always_create_data: bool,
    use_dataset_in_environment: bool,
    /// The dataset already held Training samples when the session started.
    replay_from_start: bool,
    epoch: usize,
}

impl DataManager {
    /// Creates a new `DataManager`.
    ///
    /// # Arguments
    /// * `environment` - The sample producer, optional when replaying an existing dataset.
    /// * `dataset` - Where samples are recorded and replayed from.
    /// * `training` - Whether batches feed a training loop, prediction otherwise.
    /// * `always_create_data` - Produce fresh samples on every epoch.
    /// * `use_dataset_in_environment` - Inject replayed samples into the simulations.
    ///
    /// # Errors
    /// `InvalidConfig` when no batch could ever be produced.
    pub fn new(
        environment: Option<EnvironmentManager>,
        mut dataset: Option<DatasetManager>,
        training: bool,
        always_create_data: bool,
        use_dataset_in_environment: bool,
    ) -> Result<Self> {
        let replay_from_start = dataset
            .as_ref()
            .is_some_and(|ds| ds.partition_count(ds.mode()) > 0);

        if environment.is_none() && (!training || !replay_from_start || always_create_data) {
            return Err(OrchestratorError::InvalidConfig(
                "producing samples requires an environment".into(),
            ));
        }

        if use_dataset_in_environment && (environment.is_none() || dataset.is_none()) {
            return Err(OrchestratorError::InvalidConfig(
                "use_dataset_in_environment requires both an environment and a dataset".into(),
            ));
        }

        if !training {
            if let Some(ds) = dataset.as_mut() {
                ds.set_mode(Mode::Running)?;
            }
        }

        Ok(Self {
            environment,
            dataset,
            training,
            always_create_data,
            use_dataset_in_environment,
            replay_from_start,
            epoch: 0,
        })
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn environment(&self) -> Option<&EnvironmentManager> {
        self.environment.as_ref()
    }

    pub fn dataset(&self) -> Option<&DatasetManager> {
        self.dataset.as_ref()
    }

    /// Where the batches of the current epoch come from.
    pub fn source(&self) -> Source {
        let replayable = self.dataset.is_some() && (self.epoch > 0 || self.replay_from_start);
        if self.training && !self.always_create_data && replayable {
            Source::Replay
        } else {
            Source::Produce
        }
    }

    /// Returns the next batch, normalised when coefficients exist.
    pub fn get_data(&mut self, batch_size: usize) -> Result<Batch> {
        let mut batch = match self.source() {
            Source::Produce => self.produce(batch_size)?,
            Source::Replay => self.replay(batch_size)?,
        };

        if let Some(normalization) = self.normalization() {
            normalization.normalize_batch(&mut batch);
        }

        Ok(batch)
    }

    /// Pushes `predictions` to the simulations, de-normalised with the
    /// `output` coefficients. Without an environment it's a no-op.
    pub fn apply_prediction(&mut self, predictions: &Tensor) -> Result<()> {
        let mut predictions = predictions.clone();
        if let Some(normalization) = self.normalization() {
            normalization.denormalize(OUTPUT, &mut predictions);
        }

        match self.environment.as_mut() {
            Some(env) => env.apply_prediction(&predictions),
            None => {
                debug!("no environment to apply predictions to");
                Ok(())
            }
        }
    }

    /// Moves on to the next epoch.
    ///
    /// Ending the first training epoch computes the normalisation when it's
    /// enabled and missing. The dataset is reshuffled on every transition.
    pub fn new_epoch(&mut self) -> Result<()> {
        if self.epoch == 0 && self.training {
            if let Some(ds) = self.dataset.as_mut() {
                if ds.config().normalize && ds.normalization().is_none() {
                    ds.compute_normalization()?;
                }
            }
        }

        self.epoch += 1;
        if let Some(ds) = self.dataset.as_mut() {
            ds.shuffle();
        }

        info!(epoch = self.epoch; "new epoch, batches come from {:?}", self.source());
        Ok(())
    }

    /// Closes the environment, then the dataset.
    ///
    /// # Errors
    /// The first failure, both are closed regardless.
    pub fn close(&mut self) -> Result<()> {
        let environment = self.environment.as_mut().map_or(Ok(()), EnvironmentManager::close);
        let dataset = self
            .dataset
            .as_mut()
            .map_or(Ok(()), |ds| ds.close().map_err(OrchestratorError::from));

        if let (Err(e), Err(_)) = (&dataset, &environment) {
            warn!("failed to close the dataset: {e}");
        }

        environment.and(dataset)
    }

    fn normalization(&self) -> Option<&Normalization> {
        self.dataset
            .as_ref()
            .filter(|ds| ds.config().normalize)
            .and_then(DatasetManager::normalization)
    }

    fn produce(&mut self, batch_size: usize) -> Result<Batch> {
        let env = self.environment.as_mut().ok_or_else(|| {
            OrchestratorError::InvalidConfig("producing samples requires an environment".into())
        })?;

        let batch = env.get_data(batch_size)?;
        if let Some(ds) = self.dataset.as_mut() {
            ds.append(&batch)?;
        }

        Ok(batch)
    }

    fn replay(&mut self, batch_size: usize) -> Result<Batch> {
        let ds = self.dataset.as_mut().ok_or_else(|| {
            OrchestratorError::InvalidConfig("replaying samples requires a dataset".into())
        })?;

        let batch = ds.get_data(batch_size)?;
        match self.environment.as_mut() {
            Some(env) if self.use_dataset_in_environment => env.get_data_from(batch),
            _ => Ok(batch),
        }
    }
}
