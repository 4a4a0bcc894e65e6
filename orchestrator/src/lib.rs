//! Couples simulation clients, the batch server and the dataset to a training
//! or prediction loop.

pub mod configs;
pub mod data;
pub mod environment;
pub mod error;
pub mod network;
pub mod runner;
pub mod session;
pub mod stats;
pub mod trainer;

use client::Simulation;
use dataset::DatasetManager;
use log::info;

pub use data::{DataManager, Source};
pub use environment::{ClientLauncher, EnvironmentManager, ProcessLauncher, ThreadLauncher};
pub use error::{NetworkError, OrchestratorError, Result};
pub use network::{Network, NetworkManager};
pub use runner::Runner;
pub use session::Session;
pub use stats::StatsManager;
pub use trainer::{Trainer, TrainingPlan, TrainingSummary};

use crate::configs::SessionConfig;

/// Where a session's samples come from.
pub enum Simulations {
    /// Clients started by a launcher, connecting to the batch server over TCP.
    Launched(Box<dyn ClientLauncher>),
    /// A single simulation driven on the caller's thread.
    InProcess(Box<dyn Simulation>),
    /// No simulation, every batch is replayed from an existing dataset.
    Replay,
}

/// Trains `network` in a new session.
///
/// The config is validated before anything is created. The session gets it's
/// own directory and the dataset is recorded in it, unless `dataset_dir`
/// points at an existing one to replay.
///
/// # Errors
/// Returns an `OrchestratorError` if the config is invalid or any manager fails.
pub fn train(
    config: &SessionConfig,
    simulations: Simulations,
    network: Box<dyn Network>,
) -> Result<TrainingSummary> {
    config.validate()?;
    if !config.training {
        return Err(OrchestratorError::InvalidConfig(
            "train needs a config with training enabled".into(),
        ));
    }

    let session = Session::create(&config.session_dir, &config.session_name)?;
    let data = data_manager(config, &session, simulations)?;
    let network = NetworkManager::new(network, session.network_dir(), session.name())?;
    let stats = StatsManager::new(&session.stats_dir())?;

    let plan = TrainingPlan {
        nb_epochs: config.nb_epochs,
        nb_batches: config.nb_batches,
        batch_size: config.batch_size,
        apply_prediction: config.apply_prediction,
        save_each_epoch: config.network.save_each_epoch,
    };

    let summary = Trainer::new(data, network, stats, plan).run()?;
    info!(session = session.name(); "training finished, network saved to {}", summary.network_path.display());
    Ok(summary)
}

/// Drives the simulations with a trained network for `nb_steps` steps.
///
/// The session is reused (or created) and the network is loaded from
/// `network_dir`, or from the session's own `network/` directory.
///
/// # Returns
/// The amount of steps performed.
pub fn run(
    config: &SessionConfig,
    simulations: Simulations,
    network: Box<dyn Network>,
) -> Result<usize> {
    config.validate()?;
    if config.training {
        return Err(OrchestratorError::InvalidConfig(
            "run needs a config with training disabled".into(),
        ));
    }

    let session = Session::open(&config.session_dir, &config.session_name)?;
    let network_dir = config
        .network
        .network_dir
        .clone()
        .unwrap_or_else(|| session.network_dir());
    let network = NetworkManager::load(
        network,
        network_dir,
        session.name(),
        config.network.which_network,
    )?;

    let data = data_manager(config, &session, simulations)?;
    let batch_size = data
        .environment()
        .map_or(config.batch_size, EnvironmentManager::num_clients);

    Runner::new(data, network, batch_size).run(config.nb_steps)
}

/// Opens the dataset, then starts the environment.
fn data_manager(config: &SessionConfig, session: &Session, simulations: Simulations) -> Result<DataManager> {
    let dataset = match &config.dataset {
        Some(ds_config) => {
            let dir = ds_config
                .dataset_dir
                .clone()
                .unwrap_or_else(|| session.dataset_dir());

            let manager = if DatasetManager::exists(&dir) {
                DatasetManager::open(dir, session.name(), ds_config.clone())?
            } else {
                DatasetManager::new(dir, session.name(), ds_config.clone())?
            };

            Some(manager)
        }
        None => None,
    };

    let environment = match simulations {
        Simulations::Launched(launcher) => Some(EnvironmentManager::tcp(&config.environment, launcher)?),
        Simulations::InProcess(simulation) => {
            Some(EnvironmentManager::in_process(&config.environment, simulation)?)
        }
        Simulations::Replay => None,
    };

    DataManager::new(
        environment,
        dataset,
        config.training,
        config.environment.always_create_data,
        config.environment.use_dataset_in_environment,
    )
}
