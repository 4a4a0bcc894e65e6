use std::path::PathBuf;

use log::{debug, info, warn};

use crate::{
    data::DataManager, error::Result, network::NetworkManager, stats::StatsManager,
};

/// What a finished training run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub batches: usize,
    /// The mean loss of the last epoch.
    pub last_loss: f64,
    /// The last saved parameter file.
    pub network_path: PathBuf,
}

/// The loop shape of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingPlan {
    pub nb_epochs: usize,
    pub nb_batches: usize,
    pub batch_size: usize,
    /// Push every prediction back to the simulations.
    pub apply_prediction: bool,
    pub save_each_epoch: bool,
}

/// Runs `nb_epochs x nb_batches` optimisation steps.
pub struct Trainer {
    data: DataManager,
    network: NetworkManager,
    stats: StatsManager,
    plan: TrainingPlan,
}

impl Trainer {
    pub fn new(data: DataManager, network: NetworkManager, stats: StatsManager, plan: TrainingPlan) -> Self {
        Self {
            data,
            network,
            stats,
            plan,
        }
    }

    /// Trains the network, then closes every manager, also on failure.
    ///
    /// # Errors
    /// The first failure, later close failures are only logged.
    pub fn run(mut self) -> Result<TrainingSummary> {
        let trained = self.train();
        let closed = self.close();

        match (trained, closed) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("failed to close after a training failure: {close_err}");
                }
                Err(e)
            }
        }
    }

    fn train(&mut self) -> Result<TrainingSummary> {
        let TrainingPlan {
            nb_epochs,
            nb_batches,
            batch_size,
            apply_prediction,
            save_each_epoch,
        } = self.plan;

        info!(epochs = nb_epochs, batches = nb_batches, batch_size = batch_size; "training started");

        let mut last_loss = f64::NAN;
        let mut network_path = None;

        for epoch in 0..nb_epochs {
            for batch in 0..nb_batches {
                let samples = self.data.get_data(batch_size)?;
                let (prediction, loss) = self.network.predict_and_optimize(&samples)?;
                self.stats.record_batch(epoch, batch, loss)?;
                debug!(epoch = epoch, batch = batch, loss = loss; "batch trained");

                if apply_prediction {
                    self.data.apply_prediction(&prediction)?;
                }
            }

            last_loss = self.stats.end_epoch(epoch)?;
            info!(epoch = epoch, mean_loss = last_loss; "epoch finished");

            if save_each_epoch {
                network_path = Some(self.network.save()?);
            }

            if epoch + 1 < nb_epochs {
                self.data.new_epoch()?;
            }
        }

        let network_path = match network_path {
            Some(path) => path,
            None => self.network.save()?,
        };

        Ok(TrainingSummary {
            epochs: nb_epochs,
            batches: nb_batches,
            last_loss,
            network_path,
        })
    }

    /// Closes the managers in reverse construction order.
    fn close(&mut self) -> Result<()> {
        let stats = self.stats.close();
        let data = self.data.close();

        if let (Err(e), Err(_)) = (&data, &stats) {
            warn!("failed to close the data manager: {e}");
        }

        stats.and(data)
    }
}
