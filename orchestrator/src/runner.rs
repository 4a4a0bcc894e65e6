use log::{debug, info, warn};

use crate::{data::DataManager, error::Result, network::NetworkManager};

/// Drives the simulations with a trained network.
pub struct Runner {
    data: DataManager,
    network: NetworkManager,
    batch_size: usize,
}

impl Runner {
    /// Creates a new `Runner`.
    ///
    /// # Arguments
    /// * `data` - Produces the batches, in prediction mode.
    /// * `network` - The loaded network.
    /// * `batch_size` - Samples per step, one per simulation animates every
    ///   simulation once per step.
    pub fn new(data: DataManager, network: NetworkManager, batch_size: usize) -> Self {
        Self {
            data,
            network,
            batch_size,
        }
    }

    /// Runs `nb_steps` prediction steps, then closes the data manager, also on
    /// failure.
    ///
    /// # Returns
    /// The amount of steps performed.
    pub fn run(mut self, nb_steps: usize) -> Result<usize> {
        let ran = self.animate(nb_steps);
        let closed = self.data.close();

        match (ran, closed) {
            (Ok(steps), Ok(())) => Ok(steps),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("failed to close after a prediction failure: {close_err}");
                }
                Err(e)
            }
        }
    }

    fn animate(&mut self, nb_steps: usize) -> Result<usize> {
        info!(steps = nb_steps, batch_size = self.batch_size; "prediction started");

        for step in 0..nb_steps {
            let batch = self.data.get_data(self.batch_size)?;
            let prediction = self.network.predict(&batch)?;
            self.data.apply_prediction(&prediction)?;
            debug!(step = step; "prediction applied");
        }

        Ok(nb_steps)
    }
}
