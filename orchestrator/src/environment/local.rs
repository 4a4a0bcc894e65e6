use client::{SimError, Simulation};
use comms::{
    Batch, Parameters, Sample, Tensor,
    sample::{CHECK, INPUT, OUTPUT},
};
use log::{debug, info, warn};
use ndarray::Array1;

use crate::{
    configs::EnvironmentConfig,
    error::{OrchestratorError, Result},
};

/// Produces samples out of a single simulation driven on the caller's thread.
pub(super) struct LocalEnvironment {
    simulation: Box<dyn Simulation>,
    simulations_per_step: usize,
    max_wrong_samples_per_step: usize,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl LocalEnvironment {
    pub fn new(config: &EnvironmentConfig, mut simulation: Box<dyn Simulation>) -> Result<Self> {
        simulation
            .create(&config.param_dict)
            .map_err(|source| sim_err("create", source))?;

        let input_shape = simulation.input_shape();
        let output_shape = simulation.output_shape();
        info!("in-process simulation created: input {input_shape:?}, output {output_shape:?}");

        Ok(Self {
            simulation,
            simulations_per_step: config.simulations_per_step,
            max_wrong_samples_per_step: config.max_wrong_samples_per_step,
            input_shape,
            output_shape,
        })
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    pub fn get_data(&mut self, batch_size: usize) -> Result<Batch> {
        let mut samples = Vec::with_capacity(batch_size);
        let mut dropped = 0;

        while samples.len() < batch_size {
            match self.produce()? {
                Some(sample) => samples.push(sample),
                None => {
                    dropped += 1;
                    if dropped > self.max_wrong_samples_per_step {
                        return Err(OrchestratorError::TooManyWrongSamples {
                            dropped,
                            max: self.max_wrong_samples_per_step,
                        });
                    }
                }
            }
        }

        Ok(Batch::new(samples))
    }

    /// Injects every dataset sample before producing it's slot, a rejected
    /// slot keeps the dataset sample.
    pub fn get_data_from(&mut self, dataset: Batch) -> Result<Batch> {
        dataset
            .into_samples()
            .into_iter()
            .map(|sample| -> Result<Sample> {
                self.simulation
                    .set_dataset_sample(sample.clone())
                    .map_err(|source| sim_err("set_dataset_sample", source))?;

                Ok(self.produce()?.unwrap_or(sample))
            })
            .collect::<Result<Vec<_>>>()
            .map(Batch::new)
    }

    /// Applies every row of `predictions` in order.
    pub fn apply_prediction(&mut self, predictions: &Tensor) -> Result<()> {
        if predictions.ndim() == 0 {
            return Err(OrchestratorError::InvalidPrediction(
                "predictions need a leading batch axis".into(),
            ));
        }

        for row in predictions.outer_iter() {
            let flat = Array1::from_iter(row.iter().copied()).into_dyn();
            self.simulation
                .apply_prediction(flat)
                .map_err(|source| sim_err("apply_prediction", source))?;
        }

        Ok(())
    }

    pub fn send_parameters(&mut self, params: &Parameters) -> Result<()> {
        self.simulation
            .recv_parameters(params.clone())
            .map_err(|source| sim_err("recv_parameters", source))
    }

    pub fn close(&mut self) -> Result<()> {
        self.simulation
            .close()
            .map_err(|source| sim_err("close", source))
    }

    /// Runs the sub-steps of one sample.
    ///
    /// # Returns
    /// `None` when the sample was rejected.
    fn produce(&mut self) -> Result<Option<Sample>> {
        for _ in 0..self.simulations_per_step {
            self.simulation
                .step()
                .map_err(|source| sim_err("step", source))?;
        }

        let input = self
            .simulation
            .compute_input()
            .map_err(|source| sim_err("compute_input", source))?;
        let output = self
            .simulation
            .compute_output()
            .map_err(|source| sim_err("compute_output", source))?;

        if !self.simulation.check_sample() {
            debug!("sample rejected, resetting simulation");
            self.simulation
                .reset()
                .map_err(|source| sim_err("reset", source))?;
            return Ok(None);
        }

        if input.shape() != self.input_shape.as_slice()
            || output.shape() != self.output_shape.as_slice()
        {
            warn!(
                "dropping sample of shapes {:?} / {:?}, expected {:?} / {:?}",
                input.shape(),
                output.shape(),
                self.input_shape,
                self.output_shape
            );
            return Ok(None);
        }

        let extras = self
            .simulation
            .additional_fields()
            .map_err(|source| sim_err("additional_fields", source))?;

        let sample = extras
            .into_iter()
            .filter(|(name, _)| !matches!(name.as_str(), INPUT | OUTPUT | CHECK))
            .fold(Sample::new(input, output), |sample, (name, tensor)| {
                let flat = Array1::from_iter(tensor.iter().copied()).into_dyn();
                sample.with_field(name, flat)
            });

        Ok(Some(sample))
    }
}

fn sim_err(during: &'static str, source: SimError) -> OrchestratorError {
    warn!("simulation failed during {during}: {source}");
    OrchestratorError::Simulation { during, source }
}
