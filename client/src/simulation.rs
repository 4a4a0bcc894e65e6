use comms::{Fields, Parameters, Sample, Tensor};

use crate::error::SimError;

/// The result type of every simulation hook.
pub type SimResult<T> = std::result::Result<T, SimError>;

/// A pluggable simulation instance driven by a `SimulationClient`.
///
/// The client owns no simulation semantics, it only maps commands onto these
/// hooks. Every hook runs synchronously and may take as long as it needs.
pub trait Simulation {
    /// The per-sample shape of the `input` field.
    fn input_shape(&self) -> Vec<usize>;

    /// The per-sample shape of the `output` field.
    fn output_shape(&self) -> Vec<usize>;

    /// Builds the simulation once the server parameters are known.
    fn create(&mut self, _params: &Parameters) -> SimResult<()> {
        Ok(())
    }

    /// Advances the simulation one step.
    fn step(&mut self) -> SimResult<()>;

    /// Computes the network input for the current state.
    fn compute_input(&mut self) -> SimResult<Tensor>;

    /// Computes the ground truth for the current state.
    fn compute_output(&mut self) -> SimResult<Tensor>;

    /// Extra named fields to send along with `input` and `output`.
    fn additional_fields(&mut self) -> SimResult<Fields> {
        Ok(Fields::new())
    }

    /// Instrumentation reported after a plain `step`.
    fn instrumentation(&mut self) -> SimResult<Fields> {
        Ok(Fields::new())
    }

    /// Whether the last computed sample is usable, a solver divergence returns `false`.
    fn check_sample(&mut self) -> bool {
        true
    }

    /// Restores a sane state after a rejected sample.
    fn reset(&mut self) -> SimResult<()> {
        Ok(())
    }

    /// Applies a network prediction to the simulation.
    fn apply_prediction(&mut self, _prediction: Tensor) -> SimResult<()> {
        Ok(())
    }

    /// Receives parameters sent after the handshake.
    fn recv_parameters(&mut self, _params: Parameters) -> SimResult<()> {
        Ok(())
    }

    /// The parameters this simulation advertises.
    fn send_parameters(&mut self) -> Parameters {
        Parameters::new()
    }

    /// Hands a dataset sample to the simulation for it's next step.
    fn set_dataset_sample(&mut self, _sample: Sample) -> SimResult<()> {
        Ok(())
    }

    /// Releases the simulation's resources.
    fn close(&mut self) -> SimResult<()> {
        Ok(())
    }
}

impl<S: Simulation + ?Sized> Simulation for Box<S> {
    fn input_shape(&self) -> Vec<usize> {
        (**self).input_shape()
    }

    fn output_shape(&self) -> Vec<usize> {
        (**self).output_shape()
    }

    fn create(&mut self, params: &Parameters) -> SimResult<()> {
        (**self).create(params)
    }

    fn step(&mut self) -> SimResult<()> {
        (**self).step()
    }

    fn compute_input(&mut self) -> SimResult<Tensor> {
        (**self).compute_input()
    }

    fn compute_output(&mut self) -> SimResult<Tensor> {
        (**self).compute_output()
    }

    fn additional_fields(&mut self) -> SimResult<Fields> {
        (**self).additional_fields()
    }

    fn instrumentation(&mut self) -> SimResult<Fields> {
        (**self).instrumentation()
    }

    fn check_sample(&mut self) -> bool {
        (**self).check_sample()
    }

    fn reset(&mut self) -> SimResult<()> {
        (**self).reset()
    }

    fn apply_prediction(&mut self, prediction: Tensor) -> SimResult<()> {
        (**self).apply_prediction(prediction)
    }

    fn recv_parameters(&mut self, params: Parameters) -> SimResult<()> {
        (**self).recv_parameters(params)
    }

    fn send_parameters(&mut self) -> Parameters {
        (**self).send_parameters()
    }

    fn set_dataset_sample(&mut self, sample: Sample) -> SimResult<()> {
        (**self).set_dataset_sample(sample)
    }

    fn close(&mut self) -> SimResult<()> {
        (**self).close()
    }
}
