#![allow(dead_code)]

use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use client::{SimResult, Simulation};
use comms::{Fields, Sample, Tensor, sample::{INPUT, OUTPUT}};
use ndarray::arr1;
use orchestrator::{Network, NetworkError};

/// What every `Ticker` sharing it did.
#[derive(Debug, Default)]
pub struct Log {
    pub steps: usize,
    pub resets: usize,
    pub injected: Vec<f64>,
    pub predictions: Vec<(usize, Vec<f64>)>,
    pub closed: usize,
}

pub type SharedLog = Arc<Mutex<Log>>;

/// Produces `input = [id, t]` and `output = [10 t]`.
pub struct Ticker {
    id: usize,
    t: f64,
    /// Rejects every sample computed at a multiple of this.
    reject_every: Option<usize>,
    log: SharedLog,
}

impl Ticker {
    pub fn new(id: usize, log: SharedLog) -> Self {
        Self {
            id,
            t: 0.0,
            reject_every: None,
            log,
        }
    }

    pub fn rejecting_every(mut self, n: usize) -> Self {
        self.reject_every = Some(n);
        self
    }
}

impl Simulation for Ticker {
    fn input_shape(&self) -> Vec<usize> {
        vec![2]
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![1]
    }

    fn step(&mut self) -> SimResult<()> {
        self.t += 1.0;
        self.log.lock().unwrap().steps += 1;
        Ok(())
    }

    fn compute_input(&mut self) -> SimResult<Tensor> {
        Ok(arr1(&[self.id as f64, self.t]).into_dyn())
    }

    fn compute_output(&mut self) -> SimResult<Tensor> {
        Ok(arr1(&[10.0 * self.t]).into_dyn())
    }

    fn check_sample(&mut self) -> bool {
        self.reject_every
            .is_none_or(|n| (self.t as usize) % n != 0)
    }

    fn reset(&mut self) -> SimResult<()> {
        self.log.lock().unwrap().resets += 1;
        Ok(())
    }

    fn apply_prediction(&mut self, prediction: Tensor) -> SimResult<()> {
        let values = prediction.iter().copied().collect();
        self.log.lock().unwrap().predictions.push((self.id, values));
        Ok(())
    }

    /// Continues from the injected sample's time.
    fn set_dataset_sample(&mut self, sample: Sample) -> SimResult<()> {
        let t = sample.input()[[1]];
        self.log.lock().unwrap().injected.push(t);
        self.t = t + 100.0;
        Ok(())
    }

    fn close(&mut self) -> SimResult<()> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Predicts the ground truth, it's loss is the amount of optimisation steps.
#[derive(Default)]
pub struct Echo {
    pub steps: f64,
}

impl Network for Echo {
    fn predict_and_optimize(&mut self, batch: &Fields) -> Result<(Tensor, f64), NetworkError> {
        self.steps += 1.0;
        Ok((batch[OUTPUT].clone(), self.steps))
    }

    fn predict(&mut self, input: &Tensor) -> Result<Tensor, NetworkError> {
        let rows = input.shape()[0];
        Ok(ndarray::Array2::from_elem((rows, 1), self.steps).into_dyn())
    }

    fn save(&self, path: &Path) -> Result<(), NetworkError> {
        fs::write(path, self.steps.to_string())?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<(), NetworkError> {
        self.steps = fs::read_to_string(path)?.parse()?;
        Ok(())
    }
}

pub fn shared_log() -> SharedLog {
    Arc::new(Mutex::new(Log::default()))
}

pub fn times(batch: &comms::Batch) -> Vec<f64> {
    batch.samples().iter().map(|s| s.get(INPUT).unwrap()[[1]]).collect()
}
