//! A toy spring simulation and a linear network to exercise a full session.

use std::{fs, path::Path};

use client::{SimResult, Simulation};
use comms::{Fields, Parameters, Sample, Tensor, sample::{INPUT, OUTPUT}};
use ndarray::{Array1, Array2, Axis, arr1};
use orchestrator::{Network, NetworkError};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

const STIFFNESS: &str = "stiffness";
const DT: &str = "dt";

/// A unit mass on a spring, integrated with semi-implicit Euler.
///
/// A sample maps the state before a step to the state after it.
pub struct Spring {
    stiffness: f64,
    dt: f64,
    x: f64,
    v: f64,
    previous: [f64; 2],
    rng: StdRng,
}

impl Spring {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let (x, v) = (rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0));

        Self {
            stiffness: 4.0,
            dt: 0.01,
            x,
            v,
            previous: [x, v],
            rng,
        }
    }

    fn energy(&self) -> f64 {
        0.5 * self.v * self.v + 0.5 * self.stiffness * self.x * self.x
    }
}

fn param(params: &Parameters, name: &str, default: f64) -> f64 {
    params.get(name).and_then(serde_json::Value::as_f64).unwrap_or(default)
}

impl Simulation for Spring {
    fn input_shape(&self) -> Vec<usize> {
        vec![2]
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![2]
    }

    fn create(&mut self, params: &Parameters) -> SimResult<()> {
        self.stiffness = param(params, STIFFNESS, self.stiffness);
        self.dt = param(params, DT, self.dt);
        if self.dt <= 0.0 {
            return Err(format!("dt must be positive, got {}", self.dt).into());
        }

        Ok(())
    }

    fn step(&mut self) -> SimResult<()> {
        self.previous = [self.x, self.v];
        self.v -= self.stiffness * self.x * self.dt;
        self.x += self.v * self.dt;
        Ok(())
    }

    fn compute_input(&mut self) -> SimResult<Tensor> {
        Ok(arr1(&self.previous).into_dyn())
    }

    fn compute_output(&mut self) -> SimResult<Tensor> {
        Ok(arr1(&[self.x, self.v]).into_dyn())
    }

    fn additional_fields(&mut self) -> SimResult<Fields> {
        let mut fields = Fields::new();
        fields.insert("energy".into(), arr1(&[self.energy()]).into_dyn());
        Ok(fields)
    }

    fn check_sample(&mut self) -> bool {
        self.x.is_finite() && self.v.is_finite() && self.energy() < 1e6
    }

    fn reset(&mut self) -> SimResult<()> {
        self.x = self.rng.random_range(-1.0..1.0);
        self.v = self.rng.random_range(-1.0..1.0);
        Ok(())
    }

    /// The simulation follows the network: the predicted state replaces it's own.
    fn apply_prediction(&mut self, prediction: Tensor) -> SimResult<()> {
        match prediction.as_slice() {
            Some(&[x, v]) => {
                self.x = x;
                self.v = v;
                Ok(())
            }
            _ => Err(format!("expected a [x, v] prediction, got {:?}", prediction.shape()).into()),
        }
    }

    fn recv_parameters(&mut self, params: Parameters) -> SimResult<()> {
        self.create(&params)
    }

    fn send_parameters(&mut self) -> Parameters {
        let mut params = Parameters::new();
        params.insert(STIFFNESS.into(), self.stiffness.into());
        params.insert(DT.into(), self.dt.into());
        params
    }

    fn set_dataset_sample(&mut self, sample: Sample) -> SimResult<()> {
        let input = sample.input();
        self.x = input[[0]];
        self.v = input[[1]];
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LinearParams {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

/// `y = W x + b`, trained with plain gradient descent on the mean squared error.
pub struct Linear {
    weights: Option<Array2<f64>>,
    bias: Array1<f64>,
    lr: f64,
}

impl Linear {
    pub fn new(lr: f64) -> Self {
        Self {
            weights: None,
            bias: Array1::zeros(0),
            lr,
        }
    }

    fn forward(&self, x: &Array2<f64>) -> Result<Array2<f64>, NetworkError> {
        let weights = self.weights.as_ref().ok_or("the network was never trained nor loaded")?;
        Ok(x.dot(&weights.t()) + &self.bias)
    }
}

fn matrix(tensor: &Tensor) -> Result<Array2<f64>, NetworkError> {
    let rows = tensor.len_of(Axis(0));
    Ok(tensor.to_shape((rows, tensor.len() / rows.max(1)))?.into_owned())
}

impl Network for Linear {
    fn predict_and_optimize(&mut self, batch: &Fields) -> Result<(Tensor, f64), NetworkError> {
        let x = matrix(batch.get(INPUT).ok_or("batch without input")?)?;
        let y = matrix(batch.get(OUTPUT).ok_or("batch without output")?)?;

        if self.weights.is_none() {
            self.weights = Some(Array2::zeros((y.ncols(), x.ncols())));
            self.bias = Array1::zeros(y.ncols());
        }

        let prediction = self.forward(&x)?;
        let error = &prediction - &y;
        let n = x.nrows() as f64;
        let loss = error.mapv(|e| e * e).sum() / (n * y.ncols() as f64);

        let grad_w = error.t().dot(&x) * (2.0 / n);
        let grad_b = error.sum_axis(Axis(0)) * (2.0 / n);
        if let Some(weights) = self.weights.as_mut() {
            weights.scaled_add(-self.lr, &grad_w);
        }
        self.bias.scaled_add(-self.lr, &grad_b);

        Ok((prediction.into_dyn(), loss))
    }

    fn predict(&mut self, input: &Tensor) -> Result<Tensor, NetworkError> {
        Ok(self.forward(&matrix(input)?)?.into_dyn())
    }

    fn save(&self, path: &Path) -> Result<(), NetworkError> {
        let params = LinearParams {
            weights: self
                .weights
                .as_ref()
                .map(|w| w.outer_iter().map(|row| row.to_vec()).collect())
                .unwrap_or_default(),
            bias: self.bias.to_vec(),
        };

        fs::write(path, serde_json::to_vec_pretty(&params)?)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<(), NetworkError> {
        let params: LinearParams = serde_json::from_slice(&fs::read(path)?)?;
        let rows = params.weights.len();
        let cols = params.weights.first().map_or(0, Vec::len);
        let flat: Vec<f64> = params.weights.into_iter().flatten().collect();

        self.weights = Some(Array2::from_shape_vec((rows, cols), flat)?);
        self.bias = Array1::from(params.bias);
        Ok(())
    }
}
