use comms::{
    Command, FrameReceiver, FrameSender, Sample, Tensor, codec,
    sample::{CHECK, INPUT, OUTPUT, SAMPLE_IN, SAMPLE_OUT},
};
use log::{debug, info, warn};
use ndarray::Array1;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    error::{ClientErr, Result, SimError},
    simulation::Simulation,
};

/// Drives one simulation instance on behalf of the batch server.
pub struct SimulationClient<S: Simulation> {
    client_id: usize,
    simulation: S,
    step: usize,
}

impl<S: Simulation> SimulationClient<S> {
    /// Creates a new `SimulationClient`.
    ///
    /// # Arguments
    /// * `client_id` - Identifier used for observability.
    /// * `simulation` - The simulation instance to drive.
    pub fn new(client_id: usize, simulation: S) -> Self {
        Self {
            client_id,
            simulation,
            step: 0,
        }
    }

    /// Performs the connection handshake and then answers commands until `exit`.
    ///
    /// # Args
    /// * `rx` - Receiving end of the server channel.
    /// * `tx` - Sending end of the server channel.
    ///
    /// # Returns
    /// The simulation instance once the server asked the client to exit.
    ///
    /// # Errors
    /// Returns `ClientErr` on I/O failures, protocol violations or simulation failures.
    pub async fn run<R, W>(mut self, mut rx: FrameReceiver<R>, mut tx: FrameSender<W>) -> Result<S>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.handshake(&mut rx, &mut tx).await?;

        loop {
            let cmd = rx.recv_command().await?;
            debug!(client_id = self.client_id, step = self.step; "received {cmd}");

            match cmd {
                Command::Exit => {
                    info!(client_id = self.client_id; "exit received, closing simulation");
                    self.simulation
                        .close()
                        .map_err(|e| self.sim_err("close", e))?;
                    tx.send_command(Command::Exit).await?;
                    return Ok(self.simulation);
                }
                Command::Step => self.handle_step(&mut tx).await?,
                Command::Compute => self.handle_compute(&mut tx).await?,
                Command::Predict => {
                    let prediction = rx.recv_flat().await?;
                    let prediction = Array1::from(prediction).into_dyn();
                    self.simulation
                        .apply_prediction(prediction)
                        .map_err(|e| self.sim_err("apply_prediction", e))?;
                }
                Command::Read => {
                    let params = rx.recv_parameters().await?;
                    self.simulation
                        .recv_parameters(params)
                        .map_err(|e| self.sim_err("recv_parameters", e))?;
                }
                Command::Sample => self.handle_sample(&mut rx).await?,
                Command::Recv => {
                    let params = self.simulation.send_parameters();
                    tx.send_parameters(&params).await?;
                }
                Command::Size => self.send_sizes(&mut tx).await?,
                Command::Test => tx.send_command(Command::Test).await?,
                got @ Command::Done => {
                    warn!(client_id = self.client_id; "unexpected {got} outside a labelled stream");
                    return Err(ClientErr::UnexpectedCommand {
                        step: self.step,
                        got,
                    });
                }
            }
        }
    }

    /// The client side of the connection handshake.
    async fn handshake<R, W>(
        &mut self,
        rx: &mut FrameReceiver<R>,
        tx: &mut FrameSender<W>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let server_params = rx.recv_parameters().await?;
        self.simulation
            .create(&server_params)
            .map_err(|e| self.sim_err("create", e))?;

        let params = self.simulation.send_parameters();
        tx.send_parameters(&params).await?;

        match rx.recv_command().await? {
            Command::Size => self.send_sizes(tx).await?,
            Command::Done => {}
            got => return Err(ClientErr::UnexpectedCommand { step: 0, got }),
        }

        info!(client_id = self.client_id; "handshake completed");
        Ok(())
    }

    async fn send_sizes<W: AsyncWrite + Unpin>(&mut self, tx: &mut FrameSender<W>) -> Result<()> {
        tx.send_shape(&self.simulation.input_shape()).await?;
        tx.send_shape(&self.simulation.output_shape()).await?;
        Ok(())
    }

    async fn handle_step<W: AsyncWrite + Unpin>(&mut self, tx: &mut FrameSender<W>) -> Result<()> {
        self.step += 1;
        self.simulation
            .step()
            .map_err(|e| self.sim_err("step", e))?;

        let instrumentation = self
            .simulation
            .instrumentation()
            .map_err(|e| self.sim_err("instrumentation", e))?;

        tx.send_fields(&instrumentation).await?;
        Ok(())
    }

    async fn handle_compute<W: AsyncWrite + Unpin>(
        &mut self,
        tx: &mut FrameSender<W>,
    ) -> Result<()> {
        self.step += 1;
        self.simulation
            .step()
            .map_err(|e| self.sim_err("step", e))?;

        let input = self
            .simulation
            .compute_input()
            .map_err(|e| self.sim_err("compute_input", e))?;
        let output = self
            .simulation
            .compute_output()
            .map_err(|e| self.sim_err("compute_output", e))?;

        if !self.simulation.check_sample() {
            warn!(client_id = self.client_id, step = self.step; "sample rejected, resetting simulation");
            self.simulation
                .reset()
                .map_err(|e| self.sim_err("reset", e))?;

            let veto: Tensor = Array1::from(vec![0.0]).into_dyn();
            tx.send_labelled_tensor(CHECK, &veto).await?;
            tx.send_command(Command::Done).await?;
            return Ok(());
        }

        let extras = self
            .simulation
            .additional_fields()
            .map_err(|e| self.sim_err("additional_fields", e))?;

        tx.send_labelled_tensor(INPUT, &input).await?;
        tx.send_labelled_tensor(OUTPUT, &output).await?;
        let extras = extras
            .iter()
            .filter(|(name, _)| !matches!(name.as_str(), INPUT | OUTPUT | CHECK));
        tx.send_fields(extras).await?;
        Ok(())
    }

    async fn handle_sample<R: AsyncRead + Unpin>(
        &mut self,
        rx: &mut FrameReceiver<R>,
    ) -> Result<()> {
        let mut fields = rx.recv_fields().await?;

        let mut take = |label: &str, shape: Vec<usize>| -> Result<Tensor> {
            let flat = fields.remove(label).ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("dataset sample is missing {label:?}"),
                )
            })?;

            Ok(codec::from_flat(flat.iter().copied().collect(), &shape)?)
        };

        let input = take(SAMPLE_IN, self.simulation.input_shape())?;
        let output = take(SAMPLE_OUT, self.simulation.output_shape())?;

        let sample = fields
            .into_iter()
            .fold(Sample::new(input, output), |sample, (name, tensor)| {
                sample.with_field(name, tensor)
            });

        self.simulation
            .set_dataset_sample(sample)
            .map_err(|e| self.sim_err("set_dataset_sample", e))?;
        Ok(())
    }

    fn sim_err(&self, during: &'static str, source: SimError) -> ClientErr {
        warn!(client_id = self.client_id, step = self.step; "simulation failed during {during}: {source}");
        ClientErr::Simulation {
            step: self.step,
            during,
            source,
        }
    }
}
