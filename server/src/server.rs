use std::{collections::VecDeque, mem};

use comms::{
    Batch, Command, FrameReceiver, FrameSender, LabelledData, Parameters, Sample, Tensor,
    sample::{INPUT, OUTPUT, SAMPLE_IN, SAMPLE_OUT},
};
use futures::future::try_join_all;
use log::{debug, info, warn};
use tokio::{
    io::{self, AsyncRead, AsyncWrite},
    net::{
        TcpListener,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use crate::{
    config::BatchServerConfig,
    error::{Result, ServerErr},
    validate::SampleRegistry,
};

/// A batch server whose clients are connected through TCP sockets.
pub type TcpBatchServer = BatchServer<OwnedReadHalf, OwnedWriteHalf>;

/// One connected simulation client.
struct Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    client_id: usize,
    rx: FrameReceiver<R>,
    tx: FrameSender<W>,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// The server side of the connection handshake.
    ///
    /// # Arguments
    /// * `params` - The server parameters to send.
    /// * `ask_size` - Whether this client must report the sample shapes.
    ///
    /// # Returns
    /// The client's parameters and, when asked for, its `(input, output)` shapes.
    async fn handshake(
        &mut self,
        params: &Parameters,
        ask_size: bool,
    ) -> io::Result<(Parameters, Option<(Vec<usize>, Vec<usize>)>)> {
        self.tx.send_parameters(params).await?;
        let client_params = self.rx.recv_parameters().await?;

        if !ask_size {
            self.tx.send_command(Command::Done).await?;
            return Ok((client_params, None));
        }

        self.tx.send_command(Command::Size).await?;
        let input_shape = self.rx.recv_shape().await?;
        let output_shape = self.rx.recv_shape().await?;
        Ok((client_params, Some((input_shape, output_shape))))
    }

    /// Runs one round for this client: `steps - 1` plain steps, the optional
    /// dataset sample injection and the final `cmpt`.
    async fn exchange(&mut self, steps: usize, injected: Option<&Sample>) -> Result<LabelledData> {
        let client_id = self.client_id;
        self.round(steps, injected)
            .await
            .map_err(|source| ServerErr::Client { client_id, source })
    }

    async fn round(&mut self, steps: usize, injected: Option<&Sample>) -> io::Result<LabelledData> {
        for _ in 1..steps {
            self.tx.send_command(Command::Step).await?;
            let instrumentation = self.rx.recv_labelled_data().await?;
            if !instrumentation.is_empty() {
                debug!(client_id = self.client_id, fields = instrumentation.len(); "received instrumentation");
            }
        }

        if let Some(sample) = injected {
            self.tx.send_command(Command::Sample).await?;
            self.tx.send_labelled_tensor(SAMPLE_IN, sample.input()).await?;
            self.tx.send_labelled_tensor(SAMPLE_OUT, sample.output()).await?;

            let extras = sample
                .fields()
                .iter()
                .filter(|(name, _)| !matches!(name.as_str(), INPUT | OUTPUT));
            self.tx.send_fields(extras).await?;
        }

        self.tx.send_command(Command::Compute).await?;
        self.rx.recv_labelled_data().await
    }

    async fn push_predictions(&mut self, predictions: &[Tensor]) -> Result<()> {
        let client_id = self.client_id;
        let push = async {
            for prediction in predictions {
                self.tx.send_command(Command::Predict).await?;
                self.tx.send_tensor(prediction).await?;
            }

            Ok::<_, io::Error>(())
        };

        push.await
            .map_err(|source| ServerErr::Client { client_id, source })
    }

    async fn send_parameters(&mut self, params: &Parameters) -> Result<()> {
        let client_id = self.client_id;
        let send = async {
            self.tx.send_command(Command::Read).await?;
            self.tx.send_parameters(params).await
        };

        send.await
            .map_err(|source| ServerErr::Client { client_id, source })
    }

    async fn request_parameters(&mut self) -> Result<Parameters> {
        let client_id = self.client_id;
        let request = async {
            self.tx.send_command(Command::Recv).await?;
            self.rx.recv_parameters().await
        };

        request
            .await
            .map_err(|source| ServerErr::Client { client_id, source })
    }

    async fn ping(&mut self) -> Result<()> {
        let client_id = self.client_id;
        let ping = async {
            self.tx.send_command(Command::Test).await?;
            self.rx.expect_command(Command::Test).await
        };

        ping.await
            .map_err(|source| ServerErr::Client { client_id, source })
    }

    /// Sends `exit` and waits for the echo, the connection is dropped afterwards.
    async fn close(mut self) -> Result<()> {
        let client_id = self.client_id;
        let close = async {
            self.tx.send_command(Command::Exit).await?;
            self.rx.expect_command(Command::Exit).await
        };

        close
            .await
            .map_err(|source| ServerErr::Client { client_id, source })?;

        debug!(client_id = client_id; "client closed");
        Ok(())
    }
}

/// Assembles training batches out of the samples produced by its clients.
///
/// Every call runs on the caller's task, the per-client exchanges of a round
/// are joined so the round ends with the slowest client.
pub struct BatchServer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    config: BatchServerConfig,
    connections: Vec<Connection<R, W>>,
    registry: Option<SampleRegistry>,
    queue: VecDeque<Sample>,
    client_parameters: Vec<Parameters>,
}

impl<R, W> BatchServer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `BatchServer` without clients.
    ///
    /// # Arguments
    /// * `config` - The round configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the config is not usable.
    pub fn new(config: BatchServerConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            connections: Vec::new(),
            registry: None,
            queue: VecDeque::new(),
            client_parameters: Vec::new(),
        })
    }

    /// Handshakes a new client over the given channel and registers it.
    ///
    /// The first client to join reports the sample shapes.
    ///
    /// # Arguments
    /// * `rx` - Receiving end of the client channel.
    /// * `tx` - Sending end of the client channel.
    ///
    /// # Returns
    /// The id given to the client.
    pub async fn join(&mut self, rx: FrameReceiver<R>, tx: FrameSender<W>) -> Result<usize> {
        let client_id = self.connections.len();
        let mut conn = Connection { client_id, rx, tx };

        let (params, shapes) = conn
            .handshake(&self.config.parameters, self.registry.is_none())
            .await
            .map_err(|source| ServerErr::Client { client_id, source })?;

        if let Some((input_shape, output_shape)) = shapes {
            info!(client_id = client_id; "learned sample shapes: input {input_shape:?}, output {output_shape:?}");
            self.registry = Some(SampleRegistry::new(input_shape, output_shape));
        }

        info!(client_id = client_id; "client joined");
        self.connections.push(conn);
        self.client_parameters.push(params);
        Ok(client_id)
    }

    pub fn num_clients(&self) -> usize {
        self.connections.len()
    }

    /// The `input` shape learned from the first client.
    pub fn input_shape(&self) -> Option<&[usize]> {
        self.registry.as_ref().map(SampleRegistry::input_shape)
    }

    /// The `output` shape learned from the first client.
    pub fn output_shape(&self) -> Option<&[usize]> {
        self.registry.as_ref().map(SampleRegistry::output_shape)
    }

    /// The parameters every client sent during its handshake, in join order.
    pub fn client_parameters(&self) -> &[Parameters] {
        &self.client_parameters
    }

    /// Samples produced by past rounds and not yet handed out.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Runs rounds until `batch_size` valid samples are queued and hands them out.
    ///
    /// # Arguments
    /// * `batch_size` - The amount of samples to return.
    ///
    /// # Returns
    /// The first `batch_size` queued samples, leftovers stay queued for the
    /// next call.
    ///
    /// # Errors
    /// `TooManyWrongSamples` once more than `max_wrong_samples_per_step`
    /// samples were dropped during this call, `Client` if any exchange fails.
    pub async fn get_batch(&mut self, batch_size: usize) -> Result<Batch> {
        self.ensure_clients()?;
        let max = self.config.max_wrong_samples_per_step;
        let mut dropped = 0;

        while self.queue.len() < batch_size {
            let replies = self.round(None).await?;
            let registry = self.registry.as_mut().ok_or(ServerErr::NoClients)?;

            for (client_id, data) in replies.into_iter().enumerate() {
                match registry.validate(data) {
                    Ok(sample) => self.queue.push_back(sample),
                    Err(reason) => {
                        dropped += 1;
                        debug!(client_id = client_id; "dropped sample: {reason}");

                        if dropped > max {
                            warn!(dropped = dropped, max = max; "too many wrong samples");
                            return Err(ServerErr::TooManyWrongSamples { dropped, max });
                        }
                    }
                }
            }
        }

        debug!(queued = self.queue.len(); "batch of {batch_size} assembled");
        Ok(self.queue.drain(..batch_size).collect())
    }

    /// Forwards a dataset batch through the clients.
    ///
    /// Slot `k` of `dataset` is injected into client `k mod N` before its
    /// `cmpt`. A valid reply replaces the slot, a rejected one keeps the
    /// dataset sample.
    ///
    /// # Arguments
    /// * `dataset` - The replayed batch.
    ///
    /// # Returns
    /// A batch of the same length as `dataset`.
    pub async fn get_batch_from(&mut self, dataset: Batch) -> Result<Batch> {
        self.ensure_clients()?;
        let n = self.connections.len();
        let mut samples = dataset.into_samples();

        for start in (0..samples.len()).step_by(n) {
            let end = (start + n).min(samples.len());
            let replies = self.round(Some(&samples[start..end])).await?;
            let registry = self.registry.as_mut().ok_or(ServerErr::NoClients)?;

            for (offset, data) in replies.into_iter().enumerate() {
                match registry.validate(data) {
                    Ok(sample) => samples[start + offset] = sample,
                    Err(reason) => {
                        debug!(client_id = offset, slot = start + offset; "kept dataset sample: {reason}");
                    }
                }
            }
        }

        Ok(Batch::new(samples))
    }

    /// Pushes prediction `i` to client `i mod N`.
    ///
    /// # Arguments
    /// * `predictions` - The network predictions stacked along the leading axis.
    pub async fn apply_prediction(&mut self, predictions: &Tensor) -> Result<()> {
        self.ensure_clients()?;
        if predictions.ndim() == 0 {
            return Err(ServerErr::InvalidPrediction(
                "predictions need a leading batch axis".into(),
            ));
        }

        let n = self.connections.len();
        let mut per_client = vec![Vec::new(); n];
        for (i, prediction) in predictions.outer_iter().enumerate() {
            per_client[i % n].push(prediction.to_owned());
        }

        let pushes = self
            .connections
            .iter_mut()
            .zip(&per_client)
            .map(|(conn, predictions)| conn.push_predictions(predictions));

        try_join_all(pushes).await?;
        Ok(())
    }

    /// Sends `params` to every client through `read`.
    pub async fn send_parameters(&mut self, params: &Parameters) -> Result<()> {
        self.ensure_clients()?;
        let sends = self
            .connections
            .iter_mut()
            .map(|conn| conn.send_parameters(params));

        try_join_all(sends).await?;
        Ok(())
    }

    /// Asks every client for its current parameters through `recv`.
    ///
    /// # Returns
    /// The parameters of every client, in join order.
    pub async fn request_parameters(&mut self) -> Result<Vec<Parameters>> {
        self.ensure_clients()?;
        try_join_all(self.connections.iter_mut().map(Connection::request_parameters)).await
    }

    /// Checks every client is alive through `test`.
    pub async fn ping(&mut self) -> Result<()> {
        self.ensure_clients()?;
        try_join_all(self.connections.iter_mut().map(Connection::ping)).await?;
        Ok(())
    }

    /// Sends `exit` to every client, waits for every echo and drops the connections.
    pub async fn close(&mut self) -> Result<()> {
        let connections = mem::take(&mut self.connections);
        let n = connections.len();

        self.queue.clear();
        try_join_all(connections.into_iter().map(Connection::close)).await?;

        info!(clients = n; "batch server closed");
        Ok(())
    }

    /// Runs a round on every client, or on the first `injected.len()` ones when
    /// dataset samples are injected.
    async fn round(&mut self, injected: Option<&[Sample]>) -> Result<Vec<LabelledData>> {
        let steps = self.config.simulations_per_step;
        let exchanges = self
            .connections
            .iter_mut()
            .enumerate()
            .filter_map(|(i, conn)| match injected {
                None => Some(conn.exchange(steps, None)),
                Some(samples) => samples.get(i).map(|sample| conn.exchange(steps, Some(sample))),
            });

        try_join_all(exchanges).await
    }

    fn ensure_clients(&self) -> Result<()> {
        if self.connections.is_empty() {
            return Err(ServerErr::NoClients);
        }

        Ok(())
    }
}

impl TcpBatchServer {
    /// Accepts exactly `n` connections from `listener`, handshaking them one
    /// after the other.
    ///
    /// # Arguments
    /// * `listener` - The bound listener.
    /// * `n` - The amount of clients to accept.
    pub async fn accept(&mut self, listener: &TcpListener, n: usize) -> Result<()> {
        for _ in 0..n {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            debug!("accepted connection from {addr}");

            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx);
            self.join(rx, tx).await?;
        }

        Ok(())
    }
}
