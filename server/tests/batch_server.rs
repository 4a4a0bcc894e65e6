use client::{SimResult, Simulation, SimulationClient};
use comms::{Batch, Fields, FrameReceiver, FrameSender, Parameters, Sample, Tensor};
use futures::future::join_all;
use ndarray::{Array1, arr1};
use server::{BatchServer, BatchServerConfig, DEFAULT_MAX_WRONG_SAMPLES, ServerErr};
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    net::TcpListener,
};

type Rx = FrameReceiver<ReadHalf<DuplexStream>>;
type Tx = FrameSender<WriteHalf<DuplexStream>>;
type DuplexServer = BatchServer<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Produces `input = [id, t]`, `output = [10 t]` and an `energy` field.
#[derive(Default)]
struct Ramp {
    id: f64,
    t: f64,
    output_len: usize,
    reject_steps: Vec<usize>,
    steps: usize,
    injected: Option<Sample>,
    seen_injections: Vec<Vec<f64>>,
    predictions: Vec<Vec<f64>>,
    params: Parameters,
    closed: bool,
}

impl Ramp {
    fn new(id: usize) -> Self {
        Self {
            id: id as f64,
            output_len: 1,
            ..Default::default()
        }
    }
}

impl Simulation for Ramp {
    fn input_shape(&self) -> Vec<usize> {
        vec![2]
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![self.output_len]
    }

    fn create(&mut self, params: &Parameters) -> SimResult<()> {
        self.params = params.clone();
        Ok(())
    }

    fn step(&mut self) -> SimResult<()> {
        self.steps += 1;
        self.t += 1.0;
        Ok(())
    }

    fn compute_input(&mut self) -> SimResult<Tensor> {
        match self.injected.take() {
            Some(sample) => {
                let values: Vec<f64> = sample.input().iter().copied().collect();
                self.seen_injections.push(values.clone());
                Ok(arr1(&values).mapv(|v| v * 2.0).into_dyn())
            }
            None => Ok(arr1(&[self.id, self.t]).into_dyn()),
        }
    }

    fn compute_output(&mut self) -> SimResult<Tensor> {
        Ok(Array1::from_elem(self.output_len, 10.0 * self.t).into_dyn())
    }

    fn additional_fields(&mut self) -> SimResult<Fields> {
        let mut fields = Fields::new();
        fields.insert("energy".into(), arr1(&[self.t * self.t]).into_dyn());
        Ok(fields)
    }

    fn check_sample(&mut self) -> bool {
        !self.reject_steps.contains(&self.steps)
    }

    fn apply_prediction(&mut self, prediction: Tensor) -> SimResult<()> {
        self.predictions.push(prediction.iter().copied().collect());
        Ok(())
    }

    fn set_dataset_sample(&mut self, sample: Sample) -> SimResult<()> {
        self.injected = Some(sample);
        Ok(())
    }

    fn close(&mut self) -> SimResult<()> {
        self.closed = true;
        Ok(())
    }
}

fn channel_pairs(n: usize) -> (Vec<(Rx, Tx)>, Vec<(Rx, Tx)>) {
    (0..n)
        .map(|_| {
            let (sv_stream, cl_stream) = io::duplex(4096);
            let (rx, tx) = io::split(sv_stream);
            let server = comms::channel(rx, tx);
            let (rx, tx) = io::split(cl_stream);
            let client = comms::channel(rx, tx);
            (server, client)
        })
        .unzip()
}

fn config(simulations_per_step: usize, max_wrong: usize) -> BatchServerConfig {
    let mut parameters = Parameters::new();
    parameters.insert("dt".into(), serde_json::json!(0.5));

    BatchServerConfig {
        simulations_per_step,
        max_wrong_samples_per_step: max_wrong,
        parameters,
    }
}

/// Runs `body` against a server joined by one client per simulation and
/// returns both the body's result and the simulations after the clients exited.
async fn with_clients<T, F>(
    config: BatchServerConfig,
    sims: Vec<Ramp>,
    body: F,
) -> (Result<T, ServerErr>, Vec<Ramp>)
where
    F: AsyncFnOnce(&mut DuplexServer) -> Result<T, ServerErr>,
{
    let (server_ends, client_ends) = channel_pairs(sims.len());

    let clients = client_ends
        .into_iter()
        .zip(sims)
        .enumerate()
        .map(|(id, ((rx, tx), sim))| SimulationClient::new(id, sim).run(rx, tx));

    let server_side = async {
        let mut server = DuplexServer::new(config)?;
        for (rx, tx) in server_ends {
            server.join(rx, tx).await?;
        }

        let res = body(&mut server).await;
        server.close().await?;
        res
    };

    let (sims, res) = tokio::join!(join_all(clients), server_side);
    let sims = sims.into_iter().map(|sim| sim.unwrap()).collect();
    (res, sims)
}

fn column(batch: &Batch, field: &str, i: usize) -> Vec<f64> {
    batch
        .samples()
        .iter()
        .map(|sample| sample.get(field).unwrap()[[i]])
        .collect()
}

#[tokio::test]
async fn two_clients_fill_a_batch_of_four_in_two_rounds() {
    let sims = vec![Ramp::new(0), Ramp::new(1)];

    let (res, sims) = with_clients(config(1, 0), sims, async |server| {
        assert_eq!(server.input_shape(), Some(&[2][..]));
        assert_eq!(server.output_shape(), Some(&[1][..]));
        server.get_batch(4).await
    })
    .await;

    let batch = res.unwrap();
    assert_eq!(batch.len(), 4);
    assert_eq!(column(&batch, "input", 0), vec![0.0, 1.0, 0.0, 1.0]);
    assert_eq!(column(&batch, "input", 1), vec![1.0, 1.0, 2.0, 2.0]);
    assert_eq!(column(&batch, "energy", 0), vec![1.0, 1.0, 4.0, 4.0]);

    let stacked = batch.stack().unwrap();
    assert_eq!(stacked["input"].shape(), &[4, 2]);
    assert_eq!(stacked["output"].shape(), &[4, 1]);

    for sim in &sims {
        assert_eq!(sim.steps, 2);
        assert_eq!(sim.params["dt"], serde_json::json!(0.5));
        assert!(sim.closed);
    }
}

#[tokio::test]
async fn leftovers_stay_queued_for_the_next_call() {
    let sims = vec![Ramp::new(0), Ramp::new(1), Ramp::new(2)];

    let (res, _) = with_clients(config(1, 0), sims, async |server| {
        let first = server.get_batch(2).await?;
        assert_eq!(server.queued(), 1);

        let second = server.get_batch(2).await?;
        assert_eq!(server.queued(), 2);
        Ok((first, second))
    })
    .await;

    let (first, second) = res.unwrap();
    assert_eq!(column(&first, "input", 0), vec![0.0, 1.0]);
    assert_eq!(column(&second, "input", 0), vec![2.0, 0.0]);
    assert_eq!(column(&second, "input", 1), vec![1.0, 2.0]);
}

#[tokio::test]
async fn rejected_samples_are_dropped_and_rounds_continue() {
    let mut rejecting = Ramp::new(1);
    rejecting.reject_steps = vec![1];

    let (res, sims) = with_clients(config(1, 1), vec![Ramp::new(0), rejecting], async |server| {
        let batch = server.get_batch(4).await?;
        Ok((batch, server.queued()))
    })
    .await;

    let (batch, queued) = res.unwrap();
    assert_eq!(batch.len(), 4);
    assert_eq!(queued, 1);
    assert_eq!(column(&batch, "input", 0), vec![0.0, 0.0, 1.0, 0.0]);
    assert_eq!(sims[1].steps, 3);
}

#[tokio::test]
async fn the_default_config_tolerates_a_rejected_sample() {
    let mut rejecting = Ramp::new(1);
    rejecting.reject_steps = vec![1];

    let config = BatchServerConfig {
        parameters: config(1, 0).parameters,
        ..Default::default()
    };
    assert_eq!(config.max_wrong_samples_per_step, DEFAULT_MAX_WRONG_SAMPLES);

    let (res, _) = with_clients(config, vec![Ramp::new(0), rejecting], async |server| {
        server.get_batch(4).await
    })
    .await;

    let batch = res.unwrap();
    assert_eq!(batch.len(), 4);
    assert_eq!(column(&batch, "input", 0), vec![0.0, 0.0, 1.0, 0.0]);
}

#[tokio::test]
async fn too_many_rejections_abort_the_call() {
    let mut rejecting = Ramp::new(0);
    rejecting.reject_steps = (1..=10).collect();

    let (res, _) = with_clients(config(1, 2), vec![rejecting], async |server| {
        server.get_batch(1).await
    })
    .await;

    assert!(matches!(
        res,
        Err(ServerErr::TooManyWrongSamples { dropped: 3, max: 2 })
    ));
}

#[tokio::test]
async fn samples_of_the_wrong_shape_never_reach_the_batch() {
    let mut wide = Ramp::new(1);
    wide.output_len = 3;

    let (res, _) = with_clients(config(1, 10), vec![Ramp::new(0), wide], async |server| {
        server.get_batch(2).await
    })
    .await;

    let batch = res.unwrap();
    assert_eq!(column(&batch, "input", 0), vec![0.0, 0.0]);
}

#[tokio::test]
async fn every_sample_costs_simulations_per_step_steps() {
    let (res, sims) = with_clients(config(3, 0), vec![Ramp::new(0)], async |server| {
        server.get_batch(2).await
    })
    .await;

    let batch = res.unwrap();
    assert_eq!(column(&batch, "input", 1), vec![3.0, 6.0]);
    assert_eq!(sims[0].steps, 6);
}

#[tokio::test]
async fn predictions_go_round_robin_in_order() {
    let predictions = arr1(&[10.0, 11.0, 12.0, 13.0, 14.0])
        .into_shape_with_order((5, 1))
        .unwrap()
        .into_dyn();

    let (res, sims) = with_clients(config(1, 0), vec![Ramp::new(0), Ramp::new(1)], async |server| {
        server.apply_prediction(&predictions).await
    })
    .await;

    res.unwrap();
    assert_eq!(sims[0].predictions, vec![vec![10.0], vec![12.0], vec![14.0]]);
    assert_eq!(sims[1].predictions, vec![vec![11.0], vec![13.0]]);
}

#[tokio::test]
async fn dataset_samples_are_injected_slot_by_slot() {
    let dataset: Batch = (0..3)
        .map(|k| {
            let k = k as f64;
            Sample::new(arr1(&[k, k]).into_dyn(), arr1(&[-k]).into_dyn())
        })
        .collect();

    let mut rejecting = Ramp::new(1);
    rejecting.reject_steps = vec![1];

    let (res, sims) = with_clients(config(1, 0), vec![Ramp::new(0), rejecting], async |server| {
        server.get_batch_from(dataset.clone()).await
    })
    .await;

    let batch = res.unwrap();
    assert_eq!(batch.len(), 3);
    // Slot 1 was rejected, it keeps the replayed sample.
    assert_eq!(batch.samples()[1], dataset.samples()[1]);
    assert_eq!(column(&batch, "input", 0), vec![0.0, 1.0, 4.0]);

    assert_eq!(sims[0].seen_injections, vec![vec![0.0, 0.0], vec![2.0, 2.0]]);
    assert_eq!(sims[1].seen_injections, vec![vec![1.0, 1.0]]);
}

#[tokio::test]
async fn parameters_travel_both_ways() {
    let (res, _) = with_clients(config(1, 0), vec![Ramp::new(0), Ramp::new(1)], async |server| {
        let mut params = Parameters::new();
        params.insert("gain".into(), serde_json::json!(2));
        server.send_parameters(&params).await?;
        server.ping().await?;
        server.request_parameters().await
    })
    .await;

    let params = res.unwrap();
    assert_eq!(params.len(), 2);
    assert!(params.iter().all(Parameters::is_empty));
}

#[tokio::test]
async fn close_waits_for_every_exit_echo() {
    let (res, sims) = with_clients(config(1, 0), vec![Ramp::new(0), Ramp::new(1)], async |server| {
        assert_eq!(server.num_clients(), 2);
        Ok(())
    })
    .await;

    res.unwrap();
    assert!(sims.iter().all(|sim| sim.closed && sim.steps == 0));
}

#[tokio::test]
async fn calls_without_clients_fail() {
    let mut server = DuplexServer::new(config(1, 0)).unwrap();
    assert!(matches!(server.get_batch(1).await, Err(ServerErr::NoClients)));
    server.close().await.unwrap();
}

#[test]
fn zero_simulations_per_step_is_rejected() {
    assert!(matches!(
        DuplexServer::new(config(0, 0)),
        Err(ServerErr::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn a_client_hanging_up_aborts_the_batch() {
    let (mut server_ends, client_ends) = channel_pairs(1);
    let (rx, tx) = server_ends.remove(0);

    let client_side = async move {
        let (mut cl_rx, mut cl_tx) = client_ends.into_iter().next().unwrap();
        cl_rx.recv_parameters().await?;
        cl_tx.send_parameters(&Parameters::new()).await?;
        cl_rx.recv_command().await?;
        cl_tx.send_shape(&[1]).await?;
        cl_tx.send_shape(&[1]).await?;
        drop((cl_rx, cl_tx));
        Ok::<_, io::Error>(())
    };

    let server_side = async {
        let mut server = DuplexServer::new(config(1, 0))?;
        server.join(rx, tx).await?;
        server.get_batch(1).await
    };

    let (client, res) = tokio::join!(client_side, server_side);
    client.unwrap();
    assert!(matches!(res, Err(ServerErr::Client { client_id: 0, .. })));
}

#[tokio::test]
async fn tcp_clients_are_accepted_in_order() -> Result<(), ServerErr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let clients = (0..2).map(|id| client::connect(id, addr, Ramp::new(id)));

    let server_side = async {
        let mut server = server::TcpBatchServer::new(config(1, 0))?;
        server.accept(&listener, 2).await?;
        let batch = server.get_batch(2).await?;
        server.close().await?;
        Ok::<_, ServerErr>(batch)
    };

    let (sims, batch) = tokio::join!(join_all(clients), server_side);
    let batch = batch?;
    assert_eq!(batch.len(), 2);
    for sim in sims {
        assert!(sim.unwrap().closed);
    }

    Ok(())
}
