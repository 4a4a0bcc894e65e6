use std::{cell::RefCell, rc::Rc};

use client::{SimResult, Simulation, SimulationClient};
use comms::{
    Command, FrameReceiver, FrameSender, Parameters, Sample, Tensor, codec,
    sample::{CHECK, SAMPLE_IN, SAMPLE_OUT},
};
use ndarray::{Array1, arr1};
use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

type Rx = FrameReceiver<ReadHalf<DuplexStream>>;
type Tx = FrameSender<WriteHalf<DuplexStream>>;

#[derive(Default)]
struct Log {
    created_with: Option<Parameters>,
    predictions: Vec<Vec<f64>>,
    parameters: Vec<Parameters>,
    dataset_samples: Vec<Sample>,
    resets: usize,
    closed: bool,
}

struct Counter {
    x: f64,
    reject_at: Vec<usize>,
    steps: usize,
    log: Rc<RefCell<Log>>,
}

impl Counter {
    fn new(log: Rc<RefCell<Log>>) -> Self {
        Self {
            x: 0.0,
            reject_at: Vec::new(),
            steps: 0,
            log,
        }
    }
}

impl Simulation for Counter {
    fn input_shape(&self) -> Vec<usize> {
        vec![2]
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![1]
    }

    fn create(&mut self, params: &Parameters) -> SimResult<()> {
        self.log.borrow_mut().created_with = Some(params.clone());
        Ok(())
    }

    fn step(&mut self) -> SimResult<()> {
        self.steps += 1;
        self.x += 1.0;
        Ok(())
    }

    fn compute_input(&mut self) -> SimResult<Tensor> {
        Ok(arr1(&[self.x, self.x]).into_dyn())
    }

    fn compute_output(&mut self) -> SimResult<Tensor> {
        Ok(arr1(&[2.0 * self.x]).into_dyn())
    }

    fn check_sample(&mut self) -> bool {
        !self.reject_at.contains(&self.steps)
    }

    fn reset(&mut self) -> SimResult<()> {
        self.log.borrow_mut().resets += 1;
        Ok(())
    }

    fn apply_prediction(&mut self, prediction: Tensor) -> SimResult<()> {
        self.log
            .borrow_mut()
            .predictions
            .push(prediction.iter().copied().collect());
        Ok(())
    }

    fn recv_parameters(&mut self, params: Parameters) -> SimResult<()> {
        self.log.borrow_mut().parameters.push(params);
        Ok(())
    }

    fn send_parameters(&mut self) -> Parameters {
        let mut params = Parameters::new();
        params.insert("kind".into(), serde_json::json!("counter"));
        params
    }

    fn set_dataset_sample(&mut self, sample: Sample) -> SimResult<()> {
        self.log.borrow_mut().dataset_samples.push(sample);
        Ok(())
    }

    fn close(&mut self) -> SimResult<()> {
        self.log.borrow_mut().closed = true;
        Ok(())
    }
}

fn channel_pair() -> ((Rx, Tx), (Rx, Tx)) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
}

async fn server_handshake(rx: &mut Rx, tx: &mut Tx, ask_size: bool) -> io::Result<Parameters> {
    let mut params = Parameters::new();
    params.insert("dt".into(), serde_json::json!(0.01));
    tx.send_parameters(&params).await?;

    let client_params = rx.recv_parameters().await?;
    if ask_size {
        tx.send_command(Command::Size).await?;
        assert_eq!(rx.recv_shape().await?, vec![2]);
        assert_eq!(rx.recv_shape().await?, vec![1]);
    } else {
        tx.send_command(Command::Done).await?;
    }

    Ok(client_params)
}

async fn shutdown(rx: &mut Rx, tx: &mut Tx) -> io::Result<()> {
    tx.send_command(Command::Exit).await?;
    rx.expect_command(Command::Exit).await
}

#[tokio::test]
async fn handshake_exchanges_parameters_and_sizes() -> io::Result<()> {
    let ((mut sv_rx, mut sv_tx), (cl_rx, cl_tx)) = channel_pair();
    let log = Rc::new(RefCell::new(Log::default()));
    let client = SimulationClient::new(0, Counter::new(log.clone()));

    let server = async {
        let client_params = server_handshake(&mut sv_rx, &mut sv_tx, true).await?;
        assert_eq!(client_params["kind"], serde_json::json!("counter"));
        shutdown(&mut sv_rx, &mut sv_tx).await
    };

    let (sim, res) = tokio::join!(client.run(cl_rx, cl_tx), server);
    res?;
    sim.unwrap();

    let log = log.borrow();
    assert_eq!(log.created_with.as_ref().unwrap()["dt"], serde_json::json!(0.01));
    assert!(log.closed);
    Ok(())
}

#[tokio::test]
async fn compute_sends_input_and_output_then_done() -> io::Result<()> {
    let ((mut sv_rx, mut sv_tx), (cl_rx, cl_tx)) = channel_pair();
    let log = Rc::new(RefCell::new(Log::default()));
    let client = SimulationClient::new(0, Counter::new(log));

    let server = async {
        server_handshake(&mut sv_rx, &mut sv_tx, false).await?;

        sv_tx.send_command(Command::Step).await?;
        assert!(sv_rx.recv_labelled_data().await?.is_empty());

        sv_tx.send_command(Command::Compute).await?;
        let fields = sv_rx.recv_fields().await?;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["input"].iter().copied().collect::<Vec<_>>(), vec![2.0, 2.0]);
        assert_eq!(fields["output"].iter().copied().collect::<Vec<_>>(), vec![4.0]);

        shutdown(&mut sv_rx, &mut sv_tx).await
    };

    let (sim, res) = tokio::join!(client.run(cl_rx, cl_tx), server);
    res?;
    assert_eq!(sim.unwrap().steps, 2);
    Ok(())
}

#[tokio::test]
async fn rejected_samples_carry_a_veto_and_reset_the_simulation() -> io::Result<()> {
    let ((mut sv_rx, mut sv_tx), (cl_rx, cl_tx)) = channel_pair();
    let log = Rc::new(RefCell::new(Log::default()));
    let mut counter = Counter::new(log.clone());
    counter.reject_at = vec![1];
    let client = SimulationClient::new(3, counter);

    let server = async {
        server_handshake(&mut sv_rx, &mut sv_tx, false).await?;

        sv_tx.send_command(Command::Compute).await?;
        let rejected = sv_rx.recv_fields().await?;
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[CHECK][[0]], 0.0);

        sv_tx.send_command(Command::Compute).await?;
        let accepted = sv_rx.recv_fields().await?;
        assert!(!accepted.contains_key(CHECK));
        assert!(accepted.contains_key("input"));

        shutdown(&mut sv_rx, &mut sv_tx).await
    };

    let (sim, res) = tokio::join!(client.run(cl_rx, cl_tx), server);
    res?;
    sim.unwrap();
    assert_eq!(log.borrow().resets, 1);
    Ok(())
}

#[tokio::test]
async fn predictions_parameters_and_dataset_samples_reach_the_simulation() -> io::Result<()> {
    let ((mut sv_rx, mut sv_tx), (cl_rx, cl_tx)) = channel_pair();
    let log = Rc::new(RefCell::new(Log::default()));
    let client = SimulationClient::new(0, Counter::new(log.clone()));

    let server = async {
        server_handshake(&mut sv_rx, &mut sv_tx, false).await?;

        sv_tx.send_command(Command::Predict).await?;
        sv_tx.send_tensor(&arr1(&[0.5, 1.5]).into_dyn()).await?;

        let mut params = Parameters::new();
        params.insert("gravity".into(), serde_json::json!(-9.81));
        sv_tx.send_command(Command::Read).await?;
        sv_tx.send_parameters(&params).await?;

        sv_tx.send_command(Command::Sample).await?;
        sv_tx.send_labelled_tensor(SAMPLE_IN, &arr1(&[7.0, 8.0]).into_dyn()).await?;
        sv_tx.send_labelled_tensor(SAMPLE_OUT, &arr1(&[9.0]).into_dyn()).await?;
        sv_tx.send_command(Command::Done).await?;

        sv_tx.send_command(Command::Recv).await?;
        let advertised = sv_rx.recv_parameters().await?;
        assert_eq!(advertised["kind"], serde_json::json!("counter"));

        sv_tx.send_command(Command::Test).await?;
        sv_rx.expect_command(Command::Test).await?;

        shutdown(&mut sv_rx, &mut sv_tx).await
    };

    let (sim, res) = tokio::join!(client.run(cl_rx, cl_tx), server);
    res?;
    sim.unwrap();

    let log = log.borrow();
    assert_eq!(log.predictions, vec![vec![0.5, 1.5]]);
    assert_eq!(log.parameters[0]["gravity"], serde_json::json!(-9.81));
    let sample = &log.dataset_samples[0];
    assert_eq!(sample.input(), &arr1(&[7.0, 8.0]).into_dyn());
    assert_eq!(sample.output(), &arr1(&[9.0]).into_dyn());
    Ok(())
}

#[tokio::test]
async fn stray_done_is_a_protocol_error() -> io::Result<()> {
    let ((mut sv_rx, mut sv_tx), (cl_rx, cl_tx)) = channel_pair();
    let log = Rc::new(RefCell::new(Log::default()));
    let client = SimulationClient::new(0, Counter::new(log));

    let server = async {
        server_handshake(&mut sv_rx, &mut sv_tx, false).await?;
        sv_tx.send_command(Command::Done).await
    };

    let (sim, res) = tokio::join!(client.run(cl_rx, cl_tx), server);
    res?;
    assert!(matches!(
        sim,
        Err(client::ClientErr::UnexpectedCommand {
            got: Command::Done,
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn a_closed_server_ends_the_client_with_an_io_error() {
    let ((sv_rx, sv_tx), (cl_rx, cl_tx)) = channel_pair();
    let log = Rc::new(RefCell::new(Log::default()));
    let client = SimulationClient::new(0, Counter::new(log));

    drop((sv_rx, sv_tx));
    let res = client.run(cl_rx, cl_tx).await;
    assert!(matches!(res, Err(client::ClientErr::Io(_))));
}

#[test]
fn shape_tensors_are_plain_floats() {
    let bytes = codec::encode(&Array1::from(vec![2.0, 1.0]).into_dyn());
    assert_eq!(codec::decode_shape(&bytes).unwrap(), vec![2, 1]);
}
