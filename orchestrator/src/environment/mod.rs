//! Sample production, either by a batch server fed over TCP or by a single
//! in-process simulation.

mod launcher;
mod local;

use std::net::SocketAddr;

use client::Simulation;
use comms::{Batch, Parameters, Tensor};
use log::{debug, info};
use server::TcpBatchServer;
use tokio::{net::TcpListener, runtime::Runtime};

pub use launcher::{ClientLauncher, ProcessLauncher, ThreadLauncher};

use crate::{
    configs::EnvironmentConfig,
    error::{OrchestratorError, Result},
};
use local::LocalEnvironment;

/// The batch server, the runtime every call to it is blocked on, and the
/// launcher of it's clients.
struct TcpEnvironment {
    /// Stays bound until every client echoed `exit`.
    listener: Option<TcpListener>,
    runtime: Runtime,
    server: TcpBatchServer,
    launcher: Box<dyn ClientLauncher>,
    addr: SocketAddr,
}

enum Backend {
    Tcp(TcpEnvironment),
    InProcess(LocalEnvironment),
}

/// Produces batches of samples and pushes predictions back to the simulations.
pub struct EnvironmentManager {
    backend: Backend,
    closed: bool,
}

impl EnvironmentManager {
    /// Binds the batch server, launches the clients and accepts them.
    ///
    /// # Arguments
    /// * `config` - The environment configuration.
    /// * `launcher` - Starts each client, which must connect to the given address.
    ///
    /// # Returns
    /// A manager with `config.clients()` connected clients.
    pub fn tcp(config: &EnvironmentConfig, launcher: Box<dyn ClientLauncher>) -> Result<Self> {
        config.validate()?;
        let mut server = TcpBatchServer::new(config.server_config())?;
        let mut launcher = launcher;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let bind_addr = SocketAddr::new(config.ip_address, config.port);
        let listener = runtime
            .block_on(TcpListener::bind(bind_addr))
            .map_err(|source| OrchestratorError::BindFailed {
                addr: bind_addr.to_string(),
                source,
            })?;

        let addr = listener.local_addr()?;
        let n = config.clients();
        info!(clients = n; "batch server listening on {addr}");

        for client_id in 0..n {
            launcher.launch(client_id, addr)?;
        }

        runtime.block_on(server.accept(&listener, n))?;
        info!(clients = n; "every client joined");

        Ok(Self {
            backend: Backend::Tcp(TcpEnvironment {
                listener: Some(listener),
                runtime,
                server,
                launcher,
                addr,
            }),
            closed: false,
        })
    }

    /// Drives `simulation` on the caller's thread.
    pub fn in_process(config: &EnvironmentConfig, simulation: Box<dyn Simulation>) -> Result<Self> {
        config.validate()?;
        let local = LocalEnvironment::new(config, simulation)?;

        Ok(Self {
            backend: Backend::InProcess(local),
            closed: false,
        })
    }

    /// Whether the batch server still holds it's listening socket.
    pub fn is_listening(&self) -> bool {
        match &self.backend {
            Backend::Tcp(env) => env.listener.is_some(),
            Backend::InProcess(_) => false,
        }
    }

    /// The batch server's address, `None` for an in-process environment.
    pub fn addr(&self) -> Option<SocketAddr> {
        match &self.backend {
            Backend::Tcp(env) => Some(env.addr),
            Backend::InProcess(_) => None,
        }
    }

    /// The amount of simulations producing samples.
    pub fn num_clients(&self) -> usize {
        match &self.backend {
            Backend::Tcp(env) => env.server.num_clients(),
            Backend::InProcess(_) => 1,
        }
    }

    pub fn input_shape(&self) -> Option<&[usize]> {
        match &self.backend {
            Backend::Tcp(env) => env.server.input_shape(),
            Backend::InProcess(local) => Some(local.input_shape()),
        }
    }

    pub fn output_shape(&self) -> Option<&[usize]> {
        match &self.backend {
            Backend::Tcp(env) => env.server.output_shape(),
            Backend::InProcess(local) => Some(local.output_shape()),
        }
    }

    /// Produces `batch_size` fresh samples.
    pub fn get_data(&mut self, batch_size: usize) -> Result<Batch> {
        debug!(batch_size = batch_size; "producing batch");
        match &mut self.backend {
            Backend::Tcp(env) => Ok(env.runtime.block_on(env.server.get_batch(batch_size))?),
            Backend::InProcess(local) => local.get_data(batch_size),
        }
    }

    /// Injects `dataset` into the simulations and returns the samples they
    /// produce from it. Rejected slots keep the dataset sample.
    pub fn get_data_from(&mut self, dataset: Batch) -> Result<Batch> {
        debug!(batch_size = dataset.len(); "producing batch from dataset samples");
        match &mut self.backend {
            Backend::Tcp(env) => Ok(env.runtime.block_on(env.server.get_batch_from(dataset))?),
            Backend::InProcess(local) => local.get_data_from(dataset),
        }
    }

    /// Pushes prediction `i` to simulation `i mod N`.
    pub fn apply_prediction(&mut self, predictions: &Tensor) -> Result<()> {
        match &mut self.backend {
            Backend::Tcp(env) => {
                Ok(env.runtime.block_on(env.server.apply_prediction(predictions))?)
            }
            Backend::InProcess(local) => local.apply_prediction(predictions),
        }
    }

    /// Sends parameters to every simulation.
    pub fn send_parameters(&mut self, params: &Parameters) -> Result<()> {
        match &mut self.backend {
            Backend::Tcp(env) => Ok(env.runtime.block_on(env.server.send_parameters(params))?),
            Backend::InProcess(local) => local.send_parameters(params),
        }
    }

    /// Shuts every simulation down, closing twice is a no-op.
    ///
    /// # Errors
    /// The server's failure if the shutdown handshake broke, otherwise the
    /// first client failure.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match &mut self.backend {
            Backend::Tcp(env) => {
                let closed = env.runtime.block_on(env.server.close());
                drop(env.listener.take());
                debug!("stopped listening on {}", env.addr);

                let waited = env.launcher.wait();
                closed?;
                waited?;
            }
            Backend::InProcess(local) => local.close()?,
        }

        info!("environment closed");
        Ok(())
    }
}
