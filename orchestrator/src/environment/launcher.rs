use std::{
    mem,
    net::SocketAddr,
    path::PathBuf,
    process::{Child, Command},
    sync::Arc,
    thread::{self, JoinHandle},
};

use client::Simulation;
use log::{info, warn};
use tokio::runtime;

use crate::error::{OrchestratorError, Result};

/// Starts the simulation clients a TCP environment accepts.
pub trait ClientLauncher {
    /// Starts client `client_id`, which must connect to `addr`.
    fn launch(&mut self, client_id: usize, addr: SocketAddr) -> Result<()>;

    /// Waits for every launched client to exit once the server closed them.
    ///
    /// # Errors
    /// The first client failure, the others are logged.
    fn wait(&mut self) -> Result<()>;
}

/// Runs every client as a subprocess.
///
/// The program finds the server through the `HOST` and `PORT` environment
/// variables and it's own id in `CLIENT_ID`.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    children: Vec<(usize, Child)>,
}

impl ProcessLauncher {
    /// Creates a new `ProcessLauncher`.
    ///
    /// # Arguments
    /// * `program` - The client executable.
    /// * `args` - The arguments every client is started with.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            children: Vec::new(),
        }
    }
}

impl ClientLauncher for ProcessLauncher {
    fn launch(&mut self, client_id: usize, addr: SocketAddr) -> Result<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .env("HOST", addr.ip().to_string())
            .env("PORT", addr.port().to_string())
            .env("CLIENT_ID", client_id.to_string())
            .spawn()
            .map_err(|e| OrchestratorError::ClientError {
                client_id,
                msg: format!("failed to spawn {}: {e}", self.program.display()),
            })?;

        info!(client_id = client_id, pid = child.id(); "client process spawned");
        self.children.push((client_id, child));
        Ok(())
    }

    fn wait(&mut self) -> Result<()> {
        let mut first = None;
        for (client_id, mut child) in mem::take(&mut self.children) {
            let failure = match child.wait() {
                Ok(status) if status.success() => continue,
                Ok(status) => format!("client process exited with {status}"),
                Err(e) => format!("failed to wait for client process: {e}"),
            };

            warn!(client_id = client_id; "{failure}");
            first.get_or_insert(OrchestratorError::ClientError {
                client_id,
                msg: failure,
            });
        }

        first.map_or(Ok(()), Err)
    }
}

impl Drop for ProcessLauncher {
    fn drop(&mut self) {
        for (client_id, child) in &mut self.children {
            if let Err(e) = child.kill() {
                warn!(client_id = *client_id; "failed to kill client process: {e}");
            }
            let _ = child.wait();
        }
    }
}

/// Runs every client on it's own thread with it's own current-thread runtime.
///
/// Each simulation is built on it's client's thread, so it needn't be `Send`.
pub struct ThreadLauncher<F> {
    factory: Arc<F>,
    handles: Vec<(usize, JoinHandle<client::Result<()>>)>,
}

impl<F> ThreadLauncher<F> {
    /// Creates a new `ThreadLauncher`.
    ///
    /// # Arguments
    /// * `factory` - Builds the simulation of the given client id.
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            handles: Vec::new(),
        }
    }
}

impl<F, S> ClientLauncher for ThreadLauncher<F>
where
    F: Fn(usize) -> S + Send + Sync + 'static,
    S: Simulation + 'static,
{
    fn launch(&mut self, client_id: usize, addr: SocketAddr) -> Result<()> {
        let factory = Arc::clone(&self.factory);
        let handle = thread::Builder::new()
            .name(format!("sim-client-{client_id}"))
            .spawn(move || -> client::Result<()> {
                let rt = runtime::Builder::new_current_thread().enable_all().build()?;
                let simulation = factory(client_id);
                rt.block_on(client::connect(client_id, addr, simulation))?;
                Ok(())
            })?;

        self.handles.push((client_id, handle));
        Ok(())
    }

    fn wait(&mut self) -> Result<()> {
        let mut first = None;
        for (client_id, handle) in mem::take(&mut self.handles) {
            let failure = match handle.join() {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "client thread panicked".to_string(),
            };

            warn!(client_id = client_id; "client failed: {failure}");
            first.get_or_insert(OrchestratorError::ClientError {
                client_id,
                msg: failure,
            });
        }

        first.map_or(Ok(()), Err)
    }
}
