pub mod client;
pub mod error;
pub mod simulation;

use log::info;
use tokio::net::{TcpStream, ToSocketAddrs};

pub use client::SimulationClient;
pub use error::{ClientErr, Result, SimError};
pub use simulation::{SimResult, Simulation};

/// Connects to a batch server and serves `simulation` until the server sends `exit`.
///
/// # Args
/// * `client_id` - Identifier used for observability.
/// * `addr` - The batch server's address.
/// * `simulation` - The simulation instance to drive.
///
/// # Returns
/// The simulation once the connection was gracefully closed.
pub async fn connect<A, S>(client_id: usize, addr: A, simulation: S) -> Result<S>
where
    A: ToSocketAddrs,
    S: Simulation,
{
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    info!(client_id = client_id; "connected to batch server at {}", stream.peer_addr()?);

    let (rx, tx) = stream.into_split();
    let (rx, tx) = comms::channel(rx, tx);
    SimulationClient::new(client_id, simulation).run(rx, tx).await
}
