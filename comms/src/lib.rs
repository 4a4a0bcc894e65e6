//! Wire level building blocks shared by the batch server and the simulation clients.
//!
//! Every message is a frame: a 4 byte big-endian length followed by that many
//! payload bytes. On top of frames travel command tags, labelled data streams
//! terminated by `done` and tensors encoded with [`codec`].

pub mod codec;
pub mod protocol;
mod receiver;
pub mod sample;
mod sender;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::Tensor;
pub use protocol::Command;
pub use receiver::{CHUNK_LADDER, FrameReceiver};
pub use sample::{Batch, Fields, LabelledData, Parameters, Sample};
pub use sender::FrameSender;

type LenType = u32;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// The largest payload accepted on either end of a channel.
pub const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

/// Creates both `FrameReceiver` and `FrameSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of a frame receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
