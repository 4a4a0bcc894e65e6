//! The implementation of the sending end of the application layer protocol.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    LenType, MAX_FRAME_LEN,
    codec::{self, Tensor},
    protocol::Command,
    sample::{LabelledData, Parameters},
};

/// The sending end handle of the communication.
pub struct FrameSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    /// Creates a new `FrameSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `payload` as a single length prefixed frame.
    ///
    /// # Arguments
    /// * `payload` - The bytes to send.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        let len = LenType::try_from(payload.len())
            .ok()
            .filter(|&len| len <= MAX_FRAME_LEN)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("frame of {} bytes exceeds {MAX_FRAME_LEN}", payload.len()),
                )
            })?;

        self.tx.write_all(&len.to_be_bytes()).await?;
        self.tx.write_all(payload).await?;
        self.tx.flush().await
    }

    /// Sends a command tag.
    pub async fn send_command(&mut self, cmd: Command) -> io::Result<()> {
        self.send_frame(cmd.tag()).await
    }

    /// Sends a tensor as a flat frame.
    pub async fn send_tensor(&mut self, tensor: &Tensor) -> io::Result<()> {
        let mut payload = std::mem::take(&mut self.buf);
        payload.clear();
        codec::encode_into(tensor, &mut payload);

        let res = self.send_frame(&payload).await;
        self.buf = payload;
        res
    }

    /// Sends a shape as a tensor of dimensions.
    pub async fn send_shape(&mut self, shape: &[usize]) -> io::Result<()> {
        self.send_frame(&codec::encode_shape(shape)).await
    }

    /// Sends a single `(label, payload)` pair.
    pub async fn send_labelled(&mut self, label: &str, payload: &[u8]) -> io::Result<()> {
        self.send_frame(label.as_bytes()).await?;
        self.send_frame(payload).await
    }

    /// Sends a labelled tensor.
    pub async fn send_labelled_tensor(&mut self, label: &str, tensor: &Tensor) -> io::Result<()> {
        self.send_frame(label.as_bytes()).await?;
        self.send_tensor(tensor).await
    }

    /// Sends every pair of `data` followed by the `done` command.
    pub async fn send_labelled_data(&mut self, data: &LabelledData) -> io::Result<()> {
        for (label, payload) in data {
            self.send_labelled(label, payload).await?;
        }

        self.send_command(Command::Done).await
    }

    /// Sends every labelled tensor yielded by `fields` followed by the `done` command.
    pub async fn send_fields<'a, I>(&mut self, fields: I) -> io::Result<()>
    where
        I: IntoIterator<Item = (&'a String, &'a Tensor)>,
    {
        for (label, tensor) in fields {
            self.send_labelled_tensor(label, tensor).await?;
        }

        self.send_command(Command::Done).await
    }

    /// Sends `params` as JSON encoded labelled data followed by the `done` command.
    pub async fn send_parameters(&mut self, params: &Parameters) -> io::Result<()> {
        for (label, value) in params {
            let payload = serde_json::to_vec(value)?;
            self.send_labelled(label, &payload).await?;
        }

        self.send_command(Command::Done).await
    }
}
