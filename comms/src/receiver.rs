use std::io;

use ndarray::Array1;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN,
    codec::{self, Tensor},
    protocol::Command,
    sample::{Fields, LabelledData, Parameters},
};

/// The chunk sizes used to drain a frame's payload, largest first.
pub const CHUNK_LADDER: [usize; 5] = [4096, 2048, 1024, 512, 256];

/// Picks the largest rung of the ladder that fits in `remaining`.
fn chunk_for(remaining: usize) -> usize {
    CHUNK_LADDER
        .into_iter()
        .find(|&chunk| chunk <= remaining)
        .unwrap_or(remaining)
}

/// The receiving end handle of the communication.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    /// Creates a new `FrameReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits to receive a new frame into `buf`, overwriting it's contents.
    ///
    /// # Arguments
    /// * `buf` - The buffer to fill with the frame's payload.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure, a peer that closes
    /// the connection mid frame yields `UnexpectedEof`.
    pub async fn recv_frame_into(&mut self, buf: &mut Vec<u8>) -> io::Result<()> {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut size_buf).await?;
        let len = LenType::from_be_bytes(size_buf);

        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("incoming frame of {len} bytes exceeds {MAX_FRAME_LEN}"),
            ));
        }

        let len = len as usize;
        buf.clear();
        buf.resize(len, 0);

        let mut filled = 0;
        while filled < len {
            let chunk = chunk_for(len - filled);
            let read = self.rx.read(&mut buf[filled..filled + chunk]).await?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("peer closed the connection after {filled} of {len} bytes"),
                ));
            }

            filled += read;
        }

        Ok(())
    }

    /// Waits to receive a new frame.
    pub async fn recv_frame(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.recv_frame_into(&mut buf).await?;
        Ok(buf)
    }

    /// Waits for a command frame.
    ///
    /// # Returns
    /// The command or an `InvalidData` error if the frame isn't a known tag.
    pub async fn recv_command(&mut self) -> io::Result<Command> {
        let frame = self.recv_frame().await?;
        Command::from_tag(&frame)
    }

    /// Waits for a specific command.
    ///
    /// # Returns
    /// An `InvalidData` error if any other command arrives.
    pub async fn expect_command(&mut self, expected: Command) -> io::Result<()> {
        match self.recv_command().await? {
            cmd if cmd == expected => Ok(()),
            cmd => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected command {expected}, got {cmd}"),
            )),
        }
    }

    /// Waits for a tensor frame of the given shape.
    pub async fn recv_tensor(&mut self, shape: &[usize]) -> io::Result<Tensor> {
        let frame = self.recv_frame().await?;
        codec::decode(&frame, shape)
    }

    /// Waits for a flat tensor frame.
    pub async fn recv_flat(&mut self) -> io::Result<Vec<f64>> {
        let frame = self.recv_frame().await?;
        codec::decode_flat(&frame)
    }

    /// Waits for a shape sent as a tensor of dimensions.
    pub async fn recv_shape(&mut self) -> io::Result<Vec<usize>> {
        let frame = self.recv_frame().await?;
        codec::decode_shape(&frame)
    }

    /// Accumulates `(label, payload)` pairs until the `done` command.
    ///
    /// Inside a labelled stream every frame other than `done` is a label.
    ///
    /// # Returns
    /// The accumulated mapping, or an `InvalidData` error if a label isn't valid UTF-8.
    pub async fn recv_labelled_data(&mut self) -> io::Result<LabelledData> {
        let mut data = LabelledData::new();

        loop {
            let frame = self.recv_frame().await?;
            if frame == Command::Done.tag() {
                break;
            }

            let label = codec::decode_label(&frame)?;
            let payload = self.recv_frame().await?;
            data.insert(label, payload);
        }

        Ok(data)
    }

    /// Accumulates labelled tensors until the `done` command.
    ///
    /// The tensors are returned flat, the caller reshapes them to the
    /// registered shapes.
    pub async fn recv_fields(&mut self) -> io::Result<Fields> {
        self.recv_labelled_data()
            .await?
            .into_iter()
            .map(|(label, payload)| -> io::Result<_> {
                let values = codec::decode_flat(&payload)?;
                Ok((label, Array1::from(values).into_dyn()))
            })
            .collect()
    }

    /// Accumulates JSON encoded parameters until the `done` command.
    pub async fn recv_parameters(&mut self) -> io::Result<Parameters> {
        self.recv_labelled_data()
            .await?
            .into_iter()
            .map(|(label, payload)| -> io::Result<_> {
                Ok((label, serde_json::from_slice(&payload)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_picks_the_largest_fitting_rung() {
        assert_eq!(chunk_for(10_000), 4096);
        assert_eq!(chunk_for(4096), 4096);
        assert_eq!(chunk_for(4095), 2048);
        assert_eq!(chunk_for(600), 512);
        assert_eq!(chunk_for(256), 256);
        assert_eq!(chunk_for(100), 100);
    }
}
