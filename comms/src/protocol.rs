//! The closed set of 4-byte ASCII command tags.

use std::{fmt, io};

/// The size in bytes of every command tag.
pub const TAG_SIZE: usize = 4;

/// A command exchanged between the batch server and the simulation clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Terminate, the client echoes it back before closing.
    Exit,
    /// Advance the simulation one step without producing a sample.
    Step,
    /// Advance the simulation and compute a sample.
    Compute,
    /// Ask for the input and output shapes.
    Size,
    /// Terminates a labelled-data stream or skips the size exchange.
    Done,
    /// Ask the client for it's parameters.
    Recv,
    /// A prediction tensor follows.
    Predict,
    /// A labelled-data stream of parameters follows.
    Read,
    /// A labelled-data stream holding a dataset sample follows.
    Sample,
    /// Liveness check, echoed back.
    Test,
}

impl Command {
    /// Every known command, in tag order.
    pub const ALL: [Command; 10] = [
        Command::Exit,
        Command::Step,
        Command::Compute,
        Command::Size,
        Command::Done,
        Command::Recv,
        Command::Predict,
        Command::Read,
        Command::Sample,
        Command::Test,
    ];

    /// Returns the wire tag of this command.
    pub fn tag(self) -> &'static [u8; TAG_SIZE] {
        match self {
            Command::Exit => b"exit",
            Command::Step => b"step",
            Command::Compute => b"cmpt",
            Command::Size => b"size",
            Command::Done => b"done",
            Command::Recv => b"recv",
            Command::Predict => b"pred",
            Command::Read => b"read",
            Command::Sample => b"samp",
            Command::Test => b"test",
        }
    }

    /// Parses a command from a frame payload.
    ///
    /// # Arguments
    /// * `bytes` - The payload of a received frame.
    ///
    /// # Returns
    /// The command or an `InvalidData` error for unknown tags.
    pub fn from_tag(bytes: &[u8]) -> io::Result<Self> {
        Self::try_from_tag(bytes).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown command {:?}", String::from_utf8_lossy(bytes)),
            )
        })
    }

    /// Parses a command from a frame payload, `None` if it isn't a known tag.
    pub fn try_from_tag(bytes: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.tag() == bytes)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SAFETY: All the tags are ASCII.
        let tag = std::str::from_utf8(self.tag()).unwrap();
        write!(f, "{tag}")
    }
}
