use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

use crate::error::Result;

pub const TRAINING_FILE: &str = "training.ndjson";
pub const EPOCHS_FILE: &str = "epochs.ndjson";

#[derive(Debug, Serialize)]
struct BatchRecord {
    epoch: usize,
    batch: usize,
    loss: f64,
    ts_ms: u64,
}

#[derive(Debug, Serialize)]
struct EpochRecord {
    epoch: usize,
    batches: usize,
    mean_loss: f64,
    ts_ms: u64,
}

/// Appends the training curves as NDJSON, one record per line.
pub struct StatsManager {
    training: BufWriter<File>,
    epochs: BufWriter<File>,
    epoch_losses: Vec<f64>,
}

impl StatsManager {
    /// Opens (or creates) both curve files inside `dir`.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        Ok(Self {
            training: append(&dir.join(TRAINING_FILE))?,
            epochs: append(&dir.join(EPOCHS_FILE))?,
            epoch_losses: Vec::new(),
        })
    }

    pub fn record_batch(&mut self, epoch: usize, batch: usize, loss: f64) -> Result<()> {
        self.epoch_losses.push(loss);
        let record = BatchRecord {
            epoch,
            batch,
            loss,
            ts_ms: now_ms(),
        };

        serde_json::to_writer(&mut self.training, &record)?;
        self.training.write_all(b"\n")?;
        Ok(())
    }

    /// Writes the mean loss of the batches recorded since the last call.
    ///
    /// # Returns
    /// The mean loss, `NaN` for an epoch without batches.
    pub fn end_epoch(&mut self, epoch: usize) -> Result<f64> {
        let batches = self.epoch_losses.len();
        let mean_loss = self.epoch_losses.drain(..).sum::<f64>() / batches as f64;

        let record = EpochRecord {
            epoch,
            batches,
            mean_loss,
            ts_ms: now_ms(),
        };

        serde_json::to_writer(&mut self.epochs, &record)?;
        self.epochs.write_all(b"\n")?;
        self.training.flush()?;
        self.epochs.flush()?;
        Ok(mean_loss)
    }

    pub fn close(&mut self) -> Result<()> {
        self.training.flush()?;
        self.epochs.flush()?;
        Ok(())
    }
}

fn append(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
