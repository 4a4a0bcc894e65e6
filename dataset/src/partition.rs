//! Partition files, partition lists and the writer of the current partition group.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use comms::{Sample, codec};

use crate::{
    config::Mode,
    error::{DatasetErr, Result},
};

/// The size in bytes of one stored value.
pub const VALUE_SIZE: usize = size_of::<f64>();

/// `{field: partition file names}` for a single mode, in creation order.
pub type PartitionList = BTreeMap<String, Vec<String>>;

/// The name of the `index`-th partition of `field` in `mode`.
pub fn partition_name(session: &str, mode: Mode, field: &str, index: usize) -> String {
    format!("{session}_{mode}_{field}_{index}.npy")
}

pub fn list_path(dir: &Path, mode: Mode) -> PathBuf {
    dir.join(format!("{mode}_partitions.txt"))
}

/// Writes the partition list of a mode, one `<field> <file name>` line per
/// partition, group by group.
pub fn write_list(dir: &Path, mode: Mode, list: &PartitionList) -> io::Result<()> {
    let groups = list.values().map(Vec::len).max().unwrap_or(0);

    let mut contents = String::new();
    for index in 0..groups {
        for (field, names) in list {
            if let Some(name) = names.get(index) {
                contents.push_str(field);
                contents.push(' ');
                contents.push_str(name);
                contents.push('\n');
            }
        }
    }

    fs::write(list_path(dir, mode), contents)
}

/// Reads the partition list of a mode.
///
/// # Returns
/// `None` when the mode has no list file.
pub fn read_list(dir: &Path, mode: Mode) -> Result<Option<PartitionList>> {
    let path = list_path(dir, mode);
    if !path.exists() {
        return Ok(None);
    }

    let mut list = PartitionList::new();
    for (n, line) in fs::read_to_string(&path)?.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let (field, name) = line.split_once(' ').ok_or_else(|| {
            DatasetErr::Integrity(format!("{}:{}: malformed entry {line:?}", path.display(), n + 1))
        })?;

        list.entry(field.to_string())
            .or_default()
            .push(name.trim().to_string());
    }

    Ok(Some(list))
}

/// The amount of samples stored in a partition file.
///
/// # Arguments
/// * `path` - The partition file.
/// * `sample_len` - The amount of values of one sample of the file's field.
pub fn samples_in(path: &Path, sample_len: usize) -> Result<usize> {
    let bytes = fs::metadata(path)?.len() as usize;
    let sample_bytes = sample_len * VALUE_SIZE;

    if sample_bytes == 0 || bytes % sample_bytes != 0 {
        return Err(DatasetErr::Integrity(format!(
            "{} holds {bytes} bytes, not a multiple of {sample_bytes}",
            path.display()
        )));
    }

    Ok(bytes / sample_bytes)
}

/// Reads `count` samples starting at sample `offset` out of a partition file.
pub fn read_samples(
    path: &Path,
    sample_len: usize,
    offset: usize,
    count: usize,
) -> Result<Vec<f64>> {
    let sample_bytes = sample_len * VALUE_SIZE;
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start((offset * sample_bytes) as u64))?;

    let mut values: Vec<f64> = vec![0.0; count * sample_len];
    file.read_exact(bytemuck::cast_slice_mut(values.as_mut_slice()))?;
    codec::from_le_in_place(&mut values);
    Ok(values)
}

/// The open partition files of the current group, one per field.
pub struct GroupWriter {
    index: usize,
    files: BTreeMap<String, BufWriter<File>>,
    bytes: u64,
    buf: Vec<u8>,
}

impl GroupWriter {
    /// Creates the files of a new partition group, an existing file is never
    /// overwritten.
    ///
    /// # Arguments
    /// * `dir` - The dataset directory.
    /// * `index` - The group's index within it's mode.
    /// * `names` - `{field: file name}` of every registered field.
    pub fn create(dir: &Path, index: usize, names: &BTreeMap<String, String>) -> io::Result<Self> {
        let files = names
            .iter()
            .map(|(field, name)| -> io::Result<_> {
                let file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(dir.join(name))?;

                Ok((field.clone(), BufWriter::new(file)))
            })
            .collect::<io::Result<_>>()?;

        Ok(Self {
            index,
            files,
            bytes: 0,
            buf: Vec::new(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Total bytes written to the group, across every field.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Appends every field of `sample` to it's partition.
    pub fn write_sample(&mut self, sample: &Sample) -> io::Result<()> {
        for (field, tensor) in sample.fields() {
            let file = self.files.get_mut(field).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no open partition for field {field:?}"),
                )
            })?;

            self.buf.clear();
            codec::encode_into(tensor, &mut self.buf);
            file.write_all(&self.buf)?;
            self.bytes += self.buf.len() as u64;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        for file in self.files.values_mut() {
            file.flush()?;
        }

        Ok(())
    }

    /// Flushes and closes every file of the group.
    pub fn finish(mut self) -> io::Result<()> {
        self.flush()?;
        for (_, file) in self.files {
            file.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }

        Ok(())
    }
}
