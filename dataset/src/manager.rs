use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use comms::{Batch, Fields, Sample, codec};
use log::{debug, info, warn};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{
    config::{DatasetConfig, Mode},
    error::{DatasetErr, Result},
    normalization::{self, Normalization, RunningStats},
    partition::{self, GroupWriter, PartitionList},
};

/// The file the registered fields and their shapes are persisted to.
pub const FIELDS_FILE: &str = "fields.json";

/// A partition group of a mode: the `index`-th partition of every field.
type Group = (Mode, usize);

/// Owns the partitioned on-disk dataset of a session.
///
/// Samples are appended to the partition group of the current mode and read
/// back through an in-memory buffer that is refilled one load at a time.
pub struct DatasetManager {
    dir: PathBuf,
    session_name: String,
    config: DatasetConfig,
    max_bytes: u64,
    mode: Mode,
    /// `{field: per-sample shape}`, registered by the first append.
    shapes: BTreeMap<String, Vec<usize>>,
    /// `{field: [partition file names; 3 modes]}`.
    tree: BTreeMap<String, [Vec<String>; 3]>,
    writer: Option<GroupWriter>,
    memory: Vec<Sample>,
    read_cursor: usize,
    loaded_modes: Vec<Mode>,
    cursors: BTreeMap<Group, usize>,
    normalization: Option<Normalization>,
    rng: StdRng,
}

impl DatasetManager {
    /// Creates a new, empty dataset in `dir`.
    ///
    /// # Arguments
    /// * `dir` - The dataset directory, created if missing.
    /// * `session_name` - Prefix of every partition file name.
    /// * `config` - The dataset configuration.
    ///
    /// # Errors
    /// `InvalidConfig` for unusable configs, `Io` if the directory can't be created.
    pub fn new(dir: impl Into<PathBuf>, session_name: &str, config: DatasetConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        info!(mode = config.initial_mode().as_str(); "dataset at {}", dir.display());

        Ok(Self {
            dir,
            session_name: session_name.to_string(),
            max_bytes: config.max_bytes(),
            mode: config.initial_mode(),
            config,
            shapes: BTreeMap::new(),
            tree: BTreeMap::new(),
            writer: None,
            memory: Vec::new(),
            read_cursor: 0,
            loaded_modes: Vec::new(),
            cursors: BTreeMap::new(),
            normalization: None,
            rng,
        })
    }

    /// Reopens an existing dataset: fields, partition lists and normalisation.
    ///
    /// # Errors
    /// `Integrity` if the field registry or every partition list is missing,
    /// if a list names an unknown field or a missing file, or if the
    /// per-field partition counts of a mode diverge.
    pub fn open(dir: impl Into<PathBuf>, session_name: &str, config: DatasetConfig) -> Result<Self> {
        let mut manager = Self::new(dir, session_name, config)?;

        let fields_path = manager.dir.join(FIELDS_FILE);
        if !fields_path.exists() {
            return Err(DatasetErr::Integrity(format!(
                "missing field registry {}",
                fields_path.display()
            )));
        }

        manager.shapes = serde_json::from_slice(&fs::read(&fields_path)?)?;
        manager.tree = manager
            .shapes
            .keys()
            .map(|field| (field.clone(), Default::default()))
            .collect();

        let mut lists = 0;
        for mode in Mode::ALL {
            let Some(list) = partition::read_list(&manager.dir, mode)? else {
                continue;
            };

            lists += 1;
            for (field, names) in list {
                let partitions = manager.tree.get_mut(&field).ok_or_else(|| {
                    DatasetErr::Integrity(format!("{mode} list names unknown field {field:?}"))
                })?;

                for name in &names {
                    if !manager.dir.join(name).exists() {
                        return Err(DatasetErr::Integrity(format!("missing partition {name}")));
                    }
                }

                partitions[mode.index()] = names;
            }

            manager.aligned_count(mode)?;
        }

        if lists == 0 {
            return Err(DatasetErr::Integrity(format!(
                "no partition list in {}",
                manager.dir.display()
            )));
        }

        manager.normalization = Normalization::load(&manager.dir)?;
        info!(fields = manager.shapes.len(); "reopened dataset");
        Ok(manager)
    }

    /// Whether `dir` holds a dataset that `open` can resume.
    pub fn exists(dir: &Path) -> bool {
        dir.join(FIELDS_FILE).exists()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The registered fields and their per-sample shapes.
    pub fn fields(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.shapes
    }

    /// The partition file names of `field` in `mode`, in creation order.
    pub fn partitions(&self, mode: Mode, field: &str) -> &[String] {
        self.tree
            .get(field)
            .map(|partitions| partitions[mode.index()].as_slice())
            .unwrap_or_default()
    }

    /// The amount of partition groups of `mode`.
    pub fn partition_count(&self, mode: Mode) -> usize {
        self.tree
            .values()
            .map(|partitions| partitions[mode.index()].len())
            .max()
            .unwrap_or(0)
    }

    pub fn normalization(&self) -> Option<&Normalization> {
        self.normalization.as_ref()
    }

    /// Appends every sample of `batch` to the current mode's partitions.
    ///
    /// The first append registers the batch's field set; samples with other
    /// fields or shapes are rejected before anything is written.
    pub fn append(&mut self, batch: &Batch) -> Result<()> {
        for sample in batch.samples() {
            self.append_sample(sample)?;
        }

        Ok(())
    }

    /// Appends a single sample to every field's partition, rotating the group
    /// once it holds at least `max_bytes` bytes.
    pub fn append_sample(&mut self, sample: &Sample) -> Result<()> {
        self.register(sample)?;

        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.open_group()?,
        };

        writer.write_sample(sample)?;

        if writer.bytes() >= self.max_bytes {
            info!(mode = self.mode.as_str(), index = writer.index(), bytes = writer.bytes(); "partition group full, rotating");
            writer.finish()?;
        } else {
            self.writer = Some(writer);
        }

        Ok(())
    }

    /// Returns the next `batch_size` samples of the current mode.
    pub fn get_data(&mut self, batch_size: usize) -> Result<Batch> {
        let mode = self.mode;
        self.get_data_mixed(batch_size, &[mode])
    }

    /// Returns the next `batch_size` samples read from the partitions of `modes`.
    ///
    /// The buffer is refilled whenever fewer than `batch_size` samples remain,
    /// switching the set of modes drops the buffer.
    ///
    /// `get_data` is the single-mode case. Mixing modes, e.g. Training with the
    /// Running samples recorded by prediction sessions, is left to callers of
    /// the dataset itself: the data manager only replays the current mode.
    ///
    /// # Errors
    /// `Empty` if the modes hold no sample, `Integrity` for misaligned partitions.
    pub fn get_data_mixed(&mut self, batch_size: usize, modes: &[Mode]) -> Result<Batch> {
        if self.loaded_modes != modes {
            self.reset_memory();
            self.loaded_modes = modes.to_vec();
        }

        if self.memory.len() - self.read_cursor < batch_size {
            self.memory.drain(..self.read_cursor);
            self.read_cursor = 0;

            while self.memory.len() < batch_size {
                if self.load(modes)? == 0 {
                    return Err(DatasetErr::Empty(modes.to_vec()));
                }
            }
        }

        let end = self.read_cursor + batch_size;
        let batch = self.memory[self.read_cursor..end].to_vec();
        self.read_cursor = end;
        Ok(Batch::new(batch))
    }

    /// Reshuffles the samples left in memory, a no-op unless shuffling is enabled.
    pub fn shuffle(&mut self) {
        if self.config.shuffle_dataset {
            self.memory[self.read_cursor..].shuffle(&mut self.rng);
        }
    }

    /// Switches the mode partitions are written to and read from.
    ///
    /// # Errors
    /// `ModeIsTerminal` when leaving `Running`.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        if mode == self.mode {
            return Ok(());
        }

        if self.mode == Mode::Running {
            return Err(DatasetErr::ModeIsTerminal { to: mode });
        }

        self.close_group()?;
        self.reset_memory();
        self.loaded_modes.clear();

        info!(from = self.mode.as_str(), to = mode.as_str(); "dataset mode switched");
        self.mode = mode;
        Ok(())
    }

    /// Computes the per-field `(mean, std)` over every Training partition and
    /// persists them.
    pub fn compute_normalization(&mut self) -> Result<&Normalization> {
        self.flush()?;
        let groups = self.aligned_count(Mode::Training)?;

        let mut coefficients = BTreeMap::new();
        for (field, partitions) in &self.tree {
            if !normalization::is_normalized(field) {
                continue;
            }

            let mut stats = RunningStats::default();
            for name in &partitions[Mode::Training.index()][..groups] {
                let bytes = fs::read(self.dir.join(name))?;
                for x in codec::decode_flat(&bytes)? {
                    stats.push(x);
                }
            }

            coefficients.insert(field.clone(), stats.finish());
        }

        let normalization = Normalization::new(coefficients);
        normalization.save(&self.dir)?;
        info!(fields = self.tree.len(); "normalization computed over {groups} partition(s)");

        Ok(&*self.normalization.insert(normalization))
    }

    /// Flushes the open partitions and persists the partition lists, the
    /// field registry and the normalisation.
    pub fn close(&mut self) -> Result<()> {
        self.close_group()?;

        if !self.shapes.is_empty() {
            for mode in Mode::ALL {
                if self.partition_count(mode) > 0 {
                    partition::write_list(&self.dir, mode, &self.list(mode))?;
                }
            }

            self.write_fields()?;
        }

        if let Some(normalization) = &self.normalization {
            normalization.save(&self.dir)?;
        }

        debug!("dataset closed");
        Ok(())
    }

    fn register(&mut self, sample: &Sample) -> Result<()> {
        if self.shapes.is_empty() {
            self.shapes = sample
                .fields()
                .iter()
                .map(|(field, tensor)| (field.clone(), tensor.shape().to_vec()))
                .collect();

            for field in self.shapes.keys() {
                self.tree.entry(field.clone()).or_default();
            }

            self.write_fields()?;
            info!(fields = self.shapes.len(); "registered fields {:?}", self.shapes.keys().collect::<Vec<_>>());
            return Ok(());
        }

        if sample.fields().len() != self.shapes.len() {
            return Err(DatasetErr::FieldMismatch(format!(
                "sample has fields {:?}, expected {:?}",
                sample.names().collect::<Vec<_>>(),
                self.shapes.keys().collect::<Vec<_>>()
            )));
        }

        for (field, tensor) in sample.fields() {
            match self.shapes.get(field) {
                None => {
                    return Err(DatasetErr::FieldMismatch(format!(
                        "unregistered field {field:?}"
                    )));
                }
                Some(shape) if shape.as_slice() != tensor.shape() => {
                    return Err(DatasetErr::FieldMismatch(format!(
                        "field {field:?} has shape {:?}, expected {shape:?}",
                        tensor.shape()
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Opens the next partition group of the current mode and records it in
    /// the mode's partition list.
    fn open_group(&mut self) -> Result<GroupWriter> {
        let mode = self.mode;
        let index = self.partition_count(mode);

        let mut names = BTreeMap::new();
        for (field, partitions) in &mut self.tree {
            let name = partition::partition_name(&self.session_name, mode, field, index);
            partitions[mode.index()].push(name.clone());
            names.insert(field.clone(), name);
        }

        let writer = GroupWriter::create(&self.dir, index, &names)?;
        partition::write_list(&self.dir, mode, &self.list(mode))?;

        debug!(mode = mode.as_str(), index = index; "opened partition group");
        Ok(writer)
    }

    fn close_group(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }

        Ok(())
    }

    fn list(&self, mode: Mode) -> PartitionList {
        self.tree
            .iter()
            .map(|(field, partitions)| (field.clone(), partitions[mode.index()].clone()))
            .collect()
    }

    fn write_fields(&self) -> Result<()> {
        let contents = serde_json::to_vec_pretty(&self.shapes)?;
        fs::write(self.dir.join(FIELDS_FILE), contents)?;
        Ok(())
    }

    /// The amount of partition groups of `mode`, every field must agree on it.
    fn aligned_count(&self, mode: Mode) -> Result<usize> {
        let mut counts = self
            .tree
            .iter()
            .map(|(field, partitions)| (field, partitions[mode.index()].len()));

        let Some((_, count)) = counts.next() else {
            return Ok(0);
        };

        if let Some((field, other)) = counts.find(|&(_, other)| other != count) {
            return Err(DatasetErr::Integrity(format!(
                "{mode}: field {field:?} has {other} partitions, expected {count}"
            )));
        }

        Ok(count)
    }

    fn sample_len(&self, field: &str) -> usize {
        self.shapes
            .get(field)
            .map_or(0, |shape| shape.iter().product())
    }

    /// The amount of samples of a group, every field's file must agree on it.
    fn group_len(&self, (mode, index): Group) -> Result<usize> {
        let mut len = None;
        for (field, partitions) in &self.tree {
            let path = self.dir.join(&partitions[mode.index()][index]);
            let samples = partition::samples_in(&path, self.sample_len(field))?;

            match len {
                None => len = Some(samples),
                Some(expected) if expected != samples => {
                    return Err(DatasetErr::Integrity(format!(
                        "{mode} group {index}: field {field:?} holds {samples} samples, expected {expected}"
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(len.unwrap_or(0))
    }

    /// Reads `count` aligned samples of a group starting at sample `offset`.
    fn read_group(&self, (mode, index): Group, offset: usize, count: usize) -> Result<Vec<Sample>> {
        let mut columns = BTreeMap::new();
        for (field, partitions) in &self.tree {
            let path = self.dir.join(&partitions[mode.index()][index]);
            let values = partition::read_samples(&path, self.sample_len(field), offset, count)?;
            columns.insert(field.as_str(), values);
        }

        (0..count)
            .map(|i| -> Result<Sample> {
                let fields = columns
                    .iter()
                    .map(|(&field, values)| -> Result<(String, comms::Tensor)> {
                        let len = self.sample_len(field);
                        let flat = values[i * len..(i + 1) * len].to_vec();
                        let tensor = codec::from_flat(flat, &self.shapes[field])?;
                        Ok((field.to_string(), tensor))
                    })
                    .collect::<Result<Fields>>()?;

                Ok(Sample::from_fields(fields)?)
            })
            .collect()
    }

    /// Loads the next samples of `modes` into memory.
    ///
    /// A single group is read whole. Several groups are read in lockstep,
    /// `read_stride` samples of each at a time, until `max_bytes` are loaded
    /// or every group is exhausted. Exhausted groups start over on the next
    /// load once all of them are.
    ///
    /// # Returns
    /// The amount of loaded samples.
    fn load(&mut self, modes: &[Mode]) -> Result<usize> {
        self.flush()?;

        let mut groups = Vec::new();
        for &mode in modes {
            let count = self.aligned_count(mode)?;
            groups.extend((0..count).map(|index| (mode, index)));
        }

        let loaded = match groups.as_slice() {
            [] => Vec::new(),
            &[group] => {
                let len = self.group_len(group)?;
                self.read_group(group, 0, len)?
            }
            groups => self.read_lockstep(groups)?,
        };

        let n = loaded.len();
        let start = self.memory.len();
        self.memory.extend(loaded);

        if self.config.shuffle_dataset {
            self.memory[start..].shuffle(&mut self.rng);
        }

        debug!(samples = n, groups = groups.len(); "loaded samples from {modes:?}");
        Ok(n)
    }

    fn read_lockstep(&mut self, groups: &[Group]) -> Result<Vec<Sample>> {
        let lens = groups
            .iter()
            .map(|&group| self.group_len(group))
            .collect::<Result<Vec<_>>>()?;

        let exhausted = groups
            .iter()
            .zip(&lens)
            .all(|(group, &len)| self.cursors.get(group).copied().unwrap_or(0) >= len);

        if exhausted {
            for group in groups {
                self.cursors.insert(*group, 0);
            }
        }

        let sample_bytes: u64 = self
            .shapes
            .keys()
            .map(|field| (self.sample_len(field) * partition::VALUE_SIZE) as u64)
            .sum();

        let stride = self.config.read_stride;
        let mut loaded = Vec::new();
        let mut loaded_bytes = 0;

        loop {
            let mut progressed = false;

            for (&group, &len) in groups.iter().zip(&lens) {
                let position = self.cursors.get(&group).copied().unwrap_or(0);
                if position >= len {
                    continue;
                }

                let count = stride.min(len - position);
                loaded.extend(self.read_group(group, position, count)?);
                self.cursors.insert(group, position + count);
                loaded_bytes += count as u64 * sample_bytes;
                progressed = true;

                if loaded_bytes >= self.max_bytes {
                    return Ok(loaded);
                }
            }

            if !progressed {
                break;
            }
        }

        if loaded.is_empty() {
            warn!("every partition of the selected modes is empty");
        }

        Ok(loaded)
    }

    fn reset_memory(&mut self) {
        self.memory.clear();
        self.read_cursor = 0;
        self.cursors.clear();
    }
}
