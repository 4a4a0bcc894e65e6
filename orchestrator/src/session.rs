use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use log::info;

use crate::error::Result;

const DATASET_DIR: &str = "dataset";
const NETWORK_DIR: &str = "network";
const STATS_DIR: &str = "stats";

/// A session's directory tree: `<root>/<name>/{dataset,network,stats}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    name: String,
    dir: PathBuf,
}

impl Session {
    /// Creates a new session, a taken name gets the first free numeric suffix
    /// (`name_1`, `name_2`, ...).
    ///
    /// # Arguments
    /// * `root` - The directory sessions live in.
    /// * `name` - The requested session name.
    pub fn create(root: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(root)?;

        let mut suffix = 0;
        let (name, dir) = loop {
            let candidate = match suffix {
                0 => name.to_string(),
                n => format!("{name}_{n}"),
            };

            // `create_dir` fails on existing directories, so two sessions never share one.
            match fs::create_dir(root.join(&candidate)) {
                Ok(()) => break (candidate.clone(), root.join(candidate)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        };

        let session = Self { name, dir };
        session.create_tree()?;
        info!("session {} created at {}", session.name, session.dir.display());
        Ok(session)
    }

    /// Reuses the session `name`, creating it when it doesn't exist yet.
    pub fn open(root: &Path, name: &str) -> Result<Self> {
        let session = Self {
            name: name.to_string(),
            dir: root.join(name),
        };

        session.create_tree()?;
        info!("session {} opened at {}", session.name, session.dir.display());
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.dir.join(DATASET_DIR)
    }

    pub fn network_dir(&self) -> PathBuf {
        self.dir.join(NETWORK_DIR)
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.dir.join(STATS_DIR)
    }

    fn create_tree(&self) -> Result<()> {
        for sub in [DATASET_DIR, NETWORK_DIR, STATS_DIR] {
            fs::create_dir_all(self.dir.join(sub))?;
        }

        Ok(())
    }
}
