use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("directory missing or not writable: {0}")]
    Directory(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure `dir` exists and accepts new files; create it if missing.
pub fn ensure_writable_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::Directory("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
    }
    // Writability probe: the temp file is removed when dropped.
    NamedTempFile::new_in(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
    Ok(())
}

/// Writes whole files inside one directory through a temp file and a rename,
/// so readers see either the previous content or the new one.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_writable_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        // `persist` replaces atomically on Unix; Windows refuses to overwrite.
        if cfg!(windows) && target.exists() {
            fs::remove_file(&target)?;
        }
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }

    /// Delete `filename`; a file that is already gone counts as removed.
    pub fn remove(&self, filename: &str) -> Result<(), PersistError> {
        match fs::remove_file(self.dir.join(filename)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
