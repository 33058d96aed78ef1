use crate::{CacheAndPersist, DataType};
use fleetd_error::Result;
use fleetd_logger::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Blob store backed by one file per blob inside a base directory.
///
/// Writes go through a temporary file and an atomic rename so a crash
/// mid-write never leaves a truncated blob behind.
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) the store rooted at `base`.
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(FileStore { base })
    }

    fn path_of(&self, kind: DataType) -> PathBuf {
        self.base.join(kind.key())
    }
}

impl CacheAndPersist for FileStore {
    fn write(&self, kind: DataType, bytes: &[u8]) -> Result<()> {
        let target = self.path_of(kind);
        let tmp = self.base.join(format!("{}.tmp", kind.key()));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &target)?;
        debug!("persisted {} bytes under `{}`", bytes.len(), kind.key());
        Ok(())
    }

    fn read(&self, kind: DataType) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_of(kind)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn size(&self, kind: DataType) -> Result<u64> {
        match fs::metadata(self.path_of(kind)) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn erase(&self, kind: DataType) -> Result<()> {
        match fs::remove_file(self.path_of(kind)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
