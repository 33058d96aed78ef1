//! Byte-blob cache for the last accepted scheme list and decoder manifest.
//!
//! The scheme manager persists the bytes exactly as received and replays
//! them on startup; this crate only moves opaque blobs. Two backends: an
//! in-memory table for tests and hosts without a writable disk, and a
//! directory of files.

mod file_store;
mod memory_store;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;

use fleetd_error::Result;

/// Which blob a call refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    DecoderManifest,
    SchemeList,
}

impl DataType {
    /// Stable storage key of this blob.
    pub fn key(self) -> &'static str {
        match self {
            DataType::DecoderManifest => "manifest",
            DataType::SchemeList => "schemeList",
        }
    }
}

/// Store for the byte blobs the scheme manager wants back after a restart.
pub trait CacheAndPersist: Send + Sync {
    /// Writes `bytes` under `kind`, replacing any previous blob.
    fn write(&self, kind: DataType, bytes: &[u8]) -> Result<()>;

    /// Reads the blob stored under `kind`; `None` when absent.
    fn read(&self, kind: DataType) -> Result<Option<Vec<u8>>>;

    /// Size in bytes of the stored blob, 0 when absent.
    fn size(&self, kind: DataType) -> Result<u64>;

    /// Removes the blob stored under `kind`; absent blobs are fine.
    fn erase(&self, kind: DataType) -> Result<()>;
}
