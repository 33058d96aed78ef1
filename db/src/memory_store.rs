use crate::{CacheAndPersist, DataType};
use fleetd_error::Result;
use fleetd_util::RwLock;
use std::collections::HashMap;

/// In-memory blob table, for tests and hosts without persistent storage.
#[derive(Default)]
pub struct MemoryStore {
    table: RwLock<HashMap<&'static str, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheAndPersist for MemoryStore {
    fn write(&self, kind: DataType, bytes: &[u8]) -> Result<()> {
        self.table.write().insert(kind.key(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, kind: DataType) -> Result<Option<Vec<u8>>> {
        Ok(self.table.read().get(kind.key()).cloned())
    }

    fn size(&self, kind: DataType) -> Result<u64> {
        Ok(self
            .table
            .read()
            .get(kind.key())
            .map(|blob| blob.len() as u64)
            .unwrap_or(0))
    }

    fn erase(&self, kind: DataType) -> Result<()> {
        self.table.write().remove(kind.key());
        Ok(())
    }
}
