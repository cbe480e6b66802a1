//! Fixed-width random-access table, keyed by a dense record number, backed
//! by the paged buffer pool. This is `edges.table`: the canonical store for
//! `(from, to, type)` triples addressed by edge identifier.

use std::sync::Arc;

use crate::error::EngineResult;
use crate::storage::buffer_pool::BufferPool;
use crate::storage::config::PAGE_SIZE;
use crate::storage::file_manager::FileId;

const COLUMNS: usize = 3;
const RECORD_BYTES: usize = COLUMNS * 8;

const fn records_per_page() -> usize {
    PAGE_SIZE / RECORD_BYTES
}

/// Random-access store of `(from, to, type)` triples, one per edge
/// identifier's 56-bit payload.
pub struct EdgeTable {
    pool: Arc<BufferPool>,
    file: FileId,
}

impl EdgeTable {
    pub fn open(pool: Arc<BufferPool>, file_name: &str) -> EngineResult<Self> {
        let file = pool.get_file_id(file_name)?;
        Ok(EdgeTable { pool, file })
    }

    fn locate(record_no: u64) -> (u64, usize) {
        let per_page = records_per_page() as u64;
        (record_no / per_page, (record_no % per_page) as usize * RECORD_BYTES)
    }

    /// Write the triple at `record_no`, growing the file with zero pages as
    /// needed.
    pub fn put(&self, record_no: u64, triple: (u64, u64, u64)) -> EngineResult<()> {
        let (page_number, offset) = Self::locate(record_no);
        while self.pool.count_pages(self.file)? <= page_number {
            self.pool.unpin(self.pool.append_page(self.file)?);
        }
        let handle = self.pool.get_page(self.file, page_number)?;
        self.pool.with_page_mut(handle, |bytes| {
            bytes[offset..offset + 8].copy_from_slice(&triple.0.to_le_bytes());
            bytes[offset + 8..offset + 16].copy_from_slice(&triple.1.to_le_bytes());
            bytes[offset + 16..offset + 24].copy_from_slice(&triple.2.to_le_bytes());
        });
        self.pool.unpin(handle);
        Ok(())
    }

    /// Read the triple at `record_no`. Callers only ever look up edge
    /// identifiers obtained from an index, so every `record_no` queried was
    /// written by a prior `put`; an unwritten (all-zero) slot is never a
    /// meaningful read.
    pub fn get(&self, record_no: u64) -> EngineResult<(u64, u64, u64)> {
        let (page_number, offset) = Self::locate(record_no);
        let handle = self.pool.get_page(self.file, page_number)?;
        let triple = self.pool.with_page(handle, |bytes| {
            let f = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
            let t = u64::from_le_bytes(bytes[offset + 8..offset + 16].try_into().unwrap());
            let y = u64::from_le_bytes(bytes[offset + 16..offset + 24].try_into().unwrap());
            (f, t, y)
        });
        self.pool.unpin(handle);
        Ok(triple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::config::EngineConfig;
    use crate::storage::file_manager::FileManager;

    fn fixture() -> (tempfile::TempDir, EdgeTable) {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let pool = Arc::new(BufferPool::new(fm, &EngineConfig::default()));
        let table = EdgeTable::open(pool, "edges.table").unwrap();
        (dir, table)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_d, table) = fixture();
        table.put(0, (1, 2, 3)).unwrap();
        table.put(500, (10, 20, 30)).unwrap();
        assert_eq!(table.get(0).unwrap(), (1, 2, 3));
        assert_eq!(table.get(500).unwrap(), (10, 20, 30));
    }

    #[test]
    fn sparse_high_record_grows_file() {
        let (_d, table) = fixture();
        table.put(10_000, (7, 8, 9)).unwrap();
        assert_eq!(table.get(10_000).unwrap(), (7, 8, 9));
        assert_eq!(table.get(0).unwrap(), (0, 0, 0));
    }

    #[test]
    fn overwrite_replaces_value() {
        let (_d, table) = fixture();
        table.put(5, (1, 1, 1)).unwrap();
        table.put(5, (2, 2, 2)).unwrap();
        assert_eq!(table.get(5).unwrap(), (2, 2, 2));
    }
}
