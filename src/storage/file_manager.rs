//! Maps logical file identifiers to backing files on disk. Every other
//! storage component works with a [`FileId`] plus a page number; only the
//! file manager (and the buffer pool it is mounted under) ever opens a raw
//! `std::fs::File`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::storage::config::PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

pub struct FileManager {
    db_folder: PathBuf,
    paths: Vec<PathBuf>,
    handles: Vec<Option<File>>,
    by_name: HashMap<String, FileId>,
}

impl FileManager {
    pub fn new(db_folder: impl Into<PathBuf>) -> EngineResult<Self> {
        let db_folder = db_folder.into();
        std::fs::create_dir_all(&db_folder).map_err(|e| EngineError::io(&db_folder, e))?;
        Ok(FileManager {
            db_folder,
            paths: Vec::new(),
            handles: Vec::new(),
            by_name: HashMap::new(),
        })
    }

    /// Get (creating on first use) the [`FileId`] for a logical file name,
    /// e.g. `"edges.table"` or `"from_to_type_edge.dir"`.
    pub fn get_file_id(&mut self, name: &str) -> EngineResult<FileId> {
        if let Some(id) = self.by_name.get(name) {
            return Ok(*id);
        }
        let path = self.db_folder.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| EngineError::io(&path, e))?;
        let id = FileId(self.paths.len() as u32);
        self.paths.push(path);
        self.handles.push(Some(file));
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn path(&self, file_id: FileId) -> &Path {
        &self.paths[file_id.0 as usize]
    }

    fn handle(&mut self, file_id: FileId) -> EngineResult<&mut File> {
        let idx = file_id.0 as usize;
        if self.handles[idx].is_none() {
            let path = &self.paths[idx];
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| EngineError::io(path, e))?;
            self.handles[idx] = Some(file);
        }
        Ok(self.handles[idx].as_mut().unwrap())
    }

    /// Number of whole pages currently on disk for `file_id`.
    pub fn count_pages(&mut self, file_id: FileId) -> EngineResult<u64> {
        let path = self.paths[file_id.0 as usize].clone();
        let handle = self.handle(file_id)?;
        let len = handle.metadata().map_err(|e| EngineError::io(&path, e))?.len();
        Ok(len / PAGE_SIZE as u64)
    }

    pub fn read_page(&mut self, file_id: FileId, page_number: u64, out: &mut [u8; PAGE_SIZE]) -> EngineResult<()> {
        let path = self.paths[file_id.0 as usize].clone();
        let handle = self.handle(file_id)?;
        handle
            .seek(SeekFrom::Start(page_number * PAGE_SIZE as u64))
            .map_err(|e| EngineError::io(&path, e))?;
        match handle.read_exact(out) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Reading past the end of a sparse/just-extended file:
                // treat as a zero page rather than an I/O failure.
                out.fill(0);
                Ok(())
            }
            Err(e) => Err(EngineError::io(&path, e)),
        }
    }

    pub fn write_page(&mut self, file_id: FileId, page_number: u64, bytes: &[u8; PAGE_SIZE]) -> EngineResult<()> {
        let path = self.paths[file_id.0 as usize].clone();
        let handle = self.handle(file_id)?;
        handle
            .seek(SeekFrom::Start(page_number * PAGE_SIZE as u64))
            .map_err(|e| EngineError::io(&path, e))?;
        handle.write_all(bytes).map_err(|e| EngineError::io(&path, e))?;
        Ok(())
    }

    /// Allocate the next sequential page (grows the file length by one
    /// page, zero-initialized) and return its page number.
    pub fn append_page(&mut self, file_id: FileId) -> EngineResult<u64> {
        let page_number = self.count_pages(file_id)?;
        let zeros = [0u8; PAGE_SIZE];
        self.write_page(file_id, page_number, &zeros)?;
        Ok(page_number)
    }

    /// Evict and delete the backing file; all pages for this `file_id` in
    /// the buffer pool must already be dropped by the caller.
    pub fn remove(&mut self, file_id: FileId) -> EngineResult<()> {
        let idx = file_id.0 as usize;
        self.handles[idx] = None;
        let path = self.paths[idx].clone();
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| EngineError::io(&path, e))?;
        }
        Ok(())
    }
}
