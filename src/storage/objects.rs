//! Long-string interning: an append-only byte-addressed object file plus an
//! extendible hash from `murmur3(bytes)` to object-file offset.
//!
//! Short strings (≤7 bytes) never reach this module; they are packed
//! inline by [`crate::ids`]. Everything longer is appended here once and
//! referred to everywhere else by its offset, wrapped in a
//! `StringExtern`/`IriExtern` [`crate::ids::ObjectId`].

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::config::PAGE_SIZE;
use crate::storage::file_manager::FileId;

/// 32-bit MurmurHash3 (x86), the variant spec.md names for the directory
/// hash. Implemented locally rather than pulling in a hashing crate: the
/// algorithm is small, fixed, and its exact bit pattern matters (it is
/// part of this module's on-disk contract), so vendoring a crate for it
/// would buy nothing a dependency wouldn't also need to pin precisely.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;
    let mut hash = seed;
    let chunks = data.chunks_exact(4);
    let remainder = chunks.remainder();
    for chunk in chunks {
        let mut k = u32::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        hash ^= k;
        hash = hash.rotate_left(13);
        hash = hash.wrapping_mul(5).wrapping_add(0xe6546b64);
    }
    let mut k = 0u32;
    for (i, &b) in remainder.iter().enumerate() {
        k |= (b as u32) << (i * 8);
    }
    if !remainder.is_empty() {
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        hash ^= k;
    }
    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85ebca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2ae35);
    hash ^= hash >> 16;
    hash
}

/// Append-only byte-addressed file of length-prefixed records.
pub struct ObjectFile {
    file: Mutex<std::fs::File>,
    len: Mutex<u64>,
}

impl ObjectFile {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| EngineError::io(&path, e))?;
        let len = file.metadata().map_err(|e| EngineError::io(&path, e))?.len();
        Ok(ObjectFile { file: Mutex::new(file), len: Mutex::new(len) })
    }

    /// Append `bytes` (prefixed by a `u32` length) and return its offset.
    pub fn append(&self, bytes: &[u8]) -> EngineResult<u64> {
        let mut file = self.file.lock();
        let mut len = self.len.lock();
        let offset = *len;
        file.seek(SeekFrom::Start(offset)).map_err(|e| EngineError::io("object file", e))?;
        file.write_all(&(bytes.len() as u32).to_le_bytes())
            .map_err(|e| EngineError::io("object file", e))?;
        file.write_all(bytes).map_err(|e| EngineError::io("object file", e))?;
        *len = offset + 4 + bytes.len() as u64;
        Ok(offset)
    }

    pub fn read(&self, offset: u64) -> EngineResult<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset)).map_err(|e| EngineError::io("object file", e))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf).map_err(|e| EngineError::io("object file", e))?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(|e| EngineError::io("object file", e))?;
        Ok(buf)
    }
}

const BUCKET_HEADER: usize = 8; // local_depth: u32, entry_count: u32
const BUCKET_ENTRY_SIZE: usize = 16; // hash: u64, offset: u64
const BUCKET_CAPACITY: usize = (PAGE_SIZE - BUCKET_HEADER) / BUCKET_ENTRY_SIZE;
const DIR_ENTRY_SIZE: usize = 8; // bucket page number: u64

/// `intern(bytes, insert?) -> id`: the not-found sentinel offset
/// (`u64::MAX`) when `insert?` is false and the string is absent.
pub struct ExtendibleHash {
    pool: Arc<BufferPool>,
    dir_file: FileId,
    bucket_file: FileId,
    objects: Arc<ObjectFile>,
    global_depth: Mutex<u32>,
}

pub const NOT_FOUND_OFFSET: u64 = u64::MAX;

impl ExtendibleHash {
    pub fn open(pool: Arc<BufferPool>, objects: Arc<ObjectFile>, dir_name: &str, bucket_name: &str) -> EngineResult<Self> {
        let dir_file = pool.get_file_id(dir_name)?;
        let bucket_file = pool.get_file_id(bucket_name)?;
        let hash = ExtendibleHash { pool, dir_file, bucket_file, objects, global_depth: Mutex::new(0) };
        hash.load_or_init()?;
        Ok(hash)
    }

    fn load_or_init(&self) -> EngineResult<()> {
        let pages = self.pool.count_pages(self.dir_file)?;
        if pages == 0 {
            // Fresh database: one directory slot pointing at one empty bucket.
            let handle = self.pool.append_page(self.dir_file)?;
            self.pool.with_page_mut(handle, |b| b[0..4].copy_from_slice(&0u32.to_le_bytes()));
            self.pool.unpin(handle);
            let bucket_handle = self.pool.append_page(self.bucket_file)?;
            self.pool.with_page_mut(bucket_handle, |b| {
                b[0..4].copy_from_slice(&0u32.to_le_bytes());
                b[4..8].copy_from_slice(&0u32.to_le_bytes());
            });
            self.pool.unpin(bucket_handle);
            self.write_dir_entry(0, 0)?;
            *self.global_depth.lock() = 0;
        } else {
            let handle = self.pool.get_page(self.dir_file, 0)?;
            let depth = self.pool.with_page(handle, |b| u32::from_le_bytes(b[0..4].try_into().unwrap()));
            self.pool.unpin(handle);
            *self.global_depth.lock() = depth;
        }
        Ok(())
    }

    fn dir_len(&self) -> u64 {
        1u64 << *self.global_depth.lock()
    }

    fn dir_entry_location(index: u64) -> (u64, usize) {
        let byte_offset = index * DIR_ENTRY_SIZE as u64;
        let page = 1 + byte_offset / PAGE_SIZE as u64;
        let in_page = (byte_offset % PAGE_SIZE as u64) as usize;
        (page, in_page)
    }

    fn read_dir_entry(&self, index: u64) -> EngineResult<u64> {
        let (page, in_page) = Self::dir_entry_location(index);
        let handle = self.pool.get_page(self.dir_file, page)?;
        let v = self
            .pool
            .with_page(handle, |b| u64::from_le_bytes(b[in_page..in_page + 8].try_into().unwrap()));
        self.pool.unpin(handle);
        Ok(v)
    }

    fn write_dir_entry(&self, index: u64, bucket_page: u64) -> EngineResult<()> {
        let (page, in_page) = Self::dir_entry_location(index);
        while self.pool.count_pages(self.dir_file)? <= page {
            let h = self.pool.append_page(self.dir_file)?;
            self.pool.unpin(h);
        }
        let handle = self.pool.get_page(self.dir_file, page)?;
        self.pool
            .with_page_mut(handle, |b| b[in_page..in_page + 8].copy_from_slice(&bucket_page.to_le_bytes()));
        self.pool.unpin(handle);
        Ok(())
    }

    fn persist_global_depth(&self) -> EngineResult<()> {
        let handle = self.pool.get_page(self.dir_file, 0)?;
        let depth = *self.global_depth.lock();
        self.pool.with_page_mut(handle, |b| b[0..4].copy_from_slice(&depth.to_le_bytes()));
        self.pool.unpin(handle);
        Ok(())
    }

    fn read_bucket(&self, page: u64) -> EngineResult<(u32, Vec<(u64, u64)>)> {
        let handle = self.pool.get_page(self.bucket_file, page)?;
        let (local_depth, entries) = self.pool.with_page(handle, |b| {
            let local_depth = u32::from_le_bytes(b[0..4].try_into().unwrap());
            let count = u32::from_le_bytes(b[4..8].try_into().unwrap()) as usize;
            let mut entries = Vec::with_capacity(count);
            for i in 0..count {
                let base = BUCKET_HEADER + i * BUCKET_ENTRY_SIZE;
                let hash = u64::from_le_bytes(b[base..base + 8].try_into().unwrap());
                let offset = u64::from_le_bytes(b[base + 8..base + 16].try_into().unwrap());
                entries.push((hash, offset));
            }
            (local_depth, entries)
        });
        self.pool.unpin(handle);
        Ok((local_depth, entries))
    }

    fn write_bucket(&self, page: u64, local_depth: u32, entries: &[(u64, u64)]) -> EngineResult<()> {
        assert!(entries.len() <= BUCKET_CAPACITY);
        let handle = self.pool.get_page(self.bucket_file, page)?;
        self.pool.with_page_mut(handle, |b| {
            b.fill(0);
            b[0..4].copy_from_slice(&local_depth.to_le_bytes());
            b[4..8].copy_from_slice(&(entries.len() as u32).to_le_bytes());
            for (i, (hash, offset)) in entries.iter().enumerate() {
                let base = BUCKET_HEADER + i * BUCKET_ENTRY_SIZE;
                b[base..base + 8].copy_from_slice(&hash.to_le_bytes());
                b[base + 8..base + 16].copy_from_slice(&offset.to_le_bytes());
            }
        });
        self.pool.unpin(handle);
        Ok(())
    }

    fn bucket_index(&self, hash: u32) -> u64 {
        let depth = *self.global_depth.lock();
        if depth == 0 { 0 } else { (hash as u64) & ((1u64 << depth) - 1) }
    }

    /// `intern(bytes, insert) -> offset`. Returns `NOT_FOUND_OFFSET` when
    /// `insert` is false and `bytes` is absent.
    pub fn intern(&self, bytes: &[u8], insert: bool) -> EngineResult<u64> {
        let hash = murmur3_32(bytes, 0) as u64;
        if let Some(offset) = self.lookup(hash, bytes)? {
            return Ok(offset);
        }
        if !insert {
            return Ok(NOT_FOUND_OFFSET);
        }
        let offset = self.objects.append(bytes)?;
        self.insert_entry(hash, offset)?;
        Ok(offset)
    }

    fn lookup(&self, hash: u64, bytes: &[u8]) -> EngineResult<Option<u64>> {
        let index = self.bucket_index(hash as u32);
        let bucket_page = self.read_dir_entry(index)?;
        let (_, entries) = self.read_bucket(bucket_page)?;
        for (h, offset) in entries {
            if h == hash {
                let stored = self.objects.read(offset)?;
                if stored == bytes {
                    return Ok(Some(offset));
                }
            }
        }
        Ok(None)
    }

    fn insert_entry(&self, hash: u64, offset: u64) -> EngineResult<()> {
        loop {
            let index = self.bucket_index(hash as u32);
            let bucket_page = self.read_dir_entry(index)?;
            let (local_depth, mut entries) = self.read_bucket(bucket_page)?;
            if entries.len() < BUCKET_CAPACITY {
                entries.push((hash, offset));
                self.write_bucket(bucket_page, local_depth, &entries)?;
                return Ok(());
            }
            self.split_bucket(index, bucket_page, local_depth, entries)?;
            // retry: directory/bucket layout changed, recompute and insert again
        }
    }

    fn split_bucket(&self, index: u64, bucket_page: u64, local_depth: u32, entries: Vec<(u64, u64)>) -> EngineResult<()> {
        let global_depth = *self.global_depth.lock();
        if local_depth == global_depth {
            self.double_directory()?;
        }
        let new_local_depth = local_depth + 1;
        let new_bit = 1u64 << local_depth;
        let low_bits_mask = new_bit - 1;
        let this_group_key = index & low_bits_mask;

        let new_bucket_handle = self.pool.append_page(self.bucket_file)?;
        let new_bucket_page = {
            // page number is the append-order index within the bucket file
            self.pool.count_pages(self.bucket_file)? - 1
        };
        self.pool.unpin(new_bucket_handle);

        let mut old_entries = Vec::new();
        let mut new_entries = Vec::new();
        for (h, off) in entries {
            if (h & new_bit) == 0 {
                old_entries.push((h, off));
            } else {
                new_entries.push((h, off));
            }
        }
        self.write_bucket(bucket_page, new_local_depth, &old_entries)?;
        self.write_bucket(new_bucket_page, new_local_depth, &new_entries)?;

        let depth = *self.global_depth.lock();
        let span = 1u64 << depth;
        let mut i = this_group_key;
        while i < span {
            if (i & new_bit) != 0 {
                self.write_dir_entry(i, new_bucket_page)?;
            } else {
                self.write_dir_entry(i, bucket_page)?;
            }
            i += low_bits_mask + 1;
        }
        let _ = index;
        Ok(())
    }

    fn double_directory(&self) -> EngineResult<()> {
        let old_depth = *self.global_depth.lock();
        let old_len = 1u64 << old_depth;
        let mut pointers = Vec::with_capacity(old_len as usize);
        for i in 0..old_len {
            pointers.push(self.read_dir_entry(i)?);
        }
        *self.global_depth.lock() = old_depth + 1;
        self.persist_global_depth()?;
        for (i, bucket_page) in pointers.iter().enumerate() {
            self.write_dir_entry(i as u64, *bucket_page)?;
            self.write_dir_entry(old_len + i as u64, *bucket_page)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer_pool::BufferPool;
    use crate::storage::config::EngineConfig;
    use crate::storage::file_manager::FileManager;

    fn hash_fixture() -> (tempfile::TempDir, ExtendibleHash) {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let pool = Arc::new(BufferPool::new(fm, &EngineConfig::default()));
        let objects = Arc::new(ObjectFile::open(dir.path().join("objects.dat")).unwrap());
        let hash = ExtendibleHash::open(pool, objects, "hash_id.dir", "hash_id.buckets").unwrap();
        (dir, hash)
    }

    #[test]
    fn intern_round_trips_and_dedupes() {
        let (_d, hash) = hash_fixture();
        let off1 = hash.intern(b"hello-world-string", true).unwrap();
        let off2 = hash.intern(b"hello-world-string", true).unwrap();
        assert_eq!(off1, off2);
        let off3 = hash.intern(b"another-string-value", true).unwrap();
        assert_ne!(off1, off3);
    }

    #[test]
    fn missing_without_insert_is_not_found() {
        let (_d, hash) = hash_fixture();
        let off = hash.intern(b"never-inserted", false).unwrap();
        assert_eq!(off, NOT_FOUND_OFFSET);
    }

    #[test]
    fn directory_grows_under_load() {
        let (_d, hash) = hash_fixture();
        for i in 0..2000 {
            let s = format!("long-enough-string-value-{i}");
            hash.intern(s.as_bytes(), true).unwrap();
        }
        for i in 0..2000 {
            let s = format!("long-enough-string-value-{i}");
            let off = hash.intern(s.as_bytes(), false).unwrap();
            assert_ne!(off, NOT_FOUND_OFFSET, "missing {s}");
        }
    }
}
