//! Tunables for the storage substrate. Carried as an explicit struct rather
//! than compile-time constants so a host application can size the buffer
//! pool to its workload; `Default` reproduces the canonical values spec.md
//! names.

/// Fixed page size used by every paged file. 4096 is canonical; it must
/// stay a power of two since B+ tree node capacity math assumes it.
pub const PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of page slots in the shared buffer pool.
    pub buffer_pool_size: usize,
    /// Below this combined byte size, hash join builds a secondary
    /// in-memory hash for a bucket instead of falling back to nested-loop.
    pub hash_join_small_hash_bytes: usize,
    /// Number of buckets a hash join partitions its build side into,
    /// fixed at a constant derived from `PAGE_SIZE` (open question in
    /// spec §9: not tuned to the smaller input's estimated size).
    pub hash_join_bucket_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            // Matches `original_source`'s `BufferManager::DEFAULT_BUFFER_POOL_SIZE`.
            buffer_pool_size: 1024,
            hash_join_small_hash_bytes: PAGE_SIZE * 4,
            hash_join_bucket_count: 256,
        }
    }
}
