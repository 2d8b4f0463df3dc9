// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! File mapping & layout (C1).
//!
//! A shard is one fixed-size file, partitioned into three regions:
//!
//! ```text
//! +----------------------+------------------------+----------------------------+
//! |   Hash table (HT)    |   Search index (SI)    |      Data region (D)       |
//! +----------------------+------------------------+----------------------------+
//! ```
//!
//! [`ShardLayout`] pins down the three file-format-binding constants of the
//! external interface (`HASH_TABLE_ENTRIES`, `SEARCH_INDEX_ENTRIES`,
//! `DATA_SIZE`) as a value instead of a build-time constant, so tests can
//! build tiny shards that exhaust capacity quickly. Production code should
//! use [`ShardLayout::default`] and keep it fixed for the lifetime of a
//! shard file: reopening a file created under a different layout is a
//! programmer error the caller must avoid, since the file carries no header
//! or magic number to cross-check against (see the crate's external
//! interface docs).

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::ptr::NonNull;

use memmap2::MmapMut;

use crate::error::ShardError;

/// Size in bytes of one hash table slot (a packed `(hash, offset)` pair).
pub const HASH_TABLE_ENTRY_SIZE: usize = 8;

/// Size in bytes of one search index slot (two packed 64-bit words).
pub const SEARCH_INDEX_ENTRY_SIZE: usize = 16;

/// The three file-format-binding constants of a shard, grouped into a value.
///
/// Two shards built from different `ShardLayout`s use different file sizes
/// and region boundaries; the layout that created a file must be supplied
/// again on every subsequent use of that file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardLayout {
    hash_table_entries: usize,
    search_index_entries: usize,
    data_size: usize,
}

impl ShardLayout {
    /// Builds a layout from explicit slot counts and data region size.
    ///
    /// Panics if `hash_table_entries` or `search_index_entries` is zero, or
    /// if the total file size would overflow `usize`.
    pub const fn new(hash_table_entries: usize, search_index_entries: usize, data_size: usize) -> Self {
        assert!(hash_table_entries > 0, "hash_table_entries must be nonzero");
        assert!(search_index_entries > 0, "search_index_entries must be nonzero");
        Self {
            hash_table_entries,
            search_index_entries,
            data_size,
        }
    }

    /// Number of hash table slots.
    pub const fn hash_table_entries(&self) -> usize {
        self.hash_table_entries
    }

    /// Number of search index slots.
    pub const fn search_index_entries(&self) -> usize {
        self.search_index_entries
    }

    /// Size in bytes of the data region `D`.
    pub const fn data_size(&self) -> usize {
        self.data_size
    }

    /// Size in bytes of the hash table region `HT`.
    pub const fn hash_table_bytes(&self) -> usize {
        self.hash_table_entries * HASH_TABLE_ENTRY_SIZE
    }

    /// Size in bytes of the search index region `SI`.
    pub const fn search_index_bytes(&self) -> usize {
        self.search_index_entries * SEARCH_INDEX_ENTRY_SIZE
    }

    /// Byte offset of `SI` from the start of the file.
    pub const fn search_index_offset(&self) -> usize {
        self.hash_table_bytes()
    }

    /// Byte offset of `D` from the start of the file.
    pub const fn data_offset(&self) -> usize {
        self.hash_table_bytes() + self.search_index_bytes()
    }

    /// Total file size: `HT_BYTES + SI_BYTES + DATA_SIZE`.
    pub const fn file_size(&self) -> usize {
        self.data_offset() + self.data_size
    }
}

impl Default for ShardLayout {
    /// Production-sized defaults: just over a million slots in each index,
    /// and a 512 MiB data region.
    fn default() -> Self {
        Self::new(1 << 20, 1 << 20, 512 * 1024 * 1024)
    }
}

/// The live memory mapping backing a shard, plus cached sub-region pointers.
///
/// Owns the `File` and the `MmapMut` for their lifetime. The cached base
/// pointers are derived once at construction and are valid as long as this
/// value is alive; the mapping is never moved or resized after creation
/// (shards do not support online resize).
pub(crate) struct ShardMapping {
    // Kept alive for its `Drop` impl (unmaps) and for `flush`/`flush_async`.
    mmap: MmapMut,
    _file: File,
    layout: ShardLayout,
    base: NonNull<u8>,
}

// SAFETY: `base` points into a private, process-local `MAP_SHARED` file
// mapping that this value owns exclusively. Concurrent access from multiple
// threads is sound because every sub-region accessor below only ever hands
// out either atomics (hash table, search index cursors/words) or byte
// ranges that are written at monotonically increasing offsets before being
// published through an atomic release store (data region, search index
// entries), matching the ordering contract documented on `Shard`.
unsafe impl Send for ShardMapping {}
unsafe impl Sync for ShardMapping {}

impl ShardMapping {
    /// Creates a fresh, zero-filled shard file at `dir/filename` and maps it.
    ///
    /// On any failure to create, truncate, or map the file, the file is
    /// removed so that no partially-constructed shard is ever observable.
    pub(crate) fn create(dir: &Path, filename: &str, layout: ShardLayout) -> Result<Self, ShardError> {
        let path = dir.join(filename);
        let result = Self::create_at(&path, layout);
        if result.is_err() {
            let _ = std::fs::remove_file(&path);
        }
        result
    }

    fn create_at(path: &Path, layout: ShardLayout) -> Result<Self, ShardError> {
        let to_err = |source: io::Error| ShardError::DropFailed {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(to_err)?;

        file.set_len(layout.file_size() as u64).map_err(to_err)?;

        // SAFETY: `file` is open for read+write and sized to `file_size()`.
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(to_err)?;

        let base = NonNull::new(mmap.as_mut_ptr()).expect("mmap base pointer is never null");

        tracing::debug!(path = %path.display(), file_size = layout.file_size(), "created shard");

        Ok(Self {
            mmap,
            _file: file,
            layout,
            base,
        })
    }

    pub(crate) fn layout(&self) -> ShardLayout {
        self.layout
    }

    /// Base pointer of the hash table region `HT`.
    pub(crate) fn hash_table_base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Base pointer of the search index region `SI`.
    pub(crate) fn search_index_base(&self) -> *mut u8 {
        // SAFETY: offset is within the mapping by construction (file_size
        // accounts for every region).
        unsafe { self.base.as_ptr().add(self.layout.search_index_offset()) }
    }

    /// Base pointer of the data region `D`.
    pub(crate) fn data_base(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.layout.data_offset()) }
    }

    /// Requests an asynchronous flush of the entire mapping.
    pub(crate) fn flush_async(&self) -> Result<(), ShardError> {
        self.mmap.flush_async().map_err(ShardError::SyncFailed)
    }

    /// Requests a synchronous flush of the entire mapping.
    pub(crate) fn flush(&self) -> Result<(), ShardError> {
        self.mmap.flush().map_err(ShardError::SyncFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_sizes() {
        let layout = ShardLayout::default();
        assert_eq!(layout.hash_table_entries(), 1 << 20);
        assert_eq!(layout.search_index_entries(), 1 << 20);
        assert_eq!(
            layout.file_size(),
            layout.hash_table_bytes() + layout.search_index_bytes() + layout.data_size()
        );
    }

    #[test]
    fn small_layout_region_offsets() {
        let layout = ShardLayout::new(4, 2, 100);
        assert_eq!(layout.hash_table_bytes(), 32);
        assert_eq!(layout.search_index_bytes(), 32);
        assert_eq!(layout.search_index_offset(), 32);
        assert_eq!(layout.data_offset(), 64);
        assert_eq!(layout.file_size(), 164);
    }

    #[test]
    fn create_zero_fills_and_sizes_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(8, 4, 256);
        let mapping = ShardMapping::create(dir.path(), "shard-0", layout).unwrap();

        let meta = std::fs::metadata(dir.path().join("shard-0")).unwrap();
        assert_eq!(meta.len(), layout.file_size() as u64);

        // SAFETY: reading within the mapped region for a test assertion.
        let data = unsafe { std::slice::from_raw_parts(mapping.hash_table_base(), layout.file_size()) };
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn create_failure_does_not_leave_a_file() {
        // A directory that doesn't exist can't contain a created file, and
        // the attempt must not leave anything behind.
        let missing_dir = Path::new("/nonexistent-shard-test-dir");
        let layout = ShardLayout::new(4, 2, 64);
        let result = ShardMapping::create(missing_dir, "shard-0", layout);
        assert!(result.is_err());
    }
}
