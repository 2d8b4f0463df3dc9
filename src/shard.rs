// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shard API & snapshot (C5).
//!
//! Orchestrates GET/PUT/DEL/sync/snapshot/copy_to over the C1–C4 components.
//! A `Shard` takes no internal lock: the lock discipline table in the
//! crate-level docs is a contract the caller upholds, not something this
//! type enforces. The only internal synchronization is the per-step
//! acquire/release ordering on the cursors and hash-table slots that gives
//! lock-free readers the "see both or see old" guarantee across a PUT's
//! write sequence.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::coordinate::Coordinate;
use crate::error::ShardError;
use crate::hash_table::{HashTable, Probe};
use crate::layout::{ShardLayout, ShardMapping};
use crate::record;
use crate::search_index::SearchIndex;

/// A memory-mapped, append-only key-value shard.
///
/// Always held behind an `Arc` once created, since [`Snapshot`]s share
/// ownership of the mapping with the shard that produced them rather than
/// holding a back-pointer (see the crate-level design notes).
pub struct Shard {
    mapping: ShardMapping,
    data_offset: AtomicU64,
    search_offset: AtomicU64,
}

impl Shard {
    /// Creates a fresh, zero-filled shard file at `dir/filename` with the
    /// given layout and returns an owned, shared handle to it.
    pub fn create(dir: &Path, filename: &str, layout: ShardLayout) -> Result<Arc<Shard>, ShardError> {
        let mapping = ShardMapping::create(dir, filename, layout)?;
        Ok(Arc::new(Shard {
            mapping,
            data_offset: AtomicU64::new(0),
            search_offset: AtomicU64::new(0),
        }))
    }

    fn hash_table(&self) -> HashTable<'_> {
        HashTable::new(self.mapping.hash_table_base(), self.mapping.layout().hash_table_entries())
    }

    fn search_index(&self) -> SearchIndex<'_> {
        SearchIndex::new(self.mapping.search_index_base(), self.mapping.layout().search_index_entries())
    }

    /// Point lookup. Requires the caller to hold at least a shared lock.
    ///
    /// May return `NotFound` even for a key that in fact exists, if this
    /// call races a concurrent `put`/`del` on the same key — see the
    /// concurrency documentation on `put`. Callers that need that
    /// distinction retry at a higher layer; this crate does not.
    pub fn get(&self, primary_hash: u32, key: &[u8]) -> Result<(Vec<Vec<u8>>, u64), ShardError> {
        let data_base = self.mapping.data_base();
        match self.hash_table().find(primary_hash, key, data_base) {
            Probe::Matched { offset, .. } => {
                // SAFETY: a matched slot's offset always references a
                // fully-written record, by the ordering contract on `put`.
                let version = unsafe { record::read_version(data_base, offset as u64) };
                let key_size = unsafe { record::read_key_size(data_base, offset as u64) };
                let values = unsafe { record::read_values(data_base, offset as u64, key_size) };
                Ok((values, version))
            }
            Probe::Insertable { .. } | Probe::Full => Err(ShardError::NotFound),
        }
    }

    /// Inserts or updates `key`. Requires the caller to hold an exclusive
    /// lock.
    ///
    /// Ordering is significant for reader safety: the record is written
    /// before the search-index entry is appended, the search-index entry is
    /// appended before any old entry it supersedes is invalidated, and that
    /// invalidation happens before the hash-table slot is installed — so a
    /// concurrent reader finds the old record or the new one, never neither.
    pub fn put(
        &self,
        primary_hash: u32,
        secondary_hash: u32,
        key: &[u8],
        values: &[&[u8]],
        version: u64,
    ) -> Result<(), ShardError> {
        let layout = self.mapping.layout();
        let size = record::record_size(key, values);

        // Step 1: data capacity.
        let data_offset = self.data_offset.load(Ordering::Relaxed);
        if data_offset as usize + size > layout.data_size() {
            tracing::warn!(primary_hash, size, "put failed: data region full");
            return Err(ShardError::DataFull);
        }

        // Step 2: search index capacity.
        let search_offset = self.search_offset.load(Ordering::Relaxed);
        if search_offset as usize == layout.search_index_entries() {
            tracing::warn!(primary_hash, "put failed: search index full");
            return Err(ShardError::SearchFull);
        }

        // Step 3: resolving probe.
        let data_base = self.mapping.data_base();
        let probe = self.hash_table().find(primary_hash, key, data_base);
        let slot = match probe {
            Probe::Full => {
                tracing::warn!(primary_hash, "put failed: hash table full");
                return Err(ShardError::HashFull);
            }
            Probe::Insertable { slot } => slot,
            Probe::Matched { slot, .. } => slot,
        };

        // Step 4: write the record, then advance the data cursor.
        let new_offset = data_offset;
        // SAFETY: step 1 established new_offset + size <= data_size.
        unsafe {
            record::write_record(self.mapping.data_base(), layout.data_size(), new_offset, version, key, values);
        }
        self.data_offset.store(data_offset + size as u64, Ordering::Release);

        // Step 5: append the search index entry, then advance its cursor.
        self.search_index()
            .append(search_offset as usize, primary_hash, secondary_hash, new_offset as u32);
        self.search_offset.store(search_offset + 1, Ordering::Release);

        // Step 6: invalidate the superseded entry, if any, now that the new
        // one is durably appended.
        if let Probe::Matched { offset: old_offset, .. } = probe {
            self.search_index()
                .invalidate((search_offset + 1) as usize, old_offset, new_offset as u32);
        }

        // Step 7: publish the new slot last.
        self.hash_table().install(slot, primary_hash, new_offset as u32);

        tracing::trace!(primary_hash, offset = new_offset, "put record");
        Ok(())
    }

    /// Deletes `key`. Requires the caller to hold an exclusive lock.
    ///
    /// A tombstone (a minimal, zero-value record) is written into the data
    /// region so that `invalidation_offset` can reference a real, decodable
    /// offset rather than a magic sentinel.
    pub fn del(&self, primary_hash: u32, key: &[u8]) -> Result<(), ShardError> {
        let layout = self.mapping.layout();
        let data_base = self.mapping.data_base();

        let (slot, old_offset) = match self.hash_table().find(primary_hash, key, data_base) {
            Probe::Matched { slot, offset } => (slot, offset),
            Probe::Insertable { .. } | Probe::Full => return Err(ShardError::NotFound),
        };

        let data_offset = self.data_offset.load(Ordering::Relaxed);
        if data_offset as usize + record::TOMBSTONE_SIZE > layout.data_size() {
            tracing::warn!(primary_hash, "del failed: data region full for tombstone");
            return Err(ShardError::DataFull);
        }

        let tombstone_offset = data_offset;
        // SAFETY: checked above that the tombstone fits.
        unsafe {
            record::write_record(self.mapping.data_base(), layout.data_size(), tombstone_offset, 0, &[], &[]);
        }
        self.data_offset
            .store(data_offset + record::TOMBSTONE_SIZE as u64, Ordering::Release);

        let search_offset = self.search_offset.load(Ordering::Acquire) as usize;
        self.search_index().invalidate(search_offset, old_offset, tombstone_offset as u32);

        self.hash_table().mark_dead(slot);

        tracing::trace!(primary_hash, "deleted record");
        Ok(())
    }

    /// Percentage of the data region consumed by the write cursor so far.
    /// Safe to call without a lock: a single acquire load of the cursor is
    /// sufficient and stale reads are permitted.
    pub fn used_space(&self) -> u64 {
        let layout = self.mapping.layout();
        let data_offset = self.data_offset.load(Ordering::Acquire);
        100 * data_offset / layout.data_size() as u64
    }

    /// Percentage of the data region occupied by records whose
    /// search-index entry has a non-zero `invalidation_offset`.
    pub fn stale_space(&self) -> u64 {
        let layout = self.mapping.layout();
        let data_base = self.mapping.data_base();
        let search_index = self.search_index();
        let search_offset = self.search_offset.load(Ordering::Acquire) as usize;

        let mut stale_bytes: u64 = 0;
        for i in 0..search_offset {
            let entry = search_index.entry_at(i);
            if entry.invalidation_offset != 0 {
                // SAFETY: data_offset references a record written by a past
                // successful put/del/copy_to.
                let key_size = unsafe { record::read_key_size(data_base, entry.data_offset as u64) };
                let key = unsafe { record::read_key(data_base, entry.data_offset as u64, key_size) };
                let values = unsafe { record::read_values(data_base, entry.data_offset as u64, key_size) };
                let value_refs: Vec<&[u8]> = values.iter().map(|v| v.as_slice()).collect();
                stale_bytes += record::record_size(&key, &value_refs) as u64;
            }
        }

        100 * stale_bytes / layout.data_size() as u64
    }

    /// Requests an asynchronous flush of the entire mapping. No lock
    /// required.
    pub fn r#async(&self) -> Result<(), ShardError> {
        self.mapping.flush_async()
    }

    /// Requests a synchronous flush of the entire mapping. No lock
    /// required.
    pub fn sync(&self) -> Result<(), ShardError> {
        self.mapping.flush()
    }

    /// Captures a stable view of the shard for iteration or compaction.
    /// Requires the caller to hold a shared lock mutually exclusive with
    /// concurrent `put`/`del`.
    pub fn make_snapshot(self: &Arc<Self>) -> Snapshot {
        Snapshot {
            shard: Arc::clone(self),
            data_offset: self.data_offset.load(Ordering::Acquire),
            search_offset: self.search_offset.load(Ordering::Acquire),
        }
    }

    /// Copies every live-as-of-now record satisfying `coordinate` into
    /// `dst`. Requires the caller to hold a shared lock on `self` and an
    /// exclusive lock on `dst`. `dst` must be a fresh shard: no dead slots
    /// and enough capacity, with no key collisions against `self`'s live
    /// set (the unresolving probe's precondition).
    pub fn copy_to<C: Coordinate>(self: &Arc<Self>, coordinate: &C, dst: &Shard) -> Result<(), ShardError> {
        let snapshot = self.make_snapshot();
        let dst_layout = dst.mapping.layout();

        for entry in snapshot.iter() {
            if !coordinate.contains(entry.primary_hash, entry.secondary_hash, &entry.key, &entry.values) {
                continue;
            }

            let value_refs: Vec<&[u8]> = entry.values.iter().map(|v| v.as_slice()).collect();
            let size = record::record_size(&entry.key, &value_refs);

            let data_offset = dst.data_offset.load(Ordering::Relaxed);
            if data_offset as usize + size > dst_layout.data_size() {
                return Err(ShardError::DataFull);
            }
            let search_offset = dst.search_offset.load(Ordering::Relaxed);
            if search_offset as usize == dst_layout.search_index_entries() {
                return Err(ShardError::SearchFull);
            }
            let slot = dst
                .hash_table()
                .find_empty(entry.primary_hash)
                .ok_or(ShardError::HashFull)?;

            // SAFETY: checked above that the record fits in dst's data region.
            unsafe {
                record::write_record(
                    dst.mapping.data_base(),
                    dst_layout.data_size(),
                    data_offset,
                    entry.version,
                    &entry.key,
                    &value_refs,
                );
            }
            dst.data_offset.store(data_offset + size as u64, Ordering::Release);
            dst.search_index()
                .append(search_offset as usize, entry.primary_hash, entry.secondary_hash, data_offset as u32);
            dst.search_offset.store(search_offset + 1, Ordering::Release);
            dst.hash_table().install(slot, entry.primary_hash, data_offset as u32);
        }

        Ok(())
    }
}

/// A stable, point-in-time view over a shard's search index, for iteration
/// (`copy_to`) or for external consumers.
///
/// Holds a strong reference to the shard it was taken from, so the shard's
/// mapping stays alive for at least as long as the snapshot, independent of
/// how many other references are dropped in the meantime.
pub struct Snapshot {
    shard: Arc<Shard>,
    data_offset: u64,
    search_offset: u64,
}

impl Snapshot {
    /// Iterates the entries that were live as of this snapshot.
    pub fn iter(&self) -> SnapshotIter<'_> {
        SnapshotIter { snapshot: self, index: 0 }
    }
}

/// One entry yielded by [`Snapshot::iter`].
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub primary_hash: u32,
    pub secondary_hash: u32,
    pub data_offset: u32,
    pub invalidation_offset: u32,
    pub version: u64,
    pub key: Vec<u8>,
    pub values: Vec<Vec<u8>>,
}

/// Iterator over a [`Snapshot`]'s live-as-of-capture entries.
pub struct SnapshotIter<'a> {
    snapshot: &'a Snapshot,
    index: usize,
}

impl<'a> Iterator for SnapshotIter<'a> {
    type Item = SnapshotEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let search_index = self.snapshot.shard.search_index();
        let data_base = self.snapshot.shard.mapping.data_base();

        while self.index < self.snapshot.search_offset as usize {
            let i = self.index;
            self.index += 1;

            let entry = search_index.entry_at(i);
            let live = entry.invalidation_offset == 0 || entry.invalidation_offset as u64 >= self.snapshot.data_offset;
            if !live {
                continue;
            }

            // SAFETY: every entry below search_offset references a record
            // that was fully written before this snapshot was captured.
            unsafe {
                let version = record::read_version(data_base, entry.data_offset as u64);
                let key_size = record::read_key_size(data_base, entry.data_offset as u64);
                let key = record::read_key(data_base, entry.data_offset as u64, key_size);
                let values = record::read_values(data_base, entry.data_offset as u64, key_size);

                return Some(SnapshotEntry {
                    primary_hash: entry.primary_hash,
                    secondary_hash: entry.secondary_hash,
                    data_offset: entry.data_offset,
                    invalidation_offset: entry.invalidation_offset,
                    version,
                    key,
                    values,
                });
            }
        }

        None
    }
}
