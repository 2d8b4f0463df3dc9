// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A memory-mapped, append-only key-value shard: the on-disk storage unit
//! of a distributed key-value store.
//!
//! A shard is one fixed-size file, partitioned into a hash table region, a
//! search index region, and a data region. It supports point lookup
//! (`get`), insertion/update (`put`), deletion (`del`), durability
//! (`sync`/`r#async`), consistent snapshots for iteration, and cleaning
//! (`copy_to`).
//!
//! # Out of scope
//!
//! Multi-shard routing, compaction scheduling, and NOTFOUND-retry patching
//! belong to an enclosing disk layer this crate doesn't implement. The
//! coordinate/region-mapping subsystem is consumed as an opaque
//! [`Coordinate`] predicate; the hash functions are consumed as
//! already-computed `u32` inputs (`primary_hash`/`secondary_hash`).
//!
//! # Concurrency
//!
//! A [`Shard`] takes no internal lock. Callers must uphold the lock
//! discipline documented on each method: shared for `get`, exclusive for
//! `put`/`del`, shared-and-mutually-exclusive-with-writes for
//! `make_snapshot`, none for `sync`/`r#async`/`used_space`/`stale_space`.
//! `get` concurrent with a `put`/`del` on the same key may spuriously
//! return `NotFound`; this is a documented consistency weakening that
//! permits lock-free reads, not a bug — retry belongs to the caller.

mod coordinate;
mod error;
mod hash_table;
mod layout;
mod record;
mod search_index;
mod shard;

pub use coordinate::{AcceptAll, Coordinate};
pub use error::ShardError;
pub use layout::ShardLayout;
pub use shard::{Shard, Snapshot, SnapshotEntry, SnapshotIter};
