// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The `Coordinate` collaborator contract used by `copy_to`.
//!
//! The coordinate/region-mapping subsystem itself is out of scope for this
//! crate; a shard only ever consumes it as an opaque predicate over a live
//! record's routing-relevant fields.

/// A pure predicate deciding whether a record belongs on the destination
/// side of a `copy_to`.
pub trait Coordinate {
    /// Returns `true` if the record with the given hashes, key, and values
    /// should be copied.
    fn contains(&self, primary_hash: u32, secondary_hash: u32, key: &[u8], values: &[Vec<u8>]) -> bool;
}

/// A `Coordinate` that accepts every record, turning `copy_to` into a pure
/// compaction pass (copy every live record, dropping only tombstoned space).
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Coordinate for AcceptAll {
    fn contains(&self, _primary_hash: u32, _secondary_hash: u32, _key: &[u8], _values: &[Vec<u8>]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_all_always_true() {
        let c = AcceptAll;
        assert!(c.contains(0, 0, b"", &[]));
        assert!(c.contains(42, 7, b"key", &[b"v".to_vec()]));
    }
}
