// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error type for shard operations.
//!
//! Every return code in the external interface is represented as a variant
//! here. `SUCCESS` has no variant: a successful operation returns `Ok(..)`,
//! the idiomatic counterpart of a C-style enum that reserves one value for
//! "no error".

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure modes a shard operation can report.
///
/// Capacity failures (`DataFull`, `HashFull`, `SearchFull`) are independent
/// axes: a shard can be full along one without being full along the others.
/// `NotFound` covers both genuine key absence and the documented spurious
/// race between GET and a concurrent PUT/DEL (see the crate-level docs).
#[derive(Debug, Error)]
pub enum ShardError {
    /// No live record for the requested key. May be a genuine absence, or a
    /// spurious result of a GET racing a concurrent PUT/DEL on the same key.
    #[error("key not found")]
    NotFound,

    /// The data region has no room left for this record.
    #[error("data region full")]
    DataFull,

    /// The hash table has no empty or dead slot reachable by probing.
    #[error("hash table full")]
    HashFull,

    /// The search index has no room left for another entry.
    #[error("search index full")]
    SearchFull,

    /// A flush (`sync`/`r#async`) failed. Carries the underlying OS error.
    #[error("flush failed: {0}")]
    SyncFailed(#[source] io::Error),

    /// The shard file could not be created, truncated, or mapped. No shard
    /// object exists when this is returned; any partially-created file at
    /// `path` has already been removed.
    #[error("failed to create shard at {path}: {source}")]
    DropFailed {
        /// Path of the shard file that could not be brought up.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        assert_eq!(ShardError::NotFound.to_string(), "key not found");
    }

    #[test]
    fn capacity_errors_display() {
        assert_eq!(ShardError::DataFull.to_string(), "data region full");
        assert_eq!(ShardError::HashFull.to_string(), "hash table full");
        assert_eq!(ShardError::SearchFull.to_string(), "search index full");
    }

    #[test]
    fn sync_failed_carries_source() {
        let io_err = io::Error::new(io::ErrorKind::Other, "disk full");
        let err = ShardError::SyncFailed(io_err);
        assert!(err.to_string().starts_with("flush failed"));
    }

    #[test]
    fn drop_failed_carries_path_and_source() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = ShardError::DropFailed {
            path: PathBuf::from("/tmp/shard-0"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/shard-0"));
        assert!(msg.contains("denied"));
    }
}
