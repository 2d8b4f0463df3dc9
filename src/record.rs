// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record codec (C2).
//!
//! A data record at offset `o` in the data region:
//!
//! ```text
//! [0..8)  u64  version   (0 reserved for "no record" / tombstone)
//! [8..12) u32  key_size
//! [12..12+key_size)            key bytes
//! [...)   u32  value_count
//! then, value_count times:     u32 value_size | value_size bytes
//! ```
//!
//! All integers are little-endian. Every function here takes the data
//! region's base pointer and length explicitly rather than bundling them
//! into a type, since both the hash table probe (key comparison) and the
//! shard API (record read/write) need to borrow into the same region
//! independently.

use std::ptr;

/// Size of a tombstone record: version(8) + key_size(4) + value_count(4),
/// with no key bytes and no values.
pub(crate) const TOMBSTONE_SIZE: usize = 8 + 4 + 4;

#[inline]
unsafe fn read_u32(p: *const u8) -> u32 {
    let mut buf = [0u8; 4];
    ptr::copy_nonoverlapping(p, buf.as_mut_ptr(), 4);
    u32::from_le_bytes(buf)
}

#[inline]
unsafe fn write_u32(p: *mut u8, v: u32) {
    ptr::copy_nonoverlapping(v.to_le_bytes().as_ptr(), p, 4);
}

#[inline]
unsafe fn read_u64(p: *const u8) -> u64 {
    let mut buf = [0u8; 8];
    ptr::copy_nonoverlapping(p, buf.as_mut_ptr(), 8);
    u64::from_le_bytes(buf)
}

#[inline]
unsafe fn write_u64(p: *mut u8, v: u64) {
    ptr::copy_nonoverlapping(v.to_le_bytes().as_ptr(), p, 8);
}

/// Byte size a record with the given key and values will occupy.
pub(crate) fn record_size(key: &[u8], values: &[&[u8]]) -> usize {
    8 + 4 + key.len() + 4 + values.iter().map(|v| 4 + v.len()).sum::<usize>()
}

/// Writes a record at `offset`. A tombstone is written by passing an empty
/// key and no values (`version` is conventionally `0` in that case).
///
/// # Safety
/// `data_base` must point to a writable region of at least `data_size`
/// bytes, and `offset + record_size(key, values) <= data_size` must hold —
/// this is a caller-enforced precondition (checked by the shard's PUT path
/// before calling in), not re-validated here, because an out-of-bounds
/// write is memory corruption, not a recoverable error.
pub(crate) unsafe fn write_record(
    data_base: *mut u8,
    data_size: usize,
    offset: u64,
    version: u64,
    key: &[u8],
    values: &[&[u8]],
) {
    let size = record_size(key, values);
    assert!(
        (offset as usize).checked_add(size).is_some_and(|end| end <= data_size),
        "write_record out of bounds: offset={offset} size={size} data_size={data_size}"
    );

    let mut p = data_base.add(offset as usize);
    write_u64(p, version);
    p = p.add(8);
    write_u32(p, key.len() as u32);
    p = p.add(4);
    ptr::copy_nonoverlapping(key.as_ptr(), p, key.len());
    p = p.add(key.len());
    write_u32(p, values.len() as u32);
    p = p.add(4);
    for value in values {
        write_u32(p, value.len() as u32);
        p = p.add(4);
        ptr::copy_nonoverlapping(value.as_ptr(), p, value.len());
        p = p.add(value.len());
    }
}

/// Reads the version field of the record at `offset`.
///
/// # Safety
/// `offset + 8 <= data_size` must hold.
pub(crate) unsafe fn read_version(data_base: *const u8, offset: u64) -> u64 {
    read_u64(data_base.add(offset as usize))
}

/// Reads the key-size field of the record at `offset`.
///
/// # Safety
/// `offset + 12 <= data_size` must hold.
pub(crate) unsafe fn read_key_size(data_base: *const u8, offset: u64) -> u32 {
    read_u32(data_base.add(offset as usize + 8))
}

/// Reads and copies out the key bytes of the record at `offset`.
///
/// # Safety
/// `key_size` must be the value previously returned by [`read_key_size`] for
/// this `offset`, and `offset + 12 + key_size <= data_size` must hold.
pub(crate) unsafe fn read_key(data_base: *const u8, offset: u64, key_size: u32) -> Vec<u8> {
    let p = data_base.add(offset as usize + 12);
    std::slice::from_raw_parts(p, key_size as usize).to_vec()
}

/// Reads and copies out the values of the record at `offset`.
///
/// # Safety
/// `key_size` must be the value previously returned by [`read_key_size`] for
/// this `offset`, and the full record (as sized by [`record_size`] applied
/// to the decoded key and values) must lie within `data_size`.
pub(crate) unsafe fn read_values(data_base: *const u8, offset: u64, key_size: u32) -> Vec<Vec<u8>> {
    let mut p = data_base.add(offset as usize + 12 + key_size as usize);
    let value_count = read_u32(p);
    p = p.add(4);

    let mut values = Vec::with_capacity(value_count as usize);
    for _ in 0..value_count {
        let value_size = read_u32(p);
        p = p.add(4);
        values.push(std::slice::from_raw_parts(p, value_size as usize).to_vec());
        p = p.add(value_size as usize);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc_region(size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    #[test]
    fn record_size_matches_layout() {
        let key = b"alpha";
        let values: [&[u8]; 2] = [b"A", b"BB"];
        // 8 + 4 + 5 + 4 + (4 + 1) + (4 + 2)
        assert_eq!(record_size(key, &values), 8 + 4 + 5 + 4 + 5 + 6);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut region = alloc_region(256);
        let base = region.as_mut_ptr();
        let key = b"alpha";
        let values: [&[u8]; 2] = [b"A", b"BB"];

        unsafe {
            write_record(base, region.len(), 0, 7, key, &values);

            assert_eq!(read_version(base, 0), 7);
            let key_size = read_key_size(base, 0);
            assert_eq!(key_size, 5);
            assert_eq!(read_key(base, 0, key_size), key);
            assert_eq!(
                read_values(base, 0, key_size),
                vec![b"A".to_vec(), b"BB".to_vec()]
            );
        }
    }

    #[test]
    fn tombstone_round_trips_as_empty_record() {
        let mut region = alloc_region(64);
        let base = region.as_mut_ptr();

        unsafe {
            write_record(base, region.len(), 0, 0, &[], &[]);
            assert_eq!(read_version(base, 0), 0);
            let key_size = read_key_size(base, 0);
            assert_eq!(key_size, 0);
            assert_eq!(read_key(base, 0, key_size), Vec::<u8>::new());
            assert_eq!(read_values(base, 0, key_size), Vec::<Vec<u8>>::new());
        }
        assert_eq!(record_size(&[], &[]), TOMBSTONE_SIZE);
    }

    #[test]
    fn multiple_records_pack_back_to_back() {
        let mut region = alloc_region(256);
        let base = region.as_mut_ptr();

        unsafe {
            write_record(base, region.len(), 0, 1, b"a", &[b"1"]);
            let size_a = record_size(b"a", &[b"1"]);
            write_record(base, region.len(), size_a as u64, 2, b"bb", &[b"22"]);

            assert_eq!(read_version(base, 0), 1);
            assert_eq!(read_version(base, size_a as u64), 2);
            let key_size_b = read_key_size(base, size_a as u64);
            assert_eq!(read_key(base, size_a as u64, key_size_b), b"bb");
        }
    }

    #[test]
    fn zero_value_record() {
        let mut region = alloc_region(64);
        let base = region.as_mut_ptr();
        unsafe {
            write_record(base, region.len(), 0, 5, b"k", &[]);
            let key_size = read_key_size(base, 0);
            assert_eq!(read_values(base, 0, key_size), Vec::<Vec<u8>>::new());
        }
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn write_record_out_of_bounds_panics() {
        let mut region = alloc_region(8);
        let base = region.as_mut_ptr();
        unsafe {
            write_record(base, region.len(), 0, 1, b"too long for region", &[]);
        }
    }
}
