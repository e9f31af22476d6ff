//! Physical datum-key layout.
//!
//! ```text
//! metadata key = 0x00 ∥ keyspace_name                → u32_be(keyspace id)
//! datum key    = 0x01 ∥ u32_be(ks_id)
//!                     ∥ self_delimited(table)
//!                     ∥ self_delimited(key)
//!                     ∥ self_delimited(column)
//!                     ∥ u64_be(u64::MAX − timestamp_μs)
//! ```
//!
//! The metadata tag sorts below every datum; `u32::MAX` is a reserved
//! keyspace id whose prefix is the end-of-database sentinel above every
//! real datum. Timestamps are stored complemented so newer versions of a
//! column sort first.

use crate::codec::{decode_self_delimited_into, encode_self_delimited, Fragment};
use crate::error::{FragmentKind, StrataError};
use smallvec::SmallVec;

pub const META_SPACE_TAG: u8 = 0x00;
pub const DATUM_SPACE_TAG: u8 = 0x01;

/// Reserved keyspace id forming the end-of-database sentinel.
pub const SENTINEL_KEYSPACE_ID: u32 = u32::MAX;

/// First id handed out by keyspace registration.
pub const FIRST_KEYSPACE_ID: u32 = 1;

/// Encoded datum keys usually fit inline.
pub type DatumKeyBuf = SmallVec<[u8; 64]>;

pub fn keyspace_meta_key(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + name.len());
    out.push(META_SPACE_TAG);
    out.extend_from_slice(name.as_bytes());
    out
}

pub fn keyspace_meta_prefix() -> Vec<u8> {
    vec![META_SPACE_TAG]
}

/// Sentinel key lexicographically above every datum key.
pub fn end_of_db_key() -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(DATUM_SPACE_TAG);
    out.extend_from_slice(&SENTINEL_KEYSPACE_ID.to_be_bytes());
    out
}

pub fn keyspace_prefix(out: &mut DatumKeyBuf, ks_id: u32) {
    out.clear();
    out.push(DATUM_SPACE_TAG);
    out.extend_from_slice(&ks_id.to_be_bytes());
}

pub fn table_prefix(out: &mut DatumKeyBuf, ks_id: u32, table: &[u8]) {
    keyspace_prefix(out, ks_id);
    let mut scratch = Vec::with_capacity(table.len() + 2);
    encode_self_delimited(&mut scratch, table);
    out.extend_from_slice(&scratch);
}

pub fn key_prefix(out: &mut DatumKeyBuf, ks_id: u32, table: &[u8], key: &[u8]) {
    table_prefix(out, ks_id, table);
    let mut scratch = Vec::with_capacity(key.len() + 2);
    encode_self_delimited(&mut scratch, key);
    out.extend_from_slice(&scratch);
}

/// Prefix covering every stored version of one column.
pub fn column_prefix(out: &mut DatumKeyBuf, ks_id: u32, table: &[u8], key: &[u8], column: &[u8]) {
    key_prefix(out, ks_id, table, key);
    let mut scratch = Vec::with_capacity(column.len() + 2);
    encode_self_delimited(&mut scratch, column);
    out.extend_from_slice(&scratch);
}

pub fn encode_datum_key(
    out: &mut DatumKeyBuf,
    ks_id: u32,
    table: &[u8],
    key: &[u8],
    column: &[u8],
    timestamp_micros: i64,
) -> Result<(), StrataError> {
    column_prefix(out, ks_id, table, key, column);
    out.extend_from_slice(&encode_timestamp(timestamp_micros)?);
    Ok(())
}

pub fn encode_timestamp(timestamp_micros: i64) -> Result<[u8; 8], StrataError> {
    if timestamp_micros < 0 {
        return Err(StrataError::UnsatisfiedConstraint(format!(
            "datum timestamp must be non-negative, got {timestamp_micros}"
        )));
    }
    Ok((u64::MAX - timestamp_micros as u64).to_be_bytes())
}

pub fn decode_timestamp(raw: [u8; 8]) -> i64 {
    (u64::MAX - u64::from_be_bytes(raw)) as i64
}

/// Decoded components of a datum key. The buffers are reused across
/// datums by the scan loop; callers copy what they keep.
#[derive(Debug, Default)]
pub struct DatumKeyScratch {
    pub ks_id: u32,
    pub table: Vec<u8>,
    pub key: Vec<u8>,
    pub column: Vec<u8>,
    pub timestamp_micros: i64,
}

pub fn decode_datum_key_into(
    bytes: &[u8],
    scratch: &mut DatumKeyScratch,
) -> Result<(), StrataError> {
    let mut frag = Fragment::new(bytes);
    if frag.take_u8(FragmentKind::DatumKey)? != DATUM_SPACE_TAG {
        return Err(StrataError::BadEncoding(FragmentKind::DatumKey));
    }
    let raw_id = frag.take(4, FragmentKind::DatumKey)?;
    scratch.ks_id = u32::from_be_bytes(raw_id.try_into().expect("4 bytes"));
    decode_self_delimited_into(&mut frag, &mut scratch.table)?;
    decode_self_delimited_into(&mut frag, &mut scratch.key)?;
    decode_self_delimited_into(&mut frag, &mut scratch.column)?;
    let raw_ts = frag.take(8, FragmentKind::DatumKey)?;
    scratch.timestamp_micros = decode_timestamp(raw_ts.try_into().expect("8 bytes"));
    if !frag.is_empty() {
        return Err(StrataError::BadEncoding(FragmentKind::DatumKey));
    }
    Ok(())
}

/// Smallest key lexicographically greater than every key sharing
/// `prefix`. `None` when the prefix is all 0xFF.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    for i in (0..next.len()).rev() {
        if next[i] != 0xFF {
            next[i] += 1;
            next.truncate(i + 1);
            return Some(next);
        }
    }
    None
}

/// Smallest key above every datum in `(ks_id, table)`; seeking here skips
/// the remainder of the table.
pub fn table_successor(ks_id: u32, table: &[u8]) -> Vec<u8> {
    let mut prefix = DatumKeyBuf::new();
    table_prefix(&mut prefix, ks_id, table);
    // The table component ends with its 0x00 0x00 terminator, so the
    // prefix always has a non-0xFF tail byte.
    prefix_successor(&prefix).unwrap_or_else(end_of_db_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datum(ks: u32, table: &[u8], key: &[u8], col: &[u8], ts: i64) -> Vec<u8> {
        let mut out = DatumKeyBuf::new();
        encode_datum_key(&mut out, ks, table, key, col, ts).expect("encode");
        out.to_vec()
    }

    #[test]
    fn datum_keys_order_by_tuple_then_newest_first() {
        let a = datum(1, b"t", b"alice", b"age", 10);
        let b = datum(1, b"t", b"alice", b"age", 20);
        let c = datum(1, b"t", b"alice", b"name", 10);
        let d = datum(1, b"t", b"bob", b"age", 10);
        let e = datum(1, b"u", b"alice", b"age", 10);
        let f = datum(2, b"t", b"alice", b"age", 10);
        // Newer timestamp sorts first within a column.
        assert!(b < a);
        assert!(a < c);
        assert!(c < d);
        assert!(d < e);
        assert!(e < f);
    }

    #[test]
    fn decode_reverses_encode() {
        let bytes = datum(7, b"tab\x00le", b"k\x00", b"col", 123_456);
        let mut scratch = DatumKeyScratch::default();
        decode_datum_key_into(&bytes, &mut scratch).expect("decode");
        assert_eq!(scratch.ks_id, 7);
        assert_eq!(scratch.table, b"tab\x00le");
        assert_eq!(scratch.key, b"k\x00");
        assert_eq!(scratch.column, b"col");
        assert_eq!(scratch.timestamp_micros, 123_456);
    }

    #[test]
    fn metadata_sorts_below_data_and_sentinel_above() {
        let meta = keyspace_meta_key("zzz");
        let low = datum(1, b"", b"", b"", i64::MAX);
        let high = datum(u32::MAX - 1, b"\xff\xff", b"\xff", b"\xff", 0);
        let sentinel = end_of_db_key();
        assert!(meta < low);
        assert!(low < high);
        assert!(high < sentinel);
    }

    #[test]
    fn table_successor_is_tight() {
        let succ = table_successor(3, b"t");
        // Above every datum of table "t"...
        assert!(succ > datum(3, b"t", b"\xff\xff\xff", b"\xff", 0));
        // ...and not above the next table, including tables that extend
        // the name with a low byte or a NUL.
        assert!(succ < datum(3, b"t\x00", b"", b"", i64::MAX));
        assert!(succ < datum(3, b"t\x01", b"", b"", i64::MAX));
        assert!(succ < datum(3, b"u", b"", b"", i64::MAX));
    }

    #[test]
    fn prefix_successor_carries_over_ff() {
        assert_eq!(prefix_successor(&[0x10, 0xAA, 0x00]), Some(vec![0x10, 0xAA, 0x01]));
        assert_eq!(prefix_successor(&[0x10, 0xFF, 0xFF]), Some(vec![0x11]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn negative_timestamp_is_rejected() {
        let mut out = DatumKeyBuf::new();
        let err = encode_datum_key(&mut out, 1, b"t", b"k", b"c", -1).expect_err("negative");
        assert_eq!(
            err.code(),
            crate::error::StrataErrorCode::UnsatisfiedConstraint
        );
    }
}
