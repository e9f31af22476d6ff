//! Cursor-resumable dump and batched load.
//!
//! A dump streams the committed state of one keyspace as self-delimited
//! records, at most one chunk per call. The cursor returned with a
//! non-final chunk is an opaque string; presenting it resumes the dump at
//! the exact datum where the previous chunk stopped.

use crate::codec::{decode_self_delimited, encode_self_delimited, Fragment};
use crate::error::{FragmentKind, StrataError};
use crate::query::fold::{fold_over_data, FoldStep};
use crate::txn::{Bytes, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

const RECORD_TABLE: u8 = 0x01;
const RECORD_DATUM: u8 = 0x02;

/// Resume position: tables not yet finished (the first entry is the table
/// in progress) and the next datum to emit within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpCursor {
    remaining_tables: Vec<Bytes>,
    key: Bytes,
    column: Bytes,
}

/// One dump chunk; `cursor` is present unless this is the final chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpChunk {
    pub data: Vec<u8>,
    pub cursor: Option<String>,
}

/// Produces the next chunk of a dump. Pass `None` to start, then the
/// cursor of the previous chunk until it comes back `None`.
pub fn dump_chunk(
    tx: &Transaction<'_>,
    cursor: Option<&str>,
) -> Result<DumpChunk, StrataError> {
    let chunk_budget = tx.ks.config().dump_chunk_bytes;
    let mut state = match cursor {
        Some(encoded) => decode_cursor(encoded)?,
        None => DumpCursor {
            remaining_tables: tx.list_tables()?,
            key: Vec::new(),
            column: Vec::new(),
        },
    };

    let mut data = Vec::with_capacity(chunk_budget.min(1 << 20));
    let mut emitted_in_chunk = 0usize;
    while let Some(table) = state.remaining_tables.first().cloned() {
        append_table_record(&mut data, &table);
        let first_key = (!state.key.is_empty()).then_some(state.key.as_slice());
        let first_column = (!state.column.is_empty()).then_some(state.column.as_slice());

        let mut resume: Option<(Bytes, Bytes)> = None;
        let mut last_col: Option<(Bytes, Bytes)> = None;
        fold_over_data(
            tx,
            &table,
            first_key,
            None,
            first_column,
            (),
            &mut |(), cell| {
                // Only the newest version of each column is dumped.
                if last_col.as_ref().is_some_and(|(k, c)| {
                    k.as_slice() == cell.key && c.as_slice() == cell.column
                }) {
                    return Ok(FoldStep::Continue(()));
                }
                // A chunk always carries at least one record so the
                // resume cursor strictly advances.
                if emitted_in_chunk > 0 && data.len() >= chunk_budget {
                    resume = Some((cell.key.to_vec(), cell.column.to_vec()));
                    return Ok(FoldStep::Finish(()));
                }
                last_col = Some((cell.key.to_vec(), cell.column.to_vec()));
                append_datum_record(
                    &mut data,
                    cell.key,
                    cell.column,
                    cell.timestamp_micros,
                    cell.value,
                );
                emitted_in_chunk += 1;
                Ok(FoldStep::Continue(()))
            },
        )?;

        match resume {
            Some((key, column)) => {
                state.key = key;
                state.column = column;
                let cursor = encode_cursor(&state)?;
                debug!(bytes = data.len(), "dump chunk emitted with resume cursor");
                return Ok(DumpChunk {
                    data,
                    cursor: Some(cursor),
                });
            }
            None => {
                state.remaining_tables.remove(0);
                state.key.clear();
                state.column.clear();
                if data.len() >= chunk_budget && !state.remaining_tables.is_empty() {
                    let cursor = encode_cursor(&state)?;
                    return Ok(DumpChunk {
                        data,
                        cursor: Some(cursor),
                    });
                }
            }
        }
    }
    debug!(bytes = data.len(), "final dump chunk emitted");
    Ok(DumpChunk { data, cursor: None })
}

/// Collects a complete dump by looping chunks. Test and tooling helper;
/// production consumers stream chunk by chunk.
pub fn dump_all(tx: &Transaction<'_>) -> Result<Vec<u8>, StrataError> {
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let chunk = dump_chunk(tx, cursor.as_deref())?;
        out.extend_from_slice(&chunk.data);
        match chunk.cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(out),
        }
    }
}

/// Applies one dump chunk to the transaction. Records land in the
/// transaction's pending batch, not its overlays, preserving the embedded
/// timestamps; they become visible at commit. Returns the datum count.
pub fn load_chunk(tx: &mut Transaction<'_>, chunk: &[u8]) -> Result<u64, StrataError> {
    let mut frag = Fragment::new(chunk);
    let mut table: Option<Bytes> = None;
    let mut loaded = 0u64;
    while !frag.is_empty() {
        match frag.take_u8(FragmentKind::DumpRecord)? {
            RECORD_TABLE => {
                table = Some(decode_self_delimited(&mut frag)?);
            }
            RECORD_DATUM => {
                let Some(table) = table.as_ref() else {
                    return Err(StrataError::BadEncoding(FragmentKind::DumpRecord));
                };
                let key = decode_self_delimited(&mut frag)?;
                let column = decode_self_delimited(&mut frag)?;
                let ts_raw = frag.take(8, FragmentKind::DumpRecord)?;
                let timestamp = i64::from_be_bytes(ts_raw.try_into().expect("8 bytes"));
                let len_raw = frag.take(4, FragmentKind::DumpRecord)?;
                let len = u32::from_be_bytes(len_raw.try_into().expect("4 bytes")) as usize;
                let value = frag.take(len, FragmentKind::DumpRecord)?;
                tx.stage_raw_datum(table, &key, &column, timestamp, value)?;
                loaded += 1;
            }
            _ => return Err(StrataError::BadEncoding(FragmentKind::DumpRecord)),
        }
    }
    Ok(loaded)
}

fn append_table_record(out: &mut Vec<u8>, table: &[u8]) {
    out.push(RECORD_TABLE);
    encode_self_delimited(out, table);
}

fn append_datum_record(out: &mut Vec<u8>, key: &[u8], column: &[u8], ts: i64, value: &[u8]) {
    out.push(RECORD_DATUM);
    encode_self_delimited(out, key);
    encode_self_delimited(out, column);
    out.extend_from_slice(&ts.to_be_bytes());
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
}

fn encode_cursor(cursor: &DumpCursor) -> Result<String, StrataError> {
    let bytes = rmp_serde::to_vec(cursor)
        .map_err(|e| StrataError::UnsatisfiedConstraint(format!("cursor encode: {e}")))?;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    Ok(out)
}

fn decode_cursor(encoded: &str) -> Result<DumpCursor, StrataError> {
    if encoded.len() % 2 != 0 {
        return Err(StrataError::BadEncoding(FragmentKind::DumpRecord));
    }
    let mut bytes = Vec::with_capacity(encoded.len() / 2);
    for pair in encoded.as_bytes().chunks_exact(2) {
        let hex = std::str::from_utf8(pair)
            .map_err(|_| StrataError::BadEncoding(FragmentKind::DumpRecord))?;
        let b = u8::from_str_radix(hex, 16)
            .map_err(|_| StrataError::BadEncoding(FragmentKind::DumpRecord))?;
        bytes.push(b);
    }
    rmp_serde::from_slice(&bytes)
        .map_err(|_| StrataError::BadEncoding(FragmentKind::DumpRecord))
}
