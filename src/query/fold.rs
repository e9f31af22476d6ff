//! The scan primitive shared by every slice, count and dump operation.
//!
//! `fold_over_data` walks the encoded datums of one `(keyspace, table)`
//! window in key order, decoding each datum key into a scratch owned by
//! the scanner. The callback borrows the decoded buffers for the duration
//! of one datum and threads an accumulator through the fold.

use crate::error::StrataError;
use crate::storage::datum_key::{
    decode_datum_key_into, key_prefix, prefix_successor, table_prefix, table_successor,
    DatumKeyBuf, DatumKeyScratch,
};
use crate::txn::Transaction;

/// One decoded datum, valid for the duration of the callback invocation.
#[derive(Debug)]
pub(crate) struct DatumCell<'a> {
    pub key: &'a [u8],
    pub column: &'a [u8],
    pub timestamp_micros: i64,
    pub value: &'a [u8],
}

/// Callback control: `Continue` advances one datum, `SkipKey` seeks past
/// the rest of the current key's columns, `Finish` ends the fold.
pub(crate) enum FoldStep<A> {
    Continue(A),
    SkipKey(A),
    Finish(A),
}

pub(crate) fn fold_over_data<A>(
    tx: &Transaction<'_>,
    table: &[u8],
    first_key: Option<&[u8]>,
    up_to_key: Option<&[u8]>,
    first_column: Option<&[u8]>,
    init: A,
    f: &mut dyn FnMut(A, &DatumCell<'_>) -> Result<FoldStep<A>, StrataError>,
) -> Result<A, StrataError> {
    let ks_id = tx.keyspace_id();

    let mut start = DatumKeyBuf::new();
    match first_key {
        Some(key) => {
            key_prefix(&mut start, ks_id, table, key);
            if let Some(column) = first_column {
                let mut scratch = Vec::with_capacity(column.len() + 2);
                crate::codec::encode_self_delimited(&mut scratch, column);
                // Drop the terminator so the seek position covers the
                // column itself and everything after it.
                scratch.truncate(scratch.len() - 2);
                start.extend_from_slice(&scratch);
            }
        }
        None => table_prefix(&mut start, ks_id, table),
    }

    let end: Vec<u8> = match up_to_key {
        Some(key) => {
            let mut bound = DatumKeyBuf::new();
            key_prefix(&mut bound, ks_id, table, key);
            bound.to_vec()
        }
        None => table_successor(ks_id, table),
    };

    let mut acc = Some(init);
    let mut scratch = DatumKeyScratch::default();

    tx.with_iterator(|iter| {
        iter.seek(&start);
        while iter.valid() && iter.key() < end.as_slice() {
            decode_datum_key_into(iter.key(), &mut scratch)?;
            let step = {
                let cell = DatumCell {
                    key: &scratch.key,
                    column: &scratch.column,
                    timestamp_micros: scratch.timestamp_micros,
                    value: iter.value(),
                };
                f(acc.take().expect("accumulator threaded"), &cell)?
            };
            match step {
                FoldStep::Continue(next) => {
                    acc = Some(next);
                    iter.next();
                }
                FoldStep::SkipKey(next) => {
                    acc = Some(next);
                    let mut prefix = DatumKeyBuf::new();
                    key_prefix(&mut prefix, ks_id, table, &scratch.key);
                    match prefix_successor(&prefix) {
                        Some(pos) => iter.seek(&pos),
                        None => break,
                    }
                }
                FoldStep::Finish(next) => {
                    acc = Some(next);
                    break;
                }
            }
        }
        Ok(())
    })?;

    Ok(acc.expect("accumulator threaded"))
}
