//! Range, slice and count operations on a transaction: a streaming store
//! scan merged with the transaction's in-memory overlays.

use crate::error::StrataError;
use crate::query::fold::{fold_over_data, DatumCell, FoldStep};
use crate::query::plan::{key_in_range, ColumnPredicate, ColumnRange, KeyRange};
use crate::storage::datum_key::{
    column_prefix, decode_timestamp, keyspace_prefix, prefix_successor, table_prefix,
    table_successor, DatumKeyBuf, DatumKeyScratch,
};
use crate::txn::{Bytes, Column, Timestamp, Transaction};
use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};

/// One key of a slice result: selected columns in the requested order and
/// the last column name for column-level pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlice {
    pub key: Bytes,
    pub last_column: Bytes,
    pub columns: Vec<Column>,
}

/// Slice result: the last scanned key for pagination plus the per-key
/// column data.
pub type Slice = (Option<Bytes>, Vec<KeySlice>);

/// Per-table statistics derived from the store's size estimate and a
/// distinct-key count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub approximate_bytes: u64,
    pub key_count: u64,
}

struct RangeScan<'p> {
    predicate: &'p ColumnPredicate,
    reverse: bool,
    max_keys: usize,
    max_columns: usize,
    slack: usize,
    slices: Vec<KeySlice>,
    cur_key: Option<Bytes>,
    cur_cols: Vec<Column>,
    seen_for_key: usize,
    last_col: Option<Bytes>,
    /// Overlay-only keys still waiting to be spliced into the stream.
    pending_overlay: VecDeque<Bytes>,
    done: bool,
}

impl Transaction<'_> {
    /// Returns up to `max_keys` keys from the range, each carrying up to
    /// `max_columns` selected columns in ascending name order (descending
    /// when the column range is reversed). Uncommitted writes of this
    /// transaction shadow the store.
    pub fn get_slice(
        &self,
        table: &[u8],
        key_range: KeyRange,
        column_range: ColumnRange,
        max_keys: usize,
        max_columns: usize,
    ) -> Result<Slice, StrataError> {
        let (predicate, reverse) = ColumnPredicate::compile(&column_range);
        match key_range {
            KeyRange::Keys(keys) => {
                self.slice_keys(table, keys, &predicate, reverse, max_keys, max_columns)
            }
            KeyRange::Range { first, up_to } => self.slice_range(
                table,
                first.as_deref(),
                up_to.as_deref(),
                &predicate,
                reverse,
                max_keys,
                max_columns,
            ),
        }
    }

    /// Projection of `get_slice` over a fixed column list: one
    /// `Option<value>` per requested column, per key.
    pub fn get_slice_values(
        &self,
        table: &[u8],
        key_range: KeyRange,
        columns: Vec<Bytes>,
        max_keys: usize,
    ) -> Result<(Option<Bytes>, Vec<(Bytes, Vec<Option<Bytes>>)>), StrataError> {
        let (last_key, slices) = self.get_slice(
            table,
            key_range,
            ColumnRange::Columns(columns.clone()),
            max_keys,
            columns.len().max(1),
        )?;
        let rows = slices
            .into_iter()
            .map(|slice| {
                let values = columns
                    .iter()
                    .map(|wanted| {
                        slice
                            .columns
                            .iter()
                            .find(|c| &c.name == wanted)
                            .map(|c| c.value.clone())
                    })
                    .collect();
                (slice.key, values)
            })
            .collect();
        Ok((last_key, rows))
    }

    /// Counts distinct keys in the range without materialising columns.
    pub fn count_keys(&self, table: &[u8], key_range: KeyRange) -> Result<u64, StrataError> {
        match key_range {
            KeyRange::Keys(keys) => {
                let unique: BTreeSet<Bytes> = keys.into_iter().collect();
                let mut count = 0u64;
                for key in unique {
                    if self.exists_key(table, &key)? {
                        count += 1;
                    }
                }
                Ok(count)
            }
            KeyRange::Range { first, up_to } => {
                let mut overlay: BTreeSet<Bytes> = self
                    .overlays
                    .added_keys
                    .get(table)
                    .map(|keys| {
                        keys.iter()
                            .filter(|k| key_in_range(k, first.as_deref(), up_to.as_deref()))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                let count = fold_over_data(
                    self,
                    table,
                    first.as_deref(),
                    up_to.as_deref(),
                    None,
                    0u64,
                    &mut |acc, cell| {
                        if self.is_key_deleted(table, cell.key) {
                            return Ok(FoldStep::SkipKey(acc));
                        }
                        overlay.remove(cell.key);
                        Ok(FoldStep::SkipKey(acc + 1))
                    },
                )?;
                Ok(count + overlay.len() as u64)
            }
        }
    }

    /// Selected columns of one key, ascending by name.
    pub fn get_columns(
        &self,
        table: &[u8],
        key: &[u8],
        max_columns: usize,
        column_range: ColumnRange,
    ) -> Result<Vec<Column>, StrataError> {
        let (_, mut slices) = self.get_slice(
            table,
            KeyRange::Keys(vec![key.to_vec()]),
            column_range,
            1,
            max_columns,
        )?;
        Ok(slices.pop().map(|s| s.columns).unwrap_or_default())
    }

    /// Newest visible version of one column.
    pub fn get_column(
        &self,
        table: &[u8],
        key: &[u8],
        column: &[u8],
    ) -> Result<Option<Column>, StrataError> {
        if self.is_key_deleted(table, key) || self.is_column_deleted(table, key, column) {
            return Ok(None);
        }
        if let Some(write) = self.added_columns(table, key).and_then(|cols| cols.get(column)) {
            return Ok(Some(Column {
                name: column.to_vec(),
                value: write.value.clone(),
                timestamp: write.timestamp,
            }));
        }
        let mut prefix = DatumKeyBuf::new();
        column_prefix(&mut prefix, self.keyspace_id(), table, key, column);
        self.with_iterator(|iter| {
            iter.seek(&prefix);
            if !iter.valid() || !iter.key().starts_with(&prefix) {
                return Ok(None);
            }
            let raw = iter.key();
            if raw.len() != prefix.len() + 8 {
                return Err(StrataError::BadEncoding(
                    crate::error::FragmentKind::DatumKey,
                ));
            }
            let ts = decode_timestamp(raw[prefix.len()..].try_into().expect("8 bytes"));
            Ok(Some(Column {
                name: column.to_vec(),
                value: iter.value().to_vec(),
                timestamp: Timestamp::At(ts),
            }))
        })
    }

    /// Values for an explicit column list; `None` per missing column.
    pub fn get_column_values(
        &self,
        table: &[u8],
        key: &[u8],
        columns: &[Bytes],
    ) -> Result<Vec<Option<Bytes>>, StrataError> {
        columns
            .iter()
            .map(|col| Ok(self.get_column(table, key, col)?.map(|c| c.value)))
            .collect()
    }

    /// True when the key has at least one live column visible to this
    /// transaction.
    pub fn exists_key(&self, table: &[u8], key: &[u8]) -> Result<bool, StrataError> {
        if self.is_key_deleted(table, key) {
            return Ok(false);
        }
        if self
            .added_columns(table, key)
            .is_some_and(|cols| !cols.is_empty())
        {
            return Ok(true);
        }
        let mut next_key = key.to_vec();
        next_key.push(0x00);
        fold_over_data(
            self,
            table,
            Some(key),
            Some(&next_key),
            None,
            false,
            &mut |found, cell| {
                if self.is_column_deleted(table, cell.key, cell.column) {
                    return Ok(FoldStep::Continue(found));
                }
                Ok(FoldStep::Finish(true))
            },
        )
    }

    /// Tables of this keyspace in ascending byte order, discovered by
    /// seeking to each table's successor in turn.
    pub fn list_tables(&self) -> Result<Vec<Bytes>, StrataError> {
        let ks_id = self.keyspace_id();
        let mut prefix = DatumKeyBuf::new();
        keyspace_prefix(&mut prefix, ks_id);
        let end = prefix_successor(&prefix)
            .unwrap_or_else(crate::storage::datum_key::end_of_db_key);
        let mut tables = Vec::new();
        let mut scratch = DatumKeyScratch::default();
        self.with_iterator(|iter| {
            let mut pos = prefix.to_vec();
            loop {
                iter.seek(&pos);
                if !iter.valid() || iter.key() >= end.as_slice() {
                    break;
                }
                crate::storage::datum_key::decode_datum_key_into(iter.key(), &mut scratch)?;
                tables.push(scratch.table.clone());
                pos = table_successor(ks_id, &scratch.table);
            }
            Ok(())
        })?;
        Ok(tables)
    }

    /// Approximate stored size plus distinct key count for one table.
    pub fn table_stats(&self, table: &[u8]) -> Result<TableStats, StrataError> {
        let ks_id = self.keyspace_id();
        let mut first = DatumKeyBuf::new();
        table_prefix(&mut first, ks_id, table);
        let up_to = table_successor(ks_id, table);
        let approximate_bytes = self.ks.store().approximate_size(&first, &up_to)?;
        let key_count = self.count_keys(table, KeyRange::all())?;
        Ok(TableStats {
            approximate_bytes,
            key_count,
        })
    }

    // ----- internals -----

    fn slice_keys(
        &self,
        table: &[u8],
        keys: Vec<Bytes>,
        predicate: &ColumnPredicate,
        reverse: bool,
        max_keys: usize,
        max_columns: usize,
    ) -> Result<Slice, StrataError> {
        let unique: BTreeSet<Bytes> = keys
            .into_iter()
            .filter(|key| !self.is_key_deleted(table, key))
            .collect();
        let mut slices = Vec::new();
        for key in unique {
            if slices.len() >= max_keys {
                break;
            }
            let store_cols =
                self.collect_key_columns(table, &key, predicate, reverse, max_columns)?;
            let merged = self.merge_with_overlay(
                table,
                &key,
                store_cols,
                predicate,
                reverse,
                max_columns,
            );
            if let Some(slice) = build_slice(key, merged) {
                slices.push(slice);
            }
        }
        Ok((slices.last().map(|s| s.key.clone()), slices))
    }

    /// Columns of one key from the store view only: newest version per
    /// column, tombstones and overlay-shadowed columns removed, selected
    /// by the predicate. Forward scans stop at `max_columns`; reversed
    /// scans keep everything so the tail survives.
    fn collect_key_columns(
        &self,
        table: &[u8],
        key: &[u8],
        predicate: &ColumnPredicate,
        reverse: bool,
        max_columns: usize,
    ) -> Result<Vec<Column>, StrataError> {
        let mut next_key = key.to_vec();
        next_key.push(0x00);
        let mut last_col: Option<Bytes> = None;
        fold_over_data(
            self,
            table,
            Some(key),
            Some(&next_key),
            None,
            Vec::new(),
            &mut |mut cols: Vec<Column>, cell: &DatumCell<'_>| {
                if last_col.as_deref() == Some(cell.column) {
                    return Ok(FoldStep::Continue(cols));
                }
                last_col = Some(cell.column.to_vec());
                if self.is_column_deleted(table, cell.key, cell.column)
                    || self.shadowed_by_overlay(table, cell.key, cell.column)
                    || !predicate.matches(cell.column)
                {
                    if !reverse && predicate.past_last_match(cell.column) {
                        return Ok(FoldStep::Finish(cols));
                    }
                    return Ok(FoldStep::Continue(cols));
                }
                cols.push(Column {
                    name: cell.column.to_vec(),
                    value: cell.value.to_vec(),
                    timestamp: Timestamp::At(cell.timestamp_micros),
                });
                if !reverse && cols.len() >= max_columns {
                    return Ok(FoldStep::Finish(cols));
                }
                Ok(FoldStep::Continue(cols))
            },
        )
    }

    fn slice_range(
        &self,
        table: &[u8],
        first: Option<&[u8]>,
        up_to: Option<&[u8]>,
        predicate: &ColumnPredicate,
        reverse: bool,
        max_keys: usize,
        max_columns: usize,
    ) -> Result<Slice, StrataError> {
        let pending_overlay: VecDeque<Bytes> = self
            .overlays
            .added_keys
            .get(table)
            .map(|keys| {
                keys.iter()
                    .filter(|k| key_in_range(k, first, up_to))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let scan = RangeScan {
            predicate,
            reverse,
            max_keys,
            max_columns,
            slack: self.ks.config().column_scan_slack,
            slices: Vec::new(),
            cur_key: None,
            cur_cols: Vec::new(),
            seen_for_key: 0,
            last_col: None,
            pending_overlay,
            done: false,
        };

        let mut scan = fold_over_data(
            self,
            table,
            first,
            up_to,
            None,
            scan,
            &mut |mut scan: RangeScan<'_>, cell: &DatumCell<'_>| {
                if self.is_key_deleted(table, cell.key) {
                    return Ok(FoldStep::SkipKey(scan));
                }
                if scan.cur_key.as_deref() != Some(cell.key) {
                    self.finish_current_key(&mut scan, table, Some(cell.key));
                    if scan.done {
                        return Ok(FoldStep::Finish(scan));
                    }
                    scan.cur_key = Some(cell.key.to_vec());
                }
                // Older versions of a column already handled.
                if scan.last_col.as_deref() == Some(cell.column) {
                    return Ok(FoldStep::Continue(scan));
                }
                scan.last_col = Some(cell.column.to_vec());
                if self.is_column_deleted(table, cell.key, cell.column)
                    || self.shadowed_by_overlay(table, cell.key, cell.column)
                    || !predicate.matches(cell.column)
                {
                    if !scan.reverse && predicate.past_last_match(cell.column) {
                        return Ok(FoldStep::SkipKey(scan));
                    }
                    return Ok(FoldStep::Continue(scan));
                }
                scan.seen_for_key += 1;
                if !scan.reverse && scan.cur_cols.len() >= scan.max_columns {
                    // Budget exhausted: walk on while close to the limit,
                    // seek once the row turns out to be wide.
                    if scan.seen_for_key <= scan.max_columns + scan.slack {
                        return Ok(FoldStep::Continue(scan));
                    }
                    return Ok(FoldStep::SkipKey(scan));
                }
                scan.cur_cols.push(Column {
                    name: cell.column.to_vec(),
                    value: cell.value.to_vec(),
                    timestamp: Timestamp::At(cell.timestamp_micros),
                });
                Ok(FoldStep::Continue(scan))
            },
        )?;

        self.finish_current_key(&mut scan, table, None);
        let slices = scan.slices;
        Ok((slices.last().map(|s| s.key.clone()), slices))
    }

    /// Closes out the key being collected and splices in overlay-only
    /// keys that sort before `next_store_key` (all of them at scan end).
    fn finish_current_key(
        &self,
        scan: &mut RangeScan<'_>,
        table: &[u8],
        next_store_key: Option<&[u8]>,
    ) {
        if let Some(key) = scan.cur_key.take() {
            // The key just closed is no longer pending overlay work.
            if scan.pending_overlay.front().map(Vec::as_slice) == Some(key.as_slice()) {
                scan.pending_overlay.pop_front();
            }
            let store_cols = std::mem::take(&mut scan.cur_cols);
            let merged = self.merge_with_overlay(
                table,
                &key,
                store_cols,
                scan.predicate,
                scan.reverse,
                scan.max_columns,
            );
            if let Some(slice) = build_slice(key, merged) {
                scan.slices.push(slice);
            }
        }
        scan.seen_for_key = 0;
        scan.last_col = None;
        while !scan.done {
            if scan.slices.len() >= scan.max_keys {
                scan.done = true;
                break;
            }
            let splice = match (scan.pending_overlay.front(), next_store_key) {
                (Some(pending), Some(next)) => pending.as_slice() < next,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !splice {
                break;
            }
            let key = scan
                .pending_overlay
                .pop_front()
                .expect("front checked above");
            let merged = self.merge_with_overlay(
                table,
                &key,
                Vec::new(),
                scan.predicate,
                scan.reverse,
                scan.max_columns,
            );
            if let Some(slice) = build_slice(key, merged) {
                scan.slices.push(slice);
            }
        }
    }

    fn shadowed_by_overlay(&self, table: &[u8], key: &[u8], column: &[u8]) -> bool {
        self.added_columns(table, key)
            .is_some_and(|cols| cols.contains_key(column))
    }

    /// Merges store columns with the transaction's pending writes. Both
    /// inputs are ascending; the merge walks them reverse-ordered with
    /// overlay winning ties, then one final reverse restores ascending
    /// order before the budget is applied.
    fn merge_with_overlay(
        &self,
        table: &[u8],
        key: &[u8],
        store_cols: Vec<Column>,
        predicate: &ColumnPredicate,
        reverse: bool,
        max_columns: usize,
    ) -> Vec<Column> {
        let overlay: Vec<Column> = self
            .added_columns(table, key)
            .map(|cols| {
                cols.iter()
                    .filter(|(name, _)| predicate.matches(name))
                    .map(|(name, write)| Column {
                        name: name.clone(),
                        value: write.value.clone(),
                        timestamp: write.timestamp,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut out = Vec::with_capacity(store_cols.len() + overlay.len());
        let mut store = store_cols.into_iter().rev().peekable();
        let mut pending = overlay.into_iter().rev().peekable();
        loop {
            let take_store = match (store.peek(), pending.peek()) {
                (None, None) => break,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some(s), Some(p)) => match s.name.cmp(&p.name) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => {
                        store.next();
                        false
                    }
                },
            };
            let col = if take_store {
                store.next()
            } else {
                pending.next()
            };
            if let Some(col) = col {
                out.push(col);
            }
        }
        out.reverse();

        if reverse {
            let keep = out.len().min(max_columns);
            let mut tail = out.split_off(out.len() - keep);
            tail.reverse();
            tail
        } else {
            out.truncate(max_columns);
            out
        }
    }
}

fn build_slice(key: Bytes, columns: Vec<Column>) -> Option<KeySlice> {
    let last_column = columns.last()?.name.clone();
    Some(KeySlice {
        key,
        last_column,
        columns,
    })
}
