//! Key and column selection for slice queries, with column predicates
//! compiled once per query.

use crate::txn::Bytes;
use std::collections::HashSet;

/// Explicit key lists are scanned per key; ranges stream a single scan.
/// Ranges are half-open: `first` inclusive, `up_to` exclusive, `None`
/// unbounded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KeyRange {
    Keys(Vec<Bytes>),
    Range {
        first: Option<Bytes>,
        up_to: Option<Bytes>,
    },
}

impl KeyRange {
    pub fn all() -> Self {
        KeyRange::Range {
            first: None,
            up_to: None,
        }
    }

    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        KeyRange::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn range(first: Option<impl Into<Bytes>>, up_to: Option<impl Into<Bytes>>) -> Self {
        KeyRange::Range {
            first: first.map(Into::into),
            up_to: up_to.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ColumnRange {
    All,
    Columns(Vec<Bytes>),
    Range {
        first: Option<Bytes>,
        up_to: Option<Bytes>,
        reverse: bool,
    },
}

impl ColumnRange {
    pub fn columns<I, C>(columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        ColumnRange::Columns(columns.into_iter().map(Into::into).collect())
    }
}

/// Explicit lists below this size use linear comparison; larger lists
/// compile to hash-set membership.
const LINEAR_LIST_MAX: usize = 5;

#[derive(Debug)]
pub(crate) enum ColumnPredicate {
    All,
    Linear(Vec<Bytes>),
    Set(HashSet<Bytes>),
    Bounds {
        first: Option<Bytes>,
        up_to: Option<Bytes>,
    },
}

impl ColumnPredicate {
    /// Compiles the selection; returns the predicate and the reverse flag.
    pub(crate) fn compile(range: &ColumnRange) -> (Self, bool) {
        match range {
            ColumnRange::All => (ColumnPredicate::All, false),
            ColumnRange::Columns(cols) => {
                if cols.len() < LINEAR_LIST_MAX {
                    (ColumnPredicate::Linear(cols.clone()), false)
                } else {
                    (ColumnPredicate::Set(cols.iter().cloned().collect()), false)
                }
            }
            ColumnRange::Range {
                first,
                up_to,
                reverse,
            } => (
                ColumnPredicate::Bounds {
                    first: first.clone(),
                    up_to: up_to.clone(),
                },
                *reverse,
            ),
        }
    }

    pub(crate) fn matches(&self, column: &[u8]) -> bool {
        match self {
            ColumnPredicate::All => true,
            ColumnPredicate::Linear(cols) => cols.iter().any(|c| c.as_slice() == column),
            ColumnPredicate::Set(cols) => cols.contains(column),
            ColumnPredicate::Bounds { first, up_to } => {
                if let Some(first) = first {
                    if column < first.as_slice() {
                        return false;
                    }
                }
                if let Some(up_to) = up_to {
                    if column >= up_to.as_slice() {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// True once an ascending scan is past every column this predicate
    /// can still select, so the scan may skip to the next key.
    pub(crate) fn past_last_match(&self, column: &[u8]) -> bool {
        match self {
            ColumnPredicate::Bounds {
                up_to: Some(up_to), ..
            } => column >= up_to.as_slice(),
            _ => false,
        }
    }
}

pub(crate) fn key_in_range(key: &[u8], first: Option<&[u8]>, up_to: Option<&[u8]>) -> bool {
    if let Some(first) = first {
        if key < first {
            return false;
        }
    }
    if let Some(up_to) = up_to {
        if key >= up_to {
            return false;
        }
    }
    true
}
