use thiserror::Error;

/// Codec fragment kinds used by decode diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Byte,
    Bool,
    PositiveInt64,
    PositiveInt64Complement,
    SelfDelimited,
    Stringz,
    Tuple,
    Choice,
    DatumKey,
    DumpRecord,
    Request,
}

impl std::fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FragmentKind::Byte => write!(f, "byte"),
            FragmentKind::Bool => write!(f, "bool"),
            FragmentKind::PositiveInt64 => write!(f, "positive_int64"),
            FragmentKind::PositiveInt64Complement => write!(f, "positive_int64_complement"),
            FragmentKind::SelfDelimited => write!(f, "self_delimited"),
            FragmentKind::Stringz => write!(f, "stringz"),
            FragmentKind::Tuple => write!(f, "tuple"),
            FragmentKind::Choice => write!(f, "choice"),
            FragmentKind::DatumKey => write!(f, "datum_key"),
            FragmentKind::DumpRecord => write!(f, "dump_record"),
            FragmentKind::Request => write!(f, "request"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrataErrorCode {
    UnsatisfiedConstraint,
    IncompleteFragment,
    BadEncoding,
    UnknownTag,
    CorruptedFrame,
    InconsistentLength,
    Closed,
    BadVersion,
    Storage,
    UnknownKeyspace,
    ReadOnlyViolation,
    TransactionAborted,
}

impl StrataErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StrataErrorCode::UnsatisfiedConstraint => "unsatisfied_constraint",
            StrataErrorCode::IncompleteFragment => "incomplete_fragment",
            StrataErrorCode::BadEncoding => "bad_encoding",
            StrataErrorCode::UnknownTag => "unknown_tag",
            StrataErrorCode::CorruptedFrame => "corrupted_frame",
            StrataErrorCode::InconsistentLength => "inconsistent_length",
            StrataErrorCode::Closed => "closed",
            StrataErrorCode::BadVersion => "bad_version",
            StrataErrorCode::Storage => "storage",
            StrataErrorCode::UnknownKeyspace => "unknown_keyspace",
            StrataErrorCode::ReadOnlyViolation => "read_only_violation",
            StrataErrorCode::TransactionAborted => "transaction_aborted",
        }
    }
}

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("unsatisfied constraint: {0}")]
    UnsatisfiedConstraint(String),
    #[error("incomplete fragment while decoding {0}")]
    IncompleteFragment(FragmentKind),
    #[error("bad encoding while decoding {0}")]
    BadEncoding(FragmentKind),
    #[error("unknown choice tag {0}")]
    UnknownTag(u8),
    #[error("corrupted frame")]
    CorruptedFrame,
    #[error("inconsistent payload length: expected {expected}, actual {actual}")]
    InconsistentLength { expected: u32, actual: u32 },
    #[error("connection closed")]
    Closed,
    #[error("protocol version mismatch: peer major {peer_major}, local major {local_major}")]
    BadVersion { peer_major: u32, local_major: u32 },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("unknown keyspace '{0}'")]
    UnknownKeyspace(String),
    #[error("read-only violation: {0}")]
    ReadOnlyViolation(String),
    #[error("transaction aborted: {0}")]
    TransactionAborted(#[source] Box<StrataError>),
}

impl StrataError {
    pub fn code(&self) -> StrataErrorCode {
        match self {
            StrataError::UnsatisfiedConstraint(_) => StrataErrorCode::UnsatisfiedConstraint,
            StrataError::IncompleteFragment(_) => StrataErrorCode::IncompleteFragment,
            StrataError::BadEncoding(_) => StrataErrorCode::BadEncoding,
            StrataError::UnknownTag(_) => StrataErrorCode::UnknownTag,
            StrataError::CorruptedFrame => StrataErrorCode::CorruptedFrame,
            StrataError::InconsistentLength { .. } => StrataErrorCode::InconsistentLength,
            StrataError::Closed => StrataErrorCode::Closed,
            StrataError::BadVersion { .. } => StrataErrorCode::BadVersion,
            StrataError::Storage(_) => StrataErrorCode::Storage,
            StrataError::UnknownKeyspace(_) => StrataErrorCode::UnknownKeyspace,
            StrataError::ReadOnlyViolation(_) => StrataErrorCode::ReadOnlyViolation,
            StrataError::TransactionAborted(_) => StrataErrorCode::TransactionAborted,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Wraps a failure that forced the current transaction to abort.
    /// Nested aborts keep the innermost cause.
    pub fn into_abort(self) -> StrataError {
        match self {
            already @ StrataError::TransactionAborted(_) => already,
            cause => StrataError::TransactionAborted(Box::new(cause)),
        }
    }

    /// Errors that abort the current transaction when raised inside one.
    /// Protocol errors fail the connection instead and logical errors
    /// surface to the caller without touching transaction state.
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self.code(),
            StrataErrorCode::UnsatisfiedConstraint
                | StrataErrorCode::IncompleteFragment
                | StrataErrorCode::BadEncoding
                | StrataErrorCode::UnknownTag
                | StrataErrorCode::Storage
        )
    }
}

impl From<std::io::Error> for StrataError {
    fn from(value: std::io::Error) -> Self {
        StrataError::Storage(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{FragmentKind, StrataError, StrataErrorCode};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(
            StrataErrorCode::UnsatisfiedConstraint.as_str(),
            "unsatisfied_constraint"
        );
        assert_eq!(StrataErrorCode::CorruptedFrame.as_str(), "corrupted_frame");
        assert_eq!(StrataErrorCode::UnknownKeyspace.as_str(), "unknown_keyspace");
    }

    #[test]
    fn abort_wrapping_keeps_innermost_cause() {
        let cause = StrataError::BadEncoding(FragmentKind::Tuple);
        let abort = cause.into_abort().into_abort();
        match abort {
            StrataError::TransactionAborted(inner) => {
                assert_eq!(inner.code(), StrataErrorCode::BadEncoding);
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[test]
    fn encoding_errors_abort_but_logical_errors_do_not() {
        assert!(StrataError::BadEncoding(FragmentKind::Byte).aborts_transaction());
        assert!(StrataError::Storage("boom".into()).aborts_transaction());
        assert!(!StrataError::UnknownKeyspace("ks".into()).aborts_transaction());
        assert!(!StrataError::Closed.aborts_transaction());
    }
}
