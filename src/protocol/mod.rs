//! Wire contract: the request taxonomy carried by command-plane frames,
//! the data-plane op codes used by backup and replication connections,
//! and the version handshake.

pub mod frame;

pub use frame::{
    masked_crc32c, read_frame, write_frame, RequestFrame, RequestIdAllocator,
};

use crate::error::{FragmentKind, StrataError};
use crate::query::plan::{ColumnRange, KeyRange};
use crate::txn::{Bytes, Column, IsolationLevel};
use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion {
    major: 1,
    minor: 0,
    bugfix: 0,
};

/// Exchanged during the data-plane handshake; a major mismatch aborts the
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub bugfix: u32,
}

impl ProtocolVersion {
    pub fn encode(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..4].copy_from_slice(&self.major.to_le_bytes());
        out[4..8].copy_from_slice(&self.minor.to_le_bytes());
        out[8..].copy_from_slice(&self.bugfix.to_le_bytes());
        out
    }

    pub fn decode(raw: [u8; 12]) -> Self {
        Self {
            major: u32::from_le_bytes(raw[..4].try_into().expect("4 bytes")),
            minor: u32::from_le_bytes(raw[4..8].try_into().expect("4 bytes")),
            bugfix: u32::from_le_bytes(raw[8..].try_into().expect("4 bytes")),
        }
    }

    pub fn check_compatible(&self, peer: &ProtocolVersion) -> Result<(), StrataError> {
        if self.major != peer.major {
            return Err(StrataError::BadVersion {
                peer_major: peer.major,
                local_major: self.major,
            });
        }
        Ok(())
    }
}

/// Command-plane request payloads. The frame layer is agnostic to this
/// encoding; requests travel as MessagePack inside frame payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    RegisterKeyspace {
        name: String,
    },
    GetKeyspace {
        name: String,
    },
    ListKeyspaces,
    ListTables {
        keyspace: u32,
    },
    Begin {
        keyspace: u32,
        isolation: IsolationLevel,
    },
    Commit {
        keyspace: u32,
    },
    Abort {
        keyspace: u32,
    },
    GetSlice {
        keyspace: u32,
        table: Bytes,
        key_range: KeyRange,
        column_range: ColumnRange,
        max_keys: usize,
        max_columns: usize,
    },
    GetSliceValues {
        keyspace: u32,
        table: Bytes,
        key_range: KeyRange,
        columns: Vec<Bytes>,
        max_keys: usize,
    },
    GetColumn {
        keyspace: u32,
        table: Bytes,
        key: Bytes,
        column: Bytes,
    },
    GetColumnValues {
        keyspace: u32,
        table: Bytes,
        key: Bytes,
        columns: Vec<Bytes>,
    },
    ExistsKey {
        keyspace: u32,
        table: Bytes,
        key: Bytes,
    },
    CountKeys {
        keyspace: u32,
        table: Bytes,
        key_range: KeyRange,
    },
    PutColumns {
        keyspace: u32,
        table: Bytes,
        key: Bytes,
        columns: Vec<Column>,
    },
    DeleteColumns {
        keyspace: u32,
        table: Bytes,
        key: Bytes,
        columns: Vec<Bytes>,
    },
    DeleteKey {
        keyspace: u32,
        table: Bytes,
        key: Bytes,
    },
    TableStats {
        keyspace: u32,
        table: Bytes,
    },
    Dump {
        keyspace: u32,
        cursor: Option<String>,
    },
    Load {
        keyspace: u32,
        data: Bytes,
    },
    Listen {
        keyspace: u32,
        topic: String,
    },
    Notify {
        keyspace: u32,
        topic: String,
    },
}

pub fn encode_request(request: &Request) -> Result<Vec<u8>, StrataError> {
    rmp_serde::to_vec(request)
        .map_err(|e| StrataError::UnsatisfiedConstraint(format!("request encode: {e}")))
}

pub fn decode_request(payload: &[u8]) -> Result<Request, StrataError> {
    rmp_serde::from_slice(payload).map_err(|_| StrataError::BadEncoding(FragmentKind::Request))
}

/// Data-plane requests opening backup and replication streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    GetFile {
        dump_id: u64,
        offset: u64,
        name: String,
    },
    GetUpdates {
        dump_id: u64,
    },
}

const OP_GET_FILE: u32 = 1;
const OP_GET_UPDATES: u32 = 2;

impl DataRequest {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), StrataError> {
        match self {
            DataRequest::GetFile {
                dump_id,
                offset,
                name,
            } => {
                w.write_all(&OP_GET_FILE.to_le_bytes())?;
                w.write_all(&dump_id.to_le_bytes())?;
                w.write_all(&offset.to_le_bytes())?;
                let len = u32::try_from(name.len()).map_err(|_| {
                    StrataError::UnsatisfiedConstraint("file name too long".into())
                })?;
                w.write_all(&len.to_le_bytes())?;
                w.write_all(name.as_bytes())?;
            }
            DataRequest::GetUpdates { dump_id } => {
                w.write_all(&OP_GET_UPDATES.to_le_bytes())?;
                w.write_all(&dump_id.to_le_bytes())?;
            }
        }
        w.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, StrataError> {
        let mut op = [0u8; 4];
        r.read_exact(&mut op)?;
        match u32::from_le_bytes(op) {
            OP_GET_FILE => {
                let mut dump_id = [0u8; 8];
                r.read_exact(&mut dump_id)?;
                let mut offset = [0u8; 8];
                r.read_exact(&mut offset)?;
                let mut len = [0u8; 4];
                r.read_exact(&mut len)?;
                let mut name = vec![0u8; u32::from_le_bytes(len) as usize];
                r.read_exact(&mut name)?;
                Ok(DataRequest::GetFile {
                    dump_id: u64::from_le_bytes(dump_id),
                    offset: u64::from_le_bytes(offset),
                    name: String::from_utf8(name)
                        .map_err(|_| StrataError::BadEncoding(FragmentKind::Request))?,
                })
            }
            OP_GET_UPDATES => {
                let mut dump_id = [0u8; 8];
                r.read_exact(&mut dump_id)?;
                Ok(DataRequest::GetUpdates {
                    dump_id: u64::from_le_bytes(dump_id),
                })
            }
            other => Err(StrataError::UnknownTag(other as u8)),
        }
    }
}

/// Data-plane response codes, written as a checksummed little-endian int.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataResponse {
    Ok,
    Other,
    UnknownDump,
    UnknownFile,
}

impl DataResponse {
    fn code(self) -> u32 {
        match self {
            DataResponse::Ok => 0,
            DataResponse::Other => 1,
            DataResponse::UnknownDump => 2,
            DataResponse::UnknownFile => 3,
        }
    }

    fn from_code(code: u32) -> Result<Self, StrataError> {
        match code {
            0 => Ok(DataResponse::Ok),
            1 => Ok(DataResponse::Other),
            2 => Ok(DataResponse::UnknownDump),
            3 => Ok(DataResponse::UnknownFile),
            other => Err(StrataError::UnknownTag(other as u8)),
        }
    }

    pub fn write_to<W: Write>(self, w: &mut W) -> Result<(), StrataError> {
        let raw = self.code().to_le_bytes();
        w.write_all(&raw)?;
        w.write_all(&crc32c(&raw).to_le_bytes())?;
        w.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, StrataError> {
        let mut raw = [0u8; 4];
        r.read_exact(&mut raw)?;
        let mut crc = [0u8; 4];
        r.read_exact(&mut crc)?;
        if u32::from_le_bytes(crc) != crc32c(&raw) {
            return Err(StrataError::CorruptedFrame);
        }
        Self::from_code(u32::from_le_bytes(raw))
    }
}
