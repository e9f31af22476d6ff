//! Replication: committed write batches fan out to subscriber streams,
//! and a producer forwards them over a framed data-plane connection with
//! per-update acknowledgement.

use crate::codec::{decode_self_delimited, encode_self_delimited, Fragment};
use crate::error::{FragmentKind, StrataError};
use crate::storage::store::{BatchOp, WriteBatch};
use crc32c::crc32c;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use tracing::{debug, warn};

pub const UPDATE_ACK: u8 = 0x01;
pub const UPDATE_NACK: u8 = 0x00;

const OP_PUT: u8 = 0x01;
const OP_DELETE: u8 = 0x02;

/// One committed batch, serialized for the wire.
#[derive(Debug, Clone)]
pub struct Update {
    pub seq: u64,
    pub payload: Arc<Vec<u8>>,
}

/// Subscriber half of the update fan-out. Dropping the stream detaches it
/// from the hub; the producer loop ends once the sender side is gone and
/// the queue drains.
pub struct UpdateStream {
    rx: Receiver<Update>,
}

impl UpdateStream {
    /// Blocks for the next committed update; `None` once the hub is gone
    /// and the queue is drained.
    pub fn recv(&self) -> Option<Update> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Update> {
        self.rx.try_recv().ok()
    }
}

/// Commit-side fan-out. A full subscriber queue backpressures commits.
pub(crate) struct UpdateHub {
    next_seq: AtomicU64,
    subscribers: Mutex<Vec<SyncSender<Update>>>,
}

impl UpdateHub {
    pub(crate) fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, depth: usize) -> UpdateStream {
        let (tx, rx) = sync_channel(depth.max(1));
        self.subscribers.lock().push(tx);
        UpdateStream { rx }
    }

    pub(crate) fn publish(&self, payload: Vec<u8>) {
        let mut subs = self.subscribers.lock();
        if subs.is_empty() {
            return;
        }
        let update = Update {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed) + 1,
            payload: Arc::new(payload),
        };
        // A send fails only when the stream was dropped; prune it.
        subs.retain(|sender| sender.send(update.clone()).is_ok());
    }
}

/// Serializes a committed batch: keyspace id then tagged, self-delimited
/// operations in commit order.
pub fn encode_update(ks_id: u32, batch: &WriteBatch) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&ks_id.to_be_bytes());
    for op in batch.ops() {
        match op {
            BatchOp::Put { key, value } => {
                out.push(OP_PUT);
                encode_self_delimited(&mut out, key);
                out.extend_from_slice(&(value.len() as u32).to_be_bytes());
                out.extend_from_slice(value);
            }
            BatchOp::Delete { key } => {
                out.push(OP_DELETE);
                encode_self_delimited(&mut out, key);
            }
        }
    }
    out
}

pub fn decode_update(bytes: &[u8]) -> Result<(u32, WriteBatch), StrataError> {
    let mut frag = Fragment::new(bytes);
    let raw_id = frag.take(4, FragmentKind::DumpRecord)?;
    let ks_id = u32::from_be_bytes(raw_id.try_into().expect("4 bytes"));
    let mut batch = WriteBatch::new();
    while !frag.is_empty() {
        match frag.take_u8(FragmentKind::DumpRecord)? {
            OP_PUT => {
                let key = decode_self_delimited(&mut frag)?;
                let len_raw = frag.take(4, FragmentKind::DumpRecord)?;
                let len = u32::from_be_bytes(len_raw.try_into().expect("4 bytes")) as usize;
                let value = frag.take(len, FragmentKind::DumpRecord)?;
                batch.put(key, value.to_vec());
            }
            OP_DELETE => {
                batch.delete(decode_self_delimited(&mut frag)?);
            }
            _ => return Err(StrataError::BadEncoding(FragmentKind::DumpRecord)),
        }
    }
    Ok((ks_id, batch))
}

/// Forwards every update from the stream over `conn`, awaiting a one-byte
/// acknowledgement per update and re-sending on NACK. The producer owns
/// each update until it is acknowledged.
pub struct ReplicationProducer {
    stream: UpdateStream,
}

impl ReplicationProducer {
    pub fn new(stream: UpdateStream) -> Self {
        Self { stream }
    }

    pub fn run<C: Read + Write>(self, conn: &mut C) -> Result<(), StrataError> {
        while let Some(update) = self.stream.recv() {
            loop {
                write_update_frame(conn, &update.payload)?;
                match read_ack(conn)? {
                    true => break,
                    false => {
                        warn!(seq = update.seq, "consumer rejected update, re-sending");
                    }
                }
            }
            debug!(seq = update.seq, bytes = update.payload.len(), "update acknowledged");
        }
        Ok(())
    }
}

/// `u32_le(len) ∥ payload ∥ crc32c_le(payload)`.
pub fn write_update_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), StrataError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| StrataError::UnsatisfiedConstraint("update payload too large".into()))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(payload)?;
    w.write_all(&crc32c(payload).to_le_bytes())?;
    w.flush()?;
    Ok(())
}

/// Consumer side: reads one framed update, `None` on clean end of stream.
pub fn read_update_frame<R: Read>(r: &mut R) -> Result<Option<Vec<u8>>, StrataError> {
    let mut len_buf = [0u8; 4];
    match r.read(&mut len_buf[0..1])? {
        0 => return Ok(None),
        _ => {}
    }
    r.read_exact(&mut len_buf[1..4]).map_err(closed_on_eof)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).map_err(closed_on_eof)?;
    let mut crc_buf = [0u8; 4];
    r.read_exact(&mut crc_buf).map_err(closed_on_eof)?;
    if u32::from_le_bytes(crc_buf) != crc32c(&payload) {
        return Err(StrataError::CorruptedFrame);
    }
    Ok(Some(payload))
}

pub fn write_ack<W: Write>(w: &mut W, ok: bool) -> Result<(), StrataError> {
    w.write_all(&[if ok { UPDATE_ACK } else { UPDATE_NACK }])?;
    w.flush()?;
    Ok(())
}

fn read_ack<R: Read>(r: &mut R) -> Result<bool, StrataError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(closed_on_eof)?;
    match buf[0] {
        UPDATE_ACK => Ok(true),
        UPDATE_NACK => Ok(false),
        _ => Err(StrataError::CorruptedFrame),
    }
}

fn closed_on_eof(e: std::io::Error) -> StrataError {
    if e.kind() == ErrorKind::UnexpectedEof {
        StrataError::Closed
    } else {
        StrataError::Storage(e.to_string())
    }
}
