use crate::oplog::OpId;
use bytes::Bytes;
use std::io;

/// LogEntry is a single durable write-ahead log record. The payload is opaque to consensus.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub op_id: OpId,
    pub payload: Bytes,
}

impl LogEntry {
    pub fn new(op_id: OpId, payload: Bytes) -> Self {
        LogEntry { op_id, payload }
    }
}

/// Log is the append only write-ahead log a replica's operations are written to before they are
/// tracked as pending.
///
/// Log indexes entries starting from 1. There will be no entry existing at index 0. Appends must
/// be contiguous: an entry's index is always one past the current last entry's index.
pub trait Log {
    /// Appends `entry`, which must carry the next index, and returns its id.
    fn append(&mut self, entry: LogEntry) -> Result<OpId, io::Error>;

    /// Read log entry at specified index.
    fn read(&self, index: u64) -> Result<Option<LogEntry>, io::Error>;

    /// Removes anything starting at `index` and later.
    fn truncate(&mut self, index: u64);

    /// Id of the last entry in the log, or None if the log is empty. Used to bootstrap a replica.
    fn last_op_id(&self) -> Result<Option<OpId>, io::Error>;
}
