use crate::oplog::{Log, LogEntry, OpId};
use std::io;

// Durability of the log is owned by the storage layer, not by consensus. This is enough to drive
// bootstrap and to stand in for the write-ahead log in tests.
#[derive(Default)]
pub struct InMemoryLog {
    entries: Vec<LogEntry>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        InMemoryLog { entries: vec![] }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn vec_index(index: u64) -> Option<usize> {
        // Log API states that index starts from 1.
        index.checked_sub(1).map(|i| i as usize)
    }

    fn next_index(&self) -> u64 {
        self.entries.len() as u64 + 1
    }
}

impl Log for InMemoryLog {
    fn append(&mut self, entry: LogEntry) -> Result<OpId, io::Error> {
        if entry.op_id.index != self.next_index() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Append of {} does not follow the last log index {}",
                    entry.op_id,
                    self.next_index() - 1
                ),
            ));
        }
        if let Some(last) = self.entries.last() {
            if entry.op_id.term < last.op_id.term {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Append of {} regresses term of {}", entry.op_id, last.op_id),
                ));
            }
        }

        let op_id = entry.op_id;
        self.entries.push(entry);
        Ok(op_id)
    }

    fn read(&self, index: u64) -> Result<Option<LogEntry>, io::Error> {
        let opt_entry = Self::vec_index(index).and_then(|i| self.entries.get(i).cloned());

        Ok(opt_entry)
    }

    fn truncate(&mut self, index: u64) {
        if let Some(vec_index) = Self::vec_index(index) {
            self.entries.truncate(vec_index);
        } else {
            self.entries.clear();
        }
    }

    fn last_op_id(&self) -> Result<Option<OpId>, io::Error> {
        Ok(self.entries.last().map(|e| e.op_id))
    }
}
