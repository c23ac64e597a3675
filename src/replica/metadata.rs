use crate::oplog::Term;
use crate::replica::peers::{PeerId, RaftConfig};
use std::io;
use std::sync::{Arc, Mutex};

/// The subset of consensus state raft requires to survive a restart.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsensusMetadataRecord {
    pub current_term: Term,
    pub voted_for: Option<PeerId>,
    pub committed_config: RaftConfig,
}

impl ConsensusMetadataRecord {
    pub fn new(committed_config: RaftConfig) -> Self {
        ConsensusMetadataRecord {
            current_term: Term::new(0),
            voted_for: None,
            committed_config,
        }
    }
}

/// ConsensusMetadataStore is used whenever raft requires something to be durable to guarantee
/// safety. Replica state updates its in-memory copy only after `flush()` returns Ok.
pub trait ConsensusMetadataStore: Send {
    /// Load the last flushed record. Used once, when the replica is constructed.
    fn load(&self) -> Result<ConsensusMetadataRecord, io::Error>;

    /// Durably replace the stored record. Must not return until the write is durable.
    fn flush(&mut self, record: &ConsensusMetadataRecord) -> Result<(), io::Error>;
}

// Cloned handles share the same record, so a test can keep one to inspect what was persisted
// and to inject flush failures.
#[derive(Clone)]
pub struct InMemoryMetadataStore {
    inner: Arc<Mutex<StoreInner>>,
}

struct StoreInner {
    record: ConsensusMetadataRecord,
    failures_to_inject: usize,
    flush_count: u64,
}

impl InMemoryMetadataStore {
    pub fn new(initial_config: RaftConfig) -> Self {
        Self::with_record(ConsensusMetadataRecord::new(initial_config))
    }

    pub fn with_record(record: ConsensusMetadataRecord) -> Self {
        InMemoryMetadataStore {
            inner: Arc::new(Mutex::new(StoreInner {
                record,
                failures_to_inject: 0,
                flush_count: 0,
            })),
        }
    }

    pub fn persisted(&self) -> ConsensusMetadataRecord {
        self.lock().record.clone()
    }

    pub fn flush_count(&self) -> u64 {
        self.lock().flush_count
    }

    /// The next `n` flushes fail with an io error and leave the stored record untouched.
    pub fn fail_next_flushes(&self, n: usize) {
        self.lock().failures_to_inject = n;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("InMemoryMetadataStore mutex guard poison")
    }
}

impl ConsensusMetadataStore for InMemoryMetadataStore {
    fn load(&self) -> Result<ConsensusMetadataRecord, io::Error> {
        Ok(self.persisted())
    }

    fn flush(&mut self, record: &ConsensusMetadataRecord) -> Result<(), io::Error> {
        let mut inner = self.lock();
        if inner.failures_to_inject > 0 {
            inner.failures_to_inject -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "injected flush failure"));
        }

        inner.record = record.clone();
        inner.flush_count += 1;
        Ok(())
    }
}
