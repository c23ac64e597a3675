use crate::oplog::{OpId, Term};
use crate::replica::peers::{PeerId, RaftConfig};
use bytes::Bytes;
use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, ConsensusError>;

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    // A lock precondition or state check failed. Caller should reject the request or retry later.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Upstream broke a sequencing contract. Continuing risks a corrupted pending queue.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // Durable metadata or log storage failed. In-memory state was left untouched.
    #[error("Durable storage error: {0}")]
    Persistence(#[source] io::Error),

    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    // Client should retry on this same replica.
    #[error("Leader not ready to serve: {0}")]
    LeaderNotReadyToServe(String),

    #[error("Leader has no lease: {0}")]
    LeaderHasNoLease(String),

    #[error("Timed out: {0}")]
    TimedOut(String),
}

/// Lifecycle of a replica's consensus participation. Transitions only move forward:
/// `Initialized -> Running -> ShuttingDown -> ShutDown`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Initialized,
    Running,
    ShuttingDown,
    ShutDown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OperationType {
    // Written by every new leader. Once committed the leader may serve.
    NoOp,
    Write,
    ChangeConfig(RaftConfig),
    Split { tablet_id: String },
}

impl OperationType {
    pub fn name(&self) -> &'static str {
        match self {
            OperationType::NoOp => "NO_OP",
            OperationType::Write => "WRITE_OP",
            OperationType::ChangeConfig(_) => "CHANGE_CONFIG_OP",
            OperationType::Split { .. } => "SPLIT_OP",
        }
    }
}

/// ReplicateMsg is the content of a raft log entry before (leader) or as (follower) it is
/// assigned an id.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicateMsg {
    pub op_type: OperationType,
    pub payload: Bytes,
}

impl ReplicateMsg {
    pub fn new(op_type: OperationType, payload: Bytes) -> Self {
        ReplicateMsg { op_type, payload }
    }

    pub fn no_op() -> Self {
        Self::new(OperationType::NoOp, Bytes::new())
    }

    pub fn write(payload: Bytes) -> Self {
        Self::new(OperationType::Write, payload)
    }

    /// A message is replicable by a leader only if it carries nothing that is assigned during
    /// replication. A config change proposal gets its `opid_index` from the op id.
    pub(crate) fn check_well_formed(&self) -> std::result::Result<(), String> {
        match &self.op_type {
            OperationType::ChangeConfig(new_config) => {
                if new_config.opid_index.is_some() {
                    return Err(format!(
                        "New config must not have an opid index yet: {:?}",
                        new_config.opid_index
                    ));
                }
                if new_config.peers.is_empty() {
                    return Err("New config has no peers".to_string());
                }
                Ok(())
            }
            OperationType::Split { tablet_id } if tablet_id.is_empty() => {
                Err("Split op is missing a tablet id".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// ReplicationFinished is delivered exactly once to each operation's callback, either when the
/// operation is applied after being majority-committed, or when it is aborted.
#[derive(Debug)]
pub struct ReplicationFinished {
    pub op_id: OpId,
    // Term of this replica's leadership at notification time, if it was a ready leader.
    pub leader_term: Option<Term>,
    pub status: Result<()>,
}

pub type ReplicatedCallback = Box<dyn FnOnce(ReplicationFinished) + Send>;

/// Invoked with the ids of every batch of applied operations.
pub type AppliedOpsTracker = Box<dyn Fn(&[OpId]) + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpPresence {
    CommittedOrPending,
    Absent,
    // An op with the same index is pending, but from another term.
    TermMismatch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigType {
    Active,
    Committed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConsensusState {
    pub current_term: Term,
    pub leader_uuid: Option<PeerId>,
    pub config: RaftConfig,
}

impl fmt::Display for ConsensusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "current_term: {} leader_uuid: {} config: {}",
            self.current_term,
            self.leader_uuid.as_ref().map(|p| p.as_str()).unwrap_or(""),
            self.config
        )
    }
}
