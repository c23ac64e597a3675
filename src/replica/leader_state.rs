use crate::oplog::Term;
use crate::replica::clock::CoarseTimePoint;
use crate::replica::replica_api::{ConsensusError, Result};
use std::sync::Mutex;
use tokio::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaderStatus {
    NotLeader,
    // Elected, but this term's no-op is not committed yet. Retry on the same replica.
    LeaderButNoOpNotCommitted,
    LeaderButOldLeaderMayHaveLease,
    LeaderButNoMajorityReplicatedLease,
    LeaderAndReady,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaderLeaseCheckMode {
    NeedLease,
    DontNeedLease,
}

/// Summary of whether this replica can act as leader right now.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeaderState {
    pub status: LeaderStatus,
    // Set only when `LeaderAndReady`.
    pub term: Option<Term>,
    // Set only when `LeaderButOldLeaderMayHaveLease`.
    pub remaining_old_leader_lease: Option<Duration>,
}

impl LeaderState {
    pub(crate) fn not_ready(status: LeaderStatus) -> Self {
        LeaderState {
            status,
            term: None,
            remaining_old_leader_lease: None,
        }
    }

    pub(crate) fn old_leader_may_have_lease(remaining: Duration) -> Self {
        LeaderState {
            status: LeaderStatus::LeaderButOldLeaderMayHaveLease,
            term: None,
            remaining_old_leader_lease: Some(remaining),
        }
    }

    pub(crate) fn ready(term: Term) -> Self {
        LeaderState {
            status: LeaderStatus::LeaderAndReady,
            term: Some(term),
            remaining_old_leader_lease: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == LeaderStatus::LeaderAndReady
    }

    /// Maps the status onto the error a request should be rejected with.
    pub fn create_status(&self) -> Result<()> {
        match self.status {
            LeaderStatus::LeaderAndReady => Ok(()),
            LeaderStatus::NotLeader => Err(ConsensusError::IllegalState("Not the leader".to_string())),
            LeaderStatus::LeaderButNoOpNotCommitted => Err(ConsensusError::LeaderNotReadyToServe(
                "Leader not yet replicated NoOp to be ready to serve requests".to_string(),
            )),
            LeaderStatus::LeaderButOldLeaderMayHaveLease => Err(ConsensusError::LeaderHasNoLease(format!(
                "Old leader may have lease, while {:?} remaining",
                self.remaining_old_leader_lease.unwrap_or_default()
            ))),
            LeaderStatus::LeaderButNoMajorityReplicatedLease => Err(ConsensusError::LeaderHasNoLease(
                "This leader has not yet acquired a lease".to_string(),
            )),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct CachedLeaderState {
    pub(crate) state: LeaderState,
    // None means nothing time-based was consulted; only a state transition can invalidate it.
    pub(crate) expire_at: Option<CoarseTimePoint>,
}

impl CachedLeaderState {
    pub(crate) fn is_fresh(&self, now: CoarseTimePoint) -> bool {
        match self.expire_at {
            None => true,
            Some(expire_at) => now < expire_at,
        }
    }
}

/// LeaderStatusCache lets the hot "can I serve this" check skip the update lock. It is rewritten
/// under the update lock on every transition that could change the answer, and its expiration
/// is the earliest time bound consulted, so a fresh entry always equals a recomputation.
pub(crate) struct LeaderStatusCache {
    cached: Mutex<CachedLeaderState>,
}

impl LeaderStatusCache {
    pub(crate) fn new() -> Self {
        LeaderStatusCache {
            cached: Mutex::new(CachedLeaderState {
                state: LeaderState::not_ready(LeaderStatus::NotLeader),
                expire_at: None,
            }),
        }
    }

    pub(crate) fn load(&self) -> CachedLeaderState {
        *self.cached.lock().expect("LeaderStatusCache.load() mutex guard poison")
    }

    pub(crate) fn store(&self, state: LeaderState, expire_at: Option<CoarseTimePoint>) {
        *self.cached.lock().expect("LeaderStatusCache.store() mutex guard poison") =
            CachedLeaderState { state, expire_at };
    }
}
