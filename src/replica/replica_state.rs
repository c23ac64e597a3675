use crate::api::{ConsensusOptions, ConsensusOptionsValidated};
use crate::oplog::OpId;
use crate::replica::clock::{Clock, CoarseTimePoint, MicrosTime};
use crate::replica::commit_watch::{self, CommitWatermarkListener, CommitWatermarkNotifier};
use crate::replica::config_tracker::ConfigTracker;
use crate::replica::leader_state::{LeaderState, LeaderStatusCache};
use crate::replica::lease::LeaseTracker;
use crate::replica::local_state::TermAndVoteTracker;
use crate::replica::metadata::ConsensusMetadataStore;
use crate::replica::peers::{PeerId, RaftRole};
use crate::replica::pending_ops::PendingOperations;
use crate::replica::replica_api::{AppliedOpsTracker, ConsensusError, LifecycleState, ReplicateMsg, Result};
use crate::replica::replica_state_guard::{ReplicaStateGuard, ReplicaStateReadGuard};
use std::convert::TryFrom;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tokio::time::Duration;

pub struct ReplicaStateConfig<S: ConsensusMetadataStore> {
    pub logger: slog::Logger,
    pub options: ConsensusOptions,
    pub tablet_id: String,
    pub peer_id: PeerId,
    pub metadata_store: S,
    pub clock: Arc<dyn Clock>,
    pub applied_ops_tracker: Option<AppliedOpsTracker>,
}

/// ReplicaState is the consensus state of one tablet replica. All of it lives behind a single
/// update lock, which is only reachable through the `lock_for_*` gateways. Each gateway checks
/// its precondition and hands back a [`ReplicaStateGuard`] that releases the lock on drop.
/// `lock_for_read` has no precondition and its guard can only query.
pub struct ReplicaState<S: ConsensusMetadataStore> {
    pub(super) logger: slog::Logger,
    pub(super) options: ConsensusOptionsValidated,
    pub(super) tablet_id: String,
    pub(super) peer_id: PeerId,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) update_lock: Mutex<Inner<S>>,
    // Signalled whenever the committed watermark, a lease, or the lifecycle state changes.
    pub(super) cond: Condvar,
    pub(super) leader_state_cache: LeaderStatusCache,
    pub(super) commit_notifier: CommitWatermarkNotifier,
    pub(super) applied_ops_tracker: Option<AppliedOpsTracker>,
}

pub(super) struct Inner<S> {
    pub(super) state: LifecycleState,
    pub(super) metadata_store: S,
    pub(super) term_and_vote: TermAndVoteTracker,
    pub(super) config: ConfigTracker,
    pub(super) pending: PendingOperations,
    pub(super) leases: LeaseTracker,
    // Index the next locally generated op id gets.
    pub(super) next_index: u64,
    pub(super) last_received_op_id: OpId,
    pub(super) last_received_op_id_current_leader: OpId,
    pub(super) last_committed_op_id: OpId,
    pub(super) split_op_id: Option<OpId>,
    pub(super) pending_election_op_id: Option<OpId>,
    pub(super) leader_no_op_committed: bool,
}

impl<S> Inner<S> {
    pub(super) fn role(&self, me: &PeerId) -> RaftRole {
        self.config.active().role_of(me, self.term_and_vote.leader_uuid())
    }
}

impl<S: ConsensusMetadataStore> ReplicaState<S> {
    pub fn new(config: ReplicaStateConfig<S>) -> Result<Self> {
        let options = ConsensusOptionsValidated::try_from(config.options)
            .map_err(|e| ConsensusError::InvalidArgument(e.to_string()))?;
        let record = config.metadata_store.load().map_err(ConsensusError::Persistence)?;
        let logger = config.logger.new(slog::o!(
            "Tablet" => config.tablet_id.clone(),
            "Peer" => config.peer_id.to_string()
        ));
        slog::info!(
            logger,
            "Loaded consensus metadata. Term: {}, voted for: {:?}, committed config: {}",
            record.current_term,
            record.voted_for,
            record.committed_config
        );
        let (commit_notifier, _) = commit_watch::new(OpId::MIN);

        Ok(ReplicaState {
            logger,
            options,
            tablet_id: config.tablet_id,
            peer_id: config.peer_id,
            clock: config.clock,
            update_lock: Mutex::new(Inner {
                state: LifecycleState::Initialized,
                metadata_store: config.metadata_store,
                term_and_vote: TermAndVoteTracker::from_record(&record),
                config: ConfigTracker::new(record.committed_config),
                pending: PendingOperations::new(),
                leases: LeaseTracker::new(),
                next_index: 1,
                last_received_op_id: OpId::MIN,
                last_received_op_id_current_leader: OpId::MIN,
                last_committed_op_id: OpId::MIN,
                split_op_id: None,
                pending_election_op_id: None,
                leader_no_op_committed: false,
            }),
            cond: Condvar::new(),
            leader_state_cache: LeaderStatusCache::new(),
            commit_notifier,
            applied_ops_tracker: config.applied_ops_tracker,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.update_lock.lock().expect("ReplicaState update lock poison")
    }

    fn guard(&self) -> ReplicaStateGuard<'_, S> {
        ReplicaStateGuard {
            replica: self,
            inner: self.lock(),
            access: PhantomData,
        }
    }

    /// Lock for the one-time `start()`.
    pub fn lock_for_start(&self) -> Result<ReplicaStateGuard<'_, S>> {
        let guard = self.guard();
        if guard.inner.state != LifecycleState::Initialized {
            return Err(ConsensusError::IllegalState(format!(
                "Replica is not in initialized state. State: {:?}",
                guard.inner.state
            )));
        }

        Ok(guard)
    }

    /// Lock for assigning an id to a new operation and adding it as pending. Only a running
    /// leader may replicate, and `msg`, if given, must not carry anything that replication
    /// assigns.
    pub fn lock_for_replicate(&self, msg: Option<&ReplicateMsg>) -> Result<ReplicaStateGuard<'_, S>> {
        let guard = self.guard();
        if guard.inner.state != LifecycleState::Running {
            return Err(ConsensusError::IllegalState(format!(
                "Replica not in running state. State: {:?}",
                guard.inner.state
            )));
        }
        let role = guard.inner.role(&self.peer_id);
        if role != RaftRole::Leader {
            return Err(ConsensusError::IllegalState(format!(
                "Replica {} is not leader of this config. Role: {:?}",
                self.peer_id, role
            )));
        }
        if let Some(msg) = msg {
            msg.check_well_formed().map_err(ConsensusError::IllegalState)?;
        }

        Ok(guard)
    }

    /// Lock for applying a leader's update on a follower. Serializes updates so only one is
    /// processed at a time.
    pub fn lock_for_update(&self) -> Result<ReplicaStateGuard<'_, S>> {
        let guard = self.guard();
        if guard.inner.state != LifecycleState::Running {
            return Err(ConsensusError::IllegalState(format!(
                "Replica not in running state. State: {:?}",
                guard.inner.state
            )));
        }

        Ok(guard)
    }

    pub fn lock_for_config_change(&self) -> Result<ReplicaStateGuard<'_, S>> {
        let guard = self.guard();
        if guard.inner.state != LifecycleState::Running {
            return Err(ConsensusError::IllegalState(format!(
                "Unable to lock replica state for config change. State: {:?}",
                guard.inner.state
            )));
        }
        guard.check_no_config_change_pending()?;

        Ok(guard)
    }

    /// Moves the replica to `ShuttingDown` (unless it already is) and returns the lock to drain
    /// pending operations under. `ShutDown` is terminal, so it is refused from there.
    pub fn lock_for_shutdown(&self) -> Result<ReplicaStateGuard<'_, S>> {
        let mut guard = self.guard();
        match guard.inner.state {
            LifecycleState::ShutDown => {
                return Err(ConsensusError::IllegalState("Replica is already shut down".to_string()));
            }
            LifecycleState::ShuttingDown => {}
            state => {
                slog::info!(self.logger, "Shutting down. State was {:?}", state);
                guard.inner.state = LifecycleState::ShuttingDown;
                self.cond.notify_all();
            }
        }

        Ok(guard)
    }

    pub fn lock_for_majority_replicated_index_update(&self) -> Result<ReplicaStateGuard<'_, S>> {
        let guard = self.guard();
        if guard.inner.state != LifecycleState::Running {
            return Err(ConsensusError::IllegalState(format!(
                "Replica not in running state. State: {:?}",
                guard.inner.state
            )));
        }
        if guard.inner.role(&self.peer_id) != RaftRole::Leader {
            return Err(ConsensusError::IllegalState("Replica not leader".to_string()));
        }

        Ok(guard)
    }

    /// Lock for inspection. Granted in any state.
    pub fn lock_for_read(&self) -> ReplicaStateReadGuard<'_, S> {
        ReplicaStateGuard {
            replica: self,
            inner: self.lock(),
            access: PhantomData,
        }
    }

    /// Leader state from the cache when it is still fresh, or when `allow_stale` says an expired
    /// entry is good enough. Otherwise recomputes under the update lock.
    pub fn get_leader_state(&self, allow_stale: bool) -> LeaderState {
        let cached = self.leader_state_cache.load();
        if allow_stale || cached.is_fresh(self.clock.now()) {
            return cached.state;
        }

        let mut guard = self.lock_for_read();
        guard.refresh_leader_state_cache();
        self.leader_state_cache.load().state
    }

    /// New lease expirations a leader should attach to the entry it is about to replicate.
    pub fn lease_extension_proposal(&self) -> (CoarseTimePoint, MicrosTime) {
        (
            self.clock.now() + self.options.leader_lease_duration,
            self.clock.hybrid_time_micros() + self.options.ht_lease_duration.as_micros() as MicrosTime,
        )
    }

    pub fn subscribe_committed(&self) -> CommitWatermarkListener {
        self.commit_notifier.subscribe()
    }

    /// Blocks the calling thread until an op with at least `index` is committed.
    pub fn wait_for_committed_index(&self, index: u64, timeout: Duration) -> Result<OpId> {
        let guard = self.lock();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |inner| {
                inner.last_committed_op_id.index < index && inner.state != LifecycleState::ShutDown
            })
            .expect("ReplicaState update lock poison");

        if guard.last_committed_op_id.index >= index {
            return Ok(guard.last_committed_op_id);
        }
        if guard.state == LifecycleState::ShutDown {
            return Err(ConsensusError::Aborted(format!(
                "Replica shut down while waiting for index {} to be committed",
                index
            )));
        }

        Err(ConsensusError::TimedOut(format!(
            "Index {} not committed after {:?}. Last committed: {}",
            index, timeout, guard.last_committed_op_id
        )))
    }

    /// Blocks until this leader's majority replicated hybrid time lease reaches `min_allowed`,
    /// and returns it. Fails if leadership is lost while waiting.
    pub fn majority_replicated_ht_lease_expiration(
        &self,
        min_allowed: MicrosTime,
        timeout: Duration,
    ) -> Result<MicrosTime> {
        if !self.options.use_hybrid_time_leases {
            return Ok(MicrosTime::MAX);
        }

        let guard = self.lock();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |inner| {
                inner.role(&self.peer_id) == RaftRole::Leader
                    && inner.state == LifecycleState::Running
                    && inner
                        .leases
                        .majority_replicated_ht_lease_expiration()
                        .map_or(true, |expiration| expiration < min_allowed)
            })
            .expect("ReplicaState update lock poison");

        if let Some(expiration) = guard.leases.majority_replicated_ht_lease_expiration() {
            if expiration >= min_allowed {
                return Ok(expiration);
            }
        }
        if guard.role(&self.peer_id) != RaftRole::Leader || guard.state != LifecycleState::Running {
            return Err(ConsensusError::IllegalState(
                "Leader lease revoked while waiting for hybrid time lease".to_string(),
            ));
        }

        Err(ConsensusError::TimedOut(format!(
            "Majority replicated hybrid time lease did not reach {} after {:?}",
            min_allowed, timeout
        )))
    }
}
