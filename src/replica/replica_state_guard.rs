use crate::oplog::{Log, OpId, Term};
use crate::replica::clock::{CoarseTimePoint, MicrosTime};
use crate::replica::leader_state::{LeaderLeaseCheckMode, LeaderState, LeaderStatus};
use crate::replica::lease::{
    CoarseTimeLease, LeaderLeaseStatus, MajorityReplicatedData, OldLeaderLeaseReset, PhysicalComponentLease,
};
use crate::replica::metadata::{ConsensusMetadataRecord, ConsensusMetadataStore};
use crate::replica::peers::{PeerId, RaftConfig, RaftRole};
use crate::replica::pending_ops::ConsensusRound;
use crate::replica::replica_api::{
    ConfigType, ConsensusError, ConsensusState, LifecycleState, OpPresence, OperationType, Result,
};
use crate::replica::replica_state::{Inner, ReplicaState};
use std::fmt;
use std::marker::PhantomData;
use std::sync::MutexGuard;
use tokio::time::Duration;

/// Whether commit advancement may stop early once shutdown has begun.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CouldStop {
    Yes,
    No,
}

/// Access granted by the checked `lock_for_*` gateways: queries and mutations.
#[derive(Debug)]
pub enum ReadWrite {}

/// Access granted by `lock_for_read`: queries only.
#[derive(Debug)]
pub enum ReadOnly {}

/// ReplicaStateGuard is proof that the update lock is held. Every read and mutation of
/// consensus state goes through it, and the lock is released when it is dropped.
///
/// Only the gateways that check a lifecycle precondition hand out a `ReadWrite` guard, so no
/// state can change outside of them.
///
/// Operation callbacks are invoked while the guard is held, so they must not try to lock the
/// replica again.
pub struct ReplicaStateGuard<'a, S: ConsensusMetadataStore, A = ReadWrite> {
    pub(super) replica: &'a ReplicaState<S>,
    pub(super) inner: MutexGuard<'a, Inner<S>>,
    pub(super) access: PhantomData<A>,
}

/// The guard returned by `lock_for_read`. It has no mutators:
///
/// ```compile_fail
/// use tablet_raft::{InMemoryMetadataStore, ReplicaState, Term};
///
/// fn bump_term(replica: &ReplicaState<InMemoryMetadataStore>) {
///     let mut guard = replica.lock_for_read();
///     guard.set_current_term(Term::new(7)).unwrap();
/// }
/// ```
pub type ReplicaStateReadGuard<'a, S> = ReplicaStateGuard<'a, S, ReadOnly>;

impl<'a, S: ConsensusMetadataStore, A> ReplicaStateGuard<'a, S, A> {
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.inner.state
    }

    // ---------- Pending operations ----------

    pub fn is_op_committed_or_pending(&self, op_id: OpId) -> OpPresence {
        if op_id.index <= self.inner.last_committed_op_id.index {
            return OpPresence::CommittedOrPending;
        }
        match self.inner.pending.get(op_id.index) {
            None => OpPresence::Absent,
            Some(round) if round.op_id().term != op_id.term => OpPresence::TermMismatch,
            Some(_) => OpPresence::CommittedOrPending,
        }
    }

    pub fn pending_op_by_index(&self, index: u64) -> Option<&ConsensusRound> {
        self.inner.pending.get(index)
    }

    pub fn last_pending_op_id(&self) -> Option<OpId> {
        self.inner.pending.back_op_id()
    }

    pub fn num_pending_operations(&self) -> usize {
        self.inner.pending.len()
    }

    /// Logs every pending operation and returns their descriptions.
    pub fn dump_pending_operations(&self) -> Vec<String> {
        slog::info!(self.replica.logger, "Dumping {} pending operations", self.inner.pending.len());
        self.inner
            .pending
            .iter()
            .map(|round| {
                let description = format!("{:?}", round);
                slog::info!(self.replica.logger, "Pending: {}", description);
                description
            })
            .collect()
    }

    pub fn last_received_op_id(&self) -> OpId {
        self.inner.last_received_op_id
    }

    pub fn last_received_op_id_current_leader(&self) -> OpId {
        self.inner.last_received_op_id_current_leader
    }

    pub fn committed_op_id(&self) -> OpId {
        self.inner.last_committed_op_id
    }

    pub fn next_index(&self) -> u64 {
        self.inner.next_index
    }

    pub fn split_op_id(&self) -> Option<OpId> {
        self.inner.split_op_id
    }

    pub fn pending_election_op_id(&self) -> Option<OpId> {
        self.inner.pending_election_op_id
    }

    // ---------- Term, vote and leader ----------

    pub fn current_term(&self) -> Term {
        self.inner.term_and_vote.current_term()
    }

    pub fn has_voted_current_term(&self) -> bool {
        self.inner.term_and_vote.voted_for().is_some()
    }

    pub fn voted_for_current_term(&self) -> Option<&PeerId> {
        self.inner.term_and_vote.voted_for()
    }

    pub fn are_committed_and_current_terms_same(&self) -> bool {
        self.inner.last_committed_op_id.term == self.inner.term_and_vote.current_term()
    }

    pub fn has_leader(&self) -> bool {
        self.inner.term_and_vote.leader_uuid().is_some()
    }

    pub fn leader_uuid(&self) -> Option<&PeerId> {
        self.inner.term_and_vote.leader_uuid()
    }

    pub fn active_role(&self) -> RaftRole {
        self.inner.role(&self.replica.peer_id)
    }

    pub fn leader_no_op_committed(&self) -> bool {
        self.inner.leader_no_op_committed
    }

    // ---------- Config ----------

    pub fn active_config(&self) -> &RaftConfig {
        self.inner.config.active()
    }

    pub fn committed_config(&self) -> &RaftConfig {
        self.inner.config.committed()
    }

    pub fn pending_config(&self) -> Option<&RaftConfig> {
        self.inner.config.pending()
    }

    pub fn is_config_change_pending(&self) -> bool {
        self.inner.config.is_change_pending()
    }

    pub fn check_no_config_change_pending(&self) -> Result<()> {
        match self.inner.config.pending() {
            None => Ok(()),
            Some(pending) => Err(ConsensusError::IllegalState(format!(
                "A config change is already pending: {}. Committed config: {}",
                pending,
                self.inner.config.committed()
            ))),
        }
    }

    pub fn consensus_state(&self, config_type: ConfigType) -> ConsensusState {
        let config = match config_type {
            ConfigType::Active => self.inner.config.active(),
            ConfigType::Committed => self.inner.config.committed(),
        };
        ConsensusState {
            current_term: self.inner.term_and_vote.current_term(),
            leader_uuid: self.inner.term_and_vote.leader_uuid().cloned(),
            config: config.clone(),
        }
    }

    // ---------- Leases ----------
    //
    // Status queries take `&mut self` because an old leader's lease is forgotten the first time
    // it is seen to have expired.

    pub fn leader_lease_status(&mut self) -> LeaderLeaseStatus {
        self.leader_lease_status_at(self.replica.clock.now()).0
    }

    pub fn hybrid_time_lease_status(&mut self, micros_time: MicrosTime) -> LeaderLeaseStatus {
        if !self.replica.options.use_hybrid_time_leases || self.is_single_peer() {
            return LeaderLeaseStatus::HasLease;
        }
        self.inner.leases.ht_status_at(micros_time)
    }

    pub fn remaining_old_leader_lease_duration(&mut self) -> Option<Duration> {
        let now = self.replica.clock.now();
        self.inner.leases.remaining_old_leader_lease(now)
    }

    pub fn old_leader_lease(&self) -> Option<&CoarseTimeLease> {
        self.inner.leases.old_leader_lease()
    }

    pub fn old_leader_ht_lease(&self) -> Option<&PhysicalComponentLease> {
        self.inner.leases.old_leader_ht_lease()
    }

    pub fn majority_replicated_leader_lease_expired(&self) -> bool {
        self.inner.leases.majority_replicated_lease_expired(self.replica.clock.now())
    }

    pub fn majority_replicated_ht_lease_expired_at(&self, micros_time: MicrosTime) -> bool {
        self.inner.leases.majority_replicated_ht_lease_expired_at(micros_time)
    }

    pub fn majority_replicated_lease_expiration(&self) -> Option<CoarseTimePoint> {
        self.inner.leases.majority_replicated_lease_expiration()
    }

    // ---------- Leader state ----------

    pub fn leader_state(&mut self, mode: LeaderLeaseCheckMode) -> LeaderState {
        let now = self.replica.clock.now();
        self.compute_leader_state(mode, now).0
    }

    /// Ok only for a leader that is ready in `mode`. A non-leader gets `IllegalState`.
    pub fn check_active_leader(&mut self, mode: LeaderLeaseCheckMode) -> Result<()> {
        let state = self.leader_state(mode);
        if state.status == LeaderStatus::NotLeader {
            return Err(ConsensusError::IllegalState(format!(
                "Replica {} is not leader of this config. Role: {:?}. Consensus state: {}",
                self.replica.peer_id,
                self.active_role(),
                self.consensus_state(ConfigType::Active)
            )));
        }

        state.create_status()
    }

    pub fn refresh_leader_state_cache(&mut self) {
        let now = self.replica.clock.now();
        let (state, expire_at) = self.compute_leader_state(LeaderLeaseCheckMode::NeedLease, now);
        self.replica.leader_state_cache.store(state, expire_at);
    }

    // The cache entry built from the returned state stays valid until the returned instant, or
    // until the next state transition if there is none.
    fn compute_leader_state(
        &mut self,
        mode: LeaderLeaseCheckMode,
        now: CoarseTimePoint,
    ) -> (LeaderState, Option<CoarseTimePoint>) {
        if self.active_role() != RaftRole::Leader {
            return (LeaderState::not_ready(LeaderStatus::NotLeader), None);
        }
        if !self.inner.leader_no_op_committed {
            return (LeaderState::not_ready(LeaderStatus::LeaderButNoOpNotCommitted), None);
        }

        let term = self.inner.term_and_vote.current_term();
        if mode == LeaderLeaseCheckMode::DontNeedLease {
            return (LeaderState::ready(term), None);
        }

        match self.leader_lease_status_at(now) {
            (LeaderLeaseStatus::OldLeaderMayHaveLease, remaining) => {
                let remaining = remaining.unwrap_or_default();
                (LeaderState::old_leader_may_have_lease(remaining), Some(now + remaining))
            }
            (LeaderLeaseStatus::NoMajorityReplicatedLease, _) => (
                LeaderState::not_ready(LeaderStatus::LeaderButNoMajorityReplicatedLease),
                None,
            ),
            (LeaderLeaseStatus::HasLease, _) => {
                let expire_at = if self.leases_apply() {
                    self.inner.leases.majority_replicated_lease_expiration()
                } else {
                    None
                };
                (LeaderState::ready(term), expire_at)
            }
        }
    }

    fn leader_lease_status_at(&mut self, now: CoarseTimePoint) -> (LeaderLeaseStatus, Option<Duration>) {
        if !self.leases_apply() {
            return (LeaderLeaseStatus::HasLease, None);
        }
        self.inner.leases.status(now)
    }

    // A single peer is always a majority of itself.
    fn leases_apply(&self) -> bool {
        self.replica.options.use_leader_leases && !self.is_single_peer()
    }

    fn is_single_peer(&self) -> bool {
        self.inner.config.active().peers.len() == 1
    }

    fn is_config_replay(&self, index: u64) -> bool {
        self.inner
            .config
            .committed()
            .opid_index
            .map_or(false, |committed_index| index <= committed_index)
    }

    fn invariant_violation(&self, msg: String) -> ConsensusError {
        if self.replica.options.fatal_on_invariant_violation {
            panic!("{}", msg);
        }

        slog::error!(self.replica.logger, "Invariant violation: {}", msg);
        ConsensusError::InvariantViolation(msg)
    }
}

impl<'a, S: ConsensusMetadataStore> ReplicaStateGuard<'a, S, ReadWrite> {
    // ---------- Lifecycle ----------

    /// Moves `Initialized -> Running`, seeding the received and committed watermarks from the
    /// last entry in the write-ahead log.
    pub fn start<L: Log>(&mut self, log: &L) -> Result<()> {
        if self.inner.state != LifecycleState::Initialized {
            return Err(ConsensusError::IllegalState(format!(
                "Cannot start replica in state {:?}",
                self.inner.state
            )));
        }

        let last_in_wal = log.last_op_id().map_err(ConsensusError::Persistence)?.unwrap_or(OpId::MIN);
        let current_term = self.inner.term_and_vote.current_term();
        if last_in_wal.term > current_term {
            return Err(self.invariant_violation(format!(
                "Last op in log {} is from a term later than the current term {}",
                last_in_wal, current_term
            )));
        }

        let inner = &mut *self.inner;
        inner.next_index = last_in_wal.index + 1;
        inner.last_received_op_id = last_in_wal;
        inner.last_committed_op_id = last_in_wal;
        inner.state = LifecycleState::Running;
        slog::info!(
            self.replica.logger,
            "Started. Last op in log: {}, term: {}",
            last_in_wal,
            current_term
        );

        self.replica.commit_notifier.notify_committed(last_in_wal);
        self.state_changed();
        Ok(())
    }

    /// Aborts every pending operation. Only allowed once shutdown has begun.
    pub fn cancel_pending_operations(&mut self) -> Result<()> {
        if self.inner.state != LifecycleState::ShuttingDown {
            return Err(ConsensusError::IllegalState(format!(
                "Can only cancel pending operations while shutting down. State: {:?}",
                self.inner.state
            )));
        }

        if !self.inner.pending.is_empty() {
            slog::info!(
                self.replica.logger,
                "Aborting {} pending operations on shutdown",
                self.inner.pending.len()
            );
        }
        let rounds = self.inner.pending.drain_all();
        for round in rounds {
            if let OperationType::ChangeConfig(_) = round.op_type() {
                self.clear_pending_config_at(round.op_id().index);
            }
            round.notify_replication_finished(
                Err(ConsensusError::Aborted("Operation aborted by shutdown".to_string())),
                None,
            );
        }

        Ok(())
    }

    /// Drains what is left pending and moves `ShuttingDown -> ShutDown`.
    pub fn shutdown(&mut self) -> Result<()> {
        self.cancel_pending_operations()?;

        self.inner.state = LifecycleState::ShutDown;
        slog::info!(self.replica.logger, "Shut down");
        self.state_changed();
        Ok(())
    }

    // ---------- Pending operations ----------

    /// Generates the id for an operation this leader is about to replicate.
    pub fn new_id(&mut self) -> OpId {
        let id = OpId {
            term: self.inner.term_and_vote.current_term(),
            index: self.inner.next_index,
        };
        self.inner.next_index += 1;
        id
    }

    /// Gives back the id of an operation that failed to be replicated right after `new_id()`.
    /// If the operation was already added as pending it is removed and aborted.
    pub fn cancel_pending_operation(&mut self, id: OpId, should_exist: bool) -> Result<()> {
        let current_term = self.inner.term_and_vote.current_term();
        if id.term != current_term || self.inner.next_index != id.index + 1 {
            return Err(ConsensusError::IllegalState(format!(
                "Can only cancel the most recently generated id. Id: {}, current term: {}, next index: {}",
                id, current_term, self.inner.next_index
            )));
        }

        let removed = self.inner.pending.pop_back_if(id);
        debug_assert_eq!(
            removed.is_some(),
            should_exist,
            "Pending operation {} existence mismatch",
            id
        );

        let inner = &mut *self.inner;
        inner.next_index = id.index;
        let previous = inner.pending.back_op_id().unwrap_or(inner.last_committed_op_id);
        inner.last_received_op_id = previous;
        if inner.last_received_op_id_current_leader.index > previous.index {
            inner.last_received_op_id_current_leader = previous;
        }

        if let Some(round) = removed {
            if let OperationType::ChangeConfig(_) = round.op_type() {
                self.clear_pending_config_at(id.index);
            }
            if self.inner.split_op_id == Some(id) {
                self.inner.split_op_id = None;
            }
            round.notify_replication_finished(Err(ConsensusError::Aborted("Operation cancelled".to_string())), None);
        }

        Ok(())
    }

    /// Tracks `round` as pending. Its id must directly follow the last pending (or committed)
    /// op. A rejected round is dropped, which notifies it as aborted.
    pub fn add_pending_operation(&mut self, round: ConsensusRound) -> Result<()> {
        let op_id = round.op_id();
        if self.inner.state != LifecycleState::Running {
            return Err(ConsensusError::IllegalState(format!(
                "Cannot add pending operation {}. Replica is not in running state: {:?}",
                op_id, self.inner.state
            )));
        }

        let previous = self.inner.pending.back_op_id().unwrap_or(self.inner.last_committed_op_id);
        if let Err(msg) = OpId::check_in_sequence(previous, op_id) {
            return Err(self.invariant_violation(msg));
        }

        let mut new_pending_config = None;
        let mut new_split_op_id = None;
        match round.op_type() {
            OperationType::ChangeConfig(config) => {
                let new_config = config.clone().with_opid_index(op_id.index);
                let already_pending = self.inner.config.pending() == Some(&new_config);
                if !already_pending {
                    if self.is_config_replay(op_id.index) {
                        slog::warn!(
                            self.replica.logger,
                            "Not setting replayed config change {} as pending. Committed config: {}",
                            new_config,
                            self.inner.config.committed()
                        );
                    } else {
                        self.check_no_config_change_pending()?;
                        new_pending_config = Some(new_config);
                    }
                }
            }
            OperationType::Split { tablet_id } => {
                if tablet_id != &self.replica.tablet_id {
                    return Err(ConsensusError::InvalidArgument(format!(
                        "Split op {} for tablet {} added to tablet {}",
                        op_id, tablet_id, self.replica.tablet_id
                    )));
                }
                if let Some(split_op_id) = self.inner.split_op_id {
                    return Err(ConsensusError::IllegalState(format!(
                        "Split op {} already added, refusing split op {}",
                        split_op_id, op_id
                    )));
                }
                new_split_op_id = Some(op_id);
            }
            OperationType::NoOp | OperationType::Write => {}
        }

        if let Some(new_config) = new_pending_config {
            self.set_pending_config(new_config)?;
        }
        if new_split_op_id.is_some() {
            self.inner.split_op_id = new_split_op_id;
        }

        let current_term = self.inner.term_and_vote.current_term();
        let inner = &mut *self.inner;
        inner.last_received_op_id = op_id;
        if op_id.term == current_term {
            inner.last_received_op_id_current_leader = op_id;
        }
        inner.next_index = op_id.index + 1;
        slog::debug!(self.replica.logger, "Added pending operation {:?}", round);
        inner.pending.push_back(round);

        Ok(())
    }

    /// Aborts every pending operation with index greater than `index`. The op at `index` (or
    /// the last committed op, if that is what `index` is) becomes the last received op.
    pub fn abort_ops_after(&mut self, index: u64) -> Result<()> {
        let last_committed = self.inner.last_committed_op_id;
        if index < last_committed.index {
            return Err(ConsensusError::IllegalState(format!(
                "Cannot abort ops after {}, which is before the last committed op {}",
                index, last_committed
            )));
        }
        let new_last_received = if index == last_committed.index {
            last_committed
        } else {
            match self.inner.pending.get(index) {
                Some(round) => round.op_id(),
                None => {
                    return Err(ConsensusError::IllegalState(format!(
                        "No pending operation at index {} to abort after",
                        index
                    )))
                }
            }
        };

        let aborted = self.inner.pending.truncate_after(index);
        if !aborted.is_empty() {
            slog::info!(
                self.replica.logger,
                "Aborting {} operations after index {}",
                aborted.len(),
                index
            );
        }
        for round in aborted {
            let op_id = round.op_id();
            slog::debug!(self.replica.logger, "Aborting operation {:?}", round);
            if let OperationType::ChangeConfig(_) = round.op_type() {
                self.clear_pending_config_at(op_id.index);
            }
            if self.inner.split_op_id == Some(op_id) {
                self.inner.split_op_id = None;
            }
            round.notify_replication_finished(
                Err(ConsensusError::Aborted("Operation aborted by new leader".to_string())),
                None,
            );
        }

        debug_assert!(self.inner.pending.is_contiguous());
        let inner = &mut *self.inner;
        inner.last_received_op_id = new_last_received;
        if inner.last_received_op_id_current_leader.index > index {
            inner.last_received_op_id_current_leader = new_last_received;
        }
        inner.next_index = index + 1;

        self.state_changed();
        Ok(())
    }

    /// Leader side commit advancement once a majority has acknowledged up to `majority_replicated`.
    /// Returns the committed op id afterwards and whether it moved.
    pub fn update_majority_replicated(&mut self, majority_replicated: OpId) -> Result<(OpId, bool)> {
        match self.inner.state {
            LifecycleState::Running => {}
            LifecycleState::ShuttingDown | LifecycleState::ShutDown => {
                return Err(ConsensusError::ServiceUnavailable(
                    "Cannot advance commit. Replica is shutting down".to_string(),
                ))
            }
            state => {
                return Err(ConsensusError::IllegalState(format!(
                    "Cannot advance commit. Replica is not running: {:?}",
                    state
                )))
            }
        }

        // A leader only counts replicas for entries of its own term. Earlier entries commit
        // along with the first current-term entry that reaches a majority.
        let current_term = self.inner.term_and_vote.current_term();
        if majority_replicated.term != current_term {
            slog::debug!(
                self.replica.logger,
                "Majority replicated {} is not from the current term {}, not committing",
                majority_replicated,
                current_term
            );
            return Ok((self.inner.last_committed_op_id, false));
        }

        let candidate = match self.inner.pending.back_op_id() {
            None => return Ok((self.inner.last_committed_op_id, false)),
            Some(last_pending) => {
                let index = majority_replicated.index.min(last_pending.index);
                match self.inner.pending.get(index) {
                    Some(round) => round.op_id(),
                    None => return Ok((self.inner.last_committed_op_id, false)),
                }
            }
        };

        let changed = self.advance_committed_op_id(candidate, CouldStop::No)?;
        Ok((self.inner.last_committed_op_id, changed))
    }

    /// Applies every pending operation up to `committed_op_id`, in index order, and moves the
    /// committed watermark. Returns whether anything was applied.
    ///
    /// With `CouldStop::Yes` the walk stops at the first write once shutdown has begun. Writes
    /// left pending are aborted by the shutdown drain. While running it applies everything.
    ///
    /// If committing a config change fails, the walk stops at that op and it stays pending. Ops
    /// before it are still applied and the watermark covers them, yet the error is returned.
    pub fn advance_committed_op_id(&mut self, committed_op_id: OpId, could_stop: CouldStop) -> Result<bool> {
        if committed_op_id.index <= self.inner.last_committed_op_id.index {
            return Ok(false);
        }

        let mut applied = Vec::new();
        let mut result = Ok(());
        while let Some(round) = self.inner.pending.pop_front_up_to(committed_op_id.index) {
            let op_id = round.op_id();
            if could_stop == CouldStop::Yes
                && self.inner.state != LifecycleState::Running
                && round.op_type() == &OperationType::Write
            {
                slog::info!(self.replica.logger, "Stopped applying at {} because of shutdown", op_id);
                self.inner.pending.push_front(round);
                break;
            }

            let committed_config = match round.op_type() {
                OperationType::ChangeConfig(config) => Some(config.clone().with_opid_index(op_id.index)),
                _ => None,
            };
            if let Some(new_config) = committed_config {
                if self.is_config_replay(op_id.index) {
                    slog::warn!(
                        self.replica.logger,
                        "Skipping commit of replayed config change {}. Committed config: {}",
                        new_config,
                        self.inner.config.committed()
                    );
                } else if let Err(e) = self.set_committed_config(new_config) {
                    self.inner.pending.push_front(round);
                    result = Err(e);
                    break;
                }
            }

            if round.op_type() == &OperationType::NoOp
                && op_id.term == self.inner.term_and_vote.current_term()
                && self.active_role() == RaftRole::Leader
            {
                self.inner.leader_no_op_committed = true;
            }

            self.inner.last_committed_op_id = op_id;
            applied.push(round);
        }

        if applied.is_empty() {
            return result.map(|_| false);
        }

        let leader_term = self.leader_state(LeaderLeaseCheckMode::DontNeedLease).term;
        let applied_op_ids: Vec<OpId> = applied.iter().map(|round| round.op_id()).collect();
        for round in applied {
            slog::debug!(self.replica.logger, "Applying operation {:?}", round);
            round.notify_replication_finished(Ok(()), leader_term);
        }

        let last_committed = self.inner.last_committed_op_id;
        debug_assert!(self
            .inner
            .pending
            .front_op_id()
            .map_or(true, |front| front.index == last_committed.index + 1));
        self.replica.commit_notifier.notify_committed(last_committed);
        if let Some(tracker) = &self.replica.applied_ops_tracker {
            tracker(applied_op_ids.as_slice());
        }
        self.state_changed();

        result.map(|_| true)
    }

    pub fn reset_split_op_id(&mut self) {
        self.inner.split_op_id = None;
    }

    pub fn set_pending_election_op_id(&mut self, op_id: OpId) {
        self.inner.pending_election_op_id = Some(op_id);
    }

    pub fn clear_pending_election_op_id(&mut self) {
        self.inner.pending_election_op_id = None;
    }

    // ---------- Term, vote and leader ----------

    /// Moves to `new_term`, which must be greater than the current term. The new term is
    /// durable before it is visible, and it starts with no vote and no known leader.
    pub fn set_current_term(&mut self, new_term: Term) -> Result<()> {
        let record = self
            .inner
            .term_and_vote
            .stage_term(new_term, self.inner.config.committed())
            .map_err(ConsensusError::IllegalState)?;
        self.flush(&record)?;

        let inner = &mut *self.inner;
        let old_term = inner.term_and_vote.current_term();
        inner.term_and_vote.commit_term(new_term);
        inner.last_received_op_id_current_leader = OpId::MIN;
        inner.leader_no_op_committed = false;
        slog::info!(self.replica.logger, "Advanced term from {} to {}", old_term, new_term);

        self.state_changed();
        Ok(())
    }

    /// Records a vote for `candidate` in the current term, durably. Voting again for the same
    /// candidate is a no-op. A different candidate in the same term is refused.
    pub fn set_voted_for_current_term(&mut self, candidate: &PeerId) -> Result<()> {
        let staged = self
            .inner
            .term_and_vote
            .stage_vote(candidate, self.inner.config.committed())
            .map_err(ConsensusError::IllegalState)?;
        if let Some(record) = staged {
            self.flush(&record)?;
            self.inner.term_and_vote.commit_vote(candidate.clone());
            slog::info!(
                self.replica.logger,
                "Voted for {} in term {}",
                candidate,
                self.inner.term_and_vote.current_term()
            );
        }

        Ok(())
    }

    pub fn set_leader_uuid(&mut self, leader_uuid: PeerId) {
        slog::info!(self.replica.logger, "Recognized leader {}", leader_uuid);
        self.inner.term_and_vote.set_leader_uuid(Some(leader_uuid));
        self.state_changed();
    }

    pub fn clear_leader(&mut self) {
        self.inner.term_and_vote.set_leader_uuid(None);
        self.state_changed();
    }

    pub fn set_leader_no_op_committed(&mut self, value: bool) {
        self.inner.leader_no_op_committed = value;
        self.state_changed();
    }

    // ---------- Config ----------

    /// Proposes `new_config`. In memory only, and only when no other change is pending.
    pub fn set_pending_config(&mut self, new_config: RaftConfig) -> Result<()> {
        slog::info!(self.replica.logger, "Setting pending config {}", new_config);
        self.inner
            .config
            .set_pending(new_config)
            .map_err(ConsensusError::IllegalState)?;
        self.state_changed();
        Ok(())
    }

    pub fn clear_pending_config(&mut self) {
        if let Some(pending) = self.inner.config.clear_pending() {
            slog::info!(self.replica.logger, "Cleared pending config {}", pending);
            self.state_changed();
        }
    }

    /// Commits `new_config`, which must equal the pending config, durably.
    pub fn set_committed_config(&mut self, new_config: RaftConfig) -> Result<()> {
        self.inner
            .config
            .check_commit(&new_config)
            .map_err(ConsensusError::IllegalState)?;
        let record = self.inner.term_and_vote.record_with_config(&new_config);
        self.flush(&record)?;

        slog::info!(self.replica.logger, "Committed config {}", new_config);
        self.inner.config.commit(new_config);
        self.state_changed();
        Ok(())
    }

    // ---------- Leases ----------

    /// Called on a non-leader with the leases a leader advertised. This replica's own leases, if
    /// any, are dropped.
    pub fn update_old_leader_lease_expiration_on_non_leader(
        &mut self,
        lease: Option<CoarseTimeLease>,
        ht_lease: Option<PhysicalComponentLease>,
    ) {
        self.inner.leases.update_old_leader_leases_on_non_leader(lease, ht_lease);
        self.state_changed();
    }

    /// Extends this leader's own leases once `data` is majority replicated.
    pub fn set_majority_replicated_lease_expiration(
        &mut self,
        data: &MajorityReplicatedData,
        reset: OldLeaderLeaseReset,
    ) {
        self.inner.leases.set_majority_replicated(data, reset);
        self.state_changed();
    }

    // ---------- Helpers ----------

    // Waiters on the condition variable re-check role, leases, watermark and lifecycle, so every
    // transition wakes them before the cached leader state is rebuilt.
    fn state_changed(&mut self) {
        self.replica.cond.notify_all();
        self.refresh_leader_state_cache();
    }

    fn clear_pending_config_at(&mut self, index: u64) {
        let pending_index = self.inner.config.pending().and_then(|pending| pending.opid_index);
        if pending_index == Some(index) {
            self.clear_pending_config();
        }
    }

    fn flush(&mut self, record: &ConsensusMetadataRecord) -> Result<()> {
        if let Err(e) = self.inner.metadata_store.flush(record) {
            slog::error!(self.replica.logger, "Failed to flush consensus metadata: {:?}", e);
            return Err(ConsensusError::Persistence(e));
        }

        Ok(())
    }
}

impl<'a, S: ConsensusMetadataStore, A> fmt::Display for ReplicaStateGuard<'a, S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Replica: {}, State: {:?}, Role: {:?}, Term: {}, Watermarks: {{Received: {} Committed: {}}}, \
             Leader: {}, Pending operations: {}",
            self.replica.peer_id,
            self.inner.state,
            self.active_role(),
            self.inner.term_and_vote.current_term(),
            self.inner.last_received_op_id,
            self.inner.last_committed_op_id,
            self.inner.term_and_vote.leader_uuid().map(|p| p.as_str()).unwrap_or("-"),
            self.inner.pending.len()
        )
    }
}
