use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slog::Drain;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tablet_raft::{
    mocked_clock, ConfigType, ConsensusError, ConsensusMetadataRecord, ConsensusOptions, ConsensusRound, CouldStop,
    InMemoryLog, InMemoryMetadataStore, LeaderLeaseCheckMode, LeaderLeaseStatus, LeaderStatus, LifecycleState, Log,
    LogEntry, MajorityReplicatedData, MockClockController, OldLeaderLeaseReset, OpId, OpPresence, OperationType,
    PeerId, RaftConfig, RaftPeer, RaftRole, ReplicaState, ReplicaStateConfig, ReplicateMsg, ReplicationFinished,
    Term,
};
use tablet_raft::{CoarseTimeLease, PhysicalComponentLease};
use tokio::time::Duration;

const TABLET_ID: &str = "tablet-1";

#[derive(Clone, Debug, PartialEq)]
struct Outcome {
    op_id: OpId,
    applied: bool,
    leader_term: Option<Term>,
}

struct Harness {
    replica: Arc<ReplicaState<InMemoryMetadataStore>>,
    store: InMemoryMetadataStore,
    clock: MockClockController,
    outcomes: Arc<Mutex<Vec<Outcome>>>,
    applied_batches: Arc<Mutex<Vec<Vec<OpId>>>>,
}

impl Harness {
    /// Replica "a" of `peers`, at `term`, started from a log holding `log_len` entries of `term`.
    fn new(peers: &[&str], term: u64, log_len: u64) -> Self {
        Self::with_options(peers, term, log_len, non_fatal_options())
    }

    fn with_options(peers: &[&str], term: u64, log_len: u64, options: ConsensusOptions) -> Self {
        let mut record = ConsensusMetadataRecord::new(config(peers));
        record.current_term = Term::new(term);
        Self::with_record(record, log_len, options)
    }

    fn with_record(record: ConsensusMetadataRecord, log_len: u64, options: ConsensusOptions) -> Self {
        let store = InMemoryMetadataStore::with_record(record.clone());
        let (clock, controller) = mocked_clock();
        let applied_batches: Arc<Mutex<Vec<Vec<OpId>>>> = Arc::default();
        let tracker_batches = Arc::clone(&applied_batches);

        let replica = ReplicaState::new(ReplicaStateConfig {
            logger: create_root_logger(),
            options,
            tablet_id: TABLET_ID.to_string(),
            peer_id: PeerId::new("a"),
            metadata_store: store.clone(),
            clock: Arc::new(clock),
            applied_ops_tracker: Some(Box::new(move |ids: &[OpId]| {
                tracker_batches.lock().unwrap().push(ids.to_vec())
            })),
        })
        .unwrap();

        let mut log = InMemoryLog::new();
        for index in 1..=log_len {
            log.append(LogEntry::new(
                OpId::new(record.current_term.as_u64(), index),
                Bytes::from_static(b"entry"),
            ))
            .unwrap();
        }
        replica.lock_for_start().unwrap().start(&log).unwrap();

        Harness {
            replica: Arc::new(replica),
            store,
            clock: controller,
            outcomes: Arc::default(),
            applied_batches,
        }
    }

    fn round(&self, op_id: OpId, msg: ReplicateMsg) -> ConsensusRound {
        let outcomes = Arc::clone(&self.outcomes);
        ConsensusRound::new(op_id, msg, move |finished: ReplicationFinished| {
            outcomes.lock().unwrap().push(Outcome {
                op_id: finished.op_id,
                applied: finished.status.is_ok(),
                leader_term: finished.leader_term,
            });
        })
    }

    fn become_leader(&self) -> Term {
        let mut guard = self.replica.lock_for_update().unwrap();
        let term = guard.current_term().next();
        guard.set_current_term(term).unwrap();
        guard.set_leader_uuid(PeerId::new("a"));
        term
    }

    /// Becomes leader and commits the new term's no-op.
    fn establish_leadership(&self) -> Term {
        let term = self.become_leader();
        let no_op = self.replicate(ReplicateMsg::no_op());
        self.commit(no_op);
        term
    }

    fn replicate(&self, msg: ReplicateMsg) -> OpId {
        let mut guard = self.replica.lock_for_replicate(Some(&msg)).unwrap();
        let op_id = guard.new_id();
        guard.add_pending_operation(self.round(op_id, msg)).unwrap();
        op_id
    }

    fn follower_append(&self, op_id: OpId, msg: ReplicateMsg) -> tablet_raft::Result<()> {
        let mut guard = self.replica.lock_for_update()?;
        guard.add_pending_operation(self.round(op_id, msg))
    }

    fn commit(&self, majority_replicated: OpId) -> (OpId, bool) {
        self.replica
            .lock_for_majority_replicated_index_update()
            .unwrap()
            .update_majority_replicated(majority_replicated)
            .unwrap()
    }

    fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().unwrap().clone()
    }

    fn lease_data(&self, op_id: OpId, lease_secs: u64, ht_lease: u64) -> MajorityReplicatedData {
        MajorityReplicatedData {
            op_id,
            leader_lease_expiration: self.clock.at(Duration::from_secs(lease_secs)),
            ht_lease_expiration: ht_lease,
        }
    }
}

fn config(peers: &[&str]) -> RaftConfig {
    RaftConfig::new(peers.iter().map(|id| RaftPeer::voter(*id)).collect())
}

fn non_fatal_options() -> ConsensusOptions {
    ConsensusOptions {
        fatal_on_invariant_violation: Some(false),
        ..ConsensusOptions::default()
    }
}

fn write(value: &'static [u8]) -> ReplicateMsg {
    ReplicateMsg::write(Bytes::from_static(value))
}

fn outcome(op_id: OpId, applied: bool, leader_term: Option<Term>) -> Outcome {
    Outcome {
        op_id,
        applied,
        leader_term,
    }
}

fn create_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("Test" => "replica_state"))
}

fn unstarted_replica(term: u64) -> ReplicaState<InMemoryMetadataStore> {
    let mut record = ConsensusMetadataRecord::new(config(&["a", "b", "c"]));
    record.current_term = Term::new(term);
    let (clock, _controller) = mocked_clock();

    ReplicaState::new(ReplicaStateConfig {
        logger: create_root_logger(),
        options: non_fatal_options(),
        tablet_id: TABLET_ID.to_string(),
        peer_id: PeerId::new("a"),
        metadata_store: InMemoryMetadataStore::with_record(record),
        clock: Arc::new(clock),
        applied_ops_tracker: None,
    })
    .unwrap()
}

#[test]
fn start_seeds_watermarks_from_log() {
    let h = Harness::new(&["a", "b", "c"], 2, 3);

    let guard = h.replica.lock_for_read();
    assert_eq!(guard.lifecycle_state(), LifecycleState::Running);
    assert_eq!(guard.last_received_op_id(), OpId::new(2, 3));
    assert_eq!(guard.committed_op_id(), OpId::new(2, 3));
    assert_eq!(guard.next_index(), 4);
    drop(guard);

    assert_eq!(h.replica.subscribe_committed().last_committed(), OpId::new(2, 3));
    assert!(matches!(h.replica.lock_for_start(), Err(ConsensusError::IllegalState(_))));
}

#[test]
fn gateways_refuse_before_start() {
    let replica = unstarted_replica(1);

    assert!(matches!(replica.lock_for_update(), Err(ConsensusError::IllegalState(_))));
    assert!(matches!(replica.lock_for_config_change(), Err(ConsensusError::IllegalState(_))));
    assert!(matches!(replica.lock_for_replicate(None), Err(ConsensusError::IllegalState(_))));
    assert_eq!(replica.lock_for_read().lifecycle_state(), LifecycleState::Initialized);
}

#[test]
fn start_rejects_log_ahead_of_current_term() {
    let replica = unstarted_replica(1);
    let mut log = InMemoryLog::new();
    log.append(LogEntry::new(OpId::new(2, 1), Bytes::from_static(b"entry")))
        .unwrap();

    let result = replica.lock_for_start().unwrap().start(&log);
    assert!(matches!(result, Err(ConsensusError::InvariantViolation(_))));
    assert_eq!(replica.lock_for_read().lifecycle_state(), LifecycleState::Initialized);
}

#[test]
fn abort_ops_after_trims_tail() {
    let h = Harness::new(&["a", "b", "c"], 1, 5);
    for index in 6..=8 {
        h.follower_append(OpId::new(1, index), write(b"w")).unwrap();
    }

    let mut guard = h.replica.lock_for_update().unwrap();
    guard.abort_ops_after(6).unwrap();

    assert_eq!(guard.last_received_op_id(), OpId::new(1, 6));
    assert_eq!(guard.num_pending_operations(), 1);
    assert_eq!(guard.committed_op_id(), OpId::new(1, 5));
    // Aborting again is a no-op.
    guard.abort_ops_after(6).unwrap();
    drop(guard);

    assert_eq!(
        h.outcomes(),
        vec![
            outcome(OpId::new(1, 7), false, None),
            outcome(OpId::new(1, 8), false, None),
        ]
    );
}

#[test]
fn abort_ops_after_rejects_committed_or_unknown_index() {
    let h = Harness::new(&["a", "b", "c"], 1, 5);
    h.follower_append(OpId::new(1, 6), write(b"w")).unwrap();

    let mut guard = h.replica.lock_for_update().unwrap();
    assert!(matches!(guard.abort_ops_after(4), Err(ConsensusError::IllegalState(_))));
    assert!(matches!(guard.abort_ops_after(9), Err(ConsensusError::IllegalState(_))));

    guard.abort_ops_after(5).unwrap();
    assert_eq!(guard.last_received_op_id(), OpId::new(1, 5));
    assert_eq!(guard.num_pending_operations(), 0);
}

#[test]
fn majority_replicated_commits_prefix_in_order() {
    let h = Harness::new(&["a", "b", "c"], 1, 5);
    let term = h.become_leader();
    let ids: Vec<OpId> = (0..3).map(|_| h.replicate(write(b"w"))).collect();
    assert_eq!(ids[0], OpId::new(term.as_u64(), 6));

    let (committed, changed) = h.commit(OpId::new(term.as_u64(), 7));

    assert!(changed);
    assert_eq!(committed, ids[1]);
    assert_eq!(
        h.outcomes(),
        vec![outcome(ids[0], true, None), outcome(ids[1], true, None)]
    );
    let guard = h.replica.lock_for_read();
    assert_eq!(guard.num_pending_operations(), 1);
    assert_eq!(guard.pending_op_by_index(8).map(|r| r.op_id()), Some(ids[2]));
    assert_eq!(*h.applied_batches.lock().unwrap(), vec![vec![ids[0], ids[1]]]);
}

#[test]
fn majority_replicated_from_previous_term_does_not_commit() {
    let h = Harness::new(&["a", "b", "c"], 1, 5);
    h.follower_append(OpId::new(1, 6), write(b"w")).unwrap();
    h.become_leader();

    let (committed, changed) = h.commit(OpId::new(1, 6));
    assert!(!changed);
    assert_eq!(committed, OpId::new(1, 5));

    // The current term's no-op carries the earlier entry with it.
    let no_op = h.replicate(ReplicateMsg::no_op());
    let (committed, changed) = h.commit(no_op);
    assert!(changed);
    assert_eq!(committed, no_op);
    assert_eq!(h.outcomes().len(), 2);
    assert!(h.replica.lock_for_read().leader_no_op_committed());
}

#[test]
fn majority_replicated_is_capped_by_last_pending() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    let term = h.become_leader();
    let id = h.replicate(write(b"w"));

    let (committed, changed) = h.commit(OpId::new(term.as_u64(), 10));
    assert!(changed);
    assert_eq!(committed, id);
}

#[test]
fn lease_status_waits_out_old_leader() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.replica.lock_for_update().unwrap().update_old_leader_lease_expiration_on_non_leader(
        Some(CoarseTimeLease {
            holder_uuid: PeerId::new("b"),
            expiration: h.clock.at(Duration::from_secs(100)),
        }),
        None,
    );
    let no_op = {
        h.become_leader();
        h.replicate(ReplicateMsg::no_op())
    };

    h.clock.set_elapsed(Duration::from_secs(90));
    let mut guard = h.replica.lock_for_majority_replicated_index_update().unwrap();
    assert_eq!(guard.leader_lease_status(), LeaderLeaseStatus::OldLeaderMayHaveLease);
    assert_eq!(guard.remaining_old_leader_lease_duration(), Some(Duration::from_secs(10)));

    h.clock.set_elapsed(Duration::from_secs(101));
    guard.set_majority_replicated_lease_expiration(&h.lease_data(no_op, 50, 0), OldLeaderLeaseReset::none());
    assert_eq!(guard.leader_lease_status(), LeaderLeaseStatus::NoMajorityReplicatedLease);

    guard.set_majority_replicated_lease_expiration(&h.lease_data(no_op, 200, 0), OldLeaderLeaseReset::none());
    assert_eq!(guard.leader_lease_status(), LeaderLeaseStatus::HasLease);
    assert!(!guard.majority_replicated_leader_lease_expired());
}

#[test]
fn majority_replicated_lease_never_regresses() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();
    let no_op = h.replicate(ReplicateMsg::no_op());

    let mut guard = h.replica.lock_for_majority_replicated_index_update().unwrap();
    guard.set_majority_replicated_lease_expiration(&h.lease_data(no_op, 200, 9_000), OldLeaderLeaseReset::both());
    guard.set_majority_replicated_lease_expiration(&h.lease_data(no_op, 150, 8_000), OldLeaderLeaseReset::none());

    assert_eq!(
        guard.majority_replicated_lease_expiration(),
        Some(h.clock.at(Duration::from_secs(200)))
    );
    assert!(!guard.majority_replicated_ht_lease_expired_at(8_500));
    assert!(guard.majority_replicated_ht_lease_expired_at(9_000));
}

#[test]
fn stepping_down_drops_own_lease() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();
    let no_op = h.replicate(ReplicateMsg::no_op());

    let mut guard = h.replica.lock_for_update().unwrap();
    guard.set_majority_replicated_lease_expiration(&h.lease_data(no_op, 200, 9_000), OldLeaderLeaseReset::both());
    guard.clear_leader();
    guard.update_old_leader_lease_expiration_on_non_leader(
        None,
        Some(PhysicalComponentLease {
            holder_uuid: PeerId::new("b"),
            expiration: 4_000,
        }),
    );

    assert!(guard.majority_replicated_leader_lease_expired());
    assert_eq!(guard.old_leader_ht_lease().map(|l| l.expiration), Some(4_000));
    assert_eq!(guard.hybrid_time_lease_status(3_000), LeaderLeaseStatus::OldLeaderMayHaveLease);
}

#[test]
fn replicate_refused_while_shutting_down() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();
    drop(h.replica.lock_for_shutdown().unwrap());

    let msg = write(b"w");
    assert!(matches!(
        h.replica.lock_for_replicate(Some(&msg)),
        Err(ConsensusError::IllegalState(_))
    ));
    let guard = h.replica.lock_for_read();
    assert_eq!(guard.num_pending_operations(), 0);
    assert_eq!(guard.last_received_op_id(), OpId::MIN);
}

#[test]
fn replicate_refuses_malformed_message() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();

    let msg = ReplicateMsg::new(
        OperationType::ChangeConfig(config(&["a", "b"]).with_opid_index(3)),
        Bytes::new(),
    );
    assert!(matches!(
        h.replica.lock_for_replicate(Some(&msg)),
        Err(ConsensusError::IllegalState(_))
    ));
    assert!(h.replica.lock_for_replicate(None).is_ok());
}

#[test]
fn term_is_monotonic_and_durable() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    let mut guard = h.replica.lock_for_update().unwrap();

    guard.set_current_term(Term::new(2)).unwrap();
    assert!(matches!(guard.set_current_term(Term::new(2)), Err(ConsensusError::IllegalState(_))));
    assert!(guard.set_current_term(Term::new(1)).is_err());

    assert_eq!(guard.current_term(), Term::new(2));
    assert_eq!(h.store.persisted().current_term, Term::new(2));
}

#[test]
fn vote_is_exclusive_per_term() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    let mut guard = h.replica.lock_for_update().unwrap();
    let b = PeerId::new("b");

    guard.set_voted_for_current_term(&b).unwrap();
    let flushes = h.store.flush_count();
    guard.set_voted_for_current_term(&b).unwrap();
    assert_eq!(h.store.flush_count(), flushes);
    assert!(guard.set_voted_for_current_term(&PeerId::new("c")).is_err());
    assert_eq!(guard.voted_for_current_term(), Some(&b));
    assert_eq!(h.store.persisted().voted_for, Some(b));

    guard.set_current_term(Term::new(2)).unwrap();
    assert!(!guard.has_voted_current_term());
    assert_eq!(h.store.persisted().voted_for, None);
}

#[test]
fn persistence_failure_leaves_state_untouched() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    let mut guard = h.replica.lock_for_update().unwrap();

    h.store.fail_next_flushes(1);
    assert!(matches!(guard.set_current_term(Term::new(5)), Err(ConsensusError::Persistence(_))));
    assert_eq!(guard.current_term(), Term::new(1));
    assert_eq!(h.store.persisted().current_term, Term::new(1));

    h.store.fail_next_flushes(1);
    assert!(guard.set_voted_for_current_term(&PeerId::new("b")).is_err());
    assert!(!guard.has_voted_current_term());

    guard.set_current_term(Term::new(5)).unwrap();
    assert_eq!(h.store.persisted().current_term, Term::new(5));
}

#[test]
fn config_change_applies_on_commit() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.establish_leadership();
    let new_config = config(&["a", "b"]);

    let op_id = {
        let msg = ReplicateMsg::new(OperationType::ChangeConfig(new_config.clone()), Bytes::new());
        let mut guard = h.replica.lock_for_config_change().unwrap();
        let op_id = guard.new_id();
        guard.add_pending_operation(h.round(op_id, msg)).unwrap();
        assert_eq!(guard.pending_config(), Some(&new_config.clone().with_opid_index(op_id.index)));
        assert_eq!(guard.active_config().peers.len(), 2);
        op_id
    };
    // Only one change at a time.
    assert!(h.replica.lock_for_config_change().is_err());

    h.commit(op_id);

    let expected = new_config.with_opid_index(op_id.index);
    let guard = h.replica.lock_for_read();
    assert!(!guard.is_config_change_pending());
    assert_eq!(guard.committed_config(), &expected);
    assert_eq!(h.store.persisted().committed_config, expected);
    assert_eq!(guard.consensus_state(ConfigType::Committed).config, expected);
}

#[test]
fn config_commit_persistence_failure_keeps_op_pending() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.establish_leadership();
    let msg = ReplicateMsg::new(OperationType::ChangeConfig(config(&["a", "b"])), Bytes::new());
    let op_id = h.replicate(msg);

    h.store.fail_next_flushes(1);
    let result = h
        .replica
        .lock_for_majority_replicated_index_update()
        .unwrap()
        .update_majority_replicated(op_id);
    assert!(matches!(result, Err(ConsensusError::Persistence(_))));
    {
        let guard = h.replica.lock_for_read();
        assert_eq!(guard.last_pending_op_id(), Some(op_id));
        assert!(guard.is_config_change_pending());
        assert!(guard.committed_op_id() < op_id);
    }

    let (committed, changed) = h.commit(op_id);
    assert!(changed);
    assert_eq!(committed, op_id);
    assert!(h.outcomes().iter().any(|o| o.op_id == op_id && o.applied));
}

#[test]
fn aborted_config_change_clears_pending() {
    let h = Harness::new(&["a", "b", "c"], 1, 2);
    h.follower_append(
        OpId::new(1, 3),
        ReplicateMsg::new(OperationType::ChangeConfig(config(&["a", "b"])), Bytes::new()),
    )
    .unwrap();
    assert!(h.replica.lock_for_read().is_config_change_pending());

    h.replica.lock_for_update().unwrap().abort_ops_after(2).unwrap();
    assert!(!h.replica.lock_for_read().is_config_change_pending());
}

#[test]
fn replayed_config_change_is_skipped() {
    let mut record = ConsensusMetadataRecord::new(config(&["a", "b"]).with_opid_index(7));
    record.current_term = Term::new(1);
    let h = Harness::with_record(record, 5, non_fatal_options());

    h.follower_append(
        OpId::new(1, 6),
        ReplicateMsg::new(OperationType::ChangeConfig(config(&["a", "b", "c"])), Bytes::new()),
    )
    .unwrap();
    assert!(!h.replica.lock_for_read().is_config_change_pending());

    h.replica
        .lock_for_update()
        .unwrap()
        .advance_committed_op_id(OpId::new(1, 6), CouldStop::No)
        .unwrap();
    let guard = h.replica.lock_for_read();
    assert_eq!(guard.committed_config(), &config(&["a", "b"]).with_opid_index(7));
    assert_eq!(guard.committed_op_id(), OpId::new(1, 6));
}

#[test]
fn could_stop_while_running_applies_everything() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    for index in 1..=3 {
        h.follower_append(OpId::new(1, index), write(b"w")).unwrap();
    }

    let mut guard = h.replica.lock_for_update().unwrap();
    assert!(guard
        .advance_committed_op_id(OpId::new(1, 3), CouldStop::Yes)
        .unwrap());
    assert_eq!(guard.committed_op_id(), OpId::new(1, 3));
    assert_eq!(guard.num_pending_operations(), 0);
    drop(guard);

    assert!(h.outcomes().iter().all(|o| o.applied));
    assert_eq!(h.outcomes().len(), 3);
}

#[test]
fn config_commit_failure_keeps_ops_applied_before_it() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.follower_append(OpId::new(1, 1), write(b"w")).unwrap();
    h.follower_append(
        OpId::new(1, 2),
        ReplicateMsg::new(OperationType::ChangeConfig(config(&["a", "b"])), Bytes::new()),
    )
    .unwrap();

    h.store.fail_next_flushes(1);
    let result = h
        .replica
        .lock_for_update()
        .unwrap()
        .advance_committed_op_id(OpId::new(1, 2), CouldStop::No);
    assert!(matches!(result, Err(ConsensusError::Persistence(_))));

    let guard = h.replica.lock_for_read();
    assert_eq!(guard.committed_op_id(), OpId::new(1, 1));
    assert_eq!(guard.last_pending_op_id(), Some(OpId::new(1, 2)));
    assert!(guard.is_config_change_pending());
    drop(guard);
    assert_eq!(h.outcomes(), vec![outcome(OpId::new(1, 1), true, None)]);
    assert_eq!(*h.applied_batches.lock().unwrap(), vec![vec![OpId::new(1, 1)]]);
    assert_eq!(h.replica.subscribe_committed().last_committed(), OpId::new(1, 1));
}

#[test]
fn out_of_sequence_op_is_reported() {
    let h = Harness::new(&["a", "b", "c"], 1, 5);

    let result = h.follower_append(OpId::new(1, 7), write(b"w"));
    assert!(matches!(result, Err(ConsensusError::InvariantViolation(_))));
    // Rejected round is resolved as aborted.
    assert_eq!(h.outcomes(), vec![outcome(OpId::new(1, 7), false, None)]);
    assert_eq!(h.replica.lock_for_read().num_pending_operations(), 0);
}

#[test]
#[should_panic]
fn out_of_sequence_op_is_fatal_when_configured() {
    let options = ConsensusOptions {
        fatal_on_invariant_violation: Some(true),
        ..ConsensusOptions::default()
    };
    let h = Harness::with_options(&["a", "b", "c"], 1, 5, options);

    let _ = h.follower_append(OpId::new(1, 5), write(b"w"));
}

#[test]
fn split_op_tracking() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    let split = |tablet_id: &str| {
        ReplicateMsg::new(
            OperationType::Split {
                tablet_id: tablet_id.to_string(),
            },
            Bytes::new(),
        )
    };

    assert!(matches!(
        h.follower_append(OpId::new(1, 1), split("other-tablet")),
        Err(ConsensusError::InvalidArgument(_))
    ));
    h.follower_append(OpId::new(1, 1), split(TABLET_ID)).unwrap();
    assert_eq!(h.replica.lock_for_read().split_op_id(), Some(OpId::new(1, 1)));
    assert!(matches!(
        h.follower_append(OpId::new(1, 2), split(TABLET_ID)),
        Err(ConsensusError::IllegalState(_))
    ));

    // Applying leaves it set, aborting clears it.
    h.follower_append(OpId::new(1, 2), write(b"w")).unwrap();
    let mut guard = h.replica.lock_for_update().unwrap();
    guard.advance_committed_op_id(OpId::new(1, 1), CouldStop::No).unwrap();
    assert_eq!(guard.split_op_id(), Some(OpId::new(1, 1)));
    guard.reset_split_op_id();
    assert_eq!(guard.split_op_id(), None);
}

#[test]
fn op_presence() {
    let h = Harness::new(&["a", "b", "c"], 2, 3);
    h.follower_append(OpId::new(2, 4), write(b"w")).unwrap();

    let guard = h.replica.lock_for_read();
    assert_eq!(guard.is_op_committed_or_pending(OpId::new(2, 2)), OpPresence::CommittedOrPending);
    assert_eq!(guard.is_op_committed_or_pending(OpId::new(2, 4)), OpPresence::CommittedOrPending);
    assert_eq!(guard.is_op_committed_or_pending(OpId::new(1, 4)), OpPresence::TermMismatch);
    assert_eq!(guard.is_op_committed_or_pending(OpId::new(2, 5)), OpPresence::Absent);
    assert_eq!(guard.dump_pending_operations().len(), 1);
}

#[test]
fn cancel_pending_operation_restores_id_generator() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    let term = h.become_leader();
    h.replicate(write(b"first"));

    let mut guard = h.replica.lock_for_replicate(None).unwrap();
    let id = guard.new_id();
    guard.add_pending_operation(h.round(id, write(b"second"))).unwrap();
    guard.cancel_pending_operation(id, true).unwrap();

    assert_eq!(guard.next_index(), id.index);
    assert_eq!(guard.last_received_op_id(), OpId::new(term.as_u64(), 1));
    assert_eq!(guard.new_id(), id);
    drop(guard);
    assert_eq!(h.outcomes(), vec![outcome(id, false, None)]);
}

#[test]
fn leader_state_follows_no_op_and_leases() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    assert_eq!(h.replica.get_leader_state(false).status, LeaderStatus::NotLeader);

    let term = h.become_leader();
    assert_eq!(
        h.replica.get_leader_state(false).status,
        LeaderStatus::LeaderButNoOpNotCommitted
    );
    assert!(matches!(
        h.replica
            .lock_for_read()
            .check_active_leader(LeaderLeaseCheckMode::DontNeedLease),
        Err(ConsensusError::LeaderNotReadyToServe(_))
    ));

    let no_op = h.replicate(ReplicateMsg::no_op());
    h.commit(no_op);
    assert_eq!(
        h.replica.get_leader_state(false).status,
        LeaderStatus::LeaderButNoMajorityReplicatedLease
    );
    assert!(h
        .replica
        .lock_for_read()
        .check_active_leader(LeaderLeaseCheckMode::DontNeedLease)
        .is_ok());

    h.replica
        .lock_for_majority_replicated_index_update()
        .unwrap()
        .set_majority_replicated_lease_expiration(&h.lease_data(no_op, 10, 0), OldLeaderLeaseReset::both());
    let state = h.replica.get_leader_state(false);
    assert_eq!(state.status, LeaderStatus::LeaderAndReady);
    assert_eq!(state.term, Some(term));

    // The cached answer is only reused until the lease it relied on expires.
    h.clock.set_elapsed(Duration::from_secs(10));
    assert_eq!(h.replica.get_leader_state(true).status, LeaderStatus::LeaderAndReady);
    assert_eq!(
        h.replica.get_leader_state(false).status,
        LeaderStatus::LeaderButNoMajorityReplicatedLease
    );
}

#[test]
fn single_peer_leader_needs_no_lease() {
    let h = Harness::new(&["a"], 1, 0);
    let term = h.establish_leadership();

    let state = h.replica.get_leader_state(false);
    assert!(state.is_ready());
    assert_eq!(state.term, Some(term));
    assert_eq!(h.replica.lock_for_read().active_role(), RaftRole::Leader);

    // Ops applied by a ready leader carry its term.
    let id = h.replicate(write(b"w"));
    h.commit(id);
    assert_eq!(h.outcomes().last(), Some(&outcome(id, true, Some(term))));
}

#[test]
fn old_leader_lease_blocks_leader_state() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.replica.lock_for_update().unwrap().update_old_leader_lease_expiration_on_non_leader(
        Some(CoarseTimeLease {
            holder_uuid: PeerId::new("b"),
            expiration: h.clock.at(Duration::from_secs(5)),
        }),
        None,
    );
    h.establish_leadership();

    let state = h.replica.get_leader_state(false);
    assert_eq!(state.status, LeaderStatus::LeaderButOldLeaderMayHaveLease);
    assert_eq!(state.remaining_old_leader_lease, Some(Duration::from_secs(5)));
    assert!(matches!(state.create_status(), Err(ConsensusError::LeaderHasNoLease(_))));

    h.clock.set_elapsed(Duration::from_secs(5));
    assert_eq!(
        h.replica.get_leader_state(false).status,
        LeaderStatus::LeaderButNoMajorityReplicatedLease
    );
}

#[test]
fn shutdown_drains_pending_operations() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    let term = h.become_leader();
    let ids: Vec<OpId> = (0..3).map(|_| h.replicate(write(b"w"))).collect();

    let mut guard = h.replica.lock_for_shutdown().unwrap();
    assert_eq!(guard.lifecycle_state(), LifecycleState::ShuttingDown);
    // Stops at the first write since shutdown has begun.
    assert!(!guard
        .advance_committed_op_id(OpId::new(term.as_u64(), 2), CouldStop::Yes)
        .unwrap());
    guard.shutdown().unwrap();
    assert_eq!(guard.lifecycle_state(), LifecycleState::ShutDown);
    assert_eq!(guard.num_pending_operations(), 0);
    drop(guard);

    let outcomes = h.outcomes();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| !o.applied));
    assert_eq!(outcomes.iter().map(|o| o.op_id).collect::<Vec<_>>(), ids);
    assert!(h.replica.lock_for_update().is_err());
}

#[test]
fn shut_down_replica_is_terminal() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();
    h.replica.lock_for_shutdown().unwrap().shutdown().unwrap();

    assert!(matches!(h.replica.lock_for_shutdown(), Err(ConsensusError::IllegalState(_))));
    assert!(matches!(h.replica.lock_for_start(), Err(ConsensusError::IllegalState(_))));
    assert!(matches!(h.replica.lock_for_update(), Err(ConsensusError::IllegalState(_))));
    assert!(matches!(h.replica.lock_for_config_change(), Err(ConsensusError::IllegalState(_))));
    assert!(matches!(h.replica.lock_for_replicate(None), Err(ConsensusError::IllegalState(_))));
    assert!(matches!(
        h.replica.lock_for_majority_replicated_index_update(),
        Err(ConsensusError::IllegalState(_))
    ));

    let guard = h.replica.lock_for_read();
    assert_eq!(guard.lifecycle_state(), LifecycleState::ShutDown);
    assert_eq!(guard.current_term(), Term::new(2));
    assert_eq!(h.store.persisted().current_term, Term::new(2));
}

#[test]
fn randomized_ops_resolve_exactly_once() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    let term = h.become_leader();
    let mut rng = StdRng::seed_from_u64(0x7ab1e7);
    let resolved: Arc<Mutex<HashMap<u64, usize>>> = Arc::default();
    let mut next_token = 0;

    for _ in 0..500 {
        match rng.gen_range(0..10) {
            0..=5 => {
                let token = next_token;
                next_token += 1;
                let resolved = Arc::clone(&resolved);
                let mut guard = h.replica.lock_for_replicate(None).unwrap();
                let id = guard.new_id();
                let round = ConsensusRound::new(id, write(b"w"), move |_| {
                    *resolved.lock().unwrap().entry(token).or_insert(0) += 1;
                });
                guard.add_pending_operation(round).unwrap();
            }
            6..=7 => {
                let (committed, received) = {
                    let guard = h.replica.lock_for_read();
                    (guard.committed_op_id().index, guard.last_received_op_id().index)
                };
                let index = rng.gen_range(committed..=received);
                h.commit(OpId::new(term.as_u64(), index));
            }
            _ => {
                let mut guard = h.replica.lock_for_update().unwrap();
                let committed = guard.committed_op_id().index;
                let received = guard.last_received_op_id().index;
                guard.abort_ops_after(rng.gen_range(committed..=received)).unwrap();
            }
        }

        let guard = h.replica.lock_for_read();
        let committed = guard.committed_op_id().index;
        let received = guard.last_received_op_id().index;
        assert!(committed <= received);
        assert_eq!(guard.num_pending_operations() as u64, received - committed);
        for index in committed + 1..=received {
            assert_eq!(guard.pending_op_by_index(index).map(|r| r.op_id().index), Some(index));
        }
    }

    let mut guard = h.replica.lock_for_shutdown().unwrap();
    guard.shutdown().unwrap();
    drop(guard);

    let resolved = resolved.lock().unwrap();
    assert_eq!(resolved.len(), next_token as usize);
    assert!(resolved.values().all(|count| *count == 1));
}

#[test]
fn wait_for_committed_index_wakes_on_commit() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();
    let replica = Arc::clone(&h.replica);
    let waiter = thread::spawn(move || replica.wait_for_committed_index(2, Duration::from_secs(10)));

    h.replicate(write(b"one"));
    let id = h.replicate(write(b"two"));
    h.commit(id);

    assert_eq!(waiter.join().unwrap().unwrap(), id);
}

#[test]
fn wait_for_committed_index_ends_on_shutdown() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    let replica = Arc::clone(&h.replica);
    let waiter = thread::spawn(move || replica.wait_for_committed_index(100, Duration::from_secs(10)));

    h.replica.lock_for_shutdown().unwrap().shutdown().unwrap();

    assert!(matches!(waiter.join().unwrap(), Err(ConsensusError::Aborted(_))));
}

#[test]
fn ht_lease_wait_returns_once_extended() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();
    let no_op = h.replicate(ReplicateMsg::no_op());
    let replica = Arc::clone(&h.replica);
    let waiter =
        thread::spawn(move || replica.majority_replicated_ht_lease_expiration(5_000, Duration::from_secs(10)));

    h.replica
        .lock_for_majority_replicated_index_update()
        .unwrap()
        .set_majority_replicated_lease_expiration(&h.lease_data(no_op, 10, 6_000), OldLeaderLeaseReset::both());

    assert_eq!(waiter.join().unwrap().unwrap(), 6_000);
}

#[test]
fn ht_lease_wait_fails_when_leadership_lost() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();
    let replica = Arc::clone(&h.replica);
    let waiter =
        thread::spawn(move || replica.majority_replicated_ht_lease_expiration(5_000, Duration::from_secs(10)));

    let mut guard = h.replica.lock_for_update().unwrap();
    let next = guard.current_term().next();
    guard.set_current_term(next).unwrap();
    drop(guard);

    assert!(matches!(waiter.join().unwrap(), Err(ConsensusError::IllegalState(_))));
}

#[test]
fn ht_lease_wait_fails_when_config_drops_leader() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();
    let started = Instant::now();
    let replica = Arc::clone(&h.replica);
    let waiter =
        thread::spawn(move || replica.majority_replicated_ht_lease_expiration(5_000, Duration::from_secs(10)));

    let mut guard = h.replica.lock_for_config_change().unwrap();
    guard.set_pending_config(config(&["b", "c"]).with_opid_index(1)).unwrap();
    assert_eq!(guard.active_role(), RaftRole::NonParticipant);
    drop(guard);

    assert!(matches!(waiter.join().unwrap(), Err(ConsensusError::IllegalState(_))));
    // Woken by the role change, not by the timeout.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn lease_extension_proposal_uses_configured_durations() {
    let options = ConsensusOptions {
        leader_lease_duration: Some(Duration::from_secs(3)),
        ht_lease_duration: Some(Duration::from_millis(1500)),
        ..non_fatal_options()
    };
    let h = Harness::with_options(&["a", "b", "c"], 1, 0, options);
    h.clock.set_hybrid_time_micros(1_000_000);

    let (lease, ht_lease) = h.replica.lease_extension_proposal();
    assert_eq!(lease, h.clock.current_time() + Duration::from_secs(3));
    assert_eq!(ht_lease, 2_500_000);
}

#[test]
fn consensus_state_and_display() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();
    let mut guard = h.replica.lock_for_config_change().unwrap();
    guard.set_pending_config(config(&["a", "b"]).with_opid_index(9)).unwrap();

    let active = guard.consensus_state(ConfigType::Active);
    assert_eq!(active.current_term, Term::new(2));
    assert_eq!(active.leader_uuid, Some(PeerId::new("a")));
    assert_eq!(active.config.peers.len(), 2);
    assert_eq!(guard.consensus_state(ConfigType::Committed).config.peers.len(), 3);
    assert!(guard.to_string().contains("Term: 2"));
    assert!(!guard.are_committed_and_current_terms_same());

    guard.clear_pending_config();
    assert!(guard.check_no_config_change_pending().is_ok());
}

#[test]
fn pending_election_op_id() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    let mut guard = h.replica.lock_for_update().unwrap();

    assert_eq!(guard.pending_election_op_id(), None);
    guard.set_pending_election_op_id(OpId::new(1, 4));
    assert_eq!(guard.pending_election_op_id(), Some(OpId::new(1, 4)));
    guard.clear_pending_election_op_id();
    assert_eq!(guard.pending_election_op_id(), None);
}

#[tokio::test]
async fn commit_listener_follows_watermark() {
    let h = Harness::new(&["a", "b", "c"], 1, 0);
    h.become_leader();
    let mut listener = h.replica.subscribe_committed();
    let waiter = tokio::spawn(async move { listener.wait_for_index(2).await });

    h.replicate(write(b"one"));
    let id = h.replicate(write(b"two"));
    h.commit(id);

    assert_eq!(waiter.await.unwrap(), Some(id));
}
