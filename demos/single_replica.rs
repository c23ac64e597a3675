use bytes::{Buf, BufMut, Bytes, BytesMut};
use slog::Drain;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tablet_raft::{
    ConsensusOptions, ConsensusRound, InMemoryLog, InMemoryMetadataStore, Log, LogEntry, OpId, PeerId, RaftConfig,
    RaftPeer, RealClock, ReplicaState, ReplicaStateConfig, ReplicateMsg,
};
use tokio::time::Duration;

type Accumulator = Arc<Mutex<HashMap<String, i64>>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let replica = ReplicaState::new(ReplicaStateConfig {
        logger: create_root_logger(),
        options: ConsensusOptions::default(),
        tablet_id: "demo-tablet".to_string(),
        peer_id: PeerId::new("id-1"),
        metadata_store: InMemoryMetadataStore::new(RaftConfig::new(vec![RaftPeer::voter("id-1")])),
        clock: Arc::new(RealClock::new()),
        applied_ops_tracker: None,
    })?;
    let mut log = InMemoryLog::new();
    replica.lock_for_start()?.start(&log)?;

    // Sole voter, so it wins its own election.
    {
        let mut guard = replica.lock_for_update()?;
        let term = guard.current_term().next();
        guard.set_current_term(term)?;
        guard.set_voted_for_current_term(replica.peer_id())?;
        guard.set_leader_uuid(replica.peer_id().clone());
    }

    let accumulator = Accumulator::default();
    let mut listener = replica.subscribe_committed();
    let mut last = propose(&replica, &mut log, ReplicateMsg::no_op(), &accumulator)?;
    for &(key, delta) in &[("k1", 100), ("k2", 100), ("k1", -101)] {
        last = propose(&replica, &mut log, ReplicateMsg::write(encode(key, delta)), &accumulator)?;
    }

    // A single peer's own append is already a majority.
    replica
        .lock_for_majority_replicated_index_update()?
        .update_majority_replicated(last)?;
    listener.wait_for_index(last.index).await;
    replica.wait_for_committed_index(last.index, Duration::from_secs(1))?;

    assert!(replica.get_leader_state(false).is_ready());
    {
        let values = accumulator.lock().unwrap();
        assert_eq!(values.get("k1"), Some(&-1));
        assert_eq!(values.get("k2"), Some(&100));
    }

    let mut guard = replica.lock_for_shutdown()?;
    guard.shutdown()?;
    println!("{}", guard);
    Ok(())
}

fn propose(
    replica: &ReplicaState<InMemoryMetadataStore>,
    log: &mut InMemoryLog,
    msg: ReplicateMsg,
    accumulator: &Accumulator,
) -> Result<OpId, Box<dyn Error>> {
    let mut guard = replica.lock_for_replicate(Some(&msg))?;
    let op_id = guard.new_id();
    log.append(LogEntry::new(op_id, msg.payload.clone()))?;

    let payload = msg.payload.clone();
    let accumulator = Arc::clone(accumulator);
    guard.add_pending_operation(ConsensusRound::new(op_id, msg, move |finished| {
        if finished.status.is_ok() && !payload.is_empty() {
            apply(&accumulator, payload);
        }
    }))?;

    Ok(op_id)
}

fn encode(key: &str, delta: i64) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + key.len() + 8);
    buf.put_u8(key.len() as u8);
    buf.put_slice(key.as_bytes());
    buf.put_i64(delta);
    buf.freeze()
}

fn apply(accumulator: &Accumulator, mut payload: Bytes) {
    let key_len = payload.get_u8() as usize;
    let key = String::from_utf8_lossy(&payload.split_to(key_len)).into_owned();
    let delta = payload.get_i64();

    *accumulator.lock().unwrap().entry(key).or_insert(0) += delta;
}

fn create_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
