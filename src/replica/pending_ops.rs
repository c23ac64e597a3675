use crate::oplog::{OpId, Term};
use crate::replica::replica_api::{
    ConsensusError, OperationType, ReplicateMsg, ReplicatedCallback, ReplicationFinished, Result,
};
use std::collections::VecDeque;
use std::fmt;

/// ConsensusRound is one raft log entry that was appended locally and waits for majority
/// commitment. Its callback is consumed by the first notification. A round that is dropped
/// without being resolved notifies as aborted, so every round is resolved exactly once.
pub struct ConsensusRound {
    op_id: OpId,
    msg: ReplicateMsg,
    callback: Option<ReplicatedCallback>,
}

impl ConsensusRound {
    pub fn new<F>(op_id: OpId, msg: ReplicateMsg, callback: F) -> Self
    where
        F: FnOnce(ReplicationFinished) + Send + 'static,
    {
        ConsensusRound {
            op_id,
            msg,
            callback: Some(Box::new(callback)),
        }
    }

    pub fn op_id(&self) -> OpId {
        self.op_id
    }

    pub fn op_type(&self) -> &OperationType {
        &self.msg.op_type
    }

    pub fn msg(&self) -> &ReplicateMsg {
        &self.msg
    }

    pub(crate) fn notify_replication_finished(mut self, status: Result<()>, leader_term: Option<Term>) {
        if let Some(callback) = self.callback.take() {
            callback(ReplicationFinished {
                op_id: self.op_id,
                leader_term,
                status,
            });
        }
    }
}

impl Drop for ConsensusRound {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(ReplicationFinished {
                op_id: self.op_id,
                leader_term: None,
                status: Err(ConsensusError::Aborted(
                    "Operation dropped before replication finished".to_string(),
                )),
            });
        }
    }
}

impl fmt::Debug for ConsensusRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} bytes)", self.op_id, self.msg.op_type.name(), self.msg.payload.len())
    }
}

/// PendingOperations is ordered by strictly increasing, contiguous index, so lookup by index is
/// an offset from the front and aborts are always a tail trim.
#[derive(Default)]
pub(crate) struct PendingOperations {
    rounds: VecDeque<ConsensusRound>,
}

impl PendingOperations {
    pub(crate) fn new() -> Self {
        PendingOperations::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.rounds.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub(crate) fn front_op_id(&self) -> Option<OpId> {
        self.rounds.front().map(|r| r.op_id)
    }

    pub(crate) fn back_op_id(&self) -> Option<OpId> {
        self.rounds.back().map(|r| r.op_id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ConsensusRound> {
        self.rounds.iter()
    }

    pub(crate) fn get(&self, index: u64) -> Option<&ConsensusRound> {
        let front_index = self.rounds.front()?.op_id.index;
        if index < front_index {
            return None;
        }

        self.rounds.get((index - front_index) as usize)
    }

    /// Caller must have checked the round is in sequence with `back_op_id()`.
    pub(crate) fn push_back(&mut self, round: ConsensusRound) {
        debug_assert!(
            self.back_op_id()
                .map_or(true, |back| OpId::check_in_sequence(back, round.op_id).is_ok()),
            "Pending operation {:?} out of sequence after {:?}",
            round.op_id,
            self.back_op_id()
        );
        self.rounds.push_back(round);
    }

    /// Puts back a round that was popped but could not be applied.
    pub(crate) fn push_front(&mut self, round: ConsensusRound) {
        self.rounds.push_front(round);
    }

    pub(crate) fn pop_front_up_to(&mut self, index: u64) -> Option<ConsensusRound> {
        match self.rounds.front() {
            Some(front) if front.op_id.index <= index => self.rounds.pop_front(),
            _ => None,
        }
    }

    /// Removes and returns every round with index strictly greater than `index`, in increasing
    /// index order.
    pub(crate) fn truncate_after(&mut self, index: u64) -> Vec<ConsensusRound> {
        let split_at = match self.rounds.front() {
            None => return vec![],
            Some(front) if index < front.op_id.index => 0,
            Some(front) => ((index - front.op_id.index + 1) as usize).min(self.rounds.len()),
        };

        self.rounds.split_off(split_at).into_iter().collect()
    }

    pub(crate) fn pop_back_if(&mut self, op_id: OpId) -> Option<ConsensusRound> {
        match self.rounds.back() {
            Some(back) if back.op_id == op_id => self.rounds.pop_back(),
            _ => None,
        }
    }

    pub(crate) fn drain_all(&mut self) -> Vec<ConsensusRound> {
        self.rounds.drain(..).collect()
    }

    pub(crate) fn is_contiguous(&self) -> bool {
        self.rounds
            .iter()
            .zip(self.rounds.iter().skip(1))
            .all(|(prev, next)| OpId::check_in_sequence(prev.op_id, next.op_id).is_ok())
    }
}
