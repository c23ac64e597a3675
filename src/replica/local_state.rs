use crate::oplog::Term;
use crate::replica::metadata::ConsensusMetadataRecord;
use crate::replica::peers::{PeerId, RaftConfig};

/// TermAndVoteTracker holds the current term, the vote cast in it, and the leader recognized in
/// it. Mutations are two-phase: `stage_*` validates and produces the record to persist, and the
/// matching `commit_*` is applied only once that record is durable. This keeps the in-memory
/// term from ever being observable ahead of the persisted one.
pub(crate) struct TermAndVoteTracker {
    current_term: Term,
    // Only meaningful for `current_term`.
    voted_for: Option<PeerId>,
    // Not persisted. Rediscovered from heartbeats after a restart.
    leader_uuid: Option<PeerId>,
}

impl TermAndVoteTracker {
    pub(crate) fn from_record(record: &ConsensusMetadataRecord) -> Self {
        TermAndVoteTracker {
            current_term: record.current_term,
            voted_for: record.voted_for.clone(),
            leader_uuid: None,
        }
    }

    pub(crate) fn current_term(&self) -> Term {
        self.current_term
    }

    pub(crate) fn voted_for(&self) -> Option<&PeerId> {
        self.voted_for.as_ref()
    }

    pub(crate) fn leader_uuid(&self) -> Option<&PeerId> {
        self.leader_uuid.as_ref()
    }

    pub(crate) fn set_leader_uuid(&mut self, leader_uuid: Option<PeerId>) {
        self.leader_uuid = leader_uuid;
    }

    /// Set current term to `new_term` iff it is larger than current term. The staged record
    /// carries no vote.
    pub(crate) fn stage_term(
        &self,
        new_term: Term,
        committed_config: &RaftConfig,
    ) -> Result<ConsensusMetadataRecord, String> {
        if new_term <= self.current_term {
            return Err(format!(
                "Cannot change term to a term that is lower than or equal to the current one. \
                 Current: {}, Proposed: {}",
                self.current_term, new_term
            ));
        }

        Ok(ConsensusMetadataRecord {
            current_term: new_term,
            voted_for: None,
            committed_config: committed_config.clone(),
        })
    }

    pub(crate) fn commit_term(&mut self, new_term: Term) {
        self.current_term = new_term;
        self.voted_for = None;
        self.leader_uuid = None;
    }

    /// Returns Ok(None) when the same vote was already recorded, so nothing needs persisting.
    pub(crate) fn stage_vote(
        &self,
        vote: &PeerId,
        committed_config: &RaftConfig,
    ) -> Result<Option<ConsensusMetadataRecord>, String> {
        match &self.voted_for {
            Some(existing) if existing == vote => Ok(None),
            Some(existing) => Err(format!(
                "Already voted for {} in term {}, refusing to vote for {}",
                existing, self.current_term, vote
            )),
            None => Ok(Some(ConsensusMetadataRecord {
                current_term: self.current_term,
                voted_for: Some(vote.clone()),
                committed_config: committed_config.clone(),
            })),
        }
    }

    pub(crate) fn commit_vote(&mut self, vote: PeerId) {
        self.voted_for.replace(vote);
    }

    /// The record to persist when only the committed config changes.
    pub(crate) fn record_with_config(&self, committed_config: &RaftConfig) -> ConsensusMetadataRecord {
        ConsensusMetadataRecord {
            current_term: self.current_term,
            voted_for: self.voted_for.clone(),
            committed_config: committed_config.clone(),
        }
    }
}
