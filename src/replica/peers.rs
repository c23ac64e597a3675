use std::fmt;

/// PeerId is the stable identity (uuid) of a replica within a tablet's raft group.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        PeerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemberType {
    Voter,
    // Catching up before being promoted to voter.
    PreVoter,
    Observer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaftPeer {
    pub peer_id: PeerId,
    pub member_type: MemberType,
}

impl RaftPeer {
    pub fn voter<S: Into<String>>(id: S) -> Self {
        RaftPeer {
            peer_id: PeerId::new(id),
            member_type: MemberType::Voter,
        }
    }

    pub fn observer<S: Into<String>>(id: S) -> Self {
        RaftPeer {
            peer_id: PeerId::new(id),
            member_type: MemberType::Observer,
        }
    }
}

/// RaftConfig is a replica set membership. `opid_index` is the index of the log entry that
/// introduced this config; None for a bootstrap config or a proposal not yet assigned an id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RaftConfig {
    pub opid_index: Option<u64>,
    pub peers: Vec<RaftPeer>,
}

impl RaftConfig {
    pub fn new(peers: Vec<RaftPeer>) -> Self {
        RaftConfig {
            opid_index: None,
            peers,
        }
    }

    pub fn with_opid_index(mut self, opid_index: u64) -> Self {
        self.opid_index = Some(opid_index);
        self
    }

    pub fn peer(&self, peer_id: &PeerId) -> Option<&RaftPeer> {
        self.peers.iter().find(|p| &p.peer_id == peer_id)
    }

    pub fn is_voter(&self, peer_id: &PeerId) -> bool {
        matches!(self.peer(peer_id), Some(p) if p.member_type == MemberType::Voter)
    }

    pub fn num_voters(&self) -> usize {
        self.peers
            .iter()
            .filter(|p| p.member_type == MemberType::Voter)
            .count()
    }

    pub fn majority_size(&self) -> usize {
        (self.num_voters() / 2) + 1
    }

    /// The role `me` plays in this config, given the currently recognized leader.
    pub fn role_of(&self, me: &PeerId, leader: Option<&PeerId>) -> RaftRole {
        match self.peer(me) {
            None => RaftRole::NonParticipant,
            Some(peer) => match peer.member_type {
                MemberType::Voter if leader == Some(me) => RaftRole::Leader,
                MemberType::Voter => RaftRole::Follower,
                MemberType::PreVoter | MemberType::Observer => RaftRole::Learner,
            },
        }
    }
}

impl fmt::Display for RaftConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ opid_index: ")?;
        match self.opid_index {
            Some(i) => write!(f, "{}", i)?,
            None => write!(f, "-")?,
        }
        write!(f, " peers: [")?;
        for (i, peer) in self.peers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{:?}", peer.peer_id, peer.member_type)?;
        }
        write!(f, "] }}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RaftRole {
    Leader,
    Follower,
    Learner,
    NonParticipant,
}
