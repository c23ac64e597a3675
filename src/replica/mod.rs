mod clock;
mod commit_watch;
mod config_tracker;
mod leader_state;
mod lease;
mod local_state;
mod metadata;
mod peers;
mod pending_ops;
mod replica_api;
mod replica_state;
mod replica_state_guard;

pub use clock::mocked_clock;
pub use clock::Clock;
pub use clock::CoarseTimePoint;
pub use clock::MicrosTime;
pub use clock::MockClock;
pub use clock::MockClockController;
pub use clock::RealClock;
pub use commit_watch::CommitWatermarkListener;
pub use leader_state::LeaderLeaseCheckMode;
pub use leader_state::LeaderState;
pub use leader_state::LeaderStatus;
pub use lease::CoarseTimeLease;
pub use lease::LeaderLeaseStatus;
pub use lease::MajorityReplicatedData;
pub use lease::OldLeaderLeaseReset;
pub use lease::PhysicalComponentLease;
pub use metadata::ConsensusMetadataRecord;
pub use metadata::ConsensusMetadataStore;
pub use metadata::InMemoryMetadataStore;
pub use peers::MemberType;
pub use peers::PeerId;
pub use peers::RaftConfig;
pub use peers::RaftPeer;
pub use peers::RaftRole;
pub use pending_ops::ConsensusRound;
pub use replica_api::AppliedOpsTracker;
pub use replica_api::ConfigType;
pub use replica_api::ConsensusError;
pub use replica_api::ConsensusState;
pub use replica_api::LifecycleState;
pub use replica_api::OpPresence;
pub use replica_api::OperationType;
pub use replica_api::ReplicateMsg;
pub use replica_api::ReplicatedCallback;
pub use replica_api::ReplicationFinished;
pub use replica_api::Result;
pub use replica_state::ReplicaState;
pub use replica_state::ReplicaStateConfig;
pub use replica_state_guard::CouldStop;
pub use replica_state_guard::ReadOnly;
pub use replica_state_guard::ReadWrite;
pub use replica_state_guard::ReplicaStateGuard;
pub use replica_state_guard::ReplicaStateReadGuard;
