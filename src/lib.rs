mod api;
mod oplog;
mod replica;

pub use api::ConsensusOptions;
pub use oplog::InMemoryLog;
pub use oplog::Log;
pub use oplog::LogEntry;
pub use oplog::OpId;
pub use oplog::Term;
pub use replica::mocked_clock;
pub use replica::AppliedOpsTracker;
pub use replica::Clock;
pub use replica::CoarseTimeLease;
pub use replica::CoarseTimePoint;
pub use replica::CommitWatermarkListener;
pub use replica::ConfigType;
pub use replica::ConsensusError;
pub use replica::ConsensusMetadataRecord;
pub use replica::ConsensusMetadataStore;
pub use replica::ConsensusRound;
pub use replica::ConsensusState;
pub use replica::CouldStop;
pub use replica::InMemoryMetadataStore;
pub use replica::LeaderLeaseCheckMode;
pub use replica::LeaderLeaseStatus;
pub use replica::LeaderState;
pub use replica::LeaderStatus;
pub use replica::LifecycleState;
pub use replica::MajorityReplicatedData;
pub use replica::MemberType;
pub use replica::MicrosTime;
pub use replica::MockClock;
pub use replica::MockClockController;
pub use replica::OldLeaderLeaseReset;
pub use replica::OpPresence;
pub use replica::OperationType;
pub use replica::PeerId;
pub use replica::PhysicalComponentLease;
pub use replica::RaftConfig;
pub use replica::RaftPeer;
pub use replica::RaftRole;
pub use replica::ReadOnly;
pub use replica::ReadWrite;
pub use replica::RealClock;
pub use replica::ReplicaState;
pub use replica::ReplicaStateConfig;
pub use replica::ReplicaStateGuard;
pub use replica::ReplicaStateReadGuard;
pub use replica::ReplicateMsg;
pub use replica::ReplicatedCallback;
pub use replica::ReplicationFinished;
pub use replica::Result;

// The crate root only declares private modules and re-exports the public surface item by item.
