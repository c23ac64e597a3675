use crate::oplog::OpId;
use crate::replica::clock::{CoarseTimePoint, MicrosTime};
use crate::replica::peers::PeerId;
use tokio::time::Duration;

/// A wall-clock lease held by `holder_uuid` until `expiration`.
#[derive(Clone, Debug, PartialEq)]
pub struct CoarseTimeLease {
    pub holder_uuid: PeerId,
    pub expiration: CoarseTimePoint,
}

/// A hybrid-time lease held by `holder_uuid` until the physical time `expiration`.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicalComponentLease {
    pub holder_uuid: PeerId,
    pub expiration: MicrosTime,
}

/// What a leader learns once a lease-extending entry is acknowledged by a majority.
#[derive(Clone, Debug, PartialEq)]
pub struct MajorityReplicatedData {
    pub op_id: OpId,
    pub leader_lease_expiration: CoarseTimePoint,
    pub ht_lease_expiration: MicrosTime,
}

/// Which inherited old-leader leases to discard when setting the majority replicated lease.
/// Used once, when this replica's own leadership is first established.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OldLeaderLeaseReset {
    pub wall_clock: bool,
    pub hybrid_time: bool,
}

impl OldLeaderLeaseReset {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn both() -> Self {
        OldLeaderLeaseReset {
            wall_clock: true,
            hybrid_time: true,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaderLeaseStatus {
    HasLease,
    // Old leader's lease has not provably expired. Same replica should be retried.
    OldLeaderMayHaveLease,
    // Our own lease was not yet majority replicated. Leadership may have moved.
    NoMajorityReplicatedLease,
}

/// LeaseTracker holds the residual leases of the previous leader and this replica's own
/// majority replicated leases, in both time domains.
#[derive(Default)]
pub(crate) struct LeaseTracker {
    old_leader_lease: Option<CoarseTimeLease>,
    old_leader_ht_lease: Option<PhysicalComponentLease>,
    majority_replicated_lease_expiration: Option<CoarseTimePoint>,
    majority_replicated_ht_lease_expiration: Option<MicrosTime>,
}

impl LeaseTracker {
    pub(crate) fn new() -> Self {
        LeaseTracker::default()
    }

    pub(crate) fn old_leader_lease(&self) -> Option<&CoarseTimeLease> {
        self.old_leader_lease.as_ref()
    }

    pub(crate) fn old_leader_ht_lease(&self) -> Option<&PhysicalComponentLease> {
        self.old_leader_ht_lease.as_ref()
    }

    pub(crate) fn majority_replicated_lease_expiration(&self) -> Option<CoarseTimePoint> {
        self.majority_replicated_lease_expiration
    }

    pub(crate) fn majority_replicated_ht_lease_expiration(&self) -> Option<MicrosTime> {
        self.majority_replicated_ht_lease_expiration
    }

    /// Merges leases advertised by a leader while we are not leader. The later expiration wins.
    /// Any majority replicated lease of our own is gone since we are no longer leader.
    pub(crate) fn update_old_leader_leases_on_non_leader(
        &mut self,
        lease: Option<CoarseTimeLease>,
        ht_lease: Option<PhysicalComponentLease>,
    ) {
        if let Some(lease) = lease {
            match &self.old_leader_lease {
                Some(existing) if existing.expiration >= lease.expiration => {}
                _ => self.old_leader_lease = Some(lease),
            }
        }
        if let Some(ht_lease) = ht_lease {
            match &self.old_leader_ht_lease {
                Some(existing) if existing.expiration >= ht_lease.expiration => {}
                _ => self.old_leader_ht_lease = Some(ht_lease),
            }
        }

        self.majority_replicated_lease_expiration = None;
        self.majority_replicated_ht_lease_expiration = None;
    }

    /// Extends our own leases. Expirations only ratchet forward.
    pub(crate) fn set_majority_replicated(&mut self, data: &MajorityReplicatedData, reset: OldLeaderLeaseReset) {
        self.majority_replicated_lease_expiration = Some(match self.majority_replicated_lease_expiration {
            Some(existing) => existing.max(data.leader_lease_expiration),
            None => data.leader_lease_expiration,
        });
        self.majority_replicated_ht_lease_expiration = Some(match self.majority_replicated_ht_lease_expiration {
            Some(existing) => existing.max(data.ht_lease_expiration),
            None => data.ht_lease_expiration,
        });

        if reset.wall_clock {
            self.old_leader_lease = None;
        }
        if reset.hybrid_time {
            self.old_leader_ht_lease = None;
        }
    }

    /// Time left on the old leader's lease, or None if it has expired or was never known.
    ///
    /// Once observed expired the lease is dropped, so later readers never see it un-expire and
    /// don't need to consult it again.
    pub(crate) fn remaining_old_leader_lease(&mut self, now: CoarseTimePoint) -> Option<Duration> {
        let expiration = self.old_leader_lease.as_ref()?.expiration;
        if now >= expiration {
            self.old_leader_lease = None;
            None
        } else {
            Some(expiration - now)
        }
    }

    pub(crate) fn old_leader_ht_lease_expired_at(&mut self, micros_time: MicrosTime) -> bool {
        match &self.old_leader_ht_lease {
            None => true,
            Some(lease) if micros_time > lease.expiration => {
                self.old_leader_ht_lease = None;
                true
            }
            Some(_) => false,
        }
    }

    pub(crate) fn majority_replicated_lease_expired(&self, now: CoarseTimePoint) -> bool {
        match self.majority_replicated_lease_expiration {
            None => true,
            Some(expiration) => now >= expiration,
        }
    }

    pub(crate) fn majority_replicated_ht_lease_expired_at(&self, micros_time: MicrosTime) -> bool {
        match self.majority_replicated_ht_lease_expiration {
            None => true,
            Some(expiration) => micros_time >= expiration,
        }
    }

    /// Wall-clock lease status. The old leader's lease is consulted first, since we may not act
    /// while it could still be acting no matter how long our own lease is.
    pub(crate) fn status(&mut self, now: CoarseTimePoint) -> (LeaderLeaseStatus, Option<Duration>) {
        if let Some(remaining) = self.remaining_old_leader_lease(now) {
            return (LeaderLeaseStatus::OldLeaderMayHaveLease, Some(remaining));
        }
        if self.majority_replicated_lease_expired(now) {
            return (LeaderLeaseStatus::NoMajorityReplicatedLease, None);
        }

        (LeaderLeaseStatus::HasLease, None)
    }

    pub(crate) fn ht_status_at(&mut self, micros_time: MicrosTime) -> LeaderLeaseStatus {
        if !self.old_leader_ht_lease_expired_at(micros_time) {
            return LeaderLeaseStatus::OldLeaderMayHaveLease;
        }
        if self.majority_replicated_ht_lease_expired_at(micros_time) {
            return LeaderLeaseStatus::NoMajorityReplicatedLease;
        }

        LeaderLeaseStatus::HasLease
    }
}
