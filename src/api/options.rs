use std::convert::TryFrom;
use tokio::time::Duration;

const MAX_LEASE_DURATION: Duration = Duration::from_secs(60);

#[derive(Clone, Default)]
pub struct ConsensusOptions {
    pub use_leader_leases: Option<bool>,
    pub use_hybrid_time_leases: Option<bool>,
    pub leader_lease_duration: Option<Duration>,
    pub ht_lease_duration: Option<Duration>,
    /// Panic instead of returning an error when an upstream caller breaks op sequencing.
    /// Defaults to true in debug builds.
    pub fatal_on_invariant_violation: Option<bool>,
}

#[derive(Clone, Debug)]
pub(crate) struct ConsensusOptionsValidated {
    pub use_leader_leases: bool,
    pub use_hybrid_time_leases: bool,
    pub leader_lease_duration: Duration,
    pub ht_lease_duration: Duration,
    pub fatal_on_invariant_violation: bool,
}

impl ConsensusOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.use_leader_leases {
            if self.leader_lease_duration == Duration::from_millis(0) {
                return Err("Leader lease duration must be greater than zero");
            }
            if self.leader_lease_duration > MAX_LEASE_DURATION {
                return Err("Leader lease duration must be at most 60 seconds");
            }
        }
        if self.use_hybrid_time_leases {
            if self.ht_lease_duration == Duration::from_millis(0) {
                return Err("Hybrid time lease duration must be greater than zero");
            }
            if self.ht_lease_duration > MAX_LEASE_DURATION {
                return Err("Hybrid time lease duration must be at most 60 seconds");
            }
        }

        Ok(())
    }
}

impl TryFrom<ConsensusOptions> for ConsensusOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ConsensusOptions) -> Result<Self, Self::Error> {
        let values = ConsensusOptionsValidated {
            use_leader_leases: options.use_leader_leases.unwrap_or(true),
            use_hybrid_time_leases: options.use_hybrid_time_leases.unwrap_or(true),
            leader_lease_duration: options.leader_lease_duration.unwrap_or(Duration::from_secs(2)),
            ht_lease_duration: options.ht_lease_duration.unwrap_or(Duration::from_secs(2)),
            fatal_on_invariant_violation: options
                .fatal_on_invariant_violation
                .unwrap_or(cfg!(debug_assertions)),
        };

        values.validate()?;
        Ok(values)
    }
}
