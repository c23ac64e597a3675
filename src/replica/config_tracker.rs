use crate::replica::peers::RaftConfig;

/// ConfigTracker holds the committed replica set and at most one pending (proposed, not yet
/// committed) replica set.
pub(crate) struct ConfigTracker {
    committed: RaftConfig,
    pending: Option<RaftConfig>,
}

impl ConfigTracker {
    pub(crate) fn new(committed: RaftConfig) -> Self {
        ConfigTracker {
            committed,
            pending: None,
        }
    }

    pub(crate) fn committed(&self) -> &RaftConfig {
        &self.committed
    }

    pub(crate) fn pending(&self) -> Option<&RaftConfig> {
        self.pending.as_ref()
    }

    /// A pending config governs quorum and membership decisions as soon as it is proposed.
    pub(crate) fn active(&self) -> &RaftConfig {
        self.pending.as_ref().unwrap_or(&self.committed)
    }

    pub(crate) fn is_change_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn set_pending(&mut self, new_config: RaftConfig) -> Result<(), String> {
        if let Some(pending) = &self.pending {
            return Err(format!(
                "Attempt to set pending config {} while config change {} is still pending",
                new_config, pending
            ));
        }

        self.pending.replace(new_config);
        Ok(())
    }

    pub(crate) fn clear_pending(&mut self) -> Option<RaftConfig> {
        self.pending.take()
    }

    /// Checks that `new_config` may be committed: it must be exactly the pending config.
    pub(crate) fn check_commit(&self, new_config: &RaftConfig) -> Result<(), String> {
        match &self.pending {
            None => Err(format!(
                "Attempt to commit config {} with no config change pending",
                new_config
            )),
            Some(pending) if pending != new_config => Err(format!(
                "Attempt to commit config {} that does not match pending config {}",
                new_config, pending
            )),
            Some(_) => Ok(()),
        }
    }

    /// Only call once `check_commit` passed and the config is durable.
    pub(crate) fn commit(&mut self, new_config: RaftConfig) {
        self.committed = new_config;
        self.pending = None;
    }
}
