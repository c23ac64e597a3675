use crate::oplog::OpId;
use tokio::sync::watch;

pub(super) fn new(initial: OpId) -> (CommitWatermarkNotifier, CommitWatermarkListener) {
    let (snd, rcv) = watch::channel(initial);

    (CommitWatermarkNotifier { snd }, CommitWatermarkListener { rcv })
}

pub(super) struct CommitWatermarkNotifier {
    snd: watch::Sender<OpId>,
}

impl CommitWatermarkNotifier {
    pub(super) fn notify_committed(&self, committed: OpId) {
        // Stored even with no listeners, for those that subscribe later.
        self.snd.send_replace(committed);
    }

    pub(super) fn subscribe(&self) -> CommitWatermarkListener {
        CommitWatermarkListener {
            rcv: self.snd.subscribe(),
        }
    }
}

/// CommitWatermarkListener follows a replica's last committed op id from async code.
#[derive(Clone)]
pub struct CommitWatermarkListener {
    rcv: watch::Receiver<OpId>,
}

impl CommitWatermarkListener {
    pub fn last_committed(&self) -> OpId {
        *self.rcv.borrow()
    }

    /// Next committed watermark, or None once the replica is gone.
    pub async fn next(&mut self) -> Option<OpId> {
        match self.rcv.changed().await {
            Ok(_) => Some(*self.rcv.borrow()),
            Err(_) => None,
        }
    }

    /// Resolves once an op with at least `index` is committed. Returns None if the replica was
    /// dropped first.
    pub async fn wait_for_index(&mut self, index: u64) -> Option<OpId> {
        loop {
            let committed = *self.rcv.borrow_and_update();
            if committed.index >= index {
                return Some(committed);
            }
            if self.rcv.changed().await.is_err() {
                return None;
            }
        }
    }
}
