use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatus {
    Idle,
    Running,
    Stopped,
}

/// Shared run state of a background service. Loops hold a receiver and
/// wake up when the status changes.
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<BotStatus>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(BotStatus::Idle);
        Self { tx }
    }

    pub fn get(&self) -> BotStatus {
        *self.tx.borrow()
    }

    /// Returns the previous status.
    pub fn set(&self, status: BotStatus) -> BotStatus {
        self.tx.send_replace(status)
    }

    pub fn subscribe(&self) -> watch::Receiver<BotStatus> {
        self.tx.subscribe()
    }
}
