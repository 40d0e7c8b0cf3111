//! Cooperative pause primitive for a single scan.

use tokio::sync::watch;

/// A binary gate that starts open.
///
/// `pause` closes it, `resume` opens it and wakes every waiter. Waiting
/// never polls: it parks on a watch channel until the gate reports open.
#[derive(Debug)]
pub struct PauseGate {
    open: watch::Sender<bool>,
}

impl PauseGate {
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open }
    }

    pub fn pause(&self) {
        self.open.send_replace(false);
    }

    pub fn resume(&self) {
        self.open.send_replace(true);
    }

    pub fn is_paused(&self) -> bool {
        !*self.open.borrow()
    }

    /// Returns immediately when open; otherwise waits for the next `resume`.
    pub async fn wait_if_paused(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Resolves once the gate is closed, immediately if it already is.
    pub async fn wait_for_pause(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|open| !*open).await;
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}
