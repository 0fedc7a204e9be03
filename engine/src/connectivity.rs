//! Connectivity state shared between the sync loop and its callers.

use tokio::sync::watch;

/// Tracks whether the server is believed reachable. Transitions are reported
/// by callers (platform network events, probe results); subscribers observe
/// changes through a watch channel.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial belief.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Current belief about reachability.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Mark the server reachable. Returns true if this was a transition.
    pub fn set_online(&self) -> bool {
        self.tx.send_if_modified(|state| {
            let changed = !*state;
            *state = true;
            changed
        })
    }

    /// Mark the server unreachable. Returns true if this was a transition.
    pub fn set_offline(&self) -> bool {
        self.tx.send_if_modified(|state| {
            let changed = *state;
            *state = false;
            changed
        })
    }

    /// Subscribe to connectivity transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
