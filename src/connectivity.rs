use tokio::sync::watch;
use tracing::info;

/// Online predicate plus transition notifications
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
    fn subscribe(&self) -> watch::Receiver<bool>;
}

#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: watch::Sender<bool>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (online, _) = watch::channel(online);
        Self { online }
    }

    /// Returns true when the state actually changed
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }
}

impl Connectivity for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_notify_subscribers() {
        let monitor = ConnectivityMonitor::new(true);
        let mut rx = monitor.subscribe();

        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!monitor.is_online());

        assert!(monitor.set_online(true));
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }
}
