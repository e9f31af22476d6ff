//! Listen/notify channels scoped to a keyspace. Topics queued inside a
//! transaction are delivered only after the outermost commit succeeds;
//! an abort drops them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};

/// Receiver handle for one subscription. Dropping it detaches the
/// listener; the hub prunes it on the next dispatch.
pub struct NotificationStream {
    rx: Receiver<String>,
}

impl NotificationStream {
    /// Blocks for the next notification; `None` once every sender for
    /// the topic is gone.
    pub fn recv(&self) -> Option<String> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

#[derive(Default)]
pub(crate) struct NotifyHub {
    listeners: Mutex<HashMap<(u32, String), Vec<Sender<String>>>>,
}

impl NotifyHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn listen(&self, ks_id: u32, topic: &str) -> NotificationStream {
        let (tx, rx) = channel();
        self.listeners
            .lock()
            .entry((ks_id, topic.to_string()))
            .or_default()
            .push(tx);
        NotificationStream { rx }
    }

    pub(crate) fn dispatch(&self, ks_id: u32, topic: &str) {
        let mut listeners = self.listeners.lock();
        let slot = (ks_id, topic.to_string());
        if let Some(senders) = listeners.get_mut(&slot) {
            senders.retain(|tx| tx.send(topic.to_string()).is_ok());
            if senders.is_empty() {
                listeners.remove(&slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NotifyHub;

    #[test]
    fn dispatch_reaches_only_matching_listeners() {
        let hub = NotifyHub::new();
        let hit = hub.listen(1, "orders");
        let other_topic = hub.listen(1, "users");
        let other_ks = hub.listen(2, "orders");
        hub.dispatch(1, "orders");
        assert_eq!(hit.try_recv().as_deref(), Some("orders"));
        assert_eq!(other_topic.try_recv(), None);
        assert_eq!(other_ks.try_recv(), None);
    }

    #[test]
    fn dropped_listeners_are_pruned() {
        let hub = NotifyHub::new();
        let gone = hub.listen(1, "t");
        drop(gone);
        hub.dispatch(1, "t");
        let live = hub.listen(1, "t");
        hub.dispatch(1, "t");
        assert_eq!(live.try_recv().as_deref(), Some("t"));
    }
}
