//! Per-document done-message fan-out.
//!
//! The result consumer publishes exactly one [`StatusMessage`] per
//! subscriber channel; WebSocket sessions subscribe dynamically to each
//! document they touch. Channels are independent broadcast topics, so
//! per-document isolation is structural: a session holding a receiver for
//! `done:u:docA` cannot observe `done:u:docB` traffic at all.
//!
//! Delivery is fire-and-forget. A momentarily disconnected subscriber loses
//! messages; recovery is the client re-issuing `synthesize` on reconnect,
//! which the cache then answers directly.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::StatusMessage;

/// Default per-channel buffer; slow sessions lag rather than block the
/// consumer.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// In-process pubsub over named channels (`done:{user}:{doc}`).
#[derive(Debug)]
pub struct DoneBus {
    channels: Mutex<HashMap<String, broadcast::Sender<StatusMessage>>>,
    capacity: usize,
}

impl Default for DoneBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl DoneBus {
    /// Create a bus whose channels buffer `capacity` messages each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to a channel, creating it on first touch.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<StatusMessage> {
        let mut channels = self.channels.lock().expect("done bus lock poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish to a channel. Returns the number of receivers the message
    /// reached; 0 means nobody is listening (the message is dropped, by
    /// contract). A channel whose last receiver is gone is pruned here.
    pub fn publish(&self, channel: &str, message: StatusMessage) -> usize {
        let mut channels = self.channels.lock().expect("done bus lock poisoned");
        let Some(sender) = channels.get(channel) else {
            debug!(channel, "done message dropped: channel never subscribed");
            return 0;
        };
        match sender.send(message) {
            Ok(receivers) => receivers,
            Err(_) => {
                // All receivers dropped — session(s) closed. Prune.
                channels.remove(channel);
                debug!(channel, "done message dropped: no live subscribers, channel pruned");
                0
            }
        }
    }

    /// Number of live channels (observability).
    pub fn channel_count(&self) -> usize {
        self.channels.lock().expect("done bus lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::status::done_channel;
    use crate::variant::VariantHash;

    fn msg(doc: &str) -> StatusMessage {
        StatusMessage::cached(doc, 0, VariantHash::from_hex("aa"), "m", "v")
    }

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = DoneBus::default();
        let mut rx = bus.subscribe(&done_channel("u", "docA"));
        assert_eq!(bus.publish(&done_channel("u", "docA"), msg("docA")), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.document_id, "docA");
    }

    #[tokio::test]
    async fn channels_are_isolated_per_document() {
        let bus = DoneBus::default();
        let mut rx_a = bus.subscribe(&done_channel("u", "docA"));
        let _rx_b = bus.subscribe(&done_channel("u", "docB"));

        bus.publish(&done_channel("u", "docB"), msg("docB"));
        // docA receiver must see nothing.
        assert!(matches!(rx_a.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[test]
    fn publish_without_subscribers_drops() {
        let bus = DoneBus::default();
        assert_eq!(bus.publish("done:u:ghost", msg("ghost")), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[test]
    fn dead_channel_is_pruned_on_publish() {
        let bus = DoneBus::default();
        let rx = bus.subscribe("done:u:doc");
        assert_eq!(bus.channel_count(), 1);
        drop(rx);
        bus.publish("done:u:doc", msg("doc"));
        assert_eq!(bus.channel_count(), 0);
    }
}
