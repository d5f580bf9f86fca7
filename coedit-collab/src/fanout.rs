//! Acknowledgement fan-out to a document's other participants.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers. Each
//! participant gets an independent receiver buffering up to `capacity` acks.
//! Delivery is at-most-once and best-effort: the coordinator publishes each
//! committed batch exactly once and never retries; a participant that lags
//! or disconnects reconciles through `get_operations`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{OperationAck, ParticipantInfo};

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default)]
pub struct FanoutStats {
    pub acks_published: u64,
    pub active_documents: usize,
    pub active_participants: usize,
}

/// Fan-out state for a single document.
struct DocumentChannel {
    sender: broadcast::Sender<Arc<OperationAck>>,
    participants: RwLock<HashMap<Uuid, ParticipantInfo>>,
}

impl DocumentChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            participants: RwLock::new(HashMap::new()),
        }
    }
}

/// Per-document acknowledgement fan-out hub.
///
/// Channels are isolated per document id; acks for one document are never
/// delivered to another document's subscribers.
pub struct FanoutHub {
    channels: RwLock<HashMap<Uuid, Arc<DocumentChannel>>>,
    capacity: usize,
    acks_published: AtomicU64,
}

impl FanoutHub {
    /// Create a hub. `capacity` bounds the acks buffered per subscriber
    /// before a lagging receiver starts dropping.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
            acks_published: AtomicU64::new(0),
        }
    }

    /// Get or create the channel for a document.
    async fn channel(&self, document_id: Uuid) -> Arc<DocumentChannel> {
        // Fast path: read lock
        {
            let channels = self.channels.read().await;
            if let Some(channel) = channels.get(&document_id) {
                return channel.clone();
            }
        }

        // Slow path: write lock, double-checked
        let mut channels = self.channels.write().await;
        channels
            .entry(document_id)
            .or_insert_with(|| Arc::new(DocumentChannel::new(self.capacity)))
            .clone()
    }

    /// Register a participant and return its ack receiver.
    pub async fn subscribe(
        &self,
        document_id: Uuid,
        info: ParticipantInfo,
    ) -> broadcast::Receiver<Arc<OperationAck>> {
        let channel = self.channel(document_id).await;
        let mut participants = channel.participants.write().await;
        participants.insert(info.author_id, info);
        channel.sender.subscribe()
    }

    /// Remove a participant from a document's registry.
    pub async fn unsubscribe(
        &self,
        document_id: Uuid,
        author_id: &Uuid,
    ) -> Option<ParticipantInfo> {
        let channels = self.channels.read().await;
        let channel = channels.get(&document_id)?;
        let mut participants = channel.participants.write().await;
        participants.remove(author_id)
    }

    /// Publish a committed batch's ack to the document's subscribers.
    ///
    /// Returns the number of receivers reached; 0 when nobody is listening.
    /// Send failures are swallowed: delivery is best-effort by contract.
    pub async fn publish(&self, document_id: Uuid, ack: OperationAck) -> usize {
        let channel = {
            let channels = self.channels.read().await;
            channels.get(&document_id).cloned()
        };
        let reached = match channel {
            Some(channel) => channel.sender.send(Arc::new(ack)).unwrap_or(0),
            None => 0,
        };
        self.acks_published.fetch_add(1, Ordering::Relaxed);
        reached
    }

    /// Participants currently registered for a document.
    pub async fn participant_count(&self, document_id: Uuid) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&document_id) {
            Some(channel) => channel.participants.read().await.len(),
            None => 0,
        }
    }

    /// Registered participant infos for a document.
    pub async fn participants(&self, document_id: Uuid) -> Vec<ParticipantInfo> {
        let channels = self.channels.read().await;
        match channels.get(&document_id) {
            Some(channel) => channel.participants.read().await.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Drop a document's channel once its registry is empty.
    pub async fn remove_if_idle(&self, document_id: Uuid) -> bool {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get(&document_id) {
            if channel.participants.read().await.is_empty() {
                channels.remove(&document_id);
                return true;
            }
        }
        false
    }

    /// Hub-wide statistics snapshot.
    pub async fn stats(&self) -> FanoutStats {
        let channels = self.channels.read().await;
        let mut active_participants = 0;
        for channel in channels.values() {
            active_participants += channel.participants.read().await.len();
        }
        FanoutStats {
            acks_published: self.acks_published.load(Ordering::Relaxed),
            active_documents: channels.len(),
            active_participants,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(version: u64) -> OperationAck {
        OperationAck {
            applied_version: version,
            operations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let hub = FanoutHub::new(16);
        let doc = Uuid::new_v4();

        let mut rx = hub.subscribe(doc, ParticipantInfo::new("Alice")).await;

        let reached = hub.publish(doc, ack(3)).await;
        assert_eq!(reached, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.applied_version, 3);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = FanoutHub::new(16);
        // Nobody listening: best-effort means this is not an error.
        let reached = hub.publish(Uuid::new_v4(), ack(1)).await;
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let hub = FanoutHub::new(16);
        let doc = Uuid::new_v4();

        let mut rx1 = hub.subscribe(doc, ParticipantInfo::new("Alice")).await;
        let mut rx2 = hub.subscribe(doc, ParticipantInfo::new("Bob")).await;

        let reached = hub.publish(doc, ack(7)).await;
        assert_eq!(reached, 2);

        assert_eq!(rx1.recv().await.unwrap().applied_version, 7);
        assert_eq!(rx2.recv().await.unwrap().applied_version, 7);
    }

    #[tokio::test]
    async fn test_documents_are_isolated() {
        let hub = FanoutHub::new(16);
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();

        let mut rx_a = hub.subscribe(doc_a, ParticipantInfo::new("Alice")).await;
        let _rx_b = hub.subscribe(doc_b, ParticipantInfo::new("Bob")).await;

        hub.publish(doc_b, ack(5)).await;
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_participant_registry() {
        let hub = FanoutHub::new(16);
        let doc = Uuid::new_v4();

        let alice = ParticipantInfo::new("Alice");
        let alice_id = alice.author_id;
        let _rx = hub.subscribe(doc, alice).await;
        let _rx2 = hub.subscribe(doc, ParticipantInfo::new("Bob")).await;

        assert_eq!(hub.participant_count(doc).await, 2);

        let removed = hub.unsubscribe(doc, &alice_id).await;
        assert_eq!(removed.unwrap().name, "Alice");
        assert_eq!(hub.participant_count(doc).await, 1);
    }

    #[tokio::test]
    async fn test_remove_if_idle() {
        let hub = FanoutHub::new(16);
        let doc = Uuid::new_v4();

        let bob = ParticipantInfo::new("Bob");
        let bob_id = bob.author_id;
        let _rx = hub.subscribe(doc, bob).await;

        assert!(!hub.remove_if_idle(doc).await);

        hub.unsubscribe(doc, &bob_id).await;
        assert!(hub.remove_if_idle(doc).await);
        assert_eq!(hub.participant_count(doc).await, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let hub = FanoutHub::new(16);
        let doc = Uuid::new_v4();
        let _rx = hub.subscribe(doc, ParticipantInfo::new("Alice")).await;

        hub.publish(doc, ack(1)).await;
        hub.publish(doc, ack(2)).await;

        let stats = hub.stats().await;
        assert_eq!(stats.acks_published, 2);
        assert_eq!(stats.active_documents, 1);
        assert_eq!(stats.active_participants, 1);
    }
}
