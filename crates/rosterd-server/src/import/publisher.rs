//! Progress publisher
//!
//! Fan-out from one ingest job to any number of attached stream consumers.
//! Each job gets a bounded broadcast channel: a slow subscriber lags and
//! loses the oldest frames, never the newest, so the terminal frame always
//! arrives. The latest frame is kept for replay so a consumer attaching
//! mid-job (or after completion) is never left blank.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use super::types::ProgressSnapshot;

/// One typed push message on a job's progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamMessage {
    Progress(ProgressSnapshot),
    Completed(ProgressSnapshot),
    Error { message: String },
}

impl StreamMessage {
    /// Terminal messages close the stream after delivery.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamMessage::Completed(_) | StreamMessage::Error { .. })
    }
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("unknown upload: {0}")]
    NotFound(String),
}

/// A live attachment to one job's progress feed.
pub struct Subscription {
    /// Latest known frame, delivered before any live one.
    pub replay: Option<StreamMessage>,
    /// Live feed. Lagged receivers skip dropped frames and keep going.
    pub live: broadcast::Receiver<StreamMessage>,
}

struct ChannelState {
    latest: Option<StreamMessage>,
    tx: broadcast::Sender<StreamMessage>,
}

/// Process-wide fan-out table, keyed by upload id.
pub struct ProgressPublisher {
    channels: RwLock<HashMap<String, ChannelState>>,
    capacity: usize,
}

impl ProgressPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Create the channel for a freshly registered job.
    pub async fn register(&self, upload_id: &str) {
        let (tx, _rx) = broadcast::channel(self.capacity);
        let mut channels = self.channels.write().await;
        channels.insert(upload_id.to_string(), ChannelState { latest: None, tx });
    }

    /// Attach a consumer. Fails for unknown or already evicted jobs.
    pub async fn subscribe(&self, upload_id: &str) -> Result<Subscription, SubscribeError> {
        let channels = self.channels.read().await;
        let state = channels
            .get(upload_id)
            .ok_or_else(|| SubscribeError::NotFound(upload_id.to_string()))?;
        Ok(Subscription {
            replay: state.latest.clone(),
            live: state.tx.subscribe(),
        })
    }

    /// Deliver a message to all current subscribers.
    ///
    /// Never blocks the publishing job; with no subscribers the message is
    /// only retained as the replay frame.
    pub async fn publish(&self, upload_id: &str, message: StreamMessage) {
        let mut channels = self.channels.write().await;
        if let Some(state) = channels.get_mut(upload_id) {
            state.latest = Some(message.clone());
            // Send errors only mean there is no receiver right now.
            let _ = state.tx.send(message);
        }
    }

    /// Number of currently attached consumers.
    pub async fn subscriber_count(&self, upload_id: &str) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(upload_id)
            .map(|state| state.tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop a job's channel. Called when the registry evicts the job.
    pub async fn remove(&self, upload_id: &str) {
        let mut channels = self.channels.write().await;
        channels.remove(upload_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::types::{JobStatus, UploadJob};

    fn snapshot(id: &str) -> ProgressSnapshot {
        UploadJob::new(id.to_string(), 3, 10).snapshot()
    }

    #[tokio::test]
    async fn subscribe_unknown_job_fails() {
        let publisher = ProgressPublisher::new(8);
        assert!(matches!(
            publisher.subscribe("missing").await,
            Err(SubscribeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn subscriber_receives_published_frames() {
        let publisher = ProgressPublisher::new(8);
        publisher.register("u1").await;

        let mut sub = publisher.subscribe("u1").await.unwrap();
        assert!(sub.replay.is_none());

        publisher
            .publish("u1", StreamMessage::Progress(snapshot("u1")))
            .await;

        let msg = sub.live.recv().await.unwrap();
        assert!(matches!(msg, StreamMessage::Progress(_)));
    }

    #[tokio::test]
    async fn late_subscriber_gets_latest_as_replay() {
        let publisher = ProgressPublisher::new(8);
        publisher.register("u1").await;
        publisher
            .publish("u1", StreamMessage::Completed(snapshot("u1")))
            .await;

        let sub = publisher.subscribe("u1").await.unwrap();
        match sub.replay {
            Some(ref msg) if msg.is_terminal() => {},
            other => panic!("expected terminal replay, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn terminal_frame_survives_lag() {
        let publisher = ProgressPublisher::new(2);
        publisher.register("u1").await;
        let mut sub = publisher.subscribe("u1").await.unwrap();

        // Overflow the bounded queue, then finish.
        for _ in 0..10 {
            publisher
                .publish("u1", StreamMessage::Progress(snapshot("u1")))
                .await;
        }
        publisher
            .publish("u1", StreamMessage::Completed(snapshot("u1")))
            .await;

        let mut saw_terminal = false;
        loop {
            match sub.live.recv().await {
                Ok(msg) => {
                    if msg.is_terminal() {
                        saw_terminal = true;
                        break;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        assert!(saw_terminal);
    }

    #[tokio::test]
    async fn removed_channel_rejects_new_subscribers() {
        let publisher = ProgressPublisher::new(8);
        publisher.register("u1").await;
        assert_eq!(publisher.subscriber_count("u1").await, 0);
        publisher.remove("u1").await;
        assert!(publisher.subscribe("u1").await.is_err());
    }

    #[test]
    fn stream_message_wire_shape() {
        let snap = snapshot("u1");
        let value = serde_json::to_value(StreamMessage::Progress(snap)).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["data"]["status"], serde_json::json!(JobStatus::Queued));

        let value =
            serde_json::to_value(StreamMessage::Error { message: "boom".to_string() }).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["message"], "boom");
    }
}
