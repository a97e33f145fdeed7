//! Integration event forwarding.
//!
//! Publishing is fire-and-forget from the hub's side: [`QueuedPublisher`]
//! hands each event to a bounded queue drained by a worker task, so the
//! realtime path never waits on the bus. A full queue drops the event with a
//! warning. Delivery guarantees beyond that belong to the bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use collab_core::protocol::{EditKind, now_rfc3339};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics as names;

/// Default `source` stamped on events.
pub const DEFAULT_SOURCE: &str = "collaboration-service";
/// Default schema `version` stamped on events.
pub const DEFAULT_VERSION: &str = "1.0";

/// Durable event describing an accepted edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationEvent {
    /// UUID v7.
    pub event_id: String,
    /// `question.created`, `question.updated` or `question.deleted`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Form.
    pub form_id: String,
    /// Editor.
    pub user_id: String,
    /// Edit payload as broadcast.
    pub data: Value,
    /// RFC3339.
    pub timestamp: String,
    /// Emitting service.
    pub source: String,
    /// Event schema version.
    pub version: String,
}

impl IntegrationEvent {
    /// Event for an accepted question edit.
    pub fn question(kind: EditKind, form_id: &str, user_id: &str, data: Value) -> Self {
        Self {
            event_id: uuid::Uuid::now_v7().to_string(),
            event_type: kind.integration_type().to_owned(),
            form_id: form_id.to_owned(),
            user_id: user_id.to_owned(),
            data,
            timestamp: now_rfc3339(),
            source: DEFAULT_SOURCE.to_owned(),
            version: DEFAULT_VERSION.to_owned(),
        }
    }
}

/// Accepts integration events without blocking the caller.
pub trait EventPublisher: Send + Sync {
    /// Hand off an event. Never blocks and never reports failure.
    fn publish(&self, event: IntegrationEvent);
}

/// Failure delivering one event to a sink.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Transport error.
    #[error("publish request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Bus rejected the event.
    #[error("bus responded with status {0}")]
    Status(u16),
}

/// Destination drained by the publisher worker.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    async fn deliver(&self, event: &IntegrationEvent) -> Result<(), PublishError>;
}

/// Logs each event. Used when no bus endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn deliver(&self, event: &IntegrationEvent) -> Result<(), PublishError> {
        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            form_id = %event.form_id,
            user_id = %event.user_id,
            "integration event"
        );
        Ok(())
    }
}

/// POSTs each event as JSON to a bus ingestion endpoint.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// Create a sink posting to `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn deliver(&self, event: &IntegrationEvent) -> Result<(), PublishError> {
        let response = self.client.post(&self.url).json(event).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PublishError::Status(status.as_u16()))
        }
    }
}

/// Bounded queue in front of an [`EventSink`].
pub struct QueuedPublisher {
    tx: mpsc::Sender<IntegrationEvent>,
    source: String,
    version: String,
}

impl QueuedPublisher {
    /// Start the worker. It runs until every publisher clone is dropped,
    /// then drains what is queued and exits.
    pub fn spawn(sink: Arc<dyn EventSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<IntegrationEvent>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match sink.deliver(&event).await {
                    Ok(()) => {
                        counter!(names::PUBLISHER_EVENTS_DELIVERED_TOTAL).increment(1);
                        debug!(event_id = %event.event_id, "integration event delivered");
                    }
                    Err(error) => {
                        counter!(names::PUBLISHER_EVENTS_FAILED_TOTAL).increment(1);
                        warn!(
                            event_id = %event.event_id,
                            event_type = %event.event_type,
                            form_id = %event.form_id,
                            %error,
                            "integration event delivery failed"
                        );
                    }
                }
            }
            debug!("publisher worker stopped");
        });
        let publisher = Self {
            tx,
            source: DEFAULT_SOURCE.to_owned(),
            version: DEFAULT_VERSION.to_owned(),
        };
        (publisher, worker)
    }

    /// Override the `source` and `version` stamped on every event.
    #[must_use]
    pub fn with_origin(mut self, source: impl Into<String>, version: impl Into<String>) -> Self {
        self.source = source.into();
        self.version = version.into();
        self
    }
}

impl EventPublisher for QueuedPublisher {
    fn publish(&self, mut event: IntegrationEvent) {
        event.source.clone_from(&self.source);
        event.version.clone_from(&self.version);
        if let Err(error) = self.tx.try_send(event) {
            counter!(names::PUBLISHER_EVENTS_DROPPED_TOTAL).increment(1);
            let event = match error {
                mpsc::error::TrySendError::Full(e) | mpsc::error::TrySendError::Closed(e) => e,
            };
            warn!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                form_id = %event.form_id,
                "publisher queue unavailable, integration event dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<IntegrationEvent>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, event: &IntegrationEvent) -> Result<(), PublishError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    /// Blocks until released, so the queue fills up behind it.
    struct GatedSink {
        release: Semaphore,
        delivered: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl EventSink for GatedSink {
        async fn deliver(&self, event: &IntegrationEvent) -> Result<(), PublishError> {
            self.release.acquire().await.unwrap().forget();
            self.delivered.lock().push(event.data["n"].as_i64().unwrap());
            Ok(())
        }
    }

    fn event(n: i64) -> IntegrationEvent {
        IntegrationEvent::question(EditKind::Update, "f1", "u1", json!({ "n": n }))
    }

    #[test]
    fn question_event_shape() {
        let e = IntegrationEvent::question(EditKind::Create, "f1", "u1", json!({}));
        assert_eq!(e.event_type, "question.created");
        assert_eq!(e.source, "collaboration-service");
        assert_eq!(e.version, "1.0");
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "question.created");
        assert_eq!(v["formId"], "f1");
        assert!(v["eventId"].is_string());
    }

    #[tokio::test]
    async fn queued_events_reach_sink_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let (publisher, worker) = QueuedPublisher::spawn(sink.clone(), 8);
        let publisher = publisher.with_origin("test-hub", "2.0");
        for n in 0..3 {
            publisher.publish(event(n));
        }
        drop(publisher);
        worker.await.unwrap();

        let events = sink.events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].data["n"], 2);
        assert!(events.iter().all(|e| e.source == "test-hub" && e.version == "2.0"));
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let sink = Arc::new(GatedSink {
            release: Semaphore::new(0),
            delivered: Mutex::new(Vec::new()),
        });
        let (publisher, worker) = QueuedPublisher::spawn(sink.clone(), 1);

        // One event held by the worker, one queued, the rest dropped.
        for n in 0..5 {
            publisher.publish(event(n));
            tokio::task::yield_now().await;
        }

        drop(publisher);
        sink.release.add_permits(5);
        worker.await.unwrap();

        let delivered = sink.delivered.lock();
        assert!(!delivered.is_empty());
        assert!(delivered.len() < 5);
        assert_eq!(delivered[0], 0);
    }

    #[tokio::test]
    async fn webhook_sink_posts_json() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .and(body_partial_json(json!({"type": "question.updated", "formId": "f1"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookSink::new(format!("{}/events", server.uri()), Duration::from_secs(5)).unwrap();
        sink.deliver(&event(1)).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_sink_reports_rejection() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sink = WebhookSink::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = sink.deliver(&event(1)).await.unwrap_err();
        assert!(matches!(err, PublishError::Status(503)));
    }

    #[tokio::test]
    async fn worker_keeps_draining_after_sink_errors() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let sink = WebhookSink::new(server.uri(), Duration::from_secs(5)).unwrap();
        let (publisher, worker) = QueuedPublisher::spawn(Arc::new(sink), 8);
        for n in 0..3 {
            publisher.publish(event(n));
        }
        drop(publisher);
        worker.await.unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 3);
        let last: IntegrationEvent = serde_json::from_slice(&received[2].body).unwrap();
        assert_eq!(last.data["n"], 2);
    }
}
