//! Synchronous request/response over an asynchronous transport.
//!
//! Each call registers a `oneshot` sender under a fresh correlation id,
//! publishes the request, and waits for [`RequestResponseCorrelator::complete`]
//! to be called with the same id. The pending entry is owned by a drop guard,
//! so it is removed on success, timeout, publish failure, and when the
//! calling future is dropped.

use crate::error::{DepositError, DepositResult};
use crate::services::metrics::CORRELATOR_CALLS_TOTAL;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Envelope published on the request topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedRequest<Req> {
    pub correlation_id: Uuid,
    pub topic: String,
    pub payload: Req,
}

/// Outbound request transport.
#[async_trait]
pub trait RequestPublisher<Req>: Send + Sync {
    async fn publish(&self, request: CorrelatedRequest<Req>) -> DepositResult<()>;
}

/// In-process transport; the receiver goes to whatever bridges to the real
/// message bus.
pub struct ChannelPublisher<Req> {
    sender: mpsc::Sender<CorrelatedRequest<Req>>,
}

impl<Req: Send + 'static> ChannelPublisher<Req> {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<CorrelatedRequest<Req>>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl<Req: Send + 'static> RequestPublisher<Req> for ChannelPublisher<Req> {
    async fn publish(&self, request: CorrelatedRequest<Req>) -> DepositResult<()> {
        let topic = request.topic.clone();
        self.sender
            .send(request)
            .await
            .map_err(|_| {
                DepositError::integration("request-channel", format!("channel for '{}' is closed", topic))
            })
    }
}

type Pending<Resp> = DashMap<Uuid, oneshot::Sender<Resp>>;

struct PendingGuard<'a, Resp> {
    pending: &'a Pending<Resp>,
    id: Uuid,
}

impl<Resp> Drop for PendingGuard<'_, Resp> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Correlates responses to requests for one topic.
pub struct RequestResponseCorrelator<Req, Resp> {
    topic: &'static str,
    timeout: Duration,
    pending: Arc<Pending<Resp>>,
    publisher: Arc<dyn RequestPublisher<Req>>,
}

impl<Req, Resp> Clone for RequestResponseCorrelator<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic,
            timeout: self.timeout,
            pending: self.pending.clone(),
            publisher: self.publisher.clone(),
        }
    }
}

impl<Req, Resp> RequestResponseCorrelator<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new(
        topic: &'static str,
        publisher: Arc<dyn RequestPublisher<Req>>,
        timeout: Duration,
    ) -> Self {
        Self {
            topic,
            timeout,
            pending: Arc::new(DashMap::new()),
            publisher,
        }
    }

    /// Publishes `payload` and waits for the correlated response.
    ///
    /// Fails with `ServiceIntegration` when publishing fails, the responder
    /// goes away, or no response arrives within the timeout.
    #[instrument(skip(self, payload), fields(topic = self.topic))]
    pub async fn call(&self, payload: Req) -> DepositResult<Resp> {
        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: correlation_id,
        };

        let request = CorrelatedRequest {
            correlation_id,
            topic: self.topic.to_string(),
            payload,
        };
        // One deadline covers publishing onto a possibly full channel and the wait.
        let deadline = Instant::now() + self.timeout;

        match timeout_at(deadline, self.publisher.publish(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.record("error");
                return Err(DepositError::integration(
                    self.topic,
                    format!("failed to publish request: {}", e),
                ));
            }
            Err(_) => return Err(self.timed_out(correlation_id, "publish")),
        }
        debug!(correlation_id = %correlation_id, "Request published, awaiting response");

        match timeout_at(deadline, rx).await {
            Ok(Ok(response)) => {
                self.record("ok");
                Ok(response)
            }
            Ok(Err(_)) => {
                self.record("error");
                Err(DepositError::integration(
                    self.topic,
                    "responder dropped the request",
                ))
            }
            Err(_) => Err(self.timed_out(correlation_id, "response")),
        }
    }

    fn timed_out(&self, correlation_id: Uuid, stage: &'static str) -> DepositError {
        self.record("timeout");
        warn!(
            correlation_id = %correlation_id,
            stage,
            timeout_ms = self.timeout.as_millis() as u64,
            "Correlated request timed out"
        );
        DepositError::integration(
            self.topic,
            format!("no response within {}ms", self.timeout.as_millis()),
        )
    }

    /// Delivers a response. Returns `false` if nobody is waiting for
    /// `correlation_id` any more (late or unknown response).
    pub fn complete(&self, correlation_id: Uuid, response: Resp) -> bool {
        match self.pending.remove(&correlation_id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => {
                warn!(
                    topic = self.topic,
                    correlation_id = %correlation_id,
                    "Dropping response with no pending request"
                );
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn record(&self, outcome: &str) {
        CORRELATOR_CALLS_TOTAL
            .with_label_values(&[self.topic, outcome])
            .inc();
    }
}
