//! Event publication on the message bus.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use edgelink_core::messaging::Topics;
use edgelink_core::models::{AddEventRequest, Event};
use edgelink_core::{Error, MessageBus, MessageEnvelope, Result};

/// Publishes events and command responses.
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    topics: Topics,
    /// Payload cap in bytes; zero means unlimited.
    max_event_size: usize,
}

impl Publisher {
    pub fn new(bus: Arc<dyn MessageBus>, topics: Topics, max_event_size: usize) -> Self {
        Self {
            bus,
            topics,
            max_event_size,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Publishes `event` on its device events topic.
    ///
    /// Fails with `ContractInvalid` when the encoded event exceeds the size cap.
    pub async fn send_event(&self, event: Event, correlation_id: &str) -> Result<()> {
        let topic = self
            .topics
            .event(&event.profile_name, &event.device_name, &event.source_name);
        let mut envelope = MessageEnvelope::json(&AddEventRequest::new(event))?;
        if !correlation_id.is_empty() {
            envelope.correlation_id = correlation_id.to_string();
        }
        if self.max_event_size > 0 && envelope.payload.len() > self.max_event_size {
            return Err(Error::contract_invalid(format!(
                "event size {} bytes exceeds the limit of {} bytes",
                envelope.payload.len(),
                self.max_event_size
            )));
        }
        debug!(topic = %topic, correlation_id = %envelope.correlation_id, "Publishing event");
        self.bus.publish(&topic, envelope).await
    }

    /// Publishes `response` on the response topic of `request_id`.
    pub async fn send_response(&self, request_id: &str, response: MessageEnvelope) -> Result<()> {
        self.bus
            .publish(&self.topics.response(request_id), response)
            .await
    }
}

struct Job {
    event: Event,
    correlation_id: String,
}

/// Bounded pool of publishing workers shared by every event producer.
///
/// Each worker owns a one-slot queue and jobs are routed by device and
/// source, so events of one source are published in submission order.
/// [`PublishPool::submit`] waits while the chosen worker is busy.
#[derive(Clone)]
pub struct PublishPool {
    workers: Arc<Vec<mpsc::Sender<Job>>>,
}

impl PublishPool {
    pub fn start(publisher: Arc<Publisher>, size: usize, shutdown: CancellationToken) -> Self {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, mut rx) = mpsc::channel::<Job>(1);
            workers.push(tx);
            let publisher = Arc::clone(&publisher);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        _ = shutdown.cancelled() => None,
                        job = rx.recv() => job,
                    };
                    let Some(job) = job else { break };
                    if let Err(e) = publisher.send_event(job.event, &job.correlation_id).await {
                        error!(correlation_id = %job.correlation_id, error = %e, "Failed to publish event");
                    }
                }
            });
        }
        Self {
            workers: Arc::new(workers),
        }
    }

    fn worker_for(&self, event: &Event) -> &mpsc::Sender<Job> {
        let mut hasher = DefaultHasher::new();
        event.device_name.hash(&mut hasher);
        event.source_name.hash(&mut hasher);
        let index = (hasher.finish() % self.workers.len() as u64) as usize;
        &self.workers[index]
    }

    /// Queues an event, waiting while its worker is saturated.
    pub async fn submit(&self, event: Event, correlation_id: impl Into<String>) -> Result<()> {
        let worker = self.worker_for(&event);
        worker
            .send(Job {
                event,
                correlation_id: correlation_id.into(),
            })
            .await
            .map_err(|_| Error::unavailable("event publishing has stopped"))
    }
}
