//! In-process message bus on a tokio broadcast channel.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{topic_matches, MessageBus, MessageEnvelope, Subscription, SUBSCRIPTION_CAPACITY};
use crate::error::Result;

/// Default broadcast capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Message bus living entirely inside the process.
///
/// Each subscription gets a forwarding task that drops envelopes whose topic
/// matches none of its patterns. Slow subscribers may miss messages once the
/// broadcast buffer wraps.
#[derive(Clone)]
pub struct MemoryMessageBus {
    tx: broadcast::Sender<(String, MessageEnvelope)>,
}

impl MemoryMessageBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MemoryMessageBus {
    async fn publish(&self, topic: &str, mut envelope: MessageEnvelope) -> Result<()> {
        envelope.received_topic = topic.to_string();
        // No subscribers is not an error.
        let _ = self.tx.send((topic.to_string(), envelope));
        Ok(())
    }

    async fn subscribe(&self, patterns: &[String]) -> Result<Subscription> {
        let mut source = self.tx.subscribe();
        let patterns = patterns.to_vec();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok((topic, envelope)) => {
                        if !patterns.iter().any(|p| topic_matches(p, &topic)) {
                            continue;
                        }
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
