//! MQTT message bus on rumqttc.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{topic_matches, MessageBus, MessageEnvelope, Subscription, SUBSCRIPTION_CAPACITY};
use crate::error::{Error, ErrorKind, Result};

const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;
const MAX_POLL_ERRORS: u32 = 5;

type Subscribers = Arc<RwLock<Vec<(Vec<String>, mpsc::Sender<MessageEnvelope>)>>>;

impl From<rumqttc::ClientError> for Error {
    fn from(e: rumqttc::ClientError) -> Self {
        Error::with_cause(
            ErrorKind::ServiceUnavailable,
            "mqtt client error",
            Error::unavailable(e.to_string()),
        )
    }
}

/// Message bus backed by an MQTT broker.
///
/// Envelopes travel as JSON. A single event-loop task fans incoming publishes
/// out to every subscription whose patterns match.
pub struct MqttMessageBus {
    client: AsyncClient,
    subscribers: Subscribers,
    cancel: CancellationToken,
}

impl MqttMessageBus {
    /// Connects to `host:port` and starts the event loop.
    pub fn connect(client_id: &str, host: &str, port: u16) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options.set_keep_alive(Duration::from_secs(60));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let subscribers: Subscribers = Arc::new(RwLock::new(Vec::new()));
        let cancel = CancellationToken::new();

        let fanout = subscribers.clone();
        let stop = cancel.clone();
        let broker = format!("{host}:{port}");
        tokio::spawn(async move {
            let mut error_count = 0;
            loop {
                let notification = tokio::select! {
                    _ = stop.cancelled() => break,
                    n = eventloop.poll() => n,
                };
                match notification {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        error_count = 0;
                        let topic = publish.topic.to_string();
                        let mut envelope: MessageEnvelope =
                            match serde_json::from_slice(&publish.payload) {
                                Ok(envelope) => envelope,
                                Err(e) => {
                                    warn!(topic = %topic, "dropping non-envelope mqtt payload: {}", e);
                                    continue;
                                }
                            };
                        envelope.received_topic = topic.clone();
                        dispatch(&fanout, &topic, envelope).await;
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        error_count = 0;
                        info!("MQTT broker {} connection acknowledged", broker);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error_count += 1;
                        if error_count >= MAX_POLL_ERRORS {
                            error!(
                                "MQTT broker {} error count reached {}, stopping: {}",
                                broker, MAX_POLL_ERRORS, e
                            );
                            break;
                        }
                        warn!("MQTT broker {} error ({}/{}): {}", broker, error_count, MAX_POLL_ERRORS, e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            debug!("MQTT event loop for {} finished", broker);
        });

        Self {
            client,
            subscribers,
            cancel,
        }
    }
}

async fn dispatch(subscribers: &Subscribers, topic: &str, envelope: MessageEnvelope) {
    let targets: Vec<mpsc::Sender<MessageEnvelope>> = subscribers
        .read()
        .iter()
        .filter(|(patterns, _)| patterns.iter().any(|p| topic_matches(p, topic)))
        .map(|(_, tx)| tx.clone())
        .collect();
    for tx in targets {
        let _ = tx.send(envelope.clone()).await;
    }
    subscribers.write().retain(|(_, tx)| !tx.is_closed());
}

#[async_trait]
impl MessageBus for MqttMessageBus {
    async fn publish(&self, topic: &str, envelope: MessageEnvelope) -> Result<()> {
        let payload = serde_json::to_vec(&envelope)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, patterns: &[String]) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.subscribers.write().push((patterns.to_vec(), tx));
        for pattern in patterns {
            self.client.subscribe(pattern, QoS::AtLeastOnce).await?;
        }
        Ok(Subscription::new(rx))
    }

    async fn disconnect(&self) -> Result<()> {
        self.cancel.cancel();
        self.client.disconnect().await?;
        Ok(())
    }
}
