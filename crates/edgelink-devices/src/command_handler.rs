//! Command and device-validation requests arriving over the message bus.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use edgelink_core::messaging::{CommandMethod, Topics};
use edgelink_core::models::{AddDeviceRequest, BaseResponse, Event, EventResponse};
use edgelink_core::{Error, MessageBus, MessageEnvelope, Result};

use crate::dispatcher::CommandDispatcher;
use crate::driver::ProtocolDriver;
use crate::publisher::Publisher;

/// Query key: also publish the resulting event (default false).
pub const PUSH_EVENT: &str = "ds-pushevent";
/// Query key: include the event in the response (default true).
pub const RETURN_EVENT: &str = "ds-returnevent";
/// Query key: treat the command name as a resource pattern (default true).
pub const REGEX_CMD: &str = "ds-regexcmd";

/// Reserved query options of a command request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOptions {
    pub push_event: bool,
    pub return_event: bool,
    pub regex: bool,
    /// The remaining query parameters, re-encoded for the driver.
    pub raw_query: String,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            push_event: false,
            return_event: true,
            regex: true,
            raw_query: String::new(),
        }
    }
}

impl CommandOptions {
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self> {
        fn flag(params: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
            match params.get(key).map(|v| v.to_ascii_lowercase()) {
                None => Ok(default),
                Some(v) if v == "true" || v == "yes" => Ok(true),
                Some(v) if v == "false" || v == "no" => Ok(false),
                Some(v) => Err(Error::contract_invalid(format!(
                    "invalid value {v} for {key}, expected true or false"
                ))),
            }
        }

        let mut rest: Vec<(&String, &String)> = params
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), PUSH_EVENT | RETURN_EVENT | REGEX_CMD))
            .collect();
        rest.sort();
        let raw_query = rest
            .into_iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(Self {
            push_event: flag(params, PUSH_EVENT, false)?,
            return_event: flag(params, RETURN_EVENT, true)?,
            regex: flag(params, REGEX_CMD, true)?,
            raw_query,
        })
    }
}

/// Answers requests on `commandrequest/{instance}/#` and `validate/device/{instance}`.
pub struct CommandHandler {
    dispatcher: Arc<CommandDispatcher>,
    publisher: Arc<Publisher>,
    driver: Arc<dyn ProtocolDriver>,
    topics: Topics,
}

impl CommandHandler {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        publisher: Arc<Publisher>,
        driver: Arc<dyn ProtocolDriver>,
        topics: Topics,
    ) -> Self {
        Self {
            dispatcher,
            publisher,
            driver,
            topics,
        }
    }

    /// Subscribes and spawns the request loop; each request runs in its own task.
    pub async fn start(
        self: Arc<Self>,
        bus: &dyn MessageBus,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let patterns = vec![
            self.topics.command_request_pattern(),
            self.topics.validate_device(),
        ];
        let mut subscription = bus.subscribe(&patterns).await?;
        info!(patterns = ?patterns, "Listening for command requests");
        Ok(tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    request = subscription.recv() => request,
                };
                let Some(request) = request else { break };
                let handler = Arc::clone(&self);
                tokio::spawn(async move {
                    let response = handler.respond(&request).await;
                    if let Err(e) = handler
                        .publisher
                        .send_response(&request.request_id, response)
                        .await
                    {
                        error!(correlation_id = %request.correlation_id, error = %e, "Failed to publish response");
                    }
                });
            }
            debug!("Command request loop stopped");
        }))
    }

    /// Builds the response envelope for one request.
    pub async fn respond(&self, request: &MessageEnvelope) -> MessageEnvelope {
        let result = if request.received_topic == self.topics.validate_device() {
            self.validate_device(request).await
        } else {
            self.command(request).await
        };
        result.unwrap_or_else(|e| {
            error!(
                correlation_id = %request.correlation_id,
                topic = %request.received_topic,
                error = %e,
                "Request failed"
            );
            MessageEnvelope::error_response(request, &e)
        })
    }

    async fn command(&self, request: &MessageEnvelope) -> Result<MessageEnvelope> {
        let target = self.topics.parse_command_request(&request.received_topic)?;
        let options = CommandOptions::from_query(&request.query_params)?;
        debug!(
            correlation_id = %request.correlation_id,
            device = %target.device,
            source = %target.command,
            method = ?target.method,
            "Handling command request"
        );

        match target.method {
            CommandMethod::Get => {
                let event = self
                    .dispatcher
                    .get_command(&target.device, &target.command, &options.raw_query, options.regex)
                    .await?;
                self.push(&event, &options, &request.correlation_id).await;
                let body = EventResponse::new(
                    request.request_id.clone(),
                    options.return_event.then_some(event),
                );
                MessageEnvelope::response_to(request, &body)
            }
            CommandMethod::Set => {
                let params: HashMap<String, serde_json::Value> = request.decode()?;
                let event = self
                    .dispatcher
                    .set_command(&target.device, &target.command, &options.raw_query, &params)
                    .await?;
                if let Some(event) = &event {
                    self.push(event, &options, &request.correlation_id).await;
                }
                MessageEnvelope::response_to(
                    request,
                    &BaseResponse::new(request.request_id.clone(), 200, ""),
                )
            }
        }
    }

    async fn push(&self, event: &Event, options: &CommandOptions, correlation_id: &str) {
        if !options.push_event {
            return;
        }
        if let Err(e) = self.publisher.send_event(event.clone(), correlation_id).await {
            error!(correlation_id = %correlation_id, error = %e, "Failed to push event");
        }
    }

    async fn validate_device(&self, request: &MessageEnvelope) -> Result<MessageEnvelope> {
        let body: AddDeviceRequest = request.decode()?;
        self.driver
            .validate_device(&body.device)
            .await
            .map_err(|e| e.context(format!("device {} failed validation", body.device.name)))?;
        MessageEnvelope::response_to(
            request,
            &BaseResponse::new(request.request_id.clone(), 200, ""),
        )
    }
}
