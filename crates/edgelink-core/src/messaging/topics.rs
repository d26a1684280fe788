//! Topic builders and MQTT-style topic matching.
//!
//! Name slots (device, profile, command and source names) are URL-escaped so
//! that a `/` inside a name never changes the topic shape.

use crate::error::{Error, Result};
use crate::models::SystemEventType;

/// Matches an MQTT-style pattern against a concrete topic.
///
/// `+` matches exactly one level; a trailing `#` matches the parent level and
/// everything below it.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn escape(name: &str) -> String {
    urlencoding::encode(name).into_owned()
}

fn unescape(segment: &str) -> Result<String> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|e| Error::contract_invalid(format!("invalid topic segment {segment}: {e}")))
}

/// Topic names of one service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    instance: String,
    base_service: String,
}

impl Topics {
    pub fn new(
        prefix: impl Into<String>,
        instance: impl Into<String>,
        base_service: impl Into<String>,
    ) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            instance: instance.into(),
            base_service: base_service.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn base_service(&self) -> &str {
        &self.base_service
    }

    fn join(&self, rest: &str) -> String {
        if self.prefix.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{}", self.prefix, rest)
        }
    }

    /// `events/device/{profile}/{device}/{source}`
    pub fn event(&self, profile: &str, device: &str, source: &str) -> String {
        self.join(&format!(
            "events/device/{}/{}/{}",
            escape(profile),
            escape(device),
            escape(source)
        ))
    }

    /// `response/{instance}/{requestId}`
    pub fn response(&self, request_id: &str) -> String {
        self.join(&format!("response/{}/{}", escape(&self.instance), escape(request_id)))
    }

    /// `system-events/{type}/{action}/{owner}`
    pub fn system_event(&self, event_type: SystemEventType, action: &str, owner: &str) -> String {
        self.join(&format!(
            "system-events/{}/{}/{}",
            event_type.as_str(),
            action,
            escape(owner)
        ))
    }

    /// Patterns the reconciler subscribes to.
    ///
    /// Everything owned by this instance, watcher events of the base
    /// service, and profile deletions regardless of owner.
    pub fn system_event_patterns(&self) -> Vec<String> {
        vec![
            self.join(&format!("system-events/+/+/{}/#", escape(&self.instance))),
            self.join(&format!(
                "system-events/{}/+/{}/#",
                SystemEventType::ProvisionWatcher.as_str(),
                escape(&self.base_service)
            )),
            self.join(&format!(
                "system-events/{}/delete/#",
                SystemEventType::Profile.as_str()
            )),
        ]
    }

    /// `commandrequest/{instance}/{device}/{command}/{method}`
    pub fn command_request(&self, device: &str, command: &str, method: &str) -> String {
        self.join(&format!(
            "commandrequest/{}/{}/{}/{}",
            escape(&self.instance),
            escape(device),
            escape(command),
            method
        ))
    }

    pub fn command_request_pattern(&self) -> String {
        self.join(&format!("commandrequest/{}/#", escape(&self.instance)))
    }

    /// Parses a command request topic built by [`Topics::command_request`].
    pub fn parse_command_request(&self, topic: &str) -> Result<CommandTopic> {
        let head = self.join(&format!("commandrequest/{}/", escape(&self.instance)));
        let rest = topic
            .strip_prefix(&head)
            .ok_or_else(|| Error::contract_invalid(format!("unexpected command topic {topic}")))?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() < 3 {
            return Err(Error::contract_invalid(format!(
                "command topic {topic} must name device, command and method"
            )));
        }
        let method = match parts[2].to_ascii_uppercase().as_str() {
            "GET" => CommandMethod::Get,
            "SET" | "PUT" => CommandMethod::Set,
            other => {
                return Err(Error::contract_invalid(format!(
                    "unknown command method {other}"
                )))
            }
        };
        Ok(CommandTopic {
            device: unescape(parts[0])?,
            command: unescape(parts[1])?,
            method,
        })
    }

    /// `validate/device/{instance}`
    pub fn validate_device(&self) -> String {
        self.join(&format!("validate/device/{}", escape(&self.instance)))
    }
}

/// Direction of a command request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMethod {
    Get,
    Set,
}

/// Parts of a command request topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic {
    pub device: String,
    pub command: String,
    pub method: CommandMethod,
}
