use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known message property slot carrying a serialized application
/// object. A message with this slot set is routed to object handling
/// instead of plain chat delivery.
pub const OBJECT_PROPERTY_NAME: &str = "session.connection.object";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Stanza {
    Iq(Iq),
    Message(ChatMessage),
    Presence(Presence),
}

impl Stanza {
    /// The serialized object carried in the well-known property slot, if
    /// this stanza is a message and the slot is populated.
    pub fn object_payload(&self) -> Option<Vec<u8>> {
        match self {
            Stanza::Message(message) => message.object_payload(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IqKind {
    Get,
    Set,
    Result,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iq {
    pub kind: IqKind,
    /// Populated on the result acknowledging resource binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_jid: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Iq {
    pub fn result() -> Self {
        Self {
            kind: IqKind::Result,
            bound_jid: None,
            payload: Value::Null,
        }
    }

    pub fn bind_result(jid: impl Into<String>) -> Self {
        Self {
            kind: IqKind::Result,
            bound_jid: Some(jid.into()),
            payload: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Normal,
    Chat,
    GroupChat,
    Headline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Value>,
}

impl Default for ChatMessage {
    fn default() -> Self {
        Self {
            to: None,
            from: None,
            kind: MessageKind::Normal,
            subject: None,
            body: None,
            thread: None,
            properties: HashMap::new(),
        }
    }
}

impl ChatMessage {
    pub fn object_payload(&self) -> Option<Vec<u8>> {
        let value = self.properties.get(OBJECT_PROPERTY_NAME)?;
        let numbers = value.as_array()?;
        let mut bytes = Vec::with_capacity(numbers.len());
        for number in numbers {
            bytes.push(number.as_u64()? as u8);
        }
        Some(bytes)
    }

    pub fn set_object_payload(&mut self, bytes: &[u8]) {
        let encoded = Value::Array(bytes.iter().map(|b| Value::from(*b)).collect());
        self.properties
            .insert(OBJECT_PROPERTY_NAME.to_string(), encoded);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub kind: PresenceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Role and membership transitions a room reports about its occupants.
/// Only `Joined` and `Left` feed container state; the rest are observed
/// and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Joined,
    Left,
    Kicked,
    Banned,
    VoiceGranted,
    VoiceRevoked,
    MembershipGranted,
    MembershipRevoked,
    ModeratorGranted,
    ModeratorRevoked,
    OwnershipGranted,
    OwnershipRevoked,
    AdminGranted,
    AdminRevoked,
    NicknameChanged,
}

#[cfg(test)]
#[path = "tests/stanza_tests.rs"]
mod tests;
