//! Messaging transport: the only way the relay reaches responder bots.
//!
//! The engine depends on the `Transport` trait, never on a concrete client, so a
//! userbot bridge (`HttpTransport`) and a scripted fake (`ScriptedTransport`) are
//! interchangeable.

mod http;
mod scripted;

pub use http::HttpTransport;
pub use scripted::{Reply, ScriptedAgent, ScriptedTransport};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonically increasing position in a conversation's event log.
pub type EventId = i64;

/// Opaque token that activates one choice (e.g. an inline button press).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivationHandle(pub String);

impl ActivationHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One labeled, activatable choice offered by a bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub label: String,
    pub handle: ActivationHandle,
}

/// What an inbound event carries besides buttons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    /// Downloadable content (video, photo, document).
    #[serde(rename_all = "camelCase")]
    Media {
        media_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Text { text: String },
}

/// One message arriving in a conversation. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub id: EventId,
    #[serde(default)]
    pub payload: Option<EventPayload>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Text of the event: message text, or media caption.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Some(EventPayload::Text { text }) => Some(text),
            Some(EventPayload::Media { caption, .. }) => caption.as_deref(),
            None => None,
        }
    }

    pub fn has_media(&self) -> bool {
        matches!(self.payload, Some(EventPayload::Media { .. }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transport api error: {0}")]
    Api(String),
    #[error("unknown activation handle: {0}")]
    UnknownHandle(String),
}

/// Send, poll and activate against bot conversations identified by peer name (e.g. "@embedybot").
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send text to a peer. Returns the id of the sent message so polling can start after it.
    async fn send(&self, peer: &str, text: &str) -> Result<EventId, TransportError>;

    /// Inbound events from `peer` with id greater than `after`, at most `limit`.
    async fn poll(
        &self,
        peer: &str,
        after: EventId,
        limit: usize,
    ) -> Result<Vec<InboundEvent>, TransportError>;

    /// Activate a choice. Returns the id to resume polling from.
    async fn activate(&self, handle: &ActivationHandle) -> Result<EventId, TransportError>;
}

/// Channel with one candidate bot for one resolution attempt.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub agent: String,
    pub opened_at: DateTime<Utc>,
}

impl Conversation {
    pub fn open(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            opened_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_event_json_shape() {
        let raw = r#"{
            "id": 42,
            "payload": { "type": "media", "mediaId": "AgAD1", "caption": "tiktok.com" },
            "choices": [{ "label": "720p", "handle": "cb:1" }],
            "receivedAt": "2024-05-01T10:00:00Z"
        }"#;
        let event: InboundEvent = serde_json::from_str(raw).expect("parse event");
        assert_eq!(event.id, 42);
        assert!(event.has_media());
        assert_eq!(event.text(), Some("tiktok.com"));
        assert_eq!(event.choices[0].handle.as_str(), "cb:1");
    }

    #[test]
    fn text_payload_without_choices() {
        let raw = r#"{ "id": 7, "payload": { "type": "text", "text": "hi" }, "receivedAt": "2024-05-01T10:00:00Z" }"#;
        let event: InboundEvent = serde_json::from_str(raw).expect("parse event");
        assert!(!event.has_media());
        assert!(event.choices.is_empty());
        assert_eq!(event.text(), Some("hi"));
    }
}
