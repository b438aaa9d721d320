//! Collected content items: identity-based dedup in first-seen order.

use crate::classify::find_locator;
use crate::transport::{EventId, EventPayload, InboundEvent};
use serde::Serialize;
use std::collections::HashSet;

/// Where the relayed content lives: a transport message with media, or a text reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PayloadRef {
    #[serde(rename_all = "camelCase")]
    Media {
        event_id: EventId,
        media_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Text { event_id: EventId, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    /// Stable dedup key: media id, first locator in the text, or the trimmed text.
    pub identity: String,
    pub payload_ref: PayloadRef,
}

impl ContentItem {
    /// Item carried by a content event; None for events without a payload.
    pub fn from_event(event: &InboundEvent) -> Option<Self> {
        match event.payload.as_ref()? {
            EventPayload::Media {
                media_id,
                mime_type,
                ..
            } => Some(Self {
                identity: media_id.clone(),
                payload_ref: PayloadRef::Media {
                    event_id: event.id,
                    media_id: media_id.clone(),
                    mime_type: mime_type.clone(),
                },
            }),
            EventPayload::Text { text } => {
                let identity = find_locator(text).unwrap_or(text.trim()).to_string();
                Some(Self {
                    identity,
                    payload_ref: PayloadRef::Text {
                        event_id: event.id,
                        text: text.clone(),
                    },
                })
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ResultAssembler {
    seen: HashSet<String>,
    items: Vec<ContentItem>,
}

impl ResultAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item unless its identity was already collected. Returns true when added.
    pub fn push(&mut self, item: ContentItem) -> bool {
        if !self.seen.insert(item.identity.clone()) {
            log::debug!("assembler: dropping duplicate {}", item.identity);
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn finalize(self) -> Vec<ContentItem> {
        self.items
    }
}

/// Deduplicate raw items by identity, keeping the first occurrence of each.
pub fn finalize_items(raw: impl IntoIterator<Item = ContentItem>) -> Vec<ContentItem> {
    let mut assembler = ResultAssembler::new();
    for item in raw {
        assembler.push(item);
    }
    assembler.finalize()
}
