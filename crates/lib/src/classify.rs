//! Tag each inbound bot message as a prompt, content, an error reply, or noise.

use crate::transport::InboundEvent;
use once_cell::sync::Lazy;
use regex::Regex;

static RESOURCE_LOCATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhttps?://[a-z0-9-]+(\.[a-z0-9-]+)+(:\d+)?(/[^\s<>"]*)?"#)
        .expect("static locator regex")
});

/// First well-formed http(s) locator in `text`.
pub fn find_locator(text: &str) -> Option<&str> {
    RESOURCE_LOCATOR.find(text).map(|m| m.as_str())
}

/// Exactly one classification per event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Non-empty choice set that must be activated to proceed.
    Prompt(InboundEvent),
    ContentReady(InboundEvent),
    ErrorReply(InboundEvent),
    /// Commentary, echoes, status lines, or prompts outside a negotiation.
    Noise(InboundEvent),
}

impl Classification {
    pub fn event(&self) -> &InboundEvent {
        match self {
            Classification::Prompt(e)
            | Classification::ContentReady(e)
            | Classification::ErrorReply(e)
            | Classification::Noise(e) => e,
        }
    }

    pub fn is_noise(&self) -> bool {
        matches!(self, Classification::Noise(_))
    }
}

/// Whether choice prompts are meaningful at this point of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPolicy {
    Accept,
    Ignore,
}

/// Pure classifier configured for one conversation.
#[derive(Debug, Clone, Default)]
pub struct MessageClassifier {
    platform_keywords: Vec<String>,
    error_signatures: Vec<String>,
}

impl MessageClassifier {
    /// `platform_keywords` covers every supported platform; `error_signatures` are the active agent's.
    pub fn new(platform_keywords: Vec<String>, error_signatures: Vec<String>) -> Self {
        let lower = |v: Vec<String>| {
            v.into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            platform_keywords: lower(platform_keywords),
            error_signatures: lower(error_signatures),
        }
    }

    pub fn classify(&self, event: &InboundEvent, prompts: PromptPolicy) -> Classification {
        let event = event.clone();
        if !event.choices.is_empty() && !event.has_media() {
            return match prompts {
                PromptPolicy::Accept => Classification::Prompt(event),
                PromptPolicy::Ignore => Classification::Noise(event),
            };
        }
        if self.is_content(&event) {
            return Classification::ContentReady(event);
        }
        let text = event.text().map(str::to_lowercase).unwrap_or_default();
        if self.error_signatures.iter().any(|sig| text.contains(sig)) {
            return Classification::ErrorReply(event);
        }
        Classification::Noise(event)
    }

    fn is_content(&self, event: &InboundEvent) -> bool {
        if event.has_media() {
            return true;
        }
        let Some(text) = event.text() else {
            return false;
        };
        if find_locator(text).is_some() {
            return true;
        }
        let text = text.to_lowercase();
        self.platform_keywords.iter().any(|k| text.contains(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ActivationHandle, Choice, EventPayload};
    use chrono::Utc;

    fn classifier() -> MessageClassifier {
        MessageClassifier::new(
            vec!["TikTok".into(), "youtube".into()],
            vec!["Invalid link".into(), " ".into()],
        )
    }

    fn text_event(text: &str) -> InboundEvent {
        InboundEvent {
            id: 1,
            payload: Some(EventPayload::Text { text: text.into() }),
            choices: Vec::new(),
            received_at: Utc::now(),
        }
    }

    fn with_choices(mut event: InboundEvent, labels: &[&str]) -> InboundEvent {
        event.choices = labels
            .iter()
            .map(|l| Choice {
                label: l.to_string(),
                handle: ActivationHandle::new(*l),
            })
            .collect();
        event
    }

    #[test]
    fn prompt_only_when_accepted() {
        let c = classifier();
        let e = with_choices(text_event("Choose format"), &["Media", "File"]);
        assert!(matches!(c.classify(&e, PromptPolicy::Accept), Classification::Prompt(_)));
        assert!(c.classify(&e, PromptPolicy::Ignore).is_noise());
    }

    #[test]
    fn media_with_buttons_is_content() {
        let c = classifier();
        let media = InboundEvent {
            payload: Some(EventPayload::Media {
                media_id: "AgAD".into(),
                mime_type: None,
                caption: None,
            }),
            ..text_event("")
        };
        let e = with_choices(media, &["Share"]);
        assert!(matches!(
            c.classify(&e, PromptPolicy::Accept),
            Classification::ContentReady(_)
        ));
    }

    #[test]
    fn locator_and_keyword_are_content() {
        let c = classifier();
        for text in ["here: https://cdn.example.com/v.mp4", "Downloaded from TIKTOK"] {
            assert!(matches!(
                c.classify(&text_event(text), PromptPolicy::Ignore),
                Classification::ContentReady(_)
            ));
        }
        assert!(c.classify(&text_event("see http://localhost"), PromptPolicy::Ignore).is_noise());
    }

    #[test]
    fn error_signature_then_noise() {
        let c = classifier();
        assert!(matches!(
            c.classify(&text_event("invalid LINK, try again"), PromptPolicy::Ignore),
            Classification::ErrorReply(_)
        ));
        assert!(c.classify(&text_event("Processing..."), PromptPolicy::Ignore).is_noise());
        let empty = InboundEvent {
            payload: None,
            ..text_event("")
        };
        assert!(c.classify(&empty, PromptPolicy::Ignore).is_noise());
    }

    #[test]
    fn classification_is_deterministic() {
        let c = classifier();
        let events = [
            text_event("Processing..."),
            text_event("https://v.example.org/a"),
            with_choices(text_event("pick"), &["720p"]),
        ];
        for e in &events {
            for policy in [PromptPolicy::Accept, PromptPolicy::Ignore] {
                assert_eq!(c.classify(e, policy), c.classify(e, policy));
            }
        }
    }

    #[test]
    fn finds_first_locator() {
        assert_eq!(
            find_locator("a https://x.io/1 b https://y.io/2"),
            Some("https://x.io/1")
        );
        assert_eq!(find_locator("no links"), None);
    }
}
