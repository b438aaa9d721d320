//! Supported request targets (content platforms a responder bot can fetch from).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A content platform. Each maps through config to a request kind and a ranked bot list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Tiktok,
    Reddit,
    Twitter,
    Youtube,
}

impl Platform {
    /// All platforms in help order.
    pub const ALL: [Platform; 4] = [
        Platform::Tiktok,
        Platform::Reddit,
        Platform::Twitter,
        Platform::Youtube,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Tiktok => "tiktok",
            Platform::Reddit => "reddit",
            Platform::Twitter => "twitter",
            Platform::Youtube => "youtube",
        }
    }

    /// Capitalized name for user-facing messages (e.g. "Tiktok").
    pub fn display_name(&self) -> String {
        let s = self.as_str();
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or(UnknownPlatform(s.to_string()))
    }
}
