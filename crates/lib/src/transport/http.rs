//! Userbot bridge transport: JSON over HTTP to the process that owns the messaging session.
//!
//! The bridge mirrors the Bot API envelope (`{ ok, result, description }`).

use super::{ActivationHandle, EventId, InboundEvent, Transport, TransportError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: EventId,
}

/// Transport backed by a userbot bridge.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T, TransportError> {
        let res = self.authorize(req).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!("{} failed: {} {}", method, status, body)));
        }
        let data: ApiResponse<T> = res.json().await?;
        if !data.ok {
            return Err(TransportError::Api(format!(
                "{} returned ok: false ({})",
                method,
                data.description.unwrap_or_default()
            )));
        }
        data.result
            .ok_or_else(|| TransportError::Api(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, peer: &str, text: &str) -> Result<EventId, TransportError> {
        let url = format!("{}/send", self.base_url);
        let body = serde_json::json!({ "peer": peer, "text": text });
        let sent: SentMessage = self.call("send", self.client.post(&url).json(&body)).await?;
        Ok(sent.id)
    }

    async fn poll(
        &self,
        peer: &str,
        after: EventId,
        limit: usize,
    ) -> Result<Vec<InboundEvent>, TransportError> {
        let url = format!("{}/updates", self.base_url);
        let query = [
            ("peer", peer.to_string()),
            ("after", after.to_string()),
            ("limit", limit.to_string()),
        ];
        self.call("updates", self.client.get(&url).query(&query))
            .await
    }

    async fn activate(&self, handle: &ActivationHandle) -> Result<EventId, TransportError> {
        let url = format!("{}/activate", self.base_url);
        let body = serde_json::json!({ "handle": handle });
        let sent: SentMessage = self
            .call("activate", self.client.post(&url).json(&body))
            .await?;
        Ok(sent.id)
    }
}
