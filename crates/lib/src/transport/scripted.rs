//! In-memory fake bots driven by a script of delayed replies.
//!
//! Replies become visible once their delay has elapsed (tokio time, so paused-clock
//! tests are deterministic). Ids are assigned when a reply becomes visible, which keeps
//! id order equal to arrival order like a real event log.

use super::{
    ActivationHandle, Choice, EventId, EventPayload, InboundEvent, Transport, TransportError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// One scripted bot message.
#[derive(Debug, Clone)]
pub struct Reply {
    delay: Duration,
    payload: Option<EventPayload>,
    choices: Vec<String>,
}

impl Reply {
    pub fn media(media_id: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            payload: Some(EventPayload::Media {
                media_id: media_id.into(),
                mime_type: Some("video/mp4".to_string()),
                caption: None,
            }),
            choices: Vec::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            payload: Some(EventPayload::Text { text: text.into() }),
            choices: Vec::new(),
        }
    }

    /// A message offering buttons with the given labels.
    pub fn prompt(text: impl Into<String>, labels: &[&str]) -> Self {
        Self {
            choices: labels.iter().map(|l| l.to_string()).collect(),
            ..Self::text(text)
        }
    }

    /// Delay relative to the send or activation that triggered this reply.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Script for one bot: replies to the initial send and to button presses.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    on_send: Vec<Reply>,
    on_choice: HashMap<String, Vec<Reply>>,
    on_any_choice: Vec<Reply>,
}

impl ScriptedAgent {
    /// A bot that accepts messages and never answers.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn on_send(mut self, reply: Reply) -> Self {
        self.on_send.push(reply);
        self
    }

    /// Reply sent when the button with this label (case-insensitive) is pressed.
    pub fn on_choice(mut self, label: &str, reply: Reply) -> Self {
        self.on_choice
            .entry(label.to_lowercase())
            .or_default()
            .push(reply);
        self
    }

    /// Reply sent when a button without a specific script is pressed.
    pub fn on_any_choice(mut self, reply: Reply) -> Self {
        self.on_any_choice.push(reply);
        self
    }

    fn replies_for_choice(&self, label: &str) -> &[Reply] {
        self.on_choice
            .get(&label.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(self.on_any_choice.as_slice())
    }
}

struct Pending {
    peer: String,
    at: Instant,
    seq: u64,
    reply: Reply,
}

#[derive(Default)]
struct State {
    next_id: EventId,
    next_seq: u64,
    agents: HashMap<String, ScriptedAgent>,
    pending: Vec<Pending>,
    log: HashMap<String, Vec<InboundEvent>>,
    handles: HashMap<String, (String, String)>,
    sent: Vec<(String, String)>,
    activations: Vec<String>,
    failing_polls: usize,
    polls: usize,
}

impl State {
    fn allocate_id(&mut self) -> EventId {
        self.next_id += 1;
        self.next_id
    }

    fn schedule(&mut self, peer: &str, replies: Vec<Reply>) {
        let now = Instant::now();
        for reply in replies {
            self.next_seq += 1;
            self.pending.push(Pending {
                peer: peer.to_string(),
                at: now + reply.delay,
                seq: self.next_seq,
                reply,
            });
        }
    }

    /// Move every reply whose time has come into the event log, assigning ids in arrival order.
    fn materialize(&mut self, now: Instant) {
        let (mut due, rest): (Vec<Pending>, Vec<Pending>) =
            self.pending.drain(..).partition(|p| p.at <= now);
        self.pending = rest;
        due.sort_by_key(|p| (p.at, p.seq));
        for p in due {
            let id = self.allocate_id();
            let choices = p
                .reply
                .choices
                .iter()
                .enumerate()
                .map(|(i, label)| {
                    let handle = format!("{}#{}", id, i);
                    self.handles
                        .insert(handle.clone(), (p.peer.clone(), label.clone()));
                    Choice {
                        label: label.clone(),
                        handle: ActivationHandle::new(handle),
                    }
                })
                .collect();
            let event = InboundEvent {
                id,
                payload: p.reply.payload,
                choices,
                received_at: Utc::now(),
            };
            self.log.entry(p.peer).or_default().push(event);
        }
    }
}

/// Transport whose peers are scripted bots.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<State>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the bot reachable as `peer`.
    pub async fn add_agent(&self, peer: impl Into<String>, agent: ScriptedAgent) {
        self.state.lock().await.agents.insert(peer.into(), agent);
    }

    /// Make the next `n` polls fail with a transient error.
    pub async fn fail_next_polls(&self, n: usize) {
        self.state.lock().await.failing_polls = n;
    }

    /// Every (peer, text) sent so far.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().await.sent.clone()
    }

    /// Labels of every activated choice, in order.
    pub async fn activations(&self) -> Vec<String> {
        self.state.lock().await.activations.clone()
    }

    pub async fn poll_count(&self) -> usize {
        self.state.lock().await.polls
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, peer: &str, text: &str) -> Result<EventId, TransportError> {
        let mut state = self.state.lock().await;
        let replies = state
            .agents
            .get(peer)
            .map(|a| a.on_send.clone())
            .ok_or_else(|| TransportError::Api(format!("peer not found: {}", peer)))?;
        state.sent.push((peer.to_string(), text.to_string()));
        let id = state.allocate_id();
        state.schedule(peer, replies);
        Ok(id)
    }

    async fn poll(
        &self,
        peer: &str,
        after: EventId,
        limit: usize,
    ) -> Result<Vec<InboundEvent>, TransportError> {
        let mut state = self.state.lock().await;
        state.polls += 1;
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(TransportError::Api("flood wait".to_string()));
        }
        state.materialize(Instant::now());
        Ok(state
            .log
            .get(peer)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.id > after)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn activate(&self, handle: &ActivationHandle) -> Result<EventId, TransportError> {
        let mut state = self.state.lock().await;
        let (peer, label) = state
            .handles
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| TransportError::UnknownHandle(handle.as_str().to_string()))?;
        state.activations.push(label.clone());
        let replies = state
            .agents
            .get(&peer)
            .map(|a| a.replies_for_choice(&label).to_vec())
            .unwrap_or_default();
        let id = state.allocate_id();
        state.schedule(&peer, replies);
        Ok(id)
    }
}
