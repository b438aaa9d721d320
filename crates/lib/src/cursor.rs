//! Restartable read position in one conversation's inbound event log.
//!
//! The transport offers no push subscription per conversation, so the cursor re-polls
//! after its last position. Events are yielded one at a time, in strictly increasing id
//! order, and never twice. Fetched-but-unyielded events stay buffered, so a caller that
//! stops early (a watcher short-circuiting on a terminal reply) loses nothing.

use crate::transport::{Conversation, EventId, InboundEvent, Transport};
use std::collections::VecDeque;

pub struct EventCursor<'a> {
    transport: &'a dyn Transport,
    peer: String,
    position: EventId,
    high_water: EventId,
    limit: usize,
    buffer: VecDeque<InboundEvent>,
}

impl<'a> EventCursor<'a> {
    /// Cursor over `conversation` yielding only events with id greater than `after`.
    pub fn new(
        transport: &'a dyn Transport,
        conversation: &Conversation,
        after: EventId,
        limit: usize,
    ) -> Self {
        Self {
            transport,
            peer: conversation.agent.clone(),
            position: after,
            high_water: after,
            limit: limit.max(1),
            buffer: VecDeque::new(),
        }
    }

    /// Id of the last event yielded (or the starting point).
    pub fn position(&self) -> EventId {
        self.position
    }

    /// Move forward to `id`, discarding buffered events at or before it. Never moves back.
    pub fn seek(&mut self, id: EventId) {
        if id <= self.position {
            return;
        }
        self.position = id;
        self.high_water = self.high_water.max(id);
        self.buffer.retain(|e| e.id > id);
    }

    /// Next unseen event, polling the transport when the buffer is empty.
    ///
    /// Returns None when the poll produced nothing new. A failed poll also returns None:
    /// transient transport errors are logged here and never reach the state machine.
    pub async fn next_event(&mut self) -> Option<InboundEvent> {
        if self.buffer.is_empty() {
            self.fetch().await;
        }
        self.next_buffered()
    }

    /// Next already-fetched event, without touching the transport.
    pub fn next_buffered(&mut self) -> Option<InboundEvent> {
        let event = self.buffer.pop_front()?;
        self.position = event.id;
        Some(event)
    }

    /// Poll the transport once and buffer whatever is new.
    pub async fn fetch(&mut self) {
        let mut batch = match self
            .transport
            .poll(&self.peer, self.high_water, self.limit)
            .await
        {
            Ok(b) => b,
            Err(e) => {
                log::debug!("cursor: poll {} after {} failed: {}", self.peer, self.high_water, e);
                return;
            }
        };
        batch.retain(|e| e.id > self.high_water);
        batch.sort_by_key(|e| e.id);
        batch.dedup_by_key(|e| e.id);
        if let Some(last) = batch.last() {
            self.high_water = last.id;
        }
        if !batch.is_empty() {
            log::debug!(
                "cursor: {} new events from {} (up to {})",
                batch.len(),
                self.peer,
                self.high_water
            );
        }
        self.buffer.extend(batch);
    }
}
