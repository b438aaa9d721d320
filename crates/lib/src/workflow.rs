//! Per-request interaction state machine: Simple, Negotiated, Aggregated.
//!
//! Every failure here is local to one candidate bot and is returned as a
//! `FailureReason`, never raised past the dispatcher.

use crate::assembler::{ContentItem, ResultAssembler};
use crate::choice::resolve_choice;
use crate::classify::PromptPolicy;
use crate::transport::{InboundEvent, Transport};
use crate::watcher::{deadline_in, ResponseWatcher, Signal, WatchError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Interaction shape a platform's bots require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// One send, one terminal reply.
    Simple,
    /// One or more prompt/choice rounds before the content.
    Negotiated,
    /// Content may arrive as several messages (an album); collect until quiet.
    Aggregated,
}

/// Timing and choice preferences for one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub poll_interval: Duration,
    /// Deadline for each watch waiting on a reply (per negotiation round).
    pub reply_timeout: Duration,
    /// Look-ahead window of the "any more?" probe.
    pub probe_timeout: Duration,
    /// Wall-clock ceiling for a whole aggregated run.
    pub aggregation_budget: Duration,
    pub max_rounds: u32,
    /// Label substrings per negotiation round, best first. The last list is reused for later rounds.
    pub preferences: Vec<Vec<String>>,
}

impl WorkflowSettings {
    fn preference_for_round(&self, round: usize) -> &[String] {
        self.preferences
            .get(round)
            .or(self.preferences.last())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("no matching choice among [{}]", .0.join(", "))]
    NoMatchingChoice(Vec<String>),
    #[error("agent timeout waiting for {0}")]
    AgentTimeout(&'static str),
    #[error("agent replied with error: {0}")]
    AgentErrorReply(String),
    #[error("too many rounds ({0})")]
    TooManyRounds(u32),
    #[error("transport: {0}")]
    Transport(String),
    #[error("cancelled")]
    Cancelled,
}

/// Items collected from one bot. `degraded` marks an aggregation cut off by its ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowOutcome {
    pub items: Vec<ContentItem>,
    pub degraded: bool,
}

enum Pass {
    NewItem,
    Idle,
    Finished,
}

fn watch_failure(err: WatchError, waiting_for: &'static str) -> FailureReason {
    match err {
        WatchError::TimedOut => FailureReason::AgentTimeout(waiting_for),
        WatchError::Cancelled => FailureReason::Cancelled,
    }
}

fn error_reply(event: &InboundEvent) -> FailureReason {
    FailureReason::AgentErrorReply(event.text().unwrap_or_default().trim().to_string())
}

fn item_of(event: &InboundEvent) -> Result<ContentItem, FailureReason> {
    ContentItem::from_event(event)
        .ok_or_else(|| FailureReason::AgentErrorReply("reply carried no content".to_string()))
}

fn labels(event: &InboundEvent) -> Vec<String> {
    event.choices.iter().map(|c| c.label.clone()).collect()
}

/// Drives one conversation that has just received the outbound request.
pub struct InteractionWorkflow<'a> {
    transport: &'a dyn Transport,
    watcher: ResponseWatcher<'a>,
    settings: &'a WorkflowSettings,
}

impl<'a> InteractionWorkflow<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        watcher: ResponseWatcher<'a>,
        settings: &'a WorkflowSettings,
    ) -> Self {
        Self {
            transport,
            watcher,
            settings,
        }
    }

    pub async fn run(mut self, kind: RequestKind) -> Result<WorkflowOutcome, FailureReason> {
        match kind {
            RequestKind::Simple => self.simple().await.map(single),
            RequestKind::Negotiated => self.negotiate().await.map(single),
            RequestKind::Aggregated => self.aggregate().await,
        }
    }

    async fn simple(&mut self) -> Result<ContentItem, FailureReason> {
        let deadline = deadline_in(self.settings.reply_timeout);
        let signal = self
            .watcher
            .watch(deadline, PromptPolicy::Ignore)
            .await
            .map_err(|e| watch_failure(e, "reply"))?;
        match signal {
            Signal::ContentReady(e) => item_of(&e),
            Signal::ErrorReply(e) => Err(error_reply(&e)),
            Signal::Prompt(e) => Err(FailureReason::NoMatchingChoice(labels(&e))),
        }
    }

    async fn negotiate(&mut self) -> Result<ContentItem, FailureReason> {
        let max_rounds = self.settings.max_rounds.max(1);
        for round in 0..max_rounds {
            let deadline = deadline_in(self.settings.reply_timeout);
            let signal = self
                .watcher
                .watch(deadline, PromptPolicy::Accept)
                .await
                .map_err(|e| watch_failure(e, "negotiation"))?;
            match signal {
                Signal::ContentReady(e) => return item_of(&e),
                Signal::ErrorReply(e) => return Err(error_reply(&e)),
                Signal::Prompt(e) => self.pick(&e, round as usize).await?,
            }
        }
        Err(FailureReason::TooManyRounds(max_rounds))
    }

    /// Resolve and activate a choice, then resume after the activation's event.
    async fn pick(&mut self, prompt: &InboundEvent, round: usize) -> Result<(), FailureReason> {
        let preference = self.settings.preference_for_round(round);
        let choice = resolve_choice(&prompt.choices, preference)
            .ok_or_else(|| FailureReason::NoMatchingChoice(labels(prompt)))?;
        if self.watcher.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }
        log::debug!("workflow: round {} choosing {:?}", round + 1, choice.label);
        let resume = self
            .transport
            .activate(&choice.handle)
            .await
            .map_err(|e| FailureReason::Transport(e.to_string()))?;
        self.watcher.seek(resume);
        Ok(())
    }

    async fn aggregate(&mut self) -> Result<WorkflowOutcome, FailureReason> {
        let ceiling = deadline_in(self.settings.aggregation_budget);
        let first = self.negotiate().await?;
        let mut assembler = ResultAssembler::new();
        assembler.push(first);

        let mut degraded = false;
        loop {
            if Instant::now() >= ceiling {
                degraded = true;
                break;
            }
            match self
                .collect(ceiling, self.settings.poll_interval, &mut assembler)
                .await?
            {
                Pass::NewItem => continue,
                Pass::Finished => break,
                Pass::Idle => {}
            }
            match self
                .collect(ceiling, self.settings.probe_timeout, &mut assembler)
                .await?
            {
                Pass::NewItem => continue,
                Pass::Finished => break,
                Pass::Idle => {
                    degraded = Instant::now() >= ceiling;
                    break;
                }
            }
        }
        if degraded {
            log::info!(
                "workflow: aggregation ceiling reached with {} items",
                assembler.len()
            );
        }
        Ok(WorkflowOutcome {
            items: assembler.finalize(),
            degraded,
        })
    }

    /// Watch for up to `window` (clipped to `ceiling`) for one previously unseen item.
    async fn collect(
        &mut self,
        ceiling: Instant,
        window: Duration,
        assembler: &mut ResultAssembler,
    ) -> Result<Pass, FailureReason> {
        let deadline = deadline_in(window).min(ceiling);
        loop {
            match self.watcher.watch(deadline, PromptPolicy::Ignore).await {
                Ok(Signal::ContentReady(e)) => {
                    if assembler.push(item_of(&e)?) {
                        return Ok(Pass::NewItem);
                    }
                    if Instant::now() >= deadline {
                        return Ok(Pass::Idle);
                    }
                }
                Ok(Signal::ErrorReply(e)) => {
                    log::debug!("workflow: error reply ends aggregation: {:?}", e.text());
                    return Ok(Pass::Finished);
                }
                Ok(Signal::Prompt(_)) => {}
                Err(WatchError::TimedOut) => return Ok(Pass::Idle),
                Err(WatchError::Cancelled) => return Err(FailureReason::Cancelled),
            }
        }
    }
}

fn single(item: ContentItem) -> WorkflowOutcome {
    WorkflowOutcome {
        items: vec![item],
        degraded: false,
    }
}
