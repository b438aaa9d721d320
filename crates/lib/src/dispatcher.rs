//! Cross-bot fallback: try each ranked candidate once until one returns content.

use crate::assembler::ContentItem;
use crate::classify::MessageClassifier;
use crate::config::Config;
use crate::cursor::EventCursor;
use crate::platform::Platform;
use crate::transport::{Conversation, Transport};
use crate::watcher::ResponseWatcher;
use crate::workflow::{FailureReason, InteractionWorkflow};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Successful relay: the winning bot's items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub platform: Platform,
    pub agent: String,
    pub items: Vec<ContentItem>,
    pub elapsed_ms: u64,
    /// True when an album was cut short by the aggregation ceiling.
    pub degraded: bool,
}

/// Why one candidate bot did not produce content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFailure {
    pub agent: String,
    pub reason: FailureReason,
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.agent, self.reason)
    }
}

fn join_failures(failures: &[AgentFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("all agents exhausted for {platform}: {}", join_failures(.failures))]
    AllAgentsExhausted {
        platform: Platform,
        failures: Vec<AgentFailure>,
    },
    #[error("no agents configured for {0}")]
    NotConfigured(Platform),
    #[error("resolution cancelled")]
    Cancelled,
}

/// Resolves requests against a shared transport. Holds only read-only configuration, so
/// concurrent `resolve` calls share nothing mutable.
pub struct AgentDispatcher {
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
}

impl AgentDispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<Config>) -> Self {
        Self { transport, config }
    }

    pub async fn resolve(&self, platform: Platform, payload: &str) -> Result<Resolution, ResolveError> {
        self.resolve_cancellable(platform, payload, CancellationToken::new())
            .await
    }

    /// Like `resolve`, aborting promptly (within one poll interval) once `cancel` fires.
    pub async fn resolve_cancellable(
        &self,
        platform: Platform,
        payload: &str,
        cancel: CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let started = Instant::now();
        let pc = self
            .config
            .platform(platform)
            .filter(|p| !p.agents.is_empty())
            .ok_or(ResolveError::NotConfigured(platform))?;
        let keywords = self.config.platform_keywords();
        let mut failures = Vec::new();

        for agent in &pc.agents {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            let conversation = Conversation::open(agent.as_str());
            log::info!("dispatcher: {} -> {} ({:?})", platform, agent, pc.kind);
            let sent = match self.transport.send(agent, payload).await {
                Ok(id) => id,
                Err(e) => {
                    log::warn!("dispatcher: send to {} failed: {}", agent, e);
                    failures.push(AgentFailure {
                        agent: agent.clone(),
                        reason: FailureReason::Transport(e.to_string()),
                    });
                    continue;
                }
            };

            let settings = self.config.workflow_settings(pc, agent);
            let classifier =
                MessageClassifier::new(keywords.clone(), self.config.error_signatures_for(agent));
            let cursor = EventCursor::new(
                self.transport.as_ref(),
                &conversation,
                sent,
                self.config.transport.poll_limit,
            );
            let watcher =
                ResponseWatcher::new(cursor, &classifier, settings.poll_interval, cancel.clone());
            let outcome = InteractionWorkflow::new(self.transport.as_ref(), watcher, &settings)
                .run(pc.kind)
                .await;

            match outcome {
                Ok(outcome) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    log::info!(
                        "dispatcher: {} delivered {} item(s) in {} ms",
                        agent,
                        outcome.items.len(),
                        elapsed_ms
                    );
                    return Ok(Resolution {
                        platform,
                        agent: agent.clone(),
                        items: outcome.items,
                        elapsed_ms,
                        degraded: outcome.degraded,
                    });
                }
                Err(FailureReason::Cancelled) => {
                    log::info!("dispatcher: {} request cancelled during {}", platform, agent);
                    return Err(ResolveError::Cancelled);
                }
                Err(reason) => {
                    log::warn!("dispatcher: {} failed: {}", agent, reason);
                    failures.push(AgentFailure {
                        agent: agent.clone(),
                        reason,
                    });
                }
            }
        }

        Err(ResolveError::AllAgentsExhausted { platform, failures })
    }
}
