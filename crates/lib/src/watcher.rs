//! Watch a conversation until a bot sends something meaningful or a deadline passes.

use crate::classify::{Classification, MessageClassifier, PromptPolicy};
use crate::cursor::EventCursor;
use crate::transport::{EventId, InboundEvent};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A terminal classification: everything except noise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Prompt(InboundEvent),
    ContentReady(InboundEvent),
    ErrorReply(InboundEvent),
}

impl Signal {
    fn from_classification(c: Classification) -> Option<Self> {
        match c {
            Classification::Prompt(e) => Some(Signal::Prompt(e)),
            Classification::ContentReady(e) => Some(Signal::ContentReady(e)),
            Classification::ErrorReply(e) => Some(Signal::ErrorReply(e)),
            Classification::Noise(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    #[error("no reply before deadline")]
    TimedOut,
    #[error("watch cancelled")]
    Cancelled,
}

/// Far-future stand-in for deadlines that would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, saturating instead of panicking on huge configured timeouts.
pub fn instant_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Deadline `after` from now. See `instant_after`.
pub fn deadline_in(after: Duration) -> Instant {
    instant_after(Instant::now(), after)
}

/// Polls one conversation through its cursor. Successive `watch` calls continue where the
/// previous one stopped, and polls are spaced at least one poll interval apart across calls.
pub struct ResponseWatcher<'a> {
    cursor: EventCursor<'a>,
    classifier: &'a MessageClassifier,
    poll_interval: Duration,
    cancel: CancellationToken,
    last_poll: Option<Instant>,
}

impl<'a> ResponseWatcher<'a> {
    pub fn new(
        cursor: EventCursor<'a>,
        classifier: &'a MessageClassifier,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cursor,
            classifier,
            poll_interval,
            cancel,
            last_poll: None,
        }
    }

    pub fn position(&self) -> EventId {
        self.cursor.position()
    }

    /// Resume after `id` (e.g. the event produced by a choice activation).
    pub fn seek(&mut self, id: EventId) {
        self.cursor.seek(id);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return the first non-noise event, or TimedOut once `deadline` passes.
    ///
    /// The transport is polled at least once per call, even when the deadline is already
    /// due. The deadline is checked after every batch, so a bot that keeps sending noise
    /// cannot hold the watch open.
    pub async fn watch(&mut self, deadline: Instant, prompts: PromptPolicy) -> Result<Signal, WatchError> {
        let mut polled = false;
        loop {
            if self.cancel.is_cancelled() {
                return Err(WatchError::Cancelled);
            }
            if let Some(signal) = self.next_buffered_signal(prompts) {
                return Ok(signal);
            }
            if polled && Instant::now() >= deadline {
                return Err(WatchError::TimedOut);
            }
            self.pace(deadline).await?;
            self.last_poll = Some(Instant::now());
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(WatchError::Cancelled),
                _ = self.cursor.fetch() => {}
            }
            polled = true;
        }
    }

    fn next_buffered_signal(&mut self, prompts: PromptPolicy) -> Option<Signal> {
        while let Some(event) = self.cursor.next_buffered() {
            let classification = self.classifier.classify(&event, prompts);
            match Signal::from_classification(classification) {
                Some(signal) => return Some(signal),
                None => log::debug!("watcher: event {} is noise", event.id),
            }
        }
        None
    }

    /// Sleep until one poll interval after the previous poll, but not past `deadline`.
    async fn pace(&self, deadline: Instant) -> Result<(), WatchError> {
        let Some(last) = self.last_poll else {
            return Ok(());
        };
        let wake = instant_after(last, self.poll_interval).min(deadline);
        if wake <= Instant::now() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(WatchError::Cancelled),
            _ = tokio::time::sleep_until(wake) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{
        ActivationHandle, Conversation, EventPayload, Reply, ScriptedAgent, ScriptedTransport,
        Transport, TransportError,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    /// A bot that posts one new progress message during every poll round trip.
    #[derive(Default)]
    struct Chatty {
        state: Mutex<(EventId, usize)>,
    }

    #[async_trait]
    impl Transport for Chatty {
        async fn send(&self, _peer: &str, _text: &str) -> Result<EventId, TransportError> {
            Ok(0)
        }

        async fn poll(
            &self,
            _peer: &str,
            _after: EventId,
            _limit: usize,
        ) -> Result<Vec<InboundEvent>, TransportError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let mut state = self.state.lock().await;
            state.0 += 1;
            state.1 += 1;
            Ok(vec![InboundEvent {
                id: state.0,
                payload: Some(EventPayload::Text {
                    text: format!("Processing... {}%", state.0),
                }),
                choices: Vec::new(),
                received_at: Utc::now(),
            }])
        }

        async fn activate(&self, _handle: &ActivationHandle) -> Result<EventId, TransportError> {
            Ok(0)
        }
    }

    fn classifier() -> MessageClassifier {
        MessageClassifier::new(vec!["tiktok".into()], vec!["error".into()])
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn skips_noise_and_returns_first_signal() {
        let t = ScriptedTransport::new();
        t.add_agent(
            "@bot",
            ScriptedAgent::silent()
                .on_send(Reply::text("Processing...").after(Duration::from_secs(1)))
                .on_send(Reply::prompt("pick", &["720p"]).after(Duration::from_secs(2)))
                .on_send(Reply::media("m1").after(Duration::from_secs(3))),
        )
        .await;
        let conv = Conversation::open("@bot");
        let sent = t.send("@bot", "link").await.expect("send");
        let c = classifier();
        let cursor = EventCursor::new(&t, &conv, sent, 10);
        let mut w = ResponseWatcher::new(cursor, &c, Duration::from_millis(500), CancellationToken::new());

        let deadline = Instant::now() + Duration::from_secs(10);
        let signal = w.watch(deadline, PromptPolicy::Ignore).await.expect("signal");
        assert!(matches!(signal, Signal::ContentReady(_)));
        assert!(Instant::now() < deadline);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn short_circuit_keeps_rest_of_batch() {
        let t = ScriptedTransport::new();
        t.add_agent(
            "@bot",
            ScriptedAgent::silent()
                .on_send(Reply::media("m1"))
                .on_send(Reply::media("m2")),
        )
        .await;
        let conv = Conversation::open("@bot");
        let sent = t.send("@bot", "link").await.expect("send");
        let c = classifier();
        let cursor = EventCursor::new(&t, &conv, sent, 10);
        let mut w = ResponseWatcher::new(cursor, &c, Duration::from_millis(500), CancellationToken::new());
        let deadline = Instant::now() + Duration::from_secs(5);
        let first = w.watch(deadline, PromptPolicy::Ignore).await.expect("first");
        let second = w.watch(deadline, PromptPolicy::Ignore).await.expect("second");
        match (first, second) {
            (Signal::ContentReady(a), Signal::ContentReady(b)) => assert!(a.id < b.id),
            other => panic!("unexpected signals: {:?}", other),
        }
        assert_eq!(t.poll_count().await, 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn times_out_on_silence() {
        let t = ScriptedTransport::new();
        t.add_agent("@bot", ScriptedAgent::silent()).await;
        let conv = Conversation::open("@bot");
        let sent = t.send("@bot", "link").await.expect("send");
        let c = classifier();
        let cursor = EventCursor::new(&t, &conv, sent, 10);
        let mut w = ResponseWatcher::new(cursor, &c, Duration::from_secs(1), CancellationToken::new());
        let started = Instant::now();
        let res = w.watch(started + Duration::from_secs(5), PromptPolicy::Accept).await;
        assert_eq!(res, Err(WatchError::TimedOut));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(t.poll_count().await, 6);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancellation_stops_within_one_interval() {
        let t = ScriptedTransport::new();
        t.add_agent("@bot", ScriptedAgent::silent()).await;
        let conv = Conversation::open("@bot");
        let sent = t.send("@bot", "link").await.expect("send");
        let c = classifier();
        let cancel = CancellationToken::new();
        let cursor = EventCursor::new(&t, &conv, sent, 10);
        let mut w = ResponseWatcher::new(cursor, &c, Duration::from_secs(2), cancel.clone());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(4500)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let res = w.watch(started + Duration::from_secs(60), PromptPolicy::Ignore).await;
        assert_eq!(res, Err(WatchError::Cancelled));
        assert!(started.elapsed() <= Duration::from_millis(4500) + Duration::from_secs(2));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn constant_noise_still_times_out_at_poll_pace() {
        let t = Chatty::default();
        let conv = Conversation::open("@bot");
        let c = classifier();
        let cursor = EventCursor::new(&t, &conv, 0, 10);
        let interval = Duration::from_secs(1);
        let mut w = ResponseWatcher::new(cursor, &c, interval, CancellationToken::new());
        let started = Instant::now();
        let res = tokio::time::timeout(
            Duration::from_secs(120),
            w.watch(started + Duration::from_secs(5), PromptPolicy::Ignore),
        )
        .await;
        assert_eq!(res, Ok(Err(WatchError::TimedOut)));
        assert!(started.elapsed() <= Duration::from_secs(5) + interval);
        let polls = t.state.lock().await.1;
        assert!(polls <= 6, "polled {} times", polls);
    }

    #[test]
    fn huge_timeouts_saturate() {
        let now = Instant::now();
        let far = instant_after(now, Duration::from_millis(u64::MAX));
        assert!(far > now + Duration::from_secs(86_400));
        assert_eq!(instant_after(now, Duration::MAX), now + FAR_FUTURE);
        assert_eq!(instant_after(now, Duration::from_secs(1)), now + Duration::from_secs(1));
    }
}
