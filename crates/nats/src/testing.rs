//! In-memory bus for tests.
//!
//! `MockBus` implements [`Transport`]. Connection attempts follow a script
//! (refuse, reject, hang) and succeed once the script is empty. Subscribe
//! calls can be denied the same way. Only the most
//! recent link is live: publishing delivers to its subscriptions, and
//! `disconnect` ends it the way a dropped TCP connection would.

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::{
    config::Config,
    event::Event,
    sink::{EventSink, SinkError},
    state::ConnectionState,
    subscription::SubjectBinding,
    target::ConnectionConfig,
    transport::{Delivery, Link, LinkEvent, SubscriptionId, Transport, TransportError},
};

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Refuse,
    Reject,
    Hang,
}

struct LiveLink {
    id: u64,
    tx: mpsc::UnboundedSender<LinkEvent>,
    subscriptions: BTreeMap<SubscriptionId, SubjectBinding>,
}

#[derive(Default)]
struct BusState {
    script: VecDeque<Outcome>,
    attempts: usize,
    connects: usize,
    next_link: u64,
    next_sid: u64,
    subscribe_calls: usize,
    subscribe_denials: usize,
    unsubscribe_calls: usize,
    live: Option<LiveLink>,
}

#[derive(Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap()
    }

    /// The next `n` connection attempts are refused (retryable).
    pub fn refuse_next(&self, n: usize) -> &Self {
        self.lock()
            .script
            .extend(std::iter::repeat(Outcome::Refuse).take(n));
        self
    }

    /// The next attempt is rejected as an authorization failure (fatal).
    pub fn reject_next(&self) -> &Self {
        self.lock().script.push_back(Outcome::Reject);
        self
    }

    /// The next attempt never completes.
    pub fn hang_next(&self) -> &Self {
        self.lock().script.push_back(Outcome::Hang);
        self
    }

    /// The next `n` subscribe calls fail with a permissions violation.
    pub fn deny_subscribe_next(&self, n: usize) -> &Self {
        self.lock().subscribe_denials += n;
        self
    }

    /// Opens a live link directly, replacing the current one.
    pub fn link(&self) -> Box<dyn Link> {
        let mut state = self.lock();
        state.connects += 1;
        state.next_link += 1;
        let id = state.next_link;
        let (tx, rx) = mpsc::unbounded_channel();
        state.live = Some(LiveLink {
            id,
            tx,
            subscriptions: BTreeMap::new(),
        });
        Box::new(MockLink {
            bus: self.clone(),
            id,
            rx,
        })
    }

    /// Publishes on the live link. Within a queue group only one member
    /// receives the message. Returns the number of deliveries; zero when no
    /// link is live, in which case the message is lost.
    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let state = self.lock();
        let Some(live) = &state.live else {
            return 0;
        };

        let mut groups_served = HashSet::new();
        let mut delivered = 0;
        for (sid, binding) in &live.subscriptions {
            if !subject_matches(&binding.subject, subject) {
                continue;
            }
            if let Some(group) = &binding.queue_group {
                if !groups_served.insert(group.clone()) {
                    continue;
                }
            }
            let delivery = Delivery {
                subscription: *sid,
                subject: subject.to_string(),
                payload: payload.clone(),
            };
            if live.tx.send(LinkEvent::Message(delivery)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Ends the live session.
    pub fn disconnect(&self) {
        if let Some(live) = self.lock().live.take() {
            let _ = live
                .tx
                .send(LinkEvent::Disconnected("connection reset by peer".into()));
        }
    }

    /// Reports a non-terminal error on the live session.
    pub fn inject_error(&self, error: TransportError) {
        if let Some(live) = &self.lock().live {
            let _ = live.tx.send(LinkEvent::Error(error));
        }
    }

    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.lock().unsubscribe_calls
    }

    pub fn is_connected(&self) -> bool {
        self.lock().live.is_some()
    }

    /// Bindings subscribed on the live link, in subscription order.
    pub fn active_subscriptions(&self) -> Vec<SubjectBinding> {
        self.lock()
            .live
            .as_ref()
            .map(|live| live.subscriptions.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MockBus {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Link>, TransportError> {
        let outcome = {
            let mut state = self.lock();
            state.attempts += 1;
            state.script.pop_front()
        };

        match outcome {
            None => Ok(self.link()),
            Some(Outcome::Refuse) => Err(TransportError::Connect("connection refused".into())),
            Some(Outcome::Reject) => Err(TransportError::Rejected("authorization violation".into())),
            Some(Outcome::Hang) => future::pending().await,
        }
    }
}

struct MockLink {
    bus: MockBus,
    id: u64,
    rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl MockLink {
    fn with_live<T>(
        &self,
        f: impl FnOnce(&mut BusState) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut state = self.bus.lock();
        if state.live.as_ref().map(|live| live.id) != Some(self.id) {
            return Err(TransportError::Closed);
        }
        f(&mut *state)
    }
}

#[async_trait]
impl Link for MockLink {
    async fn subscribe(&mut self, binding: &SubjectBinding) -> Result<SubscriptionId, TransportError> {
        self.with_live(|state| {
            state.subscribe_calls += 1;
            if state.subscribe_denials > 0 {
                state.subscribe_denials -= 1;
                return Err(TransportError::Subscribe {
                    subject: binding.subject.clone(),
                    reason: "permissions violation".into(),
                });
            }
            state.next_sid += 1;
            let sid = SubscriptionId(state.next_sid);
            if let Some(live) = state.live.as_mut() {
                live.subscriptions.insert(sid, binding.clone());
            }
            Ok(sid)
        })
    }

    async fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), TransportError> {
        self.with_live(|state| {
            state.unsubscribe_calls += 1;
            if let Some(live) = state.live.as_mut() {
                live.subscriptions.remove(&id);
            }
            Ok(())
        })
    }

    async fn next_event(&mut self) -> LinkEvent {
        self.rx
            .recv()
            .await
            .unwrap_or_else(|| LinkEvent::Disconnected("link replaced".into()))
    }

    async fn close(self: Box<Self>) {
        let mut state = self.bus.lock();
        if state.live.as_ref().map(|live| live.id) == Some(self.id) {
            state.live = None;
        }
    }
}

/// NATS subject matching with `*` (one token) and `>` (the rest).
fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    for token in pattern.split('.') {
        match (token, subject_tokens.next()) {
            (">", Some(_)) => return true,
            ("*", Some(_)) => {}
            (expected, Some(actual)) if expected == actual => {}
            _ => return false,
        }
    }
    subject_tokens.next().is_none()
}

/// Sink whose `push` never completes.
pub struct StallingSink;

#[async_trait]
impl EventSink for StallingSink {
    async fn push(&self, _event: Event) -> Result<(), SinkError> {
        future::pending().await
    }
}

/// A configuration with millisecond timings.
pub fn fast_config(subjects: &[&str], queue_group: Option<&str>, max_attempts: u32) -> Config {
    Config {
        subjects: subjects.iter().map(|s| s.to_string()).collect(),
        queue_group: queue_group.map(str::to_string),
        reconnect_time_wait: Some(0.01),
        max_reconnect_attempts: Some(max_attempts),
        connection_timeout: 0.05,
        shutdown_grace_period: 0.2,
        ..Default::default()
    }
}

pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    predicate: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed")
        .clone()
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_matching() {
        assert!(subject_matches("orders", "orders"));
        assert!(!subject_matches("orders", "orders.created"));
        assert!(subject_matches("orders.*", "orders.created"));
        assert!(!subject_matches("orders.*", "orders.created.eu"));
        assert!(subject_matches("orders.>", "orders.created.eu"));
        assert!(!subject_matches("orders.>", "orders"));
    }

    #[tokio::test]
    async fn test_queue_group_delivers_once() {
        let bus = MockBus::new();
        let mut link = bus.link();
        link.subscribe(&SubjectBinding::new("orders", Some("workers".into())))
            .await
            .unwrap();
        link.subscribe(&SubjectBinding::new("orders.*", Some("workers".into())))
            .await
            .unwrap();
        link.subscribe(&SubjectBinding::new("orders.>", None))
            .await
            .unwrap();

        assert_eq!(bus.publish("orders.created", "x"), 2);
        assert_eq!(bus.publish("orders", "x"), 1);
    }

    #[tokio::test]
    async fn test_replaced_link_reports_disconnect() {
        let bus = MockBus::new();
        let mut first = bus.link();
        let _second = bus.link();

        assert!(matches!(first.next_event().await, LinkEvent::Disconnected(_)));
        assert!(first
            .subscribe(&SubjectBinding::new("orders", None))
            .await
            .is_err());
    }
}
