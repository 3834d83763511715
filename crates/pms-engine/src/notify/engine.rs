//! Correlation-id keyed wait registry.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Continuation, Notification, ResponseData};
use crate::TRACING_TARGET_NOTIFY;
use crate::error::{Error, Result};
use crate::types::{CorrelationId, FailureInfo, NodeExecutionId};

/// Result of delivering a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The wait had everything it needed and fired.
    Resumed,
    /// The response was recorded; other ids are still outstanding.
    Pending,
    /// Nobody waits on the id yet; the response is held until a wait
    /// registers it.
    Parked,
    /// The id was already consumed. Nothing fired.
    Unknown,
}

struct WaitInstance {
    continuation: Continuation,
    pending: HashSet<CorrelationId>,
    responses: BTreeMap<CorrelationId, ResponseData>,
}

struct Parked {
    data: ResponseData,
    is_error: bool,
    at: Instant,
}

#[derive(Default)]
struct WaitState {
    next_key: u64,
    waits: HashMap<u64, WaitInstance>,
    by_correlation: HashMap<CorrelationId, u64>,
    by_node: HashMap<NodeExecutionId, HashSet<u64>>,
    parked: HashMap<CorrelationId, Parked>,
    consumed: HashMap<CorrelationId, Instant>,
    /// Parked and consumed ids in insertion order, for pruning.
    recorded: VecDeque<(Instant, CorrelationId)>,
}

impl WaitState {
    fn consume(&mut self, id: CorrelationId, now: Instant) {
        self.recorded.push_back((now, id.clone()));
        self.consumed.insert(id, now);
    }

    fn park(&mut self, id: CorrelationId, data: ResponseData, is_error: bool, now: Instant) {
        self.recorded.push_back((now, id.clone()));
        self.parked.insert(id, Parked { data, is_error, at: now });
    }

    /// Forgets parked and consumed ids recorded at least `retention` ago.
    /// An entry is only removed if it still carries the recorded time.
    fn prune(&mut self, now: Instant, retention: Duration) -> usize {
        let mut pruned = 0;
        while let Some((at, _)) = self.recorded.front() {
            if now.saturating_duration_since(*at) < retention {
                break;
            }
            let Some((at, id)) = self.recorded.pop_front() else {
                break;
            };
            if self.consumed.get(&id) == Some(&at) {
                self.consumed.remove(&id);
                pruned += 1;
            }
            if self.parked.get(&id).is_some_and(|parked| parked.at == at) {
                self.parked.remove(&id);
                pruned += 1;
            }
        }
        pruned
    }

    fn finish(&mut self, key: u64, is_error: bool, now: Instant) -> Option<Notification> {
        let wait = self.waits.remove(&key)?;
        for id in wait.pending {
            self.by_correlation.remove(&id);
            self.consume(id, now);
        }

        let node_execution_id = wait.continuation.node_execution_id();
        if let Some(keys) = self.by_node.get_mut(&node_execution_id) {
            keys.remove(&key);
            if keys.is_empty() {
                self.by_node.remove(&node_execution_id);
            }
        }

        Some(Notification {
            continuation: wait.continuation,
            responses: wait.responses,
            is_error,
        })
    }
}

/// Bridges "async work finished" into engine continuations.
///
/// A wait is registered under one or more correlation ids. Each id is
/// consumed at most once: the wait fires when every id has a response, or
/// immediately when any id receives an error. Firing sends a
/// [`Notification`] down the channel returned by [`NotifyEngine::new`].
///
/// Delivery may race registration (a remote worker can answer before the
/// dispatcher registered the wait); such responses are parked and consumed
/// by the registration.
///
/// Consumed ids and parked responses are kept for a retention window,
/// after which a duplicate delivery is no longer recognized and an
/// unclaimed parked response is dropped.
pub struct NotifyEngine {
    state: Mutex<WaitState>,
    sender: mpsc::UnboundedSender<Notification>,
    retention: Duration,
}

impl std::fmt::Debug for NotifyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NotifyEngine")
            .field("waits", &state.waits.len())
            .field("parked", &state.parked.len())
            .field("consumed", &state.consumed.len())
            .field("retention", &self.retention)
            .finish()
    }
}

impl NotifyEngine {
    /// Default time consumed ids and parked responses are remembered.
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

    /// Creates the engine and the receiving end of its notification channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        Self::with_retention(Self::DEFAULT_RETENTION)
    }

    /// Creates the engine with a custom retention window.
    pub fn with_retention(retention: Duration) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let engine = Self {
            state: Mutex::new(WaitState::default()),
            sender,
            retention,
        };
        (engine, receiver)
    }

    /// Registers a wait on a single id.
    pub fn register(&self, id: CorrelationId, continuation: Continuation) -> Result<()> {
        self.register_all([id], continuation)
    }

    /// Registers a wait that fires once every id has a response.
    ///
    /// An empty id set fires immediately. Registering an id that is already
    /// waited on or was already consumed is a conflict.
    pub fn register_all<I>(&self, ids: I, continuation: Continuation) -> Result<()>
    where
        I: IntoIterator<Item = CorrelationId>,
    {
        let ids: HashSet<CorrelationId> = ids.into_iter().collect();
        let node_execution_id = continuation.node_execution_id();

        let notification = {
            let now = Instant::now();
            let mut state = self.state.lock();
            self.prune(&mut state, now);
            if let Some(id) = ids
                .iter()
                .find(|id| state.by_correlation.contains_key(*id) || state.consumed.contains_key(*id))
            {
                return Err(Error::conflict()
                    .with_message(format!("correlation id {id} already registered")));
            }

            let key = state.next_key;
            state.next_key += 1;

            let mut wait = WaitInstance {
                continuation,
                pending: HashSet::with_capacity(ids.len()),
                responses: BTreeMap::new(),
            };
            let mut is_error = false;
            for id in ids {
                match state.parked.remove(&id) {
                    Some(parked) => {
                        is_error |= parked.is_error;
                        state.consume(id.clone(), now);
                        wait.responses.insert(id, parked.data);
                    }
                    None => {
                        wait.pending.insert(id);
                    }
                }
            }

            for id in &wait.pending {
                state.by_correlation.insert(id.clone(), key);
            }
            state.by_node.entry(node_execution_id).or_default().insert(key);
            let ready = is_error || wait.pending.is_empty();
            state.waits.insert(key, wait);

            if ready {
                state.finish(key, is_error, now)
            } else {
                None
            }
        };

        tracing::debug!(
            target: TRACING_TARGET_NOTIFY,
            node_execution_id = %node_execution_id,
            fired = notification.is_some(),
            "wait registered"
        );

        if let Some(notification) = notification {
            self.send(notification);
        }
        Ok(())
    }

    /// Delivers a successful response.
    pub fn deliver(&self, id: &CorrelationId, data: ResponseData) -> DeliveryOutcome {
        self.accept(id, data, false)
    }

    /// Delivers a failure; the wait fires immediately through the error
    /// channel.
    pub fn deliver_error(&self, id: &CorrelationId, failure: FailureInfo) -> DeliveryOutcome {
        self.accept(id, ResponseData::Failure(failure), true)
    }

    /// Fails every wait the node execution is parked on.
    ///
    /// Returns the number of waits that fired.
    pub fn interrupt(&self, node_execution_id: NodeExecutionId, failure: FailureInfo) -> usize {
        let notifications: Vec<Notification> = {
            let now = Instant::now();
            let mut state = self.state.lock();
            let keys = state.by_node.remove(&node_execution_id).unwrap_or_default();
            keys.into_iter()
                .filter_map(|key| {
                    if let Some(wait) = state.waits.get_mut(&key) {
                        let pending: Vec<CorrelationId> = wait.pending.iter().cloned().collect();
                        for id in pending {
                            wait.responses
                                .insert(id, ResponseData::Failure(failure.clone()));
                        }
                    }
                    state.finish(key, true, now)
                })
                .collect()
        };

        let fired = notifications.len();
        if fired > 0 {
            tracing::debug!(
                target: TRACING_TARGET_NOTIFY,
                node_execution_id = %node_execution_id,
                fired,
                "waits interrupted"
            );
        }
        for notification in notifications {
            self.send(notification);
        }
        fired
    }

    /// Returns whether a wait is registered on the id.
    pub fn is_registered(&self, id: &CorrelationId) -> bool {
        self.state.lock().by_correlation.contains_key(id)
    }

    /// Returns how long consumed ids and parked responses are remembered.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Returns the number of outstanding waits.
    pub fn pending_waits(&self) -> usize {
        self.state.lock().waits.len()
    }

    fn accept(&self, id: &CorrelationId, data: ResponseData, is_error: bool) -> DeliveryOutcome {
        let (outcome, notification) = {
            let now = Instant::now();
            let mut state = self.state.lock();
            self.prune(&mut state, now);
            if state.consumed.contains_key(id) || state.parked.contains_key(id) {
                (DeliveryOutcome::Unknown, None)
            } else if let Some(key) = state.by_correlation.remove(id) {
                state.consume(id.clone(), now);
                let complete = match state.waits.get_mut(&key) {
                    Some(wait) => {
                        wait.pending.remove(id);
                        wait.responses.insert(id.clone(), data);
                        wait.pending.is_empty()
                    }
                    None => false,
                };
                if is_error || complete {
                    (DeliveryOutcome::Resumed, state.finish(key, is_error, now))
                } else {
                    (DeliveryOutcome::Pending, None)
                }
            } else {
                state.park(id.clone(), data, is_error, now);
                (DeliveryOutcome::Parked, None)
            }
        };

        match outcome {
            DeliveryOutcome::Unknown => tracing::warn!(
                target: TRACING_TARGET_NOTIFY,
                correlation_id = %id,
                "duplicate delivery ignored"
            ),
            _ => tracing::debug!(
                target: TRACING_TARGET_NOTIFY,
                correlation_id = %id,
                is_error,
                outcome = ?outcome,
                "response delivered"
            ),
        }

        if let Some(notification) = notification {
            self.send(notification);
        }
        outcome
    }

    fn prune(&self, state: &mut WaitState, now: Instant) {
        let pruned = state.prune(now, self.retention);
        if pruned > 0 {
            tracing::trace!(
                target: TRACING_TARGET_NOTIFY,
                pruned,
                "expired correlation ids forgotten"
            );
        }
    }

    fn send(&self, notification: Notification) {
        let node_execution_id = notification.continuation.node_execution_id();
        if self.sender.send(notification).is_err() {
            tracing::error!(
                target: TRACING_TARGET_NOTIFY,
                node_execution_id = %node_execution_id,
                "notification channel closed, continuation dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn resume(id: NodeExecutionId) -> Continuation {
        Continuation::Resume {
            node_execution_id: id,
        }
    }

    #[test]
    fn registration_consumed_exactly_once() {
        let (engine, mut receiver) = NotifyEngine::new();
        let node = NodeExecutionId::new();
        let id = CorrelationId::from("cb-1");
        engine.register(id.clone(), resume(node)).unwrap();

        let first = engine.deliver(&id, ResponseData::Payload(json!({"ok": true})));
        let second = engine.deliver(&id, ResponseData::Payload(json!({"ok": true})));
        assert_eq!(first, DeliveryOutcome::Resumed);
        assert_eq!(second, DeliveryOutcome::Unknown);

        let notification = receiver.try_recv().unwrap();
        assert_eq!(notification.continuation, resume(node));
        assert!(!notification.is_error);
        assert!(receiver.try_recv().is_err());
        assert_eq!(engine.pending_waits(), 0);
    }

    #[test]
    fn register_all_fires_when_every_id_arrives() {
        let (engine, mut receiver) = NotifyEngine::new();
        let ids: Vec<CorrelationId> = (0..3).map(|i| CorrelationId::new(format!("c{i}"))).collect();
        engine
            .register_all(ids.clone(), resume(NodeExecutionId::new()))
            .unwrap();

        assert_eq!(engine.deliver(&ids[2], ResponseData::Payload(json!(2))), DeliveryOutcome::Pending);
        assert_eq!(engine.deliver(&ids[0], ResponseData::Payload(json!(0))), DeliveryOutcome::Pending);
        assert!(receiver.try_recv().is_err());
        assert_eq!(engine.deliver(&ids[1], ResponseData::Payload(json!(1))), DeliveryOutcome::Resumed);

        let notification = receiver.try_recv().unwrap();
        assert_eq!(notification.responses.len(), 3);
        assert_eq!(notification.responses[&ids[1]], ResponseData::Payload(json!(1)));
    }

    #[test]
    fn error_fires_immediately_and_consumes_the_rest() {
        let (engine, mut receiver) = NotifyEngine::new();
        let ids = vec![CorrelationId::from("a"), CorrelationId::from("b")];
        engine
            .register_all(ids.clone(), resume(NodeExecutionId::new()))
            .unwrap();

        let outcome = engine.deliver_error(&ids[0], FailureInfo::new("boom"));
        assert_eq!(outcome, DeliveryOutcome::Resumed);
        let notification = receiver.try_recv().unwrap();
        assert!(notification.is_error);
        assert_eq!(notification.failure().map(|f| f.message.as_str()), Some("boom"));

        assert_eq!(
            engine.deliver(&ids[1], ResponseData::Payload(json!(null))),
            DeliveryOutcome::Unknown
        );
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn empty_wait_fires_on_register() {
        let (engine, mut receiver) = NotifyEngine::new();
        engine
            .register_all(Vec::new(), resume(NodeExecutionId::new()))
            .unwrap();
        assert!(receiver.try_recv().unwrap().responses.is_empty());
    }

    #[test]
    fn early_delivery_is_parked() {
        let (engine, mut receiver) = NotifyEngine::new();
        let id = CorrelationId::from("fast");
        assert_eq!(
            engine.deliver(&id, ResponseData::Payload(json!("done"))),
            DeliveryOutcome::Parked
        );
        assert_eq!(
            engine.deliver(&id, ResponseData::Payload(json!("again"))),
            DeliveryOutcome::Unknown
        );

        engine.register(id.clone(), resume(NodeExecutionId::new())).unwrap();
        let notification = receiver.try_recv().unwrap();
        assert_eq!(notification.responses[&id], ResponseData::Payload(json!("done")));
    }

    #[test]
    fn interrupt_fails_node_waits() {
        let (engine, mut receiver) = NotifyEngine::new();
        let node = NodeExecutionId::new();
        let other = NodeExecutionId::new();
        engine.register(CorrelationId::from("x"), resume(node)).unwrap();
        engine
            .register(CorrelationId::from("y"), Continuation::AdviseResume { node_execution_id: node })
            .unwrap();
        engine.register(CorrelationId::from("z"), resume(other)).unwrap();

        assert_eq!(engine.interrupt(node, FailureInfo::new("aborted")), 2);
        for _ in 0..2 {
            let notification = receiver.try_recv().unwrap();
            assert!(notification.is_error);
            assert_eq!(notification.continuation.node_execution_id(), node);
        }
        assert!(engine.is_registered(&CorrelationId::from("z")));
        assert!(!engine.is_registered(&CorrelationId::from("x")));
        assert_eq!(
            engine.deliver(&CorrelationId::from("x"), ResponseData::Payload(json!(1))),
            DeliveryOutcome::Unknown
        );
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let (engine, _receiver) = NotifyEngine::new();
        let id = CorrelationId::from("dup");
        engine.register(id.clone(), resume(NodeExecutionId::new())).unwrap();
        let err = engine
            .register(id, resume(NodeExecutionId::new()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);
    }

    #[test]
    fn retention_forgets_consumed_and_parked_ids() {
        let (engine, mut receiver) = NotifyEngine::with_retention(Duration::ZERO);
        let id = CorrelationId::from("cb-old");
        engine.register(id.clone(), resume(NodeExecutionId::new())).unwrap();
        assert_eq!(engine.deliver(&id, ResponseData::Payload(json!(1))), DeliveryOutcome::Resumed);
        assert!(receiver.try_recv().is_ok());

        // Forgotten once consumed, so the duplicate is parked like a new id.
        assert_eq!(engine.deliver(&id, ResponseData::Payload(json!(2))), DeliveryOutcome::Parked);

        // The next call drops the unclaimed parked response.
        let other = CorrelationId::from("cb-other");
        assert_eq!(engine.deliver(&other, ResponseData::Payload(json!(3))), DeliveryOutcome::Parked);
        engine.register(id.clone(), resume(NodeExecutionId::new())).unwrap();
        assert!(engine.is_registered(&id));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn default_retention_remembers_consumed_ids() {
        let (engine, _receiver) = NotifyEngine::new();
        assert_eq!(engine.retention(), NotifyEngine::DEFAULT_RETENTION);
        let id = CorrelationId::from("cb-kept");
        engine.register(id.clone(), resume(NodeExecutionId::new())).unwrap();
        engine.deliver(&id, ResponseData::Payload(json!(1)));
        assert_eq!(engine.deliver(&id, ResponseData::Payload(json!(1))), DeliveryOutcome::Unknown);
        assert!(engine.register(id, resume(NodeExecutionId::new())).is_err());
    }
}
