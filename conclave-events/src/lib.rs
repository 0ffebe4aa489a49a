//! CONCLAVE Events - the event bus.
//!
//! Priority-tiered, retrying, timeout-bounded publish/subscribe substrate.
//! All engine components communicate exclusively through this bus.
//!
//! # Dispatch model
//!
//! - `publish` is fire-and-forget: handlers are spawned and never awaited,
//!   with no ordering guarantee.
//! - `publish_awaitable` groups handlers by priority (higher runs first),
//!   dispatches each tier concurrently, awaits the tier, then moves to the
//!   next. A handler may stop propagation to lower tiers. Calls for the
//!   same topic are serialized behind an in-flight dispatch.
//!
//! Handler failures are isolated: each handler gets its own timeout and
//! bounded retry loop with linearly increasing backoff, and an exhausted
//! handler is reported as a per-handler outcome without aborting siblings.
//!
//! Concurrency here means cooperative interleaving on the runtime, not
//! parallel execution; the engine runs on a current-thread scheduler.

use chrono::Utc;
use conclave_core::{BusConfig, BusError, EventId, Timestamp, Topic};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

// ============================================================================
// EVENTS & HANDLERS
// ============================================================================

/// An event as delivered to handlers. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Event<P> {
    /// Unique identifier for this dispatch
    pub id: EventId,
    /// Topic the event was published on
    pub topic: Topic,
    /// Opaque payload; validated by consumers, not by the bus
    pub payload: P,
    /// When the event was published
    pub timestamp: Timestamp,
}

/// Whether dispatch continues to lower priority tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Keep dispatching lower tiers.
    Continue,
    /// Skip all lower tiers of this dispatch.
    Stop,
}

/// Error returned by a subscriber handler for one invocation.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result of one handler invocation.
pub type HandlerResult = Result<Propagation, HandlerError>;

/// Boxed handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

type Handler<P> = Arc<dyn Fn(Event<P>) -> HandlerFuture + Send + Sync>;

// ============================================================================
// SUBSCRIPTIONS
// ============================================================================

/// Options applied to a subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Dispatch priority; higher values run in earlier tiers. Default 0.
    pub priority: i32,
    /// Remove the subscription after its first invocation.
    pub once: bool,
    /// Per-attempt timeout; falls back to the bus default.
    pub timeout: Option<Duration>,
    /// Retries after the first failed attempt; falls back to the bus default.
    pub retries: Option<u32>,
}

impl SubscribeOptions {
    /// Options with a non-default priority.
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

/// Handle identifying one subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    topic: Topic,
    seq: u64,
}

impl SubscriptionId {
    /// The topic this subscription listens on.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

struct Subscriber<P> {
    seq: u64,
    priority: i32,
    once: bool,
    timeout: Duration,
    retries: u32,
    handler: Handler<P>,
}

impl<P> Clone for Subscriber<P> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            priority: self.priority,
            once: self.once,
            timeout: self.timeout,
            retries: self.retries,
            handler: Arc::clone(&self.handler),
        }
    }
}

// ============================================================================
// DISPATCH OUTCOMES
// ============================================================================

/// Per-handler outcome of one `publish_awaitable` dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Subscription that handled (or failed to handle) the event
    pub subscription: SubscriptionId,
    /// The subscription's priority tier
    pub priority: i32,
    /// Attempts consumed, including the first
    pub attempts: u32,
    /// Final result after retries
    pub result: Result<Propagation, BusError>,
}

impl DispatchOutcome {
    /// Whether the handler ultimately succeeded.
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

// ============================================================================
// EVENT BUS
// ============================================================================

/// The event bus. Cheap to clone; clones share state.
pub struct EventBus<P> {
    inner: Arc<BusInner<P>>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct BusInner<P> {
    // Plain mutexes: mutated synchronously, never held across an await.
    subscribers: Mutex<HashMap<Topic, Vec<Subscriber<P>>>>,
    // One async gate per topic serializes publish_awaitable calls.
    gates: Mutex<HashMap<Topic, Arc<AsyncMutex<()>>>>,
    config: BusConfig,
    next_seq: AtomicU64,
}

impl<P> EventBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Create a bus with the given defaults.
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                config,
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler for a topic. Returns a handle for unsubscribing.
    pub fn subscribe<F>(&self, topic: Topic, options: SubscribeOptions, handler: F) -> SubscriptionId
    where
        F: Fn(Event<P>) -> HandlerFuture + Send + Sync + 'static,
    {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber {
            seq,
            priority: options.priority,
            once: options.once,
            timeout: options.timeout.unwrap_or(self.inner.config.default_timeout),
            retries: options.retries.unwrap_or(self.inner.config.default_retries),
            handler: Arc::new(handler),
        };
        let mut table = self.inner.subscribers.lock().expect("subscriber table poisoned");
        table.entry(topic).or_default().push(subscriber);
        tracing::debug!(topic = %topic, subscription = seq, "subscribed");
        SubscriptionId { topic, seq }
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.inner.subscribers.lock().expect("subscriber table poisoned");
        if let Some(list) = table.get_mut(&id.topic) {
            let before = list.len();
            list.retain(|sub| sub.seq != id.seq);
            return list.len() < before;
        }
        false
    }

    /// Number of live subscriptions for a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .subscribers
            .lock()
            .expect("subscriber table poisoned")
            .get(&topic)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Fire-and-forget fan-out. Handlers are spawned with their usual
    /// timeout/retry wrapping; failures are logged, not reported.
    pub fn publish(&self, topic: Topic, payload: P) {
        let event = Event {
            id: conclave_core::new_entity_id(),
            topic,
            payload,
            timestamp: Utc::now(),
        };
        let snapshot = self.snapshot(topic);
        // `once` handlers are consumed at dispatch time
        self.remove_once(topic, &snapshot);
        let backoff_unit = self.inner.config.backoff_unit;
        for subscriber in snapshot {
            let event = event.clone();
            tokio::spawn(async move {
                let outcome = run_subscriber(topic, subscriber, event, backoff_unit).await;
                if let Err(error) = &outcome.result {
                    tracing::warn!(topic = %topic, error = %error, "fire-and-forget handler failed");
                }
            });
        }
    }

    /// Dispatch an event and await all handlers, tier by tier.
    ///
    /// Tiers run in descending priority order. Handlers within one tier run
    /// concurrently and are awaited together. A `Propagation::Stop` from
    /// any handler in a tier skips all lower tiers. Calls for the same
    /// topic are queued behind an in-flight dispatch.
    pub async fn publish_awaitable(&self, topic: Topic, payload: P) -> Vec<DispatchOutcome> {
        let gate = self.gate(topic);
        let _serialized = gate.lock().await;

        let event = Event {
            id: conclave_core::new_entity_id(),
            topic,
            payload,
            timestamp: Utc::now(),
        };

        let mut snapshot = self.snapshot(topic);
        // Descending priority; stable within a tier (subscription order)
        snapshot.sort_by_key(|sub| std::cmp::Reverse(sub.priority));

        let backoff_unit = self.inner.config.backoff_unit;
        let mut outcomes = Vec::with_capacity(snapshot.len());
        let mut index = 0;
        while index < snapshot.len() {
            let priority = snapshot[index].priority;
            let tier_end = snapshot[index..]
                .iter()
                .position(|sub| sub.priority != priority)
                .map(|offset| index + offset)
                .unwrap_or(snapshot.len());
            let tier = &snapshot[index..tier_end];

            let handles: Vec<_> = tier
                .iter()
                .map(|sub| {
                    let sub = sub.clone();
                    let event = event.clone();
                    tokio::spawn(run_subscriber(topic, sub, event, backoff_unit))
                })
                .collect();

            let mut stop = false;
            for (handle, sub) in handles.into_iter().zip(tier) {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(join_error) => DispatchOutcome {
                        subscription: SubscriptionId { topic, seq: sub.seq },
                        priority: sub.priority,
                        attempts: 0,
                        result: Err(BusError::HandlerAborted {
                            topic: topic.as_str().to_string(),
                            reason: join_error.to_string(),
                        }),
                    },
                };
                if matches!(outcome.result, Ok(Propagation::Stop)) {
                    stop = true;
                }
                outcomes.push(outcome);
            }

            // Everything in this tier was invoked; drop its once-handlers
            self.remove_once(topic, tier);

            if stop {
                tracing::debug!(topic = %topic, priority, "propagation stopped, skipping lower tiers");
                break;
            }
            index = tier_end;
        }
        outcomes
    }

    fn snapshot(&self, topic: Topic) -> Vec<Subscriber<P>> {
        self.inner
            .subscribers
            .lock()
            .expect("subscriber table poisoned")
            .get(&topic)
            .cloned()
            .unwrap_or_default()
    }

    fn remove_once(&self, topic: Topic, invoked: &[Subscriber<P>]) {
        let consumed: Vec<u64> = invoked
            .iter()
            .filter(|sub| sub.once)
            .map(|sub| sub.seq)
            .collect();
        if consumed.is_empty() {
            return;
        }
        let mut table = self.inner.subscribers.lock().expect("subscriber table poisoned");
        if let Some(list) = table.get_mut(&topic) {
            list.retain(|sub| !consumed.contains(&sub.seq));
        }
    }

    fn gate(&self, topic: Topic) -> Arc<AsyncMutex<()>> {
        let mut gates = self.inner.gates.lock().expect("gate table poisoned");
        Arc::clone(gates.entry(topic).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
    }
}

impl<P> Default for EventBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

/// Run one subscriber: timeout-wrap every attempt, retry with linearly
/// increasing backoff, and fold the final failure into a bus error.
async fn run_subscriber<P: Clone>(
    topic: Topic,
    subscriber: Subscriber<P>,
    event: Event<P>,
    backoff_unit: Duration,
) -> DispatchOutcome {
    let id = SubscriptionId {
        topic,
        seq: subscriber.seq,
    };
    let max_attempts = subscriber.retries + 1;
    let mut attempt = 0u32;
    let mut last_error: Option<HandlerError> = None;
    let mut timed_out = false;

    loop {
        attempt += 1;
        let invocation = (subscriber.handler)(event.clone());
        match tokio::time::timeout(subscriber.timeout, invocation).await {
            Ok(Ok(propagation)) => {
                return DispatchOutcome {
                    subscription: id,
                    priority: subscriber.priority,
                    attempts: attempt,
                    result: Ok(propagation),
                };
            }
            Ok(Err(error)) => {
                timed_out = false;
                last_error = Some(error);
            }
            Err(_elapsed) => {
                // Attempt abandoned; the handler future is dropped here
                timed_out = true;
                last_error = None;
            }
        }

        if attempt >= max_attempts {
            let error = if timed_out {
                BusError::HandlerTimeout {
                    topic: topic.as_str().to_string(),
                    subscription: subscriber.seq,
                    timeout_ms: subscriber.timeout.as_millis() as u64,
                    attempts: attempt,
                }
            } else {
                BusError::HandlerExhausted {
                    topic: topic.as_str().to_string(),
                    subscription: subscriber.seq,
                    attempts: attempt,
                    last_error: last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                }
            };
            tracing::warn!(topic = %topic, subscription = subscriber.seq, error = %error, "handler gave up");
            return DispatchOutcome {
                subscription: id,
                priority: subscriber.priority,
                attempts: attempt,
                result: Err(error),
            };
        }

        // Linear backoff: unit × attempt number
        let delay = backoff_unit * attempt;
        tracing::debug!(
            topic = %topic,
            subscription = subscriber.seq,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "handler failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

// ============================================================================
// TESTS
// ============================================================================
