//! Runtime-agnostic core of the connector.
//!
//! Pending-waiter bookkeeping and reconnection backoff math live here, free
//! of any socket handling, so both can be exercised without a network.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::ReconnectConfig;

// =============================================================================
// Pending waiters
// =============================================================================

/// What a waiter is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WaiterKey {
    /// Reply `type` inferred from the command's action
    ReplyType(String),
    /// Identifier echoed back by the peer
    RequestId(u64),
}

impl fmt::Display for WaiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaiterKey::ReplyType(reply_type) => f.write_str(reply_type),
            WaiterKey::RequestId(id) => write!(f, "request #{id}"),
        }
    }
}

/// How a waiter was settled from the dispatcher's side.
#[derive(Debug, Clone, PartialEq)]
pub enum WaiterOutcome {
    Reply(Value),
    /// The connection was closed on purpose
    Cancelled,
}

/// Identifies one registration, so that an expiring waiter never removes a
/// newer waiter that replaced it under the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterToken(u64);

struct Waiter {
    token: WaiterToken,
    tx: oneshot::Sender<WaiterOutcome>,
}

/// One-shot waiters, at most one per key.
#[derive(Default)]
pub struct PendingWaiters {
    inner: HashMap<WaiterKey, Waiter>,
    /// Waiters displaced by a newer registration for the same key. They can
    /// no longer receive a reply, only be cancelled or removed.
    displaced: HashMap<WaiterToken, oneshot::Sender<WaiterOutcome>>,
    next_token: u64,
}

impl PendingWaiters {
    /// Register a waiter for `key`.
    ///
    /// If another waiter already holds the key it loses the key but stays
    /// cancellable until its caller removes it.
    pub fn register(&mut self, key: WaiterKey) -> (WaiterToken, oneshot::Receiver<WaiterOutcome>) {
        self.next_token += 1;
        let token = WaiterToken(self.next_token);
        let (tx, rx) = oneshot::channel();

        if let Some(displaced) = self.inner.insert(key.clone(), Waiter { token, tx }) {
            tracing::warn!(
                key = %key,
                "Pending request superseded by a newer request for the same reply"
            );
            self.displaced.insert(displaced.token, displaced.tx);
        }

        (token, rx)
    }

    /// Resolve and remove the waiter for `key`.
    ///
    /// Returns true if a waiter held the key, even if its caller has since
    /// gone away.
    pub fn resolve(&mut self, key: &WaiterKey, payload: Value) -> bool {
        let Some(waiter) = self.inner.remove(key) else {
            return false;
        };
        if waiter.tx.send(WaiterOutcome::Reply(payload)).is_err() {
            tracing::debug!(key = %key, "Reply arrived for a caller that is no longer waiting");
        }
        true
    }

    /// Remove the registration identified by `token`, whether it still holds
    /// `key` or was displaced. A newer waiter under the same key is untouched.
    pub fn remove_registration(&mut self, key: &WaiterKey, token: WaiterToken) -> bool {
        match self.inner.get(key) {
            Some(waiter) if waiter.token == token => {
                self.inner.remove(key);
                true
            }
            _ => self.displaced.remove(&token).is_some(),
        }
    }

    pub fn contains(&self, key: &WaiterKey) -> bool {
        self.inner.contains_key(key)
    }

    /// Waiters that can still be resolved by a reply.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn displaced_len(&self) -> usize {
        self.displaced.len()
    }

    /// Settle every waiter, displaced ones included, as cancelled. Returns
    /// how many there were.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.inner.len() + self.displaced.len();
        for (_, waiter) in self.inner.drain() {
            let _ = waiter.tx.send(WaiterOutcome::Cancelled);
        }
        for (_, tx) in self.displaced.drain() {
            let _ = tx.send(WaiterOutcome::Cancelled);
        }
        count
    }
}

// =============================================================================
// Reconnect budget
// =============================================================================

/// Exponential backoff state for the reconnection controller.
///
/// Attempt `n` (1-indexed) waits `base_delay * 2^(n-1)`.
#[derive(Debug, Clone)]
pub struct ReconnectBudget {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
    jitter_factor: f64,
}

impl ReconnectBudget {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            jitter_factor: config.jitter_factor,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Un-jittered delay before attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Advance to the next attempt.
    ///
    /// Returns the delay to wait *before* performing it, or `None` once the
    /// budget is spent.
    pub fn next_delay_and_advance(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.apply_jitter(self.delay_for(self.attempt)))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as i64;
        let jitter_range = (millis as f64 * self.jitter_factor) as i64;
        if jitter_range <= 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_millis((millis + jitter).max(0) as u64)
    }
}
