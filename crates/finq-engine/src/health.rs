//! Per-provider circuit breaker state
//!
//! [`HealthRegistry`] is a cheap, cloneable handle shared by every component
//! that talks to providers. Each provider's [`ProviderHealth`] sits behind its
//! own mutex, so calls to different providers never contend.
//!
//! State machine:
//!
//! ```text
//! Closed --(failures >= threshold)--> Open --(cooldown elapsed)--> HalfOpen
//! HalfOpen --(trial succeeds)--> Closed
//! HalfOpen --(trial fails)-----> Open (cooldown restarts)
//! ```

use crate::config::BreakerConfig;
use crate::error::ProviderError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit state of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls fail fast
    Open,
    /// A limited number of trial calls are let through
    HalfOpen,
}

/// Kind of permission granted for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Circuit was closed
    Normal,
    /// Half-open trial call
    Trial,
}

/// Health of one provider
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
    config: BreakerConfig,
}

impl ProviderHealth {
    /// Fresh, closed circuit
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            opened_at: None,
            trials_in_flight: 0,
            config,
        }
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Time of the most recent failure
    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// Ask for permission to call the provider
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here.
    pub fn try_acquire(&mut self, now: Instant) -> Option<Permit> {
        if self.state == CircuitState::Open {
            let cooled = self
                .opened_at
                .is_none_or(|at| now.saturating_duration_since(at) >= self.config.cooldown);
            if !cooled {
                return None;
            }
            self.state = CircuitState::HalfOpen;
            self.trials_in_flight = 0;
        }

        match self.state {
            CircuitState::Closed => Some(Permit::Normal),
            CircuitState::HalfOpen if self.trials_in_flight < self.config.half_open_trials => {
                self.trials_in_flight += 1;
                Some(Permit::Trial)
            }
            _ => None,
        }
    }

    /// Record a successful call; returns the new state if it changed
    pub fn record_success(&mut self, permit: Permit) -> Option<CircuitState> {
        match (self.state, permit) {
            (CircuitState::HalfOpen, Permit::Trial) => {
                self.close();
                Some(CircuitState::Closed)
            }
            (CircuitState::Closed, _) => {
                self.consecutive_failures = 0;
                None
            }
            // A call that started before the circuit opened says nothing about now
            _ => None,
        }
    }

    /// Record a failed call; returns the new state if it changed
    pub fn record_failure(&mut self, permit: Permit, now: Instant) -> Option<CircuitState> {
        self.last_failure = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match (self.state, permit) {
            (CircuitState::HalfOpen, Permit::Trial) => {
                self.open(now);
                Some(CircuitState::Open)
            }
            (CircuitState::Closed, _) if self.consecutive_failures >= self.config.failure_threshold => {
                self.open(now);
                Some(CircuitState::Open)
            }
            _ => None,
        }
    }

    /// Give back a trial permit whose call never completed
    pub fn release(&mut self, permit: Permit) {
        if permit == Permit::Trial && self.state == CircuitState::HalfOpen {
            self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trials_in_flight = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trials_in_flight = 0;
    }
}

/// Point-in-time view of a provider's health
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Provider name
    pub provider: String,
    /// Circuit state
    pub state: CircuitState,
    /// Consecutive failures
    pub consecutive_failures: u32,
}

type Slot = Arc<Mutex<ProviderHealth>>;

/// Shared registry of provider health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    config: BreakerConfig,
}

impl HealthRegistry {
    /// Create a registry applying `config` to every provider
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            slots: Arc::default(),
            config,
        }
    }

    fn slot(&self, provider: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ProviderHealth::new(self.config))))
            .clone()
    }

    /// Acquire a call guard, or fail fast with `CircuitOpen`
    pub fn acquire(&self, provider: &str) -> Result<CallGuard, ProviderError> {
        let slot = self.slot(provider);
        let permit = {
            let mut health = slot.lock().unwrap_or_else(PoisonError::into_inner);
            let before = health.state();
            let permit = health.try_acquire(Instant::now());
            if before == CircuitState::Open && health.state() == CircuitState::HalfOpen {
                info!(provider, "Circuit half-open, allowing trial call");
            }
            permit
        };

        permit
            .map(|permit| CallGuard {
                provider: provider.to_string(),
                slot,
                permit,
                settled: false,
            })
            .ok_or_else(|| ProviderError::CircuitOpen(provider.to_string()))
    }

    /// Current state of a provider (`Closed` if never seen)
    pub fn state(&self, provider: &str) -> CircuitState {
        self.with_health(provider, ProviderHealth::state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Snapshot of a single provider
    pub fn snapshot(&self, provider: &str) -> Option<HealthSnapshot> {
        self.with_health(provider, |h| HealthSnapshot {
            provider: provider.to_string(),
            state: h.state(),
            consecutive_failures: h.consecutive_failures(),
        })
    }

    /// Snapshots of every known provider, sorted by name
    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        let mut names: Vec<String> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.keys().cloned().collect()
        };
        names.sort();
        names.iter().filter_map(|n| self.snapshot(n)).collect()
    }

    fn with_health<T>(&self, provider: &str, f: impl FnOnce(&ProviderHealth) -> T) -> Option<T> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(provider).cloned()
        }?;
        let health = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&health))
    }
}

/// Permission for one provider call
///
/// Settle it with [`CallGuard::success`] or [`CallGuard::failure`]. A guard
/// dropped unsettled (the call was cancelled) hands its trial slot back.
#[derive(Debug)]
pub struct CallGuard {
    provider: String,
    slot: Slot,
    permit: Permit,
    settled: bool,
}

impl CallGuard {
    /// Permit kind
    pub fn permit(&self) -> Permit {
        self.permit
    }

    /// Record a success
    pub fn success(mut self) {
        self.settled = true;
        let mut health = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if health.record_success(self.permit) == Some(CircuitState::Closed) {
            info!(provider = %self.provider, "Circuit closed after successful trial");
        }
    }

    /// Record a failure
    pub fn failure(mut self, error: &ProviderError) {
        self.settled = true;
        let mut health = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if health.record_failure(self.permit, Instant::now()) == Some(CircuitState::Open) {
            warn!(
                provider = %self.provider,
                failures = health.consecutive_failures(),
                error = %error,
                "Circuit opened"
            );
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if !self.settled {
            let mut health = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            health.release(self.permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(10),
            half_open_trials: 1,
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let now = Instant::now();
        let mut health = ProviderHealth::new(config());

        for i in 0..2 {
            let permit = health.try_acquire(now).unwrap();
            assert_eq!(health.record_failure(permit, now), None, "failure {i}");
        }
        let permit = health.try_acquire(now).unwrap();
        assert_eq!(health.record_failure(permit, now), Some(CircuitState::Open));
        assert_eq!(health.state(), CircuitState::Open);
        assert_eq!(health.try_acquire(now + Duration::from_secs(9)), None);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let now = Instant::now();
        let mut health = ProviderHealth::new(config());

        let p = health.try_acquire(now).unwrap();
        health.record_failure(p, now);
        let p = health.try_acquire(now).unwrap();
        health.record_success(p);
        assert_eq!(health.consecutive_failures(), 0);
        assert_eq!(health.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_allows_limited_trials() {
        let now = Instant::now();
        let mut health = ProviderHealth::new(BreakerConfig {
            failure_threshold: 1,
            half_open_trials: 2,
            ..config()
        });
        let p = health.try_acquire(now).unwrap();
        health.record_failure(p, now);

        let later = now + Duration::from_secs(10);
        assert_eq!(health.try_acquire(later), Some(Permit::Trial));
        assert_eq!(health.state(), CircuitState::HalfOpen);
        assert_eq!(health.try_acquire(later), Some(Permit::Trial));
        assert_eq!(health.try_acquire(later), None);

        health.release(Permit::Trial);
        assert_eq!(health.try_acquire(later), Some(Permit::Trial));
    }

    #[test]
    fn test_trial_success_closes() {
        let now = Instant::now();
        let mut health = ProviderHealth::new(BreakerConfig {
            failure_threshold: 1,
            ..config()
        });
        let p = health.try_acquire(now).unwrap();
        health.record_failure(p, now);

        let later = now + Duration::from_secs(11);
        let trial = health.try_acquire(later).unwrap();
        assert_eq!(health.record_success(trial), Some(CircuitState::Closed));
        assert_eq!(health.consecutive_failures(), 0);
        assert_eq!(health.try_acquire(later), Some(Permit::Normal));
    }

    #[test]
    fn test_trial_failure_restarts_cooldown() {
        let now = Instant::now();
        let mut health = ProviderHealth::new(BreakerConfig {
            failure_threshold: 1,
            ..config()
        });
        let p = health.try_acquire(now).unwrap();
        health.record_failure(p, now);

        let trial_time = now + Duration::from_secs(10);
        let trial = health.try_acquire(trial_time).unwrap();
        assert_eq!(health.record_failure(trial, trial_time), Some(CircuitState::Open));

        // cooldown counts from the failed trial, not the first opening
        assert_eq!(health.try_acquire(trial_time + Duration::from_secs(5)), None);
        assert_eq!(
            health.try_acquire(trial_time + Duration::from_secs(10)),
            Some(Permit::Trial)
        );
    }

    #[test]
    fn test_stale_success_does_not_close_open_circuit() {
        let now = Instant::now();
        let mut health = ProviderHealth::new(BreakerConfig {
            failure_threshold: 1,
            ..config()
        });
        let slow = health.try_acquire(now).unwrap();
        let fast = health.try_acquire(now).unwrap();
        health.record_failure(fast, now);
        assert_eq!(health.record_success(slow), None);
        assert_eq!(health.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_guard_lifecycle() {
        let registry = HealthRegistry::new(BreakerConfig {
            failure_threshold: 1,
            ..config()
        });

        let guard = registry.acquire("yahoo").unwrap();
        guard.failure(&ProviderError::Timeout("yahoo".into()));
        assert_eq!(registry.state("yahoo"), CircuitState::Open);
        assert!(matches!(
            registry.acquire("yahoo"),
            Err(ProviderError::CircuitOpen(p)) if p == "yahoo"
        ));

        tokio::time::advance(Duration::from_secs(10)).await;

        // a cancelled trial frees its slot
        let trial = registry.acquire("yahoo").unwrap();
        assert_eq!(trial.permit(), Permit::Trial);
        drop(trial);

        let trial = registry.acquire("yahoo").unwrap();
        trial.success();
        assert_eq!(registry.state("yahoo"), CircuitState::Closed);

        assert_eq!(registry.state("finnhub"), CircuitState::Closed);
        let snapshots = registry.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].provider, "yahoo");
    }
}
