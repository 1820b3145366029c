//! Per-source trip/cooldown breaker and weighted egress rotation.
//!
//! A source that fails `failure_threshold` times in a row is suspended for
//! the cooldown window. There is no half-open probing: after cooldown the
//! next call goes out through a different egress handle when one exists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use serde::Serialize;

use crate::config::{CircuitConfig, EgressConfig};

/// Selection weight floor so a failing handle is never excluded outright.
const MIN_EGRESS_WEIGHT: f64 = 0.05;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    RateLimited,
    Captcha,
    Blocked,
    Error,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Captcha => write!(f, "captcha"),
            Self::Blocked => write!(f, "blocked"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One outbound network identity: a proxy or the host's own address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EgressHandle {
    pub id: String,
    pub class: String,
    pub proxy_url: Option<String>,
}

impl EgressHandle {
    pub fn direct() -> Self {
        Self {
            id: "direct".to_string(),
            class: "direct".to_string(),
            proxy_url: None,
        }
    }
}

/// Success/failure counts with exponential half-life decay.
#[derive(Debug, Clone)]
struct Reliability {
    successes: f64,
    failures: f64,
    updated: Instant,
}

impl Reliability {
    fn new(now: Instant) -> Self {
        Self {
            successes: 0.0,
            failures: 0.0,
            updated: now,
        }
    }

    fn decay(&mut self, now: Instant, half_life: Duration) {
        let elapsed = now.saturating_duration_since(self.updated);
        if half_life.is_zero() || elapsed.is_zero() {
            self.updated = now.max(self.updated);
            return;
        }
        let factor = 0.5f64.powf(elapsed.as_secs_f64() / half_life.as_secs_f64());
        self.successes *= factor;
        self.failures *= factor;
        self.updated = now;
    }

    fn record(&mut self, success: bool, now: Instant, half_life: Duration) {
        self.decay(now, half_life);
        if success {
            self.successes += 1.0;
        } else {
            self.failures += 1.0;
        }
    }

    fn score(&self, now: Instant, half_life: Duration) -> f64 {
        let mut view = self.clone();
        view.decay(now, half_life);
        let total = view.successes + view.failures;
        if total <= f64::EPSILON {
            0.5
        } else {
            view.successes / total
        }
    }
}

#[derive(Debug)]
struct SourceState {
    suspended_until: Option<Instant>,
    consecutive_failures: u32,
    last_failure: Option<FailureReason>,
    reliability: Reliability,
    /// Egress most recently handed out for this source.
    last_egress: Option<String>,
    /// Egress in use when the source last tripped; avoided once after cooldown.
    tripped_egress: Option<String>,
}

impl SourceState {
    fn new(now: Instant) -> Self {
        Self {
            suspended_until: None,
            consecutive_failures: 0,
            last_failure: None,
            reliability: Reliability::new(now),
            last_egress: None,
            tripped_egress: None,
        }
    }
}

#[derive(Debug)]
struct EgressState {
    handle: EgressHandle,
    reliability: Reliability,
}

/// Health of one source as exposed to callers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceHealth {
    pub source: String,
    pub available: bool,
    pub suspended_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub reliability: f64,
    pub last_failure: Option<FailureReason>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EgressHealth {
    pub id: String,
    pub class: String,
    pub reliability: f64,
}

#[derive(Debug)]
pub struct CircuitManager {
    config: CircuitConfig,
    sources: RwLock<HashMap<String, Arc<Mutex<SourceState>>>>,
    egress: Vec<Mutex<EgressState>>,
}

impl CircuitManager {
    pub fn new(config: CircuitConfig, pool: &[EgressConfig]) -> Self {
        let now = Instant::now();
        let mut handles: Vec<EgressHandle> = pool
            .iter()
            .enumerate()
            .map(|(i, egress)| EgressHandle {
                id: match egress.proxy_url {
                    Some(_) => format!("{}-{}", egress.class, i),
                    None => format!("{}-direct-{}", egress.class, i),
                },
                class: egress.class.clone(),
                proxy_url: egress.proxy_url.clone(),
            })
            .collect();
        if handles.is_empty() {
            handles.push(EgressHandle::direct());
        }

        Self {
            config,
            sources: RwLock::new(HashMap::new()),
            egress: handles
                .into_iter()
                .map(|handle| {
                    Mutex::new(EgressState {
                        handle,
                        reliability: Reliability::new(now),
                    })
                })
                .collect(),
        }
    }

    fn half_life(&self) -> Duration {
        Duration::from_secs(self.config.reliability_half_life_secs)
    }

    fn source(&self, name: &str) -> Arc<Mutex<SourceState>> {
        let key = name.to_lowercase();
        if let Some(state) = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(state);
        }
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sources
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(SourceState::new(Instant::now())))),
        )
    }

    pub fn is_available(&self, source: &str) -> bool {
        self.is_available_at(source, Instant::now())
    }

    pub fn is_available_at(&self, source: &str, now: Instant) -> bool {
        let state = self.source(source);
        let state = state.lock().unwrap_or_else(PoisonError::into_inner);
        !matches!(state.suspended_until, Some(until) if now < until)
    }

    pub fn record_success(&self, source: &str) {
        self.record_success_at(source, Instant::now());
    }

    pub fn record_success_at(&self, source: &str, now: Instant) {
        let half_life = self.half_life();
        let state = self.source(source);
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.consecutive_failures = 0;
        state.reliability.record(true, now, half_life);
    }

    pub fn record_failure(&self, source: &str, reason: FailureReason) {
        self.record_failure_at(source, reason, Instant::now());
    }

    /// Count a failure; returns `true` when this failure tripped the circuit.
    pub fn record_failure_at(&self, source: &str, reason: FailureReason, now: Instant) -> bool {
        let half_life = self.half_life();
        let state = self.source(source);
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.consecutive_failures += 1;
        state.last_failure = Some(reason);
        state.reliability.record(false, now, half_life);

        if state.consecutive_failures < self.config.failure_threshold.max(1) {
            return false;
        }

        let until = now + Duration::from_secs(self.config.cooldown_secs);
        state.suspended_until = Some(until);
        state.consecutive_failures = 0;
        state.tripped_egress = state.last_egress.clone();
        tracing::warn!(
            source = %source,
            reason = %reason,
            cooldown_secs = self.config.cooldown_secs,
            egress = ?state.tripped_egress,
            "Source circuit tripped"
        );
        true
    }

    pub fn record_egress_success(&self, handle: &EgressHandle) {
        self.record_egress_at(handle, true, Instant::now());
    }

    pub fn record_egress_failure(&self, handle: &EgressHandle) {
        self.record_egress_at(handle, false, Instant::now());
    }

    pub(crate) fn record_egress_at(&self, handle: &EgressHandle, success: bool, now: Instant) {
        let half_life = self.half_life();
        for egress in &self.egress {
            let mut egress = egress.lock().unwrap_or_else(PoisonError::into_inner);
            if egress.handle.id == handle.id {
                egress.reliability.record(success, now, half_life);
                return;
            }
        }
    }

    /// Weighted-random pick among handles of `class`, falling back to any handle.
    pub fn select_egress(&self, class: &str) -> Option<EgressHandle> {
        self.pick(class, None, Instant::now())
    }

    /// Like [`select_egress`](Self::select_egress), but steers a recovering
    /// source away from the handle it tripped on.
    pub fn select_egress_for(&self, source: &str, class: &str) -> Option<EgressHandle> {
        self.select_egress_for_at(source, class, Instant::now())
    }

    pub fn select_egress_for_at(
        &self,
        source: &str,
        class: &str,
        now: Instant,
    ) -> Option<EgressHandle> {
        let state = self.source(source);
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let suspended = matches!(state.suspended_until, Some(until) if now < until);
        let avoid = if suspended {
            state.tripped_egress.clone()
        } else {
            state.tripped_egress.take()
        };
        let handle = self.pick(class, avoid.as_deref(), now)?;
        state.last_egress = Some(handle.id.clone());
        Some(handle)
    }

    fn pick(&self, class: &str, avoid: Option<&str>, now: Instant) -> Option<EgressHandle> {
        let half_life = self.half_life();
        let pool: Vec<(EgressHandle, f64)> = self
            .egress
            .iter()
            .map(|e| {
                let e = e.lock().unwrap_or_else(PoisonError::into_inner);
                (
                    e.handle.clone(),
                    e.reliability.score(now, half_life).max(MIN_EGRESS_WEIGHT),
                )
            })
            .collect();

        let matching: Vec<&(EgressHandle, f64)> =
            pool.iter().filter(|(h, _)| h.class == class).collect();
        let mut candidates = if matching.is_empty() {
            pool.iter().collect::<Vec<_>>()
        } else {
            matching
        };

        if let Some(avoid) = avoid {
            if candidates.iter().any(|(h, _)| h.id != avoid) {
                candidates.retain(|(h, _)| h.id != avoid);
            } else if let Some(other) = pool.iter().find(|(h, _)| h.id != avoid) {
                candidates = vec![other];
            }
        }

        match candidates.len() {
            0 => None,
            1 => Some(candidates[0].0.clone()),
            _ => {
                let dist = WeightedIndex::new(candidates.iter().map(|(_, w)| *w)).ok()?;
                let idx = dist.sample(&mut rand::thread_rng());
                Some(candidates[idx].0.clone())
            }
        }
    }

    pub fn health(&self, source: &str) -> SourceHealth {
        self.health_at(source, Instant::now())
    }

    fn health_at(&self, source: &str, now: Instant) -> SourceHealth {
        let half_life = self.half_life();
        let state = self.source(source);
        let state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let suspended_until = state
            .suspended_until
            .filter(|until| *until > now)
            .and_then(|until| chrono::Duration::from_std(until - now).ok())
            .map(|remaining| Utc::now() + remaining);
        SourceHealth {
            source: source.to_lowercase(),
            available: suspended_until.is_none(),
            suspended_until,
            consecutive_failures: state.consecutive_failures,
            reliability: state.reliability.score(now, half_life),
            last_failure: state.last_failure,
        }
    }

    /// Health of every named source.
    pub fn snapshot<'a>(&self, sources: impl IntoIterator<Item = &'a str>) -> Vec<SourceHealth> {
        let now = Instant::now();
        sources
            .into_iter()
            .map(|source| self.health_at(source, now))
            .collect()
    }

    pub fn egress_snapshot(&self) -> Vec<EgressHealth> {
        let now = Instant::now();
        let half_life = self.half_life();
        self.egress
            .iter()
            .map(|e| {
                let e = e.lock().unwrap_or_else(PoisonError::into_inner);
                EgressHealth {
                    id: e.handle.id.clone(),
                    class: e.handle.class.clone(),
                    reliability: e.reliability.score(now, half_life),
                }
            })
            .collect()
    }
}
