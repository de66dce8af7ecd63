// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Circuit breaker state machine: CLOSED / OPEN / HALF_OPEN, transitioned
//! by lock-free atomics and CAS, in the idiom `rustymail::connection_pool`
//! already uses for its counters — no breaker precedent exists in the
//! example pack itself, so the state machine's shape is extrapolated from
//! that atomics-and-background-task discipline rather than copied whole.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::config::{BreakerConfig, ConfigError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(value: u8) -> Self {
        match value {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

/// Whether an operation outcome should count toward the breaker's
/// rolling windows. A IMAP `NO` response is a normal negative result (the
/// mailbox rejected the command) and never counts as a breaker failure;
/// only `BAD`, transport errors, and timeouts do (`SPEC_FULL.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Counts toward neither window (e.g. an IMAP `NO`).
    Ignored,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A single named breaker (generic, primary, or one host-group instance).
/// `failure_executions`/`success_executions` define the rolling window
/// size; `failure_threshold`/`success_threshold` define how many of the
/// last N executions must land on that side to trip/reset.
pub struct Breaker {
    name: String,
    config: BreakerConfig,
    state: AtomicU8,
    // Packed ring of the last `failure_executions` outcomes isn't needed —
    // the breaker only needs counts within the current window, reset on
    // every state transition, which keeps this lock-free and allocation-free.
    window_failures: AtomicU32,
    window_successes: AtomicU32,
    window_count: AtomicU32,
    opened_at_millis: AtomicU64,
}

impl Breaker {
    /// Rejects malformed configuration rather than silently clamping it —
    /// a `failure_executions`/`success_executions` of 0 used to be forced
    /// to 1 here with a warning; that masked misconfiguration instead of
    /// failing the component at load time (`SPEC_FULL.md` §7).
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let name = name.into();
        Ok(Self {
            name,
            config,
            state: AtomicU8::new(BreakerState::Closed as u8),
            window_failures: AtomicU32::new(0),
            window_successes: AtomicU32::new(0),
            window_count: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether a call is currently allowed through. When `OPEN` and the
    /// configured delay has elapsed, transitions to `HALF_OPEN` and allows
    /// exactly the probing call through (accomplished via CAS so only one
    /// concurrent caller wins the transition).
    pub fn allow(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        match self.state() {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                if now_millis().saturating_sub(opened_at) >= self.config.delay_millis {
                    let transitioned = self
                        .state
                        .compare_exchange(
                            BreakerState::Open as u8,
                            BreakerState::HalfOpen as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok();
                    if transitioned {
                        self.reset_window();
                        debug!("breaker {} transitioned OPEN -> HALF_OPEN", self.name);
                    }
                    true
                } else {
                    false
                }
            }
        }
    }

    fn reset_window(&self) {
        self.window_failures.store(0, Ordering::Release);
        self.window_successes.store(0, Ordering::Release);
        self.window_count.store(0, Ordering::Release);
    }

    /// Records an outcome and evaluates the rolling-window ratio against
    /// the configured threshold, transitioning state as needed.
    pub fn record(&self, outcome: Outcome) {
        if !self.config.enabled || outcome == Outcome::Ignored {
            return;
        }

        let state = self.state();
        let executions = match state {
            BreakerState::HalfOpen => self.config.success_executions,
            _ => self.config.failure_executions,
        };

        if outcome == Outcome::Failure {
            self.window_failures.fetch_add(1, Ordering::AcqRel);
        } else {
            self.window_successes.fetch_add(1, Ordering::AcqRel);
        }
        let count = self.window_count.fetch_add(1, Ordering::AcqRel) + 1;

        match state {
            BreakerState::Closed => {
                if count >= self.config.failure_executions {
                    let failures = self.window_failures.load(Ordering::Acquire);
                    if failures >= self.config.failure_threshold {
                        self.trip();
                    } else {
                        self.reset_window();
                    }
                }
            }
            BreakerState::HalfOpen => {
                if outcome == Outcome::Failure {
                    // A single failure while probing sends it straight back to OPEN.
                    self.trip();
                } else if count >= self.config.success_executions {
                    let successes = self.window_successes.load(Ordering::Acquire);
                    if successes >= self.config.success_threshold {
                        self.close();
                    } else {
                        self.trip();
                    }
                }
            }
            BreakerState::Open => {
                // Shouldn't normally record while open (allow() gates calls),
                // but stay defensive: re-arm the open timer.
                self.trip();
            }
        }

        let _ = executions;
    }

    fn trip(&self) {
        self.state.store(BreakerState::Open as u8, Ordering::Release);
        self.opened_at_millis.store(now_millis(), Ordering::Release);
        self.reset_window();
        warn!("breaker {} tripped OPEN", self.name);
    }

    fn close(&self) {
        self.state.store(BreakerState::Closed as u8, Ordering::Release);
        self.reset_window();
        debug!("breaker {} closed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            enabled: true,
            failure_threshold: 3,
            failure_executions: 5,
            success_threshold: 2,
            success_executions: 3,
            delay_millis: 50,
        }
    }

    #[test]
    fn trips_open_after_failure_ratio_crossed() {
        let breaker = Breaker::new("test", test_config()).unwrap();
        for _ in 0..3 {
            breaker.record(Outcome::Failure);
        }
        for _ in 0..2 {
            breaker.record(Outcome::Success);
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn stays_closed_when_failures_below_threshold() {
        let breaker = Breaker::new("test", test_config()).unwrap();
        for _ in 0..2 {
            breaker.record(Outcome::Failure);
        }
        for _ in 0..3 {
            breaker.record(Outcome::Success);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_closes_after_enough_successes() {
        let breaker = Breaker::new("test", test_config()).unwrap();
        for _ in 0..3 {
            breaker.record(Outcome::Failure);
        }
        for _ in 0..2 {
            breaker.record(Outcome::Success);
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(std::time::Duration::from_millis(60));
        assert!(breaker.allow());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record(Outcome::Success);
        breaker.record(Outcome::Success);
        breaker.record(Outcome::Success);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_reopens_on_any_failure() {
        let breaker = Breaker::new("test", test_config()).unwrap();
        for _ in 0..3 {
            breaker.record(Outcome::Failure);
        }
        for _ in 0..2 {
            breaker.record(Outcome::Success);
        }
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert!(breaker.allow());
        breaker.record(Outcome::Failure);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn zero_failure_executions_is_rejected_rather_than_clamped() {
        let mut config = test_config();
        config.failure_executions = 0;
        assert!(Breaker::new("test", config).is_err());
    }
}
