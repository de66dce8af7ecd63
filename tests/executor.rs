// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end circuit-breaker + monitoring-executor coverage: a command
//! that fails enough times trips the breaker, the chain starts rejecting
//! before the command ever runs, and after the configured delay a single
//! successful probe closes it again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mailcore::config::BreakerConfig;
use mailcore::executor::{Breaker, ExecutorChain, Measurement, MetricsSink, MonitoringExecutor, ProtocolCommand};
use mailcore::imap::error::ImapError;

struct FlakyCommand {
    call_count: AtomicUsize,
    fail_first_n: usize,
}

#[async_trait]
impl ProtocolCommand<()> for FlakyCommand {
    async fn execute(&self) -> Result<(), ImapError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first_n {
            Err(ImapError::Connection("simulated host down".to_string()))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        "FETCH"
    }
}

fn breaker_config() -> BreakerConfig {
    BreakerConfig {
        enabled: true,
        failure_threshold: 3,
        failure_executions: 5,
        success_threshold: 2,
        success_executions: 3,
        delay_millis: 50,
    }
}

#[tokio::test]
async fn breaker_trips_then_recovers_through_half_open() {
    let generic = Arc::new(Breaker::new("generic:test-account", breaker_config()).unwrap());
    let chain = ExecutorChain::new(generic.clone(), None, None);

    let command = FlakyCommand {
        call_count: AtomicUsize::new(0),
        fail_first_n: 3,
    };

    // failure_executions=5: the window only evaluates once 5 calls have
    // landed in it. 3 failures followed by 2 successes fills the window
    // with 3 failures, crossing failure_threshold=3 and tripping OPEN.
    for _ in 0..5 {
        let _ = chain.run(&command).await;
    }
    assert_eq!(generic.state(), mailcore::executor::BreakerState::Open);

    // The breaker is now OPEN: the chain must reject without calling execute().
    let calls_before = command.call_count.load(Ordering::SeqCst);
    let rejected = chain.run(&command).await;
    assert!(matches!(rejected, Err(ImapError::BreakerOpen(_))));
    assert_eq!(command.call_count.load(Ordering::SeqCst), calls_before);

    // After the delay elapses, the probe call succeeds (fail_first_n already exhausted).
    tokio::time::sleep(Duration::from_millis(60)).await;
    let probe = chain.run(&command).await;
    assert!(probe.is_ok());
    assert_eq!(generic.state(), mailcore::executor::BreakerState::HalfOpen);

    // success_executions=3, success_threshold=2: two more successes close it.
    let _ = chain.run(&command).await;
    assert!(chain.run(&command).await.is_ok());
    assert_eq!(generic.state(), mailcore::executor::BreakerState::Closed);
}

struct Collecting(Mutex<Vec<Measurement>>);

impl MetricsSink for Collecting {
    fn record(&self, measurement: Measurement) {
        self.0.lock().unwrap().push(measurement);
    }
}

struct AlwaysOk;

#[async_trait]
impl ProtocolCommand<()> for AlwaysOk {
    async fn execute(&self) -> Result<(), ImapError> {
        Ok(())
    }
    fn name(&self) -> &str {
        "SEARCH"
    }
}

#[tokio::test]
async fn monitoring_executor_records_latency_for_every_call_regardless_of_breaker_state() {
    let sink = Arc::new(Collecting(Mutex::new(Vec::new())));
    let mut metrics_config = mailcore::config::MetricsConfig::default();
    metrics_config.group_by_commands = true;

    let monitored = MonitoringExecutor::new(AlwaysOk, metrics_config, "imap.example.com", sink.clone());
    monitored.execute().await.unwrap();
    monitored.execute().await.unwrap();

    let recorded = sink.0.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].tag.command, "SEARCH");
    assert_eq!(recorded[0].tag.status, "OK");
}
