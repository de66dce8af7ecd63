// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Monitoring executor (C6): wraps a command with a nanosecond-resolution
//! timer and records it under a `(command, status, host)` tag, the same
//! tag shape `rustymail::connection_pool::PoolStats` uses for its counters
//! (just generalized from fixed fields to an open tag tuple).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use log::trace;

use crate::config::MetricsConfig;
use crate::executor::chain::ProtocolCommand;
use crate::imap::error::ImapError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricTag {
    pub command: String,
    pub status: &'static str,
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct Measurement {
    pub tag: MetricTag,
    pub latency_nanos: u128,
}

/// Where completed measurements go. Production wires this to whatever
/// backend the embedding application already uses; this crate only
/// produces the measurement and leaves storage/export out of scope.
pub trait MetricsSink: Send + Sync {
    fn record(&self, measurement: Measurement);
}

pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn record(&self, _measurement: Measurement) {}
}

/// Buckets an IMAP verb into the configured whitelist, or `OTHER`.
fn classify_command(cmd: &str, whitelist: &[String]) -> String {
    let upper = cmd.to_ascii_uppercase();
    if whitelist.iter().any(|w| w.eq_ignore_ascii_case(&upper)) {
        upper
    } else {
        "OTHER".to_string()
    }
}

/// The seven-value status taxonomy `SPEC_FULL.md` §4.6 requires, collapsing
/// `Result<Output, ImapError>` down to the IMAP response class (or a
/// transport/unknown bucket) instead of a binary ok/error split.
fn classify_status<Output>(result: &Result<Output, ImapError>) -> &'static str {
    match result {
        Ok(_) => "OK",
        Err(ImapError::Operation(_)) => "NO",
        Err(ImapError::BadResponse(_)) | Err(ImapError::InvalidMessageSet(_)) => "BAD",
        Err(ImapError::Bye(_)) => "BYE",
        Err(ImapError::Connection(_))
        | Err(ImapError::Tls(_))
        | Err(ImapError::Timeout(_))
        | Err(ImapError::Io(_)) => "COMMUNICATION_ERROR",
        Err(ImapError::Unknown(_)) => "UNKNOWN",
        Err(_) => "UNKNOWN_ERROR",
    }
}

/// Whether the account behind a command is the mailbox's own primary
/// account/endpoint or an external (delegated/shared) one — `SPEC_FULL.md`
/// §4.6 requires the monitoring executor to tag these separately rather
/// than lumping every host under one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountClass {
    Primary,
    External,
}

pub struct MonitoringExecutor<Inner> {
    inner: Inner,
    config: MetricsConfig,
    host: String,
    account_class: AccountClass,
    sink: Arc<dyn MetricsSink>,
}

impl<Inner> MonitoringExecutor<Inner> {
    pub fn new(inner: Inner, config: MetricsConfig, host: impl Into<String>, sink: Arc<dyn MetricsSink>) -> Self {
        Self::with_account_class(inner, config, host, AccountClass::Primary, sink)
    }

    pub fn with_account_class(
        inner: Inner,
        config: MetricsConfig,
        host: impl Into<String>,
        account_class: AccountClass,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inner,
            config,
            host: host.into(),
            account_class,
            sink,
        }
    }

    /// Groups by host only when the config asks to group *this* account
    /// class by host — `measure_external_accounts` gates whether an
    /// external account is even measured at all, and
    /// `group_by_primary_endpoints` additionally splits a primary account's
    /// measurements per endpoint rather than per host.
    fn host_tag(&self) -> String {
        match self.account_class {
            AccountClass::Primary => {
                if self.config.group_by_primary_endpoints {
                    format!("endpoint:{}", self.host)
                } else if self.config.group_by_primary_hosts {
                    self.host.clone()
                } else {
                    "ALL".to_string()
                }
            }
            AccountClass::External => {
                if !self.config.measure_external_accounts {
                    return "UNMEASURED".to_string();
                }
                if self.config.group_by_external_hosts {
                    self.host.clone()
                } else {
                    "ALL".to_string()
                }
            }
        }
    }

    fn command_tag(&self, name: &str) -> String {
        if self.config.group_by_commands {
            classify_command(name, &self.config.command_whitelist)
        } else {
            "ALL".to_string()
        }
    }
}

#[async_trait]
impl<Output, Inner> ProtocolCommand<Output> for MonitoringExecutor<Inner>
where
    Output: Send,
    Inner: ProtocolCommand<Output>,
{
    async fn execute(&self) -> Result<Output, ImapError> {
        if !self.config.enabled {
            return self.inner.execute().await;
        }

        let start = Instant::now();
        let result = self.inner.execute().await;
        let elapsed = start.elapsed();

        let status = classify_status(&result);
        let tag = MetricTag {
            command: self.command_tag(self.inner.name()),
            status,
            host: self.host_tag(),
        };
        trace!("command {:?} took {:?}", tag, elapsed);
        self.sink.record(Measurement {
            tag,
            latency_nanos: elapsed.as_nanos(),
        });

        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<Measurement>>);

    impl MetricsSink for Recording {
        fn record(&self, measurement: Measurement) {
            self.0.lock().unwrap().push(measurement);
        }
    }

    struct Noop;

    #[async_trait]
    impl ProtocolCommand<()> for Noop {
        async fn execute(&self) -> Result<(), ImapError> {
            Ok(())
        }
        fn name(&self) -> &str {
            "FETCH"
        }
    }

    #[tokio::test]
    async fn records_one_measurement_per_call_tagged_with_classified_command() {
        let sink = Arc::new(Recording(Mutex::new(Vec::new())));
        let mut config = MetricsConfig {
            enabled: true,
            group_by_primary_hosts: true,
            group_by_primary_endpoints: false,
            measure_external_accounts: true,
            group_by_external_hosts: false,
            group_by_commands: true,
            command_whitelist: vec!["FETCH".to_string()],
        };
        config.command_whitelist.push("SELECT".to_string());

        let executor = MonitoringExecutor::new(Noop, config, "imap.example.com", sink.clone());
        executor.execute().await.unwrap();

        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].tag.command, "FETCH");
        assert_eq!(recorded[0].tag.status, "OK");
        assert_eq!(recorded[0].tag.host, "imap.example.com");
    }

    #[test]
    fn unlisted_command_buckets_to_other() {
        let whitelist = vec!["FETCH".to_string()];
        assert_eq!(classify_command("idle", &whitelist), "OTHER");
        assert_eq!(classify_command("fetch", &whitelist), "FETCH");
    }

    #[tokio::test]
    async fn external_account_is_unmeasured_when_disabled() {
        let sink = Arc::new(Recording(Mutex::new(Vec::new())));
        let mut config = MetricsConfig::default();
        config.measure_external_accounts = false;

        let executor = MonitoringExecutor::with_account_class(
            Noop,
            config,
            "shared.example.com",
            AccountClass::External,
            sink.clone(),
        );
        executor.execute().await.unwrap();

        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded[0].tag.host, "UNMEASURED");
    }

    #[tokio::test]
    async fn primary_endpoint_grouping_overrides_host_grouping() {
        let sink = Arc::new(Recording(Mutex::new(Vec::new())));
        let mut config = MetricsConfig::default();
        config.group_by_primary_endpoints = true;
        config.group_by_primary_hosts = false;

        let executor = MonitoringExecutor::new(Noop, config, "imap.example.com", sink.clone());
        executor.execute().await.unwrap();

        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded[0].tag.host, "endpoint:imap.example.com");
    }

    #[test]
    fn status_taxonomy_classifies_error_kinds() {
        let ok: Result<(), ImapError> = Ok(());
        assert_eq!(classify_status(&ok), "OK");
        assert_eq!(
            classify_status::<()>(&Err(ImapError::Operation("no".into()))),
            "NO"
        );
        assert_eq!(
            classify_status::<()>(&Err(ImapError::BadResponse("bad".into()))),
            "BAD"
        );
        assert_eq!(
            classify_status::<()>(&Err(ImapError::Bye("closing".into()))),
            "BYE"
        );
        assert_eq!(
            classify_status::<()>(&Err(ImapError::Connection("down".into()))),
            "COMMUNICATION_ERROR"
        );
        assert_eq!(
            classify_status::<()>(&Err(ImapError::Unknown("?".into()))),
            "UNKNOWN"
        );
        assert_eq!(
            classify_status::<()>(&Err(ImapError::Internal("oops".into()))),
            "UNKNOWN_ERROR"
        );
    }
}
