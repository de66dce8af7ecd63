// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command executor chain: wraps a raw IMAP call with the host-group,
//! primary, and generic breakers (in that order, each short-circuiting on
//! `BreakerOpen`), and feeds the outcome back into every breaker it passed
//! through. The `ProtocolCommand<Output>` seam replaces nested callback
//! closures with a plain async trait, the way `session.rs`'s
//! `AsyncImapOps` already gives each verb its own method instead of one
//! generic "run command" closure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex as TokioMutex;

use crate::executor::breaker::{Breaker, Outcome};
use crate::imap::error::ImapError;

/// One unit of protocol work the chain can execute — a thin async
/// closure-replacement so the chain never has to know what command it's
/// actually running.
#[async_trait]
pub trait ProtocolCommand<Output>: Send + Sync {
    async fn execute(&self) -> Result<Output, ImapError>;

    /// A short label used for metrics tagging (`SELECT`, `FETCH`, ...).
    fn name(&self) -> &str;
}

/// Adapts a single, already-constructed future into a `ProtocolCommand` so
/// an ad-hoc async block (one IMAP verb call in `session.rs`) can be routed
/// through `ExecutorChain`/`MonitoringExecutor` without its own named type.
/// The future is taken out of the mutex on the first (and only) `execute`
/// call — a command is built fresh per invocation, never reused.
pub struct OnceCommand<Output> {
    name: String,
    future: TokioMutex<Option<Pin<Box<dyn Future<Output = Result<Output, ImapError>> + Send>>>>,
}

impl<Output> OnceCommand<Output> {
    pub fn new(
        name: impl Into<String>,
        future: impl Future<Output = Result<Output, ImapError>> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            future: TokioMutex::new(Some(Box::pin(future))),
        }
    }
}

#[async_trait]
impl<Output: Send> ProtocolCommand<Output> for OnceCommand<Output> {
    async fn execute(&self) -> Result<Output, ImapError> {
        let future = self
            .future
            .lock()
            .await
            .take()
            .expect("OnceCommand executed more than once");
        future.await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn classify(result: &Result<(), &ImapError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Success,
        Err(ImapError::Operation(_)) => Outcome::Ignored, // IMAP `NO` never counts as a breaker failure.
        Err(_) => Outcome::Failure,
    }
}

/// Ordered chain: host-group breaker (if any) -> primary breaker (if this
/// host is the account's primary) -> generic breaker -> underlying call.
/// Any breaker in the chain that is `OPEN` short-circuits the whole chain
/// with `ImapError::BreakerOpen` before the underlying command ever runs.
pub struct ExecutorChain {
    generic: Arc<Breaker>,
    primary: Option<Arc<Breaker>>,
    host_group: Option<Arc<Breaker>>,
}

impl ExecutorChain {
    pub fn new(generic: Arc<Breaker>, primary: Option<Arc<Breaker>>, host_group: Option<Arc<Breaker>>) -> Self {
        Self {
            generic,
            primary,
            host_group,
        }
    }

    fn breakers_in_order(&self) -> Vec<&Arc<Breaker>> {
        let mut chain = Vec::with_capacity(3);
        if let Some(hg) = &self.host_group {
            chain.push(hg);
        }
        if let Some(p) = &self.primary {
            chain.push(p);
        }
        chain.push(&self.generic);
        chain
    }

    pub async fn run<Output, Cmd: ProtocolCommand<Output>>(&self, command: &Cmd) -> Result<Output, ImapError> {
        let breakers = self.breakers_in_order();

        for breaker in &breakers {
            if !breaker.allow() {
                debug!("breaker {} rejected command {}", breaker.name(), command.name());
                return Err(ImapError::BreakerOpen(breaker.name().to_string()));
            }
        }

        let result = command.execute().await;
        let outcome = classify(&result.as_ref().map(|_| ()).map_err(|e| e));

        for breaker in &breakers {
            breaker.record(outcome);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;

    struct AlwaysFails;

    #[async_trait]
    impl ProtocolCommand<()> for AlwaysFails {
        async fn execute(&self) -> Result<(), ImapError> {
            Err(ImapError::Connection("down".to_string()))
        }
        fn name(&self) -> &str {
            "TEST"
        }
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl ProtocolCommand<()> for AlwaysSucceeds {
        async fn execute(&self) -> Result<(), ImapError> {
            Ok(())
        }
        fn name(&self) -> &str {
            "TEST"
        }
    }

    fn quick_config() -> BreakerConfig {
        BreakerConfig {
            enabled: true,
            failure_threshold: 2,
            failure_executions: 2,
            success_threshold: 1,
            success_executions: 1,
            delay_millis: 10_000,
        }
    }

    #[tokio::test]
    async fn trips_generic_breaker_and_rejects_further_calls() {
        let generic = Arc::new(Breaker::new("generic", quick_config()).unwrap());
        let chain = ExecutorChain::new(generic, None, None);

        let _ = chain.run(&AlwaysFails).await;
        let _ = chain.run(&AlwaysFails).await;

        let result = chain.run(&AlwaysSucceeds).await;
        assert!(matches!(result, Err(ImapError::BreakerOpen(_))));
    }

    #[tokio::test]
    async fn host_group_breaker_short_circuits_before_primary() {
        let generic = Arc::new(Breaker::new("generic", quick_config()).unwrap());
        let host_group = Arc::new(Breaker::new("hg", quick_config()).unwrap());
        let _ = host_group.record(Outcome::Failure);
        let _ = host_group.record(Outcome::Failure);

        let chain = ExecutorChain::new(generic, None, Some(host_group));
        let result = chain.run(&AlwaysSucceeds).await;
        assert!(matches!(result, Err(ImapError::BreakerOpen(_))));
    }
}
