// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `MailCoreRuntime`: the one aggregate the host application holds, built
//! once at startup. Replaces ad-hoc global state with an explicit struct
//! threaded through the call chain (`SPEC_FULL.md` §9 redesign note) — the
//! same "everything lives behind one `Arc<Self>`" shape
//! `rustymail::connection_pool::ConnectionPool` uses, generalized from a
//! single pool to the whole core's shared state.

use std::sync::Arc;

use dashmap::DashMap;

use crate::collaborators::{AclMapper, Clock, ConnectionProvider, FolderDirectory, SystemClock};
use crate::config::{BreakerConfig, MailCoreConfig};
use crate::conversation::ConversationCache;
use crate::executor::{Breaker, MetricsSink, NullMetricsSink};

/// Named breaker registry: one generic breaker per account, an optional
/// primary breaker per account, and host-group breakers shared across
/// accounts that route through the same group.
pub struct BreakerRegistry {
    generic: DashMap<u64, Arc<Breaker>>,
    primary: DashMap<u64, Arc<Breaker>>,
    host_groups: DashMap<String, Arc<Breaker>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            generic: DashMap::new(),
            primary: DashMap::new(),
            host_groups: DashMap::new(),
        }
    }

    /// Panics if `config` fails `BreakerConfig::validate` — malformed
    /// breaker configuration is rejected at `MailCoreConfig::load` time, so
    /// reaching here with an invalid config is a programming error, not a
    /// runtime condition callers should handle.
    pub fn generic_for(&self, account_id: u64, config: &BreakerConfig) -> Arc<Breaker> {
        self.generic
            .entry(account_id)
            .or_insert_with(|| {
                Arc::new(
                    Breaker::new(format!("generic:{}", account_id), config.clone())
                        .expect("breaker config must already be validated"),
                )
            })
            .clone()
    }

    pub fn primary_for(&self, account_id: u64, config: &BreakerConfig) -> Arc<Breaker> {
        self.primary
            .entry(account_id)
            .or_insert_with(|| {
                Arc::new(
                    Breaker::new(format!("primary:{}", account_id), config.clone())
                        .expect("breaker config must already be validated"),
                )
            })
            .clone()
    }

    pub fn host_group_for(&self, group_name: &str, config: &BreakerConfig) -> Arc<Breaker> {
        self.host_groups
            .entry(group_name.to_string())
            .or_insert_with(|| {
                Arc::new(
                    Breaker::new(format!("hostgroup:{}", group_name), config.clone())
                        .expect("breaker config must already be validated"),
                )
            })
            .clone()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MailCoreRuntime {
    pub config: MailCoreConfig,
    pub conversation_cache: Arc<ConversationCache>,
    pub breakers: Arc<BreakerRegistry>,
    pub connections: Arc<dyn ConnectionProvider>,
    pub folders: Arc<dyn FolderDirectory>,
    pub acl: Arc<dyn AclMapper>,
    pub metrics_sink: Arc<dyn MetricsSink>,
    pub clock: Arc<dyn Clock>,
    /// Per-account config overrides, keyed by account id — resolved via
    /// `ConfigLayers` against `config` as the global fallback.
    pub account_overrides: DashMap<u64, MailCoreConfig>,
}

pub struct MailCoreRuntimeBuilder {
    config: MailCoreConfig,
    connections: Option<Arc<dyn ConnectionProvider>>,
    folders: Option<Arc<dyn FolderDirectory>>,
    acl: Option<Arc<dyn AclMapper>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl MailCoreRuntimeBuilder {
    pub fn new(config: MailCoreConfig) -> Self {
        Self {
            config,
            connections: None,
            folders: None,
            acl: None,
            metrics_sink: None,
            clock: None,
        }
    }

    pub fn with_connection_provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.connections = Some(provider);
        self
    }

    pub fn with_folder_directory(mut self, directory: Arc<dyn FolderDirectory>) -> Self {
        self.folders = Some(directory);
        self
    }

    pub fn with_acl_mapper(mut self, acl: Arc<dyn AclMapper>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Panics if `with_connection_provider`/`with_folder_directory`/
    /// `with_acl_mapper` were never supplied — those are mandatory
    /// collaborators the host application must wire in.
    pub fn build(self) -> MailCoreRuntime {
        MailCoreRuntime {
            config: self.config,
            conversation_cache: Arc::new(ConversationCache::new()),
            breakers: Arc::new(BreakerRegistry::new()),
            connections: self.connections.expect("ConnectionProvider must be supplied"),
            folders: self.folders.expect("FolderDirectory must be supplied"),
            acl: self.acl.expect("AclMapper must be supplied"),
            metrics_sink: self.metrics_sink.unwrap_or_else(|| Arc::new(NullMetricsSink)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            account_overrides: DashMap::new(),
        }
    }
}

impl MailCoreRuntime {
    pub fn set_account_override(&self, account_id: u64, config: MailCoreConfig) {
        self.account_overrides.insert(account_id, config);
    }

    pub fn account_config(&self, account_id: u64) -> MailCoreConfig {
        self.account_overrides
            .get(&account_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::imap::client::ImapClient;
    use crate::imap::error::ImapError;
    use crate::imap::session::AsyncImapSessionWrapper;

    struct UnimplementedProvider;

    #[async_trait]
    impl ConnectionProvider for UnimplementedProvider {
        async fn lease(&self, _account_id: u64) -> Result<ImapClient<AsyncImapSessionWrapper>, ImapError> {
            Err(ImapError::Connection("not wired in test".to_string()))
        }
    }

    struct StubDirectory;

    #[async_trait]
    impl FolderDirectory for StubDirectory {
        async fn resolve_sent_folder(&self, _account_id: u64) -> Result<Option<String>, ImapError> {
            Ok(Some("Sent".to_string()))
        }
        async fn folder_exists(&self, _account_id: u64, _folder: &str) -> Result<bool, ImapError> {
            Ok(true)
        }
    }

    struct AllowAll;

    #[async_trait]
    impl AclMapper for AllowAll {
        async fn can_read(&self, _account_id: u64, _folder: &str) -> bool {
            true
        }
        async fn can_write(&self, _account_id: u64, _folder: &str) -> bool {
            true
        }
    }

    #[test]
    fn account_override_shadows_global_config() {
        let runtime = MailCoreRuntimeBuilder::new(MailCoreConfig::default())
            .with_connection_provider(Arc::new(UnimplementedProvider))
            .with_folder_directory(Arc::new(StubDirectory))
            .with_acl_mapper(Arc::new(AllowAll))
            .build();

        let mut overridden = MailCoreConfig::default();
        overridden.breaker.failure_threshold = 99;
        runtime.set_account_override(7, overridden);

        assert_eq!(runtime.account_config(7).breaker.failure_threshold, 99);
        assert_eq!(runtime.account_config(8).breaker.failure_threshold, 3);
    }

    #[test]
    fn breaker_registry_reuses_breaker_per_account() {
        let registry = BreakerRegistry::new();
        let config = BreakerConfig::default();
        let a = registry.generic_for(1, &config);
        let b = registry.generic_for(1, &config);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
