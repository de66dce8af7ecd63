// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Layered configuration: built-in defaults, overridden by a global file,
//! overridden by a primary-account section, overridden by a per-account
//! section — matching the precedence `SPEC_FULL.md` §6.2 requires.

use config::{Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
        }
    }
}

/// Host-group matcher for a named breaker (literal hosts or subdomains;
/// CIDR parsing is left to the `ConnectionProvider` collaborator, which
/// already resolves hosts to addresses).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostList {
    pub hosts: Vec<String>,
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub failure_executions: u32,
    pub success_threshold: u32,
    pub success_executions: u32,
    pub delay_millis: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            failure_executions: 5,
            success_threshold: 2,
            success_executions: 3,
            delay_millis: 1000,
        }
    }
}

impl BreakerConfig {
    /// Rejects configurations that would make the rolling window
    /// meaningless. `failure_executions`/`success_executions` of 0 used to
    /// be silently clamped to 1 inside `Breaker::new`; malformed
    /// configuration is now a load-time error instead (`SPEC_FULL.md` §7).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_executions == 0 {
            return Err(ConfigError::InvalidBreaker(
                "failure_executions must be greater than 0".to_string(),
            ));
        }
        if self.success_executions == 0 {
            return Err(ConfigError::InvalidBreaker(
                "success_executions must be greater than 0".to_string(),
            ));
        }
        if self.failure_threshold > self.failure_executions {
            return Err(ConfigError::InvalidBreaker(
                "failure_threshold cannot exceed failure_executions".to_string(),
            ));
        }
        if self.success_threshold > self.success_executions {
            return Err(ConfigError::InvalidBreaker(
                "success_threshold cannot exceed success_executions".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryBreakerConfig {
    #[serde(flatten)]
    pub base: BreakerConfig,
    pub apply_per_endpoint: bool,
}

impl Default for PrimaryBreakerConfig {
    fn default() -> Self {
        Self {
            base: BreakerConfig::default(),
            apply_per_endpoint: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostGroupBreakerConfig {
    #[serde(flatten)]
    pub base: BreakerConfig,
    pub hosts: HostList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub group_by_primary_hosts: bool,
    pub group_by_primary_endpoints: bool,
    pub measure_external_accounts: bool,
    pub group_by_external_hosts: bool,
    pub group_by_commands: bool,
    pub command_whitelist: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group_by_primary_hosts: false,
            group_by_primary_endpoints: false,
            measure_external_accounts: true,
            group_by_external_hosts: false,
            group_by_commands: true,
            command_whitelist: vec![
                "SELECT", "EXAMINE", "CREATE", "DELETE", "RENAME", "SUBSCRIBE", "UNSUBSCRIBE",
                "LIST", "LSUB", "STATUS", "APPEND", "EXPUNGE", "CLOSE", "SEARCH", "FETCH",
                "STORE", "COPY", "SORT",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationCacheConfig {
    pub enabled: bool,
    pub prefill_cache: bool,
    pub threshold: usize,
}

impl Default for ConversationCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefill_cache: true,
            threshold: 10_000,
        }
    }
}

/// Timeouts and per-operation knobs that apply regardless of layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapTuning {
    pub block_size: u32,
    pub max_num_connections: u32,
    pub imap_timeout_millis: u64,
    pub imap_connection_timeout_millis: u64,
    pub imap_temporary_down_millis: u64,
    pub failed_auth_timeout_millis: u64,
    pub use_imap_threader_if_supported: bool,
    pub allow_folder_caches: bool,
    pub allow_fetch_single_headers: bool,
    pub attachment_marker_enabled: bool,
    pub ignore_deleted: bool,
}

impl Default for ImapTuning {
    fn default() -> Self {
        Self {
            block_size: 500,
            max_num_connections: 10,
            imap_timeout_millis: 0,
            imap_connection_timeout_millis: 0,
            imap_temporary_down_millis: 0,
            failed_auth_timeout_millis: 10_000,
            use_imap_threader_if_supported: true,
            allow_folder_caches: true,
            allow_fetch_single_headers: true,
            attachment_marker_enabled: false,
            ignore_deleted: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailCoreConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub imap: ImapTuning,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub breaker_primary: PrimaryBreakerConfig,
    #[serde(default)]
    pub breaker_groups: Vec<HostGroupBreakerConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub conversation_cache: ConversationCacheConfig,
}

impl MailCoreConfig {
    /// Loads the built-in defaults, overridden by `config_path` (if
    /// present), overridden by environment variables prefixed `APP__`.
    /// Account- and primary-account-level overrides are resolved
    /// separately via `ConfigLayers`, since a single `config::Config`
    /// build has no notion of "per account".
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let path_to_use = config_path.unwrap_or("config/default.toml");
        let builder = config::Config::builder()
            .add_source(File::with_name(path_to_use).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        let config: Self = builder.build()?.try_deserialize()?;
        config.breaker.validate()?;
        config.breaker_primary.base.validate()?;
        for group in &config.breaker_groups {
            group.base.validate()?;
        }
        Ok(config)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load or parse configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid breaker configuration: {0}")]
    InvalidBreaker(String),
}

/// Resolves the `account-override > primary-override > global > built-in
/// default` precedence chain for a single dotted-path option. Each layer is
/// optional; the first layer that supplies a value wins.
pub struct ConfigLayers {
    pub account: Option<MailCoreConfig>,
    pub primary: Option<MailCoreConfig>,
    pub global: MailCoreConfig,
}

impl ConfigLayers {
    pub fn resolve_breaker(&self) -> &BreakerConfig {
        self.account
            .as_ref()
            .map(|c| &c.breaker)
            .or_else(|| self.primary.as_ref().map(|c| &c.breaker))
            .unwrap_or(&self.global.breaker)
    }

    pub fn resolve_metrics(&self) -> &MetricsConfig {
        self.account
            .as_ref()
            .map(|c| &c.metrics)
            .or_else(|| self.primary.as_ref().map(|c| &c.metrics))
            .unwrap_or(&self.global.metrics)
    }

    pub fn resolve_imap(&self) -> &ImapTuning {
        self.account
            .as_ref()
            .map(|c| &c.imap)
            .or_else(|| self.primary.as_ref().map(|c| &c.imap))
            .unwrap_or(&self.global.imap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_precedence_prefers_account_over_primary_over_global() {
        let mut account = MailCoreConfig::default();
        account.breaker.failure_threshold = 1;
        let mut primary = MailCoreConfig::default();
        primary.breaker.failure_threshold = 2;
        let mut global = MailCoreConfig::default();
        global.breaker.failure_threshold = 3;

        let layers = ConfigLayers {
            account: Some(account),
            primary: Some(primary),
            global,
        };
        assert_eq!(layers.resolve_breaker().failure_threshold, 1);
    }

    #[test]
    fn falls_back_to_global_when_no_overrides_present() {
        let layers = ConfigLayers {
            account: None,
            primary: None,
            global: MailCoreConfig::default(),
        };
        assert_eq!(layers.resolve_breaker().failure_threshold, 3);
    }

    #[test]
    fn defaults_pass_validation() {
        assert!(BreakerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_executions_is_rejected_at_validation() {
        let mut config = BreakerConfig::default();
        config.failure_executions = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBreaker(_))));
    }

    #[test]
    fn threshold_above_window_size_is_rejected() {
        let mut config = BreakerConfig::default();
        config.success_threshold = config.success_executions + 1;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBreaker(_))));
    }
}
