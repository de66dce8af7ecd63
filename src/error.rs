// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Crate-level error taxonomy, aggregating the protocol-level `ImapError`
//! with breaker/cache/config failures and structured diagnostic context.

use serde_json::Value;
use std::fmt;

use crate::imap::error::ImapError;

/// Structured context attached to a failed operation: what was being done,
/// with what parameters, and (when available) the underlying cause.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ErrorDetails {
    pub fn new(operation: impl Into<String>) -> Self {
        ErrorDetails {
            operation: Some(operation.into()),
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Extension trait for attaching operation/parameter context to a `Result`.
pub trait ErrorContext<T> {
    fn with_operation(self, operation: impl Into<String>) -> Result<T, MailCoreError>;
}

impl<T> ErrorContext<T> for Result<T, ImapError> {
    fn with_operation(self, operation: impl Into<String>) -> Result<T, MailCoreError> {
        self.map_err(|err| {
            let details = ErrorDetails::new(operation).with_source(err.to_string());
            MailCoreError::Imap(err, Some(details))
        })
    }
}

pub type MailCoreResult<T> = Result<T, MailCoreError>;

/// Top-level error type for the crate, mirroring `SPEC_FULL.md` §7's kinds.
/// `ImapError` already distinguishes protocol-level failure modes
/// (`BadResponse`, `InvalidCriteria`, …); this enum adds the kinds that live
/// above the protocol layer: breaker state, cache/config errors, and
/// access-control results surfaced by a collaborator.
#[derive(Debug)]
pub enum MailCoreError {
    /// A protocol-level failure, with optional structured context.
    Imap(ImapError, Option<ErrorDetails>),
    /// The circuit breaker guarding this command's host/account is open.
    BreakerOpen { breaker: String },
    /// A collaborator (ACL mapper, folder directory) denied the operation.
    AccessDenied(String),
    /// The server reported the account is over its storage/message quota.
    OverQuota(String),
    /// Configuration failed to load or contained an invalid value.
    Config(String),
    /// Any other internal failure not covered above.
    Other(String),
}

impl fmt::Display for MailCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailCoreError::Imap(err, _) => write!(f, "IMAP error: {}", err),
            MailCoreError::BreakerOpen { breaker } => {
                write!(f, "circuit breaker '{}' is open", breaker)
            }
            MailCoreError::AccessDenied(msg) => write!(f, "access denied: {}", msg),
            MailCoreError::OverQuota(msg) => write!(f, "over quota: {}", msg),
            MailCoreError::Config(msg) => write!(f, "configuration error: {}", msg),
            MailCoreError::Other(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl std::error::Error for MailCoreError {}

impl From<ImapError> for MailCoreError {
    fn from(err: ImapError) -> Self {
        MailCoreError::Imap(err, None)
    }
}

use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_details_builder_chains() {
        let details = ErrorDetails::new("list_folders")
            .with_params(serde_json::json!({"session_id": "123"}))
            .with_context(serde_json::json!({"server": "imap.example.com"}));

        assert_eq!(details.operation, Some("list_folders".to_string()));
        assert!(details.params.is_some());
        assert!(details.context.is_some());
    }

    #[test]
    fn imap_error_converts_with_operation_context() {
        let result: Result<(), ImapError> = Err(ImapError::FolderNotFound("INBOX/Archive".into()));
        let err = result.with_operation("select_folder").unwrap_err();
        match err {
            MailCoreError::Imap(_, Some(details)) => {
                assert_eq!(details.operation.as_deref(), Some("select_folder"));
            }
            _ => panic!("expected Imap variant with details"),
        }
    }

    #[test]
    fn breaker_open_displays_breaker_name() {
        let err = MailCoreError::BreakerOpen {
            breaker: "primary".to_string(),
        };
        assert_eq!(err.to_string(), "circuit breaker 'primary' is open");
    }
}
