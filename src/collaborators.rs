// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Collaborator seams: the host application supplies implementations of
//! these traits (account credential storage, folder lifecycle, ACL
//! policy, a clock). This crate only calls through them — it never picks
//! connection parameters, auth policy, or folder structure on its own
//! (`SPEC_FULL.md` §6.4, Non-goals). Shaped after `AsyncImapOps` in
//! `imap/session.rs`: one narrow async trait per concern rather than a
//! single do-everything interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::imap::client::ImapClient;
use crate::imap::error::ImapError;
use crate::imap::session::AsyncImapSessionWrapper;

/// Leases sessions to the engine/executor. Implementations own pooling,
/// auth refresh, and TLS setup; this crate only ever borrows a session for
/// the duration of one operation.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn lease(&self, account_id: u64) -> Result<ImapClient<AsyncImapSessionWrapper>, ImapError>;

    /// A second, independent session for background prefill — must not
    /// share a connection with any session handed out by `lease`.
    async fn lease_secondary(&self, account_id: u64) -> Result<ImapClient<AsyncImapSessionWrapper>, ImapError> {
        self.lease(account_id).await
    }
}

/// Folder lifecycle (create/rename/delete/subscribe) is explicitly out of
/// this crate's core scope (`SPEC_FULL.md` §1 Non-goals); this trait is
/// the seam the core calls through when it needs to resolve a folder name
/// to its current state (e.g. after a rename invalidates a cache entry).
#[async_trait]
pub trait FolderDirectory: Send + Sync {
    async fn resolve_sent_folder(&self, account_id: u64) -> Result<Option<String>, ImapError>;
    async fn folder_exists(&self, account_id: u64, folder: &str) -> Result<bool, ImapError>;
}

/// Per-account access policy. The core never embeds an ACL engine; it
/// only asks whether an operation is permitted before issuing it.
#[async_trait]
pub trait AclMapper: Send + Sync {
    async fn can_read(&self, account_id: u64, folder: &str) -> bool;
    async fn can_write(&self, account_id: u64, folder: &str) -> bool;
}

/// Injectable clock, so breaker delay/expiry logic and cache fingerprint
/// timestamps are deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
