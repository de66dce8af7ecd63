#![allow(unused_imports)]

// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.


// Public Interface for the IMAP module

pub mod atomic;
pub mod client;
pub mod error;
pub mod fetch;
pub mod oauth2;
pub mod session;
pub mod splitter;
pub mod types;
pub mod xoauth2;

// --- Re-exports ---
// Keep these minimal and focused on the public API

pub use client::ImapClient;
pub use error::ImapError;
pub use fetch::{build_fetch_command, parse_fetch_response, FetchItem, FetchProfile};
pub use oauth2::{MicrosoftOAuth2Client, MicrosoftOAuth2Config, OAuth2Error, StoredToken, TokenResponse};
pub use session::{AsyncImapOps, AsyncImapSessionWrapper};
pub use splitter::split_into_sequence_sets;
pub use types::{
    Address, Email, Envelope, FlagOperation, Flags, Folder, HasAttachment, MailMessage,
    MailboxInfo, MessageKey, SearchCriteria,
    // Re-export necessary payload types if they are part of the public API
    AppendEmailPayload, ModifyFlagsPayload,
};
pub use xoauth2::XOAuth2Authenticator;

// --- Type Aliases (Consider if these are truly needed publicly) ---

// Remove unresolved AccountConfig import
// use crate::config::AccountConfig; // Needed for factory
use futures::future::BoxFuture; // Needed for factory
use std::sync::Arc;
use std::future::Future;
use std::pin::Pin;
use std::fmt;

// Import ImapClientFactory from session module
use crate::imap::session::ImapClientFactory;

// Result type for the factory
pub type ImapSessionFactoryResult = Result<ImapClient<AsyncImapSessionWrapper>, ImapError>;

// Add ImapSessionFactory as a type alias for ImapClientFactory
pub type ImapSessionFactory = Box<dyn Fn() -> BoxFuture<'static, ImapSessionFactoryResult> + Send + Sync>;

// Cloneable wrapper for ImapSessionFactory
#[derive(Clone)]
pub struct CloneableImapSessionFactory {
    factory: Arc<ImapSessionFactory>,
}

impl CloneableImapSessionFactory {
    pub fn new(factory: ImapSessionFactory) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// Create a session using the default factory (credentials from .env)
    pub fn create_session(&self) -> BoxFuture<ImapSessionFactoryResult> {
        (self.factory)()
    }

    /// Create a session for a specific account, routing to XOAUTH2 when an
    /// access token is supplied and to password auth otherwise. Account
    /// resolution itself (credential storage, OAuth refresh policy) is the
    /// `ConnectionProvider` collaborator's responsibility, not this crate's
    /// (see `SPEC_FULL.md` §6.4); this helper only performs the connect.
    pub async fn create_session_for_host(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password_or_token: &str,
        use_xoauth2: bool,
    ) -> ImapSessionFactoryResult {
        use crate::imap::client::ImapClient;
        use log::debug;

        if use_xoauth2 {
            debug!("Creating IMAP session via XOAUTH2 for {}", username);
            return ImapClient::<AsyncImapSessionWrapper>::connect_with_xoauth2(
                host,
                port,
                username,
                password_or_token,
            )
            .await;
        }

        debug!("Creating IMAP session via password auth for {}", username);
        ImapClient::<AsyncImapSessionWrapper>::connect(host, port, username, password_or_token)
            .await
    }
}

impl fmt::Debug for CloneableImapSessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloneableImapSessionFactory")
            .field("factory", &"<function>")
            .finish()
    }
}

// SAFETY: ImapClientFactory is Box<dyn Fn() + Send + Sync>, so Arc<ImapClientFactory> is Send
unsafe impl Send for CloneableImapSessionFactory {}

// SAFETY: ImapClientFactory is Box<dyn Fn() + Send + Sync>, so Arc<ImapClientFactory> is Sync
unsafe impl Sync for CloneableImapSessionFactory {}

// Previous commented-out definition for reference
// pub type ImapSessionFactory = Arc<dyn Fn(&AccountConfig) -> BoxFuture<ImapSessionFactoryResult> + Send + Sync>;

// --- Potentially Remove or Move Internal Re-exports ---
// These seem like internal details or duplicates from the top-level re-exports

// pub use client::{ImapClientBuilder}; // Builder might be internal or exposed differently
// pub use session::{TlsImapSession}; // Likely internal

// Remove duplicate imports if already covered by `pub use` or not needed
// use std::sync::Arc;
// use session::{TlsCompatibleStream}; // Likely internal

// Remove the test module re-export if it was temporary
// #[cfg(test)] // Only expose for tests if absolutely necessary
// pub mod client_test;