// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! IMAP client middleware: conversation threading across INBOX and Sent,
//! a mailbox-state-keyed cache for the assembled threads, and a
//! circuit-breaker layered command executor with latency telemetry.

pub mod collaborators;
pub mod config;
pub mod conversation;
pub mod error;
pub mod executor;
pub mod imap;
pub mod runtime;

pub mod prelude {
    pub use crate::config::{BreakerConfig, MailCoreConfig, MetricsConfig};
    pub use crate::error::{MailCoreError, MailCoreResult};
    pub use crate::imap::error::ImapError;
    pub use crate::imap::types::{
        Address, Email, Envelope, FlagOperation, Flags, Folder, HasAttachment, MailMessage,
        MailboxInfo, MessageKey, SearchCriteria,
    };
    pub use crate::imap::{AsyncImapOps, AsyncImapSessionWrapper, ImapClient};
    pub use crate::conversation::{Conversation, ConversationEngine, MailThread, SearchTerm, SortField, SortOrder};
    pub use crate::executor::{Breaker, ExecutorChain, ProtocolCommand};
    pub use crate::runtime::{MailCoreRuntime, MailCoreRuntimeBuilder};

    pub use log::{debug, error, info, trace, warn};
    pub use std::sync::Arc;
    pub use thiserror::Error;
    pub use tokio::sync::Mutex as TokioMutex;
    pub use uuid::Uuid;
}
