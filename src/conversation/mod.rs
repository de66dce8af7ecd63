// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Conversation assembly: threading (C3), its cache (C4), and the plain
//! union-find core they both sit on.

pub mod cache;
pub mod engine;
pub mod imap_source;
pub mod thread;

pub use cache::{CacheArgs, ConversationCache, FolderFingerprint, CONVERSATION_CACHE_THRESHOLD};
pub use engine::{
    compute_look_ahead, sort_conversations, AddressField, ConversationEngine, ConversationEngineConfig,
    MessageSource, SearchTerm, SortField, SortOrder, ThreadedList,
};
pub use imap_source::ImapMessageSource;
pub use thread::{build_conversations, merge_with_sent, Conversation, MailThread};
