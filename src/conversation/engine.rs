// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Conversation engine: threads a folder (optionally merged with Sent),
//! sorts and slices the result, and fills only the visible slice eagerly —
//! the rest is filled by a background task when prefill is enabled. The
//! slice/fill split and the second-session prefill mirror
//! `rustymail::connection_pool::SessionHandle`'s lease-per-task discipline:
//! the prefill task never shares a connection with the caller.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::collaborators::ConnectionProvider;
use crate::conversation::cache::{CacheArgs, ConversationCache, FolderFingerprint};
use crate::conversation::thread::{build_conversations, merge_with_sent, Conversation};
use crate::imap::error::ImapError;
use crate::imap::fetch::FetchProfile;
use crate::imap::types::{Address, MailMessage, MessageKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    ReceivedDate,
    SentDate,
    Subject,
    From,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A closed sum over the search-term shapes the engine can filter by,
/// degrading to client-side filtering when the server can't (§4.3).
#[derive(Debug, Clone)]
pub enum SearchTerm {
    And(Vec<SearchTerm>),
    Or(Vec<SearchTerm>),
    Not(Box<SearchTerm>),
    HeaderMatch { name: String, value: String },
    FlagMatch(String),
    BodyMatch(String),
    SizeCompare { at_least: Option<u32>, at_most: Option<u32> },
    SentSince(chrono::DateTime<chrono::Utc>),
    ReceivedSince(chrono::DateTime<chrono::Utc>),
    AddressMatch { field: AddressField, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    From,
    To,
    Cc,
    Bcc,
}

impl SearchTerm {
    pub fn matches(&self, msg: &MailMessage) -> bool {
        match self {
            SearchTerm::And(terms) => terms.iter().all(|t| t.matches(msg)),
            SearchTerm::Or(terms) => terms.iter().any(|t| t.matches(msg)),
            SearchTerm::Not(inner) => !inner.matches(msg),
            SearchTerm::HeaderMatch { name, value } => msg
                .headers
                .all(name)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
            SearchTerm::FlagMatch(flag) => msg.flags.iter().any(|f| f == flag) || msg.user_flags.contains(flag),
            SearchTerm::BodyMatch(text) => msg
                .text_preview
                .as_deref()
                .map(|p| p.to_lowercase().contains(&text.to_lowercase()))
                .unwrap_or(false),
            SearchTerm::SizeCompare { at_least, at_most } => {
                let Some(size) = msg.size else { return false };
                at_least.map(|min| size >= min).unwrap_or(true)
                    && at_most.map(|max| size <= max).unwrap_or(true)
            }
            SearchTerm::SentSince(since) => msg.sent_date.map(|d| d >= *since).unwrap_or(false),
            SearchTerm::ReceivedSince(since) => msg.received_date.map(|d| d >= *since).unwrap_or(false),
            SearchTerm::AddressMatch { field, value } => {
                let list: &[Address] = match field {
                    AddressField::From => &msg.from,
                    AddressField::To => &msg.to,
                    AddressField::Cc => &msg.cc,
                    AddressField::Bcc => &msg.bcc,
                };
                list.iter().any(|a| {
                    a.mailbox.as_deref().unwrap_or("").eq_ignore_ascii_case(value)
                        || a.name.as_deref().unwrap_or("").eq_ignore_ascii_case(value)
                })
            }
        }
    }

    /// A conversation matches iff any of its messages matches.
    pub fn matches_conversation(&self, conv: &Conversation) -> bool {
        conv.messages.iter().any(|m| self.matches(m))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThreadedList {
    pub conversations: Vec<Conversation>,
}

/// What the engine needs from the FETCH/session layer, kept as a narrow
/// trait so the engine is testable without a live IMAP connection — the
/// production implementation wraps `ImapClient`/`AsyncImapSessionWrapper`.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Folder totals used for the look-ahead cutoff and cache fingerprint.
    async fn folder_fingerprint(&self, folder: &str) -> Result<FolderFingerprint, ImapError>;

    /// Fetches up to `look_ahead` messages (or the whole folder when
    /// `look_ahead < 0`) using the given profile.
    async fn fetch_metadata(
        &self,
        folder: &str,
        look_ahead: i64,
        profile: &FetchProfile,
    ) -> Result<Vec<MailMessage>, ImapError>;

    /// Re-fetches `messages` (already known by UID/folder) with `profile`'s
    /// additional fields, returning the filled messages in the same order
    /// and count as given — this is the "fill" half of slice-then-fill:
    /// `fetch_metadata` only ever returns `FetchProfile::threading()`'s
    /// minimal fields, so the caller's actually-requested fields are
    /// applied here, after threading/sort/slice, not before.
    async fn fill_messages(
        &self,
        messages: &[MailMessage],
        profile: &FetchProfile,
    ) -> Result<Vec<MailMessage>, ImapError>;
}

pub struct ConversationEngineConfig {
    pub account_id: u64,
    pub primary_folder: String,
    pub sent_folder: Option<String>,
    pub use_cache: bool,
    pub prefill_cache: bool,
}

pub struct ConversationEngine {
    source: Arc<dyn MessageSource>,
    cache: Arc<ConversationCache>,
    config: ConversationEngineConfig,
    /// Lease source for the background prefill task's second session. `None`
    /// disables background prefill even when `config.prefill_cache` is set.
    connections: Option<Arc<dyn ConnectionProvider>>,
}

/// Starts at 1000 and doubles in 1000-steps until it exceeds
/// `max(index_end, max) * 2`; clamped to -1 (full folder) once it would
/// exceed the folder's total message count (`SPEC_FULL.md` §4.3).
pub fn compute_look_ahead(index_range_end: Option<usize>, max: Option<usize>, folder_total: u32) -> i64 {
    let target = index_range_end.unwrap_or(0).max(max.unwrap_or(0));
    let ceiling = (target * 2) as i64;
    let mut look_ahead: i64 = 1000;
    while look_ahead <= ceiling {
        look_ahead += 1000;
    }
    if look_ahead >= folder_total as i64 {
        return -1;
    }
    look_ahead
}

impl ConversationEngine {
    pub fn new(source: Arc<dyn MessageSource>, cache: Arc<ConversationCache>, config: ConversationEngineConfig) -> Self {
        Self {
            source,
            cache,
            config,
            connections: None,
        }
    }

    /// Same as `new`, but wires a `ConnectionProvider` so background prefill
    /// (`config.prefill_cache`) can lease a second session via
    /// `lease_secondary` instead of silently no-opping.
    pub fn with_connections(
        source: Arc<dyn MessageSource>,
        cache: Arc<ConversationCache>,
        config: ConversationEngineConfig,
        connections: Arc<dyn ConnectionProvider>,
    ) -> Self {
        Self {
            source,
            cache,
            config,
            connections: Some(connections),
        }
    }

    /// Top-level operation: thread, optionally merge with sent, sort,
    /// slice, and fill the visible slice — consulting/populating the
    /// cache along the way. `folder`/`include_sent`/`headers` are explicit
    /// per-call parameters rather than baked into `ConversationEngineConfig`,
    /// so one engine instance can serve requests against different folders.
    pub async fn get_thread_sorted(
        &self,
        folder: &str,
        include_sent: bool,
        index_range: Option<Range<usize>>,
        max: Option<usize>,
        sort_field: SortField,
        order: SortOrder,
        fields: &FetchProfile,
        headers: &[String],
        search: Option<&SearchTerm>,
    ) -> Result<Vec<Conversation>, ImapError> {
        let sent_folder = if include_sent {
            self.config.sent_folder.as_deref()
        } else {
            None
        };

        if fields.body && sent_folder.is_some() {
            return Err(ImapError::Validation(
                "body fetch is incompatible with merge-with-sent".to_string(),
            ));
        }

        let primary_fp = self.source.folder_fingerprint(folder).await?;
        let look_ahead = compute_look_ahead(index_range.as_ref().map(|r| r.end), max, primary_fp.total);

        let sent_fp = if let Some(sent) = sent_folder {
            self.source.folder_fingerprint(sent).await?
        } else {
            FolderFingerprint::default()
        };

        let mut header_names = fields.headers.clone();
        header_names.extend(headers.iter().cloned());

        let args = CacheArgs {
            sort_field: format!("{:?}", sort_field),
            ascending: order == SortOrder::Ascending,
            look_ahead,
            merge_with_sent: sent_folder.is_some(),
            fields_bitset: 0,
            header_names,
            primary: primary_fp,
            sent: sent_fp,
        };

        let cache_enabled = self.config.use_cache
            && !fields.body
            && look_ahead.unsigned_abs() as usize <= super::cache::CONVERSATION_CACHE_THRESHOLD;

        let conversations = if cache_enabled {
            if let Some(cached) = self.cache.get(self.config.account_id, folder, &args).await {
                debug!("conversation cache hit for folder={}", folder);
                cached.conversations.clone()
            } else {
                self.thread_and_cache(folder, sent_folder, sort_field, order, look_ahead, headers, &args, cache_enabled)
                    .await?
            }
        } else {
            self.thread_and_cache(folder, sent_folder, sort_field, order, look_ahead, headers, &args, cache_enabled)
                .await?
        };

        let (visible, first, rest) = Self::partition(conversations, index_range, search);
        let filled = self.fill_conversations(visible, fields).await?;

        if self.config.prefill_cache && cache_enabled {
            self.spawn_background_prefill(folder, first, rest, fields.clone());
        }

        Ok(filled)
    }

    /// Threads `folder` (merging with `sent_folder` when given), sorts, and
    /// — when `cache_enabled` — stores the unfilled (threading-profile-only)
    /// conversations under `args`'s digest. Cache entries are always
    /// unfilled because `CacheArgs.fields_bitset` doesn't yet vary by
    /// requested fields; filling always happens after a cache hit or miss,
    /// never before a `put`.
    #[allow(clippy::too_many_arguments)]
    async fn thread_and_cache(
        &self,
        folder: &str,
        sent_folder: Option<&str>,
        sort_field: SortField,
        order: SortOrder,
        look_ahead: i64,
        headers: &[String],
        args: &CacheArgs,
        cache_enabled: bool,
    ) -> Result<Vec<Conversation>, ImapError> {
        let mut threading_profile = FetchProfile::threading();
        threading_profile.headers.extend(headers.iter().cloned());

        let primary_messages = self.source.fetch_metadata(folder, look_ahead, &threading_profile).await?;
        let mut conversations = build_conversations(primary_messages);

        if let Some(sent) = sent_folder {
            let sent_messages = self.source.fetch_metadata(sent, look_ahead, &threading_profile).await?;
            conversations = merge_with_sent(conversations, sent_messages);
        }

        sort_conversations(&mut conversations, folder, sort_field, order);

        if cache_enabled {
            let full_list = Arc::new(ThreadedList {
                conversations: conversations.clone(),
            });
            self.cache.put(self.config.account_id, folder, args, full_list).await;
        }

        Ok(conversations)
    }

    /// Splits search-filtered conversations into `(visible, first, rest)`
    /// around `index_range` — `first` is everything before the visible
    /// window, `rest` everything after. With no range, everything is
    /// visible and `first`/`rest` are empty (nothing left to prefill).
    fn partition(
        conversations: Vec<Conversation>,
        index_range: Option<Range<usize>>,
        search: Option<&SearchTerm>,
    ) -> (Vec<Conversation>, Vec<Conversation>, Vec<Conversation>) {
        let filtered: Vec<Conversation> = match search {
            Some(term) => conversations.into_iter().filter(|c| term.matches_conversation(c)).collect(),
            None => conversations,
        };

        match index_range {
            Some(range) => {
                let start = range.start.min(filtered.len());
                let end = range.end.min(filtered.len()).max(start);
                let mut iter = filtered.into_iter();
                let first: Vec<_> = (&mut iter).take(start).collect();
                let visible: Vec<_> = (&mut iter).take(end - start).collect();
                let rest: Vec<_> = iter.collect();
                (visible, first, rest)
            }
            None => (filtered, Vec::new(), Vec::new()),
        }
    }

    /// Fills every message across `conversations` in one `fill_messages`
    /// call, then reassembles conversations from the flattened result —
    /// the slice part of slice-then-fill.
    async fn fill_conversations(&self, conversations: Vec<Conversation>, fields: &FetchProfile) -> Result<Vec<Conversation>, ImapError> {
        if conversations.is_empty() {
            return Ok(conversations);
        }

        let sizes: Vec<usize> = conversations.iter().map(|c| c.messages.len()).collect();
        let flattened: Vec<MailMessage> = conversations.into_iter().flat_map(|c| c.messages).collect();
        let filled = self.source.fill_messages(&flattened, fields).await?;

        let mut iter = filled.into_iter();
        let mut result = Vec::with_capacity(sizes.len());
        for count in sizes {
            let messages: Vec<MailMessage> = (&mut iter).take(count).collect();
            result.push(Conversation { messages });
        }
        Ok(result)
    }

    /// Fires a detached task that leases a second session
    /// (`ConnectionProvider::lease_secondary`) and fills `first`/`rest` with
    /// `fields` — never touching the cache or the caller's result, it only
    /// warms the secondary session/server-side state for the next request
    /// against this folder. A missing `connections` collaborator or a
    /// lease/fetch failure is logged and otherwise ignored: prefill is an
    /// optimization, not a correctness requirement.
    fn spawn_background_prefill(&self, folder: &str, first: Vec<Conversation>, rest: Vec<Conversation>, fields: FetchProfile) {
        let Some(connections) = self.connections.clone() else {
            debug!("prefill_cache is set but no ConnectionProvider was wired; skipping background prefill");
            return;
        };
        if first.is_empty() && rest.is_empty() {
            return;
        }

        let account_id = self.config.account_id;
        let folder = folder.to_string();

        tokio::spawn(async move {
            let client = match connections.lease_secondary(account_id).await {
                Ok(client) => client,
                Err(e) => {
                    debug!("background prefill could not lease a secondary session for folder={}: {}", folder, e);
                    return;
                }
            };

            for batch in [first, rest] {
                let keys: Vec<MessageKey> = batch
                    .iter()
                    .flat_map(|c| c.messages.iter())
                    .filter_map(|m| m.uid.map(MessageKey::Uid))
                    .collect();
                if keys.is_empty() {
                    continue;
                }
                if let Err(e) = client.fetch(&folder, &fields, &keys).await {
                    debug!("background prefill fetch failed for folder={}: {}", folder, e);
                }
            }
        });
    }
}

/// Sorts conversations by their root message (root = the message in the
/// primary folder, or the first message when none is). Ties on
/// `ReceivedDate` break by presence of In-Reply-To (replies lose), then by
/// sent-date in the requested order (`SPEC_FULL.md` §4.3 "Sort and slice").
pub fn sort_conversations(
    conversations: &mut [Conversation],
    primary_folder: &str,
    sort_field: SortField,
    order: SortOrder,
) {
    conversations.sort_by(|a, b| {
        let ra = a.root(primary_folder);
        let rb = b.root(primary_folder);
        let ordering = compare_roots(ra, rb, sort_field);
        match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });
}

fn compare_roots(a: Option<&MailMessage>, b: Option<&MailMessage>, sort_field: SortField) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match sort_field {
            SortField::ReceivedDate => {
                let primary = a.received_date.cmp(&b.received_date);
                if primary != Ordering::Equal {
                    return primary;
                }
                let reply_order = a.in_reply_to.is_some().cmp(&b.in_reply_to.is_some());
                if reply_order != Ordering::Equal {
                    return reply_order;
                }
                a.sent_date.cmp(&b.sent_date)
            }
            SortField::SentDate => a.sent_date.cmp(&b.sent_date),
            SortField::Subject => a.subject.cmp(&b.subject),
            SortField::From => {
                let fa = a.from.first().and_then(|f| f.mailbox.clone());
                let fb = b.from.first().and_then(|f| f.mailbox.clone());
                fa.cmp(&fb)
            }
            SortField::Size => a.size.cmp(&b.size),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_ahead_doubles_until_past_double_the_window() {
        assert_eq!(compute_look_ahead(Some(10), Some(0), 1_000_000), 1000);
        assert_eq!(compute_look_ahead(Some(600), Some(0), 1_000_000), 2000);
    }

    #[test]
    fn look_ahead_clamps_to_full_folder_when_small() {
        assert_eq!(compute_look_ahead(Some(10), Some(0), 500), -1);
    }
}
