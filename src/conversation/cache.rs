// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Conversation cache: memoizes computed thread lists keyed on a digest of
//! mailbox state, so an unchanged folder never re-threads on every page
//! view. Keying and lock-striping follow the `DashMap`-per-shard idiom
//! `rustymail::connection_pool::ConnectionPool` already uses; the bounded
//! per-shard memoization itself uses an `lru::LruCache`, the same crate
//! `rustymail::dashboard::services::cache` reaches for.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use lru::LruCache;
use tokio::sync::RwLock;

use crate::conversation::engine::ThreadedList;

/// A computed list longer than this (in look-ahead messages) is never
/// cached — see `SPEC_FULL.md` §4.4.
pub const CONVERSATION_CACHE_THRESHOLD: usize = 10_000;

/// Per-folder mailbox state fingerprint contributing to the args-hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FolderFingerprint {
    pub total: u32,
    pub uid_next: u32,
    /// `-1` (encoded as `i64::MIN` is avoided; we use `Option`) when
    /// CONDSTORE is not advertised.
    pub highest_mod_seq: Option<u64>,
}

/// All inputs that would change a threaded result, hashed into a single
/// args-hash. Two `CacheArgs` with equal hashes are assumed to produce
/// identical output for the same folder state.
#[derive(Debug, Clone)]
pub struct CacheArgs {
    pub sort_field: String,
    pub ascending: bool,
    pub look_ahead: i64,
    pub merge_with_sent: bool,
    pub fields_bitset: u64,
    pub header_names: Vec<String>,
    pub primary: FolderFingerprint,
    pub sent: FolderFingerprint,
}

impl CacheArgs {
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.sort_field.hash(&mut hasher);
        self.ascending.hash(&mut hasher);
        self.look_ahead.hash(&mut hasher);
        self.merge_with_sent.hash(&mut hasher);
        self.fields_bitset.hash(&mut hasher);
        let mut headers = self.header_names.clone();
        headers.sort();
        headers.hash(&mut hasher);
        self.primary.hash(&mut hasher);
        if self.merge_with_sent {
            self.sent.hash(&mut hasher);
        }
        hasher.finish()
    }
}

struct CacheSlot {
    entries: LruCache<u64, Arc<ThreadedList>>,
    last_fingerprint: FolderFingerprint,
}

impl CacheSlot {
    fn new() -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(16).unwrap()),
            last_fingerprint: FolderFingerprint::default(),
        }
    }
}

/// `(account_id, folder)` lock-striped conversation cache. Readers clone an
/// `Arc<ThreadedList>` out of the shard without holding the shard lock
/// across caller-visible work; exactly one writer updates a shard at a
/// time via its `RwLock`.
pub struct ConversationCache {
    shards: DashMap<(u64, String), Arc<RwLock<CacheSlot>>>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
        }
    }

    fn shard(&self, account_id: u64, folder: &str) -> Arc<RwLock<CacheSlot>> {
        self.shards
            .entry((account_id, folder.to_string()))
            .or_insert_with(|| Arc::new(RwLock::new(CacheSlot::new())))
            .clone()
    }

    /// Looks up a cached result. Returns `None` on a plain miss, and also
    /// treats a UIDVALIDITY-style break as a miss even if the args-hash
    /// still matches: any `uid_next` decrease, or an increase in
    /// `uid_next` unmatched by an equal increase in `total`, invalidates
    /// the whole shard (see `SPEC_FULL.md` §9 Open Question resolution).
    pub async fn get(&self, account_id: u64, folder: &str, args: &CacheArgs) -> Option<Arc<ThreadedList>> {
        let shard = self.shard(account_id, folder);
        let mut guard = shard.write().await;

        if Self::is_validity_break(&guard.last_fingerprint, &args.primary) {
            debug!(
                "uidvalidity-style break detected for account={} folder={}, invalidating cache shard",
                account_id, folder
            );
            guard.entries.clear();
        }
        guard.last_fingerprint = args.primary;

        guard.entries.get(&args.digest()).cloned()
    }

    fn is_validity_break(previous: &FolderFingerprint, current: &FolderFingerprint) -> bool {
        if previous.uid_next == 0 {
            return false; // no prior observation yet
        }
        if current.uid_next < previous.uid_next {
            return true;
        }
        let uid_delta = current.uid_next - previous.uid_next;
        let total_delta = current.total.saturating_sub(previous.total);
        uid_delta > 0 && uid_delta != total_delta
    }

    /// Inserts a computed list, unless it exceeds the look-ahead threshold.
    pub async fn put(&self, account_id: u64, folder: &str, args: &CacheArgs, list: Arc<ThreadedList>) {
        if args.look_ahead >= 0 && args.look_ahead as usize > CONVERSATION_CACHE_THRESHOLD {
            debug!(
                "skipping cache insert for account={} folder={}: look_ahead {} exceeds threshold",
                account_id, folder, args.look_ahead
            );
            return;
        }
        let shard = self.shard(account_id, folder);
        let mut guard = shard.write().await;
        guard.entries.put(args.digest(), list);
    }

    /// Invalidates every cached entry for an account's folder (folder
    /// rename/move/delete, ACL change, explicit clear).
    pub async fn invalidate(&self, account_id: u64, folder: &str) {
        if let Some(shard) = self.shards.get(&(account_id, folder.to_string())) {
            shard.write().await.entries.clear();
        }
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::engine::ThreadedList;

    fn args(uid_next: u32, total: u32) -> CacheArgs {
        CacheArgs {
            sort_field: "RECEIVED_DATE".to_string(),
            ascending: false,
            look_ahead: 1000,
            merge_with_sent: false,
            fields_bitset: 0,
            header_names: vec![],
            primary: FolderFingerprint {
                total,
                uid_next,
                highest_mod_seq: None,
            },
            sent: FolderFingerprint::default(),
        }
    }

    #[tokio::test]
    async fn hit_requires_matching_digest_and_no_validity_break() {
        let cache = ConversationCache::new();
        let a = args(100, 50);
        cache.put(1, "INBOX", &a, Arc::new(ThreadedList::default())).await;
        assert!(cache.get(1, "INBOX", &a).await.is_some());
    }

    #[tokio::test]
    async fn uid_next_jump_without_matching_total_increase_invalidates() {
        let cache = ConversationCache::new();
        let a = args(100, 50);
        cache.put(1, "INBOX", &a, Arc::new(ThreadedList::default())).await;
        assert!(cache.get(1, "INBOX", &a).await.is_some());

        // uid_next jumped by 10 but total only grew by 1 -> validity break.
        let b = args(110, 51);
        assert!(cache.get(1, "INBOX", &b).await.is_none());
    }

    #[tokio::test]
    async fn oversized_lookahead_is_never_cached() {
        let cache = ConversationCache::new();
        let mut a = args(100, 50);
        a.look_ahead = (CONVERSATION_CACHE_THRESHOLD + 1) as i64;
        cache.put(1, "INBOX", &a, Arc::new(ThreadedList::default())).await;
        assert!(cache.get(1, "INBOX", &a).await.is_none());
    }
}
