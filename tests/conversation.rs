// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end coverage of the conversation engine against a fake message
//! source, exercising threading, merge-with-sent, sorting, and slicing
//! together the way a real caller would hit them through one call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use mailcore::conversation::{
    CacheArgs, ConversationCache, ConversationEngine, ConversationEngineConfig, FolderFingerprint,
    MessageSource, SortField, SortOrder,
};
use mailcore::imap::error::ImapError;
use mailcore::imap::fetch::FetchProfile;
use mailcore::imap::types::MailMessage;

struct FakeSource {
    primary: Vec<MailMessage>,
    sent: Vec<MailMessage>,
}

fn msg(folder: &str, id: &str, in_reply_to: Option<&str>, day: u32) -> MailMessage {
    let mut m = MailMessage::new(folder, 1);
    m.message_id = Some(id.to_string());
    m.in_reply_to = in_reply_to.map(String::from);
    m.received_date = Some(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap());
    m.sent_date = m.received_date;
    m
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn folder_fingerprint(&self, folder: &str) -> Result<FolderFingerprint, ImapError> {
        let total = if folder == "Sent" { self.sent.len() } else { self.primary.len() } as u32;
        Ok(FolderFingerprint {
            total,
            uid_next: total + 1,
            highest_mod_seq: None,
        })
    }

    async fn fetch_metadata(
        &self,
        folder: &str,
        _look_ahead: i64,
        _profile: &FetchProfile,
    ) -> Result<Vec<MailMessage>, ImapError> {
        if folder == "Sent" {
            Ok(self.sent.clone())
        } else {
            Ok(self.primary.clone())
        }
    }

    async fn fill_messages(
        &self,
        messages: &[MailMessage],
        _profile: &FetchProfile,
    ) -> Result<Vec<MailMessage>, ImapError> {
        // The fake source already returns fully-populated messages from
        // fetch_metadata, so filling is a no-op pass-through.
        Ok(messages.to_vec())
    }
}

fn engine(source: FakeSource, sent_folder: Option<&str>) -> ConversationEngine {
    ConversationEngine::new(
        Arc::new(source),
        Arc::new(ConversationCache::new()),
        ConversationEngineConfig {
            account_id: 1,
            primary_folder: "INBOX".to_string(),
            sent_folder: sent_folder.map(String::from),
            use_cache: true,
            prefill_cache: false,
        },
    )
}

#[tokio::test]
async fn threads_and_merges_sent_then_sorts_newest_first() {
    let source = FakeSource {
        primary: vec![msg("INBOX", "A", None, 1), msg("INBOX", "B", Some("A"), 2)],
        sent: vec![msg("Sent", "C", Some("B"), 3), msg("Sent", "D", Some("X"), 1)],
    };
    let engine = engine(source, Some("Sent"));

    let result = engine
        .get_thread_sorted(
            "INBOX",
            true,
            None,
            None,
            SortField::ReceivedDate,
            SortOrder::Descending,
            &FetchProfile::threading(),
            &[],
            None,
        )
        .await
        .expect("engine call should succeed");

    assert_eq!(result.len(), 2);
    // The merged 3-message conversation's root is in INBOX (message B), received day 2;
    // the lone D conversation sits in Sent, received day 1 — descending order puts B's thread first.
    assert_eq!(result[0].messages.len(), 3);
    assert_eq!(result[1].messages.len(), 1);
}

#[tokio::test]
async fn slices_the_requested_window() {
    let source = FakeSource {
        primary: vec![
            msg("INBOX", "A", None, 1),
            msg("INBOX", "B", None, 2),
            msg("INBOX", "C", None, 3),
        ],
        sent: vec![],
    };
    let engine = engine(source, None);

    let result = engine
        .get_thread_sorted(
            "INBOX",
            false,
            Some(0..2),
            None,
            SortField::ReceivedDate,
            SortOrder::Descending,
            &FetchProfile::threading(),
            &[],
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.len(), 2);
}

#[tokio::test]
async fn body_fetch_is_rejected_when_merge_with_sent_is_configured() {
    let source = FakeSource {
        primary: vec![msg("INBOX", "A", None, 1)],
        sent: vec![],
    };
    let engine = engine(source, Some("Sent"));

    let mut profile = FetchProfile::threading();
    profile.body = true;

    let result = engine
        .get_thread_sorted(
            "INBOX",
            true,
            None,
            None,
            SortField::ReceivedDate,
            SortOrder::Descending,
            &profile,
            &[],
            None,
        )
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn repeated_call_on_unchanged_folder_hits_the_cache() {
    let source = FakeSource {
        primary: vec![msg("INBOX", "A", None, 1), msg("INBOX", "B", Some("A"), 2)],
        sent: vec![],
    };
    let engine = engine(source, None);

    let first = engine
        .get_thread_sorted(
            "INBOX",
            false,
            None,
            None,
            SortField::ReceivedDate,
            SortOrder::Descending,
            &FetchProfile::threading(),
            &[],
            None,
        )
        .await
        .unwrap();
    let second = engine
        .get_thread_sorted(
            "INBOX",
            false,
            None,
            None,
            SortField::ReceivedDate,
            SortOrder::Descending,
            &FetchProfile::threading(),
            &[],
            None,
        )
        .await
        .unwrap();

    assert_eq!(first.len(), second.len());
}

#[test]
fn cache_args_digest_is_stable_across_header_name_ordering() {
    let base = FolderFingerprint {
        total: 10,
        uid_next: 11,
        highest_mod_seq: None,
    };
    let a = CacheArgs {
        sort_field: "ReceivedDate".to_string(),
        ascending: false,
        look_ahead: 1000,
        merge_with_sent: false,
        fields_bitset: 0,
        header_names: vec!["Subject".to_string(), "From".to_string()],
        primary: base,
        sent: FolderFingerprint::default(),
    };
    let mut b = a.clone();
    b.header_names = vec!["From".to_string(), "Subject".to_string()];
    assert_eq!(a.digest(), b.digest());
}
