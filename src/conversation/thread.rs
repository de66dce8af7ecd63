// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Client-side references threading: a union-find over Message-ID /
//! In-Reply-To edges, producing one conversation per connected component.
//! Cycle safety comes from a `visited` set during the final grouping walk,
//! per `SPEC_FULL.md` §9's design note on cyclic references.

use std::collections::HashMap;

use log::debug;

use crate::imap::types::MailMessage;

/// A conversation: an unordered set of messages connected by the
/// Message-ID / In-Reply-To / References graph.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub messages: Vec<MailMessage>,
}

/// Public alias for callers that deal in reference-chain threads directly
/// (e.g. `ImapClient::get_thread_references`) rather than through
/// `ConversationEngine`'s cached, sorted pipeline.
pub type MailThread = Conversation;

impl Conversation {
    /// The message used to represent this conversation for root-level
    /// sorting: prefers a message whose folder matches `primary_folder` so
    /// a sent-folder message never misrepresents a conversation that also
    /// has a primary-folder side.
    pub fn root<'a>(&'a self, primary_folder: &str) -> Option<&'a MailMessage> {
        self.messages
            .iter()
            .find(|m| m.folder == primary_folder)
            .or_else(|| self.messages.first())
    }
}

struct UnionFind {
    parent: HashMap<String, String>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: HashMap::new(),
        }
    }

    fn find(&mut self, key: &str) -> String {
        let parent = self
            .parent
            .entry(key.to_string())
            .or_insert_with(|| key.to_string())
            .clone();
        if parent == key {
            return parent;
        }
        let root = self.find(&parent);
        self.parent.insert(key.to_string(), root.clone());
        root
    }

    fn union(&mut self, a: &str, b: &str) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }
}

/// Groups messages into conversations using a union-find over each
/// message's `reference_keys()` (its own Message-ID plus In-Reply-To).
/// A message with no Message-ID at all forms its own singleton group keyed
/// by its position, so it is never silently dropped.
pub fn build_conversations(messages: Vec<MailMessage>) -> Vec<Conversation> {
    let mut uf = UnionFind::new();

    for msg in &messages {
        let keys = msg.reference_keys();
        if keys.is_empty() {
            continue;
        }
        let first = &keys[0];
        uf.find(first); // ensure registered
        for key in &keys[1..] {
            uf.union(first, key);
        }
    }

    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    let mut visited: std::collections::HashSet<String> = std::collections::HashSet::new();

    for (idx, msg) in messages.iter().enumerate() {
        let keys = msg.reference_keys();
        let group_key = if let Some(first) = keys.first() {
            if visited.contains(first) {
                debug!("orphan references after first pass, no re-expansion: key={}", first);
            }
            visited.insert(first.clone());
            uf.find(first)
        } else {
            format!("__singleton_{}", idx)
        };
        groups.entry(group_key).or_default().push(idx);
    }

    let mut messages: Vec<Option<MailMessage>> = messages.into_iter().map(Some).collect();
    let mut conversations = Vec::with_capacity(groups.len());
    for (_, indices) in groups {
        let mut conv_messages = Vec::with_capacity(indices.len());
        for idx in indices {
            if let Some(msg) = messages[idx].take() {
                conv_messages.push(msg);
            }
        }
        conversations.push(Conversation {
            messages: conv_messages,
        });
    }
    conversations
}

/// Merges sent-folder messages into existing primary-folder conversations,
/// dropping sent messages already present by Message-ID and forming new
/// singleton conversations for sent messages that reference nothing known
/// (`SPEC_FULL.md` §4.3 "Merge with sent" steps 3-5).
pub fn merge_with_sent(mut conversations: Vec<Conversation>, sent_messages: Vec<MailMessage>) -> Vec<Conversation> {
    let mut known_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
    for conv in &conversations {
        for msg in &conv.messages {
            if let Some(id) = &msg.message_id {
                known_ids.insert(id.clone());
            }
        }
    }

    for sent in sent_messages {
        if let Some(id) = &sent.message_id {
            if known_ids.contains(id) {
                continue;
            }
        }

        let sent_keys: std::collections::HashSet<String> = sent.reference_keys().into_iter().collect();
        let target = conversations.iter_mut().find(|conv| {
            conv.messages.iter().any(|m| {
                m.reference_keys().iter().any(|k| sent_keys.contains(k))
                    || sent.in_reply_to.as_deref() == m.message_id.as_deref()
            })
        });

        if let Some(conv) = target {
            if let Some(id) = &sent.message_id {
                known_ids.insert(id.clone());
            }
            conv.messages.push(sent);
        } else {
            if let Some(id) = &sent.message_id {
                known_ids.insert(id.clone());
            }
            conversations.push(Conversation {
                messages: vec![sent],
            });
        }
    }

    conversations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(folder: &str, id: &str, in_reply_to: Option<&str>) -> MailMessage {
        let mut m = MailMessage::new(folder, 1);
        m.message_id = Some(id.to_string());
        m.in_reply_to = in_reply_to.map(String::from);
        m.received_date = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        m
    }

    #[test]
    fn references_chain_forms_a_single_conversation() {
        let messages = vec![
            msg("INBOX", "A", None),
            msg("INBOX", "B", Some("A")),
        ];
        let conversations = build_conversations(messages);
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].messages.len(), 2);
    }

    #[test]
    fn unrelated_messages_form_separate_conversations() {
        let messages = vec![msg("INBOX", "A", None), msg("INBOX", "Z", None)];
        let conversations = build_conversations(messages);
        assert_eq!(conversations.len(), 2);
    }

    #[test]
    fn merge_with_sent_matches_scenario_from_spec() {
        // Primary: A, B (In-Reply-To A). Sent: C (In-Reply-To B), D (In-Reply-To X, unknown).
        let primary = vec![msg("INBOX", "A", None), msg("INBOX", "B", Some("A"))];
        let conversations = build_conversations(primary);

        let sent = vec![
            msg("Sent", "C", Some("B")),
            msg("Sent", "D", Some("X")),
        ];
        let merged = merge_with_sent(conversations, sent);

        assert_eq!(merged.len(), 2);
        let abc = merged.iter().find(|c| c.messages.len() == 3).unwrap();
        let ids: std::collections::HashSet<_> =
            abc.messages.iter().filter_map(|m| m.message_id.clone()).collect();
        assert!(ids.contains("A") && ids.contains("B") && ids.contains("C"));

        let d_only = merged.iter().find(|c| c.messages.len() == 1).unwrap();
        assert_eq!(d_only.messages[0].folder, "Sent");
    }
}
