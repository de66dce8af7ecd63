// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Production `MessageSource`: leases a session per call
//! (`ConnectionProvider::lease`) and drives it through `ImapClient`'s
//! `fetch`/`search_emails` facade — the same one-lease-per-operation
//! discipline `collaborators::ConnectionProvider` documents.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::collaborators::ConnectionProvider;
use crate::conversation::cache::FolderFingerprint;
use crate::conversation::engine::MessageSource;
use crate::imap::error::ImapError;
use crate::imap::fetch::FetchProfile;
use crate::imap::types::{MailMessage, MessageKey};

/// `MessageSource` over a live IMAP account. `AsyncImapOps` has no
/// STATUS/UIDNEXT-returning method, so `folder_fingerprint`'s `uid_next` is
/// approximated as `max(UID) + 1` over a full UID search rather than the
/// server's actual next-UID counter; `highest_mod_seq` is left `None` since
/// nothing in this crate issues CONDSTORE's `FETCH (MODSEQ)`. Both gaps are
/// tracked as open follow-ups rather than faked precise values.
pub struct ImapMessageSource {
    connections: std::sync::Arc<dyn ConnectionProvider>,
    account_id: u64,
}

impl ImapMessageSource {
    pub fn new(connections: std::sync::Arc<dyn ConnectionProvider>, account_id: u64) -> Self {
        Self { connections, account_id }
    }
}

#[async_trait]
impl MessageSource for ImapMessageSource {
    async fn folder_fingerprint(&self, folder: &str) -> Result<FolderFingerprint, ImapError> {
        let client = self.connections.lease(self.account_id).await?;
        client.select_folder(folder).await?;
        let uids = client.search_emails("ALL").await?;

        let total = uids.len() as u32;
        let uid_next = uids.iter().copied().max().unwrap_or(0) + 1;

        Ok(FolderFingerprint {
            total,
            uid_next,
            highest_mod_seq: None,
        })
    }

    async fn fetch_metadata(
        &self,
        folder: &str,
        look_ahead: i64,
        profile: &FetchProfile,
    ) -> Result<Vec<MailMessage>, ImapError> {
        let client = self.connections.lease(self.account_id).await?;
        client.select_folder(folder).await?;

        let mut uids = client.search_emails("ALL").await?;
        uids.sort_unstable();

        if look_ahead >= 0 {
            let keep = look_ahead as usize;
            if uids.len() > keep {
                let drop = uids.len() - keep;
                uids.drain(0..drop);
            }
        }

        let keys: Vec<MessageKey> = uids.into_iter().map(MessageKey::Uid).collect();
        client.fetch(folder, profile, &keys).await
    }

    async fn fill_messages(
        &self,
        messages: &[MailMessage],
        profile: &FetchProfile,
    ) -> Result<Vec<MailMessage>, ImapError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_folder: HashMap<&str, Vec<MessageKey>> = HashMap::new();
        for msg in messages {
            if let Some(uid) = msg.uid {
                by_folder.entry(msg.folder.as_str()).or_default().push(MessageKey::Uid(uid));
            }
        }

        let client = self.connections.lease(self.account_id).await?;
        let mut fetched: HashMap<(String, u32), MailMessage> = HashMap::new();
        for (folder, keys) in by_folder {
            client.select_folder(folder).await?;
            for msg in client.fetch(folder, profile, &keys).await? {
                if let Some(uid) = msg.uid {
                    fetched.insert((folder.to_string(), uid), msg);
                }
            }
        }

        // Preserve the caller's order/count; a message that vanished
        // server-side between threading and fill falls back to what we
        // already had rather than shrinking the result.
        let filled = messages
            .iter()
            .map(|original| {
                original
                    .uid
                    .and_then(|uid| fetched.get(&(original.folder.clone(), uid)))
                    .cloned()
                    .unwrap_or_else(|| original.clone())
            })
            .collect();

        Ok(filled)
    }
}
