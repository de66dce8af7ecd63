// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! FETCH command construction and untagged-response parsing.
//!
//! Each wire item is represented as a `FetchItem` variant; `apply_fetch_item`
//! matches on the variant and mutates an in-progress `MailMessage`. This
//! keeps per-item parsing exhaustive over the known item set instead of
//! threading ad-hoc `if let` chains through one big conversion function.

use std::collections::HashMap;

use async_imap::types::Fetch;
use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::imap::error::ImapError;
use crate::imap::types::{
    flag_wire_string, Address, ContentType, HasAttachment, HeaderMultimap, MailMessage,
};

/// Which fields a caller wants materialized for a batch of messages.
#[derive(Debug, Clone, Default)]
pub struct FetchProfile {
    pub uid: bool,
    pub internal_date: bool,
    pub flags: bool,
    pub size: bool,
    pub envelope: bool,
    pub body_structure: bool,
    pub headers: Vec<String>,
    pub body: bool,
    pub snippet: bool,
    pub x_real_uid: bool,
    pub x_mailbox: bool,
}

impl FetchProfile {
    /// The profile the conversation engine uses for the first (threading)
    /// pass: just enough to build the reply graph and sort roots.
    pub fn threading() -> Self {
        Self {
            uid: true,
            internal_date: true,
            flags: true,
            envelope: true,
            headers: vec!["References".to_string()],
            ..Default::default()
        }
    }

    /// Translates this profile into the IMAP FETCH item-list, using
    /// `BODY.PEEK[HEADER.FIELDS (...)]` for named headers (IMAP4rev1) so
    /// fetching headers never sets `\Seen`.
    pub fn to_item_list(&self) -> Vec<String> {
        let mut items = Vec::new();
        if self.uid {
            items.push("UID".to_string());
        }
        if self.x_real_uid {
            items.push("X-REAL-UID".to_string());
        }
        if self.x_mailbox {
            items.push("X-MAILBOX".to_string());
        }
        if self.internal_date {
            items.push("INTERNALDATE".to_string());
        }
        if self.size {
            items.push("RFC822.SIZE".to_string());
        }
        if self.flags {
            items.push("FLAGS".to_string());
        }
        if self.envelope {
            items.push("ENVELOPE".to_string());
        }
        if self.body_structure {
            items.push("BODYSTRUCTURE".to_string());
        }
        if !self.headers.is_empty() {
            items.push(format!(
                "BODY.PEEK[HEADER.FIELDS ({})]",
                self.headers.join(" ")
            ));
        }
        if self.body {
            items.push("BODY.PEEK[]".to_string());
        }
        if self.snippet {
            items.push("SNIPPET (FUZZY)".to_string());
        }
        items
    }
}

/// Builds a `[UID ]FETCH <sequence-set> (<items>)` command string. Callers
/// supply an already-split sequence-set (see `crate::imap::splitter`).
pub fn build_fetch_command(sequence_set: &str, use_uid: bool, profile: &FetchProfile) -> String {
    let items = profile.to_item_list().join(" ");
    if use_uid {
        format!("UID FETCH {} ({})", sequence_set, items)
    } else {
        format!("FETCH {} ({})", sequence_set, items)
    }
}

/// One parsed FETCH response item. `Unknown` preserves forward
/// compatibility with item types this crate doesn't special-case.
#[derive(Debug, Clone)]
pub enum FetchItem {
    Uid(u32),
    XRealUid(u32),
    XMailbox(String),
    InternalDate(DateTime<Utc>),
    Size(u32),
    Flags(Vec<String>),
    Envelope(EnvelopeItem),
    HeaderBlock(String),
    Body(Vec<u8>),
    BodyStructure(ContentType, HasAttachment),
    Snippet(String),
    Unknown(String),
}

/// Envelope fields lifted out of `async_imap::types::Envelope` before
/// `apply_fetch_item` applies them, so the match arm itself stays a plain
/// field assignment.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeItem {
    pub subject: Option<String>,
    pub sent_date: Option<DateTime<Utc>>,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

/// Known Content-Disposition / user-flag markers that settle
/// `has_attachment` before BODYSTRUCTURE is consulted.
const ATTACHMENT_FLAG_YES: &str = "$HasAttachment";
const ATTACHMENT_FLAG_NO: &str = "$HasNoAttachment";
const FLAG_FORWARDED: &str = "$Forwarded";
const FLAG_MDN_SENT: &str = "$MDNSent";

/// Applies a single parsed item to an in-progress message. BODYSTRUCTURE
/// must be applied last among a response's items so a FLAGS-derived
/// `has_attachment` is not overwritten by structure-based inference.
pub fn apply_fetch_item(msg: &mut MailMessage, item: FetchItem) {
    match item {
        FetchItem::Uid(uid) => msg.set_uid(uid),
        FetchItem::XRealUid(uid) => msg.original_uid = Some(uid),
        FetchItem::XMailbox(name) => msg.original_folder = Some(name),
        FetchItem::InternalDate(dt) => msg.received_date = Some(dt),
        FetchItem::Size(size) => msg.size = Some(size),
        FetchItem::Flags(flags) => apply_flags(msg, flags),
        FetchItem::Envelope(env) => apply_envelope(msg, env),
        FetchItem::HeaderBlock(raw) => apply_header_block(msg, &raw),
        FetchItem::Body(bytes) => {
            if msg.content_type.is_none() {
                if let Some((ct, _)) = infer_structure(&bytes) {
                    msg.content_type = Some(ct);
                }
            }
        }
        FetchItem::BodyStructure(ct, inferred_attachment) => {
            msg.content_type = Some(ct);
            if msg.has_attachment == HasAttachment::Unknown {
                msg.has_attachment = inferred_attachment;
            }
        }
        FetchItem::Snippet(text) => msg.text_preview = Some(text),
        FetchItem::Unknown(name) => debug!("unhandled FETCH item type: {}", name),
    }
}

fn apply_flags(msg: &mut MailMessage, flags: Vec<String>) {
    let mut system_flags = Vec::new();
    for flag in flags {
        if let Some(label) = flag.strip_prefix("$cl_") {
            if let Ok(n) = label.parse::<u8>() {
                msg.color_label = Some(n);
                continue;
            }
        }
        match flag.as_str() {
            ATTACHMENT_FLAG_YES => msg.has_attachment = HasAttachment::Yes,
            ATTACHMENT_FLAG_NO => msg.has_attachment = HasAttachment::No,
            FLAG_FORWARDED | FLAG_MDN_SENT => {
                msg.user_flags.insert(flag);
            }
            _ if flag.starts_with('\\') => system_flags.push(flag),
            _ => {
                msg.user_flags.insert(flag);
            }
        }
    }
    msg.flags = system_flags;
}

fn apply_envelope(msg: &mut MailMessage, env: EnvelopeItem) {
    msg.subject = env.subject;
    msg.sent_date = env.sent_date;
    msg.from = env.from;
    msg.to = env.to;
    msg.cc = env.cc;
    msg.bcc = env.bcc;
    msg.reply_to = env.reply_to;
    msg.in_reply_to = env.in_reply_to;
    msg.message_id = env.message_id;
}

/// Known headers that trigger a typed setter in addition to being appended
/// to the raw multimap. `Importance` wins over `X-Priority` when both are
/// present and a priority has not already been set.
fn apply_header_block(msg: &mut MailMessage, raw: &str) {
    let mut priority_set = false;
    for line in raw.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            continue;
        }
        msg.headers.insert(name, value);

        match name.to_ascii_lowercase().as_str() {
            "subject" if msg.subject.is_none() => msg.subject = Some(value.to_string()),
            "message-id" if msg.message_id.is_none() => msg.message_id = Some(value.to_string()),
            "in-reply-to" if msg.in_reply_to.is_none() => {
                msg.in_reply_to = Some(value.to_string())
            }
            "references" if msg.references.is_empty() => {
                msg.references = value.split_whitespace().map(String::from).collect();
            }
            "importance" => priority_set = true,
            "x-priority" if !priority_set => priority_set = true,
            _ => {}
        }
    }
}

/// Best-effort content-type + attachment inference from a raw BODY blob,
/// used only when BODYSTRUCTURE was not requested but BODY was.
fn infer_structure(bytes: &[u8]) -> Option<(ContentType, HasAttachment)> {
    let message = mail_parser::Message::parse(bytes)?;
    use mail_parser::MimeHeaders;
    let has_attachment = if message.attachment_count() > 0 {
        HasAttachment::Yes
    } else {
        HasAttachment::No
    };
    let content_type = message
        .parts
        .first()
        .and_then(|p| p.content_type())
        .map(|ct| ContentType {
            main_type: ct.c_type.to_string(),
            sub_type: ct
                .c_subtype
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "octet-stream".to_string()),
            parameters: HashMap::new(),
        });
    Some((
        content_type.unwrap_or(ContentType {
            main_type: "text".to_string(),
            sub_type: "plain".to_string(),
            parameters: HashMap::new(),
        }),
        has_attachment,
    ))
}

/// Parses one untagged FETCH response into a `MailMessage`. A malformed
/// item aborts only this message (returns `Err`); the caller is expected to
/// log and skip rather than fail the whole batch (see `SPEC_FULL.md` §4.2
/// failure model).
pub fn parse_fetch_response(
    fetch: &Fetch,
    folder: &str,
    account_id: u64,
) -> Result<MailMessage, ImapError> {
    let mut msg = MailMessage::new(folder, account_id);
    msg.sequence_number = Some(fetch.message);

    if let Some(uid) = fetch.uid {
        apply_fetch_item(&mut msg, FetchItem::Uid(uid));
    }
    if let Some(date) = fetch.internal_date() {
        apply_fetch_item(&mut msg, FetchItem::InternalDate(date.with_timezone(&Utc)));
    }
    if let Some(size) = fetch.size {
        apply_fetch_item(&mut msg, FetchItem::Size(size));
    }
    let flags: Vec<String> = fetch.flags().map(|f| flag_wire_string(&f)).collect();
    if !flags.is_empty() {
        apply_fetch_item(&mut msg, FetchItem::Flags(flags));
    }
    if let Some(env) = fetch.envelope() {
        let item = EnvelopeItem {
            subject: env.subject.as_ref().map(|s| decode_text(s)),
            sent_date: env
                .date
                .as_ref()
                .and_then(|d| DateTime::parse_from_rfc2822(&decode_text(d)).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            from: env
                .from
                .as_ref()
                .unwrap_or(&vec![])
                .iter()
                .map(convert_address)
                .collect(),
            to: env
                .to
                .as_ref()
                .unwrap_or(&vec![])
                .iter()
                .map(convert_address)
                .collect(),
            cc: env
                .cc
                .as_ref()
                .unwrap_or(&vec![])
                .iter()
                .map(convert_address)
                .collect(),
            bcc: env
                .bcc
                .as_ref()
                .unwrap_or(&vec![])
                .iter()
                .map(convert_address)
                .collect(),
            reply_to: env
                .reply_to
                .as_ref()
                .unwrap_or(&vec![])
                .iter()
                .map(convert_address)
                .collect(),
            in_reply_to: env.in_reply_to.as_ref().map(|s| decode_text(s)),
            message_id: env.message_id.as_ref().map(|s| decode_text(s)),
        };
        apply_fetch_item(&mut msg, FetchItem::Envelope(item));
    }
    // BODYSTRUCTURE is intentionally not inspected from `Fetch` directly:
    // async-imap exposes it only via the raw body; the fuller treatment
    // lives in the mime_parts extraction path used by `imap::types::Email`.
    if let Some(body) = fetch.body() {
        apply_fetch_item(&mut msg, FetchItem::Body(body.to_vec()));
    }

    Ok(msg)
}

fn decode_text(bytes: &[u8]) -> String {
    let raw = String::from_utf8_lossy(bytes);
    if raw.contains("=?") && raw.contains("?=") {
        if let Some(message) =
            mail_parser::Message::parse(format!("Subject: {}\r\n\r\n", raw).as_bytes())
        {
            if let Some(subject) = message.subject() {
                return subject.to_string();
            }
        }
    }
    raw.to_string()
}

fn convert_address(addr: &async_imap::imap_proto::Address) -> Address {
    Address {
        name: addr.name.as_ref().map(|s| decode_text(s)),
        mailbox: addr.mailbox.as_ref().map(|s| decode_text(s)),
        host: addr.host.as_ref().map(|s| decode_text(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_translates_to_item_list_in_fixed_order() {
        let profile = FetchProfile {
            uid: true,
            internal_date: true,
            flags: true,
            size: true,
            ..Default::default()
        };
        assert_eq!(
            profile.to_item_list(),
            vec!["UID", "INTERNALDATE", "RFC822.SIZE", "FLAGS"]
        );
    }

    #[test]
    fn command_uses_uid_prefix_when_requested() {
        let profile = FetchProfile {
            uid: true,
            flags: true,
            ..Default::default()
        };
        let cmd = build_fetch_command("1:5", true, &profile);
        assert_eq!(cmd, "UID FETCH 1:5 (UID FLAGS)");
    }

    #[test]
    fn color_label_flag_parses_into_color_label_field() {
        let mut msg = MailMessage::new("INBOX", 1);
        apply_fetch_item(
            &mut msg,
            FetchItem::Flags(vec!["\\Seen".to_string(), "$cl_2".to_string()]),
        );
        assert_eq!(msg.color_label, Some(2));
        assert_eq!(msg.flags, vec!["\\Seen".to_string()]);
    }

    #[test]
    fn attachment_flag_wins_over_later_bodystructure_inference() {
        let mut msg = MailMessage::new("INBOX", 1);
        apply_fetch_item(
            &mut msg,
            FetchItem::Flags(vec![ATTACHMENT_FLAG_YES.to_string()]),
        );
        assert_eq!(msg.has_attachment, HasAttachment::Yes);
        apply_fetch_item(
            &mut msg,
            FetchItem::BodyStructure(
                ContentType {
                    main_type: "text".to_string(),
                    sub_type: "plain".to_string(),
                    parameters: HashMap::new(),
                },
                HasAttachment::No,
            ),
        );
        assert_eq!(msg.has_attachment, HasAttachment::Yes);
    }

    #[test]
    fn header_block_populates_multimap_and_typed_fields() {
        let mut msg = MailMessage::new("INBOX", 1);
        apply_fetch_item(
            &mut msg,
            FetchItem::HeaderBlock(
                "Subject: Hello\r\nMessage-ID: <a@example.com>\r\nX-Custom: 1\r\nX-Custom: 2"
                    .to_string(),
            ),
        );
        assert_eq!(msg.subject.as_deref(), Some("Hello"));
        assert_eq!(msg.message_id.as_deref(), Some("<a@example.com>"));
        assert_eq!(msg.headers.all("x-custom"), vec!["1", "2"]);
    }

    #[test]
    fn references_header_splits_into_id_list() {
        let mut msg = MailMessage::new("INBOX", 1);
        apply_fetch_item(
            &mut msg,
            FetchItem::HeaderBlock(
                "References: <a@example.com> <b@example.com>".to_string(),
            ),
        );
        assert_eq!(
            msg.references,
            vec!["<a@example.com>".to_string(), "<b@example.com>".to_string()]
        );
    }
}
