// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Splits sequence-number / UID lists into IMAP sequence-set argument
//! strings that respect a server-safe command length budget (RFC 2683
//! §3.2.1.5 recommends clients avoid command lines above ~8000 octets).

use log::warn;

/// Maximum total octets a single IMAP command line should carry.
pub const MAX_CMD: usize = 8000;

/// Default bytes already committed to the command before the sequence-set
/// argument is appended, used when the caller passes `consumed = -1`.
const DEFAULT_CONSUMED: usize = 512;

/// Splits `numbers` into one or more IMAP sequence-set strings, each no
/// longer than `MAX_CMD - consumed` octets.
///
/// `keep_order`, when true, preserves the caller's ordering instead of
/// sorting ascending before coalescing into ranges.
pub fn split_into_sequence_sets(numbers: &[i64], keep_order: bool, consumed: i64) -> Vec<String> {
    let mut filtered: Vec<i64> = numbers.iter().copied().filter(|n| *n > 0).collect();
    if filtered.is_empty() {
        return Vec::new();
    }
    if !keep_order {
        filtered.sort_unstable();
        filtered.dedup();
    }

    let budget = budget_for(consumed);
    let coalesced = coalesce(&filtered);
    chunk_tokens(&coalesced, budget)
}

fn budget_for(consumed: i64) -> usize {
    let consumed = if consumed < 0 {
        DEFAULT_CONSUMED
    } else {
        consumed as usize
    };
    MAX_CMD.saturating_sub(consumed)
}

/// Coalesces a list of integers into sequence-set tokens (`N` or `N:M`),
/// treating adjacent runs in the *given* order as ranges. Runs are only
/// collapsed when consecutive entries are strictly increasing by one,
/// which matches the caller's ordering contract (ascending when
/// `keep_order` is false, as-given otherwise).
fn coalesce(numbers: &[i64]) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut iter = numbers.iter().peekable();
    while let Some(&start) = iter.next() {
        let mut end = start;
        while let Some(&&next) = iter.peek() {
            if next == end + 1 {
                end = next;
                iter.next();
            } else {
                break;
            }
        }
        if end == start {
            tokens.push(start.to_string());
        } else {
            tokens.push(format!("{}:{}", start, end));
        }
    }
    tokens
}

/// Packs coalesced tokens into comma-joined chunks, each within `budget`
/// octets. A single token wider than `budget` is dropped with a warning
/// rather than truncated, since truncating a sequence-set token would
/// silently change which messages are addressed.
fn chunk_tokens(tokens: &[String], budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for token in tokens {
        if token.len() > budget {
            warn!(
                "sequence-set token '{}' exceeds command budget ({} > {}), dropping",
                token,
                token.len(),
                budget
            );
            continue;
        }
        let added_len = if current.is_empty() {
            token.len()
        } else {
            current.len() + 1 + token.len()
        };
        if added_len > budget {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.push_str(token);
        } else {
            if !current.is_empty() {
                current.push(',');
            }
            current.push_str(token);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_contiguous_input_becomes_one_range() {
        let out = split_into_sequence_sets(&[1, 2, 3, 4, 5], false, 100);
        assert_eq!(out, vec!["1:5".to_string()]);
    }

    #[test]
    fn non_contiguous_input_mixes_ranges_and_singletons() {
        let out = split_into_sequence_sets(&[10, 11, 12, 15, 20, 21], false, 100);
        assert_eq!(out, vec!["10:12,15,20:21".to_string()]);
    }

    #[test]
    fn budget_overflow_splits_into_multiple_chunks() {
        let numbers: Vec<i64> = (1..=4000).collect();
        let out = split_into_sequence_sets(&numbers, true, 7990);
        assert!(out.len() >= 2);
        let budget = budget_for(7990);
        for chunk in &out {
            assert!(chunk.len() <= budget);
        }
        // Reassembling by expansion must reproduce the exact input set.
        let mut expanded = Vec::new();
        for chunk in &out {
            for token in chunk.split(',') {
                if let Some((a, b)) = token.split_once(':') {
                    let a: i64 = a.parse().unwrap();
                    let b: i64 = b.parse().unwrap();
                    expanded.extend(a..=b);
                } else {
                    expanded.push(token.parse::<i64>().unwrap());
                }
            }
        }
        assert_eq!(expanded, numbers);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(split_into_sequence_sets(&[], false, -1).is_empty());
    }

    #[test]
    fn negative_consumed_uses_default() {
        let out = split_into_sequence_sets(&[1, 2, 3], false, -1);
        assert_eq!(out, vec!["1:3".to_string()]);
    }

    #[test]
    fn keep_order_preserves_caller_ordering() {
        let out = split_into_sequence_sets(&[5, 4, 3, 1, 2], true, 100);
        // 5,4,3 descend (no coalescing backwards), then 1:2 ascends.
        assert_eq!(out, vec!["5,4,3,1:2".to_string()]);
    }
}
