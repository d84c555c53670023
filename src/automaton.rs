//! Aho-Corasick signature automaton (Component E).
//!
//! A single multi-pattern matcher over every registered parser's
//! signature literals, built once at registry-construction time and
//! shared read-only across workers. Keyed by the *end* index of each
//! literal (`signature_offset + signature_length - 1`) so the signature
//! stage can recover each match's nominal start offset within the
//! artifact in constant time.

use crate::registry::RegisteredParser;
use aho_corasick::AhoCorasick;
use std::collections::HashMap;

struct Entry {
    end_difference: i64,
    parsers: Vec<RegisteredParser>,
}

pub struct SignatureAutomaton {
    ac: Option<AhoCorasick>,
    entries: Vec<Entry>,
    longest_signature_length: usize,
}

impl SignatureAutomaton {
    /// Builds the automaton from `(offset, literal, parser)` triples, one
    /// per `(signature, parser)` pair across the whole registry. If two
    /// signatures share the same literal bytes, their parsers are merged
    /// under one automaton entry and the later `offset` wins for the
    /// shared `end_difference` — the same last-write-wins behavior the
    /// original implementation has when two parsers declare an identical
    /// signature literal at different offsets.
    pub fn build(signature_entries: Vec<(u64, &'static [u8], RegisteredParser)>) -> Self {
        let mut index_of_literal: HashMap<&'static [u8], usize> = HashMap::new();
        let mut literals: Vec<&'static [u8]> = Vec::new();
        let mut entries: Vec<Entry> = Vec::new();
        let mut longest_signature_length = 0usize;

        for (offset, literal, parser) in signature_entries {
            longest_signature_length = longest_signature_length.max(literal.len());
            let end_difference = offset as i64 + literal.len() as i64 - 1;
            match index_of_literal.get(literal) {
                Some(&idx) => {
                    entries[idx].end_difference = end_difference;
                    entries[idx].parsers.push(parser);
                }
                None => {
                    let idx = entries.len();
                    index_of_literal.insert(literal, idx);
                    literals.push(literal);
                    entries.push(Entry {
                        end_difference,
                        parsers: vec![parser],
                    });
                }
            }
        }

        let ac = if literals.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::new(&literals)
                    .expect("registered signature literals form a valid automaton"),
            )
        };

        SignatureAutomaton {
            ac,
            entries,
            longest_signature_length,
        }
    }

    pub fn longest_signature_length(&self) -> usize {
        self.longest_signature_length
    }

    /// Every signature match in `chunk`, as `(end_index, end_difference,
    /// parsers)` where `end_index` is the 0-based index of the matched
    /// literal's last byte within `chunk` — the same quantity
    /// spec.md §4.4.4 calls `end_offset_in_chunk`.
    pub fn find_candidates<'a>(&'a self, chunk: &[u8]) -> Vec<(usize, i64, &'a [RegisteredParser])> {
        let Some(ac) = self.ac.as_ref() else {
            return Vec::new();
        };
        ac.find_overlapping_iter(chunk)
            .map(|m| {
                let entry = &self.entries[m.pattern().as_usize()];
                (m.end() - 1, entry.end_difference, entry.parsers.as_slice())
            })
            .collect()
    }
}
