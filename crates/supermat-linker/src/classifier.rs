//! Critical-value classifier
//!
//! Among the temperature values of a sentence, marks as linkable only those
//! asserted as critical values. Rules, in order:
//! - Ordinal cues ("respectively"): bulk-accept the values before the last
//!   cue
//! - Unit check, then trailing comparison words and leading alternate
//!   quantities reject
//! - Leading acceptance phrases or a Tc label between the previous value and
//!   this one accept
//!
//! Values matching no acceptance rule stay non-linkable.

use std::collections::HashSet;

use supermat_core::{EntityType, Lexicon, SpanArena};
use tracing::{debug, trace};

use crate::document::Document;

/// Decides which value spans are critical values
#[derive(Debug, Clone, Default)]
pub struct CriticalValueClassifier {
    lexicon: Lexicon,
}

/// Outcome for a single value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accepted,
    Rejected(&'static str),
    Unmatched,
}

impl CriticalValueClassifier {
    pub fn new(lexicon: Lexicon) -> Self {
        Self { lexicon }
    }

    /// Mark critical values of the sentence as linkable
    ///
    /// Entity units of `document` carry arena indices. Returns the number of
    /// spans newly marked linkable.
    pub fn classify(&self, document: &Document, arena: &mut SpanArena) -> usize {
        // (unit index, arena index) of every value span, in sentence order
        let values: Vec<(usize, usize)> = document
            .entities()
            .filter(|&(_, key)| {
                arena
                    .get(key)
                    .map(|span| span.entity_type.is_value())
                    .unwrap_or(false)
            })
            .collect();
        if values.is_empty() {
            return 0;
        }

        let cues: Vec<usize> = document
            .word_positions(|word| self.lexicon.is_ordinal_cue(word))
            .collect();

        let accepted: Vec<usize> = match cues.last() {
            None => self.classify_each(document, arena, &values),
            Some(last) => values
                .iter()
                .filter(|(unit, _)| unit < last)
                .map(|&(_, key)| key)
                .collect(),
        };

        let marked = accepted
            .into_iter()
            .filter(|&key| arena.set_linkable(key, true))
            .count();
        debug!(
            values = values.len(),
            cues = cues.len(),
            marked,
            "critical values classified"
        );
        marked
    }

    fn classify_each(
        &self,
        document: &Document,
        arena: &SpanArena,
        values: &[(usize, usize)],
    ) -> Vec<usize> {
        let labels: HashSet<&str> = document
            .entities()
            .filter_map(|(_, key)| arena.get(key))
            .filter(|span| span.entity_type == EntityType::TcLabel)
            .map(|span| span.text.as_str())
            .collect();

        let mut accepted = Vec::new();
        for (n, &(unit, key)) in values.iter().enumerate() {
            let previous = n.checked_sub(1).map(|p| values[p].0);
            match self.judge(document, unit, previous, &labels) {
                Verdict::Accepted => accepted.push(key),
                Verdict::Rejected(reason) => trace!(unit, reason, "value rejected"),
                Verdict::Unmatched => trace!(unit, "value matched no acceptance rule"),
            }
        }
        accepted
    }

    fn judge(
        &self,
        document: &Document,
        unit: usize,
        previous: Option<usize>,
        labels: &HashSet<&str>,
    ) -> Verdict {
        let text = match document.unit(unit) {
            Some(value) => value.text.as_str(),
            None => return Verdict::Unmatched,
        };

        if !self.lexicon.has_value_unit(text) {
            return Verdict::Rejected("unit");
        }

        if let Some(next) = document.unit(unit + 1) {
            if self.lexicon.is_comparison(&next.text) {
                return Verdict::Rejected("comparison");
            }
        }

        // case-sensitive
        for phrase in &self.lexicon.rejection_before {
            let n = phrase.split(' ').count();
            if unit >= n && document.window_text(unit - n, unit) == *phrase {
                return Verdict::Rejected("alternate quantity");
            }
        }

        for phrase in &self.lexicon.acceptance_before {
            let n = phrase.split(' ').count();
            let phrase = phrase.to_lowercase();
            if unit >= n && document.window_text(unit - n, unit).to_lowercase() == phrase {
                return Verdict::Accepted;
            }
            // one symbol between the phrase and the value
            if unit > n && document.window_text(unit - n - 1, unit - 1).to_lowercase() == phrase {
                return Verdict::Accepted;
            }
        }

        let lower = previous.map(|p| p + 1).unwrap_or(0);
        let labelled = (lower..unit)
            .rev()
            .filter_map(|k| document.unit(k))
            .any(|candidate| labels.contains(candidate.text.as_str()));
        if labelled {
            return Verdict::Accepted;
        }

        Verdict::Unmatched
    }
}

// ============================================================================
// Tests
// ============================================================================
