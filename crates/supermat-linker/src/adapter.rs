//! Tokenization/segmentation adapter
//!
//! Converts the upstream token stream into the compacted representation the
//! rest of the pipeline works on:
//! - `words` + `spaces`: single-space pseudo-tokens become the space flag of
//!   the preceding word, so `reconstruct` gives back the original text
//! - `aligned`: every span re-indexed onto the compacted word stream
//!
//! Sentence boundaries are token ranges over the same word stream.

use std::sync::LazyLock;

use regex::Regex;
use supermat_core::{EntitySpan, Lexicon, Token};
use tracing::{debug, warn};

use crate::{SentenceRange, SentenceSegmenter};

// ============================================================================
// Internal Tokens
// ============================================================================

/// A paragraph span re-indexed onto the compacted word stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlignedSpan {
    /// Position of the span in the paragraph (or arena)
    pub span: usize,
    /// Word range `[start, end)`
    pub start: usize,
    pub end: usize,
}

impl AlignedSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Whether the two word ranges share at least one word
    pub fn overlaps(&self, other: &AlignedSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether the span lies entirely inside `range`
    pub fn within(&self, range: &SentenceRange) -> bool {
        range.start <= self.start && self.end <= range.end
    }
}

/// Compacted token stream with re-indexed spans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalTokens {
    pub words: Vec<String>,
    pub spaces: Vec<bool>,
    pub aligned: Vec<AlignedSpan>,
}

impl InternalTokens {
    pub fn text(&self) -> String {
        reconstruct(&self.words, &self.spaces)
    }
}

fn is_alphabetic(text: &str) -> bool {
    !text.is_empty() && text.chars().all(char::is_alphabetic)
}

/// Convert upstream tokens and spans into the internal representation
///
/// Spans whose boundaries fall inside a fused word are dropped with a
/// warning; the input spans are never modified.
pub fn to_internal(tokens: &[Token], spans: &[EntitySpan]) -> InternalTokens {
    let mut words: Vec<String> = Vec::with_capacity(tokens.len());
    let mut spaces: Vec<bool> = Vec::with_capacity(tokens.len());
    // word holding each upstream token, and whether the token opens that word
    let mut word_of: Vec<Option<usize>> = Vec::with_capacity(tokens.len());
    let mut opens_word: Vec<bool> = Vec::with_capacity(tokens.len());

    for (i, token) in tokens.iter().enumerate() {
        if token.text.is_empty() {
            word_of.push(None);
            opens_word.push(false);
            continue;
        }

        if let Some(last) = words.len().checked_sub(1) {
            if token.is_space() && !spaces[last] {
                spaces[last] = true;
                word_of.push(None);
                opens_word.push(false);
                continue;
            }

            let glued = i > 0
                && word_of[i - 1] == Some(last)
                && !spaces[last]
                && tokens[i - 1].offset_end == token.offset_start
                && is_alphabetic(&tokens[i - 1].text)
                && is_alphabetic(&token.text);
            if glued {
                words[last].push_str(&token.text);
                word_of.push(Some(last));
                opens_word.push(false);
                continue;
            }
        }

        words.push(token.text.clone());
        spaces.push(false);
        word_of.push(Some(words.len() - 1));
        opens_word.push(true);
    }

    let mut aligned = Vec::with_capacity(spans.len());
    for (idx, span) in spans.iter().enumerate() {
        match align_span(span, &word_of, &opens_word) {
            Some((start, end)) => aligned.push(AlignedSpan {
                span: idx,
                start,
                end,
            }),
            None => warn!(
                span = %span.id,
                text = %span.text,
                token_start = span.token_start,
                token_end = span.token_end,
                "span does not fall on word boundaries, dropped"
            ),
        }
    }

    InternalTokens {
        words,
        spaces,
        aligned,
    }
}

fn align_span(
    span: &EntitySpan,
    word_of: &[Option<usize>],
    opens_word: &[bool],
) -> Option<(usize, usize)> {
    if span.token_start >= span.token_end || span.token_end > word_of.len() {
        return None;
    }

    let range = span.token_start..span.token_end;
    let first = range.clone().find(|&i| word_of[i].is_some())?;
    let last = range.rev().find(|&i| word_of[i].is_some())?;
    if !opens_word[first] {
        return None;
    }

    let start = word_of[first]?;
    let end = word_of[last]?;
    // the last word must not continue past the span
    if let Some(Some(next)) = word_of.get(last + 1) {
        if *next == end {
            return None;
        }
    }

    Some((start, end + 1))
}

/// Rebuild the text from words and space flags
pub fn reconstruct(words: &[String], spaces: &[bool]) -> String {
    let mut text = String::with_capacity(words.iter().map(|w| w.len() + 1).sum());
    for (i, word) in words.iter().enumerate() {
        text.push_str(word);
        if spaces.get(i).copied().unwrap_or(false) {
            text.push(' ');
        }
    }
    text
}

/// Drop spans partially overlapping a longer (or earlier) one
///
/// Identical ranges count as overlapping, so only the first survives.
pub fn filter_overlapping(aligned: Vec<AlignedSpan>) -> Vec<AlignedSpan> {
    let mut ordered = aligned;
    ordered.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then(a.start.cmp(&b.start))
            .then(a.span.cmp(&b.span))
    });

    let mut kept: Vec<AlignedSpan> = Vec::with_capacity(ordered.len());
    for candidate in ordered {
        match kept.iter().find(|k| k.overlaps(&candidate)) {
            Some(winner) => warn!(
                dropped = candidate.span,
                kept = winner.span,
                "overlapping span dropped"
            ),
            None => kept.push(candidate),
        }
    }

    kept.sort_by_key(|a| (a.start, a.end));
    kept
}

// ============================================================================
// Sentence Boundaries
// ============================================================================

/// Map the segmenter's sentences back to word ranges
///
/// Reconstructed text is accumulated word by word until its trimmed length
/// matches the sentence. When it overshoots, the boundary is forced at the
/// nearest word (a tie keeps the word in the current sentence). Words left
/// over at the end belong to the last sentence.
pub fn sentence_boundaries(
    words: &[String],
    spaces: &[bool],
    segmenter: &dyn SentenceSegmenter,
) -> Vec<SentenceRange> {
    if words.is_empty() {
        return Vec::new();
    }

    let text = reconstruct(words, spaces);
    let mut ranges = Vec::new();
    let mut start = 0;

    for sentence in segmenter.segment(&text) {
        if start >= words.len() {
            break;
        }
        let target = sentence.trim().chars().count();
        if target == 0 {
            continue;
        }

        let end = match_sentence(words, spaces, start, target, &sentence);
        if end > start {
            ranges.push(start..end);
            start = end;
        }
    }

    if start < words.len() {
        match ranges.last_mut() {
            Some(last) => last.end = words.len(),
            None => ranges.push(start..words.len()),
        }
    }

    debug!(sentences = ranges.len(), words = words.len(), "sentence boundaries");
    ranges
}

fn match_sentence(
    words: &[String],
    spaces: &[bool],
    start: usize,
    target: usize,
    sentence: &str,
) -> usize {
    let mut accumulated = String::new();
    let mut previous = 0;

    for j in start..words.len() {
        accumulated.push_str(&words[j]);
        let length = accumulated.trim().chars().count();

        if length == target {
            return j + 1;
        }
        if length > target {
            let overshoot = length - target;
            let undershoot = target - previous;
            let end = if undershoot < overshoot && j > start {
                j
            } else {
                j + 1
            };
            warn!(
                sentence = %sentence,
                expected = target,
                reconstructed = length,
                forced_end = end,
                "sentence boundary mismatch, forcing nearest word"
            );
            return end;
        }

        if spaces.get(j).copied().unwrap_or(false) {
            accumulated.push(' ');
        }
        previous = length;
    }

    words.len()
}

/// Move boundaries cutting through a span back to the span's start
///
/// The span then lands whole in the later sentence. Sentences emptied by
/// the move disappear.
pub fn repair_straddling(ranges: Vec<SentenceRange>, aligned: &[AlignedSpan]) -> Vec<SentenceRange> {
    let (first, total) = match (ranges.first(), ranges.last()) {
        (Some(first), Some(last)) => (first.start, last.end),
        _ => return ranges,
    };

    let mut cuts: Vec<usize> = ranges.iter().skip(1).map(|r| r.start).collect();
    for cut in cuts.iter_mut() {
        while let Some(span) = aligned.iter().find(|s| s.start < *cut && *cut < s.end) {
            warn!(
                span = span.span,
                boundary = *cut,
                moved_to = span.start,
                "span straddles a sentence boundary"
            );
            *cut = span.start;
        }
    }

    cuts.retain(|&cut| cut > first && cut < total);
    cuts.sort_unstable();
    cuts.dedup();

    let mut repaired = Vec::with_capacity(cuts.len() + 1);
    let mut start = first;
    for cut in cuts {
        repaired.push(start..cut);
        start = cut;
    }
    repaired.push(start..total);
    repaired
}

// ============================================================================
// Rule-based Segmenter
// ============================================================================

/// Terminal punctuation, optional closing quotes/brackets, then whitespace
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?]["'”’)\]]*\s+"#).unwrap());

/// Punctuation-driven segmenter with an abbreviation list
#[derive(Debug, Clone)]
pub struct RuleBasedSegmenter {
    abbreviations: Vec<String>,
}

impl RuleBasedSegmenter {
    pub fn new(abbreviations: Vec<String>) -> Self {
        Self { abbreviations }
    }

    pub fn from_lexicon(lexicon: &Lexicon) -> Self {
        Self::new(lexicon.abbreviations.clone())
    }

    /// Whether the period at `terminator` closes a known abbreviation
    fn is_abbreviation(&self, text: &str, terminator: usize) -> bool {
        if !text[terminator..].starts_with('.') {
            return false;
        }

        let word_start = text[..terminator]
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        let word = text[word_start..=terminator].trim_start_matches(['(', '[', '"']);

        self.abbreviations
            .iter()
            .any(|abbreviation| abbreviation.eq_ignore_ascii_case(word))
    }
}

impl Default for RuleBasedSegmenter {
    fn default() -> Self {
        Self::from_lexicon(&Lexicon::default())
    }
}

impl SentenceSegmenter for RuleBasedSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for found in SENTENCE_END.find_iter(text) {
            let opens_sentence = matches!(
                text[found.end()..].chars().next(),
                Some(c) if c.is_uppercase() || c.is_ascii_digit() || c == '(' || c == '['
            );
            if !opens_sentence || self.is_abbreviation(text, found.start()) {
                continue;
            }

            let end = found.start() + found.as_str().trim_end().len();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = end;
        }

        let rest = text[start..].trim();
        if !rest.is_empty() {
            sentences.push(rest.to_string());
        }
        sentences
    }
}

// ============================================================================
// Tests
// ============================================================================
