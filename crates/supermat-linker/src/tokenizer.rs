//! Tokenizer and paragraph builder
//!
//! The upstream recognizer tokenizes aggressively: every whitespace and
//! punctuation character is a token of its own and only runs of letters and
//! digits are kept together. `SimpleTokenizer` reproduces that behaviour so
//! paragraphs can be built from plain text.

use supermat_core::{EntitySpan, EntityType, LinkError, Paragraph, Result, Token};

use crate::Tokenizer;

// ============================================================================
// Simple Tokenizer
// ============================================================================

/// Splits on every non-alphanumeric character, keeping it as a token
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTokenizer;

impl Tokenizer for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut run_start: Option<usize> = None;

        for (offset, ch) in text.char_indices() {
            if ch.is_alphanumeric() {
                run_start.get_or_insert(offset);
                continue;
            }

            if let Some(start) = run_start.take() {
                tokens.push(Token::new(&text[start..offset], start, tokens.len()));
            }
            let end = offset + ch.len_utf8();
            tokens.push(Token::new(&text[offset..end], offset, tokens.len()));
        }

        if let Some(start) = run_start {
            tokens.push(Token::new(&text[start..], start, tokens.len()));
        }

        tokens
    }
}

// ============================================================================
// Paragraph Builder
// ============================================================================

/// Builds a paragraph from plain text and span surface forms
///
/// Spans are located sequentially: each one is searched after the end of
/// the previous one, so repeated surface forms must be given in order.
#[derive(Debug, Clone)]
pub struct ParagraphBuilder {
    text: String,
    spans: Vec<(String, EntityType)>,
}

impl ParagraphBuilder {
    /// Create a new builder
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            spans: Vec::new(),
        }
    }

    /// Add a span by surface text
    pub fn span(mut self, text: impl Into<String>, entity_type: EntityType) -> Self {
        self.spans.push((text.into(), entity_type));
        self
    }

    /// Tokenize the text and resolve every span to offsets and token indices
    pub fn build(self, tokenizer: &dyn Tokenizer) -> Result<Paragraph> {
        let tokens = tokenizer.tokenize(&self.text);
        let mut spans = Vec::with_capacity(self.spans.len());
        let mut cursor = 0;

        for (surface, entity_type) in self.spans {
            let start = self
                .text
                .get(cursor..)
                .and_then(|rest| rest.find(surface.as_str()))
                .map(|found| found + cursor)
                .ok_or_else(|| {
                    LinkError::SpanNotFound(format!("'{surface}' after offset {cursor}"))
                })?;
            let end = start + surface.len();

            let token_start = tokens.iter().position(|t| t.offset_start == start);
            let token_end = tokens.iter().position(|t| t.offset_end == end);
            let (token_start, token_end) = match (token_start, token_end) {
                (Some(first), Some(last)) if first <= last && start < end => (first, last + 1),
                _ => {
                    return Err(LinkError::SpanNotFound(format!(
                        "'{surface}' at {start}..{end} does not fall on token boundaries"
                    )))
                }
            };

            spans.push(EntitySpan::new(
                surface,
                entity_type,
                (start, end),
                (token_start, token_end),
            ));
            cursor = end;
        }

        Ok(Paragraph::new(self.text, tokens, spans))
    }
}

// ============================================================================
// Tests
// ============================================================================
