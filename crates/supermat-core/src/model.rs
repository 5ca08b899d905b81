//! Paragraph, token and span models
//!
//! These mirror the JSON exchanged with the surrounding service. Spans keep
//! any field the linker does not understand (`source`, `attributes`, ...)
//! so a paragraph survives the round trip with only `links` and `linkable`
//! changed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EntityType, Link, LinkError, Result};

/// A token produced by the upstream tokenizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub offset_start: usize,
    pub offset_end: usize,

    /// Position in the paragraph token stream (not part of the wire shape)
    #[serde(skip)]
    pub index: usize,
}

impl Token {
    /// Create a new token
    pub fn new(text: impl Into<String>, offset_start: usize, index: usize) -> Self {
        let text = text.into();
        let offset_end = offset_start + text.len();
        Self {
            text,
            offset_start,
            offset_end,
            index,
        }
    }

    /// Whether this is a pseudo-token holding a single space
    pub fn is_space(&self) -> bool {
        self.text == " "
    }
}

/// An entity span recognized upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SpanRecord", into = "SpanRecord")]
pub struct EntitySpan {
    pub id: String,
    pub text: String,
    pub entity_type: EntityType,

    /// Character offsets in the paragraph text
    pub offset_start: usize,
    pub offset_end: usize,

    /// Token range `[token_start, token_end)` in the paragraph token stream
    pub token_start: usize,
    pub token_end: usize,

    pub linkable: bool,
    pub links: Vec<Link>,

    pub bounding_boxes: Option<Vec<serde_json::Value>>,
    pub formatted_text: Option<String>,

    /// Side-channel fields carried through untouched
    pub extra: serde_json::Map<String, serde_json::Value>,

    /// Type label as received (`<tcValue>`, `tc-value`, ...)
    label: Option<String>,
}

/// Wire shape of [`EntitySpan`]
#[derive(Clone, Serialize, Deserialize)]
struct SpanRecord {
    #[serde(default)]
    id: String,
    text: String,
    #[serde(rename = "type")]
    label: String,
    offset_start: usize,
    offset_end: usize,
    token_start: usize,
    token_end: usize,
    #[serde(default)]
    linkable: bool,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(
        default,
        rename = "boundingBoxes",
        skip_serializing_if = "Option::is_none"
    )]
    bounding_boxes: Option<Vec<serde_json::Value>>,
    #[serde(
        default,
        rename = "formattedText",
        skip_serializing_if = "Option::is_none"
    )]
    formatted_text: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl From<SpanRecord> for EntitySpan {
    fn from(record: SpanRecord) -> Self {
        Self {
            id: record.id,
            text: record.text,
            entity_type: EntityType::from_label(&record.label),
            offset_start: record.offset_start,
            offset_end: record.offset_end,
            token_start: record.token_start,
            token_end: record.token_end,
            linkable: record.linkable,
            links: record.links,
            bounding_boxes: record.bounding_boxes,
            formatted_text: record.formatted_text,
            extra: record.extra,
            label: Some(record.label),
        }
    }
}

impl From<EntitySpan> for SpanRecord {
    fn from(span: EntitySpan) -> Self {
        let label = span.label().to_string();
        Self {
            id: span.id,
            text: span.text,
            label,
            offset_start: span.offset_start,
            offset_end: span.offset_end,
            token_start: span.token_start,
            token_end: span.token_end,
            linkable: span.linkable,
            links: span.links,
            bounding_boxes: span.bounding_boxes,
            formatted_text: span.formatted_text,
            extra: span.extra,
        }
    }
}

impl EntitySpan {
    /// Create a new span with a deterministic id
    pub fn new(
        text: impl Into<String>,
        entity_type: EntityType,
        offsets: (usize, usize),
        tokens: (usize, usize),
    ) -> Self {
        let mut span = Self {
            id: String::new(),
            text: text.into(),
            entity_type,
            offset_start: offsets.0,
            offset_end: offsets.1,
            token_start: tokens.0,
            token_end: tokens.1,
            linkable: false,
            links: Vec::new(),
            bounding_boxes: None,
            formatted_text: None,
            extra: serde_json::Map::new(),
            label: None,
        };
        span.id = compute_span_id(&span);
        span
    }

    /// The type label written back on output
    ///
    /// A received label is kept verbatim as long as it still names the
    /// span's type; otherwise the canonical label is used.
    pub fn label(&self) -> &str {
        match &self.label {
            Some(label) if EntityType::from_label(label) == self.entity_type => label,
            _ => self.entity_type.as_str(),
        }
    }

    /// Check whether a link to `target_id` already exists
    pub fn is_linked_to(&self, target_id: &str) -> bool {
        self.links.iter().any(|l| l.target_id == target_id)
    }
}

/// Deterministic id for a span lacking one (UUID v5 over its identity fields)
pub fn compute_span_id(span: &EntitySpan) -> String {
    let key = format!(
        "{}|{}|{}|{}|{}|{}",
        span.text,
        span.entity_type,
        span.offset_start,
        span.offset_end,
        span.token_start,
        span.token_end
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// A paragraph with its tokens and recognized spans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub text: String,

    #[serde(default)]
    pub spans: Vec<EntitySpan>,

    #[serde(default)]
    pub tokens: Vec<Token>,
}

impl Paragraph {
    /// Create a new paragraph
    pub fn new(text: impl Into<String>, tokens: Vec<Token>, spans: Vec<EntitySpan>) -> Self {
        let mut paragraph = Self {
            text: text.into(),
            spans,
            tokens,
        };
        paragraph.normalize();
        paragraph
    }

    /// Re-index tokens and fill in missing span ids
    pub fn normalize(&mut self) {
        for (index, token) in self.tokens.iter_mut().enumerate() {
            token.index = index;
        }
        for span in self.spans.iter_mut().filter(|s| s.id.is_empty()) {
            span.id = compute_span_id(span);
        }
    }

    /// Check that span ids are unique
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for span in &self.spans {
            if !seen.insert(span.id.as_str()) {
                return Err(LinkError::InvalidInput(format!(
                    "duplicate span id {} ({})",
                    span.id, span.text
                )));
            }
        }
        Ok(())
    }

    /// Drop every link, keeping spans otherwise intact
    pub fn clear_links(&mut self) {
        for span in &mut self.spans {
            span.links.clear();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
