//! Sentence document
//!
//! A sentence is rebuilt as a sequence of atomic units: each entity span is
//! fused into a single unit, then noun-phrase chunks that do not touch an
//! entity are fused as well. Distances and context windows downstream are
//! all computed over these units.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapter::AlignedSpan;
use crate::SyntacticParser;

// ============================================================================
// Parse Tree
// ============================================================================

/// Dependency roles the syntactic resolver looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepRole {
    Root,
    Nsubj,
    NsubjPass,
    Verb,
    Ccomp,
    Prep,
    Pcomp,
    Pobj,
    Dobj,
    Attr,
    #[default]
    Other,
}

impl DepRole {
    /// Parse a spaCy-style dependency label
    pub fn from_label(label: &str) -> Self {
        match label.to_lowercase().as_str() {
            "root" => Self::Root,
            "nsubj" => Self::Nsubj,
            "nsubjpass" => Self::NsubjPass,
            "verb" => Self::Verb,
            "ccomp" => Self::Ccomp,
            "prep" => Self::Prep,
            "pcomp" => Self::Pcomp,
            "pobj" => Self::Pobj,
            "dobj" => Self::Dobj,
            "attr" => Self::Attr,
            _ => Self::Other,
        }
    }
}

/// Role and head of one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dependency {
    pub role: DepRole,
    pub head: usize,
}

impl Dependency {
    pub fn new(role: DepRole, head: usize) -> Self {
        Self { role, head }
    }
}

/// Parser output over the units it was given
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseTree {
    pub dependencies: Vec<Dependency>,
    pub noun_chunks: Vec<Range<usize>>,
}

impl ParseTree {
    /// Every unit is its own head with no particular role
    pub fn flat(len: usize) -> Self {
        Self {
            dependencies: (0..len).map(|i| Dependency::new(DepRole::Other, i)).collect(),
            noun_chunks: Vec::new(),
        }
    }

    fn fits(&self, len: usize) -> bool {
        self.dependencies.len() == len && self.dependencies.iter().all(|d| d.head < len)
    }
}

/// Parser used when no dependency parser is plugged in
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopParser;

impl SyntacticParser for NoopParser {
    fn parse(&self, words: &[String], _spaces: &[bool]) -> ParseTree {
        ParseTree::flat(words.len())
    }
}

// ============================================================================
// Units
// ============================================================================

/// What a unit stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Word,
    /// A fused entity span, carrying the caller's span key
    Entity(usize),
    /// A fused noun-phrase chunk
    Phrase,
}

/// An atomic unit of a sentence
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub text: String,
    /// Character offsets in the sentence
    pub start: usize,
    pub end: usize,
    pub space_after: bool,
    pub kind: UnitKind,
    pub role: DepRole,
    pub head: usize,
}

impl Unit {
    pub fn centroid(&self) -> f64 {
        self.start as f64 + (self.end - self.start) as f64 / 2.0
    }

    /// Span key when the unit is an entity
    pub fn entity(&self) -> Option<usize> {
        match self.kind {
            UnitKind::Entity(key) => Some(key),
            _ => None,
        }
    }

    pub fn is_entity(&self) -> bool {
        self.entity().is_some()
    }

    pub fn is_word(&self) -> bool {
        self.kind == UnitKind::Word
    }
}

/// Join units into one, keeping the inner spacing
fn fuse(pieces: &[Unit], kind: UnitKind) -> Unit {
    let mut text = String::new();
    for (n, piece) in pieces.iter().enumerate() {
        text.push_str(&piece.text);
        if piece.space_after && n + 1 < pieces.len() {
            text.push(' ');
        }
    }

    let (start, end, space_after) = match (pieces.first(), pieces.last()) {
        (Some(first), Some(last)) => (first.start, last.end, last.space_after),
        _ => (0, 0, false),
    };

    Unit {
        text,
        start,
        end,
        space_after,
        kind,
        role: DepRole::Other,
        head: 0,
    }
}

// ============================================================================
// Document
// ============================================================================

/// A sentence as a sequence of fused units
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    units: Vec<Unit>,
}

impl Document {
    /// Build a document from sentence words and the entities inside it
    ///
    /// `entities` use word ranges local to the sentence; their `span` key is
    /// carried in `UnitKind::Entity`.
    pub fn build(
        words: &[String],
        spaces: &[bool],
        entities: &[AlignedSpan],
        parser: &dyn SyntacticParser,
    ) -> Self {
        let word_units = Self::word_units(words, spaces);
        let mut units = Self::fuse_entities(word_units, entities);

        let texts: Vec<String> = units.iter().map(|u| u.text.clone()).collect();
        let flags: Vec<bool> = units.iter().map(|u| u.space_after).collect();
        let mut tree = parser.parse(&texts, &flags);
        if !tree.fits(units.len()) {
            warn!(
                units = units.len(),
                dependencies = tree.dependencies.len(),
                "parse tree does not match the sentence, ignored"
            );
            tree = ParseTree::flat(units.len());
        }
        for (unit, dependency) in units.iter_mut().zip(&tree.dependencies) {
            unit.role = dependency.role;
            unit.head = dependency.head;
        }

        Self {
            units: Self::merge_chunks(units, &tree.noun_chunks),
        }
    }

    fn word_units(words: &[String], spaces: &[bool]) -> Vec<Unit> {
        let mut cursor = 0;
        words
            .iter()
            .enumerate()
            .map(|(i, word)| {
                let space_after = spaces.get(i).copied().unwrap_or(false);
                let start = cursor;
                let end = start + word.chars().count();
                cursor = end + usize::from(space_after);
                Unit {
                    text: word.clone(),
                    start,
                    end,
                    space_after,
                    kind: UnitKind::Word,
                    role: DepRole::Other,
                    head: i,
                }
            })
            .collect()
    }

    fn fuse_entities(words: Vec<Unit>, entities: &[AlignedSpan]) -> Vec<Unit> {
        let mut ordered: Vec<AlignedSpan> = entities
            .iter()
            .copied()
            .filter(|e| !e.is_empty() && e.end <= words.len())
            .collect();
        ordered.sort_by_key(|e| (e.start, e.end));

        let mut units = Vec::with_capacity(words.len());
        let mut pending = ordered.into_iter().peekable();
        let mut i = 0;

        while i < words.len() {
            while let Some(skipped) = pending.next_if(|e| e.start < i) {
                warn!(span = skipped.span, "entity overlaps a fused unit, skipped");
            }

            match pending.next_if(|e| e.start == i) {
                Some(entity) => {
                    units.push(fuse(
                        &words[entity.start..entity.end],
                        UnitKind::Entity(entity.span),
                    ));
                    i = entity.end;
                }
                None => {
                    units.push(words[i].clone());
                    i += 1;
                }
            }
        }

        units
    }

    fn merge_chunks(units: Vec<Unit>, noun_chunks: &[Range<usize>]) -> Vec<Unit> {
        let mut chunks: Vec<Range<usize>> = Vec::new();
        for chunk in noun_chunks {
            if chunk.end > units.len() || chunk.len() < 2 {
                continue;
            }
            // entities always win over phrases
            if units[chunk.clone()].iter().any(Unit::is_entity) {
                debug!(?chunk, "noun chunk overlaps an entity, not merged");
                continue;
            }
            if chunks
                .iter()
                .any(|c| c.start < chunk.end && chunk.start < c.end)
            {
                continue;
            }
            chunks.push(chunk.clone());
        }

        if chunks.is_empty() {
            return units;
        }
        chunks.sort_by_key(|c| c.start);

        let mut remap = vec![0; units.len()];
        let mut merged: Vec<Unit> = Vec::with_capacity(units.len());
        let mut pending = chunks.into_iter().peekable();
        let mut i = 0;

        while i < units.len() {
            match pending.next_if(|c| c.start == i) {
                Some(chunk) => {
                    let root = chunk
                        .clone()
                        .find(|&k| units[k].head == k || !chunk.contains(&units[k].head))
                        .unwrap_or(chunk.end - 1);
                    let mut phrase = fuse(&units[chunk.clone()], UnitKind::Phrase);
                    phrase.role = units[root].role;
                    phrase.head = units[root].head;
                    for k in chunk.clone() {
                        remap[k] = merged.len();
                    }
                    merged.push(phrase);
                    i = chunk.end;
                }
                None => {
                    remap[i] = merged.len();
                    merged.push(units[i].clone());
                    i += 1;
                }
            }
        }

        for unit in merged.iter_mut() {
            unit.head = remap[unit.head];
        }
        merged
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, idx: usize) -> Option<&Unit> {
        self.units.get(idx)
    }

    /// Text of units `[start, end)`, inner spacing kept, trailing space dropped
    pub fn window_text(&self, start: usize, end: usize) -> String {
        let end = end.min(self.units.len());
        if start >= end {
            return String::new();
        }
        fuse(&self.units[start..end], UnitKind::Word).text
    }

    pub fn centroid(&self, idx: usize) -> Option<f64> {
        self.units.get(idx).map(Unit::centroid)
    }

    /// Head of the unit, or the unit itself when out of range
    pub fn head(&self, idx: usize) -> usize {
        self.units.get(idx).map(|u| u.head).unwrap_or(idx)
    }

    pub fn role(&self, idx: usize) -> DepRole {
        self.units.get(idx).map(|u| u.role).unwrap_or_default()
    }

    /// `(unit index, span key)` of every entity, in sentence order
    pub fn entities(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.units
            .iter()
            .enumerate()
            .filter_map(|(idx, unit)| unit.entity().map(|key| (idx, key)))
    }

    /// Unit index of the entity carrying `key`
    pub fn position_of(&self, key: usize) -> Option<usize> {
        self.units.iter().position(|u| u.entity() == Some(key))
    }

    /// Plain-word units matching the predicate
    pub fn word_positions<'a>(
        &'a self,
        predicate: impl Fn(&str) -> bool + 'a,
    ) -> impl Iterator<Item = usize> + 'a {
        self.units
            .iter()
            .enumerate()
            .filter(move |(_, unit)| unit.is_word() && predicate(&unit.text))
            .map(|(idx, _)| idx)
    }

    pub fn text(&self) -> String {
        let mut text = self.window_text(0, self.units.len());
        if self.units.last().map(|u| u.space_after).unwrap_or(false) {
            text.push(' ');
        }
        text
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|w| w.to_string()).collect()
    }

    /// Parser returning a fixed tree
    struct Fixed(ParseTree);

    impl SyntacticParser for Fixed {
        fn parse(&self, _words: &[String], _spaces: &[bool]) -> ParseTree {
            self.0.clone()
        }
    }

    fn sentence() -> (Vec<String>, Vec<bool>) {
        // "The Tc of the BaClE2 is 30 K."
        (
            words(&["The", "Tc", "of", "the", "BaClE2", "is", "30", "K", "."]),
            vec![true, true, true, true, true, true, true, false, false],
        )
    }

    #[test]
    fn test_entities_are_fused() {
        let (w, s) = sentence();
        let entities = vec![
            AlignedSpan {
                span: 7,
                start: 6,
                end: 8,
            },
            AlignedSpan {
                span: 3,
                start: 4,
                end: 5,
            },
        ];
        let doc = Document::build(&w, &s, &entities, &NoopParser);

        assert_eq!(doc.len(), 8);
        let value = doc.unit(6).unwrap();
        assert_eq!(value.text, "30 K");
        assert_eq!(value.kind, UnitKind::Entity(7));
        assert_eq!((value.start, value.end), (24, 28));
        assert_eq!(value.centroid(), 26.0);
        assert_eq!(doc.position_of(3), Some(4));
        assert_eq!(doc.entities().collect::<Vec<_>>(), vec![(4, 3), (6, 7)]);
        assert_eq!(doc.text(), "The Tc of the BaClE2 is 30 K.");
    }

    #[test]
    fn test_window_text_keeps_inner_spaces() {
        let (w, s) = sentence();
        let doc = Document::build(&w, &s, &[], &NoopParser);
        assert_eq!(doc.window_text(0, 2), "The Tc");
        assert_eq!(doc.window_text(6, 9), "30 K.");
        assert_eq!(doc.window_text(5, 5), "");
        assert_eq!(doc.window_text(8, 20), ".");
    }

    #[test]
    fn test_noun_chunks_merged_unless_touching_entity() {
        let (w, s) = sentence();
        let entities = vec![AlignedSpan {
            span: 0,
            start: 4,
            end: 5,
        }];
        // units after entity fusion: The Tc of the BaClE2 is 30 K .
        let mut dependencies: Vec<Dependency> =
            (0..9).map(|i| Dependency::new(DepRole::Other, i)).collect();
        dependencies[0] = Dependency::new(DepRole::Other, 1);
        dependencies[1] = Dependency::new(DepRole::Nsubj, 5);
        dependencies[5] = Dependency::new(DepRole::Root, 5);
        dependencies[6] = Dependency::new(DepRole::Other, 7);
        dependencies[7] = Dependency::new(DepRole::Attr, 5);
        let tree = ParseTree {
            dependencies,
            noun_chunks: vec![0..2, 3..5, 6..8],
        };

        let doc = Document::build(&w, &s, &entities, &Fixed(tree));

        // "The Tc" and "30 K" merged, "the BaClE2" kept apart
        let texts: Vec<_> = doc.units().iter().map(|u| u.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["The Tc", "of", "the", "BaClE2", "is", "30 K", "."]
        );
        let phrase = doc.unit(0).unwrap();
        assert_eq!(phrase.kind, UnitKind::Phrase);
        assert_eq!(phrase.role, DepRole::Nsubj);
        assert_eq!(doc.head(0), 4);
        assert_eq!(doc.role(4), DepRole::Root);
        assert_eq!(doc.head(5), 4);
        assert_eq!(doc.role(5), DepRole::Attr);
    }

    #[test]
    fn test_mismatched_tree_is_ignored() {
        let (w, s) = sentence();
        let tree = ParseTree {
            dependencies: vec![Dependency::new(DepRole::Root, 0)],
            noun_chunks: vec![0..2],
        };
        let doc = Document::build(&w, &s, &[], &Fixed(tree));
        assert_eq!(doc.len(), 9);
        assert!(doc.units().iter().all(|u| u.role == DepRole::Other));
        assert_eq!(doc.head(3), 3);
    }

    #[test]
    fn test_overlapping_entities_skip_the_later_one() {
        let (w, s) = sentence();
        let entities = vec![
            AlignedSpan {
                span: 0,
                start: 3,
                end: 5,
            },
            AlignedSpan {
                span: 1,
                start: 4,
                end: 6,
            },
        ];
        let doc = Document::build(&w, &s, &entities, &NoopParser);
        assert_eq!(doc.position_of(0), Some(3));
        assert_eq!(doc.position_of(1), None);
    }

    #[test]
    fn test_dep_role_labels() {
        assert_eq!(DepRole::from_label("ROOT"), DepRole::Root);
        assert_eq!(DepRole::from_label("nsubjpass"), DepRole::NsubjPass);
        assert_eq!(DepRole::from_label("pobj"), DepRole::Pobj);
        assert_eq!(DepRole::from_label("amod"), DepRole::Other);
    }
}
