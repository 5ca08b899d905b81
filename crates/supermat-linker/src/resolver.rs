//! Relationship resolvers
//!
//! Three strategies, tried in order by the linker until one returns pairs:
//! - Exact: one source and one destination
//! - Proximity: nearest neighbours by centroid distance, with in-order
//!   pairing around ordinal cues, bracket scopes and a separator penalty
//! - Syntactic: dependency heads shared by a subject and a complement
//!
//! Resolvers are pure: they return `(source, destination)` pairs and leave
//! the spans untouched.

use serde::{Deserialize, Serialize};
use supermat_core::Lexicon;

use crate::document::{DepRole, Document};

// ============================================================================
// Resolver Types
// ============================================================================

/// Which strategy produced a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    Exact,
    Proximity,
    Syntactic,
}

impl ResolverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Proximity => "proximity",
            Self::Syntactic => "syntactic",
        }
    }
}

impl std::fmt::Display for ResolverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entity unit taking part in resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mention {
    /// Span key carried by the unit (arena index)
    pub key: usize,
    /// Unit index in the document
    pub unit: usize,
    /// Character offsets in the sentence
    pub start: usize,
    pub end: usize,
}

impl Mention {
    /// Mention for an entity unit of the document
    pub fn from_unit(document: &Document, unit: usize) -> Option<Self> {
        let found = document.unit(unit)?;
        Some(Self {
            key: found.entity()?,
            unit,
            start: found.start,
            end: found.end,
        })
    }

    pub fn centroid(&self) -> f64 {
        self.start as f64 + (self.end - self.start) as f64 / 2.0
    }
}

/// Sentence-level data shared by the resolvers
#[derive(Debug, Clone, Copy)]
pub struct ResolutionContext<'a> {
    pub document: &'a Document,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }
}

/// Trait for resolution strategies
pub trait Resolver: Send + Sync {
    fn kind(&self) -> ResolverKind;

    /// Pair sources with destinations; an empty result defers to the next strategy
    fn resolve(
        &self,
        ctx: &ResolutionContext<'_>,
        sources: &[Mention],
        destinations: &[Mention],
    ) -> Vec<(Mention, Mention)>;
}

// ============================================================================
// Exact Resolver
// ============================================================================

/// Links the only source to the only destination
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactResolver;

impl Resolver for ExactResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Exact
    }

    fn resolve(
        &self,
        _ctx: &ResolutionContext<'_>,
        sources: &[Mention],
        destinations: &[Mention],
    ) -> Vec<(Mention, Mention)> {
        match (sources, destinations) {
            ([source], [destination]) => vec![(*source, *destination)],
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Proximity Resolver
// ============================================================================

/// Distance-based nearest-neighbour assignment
#[derive(Debug, Clone, Default)]
pub struct ProximityResolver {
    lexicon: Lexicon,
}

impl ProximityResolver {
    pub fn new(lexicon: Lexicon) -> Self {
        Self { lexicon }
    }

    /// Closest item to the pivot by centroid; the first one wins ties
    fn nearest(pivot: &Mention, items: &[Mention]) -> Option<Mention> {
        let mut best: Option<(f64, Mention)> = None;
        for item in items {
            let distance = (item.centroid() - pivot.centroid()).abs();
            match best {
                Some((closest, _)) if distance >= closest => {}
                _ => best = Some((distance, *item)),
            }
        }
        best.map(|(_, item)| item)
    }

    /// Positional pairing for "respectively" sentences
    ///
    /// The longer list is cut to the length of the shorter one, dropping its
    /// head when it starts first and its tail otherwise.
    fn assign_in_order(sources: &[Mention], destinations: &[Mention]) -> Vec<(Mention, Mention)> {
        fn cut<'a>(longer: &'a [Mention], shorter: &[Mention]) -> &'a [Mention] {
            match (longer.first(), shorter.first()) {
                (Some(l), Some(s)) if l.unit < s.unit => &longer[longer.len() - shorter.len()..],
                _ => &longer[..shorter.len()],
            }
        }

        let (sources, destinations) = if sources.len() > destinations.len() {
            (cut(sources, destinations), destinations)
        } else {
            (sources, cut(destinations, sources))
        };

        sources
            .iter()
            .copied()
            .zip(destinations.iter().copied())
            .collect()
    }

    /// Positional pairing within each stretch that ends at a cue
    ///
    /// Mentions after the last cue are left out.
    fn assign_by_segment(
        cues: &[usize],
        sources: &[Mention],
        destinations: &[Mention],
    ) -> Vec<(Mention, Mention)> {
        fn within(items: &[Mention], lower: Option<usize>, upper: usize) -> Vec<Mention> {
            items
                .iter()
                .filter(|m| lower.map_or(true, |l| m.unit > l) && m.unit < upper)
                .copied()
                .collect()
        }

        let mut pairs = Vec::new();
        let mut lower = None;
        for &cue in cues {
            pairs.extend(Self::assign_in_order(
                &within(sources, lower, cue),
                &within(destinations, lower, cue),
            ));
            lower = Some(cue);
        }
        pairs
    }

    /// Greedy assignment over the source x destination distance matrix
    ///
    /// The smaller side iterates (sources when equal) and takes the closest
    /// unassigned element of the other side; ties go to the earlier element.
    fn assign_by_distance(
        &self,
        document: &Document,
        sources: &[Mention],
        destinations: &[Mention],
    ) -> Vec<(Mention, Mention)> {
        let distances: Vec<Vec<f64>> = sources
            .iter()
            .map(|source| {
                destinations
                    .iter()
                    .map(|destination| self.distance(document, source, destination, sources))
                    .collect()
            })
            .collect();

        fn closest(candidates: impl Iterator<Item = (usize, f64)>, taken: &[bool]) -> Option<usize> {
            let mut best: Option<(usize, f64)> = None;
            for (idx, distance) in candidates.filter(|(idx, _)| !taken[*idx]) {
                match best {
                    Some((_, closest)) if distance >= closest => {}
                    _ => best = Some((idx, distance)),
                }
            }
            best.map(|(idx, _)| idx)
        }

        let mut pairs = Vec::new();
        if sources.len() <= destinations.len() {
            let mut taken = vec![false; destinations.len()];
            for (i, source) in sources.iter().enumerate() {
                let row = distances[i].iter().copied().enumerate();
                if let Some(j) = closest(row, &taken) {
                    taken[j] = true;
                    pairs.push((*source, destinations[j]));
                }
            }
        } else {
            let mut taken = vec![false; sources.len()];
            for (j, destination) in destinations.iter().enumerate() {
                let column = distances.iter().map(|row| row[j]).enumerate();
                if let Some(i) = closest(column, &taken) {
                    taken[i] = true;
                    pairs.push((sources[i], *destination));
                }
            }
        }
        pairs
    }

    /// Centroid distance, from the bracket scope when the destination has
    /// one, doubled when a separator stands between the two
    fn distance(
        &self,
        document: &Document,
        source: &Mention,
        destination: &Mention,
        sources: &[Mention],
    ) -> f64 {
        let scope = self.bracket_scope(document, destination, sources);
        let (centroid, left, right) = match scope.and_then(|(open, close)| {
            Some((document.unit(open)?.start, document.unit(close)?.end, open, close))
        }) {
            Some((start, end, open, close)) => {
                (start as f64 + (end - start) as f64 / 2.0, open, close)
            }
            None => (destination.centroid(), destination.unit, destination.unit),
        };

        let mut distance = (source.centroid() - centroid).abs();
        let between = if source.unit < left {
            (source.unit + 1)..left
        } else {
            (right + 1)..source.unit
        };
        if self.has_separator(document, between) {
            distance *= 2.0;
        }
        distance
    }

    /// Balanced brackets around the destination, inside its neighbouring sources
    ///
    /// The opener is the nearest unmatched one on the left (after the
    /// previous source), the closer its match on the right (before the next
    /// source).
    fn bracket_scope(
        &self,
        document: &Document,
        destination: &Mention,
        sources: &[Mention],
    ) -> Option<(usize, usize)> {
        let lower = sources
            .iter()
            .filter(|s| s.unit < destination.unit)
            .map(|s| s.unit + 1)
            .max()
            .unwrap_or(0);
        let upper = sources
            .iter()
            .filter(|s| s.unit > destination.unit)
            .map(|s| s.unit)
            .min()
            .unwrap_or(document.len());

        let mut depth = 0usize;
        let mut opener = None;
        for k in (lower..destination.unit).rev() {
            let Some(unit) = document.unit(k).filter(|u| u.is_word()) else {
                continue;
            };
            if self.lexicon.closing_bracket(&unit.text).is_some() {
                depth += 1;
            } else if let Some(pair) = self.lexicon.opening_bracket(&unit.text) {
                if depth == 0 {
                    opener = Some((k, pair));
                    break;
                }
                depth -= 1;
            }
        }
        let (open, pair) = opener?;

        let mut depth = 0usize;
        for k in (destination.unit + 1)..upper {
            let Some(unit) = document.unit(k).filter(|u| u.is_word()) else {
                continue;
            };
            if self.lexicon.opening_bracket(&unit.text).is_some() {
                depth += 1;
            } else if let Some(closing) = self.lexicon.closing_bracket(&unit.text) {
                if depth == 0 {
                    return (closing == pair).then_some((open, k));
                }
                depth -= 1;
            }
        }
        None
    }

    fn has_separator(&self, document: &Document, between: std::ops::Range<usize>) -> bool {
        between
            .filter_map(|k| document.unit(k))
            .filter(|unit| !unit.is_entity())
            .any(|unit| {
                unit.text
                    .split_whitespace()
                    .any(|piece| self.lexicon.is_separator(piece))
            })
    }
}

impl Resolver for ProximityResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Proximity
    }

    fn resolve(
        &self,
        ctx: &ResolutionContext<'_>,
        sources: &[Mention],
        destinations: &[Mention],
    ) -> Vec<(Mention, Mention)> {
        if sources.is_empty() || destinations.is_empty() {
            return Vec::new();
        }

        if let [destination] = destinations {
            return Self::nearest(destination, sources)
                .map(|source| vec![(source, *destination)])
                .unwrap_or_default();
        }
        if let [source] = sources {
            return Self::nearest(source, destinations)
                .map(|destination| vec![(*source, destination)])
                .unwrap_or_default();
        }

        let cues: Vec<usize> = ctx
            .document
            .word_positions(|word| self.lexicon.is_ordinal_cue(word))
            .collect();
        match cues.as_slice() {
            [] => self.assign_by_distance(ctx.document, sources, destinations),
            [_] => Self::assign_in_order(sources, destinations),
            _ => Self::assign_by_segment(&cues, sources, destinations),
        }
    }
}

// ============================================================================
// Syntactic Resolver
// ============================================================================

/// Pairs a subject-like source with a complement sharing its governing head
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntacticResolver;

impl Resolver for SyntacticResolver {
    fn kind(&self) -> ResolverKind {
        ResolverKind::Syntactic
    }

    fn resolve(
        &self,
        ctx: &ResolutionContext<'_>,
        sources: &[Mention],
        destinations: &[Mention],
    ) -> Vec<(Mention, Mention)> {
        let document = ctx.document;

        let mut governed: Vec<(Mention, usize)> = Vec::new();
        for source in sources {
            let head = document.head(source.unit);
            if document.role(source.unit) == DepRole::NsubjPass {
                governed.push((*source, head));
                continue;
            }
            match document.role(head) {
                DepRole::Verb | DepRole::Ccomp => governed.push((*source, head)),
                DepRole::NsubjPass => governed.push((*source, document.head(head))),
                _ => {}
            }
        }

        let mut pairs = Vec::new();
        for destination in destinations {
            let parent = document.head(destination.unit);
            let grandparent = document.head(parent);
            let complement = matches!(
                document.role(parent),
                DepRole::Prep | DepRole::Pcomp | DepRole::Pobj | DepRole::Dobj
            );
            let governor = matches!(
                document.role(grandparent),
                DepRole::Verb | DepRole::Ccomp | DepRole::Prep | DepRole::Root
            );
            if !(complement && governor) {
                continue;
            }

            for (source, head) in &governed {
                let pair = (*source, *destination);
                if *head == grandparent && !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
        pairs
    }
}

// ============================================================================
// Tests
// ============================================================================
