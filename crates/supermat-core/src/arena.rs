//! Span arena
//!
//! Owns a set of spans addressed by index and is the only place where links
//! are written. Every link is stored on both endpoints, and adding a link
//! that already exists is a no-op.

use std::collections::HashMap;

use crate::{get_link_type, EntitySpan, Link, LinkError, RelationType, Result};

/// Arena of spans indexed by position, with id lookup
#[derive(Debug, Clone, Default)]
pub struct SpanArena {
    spans: Vec<EntitySpan>,
    index: HashMap<String, usize>,
}

impl SpanArena {
    /// Build an arena; span ids must be unique
    pub fn new(spans: Vec<EntitySpan>) -> Result<Self> {
        let mut index = HashMap::with_capacity(spans.len());
        for (position, span) in spans.iter().enumerate() {
            if index.insert(span.id.clone(), position).is_some() {
                return Err(LinkError::InvalidInput(format!(
                    "duplicate span id {}",
                    span.id
                )));
            }
        }
        Ok(Self { spans, index })
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&EntitySpan> {
        self.spans.get(idx)
    }

    /// Position of the span with the given id
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySpan> {
        self.spans.iter()
    }

    pub fn is_linkable(&self, idx: usize) -> bool {
        self.spans.get(idx).map(|s| s.linkable).unwrap_or(false)
    }

    /// Set the linkable flag, returning whether it changed
    pub fn set_linkable(&mut self, idx: usize, linkable: bool) -> bool {
        match self.spans.get_mut(idx) {
            Some(span) if span.linkable != linkable => {
                span.linkable = linkable;
                true
            }
            _ => false,
        }
    }

    pub fn links_of(&self, idx: usize) -> &[Link] {
        self.spans
            .get(idx)
            .map(|s| s.links.as_slice())
            .unwrap_or(&[])
    }

    /// Link two spans symmetrically with a known relation type
    ///
    /// Returns `true` if either side received a new link.
    pub fn link(&mut self, a: usize, b: usize, relation_type: RelationType) -> bool {
        if a == b || a >= self.spans.len() || b >= self.spans.len() {
            return false;
        }

        let to_b = Link::to(&self.spans[b], relation_type);
        let to_a = Link::to(&self.spans[a], relation_type);

        let added_a = Self::push_link(&mut self.spans[a], to_b);
        let added_b = Self::push_link(&mut self.spans[b], to_a);
        added_a || added_b
    }

    /// Link two spans, deriving the relation type from their entity types
    pub fn link_spans(&mut self, a: usize, b: usize) -> Result<RelationType> {
        let (left, right) = match (self.spans.get(a), self.spans.get(b)) {
            (Some(left), Some(right)) => (left, right),
            _ => {
                return Err(LinkError::SpanNotFound(format!(
                    "arena index {a} or {b} out of range"
                )))
            }
        };

        let relation_type = get_link_type(&left.entity_type, &right.entity_type)?;
        self.link(a, b, relation_type);
        Ok(relation_type)
    }

    /// Replace the span carrying the same id
    pub fn commit(&mut self, span: EntitySpan) -> Result<()> {
        let position = self
            .position(&span.id)
            .ok_or_else(|| LinkError::SpanNotFound(format!("span id {}", span.id)))?;
        self.spans[position] = span;
        Ok(())
    }

    fn push_link(span: &mut EntitySpan, link: Link) -> bool {
        if span.links.contains(&link) {
            tracing::trace!(span = %span.id, target = %link.target_id, "link already present");
            false
        } else {
            span.links.push(link);
            true
        }
    }

    pub fn into_spans(self) -> Vec<EntitySpan> {
        self.spans
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityType;
    use proptest::prelude::*;

    fn sample_arena() -> SpanArena {
        SpanArena::new(vec![
            EntitySpan::new("BaClE2", EntityType::Material, (14, 20), (4, 5)),
            EntitySpan::new("30K", EntityType::TcValue, (24, 27), (6, 7)),
            EntitySpan::new("5 GPa", EntityType::Pressure, (40, 45), (12, 13)),
        ])
        .unwrap()
    }

    #[test]
    fn test_link_is_symmetric() {
        let mut arena = sample_arena();
        assert!(arena.link(0, 1, RelationType::MaterialTc));

        let material = arena.get(0).unwrap();
        let value = arena.get(1).unwrap();
        assert_eq!(material.links.len(), 1);
        assert_eq!(material.links[0].target_id, value.id);
        assert_eq!(value.links.len(), 1);
        assert_eq!(value.links[0].target_id, material.id);
        assert_eq!(value.links[0].relation_type, RelationType::MaterialTc);
    }

    #[test]
    fn test_link_is_idempotent() {
        let mut arena = sample_arena();
        assert!(arena.link(0, 1, RelationType::MaterialTc));
        assert!(!arena.link(0, 1, RelationType::MaterialTc));
        assert!(!arena.link(1, 0, RelationType::MaterialTc));

        assert_eq!(arena.links_of(0).len(), 1);
        assert_eq!(arena.links_of(1).len(), 1);
    }

    #[test]
    fn test_link_spans_derives_type() {
        let mut arena = sample_arena();
        assert_eq!(arena.link_spans(2, 1).unwrap(), RelationType::TcPressure);
        assert!(matches!(
            arena.link_spans(0, 2),
            Err(LinkError::UnsupportedRelation { .. })
        ));
        assert!(arena.links_of(0).is_empty());
    }

    #[test]
    fn test_self_link_ignored() {
        let mut arena = sample_arena();
        assert!(!arena.link(1, 1, RelationType::MaterialTc));
        assert!(arena.links_of(1).is_empty());
    }

    #[test]
    fn test_commit_replaces_by_id() {
        let mut arena = sample_arena();
        let mut value = arena.get(1).unwrap().clone();
        value.linkable = true;
        arena.commit(value).unwrap();
        assert!(arena.is_linkable(1));

        let stranger = EntitySpan::new("NbSe2", EntityType::Material, (0, 5), (0, 1));
        assert!(matches!(
            arena.commit(stranger),
            Err(LinkError::SpanNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let span = EntitySpan::new("MgB2", EntityType::Material, (0, 4), (0, 1));
        assert!(SpanArena::new(vec![span.clone(), span]).is_err());
    }

    proptest! {
        #[test]
        fn prop_links_stay_symmetric(ops in prop::collection::vec((0usize..4, 0usize..4), 0..32)) {
            let mut arena = SpanArena::new(vec![
                EntitySpan::new("A", EntityType::Material, (0, 1), (0, 1)),
                EntitySpan::new("B", EntityType::Material, (2, 3), (2, 3)),
                EntitySpan::new("1 K", EntityType::TcValue, (4, 7), (4, 7)),
                EntitySpan::new("2 K", EntityType::TcValue, (8, 11), (8, 11)),
            ]).unwrap();

            for (a, b) in ops {
                let _ = arena.link_spans(a, b);
            }

            for (idx, span) in arena.iter().enumerate() {
                let mut seen = std::collections::HashSet::new();
                for link in &span.links {
                    prop_assert!(seen.insert((link.target_id.clone(), link.relation_type)));
                    let target = arena.position(&link.target_id).unwrap();
                    let mirrored = arena.links_of(target).iter().any(|back| {
                        back.target_id == span.id && back.relation_type == link.relation_type
                    });
                    prop_assert!(mirrored, "link from {} has no mirror", idx);
                }
            }
        }
    }
}
