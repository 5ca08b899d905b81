//! Linking orchestrator
//!
//! Runs every sentence of a paragraph through a small state machine:
//!
//! `NotProcessed -> ClassifyValues -> TryExact -> TryProximity -> TrySyntactic -> Done`
//!
//! Each sentence works on its own copy of its spans. Links and linkable flags
//! are written back to the paragraph only when the sentence succeeds, so an
//! unsupported relation in one sentence leaves it untouched and the rest of
//! the paragraph is still processed.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use supermat_core::{
    AppConfig, EntitySpan, EntityType, Lexicon, LinkError, Paragraph, RelationType, Result,
    SpanArena,
};
use tracing::{debug, error, info, trace, warn};

use crate::adapter::{
    filter_overlapping, reconstruct, repair_straddling, sentence_boundaries, to_internal,
    AlignedSpan, InternalTokens, RuleBasedSegmenter,
};
use crate::classifier::CriticalValueClassifier;
use crate::document::{Document, NoopParser};
use crate::resolver::{
    ExactResolver, Mention, ProximityResolver, ResolutionContext, Resolver, ResolverKind,
    SyntacticResolver,
};
use crate::tokenizer::SimpleTokenizer;
use crate::{SentenceRange, SentenceSegmenter, SyntacticParser, Tokenizer};

// ============================================================================
// Roles and Outputs
// ============================================================================

/// Entity types resolved as source and destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleConfig {
    pub source: EntityType,
    pub destination: EntityType,
}

impl RoleConfig {
    pub fn new(source: EntityType, destination: EntityType) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn for_relation(relation_type: RelationType) -> Self {
        let (source, destination) = relation_type.roles();
        Self::new(source, destination)
    }

    fn involves(&self, entity_type: &EntityType) -> bool {
        &self.source == entity_type || &self.destination == entity_type
    }

    fn has_value_role(&self) -> bool {
        self.source.is_value() || self.destination.is_value()
    }
}

/// Processing stage of a sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentenceStage {
    NotProcessed,
    ClassifyValues,
    TryExact,
    TryProximity,
    TrySyntactic,
    Done,
}

impl SentenceStage {
    /// Stage reached when the current one yields nothing
    pub fn next(self) -> Self {
        match self {
            Self::NotProcessed => Self::ClassifyValues,
            Self::ClassifyValues => Self::TryExact,
            Self::TryExact => Self::TryProximity,
            Self::TryProximity => Self::TrySyntactic,
            Self::TrySyntactic | Self::Done => Self::Done,
        }
    }

    /// Resolver tried at this stage
    pub fn resolver(self) -> Option<ResolverKind> {
        match self {
            Self::TryExact => Some(ResolverKind::Exact),
            Self::TryProximity => Some(ResolverKind::Proximity),
            Self::TrySyntactic => Some(ResolverKind::Syntactic),
            _ => None,
        }
    }
}

/// A relation found in a sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub source_id: String,
    pub source_text: String,
    pub dest_id: String,
    pub dest_text: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub resolver: ResolverKind,
}

/// Result of one sentence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentenceOutput {
    pub text: String,
    pub spans: Vec<EntitySpan>,
    pub relations: Vec<Relation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Paragraph with updated spans and its per-sentence outputs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedParagraph {
    pub paragraph: Paragraph,
    pub sentences: Vec<SentenceOutput>,
}

impl LinkedParagraph {
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.sentences.iter().flat_map(|s| s.relations.iter())
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.sentences.iter().filter_map(|s| s.error.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Resolve,
    ClassifyOnly,
}

// ============================================================================
// Rule-based Linker
// ============================================================================

/// Resolves one relation type across the sentences of a paragraph
pub struct RuleBasedLinker {
    roles: RoleConfig,
    classifier: CriticalValueClassifier,
    resolvers: Vec<Box<dyn Resolver>>,
    tokenizer: Arc<dyn Tokenizer>,
    segmenter: Arc<dyn SentenceSegmenter>,
    parser: Arc<dyn SyntacticParser>,
    classify_values: bool,
}

impl fmt::Debug for RuleBasedLinker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolvers: Vec<ResolverKind> = self.resolvers.iter().map(|r| r.kind()).collect();
        f.debug_struct("RuleBasedLinker")
            .field("roles", &self.roles)
            .field("resolvers", &resolvers)
            .field("classify_values", &self.classify_values)
            .finish_non_exhaustive()
    }
}

impl RuleBasedLinker {
    /// Create a linker with the exact, proximity and syntactic resolvers
    pub fn new(roles: RoleConfig, lexicon: Lexicon) -> Self {
        Self {
            roles,
            segmenter: Arc::new(RuleBasedSegmenter::from_lexicon(&lexicon)),
            resolvers: vec![
                Box::new(ExactResolver),
                Box::new(ProximityResolver::new(lexicon.clone())),
                Box::new(SyntacticResolver),
            ],
            classifier: CriticalValueClassifier::new(lexicon),
            tokenizer: Arc::new(SimpleTokenizer),
            parser: Arc::new(NoopParser),
            classify_values: true,
        }
    }

    pub fn for_relation(relation_type: RelationType) -> Self {
        Self::new(RoleConfig::for_relation(relation_type), Lexicon::default())
    }

    pub fn from_config(config: &AppConfig, relation_type: RelationType) -> Self {
        Self::new(
            RoleConfig::for_relation(relation_type),
            config.lexicon.clone(),
        )
        .with_syntactic_fallback(config.linking.syntactic_fallback)
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_segmenter(mut self, segmenter: Arc<dyn SentenceSegmenter>) -> Self {
        self.segmenter = segmenter;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn SyntacticParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Enable or disable the dependency-based last resort
    pub fn with_syntactic_fallback(mut self, enabled: bool) -> Self {
        self.resolvers
            .retain(|r| r.kind() != ResolverKind::Syntactic);
        if enabled {
            self.resolvers.push(Box::new(SyntacticResolver));
        }
        self
    }

    /// Run the critical-value classifier before resolving
    pub fn with_value_classification(mut self, enabled: bool) -> Self {
        self.classify_values = enabled;
        self
    }

    pub fn roles(&self) -> &RoleConfig {
        &self.roles
    }

    /// Link the configured roles in every sentence
    pub fn resolve_paragraph(&self, paragraph: &Paragraph) -> Result<LinkedParagraph> {
        self.run(paragraph, Mode::Resolve)
    }

    /// Only mark critical values as linkable
    pub fn classify_values(&self, paragraph: &Paragraph) -> Result<LinkedParagraph> {
        self.run(paragraph, Mode::ClassifyOnly)
    }

    fn run(&self, paragraph: &Paragraph, mode: Mode) -> Result<LinkedParagraph> {
        let mut paragraph = paragraph.clone();
        paragraph.normalize();
        paragraph.validate()?;

        let internal = if paragraph.tokens.is_empty() {
            let tokens = self.tokenizer.tokenize(&paragraph.text);
            to_internal(&tokens, &paragraph.spans)
        } else {
            to_internal(&paragraph.tokens, &paragraph.spans)
        };
        let aligned = filter_overlapping(internal.aligned.clone());
        let ranges = sentence_boundaries(&internal.words, &internal.spaces, self.segmenter.as_ref());
        let ranges = repair_straddling(ranges, &aligned);

        let mut arena = SpanArena::new(std::mem::take(&mut paragraph.spans))?;
        let mut sentences = Vec::with_capacity(ranges.len());

        for (idx, range) in ranges.iter().enumerate() {
            let members: Vec<AlignedSpan> = aligned
                .iter()
                .copied()
                .filter(|a| a.within(range))
                .collect();
            let text = reconstruct(&internal.words[range.clone()], &internal.spaces[range.clone()]);

            let output = match self.process_sentence(&internal, range, &members, &arena, mode) {
                Ok((spans, relations)) => {
                    for span in spans.iter().cloned() {
                        arena.commit(span)?;
                    }
                    SentenceOutput {
                        text,
                        spans,
                        relations,
                        error: None,
                    }
                }
                Err(err) => {
                    error!(sentence = idx, error = %err, "sentence failed, emitted unmodified");
                    SentenceOutput {
                        text,
                        spans: members
                            .iter()
                            .filter_map(|a| arena.get(a.span).cloned())
                            .collect(),
                        relations: Vec::new(),
                        error: Some(err.to_string()),
                    }
                }
            };
            sentences.push(output);
        }

        paragraph.spans = arena.into_spans();
        let relations: usize = sentences.iter().map(|s| s.relations.len()).sum();
        info!(
            source = %self.roles.source,
            destination = %self.roles.destination,
            sentences = sentences.len(),
            relations,
            "paragraph processed"
        );

        Ok(LinkedParagraph {
            paragraph,
            sentences,
        })
    }

    /// Process one sentence on a local copy of its spans
    ///
    /// Returns the updated spans, keyed like `members`, and the relations.
    fn process_sentence(
        &self,
        internal: &InternalTokens,
        range: &SentenceRange,
        members: &[AlignedSpan],
        arena: &SpanArena,
        mode: Mode,
    ) -> Result<(Vec<EntitySpan>, Vec<Relation>)> {
        let spans = members
            .iter()
            .map(|a| {
                arena
                    .get(a.span)
                    .cloned()
                    .ok_or_else(|| LinkError::SpanNotFound(format!("arena index {}", a.span)))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut local = SpanArena::new(spans)?;
        // entity keys are positions in the local arena
        let entities: Vec<AlignedSpan> = members
            .iter()
            .enumerate()
            .map(|(key, a)| AlignedSpan {
                span: key,
                start: a.start - range.start,
                end: a.end - range.start,
            })
            .collect();

        let mut stage = SentenceStage::NotProcessed;
        let mut document: Option<Document> = None;
        let mut relations = Vec::new();

        loop {
            trace!(?stage, "sentence stage");
            stage = match stage {
                SentenceStage::NotProcessed => {
                    if mode == Mode::ClassifyOnly || self.has_both_roles(&local) {
                        stage.next()
                    } else {
                        debug!("no source or destination span, skipped");
                        SentenceStage::Done
                    }
                }
                SentenceStage::ClassifyValues => {
                    let built = Document::build(
                        &internal.words[range.clone()],
                        &internal.spaces[range.clone()],
                        &entities,
                        self.parser.as_ref(),
                    );
                    match mode {
                        Mode::ClassifyOnly => {
                            self.classifier.classify(&built, &mut local);
                            SentenceStage::Done
                        }
                        Mode::Resolve => {
                            self.mark_unambiguous(&mut local);
                            if self.classify_values && self.roles.has_value_role() {
                                self.classifier.classify(&built, &mut local);
                            }
                            document = Some(built);
                            stage.next()
                        }
                    }
                }
                SentenceStage::TryExact
                | SentenceStage::TryProximity
                | SentenceStage::TrySyntactic => {
                    let resolver = stage
                        .resolver()
                        .and_then(|kind| self.resolvers.iter().find(|r| r.kind() == kind));
                    match (resolver, document.as_ref()) {
                        (Some(resolver), Some(doc)) => {
                            let sources = self.mentions(doc, &local, &self.roles.source);
                            let destinations =
                                self.mentions(doc, &local, &self.roles.destination);
                            let ctx = ResolutionContext::new(doc);
                            let pairs = resolver.resolve(&ctx, &sources, &destinations);

                            if pairs.is_empty() {
                                stage.next()
                            } else {
                                debug!(
                                    resolver = %resolver.kind(),
                                    pairs = pairs.len(),
                                    "sentence resolved"
                                );
                                relations = Self::apply(&mut local, &pairs, resolver.kind())?;
                                SentenceStage::Done
                            }
                        }
                        _ => stage.next(),
                    }
                }
                SentenceStage::Done => break,
            };
        }

        Ok((local.into_spans(), relations))
    }

    fn has_both_roles(&self, arena: &SpanArena) -> bool {
        let present = |entity_type: &EntityType| arena.iter().any(|s| &s.entity_type == entity_type);
        present(&self.roles.source) && present(&self.roles.destination)
    }

    /// Non-value role spans need no classification
    fn mark_unambiguous(&self, arena: &mut SpanArena) {
        let unambiguous: Vec<usize> = arena
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.entity_type.is_value() && self.roles.involves(&s.entity_type))
            .map(|(idx, _)| idx)
            .collect();
        for idx in unambiguous {
            arena.set_linkable(idx, true);
        }
    }

    /// Linkable entity units of the given type, in sentence order
    fn mentions(&self, document: &Document, arena: &SpanArena, entity_type: &EntityType) -> Vec<Mention> {
        document
            .entities()
            .filter(|&(_, key)| {
                arena
                    .get(key)
                    .map(|s| s.linkable && &s.entity_type == entity_type)
                    .unwrap_or(false)
            })
            .filter_map(|(unit, _)| Mention::from_unit(document, unit))
            .collect()
    }

    fn apply(
        arena: &mut SpanArena,
        pairs: &[(Mention, Mention)],
        resolver: ResolverKind,
    ) -> Result<Vec<Relation>> {
        let mut relations = Vec::with_capacity(pairs.len());
        for (source, destination) in pairs {
            let relation_type = arena.link_spans(source.key, destination.key)?;
            if let (Some(s), Some(d)) = (arena.get(source.key), arena.get(destination.key)) {
                relations.push(Relation {
                    source_id: s.id.clone(),
                    source_text: s.text.clone(),
                    dest_id: d.id.clone(),
                    dest_text: d.text.clone(),
                    relation_type,
                    resolver,
                });
            }
        }
        Ok(relations)
    }
}

// ============================================================================
// Linking Pipeline
// ============================================================================

/// Classifies values once, then runs one linker per relation type
#[derive(Debug)]
pub struct LinkingPipeline {
    linkers: Vec<RuleBasedLinker>,
}

impl LinkingPipeline {
    /// Linkers are run in order; value classification uses the first one
    pub fn new(linkers: Vec<RuleBasedLinker>) -> Result<Self> {
        if linkers.is_empty() {
            return Err(LinkError::Config("no relation types configured".to_string()));
        }
        let linkers = linkers
            .into_iter()
            .map(|l| l.with_value_classification(false))
            .collect();
        Ok(Self { linkers })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config
                .linking
                .relations
                .iter()
                .map(|&rt| RuleBasedLinker::from_config(config, rt))
                .collect(),
        )
    }

    pub fn with_parser(self, parser: Arc<dyn SyntacticParser>) -> Self {
        Self {
            linkers: self
                .linkers
                .into_iter()
                .map(|l| l.with_parser(parser.clone()))
                .collect(),
        }
    }

    pub fn relations(&self) -> impl Iterator<Item = &RoleConfig> {
        self.linkers.iter().map(RuleBasedLinker::roles)
    }

    pub fn run(&self, paragraph: &Paragraph) -> Result<LinkedParagraph> {
        let Some(first) = self.linkers.first() else {
            return Err(LinkError::Config("no relation types configured".to_string()));
        };

        let mut linked = first.classify_values(paragraph)?;
        for linker in &self.linkers {
            let next = linker.resolve_paragraph(&linked.paragraph)?;
            Self::merge(&mut linked.sentences, next.sentences);
            linked.paragraph = next.paragraph;
        }
        Ok(linked)
    }

    fn merge(into: &mut Vec<SentenceOutput>, from: Vec<SentenceOutput>) {
        if into.len() != from.len() {
            warn!(
                before = into.len(),
                after = from.len(),
                "sentence count changed between passes"
            );
            *into = from;
            return;
        }

        for (current, next) in into.iter_mut().zip(from) {
            current.spans = next.spans;
            current.relations.extend(next.relations);
            current.error = match (current.error.take(), next.error) {
                (Some(a), Some(b)) => Some(format!("{a}; {b}")),
                (a, b) => a.or(b),
            };
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParagraphBuilder;

    fn paragraph(text: &str, spans: &[(&str, EntityType)]) -> Paragraph {
        spans
            .iter()
            .fold(ParagraphBuilder::new(text), |b, (t, et)| b.span(*t, et.clone()))
            .build(&SimpleTokenizer)
            .unwrap()
    }

    #[test]
    fn test_stage_order() {
        let mut stage = SentenceStage::NotProcessed;
        let mut seen = vec![stage];
        while stage != SentenceStage::Done {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                SentenceStage::NotProcessed,
                SentenceStage::ClassifyValues,
                SentenceStage::TryExact,
                SentenceStage::TryProximity,
                SentenceStage::TrySyntactic,
                SentenceStage::Done,
            ]
        );
        assert_eq!(SentenceStage::TryExact.resolver(), Some(ResolverKind::Exact));
        assert_eq!(SentenceStage::ClassifyValues.resolver(), None);
    }

    #[test]
    fn test_role_config_for_relation() {
        let roles = RoleConfig::for_relation(RelationType::TcPressure);
        assert_eq!(roles.source, EntityType::Pressure);
        assert_eq!(roles.destination, EntityType::TcValue);
        assert!(roles.has_value_role());
        assert!(!RoleConfig::for_relation(RelationType::MaterialSpaceGroup).has_value_role());
    }

    #[test]
    fn test_sentence_without_both_roles_is_untouched() {
        let input = paragraph(
            "MgB2 is a superconductor. Its Tc is 39 K.",
            &[("MgB2", EntityType::Material), ("39 K", EntityType::TcValue)],
        );
        let linked = RuleBasedLinker::for_relation(RelationType::MaterialTc)
            .resolve_paragraph(&input)
            .unwrap();

        assert_eq!(linked.sentences.len(), 2);
        assert_eq!(linked.relations().count(), 0);
        // neither sentence holds both roles, so nothing is marked either
        assert!(linked.paragraph.spans.iter().all(|s| !s.linkable));
        assert_eq!(linked.paragraph.spans, input.spans);
    }

    #[test]
    fn test_exact_relation_links_both_sides() {
        let input = paragraph(
            "The Tc of the BaClE2 is 30K.",
            &[
                ("Tc", EntityType::TcLabel),
                ("BaClE2", EntityType::Material),
                ("30K", EntityType::TcValue),
            ],
        );
        let linked = RuleBasedLinker::for_relation(RelationType::MaterialTc)
            .resolve_paragraph(&input)
            .unwrap();

        let relations: Vec<&Relation> = linked.relations().collect();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].resolver, ResolverKind::Exact);
        assert_eq!(relations[0].source_text, "BaClE2");
        assert_eq!(relations[0].dest_text, "30K");

        let spans = &linked.paragraph.spans;
        assert!(spans[1].is_linked_to(&spans[2].id));
        assert!(spans[2].is_linked_to(&spans[1].id));
        assert!(spans[0].links.is_empty());
        assert!(!spans[0].linkable);
    }

    #[test]
    fn test_classification_can_be_skipped() {
        let input = paragraph(
            "The Tc of the BaClE2 is 30K.",
            &[
                ("Tc", EntityType::TcLabel),
                ("BaClE2", EntityType::Material),
                ("30K", EntityType::TcValue),
            ],
        );
        let linked = RuleBasedLinker::for_relation(RelationType::MaterialTc)
            .with_value_classification(false)
            .resolve_paragraph(&input)
            .unwrap();
        assert_eq!(linked.relations().count(), 0);
    }

    #[test]
    fn test_classify_values_only_marks() {
        let input = paragraph(
            "MgB2 superconducts at 39 K.",
            &[("MgB2", EntityType::Material), ("39 K", EntityType::TcValue)],
        );
        let linked = RuleBasedLinker::for_relation(RelationType::MaterialTc)
            .classify_values(&input)
            .unwrap();

        let flags: Vec<bool> = linked.paragraph.spans.iter().map(|s| s.linkable).collect();
        assert_eq!(flags, vec![false, true]);
        assert_eq!(linked.relations().count(), 0);
    }

    #[test]
    fn test_syntactic_fallback_toggle() {
        let linker = RuleBasedLinker::for_relation(RelationType::MaterialTc);
        assert!(format!("{linker:?}").contains("Syntactic"));

        let linker = linker.with_syntactic_fallback(false);
        assert!(!format!("{linker:?}").contains("Syntactic"));
    }

    #[test]
    fn test_duplicate_ids_fail_the_paragraph() {
        let mut input = paragraph(
            "MgB2 at 39 K.",
            &[("MgB2", EntityType::Material), ("39 K", EntityType::TcValue)],
        );
        input.spans[1].id = input.spans[0].id.clone();

        let err = RuleBasedLinker::for_relation(RelationType::MaterialTc)
            .resolve_paragraph(&input)
            .unwrap_err();
        assert!(matches!(err, LinkError::InvalidInput(_)));
    }

    #[test]
    fn test_pipeline_requires_relations() {
        assert!(matches!(
            LinkingPipeline::new(Vec::new()),
            Err(LinkError::Config(_))
        ));
    }

    #[test]
    fn test_merge_joins_errors() {
        let output = |relations: usize, error: Option<&str>| SentenceOutput {
            text: "x".to_string(),
            spans: Vec::new(),
            relations: (0..relations)
                .map(|i| Relation {
                    source_id: i.to_string(),
                    source_text: String::new(),
                    dest_id: String::new(),
                    dest_text: String::new(),
                    relation_type: RelationType::MaterialTc,
                    resolver: ResolverKind::Exact,
                })
                .collect(),
            error: error.map(str::to_string),
        };

        let mut into = vec![output(1, Some("first"))];
        LinkingPipeline::merge(&mut into, vec![output(2, Some("second"))]);
        assert_eq!(into[0].relations.len(), 3);
        assert_eq!(into[0].error.as_deref(), Some("first; second"));
    }
}
