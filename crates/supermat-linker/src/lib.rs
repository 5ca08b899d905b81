//! Supermat Linker - Relationship resolution pipeline
//!
//! Links pre-recognized entity spans (materials, critical temperatures,
//! pressures, ...) inside the sentences of a paragraph:
//! - Adapter: token stream compaction, sentence boundaries, span realignment
//! - Document: entity and noun-phrase fusion into atomic units
//! - Classifier: decides which temperature values are critical values
//! - Resolvers: exact, proximity and syntactic strategies
//! - Linker: per-sentence orchestration and multi-relation pipeline

use std::ops::Range;

use supermat_core::Token;

pub mod adapter;
pub mod classifier;
pub mod document;
pub mod linker;
pub mod metrics;
pub mod resolver;
pub mod tokenizer;

pub use adapter::{AlignedSpan, InternalTokens, RuleBasedSegmenter};
pub use classifier::CriticalValueClassifier;
pub use document::{DepRole, Dependency, Document, NoopParser, ParseTree, Unit, UnitKind};
pub use linker::{
    LinkedParagraph, LinkingPipeline, Relation, RoleConfig, RuleBasedLinker, SentenceOutput,
    SentenceStage,
};
pub use metrics::{extract_links, EvaluationReport, Evaluator, LinkKey, LinkMetrics};
pub use resolver::{
    ExactResolver, Mention, ProximityResolver, ResolutionContext, Resolver, ResolverKind,
    SyntacticResolver,
};
pub use tokenizer::{ParagraphBuilder, SimpleTokenizer};

/// Trait for tokenizers producing offset-addressed tokens
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;
}

/// Trait for sentence segmenters working on plain text
pub trait SentenceSegmenter: Send + Sync {
    /// Split `text` into trimmed sentences, in order
    fn segment(&self, text: &str) -> Vec<String>;
}

/// Trait for dependency parsers
///
/// Receives the fused units of a sentence (entities already merged) and
/// returns one dependency per unit plus noun-phrase chunks over unit indices.
pub trait SyntacticParser: Send + Sync {
    fn parse(&self, words: &[String], spaces: &[bool]) -> ParseTree;
}

/// Token range of a sentence inside the compacted word stream
pub type SentenceRange = Range<usize>;
