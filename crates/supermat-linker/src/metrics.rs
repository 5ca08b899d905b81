//! Link quality metrics
//!
//! Compares predicted links against a gold standard, both read from the
//! `links` of paragraph spans. A link is identified by its unordered pair of
//! span ids and its relation type, so the mirrored side counts once.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use supermat_core::{Paragraph, RelationType};
use tracing::warn;

// ============================================================================
// Link Keys
// ============================================================================

/// Unordered link between two spans
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub left: String,
    pub right: String,
    pub relation_type: RelationType,
}

impl LinkKey {
    pub fn new(a: impl Into<String>, b: impl Into<String>, relation_type: RelationType) -> Self {
        let (a, b) = (a.into(), b.into());
        let (left, right) = if a <= b { (a, b) } else { (b, a) };
        Self {
            left,
            right,
            relation_type,
        }
    }
}

/// Every link of the paragraph, de-duplicated and sorted
///
/// Links pointing at ids that are not spans of the paragraph are ignored.
pub fn extract_links(paragraph: &Paragraph) -> Vec<LinkKey> {
    let ids: HashSet<&str> = paragraph.spans.iter().map(|s| s.id.as_str()).collect();

    let keys: BTreeSet<LinkKey> = paragraph
        .spans
        .iter()
        .flat_map(|span| {
            span.links
                .iter()
                .map(move |link| (span.id.as_str(), link))
        })
        .filter(|(_, link)| ids.contains(link.target_id.as_str()))
        .map(|(id, link)| LinkKey::new(id, link.target_id.as_str(), link.relation_type))
        .collect();

    keys.into_iter().collect()
}

// ============================================================================
// Link Metrics
// ============================================================================

/// Counts for one relation type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetrics {
    /// Predicted links present in the gold standard
    pub true_positives: usize,
    /// Predicted links missing from the gold standard
    pub false_positives: usize,
    /// Gold links that were not predicted
    pub false_negatives: usize,
}

impl LinkMetrics {
    /// Calculate precision (TP / (TP + FP))
    pub fn precision(&self) -> f32 {
        if self.true_positives + self.false_positives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_positives) as f32
        }
    }

    /// Calculate recall (TP / (TP + FN))
    pub fn recall(&self) -> f32 {
        if self.true_positives + self.false_negatives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_negatives) as f32
        }
    }

    /// Calculate F1 score (2 * P * R / (P + R))
    pub fn f1_score(&self) -> f32 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.true_positives + self.false_positives + self.false_negatives == 0
    }

    fn add(&mut self, other: &LinkMetrics) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

// ============================================================================
// Evaluation Report
// ============================================================================

/// Per-relation metrics over a batch of paragraphs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub by_type: BTreeMap<RelationType, LinkMetrics>,
    pub paragraphs: usize,
}

impl EvaluationReport {
    /// Counts summed over every relation type
    pub fn micro(&self) -> LinkMetrics {
        let mut total = LinkMetrics::default();
        for metrics in self.by_type.values() {
            total.add(metrics);
        }
        total
    }

    /// Unweighted mean of (precision, recall, F1) over types with any count
    pub fn macro_average(&self) -> (f32, f32, f32) {
        let present: Vec<&LinkMetrics> = self.by_type.values().filter(|m| !m.is_empty()).collect();
        if present.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let n = present.len() as f32;
        let mean = |f: fn(&LinkMetrics) -> f32| present.iter().map(|m| f(*m)).sum::<f32>() / n;
        (
            mean(LinkMetrics::precision),
            mean(LinkMetrics::recall),
            mean(LinkMetrics::f1_score),
        )
    }

    /// Add another report to this one
    pub fn merge(&mut self, other: &EvaluationReport) {
        for (relation_type, metrics) in &other.by_type {
            self.by_type.entry(*relation_type).or_default().add(metrics);
        }
        self.paragraphs += other.paragraphs;
    }

    /// Print a summary report
    pub fn report(&self) -> String {
        let mut out = format!(
            "=== Link Quality Report ===\n\nParagraphs evaluated: {}\n\n",
            self.paragraphs
        );

        for (relation_type, m) in &self.by_type {
            out.push_str(&format!(
                "{}:\n  Precision: {:.1}%\n  Recall:    {:.1}%\n  F1 Score:  {:.1}%\n  TP: {} | FP: {} | FN: {}\n\n",
                relation_type,
                m.precision() * 100.0,
                m.recall() * 100.0,
                m.f1_score() * 100.0,
                m.true_positives,
                m.false_positives,
                m.false_negatives,
            ));
        }

        let micro = self.micro();
        let (p, r, f1) = self.macro_average();
        out.push_str(&format!(
            "Micro average:\n  Precision: {:.1}%\n  Recall:    {:.1}%\n  F1 Score:  {:.1}%\n\n\
             Macro average:\n  Precision: {:.1}%\n  Recall:    {:.1}%\n  F1 Score:  {:.1}%\n",
            micro.precision() * 100.0,
            micro.recall() * 100.0,
            micro.f1_score() * 100.0,
            p * 100.0,
            r * 100.0,
            f1 * 100.0,
        ));
        out
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluator for link quality
#[derive(Debug, Clone)]
pub struct Evaluator {
    /// Relation types taken into account (all when `None`)
    relations: Option<Vec<RelationType>>,
}

impl Evaluator {
    /// Create a new evaluator counting every relation type
    pub fn new() -> Self {
        Self { relations: None }
    }

    /// Restrict evaluation to the given relation types
    pub fn only(mut self, relations: impl IntoIterator<Item = RelationType>) -> Self {
        self.relations = Some(relations.into_iter().collect());
        self
    }

    fn counts(&self, relation_type: RelationType) -> bool {
        self.relations
            .as_ref()
            .map(|r| r.contains(&relation_type))
            .unwrap_or(true)
    }

    /// Compare predicted links with gold links
    pub fn evaluate(&self, predicted: &[LinkKey], gold: &[LinkKey]) -> EvaluationReport {
        let predicted: HashSet<&LinkKey> = predicted
            .iter()
            .filter(|k| self.counts(k.relation_type))
            .collect();
        let gold: HashSet<&LinkKey> = gold
            .iter()
            .filter(|k| self.counts(k.relation_type))
            .collect();

        let mut by_type: BTreeMap<RelationType, LinkMetrics> = BTreeMap::new();
        for key in &predicted {
            let metrics = by_type.entry(key.relation_type).or_default();
            if gold.contains(key) {
                metrics.true_positives += 1;
            } else {
                metrics.false_positives += 1;
            }
        }
        for key in gold.difference(&predicted) {
            by_type.entry(key.relation_type).or_default().false_negatives += 1;
        }

        EvaluationReport {
            by_type,
            paragraphs: 1,
        }
    }

    /// Evaluate paragraph pairs (predicted, gold) in order
    pub fn evaluate_paragraphs(&self, predicted: &[Paragraph], gold: &[Paragraph]) -> EvaluationReport {
        if predicted.len() != gold.len() {
            warn!(
                predicted = predicted.len(),
                gold = gold.len(),
                "paragraph counts differ, extra paragraphs ignored"
            );
        }

        let mut report = EvaluationReport::default();
        for (p, g) in predicted.iter().zip(gold) {
            report.merge(&self.evaluate(&extract_links(p), &extract_links(g)));
        }
        report
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
