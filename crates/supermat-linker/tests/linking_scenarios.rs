//! Linking Integration Tests
//!
//! End-to-end runs of the linker and the pipeline on hand-built paragraphs.

use proptest::prelude::*;
use supermat_core::{AppConfig, EntityType, Lexicon, Paragraph, RelationType};
use supermat_linker::{
    LinkingPipeline, ParagraphBuilder, Relation, ResolverKind, RoleConfig, RuleBasedLinker,
    SimpleTokenizer, Tokenizer,
};

fn build(text: &str, spans: &[(&str, EntityType)]) -> Paragraph {
    spans
        .iter()
        .fold(ParagraphBuilder::new(text), |builder, (surface, entity_type)| {
            builder.span(*surface, entity_type.clone())
        })
        .build(&SimpleTokenizer)
        .unwrap()
}

fn material_tc() -> RuleBasedLinker {
    RuleBasedLinker::for_relation(RelationType::MaterialTc)
}

fn pairs(relations: &[&Relation]) -> Vec<(String, String)> {
    relations
        .iter()
        .map(|r| (r.source_text.clone(), r.dest_text.clone()))
        .collect()
}

// =============================================================================
// Resolution Scenarios
// =============================================================================

#[test]
fn test_single_pair_resolved_exactly() {
    let paragraph = build(
        "The Tc of the BaClE2 is 30K.",
        &[
            ("Tc", EntityType::TcLabel),
            ("BaClE2", EntityType::Material),
            ("30K", EntityType::TcValue),
        ],
    );

    let linked = material_tc().resolve_paragraph(&paragraph).unwrap();
    let relations: Vec<&Relation> = linked.relations().collect();

    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].resolver, ResolverKind::Exact);
    assert_eq!(relations[0].relation_type, RelationType::MaterialTc);
    assert_eq!(
        pairs(&relations),
        vec![("BaClE2".to_string(), "30K".to_string())]
    );
    assert!(linked.paragraph.spans[2].linkable);
}

#[test]
fn test_two_triplets_resolved_by_proximity() {
    let paragraph = build(
        "(a) Tc0 = 28 K for BaFe2As2 and (b) Tc0 = 29 K for SrFe2As2.",
        &[
            ("Tc0", EntityType::TcLabel),
            ("28 K", EntityType::TcValue),
            ("BaFe2As2", EntityType::Material),
            ("Tc0", EntityType::TcLabel),
            ("29 K", EntityType::TcValue),
            ("SrFe2As2", EntityType::Material),
        ],
    );

    let linked = material_tc().resolve_paragraph(&paragraph).unwrap();
    let relations: Vec<&Relation> = linked.relations().collect();

    assert!(relations.iter().all(|r| r.resolver == ResolverKind::Proximity));
    assert_eq!(
        pairs(&relations),
        vec![
            ("BaFe2As2".to_string(), "28 K".to_string()),
            ("SrFe2As2".to_string(), "29 K".to_string()),
        ]
    );

    let values: Vec<bool> = linked
        .paragraph
        .spans
        .iter()
        .filter(|s| s.entity_type == EntityType::TcValue)
        .map(|s| s.linkable)
        .collect();
    assert_eq!(values, vec![true, true]);
}

#[test]
fn test_respectively_pairs_in_order() {
    let paragraph = build(
        "The Tc of the films is 38 K, 25 K, and 38 K for CCO/STO, CCO/BCO and LSCO/LCO, respectively.",
        &[
            ("Tc", EntityType::TcLabel),
            ("38 K", EntityType::TcValue),
            ("25 K", EntityType::TcValue),
            ("38 K", EntityType::TcValue),
            ("CCO/STO", EntityType::Material),
            ("CCO/BCO", EntityType::Material),
            ("LSCO/LCO", EntityType::Material),
        ],
    );

    let linked = material_tc().resolve_paragraph(&paragraph).unwrap();
    let relations: Vec<&Relation> = linked.relations().collect();

    assert_eq!(
        pairs(&relations),
        vec![
            ("CCO/STO".to_string(), "38 K".to_string()),
            ("CCO/BCO".to_string(), "25 K".to_string()),
            ("LSCO/LCO".to_string(), "38 K".to_string()),
        ]
    );
    // the two "38 K" spans keep distinct partners
    let spans = &linked.paragraph.spans;
    assert_eq!(relations[0].dest_id, spans[1].id);
    assert_eq!(relations[2].dest_id, spans[3].id);
}

#[test]
fn test_several_cues_pair_each_segment_in_order() {
    let paragraph = build(
        "A and B show 10 K and 12 K respectively, while C and D show 20 K and 22 K respectively.",
        &[
            ("A", EntityType::Material),
            ("B", EntityType::Material),
            ("10 K", EntityType::TcValue),
            ("12 K", EntityType::TcValue),
            ("C", EntityType::Material),
            ("D", EntityType::Material),
            ("20 K", EntityType::TcValue),
            ("22 K", EntityType::TcValue),
        ],
    );

    let linked = material_tc().resolve_paragraph(&paragraph).unwrap();
    let relations: Vec<&Relation> = linked.relations().collect();

    assert!(relations.iter().all(|r| r.resolver == ResolverKind::Proximity));
    assert_eq!(
        pairs(&relations),
        vec![
            ("A".to_string(), "10 K".to_string()),
            ("B".to_string(), "12 K".to_string()),
            ("C".to_string(), "20 K".to_string()),
            ("D".to_string(), "22 K".to_string()),
        ]
    );
    assert!(linked
        .paragraph
        .spans
        .iter()
        .filter(|s| s.entity_type == EntityType::TcValue)
        .all(|s| s.linkable));
}

#[test]
fn test_comparison_value_is_never_linked() {
    let paragraph = build(
        "The Tc of MgB2 is 30K higher than 77K.",
        &[
            ("Tc", EntityType::TcLabel),
            ("MgB2", EntityType::Material),
            ("30K", EntityType::TcValue),
            ("77K", EntityType::TcValue),
        ],
    );

    let linked = material_tc().resolve_paragraph(&paragraph).unwrap();
    assert_eq!(linked.relations().count(), 0);
    assert!(linked.paragraph.spans.iter().all(|s| s.links.is_empty()));
}

#[test]
fn test_no_relations_across_sentences() {
    let paragraph = build(
        "MgB2 has a Tc of 39 K. NbSe2 superconducts at 7 K.",
        &[
            ("MgB2", EntityType::Material),
            ("Tc", EntityType::TcLabel),
            ("39 K", EntityType::TcValue),
            ("NbSe2", EntityType::Material),
            ("7 K", EntityType::TcValue),
        ],
    );

    let linked = material_tc().resolve_paragraph(&paragraph).unwrap();
    assert_eq!(linked.sentences.len(), 2);
    assert_eq!(linked.sentences[0].relations.len(), 1);
    assert_eq!(linked.sentences[1].relations.len(), 1);

    let spans = &linked.paragraph.spans;
    assert!(spans[0].is_linked_to(&spans[2].id));
    assert!(spans[3].is_linked_to(&spans[4].id));
    assert!(!spans[0].is_linked_to(&spans[4].id));
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_unsupported_roles_leave_sentence_unmodified() {
    let paragraph = build(
        "MgB2 under 5 GPa.",
        &[
            ("MgB2", EntityType::Material),
            ("5 GPa", EntityType::Pressure),
        ],
    );
    let linker = RuleBasedLinker::new(
        RoleConfig::new(EntityType::Material, EntityType::Pressure),
        Lexicon::default(),
    );

    let linked = linker.resolve_paragraph(&paragraph).unwrap();
    assert_eq!(linked.sentences.len(), 1);
    assert!(linked.sentences[0].error.is_some());
    assert!(linked.sentences[0].relations.is_empty());
    assert_eq!(linked.paragraph, paragraph);
    assert_eq!(linked.errors().count(), 1);
}

#[test]
fn test_failing_sentence_does_not_stop_the_paragraph() {
    let paragraph = build(
        "MgB2 under 5 GPa. NbSe2 is stable.",
        &[
            ("MgB2", EntityType::Material),
            ("5 GPa", EntityType::Pressure),
            ("NbSe2", EntityType::Material),
        ],
    );
    let linker = RuleBasedLinker::new(
        RoleConfig::new(EntityType::Material, EntityType::Pressure),
        Lexicon::default(),
    );

    let linked = linker.resolve_paragraph(&paragraph).unwrap();
    assert_eq!(linked.sentences.len(), 2);
    assert!(linked.sentences[0].error.is_some());
    assert!(linked.sentences[1].error.is_none());
}

// =============================================================================
// Pipeline
// =============================================================================

#[test]
fn test_pipeline_accumulates_relation_types() {
    let paragraph = build(
        "MgB2 superconducts at 39 K under 5 GPa.",
        &[
            ("MgB2", EntityType::Material),
            ("39 K", EntityType::TcValue),
            ("5 GPa", EntityType::Pressure),
        ],
    );
    let pipeline = LinkingPipeline::from_config(&AppConfig::default()).unwrap();

    let linked = pipeline.run(&paragraph).unwrap();
    let types: Vec<RelationType> = linked.relations().map(|r| r.relation_type).collect();
    assert_eq!(types, vec![RelationType::MaterialTc, RelationType::TcPressure]);

    let value = &linked.paragraph.spans[1];
    assert_eq!(value.links.len(), 2);
    assert!(linked.paragraph.spans[0].is_linked_to(&value.id));
    assert!(linked.paragraph.spans[2].is_linked_to(&value.id));
}

#[test]
fn test_pipeline_is_idempotent() {
    let paragraph = build(
        "(a) Tc0 = 28 K for BaFe2As2 and (b) Tc0 = 29 K for SrFe2As2.",
        &[
            ("Tc0", EntityType::TcLabel),
            ("28 K", EntityType::TcValue),
            ("BaFe2As2", EntityType::Material),
            ("Tc0", EntityType::TcLabel),
            ("29 K", EntityType::TcValue),
            ("SrFe2As2", EntityType::Material),
        ],
    );
    let pipeline = LinkingPipeline::from_config(&AppConfig::default()).unwrap();

    let first = pipeline.run(&paragraph).unwrap();
    let second = pipeline.run(&first.paragraph).unwrap();
    assert_eq!(second.paragraph, first.paragraph);
    assert!(first
        .paragraph
        .spans
        .iter()
        .all(|s| s.links.len() <= 1));
}

#[test]
fn test_spans_round_trip_unchanged_apart_from_links() {
    let input = serde_json::json!({
        "text": "The Tc of the BaClE2 is 30K.",
        "tokens": SimpleTokenizer.tokenize("The Tc of the BaClE2 is 30K."),
        "spans": [
            {"id": "1", "text": "Tc", "type": "<tc>", "offset_start": 4, "offset_end": 6,
             "token_start": 2, "token_end": 3, "formattedText": "", "boundingBoxes": []},
            {"id": "2", "text": "BaClE2", "type": "<material>", "offset_start": 14, "offset_end": 20,
             "token_start": 8, "token_end": 9, "formattedText": "", "boundingBoxes": []},
            {"id": "3", "text": "30K", "type": "<tcValue>", "offset_start": 24, "offset_end": 27,
             "token_start": 12, "token_end": 13, "formattedText": "", "boundingBoxes": []}
        ]
    });
    let paragraph: Paragraph = serde_json::from_value(input.clone()).unwrap();

    let linked = material_tc().resolve_paragraph(&paragraph).unwrap();
    assert_eq!(linked.relations().count(), 1);

    let output = serde_json::to_value(&linked.paragraph).unwrap();
    for (before, after) in input["spans"]
        .as_array()
        .unwrap()
        .iter()
        .zip(output["spans"].as_array().unwrap())
    {
        for field in ["id", "text", "type", "formattedText", "boundingBoxes", "offset_start"] {
            assert_eq!(after[field], before[field], "field {field}");
        }
    }
    assert_eq!(output["spans"][2]["links"][0]["targetText"], "BaClE2");
}

#[test]
fn test_output_json_shape() {
    let paragraph = build(
        "The Tc of the BaClE2 is 30K.",
        &[
            ("Tc", EntityType::TcLabel),
            ("BaClE2", EntityType::Material),
            ("30K", EntityType::TcValue),
        ],
    );
    let linked = material_tc().resolve_paragraph(&paragraph).unwrap();
    let json = serde_json::to_value(&linked).unwrap();

    let link = &json["paragraph"]["spans"][1]["links"][0];
    assert_eq!(link["targetText"], "30K");
    assert_eq!(link["targetType"], "tc-value");
    assert_eq!(link["type"], "material-tc");
    assert_eq!(json["sentences"][0]["relations"][0]["resolver"], "exact");
    assert!(json["sentences"][0].get("error").is_none());
}

proptest! {
    #[test]
    fn prop_sentences_reassemble_paragraph(text in "[A-Za-z0-9 ,.;()]{0,80}") {
        let paragraph = ParagraphBuilder::new(text.clone()).build(&SimpleTokenizer).unwrap();
        let pipeline = LinkingPipeline::from_config(&AppConfig::default()).unwrap();

        let linked = pipeline.run(&paragraph).unwrap();
        let joined: String = linked.sentences.iter().map(|s| s.text.as_str()).collect();
        prop_assert_eq!(joined, text);
    }
}
