//! Supermat Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used by the linking engine:
//! - Entity and relation vocabularies (closed enums)
//! - Paragraph, token and span models (wire shape of the linking service)
//! - The span arena that owns spans and their symmetric links
//! - Common error types
//! - Configuration management (lexicons, linking options, logging)

pub mod arena;
pub mod config;
pub mod model;

pub use arena::SpanArena;
pub use config::{AppConfig, ConfigError, Lexicon, LinkingConfig, LoggingConfig};
pub use model::{compute_span_id, EntitySpan, Paragraph, Token};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for linking operations
#[derive(Error, Debug)]
pub enum LinkError {
    /// The two entity types cannot be linked by any known relation
    #[error("Unsupported relation between entity types: {left}, {right}")]
    UnsupportedRelation { left: String, right: String },

    #[error("Span not found: {0}")]
    SpanNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

// ============================================================================
// Entity Types
// ============================================================================

/// Entity types produced by the upstream recognizer
///
/// Labels are read leniently (the bracketed legacy labels such as
/// `<tcValue>` or `<me_method>` are accepted) and always written in their
/// canonical kebab-case form. Labels outside the vocabulary are kept
/// verbatim in `Other` and never take part in a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    Material,
    Class,
    /// Generic critical-temperature designator ("Tc", "T_C", ...)
    TcLabel,
    /// Temperature magnitude that may be a critical value
    TcValue,
    Pressure,
    /// Measurement method
    Method,
    CrystalStructure,
    SpaceGroup,
    Other(String),
}

impl EntityType {
    /// Parse a label, normalising brackets, case and separators
    pub fn from_label(label: &str) -> Self {
        let normalized = label
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_lowercase()
            .replace('_', "-");

        match normalized.as_str() {
            "material" => Self::Material,
            "class" => Self::Class,
            "tc" | "tc-label" => Self::TcLabel,
            "tcvalue" | "tc-value" | "temperature" => Self::TcValue,
            "pressure" => Self::Pressure,
            "me-method" | "method" => Self::Method,
            "crystal-structure" => Self::CrystalStructure,
            "space-group" | "space-groups" => Self::SpaceGroup,
            _ => Self::Other(label.to_string()),
        }
    }

    /// Get the canonical label
    pub fn as_str(&self) -> &str {
        match self {
            Self::Material => "material",
            Self::Class => "class",
            Self::TcLabel => "tc-label",
            Self::TcValue => "tc-value",
            Self::Pressure => "pressure",
            Self::Method => "method",
            Self::CrystalStructure => "crystal-structure",
            Self::SpaceGroup => "space-group",
            Self::Other(label) => label,
        }
    }

    /// Value types must pass the critical-value classifier before linking
    pub fn is_value(&self) -> bool {
        matches!(self, Self::TcValue)
    }

    /// Whether the type belongs to the recognizer vocabulary
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for EntityType {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

impl From<EntityType> for String {
    fn from(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Other(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Relation Types
// ============================================================================

/// Relation types recognized by the linker
///
/// Each relation is defined by an unordered pair of entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationType {
    #[serde(rename = "material-tc", alias = "<material-tcValue>")]
    MaterialTc,
    #[serde(rename = "tc-pressure", alias = "<tcValue-pressure>")]
    TcPressure,
    #[serde(
        rename = "tc-method",
        alias = "tc-me_method",
        alias = "<tcValue-me_method>"
    )]
    TcMethod,
    #[serde(rename = "material-space-group", alias = "<material-space_groups>")]
    MaterialSpaceGroup,
    #[serde(
        rename = "material-crystal-structure",
        alias = "<material-crystal_structure>"
    )]
    MaterialCrystalStructure,
}

impl RelationType {
    pub const ALL: [RelationType; 5] = [
        Self::MaterialTc,
        Self::TcPressure,
        Self::TcMethod,
        Self::MaterialSpaceGroup,
        Self::MaterialCrystalStructure,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaterialTc => "material-tc",
            Self::TcPressure => "tc-pressure",
            Self::TcMethod => "tc-method",
            Self::MaterialSpaceGroup => "material-space-group",
            Self::MaterialCrystalStructure => "material-crystal-structure",
        }
    }

    /// Source and destination roles resolved for this relation
    ///
    /// The destination is the attribute side; when it is a value type the
    /// critical-value classifier runs before resolution.
    pub fn roles(&self) -> (EntityType, EntityType) {
        match self {
            Self::MaterialTc => (EntityType::Material, EntityType::TcValue),
            Self::TcPressure => (EntityType::Pressure, EntityType::TcValue),
            Self::TcMethod => (EntityType::Method, EntityType::TcValue),
            Self::MaterialSpaceGroup => (EntityType::Material, EntityType::SpaceGroup),
            Self::MaterialCrystalStructure => {
                (EntityType::Material, EntityType::CrystalStructure)
            }
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "material-tc" | "<material-tcvalue>" => Ok(Self::MaterialTc),
            "tc-pressure" | "<tcvalue-pressure>" => Ok(Self::TcPressure),
            "tc-method" | "tc-me-method" | "<tcvalue-me-method>" => Ok(Self::TcMethod),
            "material-space-group" | "<material-space-groups>" => Ok(Self::MaterialSpaceGroup),
            "material-crystal-structure" | "<material-crystal-structure>" => {
                Ok(Self::MaterialCrystalStructure)
            }
            _ => Err(LinkError::Config(format!("unknown relation type: {s}"))),
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derive the relation type linking two entity types (order-insensitive)
pub fn get_link_type(left: &EntityType, right: &EntityType) -> Result<RelationType> {
    use EntityType::*;

    let relation = match (left, right) {
        (Material, TcValue) | (TcValue, Material) => RelationType::MaterialTc,
        (Pressure, TcValue) | (TcValue, Pressure) => RelationType::TcPressure,
        (Method, TcValue) | (TcValue, Method) => RelationType::TcMethod,
        (Material, SpaceGroup) | (SpaceGroup, Material) => RelationType::MaterialSpaceGroup,
        (Material, CrystalStructure) | (CrystalStructure, Material) => {
            RelationType::MaterialCrystalStructure
        }
        _ => {
            return Err(LinkError::UnsupportedRelation {
                left: left.to_string(),
                right: right.to_string(),
            })
        }
    };

    Ok(relation)
}

// ============================================================================
// Links
// ============================================================================

/// One side of a symmetric link between two spans
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub target_id: String,
    pub target_text: String,
    pub target_type: EntityType,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
}

impl Link {
    /// Build the link pointing at `target`
    pub fn to(target: &EntitySpan, relation_type: RelationType) -> Self {
        Self {
            target_id: target.id.clone(),
            target_text: target.text.clone(),
            target_type: target.entity_type.clone(),
            relation_type,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
