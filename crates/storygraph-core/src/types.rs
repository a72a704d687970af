//! Core domain types for the storygraph knowledge graph.
//!
//! An extraction backend turns one document into a [`KgFragment`]: a set of
//! labelled entities plus the relationships between them. Time-valued data
//! (dates, periods) is carried by relationships only.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// ── Documents ─────────────────────────────────────────────────────

/// Identifier of a source document; recorded in edge provenance lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Entities ──────────────────────────────────────────────────────

/// Primary label of an entity.
///
/// Extraction output is free text, so unknown labels are kept verbatim in
/// `Other` and cleaned up by the graph sanitizer before they reach a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityLabel {
    Person,
    Organization,
    Country,
    City,
    Role,
    Event,
    Document,
    Resource,
    Other(String),
}

impl EntityLabel {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Person => "Person",
            Self::Organization => "Organization",
            Self::Country => "Country",
            Self::City => "City",
            Self::Role => "Role",
            Self::Event => "Event",
            Self::Document => "Document",
            Self::Resource => "Resource",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for EntityLabel {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "person" => Self::Person,
            "organization" | "organisation" => Self::Organization,
            "country" => Self::Country,
            "city" => Self::City,
            "role" => Self::Role,
            "event" => Self::Event,
            "document" => Self::Document,
            "resource" => Self::Resource,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for EntityLabel {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<EntityLabel> for String {
    fn from(label: EntityLabel) -> Self {
        match label {
            EntityLabel::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity as produced by the extraction backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub label: EntityLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, label: impl Into<EntityLabel>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ── Relationships ─────────────────────────────────────────────────

/// Edge properties keyed by their declared property name.
pub type EdgeProperties = BTreeMap<&'static str, PropertyValue>;

/// A typed, directed relationship between two entity names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

impl Relationship {
    /// Property names a relationship may carry on its graph edge.
    pub const PROPERTY_KEYS: [&'static str; 5] =
        ["reasoning", "context", "date", "start_date", "end_date"];

    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        rel_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            rel_type: rel_type.into(),
            reasoning: String::new(),
            context: String::new(),
            date: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Edge properties carried by this relationship.
    ///
    /// Only present values are included: a later extraction that omits a
    /// date does not erase the date recorded by an earlier one.
    pub fn properties(&self) -> EdgeProperties {
        let mut props = EdgeProperties::new();
        if !self.reasoning.is_empty() {
            props.insert("reasoning", PropertyValue::Text(self.reasoning.clone()));
        }
        if !self.context.is_empty() {
            props.insert("context", PropertyValue::Text(self.context.clone()));
        }
        for (key, value) in [
            ("date", &self.date),
            ("start_date", &self.start_date),
            ("end_date", &self.end_date),
        ] {
            if let Some(v) = value {
                props.insert(key, PropertyValue::Text(v.clone()));
            }
        }
        props
    }
}

/// A scalar property value stored on a graph edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

// ── Fragments ─────────────────────────────────────────────────────

/// Entities and relationships extracted from one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KgFragment {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl KgFragment {
    /// Decode and validate a fragment from the backend's JSON output.
    pub fn from_json(raw: &str) -> Result<Self> {
        let fragment: KgFragment = serde_json::from_str(raw)?;
        fragment.validate()?;
        Ok(fragment)
    }

    /// Reject fragments that would create unnamed nodes or dangling edges.
    pub fn validate(&self) -> Result<()> {
        if let Some(pos) = self.entities.iter().position(|e| e.name.trim().is_empty()) {
            return Err(CoreError::InvalidFragment(format!(
                "entity #{pos} has an empty name"
            )));
        }
        if let Some(pos) = self
            .relationships
            .iter()
            .position(|r| r.source.trim().is_empty() || r.target.trim().is_empty())
        {
            return Err(CoreError::InvalidFragment(format!(
                "relationship #{pos} has an empty endpoint"
            )));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    /// Distinct entity names, in first-seen order.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.entities
            .iter()
            .map(|e| e.name.as_str())
            .filter(|n| seen.insert(*n))
            .collect()
    }
}
