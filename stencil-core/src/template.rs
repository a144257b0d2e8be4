//! Template record and its structured parts

use crate::{compute_content_hash, TemplateId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Kind of value a field collects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Checkbox,
    Select { options: Vec<String> },
}

/// Descriptor for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FieldDefinition {
    pub label: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldDefinition {
    pub fn new(label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            label: label.into(),
            kind,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// An ordered group of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Section {
    pub id: String,
    pub title: String,
    /// Field ids in display order.
    #[serde(default)]
    pub field_ids: Vec<String>,
}

impl Section {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            field_ids: Vec::new(),
        }
    }

    pub fn with_fields<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_ids = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Fields recomputed by the background writer from sections and field definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DerivedFields {
    pub section_count: usize,
    pub field_count: usize,
    pub required_field_count: usize,
    /// Defined fields no section references, sorted.
    pub unplaced_fields: Vec<String>,
    /// Hex SHA-256 over the canonical JSON of sections and field definitions.
    pub content_hash: String,
    pub computed_at: Timestamp,
}

/// The versioned template record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub field_definitions: BTreeMap<String, FieldDefinition>,
    #[serde(default)]
    pub derived: Option<DerivedFields>,
    pub version: Version,
    pub updated_at: Timestamp,
    pub last_user_update: Timestamp,
}

impl Template {
    /// Build a fresh template at `v1` with both timestamps set to `now`.
    pub fn new(id: impl Into<TemplateId>, name: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            sections: Vec::new(),
            field_definitions: BTreeMap::new(),
            derived: None,
            version: Version::from_revision(1),
            updated_at: now,
            last_user_update: now,
        }
    }

    /// Recompute the derived fields from the current sections and field definitions.
    pub fn compute_derived(&self, computed_at: Timestamp) -> DerivedFields {
        let placed: BTreeSet<&str> = self
            .sections
            .iter()
            .flat_map(|s| s.field_ids.iter().map(String::as_str))
            .collect();

        let unplaced_fields = self
            .field_definitions
            .keys()
            .filter(|id| !placed.contains(id.as_str()))
            .cloned()
            .collect();

        // BTreeMap serializes in key order, so the hash is stable across runs.
        let canonical = serde_json::to_vec(&(&self.sections, &self.field_definitions))
            .unwrap_or_default();

        DerivedFields {
            section_count: self.sections.len(),
            field_count: self.field_definitions.len(),
            required_field_count: self
                .field_definitions
                .values()
                .filter(|f| f.required)
                .count(),
            unplaced_fields,
            content_hash: hex::encode(compute_content_hash(&canonical)),
            computed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> Template {
        let mut t = Template::new("t1", "Intake", Utc::now());
        t.sections = vec![Section::new("s1", "Basics").with_fields(["email", "age"])];
        t.field_definitions.insert(
            "email".to_string(),
            FieldDefinition::new("Email", FieldKind::Text).required(),
        );
        t.field_definitions
            .insert("age".to_string(), FieldDefinition::new("Age", FieldKind::Number));
        t.field_definitions.insert(
            "notes".to_string(),
            FieldDefinition::new("Notes", FieldKind::Text),
        );
        t
    }

    #[test]
    fn test_new_template_starts_at_v1() {
        let now = Utc::now();
        let t = Template::new("t1", "Original", now);
        assert_eq!(t.version, Version::from("v1"));
        assert_eq!(t.updated_at, now);
        assert_eq!(t.last_user_update, now);
    }

    #[test]
    fn test_compute_derived_counts() {
        let derived = sample().compute_derived(Utc::now());
        assert_eq!(derived.section_count, 1);
        assert_eq!(derived.field_count, 3);
        assert_eq!(derived.required_field_count, 1);
        assert_eq!(derived.unplaced_fields, vec!["notes".to_string()]);
        assert_eq!(derived.content_hash.len(), 64);
    }

    #[test]
    fn test_content_hash_ignores_name_but_tracks_structure() {
        let now = Utc::now();
        let a = sample();
        let mut b = sample();
        b.name = "Renamed".to_string();
        assert_eq!(
            a.compute_derived(now).content_hash,
            b.compute_derived(now).content_hash
        );

        b.sections.push(Section::new("s2", "Extra"));
        assert_ne!(
            a.compute_derived(now).content_hash,
            b.compute_derived(now).content_hash
        );
    }

    #[test]
    fn test_field_kind_serde_shape() {
        let kind = FieldKind::Select {
            options: vec!["a".to_string(), "b".to_string()],
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "select");
        assert_eq!(json["options"][1], "b");
    }
}
