//! Typed change sets.
//!
//! A [`TemplatePatch`] carries one optional slot per user-editable field.
//! A present slot replaces the stored field wholesale; nested values such as
//! `sections` or `field_definitions` are never merged key-by-key. The only
//! nullable field is `description`: a present `null` clears it.

use crate::{
    DerivedFields, FieldDefinition, Section, Template, Timestamp, ValidationError,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Keys accepted by [`TemplatePatch::from_json`].
pub const PATCHABLE_FIELDS: [&str; 4] = ["name", "description", "sections", "field_definitions"];

/// Partial update to the user-editable fields of a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(deny_unknown_fields)]
pub struct TemplatePatch {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `Some(None)` clears the stored description.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<Section>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub field_definitions: Option<BTreeMap<String, FieldDefinition>>,
}

/// Marks a key that appeared in the payload. `null` is only accepted where
/// `T` itself accepts it.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl TemplatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(Some(description.into()));
        self
    }

    pub fn clear_description(mut self) -> Self {
        self.description = Some(None);
        self
    }

    pub fn sections(mut self, sections: Vec<Section>) -> Self {
        self.sections = Some(sections);
        self
    }

    pub fn field_definitions(mut self, defs: BTreeMap<String, FieldDefinition>) -> Self {
        self.field_definitions = Some(defs);
        self
    }

    /// Parse an untyped change map.
    ///
    /// Rejects non-object payloads, keys outside [`PATCHABLE_FIELDS`] and
    /// values of the wrong shape, including `null` for any field but
    /// `description`.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(map) = &value else {
            return Err(ValidationError::InvalidPatch {
                reason: "change set must be a JSON object".to_string(),
            });
        };

        if let Some(unknown) = map.keys().find(|k| !PATCHABLE_FIELDS.contains(&k.as_str())) {
            return Err(ValidationError::UnknownField {
                field: unknown.clone(),
            });
        }

        serde_json::from_value(value).map_err(|e| ValidationError::InvalidPatch {
            reason: e.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Names of the fields this patch replaces.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.sections.is_some() {
            fields.push("sections");
        }
        if self.field_definitions.is_some() {
            fields.push("field_definitions");
        }
        fields
    }

    /// Replace every field present in the patch; leave the rest untouched.
    pub fn apply_to(&self, template: &mut Template) {
        if let Some(name) = &self.name {
            template.name = name.clone();
        }
        if let Some(description) = &self.description {
            template.description = description.clone();
        }
        if let Some(sections) = &self.sections {
            template.sections = sections.clone();
        }
        if let Some(defs) = &self.field_definitions {
            template.field_definitions = defs.clone();
        }
    }
}

/// Which writer class issued a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// Interactive caller; advances `last_user_update` to `at`.
    Live { at: Timestamp },
    /// Background recomputation; never touches `last_user_update`.
    Background,
}

impl WriteOrigin {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

/// Everything a conditional write applies to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub patch: TemplatePatch,
    pub derived: Option<DerivedFields>,
    pub origin: WriteOrigin,
}

impl ChangeSet {
    /// Change issued by an interactive caller.
    pub fn live(patch: TemplatePatch, at: Timestamp) -> Self {
        Self {
            patch,
            derived: None,
            origin: WriteOrigin::Live { at },
        }
    }

    /// Derived-field refresh issued by the background writer.
    pub fn background(derived: DerivedFields) -> Self {
        Self {
            patch: TemplatePatch::default(),
            derived: Some(derived),
            origin: WriteOrigin::Background,
        }
    }

    /// Apply the change set to `template`, stamping `updated_at` with `now`.
    ///
    /// Version handling belongs to the store; this only touches fields.
    pub fn apply_to(&self, template: &mut Template, now: Timestamp) {
        self.patch.apply_to(template);
        if let Some(derived) = &self.derived {
            template.derived = Some(derived.clone());
        }
        if let WriteOrigin::Live { at } = self.origin {
            template.last_user_update = at;
        }
        template.updated_at = now;
    }
}
