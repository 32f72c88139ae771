//! Configurable product attribute fields.
//!
//! Two field kinds can generate tags: attribute lists (a configured set of
//! entries, all of whose tags apply to a product carrying the field) and
//! attribute groups (a variant dimension where a product selects exactly
//! one entry and must only receive that entry's tags). Field options are
//! stored as a JSONB blob and validated into a typed union at load time
//! rather than accessed by ad hoc key lookups.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::TagsError;

/// Field kind discriminant for attribute lists.
pub const KIND_ATTRIBUTE_LIST: &str = "attribute_list";

/// Field kind discriminant for attribute groups.
pub const KIND_ATTRIBUTE_GROUP: &str = "attribute_group";

/// A product attribute field definition.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Field {
    /// Field id, referenced from product field values and categories.
    pub id: i64,

    /// Field kind: `attribute_list` or `attribute_group`.
    pub kind: String,

    /// Field title per language.
    pub titles: serde_json::Value,

    /// Raw options blob, validated via [`Field::config`].
    pub options: serde_json::Value,

    /// Whether the field is already a default-storefront search filter
    /// (such fields are not additionally attached to listing pages).
    pub search_filter: bool,

    /// Unix timestamp of the last configuration edit.
    pub edited: i64,
}

/// One configured entry of an attribute field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeEntry {
    /// Entry value id, stored on products that select this entry.
    pub value: String,

    /// Entry title per language; each becomes a tag title.
    pub titles: BTreeMap<String, String>,

    /// Optional image carried onto the generated tag.
    #[serde(default)]
    pub image: Option<String>,
}

impl AttributeEntry {
    /// Title for one language, if configured.
    pub fn title_for(&self, language: &str) -> Option<&str> {
        self.titles.get(language).map(String::as_str)
    }
}

/// Validated attribute field options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeOptions {
    /// Whether this field generates tags at all.
    #[serde(default)]
    pub generate_tags: bool,

    /// Configured entries.
    #[serde(default)]
    pub entries: Vec<AttributeEntry>,
}

/// The typed union of tag-generating field kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldConfig {
    /// All entry tags apply to any product carrying the field.
    AttributeList(AttributeOptions),
    /// Only the selected entry's tags apply to a product.
    AttributeGroup(AttributeOptions),
}

impl FieldConfig {
    /// The shared options regardless of kind.
    pub fn options(&self) -> &AttributeOptions {
        match self {
            FieldConfig::AttributeList(options) | FieldConfig::AttributeGroup(options) => options,
        }
    }

    /// Whether this is a variant-dimension (group) field.
    pub fn is_group(&self) -> bool {
        matches!(self, FieldConfig::AttributeGroup(_))
    }
}

impl Field {
    /// Validate the options blob into the typed field union.
    ///
    /// Malformed options or an unknown kind are configuration errors: the
    /// caller logs a warning and skips the field.
    pub fn config(&self) -> Result<FieldConfig, TagsError> {
        let options: AttributeOptions = serde_json::from_value(self.options.clone())
            .map_err(|e| TagsError::Config(format!("field {}: {e}", self.id)))?;

        for entry in &options.entries {
            if entry.value.is_empty() {
                return Err(TagsError::Config(format!(
                    "field {}: entry with empty value id",
                    self.id
                )));
            }
        }

        match self.kind.as_str() {
            KIND_ATTRIBUTE_LIST => Ok(FieldConfig::AttributeList(options)),
            KIND_ATTRIBUTE_GROUP => Ok(FieldConfig::AttributeGroup(options)),
            other => Err(TagsError::Config(format!(
                "field {}: unknown kind '{other}'",
                self.id
            ))),
        }
    }

    /// Field title for one language, falling back to a stable placeholder.
    pub fn title_for(&self, language: &str) -> String {
        self.titles
            .get(language)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("field-{}", self.id))
    }

    /// Find a field by id.
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>> {
        let field = sqlx::query_as::<_, Self>(
            "SELECT id, kind, titles, options, search_filter, edited FROM field WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch field")?;

        Ok(field)
    }

    /// List all attribute fields of both tag-generating kinds.
    pub async fn list_attribute_fields(pool: &PgPool) -> Result<Vec<Self>> {
        let fields = sqlx::query_as::<_, Self>(
            "SELECT id, kind, titles, options, search_filter, edited FROM field WHERE kind = ANY($1) ORDER BY id",
        )
        .bind(vec![
            KIND_ATTRIBUTE_LIST.to_string(),
            KIND_ATTRIBUTE_GROUP.to_string(),
        ])
        .fetch_all(pool)
        .await
        .context("failed to list attribute fields")?;

        Ok(fields)
    }

    /// Record a configuration edit (bumps the edit timestamp).
    pub async fn touch(pool: &PgPool, id: i64) -> Result<()> {
        sqlx::query("UPDATE field SET edited = $1 WHERE id = $2")
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(pool)
            .await
            .context("failed to touch field")?;

        Ok(())
    }
}
