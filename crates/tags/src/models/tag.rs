//! Tag dictionary, assignment provenance and the product tag field.
//!
//! A tag is an opaque internal name scoped to (project, language), carrying
//! a human title and a provenance marker recording what created it. Tags are
//! de-duplicated by title within that scope: the same title never produces
//! two internal names.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Characters stripped from titles when deriving internal tag names.
///
/// # Panics
///
/// Panics if the hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static NAME_STRIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex literal"));

/// Derive the opaque internal tag name from a human title.
///
/// Lowercases and strips every non-alphanumeric run, so "Signal Red" and
/// "signal-red" map to the same name.
pub fn clear_tag_name(title: &str) -> String {
    NAME_STRIP.replace_all(&title.to_lowercase(), "").into_owned()
}

/// Provenance marker on a tag or tag assignment.
///
/// Records what created it: a human editor or a specific automated
/// process. Provenance is always explicit, never inferred.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Generator {
    /// A human editor.
    User,
    /// An automated process, identified by its package-style id.
    Named(String),
}

impl Generator {
    /// Build a generator from its string id.
    pub fn named(id: impl Into<String>) -> Self {
        let id = id.into();
        if id == "user" {
            Generator::User
        } else {
            Generator::Named(id)
        }
    }

    /// The string id stored on disk.
    pub fn id(&self) -> &str {
        match self {
            Generator::User => "user",
            Generator::Named(id) => id,
        }
    }

    /// Whether this marks a human edit.
    pub fn is_user(&self) -> bool {
        matches!(self, Generator::User)
    }
}

impl From<String> for Generator {
    fn from(id: String) -> Self {
        Generator::named(id)
    }
}

impl From<Generator> for String {
    fn from(generator: Generator) -> Self {
        generator.id().to_string()
    }
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// One (tag, generator) pair attached to a product for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagAssignment {
    /// Internal tag name.
    pub tag: String,

    /// What created this assignment.
    pub generator: Generator,
}

impl TagAssignment {
    /// Create an assignment.
    pub fn new(tag: impl Into<String>, generator: Generator) -> Self {
        Self {
            tag: tag.into(),
            generator,
        }
    }
}

/// The product tag field: per language, an ordered list of assignments.
///
/// This is the authoritative source the index tables are derived from.
/// It is mutated only by admin edits and by the attribute tag generator
/// under its own identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagField(BTreeMap<String, Vec<TagAssignment>>);

impl TagField {
    /// Empty field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the field from its JSONB storage value.
    ///
    /// Malformed or null values yield an empty field, mirroring how the
    /// admin control tolerates legacy data.
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Serialize the field to its JSONB storage value.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Languages that currently carry assignments.
    pub fn languages(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    /// Assignments for one language.
    pub fn assignments(&self, language: &str) -> &[TagAssignment] {
        self.0.get(language).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Unique tag names for one language, in first-seen order.
    pub fn tag_list(&self, language: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut tags = Vec::new();
        for assignment in self.assignments(language) {
            if seen.insert(assignment.tag.as_str()) {
                tags.push(assignment.tag.clone());
            }
        }
        tags
    }

    /// Unique tag names for one language restricted to one generator.
    pub fn tag_list_by_generator(&self, language: &str, generator: &Generator) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut tags = Vec::new();
        for assignment in self.assignments(language) {
            if &assignment.generator == generator && seen.insert(assignment.tag.as_str()) {
                tags.push(assignment.tag.clone());
            }
        }
        tags
    }

    /// Add a single assignment, collapsing (tag, generator) duplicates.
    pub fn add_tag(&mut self, language: &str, tag: impl Into<String>, generator: Generator) {
        let assignment = TagAssignment::new(tag, generator);
        let entries = self.0.entry(language.to_string()).or_default();
        if !entries.contains(&assignment) {
            entries.push(assignment);
        }
    }

    /// Add several assignments under one generator.
    pub fn add_tags<I, S>(&mut self, language: &str, tags: I, generator: &Generator)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            self.add_tag(language, tag, generator.clone());
        }
    }

    /// Remove every assignment of one tag for one language.
    pub fn remove_tag(&mut self, language: &str, tag: &str) {
        if let Some(entries) = self.0.get_mut(language) {
            entries.retain(|a| a.tag != tag);
            if entries.is_empty() {
                self.0.remove(language);
            }
        }
    }

    /// Remove assignments for one language.
    ///
    /// With a generator, only that generator's assignments are removed;
    /// without one the whole language is cleared.
    pub fn remove_tags(&mut self, language: &str, generator: Option<&Generator>) {
        match generator {
            None => {
                self.0.remove(language);
            }
            Some(generator) => {
                if let Some(entries) = self.0.get_mut(language) {
                    entries.retain(|a| &a.generator != generator);
                    if entries.is_empty() {
                        self.0.remove(language);
                    }
                }
            }
        }
    }

    /// Replace one generator's assignments for a language with `tags`.
    ///
    /// User assignments and other generators' assignments are untouched.
    pub fn set_generated(
        &mut self,
        language: &str,
        tags: &BTreeSet<String>,
        generator: &Generator,
    ) {
        self.remove_tags(language, Some(generator));
        self.add_tags(language, tags.iter().cloned(), generator);
    }

    /// Normalize the field against the configured languages and the tag
    /// dictionary.
    ///
    /// Drops assignments with an empty tag or generator, assignments whose
    /// tag is unknown to the dictionary for that language, and duplicate
    /// (tag, generator) pairs. Languages outside `languages` are dropped
    /// entirely.
    pub fn cleanup(
        &self,
        languages: &[String],
        known: &BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        let mut result = BTreeMap::new();

        for language in languages {
            let Some(valid) = known.get(language) else {
                continue;
            };

            let mut kept: Vec<TagAssignment> = Vec::new();
            for assignment in self.assignments(language) {
                if assignment.tag.is_empty() || assignment.generator.id().is_empty() {
                    continue;
                }
                if !valid.contains(&assignment.tag) {
                    continue;
                }
                if kept.contains(assignment) {
                    continue;
                }
                kept.push(assignment.clone());
            }

            if !kept.is_empty() {
                result.insert(language.clone(), kept);
            }
        }

        Self(result)
    }
}

/// A dictionary entry: tag metadata per (project, language).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    /// Project scope.
    pub project: String,

    /// Language scope.
    pub language: String,

    /// Opaque internal name.
    pub name: String,

    /// Human title.
    pub title: String,

    /// Optional image reference.
    pub image: Option<String>,

    /// Provenance: "user" or an automation id.
    pub generator: String,

    /// Unix timestamp when created.
    pub created: i64,
}

impl Tag {
    /// Provenance as a typed marker.
    pub fn provenance(&self) -> Generator {
        Generator::named(self.generator.clone())
    }

    /// Check whether a tag name exists in the dictionary.
    pub async fn exists(
        pool: &PgPool,
        project: &str,
        language: &str,
        name: &str,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM tag WHERE project = $1 AND language = $2 AND name = $3)",
        )
        .bind(project)
        .bind(language)
        .bind(name)
        .fetch_one(pool)
        .await
        .context("failed to check tag existence")?;

        Ok(exists)
    }

    /// Find a tag by name.
    pub async fn find(
        pool: &PgPool,
        project: &str,
        language: &str,
        name: &str,
    ) -> Result<Option<Self>> {
        let tag = sqlx::query_as::<_, Self>(
            "SELECT project, language, name, title, image, generator, created FROM tag WHERE project = $1 AND language = $2 AND name = $3",
        )
        .bind(project)
        .bind(language)
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to fetch tag")?;

        Ok(tag)
    }

    /// Find a tag by its human title.
    pub async fn find_by_title(
        pool: &PgPool,
        project: &str,
        language: &str,
        title: &str,
    ) -> Result<Option<Self>> {
        let tag = sqlx::query_as::<_, Self>(
            "SELECT project, language, name, title, image, generator, created FROM tag WHERE project = $1 AND language = $2 AND title = $3",
        )
        .bind(project)
        .bind(language)
        .bind(title)
        .fetch_optional(pool)
        .await
        .context("failed to fetch tag by title")?;

        Ok(tag)
    }

    /// Find the names of all known tags for one (project, language).
    pub async fn list_names(pool: &PgPool, project: &str, language: &str) -> Result<BTreeSet<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM tag WHERE project = $1 AND language = $2",
        )
        .bind(project)
        .bind(language)
        .fetch_all(pool)
        .await
        .context("failed to list tag names")?;

        Ok(names.into_iter().collect())
    }

    /// Resolve the human titles of a set of tag names.
    pub async fn titles_for(
        pool: &PgPool,
        project: &str,
        language: &str,
        names: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, String>> {
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, title FROM tag WHERE project = $1 AND language = $2 AND name = ANY($3)",
        )
        .bind(project)
        .bind(language)
        .bind(names.iter().cloned().collect::<Vec<_>>())
        .fetch_all(pool)
        .await
        .context("failed to resolve tag titles")?;

        Ok(rows.into_iter().collect())
    }

    /// Find the generator marker of each given tag name.
    pub async fn generators_for(
        pool: &PgPool,
        project: &str,
        language: &str,
        names: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, String>> {
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, generator FROM tag WHERE project = $1 AND language = $2 AND name = ANY($3)",
        )
        .bind(project)
        .bind(language)
        .bind(names.iter().cloned().collect::<Vec<_>>())
        .fetch_all(pool)
        .await
        .context("failed to resolve tag generators")?;

        Ok(rows.into_iter().collect())
    }

    /// Get the tag for a title, creating it if absent.
    ///
    /// The title lookup runs first so the same title never produces two
    /// internal names; a reused tag keeps its original provenance.
    pub async fn get_or_create(
        pool: &PgPool,
        project: &str,
        language: &str,
        title: &str,
        image: Option<&str>,
        generator: &Generator,
    ) -> Result<Self> {
        if let Some(existing) = Self::find_by_title(pool, project, language, title).await? {
            return Ok(existing);
        }

        let name = clear_tag_name(title);
        if name.is_empty() {
            anyhow::bail!("title '{title}' yields an empty tag name");
        }

        // A concurrent create of the same name or title loses the race
        // harmlessly: DO NOTHING, then read back whichever row won.
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO tag (project, language, name, title, image, generator, created)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(project)
        .bind(language)
        .bind(&name)
        .bind(title)
        .bind(image)
        .bind(generator.id())
        .bind(now)
        .execute(pool)
        .await
        .context("failed to create tag")?;

        Self::find(pool, project, language, &name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("failed to fetch created tag '{name}'"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn clear_tag_name_strips_and_lowercases() {
        assert_eq!(clear_tag_name("Red"), "red");
        assert_eq!(clear_tag_name("Signal Red"), "signalred");
        assert_eq!(clear_tag_name("signal-red"), "signalred");
        assert_eq!(clear_tag_name("100% Cotton!"), "100cotton");
    }

    #[test]
    fn clear_tag_name_is_stable() {
        assert_eq!(clear_tag_name("Blue"), clear_tag_name("  blue  "));
    }

    #[test]
    fn generator_round_trips_through_strings() {
        assert_eq!(Generator::named("user"), Generator::User);
        assert_eq!(Generator::named("mercato/tags").id(), "mercato/tags");

        let json = serde_json::to_string(&Generator::User).unwrap();
        assert_eq!(json, "\"user\"");
        let parsed: Generator = serde_json::from_str("\"mercato/tags\"").unwrap();
        assert_eq!(parsed, Generator::Named("mercato/tags".to_string()));
    }

    #[test]
    fn tag_field_serde_round_trip() {
        let mut field = TagField::new();
        field.add_tag("en", "red", Generator::User);
        field.add_tag("en", "blue", Generator::named("mercato/tags"));
        field.add_tag("de", "rot", Generator::User);

        let value = field.to_value();
        let parsed = TagField::from_value(&value);
        assert_eq!(parsed, field);
        assert_eq!(parsed.tag_list("en"), vec!["red", "blue"]);
    }

    #[test]
    fn tag_field_tolerates_malformed_storage() {
        let field = TagField::from_value(&serde_json::Value::Null);
        assert!(field.languages().is_empty());

        let field = TagField::from_value(&serde_json::json!("garbage"));
        assert!(field.languages().is_empty());
    }

    #[test]
    fn duplicate_assignments_collapse_per_generator() {
        let mut field = TagField::new();
        field.add_tag("en", "red", Generator::User);
        field.add_tag("en", "red", Generator::User);
        field.add_tag("en", "red", Generator::named("mercato/tags"));

        // same tag may appear once per distinct generator
        assert_eq!(field.assignments("en").len(), 2);
        assert_eq!(field.tag_list("en"), vec!["red"]);
    }

    #[test]
    fn remove_tags_by_generator_spares_user_assignments() {
        let generator = Generator::named("mercato/tags");
        let mut field = TagField::new();
        field.add_tag("en", "red", Generator::User);
        field.add_tag("en", "blue", generator.clone());

        field.remove_tags("en", Some(&generator));

        assert_eq!(field.tag_list("en"), vec!["red"]);
    }

    #[test]
    fn remove_tags_without_generator_clears_language() {
        let mut field = TagField::new();
        field.add_tag("en", "red", Generator::User);
        field.add_tag("de", "rot", Generator::User);

        field.remove_tags("en", None);

        assert!(field.assignments("en").is_empty());
        assert_eq!(field.tag_list("de"), vec!["rot"]);
    }

    #[test]
    fn set_generated_replaces_only_own_tags() {
        let generator = Generator::named("mercato/tags");
        let mut field = TagField::new();
        field.add_tag("en", "handmade", Generator::User);
        field.add_tag("en", "red", generator.clone());
        field.add_tag("en", "cotton", generator.clone());

        let next = BTreeSet::from(["blue".to_string()]);
        field.set_generated("en", &next, &generator);

        assert_eq!(field.tag_list("en"), vec!["handmade", "blue"]);
        assert_eq!(
            field.tag_list_by_generator("en", &generator),
            vec!["blue"]
        );
        assert_eq!(
            field.tag_list_by_generator("en", &Generator::User),
            vec!["handmade"]
        );
    }

    #[test]
    fn cleanup_drops_unknown_tags_and_foreign_languages() {
        let mut field = TagField::new();
        field.add_tag("en", "red", Generator::User);
        field.add_tag("en", "ghost", Generator::User);
        field.add_tag("xx", "red", Generator::User);

        let languages = vec!["en".to_string(), "de".to_string()];
        let known = BTreeMap::from([
            ("en".to_string(), BTreeSet::from(["red".to_string()])),
            ("de".to_string(), BTreeSet::new()),
        ]);

        let cleaned = field.cleanup(&languages, &known);

        assert_eq!(cleaned.tag_list("en"), vec!["red"]);
        assert!(cleaned.assignments("xx").is_empty());
        assert!(cleaned.assignments("de").is_empty());
    }

    #[test]
    fn cleanup_collapses_duplicate_pairs() {
        let raw = serde_json::json!({
            "en": [
                {"tag": "red", "generator": "user"},
                {"tag": "red", "generator": "user"},
                {"tag": "", "generator": "user"},
            ]
        });
        let field = TagField::from_value(&raw);

        let languages = vec!["en".to_string()];
        let known = BTreeMap::from([(
            "en".to_string(),
            BTreeSet::from(["red".to_string()]),
        )]);

        let cleaned = field.cleanup(&languages, &known);
        assert_eq!(cleaned.assignments("en").len(), 1);
    }
}
