//! Storefront ("project") registry and per-language table namespacing.
//!
//! Each project is a distinct catalog deployment with its own set of
//! enabled languages. The derived index tables live per project and
//! language under namespaced names (`{project}_{lang}_{base}`), so both
//! identifiers are validated before ever reaching a table name.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// A storefront deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    /// Machine name identifier (lowercase, used in table names).
    pub name: String,

    /// Whether this is the default storefront.
    pub is_default: bool,
}

/// Validate a project machine name.
///
/// Project names become SQL identifier prefixes, so only lowercase
/// letters, digits and underscores are allowed, starting with a letter.
pub fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 32 {
        anyhow::bail!("project name must be 1-32 characters, got '{name}'");
    }

    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() => {}
        _ => anyhow::bail!("project name must start with a lowercase letter, got '{name}'"),
    }

    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    {
        anyhow::bail!(
            "project name may only contain lowercase letters, digits and underscores, got '{name}'"
        );
    }

    Ok(())
}

/// Validate that a language ID follows BCP 47 primary subtag format.
///
/// Accepts: lowercase alpha 2-3 chars, optionally followed by
/// hyphen-separated alphanumeric subtags (e.g., "en", "fr", "pt-br").
pub fn validate_language_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 12 {
        anyhow::bail!("language ID must be 1-12 characters, got '{id}'");
    }

    let mut parts = id.split('-');

    // Primary subtag: 2-3 lowercase letters
    match parts.next() {
        Some(primary) if (2..=3).contains(&primary.len()) => {
            if !primary.bytes().all(|b| b.is_ascii_lowercase()) {
                anyhow::bail!("language ID primary subtag must be lowercase letters, got '{id}'");
            }
        }
        _ => {
            anyhow::bail!("language ID must start with a 2-3 letter primary subtag, got '{id}'");
        }
    }

    // Optional subtags: alphanumeric, 1-8 chars each
    for subtag in parts {
        if subtag.is_empty()
            || subtag.len() > 8
            || !subtag.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            anyhow::bail!(
                "language ID subtag must be 1-8 alphanumeric characters, got '{subtag}' in '{id}'"
            );
        }
    }

    Ok(())
}

impl Project {
    /// Find a project by name.
    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Self>> {
        let project = sqlx::query_as::<_, Self>(
            "SELECT name, is_default FROM project WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to fetch project by name")?;

        Ok(project)
    }

    /// Get the default project.
    pub async fn get_default(pool: &PgPool) -> Result<Option<Self>> {
        let project = sqlx::query_as::<_, Self>(
            "SELECT name, is_default FROM project WHERE is_default = true",
        )
        .fetch_optional(pool)
        .await
        .context("failed to fetch default project")?;

        Ok(project)
    }

    /// List all projects ordered by name.
    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>> {
        let projects = sqlx::query_as::<_, Self>(
            "SELECT name, is_default FROM project ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .context("failed to list projects")?;

        Ok(projects)
    }

    /// Upsert a project.
    ///
    /// If `is_default` is true, clears the default flag on all other
    /// projects first.
    pub async fn upsert(pool: &PgPool, name: &str, is_default: bool) -> Result<Self> {
        validate_project_name(name)?;

        let mut tx = pool.begin().await.context("failed to start transaction")?;

        if is_default {
            sqlx::query("UPDATE project SET is_default = false WHERE name != $1")
                .bind(name)
                .execute(&mut *tx)
                .await
                .context("failed to clear previous default project")?;
        }

        let project = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO project (name, is_default)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET is_default = EXCLUDED.is_default
            RETURNING name, is_default
            "#,
        )
        .bind(name)
        .bind(is_default)
        .fetch_one(&mut *tx)
        .await
        .context("failed to upsert project")?;

        tx.commit().await.context("failed to commit transaction")?;

        Ok(project)
    }

    /// List the languages enabled for this project, ordered by id.
    pub async fn languages(&self, pool: &PgPool) -> Result<Vec<String>> {
        let languages: Vec<String> = sqlx::query_scalar(
            "SELECT language FROM project_language WHERE project = $1 ORDER BY language",
        )
        .bind(&self.name)
        .fetch_all(pool)
        .await
        .context("failed to list project languages")?;

        Ok(languages)
    }

    /// Check whether a language is enabled for this project.
    pub async fn has_language(&self, pool: &PgPool, language: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM project_language WHERE project = $1 AND language = $2)",
        )
        .bind(&self.name)
        .bind(language)
        .fetch_one(pool)
        .await
        .context("failed to check project language")?;

        Ok(exists)
    }

    /// Enable a language for this project.
    pub async fn add_language(&self, pool: &PgPool, language: &str) -> Result<()> {
        validate_language_id(language)?;

        sqlx::query(
            r#"
            INSERT INTO project_language (project, language)
            VALUES ($1, $2)
            ON CONFLICT (project, language) DO NOTHING
            "#,
        )
        .bind(&self.name)
        .bind(language)
        .execute(pool)
        .await
        .context("failed to add project language")?;

        Ok(())
    }

    /// Resolve the namespaced table name for a per-language table.
    ///
    /// Both the project name (validated on insert) and the language are
    /// re-validated here so a table name can never smuggle in arbitrary
    /// SQL identifiers.
    pub fn table_name(&self, language: &str, base: &str) -> Result<String> {
        validate_project_name(&self.name)?;
        validate_language_id(language)?;

        let normalized = language.replace('-', "_");
        Ok(format!("{}_{normalized}_{base}", self.name))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn validate_project_name_accepts_valid() {
        assert!(validate_project_name("main").is_ok());
        assert!(validate_project_name("shop_b2b").is_ok());
        assert!(validate_project_name("a1").is_ok());
    }

    #[test]
    fn validate_project_name_rejects_invalid() {
        assert!(validate_project_name("").is_err(), "empty");
        assert!(validate_project_name("Main").is_err(), "uppercase");
        assert!(validate_project_name("1shop").is_err(), "leading digit");
        assert!(validate_project_name("shop-b2b").is_err(), "hyphen");
        assert!(validate_project_name("shop;drop").is_err(), "injection");
        let long = "a".repeat(33);
        assert!(validate_project_name(&long).is_err(), "too long");
    }

    #[test]
    fn validate_language_id_accepts_valid() {
        assert!(validate_language_id("en").is_ok());
        assert!(validate_language_id("de").is_ok());
        assert!(validate_language_id("pt-br").is_ok());
        assert!(validate_language_id("ast").is_ok());
    }

    #[test]
    fn validate_language_id_rejects_invalid() {
        assert!(validate_language_id("").is_err(), "empty");
        assert!(validate_language_id("e").is_err(), "too short");
        assert!(validate_language_id("EN").is_err(), "uppercase");
        assert!(validate_language_id("en us").is_err(), "space");
        assert!(validate_language_id("en-").is_err(), "trailing hyphen");
        assert!(validate_language_id("../x").is_err(), "path traversal");
    }

    #[test]
    fn table_name_namespaces_per_language() {
        let project = Project {
            name: "main".to_string(),
            is_default: true,
        };

        assert_eq!(
            project.table_name("en", "product_tags").unwrap(),
            "main_en_product_tags"
        );
        assert_eq!(
            project.table_name("pt-br", "tag_products").unwrap(),
            "main_pt_br_tag_products"
        );
    }

    #[test]
    fn table_name_rejects_bad_identifiers() {
        let project = Project {
            name: "main".to_string(),
            is_default: true,
        };
        assert!(project.table_name("EN", "product_tags").is_err());

        let bad = Project {
            name: "m;drop table".to_string(),
            is_default: false,
        };
        assert!(bad.table_name("en", "product_tags").is_err());
    }
}
