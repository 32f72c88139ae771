//! Tag-group registry.
//!
//! A tag group is a named collection of related tags, typically generated
//! from one attribute field per storefront and language. Groups created by
//! the attribute generator are looked up by their (title, working title,
//! generator) identity so re-runs reuse them instead of multiplying.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::index::list;

/// A tag group record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TagGroup {
    /// Unique identifier (UUIDv7).
    pub id: Uuid,

    /// Project scope.
    pub project: String,

    /// Language scope.
    pub language: String,

    /// Human title (usually the generating field's title).
    pub title: String,

    /// Stable machine identity, independent of title edits.
    pub working_title: String,

    /// Provenance: what created the group.
    pub generator: String,

    /// Delimited list of member tag names.
    pub tags: String,

    /// Unix timestamp when created.
    pub created: i64,
}

impl TagGroup {
    /// Member tag names as a set.
    pub fn tag_names(&self) -> BTreeSet<String> {
        list::parse(&self.tags)
    }

    /// Find a group by id.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>> {
        let group = sqlx::query_as::<_, Self>(
            "SELECT id, project, language, title, working_title, generator, tags, created FROM tag_group WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch tag group")?;

        Ok(group)
    }

    /// Find a group by its (title, working title, generator) identity.
    pub async fn find_by_identity(
        pool: &PgPool,
        project: &str,
        language: &str,
        title: &str,
        working_title: &str,
        generator: &str,
    ) -> Result<Option<Self>> {
        let group = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, project, language, title, working_title, generator, tags, created
            FROM tag_group
            WHERE project = $1 AND language = $2 AND title = $3
              AND working_title = $4 AND generator = $5
            "#,
        )
        .bind(project)
        .bind(language)
        .bind(title)
        .bind(working_title)
        .bind(generator)
        .fetch_optional(pool)
        .await
        .context("failed to fetch tag group by identity")?;

        Ok(group)
    }

    /// List every group created by one generator.
    pub async fn list_by_generator(pool: &PgPool, generator: &str) -> Result<Vec<Self>> {
        let groups = sqlx::query_as::<_, Self>(
            "SELECT id, project, language, title, working_title, generator, tags, created FROM tag_group WHERE generator = $1 ORDER BY project, language, working_title",
        )
        .bind(generator)
        .fetch_all(pool)
        .await
        .context("failed to list tag groups by generator")?;

        Ok(groups)
    }

    /// Create a group.
    pub async fn create(
        pool: &PgPool,
        project: &str,
        language: &str,
        title: &str,
        working_title: &str,
        generator: &str,
    ) -> Result<Self> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO tag_group (id, project, language, title, working_title, generator, tags, created)
            VALUES ($1, $2, $3, $4, $5, $6, ',,', $7)
            "#,
        )
        .bind(id)
        .bind(project)
        .bind(language)
        .bind(title)
        .bind(working_title)
        .bind(generator)
        .bind(now)
        .execute(pool)
        .await
        .context("failed to create tag group")?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("failed to fetch created tag group"))
    }

    /// Delete a group.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tag_group WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .context("failed to delete tag group")?;

        Ok(result.rows_affected() > 0)
    }

    /// Add tags to the group's member list, deduplicated.
    pub async fn add_tags(&mut self, pool: &PgPool, tags: &BTreeSet<String>) -> Result<()> {
        let mut members = self.tag_names();
        members.extend(tags.iter().cloned());

        self.tags = list::serialize(members.iter());
        self.persist_tags(pool).await
    }

    /// Remove every member tag whose dictionary provenance matches
    /// `generator`, leaving tags created by anyone else in place.
    pub async fn remove_tags_by_generator(&mut self, pool: &PgPool, generator: &str) -> Result<()> {
        let members = self.tag_names();
        if members.is_empty() {
            return Ok(());
        }

        let provenance = crate::models::tag::Tag::generators_for(
            pool,
            &self.project,
            &self.language,
            &members,
        )
        .await?;

        let kept: BTreeSet<String> = members
            .into_iter()
            .filter(|name| provenance.get(name).is_none_or(|g| g != generator))
            .collect();

        self.tags = list::serialize(kept.iter());
        self.persist_tags(pool).await
    }

    /// Whether the group contains any tag created by a different generator.
    pub async fn has_foreign_tags(&self, pool: &PgPool, generator: &str) -> Result<bool> {
        let members = self.tag_names();
        if members.is_empty() {
            return Ok(false);
        }

        let provenance = crate::models::tag::Tag::generators_for(
            pool,
            &self.project,
            &self.language,
            &members,
        )
        .await?;

        Ok(provenance.values().any(|g| g != generator))
    }

    async fn persist_tags(&self, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE tag_group SET tags = $1 WHERE id = $2")
            .bind(&self.tags)
            .bind(self.id)
            .execute(pool)
            .await
            .context("failed to update tag group members")?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_parse_from_delimited_column() {
        let group = TagGroup {
            id: Uuid::nil(),
            project: "main".to_string(),
            language: "en".to_string(),
            title: "Color".to_string(),
            working_title: "field-7".to_string(),
            generator: "mercato/tags".to_string(),
            tags: ",red,blue,".to_string(),
            created: 0,
        };

        assert_eq!(
            group.tag_names(),
            BTreeSet::from(["blue".to_string(), "red".to_string()])
        );
    }

    #[test]
    fn empty_member_column_yields_empty_set() {
        let group = TagGroup {
            id: Uuid::nil(),
            project: "main".to_string(),
            language: "en".to_string(),
            title: "Color".to_string(),
            working_title: "field-7".to_string(),
            generator: "mercato/tags".to_string(),
            tags: ",,".to_string(),
            created: 0,
        };

        assert!(group.tag_names().is_empty());
    }
}
