//! Catalog categories and listing pages.
//!
//! A category line carries the attribute fields its products share; a
//! listing page ("category site") displays the products of one primary
//! category plus any extra configured categories and exposes the tag
//! groups the generator attaches to it for storefront filtering.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::index::list;

/// A product category line.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    /// Category id.
    pub id: i64,

    /// Delimited list of attribute field ids assigned to this category.
    pub fields: String,
}

impl Category {
    /// Assigned field ids as a set.
    pub fn field_ids(&self) -> BTreeSet<i64> {
        list::parse(&self.fields)
    }

    /// Find a category by id.
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>> {
        let category =
            sqlx::query_as::<_, Self>("SELECT id, fields FROM category WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await
                .context("failed to fetch category")?;

        Ok(category)
    }

    /// List ids of categories carrying a given field.
    pub async fn list_ids_with_field(pool: &PgPool, field_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM category WHERE fields LIKE $1 ORDER BY id")
                .bind(list::like_pattern(field_id))
                .fetch_all(pool)
                .await
                .context("failed to list categories with field")?;

        Ok(ids)
    }
}

/// A storefront listing page.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CategorySite {
    /// Page id.
    pub id: i64,

    /// Project scope.
    pub project: String,

    /// Language scope.
    pub language: String,

    /// Primary linked category, if any.
    pub category_id: Option<i64>,

    /// Delimited list of extra linked category ids.
    pub extra_category_ids: String,

    /// Delimited list of attached tag-group ids.
    pub tag_groups: String,
}

impl CategorySite {
    /// All linked category ids (primary plus extras), deduplicated.
    pub fn linked_category_ids(&self) -> BTreeSet<i64> {
        let mut ids: BTreeSet<i64> = list::parse(&self.extra_category_ids);
        if let Some(primary) = self.category_id {
            ids.insert(primary);
        }
        ids
    }

    /// Attached tag-group ids as a set.
    pub fn tag_group_ids(&self) -> BTreeSet<Uuid> {
        self.tag_groups
            .split(list::DELIMITER)
            .filter(|segment| !segment.is_empty())
            .filter_map(|segment| segment.parse().ok())
            .collect()
    }

    /// Find a listing page by id.
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>> {
        let site = sqlx::query_as::<_, Self>(
            "SELECT id, project, language, category_id, extra_category_ids, tag_groups FROM category_site WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch category site")?;

        Ok(site)
    }

    /// List all pages of one project and language.
    pub async fn list_for_language(
        pool: &PgPool,
        project: &str,
        language: &str,
    ) -> Result<Vec<Self>> {
        let sites = sqlx::query_as::<_, Self>(
            "SELECT id, project, language, category_id, extra_category_ids, tag_groups FROM category_site WHERE project = $1 AND language = $2 ORDER BY id",
        )
        .bind(project)
        .bind(language)
        .fetch_all(pool)
        .await
        .context("failed to list category sites")?;

        Ok(sites)
    }

    /// Attach tag-group ids to this page, deduplicated against the ids
    /// already present.
    pub async fn attach_tag_groups(&mut self, pool: &PgPool, ids: &BTreeSet<Uuid>) -> Result<()> {
        let mut attached = self.tag_group_ids();
        let before = attached.len();
        attached.extend(ids.iter().copied());

        if attached.len() == before {
            return Ok(());
        }

        self.tag_groups = list::serialize(attached.iter());

        sqlx::query("UPDATE category_site SET tag_groups = $1 WHERE id = $2")
            .bind(&self.tag_groups)
            .bind(self.id)
            .execute(pool)
            .await
            .context("failed to attach tag groups to site")?;

        Ok(())
    }

    /// Detach a tag-group id from this page, if present.
    pub async fn detach_tag_group(&mut self, pool: &PgPool, id: Uuid) -> Result<()> {
        let mut attached = self.tag_group_ids();
        if !attached.remove(&id) {
            return Ok(());
        }

        self.tag_groups = list::serialize(attached.iter());

        sqlx::query("UPDATE category_site SET tag_groups = $1 WHERE id = $2")
            .bind(&self.tag_groups)
            .bind(self.id)
            .execute(pool)
            .await
            .context("failed to detach tag group from site")?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn site() -> CategorySite {
        CategorySite {
            id: 11,
            project: "main".to_string(),
            language: "en".to_string(),
            category_id: Some(3),
            extra_category_ids: ",9,3,14,".to_string(),
            tag_groups: String::new(),
        }
    }

    #[test]
    fn linked_categories_deduplicate_primary_and_extras() {
        assert_eq!(site().linked_category_ids(), BTreeSet::from([3, 9, 14]));
    }

    #[test]
    fn linked_categories_without_primary() {
        let mut s = site();
        s.category_id = None;
        assert_eq!(s.linked_category_ids(), BTreeSet::from([3, 9, 14]));
    }

    #[test]
    fn category_field_ids_parse() {
        let category = Category {
            id: 3,
            fields: ",7,12,".to_string(),
        };
        assert_eq!(category.field_ids(), BTreeSet::from([7, 12]));
    }

    #[test]
    fn tag_group_ids_parse_as_uuids() {
        let id = Uuid::now_v7();
        let mut s = site();
        s.tag_groups = list::serialize([id]);
        assert_eq!(s.tag_group_ids(), BTreeSet::from([id]));
    }
}
