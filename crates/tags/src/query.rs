//! Storefront query API over the index tables.
//!
//! Every lookup is a single-row (or single IN) read against the
//! denormalized tables — the whole point of the write complexity on the
//! reconciliation side. Queries for a language the project does not have
//! enabled fail with a localization error instead of probing a table that
//! does not exist.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::PgPool;

use crate::error::{TagsError, TagsResult};
use crate::index::list;
use crate::index::tables::{self, TBL_PRODUCT_TAGS, TBL_SITE_TAGS, TBL_TAG_PRODUCTS};
use crate::models::{CategorySite, Product, Project, Tag};

/// Read-side API for listing pages and storefront filters.
pub struct TagQuery {
    pool: PgPool,
    project: Project,
}

impl TagQuery {
    /// Create a query API for one project.
    pub fn new(pool: PgPool, project: Project) -> Self {
        Self { pool, project }
    }

    /// Product ids carrying any of the given tags.
    pub async fn product_ids_for_tags(
        &self,
        tags: &[String],
        language: &str,
        limit: Option<usize>,
    ) -> TagsResult<Vec<i64>> {
        self.ensure_language(language).await?;

        let table = self.project.table_name(language, TBL_TAG_PRODUCTS)?;
        let wanted: BTreeSet<String> = tags.iter().cloned().collect();

        let rows = tables::tag_products_for_tags(&self.pool, &table, &wanted).await?;

        let mut ids: BTreeSet<i64> = BTreeSet::new();
        for row in rows {
            ids.extend(row.ids());
        }

        let mut ids: Vec<i64> = ids.into_iter().collect();
        if let Some(limit) = limit {
            ids.truncate(limit);
        }

        Ok(ids)
    }

    /// Products carrying any of the given tags, resolved through the
    /// product store.
    pub async fn products_for_tags(
        &self,
        tags: &[String],
        language: &str,
        limit: Option<usize>,
    ) -> TagsResult<Vec<Product>> {
        let ids = self.product_ids_for_tags(tags, language, limit).await?;

        let mut products = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(product) = Product::find_by_id(&self.pool, id).await? {
                products.push(product);
            }
        }

        Ok(products)
    }

    /// Tags currently indexed for a product.
    pub async fn tags_for_product(
        &self,
        product_id: i64,
        language: &str,
        limit: Option<usize>,
    ) -> TagsResult<Vec<String>> {
        self.ensure_language(language).await?;

        let table = self.project.table_name(language, TBL_PRODUCT_TAGS)?;

        let Some(row) = tables::product_tags_get(&self.pool, &table, product_id).await? else {
            return Ok(Vec::new());
        };

        let mut tags: Vec<String> = list::parse::<String>(&row.tags).into_iter().collect();
        if let Some(limit) = limit {
            tags.truncate(limit);
        }

        Ok(tags)
    }

    /// The cached tag union of a listing page.
    pub async fn tags_for_site(&self, site: &CategorySite) -> TagsResult<Vec<String>> {
        self.ensure_language(&site.language).await?;

        let table = self.project.table_name(&site.language, TBL_SITE_TAGS)?;

        let tags = tables::site_tags_get(&self.pool, &table, site.id)
            .await?
            .unwrap_or_default();

        Ok(tags.into_iter().collect())
    }

    /// Human titles for a set of tag names (storefront display).
    pub async fn tag_titles(
        &self,
        language: &str,
        names: &BTreeSet<String>,
    ) -> TagsResult<BTreeMap<String, String>> {
        self.ensure_language(language).await?;

        Ok(Tag::titles_for(&self.pool, &self.project.name, language, names).await?)
    }

    async fn ensure_language(&self, language: &str) -> TagsResult<()> {
        if self.project.has_language(&self.pool, language).await? {
            Ok(())
        } else {
            Err(TagsError::Localization {
                project: self.project.name.clone(),
                language: language.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for TagQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagQuery")
            .field("project", &self.project.name)
            .finish()
    }
}
