//! Listing-page tag cache.
//!
//! For every listing page of every language, computes the union of tags
//! carried by active products in any linked category line and persists it
//! as a single cache row. The cache is fully rebuilt per run, never
//! incrementally patched.

use std::collections::BTreeSet;

use anyhow::Result;
use dashmap::DashMap;
use sqlx::PgPool;
use tracing::{info, warn};

use super::tables::{self, TBL_PRODUCT_TAGS, TBL_SITE_TAGS};
use crate::models::{CategorySite, Product, Project};

/// Rebuilds the per-page tag cache from the product index.
pub struct CategorySiteTagCache {
    pool: PgPool,
    project: Project,
    /// Per-run cache: category id → active product ids. Pages sharing a
    /// category line reuse the lookup within one rebuild.
    category_products: DashMap<i64, Vec<i64>>,
}

impl CategorySiteTagCache {
    /// Create a cache rebuilder for one project.
    pub fn new(pool: PgPool, project: Project) -> Self {
        Self {
            pool,
            project,
            category_products: DashMap::new(),
        }
    }

    /// Rebuild the cache for every language. Returns the number of pages
    /// persisted.
    pub async fn rebuild(&self) -> Result<u64> {
        self.category_products.clear();

        let languages = self.project.languages(&self.pool).await?;
        let mut persisted = 0u64;

        for language in &languages {
            let table = self.project.table_name(language, TBL_SITE_TAGS)?;
            tables::truncate(&self.pool, &table).await?;

            let sites =
                CategorySite::list_for_language(&self.pool, &self.project.name, language).await?;

            for site in sites {
                match self.site_tags(&site, language).await {
                    Ok(tags) if tags.is_empty() => {
                        // no row is better than an empty row
                    }
                    Ok(tags) => {
                        if let Err(e) =
                            tables::site_tags_insert(&self.pool, &table, site.id, &tags).await
                        {
                            warn!(site_id = site.id, language, error = %e, "failed to persist site tags");
                            continue;
                        }
                        persisted += 1;
                    }
                    Err(e) => {
                        warn!(site_id = site.id, language, error = %e, "failed to compute site tags, skipping page");
                    }
                }
            }
        }

        info!(pages = persisted, "listing-page tag cache rebuilt");

        Ok(persisted)
    }

    /// Union of index tags over all active products reachable from a page.
    async fn site_tags(&self, site: &CategorySite, language: &str) -> Result<BTreeSet<String>> {
        let mut product_ids: BTreeSet<i64> = BTreeSet::new();

        for category_id in site.linked_category_ids() {
            let ids = match self.category_products.get(&category_id) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched =
                        Product::list_active_ids_in_category(&self.pool, category_id).await?;
                    self.category_products.insert(category_id, fetched.clone());
                    fetched
                }
            };
            product_ids.extend(ids);
        }

        if product_ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let product_table = self.project.table_name(language, TBL_PRODUCT_TAGS)?;
        let rows = tables::product_tags_get_many(&self.pool, &product_table, &product_ids).await?;

        let mut tags = BTreeSet::new();
        for row in rows {
            tags.extend(super::list::parse::<String>(&row.tags));
        }

        Ok(tags)
    }
}

impl std::fmt::Debug for CategorySiteTagCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategorySiteTagCache")
            .field("project", &self.project.name)
            .finish()
    }
}
