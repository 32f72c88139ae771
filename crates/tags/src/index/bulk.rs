//! Full index rebuild.
//!
//! Truncates the product → tags and tag → products tables for every
//! configured language and repopulates them from every active product's
//! authoritative tag data, then rebuilds the listing-page tag cache.
//! The run is idempotent and order-independent across products; it holds
//! the index lock exclusively so no incremental save can interleave with
//! the truncate-repopulate window.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{info, warn};

use super::site_cache::CategorySiteTagCache;
use super::tables::{self, TBL_PRODUCT_TAGS, TBL_TAG_PRODUCTS};
use super::{IndexLock, list};
use crate::models::{Product, Project};

/// Outcome of a bulk rebuild.
#[derive(Debug, Clone, Default)]
pub struct BulkSummary {
    /// Products processed.
    pub products: u64,

    /// Tag rows written across all languages.
    pub tag_rows: u64,

    /// Listing pages cached.
    pub sites: u64,
}

/// Rebuilds the whole index from scratch.
pub struct BulkRegenerator {
    pool: PgPool,
    project: Project,
}

impl BulkRegenerator {
    /// Create a regenerator for one project.
    pub fn new(pool: PgPool, project: Project) -> Self {
        Self { pool, project }
    }

    /// Recompute both index tables for all active products, then rebuild
    /// the listing-page cache.
    pub async fn rebuild(&self) -> Result<BulkSummary> {
        let languages = self.project.languages(&self.pool).await?;
        let mut summary = BulkSummary::default();

        let lock = IndexLock::exclusive(&self.pool)
            .await
            .context("failed to lock index for bulk rebuild")?;

        for language in &languages {
            tables::ensure_language_tables(&self.pool, &self.project, language).await?;
            tables::truncate(
                &self.pool,
                &self.project.table_name(language, TBL_PRODUCT_TAGS)?,
            )
            .await?;
            tables::truncate(
                &self.pool,
                &self.project.table_name(language, TBL_TAG_PRODUCTS)?,
            )
            .await?;
        }

        // Accumulate the tag → products side in memory while the product
        // rows are inserted; against freshly truncated tables every write
        // is an insert, so one flush per tag row suffices.
        let mut tag_products: BTreeMap<String, BTreeMap<String, BTreeSet<i64>>> = BTreeMap::new();

        let product_ids = Product::list_active_ids(&self.pool).await?;

        for product_id in product_ids {
            if let Err(e) = self
                .index_product(product_id, &languages, &mut tag_products)
                .await
            {
                warn!(product_id, error = %e, "bulk indexing failed for product, skipping");
                continue;
            }
            summary.products += 1;
        }

        for (language, rows) in &tag_products {
            let table = self.project.table_name(language, TBL_TAG_PRODUCTS)?;

            for (tag, members) in rows {
                if members.is_empty() {
                    continue;
                }
                if let Err(e) = tables::tag_products_insert(&self.pool, &table, tag, members).await
                {
                    warn!(language, tag, error = %e, "failed to insert tag row, skipping");
                    continue;
                }
                summary.tag_rows += 1;
            }
        }

        lock.release().await?;

        let site_cache = CategorySiteTagCache::new(self.pool.clone(), self.project.clone());
        summary.sites = site_cache.rebuild().await?;

        info!(
            products = summary.products,
            tag_rows = summary.tag_rows,
            sites = summary.sites,
            "bulk tag index rebuild completed"
        );

        Ok(summary)
    }

    /// Index one product into the freshly truncated tables.
    async fn index_product(
        &self,
        product_id: i64,
        languages: &[String],
        tag_products: &mut BTreeMap<String, BTreeMap<String, BTreeSet<i64>>>,
    ) -> Result<()> {
        let Some(product) = Product::find_by_id(&self.pool, product_id).await? else {
            return Ok(());
        };
        if !product.active {
            return Ok(());
        }

        let field = product.tag_field();

        for language in languages {
            let current: BTreeSet<String> = field.tag_list(language).into_iter().collect();
            if current.is_empty() {
                continue;
            }

            let table = self.project.table_name(language, TBL_PRODUCT_TAGS)?;
            tables::product_tags_upsert(&self.pool, &table, product.id, &current, false).await?;

            Product::write_cache_tags(
                &self.pool,
                product.id,
                language,
                &list::serialize(current.iter()),
            )
            .await?;

            let rows = tag_products.entry(language.clone()).or_default();
            for tag in current {
                rows.entry(tag).or_default().insert(product.id);
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for BulkRegenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkRegenerator")
            .field("project", &self.project.name)
            .finish()
    }
}
