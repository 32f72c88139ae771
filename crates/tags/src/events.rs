//! Product lifecycle hooks.
//!
//! The product-save hook is the single path by which ongoing edits reach
//! the derived indexes: it normalizes the tag field, persists the product
//! and reconciles the index tables, optionally followed by a targeted
//! attribute-tag pass for that product.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::context::BulkContext;
use crate::generator::AttributeTagGenerator;
use crate::index::{IncrementalIndexer, IndexLock};
use crate::models::{Field, Product, Project, Tag};

/// Product-save hook.
///
/// Reconciles the index tables with the product's current assignments
/// under a shared index lock (so a concurrent bulk rebuild is never
/// interleaved), then optionally runs the attribute generator targeted at
/// this one product.
pub fn on_product_save<'a>(
    pool: &'a PgPool,
    project: &'a Project,
    product: &'a Product,
    generate_attribute_tags: bool,
    ctx: BulkContext,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    // The generator saves products, which re-enters this hook (with
    // generation suppressed). Returning the body as an explicitly boxed
    // `Send` future breaks that mutual-recursion type cycle: callers see a
    // concrete `Send` type rather than an inference that depends on the
    // generator's future, which in turn depends on this hook.
    Box::pin(async move {
        let lock = IndexLock::shared(pool).await?;

        let indexer = IncrementalIndexer::new(pool.clone(), project.clone());
        indexer.sync_product(product, ctx).await?;

        lock.release().await?;

        if generate_attribute_tags && !ctx.suppress_generation {
            let generator = AttributeTagGenerator::new(pool.clone(), project.clone());
            let product_id = product.id;
            generator.run(Some(vec![product_id])).await?;
        }

        Ok(())
    })
}

/// Normalize the tag field, persist the product and fire the save hook.
pub async fn save_product(
    pool: &PgPool,
    project: &Project,
    product: &mut Product,
    ctx: BulkContext,
) -> Result<()> {
    let languages = project.languages(pool).await?;

    let mut known: BTreeMap<String, std::collections::BTreeSet<String>> = BTreeMap::new();
    for language in &languages {
        known.insert(
            language.clone(),
            Tag::list_names(pool, &project.name, language).await?,
        );
    }

    let cleaned = product.tag_field().cleanup(&languages, &known);
    product.set_tag_field(&cleaned);

    Product::save(pool, product).await?;

    on_product_save(pool, project, product, !ctx.suppress_generation, ctx).await
}

/// Strip stale generator-owned assignments from products that no longer
/// carry any attribute field.
///
/// Runs the generator targeted at exactly those products: with no
/// contributing fields their generated set resolves to empty and the
/// assignments are removed. Failures are logged, never propagated.
pub async fn cleanup_generated_tags(pool: &PgPool, project: &Project) -> Result<u64> {
    let field_ids: Vec<i64> = Field::list_attribute_fields(pool)
        .await?
        .into_iter()
        .map(|field| field.id)
        .collect();

    let product_ids = Product::list_active_ids_without_fields(pool, &field_ids).await?;
    if product_ids.is_empty() {
        return Ok(0);
    }

    let count = product_ids.len() as u64;
    let generator = AttributeTagGenerator::new(pool.clone(), project.clone());

    match generator.run(Some(product_ids)).await {
        Ok(summary) => {
            info!(
                candidates = count,
                changed = summary.products,
                "stripped stale generated tags"
            );
            Ok(summary.products)
        }
        Err(e) => {
            warn!(error = %e, "generated-tag cleanup failed");
            Ok(0)
        }
    }
}
