//! Per-product index reconciliation.
//!
//! Given a product's current, authoritative tag assignments, make the
//! product → tags and tag → products tables exactly consistent with them
//! for every configured language of the project. The decision of what to
//! write is a pure function over the fetched state ([`plan`]); the
//! surrounding service only fetches and applies.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use sqlx::PgPool;
use tracing::{debug, warn};

use super::tables::{self, TBL_PRODUCT_TAGS, TBL_TAG_PRODUCTS};
use crate::context::BulkContext;
use crate::index::list;
use crate::models::{Product, Project};

/// What to do with the product's own index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductRowAction {
    /// No row existed and no tags remain.
    #[default]
    Noop,
    /// A row existed but the product no longer has tags.
    Delete,
    /// Write the current tag list (insert or update).
    Write,
}

/// The writes needed to make the index consistent for one language.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Product → tags row action.
    pub product_row: ProductRowAction,

    /// Tag rows whose last member was this product: delete them.
    pub delete_tags: BTreeSet<String>,

    /// Tag rows to rewrite with a changed member list.
    pub update_rows: BTreeMap<String, BTreeSet<i64>>,

    /// Tag rows to create, containing only this product.
    pub insert_rows: BTreeMap<String, BTreeSet<i64>>,
}

impl ReconcilePlan {
    /// Whether the plan performs no writes at all.
    pub fn is_noop(&self) -> bool {
        self.product_row == ProductRowAction::Noop
            && self.delete_tags.is_empty()
            && self.update_rows.is_empty()
            && self.insert_rows.is_empty()
    }
}

/// Tags newly added to the product: present now but in no fetched tag row.
pub fn added_tags(
    current: &BTreeSet<String>,
    with_product: &BTreeMap<String, BTreeSet<i64>>,
) -> BTreeSet<String> {
    current
        .iter()
        .filter(|tag| !with_product.contains_key(*tag))
        .cloned()
        .collect()
}

/// Compute the reconciliation plan for one product and language.
///
/// `with_product` holds every tag row currently containing the product;
/// `existing_added` holds the rows of [`added_tags`] that already exist
/// because other products carry them.
pub fn plan(
    product_id: i64,
    current: &BTreeSet<String>,
    row_exists: bool,
    with_product: &BTreeMap<String, BTreeSet<i64>>,
    existing_added: &BTreeMap<String, BTreeSet<i64>>,
) -> ReconcilePlan {
    let mut result = ReconcilePlan {
        product_row: match (current.is_empty(), row_exists) {
            (true, true) => ProductRowAction::Delete,
            (true, false) => ProductRowAction::Noop,
            (false, _) => ProductRowAction::Write,
        },
        ..ReconcilePlan::default()
    };

    // Tags the product no longer carries: shrink or drop their rows.
    for (tag, members) in with_product {
        if current.contains(tag) {
            continue;
        }

        let mut members = members.clone();
        members.remove(&product_id);

        if members.is_empty() {
            result.delete_tags.insert(tag.clone());
        } else {
            result.update_rows.insert(tag.clone(), members);
        }
    }

    // Tags the product gained: join existing rows or create new ones.
    for tag in added_tags(current, with_product) {
        if let Some(others) = existing_added.get(&tag) {
            let mut members = others.clone();
            members.insert(product_id);
            result.update_rows.insert(tag, members);
        } else {
            result
                .insert_rows
                .insert(tag, BTreeSet::from([product_id]));
        }
    }

    result
}

/// Reconciles single products against the index tables.
pub struct IncrementalIndexer {
    pool: PgPool,
    project: Project,
}

impl IncrementalIndexer {
    /// Create an indexer for one project.
    pub fn new(pool: PgPool, project: Project) -> Self {
        Self { pool, project }
    }

    /// Make both index tables consistent with the product's current tag
    /// assignments, for every configured language.
    ///
    /// A failure in one language is logged and skipped; the remaining
    /// languages are still processed. The index self-heals on the next
    /// bulk run.
    pub async fn sync_product(&self, product: &Product, ctx: BulkContext) -> Result<()> {
        let field = product.tag_field();
        let languages = self.project.languages(&self.pool).await?;

        for language in &languages {
            let current: BTreeSet<String> = field.tag_list(language).into_iter().collect();

            if let Err(e) = self.sync_language(product.id, language, &current, ctx).await {
                warn!(
                    product_id = product.id,
                    language,
                    error = %e,
                    "tag index reconciliation failed, skipping language"
                );
            }
        }

        Ok(())
    }

    /// Reconcile one language.
    async fn sync_language(
        &self,
        product_id: i64,
        language: &str,
        current: &BTreeSet<String>,
        ctx: BulkContext,
    ) -> Result<()> {
        let product_table = self.project.table_name(language, TBL_PRODUCT_TAGS)?;
        let tag_table = self.project.table_name(language, TBL_TAG_PRODUCTS)?;

        // Fetch current index state. Fetch failures abort the language:
        // without the existing rows no correct plan can be computed.
        let row_exists = tables::product_tags_get(&self.pool, &product_table, product_id)
            .await?
            .is_some();

        let with_product: BTreeMap<String, BTreeSet<i64>> =
            tables::tag_products_with_product(&self.pool, &tag_table, product_id)
                .await?
                .into_iter()
                .map(|row| (row.tag.clone(), row.ids()))
                .collect();

        let fresh = added_tags(current, &with_product);
        let existing_added: BTreeMap<String, BTreeSet<i64>> =
            tables::tag_products_for_tags(&self.pool, &tag_table, &fresh)
                .await?
                .into_iter()
                .map(|row| (row.tag.clone(), row.ids()))
                .collect();

        let plan = plan(product_id, current, row_exists, &with_product, &existing_added);

        if plan.is_noop() {
            debug!(product_id, language, "tag index already consistent");
        }

        // Apply. Each write is individually skippable: a failed step leaves
        // that row stale rather than aborting the rest of the plan.
        match plan.product_row {
            ProductRowAction::Noop => {}
            ProductRowAction::Delete => {
                if let Err(e) = tables::product_tags_delete(&self.pool, &product_table, product_id).await
                {
                    warn!(product_id, language, error = %e, "failed to delete product row");
                }
            }
            ProductRowAction::Write => {
                if let Err(e) = tables::product_tags_upsert(
                    &self.pool,
                    &product_table,
                    product_id,
                    current,
                    row_exists,
                )
                .await
                {
                    warn!(product_id, language, error = %e, "failed to write product row");
                }
            }
        }

        if !ctx.suppress_search_cache {
            let cache_value = if current.is_empty() {
                String::new()
            } else {
                list::serialize(current.iter())
            };

            if let Err(e) =
                Product::write_cache_tags(&self.pool, product_id, language, &cache_value).await
            {
                warn!(product_id, language, error = %e, "failed to write product cache tags");
            }
        }

        if let Err(e) = tables::tag_products_delete(&self.pool, &tag_table, &plan.delete_tags).await
        {
            warn!(product_id, language, error = %e, "failed to delete emptied tag rows");
        }

        for (tag, members) in &plan.update_rows {
            if let Err(e) = tables::tag_products_update(&self.pool, &tag_table, tag, members).await
            {
                warn!(product_id, language, tag, error = %e, "failed to update tag row");
            }
        }

        for (tag, members) in &plan.insert_rows {
            if let Err(e) = tables::tag_products_insert(&self.pool, &tag_table, tag, members).await
            {
                warn!(product_id, language, tag, error = %e, "failed to insert tag row");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(entries: &[(&str, &[i64])]) -> BTreeMap<String, BTreeSet<i64>> {
        entries
            .iter()
            .map(|(tag, ids)| (tag.to_string(), ids.iter().copied().collect()))
            .collect()
    }

    #[test]
    fn empty_to_empty_is_noop() {
        let p = plan(1, &tags(&[]), false, &row(&[]), &row(&[]));
        assert!(p.is_noop());
    }

    #[test]
    fn removing_last_tag_deletes_both_rows() {
        // product 1 carried "red", alone in the tag row
        let p = plan(1, &tags(&[]), true, &row(&[("red", &[1])]), &row(&[]));

        assert_eq!(p.product_row, ProductRowAction::Delete);
        assert_eq!(p.delete_tags, tags(&["red"]));
        assert!(p.update_rows.is_empty());
        assert!(p.insert_rows.is_empty());
    }

    #[test]
    fn removing_tag_shared_with_others_shrinks_the_row() {
        let p = plan(1, &tags(&[]), true, &row(&[("red", &[1, 2])]), &row(&[]));

        assert!(p.delete_tags.is_empty());
        assert_eq!(p.update_rows["red"], BTreeSet::from([2]));
    }

    #[test]
    fn first_tag_inserts_new_row() {
        let p = plan(1, &tags(&["red"]), false, &row(&[]), &row(&[]));

        assert_eq!(p.product_row, ProductRowAction::Write);
        assert_eq!(p.insert_rows["red"], BTreeSet::from([1]));
        assert!(p.update_rows.is_empty());
    }

    #[test]
    fn joining_existing_tag_row_appends_product() {
        // "red" exists carried by products 2 and 3; product 1 adds it
        let p = plan(
            1,
            &tags(&["red"]),
            false,
            &row(&[]),
            &row(&[("red", &[2, 3])]),
        );

        assert_eq!(p.update_rows["red"], BTreeSet::from([1, 2, 3]));
        assert!(p.insert_rows.is_empty());
    }

    #[test]
    fn unchanged_tags_produce_no_tag_writes() {
        let p = plan(
            1,
            &tags(&["red", "blue"]),
            true,
            &row(&[("red", &[1, 2]), ("blue", &[1])]),
            &row(&[]),
        );

        // the product row is rewritten, but no tag row changes
        assert_eq!(p.product_row, ProductRowAction::Write);
        assert!(p.delete_tags.is_empty());
        assert!(p.update_rows.is_empty());
        assert!(p.insert_rows.is_empty());
    }

    #[test]
    fn mixed_add_and_remove() {
        // carried: red (shared), green (alone); now: red, blue (new row),
        // yellow (existing row owned by product 7)
        let p = plan(
            1,
            &tags(&["red", "blue", "yellow"]),
            true,
            &row(&[("red", &[1, 2]), ("green", &[1])]),
            &row(&[("yellow", &[7])]),
        );

        assert_eq!(p.product_row, ProductRowAction::Write);
        assert_eq!(p.delete_tags, tags(&["green"]));
        assert_eq!(p.update_rows["yellow"], BTreeSet::from([1, 7]));
        assert_eq!(p.insert_rows["blue"], BTreeSet::from([1]));
        assert!(!p.update_rows.contains_key("red"));
    }

    #[test]
    fn index_symmetry_holds_after_applying_plan() {
        // Simulate applying the plan to in-memory tables and check the
        // symmetry invariant: T ∈ tags(P) ⇔ P ∈ products(T).
        let product_id = 1;
        let current = tags(&["red", "blue"]);
        let with_product = row(&[("red", &[1, 2]), ("green", &[1, 3])]);
        let existing_added = row(&[("blue", &[2])]);

        let p = plan(product_id, &current, true, &with_product, &existing_added);

        // Reconstruct the table state after the plan.
        let mut table: BTreeMap<String, BTreeSet<i64>> = with_product.clone();
        for tag in &p.delete_tags {
            table.remove(tag);
        }
        for (tag, members) in &p.update_rows {
            table.insert(tag.clone(), members.clone());
        }
        for (tag, members) in &p.insert_rows {
            table.insert(tag.clone(), members.clone());
        }

        for tag in &current {
            assert!(
                table.get(tag).is_some_and(|m| m.contains(&product_id)),
                "product missing from row of current tag '{tag}'"
            );
        }
        for (tag, members) in &table {
            assert_eq!(
                members.contains(&product_id),
                current.contains(tag),
                "symmetry violated for tag '{tag}'"
            );
        }
    }

    #[test]
    fn plan_never_leaves_empty_rows() {
        let p = plan(
            5,
            &tags(&[]),
            true,
            &row(&[("a", &[5]), ("b", &[5, 6]), ("c", &[5])]),
            &row(&[]),
        );

        assert_eq!(p.delete_tags, tags(&["a", "c"]));
        for members in p.update_rows.values() {
            assert!(!members.is_empty());
        }
    }
}
