//! Product store access.
//!
//! Products are the authoritative owners of their tag data: the `tags`
//! JSONB column holds the per-language assignment lists every derived
//! index is reconciled against. Attribute field values live in the
//! `fields` JSONB column keyed by field id; category membership is a
//! delimited id list so listing pages can probe it with a single LIKE.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::index::list;
use crate::models::tag::TagField;

/// Product record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    /// Catalog product id.
    pub id: i64,

    /// Whether the product is active (inactive products are invisible to
    /// every derived index).
    pub active: bool,

    /// Delimited list of category ids this product belongs to.
    pub categories: String,

    /// Attribute field values, keyed by field id (as a JSON object key).
    pub fields: serde_json::Value,

    /// The authoritative tag field (per-language assignment lists).
    pub tags: serde_json::Value,

    /// Unix timestamp when created.
    pub created: i64,

    /// Unix timestamp when last changed.
    pub changed: i64,
}

impl Product {
    /// Category ids as a set.
    pub fn category_ids(&self) -> BTreeSet<i64> {
        list::parse(&self.categories)
    }

    /// The parsed tag field.
    pub fn tag_field(&self) -> TagField {
        TagField::from_value(&self.tags)
    }

    /// Replace the tag field.
    pub fn set_tag_field(&mut self, field: &TagField) {
        self.tags = field.to_value();
    }

    /// The selected entry value for an attribute field, if any.
    pub fn attribute_value(&self, field_id: i64) -> Option<&str> {
        self.fields.get(field_id.to_string()).and_then(|v| v.as_str())
    }

    /// Whether the product carries a value for the given field.
    pub fn has_field(&self, field_id: i64) -> bool {
        self.fields.get(field_id.to_string()).is_some()
    }

    /// Find a product by id.
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Self>> {
        let product = sqlx::query_as::<_, Self>(
            "SELECT id, active, categories, fields, tags, created, changed FROM product WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch product by id")?;

        Ok(product)
    }

    /// List all active product ids.
    pub async fn list_active_ids(pool: &PgPool) -> Result<Vec<i64>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM product WHERE active = true ORDER BY id")
                .fetch_all(pool)
                .await
                .context("failed to list active product ids")?;

        Ok(ids)
    }

    /// List active product ids belonging to a category.
    pub async fn list_active_ids_in_category(pool: &PgPool, category_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM product WHERE active = true AND categories LIKE $1 ORDER BY id",
        )
        .bind(list::like_pattern(category_id))
        .fetch_all(pool)
        .await
        .context("failed to list products in category")?;

        Ok(ids)
    }

    /// List active product ids carrying a value for any of the given fields.
    pub async fn list_active_ids_with_fields(
        pool: &PgPool,
        field_ids: &[i64],
    ) -> Result<Vec<i64>> {
        if field_ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = field_ids.iter().map(|id| id.to_string()).collect();
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM product WHERE active = true AND fields ?| $1 ORDER BY id",
        )
        .bind(&keys)
        .fetch_all(pool)
        .await
        .context("failed to list products with fields")?;

        Ok(ids)
    }

    /// List active product ids carrying no attribute field value at all.
    ///
    /// These are the products whose generator-owned assignments are stale
    /// after their attribute fields were removed.
    pub async fn list_active_ids_without_fields(
        pool: &PgPool,
        field_ids: &[i64],
    ) -> Result<Vec<i64>> {
        if field_ids.is_empty() {
            return Self::list_active_ids(pool).await;
        }

        let keys: Vec<String> = field_ids.iter().map(|id| id.to_string()).collect();
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM product WHERE active = true AND NOT (fields ?| $1) ORDER BY id",
        )
        .bind(&keys)
        .fetch_all(pool)
        .await
        .context("failed to list products without fields")?;

        Ok(ids)
    }

    /// Insert a product.
    pub async fn insert(pool: &PgPool, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product (id, active, categories, fields, tags, created, changed)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(product.id)
        .bind(product.active)
        .bind(&product.categories)
        .bind(&product.fields)
        .bind(&product.tags)
        .bind(product.created)
        .bind(product.changed)
        .execute(pool)
        .await
        .context("failed to insert product")?;

        Ok(())
    }

    /// Persist the product record.
    ///
    /// This is the raw store write; the save hook that keeps the derived
    /// indexes consistent lives in [`crate::events::save_product`].
    pub async fn save(pool: &PgPool, product: &mut Product) -> Result<()> {
        product.changed = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE product
            SET active = $1, categories = $2, fields = $3, tags = $4, changed = $5
            WHERE id = $6
            "#,
        )
        .bind(product.active)
        .bind(&product.categories)
        .bind(&product.fields)
        .bind(&product.tags)
        .bind(product.changed)
        .bind(product.id)
        .execute(pool)
        .await
        .context("failed to save product")?;

        Ok(())
    }

    /// Write the denormalized tag column of the storefront product cache.
    pub async fn write_cache_tags(
        pool: &PgPool,
        id: i64,
        language: &str,
        tags: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product_cache (id, language, tags)
            VALUES ($1, $2, $3)
            ON CONFLICT (id, language) DO UPDATE SET tags = EXCLUDED.tags
            "#,
        )
        .bind(id)
        .bind(language)
        .bind(tags)
        .execute(pool)
        .await
        .context("failed to write product cache tags")?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::tag::Generator;

    fn product() -> Product {
        Product {
            id: 42,
            active: true,
            categories: ",3,9,".to_string(),
            fields: serde_json::json!({"7": "red", "9": "m"}),
            tags: serde_json::json!({
                "en": [{"tag": "red", "generator": "user"}]
            }),
            created: 1000,
            changed: 1000,
        }
    }

    #[test]
    fn category_ids_parse_from_delimited_column() {
        assert_eq!(product().category_ids(), BTreeSet::from([3, 9]));
    }

    #[test]
    fn attribute_values_key_by_field_id() {
        let p = product();
        assert_eq!(p.attribute_value(7), Some("red"));
        assert_eq!(p.attribute_value(8), None);
        assert!(p.has_field(9));
        assert!(!p.has_field(11));
    }

    #[test]
    fn tag_field_round_trips_through_storage_value() {
        let mut p = product();
        let mut field = p.tag_field();
        assert_eq!(field.tag_list("en"), vec!["red"]);

        field.add_tag("en", "cotton", Generator::named("mercato/tags"));
        p.set_tag_field(&field);

        assert_eq!(p.tag_field().tag_list("en"), vec!["red", "cotton"]);
    }
}
