//! The three derived index tables.
//!
//! Per project and language the engine owns `{p}_{l}_product_tags` (one
//! row per product), `{p}_{l}_tag_products` (one row per tag) and
//! `{p}_{l}_site_tags` (one row per listing page), each holding a
//! delimited list column for single-row-lookup reads. Table names are
//! resolved at runtime, so every statement is built with SeaQuery against
//! validated identifiers instead of string-spliced SQL.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use sea_query::{Alias, ColumnDef, Expr, PostgresQueryBuilder, Query, Table};
use sqlx::PgPool;

use super::list;
use crate::models::Project;

/// Base name of the product → tags table.
pub const TBL_PRODUCT_TAGS: &str = "product_tags";

/// Base name of the tag → products table.
pub const TBL_TAG_PRODUCTS: &str = "tag_products";

/// Base name of the listing-page tag cache table.
pub const TBL_SITE_TAGS: &str = "site_tags";

/// A product → tags index row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProductTagsRow {
    pub id: i64,
    pub tags: String,
}

/// A tag → products index row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TagProductsRow {
    pub tag: String,
    pub product_ids: String,
}

impl TagProductsRow {
    /// Member product ids as a set.
    pub fn ids(&self) -> BTreeSet<i64> {
        list::parse(&self.product_ids)
    }
}

/// Create the three index tables for one project language if absent.
pub async fn ensure_language_tables(
    pool: &PgPool,
    project: &Project,
    language: &str,
) -> Result<()> {
    let product_tags = project.table_name(language, TBL_PRODUCT_TAGS)?;
    let sql = Table::create()
        .table(Alias::new(&product_tags))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new("id"))
                .big_integer()
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(Alias::new("tags")).text().not_null())
        .to_string(PostgresQueryBuilder);
    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to create table {product_tags}"))?;

    let tag_products = project.table_name(language, TBL_TAG_PRODUCTS)?;
    let sql = Table::create()
        .table(Alias::new(&tag_products))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new("tag"))
                .text()
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(Alias::new("product_ids")).text().not_null())
        .to_string(PostgresQueryBuilder);
    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to create table {tag_products}"))?;

    let site_tags = project.table_name(language, TBL_SITE_TAGS)?;
    let sql = Table::create()
        .table(Alias::new(&site_tags))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new("site_id"))
                .big_integer()
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(Alias::new("tags")).text().not_null())
        .to_string(PostgresQueryBuilder);
    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to create table {site_tags}"))?;

    Ok(())
}

/// Truncate one index table.
pub async fn truncate(pool: &PgPool, table: &str) -> Result<()> {
    let sql = Table::truncate()
        .table(Alias::new(table))
        .to_string(PostgresQueryBuilder);

    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to truncate {table}"))?;

    Ok(())
}

/// Fetch a product's index row, if any.
pub async fn product_tags_get(
    pool: &PgPool,
    table: &str,
    product_id: i64,
) -> Result<Option<ProductTagsRow>> {
    let sql = Query::select()
        .columns([Alias::new("id"), Alias::new("tags")])
        .from(Alias::new(table))
        .and_where(Expr::col(Alias::new("id")).eq(product_id))
        .to_string(PostgresQueryBuilder);

    let row = sqlx::query_as::<_, ProductTagsRow>(&sql)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch product row from {table}"))?;

    Ok(row)
}

/// Fetch the index rows of several products at once.
pub async fn product_tags_get_many(
    pool: &PgPool,
    table: &str,
    product_ids: &BTreeSet<i64>,
) -> Result<Vec<ProductTagsRow>> {
    if product_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = Query::select()
        .columns([Alias::new("id"), Alias::new("tags")])
        .from(Alias::new(table))
        .and_where(Expr::col(Alias::new("id")).is_in(product_ids.iter().copied()))
        .to_string(PostgresQueryBuilder);

    let rows = sqlx::query_as::<_, ProductTagsRow>(&sql)
        .fetch_all(pool)
        .await
        .with_context(|| format!("failed to fetch product rows from {table}"))?;

    Ok(rows)
}

/// Insert or update a product's index row.
pub async fn product_tags_upsert(
    pool: &PgPool,
    table: &str,
    product_id: i64,
    tags: &BTreeSet<String>,
    exists: bool,
) -> Result<()> {
    let raw = list::serialize(tags.iter());

    let sql = if exists {
        Query::update()
            .table(Alias::new(table))
            .values([(Alias::new("tags"), raw.into())])
            .and_where(Expr::col(Alias::new("id")).eq(product_id))
            .to_string(PostgresQueryBuilder)
    } else {
        Query::insert()
            .into_table(Alias::new(table))
            .columns([Alias::new("id"), Alias::new("tags")])
            .values_panic([product_id.into(), raw.into()])
            .to_string(PostgresQueryBuilder)
    };

    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to write product row in {table}"))?;

    Ok(())
}

/// Delete a product's index row.
pub async fn product_tags_delete(pool: &PgPool, table: &str, product_id: i64) -> Result<()> {
    let sql = Query::delete()
        .from_table(Alias::new(table))
        .and_where(Expr::col(Alias::new("id")).eq(product_id))
        .to_string(PostgresQueryBuilder);

    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete product row from {table}"))?;

    Ok(())
}

/// Fetch every tag row whose product list contains the given product.
pub async fn tag_products_with_product(
    pool: &PgPool,
    table: &str,
    product_id: i64,
) -> Result<Vec<TagProductsRow>> {
    let sql = Query::select()
        .columns([Alias::new("tag"), Alias::new("product_ids")])
        .from(Alias::new(table))
        .and_where(Expr::col(Alias::new("product_ids")).like(list::like_pattern(product_id)))
        .to_string(PostgresQueryBuilder);

    let rows = sqlx::query_as::<_, TagProductsRow>(&sql)
        .fetch_all(pool)
        .await
        .with_context(|| format!("failed to probe tag rows in {table}"))?;

    Ok(rows)
}

/// Fetch the rows of specific tags.
pub async fn tag_products_for_tags(
    pool: &PgPool,
    table: &str,
    tags: &BTreeSet<String>,
) -> Result<Vec<TagProductsRow>> {
    if tags.is_empty() {
        return Ok(Vec::new());
    }

    let sql = Query::select()
        .columns([Alias::new("tag"), Alias::new("product_ids")])
        .from(Alias::new(table))
        .and_where(Expr::col(Alias::new("tag")).is_in(tags.iter().cloned()))
        .to_string(PostgresQueryBuilder);

    let rows = sqlx::query_as::<_, TagProductsRow>(&sql)
        .fetch_all(pool)
        .await
        .with_context(|| format!("failed to fetch tag rows from {table}"))?;

    Ok(rows)
}

/// Insert a tag row.
pub async fn tag_products_insert(
    pool: &PgPool,
    table: &str,
    tag: &str,
    product_ids: &BTreeSet<i64>,
) -> Result<()> {
    let sql = Query::insert()
        .into_table(Alias::new(table))
        .columns([Alias::new("tag"), Alias::new("product_ids")])
        .values_panic([tag.into(), list::serialize(product_ids.iter()).into()])
        .to_string(PostgresQueryBuilder);

    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to insert tag row into {table}"))?;

    Ok(())
}

/// Update a tag row's product list.
pub async fn tag_products_update(
    pool: &PgPool,
    table: &str,
    tag: &str,
    product_ids: &BTreeSet<i64>,
) -> Result<()> {
    let sql = Query::update()
        .table(Alias::new(table))
        .values([(
            Alias::new("product_ids"),
            list::serialize(product_ids.iter()).into(),
        )])
        .and_where(Expr::col(Alias::new("tag")).eq(tag))
        .to_string(PostgresQueryBuilder);

    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to update tag row in {table}"))?;

    Ok(())
}

/// Delete a set of tag rows.
pub async fn tag_products_delete(
    pool: &PgPool,
    table: &str,
    tags: &BTreeSet<String>,
) -> Result<()> {
    if tags.is_empty() {
        return Ok(());
    }

    let sql = Query::delete()
        .from_table(Alias::new(table))
        .and_where(Expr::col(Alias::new("tag")).is_in(tags.iter().cloned()))
        .to_string(PostgresQueryBuilder);

    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete tag rows from {table}"))?;

    Ok(())
}

/// Insert a listing-page tag row.
pub async fn site_tags_insert(
    pool: &PgPool,
    table: &str,
    site_id: i64,
    tags: &BTreeSet<String>,
) -> Result<()> {
    let sql = Query::insert()
        .into_table(Alias::new(table))
        .columns([Alias::new("site_id"), Alias::new("tags")])
        .values_panic([site_id.into(), list::serialize(tags.iter()).into()])
        .to_string(PostgresQueryBuilder);

    sqlx::query(&sql)
        .execute(pool)
        .await
        .with_context(|| format!("failed to insert site row into {table}"))?;

    Ok(())
}

/// Fetch a listing page's cached tag list.
pub async fn site_tags_get(
    pool: &PgPool,
    table: &str,
    site_id: i64,
) -> Result<Option<BTreeSet<String>>> {
    let sql = Query::select()
        .column(Alias::new("tags"))
        .from(Alias::new(table))
        .and_where(Expr::col(Alias::new("site_id")).eq(site_id))
        .to_string(PostgresQueryBuilder);

    let raw: Option<String> = sqlx::query_scalar(&sql)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch site row from {table}"))?;

    Ok(raw.map(|raw| list::parse(&raw)))
}
