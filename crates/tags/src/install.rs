//! Idempotent schema installation.
//!
//! Creates the collaborator tables and the per-language index tables for
//! every configured project language. Re-runnable: every statement is
//! IF NOT EXISTS, and adding a language later just means running install
//! again.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::index::tables;
use crate::models::Project;

/// Statements creating the authoritative and collaborator tables.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS project (
        name TEXT PRIMARY KEY,
        is_default BOOLEAN NOT NULL DEFAULT false
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_language (
        project TEXT NOT NULL REFERENCES project(name) ON DELETE CASCADE,
        language TEXT NOT NULL,
        PRIMARY KEY (project, language)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS product (
        id BIGINT PRIMARY KEY,
        active BOOLEAN NOT NULL DEFAULT true,
        categories TEXT NOT NULL DEFAULT '',
        fields JSONB NOT NULL DEFAULT '{}',
        tags JSONB NOT NULL DEFAULT '{}',
        created BIGINT NOT NULL,
        changed BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS product_cache (
        id BIGINT NOT NULL,
        language TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (id, language)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS field (
        id BIGINT PRIMARY KEY,
        kind TEXT NOT NULL,
        titles JSONB NOT NULL DEFAULT '{}',
        options JSONB NOT NULL DEFAULT '{}',
        search_filter BOOLEAN NOT NULL DEFAULT false,
        edited BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS category (
        id BIGINT PRIMARY KEY,
        fields TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS category_site (
        id BIGINT PRIMARY KEY,
        project TEXT NOT NULL,
        language TEXT NOT NULL,
        category_id BIGINT,
        extra_category_ids TEXT NOT NULL DEFAULT '',
        tag_groups TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tag (
        project TEXT NOT NULL,
        language TEXT NOT NULL,
        name TEXT NOT NULL,
        title TEXT NOT NULL,
        image TEXT,
        generator TEXT NOT NULL DEFAULT 'user',
        created BIGINT NOT NULL,
        PRIMARY KEY (project, language, name)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS tag_title_unique
        ON tag (project, language, title)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tag_group (
        id UUID PRIMARY KEY,
        project TEXT NOT NULL,
        language TEXT NOT NULL,
        title TEXT NOT NULL,
        working_title TEXT NOT NULL,
        generator TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '',
        created BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS generator_run (
        generator TEXT PRIMARY KEY,
        last_run BIGINT NOT NULL,
        hostname TEXT NOT NULL DEFAULT ''
    )
    "#,
];

/// Create all collaborator tables.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("failed to run schema statement")?;
    }

    Ok(())
}

/// Register a project with its languages and create every table it needs.
pub async fn install(pool: &PgPool, project_name: &str, languages: &[String]) -> Result<Project> {
    ensure_schema(pool).await?;

    // The first installed project becomes the default.
    let is_default = Project::get_default(pool)
        .await?
        .is_none_or(|existing| existing.name == project_name);

    let project = Project::upsert(pool, project_name, is_default).await?;

    for language in languages {
        project.add_language(pool, language).await?;
        tables::ensure_language_tables(pool, &project, language).await?;
    }

    info!(
        project = project.name,
        languages = languages.len(),
        "installation completed"
    );

    Ok(project)
}
