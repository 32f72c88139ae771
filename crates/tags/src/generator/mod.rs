//! Attribute tag generation.
//!
//! For every attribute field configured to generate tags, keeps a tag
//! group per storefront and language mirroring the field's entries,
//! attaches the group to the listing pages whose categories carry the
//! field, and writes the generated tags onto products under this
//! generator's identity — without ever touching user-added assignments.

mod resolve;

pub use resolve::{FieldTagMap, resolve_product_tags};

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::context::BulkContext;
use crate::events;
use crate::models::{
    Category, CategorySite, Field, FieldConfig, Generator, Product, Project, Tag, TagGroup,
};

/// Provenance id stamped on every assignment, tag and group this
/// generator creates.
pub const GENERATOR_ID: &str = "mercato/tags";

/// Outcome of one generator run.
#[derive(Debug, Clone, Default)]
pub struct GeneratorSummary {
    /// Fields whose groups and tags were synchronized.
    pub fields: u64,

    /// Products whose tag assignments changed.
    pub products: u64,

    /// Obsolete groups deleted.
    pub groups_deleted: u64,
}

/// Fetch the generator's last successful full-run timestamp.
pub async fn last_run(pool: &PgPool, generator: &str) -> Result<i64> {
    let ts: Option<i64> =
        sqlx::query_scalar("SELECT last_run FROM generator_run WHERE generator = $1")
            .bind(generator)
            .fetch_optional(pool)
            .await
            .context("failed to fetch generator run state")?;

    Ok(ts.unwrap_or(0))
}

/// Record a successful full run.
pub async fn record_run(pool: &PgPool, generator: &str, timestamp: i64) -> Result<()> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    sqlx::query(
        r#"
        INSERT INTO generator_run (generator, last_run, hostname)
        VALUES ($1, $2, $3)
        ON CONFLICT (generator) DO UPDATE SET
            last_run = EXCLUDED.last_run,
            hostname = EXCLUDED.hostname
        "#,
    )
    .bind(generator)
    .bind(timestamp)
    .bind(host)
    .execute(pool)
    .await
    .context("failed to record generator run")?;

    Ok(())
}

/// Derives tags from attribute fields and reconciles them onto products.
pub struct AttributeTagGenerator {
    pool: PgPool,
    project: Project,
}

impl AttributeTagGenerator {
    /// Create a generator bound to the default project.
    pub fn new(pool: PgPool, project: Project) -> Self {
        Self { pool, project }
    }

    /// Run the generator.
    ///
    /// Without `product_ids` this is an incremental run: fields whose
    /// configuration was not edited since the last successful run are
    /// skipped for group work, and only products carrying an edited field
    /// are reprocessed. An explicit id list bypasses the edit filter and
    /// reprocesses exactly those products.
    pub async fn run(&self, product_ids: Option<Vec<i64>>) -> Result<GeneratorSummary> {
        let targeted = product_ids.is_some();
        let started = chrono::Utc::now().timestamp();
        let last = last_run(&self.pool, GENERATOR_ID).await?;

        let mut summary = GeneratorSummary::default();
        let generator = Generator::named(GENERATOR_ID);
        let projects = Project::list_all(&self.pool).await?;
        let default_languages = self.project.languages(&self.pool).await?;

        // Validate configured fields; configuration errors skip the field.
        let mut generating: Vec<(Field, FieldConfig)> = Vec::new();
        for field in Field::list_attribute_fields(&self.pool).await? {
            match field.config() {
                Ok(config) if config.options().generate_tags => {
                    generating.push((field, config));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(field_id = field.id, error = %e, "skipping misconfigured field");
                }
            }
        }

        // Build the field → tag map for the default project (all
        // generating fields, so product reconciliation always sees the
        // full picture), and synchronize groups for qualifying fields
        // across every storefront.
        let mut map = FieldTagMap::default();

        for (field, config) in &generating {
            let qualifying = targeted || field.edited > last;

            for entry in &config.options().entries {
                for language in &default_languages {
                    let Some(title) = entry.title_for(language) else {
                        continue;
                    };

                    let tag = match Tag::get_or_create(
                        &self.pool,
                        &self.project.name,
                        language,
                        title,
                        entry.image.as_deref(),
                        &generator,
                    )
                    .await
                    {
                        Ok(tag) => tag,
                        Err(e) => {
                            warn!(field_id = field.id, language, title, error = %e, "failed to resolve tag, skipping entry");
                            continue;
                        }
                    };

                    if config.is_group() {
                        map.record_group(field.id, &entry.value, language, &tag.name);
                    } else {
                        map.record_list(field.id, language, &tag.name);
                    }
                }
            }

            if !qualifying {
                debug!(field_id = field.id, "field unchanged since last run, skipping group sync");
                continue;
            }

            for project in &projects {
                let languages = project.languages(&self.pool).await?;
                for language in &languages {
                    if let Err(e) = self
                        .sync_field_group(project, language, field, config, &generator)
                        .await
                    {
                        warn!(
                            field_id = field.id,
                            project = project.name,
                            language,
                            error = %e,
                            "tag group sync failed, skipping combination"
                        );
                    }
                }
            }

            summary.fields += 1;
        }

        // Reconcile products.
        let qualifying_ids: Vec<i64> = generating
            .iter()
            .filter(|(field, _)| targeted || field.edited > last)
            .map(|(field, _)| field.id)
            .collect();

        let affected = match product_ids {
            Some(ids) => ids,
            None => Product::list_active_ids_with_fields(&self.pool, &qualifying_ids).await?,
        };

        let generating_ids: Vec<i64> = generating.iter().map(|(field, _)| field.id).collect();

        for product_id in affected {
            match self
                .apply_to_product(product_id, &map, &generating_ids, &default_languages, &generator)
                .await
            {
                Ok(true) => summary.products += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(product_id, error = %e, "attribute tag generation failed for product");
                }
            }
        }

        // Drop own groups no field generates anymore, unless they carry
        // foreign tags.
        summary.groups_deleted = self.collect_obsolete_groups(&generating, &projects).await?;

        if !targeted {
            record_run(&self.pool, GENERATOR_ID, started).await?;
        }

        info!(
            fields = summary.fields,
            products = summary.products,
            groups_deleted = summary.groups_deleted,
            targeted,
            "attribute tag generation completed"
        );

        Ok(summary)
    }

    /// The stable group identity for a field, independent of title edits.
    fn working_title(field: &Field) -> String {
        format!("field-{}", field.id)
    }

    /// Mirror one field's entries into its tag group for one storefront
    /// and language, and attach the group to the listing pages whose
    /// categories carry the field.
    async fn sync_field_group(
        &self,
        project: &Project,
        language: &str,
        field: &Field,
        config: &FieldConfig,
        generator: &Generator,
    ) -> Result<()> {
        let title = field.title_for(language);
        let working_title = Self::working_title(field);

        let mut group = match TagGroup::find_by_identity(
            &self.pool,
            &project.name,
            language,
            &title,
            &working_title,
            GENERATOR_ID,
        )
        .await?
        {
            Some(group) => group,
            None => {
                TagGroup::create(
                    &self.pool,
                    &project.name,
                    language,
                    &title,
                    &working_title,
                    GENERATOR_ID,
                )
                .await?
            }
        };

        group.remove_tags_by_generator(&self.pool, GENERATOR_ID).await?;

        let mut entry_tags: BTreeSet<String> = BTreeSet::new();
        for entry in &config.options().entries {
            let Some(entry_title) = entry.title_for(language) else {
                continue;
            };

            match Tag::get_or_create(
                &self.pool,
                &project.name,
                language,
                entry_title,
                entry.image.as_deref(),
                generator,
            )
            .await
            {
                Ok(tag) => {
                    entry_tags.insert(tag.name);
                }
                Err(e) => {
                    warn!(field_id = field.id, language, title = entry_title, error = %e, "failed to resolve entry tag");
                }
            }
        }

        group.add_tags(&self.pool, &entry_tags).await?;

        // Fields already serving as storefront search filters are not
        // additionally attached to listing pages.
        if field.search_filter {
            return Ok(());
        }

        let categories: BTreeSet<i64> = Category::list_ids_with_field(&self.pool, field.id)
            .await?
            .into_iter()
            .collect();
        if categories.is_empty() {
            return Ok(());
        }

        let group_ids = BTreeSet::from([group.id]);
        let sites = CategorySite::list_for_language(&self.pool, &project.name, language).await?;
        for mut site in sites {
            if site.linked_category_ids().is_disjoint(&categories) {
                continue;
            }
            if let Err(e) = site.attach_tag_groups(&self.pool, &group_ids).await {
                warn!(site_id = site.id, error = %e, "failed to attach tag group to page");
            }
        }

        Ok(())
    }

    /// Rewrite one product's generator-owned assignments from the field
    /// map. Returns whether anything changed.
    async fn apply_to_product(
        &self,
        product_id: i64,
        map: &FieldTagMap,
        generating_ids: &[i64],
        languages: &[String],
        generator: &Generator,
    ) -> Result<bool> {
        let Some(mut product) = Product::find_by_id(&self.pool, product_id).await? else {
            debug!(product_id, "product vanished, skipping");
            return Ok(false);
        };
        if !product.active {
            return Ok(false);
        }

        let product_fields: Vec<(i64, Option<String>)> = generating_ids
            .iter()
            .filter(|id| product.has_field(**id))
            .map(|id| (*id, product.attribute_value(*id).map(str::to_string)))
            .collect();

        let mut field = product.tag_field();
        let mut changed = false;

        for language in languages {
            let resolved = resolve_product_tags(&product_fields, map, language);
            let existing: BTreeSet<String> = field
                .tag_list_by_generator(language, generator)
                .into_iter()
                .collect();

            if existing == resolved {
                continue;
            }

            field.set_generated(language, &resolved, generator);
            changed = true;
        }

        if !changed {
            return Ok(false);
        }

        product.set_tag_field(&field);
        events::save_product(&self.pool, &self.project, &mut product, BulkContext::bulk()).await?;

        Ok(true)
    }

    /// Delete own groups no longer backed by any generating field.
    ///
    /// A group containing any tag created by a different generator is
    /// preserved even if every tag this generator put there is obsolete.
    async fn collect_obsolete_groups(
        &self,
        generating: &[(Field, FieldConfig)],
        projects: &[Project],
    ) -> Result<u64> {
        let mut referenced: BTreeSet<(String, String, String, String)> = BTreeSet::new();
        for project in projects {
            let languages = project.languages(&self.pool).await?;
            for language in &languages {
                for (field, _) in generating {
                    referenced.insert((
                        project.name.clone(),
                        language.clone(),
                        field.title_for(language),
                        Self::working_title(field),
                    ));
                }
            }
        }

        let mut deleted = 0u64;

        for group in TagGroup::list_by_generator(&self.pool, GENERATOR_ID).await? {
            let key = (
                group.project.clone(),
                group.language.clone(),
                group.title.clone(),
                group.working_title.clone(),
            );
            if referenced.contains(&key) {
                continue;
            }

            if group.has_foreign_tags(&self.pool, GENERATOR_ID).await? {
                debug!(group_id = %group.id, "obsolete group kept: contains foreign tags");
                continue;
            }

            let sites =
                CategorySite::list_for_language(&self.pool, &group.project, &group.language)
                    .await?;
            for mut site in sites {
                if let Err(e) = site.detach_tag_group(&self.pool, group.id).await {
                    warn!(site_id = site.id, error = %e, "failed to detach deleted group from page");
                }
            }

            if TagGroup::delete(&self.pool, group.id).await? {
                deleted += 1;
            }
        }

        Ok(deleted)
    }
}

impl std::fmt::Debug for AttributeTagGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeTagGenerator")
            .field("project", &self.project.name)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn generator_identity_is_not_user() {
        let generator = Generator::named(GENERATOR_ID);
        assert!(!generator.is_user());
        assert_eq!(generator.id(), "mercato/tags");
    }

    #[test]
    fn working_title_is_stable_across_title_edits() {
        let mut field = Field {
            id: 7,
            kind: crate::models::field::KIND_ATTRIBUTE_LIST.to_string(),
            titles: serde_json::json!({"en": "Color"}),
            options: serde_json::json!({}),
            search_filter: false,
            edited: 0,
        };

        let before = AttributeTagGenerator::working_title(&field);
        field.titles = serde_json::json!({"en": "Colour"});
        assert_eq!(before, AttributeTagGenerator::working_title(&field));
    }
}
