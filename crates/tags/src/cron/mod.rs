//! Cron entry points.
//!
//! Both heavy operations run as long, single-invocation jobs: a run either
//! completes or is terminated externally and re-run, which is safe because
//! bulk regeneration and attribute generation are idempotent. No exception
//! escapes an entry point except a top-level project resolution failure.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::{TagsError, TagsResult};
use crate::events;
use crate::generator::{AttributeTagGenerator, GeneratorSummary};
use crate::index::bulk::{BulkRegenerator, BulkSummary};
use crate::models::Project;

/// Scheduled operations on the tag index.
pub struct Crons {
    pool: PgPool,
    project: Project,
}

impl Crons {
    /// Create cron tasks for an explicit project.
    pub fn new(pool: PgPool, project: Project) -> Self {
        Self { pool, project }
    }

    /// Create cron tasks bound to the default project.
    ///
    /// A missing default project aborts the invocation — it is the one
    /// failure that cannot be skipped around.
    pub async fn for_default_project(pool: PgPool) -> TagsResult<Self> {
        let project = Project::get_default(&pool)
            .await?
            .ok_or(TagsError::NoDefaultProject)?;

        Ok(Self::new(pool, project))
    }

    /// The project these tasks operate on.
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Full index rebuild (product → tags, tag → products, then the
    /// listing-page cache).
    pub async fn create_cache(&self) -> TagsResult<BulkSummary> {
        let start = std::time::Instant::now();
        info!(project = self.project.name, "starting tag index rebuild");

        let regenerator = BulkRegenerator::new(self.pool.clone(), self.project.clone());
        let summary = regenerator.rebuild().await?;

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            products = summary.products,
            "tag index rebuild finished"
        );

        Ok(summary)
    }

    /// Attribute tag generation, incrementally or for an explicit product
    /// id list.
    pub async fn generate_attribute_tags(
        &self,
        product_ids: Option<Vec<i64>>,
    ) -> TagsResult<GeneratorSummary> {
        let start = std::time::Instant::now();
        info!(
            project = self.project.name,
            targeted = product_ids.is_some(),
            "starting attribute tag generation"
        );

        let generator = AttributeTagGenerator::new(self.pool.clone(), self.project.clone());
        let summary = generator.run(product_ids).await?;

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            products = summary.products,
            "attribute tag generation finished"
        );

        Ok(summary)
    }

    /// Strip stale generated assignments from products that lost their
    /// attribute fields.
    pub async fn cleanup(&self) -> TagsResult<u64> {
        match events::cleanup_generated_tags(&self.pool, &self.project).await {
            Ok(count) => Ok(count),
            Err(e) => {
                warn!(error = %e, "generated-tag cleanup failed");
                Ok(0)
            }
        }
    }
}

impl std::fmt::Debug for Crons {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crons")
            .field("project", &self.project.name)
            .finish()
    }
}
