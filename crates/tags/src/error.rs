//! Engine error types.

use thiserror::Error;

/// Errors raised by the tags engine.
///
/// The variants follow the engine's failure taxonomy: configuration
/// problems skip the affected field, localization problems skip the
/// storefront/language combination, persistence problems skip the write
/// and leave the index stale until the next bulk run.
#[derive(Debug, Error)]
pub enum TagsError {
    #[error("invalid field configuration: {0}")]
    Config(String),

    #[error("language '{language}' is not enabled for project '{project}'")]
    Localization { project: String, language: String },

    #[error("no default project is configured")]
    NoDefaultProject,

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result type alias using TagsError.
pub type TagsResult<T> = Result<T, TagsError>;
