use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("post {0} not found")]
    NotFound(i64),

    /// Another post already has this content hash.
    #[error("a post with hash {0} already exists")]
    DuplicateContent(String),

    #[error("migration to schema version {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: rusqlite::Error,
    },

    #[error("schema version {0} is newer than this build understands")]
    UnsupportedVersion(i64),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error("{0} connection lock poisoned")]
    Poisoned(&'static str),
}
