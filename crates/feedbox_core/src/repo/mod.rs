//! Repositories over canonical feed/entry storage.
//!
//! # Responsibility
//! - Provide stable CRUD APIs over the primary tables.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Read paths reject invalid persisted state instead of masking it.
//! - Every operation fails cleanly; no partial, unversioned state is left
//!   behind on error.

use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::db::DbError;
use crate::query::QueryError;

pub mod entry_repo;
pub mod feed_repo;

pub use entry_repo::{EntryRepository, EntrySortOrder, SqliteEntryRepository};
pub use feed_repo::{FeedRepository, FeedSortOrder, SqliteFeedRepository};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for feed/entry persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    FeedExists(String),
    FeedNotFound(String),
    EntryNotFound { feed_url: String, id: String },
    MetadataNotFound { feed_url: String, key: String },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::FeedExists(url) => write!(f, "feed exists: {url}"),
            Self::FeedNotFound(url) => write!(f, "no such feed: {url}"),
            Self::EntryNotFound { feed_url, id } => {
                write!(f, "no such entry: ({feed_url}, {id})")
            }
            Self::MetadataNotFound { feed_url, key } => {
                write!(f, "no such metadata: ({feed_url}, {key})")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::from(value))
    }
}

impl From<QueryError> for RepoError {
    fn from(value: QueryError) -> Self {
        match value {
            QueryError::Sqlite(err) => Self::from(err),
            other => Self::InvalidData(other.to_string()),
        }
    }
}
