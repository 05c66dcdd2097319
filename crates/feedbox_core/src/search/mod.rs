//! SQLite FTS5-based entry search.
//!
//! # Responsibility
//! - Maintain the derived full-text index over entries and feeds.
//! - Return relevance-ordered results with reconstructed highlight spans.
//!
//! # Invariants
//! - The index is entirely rebuildable from primary data and never
//!   independently authoritative.
//! - Result ordering is deterministic: aggregate rank, then `(feed, id)`.
//! - Chunk size used while indexing never changes index contents or result
//!   order.

use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::db::DbError;
use crate::model::entry::FlagParseError;
use crate::model::highlight::{HighlightError, HighlightedString};
use crate::query::QueryError;

pub mod index;
pub mod rank;

pub use index::{disable, enable, is_enabled, update_index};
pub use rank::search_entries;

/// Result type for search APIs.
pub type SearchResult<T> = Result<T, SearchError>;

/// Search-layer error for lifecycle, query and result decoding problems.
#[derive(Debug)]
pub enum SearchError {
    /// A search operation was invoked while the index is disabled.
    NotEnabled,
    /// Empty query text, or FTS5 rejected the query syntax.
    InvalidQuery { query: String, message: String },
    /// A caller-facing tri-state flag value could not be interpreted.
    InvalidFilterValue(FlagParseError),
    /// The engine produced marker output the highlight scanner cannot accept.
    /// An internal invariant violation, not a user input error.
    InternalCorruption { message: String },
    Db(DbError),
    InvalidData(String),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotEnabled => {
                write!(f, "operation not supported with search disabled")
            }
            Self::InvalidQuery { query, message } => {
                write!(f, "invalid search query `{query}`: {message}")
            }
            Self::InvalidFilterValue(err) => write!(f, "{err}"),
            Self::InternalCorruption { message } => {
                write!(f, "search index corruption: {message}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid search row: {message}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidFilterValue(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for SearchError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::from(value))
    }
}

impl From<QueryError> for SearchError {
    fn from(value: QueryError) -> Self {
        match value {
            QueryError::Sqlite(err) => Self::from(err),
            other => Self::InvalidData(other.to_string()),
        }
    }
}

impl From<FlagParseError> for SearchError {
    fn from(value: FlagParseError) -> Self {
        Self::InvalidFilterValue(value)
    }
}

impl From<HighlightError> for SearchError {
    fn from(value: HighlightError) -> Self {
        Self::InternalCorruption {
            message: value.to_string(),
        }
    }
}

/// Result of an entry search.
///
/// Identifies the entry by plain `(feed URL, entry id)` so callers never
/// depend on internal row identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySearchResult {
    pub feed_url: String,
    pub id: String,
    /// Matching entry metadata (`.title`, `.feed.title`/`.feed.user_title`),
    /// in arbitrary order.
    pub metadata: Vec<(String, HighlightedString)>,
    /// Matching content pieces (`.summary`, `.content[k].value`), ordered by
    /// descending contribution to the match.
    pub content: Vec<(String, HighlightedString)>,
}

impl EntrySearchResult {
    /// Looks a field up by name in `metadata`, then `content`.
    pub fn field(&self, name: &str) -> Option<&HighlightedString> {
        self.metadata
            .iter()
            .chain(self.content.iter())
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}
