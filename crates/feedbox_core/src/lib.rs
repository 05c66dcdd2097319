//! Core domain logic for feedbox.
//! This crate is the single source of truth for storage and search invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod search;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entry::{
    parse_tristate, Content, Enclosure, Entry, EntryFilter, EntryInput, EntryUpdate,
};
pub use model::feed::{ExceptionInfo, Feed, FeedInput, FeedUpdate};
pub use model::highlight::{HighlightError, HighlightSpan, HighlightedString};
pub use query::{Cursor, Page, Query};
pub use repo::{
    EntryRepository, EntrySortOrder, FeedRepository, FeedSortOrder, RepoError, RepoResult,
    SqliteEntryRepository, SqliteFeedRepository,
};
pub use search::{
    disable as disable_search, enable as enable_search, is_enabled as is_search_enabled,
    search_entries, update_index, EntrySearchResult, SearchError, SearchResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
