//! Feed repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - CRUD over the `feeds` table and the `feed_metadata` key/value store.
//! - Keyset-paginated listings with deterministic ordering.
//!
//! # Invariants
//! - `feeds.url` is the only identity; callers never see rowids.
//! - Listing order always ends with `url` so equal sort keys stay stable.

use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use serde_json::Value as JsonValue;

use super::{RepoError, RepoResult};
use crate::model::feed::{ExceptionInfo, Feed, FeedInput, FeedUpdate};
use crate::query::{paginated_query, Cursor, Page, Query};

const FEED_COLUMNS: [&str; 9] = [
    "url",
    "updated",
    "title",
    "link",
    "author",
    "user_title",
    "added",
    "last_updated",
    "last_exception",
];

/// Listing order for feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSortOrder {
    /// Case-insensitive effective title (user title wins), then URL.
    Title,
    /// Most recently added first, then URL.
    Added,
}

/// Repository interface for feed CRUD operations.
pub trait FeedRepository {
    fn add_feed(&self, url: &str, added: i64) -> RepoResult<()>;
    fn remove_feed<'a>(&self, feed: impl Into<FeedInput<'a>>) -> RepoResult<()>;
    fn get_feed<'a>(&self, feed: impl Into<FeedInput<'a>>) -> RepoResult<Option<Feed>>;
    fn list_feeds(
        &self,
        sort: FeedSortOrder,
        chunk_size: u32,
        last: Option<&Cursor>,
    ) -> RepoResult<Page<Feed>>;
    fn set_user_title<'a>(
        &self,
        feed: impl Into<FeedInput<'a>>,
        title: Option<&str>,
    ) -> RepoResult<()>;
    fn mark_stale<'a>(&self, feed: impl Into<FeedInput<'a>>) -> RepoResult<()>;
    fn update_feed(&self, update: &FeedUpdate) -> RepoResult<()>;
    fn mark_updated(&self, url: &str, last_updated: i64) -> RepoResult<()>;
    fn record_feed_error(&self, url: &str, error: &ExceptionInfo) -> RepoResult<()>;
    fn set_metadata(&self, url: &str, key: &str, value: &JsonValue) -> RepoResult<()>;
    fn get_metadata(&self, url: &str, key: &str) -> RepoResult<Option<JsonValue>>;
    fn delete_metadata(&self, url: &str, key: &str) -> RepoResult<()>;
    fn iter_metadata(
        &self,
        url: &str,
        key: Option<&str>,
        chunk_size: u32,
        last: Option<&Cursor>,
    ) -> RepoResult<Page<(String, JsonValue)>>;
}

/// SQLite-backed feed repository.
pub struct SqliteFeedRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteFeedRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl FeedRepository for SqliteFeedRepository<'_> {
    fn add_feed(&self, url: &str, added: i64) -> RepoResult<()> {
        let result = self.conn.execute(
            "INSERT INTO feeds (url, added) VALUES (:url, :added);",
            rusqlite::named_params! { ":url": url, ":added": added },
        );

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_constraint(&err) => Err(RepoError::FeedExists(url.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    fn remove_feed<'a>(&self, feed: impl Into<FeedInput<'a>>) -> RepoResult<()> {
        let url = feed.into().as_url().to_string();
        let changed = self.conn.execute(
            "DELETE FROM feeds WHERE url = :url;",
            rusqlite::named_params! { ":url": url },
        )?;
        exactly_one(changed, || RepoError::FeedNotFound(url.clone()))
    }

    fn get_feed<'a>(&self, feed: impl Into<FeedInput<'a>>) -> RepoResult<Option<Feed>> {
        let url = feed.into().as_url().to_string();

        let mut query = Query::new();
        query
            .add_all("SELECT", &FEED_COLUMNS)
            .add("FROM", "feeds")
            .add("WHERE", "url = :url");

        let mut stmt = self.conn.prepare(&query.to_sql())?;
        let mut rows = stmt.query(rusqlite::named_params! { ":url": url })?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_feed_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_feeds(
        &self,
        sort: FeedSortOrder,
        chunk_size: u32,
        last: Option<&Cursor>,
    ) -> RepoResult<Page<Feed>> {
        let mut query = Query::new();
        query.add_all("SELECT", &FEED_COLUMNS).add("FROM", "feeds");

        match sort {
            FeedSortOrder::Title => {
                // Sort by url at the end to keep the order deterministic.
                query.add_named("SELECT", "kinda_title", "lower(coalesce(user_title, title))");
                query.scrolling_window_order_by(&["kinda_title", "url"], false, "WHERE");
            }
            FeedSortOrder::Added => {
                query.scrolling_window_order_by(&["added", "url"], true, "WHERE");
            }
        }

        paginated_query(self.conn, &query, &[], chunk_size, last, |row| {
            parse_feed_row(row)
        })
    }

    fn set_user_title<'a>(
        &self,
        feed: impl Into<FeedInput<'a>>,
        title: Option<&str>,
    ) -> RepoResult<()> {
        let url = feed.into().as_url().to_string();
        let changed = self.conn.execute(
            "UPDATE feeds SET user_title = :title WHERE url = :url;",
            rusqlite::named_params! { ":title": title, ":url": url },
        )?;
        exactly_one(changed, || RepoError::FeedNotFound(url.clone()))
    }

    fn mark_stale<'a>(&self, feed: impl Into<FeedInput<'a>>) -> RepoResult<()> {
        let url = feed.into().as_url().to_string();
        let changed = self.conn.execute(
            "UPDATE feeds SET stale = 1 WHERE url = :url;",
            rusqlite::named_params! { ":url": url },
        )?;
        exactly_one(changed, || RepoError::FeedNotFound(url.clone()))
    }

    fn update_feed(&self, update: &FeedUpdate) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE feeds
             SET
                title = :title,
                link = :link,
                updated = :updated,
                author = :author,
                http_etag = :http_etag,
                http_last_modified = :http_last_modified,
                stale = 0,
                last_updated = :last_updated,
                last_exception = NULL
             WHERE url = :url;",
            rusqlite::named_params! {
                ":title": update.title,
                ":link": update.link,
                ":updated": update.updated,
                ":author": update.author,
                ":http_etag": update.http_etag,
                ":http_last_modified": update.http_last_modified,
                ":last_updated": update.last_updated,
                ":url": update.url,
            },
        )?;
        exactly_one(changed, || RepoError::FeedNotFound(update.url.clone()))
    }

    fn mark_updated(&self, url: &str, last_updated: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE feeds
             SET last_updated = :last_updated, last_exception = NULL
             WHERE url = :url;",
            rusqlite::named_params! { ":last_updated": last_updated, ":url": url },
        )?;
        exactly_one(changed, || RepoError::FeedNotFound(url.to_string()))
    }

    fn record_feed_error(&self, url: &str, error: &ExceptionInfo) -> RepoResult<()> {
        let serialized = serde_json::to_string(error)
            .map_err(|err| RepoError::InvalidData(err.to_string()))?;
        let changed = self.conn.execute(
            "UPDATE feeds SET last_exception = :last_exception WHERE url = :url;",
            rusqlite::named_params! { ":last_exception": serialized, ":url": url },
        )?;
        exactly_one(changed, || RepoError::FeedNotFound(url.to_string()))
    }

    fn set_metadata(&self, url: &str, key: &str, value: &JsonValue) -> RepoResult<()> {
        let serialized = serde_json::to_string(value)
            .map_err(|err| RepoError::InvalidData(err.to_string()))?;

        let result = self.conn.execute(
            "INSERT OR REPLACE INTO feed_metadata (feed, key, value)
             VALUES (:feed, :key, :value);",
            rusqlite::named_params! { ":feed": url, ":key": key, ":value": serialized },
        );

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_constraint(&err) => Err(RepoError::FeedNotFound(url.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    fn get_metadata(&self, url: &str, key: &str) -> RepoResult<Option<JsonValue>> {
        let mut stmt = self.conn.prepare(
            "SELECT value FROM feed_metadata WHERE feed = :feed AND key = :key;",
        )?;
        let mut rows = stmt.query(rusqlite::named_params! { ":feed": url, ":key": key })?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                let value = serde_json::from_str(&raw).map_err(|err| {
                    RepoError::InvalidData(format!("metadata value for `{key}`: {err}"))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn delete_metadata(&self, url: &str, key: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM feed_metadata WHERE feed = :feed AND key = :key;",
            rusqlite::named_params! { ":feed": url, ":key": key },
        )?;
        exactly_one(changed, || RepoError::MetadataNotFound {
            feed_url: url.to_string(),
            key: key.to_string(),
        })
    }

    fn iter_metadata(
        &self,
        url: &str,
        key: Option<&str>,
        chunk_size: u32,
        last: Option<&Cursor>,
    ) -> RepoResult<Page<(String, JsonValue)>> {
        let mut query = Query::new();
        query
            .add_all("SELECT", &["key", "value"])
            .add("FROM", "feed_metadata")
            .add("WHERE", "feed = :feed");

        let mut params: Vec<(&str, Value)> = vec![(":feed", Value::Text(url.to_string()))];
        if let Some(key) = key {
            query.add("WHERE", "key = :key");
            params.push((":key", Value::Text(key.to_string())));
        }

        query.scrolling_window_order_by(&["key"], false, "WHERE");

        paginated_query(self.conn, &query, &params, chunk_size, last, |row| {
            let key: String = row.get("key")?;
            let raw: String = row.get("value")?;
            let value = serde_json::from_str(&raw).map_err(|err| {
                RepoError::InvalidData(format!("metadata value for `{key}`: {err}"))
            })?;
            Ok((key, value))
        })
    }
}

fn parse_feed_row(row: &Row<'_>) -> RepoResult<Feed> {
    let last_exception = match row.get::<_, Option<String>>("last_exception")? {
        Some(raw) => Some(serde_json::from_str::<ExceptionInfo>(&raw).map_err(|err| {
            RepoError::InvalidData(format!("feeds.last_exception: {err}"))
        })?),
        None => None,
    };

    Ok(Feed {
        url: row.get("url")?,
        updated: row.get("updated")?,
        title: row.get("title")?,
        link: row.get("link")?,
        author: row.get("author")?,
        user_title: row.get("user_title")?,
        added: row.get("added")?,
        last_updated: row.get("last_updated")?,
        last_exception,
    })
}

pub(crate) fn exactly_one(changed: usize, not_found: impl FnOnce() -> RepoError) -> RepoResult<()> {
    match changed {
        1 => Ok(()),
        0 => Err(not_found()),
        other => Err(RepoError::InvalidData(format!(
            "expected exactly one row to change, got {other}"
        ))),
    }
}

pub(crate) fn is_constraint(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
