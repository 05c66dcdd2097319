//! Entry repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Batch upserts of entries that preserve caller state (read/important).
//! - Filtered, keyset-paginated listings joined with feed data.
//!
//! # Invariants
//! - Entries are identified by `(feed_url, id)`; rowids never leak.
//! - Upserts keep `read`, `important` and `first_updated` of existing rows.
//! - The recent ordering ends with `entries.id` so it is total.

use rusqlite::types::Value;
use rusqlite::{Connection, Row};

use super::feed_repo::{exactly_one, is_constraint};
use super::{RepoError, RepoResult};
use crate::model::entry::{
    Content, Enclosure, Entry, EntryFilter, EntryInput, EntryUpdate,
};
use crate::model::feed::{ExceptionInfo, Feed};
use crate::query::{paginated_query, Cursor, Page, Query};

/// Listing order for entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySortOrder {
    /// Last added/published/updated entries first.
    Recent,
}

/// Repository interface for entry operations.
pub trait EntryRepository {
    /// Upserts entries in `chunk_size` batches (0 = one batch), each batch in
    /// its own transaction. One batch failing does not undo earlier batches;
    /// the next update pass retries them.
    fn upsert_entries(&self, updates: &[EntryUpdate], chunk_size: u32) -> RepoResult<()>;
    fn get_entry<'a>(&self, entry: impl Into<EntryInput<'a>>) -> RepoResult<Option<Entry>>;
    fn list_entries(
        &self,
        filter: &EntryFilter,
        sort: EntrySortOrder,
        now: i64,
        chunk_size: u32,
        last: Option<&Cursor>,
    ) -> RepoResult<Page<(Feed, Entry)>>;
    fn mark_read<'a>(&self, entry: impl Into<EntryInput<'a>>, read: bool) -> RepoResult<()>;
    fn mark_important<'a>(
        &self,
        entry: impl Into<EntryInput<'a>>,
        important: bool,
    ) -> RepoResult<()>;
}

/// SQLite-backed entry repository.
pub struct SqliteEntryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntryRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn upsert_batch(&self, updates: &[EntryUpdate]) -> RepoResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        for update in updates {
            let entry = &update.entry;
            let content = encode_pieces(&entry.content)?;
            let enclosures = encode_pieces(&entry.enclosures)?;

            // INSERT OR REPLACE turns the NULL subselect results for new rows
            // into the column defaults (read/important stay 0).
            let result = tx.execute(
                "INSERT OR REPLACE INTO entries (
                    id,
                    feed,
                    title,
                    link,
                    updated,
                    author,
                    published,
                    summary,
                    content,
                    enclosures,
                    read,
                    important,
                    last_updated,
                    first_updated,
                    feed_order
                ) VALUES (
                    :id,
                    :feed_url,
                    :title,
                    :link,
                    :updated,
                    :author,
                    :published,
                    :summary,
                    :content,
                    :enclosures,
                    (
                        SELECT read
                        FROM entries
                        WHERE id = :id AND feed = :feed_url
                    ),
                    (
                        SELECT important
                        FROM entries
                        WHERE id = :id AND feed = :feed_url
                    ),
                    :last_updated,
                    coalesce((
                        SELECT first_updated
                        FROM entries
                        WHERE id = :id AND feed = :feed_url
                    ), :first_updated),
                    :feed_order
                );",
                rusqlite::named_params! {
                    ":id": entry.id,
                    ":feed_url": entry.feed_url,
                    ":title": entry.title,
                    ":link": entry.link,
                    ":updated": entry.updated,
                    ":author": entry.author,
                    ":published": entry.published,
                    ":summary": entry.summary,
                    ":content": content,
                    ":enclosures": enclosures,
                    ":last_updated": update.last_updated,
                    ":first_updated": update.first_updated,
                    ":feed_order": update.feed_order,
                },
            );

            if let Err(err) = result {
                if is_constraint(&err) {
                    return Err(RepoError::FeedNotFound(entry.feed_url.clone()));
                }
                return Err(err.into());
            }
        }

        tx.commit()?;
        Ok(())
    }
}

impl EntryRepository for SqliteEntryRepository<'_> {
    fn upsert_entries(&self, updates: &[EntryUpdate], chunk_size: u32) -> RepoResult<()> {
        if chunk_size == 0 {
            return self.upsert_batch(updates);
        }
        for batch in updates.chunks(chunk_size as usize) {
            self.upsert_batch(batch)?;
        }
        Ok(())
    }

    fn get_entry<'a>(&self, entry: impl Into<EntryInput<'a>>) -> RepoResult<Option<Entry>> {
        let (feed_url, id) = {
            let input = entry.into();
            let (feed_url, id) = input.as_key();
            (feed_url.to_string(), id.to_string())
        };

        let mut query = Query::new();
        query
            .add_all("SELECT", &ENTRY_COLUMNS)
            .add("FROM", "entries")
            .add("WHERE", "entries.feed = :feed_url")
            .add("WHERE", "entries.id = :id");

        let mut stmt = self.conn.prepare(&query.to_sql())?;
        let mut rows = stmt.query(rusqlite::named_params! {
            ":feed_url": feed_url,
            ":id": id,
        })?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_entry_columns(row, 0)?)),
            None => Ok(None),
        }
    }

    fn list_entries(
        &self,
        filter: &EntryFilter,
        sort: EntrySortOrder,
        now: i64,
        chunk_size: u32,
        last: Option<&Cursor>,
    ) -> RepoResult<Page<(Feed, Entry)>> {
        let EntrySortOrder::Recent = sort;

        let mut query = make_list_entries_query(filter);
        apply_recent_order(&mut query);

        let mut params = entry_filter_params(filter);
        params.push((":recent_threshold", Value::Integer(now - RECENT_THRESHOLD_MS)));

        paginated_query(self.conn, &query, &params, chunk_size, last, |row| {
            let feed = parse_joined_feed(row)?;
            let entry = parse_entry_columns(row, FEED_COLUMN_COUNT)?;
            Ok((feed, entry))
        })
    }

    fn mark_read<'a>(&self, entry: impl Into<EntryInput<'a>>, read: bool) -> RepoResult<()> {
        let input = entry.into();
        let (feed_url, id) = input.as_key();
        let (feed_url, id) = (feed_url.to_string(), id.to_string());
        let changed = self.conn.execute(
            "UPDATE entries SET read = :read WHERE feed = :feed_url AND id = :id;",
            rusqlite::named_params! { ":read": read, ":feed_url": feed_url, ":id": id },
        )?;
        exactly_one(changed, || RepoError::EntryNotFound { feed_url, id })
    }

    fn mark_important<'a>(
        &self,
        entry: impl Into<EntryInput<'a>>,
        important: bool,
    ) -> RepoResult<()> {
        let input = entry.into();
        let (feed_url, id) = input.as_key();
        let (feed_url, id) = (feed_url.to_string(), id.to_string());
        let changed = self.conn.execute(
            "UPDATE entries SET important = :important WHERE feed = :feed_url AND id = :id;",
            rusqlite::named_params! { ":important": important, ":feed_url": feed_url, ":id": id },
        )?;
        exactly_one(changed, || RepoError::EntryNotFound { feed_url, id })
    }
}

/// Entries newer than this still sort by when *we* first saw them, so a fresh
/// batch from one update pass stays grouped. Seven days, in milliseconds.
const RECENT_THRESHOLD_MS: i64 = 7 * 24 * 60 * 60 * 1000;

const FEED_COLUMN_COUNT: usize = 9;

const ENTRY_COLUMNS: [&str; 12] = [
    "entries.id",
    "entries.feed",
    "entries.title",
    "entries.link",
    "entries.updated",
    "entries.author",
    "entries.published",
    "entries.summary",
    "entries.content",
    "entries.enclosures",
    "entries.read",
    "entries.important",
];

fn make_list_entries_query(filter: &EntryFilter) -> Query {
    let mut query = Query::new();
    query
        .add_all(
            "SELECT",
            &[
                "entries.feed",
                "feeds.updated",
                "feeds.title",
                "feeds.link",
                "feeds.author",
                "feeds.user_title",
                "feeds.added",
                "feeds.last_updated",
                "feeds.last_exception",
            ],
        )
        .add_all("SELECT", &ENTRY_COLUMNS)
        .add("FROM", "entries")
        .add("JOIN", "feeds ON feeds.url = entries.feed");

    apply_entry_filter(&mut query, filter, "WHERE");
    query
}

/// The recent ordering: entries seen recently sort by first-seen time, older
/// backfill sorts by published/updated, with feed order breaking ties.
fn apply_recent_order(query: &mut Query) {
    query
        .add_named(
            "SELECT",
            "kinda_first_updated",
            "coalesce(
                CASE
                WHEN
                    coalesce(entries.published, entries.updated)
                        >= :recent_threshold
                    THEN entries.first_updated
                END,
                entries.published, entries.updated
            )",
        )
        .add_named(
            "SELECT",
            "kinda_published",
            "coalesce(entries.published, entries.updated)",
        )
        .add("SELECT", "entries.last_updated")
        .add_named("SELECT", "negative_feed_order", "- entries.feed_order");

    query.scrolling_window_order_by(
        &[
            "kinda_first_updated",
            "kinda_published",
            "entries.feed",
            "entries.last_updated",
            "negative_feed_order",
            "entries.id",
        ],
        true,
        "WHERE",
    );
}

/// Adds the tri-state filter predicates under `keyword`.
///
/// Shared with the search ranking query, which filters the same columns.
pub(crate) fn apply_entry_filter(query: &mut Query, filter: &EntryFilter, keyword: &str) {
    if filter.feed_url.is_some() {
        query.add(keyword, "entries.feed = :filter_feed_url");
        if filter.entry_id.is_some() {
            query.add(keyword, "entries.id = :filter_entry_id");
        }
    }

    if let Some(read) = filter.read {
        query.add(keyword, if read { "entries.read" } else { "NOT entries.read" });
    }

    if let Some(important) = filter.important {
        query.add(
            keyword,
            if important {
                "entries.important"
            } else {
                "NOT entries.important"
            },
        );
    }

    if let Some(has_enclosures) = filter.has_enclosures {
        let empty = "(json_array_length(entries.enclosures) IS NULL
                OR json_array_length(entries.enclosures) = 0)";
        if has_enclosures {
            query.add(keyword, &format!("NOT {empty}"));
        } else {
            query.add(keyword, empty);
        }
    }
}

/// Parameter bindings matching [`apply_entry_filter`].
pub(crate) fn entry_filter_params(filter: &EntryFilter) -> Vec<(&'static str, Value)> {
    let mut params = Vec::new();
    if let Some(feed_url) = &filter.feed_url {
        params.push((":filter_feed_url", Value::Text(feed_url.clone())));
        if let Some(entry_id) = &filter.entry_id {
            params.push((":filter_entry_id", Value::Text(entry_id.clone())));
        }
    }
    params
}

fn parse_joined_feed(row: &Row<'_>) -> RepoResult<Feed> {
    let last_exception = match row.get::<_, Option<String>>(8)? {
        Some(raw) => Some(serde_json::from_str::<ExceptionInfo>(&raw).map_err(|err| {
            RepoError::InvalidData(format!("feeds.last_exception: {err}"))
        })?),
        None => None,
    };

    Ok(Feed {
        url: row.get(0)?,
        updated: row.get(1)?,
        title: row.get(2)?,
        link: row.get(3)?,
        author: row.get(4)?,
        user_title: row.get(5)?,
        added: row.get(6)?,
        last_updated: row.get(7)?,
        last_exception,
    })
}

/// Parses the [`ENTRY_COLUMNS`] block starting at column `base`.
fn parse_entry_columns(row: &Row<'_>, base: usize) -> RepoResult<Entry> {
    let content: Vec<Content> = decode_pieces(row.get(base + 8)?, "entries.content")?;
    let enclosures: Vec<Enclosure> = decode_pieces(row.get(base + 9)?, "entries.enclosures")?;

    Ok(Entry {
        id: row.get(base)?,
        feed_url: row.get(base + 1)?,
        title: row.get(base + 2)?,
        link: row.get(base + 3)?,
        updated: row.get(base + 4)?,
        author: row.get(base + 5)?,
        published: row.get(base + 6)?,
        summary: row.get(base + 7)?,
        content,
        enclosures,
        read: row.get(base + 10)?,
        important: row.get(base + 11)?,
    })
}

fn encode_pieces<T: serde::Serialize>(pieces: &[T]) -> RepoResult<Option<String>> {
    if pieces.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(pieces)
        .map(Some)
        .map_err(|err| RepoError::InvalidData(err.to_string()))
}

fn decode_pieces<T: serde::de::DeserializeOwned>(
    raw: Option<String>,
    column: &str,
) -> RepoResult<Vec<T>> {
    match raw {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|err| RepoError::InvalidData(format!("{column}: {err}"))),
        None => Ok(Vec::new()),
    }
}
