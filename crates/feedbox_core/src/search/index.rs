//! Search index lifecycle and the chunked rebuild pass.
//!
//! # Responsibility
//! - Create/drop the FTS5 table backing entry search.
//! - Rebuild the derived document set from primary data on demand.
//!
//! # Invariants
//! - Enable/disable are idempotent.
//! - Documents are derived in a fixed scan order `(feed, id)`, one row per
//!   content piece; chunk size affects batching only.
//! - Primary-data writes never update the index; staleness until the next
//!   rebuild is expected.

use std::time::Instant;

use log::info;
use rusqlite::Connection;

use super::{SearchError, SearchResult};
use crate::query::{paginated_query, Cursor, Query};

/// Column weights: entry title > feed title > content pieces.
const RANK_CONFIG: &str = "bm25(4.0, 1.0, 2.0)";

const SEARCH_TABLE: &str = "entry_search";

/// Returns whether the search index exists.
pub fn is_enabled(conn: &Connection) -> SearchResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = :name;",
        rusqlite::named_params! { ":name": SEARCH_TABLE },
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Creates the search index table. A no-op when already enabled.
pub fn enable(conn: &Connection) -> SearchResult<()> {
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS entry_search USING fts5(
            title,
            content,
            feed,
            _id UNINDEXED,
            _feed UNINDEXED,
            _content_path UNINDEXED,
            _is_feed_user_title UNINDEXED,
            tokenize = 'porter unicode61'
        );
        INSERT INTO entry_search(entry_search, rank) VALUES ('rank', '{RANK_CONFIG}');"
    ))?;
    info!("event=search_enable module=search status=ok rank_config={RANK_CONFIG}");
    Ok(())
}

/// Drops the search index table. A no-op when already disabled.
pub fn disable(conn: &Connection) -> SearchResult<()> {
    conn.execute_batch("DROP TABLE IF EXISTS entry_search;")?;
    info!("event=search_disable module=search status=ok");
    Ok(())
}

/// One source row of the index scan.
struct SourceEntry {
    id: String,
    feed_url: String,
    title: Option<String>,
    summary: Option<String>,
    content: Vec<crate::model::entry::Content>,
    feed_title: Option<String>,
    feed_user_title: Option<String>,
}

/// Rebuilds the derived document set from current primary data.
///
/// This is a pull, not a push: the index reflects primary data as of this
/// call. Source rows are scanned in `chunk_size` batches (0 = one unchunked
/// scan) via keyset pagination; each batch runs in its own transaction so
/// chunking bounds lock duration without changing the result.
pub fn update_index(conn: &Connection, chunk_size: u32) -> SearchResult<()> {
    if !is_enabled(conn)? {
        return Err(SearchError::NotEnabled);
    }

    let started_at = Instant::now();
    let mut rows_indexed: u64 = 0;
    let mut chunks: u64 = 0;

    conn.execute_batch("DELETE FROM entry_search;")?;

    let query = make_scan_query();
    let mut last: Option<Cursor> = None;

    loop {
        let tx = conn.unchecked_transaction()?;

        let page = paginated_query(&tx, &query, &[], chunk_size, last.as_ref(), parse_source_row)?;
        for source in &page.items {
            rows_indexed += index_entry(&tx, source)?;
        }

        tx.commit()?;
        chunks += 1;

        if chunk_size == 0 || page.items.is_empty() {
            break;
        }
        last = page.last;
        if last.is_none() {
            break;
        }
    }

    info!(
        "event=search_update module=search status=ok rows={rows_indexed} chunks={chunks} duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(())
}

fn make_scan_query() -> Query {
    let mut query = Query::new();
    query
        .add_all(
            "SELECT",
            &[
                "entries.id",
                "entries.feed",
                "entries.title",
                "entries.summary",
                "entries.content",
                "feeds.title",
                "feeds.user_title",
            ],
        )
        .add("FROM", "entries")
        .add("JOIN", "feeds ON feeds.url = entries.feed");
    query.scrolling_window_order_by(&["entries.feed", "entries.id"], false, "WHERE");
    query
}

fn parse_source_row(row: &rusqlite::Row<'_>) -> SearchResult<SourceEntry> {
    let content = match row.get::<_, Option<String>>(4)? {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|err| SearchError::InvalidData(format!("entries.content: {err}")))?,
        None => Vec::new(),
    };

    Ok(SourceEntry {
        id: row.get(0)?,
        feed_url: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        content,
        feed_title: row.get(5)?,
        feed_user_title: row.get(6)?,
    })
}

/// Inserts one weighted sub-document per content piece.
///
/// All rows of an entry share its title and effective feed title; entries
/// with no pieces still get one row so title/feed matches can find them.
fn index_entry(conn: &Connection, source: &SourceEntry) -> SearchResult<u64> {
    let (feed_title, is_user_title) = match (&source.feed_user_title, &source.feed_title) {
        (Some(user_title), _) => (Some(user_title.as_str()), true),
        (None, Some(title)) => (Some(title.as_str()), false),
        (None, None) => (None, false),
    };

    let mut pieces: Vec<(Option<String>, Option<&str>)> = Vec::new();
    if let Some(summary) = &source.summary {
        pieces.push((Some(".summary".to_string()), Some(summary)));
    }
    for (position, content) in source.content.iter().enumerate() {
        pieces.push((
            Some(format!(".content[{position}].value")),
            Some(&content.value),
        ));
    }
    if pieces.is_empty() {
        pieces.push((None, None));
    }

    let mut stmt = conn.prepare_cached(
        "INSERT INTO entry_search (
            title, content, feed, _id, _feed, _content_path, _is_feed_user_title
        ) VALUES (
            :title, :content, :feed_title, :id, :feed_url, :content_path, :is_user_title
        );",
    )?;

    let mut inserted = 0;
    for (path, text) in &pieces {
        stmt.execute(rusqlite::named_params! {
            ":title": source.title,
            ":content": text,
            ":feed_title": feed_title,
            ":id": source.id,
            ":feed_url": source.feed_url,
            ":content_path": path,
            ":is_user_title": i64::from(is_user_title),
        })?;
        inserted += 1;
    }

    Ok(inserted)
}
