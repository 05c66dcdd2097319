//! Ranking query and highlight reconstruction for entry search.
//!
//! # Responsibility
//! - Execute the FTS5 match, joined with primary data for filtering.
//! - Rebuild `HighlightedString`s from the engine's inline match markers.
//!
//! # Invariants
//! - Per-entry rank aggregates matched sub-documents by their best rank.
//! - Equal aggregate ranks tie-break by `(feed, id)` ascending; callers must
//!   not read meaning into that order.
//! - The free-text query reaches FTS5 unexamined beyond non-emptiness.

use std::time::Instant;

use log::info;
use rusqlite::types::Value;
use rusqlite::{Connection, ToSql};
use uuid::Uuid;

use super::index::is_enabled;
use super::{EntrySearchResult, SearchError, SearchResult};
use crate::model::entry::EntryFilter;
use crate::model::highlight::HighlightedString;
use crate::query::Query;
use crate::repo::entry_repo::{apply_entry_filter, entry_filter_params};

/// Searches entries, returning relevance-ordered results.
///
/// Filters are tri-state: `None` fields of `filter` add no constraint.
pub fn search_entries(
    conn: &Connection,
    query_text: &str,
    filter: &EntryFilter,
) -> SearchResult<Vec<EntrySearchResult>> {
    if !is_enabled(conn)? {
        return Err(SearchError::NotEnabled);
    }

    let trimmed = query_text.trim();
    if trimmed.is_empty() {
        return Err(SearchError::InvalidQuery {
            query: query_text.to_string(),
            message: "search query must not be empty".to_string(),
        });
    }

    let started_at = Instant::now();

    // Random markers so entry text can never collide with them.
    let token = Uuid::new_v4().simple().to_string();
    let before = format!(">>>{token}>>>");
    let after = format!("<<<{token}<<<");

    let query = make_search_query(filter);

    let mut params: Vec<(&str, Value)> = vec![
        (":query", Value::Text(trimmed.to_string())),
        (":before", Value::Text(before.clone())),
        (":after", Value::Text(after.clone())),
    ];
    params.extend(entry_filter_params(filter));

    let sql = query.to_sql();
    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<(&str, &dyn ToSql)> = params
        .iter()
        .map(|(name, value)| (*name, value as &dyn ToSql))
        .collect();

    let mut rows = stmt
        .query(param_refs.as_slice())
        .map_err(|err| map_match_error(err, trimmed))?;

    let mut results: Vec<EntrySearchResult> = Vec::new();

    loop {
        let row = match rows.next().map_err(|err| map_match_error(err, trimmed))? {
            Some(row) => row,
            None => break,
        };

        let id: String = row.get(0)?;
        let feed_url: String = row.get(1)?;
        let content_path: Option<String> = row.get(3)?;
        let is_user_title: i64 = row.get(4)?;
        let title: Option<String> = row.get(5)?;
        let content: Option<String> = row.get(6)?;
        let feed_title: Option<String> = row.get(7)?;

        // Rows arrive ordered by rank, so an entry's first row is its best
        // match and first-seen order is the final result order.
        let position = results
            .iter()
            .position(|result| result.feed_url == feed_url && result.id == id);

        let result = match position {
            Some(position) => &mut results[position],
            None => {
                let mut metadata = Vec::new();
                if let Some(title) = &title {
                    metadata.push((
                        ".title".to_string(),
                        HighlightedString::extract(title, &before, &after)?,
                    ));
                }
                if let Some(feed_title) = &feed_title {
                    let key = if is_user_title != 0 {
                        ".feed.user_title"
                    } else {
                        ".feed.title"
                    };
                    metadata.push((
                        key.to_string(),
                        HighlightedString::extract(feed_title, &before, &after)?,
                    ));
                }

                results.push(EntrySearchResult {
                    feed_url,
                    id,
                    metadata,
                    content: Vec::new(),
                });
                let last = results.len() - 1;
                &mut results[last]
            }
        };

        if let (Some(path), Some(content)) = (content_path, content) {
            result
                .content
                .push((path, HighlightedString::extract(&content, &before, &after)?));
        }
    }

    info!(
        "event=search_query module=search status=ok results={} duration_ms={}",
        results.len(),
        started_at.elapsed().as_millis()
    );
    Ok(results)
}

fn make_search_query(filter: &EntryFilter) -> Query {
    let mut query = Query::new();
    query
        .add_named(
            "WITH",
            "search",
            "SELECT
                _id,
                _feed,
                rank,
                _content_path,
                _is_feed_user_title,
                highlight(entry_search, 0, :before, :after) AS highlighted_title,
                highlight(entry_search, 1, :before, :after) AS highlighted_content,
                highlight(entry_search, 2, :before, :after) AS highlighted_feed
            FROM entry_search
            WHERE entry_search MATCH :query",
        )
        .add_all(
            "SELECT",
            &[
                "entries.id",
                "entries.feed",
                "search.rank",
                "search._content_path",
                "search._is_feed_user_title",
                "search.highlighted_title",
                "search.highlighted_content",
                "search.highlighted_feed",
            ],
        )
        .add("FROM", "entries")
        .add(
            "JOIN",
            "search ON (entries.id, entries.feed) = (search._id, search._feed)",
        )
        .add_all(
            "ORDER BY",
            &["search.rank", "entries.feed", "entries.id"],
        );

    apply_entry_filter(&mut query, filter, "WHERE");
    query
}

/// Maps FTS5 MATCH syntax complaints to [`SearchError::InvalidQuery`];
/// everything else stays an engine error.
fn map_match_error(err: rusqlite::Error, query: &str) -> SearchError {
    if is_match_syntax_error(&err) {
        return SearchError::InvalidQuery {
            query: query.to_string(),
            message: err.to_string(),
        };
    }
    SearchError::from(err)
}

fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            let message = message.to_lowercase();
            (message.contains("fts5") && message.contains("syntax"))
                || message.contains("malformed match expression")
                || message.contains("unterminated")
                || message.contains("no such column")
        }
        _ => false,
    }
}
