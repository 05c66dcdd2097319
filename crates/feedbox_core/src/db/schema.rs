//! The feedbox schema: creator, migration steps and identity tag.
//!
//! # Responsibility
//! - Define the canonical feeds/entries/feed_metadata tables.
//! - Register migration steps in strictly increasing order.
//!
//! # Invariants
//! - `create_db` always produces the latest schema in one shot.
//! - A fresh creator run and the full step chain produce equivalent schemas.

use std::collections::BTreeMap;

use rusqlite::Connection;

use super::migrate::SchemaMigration;
use super::{DbError, DbResult, StepError};

/// Latest schema version produced by [`create_db`].
pub const SCHEMA_VERSION: u32 = 3;

/// Identity tag stored in `PRAGMA application_id` ("fbox").
pub const APPLICATION_ID: i32 = i32::from_be_bytes(*b"fbox");

/// Row values (tuple comparisons in keyset predicates) need SQLite 3.15.
const MINIMUM_SQLITE_VERSION: (u32, u32, u32) = (3, 15, 0);

/// Capabilities the core depends on: JSON1 for entry content/enclosures and
/// the has-enclosures filter, FTS5 for the search index.
const REQUIRED_FUNCTIONS: [&str; 4] = ["json", "json_object", "json_array_length", "fts5"];

fn create_db(conn: &Connection) -> Result<(), StepError> {
    conn.execute_batch(
        "CREATE TABLE feeds (
            url TEXT PRIMARY KEY NOT NULL,
            title TEXT,
            link TEXT,
            updated INTEGER,
            author TEXT,
            user_title TEXT,
            http_etag TEXT,
            http_last_modified TEXT,
            stale INTEGER NOT NULL DEFAULT 0,
            last_updated INTEGER,
            added INTEGER NOT NULL,
            last_exception TEXT
        );

        CREATE TABLE entries (
            id TEXT NOT NULL,
            feed TEXT NOT NULL,
            title TEXT,
            link TEXT,
            updated INTEGER NOT NULL,
            author TEXT,
            published INTEGER,
            summary TEXT,
            content TEXT,
            enclosures TEXT,
            read INTEGER NOT NULL DEFAULT 0,
            important INTEGER NOT NULL DEFAULT 0,
            last_updated INTEGER NOT NULL,
            first_updated INTEGER NOT NULL,
            feed_order INTEGER NOT NULL,
            PRIMARY KEY (id, feed),
            FOREIGN KEY (feed) REFERENCES feeds(url)
                ON UPDATE CASCADE
                ON DELETE CASCADE
        );

        CREATE TABLE feed_metadata (
            feed TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (feed, key),
            FOREIGN KEY (feed) REFERENCES feeds(url)
                ON UPDATE CASCADE
                ON DELETE CASCADE
        );",
    )?;
    Ok(())
}

/// v1 databases predate per-feed error bookkeeping.
fn update_from_1_to_2(conn: &Connection) -> Result<(), StepError> {
    conn.execute_batch("ALTER TABLE feeds ADD COLUMN last_exception TEXT;")?;
    Ok(())
}

/// v2 databases predate the feed metadata key/value store.
fn update_from_2_to_3(conn: &Connection) -> Result<(), StepError> {
    conn.execute_batch(
        "CREATE TABLE feed_metadata (
            feed TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (feed, key),
            FOREIGN KEY (feed) REFERENCES feeds(url)
                ON UPDATE CASCADE
                ON DELETE CASCADE
        );",
    )?;
    Ok(())
}

/// The feedbox migration, wired with the schema above.
pub fn migration() -> SchemaMigration {
    SchemaMigration {
        create: create_db,
        version: SCHEMA_VERSION,
        steps: BTreeMap::from([
            (1, update_from_1_to_2 as super::migrate::MigrationFn),
            (2, update_from_2_to_3 as super::migrate::MigrationFn),
        ]),
        application_id: Some(APPLICATION_ID),
    }
}

/// Preflights engine requirements and migrates to the latest schema.
///
/// `wal_enabled`: `Some(true)` switches to WAL, `Some(false)` to DELETE,
/// `None` leaves the journal mode untouched (in-memory databases).
pub fn setup_db(conn: &mut Connection, wal_enabled: Option<bool>) -> DbResult<()> {
    let mut failures = Vec::new();
    if let Some(failure) = super::migrate::check_sqlite_version(conn, MINIMUM_SQLITE_VERSION)? {
        failures.push(failure);
    }
    failures.extend(super::migrate::check_functions(conn, &REQUIRED_FUNCTIONS)?);
    if !failures.is_empty() {
        return Err(DbError::Requirement { failures });
    }

    match wal_enabled {
        Some(true) => {
            conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
        }
        Some(false) => {
            conn.query_row("PRAGMA journal_mode = DELETE;", [], |_| Ok(()))?;
        }
        None => {}
    }

    migration().migrate(conn)
}
