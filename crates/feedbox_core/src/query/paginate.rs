//! Chunked execution of scrolling-window queries.
//!
//! # Responsibility
//! - Run a built query one page at a time, returning rows plus a resume cursor.
//!
//! # Invariants
//! - `chunk_size == 0` means one unchunked scan; no LIMIT, no cursor predicate.
//! - Consuming all pages visits exactly the rows of the unchunked scan, in the
//!   same order, with no duplicates.

use rusqlite::types::Value;
use rusqlite::{Connection, Row, ToSql};

use super::builder::{Cursor, Query, QueryError};

/// One page of results plus the cursor to request the next page.
///
/// `last` is `None` when the scan was unchunked or returned no rows.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub last: Option<Cursor>,
}

/// Executes `query` bound with `params`, returning up to `chunk_size` rows
/// strictly after `last` per the query's scrolling-window ordering.
pub fn paginated_query<T, E, F>(
    conn: &Connection,
    query: &Query,
    params: &[(&str, Value)],
    chunk_size: u32,
    last: Option<&Cursor>,
    mut map_row: F,
) -> Result<Page<T>, E>
where
    F: FnMut(&Row<'_>) -> Result<T, E>,
    E: From<QueryError>,
{
    let mut query = query.clone();
    let mut bound: Vec<(String, Value)> = params
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect();

    if chunk_size > 0 {
        query.limit(":chunk_size", last.is_some());
        bound.push((":chunk_size".to_string(), Value::Integer(i64::from(chunk_size))));
        bound.extend(query.last_params(last));
    }

    let sql = query.to_sql();
    let mut statement = conn
        .prepare(&sql)
        .map_err(|err| E::from(QueryError::from(err)))?;

    let param_refs: Vec<(&str, &dyn ToSql)> = bound
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect();

    let mut rows = statement
        .query(param_refs.as_slice())
        .map_err(|err| E::from(QueryError::from(err)))?;

    let mut items = Vec::new();
    let mut last_row_values: Option<Vec<Value>> = None;

    loop {
        let row = match rows.next() {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(err) => return Err(E::from(QueryError::from(err))),
        };

        let width = row.as_ref().column_count();
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            let value: Value = row
                .get(index)
                .map_err(|err| E::from(QueryError::from(err)))?;
            values.push(value);
        }

        items.push(map_row(row)?);
        last_row_values = Some(values);
    }

    let last = if chunk_size == 0 {
        None
    } else {
        match last_row_values {
            Some(values) => query.extract_last(&values).map_err(E::from)?,
            None => None,
        }
    };

    Ok(Page { items, last })
}
