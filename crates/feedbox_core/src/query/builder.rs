//! Declarative SQL text builder with keyset pagination support.
//!
//! # Responsibility
//! - Accumulate clause fragments under SQL keywords and render canonical text.
//! - Record a scrolling-window ordering and emit cursor predicates for it.
//!
//! # Invariants
//! - Rendered keyword order follows a fixed precedence table, not call order.
//! - Fragment order within one keyword follows insertion order.
//! - A rendered query is a pure function of the accumulated clauses.

use std::error::Error;
use std::fmt::{Display, Formatter};

use rusqlite::types::Value;

/// Cursor over the sort-key projection of the last consumed row.
///
/// Opaque to callers: extract it with [`Query::extract_last`], pass it back
/// through [`Query::last_params`] to resume a scan.
pub type Cursor = Vec<Value>;

pub type QueryResult<T> = Result<T, QueryError>;

/// Error for builder misuse detected at render/extraction time.
#[derive(Debug)]
pub enum QueryError {
    /// A scrolling-window key has no matching SELECT column or alias.
    UnknownWindowKey(String),
    Sqlite(rusqlite::Error),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownWindowKey(key) => {
                write!(f, "window key `{key}` is not selected by the query")
            }
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnknownWindowKey(_) => None,
            Self::Sqlite(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// One fragment under a keyword: bare text, or an aliased expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fragment {
    Plain(String),
    Named { name: String, body: String },
}

/// Fixed keyword precedence used at render time.
const KEYWORD_ORDER: [&str; 14] = [
    "WITH", "INSERT", "VALUES", "UPDATE", "SET", "DELETE", "SELECT", "FROM", "JOIN", "WHERE",
    "GROUP BY", "HAVING", "ORDER BY", "LIMIT",
];

const INDENT: &str = "    ";

fn keyword_rank(keyword: &str) -> usize {
    let canonical = if keyword.contains("JOIN") {
        "JOIN"
    } else if keyword.starts_with("INSERT") || keyword.starts_with("REPLACE") {
        "INSERT"
    } else if keyword.starts_with("UPDATE") {
        "UPDATE"
    } else if keyword.starts_with("DELETE") {
        "DELETE"
    } else {
        keyword
    };

    KEYWORD_ORDER
        .iter()
        .position(|known| *known == canonical)
        // Unknown keywords sort last, in insertion order (the sort is stable).
        .unwrap_or(KEYWORD_ORDER.len())
}

fn separator(keyword: &str) -> String {
    if keyword.contains("JOIN") {
        return format!("\n{keyword}");
    }
    match keyword {
        "WHERE" | "HAVING" => " AND".to_string(),
        _ => ",".to_string(),
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{INDENT}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strips the common leading whitespace of a multi-line fragment so nested
/// SQL literals render at a predictable depth.
fn clean_up(text: &str) -> String {
    let trimmed_end = text.trim_end();
    let common_indent = trimmed_end
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    trimmed_end
        .lines()
        .map(|line| {
            if line.len() >= common_indent {
                &line[common_indent..]
            } else {
                line.trim_start()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn make_last_label(index: usize) -> String {
    format!(":last_{index}")
}

/// SQL text builder.
///
/// Keywords are arbitrary strings; anything containing `JOIN` occupies the
/// JOIN slot, anything starting with `INSERT`/`REPLACE`/`UPDATE`/`DELETE`
/// occupies the respective slot. The builder performs no SQL validation.
#[derive(Debug, Clone, Default)]
pub struct Query {
    clauses: Vec<(String, Vec<Fragment>)>,
    window_keys: Vec<String>,
    window_desc: bool,
    window_keyword: String,
}

impl Query {
    pub fn new() -> Self {
        Self {
            clauses: Vec::new(),
            window_keys: Vec::new(),
            window_desc: false,
            window_keyword: "WHERE".to_string(),
        }
    }

    /// Appends one fragment under `keyword`.
    pub fn add(&mut self, keyword: &str, fragment: &str) -> &mut Self {
        let cleaned = Fragment::Plain(clean_up(fragment));
        self.target(keyword).push(cleaned);
        self
    }

    /// Appends several fragments under `keyword`, preserving their order.
    pub fn add_all(&mut self, keyword: &str, fragments: &[&str]) -> &mut Self {
        for fragment in fragments {
            self.add(keyword, fragment);
        }
        self
    }

    /// Appends an aliased fragment: `body AS name` for SELECT-like keywords,
    /// `name AS (body)` for WITH.
    pub fn add_named(&mut self, keyword: &str, name: &str, body: &str) -> &mut Self {
        let fragment = Fragment::Named {
            name: clean_up(name),
            body: clean_up(body),
        };
        self.target(keyword).push(fragment);
        self
    }

    fn target(&mut self, keyword: &str) -> &mut Vec<Fragment> {
        if let Some(position) = self.clauses.iter().position(|(k, _)| k == keyword) {
            return &mut self.clauses[position].1;
        }
        self.clauses.push((keyword.to_string(), Vec::new()));
        let last = self.clauses.len() - 1;
        &mut self.clauses[last].1
    }

    /// Records the scrolling-window sort keys and adds the ORDER BY clause.
    ///
    /// `keyword` names the clause that receives the cursor predicate when
    /// [`Query::limit`] is called with a cursor (`WHERE` or `HAVING`).
    pub fn scrolling_window_order_by(
        &mut self,
        keys: &[&str],
        descending: bool,
        keyword: &str,
    ) -> &mut Self {
        self.window_keys = keys.iter().map(|key| clean_up(key)).collect();
        self.window_desc = descending;
        self.window_keyword = keyword.to_string();

        let direction = if descending { "DESC" } else { "ASC" };
        let ordered: Vec<String> = self
            .window_keys
            .iter()
            .map(|key| format!("{key} {direction}"))
            .collect();
        for clause in &ordered {
            self.add("ORDER BY", clause);
        }
        self
    }

    /// Adds a LIMIT clause; with `with_last`, also adds the keyset predicate
    /// `(k1, ..., kn) > (:last_0, ..., :last_n)` (`<` when descending) so the
    /// next page strictly continues after the cursor row.
    pub fn limit(&mut self, count_expr: &str, with_last: bool) -> &mut Self {
        self.add("LIMIT", count_expr);

        if !with_last || self.window_keys.is_empty() {
            return self;
        }

        let comparison = if self.window_desc { "<" } else { ">" };
        let mut tuple = Query::new();
        for key in &self.window_keys {
            tuple.add("(", key);
        }
        let close = format!(") {comparison} (");
        for index in 0..self.window_keys.len() {
            tuple.add(&close, &make_last_label(index));
        }
        let predicate = tuple.render_with_end(")");

        let keyword = self.window_keyword.clone();
        self.add(&keyword, &predicate)
    }

    /// Projects the cursor tuple out of a row returned by this query.
    ///
    /// `row` must hold the row's values in SELECT order. Returns `None` when
    /// no scrolling window was declared.
    pub fn extract_last(&self, row: &[Value]) -> QueryResult<Option<Cursor>> {
        if self.window_keys.is_empty() {
            return Ok(None);
        }

        let names: Vec<&str> = self
            .clauses
            .iter()
            .filter(|(keyword, _)| keyword == "SELECT")
            .flat_map(|(_, fragments)| fragments)
            .map(|fragment| match fragment {
                Fragment::Plain(text) => text.as_str(),
                Fragment::Named { name, .. } => name.as_str(),
            })
            .collect();

        let mut cursor = Vec::with_capacity(self.window_keys.len());
        for key in &self.window_keys {
            let position = names
                .iter()
                .position(|name| name == key)
                .ok_or_else(|| QueryError::UnknownWindowKey(key.clone()))?;
            cursor.push(row[position].clone());
        }
        Ok(Some(cursor))
    }

    /// Binds a cursor back to the named parameters emitted by [`Query::limit`].
    pub fn last_params(&self, last: Option<&Cursor>) -> Vec<(String, Value)> {
        let Some(last) = last else {
            return Vec::new();
        };
        last.iter()
            .enumerate()
            .map(|(index, value)| (make_last_label(index), value.clone()))
            .collect()
    }

    /// Renders the canonical query text, terminated by `;`.
    pub fn to_sql(&self) -> String {
        self.render_with_end(";\n")
    }

    fn render_with_end(&self, end: &str) -> String {
        let mut ordered: Vec<&(String, Vec<Fragment>)> = self.clauses.iter().collect();
        ordered.sort_by_key(|(keyword, _)| keyword_rank(keyword));

        let mut out = String::new();
        for (keyword, fragments) in ordered {
            if fragments.is_empty() {
                continue;
            }

            out.push_str(keyword);
            out.push('\n');

            for (index, fragment) in fragments.iter().enumerate() {
                let rendered = match fragment {
                    Fragment::Plain(text) => text.clone(),
                    Fragment::Named { name, body } => {
                        if keyword == "WITH" {
                            format!("{name} AS (\n{}\n)", indent(body))
                        } else {
                            format!("{body} AS {name}")
                        }
                    }
                };

                out.push_str(&indent(&rendered));
                if index + 1 < fragments.len() {
                    out.push_str(&separator(keyword));
                }
                out.push('\n');
            }
        }

        out.push_str(end);
        out
    }
}
