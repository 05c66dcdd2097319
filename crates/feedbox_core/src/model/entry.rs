//! Entry domain model and listing filters.
//!
//! # Responsibility
//! - Define the canonical entry record, its content/enclosure pieces, and the
//!   update intent used by batch upserts.
//! - Define the tri-state filter options shared by listings and search.
//!
//! # Invariants
//! - An entry is identified by `(feed_url, id)`.
//! - `read`/`important` are caller state and survive entry upserts.

use std::error::Error;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// One piece of entry content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub value: String,
    /// Serialized as `type` to match external schema naming.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Content {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: None,
            language: None,
        }
    }
}

/// An external file attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
}

impl Enclosure {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            kind: None,
            length: None,
        }
    }
}

/// Canonical entry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub feed_url: String,
    pub title: Option<String>,
    pub link: Option<String>,
    /// When the publisher last updated the entry. Unix epoch milliseconds.
    pub updated: i64,
    pub author: Option<String>,
    pub published: Option<i64>,
    pub summary: Option<String>,
    pub content: Vec<Content>,
    pub enclosures: Vec<Enclosure>,
    pub read: bool,
    pub important: bool,
}

impl Entry {
    /// Creates an entry with only identity and updated timestamp set.
    pub fn new(feed_url: impl Into<String>, id: impl Into<String>, updated: i64) -> Self {
        Self {
            id: id.into(),
            feed_url: feed_url.into(),
            title: None,
            link: None,
            updated,
            author: None,
            published: None,
            summary: None,
            content: Vec::new(),
            enclosures: Vec::new(),
            read: false,
            important: false,
        }
    }
}

/// Update intent for one entry, produced by the (external) feed updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUpdate {
    pub entry: Entry,
    /// When this update happened. Unix epoch milliseconds.
    pub last_updated: i64,
    /// First time the entry was seen, shared across one update pass so new
    /// entries from the same pass sort together.
    pub first_updated: i64,
    /// Position of the entry within its feed document.
    pub feed_order: i64,
}

/// An entry argument: a bare `(feed_url, id)` key or an entry record.
#[derive(Debug, Clone, Copy)]
pub enum EntryInput<'a> {
    Key(&'a str, &'a str),
    Entry(&'a Entry),
}

impl EntryInput<'_> {
    pub fn as_key(&self) -> (&str, &str) {
        match self {
            Self::Key(feed_url, id) => (feed_url, id),
            Self::Entry(entry) => (&entry.feed_url, &entry.id),
        }
    }
}

impl<'a> From<(&'a str, &'a str)> for EntryInput<'a> {
    fn from(value: (&'a str, &'a str)) -> Self {
        Self::Key(value.0, value.1)
    }
}

impl<'a> From<&'a Entry> for EntryInput<'a> {
    fn from(value: &'a Entry) -> Self {
        Self::Entry(value)
    }
}

/// Tri-state filter options for entry listings and search.
///
/// `None` means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    /// Restrict to one feed.
    pub feed_url: Option<String>,
    /// Restrict to one entry; only meaningful together with `feed_url`.
    pub entry_id: Option<String>,
    pub read: Option<bool>,
    pub important: Option<bool>,
    pub has_enclosures: Option<bool>,
}

/// A textual tri-state flag value that could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagParseError {
    pub value: String,
}

impl Display for FlagParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid flag value `{}`; expected one of null|true|false",
            self.value
        )
    }
}

impl Error for FlagParseError {}

/// Parses a caller-facing tri-state flag.
///
/// Accepts `""`/`null`/`none` (unset), `true`/`1`/`yes`, `false`/`0`/`no`.
pub fn parse_tristate(raw: &str) -> Result<Option<bool>, FlagParseError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "null" | "none" => Ok(None),
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(FlagParseError {
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_tristate, EntryInput};

    #[test]
    fn parse_tristate_accepts_known_values() {
        assert_eq!(parse_tristate("").unwrap(), None);
        assert_eq!(parse_tristate("null").unwrap(), None);
        assert_eq!(parse_tristate(" True ").unwrap(), Some(true));
        assert_eq!(parse_tristate("0").unwrap(), Some(false));
    }

    #[test]
    fn parse_tristate_rejects_garbage() {
        let err = parse_tristate("bad read").unwrap_err();
        assert!(err.to_string().contains("bad read"));
    }

    #[test]
    fn entry_input_normalizes_to_key() {
        let entry = super::Entry::new("http://feed", "entry-1", 0);
        let from_entry: EntryInput<'_> = (&entry).into();
        let from_key: EntryInput<'_> = ("http://feed", "entry-1").into();
        assert_eq!(from_entry.as_key(), ("http://feed", "entry-1"));
        assert_eq!(from_key.as_key(), ("http://feed", "entry-1"));
    }
}
