//! Feed domain model.
//!
//! # Responsibility
//! - Define the canonical feed record and the update intent applied after a
//!   successful fetch.
//! - Normalize "bare URL or feed-bearing record" arguments at the API boundary.
//!
//! # Invariants
//! - `url` is the stable identity of a feed; every other field may change.
//! - `user_title` is caller-assigned and takes precedence over `title` for
//!   display and search weighting.

use serde::{Deserialize, Serialize};

/// Summary of the last error seen while updating a feed.
///
/// Stored as JSON in `feeds.last_exception`; cleared by a successful update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Serialized as `type` to match external schema naming.
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// Canonical feed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    /// The feed URL; stable identity.
    pub url: String,
    /// When the publisher last updated the feed. Unix epoch milliseconds.
    pub updated: Option<i64>,
    /// The feed's own title.
    pub title: Option<String>,
    /// URL of a page associated with the feed.
    pub link: Option<String>,
    pub author: Option<String>,
    /// Caller-assigned title override.
    pub user_title: Option<String>,
    /// When the feed was added. Unix epoch milliseconds.
    pub added: i64,
    /// When the feed was last fetched successfully. None if never updated.
    pub last_updated: Option<i64>,
    /// Error bookkeeping from the last failed update attempt.
    pub last_exception: Option<ExceptionInfo>,
}

impl Feed {
    /// Creates a feed with only its identity and added timestamp set.
    pub fn new(url: impl Into<String>, added: i64) -> Self {
        Self {
            url: url.into(),
            updated: None,
            title: None,
            link: None,
            author: None,
            user_title: None,
            added,
            last_updated: None,
            last_exception: None,
        }
    }

    /// The title to display and index: `user_title` wins over `title`.
    pub fn effective_title(&self) -> Option<&str> {
        self.user_title.as_deref().or(self.title.as_deref())
    }
}

/// Update intent applied to a feed after a successful fetch.
///
/// Clears `stale` and `last_exception` as a side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedUpdate {
    pub url: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub updated: Option<i64>,
    pub author: Option<String>,
    pub http_etag: Option<String>,
    pub http_last_modified: Option<String>,
    /// When this update happened. Unix epoch milliseconds.
    pub last_updated: i64,
}

/// A feed argument: either a bare URL or a record that carries one.
///
/// Normalized to the URL form at the API boundary via [`FeedInput::as_url`].
#[derive(Debug, Clone, Copy)]
pub enum FeedInput<'a> {
    Url(&'a str),
    Feed(&'a Feed),
}

impl FeedInput<'_> {
    pub fn as_url(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Feed(feed) => &feed.url,
        }
    }
}

impl<'a> From<&'a str> for FeedInput<'a> {
    fn from(value: &'a str) -> Self {
        Self::Url(value)
    }
}

impl<'a> From<&'a String> for FeedInput<'a> {
    fn from(value: &'a String) -> Self {
        Self::Url(value)
    }
}

impl<'a> From<&'a Feed> for FeedInput<'a> {
    fn from(value: &'a Feed) -> Self {
        Self::Feed(value)
    }
}
