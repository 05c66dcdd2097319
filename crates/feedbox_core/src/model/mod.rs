//! Domain records shared across storage, repositories and search.

pub mod entry;
pub mod feed;
pub mod highlight;

pub use entry::{
    parse_tristate, Content, Enclosure, Entry, EntryFilter, EntryInput, EntryUpdate,
    FlagParseError,
};
pub use feed::{ExceptionInfo, Feed, FeedInput, FeedUpdate};
pub use highlight::{HighlightError, HighlightSpan, HighlightedString};
