//! Highlighted-string value type used by search results.
//!
//! # Responsibility
//! - Represent a string plus the non-overlapping spans matched in it.
//! - Convert between marker-annotated text and span form, losslessly.
//!
//! # Invariants
//! - Spans are half-open `[start, stop)` byte ranges on character boundaries,
//!   within the value, with `start <= stop`.
//! - Spans are stored sorted by `(start, stop)` and never overlap; two
//!   instances built from the same span set in any order are equal.

use std::error::Error;
use std::fmt::{Display, Formatter};

use regex::Regex;
use serde::Serialize;

/// Half-open interval `[start, stop)` over a string's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct HighlightSpan {
    pub start: usize,
    pub stop: usize,
}

impl HighlightSpan {
    pub fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }
}

impl Display for HighlightSpan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// Error for malformed spans or marker sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HighlightError {
    InvalidSpan {
        span: HighlightSpan,
        reason: &'static str,
    },
    OverlappingSpans {
        previous: HighlightSpan,
        next: HighlightSpan,
    },
    InvalidMarkers(String),
    StartMarkerInHighlight,
    UnmatchedEndMarker,
    UnclosedHighlight,
}

impl Display for HighlightError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSpan { span, reason } => write!(f, "invalid highlight {span}: {reason}"),
            Self::OverlappingSpans { previous, next } => {
                write!(f, "highlights must not overlap: {previous}, {next}")
            }
            Self::InvalidMarkers(message) => write!(f, "invalid highlight markers: {message}"),
            Self::StartMarkerInHighlight => write!(f, "highlight start marker in highlight"),
            Self::UnmatchedEndMarker => write!(f, "unmatched highlight end marker"),
            Self::UnclosedHighlight => write!(f, "highlight is never closed"),
        }
    }
}

impl Error for HighlightError {}

/// A string that has some of its parts highlighted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HighlightedString {
    value: String,
    highlights: Vec<HighlightSpan>,
}

impl HighlightedString {
    /// Builds a highlighted string, validating and normalizing the spans.
    pub fn new(
        value: impl Into<String>,
        highlights: Vec<HighlightSpan>,
    ) -> Result<Self, HighlightError> {
        let value = value.into();

        for span in &highlights {
            let reason = if span.start > span.stop {
                Some("start must not be greater than stop")
            } else if span.stop > value.len() {
                Some("start and stop must be within the string")
            } else if !value.is_char_boundary(span.start) || !value.is_char_boundary(span.stop) {
                Some("start and stop must fall on character boundaries")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(HighlightError::InvalidSpan {
                    span: *span,
                    reason,
                });
            }
        }

        let mut highlights = highlights;
        highlights.sort();

        for window in highlights.windows(2) {
            if window[0].stop > window[1].start {
                return Err(HighlightError::OverlappingSpans {
                    previous: window[0],
                    next: window[1],
                });
            }
        }

        Ok(Self { value, highlights })
    }

    /// A string with no highlights.
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            highlights: Vec::new(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn highlights(&self) -> &[HighlightSpan] {
        &self.highlights
    }

    /// Extracts highlights marked by `before`/`after` from annotated text.
    ///
    /// The returned value has the markers stripped; the spans mark the
    /// bracketed ranges. Fails on a start marker inside a highlight, an end
    /// marker with no open highlight, or a highlight never closed.
    pub fn extract(text: &str, before: &str, after: &str) -> Result<Self, HighlightError> {
        let pattern = format!("{}|{}", regex::escape(before), regex::escape(after));
        let matcher =
            Regex::new(&pattern).map_err(|err| HighlightError::InvalidMarkers(err.to_string()))?;

        let mut value = String::new();
        let mut spans = Vec::new();
        let mut open: Option<usize> = None;
        let mut consumed = 0;

        for found in matcher.find_iter(text) {
            value.push_str(&text[consumed..found.start()]);
            consumed = found.end();

            if found.as_str() == before {
                if open.is_some() {
                    return Err(HighlightError::StartMarkerInHighlight);
                }
                open = Some(value.len());
            } else {
                let Some(start) = open.take() else {
                    return Err(HighlightError::UnmatchedEndMarker);
                };
                spans.push(HighlightSpan::new(start, value.len()));
            }
        }

        value.push_str(&text[consumed..]);

        if open.is_some() {
            return Err(HighlightError::UnclosedHighlight);
        }

        Self::new(value, spans)
    }

    /// Splits into alternating plain/highlighted segments.
    ///
    /// Always starts and ends with a (possibly empty) plain segment;
    /// `2 * highlights.len() + 1` segments total. The iterator is lazy and
    /// can be restarted by calling `split` again.
    pub fn split(&self) -> Split<'_> {
        Split {
            value: &self.value,
            highlights: &self.highlights,
            index: 0,
        }
    }

    /// Re-inserts `before`/`after` markers around the highlighted segments.
    ///
    /// The inverse of [`HighlightedString::extract`] for marker pairs that do
    /// not occur in the value.
    pub fn apply(&self, before: &str, after: &str) -> String {
        self.apply_with(before, after, |part| part.to_string())
    }

    /// Like [`HighlightedString::apply`], transforming each segment first.
    pub fn apply_with<F>(&self, before: &str, after: &str, transform: F) -> String
    where
        F: Fn(&str) -> String,
    {
        let mut out = String::new();
        for (index, part) in self.split().enumerate() {
            if index % 2 == 1 {
                out.push_str(before);
            }
            out.push_str(&transform(part));
            if index % 2 == 1 {
                out.push_str(after);
            }
        }
        out
    }
}

/// Lazy segment iterator returned by [`HighlightedString::split`].
#[derive(Debug, Clone)]
pub struct Split<'a> {
    value: &'a str,
    highlights: &'a [HighlightSpan],
    index: usize,
}

impl<'a> Iterator for Split<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let count = self.highlights.len();
        if self.index > 2 * count {
            return None;
        }

        let segment = self.index;
        self.index += 1;

        if segment % 2 == 1 {
            let span = self.highlights[segment / 2];
            return Some(&self.value[span.start..span.stop]);
        }

        let position = segment / 2;
        let start = if position == 0 {
            0
        } else {
            self.highlights[position - 1].stop
        };
        let stop = if position == count {
            self.value.len()
        } else {
            self.highlights[position].start
        };
        Some(&self.value[start..stop])
    }
}
