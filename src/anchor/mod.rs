//! Serializable anchors for ranges.
//!
//! An [`Anchor`] stores both endpoints of a range as structural paths plus
//! offsets. Resolving it against a document that has changed since it was
//! taken may legitimately fail; that is reported as `None`, never an error.

use crate::dom::{Boundary, Document, Range};
use serde::{Deserialize, Serialize};

pub mod path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub start_path: String,
    pub start_offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<usize>,
    pub collapsed: bool,
}

/// Encodes `range`. End fields are only recorded for non-collapsed ranges.
/// Returns `None` when an endpoint has no path (detached, or under a node
/// that is neither element nor text).
pub fn to_anchor(doc: &Document, range: &Range) -> Option<Anchor> {
    let collapsed = range.is_collapsed();
    let start_path = path::encode(doc, range.start.node)?;
    let (end_path, end_offset) = if collapsed {
        (None, None)
    } else {
        (
            Some(path::encode(doc, range.end.node)?),
            Some(range.end.offset),
        )
    };
    Some(Anchor {
        start_path,
        start_offset: range.start.offset,
        end_path,
        end_offset,
        collapsed,
    })
}

/// Resolves `anchor` against `doc`. A missing end defaults to the start.
pub fn to_range(doc: &Document, anchor: &Anchor) -> Option<Range> {
    let start = Boundary::new(path::decode(doc, &anchor.start_path)?, anchor.start_offset);
    if !start.is_valid(doc) {
        return None;
    }
    let end = match (&anchor.end_path, anchor.end_offset) {
        (Some(end_path), Some(end_offset)) if !anchor.collapsed => {
            Boundary::new(path::decode(doc, end_path)?, end_offset)
        }
        _ => start,
    };
    let range = Range::new(start, end);
    range.is_valid(doc).then_some(range)
}
