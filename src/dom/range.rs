//! Boundary points and ranges.
//!
//! A [`Boundary`] is a `(node, offset)` pair with DOM semantics: the offset
//! counts characters inside text and comment nodes and children otherwise.

use super::{Document, NodeId};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Boundary {
    pub node: NodeId,
    pub offset: usize,
}

impl Boundary {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }

    /// The point just before `node` in its parent.
    pub fn before(doc: &Document, node: NodeId) -> Option<Self> {
        Some(Self::new(doc.parent(node)?, doc.index_in_parent(node)?))
    }

    /// The point just after `node` in its parent.
    pub fn after(doc: &Document, node: NodeId) -> Option<Self> {
        Some(Self::new(doc.parent(node)?, doc.index_in_parent(node)? + 1))
    }

    pub fn is_valid(&self, doc: &Document) -> bool {
        doc.kind(self.node).is_some() && self.offset <= doc.node_length(self.node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Boundary,
    pub end: Boundary,
}

impl Range {
    pub fn new(start: Boundary, end: Boundary) -> Self {
        Self { start, end }
    }

    pub fn collapsed(at: Boundary) -> Self {
        Self { start: at, end: at }
    }

    /// Range spanning all of `node`'s contents.
    pub fn of_contents(doc: &Document, node: NodeId) -> Self {
        Self::new(
            Boundary::new(node, 0),
            Boundary::new(node, doc.node_length(node)),
        )
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Both points exist, are attached, in bounds and correctly ordered.
    pub fn is_valid(&self, doc: &Document) -> bool {
        self.start.is_valid(doc)
            && self.end.is_valid(doc)
            && matches!(
                doc.compare_points(self.start, self.end),
                Some(Ordering::Less | Ordering::Equal)
            )
    }

    /// The text the range covers, like `Range.toString()`.
    pub fn text(&self, doc: &Document) -> String {
        let mut out = String::new();
        if !self.is_valid(doc) {
            return out;
        }
        if let Some(text) = doc.text(self.start.node)
            && self.start.node == self.end.node
        {
            return slice_chars(text, self.start.offset, self.end.offset).to_string();
        }
        let (Some(start), Some(end)) = (
            doc.position_key(self.start.node, self.start.offset),
            doc.position_key(self.end.node, self.end.offset),
        ) else {
            return out;
        };

        for node in doc.descendants(Document::ROOT) {
            let Some(text) = doc.text(node) else {
                continue;
            };
            let len = text.chars().count();
            let from = if node == self.start.node {
                self.start.offset
            } else {
                match doc.position_key(node, 0) {
                    Some(key) if key >= start => 0,
                    _ => continue,
                }
            };
            let to = if node == self.end.node {
                self.end.offset
            } else {
                match doc.position_key(node, len) {
                    Some(key) if key <= end => len,
                    _ => continue,
                }
            };
            if from < to {
                out.push_str(slice_chars(text, from, to));
            }
        }
        out
    }

    /// First occurrence of `needle` in the document's visible text, which may
    /// span several text nodes. Text inside terminal elements is ignored.
    pub fn find_text(doc: &Document, needle: &str) -> Option<Range> {
        if needle.is_empty() {
            return None;
        }
        let mut flat = String::new();
        let mut runs: Vec<(NodeId, usize)> = Vec::new();
        for node in doc.descendants(Document::ROOT) {
            if let Some(text) = doc.text(node)
                && !doc.inside_terminal(node)
            {
                runs.push((node, flat.chars().count()));
                flat.push_str(text);
            }
        }

        let byte = flat.find(needle)?;
        let start = flat[..byte].chars().count();
        let end = start + needle.chars().count();
        let locate = |offset: usize, prefer_next: bool| -> Option<Boundary> {
            let index = if prefer_next {
                runs.iter().rposition(|(_, begin)| *begin <= offset)?
            } else {
                runs.iter().rposition(|(_, begin)| *begin < offset)?
            };
            let (node, begin) = runs[index];
            Some(Boundary::new(node, offset - begin))
        };
        Some(Range::new(locate(start, true)?, locate(end, false)?))
    }
}

pub(crate) fn slice_chars(text: &str, from: usize, to: usize) -> &str {
    let start = super::char_to_byte(text, from);
    let end = super::char_to_byte(text, to);
    &text[start..end.max(start)]
}
