//! Wrapping ranges in marker elements.
//!
//! A highlight is realized in the document as a chain of wrapper elements,
//! one per covered text node. The chain is linked purely through attributes:
//!
//! - every wrapper carries a private chain id (`data-highlog-id`)
//! - the first wrapper carries the highlight id as its DOM `id`
//! - later wrappers point back at the first (`data-highlog-first`)
//! - each wrapper but the last points at its successor (`data-highlog-next`)
//!
//! No chain state is kept in memory; [`Marker::mark_elements`] rebuilds the
//! chain from the document on every call, so wrappers removed by someone else
//! simply drop out of it.

use crate::dom::{Boundary, Document, DomError, NodeId, Range, TERMINAL_ELEMENTS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Text directly inside these elements is never wrapped.
pub const TABLE_STRUCTURAL_ELEMENTS: &[&str] =
    &["table", "thead", "tbody", "tfoot", "tr", "colgroup"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Tag of the wrapper elements.
    pub tag: String,
    /// Class every wrapper carries regardless of style.
    pub class: String,
    pub chain_attr: String,
    pub first_attr: String,
    pub next_attr: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            tag: "span".to_string(),
            class: "highlog".to_string(),
            chain_attr: "data-highlog-id".to_string(),
            first_attr: "data-highlog-first".to_string(),
            next_attr: "data-highlog-next".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Marker {
    config: MarkerConfig,
}

impl Marker {
    pub fn new(config: MarkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MarkerConfig {
        &self.config
    }

    pub fn is_marker(&self, doc: &Document, node: NodeId) -> bool {
        doc.tag_name(node).is_some() && doc.attr(node, &self.config.chain_attr).is_some()
    }

    /// Wraps every qualifying text node in `range` and links the wrappers
    /// into a chain whose first element gets `first_id` as its DOM id.
    ///
    /// Returns the wrappers in document order; empty for a collapsed range or
    /// one that covers no wrappable text.
    pub fn mark(
        &self,
        doc: &mut Document,
        range: &Range,
        style_class: Option<&str>,
        first_id: Option<&str>,
    ) -> Result<Vec<NodeId>, DomError> {
        if range.is_collapsed() {
            return Ok(Vec::new());
        }
        if !range.is_valid(doc) {
            return Err(DomError::InvalidRange);
        }

        let (start, end, split) = split_boundaries(doc, range.start, range.end)?;
        let texts = wrappable_texts(doc, start, end);
        if texts.is_empty() {
            rejoin_splits(doc, &split)?;
            return Ok(Vec::new());
        }

        let chain_root = match first_id {
            Some(id) => id.to_string(),
            None => format!("c{}", Uuid::new_v4().simple()),
        };
        let mut classes = vec![self.config.class.as_str()];
        if let Some(style) = style_class.filter(|style| !style.is_empty()) {
            classes.push(style);
        }

        let mut wrappers: Vec<NodeId> = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            let parent = doc.parent(*text).ok_or(DomError::Detached(*text))?;
            let wrapper = doc.create_element(&self.config.tag);
            let private_id = format!("{chain_root}.{index}");
            doc.set_classes(wrapper, &classes)?;
            doc.set_attr(wrapper, &self.config.chain_attr, &private_id)?;
            match wrappers.last() {
                None => {
                    if let Some(id) = first_id {
                        doc.set_attr(wrapper, "id", id)?;
                    }
                }
                Some(previous) => {
                    let first_ref = match first_id {
                        Some(id) => id.to_string(),
                        None => format!("{chain_root}.0"),
                    };
                    doc.set_attr(wrapper, &self.config.first_attr, &first_ref)?;
                    doc.set_attr(*previous, &self.config.next_attr, &private_id)?;
                }
            }
            doc.insert_before(parent, wrapper, Some(*text))?;
            doc.append_child(wrapper, *text)?;
            wrappers.push(wrapper);
        }

        debug!(chain = %chain_root, wrappers = wrappers.len(), "marked range");
        Ok(wrappers)
    }

    /// Removes the chain containing `any_id`, hoisting wrapped content back
    /// into place and merging text nodes the wrappers had separated.
    /// Returns the detached wrappers.
    pub fn unmark(&self, doc: &mut Document, any_id: &str) -> Result<Vec<NodeId>, DomError> {
        let chain = self.mark_elements(doc, any_id);
        for wrapper in &chain {
            let Some(parent) = doc.parent(*wrapper) else {
                continue;
            };
            let index = doc
                .index_in_parent(*wrapper)
                .ok_or(DomError::Detached(*wrapper))?;
            let children = doc.children(*wrapper).to_vec();
            for child in &children {
                doc.insert_before(parent, *child, Some(*wrapper))?;
            }
            doc.detach(*wrapper)?;
            doc.merge_adjacent_text(parent, index.saturating_sub(1), index + children.len())?;
        }
        if !chain.is_empty() {
            debug!(id = any_id, wrappers = chain.len(), "unmarked chain");
        }
        Ok(chain)
    }

    /// Replaces every class on the chain not listed in `keep` with `class`.
    pub fn update(
        &self,
        doc: &mut Document,
        any_id: &str,
        class: &str,
        keep: &[&str],
    ) -> Result<Vec<NodeId>, DomError> {
        let chain = self.mark_elements(doc, any_id);
        for wrapper in &chain {
            let mut classes: Vec<String> = doc
                .classes(*wrapper)
                .into_iter()
                .filter(|existing| keep.contains(existing))
                .map(str::to_string)
                .collect();
            if !class.is_empty() && !classes.iter().any(|existing| existing == class) {
                classes.push(class.to_string());
            }
            doc.set_classes(*wrapper, &classes)?;
        }
        Ok(chain)
    }

    /// The chain `any_id` belongs to, in order. `any_id` may be the DOM id of
    /// the first wrapper or the private id of any wrapper.
    pub fn mark_elements(&self, doc: &Document, any_id: &str) -> Vec<NodeId> {
        let index = self.chain_index(doc);
        let Some(mut current) = index.get(any_id).copied() else {
            return Vec::new();
        };
        if let Some(first) = doc
            .attr(current, &self.config.first_attr)
            .and_then(|first| index.get(first))
        {
            current = *first;
        }

        let mut chain = vec![current];
        while let Some(next) = doc
            .attr(current, &self.config.next_attr)
            .and_then(|next| index.get(next).copied())
        {
            if chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = next;
        }
        chain
    }

    /// Range from just before the first wrapper to just after the last.
    pub fn range(&self, doc: &Document, any_id: &str) -> Option<Range> {
        let chain = self.mark_elements(doc, any_id);
        let start = Boundary::before(doc, *chain.first()?)?;
        let end = Boundary::after(doc, *chain.last()?)?;
        Some(Range::new(start, end))
    }

    /// The highlight under `node`: the innermost wrapper containing it, which
    /// is the last matching wrapper in document order.
    pub fn highlight_at(&self, doc: &Document, node: NodeId) -> Option<String> {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.is_marker(doc, id) {
                return self.root_id(doc, id);
            }
            current = doc.parent(id);
        }
        None
    }

    /// Root ids of every chain in the document, in document order.
    pub fn highlight_ids(&self, doc: &Document) -> Vec<String> {
        doc.descendants(Document::ROOT)
            .filter(|node| {
                self.is_marker(doc, *node) && doc.attr(*node, &self.config.first_attr).is_none()
            })
            .filter_map(|node| self.root_id(doc, node))
            .collect()
    }

    fn root_id(&self, doc: &Document, wrapper: NodeId) -> Option<String> {
        doc.attr(wrapper, &self.config.first_attr)
            .or_else(|| doc.attr(wrapper, "id"))
            .or_else(|| doc.attr(wrapper, &self.config.chain_attr))
            .map(str::to_string)
    }

    /// Attached wrappers keyed by private id and, for first wrappers, DOM id.
    fn chain_index<'a>(&self, doc: &'a Document) -> HashMap<&'a str, NodeId> {
        let mut index = HashMap::new();
        for node in doc.descendants(Document::ROOT) {
            let Some(private_id) = doc.attr(node, &self.config.chain_attr) else {
                continue;
            };
            index.entry(private_id).or_insert(node);
            if let Some(id) = doc.attr(node, "id") {
                index.entry(id).or_insert(node);
            }
        }
        index
    }
}

fn text_len(doc: &Document, node: NodeId) -> Option<usize> {
    doc.text(node).map(|text| text.chars().count())
}

/// Splits text nodes at the range edges so the covered text is made of whole
/// nodes. Offsets at either edge of a text node need no split.
/// Splits the text nodes the boundaries fall inside. Also returns the nodes
/// that were split, in split order, so the splits can be undone.
fn split_boundaries(
    doc: &mut Document,
    mut start: Boundary,
    mut end: Boundary,
) -> Result<(Boundary, Boundary, Vec<NodeId>), DomError> {
    let mut split = Vec::new();
    if let Some(len) = text_len(doc, end.node)
        && end.offset > 0
        && end.offset < len
    {
        doc.split_text(end.node, end.offset)?;
        split.push(end.node);
    }
    if let Some(len) = text_len(doc, start.node)
        && start.offset > 0
        && start.offset < len
    {
        let parent = doc.parent(start.node);
        let index = doc.index_in_parent(start.node);
        let tail = doc.split_text(start.node, start.offset)?;
        if end.node == start.node {
            end = Boundary::new(tail, end.offset - start.offset);
        } else if parent == Some(end.node) && index.is_some_and(|index| end.offset > index) {
            end.offset += 1;
        }
        split.push(start.node);
        start = Boundary::new(tail, 0);
    }
    Ok((start, end, split))
}

/// Joins each split node with the tail split off it, newest split first.
fn rejoin_splits(doc: &mut Document, split: &[NodeId]) -> Result<(), DomError> {
    for head in split.iter().rev() {
        let parent = doc.parent(*head).ok_or(DomError::Detached(*head))?;
        let index = doc
            .index_in_parent(*head)
            .ok_or(DomError::Detached(*head))?;
        doc.merge_adjacent_text(parent, index, index + 1)?;
    }
    Ok(())
}

/// Non-empty text nodes fully inside `start..end`, skipping terminal
/// elements and text sitting directly in table structure.
fn wrappable_texts(doc: &Document, start: Boundary, end: Boundary) -> Vec<NodeId> {
    let (Some(start_key), Some(end_key)) = (
        doc.position_key(start.node, start.offset),
        doc.position_key(end.node, end.offset),
    ) else {
        return Vec::new();
    };

    let mut current = if doc.is_text(start.node) {
        Some(start.node)
    } else {
        match doc.children(start.node).get(start.offset) {
            Some(child) => Some(*child),
            None => doc.next_in_preorder(start.node, true),
        }
    };

    let mut texts = Vec::new();
    while let Some(node) = current {
        match doc.position_key(node, 0) {
            Some(key) if key < end_key => {}
            _ => break,
        }
        if let Some(len) = text_len(doc, node) {
            let qualifies = len > 0
                && doc.position_key(node, 0).is_some_and(|key| key >= start_key)
                && doc.position_key(node, len).is_some_and(|key| key <= end_key)
                && !doc
                    .parent(node)
                    .and_then(|parent| doc.tag_name(parent))
                    .is_some_and(|name| TABLE_STRUCTURAL_ELEMENTS.contains(&name))
                && !doc.inside_terminal(node);
            if qualifies {
                texts.push(node);
            }
        }
        let opaque = doc
            .tag_name(node)
            .is_some_and(|name| TERMINAL_ELEMENTS.contains(&name));
        current = doc.next_in_preorder(node, opaque);
    }
    texts
}
