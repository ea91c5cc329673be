//! Arena document model.
//!
//! This module provides the tree the anchoring and marking algorithms operate
//! on. It mirrors the parts of a browser DOM those algorithms rely on:
//!
//! - [`Document`] - node arena with parent/child links
//! - [`NodeKind`] - document, element, text and comment nodes
//! - [`range`] - boundary points and ranges over the tree
//! - [`html`] - a tolerant tag-soup parser and serializer
//!
//! Nodes are never freed. Removing a node detaches it from its parent and the
//! id stays valid, so callers can still inspect what was removed.

use std::cmp::Ordering;

pub mod html;
pub mod range;

pub use range::{Boundary, Range};

/// Elements whose children are opaque to text traversal.
pub const TERMINAL_ELEMENTS: &[&str] = &["script", "style", "select", "noscript", "template"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    /// Lowercased tag name.
    pub name: String,
    /// Attributes in source order, names lowercased.
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("node {0:?} cannot have children")]
    NotAContainer(NodeId),
    #[error("node {0:?} is not a text node")]
    NotText(NodeId),
    #[error("node {0:?} is not an element")]
    NotElement(NodeId),
    #[error("offset {offset} out of bounds for node {node:?} of length {len}")]
    OffsetOutOfBounds {
        node: NodeId,
        offset: usize,
        len: usize,
    },
    #[error("cannot insert {child:?} into its own subtree")]
    HierarchyRequest { child: NodeId },
    #[error("reference {reference:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, reference: NodeId },
    #[error("node {0:?} has no parent")]
    Detached(NodeId),
    #[error("range endpoints are detached, out of bounds or reversed")]
    InvalidRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    nodes: Vec<Node>,
    pub doctype: Option<String>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            doctype: None,
        }
    }

    pub fn root(&self) -> NodeId {
        Self::ROOT
    }

    fn node(&self, id: NodeId) -> Result<&Node, DomError> {
        self.nodes.get(id.index()).ok_or(DomError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(DomError::UnknownNode(id))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push(NodeKind::Element(ElementData {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Comment(text.to_string()))
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).ok().map(|node| &node.kind)
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Element(_)))
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Text(_)))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok().and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).first().copied()
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|child| *child == id)
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let index = self.index_in_parent(id)?;
        index
            .checked_sub(1)
            .and_then(|prev| self.children(parent).get(prev).copied())
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let index = self.index_in_parent(id)?;
        self.children(parent).get(index + 1).copied()
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element(data) => Some(data.name.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element(data) => data
                .attrs
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData, DomError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element(data) => Ok(data),
            _ => Err(DomError::NotElement(id)),
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let data = self.element_mut(id)?;
        let name = name.to_ascii_lowercase();
        match data.attrs.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => data.attrs.push((name, value.to_string())),
        }
        Ok(())
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<Option<String>, DomError> {
        let data = self.element_mut(id)?;
        let position = data
            .attrs
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name));
        Ok(position.map(|idx| data.attrs.remove(idx).1))
    }

    pub fn classes(&self, id: NodeId) -> Vec<&str> {
        self.attr(id, "class")
            .map(|value| value.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn set_classes<S: AsRef<str>>(&mut self, id: NodeId, classes: &[S]) -> Result<(), DomError> {
        if classes.is_empty() {
            self.remove_attr(id, "class")?;
            return Ok(());
        }
        let joined = classes
            .iter()
            .map(|class| class.as_ref())
            .collect::<Vec<_>>()
            .join(" ");
        self.set_attr(id, "class", &joined)
    }

    /// DOM node length: characters for character data, child count otherwise.
    pub fn node_length(&self, id: NodeId) -> usize {
        match self.kind(id) {
            Some(NodeKind::Text(text)) | Some(NodeKind::Comment(text)) => text.chars().count(),
            Some(_) => self.children(id).len(),
            None => 0,
        }
    }

    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.contains(Self::ROOT, id)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Inserts `child` into `parent` before `reference`, or last when there is
    /// no reference. A child that already has a parent is moved.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        match self.node(parent)?.kind {
            NodeKind::Document | NodeKind::Element(_) => {}
            _ => return Err(DomError::NotAContainer(parent)),
        }
        self.node(child)?;
        if self.contains(child, parent) {
            return Err(DomError::HierarchyRequest { child });
        }
        if let Some(reference) = reference
            && self.parent(reference) != Some(parent)
        {
            return Err(DomError::NotAChild { parent, reference });
        }
        if reference == Some(child) {
            return Ok(());
        }

        self.detach(child)?;
        let index = match reference {
            Some(reference) => self
                .index_in_parent(reference)
                .ok_or(DomError::NotAChild { parent, reference })?,
            None => self.children(parent).len(),
        };
        self.node_mut(parent)?.children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Removes `id` from its parent. Detached nodes are left untouched.
    pub fn detach(&mut self, id: NodeId) -> Result<(), DomError> {
        let Some(parent) = self.node(id)?.parent else {
            return Ok(());
        };
        self.node_mut(parent)?.children.retain(|child| *child != id);
        self.node_mut(id)?.parent = None;
        Ok(())
    }

    /// Splits a text node at a character offset. The original node keeps the
    /// leading part; the trailing part becomes a new sibling right after it.
    pub fn split_text(&mut self, id: NodeId, offset: usize) -> Result<NodeId, DomError> {
        let text = self.text(id).ok_or(DomError::NotText(id))?;
        let len = text.chars().count();
        if offset > len {
            return Err(DomError::OffsetOutOfBounds {
                node: id,
                offset,
                len,
            });
        }
        let byte = char_to_byte(text, offset);
        let tail = text[byte..].to_string();
        if let NodeKind::Text(existing) = &mut self.node_mut(id)?.kind {
            existing.truncate(byte);
        }
        let new_node = self.create_text(&tail);
        if let Some(parent) = self.parent(id) {
            let reference = self.next_sibling(id);
            self.insert_before(parent, new_node, reference)?;
        }
        Ok(new_node)
    }

    /// Merges runs of adjacent text nodes among `parent`'s children whose
    /// indices fall within `from..=to`. Returns the nodes merged away.
    pub fn merge_adjacent_text(
        &mut self,
        parent: NodeId,
        from: usize,
        to: usize,
    ) -> Result<Vec<NodeId>, DomError> {
        let mut merged = Vec::new();
        let mut index = from;
        let mut last = to.min(self.children(parent).len().saturating_sub(1));
        while index < last {
            let left = self.children(parent)[index];
            let right = self.children(parent)[index + 1];
            match (self.text(left), self.text(right)) {
                (Some(_), Some(tail)) => {
                    let tail = tail.to_string();
                    if let NodeKind::Text(head) = &mut self.node_mut(left)?.kind {
                        head.push_str(&tail);
                    }
                    self.detach(right)?;
                    merged.push(right);
                    last -= 1;
                }
                _ => index += 1,
            }
        }
        Ok(merged)
    }

    /// Preorder successor of `id`, optionally skipping its subtree.
    pub fn next_in_preorder(&self, id: NodeId, skip_children: bool) -> Option<NodeId> {
        if !skip_children && let Some(child) = self.first_child(id) {
            return Some(child);
        }
        let mut current = id;
        loop {
            if let Some(sibling) = self.next_sibling(current) {
                return Some(sibling);
            }
            current = self.parent(current)?;
        }
    }

    /// Preorder iterator over `id` and its descendants.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            stack: vec![id],
        }
    }

    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .filter_map(|node| self.text(node))
            .collect()
    }

    /// Attached elements whose `id` attribute equals `value`, in document order.
    pub fn elements_with_id<'a>(&'a self, value: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.descendants(Self::ROOT)
            .filter(move |node| self.attr(*node, "id") == Some(value))
    }

    pub fn element_by_id(&self, value: &str) -> Option<NodeId> {
        self.elements_with_id(value).next()
    }

    pub fn title(&self) -> Option<String> {
        self.descendants(Self::ROOT)
            .find(|node| self.tag_name(*node) == Some("title"))
            .map(|node| self.text_content(node).trim().to_string())
            .filter(|title| !title.is_empty())
    }

    /// Child-index path from the root to a boundary point, with the offset
    /// appended. Comparing two keys lexicographically orders the points.
    pub fn position_key(&self, node: NodeId, offset: usize) -> Option<Vec<usize>> {
        let mut key = vec![offset];
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            key.push(self.index_in_parent(current)?);
            current = parent;
        }
        if current != Self::ROOT {
            return None;
        }
        key.reverse();
        Some(key)
    }

    /// Orders two boundary points; `None` when either is detached.
    pub fn compare_points(&self, a: Boundary, b: Boundary) -> Option<Ordering> {
        let left = self.position_key(a.node, a.offset)?;
        let right = self.position_key(b.node, b.offset)?;
        Some(left.cmp(&right))
    }

    /// Whether any ancestor-or-self of `id` is a terminal element.
    pub fn inside_terminal(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if self
                .tag_name(node)
                .is_some_and(|name| TERMINAL_ELEMENTS.contains(&name))
            {
                return true;
            }
            current = self.parent(node);
        }
        false
    }
}

pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.doc.children(id).iter().rev().copied());
        Some(id)
    }
}

pub(crate) fn char_to_byte(text: &str, offset: usize) -> usize {
    text.char_indices()
        .nth(offset)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}
