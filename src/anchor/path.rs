//! Structural path descriptors for nodes.
//!
//! Paths use an XPath subset:
//!
//! - `/html/body/div[2]/text()[3]` - absolute, positional
//! - `//*[@id='intro']/p/text()` - anchored at a document-unique id
//! - `div[@id='x']` - id predicate when the id is unique among siblings only
//!
//! A step without predicate selects the first node of its kind, which is what
//! the encoder relies on to keep paths short.

use crate::dom::{Document, NodeId, NodeKind};

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Element(String),
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    test: NodeTest,
    predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    Root,
    Id(String),
}

/// Encodes the path of `node`, or `None` when an ancestor is neither an
/// element nor a text node, or the node is detached.
pub fn encode(doc: &Document, node: NodeId) -> Option<String> {
    let mut steps: Vec<String> = Vec::new();
    let mut current = node;
    loop {
        match doc.kind(current)? {
            NodeKind::Document => {
                if steps.is_empty() {
                    return None;
                }
                steps.reverse();
                return Some(format!("/{}", steps.join("/")));
            }
            NodeKind::Element(data) => {
                let id = doc.attr(current, "id").filter(|id| !id.is_empty());
                if let Some(id) = id
                    && let Some(literal) = quote(id)
                {
                    if doc.elements_with_id(id).take(2).count() == 1 {
                        steps.push(format!("//*[@id={literal}]"));
                        steps.reverse();
                        return Some(steps.join("/"));
                    }
                    if unique_among_siblings(doc, current, id) {
                        steps.push(format!("{}[@id={literal}]", data.name));
                        current = doc.parent(current)?;
                        continue;
                    }
                }
                steps.push(positional(&data.name, position(doc, current)));
            }
            NodeKind::Text(_) => steps.push(positional("text()", position(doc, current))),
            NodeKind::Comment(_) => return None,
        }
        current = doc.parent(current)?;
    }
}

/// Resolves a path produced by [`encode`]. Anything that does not select
/// exactly one node resolves to `None`.
pub fn decode(doc: &Document, path: &str) -> Option<NodeId> {
    let (origin, steps) = parse(path)?;
    let mut context = match origin {
        Origin::Root => Document::ROOT,
        Origin::Id(id) => {
            let mut matches = doc.elements_with_id(&id);
            let found = matches.next()?;
            if matches.next().is_some() {
                return None;
            }
            found
        }
    };
    for step in steps {
        context = select(doc, context, &step)?;
    }
    Some(context)
}

fn positional(test: &str, index: usize) -> String {
    if index == 1 {
        test.to_string()
    } else {
        format!("{test}[{index}]")
    }
}

/// 1-based index among preceding siblings of the same kind and name.
fn position(doc: &Document, node: NodeId) -> usize {
    let Some(parent) = doc.parent(node) else {
        return 1;
    };
    let test = node_test(doc, node);
    doc.children(parent)
        .iter()
        .take_while(|sibling| **sibling != node)
        .filter(|sibling| test.is_some() && node_test(doc, **sibling) == test)
        .count()
        + 1
}

fn node_test(doc: &Document, node: NodeId) -> Option<NodeTest> {
    match doc.kind(node)? {
        NodeKind::Element(data) => Some(NodeTest::Element(data.name.clone())),
        NodeKind::Text(_) => Some(NodeTest::Text),
        _ => None,
    }
}

fn unique_among_siblings(doc: &Document, node: NodeId, id: &str) -> bool {
    let Some(parent) = doc.parent(node) else {
        return false;
    };
    doc.children(parent)
        .iter()
        .filter(|sibling| doc.attr(**sibling, "id") == Some(id))
        .count()
        == 1
}

fn select(doc: &Document, context: NodeId, step: &Step) -> Option<NodeId> {
    let mut candidates = doc
        .children(context)
        .iter()
        .copied()
        .filter(|child| node_test(doc, *child).as_ref() == Some(&step.test));
    match &step.predicate {
        Predicate::Position(index) => candidates.nth(index.checked_sub(1)?),
        Predicate::Id(id) => {
            let mut matching = candidates.filter(|child| doc.attr(*child, "id") == Some(id));
            let found = matching.next()?;
            if matching.next().is_some() {
                return None;
            }
            Some(found)
        }
    }
}

/// XPath 1.0 string literal; ids containing both quote kinds cannot be
/// expressed and fall back to positional steps.
fn quote(value: &str) -> Option<String> {
    if !value.contains('\'') {
        Some(format!("'{value}'"))
    } else if !value.contains('"') {
        Some(format!("\"{value}\""))
    } else {
        None
    }
}

fn parse(path: &str) -> Option<(Origin, Vec<Step>)> {
    let mut cursor = Cursor { rest: path };
    let origin = if cursor.eat("//*[@id=") {
        let id = cursor.literal()?;
        if !cursor.eat("]") {
            return None;
        }
        Origin::Id(id)
    } else if cursor.peek() == Some('/') {
        Origin::Root
    } else {
        return None;
    };

    let mut steps = Vec::new();
    while !cursor.rest.is_empty() {
        if !cursor.eat("/") {
            return None;
        }
        steps.push(cursor.step()?);
    }
    if matches!(origin, Origin::Root) && steps.is_empty() {
        return None;
    }
    Some((origin, steps))
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        match self.rest.strip_prefix(token) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn literal(&mut self) -> Option<String> {
        let quote = self.peek().filter(|ch| matches!(ch, '\'' | '"'))?;
        let body = &self.rest[1..];
        let end = body.find(quote)?;
        let value = body[..end].to_string();
        self.rest = &body[end + 1..];
        Some(value)
    }

    fn step(&mut self) -> Option<Step> {
        let test = if self.eat("text()") {
            NodeTest::Text
        } else {
            let len = self
                .rest
                .find(['/', '['])
                .unwrap_or(self.rest.len());
            let name = &self.rest[..len];
            if name.is_empty() || !name.chars().all(|ch| ch.is_alphanumeric() || "-_:.".contains(ch))
            {
                return None;
            }
            self.rest = &self.rest[len..];
            NodeTest::Element(name.to_ascii_lowercase())
        };

        let predicate = if self.eat("[@id=") {
            let id = self.literal()?;
            if !self.eat("]") {
                return None;
            }
            Predicate::Id(id)
        } else if self.eat("[") {
            let end = self.rest.find(']')?;
            let index = self.rest[..end].parse::<usize>().ok().filter(|n| *n > 0)?;
            self.rest = &self.rest[end + 1..];
            Predicate::Position(index)
        } else {
            Predicate::Position(1)
        };
        Some(Step { test, predicate })
    }
}
