//! Random pages and ranges shared by the property tests.
#![allow(dead_code)]
use highlog::{Boundary, Document, NodeId, Range};
use proptest::prelude::*;
use proptest::sample::Index;

/// Words mixing ASCII with multi-byte text: accented Latin, CJK, emoji and
/// typographic quotes.
pub fn word() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "[a-z]{1,6}",
        1 => "[a-zàéîöüçñ]{1,6}",
        1 => "[一-龥]{1,4}",
        1 => "[😀-😏]{1,2}",
        1 => "“[a-zé]{1,4}”",
    ]
}

pub fn page() -> impl Strategy<Value = String> {
    let segment = prop_oneof![
        3 => word().prop_map(|word| format!("{word} ")),
        1 => word().prop_map(|word| format!("<b>{word}</b> ")),
        1 => word().prop_map(|word| format!("<i>{word} &amp; co</i>")),
        1 => word(),
    ];
    let block = (
        prop::sample::select(vec!["p", "div", "blockquote"]),
        prop::option::of(prop::sample::select(vec!["a", "b", "c"])),
        prop::collection::vec(segment, 1..6),
    )
        .prop_map(|(tag, id, segments)| {
            let id = id.map(|id| format!(" id=\"{id}\"")).unwrap_or_default();
            format!("<{tag}{id}>{}</{tag}>", segments.concat())
        });
    prop::collection::vec(block, 1..5)
        .prop_map(|blocks| format!("<html><body>{}</body></html>", blocks.concat()))
}

pub type Picks = (Index, Index, Index, Index);

pub fn picks() -> impl Strategy<Value = Picks> {
    (any::<Index>(), any::<Index>(), any::<Index>(), any::<Index>())
}

pub fn text_nodes(doc: &Document) -> Vec<NodeId> {
    doc.descendants(Document::ROOT)
        .filter(|node| doc.text(*node).is_some_and(|text| !text.is_empty()))
        .collect()
}

/// A non-collapsed range between two text positions, in document order.
pub fn pick_range(doc: &Document, (a, b, offset_a, offset_b): Picks) -> Option<Range> {
    let texts = text_nodes(doc);
    if texts.is_empty() {
        return None;
    }
    let first = Boundary::new(texts[a.index(texts.len())], 0);
    let first = Boundary::new(first.node, offset_a.index(doc.node_length(first.node) + 1));
    let second = Boundary::new(texts[b.index(texts.len())], 0);
    let second = Boundary::new(second.node, offset_b.index(doc.node_length(second.node) + 1));

    let (start, end) = match doc.compare_points(first, second)? {
        std::cmp::Ordering::Less => (first, second),
        std::cmp::Ordering::Greater => (second, first),
        std::cmp::Ordering::Equal => return None,
    };
    Some(Range::new(start, end))
}
