//! Tolerant HTML tag-soup parser and serializer.
//!
//! Parsing never fails: stray end tags are dropped, unclosed elements are
//! closed at end of input, and unknown entities are kept verbatim.

use super::{Document, NodeId, NodeKind};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

impl Document {
    pub fn parse_html(input: &str) -> Document {
        Parser::new(input).run()
    }

    /// Serializes the children of the document root, preceded by the doctype.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        if let Some(doctype) = &self.doctype {
            out.push_str("<!");
            out.push_str(doctype);
            out.push('>');
        }
        for child in self.children(Document::ROOT) {
            self.write_node(*child, &mut out);
        }
        out
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_node(*child, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            Some(NodeKind::Document) => {
                for child in self.children(id) {
                    self.write_node(*child, out);
                }
            }
            Some(NodeKind::Element(data)) => {
                out.push('<');
                out.push_str(&data.name);
                for (name, value) in &data.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&data.name.as_str()) {
                    return;
                }
                let raw = matches!(data.name.as_str(), "script" | "style");
                for child in self.children(id) {
                    match (raw, self.text(*child)) {
                        (true, Some(text)) => out.push_str(text),
                        _ => self.write_node(*child, out),
                    }
                }
                out.push_str("</");
                out.push_str(&data.name);
                out.push('>');
            }
            Some(NodeKind::Text(text)) => escape_into(text, false, out),
            Some(NodeKind::Comment(text)) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            None => {}
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity.strip_prefix('#').and_then(|num| {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }),
            };
            ch.map(|ch| (ch, end))
        });
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte offset of the closing `>` of a tag starting at `rest`, or the end of
/// input when it is missing, paired with the number of bytes the tag spans.
fn tag_end(rest: &str) -> (usize, usize) {
    match rest.find('>') {
        Some(gt) => (gt, gt + 1),
        None => (rest.len(), rest.len()),
    }
}

/// Whether opening `new` implicitly closes an open `current` element.
fn closes_implicitly(new: &str, current: &str) -> bool {
    match current {
        "p" => matches!(
            new,
            "p" | "div" | "ul" | "ol" | "table" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "pre"
                | "blockquote" | "section" | "article"
        ),
        "li" => new == "li",
        "dt" | "dd" => matches!(new, "dt" | "dd"),
        "td" | "th" => matches!(new, "td" | "th" | "tr"),
        "tr" => new == "tr",
        "option" => new == "option",
        _ => false,
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    doc: Document,
    open: Vec<NodeId>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            doc: Document::new(),
            open: vec![Document::ROOT],
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn current(&self) -> NodeId {
        self.open.last().copied().unwrap_or(Document::ROOT)
    }

    fn append(&mut self, node: NodeId) {
        let parent = self.current();
        // The parent is always an element or the root, so this cannot fail.
        let _ = self.doc.append_child(parent, node);
    }

    fn run(mut self) -> Document {
        while self.pos < self.input.len() {
            let rest = self.rest();
            if rest.starts_with("<!--") {
                self.comment();
            } else if rest.starts_with("</") {
                self.end_tag();
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                self.declaration();
            } else if rest.starts_with('<')
                && rest[1..].starts_with(|ch: char| ch.is_ascii_alphabetic())
            {
                self.start_tag();
            } else {
                self.text();
            }
        }
        self.doc
    }

    fn comment(&mut self) {
        let body = &self.rest()[4..];
        let (text, consumed) = match body.find("-->") {
            Some(end) => (&body[..end], end + 3),
            None => (body, body.len()),
        };
        let node = self.doc.create_comment(text);
        self.append(node);
        self.pos += 4 + consumed;
    }

    fn declaration(&mut self) {
        let rest = self.rest();
        let (end, consumed) = tag_end(rest);
        let body = &rest[2..end.max(2)];
        if rest.starts_with("<!") && body.to_ascii_lowercase().starts_with("doctype") {
            self.doc.doctype = Some(body.to_string());
        }
        self.pos += consumed;
    }

    fn end_tag(&mut self) {
        let rest = self.rest();
        let (end, consumed) = tag_end(rest);
        let name = rest[2..end.max(2)].trim().to_ascii_lowercase();
        self.pos += consumed;
        if let Some(index) = self
            .open
            .iter()
            .rposition(|id| self.doc.tag_name(*id) == Some(name.as_str()))
            && index > 0
        {
            self.open.truncate(index);
        }
    }

    fn text(&mut self) {
        let rest = self.rest();
        let mut end = rest.len();
        // Skip the first char: it may be a '<' that starts no tag.
        let mut search = rest.chars().next().map_or(0, char::len_utf8);
        while let Some(offset) = rest[search..].find('<') {
            let at = search + offset;
            let next = &rest[at + 1..];
            if next.starts_with(|ch: char| ch.is_ascii_alphabetic() || matches!(ch, '/' | '!' | '?'))
            {
                end = at;
                break;
            }
            search = at + 1;
        }
        let node = self.doc.create_text(&decode_entities(&rest[..end]));
        self.append(node);
        self.pos += end;
    }

    fn start_tag(&mut self) {
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let mut i = 1;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'>' | b'/')
        {
            i += 1;
        }
        let name = rest[1..i].to_ascii_lowercase();
        let mut attrs = Vec::new();
        let mut self_closing = false;

        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                break;
            }
            match bytes[i] {
                b'>' => {
                    i += 1;
                    break;
                }
                b'/' => {
                    self_closing = true;
                    i += 1;
                    continue;
                }
                _ => {}
            }
            let start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && !matches!(bytes[i], b'=' | b'>' | b'/')
            {
                i += 1;
            }
            let attr_name = rest[start..i].to_ascii_lowercase();
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let mut value = String::new();
            if i < bytes.len() && bytes[i] == b'=' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                if i < bytes.len() && matches!(bytes[i], b'"' | b'\'') {
                    let quote = bytes[i] as char;
                    let body = &rest[i + 1..];
                    let len = body.find(quote).unwrap_or(body.len());
                    value = decode_entities(&body[..len]);
                    i = (i + 1 + len + 1).min(bytes.len());
                } else {
                    let start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                        i += 1;
                    }
                    value = decode_entities(&rest[start..i]);
                }
            }
            if !attr_name.is_empty() && !attrs.iter().any(|(key, _)| *key == attr_name) {
                attrs.push((attr_name, value));
            }
            self_closing = false;
        }
        self.pos += i;

        while self.open.len() > 1
            && self
                .doc
                .tag_name(self.current())
                .is_some_and(|open| closes_implicitly(&name, open))
        {
            self.open.pop();
        }

        let node = self.doc.create_element(&name);
        for (key, value) in &attrs {
            let _ = self.doc.set_attr(node, key, value);
        }
        self.append(node);

        if VOID_ELEMENTS.contains(&name.as_str()) || self_closing {
            return;
        }
        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            let rest = self.rest();
            let closing = format!("</{name}");
            let end = rest
                .to_ascii_lowercase()
                .find(&closing)
                .unwrap_or(rest.len());
            if end > 0 {
                let raw = &rest[..end];
                let text = if matches!(name.as_str(), "script" | "style") {
                    raw.to_string()
                } else {
                    decode_entities(raw)
                };
                let child = self.doc.create_text(&text);
                let _ = self.doc.append_child(node, child);
            }
            self.pos += end;
            let rest = self.rest();
            if !rest.is_empty() {
                self.pos += rest.find('>').map(|gt| gt + 1).unwrap_or(rest.len());
            }
            return;
        }
        self.open.push(node);
    }
}
