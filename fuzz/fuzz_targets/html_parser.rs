#![no_main]

use highlog::{Document, Marker, Range};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let mut doc = Document::parse_html(input);
    let _ = Document::parse_html(&doc.to_html());

    let needle: String = doc.text_content(Document::ROOT).chars().skip(1).take(5).collect();
    if let Some(range) = Range::find_text(&doc, &needle) {
        let marker = Marker::default();
        let _ = marker.mark(&mut doc, &range, Some("fuzz"), Some("hlfuzz"));
        let _ = marker.unmark(&mut doc, "hlfuzz");
    }
});
