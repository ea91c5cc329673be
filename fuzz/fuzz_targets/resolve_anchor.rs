#![no_main]

use highlog::{Anchor, Document, Marker, anchor::path, to_range};
use libfuzzer_sys::fuzz_target;

const PAGE: &str = "<html><body><div id=\"main\"><p>one <b>two</b> three</p>\
<p id=\"x\">four</p><p id=\"x\">five</p></div><script>six</script></body></html>";

fuzz_target!(|data: &[u8]| {
    let mut doc = Document::parse_html(PAGE);
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = path::decode(&doc, text);
    }
    let Ok(anchor) = serde_json::from_slice::<Anchor>(data) else {
        return;
    };
    if let Some(range) = to_range(&doc, &anchor) {
        let _ = Marker::default().mark(&mut doc, &range, None, Some("hlfuzz"));
    }
});
