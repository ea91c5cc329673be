#![no_main]

use highlog::{MemoryBackend, Store};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut store) = Store::new(MemoryBackend::new()) else {
        return;
    };
    if store.import(data).is_err() {
        return;
    }
    for page in store.page_keys().unwrap_or_default() {
        let _ = store.sum(&page);
        let _ = store.remove_superfluous(&page);
    }
    let _ = store.remove_orphans();
});
