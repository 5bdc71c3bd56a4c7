#![no_main]

use libfuzzer_sys::fuzz_target;
use zonesync_core::core_zone::{apply, ZoneDelta, ZoneSnapshot};

fuzz_target!(|data: &[u8]| {
    let Ok(delta) = serde_json::from_slice::<ZoneDelta>(data) else {
        return;
    };
    if delta.validate().is_err() {
        return;
    }
    let zone = ZoneSnapshot::default().with_cells(delta.removed.iter().cloned());
    let once = apply(&zone, &delta);
    // Applying a valid delta twice changes nothing further
    assert_eq!(apply(&once, &delta), once);
    for cell in &delta.added {
        assert!(once.contains(cell));
    }
});
