#![no_main]
use libfuzzer_sys::fuzz_target;

use fleetwatch::models::TasksDocument;
use fleetwatch::sync::AgentViewSynchronizer;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(doc) = TasksDocument::from_json(text) {
        let mut sync = AgentViewSynchronizer::new(3);
        sync.set_viewports(10, 5);
        sync.reconcile(&doc.agents);
        // A second identical pass must not panic on any decoded shape.
        sync.reconcile(&doc.agents);
    }
});
