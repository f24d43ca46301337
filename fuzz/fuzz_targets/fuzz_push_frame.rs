#![no_main]
use libfuzzer_sys::fuzz_target;

use fleetwatch::push::parse_push_frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Some(event) = parse_push_frame(text) {
            let _ = event.agent_id();
            let _ = event.name();
        }
    }
});
