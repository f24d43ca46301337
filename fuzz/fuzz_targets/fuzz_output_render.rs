#![no_main]
use libfuzzer_sys::fuzz_target;

use fleetwatch::text::{ellipsize, split_fenced};
use fleetwatch::ui::preview::output_text;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let _ = split_fenced(&text);
    let _ = output_text(&text);
    let _ = ellipsize(&text, 12);
});
