#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The board arrives in two undiscriminated shapes; the untagged
    // sniffing must never panic, whatever the bytes look like.
    let _ = serde_json::from_slice::<serpentia_client::protocol::BoardPayload>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<serpentia_client::protocol::BoardPayload>(s);
    }
});
