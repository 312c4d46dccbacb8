#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Exercise the raw-byte deserialization path (includes serde_json's
    // own UTF-8 validation and error handling for invalid sequences).
    let _ = serde_json::from_slice::<serpentia_client::protocol::ServerFrame>(data);

    // Also exercise the str-based paths for valid UTF-8 input, including
    // both event families carried inside Message bodies.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<serpentia_client::protocol::ServerFrame>(s);
        let _ = serde_json::from_str::<serpentia_client::protocol::RoomChangeEvent>(s);
        let _ = serde_json::from_str::<serpentia_client::protocol::GameEvent>(s);
    }
});
