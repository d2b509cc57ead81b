#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<versus_client::protocol::ServerMessage>(data);

    // The router must never panic, whatever the server sends.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = versus_client::router::route(s);
    }
});
