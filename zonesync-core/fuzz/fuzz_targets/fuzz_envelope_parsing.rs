#![no_main]

use libfuzzer_sys::fuzz_target;
use zonesync_core::core_transport::Envelope;

fuzz_target!(|data: &[u8]| {
    // Inbound frames are arbitrary text from the network
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(envelope) = Envelope::decode(text) {
        let _ = envelope.delta();
        // Anything we accept must re-encode and decode to the same value
        let encoded = envelope.encode().expect("accepted envelope must encode");
        let again = Envelope::decode(&encoded).expect("re-encoded envelope must decode");
        assert_eq!(again, envelope);
    }
});
