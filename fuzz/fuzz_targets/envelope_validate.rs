#![no_main]

use libfuzzer_sys::fuzz_target;
use playport_bridge::{
    decode_bridge_command, validate_frame_message, BridgeMethod, RawFrameMessage, SenderRef,
    FRAME_ORIGIN_PREFIX,
};

fuzz_target!(|data: &[u8]| {
    let body = String::from_utf8_lossy(data).into_owned();
    let raw = RawFrameMessage {
        transport_type: format!("{FRAME_ORIGIN_PREFIX}message"),
        sender: SenderRef::new("fuzz"),
        body,
    };
    let Ok(envelope) = validate_frame_message(&raw) else {
        return;
    };
    if envelope.data.is_array() {
        assert!(BridgeMethod::parse(&envelope.method).is_some_and(BridgeMethod::permits_list_data));
    }
    if let Some(command) = decode_bridge_command(&envelope) {
        assert_eq!(command.method().as_str(), envelope.method);
    }

    let untrusted = RawFrameMessage {
        transport_type: "message".to_string(),
        ..raw
    };
    assert!(validate_frame_message(&untrusted).is_err());
});
