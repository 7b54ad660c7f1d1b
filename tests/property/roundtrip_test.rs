// tests/property/roundtrip_test.rs

//! Property-based tests for the command wire format
//! Tests that serialize/deserialize preserves name and body bit-for-bit

use bytes::Bytes;
use proptest::prelude::*;
use switchboard::Command;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_command_roundtrip_preserves_name_and_body(
        name in ".{0,64}",
        body in prop::collection::vec(any::<u8>(), 0..512)
    ) {
        let cmd = Command::new(name.clone(), body.clone());
        let decoded = Command::decode(&cmd.encode()).unwrap();
        prop_assert_eq!(decoded.name, name);
        prop_assert_eq!(decoded.body, Bytes::from(body));
    }

    #[test]
    fn test_encoded_frame_is_utf8_json(
        name in "[a-zA-Z0-9_-]{1,16}",
        body in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let frame = Command::new(name, body).encode();
        prop_assert!(std::str::from_utf8(&frame).is_ok());
        prop_assert!(serde_json::from_slice::<serde_json::Value>(&frame).is_ok());
    }
}
