fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use codedrop_protocol::{SdpType, SignalData, SignalMessage, TransferMetadata};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  Rust:    {reserialized}"
        );
        parsed
    }

    // --- Relay messages ---

    #[test]
    fn fixture_join() {
        let msg = roundtrip_test::<SignalMessage>("join.json");
        assert_eq!(
            msg,
            SignalMessage::Join {
                code: "042917".into()
            }
        );
    }

    #[test]
    fn fixture_peer_joined() {
        let msg = roundtrip_test::<SignalMessage>("peer_joined.json");
        assert_eq!(msg, SignalMessage::PeerJoined);
    }

    #[test]
    fn fixture_signal_offer() {
        match roundtrip_test::<SignalMessage>("signal_offer.json") {
            SignalMessage::Signal {
                code,
                data: SignalData::Offer(desc),
            } => {
                assert_eq!(code, "042917");
                assert_eq!(desc.sdp_type, SdpType::Offer);
                assert!(desc.sdp.starts_with("v=0\r\n"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn fixture_signal_answer() {
        match roundtrip_test::<SignalMessage>("signal_answer.json") {
            SignalMessage::Signal {
                data: SignalData::Answer(desc),
                ..
            } => assert_eq!(desc.sdp_type, SdpType::Answer),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn fixture_signal_ice() {
        match roundtrip_test::<SignalMessage>("signal_ice.json") {
            SignalMessage::Signal {
                data: SignalData::Ice(c),
                ..
            } => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
                assert_eq!(c.username_fragment.as_deref(), Some("Xk9q"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let err = serde_json::from_str::<SignalMessage>(r#"{"type":"leave","code":"042917"}"#);
        assert!(err.is_err());
    }

    // --- Data channel framing ---

    #[test]
    fn fixture_transfer_metadata() {
        let meta = roundtrip_test::<TransferMetadata>("transfer_metadata.json");
        assert_eq!(meta.filename, "holiday photo.png");
        assert_eq!(meta.size, 150_000);
        assert_eq!(meta.mime_type, "image/png");
    }

    #[test]
    fn metadata_without_type_defaults_to_empty() {
        let meta = TransferMetadata::from_frame(r#"{"filename":"a.bin","size":3}"#).unwrap();
        assert_eq!(meta.mime_type, "");
    }
}
