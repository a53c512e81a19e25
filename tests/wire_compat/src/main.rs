fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use apkrelay_protocol::{
        ChunkTag, ErrorResponse, FailureKind, RetrievalHandle, StageResponse, TransferState,
    };

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
    /// the JSON values (order-independent comparison).
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

    // --- Relay HTTP bodies ---

    #[test]
    fn fixture_stage_response() {
        let resp: StageResponse = roundtrip_test("stage_response.json");
        assert!(resp.url.ends_with("/files/app.apk"));
    }

    #[test]
    fn fixture_error_response() {
        let resp: ErrorResponse = roundtrip_test("error_response.json");
        assert!(resp.error.contains(".apk"));
    }

    #[test]
    fn stage_response_is_a_url_handle() {
        // The relay's stage body doubles as the retrieval handle.
        let handle: RetrievalHandle = roundtrip_test("stage_response.json");
        assert_eq!(
            handle.url(),
            Some("http://relay.example:8000/files/app.apk")
        );
    }

    // --- Chunked delivery ---

    #[test]
    fn fixture_retrieval_handle_parts() {
        let handle: RetrievalHandle = roundtrip_test("retrieval_handle_parts.json");
        assert_eq!(handle, RetrievalHandle::parts("game.apk", 3));
    }

    #[test]
    fn fixture_chunk_tag() {
        let tag: ChunkTag = roundtrip_test("chunk_tag.json");
        assert_eq!(tag.part_name(), "game.apk.part1");
        assert!(!tag.is_last());
    }

    #[test]
    fn fixture_chunk_tag_without_checksum() {
        let tag: ChunkTag = roundtrip_test("chunk_tag_unverified.json");
        assert!(tag.checksum.is_empty());
        assert!(tag.is_last());
    }

    // --- Report enums ---

    #[test]
    fn fixture_failure_kinds() {
        let kinds: Vec<FailureKind> = roundtrip_test("failure_kinds.json");
        assert_eq!(kinds.len(), 10);
        let transient: Vec<_> = kinds.iter().filter(|k| k.is_transient()).collect();
        assert_eq!(
            transient,
            vec![
                &FailureKind::RelayUnavailable,
                &FailureKind::Storage,
                &FailureKind::Destination,
            ]
        );
    }

    #[test]
    fn fixture_transfer_states() {
        let states: Vec<TransferState> = roundtrip_test("transfer_states.json");
        let terminal: Vec<_> = states.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![&TransferState::Completed, &TransferState::Failed]
        );
    }
}
