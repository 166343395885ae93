fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chunkvault_protocol::{
        ApiError, CancelRequest, CancelResponse, ChunkQuery, ChunkResponse, ErrorCode,
        HandshakeRequest, HandshakeResponse, HealthResponse,
    };

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes numbers so that `50` and `50.0` compare equal.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture, re-serializes it and compares the JSON values.
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
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    #[test]
    fn fixture_handshake_request() {
        let req: HandshakeRequest = roundtrip_test("handshake_request.json");
        assert_eq!(req.chunk_digests.len(), 2);
        assert_eq!(req.destination_folder_id.as_deref(), Some("folder-7"));
    }

    #[test]
    fn fixture_handshake_request_minimal() {
        let req: HandshakeRequest = roundtrip_test("handshake_request_minimal.json");
        assert_eq!(req.file_size, 0);
        assert!(req.mime_type.is_none());
    }

    #[test]
    fn fixture_handshake_response_missing() {
        let resp: HandshakeResponse = roundtrip_test("handshake_response_missing.json");
        assert!(!resp.already_complete);
        assert!(resp.file_id.is_none());
    }

    #[test]
    fn fixture_handshake_response_complete() {
        let resp: HandshakeResponse = roundtrip_test("handshake_response_complete.json");
        assert!(resp.already_complete);
        assert!(resp.missing_chunk_digests.is_empty());
    }

    #[test]
    fn fixture_chunk_query() {
        let query: ChunkQuery = roundtrip_test("chunk_query.json");
        assert_eq!(query.chunk_index, Some(0));
    }

    #[test]
    fn fixture_chunk_response() {
        let resp: ChunkResponse = roundtrip_test("chunk_response.json");
        assert!(!resp.completed);
        assert_eq!(resp.progress.uploaded, 1);
    }

    #[test]
    fn fixture_chunk_response_completed() {
        let resp: ChunkResponse = roundtrip_test("chunk_response_completed.json");
        assert!(resp.completed);
        assert!(resp.progress.is_complete());
    }

    #[test]
    fn fixture_cancel() {
        roundtrip_test::<CancelRequest>("cancel_request.json");
        let resp: CancelResponse = roundtrip_test("cancel_response.json");
        assert!(resp.success);
    }

    #[test]
    fn fixture_api_error() {
        let err: ApiError = roundtrip_test("api_error.json");
        assert_eq!(err.code, ErrorCode::UnexpectedChunk);
    }

    #[test]
    fn fixture_health() {
        let health: HealthResponse = roundtrip_test("health.json");
        assert_eq!(health, HealthResponse::default());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut fixture = load_fixture("handshake_request.json");
        fixture
            .as_object_mut()
            .unwrap()
            .remove("chunkDigests");
        assert!(serde_json::from_value::<HandshakeRequest>(fixture).is_err());
    }
}
