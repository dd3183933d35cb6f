fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use fsmpu_protocol::messages::{
        AbortRequest, CommitRequest, CompleteRequest, RetryDirective, StartRequest, StartResponse,
        UploadRequest, UploadResponse,
    };
    use fsmpu_protocol::{StorageAccess, StorageLocation};

    /// Returns the path to the fixtures directory.
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

    /// Deserializes a fixture, re-serializes it, and compares the JSON values.
    ///
    /// Returns the parsed value for further assertions.
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
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  ours: {reserialized}"
        );
        parsed
    }

    // --- Requests ---

    #[test]
    fn fixture_start_request() {
        let req: StartRequest = roundtrip_test("start_request.json");
        assert!(req.multipart);
        assert_eq!(req.store.location, StorageLocation::S3);
        assert_eq!(req.store.access, Some(StorageAccess::Private));
        assert_eq!(req.store.path.as_deref(), Some("/uploads/"));
    }

    #[test]
    fn fixture_upload_request() {
        let req: UploadRequest = roundtrip_test("upload_request.json");
        assert_eq!(req.part, 2);
        assert_eq!(req.offset, 3 * 1024 * 1024);
        assert!(!req.multipart);
    }

    #[test]
    fn fixture_commit_request() {
        let req: CommitRequest = roundtrip_test("commit_request.json");
        assert_eq!(req.size, 4 * 1024 * 1024);
    }

    #[test]
    fn fixture_complete_request_standard() {
        let req: CompleteRequest = roundtrip_test("complete_request_standard.json");
        assert!(!req.multipart);
        assert_eq!(
            req.parts.as_deref(),
            Some(fsmpu_protocol::parts_param(&[(3, "\"e3\""), (1, "\"e1\""), (2, "\"e2\"")]).as_str())
        );
    }

    #[test]
    fn fixture_complete_request_intelligent() {
        let req: CompleteRequest = roundtrip_test("complete_request_intelligent.json");
        assert!(req.multipart);
        assert!(req.parts.is_none());
        assert_eq!(req.store.location, StorageLocation::Gcs);
    }

    #[test]
    fn fixture_abort_request() {
        let req: AbortRequest = roundtrip_test("abort_request.json");
        assert_eq!(req.upload_id, "upl-7d9e");
    }

    // --- Responses ---

    #[test]
    fn fixture_start_response_intelligent() {
        let resp: StartResponse = roundtrip_test("start_response_intelligent.json");
        assert!(resp.is_intelligent_ingestion());
        assert_eq!(resp.chunk_size, Some(8 * 1024 * 1024));
    }

    #[test]
    fn fixture_start_response_standard() {
        let resp: StartResponse = roundtrip_test("start_response_standard.json");
        assert!(!resp.is_intelligent_ingestion());
        assert!(resp.location_url.is_empty());
    }

    #[test]
    fn fixture_upload_response() {
        let resp: UploadResponse = roundtrip_test("upload_response.json");
        assert_eq!(resp.headers.len(), 2);
        assert!(resp.url.starts_with("https://"));
    }

    #[test]
    fn fixture_retry_directive() {
        let body = fs::read(fixtures_dir().join("retry_directive.json")).unwrap();
        let directive = RetryDirective::from_body(&body).expect("directive");
        assert_eq!(
            directive,
            RetryDirective {
                offset: 3 * 1024 * 1024,
                size: 256 * 1024,
                delay_ms: Some(500),
            }
        );
        assert_eq!(
            RetryDirective::from_value(&load_fixture("retry_directive.json")),
            Some(directive)
        );
    }

    #[test]
    fn start_response_tolerates_unknown_fields() {
        let mut fixture = load_fixture("start_response_standard.json");
        fixture["server_version"] = "9.9".into();
        let resp: StartResponse = serde_json::from_value(fixture).unwrap();
        assert_eq!(resp.region, "us-east-1");
    }
}
