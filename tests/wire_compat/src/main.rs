fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use notedrop_protocol::messages::{
        CancelUploadResponse, CompleteUploadRequest, CompleteUploadResponse, InitUploadRequest,
        InitUploadResponse, UploadChunkHeader, UploadChunkResponse, UploadProgressResponse,
    };
    use notedrop_protocol::{ErrorBody, ErrorCode, UploadStatus};
    use notedrop_uploader::ResumeRecord;

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
    /// the JSON values (key-order independent).
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
    fn fixture_init_upload_request() {
        let req = roundtrip_test::<InitUploadRequest>("init_upload_request.json");
        assert_eq!(req.total_chunks, 3);
        assert_eq!(req.metadata["week"], 3);
    }

    #[test]
    fn fixture_upload_chunk_header() {
        roundtrip_test::<UploadChunkHeader>("upload_chunk_header.json");
    }

    #[test]
    fn fixture_complete_upload_request() {
        let req = roundtrip_test::<CompleteUploadRequest>("complete_upload_request.json");
        assert_eq!(req.destination_token.as_deref(), Some("folder-2f1c"));
    }

    #[test]
    fn complete_request_without_token_is_empty_object() {
        let json = serde_json::to_string(&CompleteUploadRequest::default()).unwrap();
        assert_eq!(json, "{}");
    }

    // --- Responses ---

    #[test]
    fn fixture_init_upload_response() {
        roundtrip_test::<InitUploadResponse>("init_upload_response.json");
    }

    #[test]
    fn fixture_upload_chunk_response() {
        roundtrip_test::<UploadChunkResponse>("upload_chunk_response.json");
    }

    #[test]
    fn fixture_upload_progress_response() {
        let progress = roundtrip_test::<UploadProgressResponse>("upload_progress_response.json");
        assert_eq!(
            progress.total_chunks,
            progress.uploaded_chunk_count + progress.missing_chunks.len() as u32
        );
    }

    #[test]
    fn fixture_complete_upload_response() {
        let resp = roundtrip_test::<CompleteUploadResponse>("complete_upload_response.json");
        assert_eq!(resp.artifact.size, 10_485_760);
    }

    #[test]
    fn fixture_cancel_upload_response() {
        roundtrip_test::<CancelUploadResponse>("cancel_upload_response.json");
    }

    #[test]
    fn fixture_error_body() {
        let body = roundtrip_test::<ErrorBody>("error_body.json");
        assert_eq!(body.code, ErrorCode::SessionNotFound);
    }

    // --- Persisted state ---

    #[test]
    fn fixture_resume_record() {
        let record = roundtrip_test::<ResumeRecord>("resume_record.json");
        assert_eq!(record.plan().unwrap().total_chunks(), 3);
    }

    // --- Enums ---

    #[test]
    fn upload_status_wire_names() {
        let cases = [
            (UploadStatus::Initialized, "initialized"),
            (UploadStatus::Uploading, "uploading"),
            (UploadStatus::ChunksCompleted, "chunks-completed"),
            (UploadStatus::Completing, "completing"),
            (UploadStatus::Completed, "completed"),
            (UploadStatus::Failed, "failed"),
            (UploadStatus::Cancelled, "cancelled"),
        ];
        for (status, name) in cases {
            assert_eq!(serde_json::to_value(status).unwrap(), name);
            assert_eq!(status.as_str(), name);
        }
    }

    #[test]
    fn error_code_wire_names() {
        let cases = [
            (ErrorCode::SessionNotFound, "session_not_found"),
            (ErrorCode::HashMismatch, "hash_mismatch"),
            (ErrorCode::InsufficientStorage, "insufficient_storage"),
            (ErrorCode::ChunksIncomplete, "chunks_incomplete"),
            (ErrorCode::InvalidRequest, "invalid_request"),
            (ErrorCode::Internal, "internal"),
        ];
        for (code, name) in cases {
            assert_eq!(serde_json::to_value(code).unwrap(), name);
        }
    }
}
