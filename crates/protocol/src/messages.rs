use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks the server which chunks of a file it already holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub file_name: String,
    pub file_hash: String,
}

/// Requests assembly of all stored chunks into the final file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub file_name: String,
    pub file_hash: String,
    /// Number of chunks the client produced; the server refuses to merge
    /// until every index in `0..chunk_count` is stored.
    pub chunk_count: u32,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Server's answer to [`VerifyRequest`].
///
/// `should_upload == false` means the final file already exists and the
/// client can skip the transfer entirely. Otherwise `uploaded_chunks`
/// lists the chunk ids already stored under this file hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub should_upload: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploaded_chunks: Vec<String>,
}

/// Acknowledges a received chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub chunk_id: String,
    /// Set when the final file already exists and the chunk was discarded.
    #[serde(default, skip_serializing_if = "is_false")]
    pub already_complete: bool,
    pub message: String,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Confirms a completed merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub message: String,
}

/// Ack text for a stored chunk.
pub const CHUNK_STORED: &str = "file chunk uploaded";

/// Ack text when the final file already exists.
pub const FILE_ALREADY_EXISTS: &str = "file already exists";

/// Ack text for a completed merge.
pub const CHUNKS_MERGED: &str = "file chunks merged";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_request_uses_camel_case() {
        let req = VerifyRequest {
            file_name: "video.mp4".into(),
            file_hash: "deadbeef".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["fileName"], "video.mp4");
        assert_eq!(json["fileHash"], "deadbeef");
    }

    #[test]
    fn merge_request_carries_chunk_count() {
        let req = MergeRequest {
            file_name: "video.mp4".into(),
            file_hash: "deadbeef".into(),
            chunk_count: 10,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["chunkCount"], 10);

        let back: MergeRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn verify_response_omits_empty_chunk_list() {
        let resp = VerifyResponse {
            should_upload: false,
            uploaded_chunks: vec![],
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"shouldUpload":false}"#);
    }

    #[test]
    fn verify_response_defaults_missing_chunk_list() {
        let resp: VerifyResponse = serde_json::from_str(r#"{"shouldUpload":true}"#).unwrap();
        assert!(resp.should_upload);
        assert!(resp.uploaded_chunks.is_empty());
    }

    #[test]
    fn chunk_ack_omits_false_already_complete() {
        let ack = ChunkAck {
            chunk_id: "deadbeef-3".into(),
            already_complete: false,
            message: CHUNK_STORED.into(),
        };
        let json = serde_json::to_string(&ack).unwrap();
        assert!(!json.contains("alreadyComplete"));

        let short_circuit = ChunkAck {
            chunk_id: "deadbeef-3".into(),
            already_complete: true,
            message: FILE_ALREADY_EXISTS.into(),
        };
        let json = serde_json::to_value(&short_circuit).unwrap();
        assert_eq!(json["alreadyComplete"], true);
    }
}
