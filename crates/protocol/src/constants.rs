//! Endpoint paths and protocol markers.

/// Default API host for upload sessions.
pub const DEFAULT_API_BASE: &str = "https://upload.filestackapi.com";

/// Opens an upload session.
pub const START_PATH: &str = "/multipart/start";

/// Requests a signed target for one chunk.
pub const UPLOAD_PATH: &str = "/multipart/upload";

/// Closes one part of an Intelligent Ingestion session.
pub const COMMIT_PATH: &str = "/multipart/commit";

/// Finalizes the session and stores the object.
pub const COMPLETE_PATH: &str = "/multipart/complete";

/// Discards a Standard session and its uploaded parts.
pub const ABORT_PATH: &str = "/multipart/abort";

/// `upload_type` value granted by the server for Intelligent Ingestion.
pub const INTELLIGENT_INGESTION: &str = "intelligent_ingestion";

/// Response header carrying the part acknowledgment of a chunk PUT.
pub const ETAG_HEADER: &str = "etag";
