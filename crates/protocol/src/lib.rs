//! Wire types for the multipart upload REST API.
//!
//! Every upload goes through the same handful of endpoints: a session is
//! opened with [`messages::StartRequest`], each chunk asks for a signed
//! target with [`messages::UploadRequest`] and PUTs its bytes there, and the
//! session is closed with [`messages::CompleteRequest`]. Intelligent
//! Ingestion sessions additionally commit every part with
//! [`messages::CommitRequest`].

pub mod constants;
pub mod messages;
pub mod types;

pub use messages::{
    AbortRequest, CommitRequest, CompleteRequest, RetryDirective, StartRequest, StartResponse,
    UploadRequest, UploadResponse, parts_param,
};
pub use types::{Security, StorageAccess, StorageLocation, StorageOptions};
