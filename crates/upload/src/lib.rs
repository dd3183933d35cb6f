//! Concurrent multipart upload engine.
//!
//! # Pipeline
//!
//! ```text
//! Client::multipart_upload
//!   -> coordinator: start session, pick strategy, fan out parts
//!     -> part: fan out chunks (bounded), gate acks, close part
//!       -> chunk: read + checksum, strategy.upload_chunk, retry/shrink
//!   -> strategy.finalize_params -> complete (polls while 202)
//! ```
//!
//! Parts and chunks are bounded by their own semaphores. Cancellation flows
//! down a tree of [`CancellationToken`](tokio_util::sync::CancellationToken)s:
//! the job token reaches every part, and a failing chunk stops only its
//! own part's siblings before the job tears the rest down.
//!
//! Every HTTP call goes through the [`Transport`] trait so the engine can
//! run against an in-memory server.

pub mod api;
mod chunk;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
mod part;
pub mod retry;
pub mod strategy;
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, FileInfo, Session};
pub use client::{Client, CompletionCallback, MultipartUpload, UploadHandle};
pub use config::{CompletePollConfig, EngineConfig};
pub use coordinator::{UploadJob, UploadResult};
pub use error::UploadError;
pub use retry::{BackoffConfig, RetryConfig};
pub use strategy::{ChunkAck, ChunkOutcome, ChunkRequest, UploadStrategy};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, Transport, TransportError, TransportFuture,
};
