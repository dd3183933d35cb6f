//! REST client for the multipart upload endpoints.

use std::sync::Arc;
use std::time::Duration;

use fsmpu_protocol::constants::{
    ABORT_PATH, COMMIT_PATH, COMPLETE_PATH, ETAG_HEADER, START_PATH, UPLOAD_PATH,
};
use fsmpu_protocol::{
    AbortRequest, CommitRequest, CompleteRequest, Security, StartRequest, StartResponse,
    StorageOptions, UploadRequest, UploadResponse,
};
use fsmpu_transfer::Chunk;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{CompletePollConfig, EngineConfig};
use crate::error::UploadError;
use crate::retry::sleep_or_cancel;
use crate::transport::{HttpRequest, HttpResponse, Method, Transport, TransportError};

/// Server-side session opened by the start call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uri: String,
    pub region: String,
    pub upload_id: String,
    pub location_url: String,
    /// The server granted Intelligent Ingestion.
    pub intelligent: bool,
    /// Server-suggested initial chunk size.
    pub chunk_size: Option<u64>,
}

impl From<StartResponse> for Session {
    fn from(resp: StartResponse) -> Self {
        let intelligent = resp.is_intelligent_ingestion();
        Self {
            uri: resp.uri,
            region: resp.region,
            upload_id: resp.upload_id,
            location_url: resp.location_url,
            intelligent,
            chunk_size: resp.chunk_size.filter(|&size| size > 0),
        }
    }
}

/// File metadata announced at start and repeated at finalize.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
    pub store: StorageOptions,
}

/// Issues the upload API calls.
///
/// Every call is bounded by the request timeout and raced against the
/// supplied cancellation token; losing the race drops the request.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base: String,
    apikey: String,
    security: Option<Security>,
    request_timeout: Duration,
    poll: CompletePollConfig,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &EngineConfig,
        apikey: impl Into<String>,
        security: Option<Security>,
    ) -> Self {
        Self {
            transport,
            base: config.api_base.trim_end_matches('/').to_string(),
            apikey: apikey.into(),
            security,
            request_timeout: config.request_timeout(),
            poll: config.complete_poll.clone(),
        }
    }

    /// Full URL of an API path, with the security policy appended.
    pub fn url(&self, path: &str) -> Result<String, UploadError> {
        let mut url = reqwest::Url::parse(&format!("{}{}", self.base, path))
            .map_err(|e| TransportError::InvalidRequest(format!("bad URL for {path}: {e}")))?;
        if let Some(security) = &self.security {
            let mut query = url.query_pairs_mut();
            for (key, value) in security.query_pairs() {
                query.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    fn policy(&self) -> Option<String> {
        self.security.as_ref().map(|s| s.encoded_policy.clone())
    }

    fn signature(&self) -> Option<String> {
        self.security.as_ref().map(|s| s.signature.clone())
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Opens a session. `intelligent` asks the server for Intelligent Ingestion.
    pub async fn start(
        &self,
        file: &FileInfo,
        intelligent: bool,
        cancel: &CancellationToken,
    ) -> Result<Session, UploadError> {
        let req = StartRequest {
            apikey: self.apikey.clone(),
            filename: file.filename.clone(),
            mimetype: file.mimetype.clone(),
            size: file.size,
            store: file.store.clone(),
            multipart: intelligent,
            policy: self.policy(),
            signature: self.signature(),
        };

        let resp = self.post_json(START_PATH, &req, cancel).await?;
        let resp = ensure_success(resp)?;
        let session = Session::from(resp.json::<StartResponse>()?);
        info!(
            upload_id = %session.upload_id,
            region = %session.region,
            intelligent = session.intelligent,
            "upload session opened"
        );
        Ok(session)
    }

    /// Sends one chunk: fetches a signed target, then PUTs the bytes to it.
    ///
    /// Returns the ETag of the PUT, if the storage backend sent one.
    pub async fn send_chunk(
        &self,
        session: &Session,
        part_offset: u64,
        chunk: &Chunk,
        intelligent: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, UploadError> {
        let req = UploadRequest {
            apikey: self.apikey.clone(),
            uri: session.uri.clone(),
            region: session.region.clone(),
            upload_id: session.upload_id.clone(),
            part: chunk.part,
            size: chunk.range.len,
            md5: chunk.md5.clone(),
            offset: chunk.range.offset - part_offset,
            multipart: intelligent,
            policy: self.policy(),
            signature: self.signature(),
        };

        let resp = self.post_json(UPLOAD_PATH, &req, cancel).await?;
        let target: UploadResponse = ensure_success(resp)?.json()?;

        let mut headers: Vec<(String, String)> = target.headers.into_iter().collect();
        headers.push(("content-md5".into(), chunk.md5.clone()));
        let put = HttpRequest::put(target.url, headers, chunk.data.clone());

        let resp = ensure_success(self.call(put, cancel).await?)?;
        Ok(resp.header(ETAG_HEADER).map(str::to_string))
    }

    /// Closes one part of an Intelligent Ingestion session.
    pub async fn commit(
        &self,
        session: &Session,
        part: u32,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let req = CommitRequest {
            apikey: self.apikey.clone(),
            uri: session.uri.clone(),
            region: session.region.clone(),
            upload_id: session.upload_id.clone(),
            part,
            size,
            policy: self.policy(),
            signature: self.signature(),
        };
        let resp = self.post_json(COMMIT_PATH, &req, cancel).await?;
        ensure_success(resp)?;
        debug!(part, "part committed");
        Ok(())
    }

    /// Finalizes the session and returns the server's response.
    ///
    /// `202 Accepted` means the server is still assembling the object; the
    /// call is repeated after a fixed delay until it returns a final status
    /// or the poll budget runs out.
    pub async fn complete(
        &self,
        session: &Session,
        file: &FileInfo,
        parts: Option<String>,
        intelligent: bool,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, UploadError> {
        let req = CompleteRequest {
            apikey: self.apikey.clone(),
            uri: session.uri.clone(),
            region: session.region.clone(),
            upload_id: session.upload_id.clone(),
            filename: file.filename.clone(),
            mimetype: file.mimetype.clone(),
            size: file.size,
            store: file.store.clone(),
            parts,
            multipart: intelligent,
            policy: self.policy(),
            signature: self.signature(),
        };

        for attempt in 1..=self.poll.max_attempts {
            let resp = self.post_json(COMPLETE_PATH, &req, cancel).await?;
            match resp.status {
                202 => {
                    debug!(attempt, "finalize pending, polling again");
                    sleep_or_cancel(self.poll.delay(), cancel).await?;
                }
                200..=299 => {
                    info!(upload_id = %session.upload_id, "upload finalized");
                    return Ok(resp.payload().unwrap_or(serde_json::Value::Null));
                }
                status => {
                    return Err(UploadError::Finalize {
                        status,
                        body: resp.payload(),
                    });
                }
            }
        }

        Err(UploadError::Protocol(format!(
            "finalize still pending after {} attempt(s)",
            self.poll.max_attempts
        )))
    }

    /// Discards a Standard session.
    pub async fn abort(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let req = AbortRequest {
            apikey: self.apikey.clone(),
            uri: session.uri.clone(),
            region: session.region.clone(),
            upload_id: session.upload_id.clone(),
            policy: self.policy(),
            signature: self.signature(),
        };
        let resp = self.post_json(ABORT_PATH, &req, cancel).await?;
        ensure_success(resp)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    async fn post_json<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, UploadError> {
        let request = HttpRequest::json(Method::Post, self.url(path)?, body)?;
        self.call(request, cancel).await
    }

    async fn call(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, UploadError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            result = tokio::time::timeout(self.request_timeout, self.transport.send(request)) => {
                match result {
                    Ok(resp) => Ok(resp?),
                    Err(_) => Err(TransportError::Timeout.into()),
                }
            }
        }
    }
}

/// Maps a non-2xx response to [`UploadError::Server`].
fn ensure_success(resp: HttpResponse) -> Result<HttpResponse, UploadError> {
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(UploadError::Server {
            status: resp.status,
            body: resp.payload(),
        })
    }
}
