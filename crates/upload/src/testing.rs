//! In-memory upload server used by the engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fsmpu_protocol::constants::{ABORT_PATH, COMMIT_PATH, COMPLETE_PATH, START_PATH, UPLOAD_PATH};
use fsmpu_protocol::{CommitRequest, CompleteRequest, StartRequest, UploadRequest};
use fsmpu_transfer::checksum_bytes;

use crate::config::{CompletePollConfig, EngineConfig};
use crate::retry::{BackoffConfig, RetryConfig};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport, TransportError, TransportFuture};

pub(crate) const API_BASE: &str = "https://api.mock";

/// Decides whether a chunk request fails: `(request, attempt at this offset)`.
pub(crate) type FailRule = Box<dyn Fn(&UploadRequest, u32) -> Option<HttpResponse> + Send + Sync>;

/// A chunk PUT the server accepted: `(part, part-relative offset, len)`.
pub(crate) type StoredChunk = (u32, u64, u64);

#[derive(Default)]
pub(crate) struct MockState {
    pub starts: Vec<StartRequest>,
    pub uploads: Vec<UploadRequest>,
    pub attempts: HashMap<(u32, u64), u32>,
    pub stored: Vec<StoredChunk>,
    pub commits: Vec<CommitRequest>,
    pub completes: Vec<CompleteRequest>,
    pub aborts: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub in_flight_by_part: HashMap<u32, usize>,
    pub max_by_part: HashMap<u32, usize>,
    pub max_parts: usize,
}

pub(crate) struct MockServer {
    pub grant_intelligent: bool,
    pub suggested_chunk_size: Option<u64>,
    pub put_delay: Duration,
    pub omit_etag: bool,
    pub complete_pending: Mutex<VecDeque<u16>>,
    pub fail_rule: Option<FailRule>,
    /// Runs when the engine aborts the session.
    pub on_abort: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) state: Mutex<MockState>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self {
            grant_intelligent: false,
            suggested_chunk_size: None,
            put_delay: Duration::ZERO,
            omit_etag: false,
            complete_pending: Mutex::new(VecDeque::new()),
            fail_rule: None,
            on_abort: None,
            state: Mutex::new(MockState::default()),
        }
    }
}

/// Counts a PUT as in flight until dropped, including when the engine
/// abandons the request.
struct InFlight<'a> {
    server: &'a MockServer,
    part: u32,
}

impl<'a> InFlight<'a> {
    fn enter(server: &'a MockServer, part: u32) -> Self {
        let mut st = server.state();
        st.in_flight += 1;
        st.max_in_flight = st.max_in_flight.max(st.in_flight);
        let count = {
            let n = st.in_flight_by_part.entry(part).or_insert(0);
            *n += 1;
            *n
        };
        let max = st.max_by_part.entry(part).or_insert(0);
        *max = (*max).max(count);
        let parts = st.in_flight_by_part.values().filter(|&&n| n > 0).count();
        st.max_parts = st.max_parts.max(parts);
        Self { server, part }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut st = self.server.state();
        st.in_flight -= 1;
        if let Some(n) = st.in_flight_by_part.get_mut(&self.part) {
            *n -= 1;
        }
    }
}

impl MockServer {
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Bytes stored for `part`, sorted by offset.
    pub fn stored_ranges(&self, part: u32) -> Vec<(u64, u64)> {
        let mut ranges: Vec<(u64, u64)> = self
            .state()
            .stored
            .iter()
            .filter(|(p, _, _)| *p == part)
            .map(|(_, offset, len)| (*offset, *len))
            .collect();
        ranges.sort();
        ranges
    }

    pub fn attempts_at(&self, part: u32, offset: u64) -> u32 {
        self.state().attempts.get(&(part, offset)).copied().unwrap_or(0)
    }

    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        if request.method == Method::Put {
            return self.handle_put(&url, request).await;
        }

        let path = url.path().to_string();
        match path.as_str() {
            START_PATH => {
                let req: StartRequest = decode(&request)?;
                self.state().starts.push(req.clone());
                let mut body = serde_json::json!({
                    "uri": "/bucket/key", "region": "us-east-1", "upload_id": "mock-upload",
                });
                if req.multipart && self.grant_intelligent {
                    body["upload_type"] = "intelligent_ingestion".into();
                    if let Some(size) = self.suggested_chunk_size {
                        body["chunk_size"] = size.into();
                    }
                }
                Ok(json(200, body))
            }
            UPLOAD_PATH => {
                let req: UploadRequest = decode(&request)?;
                let attempt = {
                    let mut st = self.state();
                    st.uploads.push(req.clone());
                    let n = st.attempts.entry((req.part, req.offset)).or_insert(0);
                    *n += 1;
                    *n
                };
                if let Some(rule) = &self.fail_rule
                    && let Some(resp) = rule(&req, attempt)
                {
                    return Ok(resp);
                }
                Ok(json(
                    200,
                    serde_json::json!({
                        "url": format!("https://storage.mock/put/{}/{}/{}", req.part, req.offset, req.size),
                        "headers": {"x-mock": "1"},
                    }),
                ))
            }
            COMMIT_PATH => {
                let req: CommitRequest = decode(&request)?;
                self.state().commits.push(req);
                Ok(json(200, serde_json::json!({})))
            }
            COMPLETE_PATH => {
                let req: CompleteRequest = decode(&request)?;
                self.state().completes.push(req.clone());
                let pending = self.complete_pending.lock().unwrap().pop_front();
                match pending {
                    Some(status) => Ok(json(status, serde_json::json!({"status": "pending"}))),
                    None => Ok(json(
                        200,
                        serde_json::json!({"handle": "h-1", "size": req.size, "filename": req.filename}),
                    )),
                }
            }
            ABORT_PATH => {
                self.state().aborts += 1;
                if let Some(hook) = &self.on_abort {
                    hook();
                }
                Ok(json(200, serde_json::json!({})))
            }
            other => Ok(json(404, serde_json::json!({"error": format!("no route {other}")}))),
        }
    }

    async fn handle_put(
        &self,
        url: &reqwest::Url,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        let segments: Vec<u64> = url
            .path()
            .trim_start_matches("/put/")
            .split('/')
            .filter_map(|s| s.parse().ok())
            .collect();
        let [part, offset, size] = segments[..] else {
            return Err(TransportError::InvalidRequest(format!("bad PUT url {url}")));
        };
        let part = part as u32;

        let _guard = InFlight::enter(self, part);
        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }

        let md5 = request
            .headers
            .iter()
            .find(|(k, _)| k == "content-md5")
            .map(|(_, v)| v.clone());
        if request.body.len() as u64 != size || md5 != Some(checksum_bytes(&request.body)) {
            return Ok(json(400, serde_json::json!({"error": "body mismatch"})));
        }

        self.state().stored.push((part, offset, size));
        let headers = if self.omit_etag {
            Vec::new()
        } else {
            vec![("ETag".to_string(), format!("\"etag-{part}-{offset}\""))]
        };
        Ok(HttpResponse {
            status: 200,
            headers,
            body: Vec::new(),
        })
    }
}

impl Transport for MockServer {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
        Box::pin(self.handle(request))
    }
}

fn decode<T: serde::de::DeserializeOwned>(request: &HttpRequest) -> Result<T, TransportError> {
    serde_json::from_slice(&request.body).map_err(|e| TransportError::InvalidRequest(e.to_string()))
}

pub(crate) fn json(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status,
        headers: Vec::new(),
        body: serde_json::to_vec(&body).unwrap_or_default(),
    }
}

/// Engine config pointed at the mock, with fast retries.
pub(crate) fn test_config(part_size: u64, chunk_size: u64) -> EngineConfig {
    EngineConfig {
        api_base: API_BASE.into(),
        part_size,
        chunk_size,
        retry: RetryConfig {
            backoff: BackoffConfig {
                initial_delay_ms: 1,
                max_delay_ms: 5,
                factor: 2.0,
                jitter: 0.0,
            },
            min_chunk_size: 1024,
            ..RetryConfig::default()
        },
        complete_poll: CompletePollConfig {
            max_attempts: 5,
            delay_ms: 1,
        },
        ..EngineConfig::default()
    }
}

/// Writes `len` bytes of patterned data to a temp file.
pub(crate) fn source_file(dir: &tempfile::TempDir, name: &str, len: usize) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}

pub(crate) fn into_transport(server: MockServer) -> (Arc<MockServer>, Arc<dyn Transport>) {
    let server = Arc::new(server);
    let transport: Arc<dyn Transport> = server.clone();
    (server, transport)
}
