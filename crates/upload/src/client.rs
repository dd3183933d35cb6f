//! Public entry points: [`Client`], [`MultipartUpload`] and [`UploadHandle`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fsmpu_protocol::{Security, StorageOptions};
use fsmpu_transfer::{ProgressCallback, detect_content_type, validate_source};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use crate::api::{ApiClient, FileInfo};
use crate::config::EngineConfig;
use crate::coordinator::{self, UploadJob, UploadResult};
use crate::error::UploadError;
use crate::transport::{HttpTransport, Transport};

/// Invoked exactly once with the terminal result of a job.
pub type CompletionCallback = Box<dyn FnOnce(UploadResult) + Send>;

/// Entry point for uploads under one API key.
pub struct Client {
    api_key: String,
    security: Option<Security>,
    storage: StorageOptions,
    config: EngineConfig,
    transport: Arc<dyn Transport>,
}

impl Client {
    /// Creates a client sending requests through `transport`.
    pub fn new(api_key: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            api_key: api_key.into(),
            security: None,
            storage: StorageOptions::default(),
            config: EngineConfig::default(),
            transport,
        }
    }

    /// Creates a client over HTTPS using `config`.
    pub fn with_http(api_key: impl Into<String>, config: EngineConfig) -> Result<Self, UploadError> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
        Ok(Self::new(api_key, transport).config(config))
    }

    /// Signs every request with `security`.
    pub fn security(mut self, security: Security) -> Self {
        self.security = Some(security);
        self
    }

    /// Default storage options for uploads that do not set their own.
    pub fn storage(mut self, storage: StorageOptions) -> Self {
        self.storage = storage;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.config
    }

    /// Prepares an upload of `path` without starting it.
    ///
    /// The source is checked here; nothing is sent until
    /// [`MultipartUpload::start`].
    pub fn prepare(&self, path: impl AsRef<Path>) -> Result<MultipartUpload, UploadError> {
        let path = path.as_ref();
        let size = validate_source(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());

        let job = UploadJob {
            path: PathBuf::from(path),
            file: FileInfo {
                filename,
                mimetype: detect_content_type(path).to_string(),
                size,
                store: self.storage.clone(),
            },
            part_size: self.config.part_size,
            chunk_size: self.config.chunk_size,
            part_concurrency: self.config.part_concurrency,
            chunk_concurrency: self.config.chunk_concurrency,
            intelligent_ingestion: self.config.use_intelligent_ingestion,
        };

        Ok(MultipartUpload {
            job,
            api: Arc::new(ApiClient::new(
                Arc::clone(&self.transport),
                &self.config,
                self.api_key.clone(),
                self.security.clone(),
            )),
            config: self.config.clone(),
            progress: None,
        })
    }

    /// Uploads `path` and reports through the given sinks.
    ///
    /// Input errors are returned synchronously and never reach the network;
    /// everything after that is delivered to `completion`.
    pub fn multipart_upload(
        &self,
        path: impl AsRef<Path>,
        options: Option<StorageOptions>,
        use_intelligent_ingestion: bool,
        progress: Option<ProgressCallback>,
        completion: CompletionCallback,
    ) -> Result<UploadHandle, UploadError> {
        let mut upload = self
            .prepare(path)?
            .intelligent_ingestion(use_intelligent_ingestion);
        if let Some(options) = options {
            upload = upload.storage(options);
        }
        if let Some(progress) = progress {
            upload = upload.on_progress(progress);
        }
        upload.start(completion)
    }
}

/// A prepared upload; configure it, then [`start`](Self::start) it.
pub struct MultipartUpload {
    job: UploadJob,
    api: Arc<ApiClient>,
    config: EngineConfig,
    progress: Option<ProgressCallback>,
}

impl MultipartUpload {
    pub fn storage(mut self, store: StorageOptions) -> Self {
        self.job = self.job.with_store(store);
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.job.file.filename = filename.into();
        self
    }

    pub fn mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.job.file.mimetype = mimetype.into();
        self
    }

    pub fn intelligent_ingestion(mut self, enabled: bool) -> Self {
        self.job.intelligent_ingestion = enabled;
        self
    }

    pub fn part_size(mut self, bytes: u64) -> Self {
        self.job.part_size = bytes;
        self
    }

    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.job.chunk_size = bytes;
        self
    }

    pub fn part_concurrency(mut self, n: usize) -> Self {
        self.job.part_concurrency = n;
        self
    }

    pub fn chunk_concurrency(mut self, n: usize) -> Self {
        self.job.chunk_concurrency = n;
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn job(&self) -> &UploadJob {
        &self.job
    }

    /// Validates the job and runs it in the background on the current
    /// tokio runtime. Fails without a runtime.
    pub fn start(self, completion: CompletionCallback) -> Result<UploadHandle, UploadError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| UploadError::Task(format!("no tokio runtime to run the upload: {e}")))?;
        self.job.validate()?;

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        let span = info_span!(
            "upload",
            job = %id,
            file = %self.job.file.filename,
            size = self.job.file.size
        );

        let job_cancel = cancel.clone();
        runtime.spawn(
            async move {
                debug!("upload job started");
                let result =
                    coordinator::run(self.job, self.api, self.config.retry, self.progress, job_cancel)
                        .await;
                completion(result);
                let _ = done_tx.send(true);
            }
            .instrument(span),
        );

        Ok(UploadHandle {
            id,
            cancel,
            done: done_rx,
        })
    }
}

/// Control handle of a running upload. Cheap to clone.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    id: Uuid,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

impl UploadHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Requests cancellation. Repeated calls, or calls after the job
    /// finished, have no effect.
    pub fn cancel(&self) {
        if !self.is_finished() {
            self.cancel.cancel();
        }
    }

    /// Returns `true` once the completion callback has run.
    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Waits until the completion callback has run.
    pub async fn wait(&self) {
        let mut done = self.done.clone();
        // An error means the job task is gone, which only happens after it finished.
        let _ = done.wait_for(|finished| *finished).await;
    }
}
