//! `fsmpu <file>`: uploads one file and prints the server's response.
//!
//! Environment:
//! - `FSMPU_API_KEY` (required)
//! - `FSMPU_CONFIG`: path to an engine config JSON file
//! - `FSMPU_POLICY` / `FSMPU_SIGNATURE`: request signing
//! - `FSMPU_LOCATION`, `FSMPU_PATH`, `FSMPU_ACCESS`: storage options
//! - `FSMPU_NO_INTELLIGENT=1`: never request Intelligent Ingestion

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, bail};
use fsmpu_protocol::{Security, StorageOptions};
use fsmpu_transfer::ProgressSnapshot;
use fsmpu_upload::{Client, EngineConfig, UploadResult};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fsmpu=debug")),
        )
        .init();

    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        bail!("usage: fsmpu <file>");
    };
    let api_key = std::env::var("FSMPU_API_KEY").context("FSMPU_API_KEY is not set")?;

    let config = match std::env::var_os("FSMPU_CONFIG") {
        Some(p) => EngineConfig::load(Path::new(&p))?,
        None => EngineConfig::default(),
    };
    let intelligent = config.use_intelligent_ingestion
        && !std::env::var("FSMPU_NO_INTELLIGENT").is_ok_and(|v| v == "1");

    let mut client = Client::with_http(api_key, config)?;
    if let (Ok(policy), Ok(signature)) = (std::env::var("FSMPU_POLICY"), std::env::var("FSMPU_SIGNATURE")) {
        client = client.security(Security::new(policy, signature));
    }

    let (tx, rx) = oneshot::channel();
    let handle = client.multipart_upload(
        &path,
        Some(storage_from_env()?),
        intelligent,
        Some(Box::new(progress_logger())),
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    )?;
    info!(job = %handle.id(), file = %path.display(), "upload started");

    let cancel_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling upload");
            cancel_handle.cancel();
        }
    });

    match rx.await.context("upload task ended without a result")? {
        UploadResult::Completed { response } => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        UploadResult::Failed { error, response } => {
            if let Some(body) = response {
                eprintln!("{body}");
            }
            Err(error.into())
        }
        UploadResult::Cancelled => bail!("upload cancelled"),
    }
}

fn storage_from_env() -> anyhow::Result<StorageOptions> {
    let mut store = StorageOptions::default();
    if let Ok(location) = std::env::var("FSMPU_LOCATION") {
        store.location = location
            .parse()
            .map_err(|e| anyhow::anyhow!("FSMPU_LOCATION: {e}"))?;
    }
    if let Ok(access) = std::env::var("FSMPU_ACCESS") {
        store.access = Some(access.parse().map_err(|e| anyhow::anyhow!("FSMPU_ACCESS: {e}"))?);
    }
    store.path = std::env::var("FSMPU_PATH").ok();
    Ok(store)
}

/// Logs progress at most once per whole percent.
fn progress_logger() -> impl Fn(ProgressSnapshot) + Send + Sync + 'static {
    let last = AtomicU64::new(u64::MAX);
    move |snap: ProgressSnapshot| {
        let pct = (snap.fraction() * 100.0) as u64;
        if last.swap(pct, Ordering::Relaxed) != pct {
            info!(sent = snap.bytes_sent, total = snap.total_bytes, "{pct}%");
        }
    }
}
