//! Bounded-concurrency archive fetcher.
//!
//! Streams each package archive into `<cache>/<id>.partial` and renames it to
//! `<cache>/<id>` once the body is complete, so a cache entry is never a
//! half-written file. Every package gets its own result; transient failures
//! are retried with exponential backoff.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pm_schema::{PackageId, PackageMeta};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ErrorKind, Reporter};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("transfer truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    #[error("cache IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("fetch task failed: {0}")]
    Task(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Cache,
            Self::Task(_) => ErrorKind::Internal,
            Self::Http(_) | Self::Status { .. } | Self::Truncated { .. } | Self::Cancelled => {
                ErrorKind::Transport
            }
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_builder(),
            Self::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Truncated { .. } => true,
            Self::Io { .. } | Self::Cancelled | Self::Task(_) => false,
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> FetchError + '_ {
    move |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Maximum concurrent downloads.
    pub jobs: usize,
    /// Extra attempts after a transient failure.
    pub retries: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub backoff: Duration,
    /// Cancel the remaining downloads after the first failure.
    pub fail_fast: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retries: 2,
            backoff: Duration::from_millis(500),
            fail_fast: false,
        }
    }
}

/// Result of fetching one package.
#[derive(Debug)]
pub struct FetchOutcome {
    pub meta: PackageMeta,
    /// Final cache location, whether or not the fetch succeeded.
    pub path: PathBuf,
    /// Bytes written on success.
    pub result: Result<u64, FetchError>,
}

/// Create the cache directory if needed. Idempotent.
pub async fn ensure_cache_dir(dir: &Path) -> Result<(), FetchError> {
    tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;
    let meta = tokio::fs::metadata(dir).await.map_err(io_err(dir))?;
    if !meta.is_dir() {
        return Err(FetchError::Io {
            path: dir.to_path_buf(),
            source: std::io::Error::other("cache path is not a directory"),
        });
    }
    Ok(())
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(client: Client, options: FetchOptions) -> Self {
        Self { client, options }
    }

    /// Build a client with the crate user agent and a per-request timeout.
    pub fn with_timeout(timeout: Duration, options: FetchOptions) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self::new(client, options))
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetch every package into `cache_dir`. Outcomes are returned in the
    /// order of `metas`. Cancelling `cancel` stops in-flight downloads; with
    /// `fail_fast` the first failure does the same for its siblings without
    /// touching the caller's token.
    pub async fn fetch_all(
        &self,
        cache_dir: &Path,
        metas: &[PackageMeta],
        reporter: Arc<dyn Reporter>,
        cancel: &CancellationToken,
    ) -> Vec<FetchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.options.jobs.max(1)));
        let batch = cancel.child_token();
        let mut set = JoinSet::new();

        for (index, meta) in metas.iter().cloned().enumerate() {
            let client = self.client.clone();
            let options = self.options.clone();
            let semaphore = semaphore.clone();
            let reporter = reporter.clone();
            let token = batch.clone();
            let dest = cache_dir.join(meta.id());

            set.spawn(async move {
                let result = tokio::select! {
                    biased;
                    () = token.cancelled() => Err(FetchError::Cancelled),
                    r = async {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| FetchError::Cancelled)?;
                        fetch_with_retry(&client, &meta, &dest, &options, reporter.as_ref()).await
                    } => r,
                };
                (index, meta, dest, result)
            });
        }

        let mut slots: Vec<Option<FetchOutcome>> = metas.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, meta, path, result)) => {
                    if let Err(e) = &result {
                        debug!(package = %meta, error = %e, "fetch failed");
                        if self.options.fail_fast && !matches!(e, FetchError::Cancelled) {
                            batch.cancel();
                        }
                    }
                    slots[index] = Some(FetchOutcome { meta, path, result });
                }
                Err(e) => warn!(error = %e, "fetch task did not complete"),
            }
        }

        slots
            .into_iter()
            .zip(metas)
            .map(|(slot, meta)| {
                slot.unwrap_or_else(|| FetchOutcome {
                    meta: meta.clone(),
                    path: cache_dir.join(meta.id()),
                    result: Err(FetchError::Task("task panicked or was aborted".to_string())),
                })
            })
            .collect()
    }
}

async fn fetch_with_retry(
    client: &Client,
    meta: &PackageMeta,
    dest: &Path,
    options: &FetchOptions,
    reporter: &dyn Reporter,
) -> Result<u64, FetchError> {
    let id = meta.id();
    let mut attempt = 0u32;
    loop {
        match fetch_one(client, &id, &meta.url, dest, reporter).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_transient() && attempt < options.retries => {
                let delay = options.backoff.saturating_mul(1 << attempt.min(16));
                attempt += 1;
                warn!(%id, attempt, error = %e, ?delay, "transient fetch failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn fetch_one(
    client: &Client,
    id: &PackageId,
    url: &str,
    dest: &Path,
    reporter: &dyn Reporter,
) -> Result<u64, FetchError> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }

    let total = response.content_length();
    reporter.downloading(id, 0, total);

    let partial = partial_path(dest);
    let mut file = File::create(&partial).await.map_err(io_err(&partial))?;
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_err(&partial))?;
        received += chunk.len() as u64;
        reporter.downloading(id, received, total);
    }

    file.flush().await.map_err(io_err(&partial))?;
    file.sync_all().await.map_err(io_err(&partial))?;
    drop(file);

    if let Some(expected) = total.filter(|&expected| expected != received) {
        return Err(FetchError::Truncated { expected, received });
    }

    tokio::fs::rename(&partial, dest)
        .await
        .map_err(io_err(dest))?;
    debug!(%id, bytes = received, "fetched");
    Ok(received)
}
