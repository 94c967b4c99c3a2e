use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Error};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    fetcher::Fetch,
    registry::TrialOrder,
    resolver::{Resolution, Resolver},
    watchseries::Episode,
};

/// Whether `dir` already holds a file named `basename.*`.
pub fn already_downloaded(dir: &Path, basename: &str) -> bool {
    let prefix = format!("{}.", basename);
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_name().to_string_lossy().starts_with(&prefix)),
        Err(_) => false,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DownloadJob {
    pub url: String,
    pub dir: PathBuf,
    pub file_name: String,
}

impl DownloadJob {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

#[async_trait]
pub trait DownloadSink: Send + Sync {
    /// Called once before the first job of a run.
    async fn prepare(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn enqueue(&self, job: &DownloadJob) -> Result<(), Error>;
}

/// Queues jobs in a running aria2 through its JSON-RPC interface.
pub struct Aria2Sink {
    client: reqwest::Client,
    endpoint: String,
    secret: Option<String>,
    connections: u32,
    max_downloads: u32,
}

impl Aria2Sink {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        secret: Option<String>,
        connections: u32,
        max_downloads: u32,
    ) -> Aria2Sink {
        Aria2Sink {
            client,
            endpoint: endpoint.to_string(),
            secret,
            connections,
            max_downloads,
        }
    }

    fn request(&self, method: &str, params: Vec<Value>) -> Value {
        let mut all = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            all.push(Value::String(format!("token:{}", secret)));
        }
        all.extend(params);
        json!({
            "jsonrpc": "2.0",
            "id": "watchseries-dl",
            "method": method,
            "params": all,
        })
    }

    pub fn add_uri_request(&self, job: &DownloadJob) -> Value {
        self.request(
            "aria2.addUri",
            vec![
                json!([job.url]),
                json!({
                    "dir": job.dir.to_string_lossy(),
                    "out": job.file_name,
                    "max-connection-per-server": self.connections.to_string(),
                    "split": self.connections.to_string(),
                }),
            ],
        )
    }

    pub fn global_options_request(&self) -> Value {
        self.request(
            "aria2.changeGlobalOption",
            vec![json!({
                "max-concurrent-downloads": self.max_downloads.to_string(),
            })],
        )
    }

    async fn call(&self, request: Value) -> Result<Value, Error> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("aria2 is not reachable at {}", self.endpoint))?
            .json::<Value>()
            .await
            .context("aria2 answered with invalid json")?;
        rpc_result(response)
    }
}

fn rpc_result(mut response: Value) -> Result<Value, Error> {
    if let Some(error) = response.get("error") {
        Err(anyhow!(
            "aria2 rejected the request: {}",
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
        ))?
    }
    Ok(response
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

#[async_trait]
impl DownloadSink for Aria2Sink {
    async fn prepare(&self) -> Result<(), Error> {
        self.call(self.global_options_request()).await?;
        Ok(())
    }

    async fn enqueue(&self, job: &DownloadJob) -> Result<(), Error> {
        let gid = self.call(self.add_uri_request(job)).await?;
        debug!(gid = %gid, path = %job.path().display(), "queued in aria2");
        Ok(())
    }
}

/// Prints the links instead of downloading them.
pub struct PrintSink;

#[async_trait]
impl DownloadSink for PrintSink {
    async fn enqueue(&self, job: &DownloadJob) -> Result<(), Error> {
        println!("{}\t{}", job.url, job.path().display());
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// A file for the episode exists already, nothing was fetched.
    Skipped,
    Queued { host: &'static str },
    Exhausted,
    Failed(String),
    Cancelled,
}

/// Takes one episode from the catalog to the download manager.
pub struct Dispatcher<F, S> {
    resolver: Resolver<F>,
    sink: S,
    series_dir: PathBuf,
}

impl<F: Fetch, S: DownloadSink> Dispatcher<F, S> {
    pub fn new(resolver: Resolver<F>, sink: S, series_dir: PathBuf) -> Dispatcher<F, S> {
        Dispatcher {
            resolver,
            sink,
            series_dir,
        }
    }

    /// Readies the sink for the run. aria2 keeps accepting jobs with its own
    /// defaults when the global options are refused, so a failure is only
    /// reported and the run goes on.
    pub async fn prepare(&self) -> bool {
        match self.sink.prepare().await {
            Ok(()) => true,
            Err(err) => {
                warn!("could not prepare the download manager: {:#}", err);
                false
            }
        }
    }

    pub fn job_for(&self, episode: &Episode, url: &str, extension: &str) -> DownloadJob {
        DownloadJob {
            url: url.to_string(),
            dir: episode.season_dir(&self.series_dir),
            file_name: format!("{}.{}", episode.basename(), extension),
        }
    }

    pub async fn process<O>(
        &self,
        episode: &Episode,
        order: &mut O,
        cancel: &CancellationToken,
    ) -> Outcome
    where
        O: TrialOrder + ?Sized,
    {
        let dir = episode.season_dir(&self.series_dir);
        if already_downloaded(&dir, &episode.basename()) {
            return Outcome::Skipped;
        }
        match self.resolver.resolve(&episode.page_url, order, cancel).await {
            Resolution::Resolved { link, .. } => {
                let job = self.job_for(episode, &link.url, &link.extension);
                let queued = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Outcome::Cancelled,
                    queued = self.sink.enqueue(&job) => queued,
                };
                match queued {
                    Ok(()) => Outcome::Queued { host: link.host },
                    Err(err) => {
                        warn!(episode = %episode.basename(), "could not queue download: {:#}", err);
                        Outcome::Failed(format!("{:#}", err))
                    }
                }
            }
            Resolution::Exhausted { .. } => Outcome::Exhausted,
            Resolution::Cancelled => Outcome::Cancelled,
        }
    }
}
