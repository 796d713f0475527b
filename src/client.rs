//! Blocking client for the Retrieve API of the Copernicus data stores.

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Method;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::config::{Store, load_config};
use crate::error::{CdsErrorResponse, format_cds_error};
use crate::processing::{Job, JobResults, JobState, JobStatus};
use crate::util::{append_query, backoff, progress_bar, retriable_status};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base API URL, e.g. `https://cds.climate.copernicus.eu/api`.
    pub url: String,
    /// Personal access token.
    pub key: String,
    pub verify: bool,
}

/// Submits a request, polls the job until it completes and downloads the
/// resulting file.
#[derive(Debug, Clone)]
pub struct CdsClient {
    store: Store,
    url: String,
    key: String,
    timeout: Duration,
    retry_max: usize,
    sleep_max: Duration,
    progress: bool,
    http: HttpClient,
}

/// A result file waiting on the data store.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub location: String,
    pub content_length: u64,
    pub content_type: Option<String>,
}

impl CdsClient {
    /// Credentials from `<STORE>API_URL`/`<STORE>API_KEY` and/or `.cdsapirc`.
    pub fn from_env(store: Store) -> Result<Self> {
        Self::with_config(store, load_config(store, None, None, None)?)
    }

    pub fn with_config(store: Store, cfg: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("ancillary-rs/", env!("CARGO_PKG_VERSION"))),
        );
        let http = HttpClient::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!cfg.verify)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            store,
            url: cfg.url.trim_end_matches('/').to_string(),
            key: cfg.key,
            timeout: Duration::from_secs(60),
            retry_max: 500,
            sleep_max: Duration::from_secs(120),
            progress: true,
            http,
        })
    }

    pub fn store(&self) -> Store {
        self.store
    }

    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max.max(1);
        self
    }

    pub fn with_sleep_max(mut self, sleep_max: Duration) -> Self {
        self.sleep_max = sleep_max;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Retrieves `request` from `dataset` into `target`.
    pub fn retrieve<T: Serialize>(&self, dataset: &str, request: &T, target: &Path) -> Result<RemoteFile> {
        let monitor_url = self.submit(dataset, request)?;
        let file = self.wait_for_result(dataset, &monitor_url)?;
        self.download(&file, target)?;
        Ok(file)
    }

    /// `POST {url}/retrieve/v1/processes/{dataset}/execution`; returns the job monitor URL.
    fn submit<T: Serialize>(&self, dataset: &str, request: &T) -> Result<String> {
        let retrieve = format!("{}/retrieve/v1", self.url);
        let body = json!({ "inputs": request });
        tracing::debug!("{} submit {dataset}: {body}", self.store.label());
        let job: Job = self.api_json(
            Method::POST,
            &format!("{retrieve}/processes/{dataset}/execution"),
            Some(&body),
        )?;
        job.monitor_url()
            .or_else(|| job.job_id.as_deref().map(|id| format!("{retrieve}/jobs/{id}")))
            .ok_or_else(|| anyhow!("missing monitor link in job submission response"))
    }

    fn wait_for_result(&self, dataset: &str, monitor_url: &str) -> Result<RemoteFile> {
        let status_url = append_query(monitor_url, &[("log", "true"), ("request", "true")]);
        let mut sleep = Duration::from_secs(1);
        let mut last: Option<String> = None;
        loop {
            let job: JobStatus = self.api_json(Method::GET, &status_url, None::<&Value>)?;
            if last.as_deref() != Some(job.status.as_str()) {
                tracing::info!("{} {dataset} job {}", self.store.label(), job.status);
                last = Some(job.status.clone());
            }
            match job.state()? {
                JobState::Successful => {
                    let results_url = job.results_url(monitor_url);
                    let results: JobResults = self.api_json(Method::GET, &results_url, None::<&Value>)?;
                    return results.to_remote_file(&results_url);
                }
                JobState::Failed => bail!(
                    "{} processing of {dataset} failed with status {}",
                    self.store.label(),
                    job.status
                ),
                JobState::Pending => {
                    thread::sleep(sleep);
                    sleep = backoff(sleep, self.sleep_max);
                }
            }
        }
    }

    /// Downloads `file` to `target`, resuming with range requests after an
    /// interrupted transfer.
    pub fn download(&self, file: &RemoteFile, target: &Path) -> Result<()> {
        let total = file.content_length;
        let mut done = match std::fs::metadata(target) {
            Ok(m) if m.len() < total => m.len(),
            _ => 0,
        };
        let pb = progress_bar(Some(total), self.progress);
        let mut failures = 0usize;

        while done < total {
            if let Some(pb) = &pb {
                pb.set_position(done);
            }
            let outcome = self.download_from(file, target, done, pb.as_ref());
            done = std::fs::metadata(target).map(|m| m.len()).unwrap_or(0);
            let reason = match outcome {
                Ok(()) if done >= total => break,
                Ok(()) => anyhow!("downloaded {done} byte(s) out of {total}"),
                Err(e) => e,
            };
            failures += 1;
            if failures >= self.retry_max {
                return Err(reason.context(format!("download of {} failed", file.location)));
            }
            tracing::warn!("download interrupted ({reason:#}), resuming");
            thread::sleep(self.sleep_max);
        }
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        Ok(())
    }

    /// Appends the bytes of `file` from offset `from` to `target`.
    fn download_from(
        &self,
        file: &RemoteFile,
        target: &Path,
        from: u64,
        pb: Option<&indicatif::ProgressBar>,
    ) -> Result<()> {
        let resp = self.robust_request(|| {
            let req = self.authorized(self.http.get(&file.location));
            let req = if from > 0 {
                req.header(RANGE, format!("bytes={from}-"))
            } else {
                req
            };
            req.send()
        })?;
        let mut resp = resp.error_for_status().context("download request failed")?;
        let mut out = OpenOptions::new()
            .create(true)
            .write(true)
            .append(from > 0)
            .truncate(from == 0)
            .open(target)
            .with_context(|| format!("failed to open {}", target.display()))?;

        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = resp.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            if let Some(pb) = pb {
                pb.inc(n as u64);
            }
        }
        out.flush()?;
        Ok(())
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("PRIVATE-TOKEN", self.key.trim())
    }

    fn api_json<B: Serialize, R: DeserializeOwned>(&self, method: Method, url: &str, body: Option<&B>) -> Result<R> {
        let resp = self.robust_request(|| {
            let req = self
                .authorized(self.http.request(method.clone(), url))
                .timeout(self.timeout);
            match body {
                Some(body) => req.json(body).send(),
                None => req.send(),
            }
        })?;

        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(match serde_json::from_str::<CdsErrorResponse>(&text) {
                Ok(e) => format_cds_error(self.store.label(), status, url, &e),
                Err(_) => anyhow!(
                    "{} request failed: HTTP {status} for url ({url})\n{text}",
                    self.store.label()
                ),
            });
        }
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse API JSON (url={url}, status={status})"))
    }

    /// Runs `send` until it answers with a non-retriable status or `retry_max` is reached.
    fn robust_request<F>(&self, mut send: F) -> Result<Response>
    where
        F: FnMut() -> reqwest::Result<Response>,
    {
        let mut tries = 0usize;
        let mut sleep = Duration::from_secs(1);
        loop {
            tries += 1;
            match send() {
                Ok(resp) if !retriable_status(resp.status().as_u16()) || tries >= self.retry_max => {
                    return Ok(resp);
                }
                Ok(resp) => {
                    tracing::warn!("{} answered HTTP {}, retrying", self.store.label(), resp.status());
                }
                Err(err) if tries >= self.retry_max => {
                    return Err(err).context("could not connect");
                }
                Err(err) => {
                    tracing::warn!("{} request error ({err}), retrying", self.store.label());
                }
            }
            thread::sleep(sleep);
            sleep = backoff(sleep, self.sleep_max);
        }
    }
}
