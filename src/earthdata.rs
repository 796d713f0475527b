//! HTTP session for NASA Earthdata protected servers (GES DISC OPeNDAP).
//!
//! Data servers answer with a redirect to the Earthdata login host, which in
//! turn redirects back with a session cookie. Redirects are followed by hand so
//! that credentials are only ever sent to the login host.

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{HeaderValue, LOCATION, USER_AGENT};
use reqwest::redirect::Policy;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::netrc::{self, Credentials};
use crate::util::{backoff, progress_bar, retriable_status};

pub const URS_HOST: &str = "urs.earthdata.nasa.gov";

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct EarthdataSession {
    http: HttpClient,
    credentials: Credentials,
    retry_max: usize,
    sleep_max: Duration,
    progress: bool,
}

impl EarthdataSession {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let http = HttpClient::builder()
            .redirect(Policy::none())
            .cookie_store(true)
            .timeout(Duration::from_secs(600))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            credentials,
            retry_max: 5,
            sleep_max: Duration::from_secs(30),
            progress: true,
        })
    }

    /// Credentials for `urs.earthdata.nasa.gov` from `.netrc`.
    pub fn from_netrc() -> Result<Self> {
        Self::new(netrc::credentials_for(URS_HOST)?)
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max.max(1);
        self
    }

    /// GET `url`, following redirects and logging in when sent to the login host.
    ///
    /// Retriable statuses and connection errors are retried up to `retry_max` times.
    pub fn get(&self, url: &str) -> Result<Response> {
        let mut tries = 0usize;
        let mut sleep = Duration::from_secs(1);
        loop {
            tries += 1;
            match self.get_once(url) {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    if !retriable_status(status.as_u16()) || tries >= self.retry_max {
                        if status.as_u16() == 401 {
                            bail!("Earthdata login refused for {url}; check the {URS_HOST} entry of your .netrc");
                        }
                        bail!("HTTP {status} for url ({url})");
                    }
                    tracing::warn!("{url} answered HTTP {status}, retrying");
                }
                Err(err) if err.downcast_ref::<reqwest::Error>().is_none() || tries >= self.retry_max => {
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!("request error ({err:#}), retrying");
                }
            }
            thread::sleep(sleep);
            sleep = backoff(sleep, self.sleep_max);
        }
    }

    fn get_once(&self, url: &str) -> Result<Response> {
        let mut current = Url::parse(url).with_context(|| format!("invalid url {url}"))?;
        for _ in 0..MAX_REDIRECTS {
            let mut req = self.http.get(current.clone()).header(
                USER_AGENT,
                HeaderValue::from_static(concat!("ancillary-rs/", env!("CARGO_PKG_VERSION"))),
            );
            if current.host_str() == Some(URS_HOST) {
                req = req.basic_auth(&self.credentials.login, Some(&self.credentials.password));
            }
            let resp = req
                .send()
                .with_context(|| format!("request to {} failed", current.host_str().unwrap_or("?")))?;
            if !resp.status().is_redirection() {
                return Ok(resp);
            }
            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| anyhow!("redirect without location from {current}"))?;
            let next = current
                .join(location)
                .with_context(|| format!("invalid redirect location {location}"))?;
            tracing::trace!("redirected to {}", next.host_str().unwrap_or("?"));
            current = next;
        }
        bail!("too many redirects for {url}")
    }

    pub fn get_text(&self, url: &str) -> Result<String> {
        self.get(url)?
            .text()
            .with_context(|| format!("failed to read response from {url}"))
    }

    /// Streams `url` into `target`; returns the number of bytes written.
    pub fn download(&self, url: &str, target: &Path) -> Result<u64> {
        let mut resp = self.get(url)?;
        let total = resp.content_length();
        let pb = progress_bar(total, self.progress);

        let mut out = File::create(target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        let mut buf = [0u8; 64 * 1024];
        let mut written = 0u64;
        loop {
            let n = resp.read(&mut buf).context("download interrupted")?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            written += n as u64;
            if let Some(pb) = &pb {
                pb.inc(n as u64);
            }
        }
        out.flush()?;
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        if let Some(expected) = total {
            if written < expected {
                bail!("download failed: downloaded {written} byte(s) out of {expected}");
            }
        }
        Ok(written)
    }
}
