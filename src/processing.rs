//! Job resources of the Retrieve API (OGC API - Processes) shared by CDS and ADS.

use anyhow::{Result, anyhow};

use crate::client::RemoteFile;
use crate::util::urljoin;

#[derive(Debug, serde::Deserialize)]
pub(crate) struct Link {
    #[serde(default)]
    rel: Option<String>,
    href: String,
}

fn find_link(links: &[Link], rel: &str) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some(rel))
        .map(|l| l.href.clone())
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct Job {
    #[serde(default, alias = "jobID")]
    pub(crate) job_id: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
}

impl Job {
    pub(crate) fn monitor_url(&self) -> Option<String> {
        find_link(&self.links, "monitor")
    }
}

/// Lifecycle of a submitted job, as reported by the monitor link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobState {
    Pending,
    Successful,
    Failed,
}

impl JobState {
    pub(crate) fn parse(status: &str) -> Result<Self> {
        match status {
            "accepted" | "running" => Ok(JobState::Pending),
            "successful" => Ok(JobState::Successful),
            "failed" | "rejected" | "dismissed" | "deleted" => Ok(JobState::Failed),
            other => Err(anyhow!("unknown processing status [{}]", other)),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct JobStatus {
    pub(crate) status: String,
    #[serde(default)]
    links: Vec<Link>,
}

impl JobStatus {
    pub(crate) fn state(&self) -> Result<JobState> {
        JobState::parse(&self.status)
    }

    pub(crate) fn results_url(&self, monitor_url: &str) -> String {
        find_link(&self.links, "results")
            .unwrap_or_else(|| format!("{}/results", monitor_url.trim_end_matches('/')))
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct JobResults {
    asset: Asset,
}

#[derive(Debug, serde::Deserialize)]
struct Asset {
    value: AssetValue,
}

#[derive(Debug, serde::Deserialize)]
struct AssetValue {
    href: String,
    #[serde(rename = "file:size")]
    file_size: u64,
    #[serde(default, rename = "type")]
    content_type: Option<String>,
}

impl JobResults {
    pub(crate) fn to_remote_file(&self, results_url: &str) -> Result<RemoteFile> {
        let href = self.asset.value.href.trim();
        if href.is_empty() {
            return Err(anyhow!("missing results asset href"));
        }

        Ok(RemoteFile {
            location: urljoin(results_url, href),
            content_length: self.asset.value.file_size,
            content_type: self.asset.value.content_type.clone(),
        })
    }
}
