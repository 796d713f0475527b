use std::path::PathBuf;

use anyhow::anyhow;
use reqwest::StatusCode;

/// Conditions a caller may want to tell apart.
///
/// These travel inside [`anyhow::Error`]; use `err.downcast_ref::<AncillaryError>()`
/// to inspect them.
#[derive(Debug, thiserror::Error)]
pub enum AncillaryError {
    /// The cache file is not present and downloads are disabled.
    #[error("could not find local file {}, offline mode is set", .path.display())]
    OfflineMissing { path: PathBuf },

    /// The variable has no row in the provider's nomenclature table.
    #[error("variable {name} is not defined in the {provider} nomenclature")]
    UnknownVariable { provider: String, name: String },

    /// The MERRA-2 catalog has no such product, or no product carries the variable.
    #[error("no MERRA-2 product matches {0}")]
    UnknownProduct(String),

    /// The cache directory does not exist.
    #[error("directory {} does not exist, use an existing directory", .0.display())]
    MissingDirectory(PathBuf),

    /// A variable's units do not match the nomenclature table.
    #[error("{name}: expected units '{expected}', got '{actual}'")]
    UnitMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("invalid area: {0}")]
    InvalidArea(String),

    #[error("invalid date range: {first} is after {last}")]
    InvalidRange {
        first: chrono::NaiveDate,
        last: chrono::NaiveDate,
    },

    /// The requested instant is not covered by the loaded time axis.
    #[error("{0} is outside the time coverage of the loaded files")]
    TimeOutOfRange(chrono::NaiveDateTime),

    /// Malformed nomenclature CSV content.
    #[error("nomenclature {source_name}, line {line}: {message}")]
    Nomenclature {
        source_name: String,
        line: u64,
        message: String,
    },
}

/// Error payload returned by the CDS and ADS Retrieve APIs.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct CdsErrorResponse {
    #[serde(default, rename = "type")]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<u16>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
    #[serde(default)]
    pub(crate) trace_id: Option<String>,
    // Some endpoints respond with {"message":...,"detail":...}
    #[serde(default)]
    pub(crate) message: Option<String>,
}

pub(crate) fn format_cds_error(
    store: &str,
    status: StatusCode,
    url: &str,
    e: &CdsErrorResponse,
) -> anyhow::Error {
    let title = e.title.as_deref().or(e.message.as_deref()).unwrap_or("");
    let detail = e.detail.as_deref().unwrap_or("");
    let trace = match e.trace_id.as_deref() {
        Some(t) if !t.is_empty() => t,
        _ => "(none)",
    };
    let kind = e.kind.as_deref().unwrap_or("");
    let status_in_body = e.status.unwrap_or(status.as_u16());

    let lower = format!("{} {}", title, detail).to_lowercase();
    if status == StatusCode::FORBIDDEN && lower.contains("licence") {
        let link = detail
            .find("https://")
            .and_then(|idx| detail[idx..].split_whitespace().next())
            .unwrap_or("the dataset page on the data store");

        return anyhow!(
            "{store} returned 403: required dataset licence(s) have not been accepted.\n\
             Accept them at {link} (Manage licences), then re-run.\n\
             Server message: {title}\ntrace_id: {trace}"
        );
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return anyhow!(
            "{store} authentication failed (HTTP {status_in_body}).\n\
             Check the personal access token in .cdsapirc (no '<UID>:' prefix) and that it is not expired.\n\
             Server message: {title}\n{detail}\nkind: {kind}\ntrace_id: {trace}\nrequest: {url}"
        );
    }

    if status == StatusCode::NOT_FOUND {
        return anyhow!(
            "{store} endpoint not found (HTTP 404), check the configured url.\n\
             Server message: {title}\n{detail}\nrequest: {url}"
        );
    }

    anyhow!("{store} request failed: HTTP {status_in_body} for url ({url})\n{title}\n{detail}")
}
