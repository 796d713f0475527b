//! CAMS global atmospheric composition forecasts from the Atmosphere Data Store.

use anyhow::{Context, Result, bail, ensure};
use chrono::NaiveDate;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use zip::read::ZipArchive;

use crate::area::Area;
use crate::client::{CdsClient, ClientConfig};
use crate::config::Store;
use crate::dataset::Dataset;
use crate::era5::ozone_to_dobson;
use crate::nomenclature::NomenclatureEntry;
use crate::provider::{FileRequest, Source};
use crate::time::unit_seconds;

/// Global atmospheric composition forecasts.
pub const GACF: &str = "GACF";

const GACF_DATASET: &str = "cams-global-atmospheric-composition-forecasts";

/// Two forecast runs per day, each covering twelve hourly lead times.
const BASE_TIMES: [&str; 2] = ["00:00", "12:00"];
const LEAD_HOURS: u32 = 12;

#[derive(Debug, Serialize)]
struct CamsRequest {
    date: String,
    #[serde(rename = "type")]
    kind: Vec<&'static str>,
    variable: Vec<String>,
    time: Vec<&'static str>,
    leadtime_hour: Vec<String>,
    data_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    area: Option<[f64; 4]>,
}

#[derive(Debug, Clone)]
pub struct Cams {
    config: Option<ClientConfig>,
    progress: bool,
}

impl Default for Cams {
    fn default() -> Self {
        Self::new()
    }
}

impl Cams {
    /// Credentials from `ADSAPI_URL`/`ADSAPI_KEY` or the `ads` section of `.cdsapirc`.
    pub fn new() -> Self {
        Self {
            config: None,
            progress: true,
        }
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config: Some(config),
            progress: true,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn client(&self) -> Result<CdsClient> {
        let client = match &self.config {
            Some(cfg) => CdsClient::with_config(Store::Ads, cfg.clone())?,
            None => CdsClient::from_env(Store::Ads)?,
        };
        Ok(client.with_progress(self.progress))
    }

    fn request(request: &FileRequest, day: NaiveDate, area: &Area) -> Result<CamsRequest> {
        ensure!(request.model == GACF, "unknown CAMS model {}", request.model);
        let d = day.format("%Y-%m-%d");
        Ok(CamsRequest {
            date: format!("{d}/{d}"),
            kind: vec!["forecast"],
            variable: request.provider_names().into_iter().map(str::to_string).collect(),
            time: BASE_TIMES.to_vec(),
            leadtime_hour: (0..LEAD_HOURS).map(|h| h.to_string()).collect(),
            data_format: "netcdf_zip",
            area: (!area.is_global()).then(|| area.as_request()),
        })
    }
}

impl Source for Cams {
    fn name(&self) -> &str {
        "CAMS"
    }

    fn plan(&self, entries: &[NomenclatureEntry]) -> Result<Vec<FileRequest>> {
        if let Some(e) = entries.iter().find(|e| !e.single_level) {
            bail!("{} is not available as a CAMS single-level field", e.name);
        }
        Ok(vec![FileRequest {
            model: GACF.to_string(),
            entries: entries.to_vec(),
        }])
    }

    fn fetch(&self, request: &FileRequest, day: NaiveDate, area: &Area, target: &Path) -> Result<()> {
        let body = Self::request(request, day, area)?;
        tracing::debug!("CAMS request for {day}: {:?}", body.variable);
        let download = target.with_extension("download");
        self.client()?.retrieve(GACF_DATASET, &body, &download)?;
        unpack_single_netcdf(&download, target)
    }

    /// Reference time × lead time become one hourly `time` axis; ozone goes to Dobson units.
    fn post_process(&self, mut ds: Dataset, _request: &FileRequest) -> Result<Dataset> {
        let period_seconds = ds
            .coord("forecast_period")
            .and_then(|c| c.attrs.get("units"))
            .and_then(|u| unit_seconds(u))
            .unwrap_or(3600.0);
        ds.stack_forecast_time("forecast_reference_time", "forecast_period", period_seconds)?;
        ozone_to_dobson(&mut ds, "gtco3");
        Ok(ds)
    }
}

/// Moves `download` to `target`, extracting it first when it is a zip archive
/// holding one NetCDF file.
fn unpack_single_netcdf(download: &Path, target: &Path) -> Result<()> {
    let mut magic = [0u8; 4];
    let n = File::open(download)
        .and_then(|mut f| f.read(&mut magic))
        .with_context(|| format!("failed to read {}", download.display()))?;
    if n < magic.len() || &magic != b"PK\x03\x04" {
        fs::rename(download, target)?;
        return Ok(());
    }

    let mut archive = ZipArchive::new(File::open(download)?)
        .with_context(|| format!("{} is not a valid zip archive", download.display()))?;
    let mut found = None;
    for i in 0..archive.len() {
        if archive.by_index(i)?.name().ends_with(".nc") {
            ensure!(found.is_none(), "{} holds more than one NetCDF file", download.display());
            found = Some(i);
        }
    }
    let Some(i) = found else {
        bail!("no NetCDF file in {}", download.display());
    };
    let mut entry = archive.by_index(i)?;
    let mut out = File::create(target)?;
    std::io::copy(&mut entry, &mut out)
        .with_context(|| format!("failed to extract {}", entry.name()))?;
    fs::remove_file(download).ok();
    Ok(())
}
