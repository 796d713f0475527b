//! ERA5 reanalysis from the Copernicus Climate Data Store.

use anyhow::{Result, bail};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::path::Path;

use crate::area::Area;
use crate::client::{CdsClient, ClientConfig};
use crate::config::Store;
use crate::dataset::{Dataset, TIME};
use crate::nomenclature::{NomenclatureEntry, normalize_units};
use crate::provider::{FileRequest, Source};

/// Reanalysis on single levels.
pub const RASL: &str = "RASL";
/// Reanalysis on pressure levels.
pub const RAPL: &str = "RAPL";

const RASL_DATASET: &str = "reanalysis-era5-single-levels";
const RAPL_DATASET: &str = "reanalysis-era5-pressure-levels";

const PRESSURE_LEVELS: [u32; 37] = [
    1, 2, 3, 5, 7, 10, 20, 30, 50, 70, 100, 125, 150, 175, 200, 225, 250, 300, 350, 400, 450,
    500, 550, 600, 650, 700, 750, 775, 800, 825, 850, 875, 900, 925, 950, 975, 1000,
];

/// Mass of ozone in one Dobson unit, kg m-2.
pub(crate) const KG_M2_PER_DOBSON: f64 = 2.1415e-5;

#[derive(Debug, Serialize)]
struct Era5Request {
    product_type: Vec<&'static str>,
    variable: Vec<String>,
    year: String,
    month: String,
    day: String,
    time: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pressure_level: Option<Vec<String>>,
    data_format: &'static str,
    download_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    area: Option<[f64; 4]>,
}

/// ERA5 hourly data on single and pressure levels.
///
/// The CDS client is created on the first download, so cached files can be
/// read without any credentials.
#[derive(Debug, Clone)]
pub struct Era5 {
    config: Option<ClientConfig>,
    progress: bool,
}

impl Default for Era5 {
    fn default() -> Self {
        Self::new()
    }
}

impl Era5 {
    /// Credentials from the environment or `.cdsapirc`.
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
            Some(cfg) => CdsClient::with_config(Store::Cds, cfg.clone())?,
            None => CdsClient::from_env(Store::Cds)?,
        };
        Ok(client.with_progress(self.progress))
    }

    fn request(request: &FileRequest, day: NaiveDate, area: &Area) -> Result<(&'static str, Era5Request)> {
        let (dataset, levels) = match request.model.as_str() {
            RASL => (RASL_DATASET, None),
            RAPL => (
                RAPL_DATASET,
                Some(PRESSURE_LEVELS.iter().map(u32::to_string).collect()),
            ),
            other => bail!("unknown ERA5 model {other}"),
        };
        Ok((
            dataset,
            Era5Request {
                product_type: vec!["reanalysis"],
                variable: request.provider_names().into_iter().map(str::to_string).collect(),
                year: day.year().to_string(),
                month: format!("{:02}", day.month()),
                day: format!("{:02}", day.day()),
                time: hourly_times(),
                pressure_level: levels,
                data_format: "netcdf",
                download_format: "unarchived",
                area: (!area.is_global()).then(|| area.as_request()),
            },
        ))
    }
}

pub(crate) fn hourly_times() -> Vec<String> {
    (0..24).map(|h| format!("{h:02}:00")).collect()
}

impl Source for Era5 {
    fn name(&self) -> &str {
        "ERA5"
    }

    /// Single-level variables go to `RASL`, the others to `RAPL`.
    fn plan(&self, entries: &[NomenclatureEntry]) -> Result<Vec<FileRequest>> {
        let mut single = Vec::new();
        let mut pressure = Vec::new();
        for e in entries {
            if e.single_level {
                single.push(e.clone());
            } else if e.multi_level {
                pressure.push(e.clone());
            } else {
                bail!("{} is available on neither single nor pressure levels", e.name);
            }
        }
        Ok([(RASL, single), (RAPL, pressure)]
            .into_iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(model, entries)| FileRequest {
                model: model.to_string(),
                entries,
            })
            .collect())
    }

    fn fetch(&self, request: &FileRequest, day: NaiveDate, area: &Area, target: &Path) -> Result<()> {
        let (dataset, body) = Self::request(request, day, area)?;
        tracing::debug!("ERA5 {} request for {day}: {:?}", request.model, body.variable);
        self.client()?.retrieve(dataset, &body, target)?;
        Ok(())
    }

    fn post_process(&self, mut ds: Dataset, _request: &FileRequest) -> Result<Dataset> {
        ds.rename_dim("valid_time", TIME)?;
        ozone_to_dobson(&mut ds, "tco3");
        Ok(ds)
    }
}

/// Converts a total ozone column from kg m-2 to Dobson units; other units are left alone.
pub(crate) fn ozone_to_dobson(ds: &mut Dataset, short: &str) {
    let Some(var) = ds.variable_mut(short) else { return };
    if var.units().map(normalize_units).as_deref() != Some("kg m-2") {
        return;
    }
    var.data.mapv_inplace(|v| v / KG_M2_PER_DOBSON);
    var.attrs.insert("units".to_string(), "Dobsons".to_string());
}
