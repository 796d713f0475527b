//! MERRA-2 reanalysis from NASA GES DISC, subset through OPeNDAP.

use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate};
use std::path::Path;

use crate::area::Area;
use crate::catalog::{Catalog, ProductSpec};
use crate::earthdata::EarthdataSession;
use crate::error::AncillaryError;
use crate::netrc::Credentials;
use crate::nomenclature::NomenclatureEntry;
use crate::provider::{FileRequest, Source};
use crate::util::urljoin;

pub const DEFAULT_BASE_URL: &str = "https://goldsmr4.gesdisc.eosdis.nasa.gov/opendap/MERRA2/";

/// Production stream in the file names: 100 before 1992, 200 before 2001,
/// 300 before 2011, 400 afterwards.
pub fn stream_number(day: NaiveDate) -> u32 {
    match day.year() {
        ..=1991 => 100,
        1992..=2000 => 200,
        2001..=2010 => 300,
        _ => 400,
    }
}

/// Time step of a product, from the frequency letter of its name
/// (`M2T1…` hourly, `M2I3…` three-hourly, `M2SD…` daily).
pub fn time_step(product: &str) -> Option<Duration> {
    match product.chars().nth(3)? {
        '1' => Some(Duration::hours(1)),
        '3' => Some(Duration::hours(3)),
        '6' => Some(Duration::hours(6)),
        'D' => Some(Duration::hours(24)),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Merra2 {
    catalog: Catalog,
    base_url: String,
    credentials: Option<Credentials>,
    progress: bool,
}

impl Merra2 {
    /// Uses the builtin catalog and `.netrc` credentials.
    pub fn new() -> Result<Self> {
        Ok(Self::with_catalog(Catalog::builtin()?))
    }

    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            catalog,
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials: None,
            progress: true,
        }
    }

    /// Scrapes the catalog from the server once, memoizing it at `path`.
    pub fn with_scraped_catalog(path: &Path) -> Result<Self> {
        let mut merra = Self::new()?;
        merra.catalog = Catalog::load_or_scrape(path, &merra.session()?, &merra.base_url)?;
        Ok(merra)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn session(&self) -> Result<EarthdataSession> {
        let session = match &self.credentials {
            Some(c) => EarthdataSession::new(c.clone())?,
            None => EarthdataSession::from_netrc()?,
        };
        Ok(session.with_progress(self.progress))
    }

    /// OPeNDAP URL returning `variables` of `product` for `day` as NetCDF-4.
    pub fn file_url(&self, product: &ProductSpec, variables: &[&str], day: NaiveDate) -> String {
        let path = format!(
            "{}.{}/{}/{}.nc4?{},lat,lon,time",
            product.name,
            product.version,
            day.format("%Y/%m"),
            product.file_name(day),
            variables.join(",")
        );
        urljoin(&self.base_url, &path)
    }

    /// The product holding `entry`: its `provider_name` when given, otherwise
    /// the catalog product holding the most of `wanted`.
    fn product_for<'a>(&'a self, entry: &'a NomenclatureEntry, wanted: &[&str]) -> Result<&'a ProductSpec, AncillaryError> {
        let short = entry.short_name.as_str();
        if let Some(name) = entry.provider_name.as_deref() {
            let product = self.catalog.product(name)?;
            if !product.contains(short) {
                return Err(AncillaryError::UnknownProduct(format!("{name} with variable {short}")));
            }
            return Ok(product);
        }
        let mut best: Option<(&ProductSpec, usize)> = None;
        for p in self.catalog.products_with(short) {
            let n = wanted.iter().filter(|w| p.contains(w)).count();
            if best.is_none_or(|(_, m)| n > m) {
                best = Some((p, n));
            }
        }
        best.map(|(p, _)| p)
            .ok_or_else(|| AncillaryError::UnknownProduct(format!("variable {short}")))
    }
}

impl Source for Merra2 {
    fn name(&self) -> &str {
        "MERRA2"
    }

    /// One request per product; products holding most variables come first.
    fn plan(&self, entries: &[NomenclatureEntry]) -> Result<Vec<FileRequest>> {
        let wanted: Vec<&str> = entries.iter().map(|e| e.short_name.as_str()).collect();
        let mut groups: Vec<FileRequest> = Vec::new();
        for entry in entries {
            let product = self.product_for(entry, &wanted)?;
            match groups.iter_mut().find(|g| g.model == product.name) {
                Some(g) => g.entries.push(entry.clone()),
                None => groups.push(FileRequest {
                    model: product.name.clone(),
                    entries: vec![entry.clone()],
                }),
            }
        }
        groups.sort_by(|a, b| b.entries.len().cmp(&a.entries.len()));
        Ok(groups)
    }

    /// Files hold the whole globe; the area is cut after reading.
    fn subsets_area(&self) -> bool {
        false
    }

    fn fetch(&self, request: &FileRequest, day: NaiveDate, _area: &Area, target: &Path) -> Result<()> {
        let product = self.catalog.product(&request.model)?;
        let url = self.file_url(product, &request.short_names(), day);
        if let Some(step) = time_step(&product.name) {
            tracing::debug!("{} holds {} steps per day", product.name, Duration::days(1).num_hours() / step.num_hours());
        }
        tracing::debug!("MERRA-2 url: {url}");
        self.session()?.download(&url, target)?;
        Ok(())
    }
}
