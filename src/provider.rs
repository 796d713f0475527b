//! Provider-independent query layer.
//!
//! A [`Source`] knows how to obtain full-day files from one archive; a
//! [`Provider`] adds the nomenclature, the local cache and the standardization
//! steps, and answers day, range and instant queries.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};

use crate::area::Area;
use crate::cache::{CacheKey, FileCache};
use crate::computable::{self, Computable};
use crate::dataset::{Dataset, LATITUDE, LONGITUDE};
use crate::error::AncillaryError;
use crate::nomenclature::{Nomenclature, NomenclatureEntry};
use crate::reader::DatasetReader;
use crate::time;

/// One full-day file to obtain from a source.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRequest {
    /// Source-specific model or product identifier, part of the cache key.
    pub model: String,
    pub entries: Vec<NomenclatureEntry>,
}

impl FileRequest {
    pub fn short_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.short_name.as_str()).collect()
    }

    /// `provider_name` of every entry, falling back to the short name.
    pub fn provider_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.provider_name.as_deref().unwrap_or(&e.short_name))
            .collect()
    }
}

/// An archive that delivers full-day files.
pub trait Source {
    /// Label used in cache file names and nomenclature errors.
    fn name(&self) -> &str;

    fn nomenclature(&self) -> Result<Nomenclature> {
        Nomenclature::builtin(self.name())
    }

    /// Groups downloadable entries into file requests.
    fn plan(&self, entries: &[NomenclatureEntry]) -> Result<Vec<FileRequest>>;

    /// Writes the complete file for `request`, `day` and the already rounded
    /// `area` to `target`.
    fn fetch(&self, request: &FileRequest, day: NaiveDate, area: &Area, target: &Path) -> Result<()>;

    /// Whether `fetch` cuts the area on the server. Sources serving whole-globe
    /// files share one cached file per day, cut after reading.
    fn subsets_area(&self) -> bool {
        true
    }

    /// Source-specific fixes applied right after reading, in every mode.
    fn post_process(&self, ds: Dataset, _request: &FileRequest) -> Result<Dataset> {
        Ok(ds)
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn nomenclature(&self) -> Result<Nomenclature> {
        (**self).nomenclature()
    }

    fn plan(&self, entries: &[NomenclatureEntry]) -> Result<Vec<FileRequest>> {
        (**self).plan(entries)
    }

    fn fetch(&self, request: &FileRequest, day: NaiveDate, area: &Area, target: &Path) -> Result<()> {
        (**self).fetch(request, day, area, target)
    }

    fn subsets_area(&self) -> bool {
        (**self).subsets_area()
    }

    fn post_process(&self, ds: Dataset, request: &FileRequest) -> Result<Dataset> {
        (**self).post_process(ds, request)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    /// Never download; a missing file is an error.
    pub offline: bool,
    /// Return provider short names untouched, without computables.
    pub no_std: bool,
    /// User nomenclature rows overriding the builtin table.
    pub nomenclature: Option<PathBuf>,
}

/// Requested names resolved against the nomenclature.
#[derive(Debug)]
struct Resolved {
    /// Names to return, canonical or short depending on the mode.
    output: Vec<String>,
    downloads: Vec<NomenclatureEntry>,
    computed: Vec<(NomenclatureEntry, &'static Computable)>,
}

pub struct Provider<S: Source> {
    source: S,
    names: Nomenclature,
    cache: FileCache,
    reader: Box<dyn DatasetReader>,
    offline: bool,
    no_std: bool,
}

impl<S: Source> Provider<S> {
    pub fn new(
        source: S,
        directory: impl Into<PathBuf>,
        reader: Box<dyn DatasetReader>,
        options: ProviderOptions,
    ) -> Result<Self> {
        let cache = FileCache::new(directory)?;
        let mut names = source.nomenclature()?;
        if let Some(path) = &options.nomenclature {
            names = names.with_override(path)?;
        }
        Ok(Self {
            source,
            names,
            cache,
            reader,
            offline: options.offline,
            no_std: options.no_std,
        })
    }

    /// A provider reading its files with [`crate::reader::NetcdfReader`].
    #[cfg(feature = "netcdf")]
    pub fn with_netcdf(source: S, directory: impl Into<PathBuf>, options: ProviderOptions) -> Result<Self> {
        Self::new(source, directory, Box::new(crate::reader::NetcdfReader), options)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn nomenclature(&self) -> &Nomenclature {
        &self.names
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    /// Makes sure every full-day file needed for `variables` on `day` is cached.
    pub fn download(&self, variables: &[&str], day: NaiveDate, area: Option<Area>) -> Result<Vec<PathBuf>> {
        let area = area.unwrap_or_default().rounded();
        let resolved = self.resolve(variables)?;
        self.source
            .plan(&resolved.downloads)?
            .iter()
            .map(|request| self.fetch(request, day, &area))
            .collect()
    }

    /// One calendar day.
    pub fn get_day(&self, variables: &[&str], day: NaiveDate, area: Option<Area>) -> Result<Dataset> {
        let area = area.unwrap_or_default().rounded();
        let resolved = self.resolve(variables)?;
        let requests = self.source.plan(&resolved.downloads)?;
        self.load_day(&resolved, &requests, day, &area)
    }

    /// Every day from `first` to `last` included, concatenated along time.
    pub fn get_range(
        &self,
        variables: &[&str],
        first: NaiveDate,
        last: NaiveDate,
        area: Option<Area>,
    ) -> Result<Dataset> {
        if last < first {
            return Err(AncillaryError::InvalidRange { first, last }.into());
        }
        let area = area.unwrap_or_default().rounded();
        let resolved = self.resolve(variables)?;
        let requests = self.source.plan(&resolved.downloads)?;
        let parts = time::days_inclusive(first, last)
            .into_iter()
            .map(|day| self.load_day(&resolved, &requests, day, &area))
            .collect::<Result<Vec<_>>>()?;
        Dataset::concat_time(parts)
    }

    /// The instant `at`, linearly interpolated between the two bracketing time
    /// steps of each file. The neighbouring day is loaded when `at` falls
    /// outside the time coverage of a file of its own day.
    pub fn get(&self, variables: &[&str], at: NaiveDateTime, area: Option<Area>) -> Result<Dataset> {
        let area = area.unwrap_or_default().rounded();
        let resolved = self.resolve(variables)?;
        let parts = self
            .source
            .plan(&resolved.downloads)?
            .iter()
            .map(|request| self.load_at(request, at, &area))
            .collect::<Result<Vec<_>>>()?;
        self.finish(Dataset::merge_all(parts)?, &resolved)
    }

    fn resolve(&self, variables: &[&str]) -> Result<Resolved> {
        let mut resolved = Resolved {
            output: Vec::new(),
            downloads: Vec::new(),
            computed: Vec::new(),
        };
        fn add_download(downloads: &mut Vec<NomenclatureEntry>, entry: &NomenclatureEntry) {
            if !downloads.iter().any(|e| e.short_name == entry.short_name) {
                downloads.push(entry.clone());
            }
        }
        fn add_output(output: &mut Vec<String>, name: &str) {
            if !output.iter().any(|n| n == name) {
                output.push(name.to_string());
            }
        }

        for &name in variables {
            if self.no_std {
                let entry = self.names.entry_by_short_name(name)?;
                if entry.is_computable() {
                    bail!("{name} is computed and cannot be requested without standardization");
                }
                add_download(&mut resolved.downloads, entry);
                add_output(&mut resolved.output, &entry.short_name);
                continue;
            }

            let entry = self.names.entry(name)?;
            if entry.is_computable() {
                let comp = computable::lookup(&entry.short_name)
                    .ok_or_else(|| anyhow!("no computation is defined for {}", entry.short_name))?;
                for input in comp.inputs {
                    add_download(&mut resolved.downloads, self.names.entry(input)?);
                }
                if !resolved.computed.iter().any(|(e, _)| e.name == entry.name) {
                    resolved.computed.push((entry.clone(), comp));
                }
            } else {
                add_download(&mut resolved.downloads, entry);
            }
            add_output(&mut resolved.output, &entry.name);
        }

        if resolved.output.is_empty() {
            bail!("no variable requested from {}", self.source.name());
        }
        Ok(resolved)
    }

    fn fetch(&self, request: &FileRequest, day: NaiveDate, area: &Area) -> Result<PathBuf> {
        let area = if self.source.subsets_area() { *area } else { Area::GLOBAL };
        let key = CacheKey {
            provider: self.source.name().to_string(),
            model: request.model.clone(),
            variables: request.short_names().into_iter().map(str::to_string).collect(),
            day,
            area,
        };
        self.cache.fetch(&key, self.offline, |target| {
            self.source
                .fetch(request, day, &area, target)
                .with_context(|| format!("{} download of {} for {day} failed", self.source.name(), request.model))
        })
    }

    /// Reads the file of `request` for `day`, cut to `area`, holding only its
    /// short names.
    fn load(&self, request: &FileRequest, day: NaiveDate, area: &Area) -> Result<Dataset> {
        let path = self.fetch(request, day, area)?;
        let ds = self
            .reader
            .open(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut ds = self.source.post_process(ds, request)?;
        if !self.no_std {
            ds.rename_dim("lat", LATITUDE)?;
            ds.rename_dim("lon", LONGITUDE)?;
            ds.wrap_longitude()?;
        }
        crop(&mut ds, area).with_context(|| format!("cannot cut {}", path.display()))?;
        ds.select(request.short_names().as_slice())
            .with_context(|| format!("unexpected content in {}", path.display()))
    }

    /// `request` at the instant `at`, with the neighbouring day when needed.
    fn load_at(&self, request: &FileRequest, at: NaiveDateTime, area: &Area) -> Result<Dataset> {
        let day = at.date();
        let ds = self.load(request, day, area)?;
        let times = ds
            .time_values()
            .ok_or_else(|| anyhow!("{} {} data for {day} has no time axis", self.source.name(), request.model))?;
        let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
            bail!("{} {} data for {day} has an empty time axis", self.source.name(), request.model);
        };

        let t = time::to_seconds(at);
        let ds = if t < first {
            let prev = day.pred_opt().ok_or(AncillaryError::TimeOutOfRange(at))?;
            tracing::debug!("{at} is before the first step of {} on {day}, loading {prev}", request.model);
            Dataset::concat_time(vec![self.load(request, prev, area)?, ds])?
        } else if t > last {
            let next = day.succ_opt().ok_or(AncillaryError::TimeOutOfRange(at))?;
            tracing::debug!("{at} is after the last step of {} on {day}, loading {next}", request.model);
            Dataset::concat_time(vec![ds, self.load(request, next, area)?])?
        } else {
            ds
        };
        ds.interp_time(at)
    }

    fn load_day(
        &self,
        resolved: &Resolved,
        requests: &[FileRequest],
        day: NaiveDate,
        area: &Area,
    ) -> Result<Dataset> {
        let parts = requests
            .iter()
            .map(|request| self.load(request, day, area))
            .collect::<Result<Vec<_>>>()?;
        self.finish(Dataset::merge_all(parts)?, resolved)
    }

    fn finish(&self, mut ds: Dataset, resolved: &Resolved) -> Result<Dataset> {
        if !self.no_std {
            self.standardize(&mut ds, resolved)?;
        }
        ds.select(resolved.output.as_slice())
    }

    /// Computes derived variables, checks units and renames to canonical names.
    fn standardize(&self, ds: &mut Dataset, resolved: &Resolved) -> Result<()> {
        for (entry, comp) in &resolved.computed {
            let mut inputs = Vec::with_capacity(comp.inputs.len());
            for &input in comp.inputs {
                let short = &self.names.entry(input)?.short_name;
                let var = ds
                    .variable(short)
                    .ok_or_else(|| anyhow!("{short} is missing, cannot compute {}", entry.name))?;
                inputs.push((input, var));
            }
            let mut var = comp.evaluate(&inputs)?;
            if let Some(units) = &entry.units {
                var.attrs.insert("units".to_string(), units.clone());
            }
            ds.add_variable(&entry.short_name, var)?;
        }

        let shorts: Vec<String> = ds.variable_names().map(str::to_string).collect();
        for short in shorts {
            let entry = self.names.entry_by_short_name(&short)?;
            let units = ds.variable(&short).and_then(|v| v.units());
            self.names.verify_units(&short, units)?;
            let canonical = entry.name.clone();
            ds.rename(&short, &canonical)?;
        }
        Ok(())
    }
}

/// Keeps the grid points inside `area`, on standardized or provider axes.
fn crop(ds: &mut Dataset, area: &Area) -> Result<()> {
    if area.is_global() {
        return Ok(());
    }
    let (lat, lon) = if ds.coord(LATITUDE).is_some() {
        (LATITUDE, LONGITUDE)
    } else {
        ("lat", "lon")
    };
    ds.retain_coord(lat, |v| area.contains_latitude(v));
    ds.retain_coord(lon, |v| area.contains_longitude(v));
    for dim in [lat, lon] {
        if ds.dim_len(dim) == Some(0) {
            bail!("no {dim} of the grid lies inside {area}");
        }
    }
    Ok(())
}
