//! Ancillary meteorological and atmospheric-composition data on demand.
//!
//! Full-day files are downloaded from ERA5 (Climate Data Store), CAMS
//! (Atmosphere Data Store) or MERRA-2 (NASA GES DISC), cached locally and
//! returned under provider-independent variable names and units.
//!
//! ## Quick start
//! - Configure the data store credentials: `CDSAPI_URL`/`CDSAPI_KEY` or
//!   `.cdsapirc` for ERA5, `ADSAPI_URL`/`ADSAPI_KEY` or the `ads` section of
//!   `.cdsapirc` for CAMS, a `urs.earthdata.nasa.gov` entry in `.netrc` for MERRA-2.
//! - Build a [`Provider`] over a source and an existing cache directory.
//!
//! ```no_run
//! # #[cfg(feature = "netcdf")]
//! # fn main() -> anyhow::Result<()> {
//! use ancillary::{Area, Era5, Provider, ProviderOptions};
//! use chrono::NaiveDate;
//!
//! let era5 = Provider::with_netcdf(Era5::new(), "/data/ancillary", ProviderOptions::default())?;
//! let day = NaiveDate::from_ymd_opt(2022, 3, 7).unwrap();
//! let at = day.and_hms_opt(10, 30, 0).unwrap();
//! let ds = era5.get(
//!     &["total_column_ozone", "surface_wind_speed"],
//!     at,
//!     Some(Area::new(46.0, 2.0, 40.0, 10.0)?),
//! )?;
//! println!("{ds}");
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "netcdf"))]
//! # fn main() {}
//! ```
//!
//! Reading files requires the `netcdf` feature, or any [`DatasetReader`].

#![forbid(unsafe_code)]

mod area;
mod cache;
mod cams;
mod catalog;
mod client;
pub mod computable;
mod config;
mod dataset;
mod earthdata;
mod era5;
mod error;
pub mod merra2;
pub mod netrc;
mod nomenclature;
mod processing;
mod provider;
mod reader;
pub mod time;
mod util;

pub use area::Area;
pub use cache::{CacheKey, FileCache, cache_json};
pub use cams::{Cams, GACF};
pub use catalog::{Catalog, ProductSpec};
pub use client::{CdsClient, ClientConfig, RemoteFile};
pub use computable::Computable;
pub use config::Store;
pub use dataset::{Attrs, Coordinate, Dataset, LATITUDE, LONGITUDE, TIME, Variable};
pub use earthdata::EarthdataSession;
pub use era5::{Era5, RAPL, RASL};
pub use error::AncillaryError;
pub use merra2::Merra2;
pub use nomenclature::{Nomenclature, NomenclatureEntry, normalize_units};
pub use provider::{FileRequest, Provider, ProviderOptions, Source};
pub use reader::{DatasetReader, Packing};

#[cfg(feature = "netcdf")]
pub use reader::NetcdfReader;
