//! `Provider` queries against a scripted source writing JSON day files.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ancillary::{
    AncillaryError, Area, Coordinate, Dataset, DatasetReader, FileRequest, NomenclatureEntry,
    Provider, ProviderOptions, Source, Variable,
};
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

const LATS: [f64; 2] = [45.0, 44.0];
const LONS: [f64; 3] = [2.0, 3.0, 4.0];
const WIDE_LATS: [f64; 4] = [60.0, 45.0, 44.0, 30.0];
const WIDE_LONS: [f64; 5] = [-10.0, 2.0, 3.0, 4.0, 170.0];

#[derive(Serialize, Deserialize)]
struct DayFile {
    day: NaiveDate,
    variables: Vec<(String, Option<String>)>,
    /// Minutes past the hour of every time step.
    minutes: u32,
    time_name: String,
    lats: Vec<f64>,
    lons: Vec<f64>,
}

/// Writes a [`DayFile`] per request and records every call.
#[derive(Clone)]
struct Scripted {
    name: &'static str,
    calls: Arc<Mutex<Vec<(NaiveDate, Area)>>>,
    wrong_units: bool,
}

impl Scripted {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: Arc::default(),
            wrong_units: false,
        }
    }

    fn fetch_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Source for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn plan(&self, entries: &[NomenclatureEntry]) -> Result<Vec<FileRequest>> {
        Ok(vec![FileRequest {
            model: "TEST".to_string(),
            entries: entries.to_vec(),
        }])
    }

    fn fetch(&self, request: &FileRequest, day: NaiveDate, area: &Area, target: &Path) -> Result<()> {
        self.calls.lock().unwrap().push((day, *area));
        let file = DayFile {
            day,
            variables: request
                .entries
                .iter()
                .map(|e| {
                    let units = if self.wrong_units { Some("furlongs".to_string()) } else { e.units.clone() };
                    (e.short_name.clone(), units)
                })
                .collect(),
            minutes: 0,
            time_name: "time".to_string(),
            lats: LATS.to_vec(),
            lons: LONS.to_vec(),
        };
        std::fs::write(target, serde_json::to_vec(&file)?)?;
        Ok(())
    }
}

/// Plans one request per product like MERRA-2 does. `M2T…` products are time
/// averages stamped at half past the hour on a `valid_time` axis, the others
/// are instantaneous on the hour.
#[derive(Clone)]
struct Products {
    calls: Arc<Mutex<Vec<(String, NaiveDate, Area)>>>,
    whole_globe: bool,
}

impl Products {
    fn new(whole_globe: bool) -> Self {
        Self {
            calls: Arc::default(),
            whole_globe,
        }
    }

    fn fetched(&self) -> Vec<(String, NaiveDate)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(model, day, _)| (model.clone(), *day))
            .collect()
    }
}

impl Source for Products {
    fn name(&self) -> &str {
        "MERRA2"
    }

    fn plan(&self, entries: &[NomenclatureEntry]) -> Result<Vec<FileRequest>> {
        let mut requests: Vec<FileRequest> = Vec::new();
        for entry in entries {
            let model = entry.provider_name.clone().unwrap_or_default();
            match requests.iter_mut().find(|r| r.model == model) {
                Some(r) => r.entries.push(entry.clone()),
                None => requests.push(FileRequest {
                    model,
                    entries: vec![entry.clone()],
                }),
            }
        }
        Ok(requests)
    }

    fn fetch(&self, request: &FileRequest, day: NaiveDate, area: &Area, target: &Path) -> Result<()> {
        self.calls.lock().unwrap().push((request.model.clone(), day, *area));
        let averaged = request.model.starts_with("M2T");
        let (lats, lons) = if self.whole_globe {
            (WIDE_LATS.to_vec(), WIDE_LONS.to_vec())
        } else {
            (LATS.to_vec(), LONS.to_vec())
        };
        let file = DayFile {
            day,
            variables: request
                .entries
                .iter()
                .map(|e| (e.short_name.clone(), e.units.clone()))
                .collect(),
            minutes: if averaged { 30 } else { 0 },
            time_name: if averaged { "valid_time" } else { "time" }.to_string(),
            lats,
            lons,
        };
        std::fs::write(target, serde_json::to_vec(&file)?)?;
        Ok(())
    }

    fn subsets_area(&self) -> bool {
        !self.whole_globe
    }

    fn post_process(&self, mut ds: Dataset, _request: &FileRequest) -> Result<Dataset> {
        ds.rename_dim("valid_time", "time")?;
        Ok(ds)
    }
}

/// Hourly grids whose every value is the number of hours since the epoch.
struct JsonReader;

impl DatasetReader for JsonReader {
    fn open(&self, path: &Path) -> Result<Dataset> {
        let file: DayFile = serde_json::from_slice(&std::fs::read(path)?)?;
        let start = ancillary::time::to_seconds(file.day.and_hms_opt(0, file.minutes, 0).unwrap());
        let times: Vec<f64> = (0..24).map(|h| start + 3600.0 * f64::from(h)).collect();

        let mut ds = Dataset::new();
        ds.add_coord(&file.time_name, Coordinate::time(times.clone()))?;
        ds.add_coord("lat", Coordinate::new(file.lats.clone()))?;
        ds.add_coord("lon", Coordinate::new(file.lons.clone()))?;
        for (short, units) in file.variables {
            let data = ArrayD::from_shape_fn(IxDyn(&[24, file.lats.len(), file.lons.len()]), |ix| {
                times[ix[0]] / 3600.0
            });
            let mut var = Variable::new(&[file.time_name.as_str(), "lat", "lon"], data)?;
            if let Some(u) = units {
                var = var.with_attr("units", &u);
            }
            ds.add_variable(&short, var)?;
        }
        Ok(ds)
    }
}

fn provider(source: &Scripted, dir: &Path, options: ProviderOptions) -> Provider<Scripted> {
    Provider::new(source.clone(), dir, Box::new(JsonReader), options).unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 3, d).unwrap()
}

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    day(d).and_hms_opt(h, m, 0).unwrap()
}

fn hours(t: NaiveDateTime) -> f64 {
    ancillary::time::to_seconds(t) / 3600.0
}

fn ancillary_error(err: &anyhow::Error) -> &AncillaryError {
    err.downcast_ref::<AncillaryError>()
        .unwrap_or_else(|| panic!("not an AncillaryError: {err:#}"))
}

#[test]
fn cached_day_is_fetched_once() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let p = provider(&source, dir.path(), ProviderOptions::default());

    let first = p.get_day(&["sea_level_pressure"], day(7), None).unwrap();
    let again = p.get_day(&["sea_level_pressure"], day(7), None).unwrap();
    assert_eq!(source.fetch_count(), 1);
    assert_eq!(first, again);

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1, "no temporary file left behind");
}

#[test]
fn file_name_ignores_variable_order() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let p = provider(&source, dir.path(), ProviderOptions::default());

    let a = p
        .download(&["sea_level_pressure", "surface_pressure"], day(7), None)
        .unwrap();
    let b = p
        .download(&["surface_pressure", "sea_level_pressure"], day(7), None)
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(source.fetch_count(), 1);
    assert_eq!(
        a[0].file_name().unwrap().to_str().unwrap(),
        "ERA5_TEST_global_msl_sp_20220307.nc"
    );
}

#[test]
fn area_is_rounded_outward_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let p = provider(&source, dir.path(), ProviderOptions::default());

    let area = Area::new(45.2, 2.7, 40.9, 9.1).unwrap();
    p.download(&["surface_pressure"], day(7), Some(area)).unwrap();
    let (_, fetched) = source.calls.lock().unwrap()[0];
    assert_eq!(fetched, Area::new(46.0, 2.0, 40.0, 10.0).unwrap());
}

#[test]
fn offline_requires_a_cached_file() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let offline = ProviderOptions {
        offline: true,
        ..ProviderOptions::default()
    };

    let p = provider(&source, dir.path(), offline.clone());
    let err = p.get_day(&["surface_pressure"], day(7), None).unwrap_err();
    assert!(matches!(ancillary_error(&err), AncillaryError::OfflineMissing { .. }));
    assert_eq!(source.fetch_count(), 0);

    provider(&source, dir.path(), ProviderOptions::default())
        .download(&["surface_pressure"], day(7), None)
        .unwrap();
    let ds = p.get_day(&["surface_pressure"], day(7), None).unwrap();
    assert!(ds.contains("surface_pressure"));
    assert_eq!(source.fetch_count(), 1);
}

#[test]
fn missing_cache_directory() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    let err = Provider::new(
        Scripted::new("ERA5"),
        &missing,
        Box::new(JsonReader),
        ProviderOptions::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(ancillary_error(&err), AncillaryError::MissingDirectory(_)));
}

#[test]
fn unknown_variable() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let p = provider(&source, dir.path(), ProviderOptions::default());

    let err = p.get_day(&["aerosol_type"], day(7), None).unwrap_err();
    match ancillary_error(&err) {
        AncillaryError::UnknownVariable { provider, name } => {
            assert_eq!(provider, "ERA5");
            assert_eq!(name, "aerosol_type");
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(source.fetch_count(), 0);
}

#[test]
fn canonical_names_are_shared_across_providers() {
    let names = ["total_column_ozone", "sea_level_pressure", "air_temperature_2m"];
    for provider_name in ["ERA5", "MERRA2"] {
        let dir = tempfile::tempdir().unwrap();
        let source = Scripted::new(provider_name);
        let p = provider(&source, dir.path(), ProviderOptions::default());
        let ds = p.get_day(&names, day(7), None).unwrap();

        let mut got: Vec<&str> = ds.variable_names().collect();
        got.sort_unstable();
        assert_eq!(got, ["air_temperature_2m", "sea_level_pressure", "total_column_ozone"]);
        assert_eq!(ds.variable("total_column_ozone").unwrap().units(), Some("Dobsons"));
        assert_eq!(
            ds.variable("sea_level_pressure").unwrap().dims,
            ["time", "latitude", "longitude"]
        );
    }
}

#[test]
fn instant_is_interpolated_linearly() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let p = provider(&source, dir.path(), ProviderOptions::default());

    let t = at(7, 10, 30);
    let ds = p.get(&["surface_pressure"], t, None).unwrap();
    let sp = ds.variable("surface_pressure").unwrap();
    assert_eq!(sp.dims, ["latitude", "longitude"]);
    assert!(sp.data.iter().all(|v| (v - hours(t)).abs() < 1e-6));
    assert_eq!(ds.attrs["time"], "2022-03-07T10:30:00");

    let exact = at(7, 10, 0);
    let ds = p.get(&["surface_pressure"], exact, None).unwrap();
    let sp = ds.variable("surface_pressure").unwrap();
    assert!(sp.data.iter().all(|&v| v == hours(exact)));
    assert_eq!(source.fetch_count(), 1);
}

#[test]
fn instant_after_the_last_step_loads_the_next_day() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let p = provider(&source, dir.path(), ProviderOptions::default());

    let t = at(7, 23, 15);
    let ds = p.get(&["surface_pressure"], t, None).unwrap();
    let sp = ds.variable("surface_pressure").unwrap();
    assert!(sp.data.iter().all(|v| (v - hours(t)).abs() < 1e-6));

    let days: Vec<NaiveDate> = source.calls.lock().unwrap().iter().map(|(d, _)| *d).collect();
    assert_eq!(days, [day(7), day(8)]);
}

#[test]
fn range_is_concatenated_along_time() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let p = provider(&source, dir.path(), ProviderOptions::default());

    let ds = p
        .get_range(&["sea_level_pressure"], day(6), day(8), None)
        .unwrap();
    let times = ds.times().unwrap();
    assert_eq!(times.len(), 72);
    assert_eq!(times[0], at(6, 0, 0));
    assert_eq!(times[71], at(8, 23, 0));
    assert_eq!(ds.variable("sea_level_pressure").unwrap().shape(), [72, 2, 3]);
    assert_eq!(source.fetch_count(), 3);

    let single = p.get_range(&["sea_level_pressure"], day(6), day(6), None).unwrap();
    assert_eq!(single.times().unwrap().len(), 24);
}

#[test]
fn reversed_range_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let p = provider(&source, dir.path(), ProviderOptions::default());

    let err = p
        .get_range(&["sea_level_pressure"], day(8), day(6), None)
        .unwrap_err();
    assert!(matches!(ancillary_error(&err), AncillaryError::InvalidRange { .. }));
    assert_eq!(source.fetch_count(), 0);
}

#[test]
fn computed_variable_records_its_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let p = provider(&source, dir.path(), ProviderOptions::default());

    let t = at(7, 6, 0);
    let ds = p.get(&["surface_wind_speed"], t, None).unwrap();
    assert_eq!(ds.variable_names().collect::<Vec<_>>(), ["surface_wind_speed"]);
    let ws = ds.variable("surface_wind_speed").unwrap();
    assert_eq!(ws.attrs["computed_from"], "eastward_wind_10m,northward_wind_10m");
    assert_eq!(ws.units(), Some("m s-1"));
    let expected = hours(t) * std::f64::consts::SQRT_2;
    assert!(ws.data.iter().all(|v| (v - expected).abs() < 1e-6));

    let requested = &source.calls.lock().unwrap();
    assert_eq!(requested.len(), 1);
}

#[test]
fn no_std_keeps_provider_names() {
    let dir = tempfile::tempdir().unwrap();
    let source = Scripted::new("ERA5");
    let options = ProviderOptions {
        no_std: true,
        ..ProviderOptions::default()
    };
    let p = provider(&source, dir.path(), options);

    let ds = p.get_day(&["msl", "tco3"], day(7), None).unwrap();
    let mut names: Vec<&str> = ds.variable_names().collect();
    names.sort_unstable();
    assert_eq!(names, ["msl", "tco3"]);
    assert_eq!(ds.variable("msl").unwrap().dims, ["time", "lat", "lon"]);

    assert!(p.get_day(&["#windspeed"], day(7), None).is_err());
    let err = p.get_day(&["sea_level_pressure"], day(7), None).unwrap_err();
    assert!(matches!(ancillary_error(&err), AncillaryError::UnknownVariable { .. }));
}

#[test]
fn unexpected_units_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = Scripted::new("ERA5");
    source.wrong_units = true;
    let p = provider(&source, dir.path(), ProviderOptions::default());

    let err = p.get_day(&["surface_pressure"], day(7), None).unwrap_err();
    match ancillary_error(&err) {
        AncillaryError::UnitMismatch { name, expected, actual } => {
            assert_eq!(name, "sp");
            assert_eq!(expected, "Pa");
            assert_eq!(actual, "furlongs");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn user_nomenclature_overrides_rows() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("names.csv");
    std::fs::write(
        &csv,
        "name, units, provider_name, short_name, code, flag1, flag2\n\
         sea_level_pressure, hPa, mean_sea_level_pressure, msl, 151, 1, 0\n\
         snow_depth, m, snow_depth, sd, 141, 1, 0\n",
    )
    .unwrap();
    let cache = dir.path().join("cache");
    std::fs::create_dir(&cache).unwrap();

    let source = Scripted::new("ERA5");
    let options = ProviderOptions {
        nomenclature: Some(csv),
        ..ProviderOptions::default()
    };
    let p = provider(&source, &cache, options);
    let names = p.nomenclature();
    assert_eq!(names.entry("sea_level_pressure").unwrap().units.as_deref(), Some("hPa"));
    assert_eq!(names.entry("snow_depth").unwrap().short_name, "sd");

    let ds = p.get_day(&["snow_depth", "sea_level_pressure"], day(7), None).unwrap();
    assert_eq!(ds.variable("sea_level_pressure").unwrap().units(), Some("hPa"));
}

#[test]
fn products_on_offset_time_axes_share_one_day() {
    let dir = tempfile::tempdir().unwrap();
    let source = Products::new(false);
    let p = Provider::new(source.clone(), dir.path(), Box::new(JsonReader), ProviderOptions::default()).unwrap();

    let ds = p
        .get_day(&["total_column_water_vapor", "sea_level_pressure"], day(7), None)
        .unwrap();
    assert_eq!(
        source.fetched(),
        [("M2I1NXINT".to_string(), day(7)), ("M2T1NXSLV".to_string(), day(7))]
    );
    let times = ds.times().unwrap();
    assert_eq!(times.len(), 48);
    assert_eq!(times[0], at(7, 0, 0));
    assert_eq!(times[1], at(7, 0, 30));
    assert_eq!(times[47], at(7, 23, 30));

    let tqv = ds.variable("total_column_water_vapor").unwrap();
    let slp = ds.variable("sea_level_pressure").unwrap();
    assert_eq!(slp.dims, ["time", "latitude", "longitude"]);
    assert!((tqv.data[[2, 0, 0]] - hours(at(7, 1, 0))).abs() < 1e-9);
    assert!(tqv.data[[1, 0, 0]].is_nan());
    assert!((slp.data[[1, 0, 0]] - hours(at(7, 0, 30))).abs() < 1e-9);
    assert!(slp.data[[0, 0, 0]].is_nan());

    let range = p
        .get_range(&["total_column_water_vapor", "sea_level_pressure"], day(6), day(7), None)
        .unwrap();
    assert_eq!(range.times().unwrap().len(), 96);
}

#[test]
fn instant_is_interpolated_on_each_product_axis() {
    let dir = tempfile::tempdir().unwrap();
    let source = Products::new(false);
    let p = Provider::new(source.clone(), dir.path(), Box::new(JsonReader), ProviderOptions::default()).unwrap();

    let t = at(7, 23, 15);
    let ds = p
        .get(&["total_column_water_vapor", "sea_level_pressure"], t, None)
        .unwrap();
    for name in ["total_column_water_vapor", "sea_level_pressure"] {
        let v = ds.variable(name).unwrap();
        assert_eq!(v.dims, ["latitude", "longitude"]);
        assert!(v.data.iter().all(|x| (x - hours(t)).abs() < 1e-6), "{name}");
    }
    // 23:15 is past the last instantaneous step only
    assert_eq!(
        source.fetched(),
        [
            ("M2I1NXINT".to_string(), day(7)),
            ("M2I1NXINT".to_string(), day(8)),
            ("M2T1NXSLV".to_string(), day(7))
        ]
    );
}

#[test]
fn whole_globe_files_are_cut_to_the_area() {
    let dir = tempfile::tempdir().unwrap();
    let source = Products::new(true);
    let p = Provider::new(source.clone(), dir.path(), Box::new(JsonReader), ProviderOptions::default()).unwrap();

    let area = Area::new(45.5, 1.5, 43.5, 4.2).unwrap();
    let ds = p.get_day(&["sea_level_pressure"], day(7), Some(area)).unwrap();
    assert_eq!(ds.coord("latitude").unwrap().values.to_vec(), LATS.to_vec());
    assert_eq!(ds.coord("longitude").unwrap().values.to_vec(), LONS.to_vec());
    assert_eq!(ds.variable("sea_level_pressure").unwrap().shape(), [24, 2, 3]);

    let wider = Area::new(60.0, -10.0, 30.0, 20.0).unwrap();
    let ds = p.get_day(&["sea_level_pressure"], day(7), Some(wider)).unwrap();
    assert_eq!(ds.coord("latitude").unwrap().values.to_vec(), WIDE_LATS.to_vec());
    assert_eq!(ds.coord("longitude").unwrap().values.to_vec(), [-10.0, 2.0, 3.0, 4.0]);

    let calls = source.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1, "one whole-globe file serves every area");
    assert_eq!(calls[0].2, Area::GLOBAL);
    let paths = p.download(&["sea_level_pressure"], day(7), Some(area)).unwrap();
    assert!(paths[0].to_str().unwrap().contains("_global_"));

    let elsewhere = Area::new(-50.0, 100.0, -60.0, 110.0).unwrap();
    assert!(p.get_day(&["sea_level_pressure"], day(7), Some(elsewhere)).is_err());
}
