use ancillary::{Area, Era5, Provider, ProviderOptions};
use anyhow::Result;
use chrono::NaiveDate;

fn main() -> Result<()> {
    // Downloads one day of ERA5 over western Europe into ./ancillary-cache.
    // Configure authentication via env vars or a `.cdsapirc` file.
    let dir = std::path::Path::new("ancillary-cache");
    std::fs::create_dir_all(dir)?;
    let era5 = Provider::with_netcdf(Era5::new(), dir, ProviderOptions::default())?;

    let day = NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date");
    let area = Area::new(52.3, -5.4, 41.1, 9.8)?;
    let ds = era5.get_day(
        &["total_column_ozone", "total_column_water_vapor", "surface_wind_speed"],
        day,
        Some(area),
    )?;
    println!("{ds}");
    Ok(())
}
