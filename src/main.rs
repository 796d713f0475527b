mod cli;
mod logging;

use std::process;

use anyhow::{Result, bail};
use clap::Parser;

use ancillary::time::days_inclusive;
use ancillary::{
    Area, Cams, Dataset, DatasetReader, Era5, Merra2, Nomenclature, Provider, ProviderOptions,
    Source,
};

use crate::cli::{Cli, Command, DownloadArgs, NamesArgs, ProviderKind, QueryArgs, ShowArgs};

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Download(args) => download(args),
        Command::Show(args) => show(args),
        Command::Names(args) => names(args),
    }
}

fn label(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Era5 => "ERA5",
        ProviderKind::Cams => "CAMS",
        ProviderKind::Merra2 => "MERRA2",
    }
}

fn open(query: &QueryArgs) -> Result<Provider<Box<dyn Source>>> {
    let progress = !query.quiet;
    let source: Box<dyn Source> = match query.provider {
        ProviderKind::Era5 => Box::new(Era5::new().with_progress(progress)),
        ProviderKind::Cams => Box::new(Cams::new().with_progress(progress)),
        ProviderKind::Merra2 => Box::new(Merra2::new()?.with_progress(progress)),
    };
    let options = ProviderOptions {
        offline: query.offline,
        no_std: query.no_std,
        nomenclature: query.nomenclature.clone(),
    };
    Provider::new(source, &query.dir, reader(), options)
}

fn area(query: &QueryArgs) -> Result<Option<Area>> {
    Ok(match query.area.as_deref() {
        Some(&[north, west, south, east]) => Some(Area::new(north, west, south, east)?),
        Some(other) => bail!("--area takes 4 values, got {}", other.len()),
        None => None,
    })
}

fn variables(query: &QueryArgs) -> Vec<&str> {
    query.variables.iter().map(String::as_str).collect()
}

fn download(args: DownloadArgs) -> Result<()> {
    let provider = open(&args.query)?;
    let area = area(&args.query)?;
    let vars = variables(&args.query);
    let last = args.to.unwrap_or(args.from);
    if last < args.from {
        return Err(ancillary::AncillaryError::InvalidRange { first: args.from, last }.into());
    }
    for day in days_inclusive(args.from, last) {
        for path in provider.download(&vars, day, area)? {
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn show(args: ShowArgs) -> Result<()> {
    let provider = open(&args.query)?;
    let ds: Dataset = provider.get(&variables(&args.query), args.at, area(&args.query)?)?;
    println!("{ds}");
    for (name, var) in ds.variables() {
        let (min, max) = var
            .data
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        println!("{name}: min {min:.6} max {max:.6} {}", var.units().unwrap_or(""));
    }
    Ok(())
}

fn names(args: NamesArgs) -> Result<()> {
    let mut table = Nomenclature::builtin(label(args.provider))?;
    if let Some(path) = &args.nomenclature {
        table = table.with_override(path)?;
    }
    for e in table.entries() {
        println!(
            "{:<48} {:<12} {:<10} {}",
            e.name,
            e.short_name,
            e.units.as_deref().unwrap_or("-"),
            e.provider_name.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

#[cfg(feature = "netcdf")]
fn reader() -> Box<dyn DatasetReader> {
    Box::new(ancillary::NetcdfReader)
}

#[cfg(not(feature = "netcdf"))]
fn reader() -> Box<dyn DatasetReader> {
    Box::new(DownloadOnly)
}

/// Stands in for a reader when the crate is built without NetCDF support.
#[cfg(not(feature = "netcdf"))]
struct DownloadOnly;

#[cfg(not(feature = "netcdf"))]
impl DatasetReader for DownloadOnly {
    fn open(&self, path: &std::path::Path) -> Result<Dataset> {
        bail!(
            "cannot read {}: ancillary was built without the netcdf feature",
            path.display()
        )
    }
}
