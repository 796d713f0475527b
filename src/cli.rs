use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand, ValueEnum};

/// Download and inspect ancillary meteorological data.
#[derive(Parser)]
#[command(
    name = "ancillary",
    version,
    about = "Cached ancillary data from ERA5, CAMS and MERRA-2"
)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    Era5,
    Cams,
    Merra2,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Download, or find in the cache, every full-day file of a date range.
    Download(DownloadArgs),
    /// Print the variables interpolated at one instant.
    Show(ShowArgs),
    /// List the nomenclature table of a provider.
    Names(NamesArgs),
}

/// Options shared by the commands reading the cache.
#[derive(clap::Args)]
pub struct QueryArgs {
    /// Data provider.
    pub provider: ProviderKind,

    /// Variables, by canonical name (or short name with --no-std).
    #[arg(long = "var", required = true, num_args = 1..)]
    pub variables: Vec<String>,

    /// Bounding box north west south east, in degrees; global when omitted.
    #[arg(long, num_args = 4, value_names = ["N", "W", "S", "E"], allow_negative_numbers = true)]
    pub area: Option<Vec<f64>>,

    /// Existing cache directory.
    #[arg(short, long)]
    pub dir: PathBuf,

    /// Never download, fail when a file is missing from the cache.
    #[arg(long)]
    pub offline: bool,

    /// Keep the provider's own variable names and units.
    #[arg(long)]
    pub no_std: bool,

    /// CSV file whose rows replace the builtin nomenclature rows.
    #[arg(long)]
    pub nomenclature: Option<PathBuf>,

    /// Hide download progress bars.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the `download` subcommand.
#[derive(clap::Args)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// First day (YYYY-MM-DD).
    #[arg(long)]
    pub from: NaiveDate,

    /// Last day, included; defaults to --from.
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

/// Arguments for the `show` subcommand.
#[derive(clap::Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Instant, YYYY-MM-DDTHH:MM[:SS].
    #[arg(long, value_parser = parse_instant)]
    pub at: NaiveDateTime,
}

/// Arguments for the `names` subcommand.
#[derive(clap::Args)]
pub struct NamesArgs {
    /// Data provider.
    pub provider: ProviderKind,

    /// CSV file whose rows replace the builtin nomenclature rows.
    #[arg(long)]
    pub nomenclature: Option<PathBuf>,
}

fn parse_instant(s: &str) -> Result<NaiveDateTime, String> {
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| format!("invalid instant '{s}', expected YYYY-MM-DDTHH:MM"))
}
