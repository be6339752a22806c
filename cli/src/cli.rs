use std::path::PathBuf;

/// District merge engine CLI
#[derive(clap::Parser, Debug)]
#[command(name = "topomerge", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Merge a district assignment into district GeoJSON
    Merge(MergeArgs),

    /// Flatten a district assignment to a base-unit CSV
    ExportCsv(ExportCsvArgs),

    /// Build a district assignment from a base-unit CSV
    ImportCsv(ImportCsvArgs),

    /// Load every listed region and report failures
    Preload(PreloadArgs),
}

#[derive(clap::Args, Debug)]
pub struct MergeArgs {
    /// Region directory (dataset files, optional region.json)
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub region: PathBuf,

    /// District assignment JSON
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub assignment: PathBuf,

    /// Number of districts
    #[arg(short, long)]
    pub districts: u32,

    /// Output GeoJSON file, defaults to stdout
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ExportCsvArgs {
    /// Region directory (dataset files, optional region.json)
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub region: PathBuf,

    /// District assignment JSON
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub assignment: PathBuf,

    /// Output CSV file, defaults to stdout
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ImportCsvArgs {
    /// Region directory (dataset files, optional region.json)
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub region: PathBuf,

    /// Plan CSV with `{BASE}ID,DISTRICT` columns
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub plan: PathBuf,

    /// Output assignment JSON, defaults to stdout
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct PreloadArgs {
    /// JSON array of regions
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub regions: PathBuf,

    /// Directory holding one subdirectory per region location
    #[arg(long, value_hint = clap::ValueHint::DirPath, conflicts_with = "url")]
    pub root: Option<PathBuf>,

    /// Base URL serving `<location>/<file>`
    #[arg(long)]
    pub url: Option<String>,
}
