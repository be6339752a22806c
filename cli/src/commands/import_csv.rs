use std::fs;

use anyhow::{Context, Result};

use super::{open_region, write_output};

pub async fn run(cli: &crate::cli::Cli, args: &crate::cli::ImportCsvArgs) -> Result<()> {
    let (service, region) = open_region(cli, &args.region)?;
    let csv = fs::read(&args.plan).with_context(|| format!("[import-csv] Failed to read {}", args.plan.display()))?;
    let definition = service.import_csv(&region, &csv).await?;
    write_output(args.output.as_deref(), &definition.to_json()?)
}
