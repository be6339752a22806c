use anyhow::Result;

use super::{open_region, read_definition, write_output};

pub async fn run(cli: &crate::cli::Cli, args: &crate::cli::ExportCsvArgs) -> Result<()> {
    let (service, region) = open_region(cli, &args.region)?;
    let definition = read_definition(&args.assignment)?;
    let csv = service.export_csv(&region, definition).await?;
    write_output(args.output.as_deref(), &csv)
}
