use anyhow::Result;
use topomerge::Creator;
use tracing::info;

use super::{open_region, read_definition, write_output};

pub async fn run(cli: &crate::cli::Cli, args: &crate::cli::MergeArgs) -> Result<()> {
    let (service, region) = open_region(cli, &args.region)?;
    let definition = read_definition(&args.assignment)?;

    info!(region = %region.key(), districts = args.districts, "merging plan");
    let creator = Creator { id: "cli".into(), name: "topomerge".into() };
    let merged = service.merge(&region, definition, args.districts, creator, None).await?;

    if !merged.metadata.completed {
        eprintln!("[merge] plan leaves some units unassigned");
    }
    write_output(args.output.as_deref(), &merged.to_geojson_bytes()?)
}
