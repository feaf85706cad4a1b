use crate::commons::{self, index, Commons};
use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    #[clap(flatten)]
    commons: commons::Opts,
    guid: String,
}

pub async fn main(args: Args) -> anyhow::Result<()> {
    let commons = Commons::new(args.commons).await?;
    delete(&commons, &args.guid).await
}

/// Deletes the index record of `guid` at its current revision.
#[tracing::instrument(err)]
pub(crate) async fn delete(commons: &Commons, guid: &str) -> anyhow::Result<()> {
    let record = index::get(commons, guid).await?;
    index::delete(commons, &record.did, &record.rev).await?;
    tracing::info!(
        "deleted {} ({}, rev {})",
        record.file_name.as_deref().unwrap_or("unnamed record"),
        record.did,
        record.rev,
    );
    Ok(())
}
