mod add;
mod auth;
mod azure;
mod blob;
mod commons;
mod delete;
mod discovery;
mod hash;
mod jsonl;
mod logs;
mod merge;
mod misc;
#[cfg(test)]
mod mock;
mod onboard;
mod report;

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(version, about = "Client for Gen3 data commons")]
struct Args {
    /// Also write logs to this file.
    #[clap(long, global = true)]
    log_file: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Index every blob of an Azure storage container into the commons.
    Onboard(onboard::Args),
    /// Index one object from its local copy, then annotate and resolve it.
    Add(add::Args),
    /// Summarize a report written by `onboard --report`.
    Report(report::Args),
    /// Compute several digests of one file.
    Hash(hash::Args),
    /// Delete an index record.
    Delete(delete::Args),
    /// Read and edit discovery page metadata.
    Discovery(discovery::Args),
    /// Merge indexing manifests on their md5 column.
    MergeManifests(merge::Args),
    /// Upload or download single blobs of an Azure storage container.
    Blob(blob::Args),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv(dotenvy::dotenv())?;
    let args = Args::parse();
    logs::init(args.log_file.as_deref())?;
    match args.command {
        Command::Onboard(args) => onboard::main(args).await,
        Command::Add(args) => add::main(args).await,
        Command::Report(args) => report::main(args).await,
        Command::Hash(args) => hash::main(args).await,
        Command::Delete(args) => delete::main(args).await,
        Command::Discovery(args) => discovery::main(args).await,
        Command::MergeManifests(args) => merge::main(args).await,
        Command::Blob(args) => blob::main(args).await,
    }
}

/// Accepts a missing `.env` file and fails on every other loading error.
fn dotenv<T>(result: dotenvy::Result<T>) -> anyhow::Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context("failed to load .env")),
    }
}
