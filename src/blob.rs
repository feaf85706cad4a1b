use crate::azure;
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Parser)]
pub struct Args {
    #[clap(flatten)]
    storage: azure::Opts,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Upload a local file into the container.
    Upload {
        file: PathBuf,
        /// Blob name; the file name by default.
        #[clap(long)]
        name: Option<String>,
    },
    /// Download a blob of the container into a local file.
    Download {
        name: String,
        /// Destination; the last segment of the blob name by default.
        #[clap(long)]
        output: Option<PathBuf>,
    },
}

pub async fn main(args: Args) -> anyhow::Result<()> {
    let container = azure::Container::new(args.storage)?;
    match args.command {
        Command::Upload { file, name } => {
            let name = match name {
                Some(name) => name,
                None => file_name(&file)?,
            };
            upload(&container, &file, &name).await?;
            println!("{}", container.blob_url(&name)?);
        }
        Command::Download { name, output } => {
            let output = output.unwrap_or_else(|| {
                PathBuf::from(name.rsplit('/').next().unwrap_or(name.as_str()))
            });
            download(&container, &name, &output).await?;
            println!("{}", output.display());
        }
    }
    Ok(())
}

pub(crate) fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| anyhow::format_err!("{} has no file name", path.display()))
}

#[tracing::instrument(err, skip(container))]
pub(crate) async fn upload(
    container: &azure::Container,
    path: &Path,
    name: &str,
) -> anyhow::Result<()> {
    let data = fs::read(path).await?;
    let size = data.len() as u64;
    container.put_blob(name, data.into()).await?;
    tracing::info!(
        "uploaded {name} ({})",
        humansize::format_size(size, humansize::BINARY)
    );
    Ok(())
}

#[tracing::instrument(err, skip(container))]
pub(crate) async fn download(
    container: &azure::Container,
    name: &str,
    path: &Path,
) -> anyhow::Result<()> {
    let data = container.get_blob(name).await?;
    fs::write(path, &data).await?;
    tracing::info!(
        "downloaded {name} ({})",
        humansize::format_size(data.len() as u64, humansize::BINARY)
    );
    Ok(())
}
