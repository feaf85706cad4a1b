use crate::commons::{self, mds, Commons};
use clap::Parser;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

const GUID_TYPE: &str = "discovery_metadata";
const GUID_COLUMN: &str = "guid";
const DISCOVERY: &str = "gen3_discovery";

#[derive(Debug, Parser)]
pub struct Args {
    #[clap(flatten)]
    commons: commons::Opts,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Publish every row of a TSV file with a `guid` column.
    Publish {
        file: Option<PathBuf>,
        /// Publish {commons}-discovery_metadata.tsv from the current directory.
        #[clap(long)]
        default_file: bool,
        /// Leave out empty cells.
        #[clap(long)]
        omit_empty: bool,
    },
    /// Download the discovery page metadata into {commons}-discovery_metadata.tsv.
    Read {
        #[clap(long, default_value_t = 500)]
        limit: usize,
    },
    /// Delete the discovery metadata of one GUID.
    Delete { guid: String },
}

pub async fn main(args: Args) -> anyhow::Result<()> {
    let commons = Commons::new(args.commons).await?;
    let current_dir = env::current_dir()?;
    match args.command {
        Command::Publish {
            file,
            default_file,
            omit_empty,
        } => {
            let file = match file {
                Some(file) => file,
                None if default_file => current_dir.join(default_file_name(&commons)),
                None => prompt("Enter discovery metadata TSV file to publish: ").await?,
            };
            let count = publish(&commons, &file, omit_empty).await?;
            tracing::info!("published {count} records from {}", file.display());
        }
        Command::Read { limit } => {
            let path = read(&commons, limit, &current_dir).await?;
            println!("{}", path.display());
        }
        Command::Delete { guid } => delete(&commons, &guid).await?,
    }
    Ok(())
}

fn default_file_name(commons: &Commons) -> String {
    format!(
        "{}-discovery_metadata.tsv",
        commons.endpoint().host_str().unwrap_or("commons"),
    )
}

async fn prompt(message: &str) -> anyhow::Result<PathBuf> {
    let mut stderr = io::stderr();
    stderr.write_all(message.as_bytes()).await?;
    stderr.flush().await?;
    let mut line = String::new();
    BufReader::new(io::stdin()).read_line(&mut line).await?;
    let line = line.trim();
    anyhow::ensure!(!line.is_empty(), "no file given");
    Ok(PathBuf::from(line))
}

/// Writes the discovery metadata of the commons into `dir` and returns the
/// path of the TSV file.
#[tracing::instrument(err, ret)]
pub(crate) async fn read(commons: &Commons, limit: usize, dir: &Path) -> anyhow::Result<PathBuf> {
    let records = mds::query(commons, GUID_TYPE, limit).await?;
    let path = dir.join(default_file_name(commons));
    fs::write(&path, to_tsv(&records)?).await?;
    Ok(path)
}

fn to_tsv(records: &Map<String, Value>) -> anyhow::Result<Vec<u8>> {
    let discovery = |metadata: &Value| metadata.get(DISCOVERY).and_then(Value::as_object).cloned();
    let columns = records
        .values()
        .filter_map(discovery)
        .flat_map(|fields| fields.into_iter().map(|(key, _)| key))
        .filter(|key| key != GUID_COLUMN)
        .collect::<BTreeSet<_>>();

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    writer.write_record(std::iter::once(GUID_COLUMN).chain(columns.iter().map(String::as_str)))?;
    for (guid, metadata) in records {
        let fields = discovery(metadata).unwrap_or_default();
        let mut row = vec![guid.clone()];
        for column in &columns {
            row.push(match fields.get(column) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(value)) => value.clone(),
                Some(value) => serde_json::to_string(value)?,
            });
        }
        writer.write_record(&row)?;
    }
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

/// Posts every row of the TSV file at `path` and returns how many were
/// published.
#[tracing::instrument(err, ret)]
pub(crate) async fn publish(
    commons: &Commons,
    path: &Path,
    omit_empty: bool,
) -> anyhow::Result<usize> {
    let rows = from_tsv(&fs::read(path).await?, omit_empty)?;
    for (guid, fields) in &rows {
        let mut metadata = Map::new();
        metadata.insert("_guid_type".to_string(), Value::from(GUID_TYPE));
        metadata.insert(DISCOVERY.to_string(), Value::Object(fields.clone()));
        mds::create(commons, guid, &metadata, true).await?;
        tracing::info!("published {guid}");
    }
    Ok(rows.len())
}

fn from_tsv(data: &[u8], omit_empty: bool) -> anyhow::Result<Vec<(String, Map<String, Value>)>> {
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(data);
    let headers = reader.headers()?.clone();
    anyhow::ensure!(
        headers.iter().any(|header| header == GUID_COLUMN),
        "missing {GUID_COLUMN} column"
    );

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut guid = None;
        let mut fields = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            if header == GUID_COLUMN {
                guid = Some(cell.to_string());
            } else if !(omit_empty && cell.is_empty()) {
                fields.insert(header.to_string(), cell_value(cell));
            }
        }
        match guid.filter(|guid| !guid.is_empty()) {
            Some(guid) => rows.push((guid, fields)),
            None => tracing::warn!("skipping a row without {GUID_COLUMN}"),
        }
    }
    Ok(rows)
}

/// JSON objects and arrays are decoded, every other cell stays a string.
fn cell_value(cell: &str) -> Value {
    match serde_json::from_str(cell) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::from(cell),
    }
}

/// Removes the discovery metadata of `guid`, deleting the whole record when
/// it exists only for the discovery page.
#[tracing::instrument(err)]
pub(crate) async fn delete(commons: &Commons, guid: &str) -> anyhow::Result<()> {
    let mut metadata = mds::get(commons, guid).await?;
    if metadata.get("_guid_type").and_then(Value::as_str) == Some(GUID_TYPE) {
        mds::delete(commons, guid).await?;
        tracing::info!("deleted {guid}");
    } else if metadata.remove(DISCOVERY).is_some() {
        mds::update(commons, guid, &metadata).await?;
        tracing::info!("removed discovery metadata from {guid}");
    } else {
        tracing::info!("{guid} has no discovery metadata");
    }
    Ok(())
}

#[cfg(test)]
mod tests;
