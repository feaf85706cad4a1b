//! Merges indexing manifests on their MD5 column.

use clap::Parser;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;

const GUID: &str = "guid";
const SIZE: &str = "size";
const MD5: &str = "md5";
const ACL: &str = "acl";
const AUTHZ: &str = "authz";
const URLS: &str = "urls";

/// Columns written first, in this order.
const STANDARD_COLUMNS: [&str; 6] = [GUID, SIZE, MD5, ACL, AUTHZ, URLS];

/// Other spellings accepted in input headers.
const ALIASES: [(&str, &str); 8] = [
    ("did", GUID),
    ("object_id", GUID),
    ("file_size", SIZE),
    ("md5sum", MD5),
    ("md5_hash", MD5),
    ("url", URLS),
    ("file_url", URLS),
    ("acls", ACL),
];

#[derive(Debug, Parser)]
pub struct Args {
    /// Manifests to merge; every file in --directory when none is given.
    files: Vec<PathBuf>,
    #[clap(long, default_value = ".")]
    directory: PathBuf,
    #[clap(long, default_value = "merged-bucket-manifest.tsv")]
    output: PathBuf,
    /// Output delimiter; a tab for .tsv outputs and a comma otherwise.
    #[clap(long)]
    delimiter: Option<char>,
    #[clap(flatten)]
    options: Options,
}

#[derive(Clone, Debug, Default, Parser)]
pub(crate) struct Options {
    /// Log conflicting rows and keep going instead of failing.
    #[clap(long)]
    pub(crate) continue_after_error: bool,
    /// Keep rows with the same MD5 but different GUIDs apart.
    #[clap(long)]
    pub(crate) allow_mult_guids_per_hash: bool,
    /// Extra space separated list columns, merged like urls, acl and authz.
    #[clap(long = "column-with-arrays")]
    pub(crate) columns_with_arrays: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("{md5}: size {existing} differs from size {new}")]
    SizeMismatch {
        md5: String,
        existing: String,
        new: String,
    },
    #[error("{md5}: guid {existing} differs from guid {new}")]
    GuidConflict {
        md5: String,
        existing: String,
        new: String,
    },
    #[error("{md5}: column {column} has both {existing:?} and {new:?}")]
    ColumnConflict {
        md5: String,
        column: String,
        existing: String,
        new: String,
    },
}

/// One manifest row keyed by column name.
pub(crate) type Row = BTreeMap<String, String>;

pub async fn main(args: Args) -> anyhow::Result<()> {
    let files = if args.files.is_empty() {
        manifests_in(&args.directory, &args.output).await?
    } else {
        args.files
    };
    let delimiter = match args.delimiter {
        Some(delimiter) => u8::try_from(delimiter)?,
        None => delimiter_for(&args.output),
    };
    let rows = merge_manifests(&files, &args.output, delimiter, &args.options).await?;
    tracing::info!("wrote {rows} rows to {}", args.output.display());
    Ok(())
}

async fn manifests_in(directory: &Path, output: &Path) -> anyhow::Result<Vec<PathBuf>> {
    tracing::info!("merging every manifest in {}", directory.display());
    let mut files = Vec::new();
    let mut entries = fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && path.file_name() != output.file_name() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some(extension) if extension.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

/// Merges `files` into `output` and returns the number of rows written.
#[tracing::instrument(err, ret, skip(options))]
pub(crate) async fn merge_manifests(
    files: &[PathBuf],
    output: &Path,
    delimiter: u8,
    options: &Options,
) -> anyhow::Result<usize> {
    let mut merger = Merger::new(options);
    for file in files {
        let rows = read_manifest(&fs::read(file).await?, delimiter_for(file))?;
        tracing::info!("merging {} rows from {}", rows.len(), file.display());
        for row in rows {
            merger.add(row)?;
        }
    }
    let (data, count) = merger.finish(delimiter)?;
    fs::write(output, data).await?;
    Ok(count)
}

/// Rows of one manifest with their headers mapped to the standard names.
/// Rows without an MD5 are skipped.
pub(crate) fn read_manifest(data: &[u8], delimiter: u8) -> anyhow::Result<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_reader(data);
    let headers = reader
        .headers()?
        .iter()
        .map(standard_column)
        .collect::<Vec<_>>();
    anyhow::ensure!(
        headers.iter().any(|header| header == MD5),
        "missing {MD5} column"
    );

    let mut rows = Vec::new();
    for record in reader.records() {
        let row = headers
            .iter()
            .cloned()
            .zip(record?.iter().map(|cell| cell.trim().to_string()))
            .collect::<Row>();
        if row.get(MD5).is_some_and(|md5| !md5.is_empty()) {
            rows.push(row);
        } else {
            tracing::warn!("skipping a row without {MD5}: {row:?}");
        }
    }
    Ok(rows)
}

fn standard_column(header: &str) -> String {
    let header = header.trim();
    let lowercase = header.to_ascii_lowercase();
    if STANDARD_COLUMNS.contains(&lowercase.as_str()) {
        return lowercase;
    }
    match ALIASES.iter().find(|(alias, _)| *alias == lowercase) {
        Some((_, column)) => column.to_string(),
        None => header.to_string(),
    }
}

/// Rows grouped by MD5 in the order the hashes were first seen.
pub(crate) struct Merger<'a> {
    options: &'a Options,
    array_columns: BTreeSet<&'a str>,
    groups: Vec<Vec<Row>>,
    by_md5: HashMap<String, usize>,
    columns: BTreeSet<String>,
}

impl<'a> Merger<'a> {
    pub(crate) fn new(options: &'a Options) -> Self {
        let array_columns = [URLS, ACL, AUTHZ]
            .into_iter()
            .chain(options.columns_with_arrays.iter().map(String::as_str))
            .collect();
        Self {
            options,
            array_columns,
            groups: Vec::new(),
            by_md5: HashMap::new(),
            columns: BTreeSet::new(),
        }
    }

    pub(crate) fn add(&mut self, row: Row) -> Result<(), Error> {
        let md5 = row.get(MD5).cloned().unwrap_or_default();
        self.columns.extend(row.keys().cloned());
        let Some(&index) = self.by_md5.get(&md5) else {
            self.by_md5.insert(md5, self.groups.len());
            self.groups.push(vec![row]);
            return Ok(());
        };

        let existing = self.groups[index].clone();
        self.groups[index] = self.merge_group(&md5, existing, row)?;
        Ok(())
    }

    /// Folds `row` into the rows already sharing its MD5.
    fn merge_group(&self, md5: &str, existing: Vec<Row>, row: Row) -> Result<Vec<Row>, Error> {
        let new_guid = non_empty(&row, GUID);
        let mut merged = Group::default();
        let mut row_to_write = row.clone();
        for existing in existing {
            if let (Some(size), Some(new_size)) = (existing.get(SIZE), row.get(SIZE)) {
                if size != new_size {
                    self.tolerate(Error::SizeMismatch {
                        md5: md5.to_string(),
                        existing: size.clone(),
                        new: new_size.clone(),
                    })?;
                    merged.upsert(existing);
                    continue;
                }
            }

            let guid = non_empty(&existing, GUID);
            match (guid, new_guid) {
                (Some(guid), Some(new_guid)) if guid != new_guid => {
                    if !self.options.allow_mult_guids_per_hash {
                        return Err(Error::GuidConflict {
                            md5: md5.to_string(),
                            existing: guid.to_string(),
                            new: new_guid.to_string(),
                        });
                    }
                    tracing::info!("allowing {new_guid} with the same hash as {guid}");
                }
                _ => {}
            }

            if existing.get(GUID) == row.get(GUID) {
                row_to_write = self.merge_row(md5, &row, existing)?;
                merged.upsert(row_to_write.clone());
            } else {
                merged.upsert(row_to_write.clone());
                merged.upsert(existing);
            }
        }
        Ok(merged.rows)
    }

    /// Copies the non-key columns of `new` into `existing`.
    fn merge_row(&self, md5: &str, new: &Row, mut existing: Row) -> Result<Row, Error> {
        for (column, value) in new {
            if [GUID, SIZE, MD5].contains(&column.as_str()) {
                continue;
            }
            if self.array_columns.contains(column.as_str()) {
                let old = existing.get(column).map_or("", String::as_str);
                let items = value
                    .split_whitespace()
                    .chain(old.split_whitespace())
                    .collect::<BTreeSet<_>>();
                let joined = items.into_iter().collect::<Vec<_>>().join(" ");
                existing.insert(column.clone(), joined);
                continue;
            }
            let old = existing.get(column).cloned().unwrap_or_default();
            if old.is_empty() || old == *value {
                existing.insert(column.clone(), value.clone());
            } else if !value.is_empty() {
                self.tolerate(Error::ColumnConflict {
                    md5: md5.to_string(),
                    column: column.clone(),
                    existing: old,
                    new: value.clone(),
                })?;
            }
        }
        Ok(existing)
    }

    /// Logs `e` and carries on when errors are tolerated, fails otherwise.
    fn tolerate(&self, e: Error) -> Result<(), Error> {
        if self.options.continue_after_error {
            tracing::error!("{e}; keeping the existing value");
            Ok(())
        } else {
            Err(e)
        }
    }

    /// Serializes every row and returns the bytes with the row count.
    pub(crate) fn finish(self, delimiter: u8) -> anyhow::Result<(Vec<u8>, usize)> {
        let columns = STANDARD_COLUMNS
            .into_iter()
            .map(ToString::to_string)
            .chain(
                self.columns
                    .into_iter()
                    .filter(|column| !STANDARD_COLUMNS.contains(&column.as_str())),
            )
            .collect::<Vec<_>>();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(Vec::new());
        writer.write_record(&columns)?;
        let mut count = 0;
        for row in self.groups.iter().flatten() {
            writer.write_record(
                columns
                    .iter()
                    .map(|column| row.get(column).map_or("", String::as_str)),
            )?;
            count += 1;
        }
        let data = writer.into_inner().map_err(|e| e.into_error())?;
        Ok((data, count))
    }
}

/// Rows of one MD5 keyed by GUID, later rows updating earlier ones.
#[derive(Default)]
struct Group {
    rows: Vec<Row>,
}

impl Group {
    fn upsert(&mut self, row: Row) {
        let guid = row.get(GUID).cloned().unwrap_or_default();
        let existing = self
            .rows
            .iter_mut()
            .find(|existing| existing.get(GUID).cloned().unwrap_or_default() == guid);
        match existing {
            Some(existing) => existing.extend(row),
            None => self.rows.push(row),
        }
    }
}

fn non_empty<'r>(row: &'r Row, column: &str) -> Option<&'r str> {
    row.get(column)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}
