pub(crate) mod graph;
mod record;
pub(crate) mod register;
pub(crate) mod resolve;

pub(crate) use record::OnboardingRecord;
pub(crate) use resolve::PresignedUrl;

use crate::commons::{index, Commons};
use crate::{azure, commons, jsonl, logs};
use chrono::Utc;
use clap::Parser;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::error;
use std::fmt::{self, Display};
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use url::Url;

#[derive(Debug, Parser)]
pub struct Args {
    #[clap(flatten)]
    commons: commons::Opts,
    #[clap(flatten)]
    storage: azure::Opts,
    #[clap(flatten)]
    config: Config,
    /// Append the outcome of every stage to this file as JSON lines.
    #[clap(long)]
    report: Option<PathBuf>,
}

/// Everything a run needs to know besides where the services live.
#[derive(Clone, Debug, Parser)]
pub struct Config {
    #[clap(long, env = "PROGRAM_NAME", default_value = "Program1")]
    pub(crate) program: String,
    #[clap(long, env = "PROJECT_NAME", default_value = "project1")]
    pub(crate) project: String,
    #[clap(long, env = "PROJECT_CODE", default_value = "P1")]
    pub(crate) project_code: String,
    /// Comma separated authorization scopes; empty for none.
    #[clap(long, env = "COMMONS_AUTHZ", default_value = "/programs")]
    pub(crate) authz: String,
    /// Comma separated access control list.
    #[clap(long, env = "COMMONS_ACL", default_value = "*")]
    pub(crate) acl: String,
    /// Only onboard blobs whose name starts with this prefix.
    #[clap(long, env = "STARTS_WITH_FILTER")]
    pub(crate) starts_with: Option<String>,
    /// Scheme of the URLs stored in the index.
    #[clap(long, default_value = "az")]
    pub(crate) scheme: String,
    /// Protocol requested from the access broker.
    #[clap(long, default_value = "az")]
    pub(crate) protocol: String,
    #[clap(long, default_value = "slide_image")]
    pub(crate) data_node_type: String,
    #[clap(long, default_value = "Slide Image")]
    pub(crate) data_category: String,
    #[clap(long, default_value = "image")]
    pub(crate) data_type: String,
}

impl Config {
    pub(crate) fn authz(&self) -> Vec<String> {
        list(&self.authz)
    }

    pub(crate) fn acl(&self) -> Vec<String> {
        list(&self.acl)
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            program: "Program1".to_string(),
            project: "project1".to_string(),
            project_code: "P1".to_string(),
            authz: "/programs".to_string(),
            acl: "*".to_string(),
            starts_with: None,
            scheme: "az".to_string(),
            protocol: "az".to_string(),
            data_node_type: "slide_image".to_string(),
            data_category: "Slide Image".to_string(),
            data_type: "image".to_string(),
        }
    }
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("blob storage is unavailable")]
    StorageUnavailable(#[source] anyhow::Error),
    #[error("index service at {0} is unavailable")]
    ServiceUnavailable(Url),
    #[error("failed to register {filename}")]
    RegistrationFailed {
        filename: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to submit graph metadata for {guid}")]
    SubmissionFailed {
        guid: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to resolve a presigned url for {guid}")]
    ResolutionFailed {
        guid: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to delete {guid}")]
    DeletionFailed {
        guid: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to write the report")]
    Report(#[source] anyhow::Error),
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Listing,
    Registering,
    Annotating,
    Resolving,
    Done,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Listing => "listing",
            Self::Registering => "registering",
            Self::Annotating => "annotating",
            Self::Resolving => "resolving",
            Self::Done => "done",
        })
    }
}

pub async fn main(args: Args) -> anyhow::Result<()> {
    let commons = Commons::new(args.commons).await?;
    let container = azure::Container::new(args.storage)?;
    let report = if let Some(path) = &args.report {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Some(jsonl::Writer::new(file))
    } else {
        None
    };

    let mut pipeline = Pipeline::new(&args.config, &commons, &container, report);
    for url in pipeline.run().await? {
        println!("{}\t{}", url.display_url, url.download);
    }
    Ok(())
}

pub(crate) struct Pipeline<'a> {
    config: &'a Config,
    commons: &'a Commons,
    container: &'a azure::Container,
    report: Option<jsonl::Writer<File>>,
}

impl<'a> Pipeline<'a> {
    pub(crate) fn new(
        config: &'a Config,
        commons: &'a Commons,
        container: &'a azure::Container,
        report: Option<jsonl::Writer<File>>,
    ) -> Self {
        Self {
            config,
            commons,
            container,
            report,
        }
    }

    /// Lists, registers, annotates and resolves every blob, one stage at a
    /// time over the whole batch.
    pub(crate) async fn run(&mut self) -> Result<Vec<PresignedUrl>, Error> {
        let mut records = self.listing().await?;
        self.registering(&mut records).await?;
        let annotated = self.annotating(&records).await?;
        let urls = self.resolving(&annotated).await?;

        let size = annotated.iter().map(|record| record.size).sum::<u64>();
        tracing::info!(
            stage = %Stage::Done,
            "onboarded {} of {} objects ({})",
            urls.len(),
            records.len(),
            humansize::format_size(size, humansize::BINARY),
        );
        Ok(urls)
    }

    async fn listing(&mut self) -> Result<Vec<OnboardingRecord>, Error> {
        tracing::info!(stage = %Stage::Listing, "listing {}", self.container.url());
        let authz = self.config.authz();
        let acl = self.config.acl();
        let records = self
            .container
            .list(self.config.starts_with.as_deref())
            .map_ok(|blob| record::normalize(&blob, &self.config.scheme, &authz, &acl))
            .try_collect::<Vec<_>>()
            .await
            .map_err(Error::StorageUnavailable)?;
        for record in &records {
            self.report(Stage::Listing, record, None).await?;
        }
        tracing::info!("found {} objects", records.len());
        Ok(records)
    }

    async fn registering(&mut self, records: &mut [OnboardingRecord]) -> Result<(), Error> {
        tracing::info!(stage = %Stage::Registering, "registering {} objects", records.len());
        if !index::is_healthy(self.commons).await {
            return Err(Error::ServiceUnavailable(self.commons.endpoint().clone()));
        }
        for record in records.iter_mut() {
            match register::register(self.commons, record).await {
                Ok(guid) => {
                    record.guid = Some(guid);
                    self.report(Stage::Registering, record, None).await?;
                }
                Err(e) => {
                    log(&e);
                    self.report(Stage::Registering, record, Some(&e)).await?;
                }
            }
        }
        Ok(())
    }

    async fn annotating<'r>(
        &mut self,
        records: &'r [OnboardingRecord],
    ) -> Result<Vec<&'r OnboardingRecord>, Error> {
        tracing::info!(stage = %Stage::Annotating, "submitting graph metadata");
        let mut annotated = Vec::new();
        for record in records {
            let Some(guid) = &record.guid else {
                tracing::debug!("skipping unregistered {}", record.filename);
                continue;
            };
            match graph::submit_metadata(self.commons, self.config, record, guid).await {
                Ok(submission) => {
                    tracing::debug!(
                        "{guid}: core metadata collection {}, data node {:?}",
                        submission.core_metadata_collection,
                        submission.data_node,
                    );
                    self.report(Stage::Annotating, record, None).await?;
                    annotated.push(record);
                }
                Err(e) => {
                    log(&e);
                    self.report(Stage::Annotating, record, Some(&e)).await?;
                }
            }
        }
        Ok(annotated)
    }

    async fn resolving(
        &mut self,
        records: &[&OnboardingRecord],
    ) -> Result<Vec<PresignedUrl>, Error> {
        tracing::info!(stage = %Stage::Resolving, "resolving {} presigned urls", records.len());
        let mut urls = Vec::with_capacity(records.len());
        for &record in records {
            let Some(guid) = &record.guid else {
                continue;
            };
            match resolve::resolve(self.commons, guid, Some(self.config.protocol.as_str())).await {
                Ok(url) => {
                    self.report(Stage::Resolving, record, None).await?;
                    urls.push(url);
                }
                Err(e) => {
                    log(&e);
                    self.report(Stage::Resolving, record, Some(&e)).await?;
                    return Err(e);
                }
            }
        }
        for url in &urls {
            tracing::info!(stage = %Stage::Done, guid = %url.guid, "{}", url.display_url);
        }
        Ok(urls)
    }

    async fn report(
        &mut self,
        stage: Stage,
        record: &OnboardingRecord,
        error: Option<&Error>,
    ) -> Result<(), Error> {
        let Some(report) = &mut self.report else {
            return Ok(());
        };
        report
            .write(&logs::Line {
                stage,
                name: Cow::Borrowed(&record.filename),
                guid: record.guid.as_deref().map(Cow::Borrowed),
                size: record.size,
                error: error.map(describe),
                time: Utc::now(),
            })
            .await
            .map_err(Error::Report)
    }
}

fn describe(e: &Error) -> String {
    anyhow::Chain::new(e as &(dyn error::Error + 'static))
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

fn log(e: &Error) {
    tracing::error!("{}", describe(e));
}
