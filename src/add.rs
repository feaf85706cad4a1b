use crate::commons::{self, fence, index, Commons};
use crate::onboard::{self, graph, register, resolve, Error, OnboardingRecord, PresignedUrl};
use crate::{blob, hash, misc};
use clap::Parser;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Parser)]
pub struct Args {
    #[clap(flatten)]
    commons: commons::Opts,
    #[clap(flatten)]
    config: onboard::Config,
    /// Local copy of the object, read for its size and MD5.
    file: PathBuf,
    /// Where the object lives in storage; the scheme is replaced by --scheme.
    #[clap(long)]
    url: Url,
    /// Name recorded in the index; the local file name by default.
    #[clap(long)]
    file_name: Option<String>,
    /// Register the object without graph metadata or a presigned URL.
    #[clap(long)]
    index_only: bool,
    /// Delete the record and the stored object again once everything else
    /// succeeded.
    #[clap(long)]
    delete: bool,
}

pub async fn main(args: Args) -> anyhow::Result<()> {
    let commons = Commons::new(args.commons).await?;
    let record = local_record(&args.file, &args.url, args.file_name, &args.config).await?;
    let added = add(&commons, &args.config, record, args.index_only, args.delete).await?;
    match added.presigned_url {
        Some(url) => println!("{}\t{}\t{}", added.guid, url.display_url, url.download),
        None => println!("{}", added.guid),
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct Added {
    pub(crate) guid: String,
    pub(crate) presigned_url: Option<PresignedUrl>,
}

/// Describes the object stored at `url` from its local copy at `path`.
pub(crate) async fn local_record(
    path: &Path,
    url: &Url,
    file_name: Option<String>,
    config: &onboard::Config,
) -> anyhow::Result<OnboardingRecord> {
    let size = tokio::fs::metadata(path).await?.len();
    let md5 = hash::hashes(path, &["md5".to_string()])
        .await?
        .remove("md5")
        .flatten()
        .ok_or_else(|| anyhow::format_err!("no md5 for {}", path.display()))?;
    let filename = match file_name {
        Some(file_name) => file_name,
        None => blob::file_name(path)?,
    };
    Ok(OnboardingRecord {
        guid: None,
        md5,
        size,
        authz: config.authz(),
        acl: config.acl(),
        urls: vec![misc::replace_scheme(url, &config.scheme)],
        filename,
    })
}

/// Registers one object, then annotates and resolves it unless `index_only`
/// is set. With `delete` the record and the stored object are deleted again
/// through the access broker at the end.
#[tracing::instrument(skip(commons, config, record), fields(filename = %record.filename))]
pub(crate) async fn add(
    commons: &Commons,
    config: &onboard::Config,
    mut record: OnboardingRecord,
    index_only: bool,
    delete: bool,
) -> Result<Added, Error> {
    if !index::is_healthy(commons).await {
        return Err(Error::ServiceUnavailable(commons.endpoint().clone()));
    }
    let guid = register::register(commons, &record).await?;
    record.guid = Some(guid.clone());

    let presigned_url = if index_only {
        None
    } else {
        let submission = graph::submit_metadata(commons, config, &record, &guid).await?;
        tracing::debug!(
            "{guid}: core metadata collection {}",
            submission.core_metadata_collection
        );
        Some(resolve::resolve(commons, &guid, Some(config.protocol.as_str())).await?)
    };

    if delete {
        fence::delete_file(commons, &guid)
            .await
            .map_err(|source| Error::DeletionFailed {
                guid: guid.clone(),
                source,
            })?;
        tracing::info!("deleted {guid}");
    }
    Ok(Added {
        guid,
        presigned_url,
    })
}

#[cfg(test)]
mod tests {
    use crate::commons::{self, Commons};
    use crate::mock;
    use crate::onboard::{Config, Error};
    use http::{Method, StatusCode};
    use serde_json::json;
    use std::io::Write;
    use url::Url;

    const SUBMISSION: &str = "/api/v0/submission/Program1/project1";

    async fn commons_services(healthy: bool) -> anyhow::Result<mock::Server> {
        mock::serve(move |request| {
            if let Some(response) = mock::access_token(request) {
                return response;
            }
            match (&request.method, request.path.as_str()) {
                (&Method::GET, "/index/_status") if healthy => {
                    Ok(mock::text(StatusCode::OK, "Healthy"))
                }
                (&Method::GET, "/index/_status") => {
                    Ok(mock::text(StatusCode::SERVICE_UNAVAILABLE, "down"))
                }
                (&Method::POST, "/index/index/") => {
                    let body: serde_json::Value = serde_json::from_slice(&request.body)?;
                    anyhow::ensure!(body["hashes"]["md5"] == "5d41402abc4b2a76b9719d911017c592");
                    anyhow::ensure!(body["size"] == 5);
                    anyhow::ensure!(body["file_name"] == "a.svs");
                    anyhow::ensure!(
                        body["urls"] == json!(["az://acct.blob.core.windows.net/c/dir/a.svs"])
                    );
                    mock::json(StatusCode::OK, &json!({"did": "dg.1234/a", "rev": "r1"}))
                }
                (&Method::POST, SUBMISSION) => {
                    mock::json(StatusCode::OK, &json!({"entities": [{"id": "node-1"}]}))
                }
                (&Method::GET, "/user/data/download/dg.1234/a") => mock::json(
                    StatusCode::OK,
                    &json!({"url": "https://acct.blob.core.windows.net/c/dir/a.svs?sig=x"}),
                ),
                (&Method::DELETE, "/user/data/dg.1234/a") => {
                    Ok(mock::text(StatusCode::NO_CONTENT, ""))
                }
                _ => Ok(mock::not_found()),
            }
        })
        .await
    }

    async fn record(config: &Config) -> anyhow::Result<crate::onboard::OnboardingRecord> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"hello")?;
        let url = Url::parse("https://acct.blob.core.windows.net/c/dir/a.svs")?;
        super::local_record(file.path(), &url, Some("a.svs".to_string()), config).await
    }

    #[tokio::test]
    async fn test_local_record() -> anyhow::Result<()> {
        let config = Config::default();
        let record = record(&config).await?;
        anyhow::ensure!(record.md5 == "5d41402abc4b2a76b9719d911017c592");
        anyhow::ensure!(record.size == 5);
        anyhow::ensure!(record.filename == "a.svs");
        anyhow::ensure!(record.urls == ["az://acct.blob.core.windows.net/c/dir/a.svs"]);
        anyhow::ensure!(record.authz == ["/programs"] && record.acl == ["*"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_add() -> anyhow::Result<()> {
        let server = commons_services(true).await?;
        let commons = Commons::mock(&server).await?;
        let config = Config::default();

        let added = super::add(&commons, &config, record(&config).await?, false, false).await?;
        anyhow::ensure!(added.guid == "dg.1234/a");
        let url = added
            .presigned_url
            .ok_or_else(|| anyhow::format_err!("not resolved"))?;
        anyhow::ensure!(url.display_url == server.url().join("files/dg.1234/a")?);
        anyhow::ensure!(server.requests(Method::POST, SUBMISSION) == 2);
        anyhow::ensure!(server.requests(Method::DELETE, "/user/data/dg.1234/a") == 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_index_only_and_delete() -> anyhow::Result<()> {
        let server = commons_services(true).await?;
        let commons = Commons::mock(&server).await?;
        let config = Config::default();

        let added = super::add(&commons, &config, record(&config).await?, true, true).await?;
        anyhow::ensure!(added.guid == "dg.1234/a" && added.presigned_url.is_none());
        anyhow::ensure!(server.requests(Method::POST, SUBMISSION) == 0);
        anyhow::ensure!(server.requests(Method::DELETE, "/user/data/dg.1234/a") == 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_unhealthy() -> anyhow::Result<()> {
        let server = commons_services(false).await?;
        let commons = Commons::mock(&server).await?;
        let config = Config::default();

        match super::add(&commons, &config, record(&config).await?, false, false).await {
            Err(Error::ServiceUnavailable(url)) => anyhow::ensure!(&url == server.url()),
            other => anyhow::bail!("unexpected {other:?}"),
        }
        anyhow::ensure!(server.requests(Method::POST, "/index/index/") == 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_delete_rejected() -> anyhow::Result<()> {
        let server = mock::serve(|request| {
            if let Some(response) = mock::access_token(request) {
                return response;
            }
            match (&request.method, request.path.as_str()) {
                (&Method::GET, "/index/_status") => Ok(mock::text(StatusCode::OK, "Healthy")),
                (&Method::POST, "/index/index/") => {
                    mock::json(StatusCode::OK, &json!({"did": "dg.1234/a", "rev": "r1"}))
                }
                _ => mock::json(StatusCode::FORBIDDEN, &json!({"error": "forbidden"})),
            }
        })
        .await?;
        let commons = Commons::mock(&server).await?;
        let config = Config::default();

        match super::add(&commons, &config, record(&config).await?, true, true).await {
            Err(Error::DeletionFailed { guid, source }) => {
                anyhow::ensure!(guid == "dg.1234/a");
                anyhow::ensure!(
                    source.downcast_ref::<commons::Error>().map(|e| e.code)
                        == Some(StatusCode::FORBIDDEN)
                );
            }
            other => anyhow::bail!("unexpected {other:?}"),
        }
        Ok(())
    }
}
