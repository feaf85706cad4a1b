// https://github.com/uc-cdis/metadata-service

use super::Commons;
use crate::misc;
use http::header;
use serde_json::{Map, Value};

#[tracing::instrument(err)]
pub(crate) async fn query(
    commons: &Commons,
    guid_type: &str,
    limit: usize,
) -> anyhow::Result<Map<String, Value>> {
    let mut url = commons.url(["mds", "metadata"])?;
    url.query_pairs_mut()
        .append_pair("data", "True")
        .append_pair("_guid_type", guid_type)
        .append_pair("limit", &limit.to_string());
    commons
        .json(http::Request::get(url.as_str()), misc::empty())
        .await
}

#[tracing::instrument(err)]
pub(crate) async fn get(commons: &Commons, guid: &str) -> anyhow::Result<Map<String, Value>> {
    let url = commons.url(["mds", "metadata"].into_iter().chain(guid.split('/')))?;
    commons
        .json(http::Request::get(url.as_str()), misc::empty())
        .await
}

#[tracing::instrument(err, skip(metadata))]
pub(crate) async fn create(
    commons: &Commons,
    guid: &str,
    metadata: &Map<String, Value>,
    overwrite: bool,
) -> anyhow::Result<()> {
    let mut url = commons.url(["mds", "metadata"].into_iter().chain(guid.split('/')))?;
    if overwrite {
        url.query_pairs_mut().append_pair("overwrite", "True");
    }
    commons
        .send(
            http::Request::post(url.as_str()).header(header::CONTENT_TYPE, "application/json"),
            misc::json(metadata)?,
        )
        .await?;
    Ok(())
}

#[tracing::instrument(err, skip(metadata))]
pub(crate) async fn update(
    commons: &Commons,
    guid: &str,
    metadata: &Map<String, Value>,
) -> anyhow::Result<()> {
    let url = commons.url(["mds", "metadata"].into_iter().chain(guid.split('/')))?;
    commons
        .send(
            http::Request::put(url.as_str()).header(header::CONTENT_TYPE, "application/json"),
            misc::json(metadata)?,
        )
        .await?;
    Ok(())
}

#[tracing::instrument(err)]
pub(crate) async fn delete(commons: &Commons, guid: &str) -> anyhow::Result<()> {
    let url = commons.url(["mds", "metadata"].into_iter().chain(guid.split('/')))?;
    commons
        .send(http::Request::delete(url.as_str()), misc::empty())
        .await?;
    Ok(())
}
