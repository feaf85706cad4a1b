// https://github.com/uc-cdis/sheepdog

use super::Commons;
use crate::misc;
use http::header;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[tracing::instrument(err, ret, skip(node))]
pub(crate) async fn submit<T>(
    commons: &Commons,
    program: &str,
    project: &str,
    node: &T,
) -> anyhow::Result<Response>
where
    T: Debug + Serialize,
{
    tracing::info!("submitting {}", serde_json::to_string_pretty(node)?);
    let url = commons.url(["api", "v0", "submission", program, project])?;
    commons
        .json(
            http::Request::post(url.as_str()).header(header::CONTENT_TYPE, "application/json"),
            misc::json(node)?,
        )
        .await
}

#[tracing::instrument(err, ret)]
pub(crate) async fn delete_entities(
    commons: &Commons,
    program: &str,
    project: &str,
    ids: &[&str],
) -> anyhow::Result<Response> {
    let url = commons.url([
        "api",
        "v0",
        "submission",
        program,
        project,
        "entities",
        &ids.join(","),
    ])?;
    commons
        .json(http::Request::delete(url.as_str()), misc::empty())
        .await
}

#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    #[serde(default)]
    pub(crate) entities: Vec<Entity>,
    #[serde(default)]
    #[allow(dead_code)]
    pub(crate) message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Entity {
    pub(crate) id: Option<String>,
    #[serde(rename = "type", default)]
    #[allow(dead_code)]
    pub(crate) kind: Option<String>,
}

impl Response {
    pub(crate) fn first_id(&self) -> anyhow::Result<&str> {
        self.entities
            .first()
            .and_then(|entity| entity.id.as_deref())
            .ok_or_else(|| anyhow::format_err!("missing entity id"))
    }
}
