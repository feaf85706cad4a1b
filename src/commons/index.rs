// https://github.com/uc-cdis/indexd

use super::Commons;
use crate::misc;
use http::{header, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `false` on any transport error as well as on a non-2xx status.
#[tracing::instrument(ret)]
pub(crate) async fn is_healthy(commons: &Commons) -> bool {
    match status(commons).await {
        Ok(status) => status.is_success(),
        Err(e) => {
            tracing::debug!("{e:#}");
            false
        }
    }
}

async fn status(commons: &Commons) -> anyhow::Result<StatusCode> {
    commons.status(&commons.url(["index", "_status"])?).await
}

#[tracing::instrument(err, ret)]
pub(crate) async fn create(commons: &Commons, request: &Request<'_>) -> anyhow::Result<Response> {
    // trailing slash: indexd redirects `/index/index` to `/index/index/`
    let url = commons.url(["index", "index", ""])?;
    commons
        .json(
            http::Request::post(url.as_str()).header(header::CONTENT_TYPE, "application/json"),
            misc::json(request)?,
        )
        .await
}

#[tracing::instrument(err, ret)]
pub(crate) async fn get(commons: &Commons, guid: &str) -> anyhow::Result<Record> {
    let url = commons.url(["index", "index"].into_iter().chain(guid.split('/')))?;
    commons
        .json(http::Request::get(url.as_str()), misc::empty())
        .await
}

#[tracing::instrument(err)]
pub(crate) async fn delete(commons: &Commons, guid: &str, rev: &str) -> anyhow::Result<()> {
    let mut url = commons.url(["index", "index"].into_iter().chain(guid.split('/')))?;
    url.query_pairs_mut().append_pair("rev", rev);
    commons
        .send(http::Request::delete(url.as_str()), misc::empty())
        .await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub(crate) form: Form,
    pub(crate) hashes: BTreeMap<&'a str, &'a str>,
    pub(crate) size: u64,
    pub(crate) file_name: &'a str,
    pub(crate) urls: &'a [String],
    pub(crate) acl: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) authz: Option<&'a [String]>,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Form {
    Object,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Response {
    pub(crate) did: String,
    #[allow(dead_code)]
    pub(crate) rev: Option<String>,
    #[allow(dead_code)]
    pub(crate) baseid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Record {
    pub(crate) did: String,
    pub(crate) rev: String,
    #[serde(default)]
    pub(crate) file_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{Form, Request};
    use crate::{commons, mock};
    use http::{Method, StatusCode};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_is_healthy() -> anyhow::Result<()> {
        let server = mock::serve(|request| match request.path.as_str() {
            "/index/_status" => Ok(mock::text(StatusCode::OK, "Healthy")),
            _ => Ok(mock::not_found()),
        })
        .await?;
        let commons = commons::Commons::mock(&server).await?;
        anyhow::ensure!(super::is_healthy(&commons).await);
        // the status endpoint does not need a token
        anyhow::ensure!(server.requests(Method::POST, "/user/credentials/cdis/access_token") == 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_is_unhealthy() -> anyhow::Result<()> {
        let server =
            mock::serve(|_| Ok(mock::text(StatusCode::SERVICE_UNAVAILABLE, "down"))).await?;
        let commons = commons::Commons::mock(&server).await?;
        anyhow::ensure!(!super::is_healthy(&commons).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_create() -> anyhow::Result<()> {
        let server = mock::serve(|request| {
            if let Some(response) = mock::access_token(request) {
                return response;
            }
            anyhow::ensure!(request.method == Method::POST && request.path == "/index/index/");
            let body: serde_json::Value = serde_json::from_slice(&request.body)?;
            anyhow::ensure!(
                body == serde_json::json!({
                    "form": "object",
                    "hashes": {"md5": "0123456789abcdef0123456789abcdef"},
                    "size": 42,
                    "file_name": "file.txt",
                    "urls": ["az://acct/container/file.txt"],
                    "acl": ["*"],
                }),
                "{body}"
            );
            mock::json(
                StatusCode::OK,
                &serde_json::json!({"did": "dg.1234/abc", "rev": "r1", "baseid": "b1"}),
            )
        })
        .await?;
        let commons = commons::Commons::mock(&server).await?;

        let urls = ["az://acct/container/file.txt".to_string()];
        let acl = ["*".to_string()];
        let response = super::create(
            &commons,
            &Request {
                form: Form::Object,
                hashes: BTreeMap::from([("md5", "0123456789abcdef0123456789abcdef")]),
                size: 42,
                file_name: "file.txt",
                urls: &urls,
                acl: &acl,
                authz: None,
            },
        )
        .await?;
        anyhow::ensure!(response.did == "dg.1234/abc");

        let create = server
            .recorded()
            .into_iter()
            .find(|request| request.path == "/index/index/")
            .ok_or_else(|| anyhow::format_err!("missing request"))?;
        anyhow::ensure!(create
            .authorization
            .as_deref()
            .is_some_and(|value| value.starts_with("Bearer ")));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete() -> anyhow::Result<()> {
        let server = mock::serve(|request| {
            if let Some(response) = mock::access_token(request) {
                return response;
            }
            match (&request.method, request.path.as_str()) {
                (&Method::GET, "/index/index/dg.1234/abc") => mock::json(
                    StatusCode::OK,
                    &serde_json::json!({"did": "dg.1234/abc", "rev": "r1", "file_name": "a"}),
                ),
                (&Method::DELETE, "/index/index/dg.1234/abc") => {
                    anyhow::ensure!(request.query_param("rev").as_deref() == Some("r1"));
                    Ok(mock::text(StatusCode::OK, ""))
                }
                _ => Ok(mock::not_found()),
            }
        })
        .await?;
        let commons = commons::Commons::mock(&server).await?;

        let record = super::get(&commons, "dg.1234/abc").await?;
        anyhow::ensure!(record.did == "dg.1234/abc");
        super::delete(&commons, &record.did, &record.rev).await?;
        anyhow::ensure!(server.requests(Method::DELETE, "/index/index/dg.1234/abc") == 1);
        Ok(())
    }
}
