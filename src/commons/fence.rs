// https://github.com/uc-cdis/fence

use super::Commons;
use crate::misc;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// What the presigned-URL endpoint handed back.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Download {
    Signed(Url),
    Raw(String),
}

impl fmt::Display for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signed(url) => write!(f, "{url}"),
            Self::Raw(raw) => write!(f, "{raw}"),
        }
    }
}

#[tracing::instrument(err)]
pub(crate) async fn presigned_url(
    commons: &Commons,
    guid: &str,
    protocol: Option<&str>,
) -> anyhow::Result<Download> {
    let mut url = commons.url(
        ["user", "data", "download"]
            .into_iter()
            .chain(guid.split('/')),
    )?;
    if let Some(protocol) = protocol {
        url.query_pairs_mut().append_pair("protocol", protocol);
    }
    let body = commons
        .send(http::Request::get(url.as_str()), misc::empty())
        .await?;
    Ok(parse(&body))
}

/// Deletes the index record of `guid` together with the object in storage.
#[tracing::instrument(err)]
pub(crate) async fn delete_file(commons: &Commons, guid: &str) -> anyhow::Result<()> {
    let url = commons.url(["user", "data"].into_iter().chain(guid.split('/')))?;
    commons
        .send(http::Request::delete(url.as_str()), misc::empty())
        .await?;
    Ok(())
}

fn parse(body: &[u8]) -> Download {
    #[derive(Deserialize)]
    struct B {
        url: Url,
    }

    match serde_json::from_slice(body) {
        Ok(B { url }) => Download::Signed(url),
        Err(_) => Download::Raw(String::from_utf8_lossy(body).into_owned()),
    }
}
