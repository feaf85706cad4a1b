use super::Error;
use crate::commons::{fence, Commons};
use serde::Serialize;
use url::Url;

/// Both halves of a resolution: the page a person can open and whatever the
/// access broker returned for programs.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct PresignedUrl {
    pub(crate) guid: String,
    pub(crate) display_url: Url,
    pub(crate) download: fence::Download,
}

#[tracing::instrument(skip(commons))]
pub(crate) async fn resolve(
    commons: &Commons,
    guid: &str,
    protocol: Option<&str>,
) -> Result<PresignedUrl, Error> {
    let resolve = async {
        let download = fence::presigned_url(commons, guid, protocol).await?;
        let display_url = commons.files_url(guid)?;
        anyhow::Ok((download, display_url))
    };
    let (download, display_url) = resolve.await.map_err(|source| Error::ResolutionFailed {
        guid: guid.to_string(),
        source,
    })?;
    tracing::info!("presigned url for {guid}: {download}");
    tracing::info!("please visit this address in your browser: {display_url}");
    Ok(PresignedUrl {
        guid: guid.to_string(),
        display_url,
        download,
    })
}
