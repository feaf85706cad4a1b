pub(crate) mod fence;
pub(crate) mod index;
pub(crate) mod mds;
pub(crate) mod sheepdog;

use crate::{auth, misc};
use bytes::Bytes;
use clap::Parser;
use headers::HeaderMapExt;
use http::{header, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use url::Url;

#[derive(Clone, Debug, thiserror::Error)]
#[error("[{code:?}] {message}")]
pub(crate) struct Error {
    pub(crate) code: StatusCode,
    pub(crate) message: String,
}

#[derive(Clone, Debug, Parser)]
pub struct Opts {
    /// Base URL of the data commons.
    #[clap(
        long,
        env = "COMMONS_URL",
        default_value = "https://mycommons.azurefd.net"
    )]
    pub(crate) endpoint: Url,
    /// API key file downloaded from the commons profile page.
    #[clap(long, env = "CREDENTIALS_FILE_PATH", default_value = "credentials.json")]
    pub(crate) credentials: PathBuf,
}

pub struct Commons {
    client: misc::Client,
    endpoint: Url,
    auth: auth::Auth,
}

impl fmt::Debug for Commons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commons")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Commons {
    pub async fn new(opts: Opts) -> anyhow::Result<Self> {
        let client = misc::client()?;
        let auth = auth::Auth::from_file(client.clone(), opts.endpoint.clone(), &opts.credentials)
            .await?;
        Ok(Self {
            client,
            endpoint: opts.endpoint,
            auth,
        })
    }

    pub(crate) fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub(crate) fn url<'a, I>(&self, segments: I) -> anyhow::Result<Url>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = self.endpoint.clone();
        misc::path_segments_mut(&mut url)?.extend(segments);
        Ok(url)
    }

    /// Sends an authorized request and returns the raw response once it is
    /// known to be successful.
    pub(crate) async fn send(
        &self,
        builder: http::request::Builder,
        body: misc::Body,
    ) -> anyhow::Result<Bytes> {
        let (status, body) = self.send_unchecked(builder, body).await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(error(status, &body).into())
        }
    }

    pub(crate) async fn send_unchecked(
        &self,
        mut builder: http::request::Builder,
        body: misc::Body,
    ) -> anyhow::Result<(StatusCode, Bytes)> {
        if let Some(headers) = builder.headers_mut() {
            let token = self.auth.token().await?;
            headers.typed_insert(token);
        }
        let request = builder.header(header::ACCEPT, "application/json").body(body)?;
        let response = self.client.request(request).await?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok((parts.status, body))
    }

    /// Unauthenticated GET, used for service status endpoints.
    pub(crate) async fn status(&self, url: &Url) -> anyhow::Result<StatusCode> {
        let request = http::Request::get(url.as_str()).body(misc::empty())?;
        let response = self.client.request(request).await?;
        Ok(response.status())
    }

    pub(crate) async fn json<T>(
        &self,
        builder: http::request::Builder,
        body: misc::Body,
    ) -> anyhow::Result<T>
    where
        T: DeserializeOwned,
    {
        let body = self.send(builder, body).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Browsable page for an indexed object.
    pub(crate) fn files_url(&self, guid: &str) -> anyhow::Result<Url> {
        self.url(["files"].into_iter().chain(guid.split('/')))
    }
}

pub(crate) fn error(code: StatusCode, body: &[u8]) -> Error {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum B {
        Message { message: String },
        Error { error: String },
    }

    let message = match serde_json::from_slice(body) {
        Ok(B::Message { message }) | Ok(B::Error { error: message }) => message,
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    };
    Error { code, message }
}

#[cfg(test)]
impl Commons {
    pub(crate) async fn mock(server: &crate::mock::Server) -> anyhow::Result<Self> {
        let client = misc::client()?;
        let auth = auth::Auth::new(
            client.clone(),
            server.url().clone(),
            secrecy::SecretString::from("api-key"),
        );
        Ok(Self {
            client,
            endpoint: server.url().clone(),
            auth,
        })
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    #[test]
    fn test_error_message() {
        let e = super::error(StatusCode::FORBIDDEN, br#"{"message": "no access"}"#);
        assert_eq!(e.message, "no access");
        let e = super::error(StatusCode::NOT_FOUND, br#"{"error": "no such guid"}"#);
        assert_eq!(e.message, "no such guid");
        let e = super::error(StatusCode::BAD_GATEWAY, b"upstream down");
        assert_eq!(e.message, "upstream down");
        assert_eq!(e.to_string(), "[502] upstream down");
    }
}
