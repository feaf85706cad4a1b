// https://learn.microsoft.com/en-us/rest/api/storageservices/list-blobs

mod shared_key;

use crate::{commons, misc};
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use clap::Parser;
use futures::{Stream, TryStreamExt};
use http::{header, Method, Request};
use http_body_util::BodyExt;
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use url::Url;

const VERSION: &str = "2021-08-06";

#[derive(Clone, Parser)]
pub struct Opts {
    #[clap(
        long,
        env = "AZURE_BLOB_STORAGE_CONNECTION_STRING",
        hide_env_values = true
    )]
    connection_string: Option<String>,
    #[clap(long, env = "AZURE_BLOB_STORAGE_CONTAINER_NAME")]
    container: String,
    /// e.g. https://storageaccount.blob.core.windows.net/
    #[clap(long, env = "AZURE_STORAGE_ACCOUNT_URL")]
    account_url: Option<Url>,
    /// SAS token, used together with --account-url
    #[clap(long, env = "AZURE_STORAGE_CREDENTIAL", hide_env_values = true)]
    credential: Option<String>,
}

impl fmt::Debug for Opts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opts")
            .field("container", &self.container)
            .field("account_url", &self.account_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl Opts {
    pub(crate) fn sas(account_url: Url, container: &str) -> Self {
        Self {
            connection_string: None,
            container: container.to_string(),
            account_url: Some(account_url),
            credential: Some("?sv=2021-08-06&sig=abc".to_string()),
        }
    }
}

/// One object found in the container.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BlobRecord {
    pub(crate) name: String,
    pub(crate) size: u64,
    /// lowercase hex MD5
    pub(crate) content_hash: String,
    pub(crate) storage_url: Url,
}

pub struct Container {
    client: misc::Client,
    url: Url,
    credential: Credential,
}

enum Credential {
    Sas(SecretString),
    SharedKey {
        account: String,
        key: SecretSlice<u8>,
    },
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobStorage")
            .field("url", &self.url)
            .finish()
    }
}

impl Container {
    pub fn new(opts: Opts) -> anyhow::Result<Self> {
        let (endpoint, credential) = match (opts.account_url, opts.credential) {
            (Some(account_url), Some(credential)) => {
                tracing::info!("using account url {account_url} with a SAS credential");
                (
                    account_url,
                    Credential::Sas(SecretString::from(
                        credential.trim_start_matches('?').to_string(),
                    )),
                )
            }
            _ => {
                let connection_string = opts.connection_string.ok_or_else(|| {
                    anyhow::format_err!(
                        "either --account-url and --credential or --connection-string is required"
                    )
                })?;
                parse_connection_string(&connection_string)?
            }
        };

        let mut url = endpoint;
        misc::path_segments_mut(&mut url)?.push(&opts.container);
        Ok(Self {
            client: misc::client()?,
            url,
            credential,
        })
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn blob_url(&self, name: &str) -> anyhow::Result<Url> {
        let mut url = self.url.clone();
        misc::path_segments_mut(&mut url)?.extend(name.split('/'));
        Ok(url)
    }

    /// Enumerates the container in the order the service returns, following
    /// `NextMarker` until the listing is exhausted. Every call starts over.
    pub(crate) fn list<'a>(
        &'a self,
        prefix: Option<&'a str>,
    ) -> impl Stream<Item = anyhow::Result<BlobRecord>> + 'a {
        futures::stream::try_unfold(Some(None), move |marker: Option<Option<String>>| async move {
            let Some(marker) = marker else {
                return Ok(None);
            };
            let page = self.list_page(prefix, marker.as_deref()).await?;
            let next = page
                .next_marker
                .filter(|marker| !marker.is_empty())
                .map(Some);
            let records = page
                .blobs
                .blob
                .into_iter()
                .filter_map(|blob| self.record(blob).transpose())
                .collect::<Vec<_>>();
            Ok::<_, anyhow::Error>(Some((futures::stream::iter(records), next)))
        })
        .try_flatten()
    }

    #[tracing::instrument(err, skip(self), fields(url = %self.url))]
    async fn list_page(
        &self,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> anyhow::Result<EnumerationResults> {
        let mut params = vec![("restype", "container"), ("comp", "list")];
        if let Some(prefix) = prefix {
            params.push(("prefix", prefix));
        }
        if let Some(marker) = marker {
            params.push(("marker", marker));
        }
        let request = self.request(Method::GET, None, &params, &[], misc::empty())?;
        let body = self.send(request).await?;
        let body = String::from_utf8(body.to_vec())?;
        Ok(quick_xml::de::from_str(body.trim_start_matches('\u{feff}'))?)
    }

    /// Creates or replaces the block blob `name` with `data`.
    // https://learn.microsoft.com/en-us/rest/api/storageservices/put-blob
    #[tracing::instrument(err, skip(self, data), fields(url = %self.url, size = data.len()))]
    pub(crate) async fn put_blob(&self, name: &str, data: Bytes) -> anyhow::Result<()> {
        let content_length = data.len().to_string();
        let headers = [
            (header::CONTENT_LENGTH.as_str(), content_length.as_str()),
            (header::CONTENT_TYPE.as_str(), "application/octet-stream"),
            ("x-ms-blob-type", "BlockBlob"),
        ];
        let request = self.request(Method::PUT, Some(name), &[], &headers, misc::full(data))?;
        self.send(request).await?;
        Ok(())
    }

    // https://learn.microsoft.com/en-us/rest/api/storageservices/get-blob
    #[tracing::instrument(err, skip(self), fields(url = %self.url))]
    pub(crate) async fn get_blob(&self, name: &str) -> anyhow::Result<Bytes> {
        let request = self.request(Method::GET, Some(name), &[], &[], misc::empty())?;
        self.send(request).await
    }

    /// Builds an authorized request for the container or for one of its
    /// blobs. `params` become the whole query besides a SAS.
    fn request(
        &self,
        method: Method,
        blob: Option<&str>,
        params: &[(&str, &str)],
        headers: &[(&str, &str)],
        body: misc::Body,
    ) -> anyhow::Result<Request<misc::Body>> {
        let mut url = match blob {
            Some(blob) => self.blob_url(blob)?,
            None => self.url.clone(),
        };
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        if let Credential::Sas(sas) = &self.credential {
            let query = match url.query() {
                Some(query) => format!("{query}&{}", sas.expose_secret()),
                None => sas.expose_secret().to_string(),
            };
            url.set_query(Some(&query));
        }

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(url.as_str())
            .header("x-ms-version", VERSION);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Credential::SharedKey { account, key } = &self.credential {
            let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            let mut signed = headers.to_vec();
            signed.extend([("x-ms-date", date.as_str()), ("x-ms-version", VERSION)]);
            let string_to_sign =
                shared_key::string_to_sign(method.as_str(), &signed, account, url.path(), params);
            let signature = shared_key::sign(key.expose_secret(), &string_to_sign)?;
            let authorization = format!("SharedKey {account}:{signature}");
            builder = builder
                .header("x-ms-date", date.as_str())
                .header(header::AUTHORIZATION, authorization);
        }
        Ok(builder.body(body)?)
    }

    async fn send(&self, request: Request<misc::Body>) -> anyhow::Result<Bytes> {
        let response = self.client.request(request).await?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        if parts.status.is_success() {
            Ok(body)
        } else {
            Err(commons::Error {
                code: parts.status,
                message: String::from_utf8_lossy(&body).into_owned(),
            }
            .into())
        }
    }

    fn record(&self, blob: Blob) -> anyhow::Result<Option<BlobRecord>> {
        let Some(content_md5) = blob
            .properties
            .content_md5
            .filter(|content_md5| !content_md5.is_empty())
        else {
            tracing::warn!("skipping {}: no Content-MD5", blob.name);
            return Ok(None);
        };
        let content_hash =
            hex::encode(base64::engine::general_purpose::STANDARD.decode(content_md5)?);

        let storage_url = self.blob_url(&blob.name)?;
        Ok(Some(BlobRecord {
            name: blob.name,
            size: blob.properties.content_length,
            content_hash,
            storage_url,
        }))
    }
}

/// Endpoint and credential from a storage account connection string.
fn parse_connection_string(connection_string: &str) -> anyhow::Result<(Url, Credential)> {
    let fields = connection_string
        .split(';')
        .filter_map(|field| field.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<HashMap<_, _>>();

    let account = fields.get("AccountName").copied();
    let endpoint = if let Some(endpoint) = fields.get("BlobEndpoint") {
        endpoint.parse()?
    } else {
        let account =
            account.ok_or_else(|| anyhow::format_err!("connection string lacks AccountName"))?;
        let protocol = fields
            .get("DefaultEndpointsProtocol")
            .copied()
            .unwrap_or("https");
        let suffix = fields
            .get("EndpointSuffix")
            .copied()
            .unwrap_or("core.windows.net");
        format!("{protocol}://{account}.blob.{suffix}").parse()?
    };

    let credential = if let Some(sas) = fields.get("SharedAccessSignature") {
        Credential::Sas(SecretString::from(sas.trim_start_matches('?').to_string()))
    } else {
        match (account, fields.get("AccountKey")) {
            (Some(account), Some(key)) => Credential::SharedKey {
                account: account.to_string(),
                key: SecretSlice::from(base64::engine::general_purpose::STANDARD.decode(key)?),
            },
            _ => anyhow::bail!(
                "connection string needs either SharedAccessSignature or AccountName and AccountKey"
            ),
        }
    };
    Ok((endpoint, credential))
}

#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: Blobs,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Blobs {
    #[serde(rename = "Blob", default)]
    blob: Vec<Blob>,
}

#[derive(Debug, Deserialize)]
struct Blob {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties")]
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Properties {
    #[serde(rename = "Content-Length")]
    content_length: u64,
    #[serde(rename = "Content-MD5", default)]
    content_md5: Option<String>,
}
