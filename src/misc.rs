use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use std::error;
use std::io;
use url::{PathSegmentsMut, Url};

pub type Body = UnsyncBoxBody<Bytes, Box<dyn error::Error + Send + Sync>>;

pub type Client = hyper_util::client::legacy::Client<HttpsConnector<HttpConnector>, Body>;
pub fn client() -> Result<Client, io::Error> {
    let connector = HttpsConnectorBuilder::new()
        .with_native_roots()?
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    Ok(hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(connector))
}

pub fn empty() -> Body {
    Empty::new().map_err(Box::from).boxed_unsync()
}

pub fn full(data: Bytes) -> Body {
    Full::new(data).map_err(Box::from).boxed_unsync()
}

pub fn json<T>(value: &T) -> Result<Body, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    Ok(Full::from(serde_json::to_vec(value)?)
        .map_err(Box::from)
        .boxed_unsync())
}

pub fn path_segments_mut(url: &mut Url) -> anyhow::Result<PathSegmentsMut<'_>> {
    let mut segments = url
        .path_segments_mut()
        .map_err(|_| anyhow::format_err!("cannot-be-a-base"))?;
    segments.pop_if_empty();
    Ok(segments)
}

/// Replaces the scheme of `url` without touching anything after the `:`.
///
/// `Url::set_scheme` refuses to switch between special (`https`) and
/// non-special (`az`, `gs`) schemes, so the rewrite is done on the
/// serialization instead.
pub fn replace_scheme(url: &Url, scheme: &str) -> String {
    format!("{scheme}{}", &url.as_str()[url.scheme().len()..])
}
