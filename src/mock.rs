//! In-process HTTP/1 server standing in for the commons and storage services.

use bytes::Bytes;
use http::{Method, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Clone, Debug)]
pub(crate) struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) authorization: Option<String>,
    pub(crate) body: Bytes,
}

impl Request {
    pub(crate) fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.query.as_deref().unwrap_or_default().as_bytes())
            .into_owned()
            .collect()
    }

    pub(crate) fn query_param(&self, key: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }
}

pub(crate) struct Server {
    url: Url,
    requests: Arc<Mutex<Vec<Request>>>,
    handle: JoinHandle<()>,
}

impl Server {
    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn recorded(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests(&self, method: Method, path: &str) -> usize {
        self.recorded()
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub(crate) async fn serve<F>(handler: F) -> anyhow::Result<Server>
where
    F: Fn(&Request) -> anyhow::Result<(StatusCode, Bytes)> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = Url::parse(&format!("http://{}/", listener.local_addr()?))?;
    let requests = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let handle = tokio::spawn({
        let requests = requests.clone();
        async move {
            while let Ok((stream, _)) = listener.accept().await {
                let requests = requests.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |request: http::Request<Incoming>| {
                        let requests = requests.clone();
                        let handler = handler.clone();
                        async move {
                            let (parts, body) = request.into_parts();
                            let request = Request {
                                method: parts.method,
                                path: parts.uri.path().to_string(),
                                query: parts.uri.query().map(ToString::to_string),
                                authorization: parts
                                    .headers
                                    .get(http::header::AUTHORIZATION)
                                    .and_then(|value| value.to_str().ok())
                                    .map(ToString::to_string),
                                body: body.collect().await?.to_bytes(),
                            };
                            let (status, body) = handler(&request).unwrap_or_else(|e| {
                                (StatusCode::INTERNAL_SERVER_ERROR, Bytes::from(e.to_string()))
                            });
                            requests.lock().unwrap().push(request);
                            Ok::<_, hyper::Error>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(body))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        }
    });

    Ok(Server {
        url,
        requests,
        handle,
    })
}

pub(crate) fn json<T>(status: StatusCode, value: &T) -> anyhow::Result<(StatusCode, Bytes)>
where
    T: Serialize + ?Sized,
{
    Ok((status, Bytes::from(serde_json::to_vec(value)?)))
}

pub(crate) fn text(status: StatusCode, body: &str) -> (StatusCode, Bytes) {
    (status, Bytes::from(body.to_string()))
}

pub(crate) fn not_found() -> (StatusCode, Bytes) {
    text(StatusCode::NOT_FOUND, "not found")
}

/// Answers the access token exchange, returning `None` for every other path.
pub(crate) fn access_token(request: &Request) -> Option<anyhow::Result<(StatusCode, Bytes)>> {
    (request.method == Method::POST && request.path == "/user/credentials/cdis/access_token")
        .then(|| {
            json(
                StatusCode::OK,
                &serde_json::json!({ "access_token": crate::auth::jwt(4102444800) }),
            )
        })
}
