// https://gen3.org/resources/user/using-api/#credentials-to-query-the-api

use crate::{commons, misc};
use backoff::ExponentialBackoff;
use base64::Engine;
use chrono::Utc;
use headers::authorization::Bearer;
use headers::Authorization;
use http::{header, Request};
use http_body_util::BodyExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use url::Url;

// refresh a little before the token actually expires
const EXPIRY_MARGIN: i64 = 60;

pub(crate) struct Auth {
    client: misc::Client,
    endpoint: Url,
    api_key: SecretString,
    token: Mutex<Option<Token>>,
}

struct Token {
    value: SecretString,
    expires_at: Option<i64>,
}

impl Token {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .map_or(true, |expires_at| expires_at - EXPIRY_MARGIN > now)
    }
}

impl Auth {
    pub(crate) fn new(client: misc::Client, endpoint: Url, api_key: SecretString) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            token: Mutex::new(None),
        }
    }

    pub(crate) async fn from_file(
        client: misc::Client,
        endpoint: Url,
        path: &Path,
    ) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct B {
            api_key: String,
        }

        let data = fs::read(path)
            .await
            .map_err(|e| anyhow::format_err!("{}: {e}", path.display()))?;
        let B { api_key } = serde_json::from_slice(&data)?;
        Ok(Self::new(client, endpoint, SecretString::from(api_key)))
    }

    pub(crate) async fn token(&self) -> anyhow::Result<Authorization<Bearer>> {
        let mut token = self.token.lock().await;
        if !token
            .as_ref()
            .is_some_and(|token| token.is_fresh(Utc::now().timestamp()))
        {
            *token = Some(self.access_token().await?);
        }
        let token = token
            .as_ref()
            .ok_or_else(|| anyhow::format_err!("missing token"))?;
        Ok(Authorization::bearer(token.value.expose_secret())?)
    }

    #[tracing::instrument(err, skip(self), fields(endpoint = %self.endpoint))]
    async fn access_token(&self) -> anyhow::Result<Token> {
        let mut url = self.endpoint.clone();
        misc::path_segments_mut(&mut url)?.extend(["user", "credentials", "cdis", "access_token"]);
        let url = &url;

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..ExponentialBackoff::default()
        };
        let body = backoff::future::retry(backoff, move || async move {
            let body = misc::json(&serde_json::json!({
                "api_key": self.api_key.expose_secret(),
            }))
            .map_err(permanent)?;
            let request = Request::post(url.as_str())
                .header(header::CONTENT_TYPE, "application/json")
                .body(body)
                .map_err(permanent)?;
            let response = self
                .client
                .request(request)
                .await
                .map_err(transient)?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(transient)?
                .to_bytes();
            if parts.status.is_success() {
                Ok(body)
            } else if parts.status.is_server_error() {
                tracing::warn!(status = %parts.status, "access token request failed, retrying");
                Err(transient(commons::error(parts.status, &body)))
            } else {
                Err(permanent(commons::error(parts.status, &body)))
            }
        })
        .await?;

        #[derive(Deserialize)]
        struct B {
            access_token: String,
        }

        let B { access_token } = serde_json::from_slice(&body)?;
        let expires_at = expires_at(&access_token);
        Ok(Token {
            value: SecretString::from(access_token),
            expires_at,
        })
    }
}

fn transient<E>(e: E) -> backoff::Error<anyhow::Error>
where
    anyhow::Error: From<E>,
{
    backoff::Error::transient(e.into())
}

fn permanent<E>(e: E) -> backoff::Error<anyhow::Error>
where
    anyhow::Error: From<E>,
{
    backoff::Error::permanent(e.into())
}

/// Reads the `exp` claim of a JWT without verifying it.
fn expires_at(token: &str) -> Option<i64> {
    #[derive(Deserialize)]
    struct Claims {
        exp: i64,
    }

    let payload = token.split('.').nth(1)?;
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let Claims { exp } = serde_json::from_slice(&payload).ok()?;
    Some(exp)
}

#[cfg(test)]
pub(crate) fn jwt(exp: i64) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    format!(
        "{}.{}.signature",
        engine.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
        engine.encode(format!(r#"{{"exp":{exp},"sub":"1"}}"#)),
    )
}
