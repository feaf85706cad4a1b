// https://learn.microsoft.com/en-us/rest/api/storageservices/authorize-with-shared-key

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt::Write;

const STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

pub(crate) fn string_to_sign(
    verb: &str,
    headers: &[(&str, &str)],
    account: &str,
    path: &str,
    params: &[(&str, &str)],
) -> String {
    let headers = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect::<Vec<_>>();
    let mut canonical = headers
        .iter()
        .filter(|(name, _)| name.starts_with("x-ms-"))
        .collect::<Vec<_>>();
    canonical.sort();
    let mut params = params
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), *value))
        .collect::<Vec<_>>();
    params.sort();

    let mut string_to_sign = verb.to_string();
    for standard in STANDARD_HEADERS {
        let value = headers
            .iter()
            .find_map(|(name, value)| (name == standard).then_some(*value))
            .unwrap_or_default();
        // a zero Content-Length is signed as an empty line
        let value = if standard == "content-length" && value == "0" {
            ""
        } else {
            value
        };
        let _ = write!(string_to_sign, "\n{value}");
    }
    string_to_sign.push('\n');
    for (name, value) in canonical {
        let _ = writeln!(string_to_sign, "{name}:{value}");
    }
    let _ = write!(string_to_sign, "/{account}{path}");
    for (name, value) in params {
        let _ = write!(string_to_sign, "\n{name}:{value}");
    }
    string_to_sign
}

pub(crate) fn sign(key: &[u8], string_to_sign: &str) -> anyhow::Result<String> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|e| anyhow::format_err!("{e}"))?;
    mac.update(string_to_sign.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}
