use crate::{azure, misc};
use serde::Serialize;

/// The unit of work carried through every stage of a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub(crate) struct OnboardingRecord {
    /// Set by the index registrar; `None` until then.
    pub(crate) guid: Option<String>,
    pub(crate) md5: String,
    pub(crate) size: u64,
    pub(crate) authz: Vec<String>,
    pub(crate) acl: Vec<String>,
    pub(crate) urls: Vec<String>,
    pub(crate) filename: String,
}

pub(crate) fn normalize(
    blob: &azure::BlobRecord,
    scheme: &str,
    authz: &[String],
    acl: &[String],
) -> OnboardingRecord {
    let filename = blob
        .name
        .rsplit('/')
        .next()
        .unwrap_or(&blob.name)
        .to_string();
    OnboardingRecord {
        guid: None,
        md5: blob.content_hash.clone(),
        size: blob.size,
        authz: authz.to_vec(),
        acl: acl.to_vec(),
        urls: vec![misc::replace_scheme(&blob.storage_url, scheme)],
        filename,
    }
}
