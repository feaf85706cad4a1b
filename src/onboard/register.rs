use super::{Error, OnboardingRecord};
use crate::commons::{index, Commons};
use std::collections::BTreeMap;

/// Creates one index record and returns the GUID the index service assigned.
///
/// An empty `authz` registers the object without an authorization scope.
#[tracing::instrument(skip_all, fields(filename = %record.filename))]
pub(crate) async fn register(
    commons: &Commons,
    record: &OnboardingRecord,
) -> Result<String, Error> {
    let request = index::Request {
        form: index::Form::Object,
        hashes: BTreeMap::from([("md5", record.md5.as_str())]),
        size: record.size,
        file_name: &record.filename,
        urls: &record.urls,
        acl: &record.acl,
        authz: (!record.authz.is_empty()).then_some(record.authz.as_slice()),
    };
    let response = index::create(commons, &request)
        .await
        .map_err(|source| Error::RegistrationFailed {
            filename: record.filename.clone(),
            source,
        })?;
    tracing::info!(
        "added index for {} with guid {}",
        record.filename,
        response.did
    );
    Ok(response.did)
}
