use super::{Config, Error, OnboardingRecord};
use crate::commons::{sheepdog, Commons};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::ffi::OsStr;
use std::path::Path;

#[derive(Debug, Serialize)]
struct CoreMetadataCollection<'a> {
    projects: Project<'a>,
    #[serde(rename = "type")]
    kind: &'static str,
    submitter_id: &'a str,
}

#[derive(Debug, Serialize)]
struct Project<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct DataNode<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    submitter_id: &'a str,
    file_name: &'a str,
    data_format: &'a str,
    file_size: u64,
    md5sum: &'a str,
    data_type: &'a str,
    data_category: &'a str,
    object_id: &'a str,
    core_metadata_collections: Link<'a>,
}

#[derive(Debug, Serialize)]
struct Link<'a> {
    node_id: &'a str,
    submitter_id: &'a str,
}

/// Node ids created for one object.
#[derive(Debug)]
pub(crate) struct Submission {
    pub(crate) core_metadata_collection: String,
    pub(crate) data_node: Option<String>,
}

fn submitter_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// Creates a fresh core metadata collection and a data node pointing at it.
///
/// Every call creates new nodes. When the data node is rejected the
/// collection is deleted again so that no orphan is left in the graph.
#[tracing::instrument(skip_all, fields(filename = %record.filename, guid = %guid))]
pub(crate) async fn submit_metadata(
    commons: &Commons,
    config: &Config,
    record: &OnboardingRecord,
    guid: &str,
) -> Result<Submission, Error> {
    let failed = |source| Error::SubmissionFailed {
        guid: guid.to_string(),
        source,
    };

    let submitter_id = submitter_id();
    let core = sheepdog::submit(
        commons,
        &config.program,
        &config.project,
        &CoreMetadataCollection {
            projects: Project {
                code: &config.project_code,
            },
            kind: "core_metadata_collection",
            submitter_id: &submitter_id,
        },
    )
    .await
    .map_err(failed)?;
    let core_id = core.first_id().map_err(failed)?.to_string();

    let data_format = Path::new(&record.filename)
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or_default();
    let data = sheepdog::submit(
        commons,
        &config.program,
        &config.project,
        &DataNode {
            kind: &config.data_node_type,
            submitter_id: &submitter_id,
            file_name: &record.filename,
            data_format,
            file_size: record.size,
            md5sum: &record.md5,
            data_type: &config.data_type,
            data_category: &config.data_category,
            object_id: guid,
            core_metadata_collections: Link {
                node_id: &core_id,
                submitter_id: &submitter_id,
            },
        },
    )
    .await;

    match data {
        Ok(data) => {
            tracing::info!(
                "submitted {} with core metadata collection {core_id}",
                record.filename
            );
            Ok(Submission {
                data_node: data.entities.first().and_then(|entity| entity.id.clone()),
                core_metadata_collection: core_id,
            })
        }
        Err(e) => {
            if let Err(delete) =
                sheepdog::delete_entities(commons, &config.program, &config.project, &[&core_id])
                    .await
            {
                tracing::warn!("core metadata collection {core_id} is orphaned: {delete:#}");
            }
            Err(failed(e))
        }
    }
}
