use crate::commons::Commons;
use crate::mock;
use http::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[test]
fn test_cell_value() {
    assert_eq!(super::cell_value("plain text"), json!("plain text"));
    assert_eq!(super::cell_value("42"), json!("42"));
    assert_eq!(super::cell_value("true"), json!("true"));
    assert_eq!(super::cell_value(r#"["a", "b"]"#), json!(["a", "b"]));
    assert_eq!(super::cell_value(r#"{"k": 1}"#), json!({"k": 1}));
    assert_eq!(super::cell_value("{not json"), json!("{not json"));
}

#[test]
fn test_from_tsv() -> anyhow::Result<()> {
    let tsv = "name\tguid\ttags\tempty\nstudy one\tdg.1234/a\t[\"x\"]\t\n\tdg.1234/b\t\t\n";

    let rows = super::from_tsv(tsv.as_bytes(), false)?;
    anyhow::ensure!(rows.len() == 2);
    anyhow::ensure!(rows[0].0 == "dg.1234/a");
    anyhow::ensure!(
        Value::Object(rows[0].1.clone())
            == json!({"name": "study one", "tags": ["x"], "empty": ""})
    );

    let rows = super::from_tsv(tsv.as_bytes(), true)?;
    anyhow::ensure!(Value::Object(rows[1].1.clone()) == json!({}));
    Ok(())
}

#[test]
fn test_from_tsv_without_guid() {
    assert!(super::from_tsv(b"name\ttags\nx\ty\n", false).is_err());
}

#[test]
fn test_to_tsv() -> anyhow::Result<()> {
    let records = json!({
        "dg.1234/a": {
            "_guid_type": "discovery_metadata",
            "gen3_discovery": {"name": "study one", "tags": [{"name": "x"}], "subjects": 3}
        },
        "dg.1234/b": {
            "_guid_type": "discovery_metadata",
            "gen3_discovery": {"name": "study two", "authz": "/programs/b"}
        }
    });
    let records = records
        .as_object()
        .ok_or_else(|| anyhow::format_err!("not an object"))?;

    let tsv = String::from_utf8(super::to_tsv(records)?)?;
    let lines = tsv.lines().collect::<Vec<_>>();
    anyhow::ensure!(lines[0] == "guid\tauthz\tname\tsubjects\ttags");
    anyhow::ensure!(lines[1] == "dg.1234/a\t\tstudy one\t3\t\"[{\"\"name\"\":\"\"x\"\"}]\"");
    anyhow::ensure!(lines[2] == "dg.1234/b\t/programs/b\tstudy two\t\t");
    Ok(())
}

#[tokio::test]
async fn test_read() -> anyhow::Result<()> {
    let server = mock::serve(|request| {
        if let Some(response) = mock::access_token(request) {
            return response;
        }
        anyhow::ensure!(request.path == "/mds/metadata");
        anyhow::ensure!(request.query_param("_guid_type").as_deref() == Some("discovery_metadata"));
        anyhow::ensure!(request.query_param("limit").as_deref() == Some("10"));
        mock::json(
            StatusCode::OK,
            &json!({"dg.1234/a": {"gen3_discovery": {"name": "study one"}}}),
        )
    })
    .await?;
    let commons = Commons::mock(&server).await?;
    let temp_dir = tempfile::tempdir()?;

    let path = super::read(&commons, 10, temp_dir.path()).await?;
    anyhow::ensure!(path == temp_dir.path().join("127.0.0.1-discovery_metadata.tsv"));
    anyhow::ensure!(
        tokio::fs::read_to_string(&path).await? == "guid\tname\ndg.1234/a\tstudy one\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_publish() -> anyhow::Result<()> {
    let server = mock::serve(|request| {
        if let Some(response) = mock::access_token(request) {
            return response;
        }
        anyhow::ensure!(request.method == Method::POST);
        anyhow::ensure!(request.query_param("overwrite").as_deref() == Some("True"));
        Ok(mock::text(StatusCode::CREATED, "{}"))
    })
    .await?;
    let commons = Commons::mock(&server).await?;
    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join("discovery.tsv");
    tokio::fs::write(&path, "guid\tname\tempty\ndg.1234/a\tstudy one\t\n").await?;

    anyhow::ensure!(super::publish(&commons, &path, true).await? == 1);
    let recorded = server.recorded();
    let request = recorded
        .iter()
        .find(|request| request.path == "/mds/metadata/dg.1234/a")
        .ok_or_else(|| anyhow::format_err!("nothing published"))?;
    let body: Value = serde_json::from_slice(&request.body)?;
    anyhow::ensure!(
        body == json!({"_guid_type": "discovery_metadata", "gen3_discovery": {"name": "study one"}})
    );
    Ok(())
}

#[tokio::test]
async fn test_delete() -> anyhow::Result<()> {
    let updated = Arc::new(Mutex::new(None));
    let server = mock::serve({
        let updated = updated.clone();
        move |request| {
            if let Some(response) = mock::access_token(request) {
                return response;
            }
            match (&request.method, request.path.as_str()) {
                (&Method::GET, "/mds/metadata/discovery-only") => mock::json(
                    StatusCode::OK,
                    &json!({"_guid_type": "discovery_metadata", "gen3_discovery": {}}),
                ),
                (&Method::GET, "/mds/metadata/shared") => mock::json(
                    StatusCode::OK,
                    &json!({"_guid_type": "indexed_file", "gen3_discovery": {}, "size": 5}),
                ),
                (&Method::DELETE, "/mds/metadata/discovery-only") => {
                    Ok(mock::text(StatusCode::OK, "{}"))
                }
                (&Method::PUT, "/mds/metadata/shared") => {
                    let body: Value = serde_json::from_slice(&request.body)?;
                    *updated.lock().unwrap() = Some(body);
                    Ok(mock::text(StatusCode::OK, "{}"))
                }
                _ => Ok(mock::not_found()),
            }
        }
    })
    .await?;
    let commons = Commons::mock(&server).await?;

    super::delete(&commons, "discovery-only").await?;
    anyhow::ensure!(server.requests(Method::DELETE, "/mds/metadata/discovery-only") == 1);

    super::delete(&commons, "shared").await?;
    anyhow::ensure!(server.requests(Method::DELETE, "/mds/metadata/shared") == 0);
    anyhow::ensure!(
        updated.lock().unwrap().as_ref() == Some(&json!({"_guid_type": "indexed_file", "size": 5}))
    );
    Ok(())
}
