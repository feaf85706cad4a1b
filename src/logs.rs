use crate::onboard;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs::File;
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// One stage outcome of one object in the onboarding report.
#[derive(Debug, Deserialize, Serialize)]
pub struct Line<'a> {
    pub stage: onboard::Stage,
    pub name: Cow<'a, str>,
    pub guid: Option<Cow<'a, str>>,
    pub size: u64,
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

/// Logs to stderr, and additionally to `log_file` without colors.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
    let file = if let Some(log_file) = log_file {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(File::options().create(true).append(true).open(log_file)?)
                .with_ansi(false),
        )
    } else {
        None
    };

    tracing_subscriber::Registry::default()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file)
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()?;
    Ok(())
}
