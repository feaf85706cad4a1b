use crate::{jsonl, logs, onboard};
use clap::Parser;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncRead;

#[derive(Debug, Parser)]
pub struct Args {
    /// Report written by `onboard --report`.
    path: PathBuf,
}

pub async fn main(args: Args) -> anyhow::Result<()> {
    let summary = summarize(jsonl::Reader::new(File::open(&args.path).await?)).await?;
    for (stage, outcome) in &summary {
        println!("{stage}: {} ok, {} failed", outcome.ok, outcome.failed);
    }
    Ok(())
}

async fn summarize<R>(
    mut reader: jsonl::Reader<R>,
) -> anyhow::Result<BTreeMap<onboard::Stage, Outcome>>
where
    R: Debug + AsyncRead + Unpin,
{
    let mut summary = BTreeMap::<_, Outcome>::new();
    while let Some(line) = reader.read::<logs::Line>().await? {
        summary.entry(line.stage).or_default().add(&line);
    }
    Ok(summary)
}

/// What happened to the objects that reached one stage.
#[derive(Debug, Default, PartialEq)]
struct Outcome {
    ok: Tally,
    failed: Tally,
}

impl Outcome {
    fn add(&mut self, line: &logs::Line<'_>) {
        let tally = match line.error {
            Some(_) => &mut self.failed,
            None => &mut self.ok,
        };
        tally.objects += 1;
        tally.bytes += line.size;
    }
}

#[derive(Debug, Default, PartialEq)]
struct Tally {
    objects: usize,
    bytes: u64,
}

impl Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.objects == 1 { "object" } else { "objects" };
        let size = humansize::format_size(self.bytes, humansize::BINARY);
        write!(f, "{} {noun} ({size})", self.objects)
    }
}
