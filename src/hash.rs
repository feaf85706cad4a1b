use clap::Parser;
use sha2::digest::DynDigest;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tokio::sync::Semaphore;

const CHUNK_SIZE: usize = 4 << 10;

#[derive(Debug, Parser)]
pub struct Args {
    path: PathBuf,
    /// md5, sha1, sha224, sha256, sha384 or sha512
    #[clap(long = "algorithm", default_value = "md5")]
    algorithms: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("hash algorithm {0:?} is not supported")]
    HashAlgorithmUnsupported(String),
}

pub async fn main(args: Args) -> anyhow::Result<()> {
    let hashes = hashes(&args.path, &args.algorithms).await?;
    println!("{}", serde_json::to_string_pretty(&hashes)?);
    Ok(())
}

fn hasher(algorithm: &str) -> Result<Box<dyn DynDigest + Send>, Error> {
    let hasher: Box<dyn DynDigest + Send> = match algorithm {
        "md5" => Box::<md5::Md5>::default(),
        "sha1" => Box::<sha1::Sha1>::default(),
        "sha224" => Box::<sha2::Sha224>::default(),
        "sha256" => Box::<sha2::Sha256>::default(),
        "sha384" => Box::<sha2::Sha384>::default(),
        "sha512" => Box::<sha2::Sha512>::default(),
        _ => return Err(Error::HashAlgorithmUnsupported(algorithm.to_string())),
    };
    Ok(hasher)
}

/// Hex digests of the file at `path`, one per requested algorithm.
///
/// Every algorithm reads the file on its own blocking worker, with at most
/// one worker per CPU. Unsupported algorithms map to `None`.
#[tracing::instrument(err, ret)]
pub(crate) async fn hashes(
    path: &Path,
    algorithms: &[String],
) -> anyhow::Result<BTreeMap<String, Option<String>>> {
    let workers = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    let semaphore = Arc::new(Semaphore::new(workers));

    let hashes = futures::future::try_join_all(algorithms.iter().map(|algorithm| {
        let semaphore = semaphore.clone();
        let path = path.to_path_buf();
        let algorithm = algorithm.clone();
        async move {
            let digest = match hasher(&algorithm) {
                Ok(hasher) => {
                    let _permit = semaphore.acquire_owned().await?;
                    Some(tokio::task::spawn_blocking(move || digest(&path, hasher)).await??)
                }
                Err(e) => {
                    tracing::error!("{e}");
                    None
                }
            };
            anyhow::Ok((algorithm, digest))
        }
    }))
    .await?;
    Ok(hashes.into_iter().collect())
}

fn digest(path: &Path, mut hasher: Box<dyn DynDigest + Send>) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut buffer = [0; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
