//! First-run weight provisioning.
//!
//! Makes sure every engine has a model file before validation runs: an existing model is
//! copied to the engines that lack one, otherwise a single download from the first working
//! mirror is verified and then copied around.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::engine::EngineDefinition;

const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_MIRRORS: &[&str] = &[
    "https://huggingface.co/datasets/katago/weights/resolve/main/b6/kata1-b6c96-s50894592-d7380655.txt.gz?download=1",
    "https://huggingface.co/datasets/katago/weights/resolve/main/b6/kata1-b6c96-s50894592-d7380655.txt.gz",
];

pub struct WeightBootstrap {
    client: Client,
    mirrors: Vec<String>,
}

impl WeightBootstrap {
    pub fn new(mirrors: Vec<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .user_agent(concat!("engine-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, mirrors }
    }

    pub fn mirrors(&self) -> &[String] {
        &self.mirrors
    }

    /// Provision model files for `definitions`. Existing files are never touched.
    pub async fn ensure(&self, definitions: &[EngineDefinition]) -> Result<()> {
        let targets: Vec<&Path> = definitions.iter().map(|d| d.model.as_path()).collect();
        for target in &targets {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let missing: Vec<&Path> = targets.iter().copied().filter(|t| !t.is_file()).collect();
        if missing.is_empty() {
            return Ok(());
        }

        let seed: PathBuf = match targets.iter().find(|t| t.is_file()) {
            Some(existing) => existing.to_path_buf(),
            None => {
                info!("[weights] downloading weights...");
                self.download_with_fallback(missing[0]).await?;
                missing[0].to_path_buf()
            }
        };

        for target in missing.iter().filter(|t| **t != seed.as_path()) {
            tokio::fs::copy(&seed, target)
                .await
                .with_context(|| format!("copying {} to {}", seed.display(), target.display()))?;
        }

        let summary: Vec<&str> = targets
            .iter()
            .map(|t| if t.is_file() { "ok" } else { "missing" })
            .collect();
        info!("[weights] ready: {}", summary.join(", "));
        Ok(())
    }

    /// Try each mirror in order until one yields a valid gzip file at `dest`.
    pub async fn download_with_fallback(&self, dest: &Path) -> Result<()> {
        for url in &self.mirrors {
            match self.download(url, dest).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("[weights] failed {}: {:#}", url, e),
            }
        }
        Err(anyhow!("all mirrors failed for {}", dest.display()))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/octet-stream")
            .send()
            .await?
            .error_for_status()?;

        let part = part_path(dest);
        let result = async {
            let mut file = tokio::fs::File::create(&part).await?;
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            drop(file);

            verify_gzip(part.clone()).await?;
            tokio::fs::rename(&part, dest).await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        result
    }
}

impl Default for WeightBootstrap {
    fn default() -> Self {
        Self::new(DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect())
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Fully decompress `path` to prove it is a complete gzip stream.
async fn verify_gzip(path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::open(&path)?;
        let mut decoder = GzDecoder::new(std::io::BufReader::new(file));
        std::io::copy(&mut decoder, &mut std::io::sink()).context("gzip verify failed")?;
        Ok(())
    })
    .await?
}
