//! `relup checksum` – print the SHA-256 of a file.

use anyhow::{Context, Result};
use relup_core::checksum;
use std::path::Path;

/// Print `<hex>  <path>` in sha256sum format.
pub async fn run_checksum(path: &Path) -> Result<()> {
    let owned = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || checksum::sha256_path(&owned))
        .await
        .context("checksum worker")??;
    println!("{}  {}", digest, path.display());
    Ok(())
}
