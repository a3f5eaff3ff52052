//! `relup config` – show where the config lives and what is in effect.

use anyhow::Result;
use relup_core::config::{self, RelupConfig};

pub fn run_config(cfg: &RelupConfig) -> Result<()> {
    println!("config file:      {}", config::config_path()?.display());
    println!("store root:       {}", cfg.resolved_store_root()?.display());
    println!("max concurrent:   {}", cfg.max_concurrent);
    println!("chunk size:       {} bytes", cfg.chunk_size);
    match cfg.task_timeout() {
        Some(limit) => println!("task timeout:     {}s", limit.as_secs()),
        None => println!("task timeout:     none"),
    }
    println!("progress every:   {} ms", cfg.progress_interval_ms);
    Ok(())
}
