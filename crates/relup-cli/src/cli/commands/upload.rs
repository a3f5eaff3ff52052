//! `relup upload` – publish files for one release through the transfer scheduler.

use anyhow::Result;
use relup_core::config::RelupConfig;
use relup_core::store::{LocalReleaseStore, ReleaseTarget};
use relup_core::transfer::{
    overall_progress, BatchSummary, ChannelSink, Task, TaskStatus, TransferEvent,
    TransferScheduler,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

type ReleaseTask = Task<PathBuf, ReleaseTarget>;

pub struct UploadArgs {
    pub release_version: String,
    pub platform: String,
    pub jobs: Option<usize>,
    pub store: Option<PathBuf>,
    pub files: Vec<PathBuf>,
}

pub async fn run_upload(cfg: &RelupConfig, args: UploadArgs) -> Result<()> {
    let target = ReleaseTarget::new(args.release_version, args.platform);
    target.validate()?;
    let root = match args.store {
        Some(dir) => dir,
        None => cfg.resolved_store_root()?,
    };
    let jobs = args.jobs.unwrap_or(cfg.max_concurrent);
    if let Some(name) = first_duplicate_name(&args.files) {
        anyhow::bail!("more than one file is named {name}; release file names must be unique");
    }

    let (sink, mut updates) = ChannelSink::channel();
    let mut scheduler = TransferScheduler::with_sink(jobs, sink);
    if let Some(limit) = cfg.task_timeout() {
        scheduler = scheduler.with_task_timeout(limit);
    }
    for file in &args.files {
        scheduler.enqueue(file.clone(), target.clone());
    }
    tracing::info!(
        files = args.files.len(),
        jobs = scheduler.max_concurrent(),
        store = %root.display(),
        "uploading release {} for {}",
        target.version,
        target.platform
    );

    let interval = Duration::from_millis(cfg.progress_interval_ms);
    let printer = tokio::spawn(async move {
        let mut last_print: Option<Instant> = None;
        while let Some(update) = updates.recv().await {
            if let TransferEvent::Failed { id, message } = &update.event {
                if let Some(task) = update.snapshot.iter().find(|t| t.id == *id) {
                    println!("  failed: {}: {}", file_label(&task.payload), message);
                }
            }
            let now = Instant::now();
            let due = last_print.map_or(true, |t| now.duration_since(t) >= interval);
            if due || update.event.is_terminal() {
                println!("{}", progress_line(&update.snapshot));
                last_print = Some(now);
            }
        }
    });

    let store = LocalReleaseStore::new(&root).with_chunk_size(cfg.chunk_size);
    let summary = scheduler.run(store.clone()).await?;
    let tasks = scheduler.snapshot();
    // Dropping the scheduler closes the channel so the printer drains and exits.
    drop(scheduler);
    if let Err(e) = printer.await {
        tracing::warn!("progress printer task: {}", e);
    }

    print_results(&store, &target, &tasks).await;
    println!("{summary}");
    if !summary.all_succeeded() {
        anyhow::bail!("{} file(s) failed to upload", summary.failed);
    }
    Ok(())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// First file name that appears more than once; every file of a release lands
/// in the same directory.
fn first_duplicate_name(files: &[PathBuf]) -> Option<String> {
    let mut seen = HashSet::new();
    files
        .iter()
        .map(|f| file_label(f))
        .find(|name| !seen.insert(name.clone()))
}

/// One-line overall status, e.g. `[ 42%] 1/3 done, 2 running, 0 failed`.
pub(crate) fn progress_line(snapshot: &[ReleaseTask]) -> String {
    let summary = BatchSummary::from_tasks(snapshot);
    format!(
        "[{:>3}%] {}/{} done, {} running, {} failed",
        overall_progress(snapshot),
        summary.completed + summary.failed,
        summary.total,
        summary.running,
        summary.failed
    )
}

async fn print_results(store: &LocalReleaseStore, target: &ReleaseTarget, tasks: &[ReleaseTask]) {
    println!("{:<8} {:<10} {:<32} {}", "TASK", "STATUS", "FILE", "DETAIL");
    for task in tasks {
        let name = file_label(&task.payload);
        let detail = match task.status {
            TaskStatus::Completed => match store.read_record(target, &name).await {
                Ok(record) => format!("sha256 {} ({} bytes)", record.checksum, record.file_size),
                Err(e) => {
                    tracing::warn!("no release record for {}: {:#}", name, e);
                    "-".to_string()
                }
            },
            _ => task.error.clone().unwrap_or_else(|| "-".to_string()),
        };
        println!(
            "{:<8} {:<10} {:<32} {}",
            task.id.to_string(),
            task.status.as_str(),
            name,
            detail
        );
    }
}
