use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::core::downloader::{Checksum, DownloadDescriptor, DownloadTask};
use crate::core::error::EngineError;
use crate::core::loaders::{install_chain, InstallRequest, InstallerKind};
use crate::core::scheduler::{TaskHandle, TaskReport};
use crate::core::state::EngineContext;
use crate::core::task::Task;

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadPayload {
    pub urls: Vec<String>,
    pub dest: PathBuf,
    pub checksum: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallPayload {
    pub loader: InstallerKind,
    pub minecraft_version: String,
    pub loader_version: String,
    pub game_dir: PathBuf,
    pub version_id: Option<String>,
    pub checksum: Option<String>,
}

/// What a finished command reports back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub tag: String,
    pub path: PathBuf,
    /// Post-dependencies that failed after the main work succeeded.
    pub warnings: Vec<String>,
}

pub async fn download(ctx: &EngineContext, payload: DownloadPayload) -> Result<CommandOutcome, String> {
    let mut builder = DownloadDescriptor::builder(payload.dest).urls(payload.urls);
    if let Some(raw) = payload.checksum {
        builder = builder.checksum(parse_checksum(&raw)?);
    }
    if let Some(size) = payload.size {
        builder = builder.size(size);
    }
    let descriptor = builder.build().map_err(|e| e.to_string())?;

    let task = DownloadTask::new(ctx, descriptor).into_task();
    run_reported(ctx, task).await
}

pub async fn install(ctx: &EngineContext, payload: InstallPayload) -> Result<CommandOutcome, String> {
    let mut request = InstallRequest::new(
        payload.loader,
        payload.minecraft_version,
        payload.loader_version,
        payload.game_dir,
    );
    if let Some(id) = payload.version_id {
        request = request.with_version_id(id);
    }
    if let Some(raw) = payload.checksum {
        request = request.with_checksum(parse_checksum(&raw)?);
    }

    info!("Installing {}", request.label());
    let task = install_chain(ctx, request).map_err(|e| e.to_string())?;
    run_reported(ctx, task).await
}

fn parse_checksum(raw: &str) -> Result<Checksum, String> {
    raw.parse::<Checksum>()
        .map_err(|e: EngineError| format!("Invalid checksum '{raw}': {e}"))
}

/// Submits `task`, logs aggregated progress in 10% steps and waits for it.
async fn run_reported(ctx: &EngineContext, task: Task<PathBuf>) -> Result<CommandOutcome, String> {
    let handle: TaskHandle<PathBuf> = ctx.submit(task).map_err(|e| e.to_string())?;

    let tag = handle.task().tag().to_string();
    let last_step = Arc::new(AtomicU64::new(0));
    handle.on_progress(move |value| {
        let step = (value * 10.0).floor() as u64;
        if step > last_step.fetch_max(step, Ordering::Relaxed) {
            info!("[{}] {:>3}%", tag, step * 10);
        }
    });

    outcome(handle.wait().await)
}

fn outcome(report: TaskReport<PathBuf>) -> Result<CommandOutcome, String> {
    let warnings: Vec<String> = report
        .post_failures
        .iter()
        .map(|failure| format!("{}: {}", failure.tag, failure.cause))
        .collect();

    if let Some(cause) = report.root_cause() {
        error!("[{}] {} ({})", report.tag, cause, report.state);
        return Err(cause.to_string());
    }

    match report.result {
        Some(path) => Ok(CommandOutcome {
            tag: report.tag,
            path,
            warnings,
        }),
        None => Err(EngineError::ResultUnavailable { tag: report.tag }.to_string()),
    }
}
