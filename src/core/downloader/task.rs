use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::checksum::{Checksum, HashAlgorithm, Hasher};
use super::descriptor::DownloadDescriptor;
use super::transport::{Transfer, Transport, Validators};
use crate::core::cache::{CacheEntry, CacheRepository};
use crate::core::error::{EngineError, EngineResult};
use crate::core::state::EngineContext;
use crate::core::task::{Task, TaskBody, TaskContext};

/// Timeouts and retry budget for a single download.
#[derive(Debug, Clone)]
pub struct DownloadPolicy {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Attempts per URL for retriable failures before moving to the next one.
    pub attempts_per_candidate: usize,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
            attempts_per_candidate: 3,
        }
    }
}

/// Outcome of the candidate loop.
enum Fetched {
    /// Verified bytes are at the destination.
    Downloaded {
        url: String,
        checksum: Checksum,
        validators: Validators,
    },
    /// The server confirmed the cached copy is current.
    NotModified,
}

/// Fetches one [`DownloadDescriptor`]: cache first, then every candidate URL
/// in order until one yields verified bytes.
pub struct DownloadTask {
    descriptor: DownloadDescriptor,
    transport: Arc<dyn Transport>,
    cache: Option<Arc<CacheRepository>>,
    policy: DownloadPolicy,
}

impl DownloadTask {
    pub fn new(ctx: &EngineContext, descriptor: DownloadDescriptor) -> Self {
        Self::with_parts(
            descriptor,
            Arc::clone(ctx.transport()),
            Some(Arc::clone(ctx.cache())),
            ctx.download_policy(),
        )
    }

    pub fn with_parts(
        descriptor: DownloadDescriptor,
        transport: Arc<dyn Transport>,
        cache: Option<Arc<CacheRepository>>,
        policy: DownloadPolicy,
    ) -> Self {
        Self {
            descriptor,
            transport,
            cache,
            policy,
        }
    }

    pub fn descriptor(&self) -> &DownloadDescriptor {
        &self.descriptor
    }

    /// Wraps the download in a schedulable task. Progress weight follows the
    /// expected size in MiB, with one unit as the floor.
    pub fn into_task(self) -> Task<PathBuf> {
        let weight = self
            .descriptor
            .size()
            .map(|size| (size as f64 / (1024.0 * 1024.0)).max(1.0))
            .unwrap_or(1.0);
        let tag = format!("download {}", self.descriptor.file_name());
        Task::from_body(tag, self).with_weight(weight)
    }

    /// One task per descriptor, collected by a quiet join task.
    pub fn batch(
        ctx: &EngineContext,
        tag: impl Into<String>,
        descriptors: Vec<DownloadDescriptor>,
    ) -> Task<Vec<PathBuf>> {
        info!("Preparing batch download: {} files", descriptors.len());
        let tasks = descriptors
            .into_iter()
            .map(|descriptor| DownloadTask::new(ctx, descriptor).into_task())
            .collect();
        Task::all_of(tag, tasks)
    }

    // ── Candidate loop ──────────────────────────────────

    /// With `cached`, the candidate it was fetched from is asked
    /// conditionally and may answer [`Fetched::NotModified`].
    async fn fetch(&self, cx: &TaskContext, cached: Option<&CacheEntry>) -> EngineResult<Fetched> {
        let per_candidate = self.policy.attempts_per_candidate.max(1);
        let mut attempts = 0;
        let mut last = None;

        for url in self.descriptor.urls() {
            for attempt in 1..=per_candidate {
                cx.checkpoint()?;
                attempts += 1;
                let conditions = cached.and_then(|entry| entry.validators_for(url));
                match self.fetch_candidate(cx, url, conditions).await {
                    Ok(fetched) => {
                        if let Fetched::Downloaded { .. } = fetched {
                            debug!("Downloaded: {} -> {:?}", url, self.descriptor.dest());
                        }
                        return Ok(fetched);
                    }
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err) => {
                        warn!(
                            "Download attempt {}/{} from {} failed: {}",
                            attempt, per_candidate, url, err
                        );
                        let retry = err.is_retriable() && attempt < per_candidate;
                        last = Some(err);
                        if !retry {
                            break;
                        }
                    }
                }
            }
        }

        let last = last.unwrap_or_else(|| {
            EngineError::Configuration(format!("no candidate URLs for {}", cx.tag()))
        });
        Err(EngineError::AllCandidatesExhausted {
            attempts,
            last: Box::new(last),
        })
    }

    /// Streams one URL into a temporary sibling of the destination and
    /// renames it into place only once size and digest check out.
    async fn fetch_candidate(
        &self,
        cx: &TaskContext,
        url: &str,
        conditions: Option<&Validators>,
    ) -> EngineResult<Fetched> {
        let dest = self.descriptor.dest();
        let mut part = PartialFile::create(dest).await?;

        let open = self.transport.open(url, conditions);
        let opened = tokio::select! {
            biased;
            _ = cx.cancelled() => return Err(cancelled(cx)),
            opened = tokio::time::timeout(self.policy.connect_timeout, open) => opened,
        };
        let transfer = opened.map_err(|_| EngineError::Timeout {
            url: url.to_string(),
            phase: "connecting to",
        })??;
        let response = match transfer {
            Transfer::Body(response) => response,
            Transfer::NotModified if conditions.is_some() => return Ok(Fetched::NotModified),
            Transfer::NotModified => {
                return Err(EngineError::Transport {
                    url: url.to_string(),
                    reason: "'not modified' answer to an unconditional request".into(),
                })
            }
        };

        let algorithm = self
            .descriptor
            .checksum()
            .map(Checksum::algorithm)
            .unwrap_or(HashAlgorithm::Sha1);
        let expected_total = self.descriptor.size().or(response.content_length);
        let mut hasher = Hasher::new(algorithm);
        let mut written = 0u64;
        let validators = response.validators;
        let mut body = response.body;

        loop {
            let next = tokio::select! {
                biased;
                _ = cx.cancelled() => return Err(cancelled(cx)),
                next = tokio::time::timeout(self.policy.read_timeout, body.next()) => next,
            };
            let chunk = match next {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => break,
                Err(_) => {
                    return Err(EngineError::Timeout {
                        url: url.to_string(),
                        phase: "reading from",
                    })
                }
            };
            part.write(&chunk).await?;
            hasher.update(&chunk);
            written += chunk.len() as u64;
            if let Some(expected) = self.descriptor.size() {
                if written > expected {
                    return Err(EngineError::Transport {
                        url: url.to_string(),
                        reason: format!(
                            "unexpected file size: expected {expected} bytes, got more than that"
                        ),
                    });
                }
            }
            if let Some(total) = expected_total {
                cx.set_progress(written.min(total), total);
            }
            cx.checkpoint()?;
        }

        if let Some(expected) = self.descriptor.size() {
            if written != expected {
                return Err(EngineError::Transport {
                    url: url.to_string(),
                    reason: format!("unexpected file size: expected {expected} bytes, got {written}"),
                });
            }
        }

        let actual = hasher.finalize_hex();
        if let Some(expected) = self.descriptor.checksum() {
            if !expected.matches(&actual) {
                return Err(EngineError::ChecksumMismatch {
                    url: url.to_string(),
                    algorithm: algorithm.to_string(),
                    expected: expected.hex_digest().to_string(),
                    actual,
                });
            }
        }

        part.commit(dest).await?;
        Ok(Fetched::Downloaded {
            url: url.to_string(),
            checksum: Checksum::computed(algorithm, actual),
            validators,
        })
    }

    /// Re-verified copy of the cached file at `dest`, if there is one.
    async fn restore_cached(&self, key: &str, dest: &Path) -> Option<PathBuf> {
        let cache = self.cache.as_ref()?;
        match cache.restore(key, self.descriptor.checksum(), dest).await {
            Ok(restored) => restored,
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", key, e);
                None
            }
        }
    }
}

#[async_trait]
impl TaskBody<PathBuf> for DownloadTask {
    async fn execute(self: Box<Self>, cx: TaskContext) -> EngineResult<PathBuf> {
        cx.checkpoint()?;
        let key = self.descriptor.cache_key().to_string();
        let dest = self.descriptor.dest().to_path_buf();

        // One in-flight fetch per key; later requests wait and then restore.
        let _claim = match &self.cache {
            Some(cache) => Some(tokio::select! {
                biased;
                _ = cx.cancelled() => return Err(cancelled(&cx)),
                claim = cache.claim(&key) => claim,
            }),
            None => None,
        };
        cx.checkpoint()?;

        // A checksum pins the content, so a verified entry needs no request.
        // Without one the server decides whether the entry is still current.
        let revalidate = match (&self.cache, self.descriptor.checksum()) {
            (Some(_), Some(_)) => {
                if let Some(path) = self.restore_cached(&key, &dest).await {
                    debug!("Cache hit for {} ({})", self.descriptor.file_name(), key);
                    cx.set_progress_ratio(1.0);
                    return Ok(path);
                }
                None
            }
            (Some(cache), None) => cache.lookup(&key),
            (None, _) => None,
        };

        let fetched = match self.fetch(&cx, revalidate.as_ref()).await? {
            Fetched::NotModified => {
                if let Some(path) = self.restore_cached(&key, &dest).await {
                    debug!("{} not modified, restored from cache", self.descriptor.file_name());
                    cx.set_progress_ratio(1.0);
                    return Ok(path);
                }
                self.fetch(&cx, None).await?
            }
            fetched => fetched,
        };
        let Fetched::Downloaded {
            url,
            checksum,
            validators,
        } = fetched
        else {
            return Err(EngineError::Other(format!(
                "{}: server reported an unchanged file that is not cached",
                cx.tag()
            )));
        };

        if let Some(cache) = &self.cache {
            if let Err(e) = cache
                .insert_fetched(&key, &dest, &checksum, &url, validators)
                .await
            {
                warn!("Could not cache {}: {}", key, e);
            }
        }
        Ok(dest)
    }
}

fn cancelled(cx: &TaskContext) -> EngineError {
    EngineError::Cancelled {
        tag: cx.tag().to_string(),
    }
}

/// Temporary sibling of a download destination, removed on drop unless
/// committed.
struct PartialFile {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    committed: bool,
}

impl PartialFile {
    async fn create(dest: &Path) -> EngineResult<Self> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::io(parent, e))?;
        }
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let path = dest.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4().simple()));
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| EngineError::io(&path, e))?;
        Ok(Self {
            path,
            file: Some(file),
            committed: false,
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> EngineResult<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(EngineError::Other(format!("{:?} already closed", self.path)));
        };
        file.write_all(chunk)
            .await
            .map_err(|e| EngineError::io(&self.path, e))
    }

    async fn commit(mut self, dest: &Path) -> EngineResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| EngineError::io(&self.path, e))?;
            // Handle must be closed before the rename on Windows.
            drop(file);
        }
        tokio::fs::rename(&self.path, dest)
            .await
            .map_err(|e| EngineError::io(dest, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
