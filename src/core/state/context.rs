use std::sync::Arc;

use tracing::info;

use super::settings::EngineSettings;
use crate::core::cache::CacheRepository;
use crate::core::downloader::{DownloadPolicy, HttpTransport, Transport};
use crate::core::error::EngineResult;
use crate::core::http::build_http_client;
use crate::core::scheduler::{ExecutionPool, Scheduler, TaskHandle};
use crate::core::task::Task;

/// Everything a task constructor needs, passed explicitly instead of living
/// in process-wide registries. Cheap to clone.
#[derive(Clone)]
pub struct EngineContext {
    settings: Arc<EngineSettings>,
    transport: Arc<dyn Transport>,
    cache: Arc<CacheRepository>,
    scheduler: Scheduler,
}

impl EngineContext {
    /// Real HTTP transport built from `settings`.
    pub fn new(settings: EngineSettings) -> EngineResult<Self> {
        let transport = Arc::new(HttpTransport::new(build_http_client(&settings)?));
        Self::assemble(settings, transport)
    }

    /// Same wiring with a caller-supplied transport.
    pub fn with_transport(
        settings: EngineSettings,
        transport: Arc<dyn Transport>,
    ) -> EngineResult<Self> {
        Self::assemble(settings, transport)
    }

    fn assemble(settings: EngineSettings, transport: Arc<dyn Transport>) -> EngineResult<Self> {
        let cache = Arc::new(CacheRepository::open(settings.cache_dir())?);
        let pool = Arc::new(ExecutionPool::new(settings.pool_size));
        let scheduler = Scheduler::new(pool).with_progress_interval(settings.progress_interval());
        info!("Engine ready (data dir {:?})", settings.data_dir);

        Ok(Self {
            settings: Arc::new(settings),
            transport,
            cache,
            scheduler,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn cache(&self) -> &Arc<CacheRepository> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn pool(&self) -> &Arc<ExecutionPool> {
        self.scheduler.pool()
    }

    pub fn download_policy(&self) -> DownloadPolicy {
        self.settings.download_policy()
    }

    pub fn submit<R>(&self, task: Task<R>) -> EngineResult<TaskHandle<R>>
    where
        R: Clone + Send + Sync + 'static,
    {
        self.scheduler.submit(task)
    }

    /// Aborts queued work, cancels running bodies and waits for them.
    pub async fn shutdown(&self) {
        self.scheduler.pool().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::downloader::test_helpers::ScriptedTransport;
    use crate::core::downloader::{digest_bytes, Checksum, DownloadDescriptor, DownloadTask, HashAlgorithm};
    use crate::core::task::TaskState;

    #[tokio::test]
    async fn batch_downloads_through_the_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = EngineSettings::in_dir(dir.path());
        settings.pool_size = 2;
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_bytes("https://libs/a.jar", b"a".to_vec())
                .with_bytes("https://libs/b.jar", b"bb".to_vec())
                .with_bytes("https://libs/c.jar", b"ccc".to_vec()),
        );
        let ctx = EngineContext::with_transport(settings, transport.clone()).unwrap();

        let descriptors = ["a", "b", "c"]
            .iter()
            .zip([&b"a"[..], &b"bb"[..], &b"ccc"[..]])
            .map(|(name, data)| {
                DownloadDescriptor::builder(dir.path().join("libs").join(format!("{name}.jar")))
                    .url(format!("https://libs/{name}.jar"))
                    .checksum(Checksum::sha1(&digest_bytes(HashAlgorithm::Sha1, data)).unwrap())
                    .build()
                    .unwrap()
            })
            .collect();
        let batch = DownloadTask::batch(&ctx, "libraries", descriptors);

        let report = ctx.submit(batch).unwrap().wait().await;

        assert_eq!(report.state, TaskState::Succeeded);
        assert_eq!(report.result.unwrap().len(), 3);
        assert_eq!(transport.calls().len(), 3);
        assert_eq!(ctx.cache().len(), 3);
        assert!(ctx.pool().peak_running() <= 2);
        assert!(dir.path().join("cache").join("index.json").exists());
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = EngineContext::with_transport(
            EngineSettings::in_dir(dir.path()),
            Arc::new(ScriptedTransport::new()),
        )
        .unwrap();

        ctx.shutdown().await;
        assert!(ctx.pool().is_shut_down());
        assert!(ctx.submit(Task::supply("late", |_cx| async { Ok(()) })).is_err());
    }
}
