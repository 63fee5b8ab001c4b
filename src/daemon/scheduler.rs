//! Cron-driven backup scheduling.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::store::{RemoteStore, StoreBootstrap};
use crate::sync::Synchronizer;

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
}

impl BackupScheduler {
    pub async fn new() -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Register the recurring backup job. A tick that lands while a cycle
    /// is still running is skipped by the synchronizer itself.
    pub async fn schedule<S>(&self, cron: &str, sync: Arc<Synchronizer<S>>) -> anyhow::Result<()>
    where
        S: RemoteStore + StoreBootstrap + 'static,
    {
        let job = Job::new_async(cron, move |_uuid, _lock| {
            let sync = sync.clone();
            Box::pin(async move {
                sync.tick().await;
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron, "Backup job scheduled");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
