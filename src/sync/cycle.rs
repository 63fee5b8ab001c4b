//! One backup cycle: archive, upsert, prune, manifest.
//!
//! The synchronizer assumes it is the store's sole writer while a cycle
//! runs, so ticks are serialized through a busy flag and the whole cycle
//! is retried as a unit on failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::archive::{self, ARCHIVE_EXT};
use crate::config::Config;
use crate::store::{
    RemoteStore, StoreBootstrap, BOOTSTRAP_SECRET_NAME, COMPACTION_WORKFLOW_PATH,
};
use crate::sync::{manifest, prune};
use crate::utils::errors::Result;

/// Attempts per scheduled tick before yielding to the next one.
const CYCLE_ATTEMPTS: u32 = 3;

/// Fixed delay between attempts.
const CYCLE_RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct Synchronizer<S> {
    store: Arc<S>,
    config: Arc<Config>,
    busy: AtomicBool,
}

impl<S: RemoteStore + StoreBootstrap> Synchronizer<S> {
    pub fn new(store: Arc<S>, config: Arc<Config>) -> Self {
        Self {
            store,
            config,
            busy: AtomicBool::new(false),
        }
    }

    /// Scheduler entry point. Skips when the previous cycle is still
    /// running; failures stop at the cycle boundary.
    pub async fn tick(&self) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Skipping scheduled backup: previous cycle still running");
            return;
        }
        if let Err(e) = self.run_cycle_with_retry().await {
            tracing::error!(error = %e, "Backup cycle failed, yielding to next tick");
        }
        self.busy.store(false, Ordering::SeqCst);
    }

    /// Run one cycle, retrying the whole sequence a bounded number of
    /// times. Each retry re-reads remote state, so a lost race is resolved
    /// with fresh data rather than a stale token.
    pub async fn run_cycle_with_retry(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_cycle().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < CYCLE_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "Backup cycle attempt failed, retrying");
                    tokio::time::sleep(CYCLE_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn run_cycle(&self) -> Result<()> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Cycle body with an injectable capture time. A rerun within the same
    /// minute resolves to the same blob path and degrades to an update.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<()> {
        self.bootstrap_if_needed().await;

        let source = self.config.watch_dir.clone();
        let bytes = tokio::task::spawn_blocking(move || archive::pack_dir(&source)).await??;

        let blob_path = format!("{}/{}", self.config.app_name, snapshot_file_name(now));
        self.upsert(&blob_path, &bytes).await?;
        tracing::info!(path = %blob_path, bytes = bytes.len(), "Snapshot uploaded");

        self.prune_excess().await?;
        self.publish_manifest(now).await?;
        Ok(())
    }

    /// Create-or-update a blob. Only a NotFound read selects the create
    /// path; a failed read says nothing about existence, so creating on it
    /// could shadow a live blob.
    async fn upsert(&self, path: &str, content: &[u8]) -> Result<()> {
        match self.store.get_blob(path).await {
            Ok(existing) => {
                self.store
                    .update_blob(path, content, &existing.version, &format!("Update {path}"))
                    .await?;
            }
            Err(e) if e.is_not_found() => {
                self.store
                    .create_blob(path, content, &format!("Add {path}"))
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Delete snapshots beyond the retention window, oldest first. Each
    /// deletion is independent; a failed one stays visible in the next
    /// listing and is retried then.
    async fn prune_excess(&self) -> Result<()> {
        let listing = match self.store.list_dir(&self.config.app_name).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let snapshots: Vec<_> = listing.into_iter().filter(|e| e.is_file()).collect();

        for entry in prune::excess_prefix(&snapshots, self.config.retention) {
            match self
                .store
                .delete_blob(&entry.path, &entry.version, "Expire old snapshot")
                .await
            {
                Ok(()) => tracing::debug!(path = %entry.path, "Expired snapshot deleted"),
                Err(e) => {
                    tracing::warn!(path = %entry.path, error = %e, "Failed to delete expired snapshot")
                }
            }
        }
        Ok(())
    }

    async fn publish_manifest(&self, now: DateTime<Utc>) -> Result<()> {
        let Some(doc) = manifest::build(self.store.as_ref(), &self.config.store_name, now).await?
        else {
            return Ok(());
        };
        self.upsert(manifest::MANIFEST_PATH, doc.as_bytes()).await
    }

    /// One-time store setup, guarded by the compaction workflow sentinel.
    /// Failures are logged and never abort the cycle; the sentinel is only
    /// written by a successful install, so a failed attempt runs again on
    /// the next cycle.
    async fn bootstrap_if_needed(&self) {
        match self.store.get_blob(COMPACTION_WORKFLOW_PATH).await {
            Ok(_) => return,
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!(error = %e, "Could not probe bootstrap sentinel");
                return;
            }
        }

        tracing::info!("Uninitialized store, performing one-time bootstrap");
        if let Err(e) = self.store.grant_workflow_write().await {
            tracing::warn!(error = %e, "Bootstrap: workflow write grant failed");
        }
        if let Err(e) = self
            .store
            .provision_secret(BOOTSTRAP_SECRET_NAME, &self.config.token)
            .await
        {
            tracing::warn!(error = %e, "Bootstrap: secret provisioning failed");
        }
        if let Err(e) = self.store.install_compaction_job().await {
            tracing::warn!(error = %e, "Bootstrap: compaction workflow install failed");
        }
    }
}

/// Snapshot blob file name: UTC capture time truncated to the minute.
pub fn snapshot_file_name(now: DateTime<Utc>) -> String {
    format!("{}.{ARCHIVE_EXT}", now.format("%Y%m%d%H%M"))
}
