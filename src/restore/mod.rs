//! Startup restore of the most recent snapshot.

use crate::archive;
use crate::config::Config;
use crate::store::RemoteStore;
use crate::utils::errors::Result;

/// Replay the newest remote snapshot onto the watched directory.
///
/// Finding nothing to restore is not an error; the daemon starts with the
/// local directory as-is and begins producing fresh snapshots. Callers
/// treat any returned error as non-fatal too.
pub async fn run<S: RemoteStore + ?Sized>(store: &S, config: &Config) -> Result<()> {
    let listing = match store.list_dir(&config.app_name).await {
        Ok(entries) => entries,
        Err(e) if e.is_not_found() => {
            tracing::info!(app = %config.app_name, "No remote snapshots, starting fresh");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    // Listing order is name-ascending; timestamp-encoded names make the
    // last file entry the newest snapshot.
    let Some(latest) = listing.iter().filter(|e| e.is_file()).last() else {
        tracing::info!(app = %config.app_name, "No remote snapshots, starting fresh");
        return Ok(());
    };
    let Some(download_ref) = latest.download_ref.as_deref() else {
        tracing::warn!(path = %latest.path, "Newest snapshot has no download reference, skipping restore");
        return Ok(());
    };

    tracing::debug!(path = %latest.path, size = latest.size, "Downloading latest snapshot");
    let bytes = store.download(download_ref).await?;

    let staging = std::env::temp_dir().join(&latest.name);
    tokio::fs::write(&staging, &bytes).await?;

    let dest = config.watch_dir.clone();
    let archive_path = staging.clone();
    tokio::task::spawn_blocking(move || archive::unpack(&archive_path, &dest)).await??;
    tokio::fs::remove_file(&staging).await?;

    tracing::info!(
        snapshot = %latest.name,
        dir = %config.watch_dir.display(),
        "Restored latest snapshot"
    );
    Ok(())
}
