//! In-memory store used by the synchronizer and restore unit tests.
//!
//! Behaves like the real store at the trait boundary: name-ordered
//! listings, content-hash version tokens verified on update/delete, and a
//! deterministic clock driving per-path change timestamps. Read failures
//! can be injected to exercise the upsert error paths.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use super::{
    EntryKind, ListEntry, RemoteBlob, RemoteStore, StoreBootstrap, StoreError,
    COMPACTION_WORKFLOW_PATH,
};

pub struct MemoryStore {
    state: Mutex<State>,
}

struct StoredBlob {
    content: Vec<u8>,
    version: String,
}

#[derive(Default)]
struct BootstrapLog {
    write_grants: usize,
    secrets: Vec<(String, String)>,
    workflow_installs: usize,
}

struct State {
    blobs: BTreeMap<String, StoredBlob>,
    changes: BTreeMap<String, DateTime<Utc>>,
    clock: DateTime<Utc>,
    fail_get: bool,
    create_calls: usize,
    bootstrap: BootstrapLog,
}

fn token_for(content: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                blobs: BTreeMap::new(),
                changes: BTreeMap::new(),
                clock: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                fail_get: false,
                create_calls: 0,
                bootstrap: BootstrapLog::default(),
            }),
        }
    }

    /// Place a blob directly, bypassing the trait (test seeding).
    pub fn seed_blob(&self, path: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.blobs.insert(
            path.to_string(),
            StoredBlob {
                content: content.to_vec(),
                version: token_for(content),
            },
        );
        touch(&mut state, path);
    }

    /// Make every subsequent `get_blob` fail with a non-NotFound error.
    pub fn set_fail_get(&self, fail: bool) {
        self.state.lock().unwrap().fail_get = fail;
    }

    /// Names of file blobs directly under `dir`, in listing order.
    pub fn blob_names(&self, dir: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let prefix = format!("{dir}/");
        state
            .blobs
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    pub fn blob_content(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.blobs.get(path).map(|b| b.content.clone())
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    /// (write grants, provisioned secrets, workflow installs)
    pub fn bootstrap_attempts(&self) -> (usize, usize, usize) {
        let state = self.state.lock().unwrap();
        (
            state.bootstrap.write_grants,
            state.bootstrap.secrets.len(),
            state.bootstrap.workflow_installs,
        )
    }
}

/// Advance the clock one minute and stamp the path and all its ancestors.
fn touch(state: &mut State, path: &str) {
    state.clock = state.clock + Duration::minutes(1);
    let now = state.clock;
    let mut prefix = String::new();
    for part in path.split('/') {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        state.changes.insert(prefix.clone(), now);
    }
}

fn insert_new(state: &mut State, path: &str, content: &[u8]) -> Result<(), StoreError> {
    if state.blobs.contains_key(path) {
        return Err(StoreError::Conflict(path.to_string()));
    }
    state.blobs.insert(
        path.to_string(),
        StoredBlob {
            content: content.to_vec(),
            version: token_for(content),
        },
    );
    touch(state, path);
    Ok(())
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_blob(&self, path: &str) -> Result<RemoteBlob, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_get {
            return Err(StoreError::Api {
                status: 503,
                path: path.to_string(),
                message: "injected transport failure".to_string(),
            });
        }
        let blob = state
            .blobs
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        Ok(RemoteBlob {
            path: path.to_string(),
            version: blob.version.clone(),
            content: blob.content.clone(),
        })
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<ListEntry>, StoreError> {
        let state = self.state.lock().unwrap();
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        let mut entries: Vec<ListEntry> = Vec::new();
        let mut seen_dirs: Vec<String> = Vec::new();
        for (key, blob) in &state.blobs {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            match rest.split_once('/') {
                None => entries.push(ListEntry {
                    name: rest.to_string(),
                    path: key.clone(),
                    kind: EntryKind::File,
                    size: blob.content.len() as u64,
                    version: blob.version.clone(),
                    download_ref: Some(format!("mem://{key}")),
                }),
                Some((dir, _)) => {
                    if !seen_dirs.iter().any(|d| d == dir) {
                        seen_dirs.push(dir.to_string());
                        let dir_path = if path.is_empty() {
                            dir.to_string()
                        } else {
                            format!("{path}/{dir}")
                        };
                        entries.push(ListEntry {
                            name: dir.to_string(),
                            path: dir_path,
                            kind: EntryKind::Dir,
                            size: 0,
                            version: String::new(),
                            download_ref: None,
                        });
                    }
                }
            }
        }

        if entries.is_empty() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(entries)
    }

    async fn create_blob(
        &self,
        path: &str,
        content: &[u8],
        _message: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        insert_new(&mut state, path, content)
    }

    async fn update_blob(
        &self,
        path: &str,
        content: &[u8],
        version: &str,
        _message: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let blob = state
            .blobs
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if blob.version != version {
            return Err(StoreError::Conflict(path.to_string()));
        }
        state.blobs.insert(
            path.to_string(),
            StoredBlob {
                content: content.to_vec(),
                version: token_for(content),
            },
        );
        touch(&mut state, path);
        Ok(())
    }

    async fn delete_blob(
        &self,
        path: &str,
        version: &str,
        _message: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let blob = state
            .blobs
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if blob.version != version {
            return Err(StoreError::Conflict(path.to_string()));
        }
        state.blobs.remove(path);
        touch(&mut state, path);
        Ok(())
    }

    async fn last_change(&self, path: &str) -> Result<DateTime<Utc>, StoreError> {
        let state = self.state.lock().unwrap();
        state
            .changes
            .get(path)
            .copied()
            .ok_or_else(|| StoreError::NotFound(format!("no history for {path}")))
    }

    async fn download(&self, download_ref: &str) -> Result<Vec<u8>, StoreError> {
        let path = download_ref
            .strip_prefix("mem://")
            .ok_or_else(|| StoreError::NotFound(download_ref.to_string()))?;
        let state = self.state.lock().unwrap();
        state
            .blobs
            .get(path)
            .map(|b| b.content.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl StoreBootstrap for MemoryStore {
    async fn grant_workflow_write(&self) -> Result<(), StoreError> {
        self.state.lock().unwrap().bootstrap.write_grants += 1;
        Ok(())
    }

    async fn provision_secret(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .bootstrap
            .secrets
            .push((name.to_string(), value.to_string()));
        Ok(())
    }

    async fn install_compaction_job(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.bootstrap.workflow_installs += 1;
        insert_new(&mut state, COMPACTION_WORKFLOW_PATH, b"name: Squash history\n")
    }
}
