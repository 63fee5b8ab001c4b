//! GitHub-backed content store client.
//!
//! Thin plumbing over the repository contents, commits and actions REST
//! endpoints. No retries live here; the synchronizer retries whole cycles.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;

use super::{
    EntryKind, ListEntry, RemoteBlob, RemoteStore, StoreBootstrap, StoreError,
    BOOTSTRAP_SECRET_NAME, COMPACTION_WORKFLOW_PATH,
};
use crate::config::Config;
use crate::utils::errors::CourierError;

const API_BASE: &str = "https://api.github.com";

pub struct GithubStore {
    http: reqwest::Client,
    owner: String,
    repo: String,
    branch: String,
}

impl GithubStore {
    /// Build a client for the configured repository. An unparsable proxy
    /// URL is a fatal configuration error.
    pub fn new(config: &Config) -> crate::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| CourierError::Config("BAK_TOKEN contains invalid characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("backup-courier/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);
        if let Some(url) = &config.proxy_url {
            let proxy = reqwest::Proxy::all(url)
                .map_err(|e| CourierError::Config(format!("invalid proxy URL {url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| CourierError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            owner: config.owner.clone(),
            repo: config.store_name.clone(),
            branch: config.branch.clone(),
        })
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!("{API_BASE}/repos/{}/{}/{suffix}", self.owner, self.repo)
    }

    fn contents_url(&self, path: &str) -> String {
        self.repo_url(&format!("contents/{path}"))
    }
}

/// Map a non-success response to the store error taxonomy.
async fn check(resp: reqwest::Response, path: &str) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StoreError::NotFound(path.to_string()));
    }
    if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
        return Err(StoreError::Conflict(path.to_string()));
    }
    let message = resp.text().await.unwrap_or_default();
    Err(StoreError::Api {
        status: status.as_u16(),
        path: path.to_string(),
        message,
    })
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

impl From<ContentEntry> for ListEntry {
    fn from(e: ContentEntry) -> Self {
        ListEntry {
            name: e.name,
            path: e.path,
            kind: if e.kind == "dir" { EntryKind::Dir } else { EntryKind::File },
            size: e.size,
            version: e.sha,
            download_ref: e.download_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitItem {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    author: Option<CommitSig>,
    committer: Option<CommitSig>,
}

#[derive(Debug, Deserialize)]
struct CommitSig {
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ActionsPublicKey {
    key_id: String,
    key: String,
}

#[async_trait]
impl RemoteStore for GithubStore {
    async fn get_blob(&self, path: &str) -> Result<RemoteBlob, StoreError> {
        let url = format!("{}?ref={}", self.contents_url(path), self.branch);
        let resp = check(self.http.get(&url).send().await?, path).await?;
        let entry: ContentEntry = resp.json().await?;

        let content = match (entry.encoding.as_deref(), entry.content) {
            (Some("base64"), Some(raw)) => {
                let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
                BASE64.decode(compact).map_err(|e| StoreError::Api {
                    status: 200,
                    path: path.to_string(),
                    message: format!("undecodable blob content: {e}"),
                })?
            }
            _ => Vec::new(),
        };

        Ok(RemoteBlob {
            path: entry.path,
            version: entry.sha,
            content,
        })
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<ListEntry>, StoreError> {
        let url = format!("{}?ref={}", self.contents_url(path), self.branch);
        let resp = check(self.http.get(&url).send().await?, path).await?;
        let entries: Vec<ContentEntry> = resp.json().await?;
        Ok(entries.into_iter().map(ListEntry::from).collect())
    }

    async fn create_blob(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), StoreError> {
        let body = serde_json::json!({
            "message": message,
            "content": BASE64.encode(content),
            "branch": self.branch,
        });
        let resp = self.http.put(self.contents_url(path)).json(&body).send().await?;
        check(resp, path).await?;
        Ok(())
    }

    async fn update_blob(
        &self,
        path: &str,
        content: &[u8],
        version: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let body = serde_json::json!({
            "message": message,
            "content": BASE64.encode(content),
            "sha": version,
            "branch": self.branch,
        });
        let resp = self.http.put(self.contents_url(path)).json(&body).send().await?;
        check(resp, path).await?;
        Ok(())
    }

    async fn delete_blob(&self, path: &str, version: &str, message: &str)
        -> Result<(), StoreError>
    {
        let body = serde_json::json!({
            "message": message,
            "sha": version,
            "branch": self.branch,
        });
        let resp = self.http.delete(self.contents_url(path)).json(&body).send().await?;
        check(resp, path).await?;
        Ok(())
    }

    async fn last_change(&self, path: &str) -> Result<DateTime<Utc>, StoreError> {
        let url = format!(
            "{}?path={path}&sha={}&per_page=1",
            self.repo_url("commits"),
            self.branch
        );
        let resp = check(self.http.get(&url).send().await?, path).await?;
        let commits: Vec<CommitItem> = resp.json().await?;
        let head = commits
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("no history for {path}")))?;
        head.commit
            .author
            .or(head.commit.committer)
            .map(|sig| sig.date)
            .ok_or_else(|| StoreError::Api {
                status: 200,
                path: path.to_string(),
                message: "commit carries no timestamp".to_string(),
            })
    }

    async fn download(&self, download_ref: &str) -> Result<Vec<u8>, StoreError> {
        let resp = check(self.http.get(download_ref).send().await?, download_ref).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl StoreBootstrap for GithubStore {
    async fn grant_workflow_write(&self) -> Result<(), StoreError> {
        let url = self.repo_url("actions/permissions/workflow");
        let body = serde_json::json!({ "default_workflow_permissions": "write" });
        let resp = self.http.put(&url).json(&body).send().await?;
        check(resp, "actions/permissions/workflow").await?;
        Ok(())
    }

    async fn provision_secret(&self, name: &str, value: &str) -> Result<(), StoreError> {
        let url = self.repo_url("actions/secrets/public-key");
        let resp = check(self.http.get(&url).send().await?, "actions/secrets/public-key").await?;
        let key: ActionsPublicKey = resp.json().await?;

        let key_bytes = BASE64
            .decode(key.key)
            .map_err(|e| StoreError::Secret(format!("undecodable public key: {e}")))?;
        let key_bytes: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Secret("public key is not 32 bytes".to_string()))?;
        let public_key = crypto_box::PublicKey::from(key_bytes);
        let sealed = public_key
            .seal(&mut OsRng, value.as_bytes())
            .map_err(|e| StoreError::Secret(e.to_string()))?;

        let url = self.repo_url(&format!("actions/secrets/{name}"));
        let body = serde_json::json!({
            "encrypted_value": BASE64.encode(sealed),
            "key_id": key.key_id,
        });
        let resp = self.http.put(&url).json(&body).send().await?;
        check(resp, name).await?;
        Ok(())
    }

    async fn install_compaction_job(&self) -> Result<(), StoreError> {
        let workflow = compaction_workflow(&self.branch);
        self.create_blob(
            COMPACTION_WORKFLOW_PATH,
            workflow.as_bytes(),
            "Install scheduled history compaction",
        )
        .await
    }
}

/// Monthly workflow that rewrites the store history to a single commit, so
/// accumulated snapshot churn never grows the repository without bound.
fn compaction_workflow(branch: &str) -> String {
    const TEMPLATE: &str = r#"name: Squash history

on:
  schedule:
    - cron: '0 3 1 * *'
  workflow_dispatch: {}

jobs:
  squash:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
        with:
          ref: __BRANCH__
          fetch-depth: 0
          token: ${{ secrets.__SECRET__ }}
      - name: Rewrite history to a single commit
        run: |
          git config user.name "backup-courier"
          git config user.email "backup-courier@users.noreply.github.com"
          git checkout --orphan compacted
          git add -A
          git commit -m "Compact history"
          git branch -M __BRANCH__
          git push --force origin __BRANCH__
"#;
    TEMPLATE
        .replace("__BRANCH__", branch)
        .replace("__SECRET__", BOOTSTRAP_SECRET_NAME)
}
