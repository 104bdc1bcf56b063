//! JSON-on-disk store.
//!
//! # Layout
//!
//! ```text
//! data_dir/
//! └── tenants/
//!     └── {tenant}/
//!         ├── settings.json        # key → JSON value
//!         ├── runs.jsonl           # one AgentRunLog per line, append-only
//!         └── articles/
//!             ├── {slug}.json
//!             └── {slug}-2.json
//! ```
//!
//! Article files are created with exclusive-create, so two writers can
//! never claim the same slug.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{ArticleStore, RunLogStore, SettingsStore};
use crate::BoxError;
use crate::models::{AgentRunLog, NewArticle, StoredArticle};
use crate::utils::{ensure_writable_dir, slugify_title};

/// Upper bound on slug suffixes tried before giving up.
const MAX_SLUG_SUFFIX: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArticleRecord {
    id: String,
    #[serde(flatten)]
    article: NewArticle,
}

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Serialises read-modify-write cycles on settings files.
    settings_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `data_dir`.
    pub async fn open(data_dir: &str) -> Result<Self, BoxError> {
        ensure_writable_dir(data_dir).await?;
        info!(%data_dir, "Opened file store");
        Ok(Self {
            root: PathBuf::from(data_dir),
            settings_lock: Mutex::new(()),
        })
    }

    fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        let safe = slugify_title(tenant_id);
        let safe = if safe.is_empty() { "default".to_string() } else { safe };
        self.root.join("tenants").join(safe)
    }

    fn settings_path(&self, tenant_id: &str) -> PathBuf {
        self.tenant_dir(tenant_id).join("settings.json")
    }

    fn articles_dir(&self, tenant_id: &str) -> PathBuf {
        self.tenant_dir(tenant_id).join("articles")
    }

    fn runs_path(&self, tenant_id: &str) -> PathBuf {
        self.tenant_dir(tenant_id).join("runs.jsonl")
    }

    async fn read_settings(path: &Path) -> Result<BTreeMap<String, Value>, BoxError> {
        match fs::read_to_string(path).await {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Box::new(e)),
        }
    }
}

#[async_trait]
impl SettingsStore for FileStore {
    async fn get(&self, tenant_id: &str, key: &str) -> Result<Option<Value>, BoxError> {
        let settings = Self::read_settings(&self.settings_path(tenant_id)).await?;
        Ok(settings.get(key).cloned())
    }

    #[instrument(level = "debug", skip(self, value))]
    async fn set(&self, tenant_id: &str, key: &str, value: Value) -> Result<(), BoxError> {
        let _guard = self.settings_lock.lock().await;
        let path = self.settings_path(tenant_id);
        let mut settings = Self::read_settings(&path).await?;
        settings.insert(key.to_string(), value);

        fs::create_dir_all(self.tenant_dir(tenant_id)).await?;
        // Write-then-rename keeps readers from seeing a half-written file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&settings)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for FileStore {
    #[instrument(level = "info", skip_all, fields(tenant = %article.tenant_id, slug = %article.slug))]
    async fn create(&self, article: NewArticle) -> Result<StoredArticle, BoxError> {
        let dir = self.articles_dir(&article.tenant_id);
        fs::create_dir_all(&dir).await?;

        let base = match slugify_title(&article.slug) {
            s if s.is_empty() => "article".to_string(),
            s => s,
        };

        for n in 1..=MAX_SLUG_SUFFIX {
            let slug = if n == 1 { base.clone() } else { format!("{base}-{n}") };
            let path = dir.join(format!("{slug}.json"));
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(%slug, "Slug taken");
                    continue;
                }
                Err(e) => return Err(Box::new(e)),
            };

            let record = ArticleRecord {
                id: Uuid::new_v4().to_string(),
                article: NewArticle {
                    slug: slug.clone(),
                    ..article
                },
            };
            file.write_all(&serde_json::to_vec_pretty(&record)?).await?;
            file.flush().await?;
            info!(path = %path.display(), "Stored article");
            return Ok(StoredArticle {
                id: record.id,
                slug,
            });
        }
        Err(format!("no free slug for `{base}` after {MAX_SLUG_SUFFIX} attempts").into())
    }

    async fn titles(&self, tenant_id: &str) -> Result<Vec<String>, BoxError> {
        let dir = self.articles_dir(tenant_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Box::new(e)),
        };

        let mut titles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path).await?;
            match serde_json::from_str::<ArticleRecord>(&raw) {
                Ok(record) => titles.push(record.article.title),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable article file"),
            }
        }
        Ok(titles)
    }
}

#[async_trait]
impl RunLogStore for FileStore {
    #[instrument(level = "info", skip_all, fields(tenant = %log.tenant_id, status = ?log.status))]
    async fn append(&self, log: &AgentRunLog) -> Result<(), BoxError> {
        fs::create_dir_all(self.tenant_dir(&log.tenant_id)).await?;
        let mut line = serde_json::to_string(log)?;
        line.push('\n');

        let path = self.runs_path(&log.tenant_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        info!(path = %path.display(), "Appended run log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunStatus;
    use chrono::Utc;

    async fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_str().unwrap()).await.unwrap();
        (dir, store)
    }

    fn article(tenant: &str, title: &str) -> NewArticle {
        NewArticle {
            tenant_id: tenant.to_string(),
            title: title.to_string(),
            slug: slugify_title(title),
            teaser: "t".to_string(),
            content: "c".to_string(),
            category: "news".to_string(),
            tags: vec![],
            sources: vec![],
            language: "en".to_string(),
            image_url: Some("/ph/news.jpg".to_string()),
            quality_score: 8,
            agent_generated: true,
            published_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_settings_roundtrip_per_tenant() {
        let (_dir, store) = store().await;
        assert!(store.get("acme", "agentConfig").await.unwrap().is_none());

        store
            .set("acme", "agentConfig", serde_json::json!({"enabled": false}))
            .await
            .unwrap();
        store
            .set("acme", "workerLastRun", serde_json::json!({"result": "ok"}))
            .await
            .unwrap();

        let cfg = store.get("acme", "agentConfig").await.unwrap().unwrap();
        assert_eq!(cfg["enabled"], false);
        assert!(store.get("acme", "workerLastRun").await.unwrap().is_some());
        assert!(store.get("globex", "agentConfig").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_article_slugs_are_unique_per_tenant() {
        let (dir, store) = store().await;

        let first = store.create(article("acme", "Storm Hits Coast")).await.unwrap();
        let second = store.create(article("acme", "Storm hits coast!")).await.unwrap();
        let other = store.create(article("globex", "Storm Hits Coast")).await.unwrap();

        assert_eq!(first.slug, "storm-hits-coast");
        assert_eq!(second.slug, "storm-hits-coast-2");
        assert_eq!(other.slug, "storm-hits-coast");
        assert_ne!(first.id, second.id);

        let saved = std::fs::read_to_string(
            dir.path().join("tenants/acme/articles/storm-hits-coast-2.json"),
        )
        .unwrap();
        let value: Value = serde_json::from_str(&saved).unwrap();
        assert_eq!(value["agentGenerated"], true);
        assert_eq!(value["slug"], "storm-hits-coast-2");

        let mut titles = store.titles("acme").await.unwrap();
        titles.sort();
        assert_eq!(titles, vec!["Storm Hits Coast", "Storm hits coast!"]);
    }

    #[tokio::test]
    async fn test_titles_for_unknown_tenant_is_empty() {
        let (_dir, store) = store().await;
        assert!(store.titles("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_logs_append_as_lines() {
        let (dir, store) = store().await;
        let mut log = AgentRunLog::start("content-pipeline", "acme");
        log.finish(RunStatus::Completed);
        store.append(&log).await.unwrap();
        log.finish(RunStatus::Failed);
        store.append(&log).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("tenants/acme/runs.jsonl")).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let last: AgentRunLog = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last.status, RunStatus::Failed);
    }

    #[test]
    fn test_tenant_ids_cannot_escape_the_root() {
        let store = FileStore {
            root: PathBuf::from("/data"),
            settings_lock: Mutex::new(()),
        };
        assert_eq!(store.tenant_dir("../../etc"), PathBuf::from("/data/tenants/etc"));
        assert_eq!(store.tenant_dir(""), PathBuf::from("/data/tenants/default"));
    }
}
