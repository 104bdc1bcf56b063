//! Persistence contracts used by the pipeline and the worker.
//!
//! - [`SettingsStore`]: per-tenant key/value settings (`agentConfig`, `workerLastRun`)
//! - [`ArticleStore`]: article creation with store-owned slug uniqueness
//! - [`RunLogStore`]: append-only run logs
//! - [`DuplicateChecker`]: title deduplication against a tenant's corpus
//!
//! [`file::FileStore`] implements the first three on the local filesystem.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::BoxError;
use crate::config::{AGENT_CONFIG_KEY, AgentConfigPatch};
use crate::models::{AgentRunLog, EditedArticle, NewArticle, StoredArticle};
use crate::utils::normalize_title;

pub mod file;
#[cfg(test)]
pub mod memory;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, tenant_id: &str, key: &str) -> Result<Option<Value>, BoxError>;
    async fn set(&self, tenant_id: &str, key: &str, value: Value) -> Result<(), BoxError>;
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Persist `article`. The store assigns the id and may suffix the slug
    /// to keep it unique within the tenant.
    async fn create(&self, article: NewArticle) -> Result<StoredArticle, BoxError>;

    /// Titles of every stored article for `tenant_id`.
    async fn titles(&self, tenant_id: &str) -> Result<Vec<String>, BoxError>;
}

#[async_trait]
pub trait RunLogStore: Send + Sync {
    async fn append(&self, log: &AgentRunLog) -> Result<(), BoxError>;
}

/// Articles split by the duplicate check.
#[derive(Debug, Default)]
pub struct Deduplicated {
    pub unique: Vec<EditedArticle>,
    /// Titles that were dropped as duplicates.
    pub duplicates: Vec<String>,
}

#[async_trait]
pub trait DuplicateChecker: Send + Sync {
    async fn dedupe(
        &self,
        tenant_id: &str,
        articles: Vec<EditedArticle>,
    ) -> Result<Deduplicated, BoxError>;
}

/// Normalised exact-title matching against the tenant's stored titles and
/// the rest of the batch.
#[derive(Clone)]
pub struct TitleDeduplicator {
    articles: Arc<dyn ArticleStore>,
}

impl TitleDeduplicator {
    pub fn new(articles: Arc<dyn ArticleStore>) -> Self {
        Self { articles }
    }
}

#[async_trait]
impl DuplicateChecker for TitleDeduplicator {
    #[instrument(level = "info", skip_all, fields(tenant = %tenant_id, count = articles.len()))]
    async fn dedupe(
        &self,
        tenant_id: &str,
        articles: Vec<EditedArticle>,
    ) -> Result<Deduplicated, BoxError> {
        let mut seen: HashSet<String> = self
            .articles
            .titles(tenant_id)
            .await?
            .iter()
            .map(|t| normalize_title(t))
            .collect();

        let mut out = Deduplicated::default();
        for article in articles {
            if seen.insert(normalize_title(&article.draft.title)) {
                out.unique.push(article);
            } else {
                debug!(title = %article.draft.title, "Duplicate title");
                out.duplicates.push(article.draft.title);
            }
        }
        Ok(out)
    }
}

/// The tenant's persisted configuration layer, if any.
pub async fn load_agent_config(
    settings: &dyn SettingsStore,
    tenant_id: &str,
) -> Result<Option<AgentConfigPatch>, BoxError> {
    match settings.get(tenant_id, AGENT_CONFIG_KEY).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Overlay `patch` onto the tenant's persisted configuration layer.
pub async fn update_agent_config(
    settings: &dyn SettingsStore,
    tenant_id: &str,
    patch: &AgentConfigPatch,
) -> Result<(), BoxError> {
    let mut current = match settings.get(tenant_id, AGENT_CONFIG_KEY).await? {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    if let Value::Object(updates) = serde_json::to_value(patch)? {
        current.extend(updates);
    }
    settings
        .set(tenant_id, AGENT_CONFIG_KEY, Value::Object(current))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testing::draft;
    use chrono::Utc;

    fn edited(title: &str) -> EditedArticle {
        crate::pipeline::edit::fallback(draft(title, "news"))
    }

    fn new_article(title: &str) -> NewArticle {
        NewArticle {
            tenant_id: "acme".to_string(),
            title: title.to_string(),
            slug: crate::utils::slugify_title(title),
            teaser: String::new(),
            content: String::new(),
            category: "news".to_string(),
            tags: vec![],
            sources: vec![],
            language: "en".to_string(),
            image_url: None,
            quality_score: 8,
            agent_generated: true,
            published_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_title_deduplicator_checks_corpus_and_batch() {
        let store = Arc::new(MemoryStore::default());
        store.create(new_article("Markets Rally Again")).await.unwrap();
        let checker = TitleDeduplicator::new(store);

        let result = checker
            .dedupe(
                "acme",
                vec![
                    edited("markets rally, again!"),
                    edited("Storm Hits Coast"),
                    edited("Storm hits coast"),
                    edited("New Budget"),
                ],
            )
            .await
            .unwrap();

        let unique: Vec<&str> = result.unique.iter().map(|a| a.draft.title.as_str()).collect();
        assert_eq!(unique, vec!["Storm Hits Coast", "New Budget"]);
        assert_eq!(result.duplicates.len(), 2);
    }

    #[tokio::test]
    async fn test_other_tenants_do_not_count_as_duplicates() {
        let store = Arc::new(MemoryStore::default());
        let mut other = new_article("Shared Headline");
        other.tenant_id = "globex".to_string();
        store.create(other).await.unwrap();

        let result = TitleDeduplicator::new(store)
            .dedupe("acme", vec![edited("Shared Headline")])
            .await
            .unwrap();
        assert_eq!(result.unique.len(), 1);
    }

    #[tokio::test]
    async fn test_update_agent_config_merges_fields() {
        let store = MemoryStore::default();
        let first = AgentConfigPatch {
            max_articles_per_run: Some(3),
            ..Default::default()
        };
        let second = AgentConfigPatch {
            cron_schedule: Some("0 15 * * * *".to_string()),
            ..Default::default()
        };
        update_agent_config(&store, "acme", &first).await.unwrap();
        update_agent_config(&store, "acme", &second).await.unwrap();

        let loaded = load_agent_config(&store, "acme").await.unwrap().unwrap();
        assert_eq!(loaded.max_articles_per_run, Some(3));
        assert_eq!(loaded.cron_schedule.as_deref(), Some("0 15 * * * *"));
        assert!(load_agent_config(&store, "nobody").await.unwrap().is_none());
    }
}
