//! In-process store used by tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{ArticleStore, RunLogStore, SettingsStore};
use crate::BoxError;
use crate::models::{AgentRunLog, NewArticle, StoredArticle};

#[derive(Default)]
pub struct MemoryStore {
    pub settings: Mutex<HashMap<(String, String), Value>>,
    pub articles: Mutex<Vec<(StoredArticle, NewArticle)>>,
    pub runs: Mutex<Vec<AgentRunLog>>,
    /// When set, every `create` fails with this message.
    pub fail_creates: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn article_count(&self) -> usize {
        lock(&self.articles).len()
    }

    pub fn run_logs(&self) -> Vec<AgentRunLog> {
        lock(&self.runs).clone()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, tenant_id: &str, key: &str) -> Result<Option<Value>, BoxError> {
        Ok(lock(&self.settings)
            .get(&(tenant_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, tenant_id: &str, key: &str, value: Value) -> Result<(), BoxError> {
        lock(&self.settings).insert((tenant_id.to_string(), key.to_string()), value);
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn create(&self, article: NewArticle) -> Result<StoredArticle, BoxError> {
        if let Some(msg) = lock(&self.fail_creates).clone() {
            return Err(msg.into());
        }
        let mut articles = lock(&self.articles);
        let taken = |slug: &str| {
            articles
                .iter()
                .any(|(s, a)| a.tenant_id == article.tenant_id && s.slug == slug)
        };
        let mut slug = article.slug.clone();
        let mut n = 1;
        while taken(&slug) {
            n += 1;
            slug = format!("{}-{}", article.slug, n);
        }
        let stored = StoredArticle {
            id: Uuid::new_v4().to_string(),
            slug,
        };
        articles.push((stored.clone(), article));
        Ok(stored)
    }

    async fn titles(&self, tenant_id: &str) -> Result<Vec<String>, BoxError> {
        Ok(lock(&self.articles)
            .iter()
            .filter(|(_, a)| a.tenant_id == tenant_id)
            .map(|(_, a)| a.title.clone())
            .collect())
    }
}

#[async_trait]
impl RunLogStore for MemoryStore {
    async fn append(&self, log: &AgentRunLog) -> Result<(), BoxError> {
        lock(&self.runs).push(log.clone());
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
