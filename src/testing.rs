//! In-crate fakes for collaborator traits, shared by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::BoxError;
use crate::api::{GenerationRequest, TextGenerator};
use crate::config::FeedSource;
use crate::models::{DraftArticle, SourceItem};
use crate::sources::feed::FeedReader;

type Script = Box<dyn Fn(&GenerationRequest) -> Result<String, String> + Send + Sync>;

/// Text generator answering through a closure and recording every request.
pub struct ScriptedGenerator {
    script: Script,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(
        script: impl Fn(&GenerationRequest) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BoxError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.script)(request).map_err(|e| e.into())
    }
}

/// Feed reader serving canned items per feed URL.
#[derive(Default)]
pub struct StaticFeedReader {
    pub feeds: HashMap<String, Vec<SourceItem>>,
    pub reads: AtomicUsize,
}

impl StaticFeedReader {
    pub fn with(mut self, url: &str, items: Vec<SourceItem>) -> Self {
        self.feeds.insert(url.to_string(), items);
        self
    }
}

#[async_trait]
impl FeedReader for StaticFeedReader {
    async fn read(&self, feed: &FeedSource) -> Vec<SourceItem> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.feeds.get(&feed.url).cloned().unwrap_or_default()
    }
}

pub fn source_item(title: &str) -> SourceItem {
    SourceItem {
        url: format!("https://example.com/{}", crate::utils::slugify_title(title)),
        title: title.to_string(),
        snippet: format!("Snippet about {title}"),
        source_name: "example.com".to_string(),
        publish_date: None,
    }
}

pub fn feed(url: &str, category: &str) -> FeedSource {
    FeedSource {
        url: url.to_string(),
        category: category.to_string(),
        language: "en".to_string(),
        enabled: true,
    }
}

pub fn draft(title: &str, category: &str) -> DraftArticle {
    DraftArticle {
        id: format!("draft-{}", crate::utils::slugify_title(title)),
        topic_id: "topic-1".to_string(),
        title: title.to_string(),
        teaser: format!("Teaser for {title}"),
        content: format!("Body of {title}"),
        category: category.to_string(),
        tags: vec!["tag".to_string()],
        sources: vec!["https://example.com/src".to_string()],
        language: "en".to_string(),
        drafted_at: chrono::Utc::now(),
    }
}

/// JSON reply a drafting model would give for `title`.
pub fn draft_reply(title: &str) -> String {
    serde_json::json!({
        "title": title,
        "teaser": format!("Why {title} matters"),
        "content": format!("## Background\n\nA full body about {title}."),
        "tags": ["alpha", "beta", "alpha"],
    })
    .to_string()
}

/// Text generator that parks every request until [`GatedGenerator::open`],
/// then fails it.
pub struct GatedGenerator {
    gate: tokio::sync::Semaphore,
}

impl GatedGenerator {
    pub fn closed() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            gate: tokio::sync::Semaphore::new(0),
        })
    }

    pub fn open(&self) {
        self.gate.add_permits(tokio::sync::Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl TextGenerator for GatedGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, BoxError> {
        let _permit = self.gate.acquire().await?;
        Err("released".into())
    }
}
