//! Data models for the content pipeline.
//!
//! Each stage produces the next model in the chain:
//! - [`SourceItem`]: raw material from a feed or the topic generator
//! - [`GatheredTopic`]: a unit of drafting work, one or more sources
//! - [`DraftArticle`]: the drafter's structured output
//! - [`EditedArticle`]: a revised draft carrying a quality score
//! - [`PublishedArticle`]: an edited article that made it into storage
//! - [`AgentRunLog`]: the audit record written once per pipeline run
//!
//! Fields serialize as camelCase, which is the shape both the LLM prompts
//! and the stored JSON documents use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One piece of raw material from a feed or the topic generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItem {
    pub url: String,
    pub title: String,
    /// Plain-text excerpt, bounded in length by the producer.
    pub snippet: String,
    pub source_name: String,
    /// ISO-8601 publish time when the source supplied one.
    pub publish_date: Option<String>,
}

/// A unit of drafting work for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatheredTopic {
    pub id: String,
    /// Category label the topic was gathered for.
    pub topic: String,
    pub category: String,
    pub sources: Vec<SourceItem>,
    pub gathered_at: DateTime<Utc>,
}

/// A drafted article. Only ever constructed fully populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftArticle {
    pub id: String,
    /// Back-reference to the [`GatheredTopic`] this draft came from.
    pub topic_id: String,
    pub title: String,
    pub teaser: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    /// Source URLs the draft was synthesized from.
    pub sources: Vec<String>,
    pub language: String,
    pub drafted_at: DateTime<Utc>,
}

/// A draft after the editing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditedArticle {
    #[serde(flatten)]
    pub draft: DraftArticle,
    pub edited_at: DateTime<Utc>,
    pub edit_notes: String,
    /// Always within `1..=10`.
    pub quality_score: u8,
}

/// An article that passed the quality gate and was persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedArticle {
    #[serde(flatten)]
    pub edited: EditedArticle,
    pub published_at: DateTime<Utc>,
    pub article_id: String,
    pub slug: String,
    pub image_url: Option<String>,
}

/// Terminal (or in-progress) state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Append-only audit record for one orchestrator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunLog {
    pub agent_name: String,
    pub tenant_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub items_processed: usize,
    pub items_successful: usize,
    pub items_failed: usize,
    pub errors: Vec<String>,
    /// Stage counts and other run facts.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AgentRunLog {
    pub fn start(agent_name: &str, tenant_id: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            tenant_id: tenant_id.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            items_processed: 0,
            items_successful: 0,
            items_failed: 0,
            errors: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Record a metadata fact, replacing any previous value for `key`.
    pub fn note(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Close the record with `status`.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// A new article as handed to the article store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewArticle {
    pub tenant_id: String,
    pub title: String,
    /// Requested slug; the store may suffix it to keep it unique.
    pub slug: String,
    pub teaser: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub sources: Vec<String>,
    pub language: String,
    pub image_url: Option<String>,
    pub quality_score: u8,
    pub agent_generated: bool,
    pub published_at: DateTime<Utc>,
}

/// Identity the article store assigned to a persisted article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArticle {
    pub id: String,
    pub slug: String,
}
