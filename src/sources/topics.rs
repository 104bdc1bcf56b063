//! LLM-backed topic generator.
//!
//! When feeds cannot fill a category's quota, the gatherer asks the text
//! collaborator for a handful of plausible, current topic summaries and
//! turns each into a [`SourceItem`] with a synthesized search URL.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::api::{GenerationRequest, TextGenerator};
use crate::config::AiModelParams;
use crate::extract::extract_array;
use crate::models::SourceItem;
use crate::utils::{truncate_chars, truncate_for_log};

/// Topics requested per call.
pub const TOPICS_PER_REQUEST: usize = 3;

const GENERATED_SOURCE_NAME: &str = "Generated topic";

#[derive(Debug, Deserialize)]
struct TopicSuggestion {
    title: String,
    #[serde(default, alias = "description")]
    summary: String,
}

/// Produces topic material for a category from the text collaborator.
#[derive(Clone)]
pub struct TopicGenerator {
    generator: Arc<dyn TextGenerator>,
    params: AiModelParams,
}

impl TopicGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, params: AiModelParams) -> Self {
        Self { generator, params }
    }

    /// Ask for [`TOPICS_PER_REQUEST`] fresh topics in `category`.
    ///
    /// Returns an empty list on any collaborator or parse failure.
    #[instrument(level = "info", skip(self))]
    pub async fn generate(&self, category: &str, language: &str) -> Vec<SourceItem> {
        let now = Utc::now();
        let request = GenerationRequest::new(
            &self.params,
            SYSTEM_PROMPT.to_string(),
            topic_prompt(category, language, now),
        );

        let response = match self.generator.generate(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Topic generation request failed");
                return Vec::new();
            }
        };

        match extract_array::<TopicSuggestion>(&response) {
            Ok(suggestions) => {
                let items: Vec<SourceItem> = suggestions
                    .into_iter()
                    .filter(|s| !s.title.trim().is_empty())
                    .take(TOPICS_PER_REQUEST)
                    .map(|s| to_source_item(s, category, now))
                    .collect();
                info!(count = items.len(), "Generated topics");
                items
            }
            Err(e) => {
                warn!(
                    error = %e,
                    response_preview = %truncate_for_log(&response, 300),
                    "Topic response was not a usable list"
                );
                Vec::new()
            }
        }
    }
}

fn to_source_item(s: TopicSuggestion, category: &str, now: DateTime<Utc>) -> SourceItem {
    let query = format!("{} {}", s.title.trim(), category);
    SourceItem {
        url: format!(
            "https://news.google.com/search?q={}",
            urlencoding::encode(&query)
        ),
        title: s.title.trim().to_string(),
        snippet: truncate_chars(s.summary.trim(), crate::sources::feed::MAX_SNIPPET_CHARS),
        source_name: GENERATED_SOURCE_NAME.to_string(),
        publish_date: Some(now.to_rfc3339()),
    }
}

const SYSTEM_PROMPT: &str = "You are a news desk researcher. You propose timely, \
factual story topics and answer only with JSON.";

fn topic_prompt(category: &str, language: &str, now: DateTime<Utc>) -> String {
    format!(
        "Today is {date}. Suggest exactly {n} distinct story topics for the \"{category}\" \
         section, written in language \"{language}\".\n\
         Freshness rules:\n\
         - Only developments from the last 48 hours or ongoing stories with news in that window.\n\
         - Nothing from before {year} unless it is background to a current event.\n\
         - No evergreen filler.\n\
         Section guidance: {guidance}\n\
         Respond with a JSON array: [{{\"title\": \"...\", \"summary\": \"two or three sentences\"}}]",
        date = now.format("%A, %B %-d, %Y"),
        year = now.format("%Y"),
        n = TOPICS_PER_REQUEST,
        guidance = crate::pipeline::draft::category_guidance(category),
    )
}
