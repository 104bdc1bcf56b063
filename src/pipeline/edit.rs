//! Editing stage: revise each draft and score it.
//!
//! The editor never drops a draft. When the collaborator fails or its reply
//! cannot be parsed, the original draft passes through unchanged with a
//! note saying so and [`FALLBACK_QUALITY_SCORE`].

use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::api::{GenerationRequest, TextGenerator};
use crate::config::AiModelParams;
use crate::extract::{ExtractError, extract_object, require_non_empty};
use crate::models::{DraftArticle, EditedArticle};
use crate::utils::truncate_for_log;

/// Score given to drafts that could not be edited ("auto-approved without editing").
pub const FALLBACK_QUALITY_SCORE: u8 = 7;
/// Edits requested concurrently.
pub const EDIT_CONCURRENCY: usize = 4;

const FALLBACK_NOTE: &str = "Auto-approved without editing: the editing service was unavailable or returned an unusable response.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditReply {
    title: String,
    #[serde(default)]
    teaser: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, alias = "notes")]
    edit_notes: String,
    #[serde(default, alias = "score", deserialize_with = "lenient_score")]
    quality_score: Option<f64>,
}

/// Scores as models actually send them: `8`, `"8"`, `"8/10"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawScore {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

fn lenient_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawScore>::deserialize(deserializer)? {
        Some(RawScore::Number(n)) => Some(n),
        Some(RawScore::Text(text)) => text
            .split('/')
            .next()
            .and_then(|head| head.trim().parse::<f64>().ok()),
        Some(RawScore::Other(value)) => {
            debug!(%value, "Ignoring quality score of unexpected type");
            None
        }
        None => None,
    })
}

#[derive(Clone)]
pub struct Editor {
    generator: Arc<dyn TextGenerator>,
    params: AiModelParams,
}

impl Editor {
    pub fn new(generator: Arc<dyn TextGenerator>, params: AiModelParams) -> Self {
        Self { generator, params }
    }

    /// Edit every draft, up to [`EDIT_CONCURRENCY`] at a time. Output has
    /// one entry per input draft.
    #[instrument(level = "info", skip_all, fields(drafts = drafts.len()))]
    pub async fn edit_all(&self, drafts: Vec<DraftArticle>) -> Vec<EditedArticle> {
        let edited: Vec<EditedArticle> = stream::iter(drafts)
            .map(|draft| self.edit(draft))
            .buffer_unordered(EDIT_CONCURRENCY)
            .collect()
            .await;
        info!(count = edited.len(), "Editing complete");
        edited
    }

    /// Edit one draft; falls back to the draft itself on any failure.
    #[instrument(level = "info", skip_all, fields(draft_id = %draft.id))]
    pub async fn edit(&self, draft: DraftArticle) -> EditedArticle {
        let request = build_edit_request(&draft, &self.params);
        let response = match self.generator.generate(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Edit request failed; passing draft through");
                return fallback(draft);
            }
        };

        match apply_edit(&draft, &response) {
            Ok(edited) => {
                info!(score = edited.quality_score, "Edited article");
                edited
            }
            Err(e) => {
                warn!(
                    error = %e,
                    response_preview = %truncate_for_log(&response, 300),
                    "Edit reply unusable; passing draft through"
                );
                fallback(draft)
            }
        }
    }
}

/// Merge a parsed edit reply over `draft`.
pub fn apply_edit(draft: &DraftArticle, response: &str) -> Result<EditedArticle, ExtractError> {
    let reply: EditReply = extract_object(response)?;
    require_non_empty(&reply.title, "title")?;
    require_non_empty(&reply.content, "content")?;

    let mut notes = reply.edit_notes.trim().to_string();
    let quality_score = match reply.quality_score {
        Some(score) if score.is_finite() => clamp_score(score),
        _ => {
            if !notes.is_empty() {
                notes.push(' ');
            }
            notes.push_str("No quality score returned; default applied.");
            FALLBACK_QUALITY_SCORE
        }
    };

    let mut revised = draft.clone();
    revised.title = reply.title.trim().to_string();
    if !reply.teaser.trim().is_empty() {
        revised.teaser = reply.teaser.trim().to_string();
    }
    revised.content = reply.content.trim().to_string();
    let tags: Vec<String> = reply
        .tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .unique()
        .collect();
    if !tags.is_empty() {
        revised.tags = tags;
    }

    Ok(EditedArticle {
        draft: revised,
        edited_at: Utc::now(),
        edit_notes: notes,
        quality_score,
    })
}

/// Pass `draft` through untouched with the fallback note and score.
pub fn fallback(draft: DraftArticle) -> EditedArticle {
    EditedArticle {
        draft,
        edited_at: Utc::now(),
        edit_notes: FALLBACK_NOTE.to_string(),
        quality_score: FALLBACK_QUALITY_SCORE,
    }
}

fn clamp_score(score: f64) -> u8 {
    score.round().clamp(1.0, 10.0) as u8
}

const EDIT_SYSTEM_PROMPT: &str = "You are a senior copy editor. You fix grammar and structure, \
sharpen headlines and teasers, keep facts unchanged, and answer only with a single JSON object.";

fn build_edit_request(draft: &DraftArticle, params: &AiModelParams) -> GenerationRequest {
    let user_prompt = format!(
        "Edit the article below.\n\
         - Correct grammar, spelling, and awkward phrasing.\n\
         - Tighten structure; keep the existing markdown subheadings unless they are wrong.\n\
         - Make the title specific and punchy (under 90 characters) and the teaser compelling.\n\
         - Do not add facts that are not already present.\n\
         Then rate the edited article's overall quality from 1 (unpublishable) to 10 (excellent).\n\n\
         Language: {language}\nCategory: {category}\n\n\
         TITLE: {title}\nTEASER: {teaser}\nTAGS: {tags}\n\nCONTENT:\n{content}\n\n\
         Respond with one JSON object: {{\"title\": \"...\", \"teaser\": \"...\", \"content\": \"...\", \
         \"tags\": [\"...\"], \"editNotes\": \"what you changed\", \"qualityScore\": 1-10}}",
        language = draft.language,
        category = draft.category,
        title = draft.title,
        teaser = draft.teaser,
        tags = draft.tags.join(", "),
        content = draft.content,
    );
    GenerationRequest::new(params, EDIT_SYSTEM_PROMPT.to_string(), user_prompt)
}
