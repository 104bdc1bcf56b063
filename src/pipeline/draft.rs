//! Drafting stage: turn each gathered topic into a structured article draft.
//!
//! For every topic the drafter
//! 1. picks one concrete [`ArticleType`] (category mapping, then preference
//!    list, then a random permitted type),
//! 2. builds a single generation request with date framing, section
//!    guidance, a type-specific structure, and a word-count band,
//! 3. parses the reply into a [`DraftArticle`].
//!
//! A topic whose request fails or whose reply does not parse produces no
//! draft; the other topics are unaffected.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::api::{GenerationRequest, TextGenerator};
use crate::config::{AgentConfig, AiModelParams, ArticleStyle, ArticleType};
use crate::extract::{ExtractError, extract_object, require_non_empty};
use crate::models::{DraftArticle, GatheredTopic};
use crate::utils::{truncate_chars, truncate_for_log};

/// Drafts requested concurrently.
pub const DRAFT_CONCURRENCY: usize = 4;
/// Longest source snippet quoted into a prompt.
const PROMPT_SNIPPET_CHARS: usize = 200;
/// Sources quoted into a prompt.
const PROMPT_MAX_SOURCES: usize = 5;

/// Everything about a run the drafter needs besides the topic.
#[derive(Debug, Clone)]
pub struct DraftSettings {
    pub language: String,
    pub ai_model: AiModelParams,
    pub style: ArticleStyle,
    pub word_range: (u32, u32),
}

impl DraftSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            language: config.default_language.clone(),
            ai_model: config.ai_model.clone(),
            style: config.article_style.clone(),
            word_range: config.word_range(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DraftReply {
    title: String,
    #[serde(default)]
    teaser: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Clone)]
pub struct Drafter {
    generator: Arc<dyn TextGenerator>,
}

impl Drafter {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Draft every topic, up to [`DRAFT_CONCURRENCY`] at a time.
    #[instrument(level = "info", skip_all, fields(topics = topics.len()))]
    pub async fn draft_all(
        &self,
        topics: &[GatheredTopic],
        settings: &DraftSettings,
    ) -> Vec<DraftArticle> {
        // Must stay Send: build the futures before streaming them.
        let pending: Vec<_> = topics.iter().map(|topic| self.draft(topic, settings)).collect();
        let results: Vec<Option<DraftArticle>> = stream::iter(pending)
            .buffer_unordered(DRAFT_CONCURRENCY)
            .collect()
            .await;

        let drafts: Vec<DraftArticle> = results.into_iter().flatten().collect();
        info!(
            total = topics.len(),
            successful = drafts.len(),
            failed = topics.len() - drafts.len(),
            "Drafting complete"
        );
        drafts
    }

    /// Draft one topic. `None` when generation or parsing fails.
    #[instrument(level = "info", skip_all, fields(topic_id = %topic.id, category = %topic.category))]
    pub async fn draft(&self, topic: &GatheredTopic, settings: &DraftSettings) -> Option<DraftArticle> {
        let kind = select_article_type(&topic.category, &settings.style, &mut rand::rng());
        debug!(kind = kind.as_str(), "Selected article type");

        let request = build_draft_request(topic, settings, kind, Utc::now());
        let response = match self.generator.generate(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Draft generation failed; skipping topic");
                return None;
            }
        };

        match parse_draft(&response, topic, &settings.language) {
            Ok(draft) => {
                info!(title = %draft.title, "Drafted article");
                Some(draft)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    response_preview = %truncate_for_log(&response, 300),
                    "Model returned a non-conforming draft; skipping topic"
                );
                None
            }
        }
    }
}

/// Convert a model reply into a fully-populated draft, or explain why not.
pub fn parse_draft(
    response: &str,
    topic: &GatheredTopic,
    language: &str,
) -> Result<DraftArticle, ExtractError> {
    let reply: DraftReply = extract_object(response)?;
    require_non_empty(&reply.title, "title")?;
    require_non_empty(&reply.content, "content")?;

    let teaser = if reply.teaser.trim().is_empty() {
        truncate_chars(first_paragraph(&reply.content), 200)
    } else {
        reply.teaser.trim().to_string()
    };
    let tags = reply
        .tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .unique()
        .collect();

    Ok(DraftArticle {
        id: Uuid::new_v4().to_string(),
        topic_id: topic.id.clone(),
        title: reply.title.trim().to_string(),
        teaser,
        content: reply.content.trim().to_string(),
        category: topic.category.clone(),
        tags,
        sources: topic.sources.iter().map(|s| s.url.clone()).collect(),
        language: language.to_string(),
        drafted_at: Utc::now(),
    })
}

fn first_paragraph(content: &str) -> &str {
    content
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'))
        .unwrap_or(content)
}

/// Pick the article type for `category` under `style`.
///
/// Priority: the category's primary type if permitted, else the first
/// permitted entry of its preference list, else a random permitted type.
/// With nothing permitted, the primary type is used.
pub fn select_article_type(category: &str, style: &ArticleStyle, rng: &mut impl Rng) -> ArticleType {
    let key = category.trim().to_lowercase();
    let primary = primary_type(&key);

    if style.permits(primary) {
        return primary;
    }
    if let Some(kind) = secondary_types(&key).iter().copied().find(|t| style.permits(*t)) {
        return kind;
    }
    let permitted: Vec<ArticleType> = style.types.iter().copied().unique().collect();
    if permitted.is_empty() {
        return primary;
    }
    permitted[rng.random_range(0..permitted.len())]
}

fn primary_type(category: &str) -> ArticleType {
    match category {
        "news" | "politics" | "world" | "sports" => ArticleType::News,
        "technology" | "business" | "finance" | "economy" => ArticleType::Analysis,
        "science" | "culture" => ArticleType::Feature,
        "health" | "travel" => ArticleType::Guide,
        "lifestyle" => ArticleType::Listicle,
        "food" => ArticleType::Recipe,
        "entertainment" => ArticleType::Review,
        "opinion" => ArticleType::Opinion,
        _ => ArticleType::News,
    }
}

fn secondary_types(category: &str) -> &'static [ArticleType] {
    use ArticleType::*;
    match category {
        "news" | "politics" | "world" => &[Analysis, Feature],
        "sports" => &[Analysis, Opinion, Feature],
        "technology" => &[Guide, Review, Listicle, News],
        "business" | "finance" | "economy" => &[News, Guide, Opinion],
        "science" => &[Analysis, News],
        "culture" => &[Review, Opinion],
        "health" => &[Listicle, Feature, News],
        "travel" => &[Listicle, Feature],
        "lifestyle" => &[Guide, Feature],
        "food" => &[Listicle, Guide, Review],
        "entertainment" => &[Feature, News, Listicle],
        "opinion" => &[Analysis],
        _ => &[News, Analysis, Feature],
    }
}

/// Thematic guidance for a section, shared with the topic generator.
pub fn category_guidance(category: &str) -> &'static str {
    match category.trim().to_lowercase().as_str() {
        "news" | "world" => "Hard news of broad public interest: government decisions, major incidents, international developments.",
        "politics" => "Policy, elections, legislation, and their concrete effect on citizens.",
        "technology" => "Product launches, AI and software developments, security incidents, regulation of tech.",
        "business" | "finance" | "economy" => "Markets, company results, deals, macroeconomic data, and what they mean for readers.",
        "health" => "Medical research, public-health guidance, and practical wellbeing advice backed by evidence.",
        "science" => "New research findings, space, climate and environment, explained for a general audience.",
        "sports" => "Results, transfers, tournaments, and the storylines behind them.",
        "entertainment" => "Film, TV, music, and streaming releases, industry news, and notable reviews.",
        "culture" => "Arts, books, exhibitions, and trends in how people live and think.",
        "lifestyle" => "Home, relationships, personal finance, and everyday improvements.",
        "food" => "Seasonal cooking, recipes, restaurant trends, and food culture.",
        "travel" => "Destinations, travel conditions, and practical trip planning.",
        "opinion" => "Arguable positions on current events, clearly reasoned.",
        _ => "Timely, verifiable developments relevant to this section's readers.",
    }
}

/// Section ordering and requirements for each article type.
pub fn structure_template(kind: ArticleType) -> &'static str {
    match kind {
        ArticleType::News => {
            "Inverted pyramid. 1) Lede answering who/what/when/where. 2) Key details and figures. \
             3) Context and background. 4) Reactions. 5) What happens next. Use ## subheadings after the lede."
        }
        ArticleType::Analysis => {
            "1) Opening that states the development and why it matters. 2) ## Background. \
             3) ## What's driving it (two or three factors). 4) ## Implications for readers and stakeholders. \
             5) ## What to watch. Support claims with the sources' facts."
        }
        ArticleType::Feature => {
            "1) Narrative or scene-setting opening. 2) The central story told through people or examples. \
             3) Broader context with ## subheadings. 4) A closing that returns to the opening thread."
        }
        ArticleType::Guide => {
            "1) Who this guide is for and what they will learn. 2) ## Key facts. \
             3) Step-by-step or topic-by-topic ## sections. 4) ## Common mistakes. 5) ## Bottom line."
        }
        ArticleType::Listicle => {
            "1) Short introduction. 2) Five to nine numbered ## items, each with a bold one-line takeaway \
             and a short explanatory paragraph. 3) Brief conclusion."
        }
        ArticleType::Recipe => {
            "1) Introduction to the dish and its season or occasion. 2) ## Ingredients as a bulleted list with quantities. \
             3) ## Method as numbered steps. 4) ## Tips and variations. 5) Servings and total time."
        }
        ArticleType::Review => {
            "1) Verdict up front in one paragraph. 2) ## What it is. 3) ## What works. \
             4) ## What doesn't. 5) ## Who it's for. End with a score out of 10."
        }
        ArticleType::Opinion => {
            "1) A clear thesis in the first paragraph. 2) Two or three ## arguments with evidence. \
             3) ## The counterargument, addressed fairly. 4) A firm conclusion."
        }
    }
}

const DRAFT_SYSTEM_PROMPT: &str = "You are an experienced staff writer for a digital news portal. \
You write original, accurate articles and answer only with a single JSON object.";

/// Build the generation request for one topic.
pub fn build_draft_request(
    topic: &GatheredTopic,
    settings: &DraftSettings,
    kind: ArticleType,
    now: DateTime<Utc>,
) -> GenerationRequest {
    let (min_words, max_words) = settings.word_range;
    let style = &settings.style;

    let sources = topic
        .sources
        .iter()
        .take(PROMPT_MAX_SOURCES)
        .enumerate()
        .map(|(i, s)| {
            format!(
                "{}. {} ({}): {}",
                i + 1,
                s.title,
                s.source_name,
                truncate_chars(&s.snippet, PROMPT_SNIPPET_CHARS)
            )
        })
        .join("\n");

    let mut extras = Vec::new();
    if style.include_quotes {
        extras.push("Include one or two attributed quotes only if the sources support them; never invent quotes.");
    }
    if style.include_sources {
        extras.push("Close with a short \"Sources\" line naming the outlets referenced.");
    }
    if style.include_images {
        extras.push("Write a title concrete enough to find a matching photo.");
    }

    let user_prompt = format!(
        "Today is {date} ({year}). Write a {kind} article for the \"{category}\" section in language \"{language}\".\n\
         Frame the piece as current as of {year}; do not present old events as new.\n\n\
         Section guidance: {guidance}\n\n\
         Structure: {structure}\n\n\
         Length: {min_words}-{max_words} words. Tone: {tone}.\n\
         {extras}\n\n\
         Source material (synthesize; do not copy sentences):\n{sources}\n\n\
         Respond with one JSON object: {{\"title\": \"...\", \"teaser\": \"one or two sentences\", \
         \"content\": \"markdown body\", \"tags\": [\"3-6 lowercase tags\"]}}",
        date = now.format("%A, %B %-d, %Y"),
        year = now.format("%Y"),
        kind = kind.as_str(),
        category = topic.category,
        language = settings.language,
        guidance = category_guidance(&topic.category),
        structure = structure_template(kind),
        tone = style.tone.as_str(),
        extras = extras.join("\n"),
    );

    GenerationRequest::new(&settings.ai_model, DRAFT_SYSTEM_PROMPT.to_string(), user_prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Depth;
    use crate::testing::{ScriptedGenerator, draft_reply, source_item};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn topic(title: &str, category: &str) -> GatheredTopic {
        GatheredTopic {
            id: format!("topic-{title}"),
            topic: category.to_string(),
            category: category.to_string(),
            sources: vec![source_item(title)],
            gathered_at: Utc::now(),
        }
    }

    fn settings() -> DraftSettings {
        DraftSettings::from_config(&AgentConfig::default())
    }

    fn style_with(types: &[ArticleType]) -> ArticleStyle {
        ArticleStyle {
            types: types.to_vec(),
            ..ArticleStyle::default()
        }
    }

    #[test]
    fn test_primary_type_wins_when_permitted() {
        let mut rng = StdRng::seed_from_u64(7);
        let style = ArticleStyle::default();
        assert_eq!(select_article_type("food", &style, &mut rng), ArticleType::Recipe);
        assert_eq!(select_article_type("Technology", &style, &mut rng), ArticleType::Analysis);
    }

    #[test]
    fn test_secondary_preference_in_order() {
        let mut rng = StdRng::seed_from_u64(7);
        let style = style_with(&[ArticleType::Review, ArticleType::Guide]);
        // technology: Analysis not permitted; preference list is Guide, Review, …
        assert_eq!(select_article_type("technology", &style, &mut rng), ArticleType::Guide);
    }

    #[test]
    fn test_random_fallback_stays_within_permitted() {
        let mut rng = StdRng::seed_from_u64(42);
        let style = style_with(&[ArticleType::Recipe, ArticleType::Opinion]);
        for _ in 0..20 {
            let kind = select_article_type("science", &style, &mut rng);
            assert!(style.permits(kind));
        }
    }

    #[test]
    fn test_nothing_permitted_uses_primary() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            select_article_type("health", &style_with(&[]), &mut rng),
            ArticleType::Guide
        );
    }

    #[test]
    fn test_request_embeds_template_band_and_date() {
        let mut s = settings();
        s.style.depth = Depth::Brief;
        s.word_range = (300, 500);
        let now = Utc::now();
        let req = build_draft_request(&topic("Rates", "business"), &s, ArticleType::Recipe, now);

        assert!(req.user_prompt.contains("## Ingredients"));
        assert!(req.user_prompt.contains("300-500 words"));
        assert!(req.user_prompt.contains(&now.format("%Y").to_string()));
        assert!(req.user_prompt.contains("do not copy"));
        assert!(req.user_prompt.contains("Snippet about Rates"));
        assert_eq!(req.model, s.ai_model.model);
    }

    #[test]
    fn test_request_bounds_snippets() {
        let mut t = topic("Long", "news");
        t.sources[0].snippet = "x".repeat(2000);
        let req = build_draft_request(&t, &settings(), ArticleType::News, Utc::now());
        assert!(!req.user_prompt.contains(&"x".repeat(PROMPT_SNIPPET_CHARS + 1)));
    }

    #[test]
    fn test_parse_draft_populates_everything() {
        let t = topic("Grid", "technology");
        let draft = parse_draft(&format!("Here:\n{}", draft_reply("Grid storage")), &t, "en").unwrap();
        assert_eq!(draft.title, "Grid storage");
        assert_eq!(draft.topic_id, t.id);
        assert_eq!(draft.category, "technology");
        assert_eq!(draft.tags, vec!["alpha", "beta"]);
        assert_eq!(draft.sources, vec![t.sources[0].url.clone()]);
        assert!(!draft.content.is_empty());
    }

    #[test]
    fn test_parse_draft_rejects_missing_or_blank_fields() {
        let t = topic("Grid", "technology");
        assert!(parse_draft(r#"{"title": "", "content": "body"}"#, &t, "en").is_err());
        assert!(parse_draft(r#"{"title": "T", "teaser": "x"}"#, &t, "en").is_err());
        assert!(parse_draft("plain prose", &t, "en").is_err());
    }

    #[test]
    fn test_missing_teaser_falls_back_to_first_paragraph() {
        let t = topic("Grid", "technology");
        let draft = parse_draft(
            r###"{"title": "T", "content": "## Heading\n\nFirst paragraph.\n\nSecond."}"###,
            &t,
            "en",
        )
        .unwrap();
        assert_eq!(draft.teaser, "First paragraph.");
    }

    #[tokio::test]
    async fn test_one_bad_topic_does_not_block_others() {
        let generator = Arc::new(ScriptedGenerator::new(|req| {
            if req.user_prompt.contains("Snippet about Broken") {
                Ok("Sorry, I can't produce JSON today.".to_string())
            } else if req.user_prompt.contains("Snippet about Offline") {
                Err("connection reset".to_string())
            } else {
                Ok(draft_reply("Working topic"))
            }
        }));
        let drafter = Drafter::new(generator.clone());
        let topics = vec![
            topic("Broken", "news"),
            topic("Healthy", "technology"),
            topic("Offline", "health"),
        ];

        let drafts = drafter.draft_all(&topics, &settings()).await;

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].topic_id, "topic-Healthy");
        assert_eq!(generator.calls(), 3);
    }
}
