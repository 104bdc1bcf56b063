//! Pipeline configuration and its three-layer merge.
//!
//! A run's [`AgentConfig`] is resolved from, in increasing precedence:
//! 1. built-in defaults ([`AgentConfig::default`])
//! 2. the tenant's persisted settings (an [`AgentConfigPatch`] under `agentConfig`)
//! 3. caller overrides for a single invocation (another [`AgentConfigPatch`])
//!
//! Patch fields are all optional; nested `aiModel` and `articleStyle`
//! objects fill their own missing members from defaults, so the merged
//! result is always complete.

use serde::{Deserialize, Serialize};

/// Settings-store key holding the persisted [`AgentConfigPatch`].
pub const AGENT_CONFIG_KEY: &str = "agentConfig";

/// One syndication feed the gatherer may read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSource {
    pub url: String,
    pub category: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl FeedSource {
    fn new(url: &str, category: &str) -> Self {
        Self {
            url: url.to_string(),
            category: category.to_string(),
            language: default_language(),
            enabled: true,
        }
    }
}

/// Generation parameters forwarded to the text collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiModelParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for AiModelParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            top_p: 1.0,
            frequency_penalty: 0.3,
            presence_penalty: 0.3,
        }
    }
}

/// Concrete article shapes the drafter can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleType {
    News,
    Analysis,
    Feature,
    Guide,
    Listicle,
    Recipe,
    Review,
    Opinion,
}

impl ArticleType {
    pub const ALL: [ArticleType; 8] = [
        ArticleType::News,
        ArticleType::Analysis,
        ArticleType::Feature,
        ArticleType::Guide,
        ArticleType::Listicle,
        ArticleType::Recipe,
        ArticleType::Review,
        ArticleType::Opinion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleType::News => "news",
            ArticleType::Analysis => "analysis",
            ArticleType::Feature => "feature",
            ArticleType::Guide => "guide",
            ArticleType::Listicle => "listicle",
            ArticleType::Recipe => "recipe",
            ArticleType::Review => "review",
            ArticleType::Opinion => "opinion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Professional,
    Conversational,
    Authoritative,
    Friendly,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Conversational => "conversational",
            Tone::Authoritative => "authoritative",
            Tone::Friendly => "friendly",
        }
    }
}

/// How deep an article goes; determines its word-count band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Depth {
    Brief,
    Standard,
    InDepth,
}

impl Depth {
    /// Nominal word-count band for this depth.
    pub fn word_band(&self) -> (u32, u32) {
        match self {
            Depth::Brief => (300, 500),
            Depth::Standard => (600, 900),
            Depth::InDepth => (1000, 1500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticleStyle {
    /// Article types the drafter may choose from.
    pub types: Vec<ArticleType>,
    pub tone: Tone,
    pub depth: Depth,
    pub include_images: bool,
    pub include_quotes: bool,
    pub include_sources: bool,
}

impl Default for ArticleStyle {
    fn default() -> Self {
        Self {
            types: ArticleType::ALL.to_vec(),
            tone: Tone::Professional,
            depth: Depth::Standard,
            include_images: true,
            include_quotes: true,
            include_sources: true,
        }
    }
}

impl ArticleStyle {
    pub fn permits(&self, kind: ArticleType) -> bool {
        self.types.contains(&kind)
    }
}

/// Fully-resolved configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub enabled: bool,
    /// Category quota keys, in priority order.
    pub topics: Vec<String>,
    pub default_language: String,
    pub max_articles_per_run: u32,
    pub cron_schedule: String,
    #[serde(rename = "rssFeeds")]
    pub rss_feeds: Vec<FeedSource>,
    #[serde(rename = "useRSSFeeds")]
    pub use_rss_feeds: bool,
    pub ai_model: AiModelParams,
    pub article_style: ArticleStyle,
    pub min_word_count: u32,
    pub max_word_count: u32,
    pub min_quality_score: u8,
    pub distribute_evenly: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topics: ["news", "technology", "business", "health"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_language: default_language(),
            max_articles_per_run: 8,
            cron_schedule: DEFAULT_SCHEDULE.to_string(),
            rss_feeds: vec![
                FeedSource::new("https://feeds.bbci.co.uk/news/rss.xml", "news"),
                FeedSource::new("https://feeds.npr.org/1001/rss.xml", "news"),
                FeedSource::new("https://feeds.arstechnica.com/arstechnica/index", "technology"),
                FeedSource::new("https://www.theverge.com/rss/index.xml", "technology"),
                FeedSource::new("https://feeds.bbci.co.uk/news/business/rss.xml", "business"),
                FeedSource::new("https://feeds.bbci.co.uk/news/health/rss.xml", "health"),
            ],
            use_rss_feeds: true,
            ai_model: AiModelParams::default(),
            article_style: ArticleStyle::default(),
            min_word_count: 600,
            max_word_count: 1200,
            min_quality_score: 6,
            distribute_evenly: true,
        }
    }
}

/// Default schedule: every six hours on the hour (seconds-first form).
pub const DEFAULT_SCHEDULE: &str = "0 0 */6 * * *";

/// A partial configuration layer. Absent fields defer to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_articles_per_run: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_schedule: Option<String>,
    #[serde(rename = "rssFeeds", skip_serializing_if = "Option::is_none")]
    pub rss_feeds: Option<Vec<FeedSource>>,
    #[serde(rename = "useRSSFeeds", skip_serializing_if = "Option::is_none")]
    pub use_rss_feeds: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<AiModelParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_style: Option<ArticleStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_word_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_word_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_quality_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribute_evenly: Option<bool>,
}

impl AgentConfig {
    /// Resolve defaults, then `persisted`, then `overrides`.
    pub fn merged(
        defaults: AgentConfig,
        persisted: Option<&AgentConfigPatch>,
        overrides: Option<&AgentConfigPatch>,
    ) -> AgentConfig {
        let mut config = defaults;
        for layer in [persisted, overrides].into_iter().flatten() {
            config.apply(layer);
        }
        config
    }

    /// Overlay every field `patch` sets.
    pub fn apply(&mut self, patch: &AgentConfigPatch) {
        macro_rules! overlay {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(v) = &patch.$field {
                    self.$field = v.clone();
                })+
            };
        }
        overlay!(
            enabled,
            topics,
            default_language,
            max_articles_per_run,
            cron_schedule,
            rss_feeds,
            use_rss_feeds,
            ai_model,
            article_style,
            min_word_count,
            max_word_count,
            min_quality_score,
            distribute_evenly,
        );
    }

    /// Word-count band for the configured depth, clamped to the configured
    /// minimum and maximum.
    ///
    /// When the depth band lies wholly outside the configured limits, a
    /// band of the same width is taken from the nearest edge of the limits,
    /// so a shallower depth never asks for more words than a deeper one.
    pub fn word_range(&self) -> (u32, u32) {
        let (band_min, band_max) = self.article_style.depth.word_band();
        let (cfg_min, cfg_max) = if self.min_word_count <= self.max_word_count {
            (self.min_word_count, self.max_word_count)
        } else {
            (self.max_word_count, self.min_word_count)
        };
        let width = band_max - band_min;
        if band_max < cfg_min {
            (cfg_min, cfg_max.min(cfg_min.saturating_add(width)))
        } else if band_min > cfg_max {
            (cfg_min.max(cfg_max.saturating_sub(width)), cfg_max)
        } else {
            (band_min.max(cfg_min), band_max.min(cfg_max))
        }
    }
}

fn default_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_precedence() {
        let persisted = AgentConfigPatch {
            max_articles_per_run: Some(6),
            default_language: Some("de".to_string()),
            ..Default::default()
        };
        let overrides = AgentConfigPatch {
            max_articles_per_run: Some(2),
            ..Default::default()
        };

        let merged =
            AgentConfig::merged(AgentConfig::default(), Some(&persisted), Some(&overrides));

        assert_eq!(merged.max_articles_per_run, 2);
        assert_eq!(merged.default_language, "de");
        assert_eq!(merged.min_quality_score, 6);
    }

    #[test]
    fn test_partial_nested_objects_fill_from_defaults() {
        let json = r#"{
            "enabled": false,
            "aiModel": { "model": "local-llama", "temperature": 0.2 },
            "articleStyle": { "types": ["recipe"], "depth": "in-depth" },
            "rssFeeds": [{ "url": "https://example.com/feed", "category": "food" }]
        }"#;
        let patch: AgentConfigPatch = serde_json::from_str(json).unwrap();
        let merged = AgentConfig::merged(AgentConfig::default(), Some(&patch), None);

        assert!(!merged.enabled);
        assert_eq!(merged.ai_model.model, "local-llama");
        assert_eq!(merged.ai_model.max_tokens, 4000);
        assert_eq!(merged.article_style.types, vec![ArticleType::Recipe]);
        assert_eq!(merged.article_style.depth, Depth::InDepth);
        assert!(merged.article_style.include_sources);
        assert_eq!(merged.rss_feeds.len(), 1);
        assert!(merged.rss_feeds[0].enabled);
        assert_eq!(merged.rss_feeds[0].language, "en");
        assert_eq!(merged.topics, AgentConfig::default().topics);
    }

    #[test]
    fn test_patch_serialization_omits_unset_fields() {
        let patch = AgentConfigPatch {
            cron_schedule: Some("0 30 * * * *".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"cronSchedule":"0 30 * * * *"}"#);
    }

    #[test]
    fn test_config_uses_legacy_feed_key_names() {
        let value = serde_json::to_value(AgentConfig::default()).unwrap();
        assert!(value.get("rssFeeds").is_some());
        assert!(value.get("useRSSFeeds").is_some());
        assert!(value.get("maxArticlesPerRun").is_some());
    }

    #[test]
    fn test_word_range_intersects_band_and_limits() {
        let mut config = AgentConfig::default();
        assert_eq!(config.word_range(), (600, 900));

        config.article_style.depth = Depth::InDepth;
        assert_eq!(config.word_range(), (1000, 1200));

        config.article_style.depth = Depth::Brief;
        assert_eq!(config.word_range(), (600, 800));
    }

    #[test]
    fn test_shallower_depth_never_wants_more_words() {
        let mut config = AgentConfig::default();
        let range = |config: &AgentConfig, depth| {
            let mut c = config.clone();
            c.article_style.depth = depth;
            c.word_range()
        };
        let brief = range(&config, Depth::Brief);
        let standard = range(&config, Depth::Standard);
        assert!(brief.1 <= standard.1);
        assert!(brief.1 - brief.0 <= standard.1 - standard.0);

        // Limits below every band: the deep band hugs the configured ceiling.
        config.min_word_count = 100;
        config.max_word_count = 250;
        assert_eq!(range(&config, Depth::InDepth), (100, 250));
        assert_eq!(range(&config, Depth::Brief), (100, 250));

        config.max_word_count = 800;
        assert_eq!(range(&config, Depth::InDepth), (300, 800));
    }
}
