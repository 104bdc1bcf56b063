//! Gathering stage: fill each category's quota with topics.
//!
//! Feeds are tried first, in configured order; each feed that yields items
//! becomes one [`GatheredTopic`]. Categories still short afterwards are
//! topped up from the topic generator, one topic per suggestion, until the
//! quota is met or the generator comes back empty.
//!
//! Categories are gathered concurrently. Each category accumulates into
//! its own list and the lists are merged at the end.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::PipelineError;
use super::quota::category_quotas;
use crate::api::TextGenerator;
use crate::config::{AgentConfig, FeedSource};
use crate::models::{GatheredTopic, SourceItem};
use crate::sources::feed::FeedReader;
use crate::sources::topics::TopicGenerator;

#[derive(Clone)]
pub struct Gatherer {
    feed_reader: Arc<dyn FeedReader>,
    generator: Arc<dyn TextGenerator>,
}

impl Gatherer {
    pub fn new(feed_reader: Arc<dyn FeedReader>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            feed_reader,
            generator,
        }
    }

    /// Gather topics for every configured category.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidConfig`] when no categories are configured.
    #[instrument(level = "info", skip_all, fields(max = config.max_articles_per_run))]
    pub async fn gather(&self, config: &AgentConfig) -> Result<Vec<GatheredTopic>, PipelineError> {
        let categories: Vec<String> = config
            .topics
            .iter()
            .map(|t| category_key(t))
            .filter(|t| !t.is_empty())
            .collect();
        if categories.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "no topic categories configured".to_string(),
            ));
        }

        let quotas = category_quotas(
            config.max_articles_per_run,
            &categories,
            config.distribute_evenly,
        );
        info!(?quotas, "Computed category quotas");

        let topic_generator = TopicGenerator::new(self.generator.clone(), config.ai_model.clone());

        let per_category = quotas.iter().map(|(category, &quota)| {
            let feeds: Vec<&FeedSource> = if config.use_rss_feeds {
                config
                    .rss_feeds
                    .iter()
                    .filter(|f| f.enabled && category_key(&f.category) == *category)
                    .collect()
            } else {
                Vec::new()
            };
            self.gather_category(
                category,
                quota as usize,
                feeds,
                &topic_generator,
                &config.default_language,
            )
        });

        let topics: Vec<GatheredTopic> = join_all(per_category).await.into_iter().flatten().collect();
        info!(count = topics.len(), "Gathering complete");
        Ok(topics)
    }

    #[instrument(level = "info", skip(self, feeds, topic_generator, language))]
    async fn gather_category(
        &self,
        category: &str,
        quota: usize,
        feeds: Vec<&FeedSource>,
        topic_generator: &TopicGenerator,
        language: &str,
    ) -> Vec<GatheredTopic> {
        let mut gathered = Vec::new();

        for feed in feeds {
            if gathered.len() >= quota {
                break;
            }
            let items = self.feed_reader.read(feed).await;
            if items.is_empty() {
                debug!(url = %feed.url, "Feed contributed nothing");
                continue;
            }
            gathered.push(new_topic(category, items));
        }
        let from_feeds = gathered.len();

        // Each pass either adds topics or stops; the cap bounds a generator
        // that keeps answering with fewer topics than requested.
        let max_attempts = quota * 2 + 1;
        let mut attempts = 0;
        while gathered.len() < quota && attempts < max_attempts {
            attempts += 1;
            let items = topic_generator.generate(category, language).await;
            if items.is_empty() {
                warn!(attempts, "Topic generator returned nothing; giving up on category");
                break;
            }
            for item in items {
                if gathered.len() >= quota {
                    break;
                }
                gathered.push(new_topic(category, vec![item]));
            }
        }

        info!(
            from_feeds,
            generated = gathered.len() - from_feeds,
            quota,
            "Category gathered"
        );
        gathered
    }
}

fn new_topic(category: &str, sources: Vec<SourceItem>) -> GatheredTopic {
    GatheredTopic {
        id: Uuid::new_v4().to_string(),
        topic: category.to_string(),
        category: category.to_string(),
        sources,
        gathered_at: Utc::now(),
    }
}

/// Categories compare trimmed and case-folded.
fn category_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedGenerator, StaticFeedReader, feed, source_item};
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    fn topics_reply() -> String {
        r#"[{"title": "Gen A", "summary": "a"}, {"title": "Gen B", "summary": "b"}, {"title": "Gen C", "summary": "c"}]"#
            .to_string()
    }

    fn config(topics: &[&str], max: u32) -> AgentConfig {
        AgentConfig {
            topics: topics.iter().map(|s| s.to_string()).collect(),
            max_articles_per_run: max,
            rss_feeds: vec![
                feed("https://feeds.example.com/news-1", "news"),
                feed("https://feeds.example.com/news-2", "news"),
                feed("https://feeds.example.com/news-3", "news"),
                feed("https://feeds.example.com/tech", "technology"),
            ],
            ..AgentConfig::default()
        }
    }

    fn by_category(topics: &[GatheredTopic]) -> HashMap<&str, usize> {
        let mut counts = HashMap::new();
        for t in topics {
            *counts.entry(t.category.as_str()).or_default() += 1;
        }
        counts
    }

    #[tokio::test]
    async fn test_feeds_first_then_generator_fills() {
        let reader = Arc::new(
            StaticFeedReader::default()
                .with("https://feeds.example.com/news-1", vec![source_item("n1"), source_item("n2")])
                .with("https://feeds.example.com/news-2", vec![source_item("n3")])
                .with("https://feeds.example.com/news-3", vec![source_item("n4")]),
        );
        let generator = Arc::new(ScriptedGenerator::new(|_| Ok(topics_reply())));
        let gatherer = Gatherer::new(reader.clone(), generator.clone());

        let topics = gatherer.gather(&config(&["news", "technology"], 4)).await.unwrap();

        let counts = by_category(&topics);
        assert_eq!(counts["news"], 2);
        assert_eq!(counts["technology"], 2);

        // Quota for news reached after two feeds; the third is never read.
        assert_eq!(reader.reads.load(Ordering::SeqCst), 3);
        let news: Vec<_> = topics.iter().filter(|t| t.category == "news").collect();
        assert!(news.iter().all(|t| !t.sources.is_empty()));
        assert_eq!(generator.calls(), 1);

        let tech: Vec<_> = topics.iter().filter(|t| t.category == "technology").collect();
        assert!(tech.iter().all(|t| t.sources.len() == 1));
    }

    #[tokio::test]
    async fn test_empty_generator_forces_exit() {
        let reader = Arc::new(StaticFeedReader::default());
        let generator = Arc::new(ScriptedGenerator::new(|_| Ok("[]".to_string())));
        let gatherer = Gatherer::new(reader, generator.clone());

        let topics = gatherer.gather(&config(&["technology"], 5)).await.unwrap();

        assert!(topics.is_empty());
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_short_generator_answers_are_capped() {
        let reader = Arc::new(StaticFeedReader::default());
        let generator = Arc::new(ScriptedGenerator::new(|_| Ok("[]".to_string())));
        let gatherer = Gatherer::new(reader, generator.clone());
        // A generator that always returns one topic still terminates once quota is met.
        let single = Arc::new(ScriptedGenerator::new(|_| {
            Ok(r#"[{"title": "Only one", "summary": "x"}]"#.to_string())
        }));
        let gatherer_single = Gatherer::new(Arc::new(StaticFeedReader::default()), single.clone());

        assert!(gatherer.gather(&config(&["news"], 3)).await.unwrap().is_empty());
        let topics = gatherer_single.gather(&config(&["news"], 3)).await.unwrap();
        assert_eq!(topics.len(), 3);
        assert_eq!(single.calls(), 3);
    }

    #[tokio::test]
    async fn test_feeds_skipped_when_disabled() {
        let reader = Arc::new(
            StaticFeedReader::default()
                .with("https://feeds.example.com/news-1", vec![source_item("n1")]),
        );
        let generator = Arc::new(ScriptedGenerator::new(|_| Ok(topics_reply())));
        let gatherer = Gatherer::new(reader.clone(), generator);

        let mut cfg = config(&["news"], 2);
        cfg.use_rss_feeds = false;
        let topics = gatherer.gather(&cfg).await.unwrap();

        assert_eq!(topics.len(), 2);
        assert_eq!(reader.reads.load(Ordering::SeqCst), 0);

        cfg.use_rss_feeds = true;
        cfg.rss_feeds[0].enabled = false;
        gatherer.gather(&cfg).await.unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_feed_categories_match_regardless_of_case() {
        let reader = Arc::new(
            StaticFeedReader::default()
                .with("https://feeds.example.com/tech", vec![source_item("t1")]),
        );
        let generator = Arc::new(ScriptedGenerator::new(|_| Ok("[]".to_string())));
        let gatherer = Gatherer::new(reader.clone(), generator);

        let mut cfg = config(&[" Technology "], 1);
        cfg.rss_feeds[3].category = "TECHNOLOGY".to_string();
        let topics = gatherer.gather(&cfg).await.unwrap();

        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].category, "technology");
    }

    #[tokio::test]
    async fn test_no_categories_is_a_stage_error() {
        let gatherer = Gatherer::new(
            Arc::new(StaticFeedReader::default()),
            Arc::new(ScriptedGenerator::new(|_| Ok(topics_reply()))),
        );
        let err = gatherer.gather(&config(&["  "], 4)).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
