//! Publishing stage: quality gate, thumbnail, persistence.
//!
//! ```text
//! Draft → Edited → (score ≥ threshold?) → Published
//!                                       ↘ Rejected
//! ```
//!
//! Articles are handled one at a time so the batch's used-image set is
//! updated in order. A rejected or failed article is simply absent from
//! the output. Input is assumed to be deduplicated already.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::images::{ImageQuery, ImageResolver};
use crate::models::{EditedArticle, NewArticle, PublishedArticle};
use crate::store::ArticleStore;
use crate::utils::slugify_title;

/// Per-run publishing knobs.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub tenant_id: String,
    pub min_quality_score: u8,
    pub include_images: bool,
}

pub struct Publisher {
    articles: Arc<dyn ArticleStore>,
    images: ImageResolver,
}

impl Publisher {
    pub fn new(articles: Arc<dyn ArticleStore>, images: ImageResolver) -> Self {
        Self { articles, images }
    }

    /// Publish every article that clears the quality gate.
    ///
    /// The used-image set is cleared first, so images are only deduplicated
    /// within this batch. Articles are processed one at a time.
    ///
    /// # Arguments
    ///
    /// * `articles` - Edited articles, already deduplicated against the corpus
    /// * `settings` - Tenant, minimum quality score, and whether to attach images
    ///
    /// # Returns
    ///
    /// One [`PublishedArticle`] per stored article, carrying the store's id
    /// and slug. Articles below the gate, and articles the store rejects,
    /// are absent.
    #[instrument(level = "info", skip_all, fields(tenant = %settings.tenant_id, count = articles.len()))]
    pub async fn publish_all(
        &mut self,
        articles: Vec<EditedArticle>,
        settings: &PublishSettings,
    ) -> Vec<PublishedArticle> {
        self.images.clear();
        let total = articles.len();
        let mut published = Vec::new();
        let mut rejected = 0usize;

        for article in articles {
            if article.quality_score < settings.min_quality_score {
                info!(
                    title = %article.draft.title,
                    score = article.quality_score,
                    threshold = settings.min_quality_score,
                    "Rejected below quality threshold"
                );
                rejected += 1;
                continue;
            }
            if let Some(p) = self.publish(article, settings).await {
                published.push(p);
            }
        }

        info!(
            total,
            published = published.len(),
            rejected,
            failed = total - published.len() - rejected,
            "Publishing complete"
        );
        published
    }

    #[instrument(level = "info", skip_all, fields(title = %article.draft.title))]
    async fn publish(
        &mut self,
        article: EditedArticle,
        settings: &PublishSettings,
    ) -> Option<PublishedArticle> {
        let image_url = if settings.include_images {
            let query = ImageQuery {
                title: article.draft.title.clone(),
                teaser: article.draft.teaser.clone(),
                category: article.draft.category.clone(),
            };
            Some(self.images.resolve(&query).await)
        } else {
            None
        };

        let published_at = Utc::now();
        let draft = &article.draft;
        let new_article = NewArticle {
            tenant_id: settings.tenant_id.clone(),
            title: draft.title.clone(),
            slug: slugify_title(&draft.title),
            teaser: draft.teaser.clone(),
            content: draft.content.clone(),
            category: draft.category.clone(),
            tags: draft.tags.clone(),
            sources: draft.sources.clone(),
            language: draft.language.clone(),
            image_url: image_url.clone(),
            quality_score: article.quality_score,
            agent_generated: true,
            published_at,
        };

        match self.articles.create(new_article).await {
            Ok(stored) => {
                info!(article_id = %stored.id, slug = %stored.slug, "Published article");
                Some(PublishedArticle {
                    edited: article,
                    published_at,
                    article_id: stored.id,
                    slug: stored.slug,
                    image_url,
                })
            }
            Err(e) => {
                warn!(error = %e, "Article store rejected article; skipping");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::tests::fixed;
    use crate::pipeline::edit::fallback;
    use crate::store::memory::MemoryStore;
    use crate::testing::draft;

    fn scored(title: &str, score: u8) -> EditedArticle {
        let mut edited = fallback(draft(title, "news"));
        edited.quality_score = score;
        edited
    }

    fn settings(min: u8) -> PublishSettings {
        PublishSettings {
            tenant_id: "acme".to_string(),
            min_quality_score: min,
            include_images: true,
        }
    }

    fn publisher(store: Arc<MemoryStore>, urls: &[&str]) -> Publisher {
        Publisher::new(store, ImageResolver::new(vec![fixed(urls)], "/ph"))
    }

    #[tokio::test]
    async fn test_quality_gate() {
        let store = Arc::new(MemoryStore::default());
        let mut publisher = publisher(store.clone(), &["https://img/1.jpg", "https://img/2.jpg"]);

        let published = publisher
            .publish_all(
                vec![scored("Low", 5), scored("Edge", 6), scored("High", 9)],
                &settings(6),
            )
            .await;

        let titles: Vec<&str> = published.iter().map(|p| p.edited.draft.title.as_str()).collect();
        assert_eq!(titles, vec!["Edge", "High"]);
        assert_eq!(store.article_count(), 2);

        let stored = store.articles.lock().unwrap();
        assert!(stored.iter().all(|(_, a)| a.agent_generated && a.quality_score >= 6));
        assert!(stored.iter().all(|(_, a)| a.title != "Low"));
    }

    #[tokio::test]
    async fn test_images_distinct_within_batch_and_reset_between_runs() {
        let store = Arc::new(MemoryStore::default());
        let mut publisher = publisher(store, &["https://img/1.jpg"]);

        let first = publisher
            .publish_all(vec![scored("A", 8), scored("B", 8)], &settings(6))
            .await;
        assert_eq!(first[0].image_url.as_deref(), Some("https://img/1.jpg"));
        assert_eq!(first[1].image_url.as_deref(), Some("/ph/news.jpg"));

        let second = publisher.publish_all(vec![scored("C", 8)], &settings(6)).await;
        assert_eq!(second[0].image_url.as_deref(), Some("https://img/1.jpg"));
    }

    #[tokio::test]
    async fn test_store_assigns_slugs() {
        let store = Arc::new(MemoryStore::default());
        let mut publisher = publisher(store, &[]);
        let published = publisher
            .publish_all(vec![scored("Same Title", 8), scored("Same Title", 8)], &settings(6))
            .await;
        assert_eq!(published[0].slug, "same-title");
        assert_eq!(published[1].slug, "same-title-2");
        assert_ne!(published[0].article_id, published[1].article_id);
    }

    #[tokio::test]
    async fn test_store_failure_skips_item() {
        let store = Arc::new(MemoryStore::default());
        *store.fail_creates.lock().unwrap() = Some("disk full".to_string());
        let mut publisher = publisher(store, &[]);

        let published = publisher.publish_all(vec![scored("A", 9)], &settings(6)).await;
        assert!(published.is_empty());
    }

    #[tokio::test]
    async fn test_images_skipped_when_style_excludes_them() {
        let store = Arc::new(MemoryStore::default());
        let mut publisher = publisher(store, &["https://img/1.jpg"]);
        let mut s = settings(6);
        s.include_images = false;

        let published = publisher.publish_all(vec![scored("A", 9)], &s).await;
        assert!(published[0].image_url.is_none());
    }
}
