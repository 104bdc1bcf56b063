//! Thumbnail resolution.
//!
//! An [`ImageResolver`] walks a chain of [`ImageProvider`]s and picks the
//! first candidate URL not already used in the current batch. When every
//! provider fails or comes back empty, it returns a deterministic
//! per-category placeholder.
//!
//! # Providers
//!
//! | Provider | Endpoint | Auth |
//! |----------|----------|------|
//! | [`UnsplashProvider`] | `api.unsplash.com/search/photos` | `Client-ID` header |
//! | [`PexelsProvider`] | `api.pexels.com/v1/search` | `Authorization` header |

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::BoxError;
use crate::utils::slugify_title;

/// Candidates requested from each provider.
const CANDIDATES_PER_SEARCH: usize = 8;
/// Title words used in a search query.
const QUERY_TITLE_WORDS: usize = 5;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "to", "in", "on", "for", "with", "at", "by", "is", "are",
    "was", "how", "why", "what", "new", "its", "from", "as",
];

/// What the publisher knows about an article when it looks for a picture.
#[derive(Debug, Clone)]
pub struct ImageQuery {
    pub title: String,
    pub teaser: String,
    pub category: String,
}

impl ImageQuery {
    /// Search terms: leading significant title words plus the category.
    pub fn search_terms(&self) -> String {
        let mut words: Vec<String> = self
            .title
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2 && !STOP_WORDS.contains(&w.to_lowercase().as_str()))
            .take(QUERY_TITLE_WORDS)
            .map(|w| w.to_string())
            .collect();
        if words.is_empty() {
            words = self
                .teaser
                .split_whitespace()
                .take(QUERY_TITLE_WORDS)
                .map(|w| w.to_string())
                .collect();
        }
        words.push(self.category.clone());
        words.join(" ")
    }
}

/// One image search backend.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidate image URLs for `query`, best first.
    async fn search(&self, query: &ImageQuery) -> Result<Vec<String>, BoxError>;
}

/// Resolves one thumbnail per article, never repeating within a batch.
pub struct ImageResolver {
    providers: Vec<Arc<dyn ImageProvider>>,
    placeholder_base_url: String,
    used: HashSet<String>,
}

impl ImageResolver {
    pub fn new(providers: Vec<Arc<dyn ImageProvider>>, placeholder_base_url: &str) -> Self {
        Self {
            providers,
            placeholder_base_url: placeholder_base_url.trim_end_matches('/').to_string(),
            used: HashSet::new(),
        }
    }

    /// Forget every URL handed out so far.
    pub fn clear(&mut self) {
        self.used.clear();
    }

    /// URLs already handed out in this batch.
    pub fn used(&self) -> &HashSet<String> {
        &self.used
    }

    /// Pick a thumbnail for one article.
    ///
    /// Providers are tried in order; the first candidate not already handed
    /// out in this batch wins and is marked as used. A provider error only
    /// moves on to the next provider.
    ///
    /// # Arguments
    ///
    /// * `query` - Title, teaser and category of the article
    ///
    /// # Returns
    ///
    /// An image URL. When no provider yields an unused candidate, the
    /// category placeholder from [`ImageResolver::placeholder`].
    #[instrument(level = "info", skip_all, fields(category = %query.category))]
    pub async fn resolve(&mut self, query: &ImageQuery) -> String {
        for provider in &self.providers {
            match provider.search(query).await {
                Ok(candidates) => {
                    if let Some(url) = candidates.into_iter().find(|u| !self.used.contains(u)) {
                        debug!(provider = provider.name(), %url, "Picked image");
                        self.used.insert(url.clone());
                        return url;
                    }
                    debug!(provider = provider.name(), "No unused candidates");
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Image search failed; trying next provider");
                }
            }
        }
        let url = self.placeholder(&query.category);
        info!(%url, "Using category placeholder image");
        url
    }

    /// Deterministic placeholder for `category`.
    pub fn placeholder(&self, category: &str) -> String {
        let slug = slugify_title(category);
        let slug = if slug.is_empty() { "general".to_string() } else { slug };
        format!("{}/{}.jpg", self.placeholder_base_url, slug)
    }
}

#[derive(Deserialize)]
struct UnsplashResponse {
    results: Vec<UnsplashPhoto>,
}

#[derive(Deserialize)]
struct UnsplashPhoto {
    urls: UnsplashUrls,
}

#[derive(Deserialize)]
struct UnsplashUrls {
    regular: String,
}

#[derive(Debug, Clone)]
pub struct UnsplashProvider {
    access_key: String,
    client: Client,
}

impl UnsplashProvider {
    pub fn new(access_key: String, timeout: Duration) -> Result<Self, BoxError> {
        Ok(Self {
            access_key,
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ImageProvider for UnsplashProvider {
    fn name(&self) -> &'static str {
        "unsplash"
    }

    async fn search(&self, query: &ImageQuery) -> Result<Vec<String>, BoxError> {
        let url = format!(
            "https://api.unsplash.com/search/photos?query={}&per_page={}&orientation=landscape",
            urlencoding::encode(&query.search_terms()),
            CANDIDATES_PER_SEARCH
        );
        let res: UnsplashResponse = self
            .client
            .get(url)
            .header("Authorization", format!("Client-ID {}", self.access_key))
            .header("Accept-Version", "v1")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(res.results.into_iter().map(|p| p.urls.regular).collect())
    }
}

#[derive(Deserialize)]
struct PexelsResponse {
    photos: Vec<PexelsPhoto>,
}

#[derive(Deserialize)]
struct PexelsPhoto {
    src: PexelsSrc,
}

#[derive(Deserialize)]
struct PexelsSrc {
    large: String,
}

#[derive(Debug, Clone)]
pub struct PexelsProvider {
    api_key: String,
    client: Client,
}

impl PexelsProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, BoxError> {
        Ok(Self {
            api_key,
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ImageProvider for PexelsProvider {
    fn name(&self) -> &'static str {
        "pexels"
    }

    async fn search(&self, query: &ImageQuery) -> Result<Vec<String>, BoxError> {
        let url = format!(
            "https://api.pexels.com/v1/search?query={}&per_page={}&orientation=landscape",
            urlencoding::encode(&query.search_terms()),
            CANDIDATES_PER_SEARCH
        );
        let res: PexelsResponse = self
            .client
            .get(url)
            .header("Authorization", &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(res.photos.into_iter().map(|p| p.src.large).collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Provider returning a fixed candidate list, or failing.
    pub(crate) struct FixedProvider {
        pub candidates: Option<Vec<String>>,
    }

    #[async_trait]
    impl ImageProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn search(&self, _query: &ImageQuery) -> Result<Vec<String>, BoxError> {
            self.candidates
                .clone()
                .ok_or_else(|| "search unavailable".into())
        }
    }

    pub(crate) fn fixed(urls: &[&str]) -> Arc<dyn ImageProvider> {
        Arc::new(FixedProvider {
            candidates: Some(urls.iter().map(|s| s.to_string()).collect()),
        })
    }

    fn failing() -> Arc<dyn ImageProvider> {
        Arc::new(FixedProvider { candidates: None })
    }

    fn query(title: &str, category: &str) -> ImageQuery {
        ImageQuery {
            title: title.to_string(),
            teaser: "teaser words here".to_string(),
            category: category.to_string(),
        }
    }

    #[test]
    fn test_search_terms() {
        assert_eq!(
            query("How the Fed Is Rethinking Interest Rates in 2025", "business").search_terms(),
            "Fed Rethinking Interest Rates 2025 business"
        );
        assert_eq!(query("A to Z", "food").search_terms(), "teaser words here food");
    }

    #[tokio::test]
    async fn test_images_are_not_repeated_within_a_batch() {
        let mut resolver = ImageResolver::new(
            vec![fixed(&["https://img/1.jpg", "https://img/2.jpg"])],
            "https://cdn/ph/",
        );
        let q = query("Storm season", "news");

        assert_eq!(resolver.resolve(&q).await, "https://img/1.jpg");
        assert_eq!(resolver.resolve(&q).await, "https://img/2.jpg");
        assert_eq!(resolver.resolve(&q).await, "https://cdn/ph/news.jpg");
        assert_eq!(resolver.used().len(), 2);

        resolver.clear();
        assert_eq!(resolver.resolve(&q).await, "https://img/1.jpg");
    }

    #[tokio::test]
    async fn test_falls_through_failing_provider() {
        let mut resolver = ImageResolver::new(
            vec![failing(), fixed(&["https://img/backup.jpg"])],
            "/ph",
        );
        assert_eq!(
            resolver.resolve(&query("Storm", "news")).await,
            "https://img/backup.jpg"
        );
    }

    #[tokio::test]
    async fn test_placeholder_is_deterministic_per_category() {
        let mut resolver = ImageResolver::new(vec![failing()], "/ph");
        let a = resolver.resolve(&query("One", "Food & Drink")).await;
        let b = resolver.resolve(&query("Two", "Food & Drink")).await;
        assert_eq!(a, "/ph/food-drink.jpg");
        assert_eq!(a, b);
        assert_eq!(resolver.placeholder(""), "/ph/general.jpg");
    }
}
