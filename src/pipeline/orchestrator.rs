//! One end-to-end pipeline execution for one tenant.
//!
//! The orchestrator resolves configuration, runs the stages in order,
//! keeps the shared [`ProgressTracker`] current and always leaves an
//! [`AgentRunLog`] behind, whatever happened.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::draft::{DraftSettings, Drafter};
use super::edit::Editor;
use super::gather::Gatherer;
use super::progress::{PipelineStage, ProgressTracker};
use super::publish::{PublishSettings, Publisher};
use super::PipelineError;
use crate::api::TextGenerator;
use crate::config::{AgentConfig, AgentConfigPatch};
use crate::images::{ImageProvider, ImageResolver};
use crate::models::{AgentRunLog, PublishedArticle, RunStatus};
use crate::sources::feed::FeedReader;
use crate::store::{
    ArticleStore, DuplicateChecker, RunLogStore, SettingsStore, load_agent_config,
};

/// Name recorded on every run log.
pub const AGENT_NAME: &str = "content-pipeline";

/// Collaborators a run needs.
#[derive(Clone)]
pub struct PipelineDeps {
    pub generator: Arc<dyn TextGenerator>,
    pub feed_reader: Arc<dyn FeedReader>,
    pub settings: Arc<dyn SettingsStore>,
    pub articles: Arc<dyn ArticleStore>,
    pub run_logs: Arc<dyn RunLogStore>,
    pub duplicates: Arc<dyn DuplicateChecker>,
    pub image_providers: Vec<Arc<dyn ImageProvider>>,
    pub placeholder_base_url: String,
}

/// What a run produced. The log has already been handed to the run-log store.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub log: AgentRunLog,
    pub published: Vec<PublishedArticle>,
}

#[derive(Clone)]
pub struct Orchestrator {
    deps: PipelineDeps,
    defaults: AgentConfig,
    progress: ProgressTracker,
}

/// Puts the tracker back to idle however the run ends.
struct IdleOnDrop<'a>(&'a ProgressTracker);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps, defaults: AgentConfig) -> Self {
        Self {
            deps,
            defaults,
            progress: ProgressTracker::new(),
        }
    }

    /// Read handle on live progress.
    pub fn progress(&self) -> ProgressTracker {
        self.progress.clone()
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.deps.settings
    }

    pub fn defaults(&self) -> &AgentConfig {
        &self.defaults
    }

    /// Defaults, then the tenant's persisted layer, then `overrides`.
    pub async fn resolve_config(
        &self,
        tenant_id: &str,
        overrides: Option<&AgentConfigPatch>,
    ) -> Result<AgentConfig, PipelineError> {
        let persisted = load_agent_config(self.deps.settings.as_ref(), tenant_id)
            .await
            .map_err(PipelineError::ConfigLoad)?;
        Ok(AgentConfig::merged(
            self.defaults.clone(),
            persisted.as_ref(),
            overrides,
        ))
    }

    /// Execute one end-to-end run for `tenant_id`.
    ///
    /// Stages run strictly in order: gather, draft, edit, deduplicate,
    /// publish. `cancel` is checked before each stage, never mid-item.
    ///
    /// # Arguments
    ///
    /// * `tenant_id` - Tenant whose settings and corpus are used
    /// * `overrides` - Per-run layer applied over the persisted config
    /// * `cancel` - Aborts the run at the next stage boundary
    ///
    /// # Returns
    ///
    /// The run log (status `completed`, `failed` or `cancelled`) and the
    /// published articles. The log has already been appended to the run-log
    /// store; an append failure is only logged.
    #[instrument(level = "info", skip(self, overrides, cancel))]
    pub async fn run(
        &self,
        tenant_id: &str,
        overrides: Option<AgentConfigPatch>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut log = AgentRunLog::start(AGENT_NAME, tenant_id);

        let result = {
            self.progress.begin();
            let _idle = IdleOnDrop(&self.progress);
            self.execute(tenant_id, overrides.as_ref(), cancel, &mut log)
                .await
        };

        let published = match result {
            Ok(published) => {
                log.finish(RunStatus::Completed);
                info!(
                    processed = log.items_processed,
                    published = log.items_successful,
                    "Pipeline run completed"
                );
                published
            }
            Err(e) => {
                let status = match e {
                    PipelineError::Cancelled(_) => RunStatus::Cancelled,
                    _ => RunStatus::Failed,
                };
                error!(error = %e, ?status, "Pipeline run did not complete");
                log.errors.push(e.to_string());
                log.finish(status);
                Vec::new()
            }
        };

        if let Err(e) = self.deps.run_logs.append(&log).await {
            warn!(error = %e, "Failed to persist run log");
        }

        RunOutcome { log, published }
    }

    async fn execute(
        &self,
        tenant_id: &str,
        overrides: Option<&AgentConfigPatch>,
        cancel: &CancellationToken,
        log: &mut AgentRunLog,
    ) -> Result<Vec<PublishedArticle>, PipelineError> {
        let config = self.resolve_config(tenant_id, overrides).await?;
        if !config.enabled {
            info!("Agent disabled for tenant; nothing to do");
            log.note("skipped", "agent disabled");
            return Ok(Vec::new());
        }
        log.note("maxArticlesPerRun", config.max_articles_per_run);
        log.note("categories", config.topics.clone());

        self.checkpoint(cancel, PipelineStage::Gathering, "Gathering topics")?;
        let topics = Gatherer::new(self.deps.feed_reader.clone(), self.deps.generator.clone())
            .gather(&config)
            .await?;
        log.items_processed = topics.len();
        log.note("topicsGathered", topics.len());
        self.progress.update_counters(|c| c.topics_gathered = topics.len());

        self.checkpoint(
            cancel,
            PipelineStage::Drafting,
            format!("Drafting {} topics", topics.len()),
        )?;
        let drafts = Drafter::new(self.deps.generator.clone())
            .draft_all(&topics, &DraftSettings::from_config(&config))
            .await;
        log.note("draftsCreated", drafts.len());
        self.progress.update_counters(|c| c.drafts_created = drafts.len());

        self.checkpoint(
            cancel,
            PipelineStage::Editing,
            format!("Editing {} drafts", drafts.len()),
        )?;
        let edited = Editor::new(self.deps.generator.clone(), config.ai_model.clone())
            .edit_all(drafts)
            .await;
        log.note("articlesEdited", edited.len());
        self.progress.update_counters(|c| c.articles_edited = edited.len());

        self.checkpoint(cancel, PipelineStage::Deduplicating, "Checking for duplicates")?;
        let deduped = self
            .deps
            .duplicates
            .dedupe(tenant_id, edited)
            .await
            .map_err(|e| PipelineError::stage(PipelineStage::Deduplicating, e))?;
        let skipped = deduped.duplicates.len();
        log.note("duplicatesSkipped", skipped);
        self.progress.update_counters(|c| c.duplicates_skipped = skipped);

        self.checkpoint(
            cancel,
            PipelineStage::Publishing,
            format!("Publishing {} articles", deduped.unique.len()),
        )?;
        // A fresh resolver per run keeps the used-image set scoped to this batch.
        let resolver = ImageResolver::new(
            self.deps.image_providers.clone(),
            &self.deps.placeholder_base_url,
        );
        let settings = PublishSettings {
            tenant_id: tenant_id.to_string(),
            min_quality_score: config.min_quality_score,
            include_images: config.article_style.include_images,
        };
        let published = Publisher::new(self.deps.articles.clone(), resolver)
            .publish_all(deduped.unique, &settings)
            .await;
        log.note("articlesPublished", published.len());
        self.progress.update_counters(|c| c.articles_published = published.len());

        log.items_successful = published.len();
        log.items_failed = log.items_processed.saturating_sub(published.len());
        Ok(published)
    }

    fn checkpoint(
        &self,
        cancel: &CancellationToken,
        stage: PipelineStage,
        details: impl Into<String>,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(stage));
        }
        self.progress.enter(stage, details);
        Ok(())
    }
}
