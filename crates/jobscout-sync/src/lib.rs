//! Scrape run orchestration: listing pages, per-card enrichment,
//! normalization and upsert, with a structured run summary.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use jobscout_core::{normalize, DetailFields, ExtractedJob};
use jobscout_extract::{SiteExtractor, SiteProfile};
use jobscout_session::{
    BrowserSettings, ChromeLauncher, LaunchError, PageSession, SessionError, SessionLauncher,
};
use jobscout_storage::{JobStore, MemoryJobStore, PgJobStore, SnapshotStore, UpsertCoordinator};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug_span, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobscout-sync";

pub const DEFAULT_LISTING_URL: &str = "https://devsunite.com/jobs";

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub listing_url: String,
    pub max_pages: usize,
    pub listing_timeout: Duration,
    pub detail_timeout: Duration,
    pub browser: BrowserSettings,
    pub database_url: Option<String>,
    pub artifacts_dir: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub site_profile: Option<PathBuf>,
    pub web_port: u16,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ScrapeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or unparsable values
    /// fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
                .unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            listing_url: non_empty("SCOUT_LISTING_URL")
                .unwrap_or_else(|| DEFAULT_LISTING_URL.to_string()),
            max_pages: number("SCOUT_MAX_PAGES", 5) as usize,
            listing_timeout: Duration::from_secs(number("SCOUT_LISTING_TIMEOUT_SECS", 15)),
            detail_timeout: Duration::from_secs(number("SCOUT_DETAIL_TIMEOUT_SECS", 10)),
            browser: BrowserSettings {
                chrome_executable: non_empty("CHROME_BIN").map(PathBuf::from),
                headless: flag("SCOUT_HEADLESS", true),
                no_sandbox: flag("SCOUT_NO_SANDBOX", true),
                user_agent: non_empty("SCOUT_USER_AGENT"),
                settle: Duration::from_millis(number("SCOUT_SETTLE_MILLIS", 2000)),
            },
            database_url: non_empty("DATABASE_URL"),
            artifacts_dir: non_empty("ARTIFACTS_DIR").map(PathBuf::from),
            reports_dir: non_empty("REPORTS_DIR").map(PathBuf::from),
            site_profile: non_empty("SCOUT_SITE_PROFILE").map(PathBuf::from),
            web_port: lookup("SCOUT_WEB_PORT")
                .and_then(|v| v.trim().parse::<u16>().ok())
                .unwrap_or(8000),
        }
    }
}

/// Per-run knobs supplied by whoever triggers the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
    pub max_pages: Option<usize>,
    pub max_jobs: Option<usize>,
    pub skip_details: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    Listing,
    Enrichment,
    Validation,
    Persistence,
}

/// A recoverable problem recorded during a run. Run-scoped problems carry
/// no card index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardError {
    pub card_index: Option<usize>,
    pub stage: ErrorStage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages_visited: usize,
    pub jobs_scraped: usize,
    pub jobs_created: usize,
    pub jobs_updated: usize,
    pub details_scraped: usize,
    pub errors: Vec<CardError>,
}

/// A run that stopped before producing a summary.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error("browser could not be started: {0}")]
    Launch(#[from] LaunchError),
    #[error("listing page {url} could not be loaded: {message}")]
    ListingUnavailable { url: String, message: String },
    #[error("scrape run aborted: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("navigating to {url}: {source}")]
    Navigation {
        url: String,
        #[source]
        source: SessionError,
    },
    #[error("detail page {url} not ready within {timeout:?}")]
    NotReady { url: String, timeout: Duration },
    #[error("detail page {url} has no description or skills")]
    MissingContent { url: String },
    #[error("reading detail page {url}: {source}")]
    Source {
        url: String,
        #[source]
        source: SessionError,
    },
}

/// Detail fields plus the page source they came from.
#[derive(Debug, Clone)]
pub struct EnrichedPage {
    pub fields: DetailFields,
    pub html: String,
}

/// Drives the shared session to a detail page and extracts its long-form
/// fields. Every failure is per-card and recoverable.
pub struct DetailEnricher<'a> {
    extractor: &'a SiteExtractor,
    timeout: Duration,
}

impl<'a> DetailEnricher<'a> {
    pub fn new(extractor: &'a SiteExtractor, timeout: Duration) -> Self {
        Self { extractor, timeout }
    }

    pub async fn enrich(
        &self,
        session: &mut dyn PageSession,
        detail_url: &str,
    ) -> Result<EnrichedPage, EnrichError> {
        let ready_selector = &self.extractor.profile().detail_ready;
        let readiness = session
            .navigate(detail_url, ready_selector, self.timeout)
            .await
            .map_err(|source| EnrichError::Navigation {
                url: detail_url.to_string(),
                source,
            })?;
        if !readiness.is_ready() {
            return Err(EnrichError::NotReady {
                url: detail_url.to_string(),
                timeout: self.timeout,
            });
        }
        let html = session
            .page_source()
            .await
            .map_err(|source| EnrichError::Source {
                url: detail_url.to_string(),
                source,
            })?;
        let fields = self.extractor.parse_detail(&html);
        if fields.full_description.is_none() && fields.skills.is_empty() {
            return Err(EnrichError::MissingContent {
                url: detail_url.to_string(),
            });
        }
        Ok(EnrichedPage { fields, html })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardOutcome {
    Created,
    Updated,
    Rejected,
    Failed,
}

/// Progress hooks for a run. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn card_started(&self, _index: usize, _card: &ExtractedJob) {}

    fn card_finished(&self, _index: usize, _outcome: CardOutcome) {}

    fn warning(&self, _error: &CardError) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Reports every card to the log at info level. Warnings are already
/// logged by the orchestrator.
#[derive(Debug, Default)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn card_started(&self, index: usize, card: &ExtractedJob) {
        info!(index, role = %card.role, company = %card.company_name, "processing card");
    }

    fn card_finished(&self, index: usize, outcome: CardOutcome) {
        info!(index, ?outcome, "card done");
    }
}

#[derive(Debug, Default)]
struct Progress {
    pages_visited: usize,
    jobs_scraped: usize,
    jobs_created: usize,
    jobs_updated: usize,
    details_scraped: usize,
    errors: Vec<CardError>,
}

pub struct Orchestrator {
    launcher: Arc<dyn SessionLauncher>,
    upsert: UpsertCoordinator,
    extractor: Arc<SiteExtractor>,
    config: ScrapeConfig,
    observer: Arc<dyn RunObserver>,
    snapshots: Option<SnapshotStore>,
}

impl Orchestrator {
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        store: Arc<dyn JobStore>,
        extractor: Arc<SiteExtractor>,
        config: ScrapeConfig,
    ) -> Self {
        let snapshots = config.artifacts_dir.clone().map(SnapshotStore::new);
        Self {
            launcher,
            upsert: UpsertCoordinator::new(store),
            extractor,
            config,
            observer: Arc::new(NoopObserver),
            snapshots,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Runs one scrape. The session is closed before returning on every
    /// path, including a panic inside the card loop.
    pub async fn run(&self, opts: RunOptions) -> Result<RunSummary, RunFailure> {
        let run_id = Uuid::new_v4();
        let span = info_span!("scrape_run", %run_id);
        async move {
            let started_at = Utc::now();
            info!(?opts, listing = %self.config.listing_url, "scrape run starting");
            let mut session = self.launcher.open().await?;

            let outcome = AssertUnwindSafe(self.drive(session.as_mut(), &opts))
                .catch_unwind()
                .await;
            session.close().await;

            let progress = match outcome {
                Ok(result) => result?,
                Err(panic) => return Err(RunFailure::Internal(panic_message(panic.as_ref()))),
            };

            let summary = RunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                pages_visited: progress.pages_visited,
                jobs_scraped: progress.jobs_scraped,
                jobs_created: progress.jobs_created,
                jobs_updated: progress.jobs_updated,
                details_scraped: progress.details_scraped,
                errors: progress.errors,
            };
            info!(
                scraped = summary.jobs_scraped,
                created = summary.jobs_created,
                updated = summary.jobs_updated,
                errors = summary.errors.len(),
                "scrape run finished"
            );

            if let Some(dir) = &self.config.reports_dir {
                if let Err(err) = write_report(dir, &summary).await {
                    warn!(error = %format!("{err:#}"), "writing run report");
                }
            }
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        session: &mut dyn PageSession,
        opts: &RunOptions,
    ) -> Result<Progress, RunFailure> {
        let mut progress = Progress::default();
        let max_pages = opts.max_pages.unwrap_or(self.config.max_pages).max(1);
        let job_limit_reached =
            |p: &Progress| opts.max_jobs.is_some_and(|max| p.jobs_scraped >= max);

        for page_number in 1..=max_pages {
            if job_limit_reached(&progress) {
                break;
            }
            let Some(html) = self.load_listing_page(session, page_number, &mut progress).await? else {
                break;
            };
            let listing = self.extractor.parse_listing(&html);
            progress.pages_visited += 1;
            info!(
                page = page_number,
                cards = listing.cards.len(),
                card_strategy = ?listing.card_strategy,
                "listing page parsed"
            );
            if listing.cards.is_empty() {
                break;
            }

            for card in listing.cards {
                if job_limit_reached(&progress) {
                    break;
                }
                let index = progress.jobs_scraped;
                progress.jobs_scraped += 1;
                self.process_card(session, index, card, opts, &mut progress)
                    .instrument(debug_span!("card", index))
                    .await;
            }
        }
        Ok(progress)
    }

    /// Loads listing page `page_number`. `Ok(None)` ends pagination.
    async fn load_listing_page(
        &self,
        session: &mut dyn PageSession,
        page_number: usize,
        progress: &mut Progress,
    ) -> Result<Option<String>, RunFailure> {
        let url = &self.config.listing_url;
        let profile = self.extractor.profile();
        let timeout = self.config.listing_timeout;

        let unavailable = |err: SessionError| RunFailure::ListingUnavailable {
            url: url.clone(),
            message: err.to_string(),
        };

        let readiness = match session.navigate(url, &profile.listing_ready, timeout).await {
            Ok(readiness) => readiness,
            Err(err) if page_number == 1 => return Err(unavailable(err)),
            Err(err) => {
                self.record(progress, None, ErrorStage::Listing, format!("listing page {page_number}: {err}"));
                return Ok(None);
            }
        };

        if page_number > 1 {
            match session.advance_listing(page_number).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(page = page_number, "listing has no further pages");
                    return Ok(None);
                }
                Err(err) => {
                    self.record(
                        progress,
                        None,
                        ErrorStage::Listing,
                        format!("advancing to listing page {page_number}: {err}"),
                    );
                    return Ok(None);
                }
            }
        }

        if !readiness.is_ready() {
            self.record(
                progress,
                None,
                ErrorStage::Listing,
                format!("listing page {page_number} not ready within {timeout:?}; parsing what loaded"),
            );
        }

        let html = match session.page_source().await {
            Ok(html) => html,
            Err(err) if page_number == 1 => return Err(unavailable(err)),
            Err(err) => {
                self.record(progress, None, ErrorStage::Listing, format!("listing page {page_number}: {err}"));
                return Ok(None);
            }
        };
        self.archive("listing", &html).await;
        Ok(Some(html))
    }

    async fn process_card(
        &self,
        session: &mut dyn PageSession,
        index: usize,
        card: ExtractedJob,
        opts: &RunOptions,
        progress: &mut Progress,
    ) {
        self.observer.card_started(index, &card);
        let mut job = card;

        if !opts.skip_details {
            match job.detail_url.clone() {
                Some(url) => {
                    let enricher = DetailEnricher::new(&self.extractor, self.config.detail_timeout);
                    match enricher.enrich(session, &url).await {
                        Ok(page) => {
                            self.archive("detail", &page.html).await;
                            job = job.with_detail(page.fields);
                            progress.details_scraped += 1;
                        }
                        Err(err) => {
                            self.record(progress, Some(index), ErrorStage::Enrichment, err.to_string())
                        }
                    }
                }
                None => self.record(
                    progress,
                    Some(index),
                    ErrorStage::Enrichment,
                    "card has no detail link".to_string(),
                ),
            }
        }

        let normalized = match normalize(job) {
            Ok(normalized) => normalized,
            Err(err) => {
                self.record(progress, Some(index), ErrorStage::Validation, err.to_string());
                self.observer.card_finished(index, CardOutcome::Rejected);
                return;
            }
        };

        match self.upsert.upsert(&normalized).await {
            Ok(outcome) if outcome.was_created => {
                progress.jobs_created += 1;
                self.observer.card_finished(index, CardOutcome::Created);
            }
            Ok(_) => {
                progress.jobs_updated += 1;
                self.observer.card_finished(index, CardOutcome::Updated);
            }
            Err(err) => {
                self.record(progress, Some(index), ErrorStage::Persistence, err.to_string());
                self.observer.card_finished(index, CardOutcome::Failed);
            }
        }
    }

    fn record(&self, progress: &mut Progress, card_index: Option<usize>, stage: ErrorStage, message: String) {
        let error = CardError {
            card_index,
            stage,
            message,
        };
        warn!(card_index = ?error.card_index, stage = ?error.stage, "{}", error.message);
        self.observer.warning(&error);
        progress.errors.push(error);
    }

    async fn archive(&self, kind: &str, html: &str) {
        if let Some(store) = &self.snapshots {
            if let Err(err) = store.store_page(Utc::now(), kind, html).await {
                warn!(error = %format!("{err:#}"), kind, "archiving page snapshot");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic in scrape pipeline".to_string()
    }
}

/// Writes `<dir>/<run_id>/summary.json` and `brief.md`.
pub async fn write_report(dir: &Path, summary: &RunSummary) -> anyhow::Result<PathBuf> {
    let run_dir = dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(run_dir.join("summary.json"), json)
        .await
        .context("writing summary.json")?;

    let errors = if summary.errors.is_empty() {
        "- none".to_string()
    } else {
        summary
            .errors
            .iter()
            .map(|e| match e.card_index {
                Some(index) => format!("- card {index} ({:?}): {}", e.stage, e.message),
                None => format!("- run ({:?}): {}", e.stage, e.message),
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let brief = format!(
        "# Scrape Run {}\n\n- Started: {}\n- Finished: {}\n- Listing pages: {}\n- Jobs scraped: {}\n- Created: {}\n- Updated: {}\n- Detail pages: {}\n\n## Warnings\n{}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.pages_visited,
        summary.jobs_scraped,
        summary.jobs_created,
        summary.jobs_updated,
        summary.details_scraped,
        errors
    );
    fs::write(run_dir.join("brief.md"), brief)
        .await
        .context("writing brief.md")?;
    Ok(run_dir)
}

/// Built-in profile, or the YAML file named by `SCOUT_SITE_PROFILE`.
pub fn load_extractor(config: &ScrapeConfig) -> anyhow::Result<SiteExtractor> {
    let profile = match &config.site_profile {
        Some(path) => SiteProfile::load(path)?,
        None => SiteProfile::devsunite(),
    };
    profile.compile().context("compiling site profile")
}

/// Postgres when `DATABASE_URL` is set, otherwise a fresh in-memory store.
pub async fn build_store(config: &ScrapeConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgJobStore::connect(url)
                .await
                .context("connecting to DATABASE_URL")?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; results are kept in memory for this process only");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

pub async fn orchestrator_from_env() -> anyhow::Result<Orchestrator> {
    let config = ScrapeConfig::from_env();
    let extractor = Arc::new(load_extractor(&config)?);
    let store = build_store(&config).await?;
    let launcher = Arc::new(ChromeLauncher::new(config.browser.clone()));
    Ok(Orchestrator::new(launcher, store, extractor, config).with_observer(Arc::new(LogObserver)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use jobscout_core::{JobPosting, NOT_SPECIFIED, UNKNOWN_POSITION};
    use jobscout_session::FixtureLauncher;
    use jobscout_storage::StoreError;

    use super::*;

    const LISTING: &str = "https://devsunite.com/jobs";
    const CARD_3_DETAIL: &str = "https://devsunite.com/jobs/zeta-frontend-intern";

    fn fixture_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("fixtures/devsunite")
    }

    fn launcher() -> FixtureLauncher {
        FixtureLauncher::from_dir(fixture_dir()).unwrap()
    }

    fn extractor() -> Arc<SiteExtractor> {
        Arc::new(SiteProfile::devsunite().compile().unwrap())
    }

    fn orchestrator(launcher: FixtureLauncher, store: Arc<dyn JobStore>) -> Orchestrator {
        Orchestrator::new(Arc::new(launcher), store, extractor(), ScrapeConfig::default())
    }

    fn first_page() -> RunOptions {
        RunOptions {
            max_pages: Some(1),
            ..Default::default()
        }
    }

    fn by_role(records: &[JobPosting]) -> HashMap<String, JobPosting> {
        records.iter().map(|r| (r.role.clone(), r.clone())).collect()
    }

    #[tokio::test]
    async fn full_run_persists_every_card_with_details() {
        let store = Arc::new(MemoryJobStore::new());
        let launcher = launcher();
        let journal = launcher.journal();
        let summary = orchestrator(launcher, store.clone())
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.pages_visited, 2);
        assert_eq!(summary.jobs_scraped, 7);
        assert_eq!(summary.jobs_created, 7);
        assert_eq!(summary.jobs_updated, 0);
        assert_eq!(summary.details_scraped, 7);
        assert!(summary.errors.is_empty(), "{:?}", summary.errors);
        assert_eq!(journal.closes(), 1);

        let records = by_role(&store.records().await);
        let irdeto = &records["Software Engineer"];
        assert_eq!(irdeto.company_name, "Irdeto");
        assert_eq!(irdeto.location, "Noida");
        assert_eq!(irdeto.compensation_min, Some(80_000));
        assert_eq!(irdeto.compensation_max, Some(100_000));
        assert!(irdeto.details_scraped);
        assert_eq!(irdeto.skills_required, vec!["Rust", "Go", "Kafka"]);
        assert_eq!(irdeto.apply_link.as_deref(), Some("https://careers.irdeto.com/apply/42"));

        // Second page: secondary title selector and the default title.
        assert_eq!(records["Platform Engineer"].company_name, "Atlan");
        let unknown = &records[UNKNOWN_POSITION];
        assert_eq!(unknown.company_name, "Groww");
        assert!(unknown.details_scraped);
    }

    #[tokio::test]
    async fn detail_facts_and_inferred_skills_fill_gaps() {
        let store = Arc::new(MemoryJobStore::new());
        orchestrator(launcher(), store.clone())
            .run(first_page())
            .await
            .unwrap();
        let records = by_role(&store.records().await);

        // Card without a description or compensation: both come from the detail page.
        let data = &records["Data Engineer"];
        assert!(data.short_description.starts_with("Freshworks is looking for a data engineer"));
        assert!(data.short_description.ends_with("..."));
        assert_eq!(data.compensation_raw.as_deref(), Some("₹18,00,000 - ₹24,00,000"));
        assert_eq!(data.skills_required, vec!["Python", "Spark", "AWS", "SQL"]);

        // No structured skill list on the detail page: inferred from the description.
        let devops = &records["DevOps Engineer"];
        assert_eq!(devops.skills_required, vec!["Terraform", "Kubernetes", "AWS", "Linux"]);
        assert_eq!(devops.experience_required, NOT_SPECIFIED);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let store = Arc::new(MemoryJobStore::new());
        let first = orchestrator(launcher(), store.clone())
            .run(RunOptions::default())
            .await
            .unwrap();
        let before = store.records().await;

        let second = orchestrator(launcher(), store.clone())
            .run(RunOptions::default())
            .await
            .unwrap();
        let after = store.records().await;

        assert_eq!(second.jobs_created, 0);
        assert_eq!(second.jobs_updated, first.jobs_created);
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            let mut b = b.clone();
            b.updated_at = a.updated_at;
            assert_eq!(a, &b);
        }
    }

    #[tokio::test]
    async fn failed_detail_fetch_is_isolated_to_its_card() {
        let store = Arc::new(MemoryJobStore::new());
        let launcher = launcher().fail_navigation(CARD_3_DETAIL);
        let summary = orchestrator(launcher, store.clone())
            .run(first_page())
            .await
            .unwrap();

        assert_eq!(summary.jobs_scraped, 5);
        assert_eq!(summary.jobs_created, 5);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].card_index, Some(2));
        assert_eq!(summary.errors[0].stage, ErrorStage::Enrichment);

        let records = store.records().await;
        assert_eq!(records.iter().filter(|r| r.details_scraped).count(), 4);
        let intern = records.iter().find(|r| !r.details_scraped).unwrap();
        assert_eq!(intern.role, "Frontend Intern");
        assert_eq!(intern.full_description, None);
    }

    #[tokio::test]
    async fn skip_details_never_visits_detail_pages() {
        let store = Arc::new(MemoryJobStore::new());
        let launcher = launcher();
        let journal = launcher.journal();
        let summary = orchestrator(launcher, store.clone())
            .run(RunOptions {
                skip_details: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(summary.details_scraped, 0);
        assert!(summary.errors.is_empty());
        assert!(journal.navigations().await.iter().all(|url| url == LISTING));
        let records = store.records().await;
        assert_eq!(records.len(), 7);
        assert!(records.iter().all(|r| !r.details_scraped));
    }

    #[tokio::test]
    async fn max_jobs_stops_early_and_still_closes() {
        let store = Arc::new(MemoryJobStore::new());
        let launcher = launcher();
        let journal = launcher.journal();
        let summary = orchestrator(launcher, store.clone())
            .run(RunOptions {
                max_jobs: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(summary.jobs_scraped, 2);
        assert_eq!(summary.pages_visited, 1);
        assert_eq!(store.len().await, 2);
        assert_eq!(journal.closes(), 1);
    }

    #[tokio::test]
    async fn launch_failure_aborts_without_summary() {
        let store = Arc::new(MemoryJobStore::new());
        let launcher = launcher().fail_launch("chrome binary not found");
        let err = orchestrator(launcher, store.clone())
            .run(RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunFailure::Launch(_)));
        assert!(err.to_string().contains("chrome binary not found"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn unreachable_listing_is_fatal_and_closes_session() {
        let launcher = launcher().fail_navigation(LISTING);
        let journal = launcher.journal();
        let err = orchestrator(launcher, Arc::new(MemoryJobStore::new()))
            .run(RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunFailure::ListingUnavailable { .. }));
        assert_eq!(journal.closes(), 1);
    }

    #[tokio::test]
    async fn empty_listing_is_a_successful_run() {
        let mut site = jobscout_session::FixtureSite {
            listing_url: LISTING.to_string(),
            ..Default::default()
        };
        site.listing_pages.push("<main><p>No openings</p></main>".to_string());
        let summary = orchestrator(FixtureLauncher::new(site), Arc::new(MemoryJobStore::new()))
            .run(RunOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.pages_visited, 1);
        assert_eq!(summary.jobs_scraped, 0);
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn listing_timeout_still_parses_partial_html() {
        let site = jobscout_session::FixtureSite {
            listing_url: LISTING.to_string(),
            listing_pages: vec![
                r#"<div class="group relative w-full"><img alt="Acme"><h3>QA Engineer</h3></div>"#
                    .to_string(),
            ],
            ..Default::default()
        };
        let store = Arc::new(MemoryJobStore::new());
        let summary = orchestrator(FixtureLauncher::new(site), store.clone())
            .run(RunOptions {
                skip_details: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(summary.jobs_created, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].card_index, None);
        assert_eq!(summary.errors[0].stage, ErrorStage::Listing);
    }

    #[tokio::test]
    async fn invalid_card_is_dropped_and_the_batch_continues() {
        let site = jobscout_session::FixtureSite {
            listing_url: LISTING.to_string(),
            listing_pages: vec![concat!(
                r#"<div class="group relative w-full"><h3>No Company Role</h3></div>"#,
                r#"<div class="group relative w-full"><img alt="Acme"><h3>QA Engineer</h3></div>"#,
            )
            .to_string()],
            ..Default::default()
        };
        let store = Arc::new(MemoryJobStore::new());
        let summary = orchestrator(FixtureLauncher::new(site), store.clone())
            .run(RunOptions {
                skip_details: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(summary.jobs_scraped, 2);
        assert_eq!(summary.jobs_created, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].card_index, Some(0));
        assert_eq!(summary.errors[0].stage, ErrorStage::Validation);
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].role, "QA Engineer");
        assert_eq!(records[0].company_name, "Acme");
    }

    /// Delegates to memory but refuses writes for one role.
    struct FlakyStore {
        inner: MemoryJobStore,
        refuse_role: &'static str,
        panic_instead: bool,
    }

    #[async_trait]
    impl JobStore for FlakyStore {
        async fn find_by_key(&self, role: &str, company: &str) -> Result<Option<JobPosting>, StoreError> {
            self.inner.find_by_key(role, company).await
        }

        async fn create(&self, posting: JobPosting) -> Result<JobPosting, StoreError> {
            if posting.role == self.refuse_role {
                if self.panic_instead {
                    panic!("store exploded");
                }
                return Err(StoreError::Encoding("disk full".to_string()));
            }
            self.inner.create(posting).await
        }

        async fn update(&self, posting: JobPosting) -> Result<JobPosting, StoreError> {
            self.inner.update(posting).await
        }
    }

    #[tokio::test]
    async fn persistence_failure_does_not_stop_the_batch() {
        let store = Arc::new(FlakyStore {
            inner: MemoryJobStore::new(),
            refuse_role: "Backend Developer",
            panic_instead: false,
        });
        let summary = orchestrator(launcher(), store.clone())
            .run(first_page())
            .await
            .unwrap();
        assert_eq!(summary.jobs_created, 4);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].card_index, Some(1));
        assert_eq!(summary.errors[0].stage, ErrorStage::Persistence);
        assert_eq!(store.inner.len().await, 4);
    }

    #[tokio::test]
    async fn panic_in_card_loop_still_closes_session() {
        let launcher = launcher();
        let journal = launcher.journal();
        let store = Arc::new(FlakyStore {
            inner: MemoryJobStore::new(),
            refuse_role: "Software Engineer",
            panic_instead: true,
        });
        let err = orchestrator(launcher, store).run(first_page()).await.unwrap_err();
        assert!(matches!(err, RunFailure::Internal(ref m) if m.contains("store exploded")));
        assert_eq!(journal.closes(), 1);
    }

    struct Recording(StdMutex<Vec<(usize, CardOutcome)>>);

    impl RunObserver for Recording {
        fn card_finished(&self, index: usize, outcome: CardOutcome) {
            self.0.lock().unwrap().push((index, outcome));
        }
    }

    #[tokio::test]
    async fn observer_sees_every_card_outcome() {
        let observer = Arc::new(Recording(StdMutex::new(Vec::new())));
        let store = Arc::new(MemoryJobStore::new());
        orchestrator(launcher(), store.clone())
            .with_observer(observer.clone())
            .run(first_page())
            .await
            .unwrap();
        orchestrator(launcher(), store)
            .with_observer(observer.clone())
            .run(RunOptions {
                max_pages: Some(1),
                max_jobs: Some(1),
                skip_details: true,
            })
            .await
            .unwrap();
        let seen = observer.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 6);
        assert!(seen[..5].iter().all(|(_, o)| *o == CardOutcome::Created));
        assert_eq!(seen[5], (0, CardOutcome::Updated));
    }

    #[tokio::test]
    async fn writes_reports_and_snapshots_when_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ScrapeConfig {
            reports_dir: Some(tmp.path().join("reports")),
            artifacts_dir: Some(tmp.path().join("artifacts")),
            ..Default::default()
        };
        let summary = Orchestrator::new(
            Arc::new(launcher()),
            Arc::new(MemoryJobStore::new()),
            extractor(),
            config,
        )
        .run(first_page())
        .await
        .unwrap();

        let run_dir = tmp.path().join("reports").join(summary.run_id.to_string());
        let json = std::fs::read_to_string(run_dir.join("summary.json")).unwrap();
        let parsed: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.jobs_created, 5);
        let brief = std::fs::read_to_string(run_dir.join("brief.md")).unwrap();
        assert!(brief.contains("- Created: 5"));
        assert!(tmp.path().join("artifacts").read_dir().unwrap().next().is_some());
    }

    #[test]
    fn config_reads_overrides_and_defaults() {
        let env = HashMap::from([
            ("SCOUT_MAX_PAGES", "2"),
            ("SCOUT_HEADLESS", "false"),
            ("SCOUT_DETAIL_TIMEOUT_SECS", "not-a-number"),
            ("DATABASE_URL", ""),
            ("CHROME_BIN", "/usr/bin/chromium"),
        ]);
        let config = ScrapeConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.max_pages, 2);
        assert!(!config.browser.headless);
        assert!(config.browser.no_sandbox);
        assert_eq!(config.detail_timeout, Duration::from_secs(10));
        assert_eq!(config.listing_timeout, Duration::from_secs(15));
        assert_eq!(config.database_url, None);
        assert_eq!(config.listing_url, DEFAULT_LISTING_URL);
        assert_eq!(
            config.browser.chrome_executable,
            Some(PathBuf::from("/usr/bin/chromium"))
        );
        assert_eq!(config.web_port, 8000);
    }

    #[test]
    fn out_of_range_port_falls_back_to_default() {
        for raw in ["70000", "65536", "-1"] {
            let config = ScrapeConfig::from_lookup(|key| (key == "SCOUT_WEB_PORT").then(|| raw.to_string()));
            assert_eq!(config.web_port, 8000, "{raw}");
        }
        let config = ScrapeConfig::from_lookup(|key| (key == "SCOUT_WEB_PORT").then(|| "9090".to_string()));
        assert_eq!(config.web_port, 9090);
    }

    #[test]
    fn card_errors_serialize_with_camel_case_index() {
        let error = CardError {
            card_index: Some(2),
            stage: ErrorStage::Enrichment,
            message: "detail page timed out".to_string(),
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["cardIndex"], 2);
        assert_eq!(value["stage"], "enrichment");
        assert!(value.get("card_index").is_none());
    }

    #[test]
    fn run_options_accept_camel_case_json() {
        let opts: RunOptions = serde_json::from_str(r#"{"maxJobs": 3, "skipDetails": true}"#).unwrap();
        assert_eq!(opts.max_jobs, Some(3));
        assert!(opts.skip_details);
        assert_eq!(opts.max_pages, None);
    }
}
