//! Page sessions: a live Chrome tab driven over CDP, or a fixture replay
//! double serving static HTML from disk.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use scraper::{Html, Selector};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "jobscout-session";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Outcome of a bounded wait. A timeout is not an error; the caller decides
/// whether the HTML already present is good enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("invalid ready selector {0:?}")]
    InvalidSelector(String),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("session is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid browser configuration: {0}")]
    Config(String),
    #[error("browser failed to start: {0}")]
    Browser(String),
}

/// One browser tab owned by a single scrape run.
#[async_trait]
pub trait PageSession: Send {
    async fn navigate(
        &mut self,
        url: &str,
        ready_selector: &str,
        timeout: Duration,
    ) -> Result<Readiness, SessionError>;

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<Readiness, SessionError>;

    async fn page_source(&mut self) -> Result<String, SessionError>;

    /// Moves a freshly loaded listing (page 1) forward to `target_page`.
    /// `Ok(false)` means the listing has no such page.
    async fn advance_listing(&mut self, target_page: usize) -> Result<bool, SessionError>;

    /// Releases the browser. Safe to call more than once.
    async fn close(&mut self);
}

#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageSession>, LaunchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSettings {
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
    pub no_sandbox: bool,
    pub user_agent: Option<String>,
    /// Extra wait after the ready selector appears, for client-side rendering.
    pub settle: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            headless: true,
            no_sandbox: true,
            user_agent: None,
            settle: Duration::from_millis(2000),
        }
    }
}

pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self) -> Result<BrowserConfig, LaunchError> {
        let mut builder = BrowserConfig::builder().arg("--disable-dev-shm-usage");
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if self.settings.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.settings.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(LaunchError::Config)
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn open(&self) -> Result<Box<dyn PageSession>, LaunchError> {
        let config = self.browser_config()?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| LaunchError::Browser(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler stopped");
                    break;
                }
            }
        });

        let page = match new_tab(&browser, self.settings.user_agent.as_deref()).await {
            Ok(page) => page,
            Err(err) => {
                if let Err(close_err) = browser.close().await {
                    warn!(error = %close_err, "closing browser after failed tab open");
                }
                handler_task.abort();
                return Err(err);
            }
        };
        info!(headless = self.settings.headless, "browser session opened");

        Ok(Box::new(ChromeSession {
            browser: Some(browser),
            page: Some(page),
            handler: Some(handler_task),
            settle: self.settings.settle,
            listing_ready: None,
        }))
    }
}

async fn new_tab(browser: &Browser, user_agent: Option<&str>) -> Result<Page, LaunchError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| LaunchError::Browser(e.to_string()))?;
    if let Some(agent) = user_agent {
        page.set_user_agent(agent)
            .await
            .map_err(|e| LaunchError::Browser(e.to_string()))?;
    }
    Ok(page)
}

/// Chrome tab plus the browser process that owns it. Dropping an unclosed
/// session spawns the close on the current runtime.
pub struct ChromeSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
    settle: Duration,
    listing_ready: Option<(String, Duration)>,
}

impl ChromeSession {
    fn page(&self) -> Result<&Page, SessionError> {
        self.page.as_ref().ok_or(SessionError::Closed)
    }

    async fn click_page_control(&self, page_number: usize) -> Result<bool, SessionError> {
        let script = format!(
            r#"(() => {{
  const target = "{page_number}";
  const controls = Array.from(document.querySelectorAll('button, a'));
  const numbered = controls.find(c => c.textContent.trim() === target);
  if (numbered) {{ numbered.click(); return true; }}
  const next = controls.find(c => {{
    const label = (c.getAttribute('aria-label') || c.textContent || '').trim().toLowerCase();
    return !c.disabled && (label === 'next' || label.startsWith('next ') || label === 'go to next page' || label === '›' || label === '»');
  }});
  if (next) {{ next.click(); return true; }}
  return false;
}})()"#
        );
        let result = self
            .page()?
            .evaluate(script)
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))?;
        result
            .into_value::<bool>()
            .map_err(|e| SessionError::Browser(e.to_string()))
    }
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn navigate(
        &mut self,
        url: &str,
        ready_selector: &str,
        wait: Duration,
    ) -> Result<Readiness, SessionError> {
        let started = Instant::now();
        match timeout(wait, self.page()?.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                return Err(SessionError::Navigation {
                    url: url.to_string(),
                    message: err.to_string(),
                })
            }
            Err(_) => {
                warn!(url, "page load did not finish in time");
                return Ok(Readiness::TimedOut);
            }
        }
        self.listing_ready = Some((ready_selector.to_string(), wait));
        let remaining = wait.saturating_sub(started.elapsed());
        self.wait_for(ready_selector, remaining).await
    }

    async fn wait_for(&mut self, selector: &str, wait: Duration) -> Result<Readiness, SessionError> {
        let deadline = Instant::now() + wait;
        loop {
            if self.page()?.find_element(selector).await.is_ok() {
                sleep(self.settle).await;
                return Ok(Readiness::Ready);
            }
            if Instant::now() >= deadline {
                debug!(selector, "ready selector did not appear");
                return Ok(Readiness::TimedOut);
            }
            sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn page_source(&mut self) -> Result<String, SessionError> {
        self.page()?
            .content()
            .await
            .map_err(|e| SessionError::Browser(e.to_string()))
    }

    async fn advance_listing(&mut self, target_page: usize) -> Result<bool, SessionError> {
        let (ready, wait) = self
            .listing_ready
            .clone()
            .unwrap_or_else(|| ("main".to_string(), Duration::from_secs(15)));
        for page_number in 2..=target_page {
            if !self.click_page_control(page_number).await? {
                return Ok(false);
            }
            self.wait_for(&ready, wait).await?;
        }
        Ok(true)
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(err) = page.close().await {
                debug!(error = %err, "closing tab");
            }
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(err) = browser.close().await {
                warn!(error = %err, "closing browser");
            }
            if let Err(err) = browser.wait().await {
                warn!(error = %err, "waiting for browser exit");
            }
            info!("browser session closed");
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        let handler = self.handler.take();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = browser.close().await {
                        warn!(error = %err, "browser drop cleanup failed");
                    }
                    if let Err(err) = browser.wait().await {
                        debug!(error = %err, "waiting for browser exit after drop");
                    }
                    if let Some(handler) = handler {
                        handler.abort();
                    }
                });
            }
            Err(_) => warn!("browser session dropped outside a runtime; process may linger"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FixtureManifest {
    listing_url: String,
    listing_pages: Vec<String>,
    #[serde(default)]
    pages: HashMap<String, String>,
}

/// Static HTML for one listing (one file per page) and the detail pages
/// it links to.
#[derive(Debug, Clone, Default)]
pub struct FixtureSite {
    pub listing_url: String,
    pub listing_pages: Vec<String>,
    pub pages: HashMap<String, String>,
}

impl FixtureSite {
    /// Loads `manifest.json` from `dir`:
    /// `{"listing_url": .., "listing_pages": [file, ..], "pages": {url: file}}`.
    pub fn from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let manifest_path = dir.join("manifest.json");
        let bytes = fs::read(&manifest_path)
            .with_context(|| format!("reading {}", manifest_path.display()))?;
        let manifest: FixtureManifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", manifest_path.display()))?;

        let read = |file: &str| {
            let path = dir.join(file);
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
        };
        let listing_pages = manifest
            .listing_pages
            .iter()
            .map(|file| read(file))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let pages = manifest
            .pages
            .iter()
            .map(|(url, file)| Ok((url.clone(), read(file)?)))
            .collect::<anyhow::Result<HashMap<_, _>>>()?;

        Ok(Self {
            listing_url: manifest.listing_url,
            listing_pages,
            pages,
        })
    }
}

/// What fixture sessions did, shared with whoever built the launcher.
#[derive(Debug, Default)]
pub struct SessionJournal {
    navigations: Mutex<Vec<String>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl SessionJournal {
    pub async fn navigations(&self) -> Vec<String> {
        self.navigations.lock().await.clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Opens sessions that replay a [`FixtureSite`] instead of driving a browser.
#[derive(Debug, Clone)]
pub struct FixtureLauncher {
    site: Arc<FixtureSite>,
    failing_urls: HashSet<String>,
    launch_failure: Option<String>,
    journal: Arc<SessionJournal>,
}

impl FixtureLauncher {
    pub fn new(site: FixtureSite) -> Self {
        Self {
            site: Arc::new(site),
            failing_urls: HashSet::new(),
            launch_failure: None,
            journal: Arc::new(SessionJournal::default()),
        }
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::new(FixtureSite::from_dir(dir)?))
    }

    /// Navigations to `url` fail with a navigation error.
    pub fn fail_navigation(mut self, url: impl Into<String>) -> Self {
        self.failing_urls.insert(url.into());
        self
    }

    /// Every `open` fails as if the browser binary were missing.
    pub fn fail_launch(mut self, message: impl Into<String>) -> Self {
        self.launch_failure = Some(message.into());
        self
    }

    pub fn journal(&self) -> Arc<SessionJournal> {
        Arc::clone(&self.journal)
    }

    pub fn listing_url(&self) -> &str {
        &self.site.listing_url
    }
}

#[async_trait]
impl SessionLauncher for FixtureLauncher {
    async fn open(&self) -> Result<Box<dyn PageSession>, LaunchError> {
        if let Some(message) = &self.launch_failure {
            return Err(LaunchError::Browser(message.clone()));
        }
        self.journal.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FixtureSession {
            site: Arc::clone(&self.site),
            failing_urls: self.failing_urls.clone(),
            journal: Arc::clone(&self.journal),
            current: String::new(),
            on_listing: false,
            closed: false,
        }))
    }
}

pub struct FixtureSession {
    site: Arc<FixtureSite>,
    failing_urls: HashSet<String>,
    journal: Arc<SessionJournal>,
    current: String,
    on_listing: bool,
    closed: bool,
}

impl FixtureSession {
    fn check_open(&self) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn readiness(&self, selector: &str) -> Result<Readiness, SessionError> {
        let selector =
            Selector::parse(selector).map_err(|_| SessionError::InvalidSelector(selector.to_string()))?;
        let document = Html::parse_document(&self.current);
        if document.select(&selector).next().is_some() {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::TimedOut)
        }
    }
}

#[async_trait]
impl PageSession for FixtureSession {
    async fn navigate(
        &mut self,
        url: &str,
        ready_selector: &str,
        _timeout: Duration,
    ) -> Result<Readiness, SessionError> {
        self.check_open()?;
        self.journal.navigations.lock().await.push(url.to_string());
        if self.failing_urls.contains(url) {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }

        self.on_listing = url == self.site.listing_url;
        self.current = if self.on_listing {
            self.site.listing_pages.first().cloned().unwrap_or_default()
        } else {
            self.site.pages.get(url).cloned().unwrap_or_default()
        };
        self.readiness(ready_selector)
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<Readiness, SessionError> {
        self.check_open()?;
        self.readiness(selector)
    }

    async fn page_source(&mut self) -> Result<String, SessionError> {
        self.check_open()?;
        Ok(self.current.clone())
    }

    async fn advance_listing(&mut self, target_page: usize) -> Result<bool, SessionError> {
        self.check_open()?;
        if !self.on_listing || target_page == 0 {
            return Ok(false);
        }
        match self.site.listing_pages.get(target_page - 1) {
            Some(html) => {
                self.current = html.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.journal.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
