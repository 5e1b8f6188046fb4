//! The crawl loop: pop, dispatch, classify, record, enqueue, sleep.
//!
//! Everything here runs on one task. The only suspension points are the
//! request itself and the delays between requests; an interrupt is acted
//! on only at the top of the loop, never mid-fetch.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::captcha::CaptchaOracle;
use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::config::{Config, ConfigError, CrawlConfig, FailurePolicy};
use crate::dispatcher::Dispatcher;
use crate::frontier::Frontier;
use crate::link_graph::{GraphError, LinkGraph};
use crate::network::{FetchError, Transport};
use crate::orchestration::shutdown::wait_for_shutdown;
use crate::page_store::PageStore;
use crate::parser;
use crate::session::SessionState;
use crate::url_utils::{self, Fingerprint};

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Link graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Page store error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Network setup error: {0}")]
    Network(#[from] FetchError),
}

/// What happened to one dispatched URL.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Completed { enqueued: usize },
    Quarantined { cookie: Option<String> },
    Failed(FetchError),
}

/// Why the loop returned. All of these are clean exits: state is flushed.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    FrontierExhausted,
    BudgetExhausted,
    Interrupted,
    FetchFailed(FetchError),
    CookiePoolExhausted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrontierExhausted => "frontier_exhausted",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Interrupted => "interrupted",
            Self::FetchFailed(_) => "fetch_failed",
            Self::CookiePoolExhausted => "cookie_pool_exhausted",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchFailed(e) => write!(f, "{}: {e}", self.as_str()),
            _ => f.write_str(self.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CrawlStats {
    completed: u64,
    quarantined: u64,
    failed: u64,
    skipped: u64,
}

#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub target: String,
    pub stop_reason: StopReason,
    pub dispatched: u64,
    pub completed: u64,
    pub quarantined: u64,
    pub failed: u64,
    pub skipped: u64,
    pub frontier_remaining: usize,
    pub deferred: usize,
    pub graph_entries: usize,
    pub elapsed_secs: f64,
}

pub struct Crawler {
    target: String,
    dispatcher: Dispatcher,
    oracle: Box<dyn CaptchaOracle>,
    session: SessionState,
    frontier: Frontier,
    graph: LinkGraph,
    checkpoint: Checkpoint,
    store: PageStore,
    captcha_cooldown: Duration,
    on_fetch_failure: FailurePolicy,
    drop_cookie_on_captcha: bool,
    abort: Option<watch::Receiver<bool>>,
    rng: StdRng,
    stats: CrawlStats,
}

impl Crawler {
    /// Validate `config`, then restore the previous session or seed a new one.
    ///
    /// A checkpointed non-empty frontier wins over the seed. With no
    /// checkpoint and no seed there is nothing to crawl.
    pub fn open(
        config: &CrawlConfig,
        transport: Box<dyn Transport>,
        oracle: Box<dyn CaptchaOracle>,
    ) -> Result<Self, CrawlError> {
        config.validate()?;

        let checkpoint = Checkpoint::new(&config.data_dir, &config.target);
        let graph = LinkGraph::open(checkpoint.graph_path(), config.graph_flush_bytes)?;
        let mut frontier = Frontier::new();
        let resumed = checkpoint.load_frontier(&mut frontier)?;

        if resumed && !frontier.is_empty() {
            info!(
                crawl = %config.target,
                pending = frontier.len(),
                graph_entries = graph.len(),
                "resuming from checkpoint"
            );
        } else if let Some(seed) = &config.seed {
            // Same rendering as extracted links, so the seed dedups against them
            let seed = Url::parse(seed)
                .map(|url| url.to_string())
                .map_err(|_| ConfigError::InvalidSeed(seed.clone()))?;
            let queued = frontier.offer(seed.clone(), &graph);
            info!(crawl = %config.target, seed = %seed, queued, resumed, "seeding crawl");
        } else if !resumed {
            return Err(ConfigError::MissingSeed(config.target.clone()).into());
        } else {
            warn!(crawl = %config.target, "checkpoint frontier is empty and no seed was given");
        }

        let dispatcher = Dispatcher::new(
            transport,
            config.user_agents.clone(),
            config.rotation_cadence()?,
            config.cookies.clone(),
        );

        Ok(Self {
            target: config.target.clone(),
            dispatcher,
            oracle,
            session: SessionState::new(config.proxy.clone(), config.timing, config.page_budget),
            frontier,
            graph,
            checkpoint,
            store: PageStore::new(&config.data_dir, &config.target),
            captcha_cooldown: config.captcha_cooldown,
            on_fetch_failure: config.on_fetch_failure,
            drop_cookie_on_captcha: config.drop_cookie_on_captcha,
            abort: None,
            rng: StdRng::from_entropy(),
            stats: CrawlStats::default(),
        })
    }

    /// Cancel an in-flight fetch once `abort` turns true. The URL goes back
    /// to the head of the frontier and the run ends as interrupted.
    pub fn set_abort_signal(&mut self, abort: watch::Receiver<bool>) {
        self.abort = Some(abort);
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn graph(&self) -> &LinkGraph {
        &self.graph
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Run until a terminal condition, then flush frontier and graph.
    ///
    /// The flush happens on every exit, including errors raised inside the
    /// loop; a flush failure is reported unless a loop error is already
    /// being returned.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<CrawlReport, CrawlError> {
        let started = Instant::now();
        info!(
            crawl = %self.target,
            proxy = %self.session.proxy(),
            pending = self.frontier.len(),
            budget = ?self.session.budget_remaining(),
            "crawl started"
        );

        let outcome = self.drive(&mut shutdown).await;
        let flushed = self.checkpoint.flush(&self.frontier, &mut self.graph);

        let reason = match (outcome, flushed) {
            (Ok(reason), Ok(())) => reason,
            (Ok(_), Err(e)) => {
                error!(crawl = %self.target, error = %e, "final flush failed");
                return Err(e.into());
            }
            (Err(e), Ok(())) => {
                error!(crawl = %self.target, error = %e, "crawl loop failed, state flushed");
                return Err(e);
            }
            (Err(e), Err(flush_error)) => {
                error!(crawl = %self.target, error = %e, flush_error = %flush_error, "crawl loop failed and state could not be flushed");
                return Err(e);
            }
        };

        let report = CrawlReport {
            target: self.target.clone(),
            stop_reason: reason,
            dispatched: self.session.requests_sent(),
            completed: self.stats.completed,
            quarantined: self.stats.quarantined,
            failed: self.stats.failed,
            skipped: self.stats.skipped,
            frontier_remaining: self.frontier.len(),
            deferred: self.frontier.deferred_len(),
            graph_entries: self.graph.len(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        };

        info!(
            crawl = %report.target,
            reason = report.stop_reason.as_str(),
            dispatched = report.dispatched,
            completed = report.completed,
            quarantined = report.quarantined,
            failed = report.failed,
            pending = report.frontier_remaining,
            deferred = report.deferred,
            graph_entries = report.graph_entries,
            "crawl finished"
        );
        Ok(report)
    }

    async fn drive(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<StopReason, CrawlError> {
        loop {
            if *shutdown.borrow() {
                return Ok(StopReason::Interrupted);
            }
            if self.session.budget_exhausted() {
                return Ok(StopReason::BudgetExhausted);
            }
            let Some(url) = self.frontier.pop() else {
                return Ok(StopReason::FrontierExhausted);
            };

            let fp = url_utils::fingerprint(&url);
            if self.graph.contains(&fp) || self.frontier.is_visited(&fp) {
                debug!(url = %url, fingerprint = %fp, "already crawled, skipping");
                self.stats.skipped += 1;
                continue;
            }

            let outcome = match self.process(&url, fp).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.frontier.requeue_front(url);
                    return Err(e);
                }
            };

            match outcome {
                PageOutcome::Completed { enqueued } => {
                    self.stats.completed += 1;
                    debug!(url = %url, enqueued, pending = self.frontier.len(), "page crawled");

                    if self.stats.completed % Config::PROGRESS_INTERVAL == 0 {
                        info!(
                            crawl = %self.target,
                            completed = self.stats.completed,
                            requests = self.session.requests_sent(),
                            pending = self.frontier.len(),
                            visited = self.frontier.visited_count(),
                            graph_entries = self.graph.len(),
                            "progress"
                        );
                    }
                    if self.graph.flush_due() {
                        self.checkpoint.flush(&self.frontier, &mut self.graph)?;
                    }

                    let delay = self.session.timing().next_delay(&mut self.rng);
                    pause(delay, shutdown).await;
                }
                PageOutcome::Quarantined { cookie } => {
                    self.stats.quarantined += 1;

                    if self.drop_cookie_on_captcha
                        && let Some(cookie) = cookie
                    {
                        let remaining = self.dispatcher.remove_cookie(&cookie);
                        warn!(url = %url, remaining, "dropped cookie that hit a captcha");
                        if remaining == 0 {
                            return Ok(StopReason::CookiePoolExhausted);
                        }
                    }

                    info!(
                        url = %url,
                        cooldown_secs = self.captcha_cooldown.as_secs(),
                        "captcha detected, cooling down"
                    );
                    pause(self.captcha_cooldown, shutdown).await;
                }
                PageOutcome::Failed(FetchError::Cancelled) => {
                    info!(url = %url, "request cancelled, stopping");
                    self.frontier.requeue_front(url);
                    return Ok(StopReason::Interrupted);
                }
                PageOutcome::Failed(e) => {
                    self.stats.failed += 1;
                    match self.on_fetch_failure {
                        FailurePolicy::Abort => {
                            warn!(url = %url, error = %e, "fetch failed, stopping");
                            self.frontier.requeue_front(url);
                            return Ok(StopReason::FetchFailed(e));
                        }
                        FailurePolicy::Skip => {
                            warn!(url = %url, error = %e, "fetch failed, deferring to the next run");
                            self.frontier.defer(url);
                        }
                    }
                }
            }
        }
    }

    /// Dispatch one URL and apply the captcha gate to the result.
    async fn process(&mut self, url: &str, fp: Fingerprint) -> Result<PageOutcome, CrawlError> {
        let fetched = tokio::select! {
            fetched = self.dispatcher.dispatch(&mut self.session, url) => fetched,
            _ = cancelled(&mut self.abort) => Err(FetchError::Cancelled),
        };
        let dispatched = match fetched {
            Ok(dispatched) => dispatched,
            Err(e) => return Ok(PageOutcome::Failed(e)),
        };
        let content = dispatched.page.content;

        if self.oracle.is_captcha(&content) {
            match self.store.quarantine(&content) {
                Ok(path) => debug!(url, path = %path.display(), "captcha page quarantined"),
                Err(e) => warn!(url, error = %e, "could not write quarantine page"),
            }
            return Ok(PageOutcome::Quarantined {
                cookie: dispatched.cookie,
            });
        }

        let extracted = parser::extract_links(&content, url);
        if let Some(warning) = &extracted.warning {
            warn!(url, warning = %warning, "link extraction gave up");
        }

        self.store.save_page(&fp, &content)?;

        let mut children = BTreeMap::new();
        let mut discovered = Vec::with_capacity(extracted.links.len());
        for link in extracted.links {
            children.insert(url_utils::fingerprint(&link), link.clone());
            discovered.push(link);
        }

        self.frontier.mark_visited(fp);
        self.graph.record(fp, url.to_string(), children)?;

        let mut enqueued = 0;
        for link in discovered {
            if self.frontier.offer(link, &self.graph) {
                enqueued += 1;
            }
        }
        Ok(PageOutcome::Completed { enqueued })
    }
}

/// Resolves when the abort signal fires; never without one.
async fn cancelled(abort: &mut Option<watch::Receiver<bool>>) {
    match abort {
        Some(abort) => wait_for_shutdown(abort).await,
        None => std::future::pending::<()>().await,
    }
}

/// Sleep for `duration`, waking early if an interrupt arrives.
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = wait_for_shutdown(shutdown) => {
            debug!("delay cut short by interrupt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingPolicy;
    use crate::network::{FetchResult, PageRequest};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct StaticSite {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl Transport for StaticSite {
        async fn get(&self, request: PageRequest<'_>) -> Result<FetchResult, FetchError> {
            self.pages
                .get(request.url)
                .map(|body| FetchResult::html(body.clone()))
                .ok_or(FetchError::Status(404))
        }
    }

    fn site(pages: &[(&str, &str)]) -> Box<dyn Transport> {
        Box::new(StaticSite {
            pages: pages.iter().map(|(u, b)| (u.to_string(), b.to_string())).collect(),
        })
    }

    fn config(dir: &TempDir) -> CrawlConfig {
        let mut config = CrawlConfig::new("nexus", dir.path());
        config.seed = Some("http://abc.onion/".to_string());
        config.timing = TimingPolicy::fixed_secs(0);
        config.captcha_cooldown = Duration::ZERO;
        config
    }

    fn never() -> Box<dyn CaptchaOracle> {
        Box::new(|_: &str| false)
    }

    #[test]
    fn test_missing_seed_without_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.seed = None;

        let result = Crawler::open(&config, site(&[]), never());
        assert!(matches!(result, Err(CrawlError::Config(ConfigError::MissingSeed(_)))));
    }

    #[test]
    fn test_invalid_config_rejected_before_io() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.rotate_user_agent_every = 0;

        let result = Crawler::open(&config, site(&[]), never());
        assert!(matches!(result, Err(CrawlError::Config(ConfigError::InvalidRotation))));
        assert!(!dir.path().join("nexus").exists());
    }

    #[tokio::test]
    async fn test_crawls_until_frontier_exhausted() {
        let dir = TempDir::new().unwrap();
        let transport = site(&[
            ("http://abc.onion/", r#"<a href="/a">a</a><a href="/b">b</a>"#),
            ("http://abc.onion/a", r#"<a href="/">home</a><a href="/b">b</a>"#),
            ("http://abc.onion/b", "<p>leaf</p>"),
        ]);
        let mut crawler = Crawler::open(&config(&dir), transport, never()).unwrap();
        let (_tx, rx) = watch::channel(false);

        let report = crawler.run(rx).await.unwrap();

        assert_eq!(report.stop_reason, StopReason::FrontierExhausted);
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.completed, 3);
        assert_eq!(report.graph_entries, 3);
        assert_eq!(report.frontier_remaining, 0);
    }

    #[tokio::test]
    async fn test_interrupt_before_first_dispatch() {
        let dir = TempDir::new().unwrap();
        let mut crawler = Crawler::open(&config(&dir), site(&[]), never()).unwrap();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = crawler.run(rx).await.unwrap();
        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.frontier_remaining, 1);
        assert!(crawler.checkpoint().queue_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_wakes_on_interrupt() {
        let (tx, mut rx) = watch::channel(false);
        let started = tokio::time::Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).unwrap();
        });
        pause(Duration::from_secs(60), &mut rx).await;

        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_survives_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let started = tokio::time::Instant::now();

        pause(Duration::from_secs(5), &mut rx).await;
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn test_stop_reason_markers() {
        assert_eq!(StopReason::BudgetExhausted.to_string(), "budget_exhausted");
        assert_eq!(
            StopReason::FetchFailed(FetchError::Timeout).as_str(),
            "fetch_failed"
        );
    }
}
