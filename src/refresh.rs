//! # Background Refresh
//!
//! The [`RefreshOrchestrator`] periodically rebuilds the hot aggregates ahead
//! of their natural expiry:
//!
//! 1. the category tree,
//! 2. the active product set and the first listing pages of its categories,
//! 3. the configuration snapshots (which may change the cadence itself),
//! 4. a hit-rate sample of the user cache, which is only logged because user
//!    data is refreshed on demand.
//!
//! Steps are isolated: a failing step is logged and reported, and the others
//! still run. Both the initial delay and the interval delay race against the
//! cancellation token, so a stop request ends the loop at once.

use crate::caching::{CacheError, CacheManager, CacheResult};
use crate::services::{CategoryCache, ConfigCache, ProductCache, UserCache};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of the refresh loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Starting,
    InitialDelay,
    Cycle,
    IntervalDelay,
    Stopped,
}

/// One unit of work within a cycle, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStep {
    CategoryTree,
    ActiveProducts,
    ConfigSnapshots,
    UserHitRate,
}

impl RefreshStep {
    pub const ALL: [RefreshStep; 4] = [
        RefreshStep::CategoryTree,
        RefreshStep::ActiveProducts,
        RefreshStep::ConfigSnapshots,
        RefreshStep::UserHitRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStep::CategoryTree => "category_tree",
            RefreshStep::ActiveProducts => "active_products",
            RefreshStep::ConfigSnapshots => "config_snapshots",
            RefreshStep::UserHitRate => "user_hit_rate",
        }
    }
}

impl fmt::Display for RefreshStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: RefreshStep,
    /// Short description of what was done, or why it failed
    pub result: Result<String, CacheError>,
}

/// What happened in one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub steps: Vec<StepOutcome>,
}

impl CycleReport {
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.result.is_ok())
    }

    pub fn failed_steps(&self) -> Vec<RefreshStep> {
        self.steps
            .iter()
            .filter(|s| s.result.is_err())
            .map(|s| s.step)
            .collect()
    }
}

/// Periodically refreshes the domain caches
pub struct RefreshOrchestrator {
    manager: Arc<CacheManager>,
    categories: Arc<CategoryCache>,
    products: Arc<ProductCache>,
    users: Arc<UserCache>,
    config: Arc<ConfigCache>,
    state: watch::Sender<OrchestratorState>,
    cycles: AtomicU64,
    last_report: Mutex<Option<CycleReport>>,
}

impl RefreshOrchestrator {
    pub fn new(
        manager: Arc<CacheManager>,
        categories: Arc<CategoryCache>,
        products: Arc<ProductCache>,
        users: Arc<UserCache>,
        config: Arc<ConfigCache>,
    ) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Starting);
        Self {
            manager,
            categories,
            products,
            users,
            config,
            state,
            cycles: AtomicU64::new(0),
            last_report: Mutex::new(None),
        }
    }

    /// Run the loop on the runtime until `token` is cancelled
    pub fn spawn(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run(token).await })
    }

    /// The refresh loop. Returns once `token` is cancelled.
    ///
    /// The interval is re-read from the live settings before every delay. While
    /// refresh is disabled in the settings, cycles are skipped but the loop
    /// keeps its cadence so re-enabling needs no restart.
    pub async fn run(&self, token: CancellationToken) {
        let initial_delay = self.manager.refresh_settings().initial_delay;
        info!(?initial_delay, "Refresh orchestrator starting");

        self.set_state(OrchestratorState::InitialDelay);
        if self.pause(initial_delay, &token).await {
            loop {
                let settings = self.manager.refresh_settings();
                if settings.enabled {
                    self.set_state(OrchestratorState::Cycle);
                    let finished = tokio::select! {
                        biased;
                        _ = token.cancelled() => false,
                        _ = self.run_cycle() => true,
                    };
                    if !finished {
                        warn!("Refresh cycle abandoned on shutdown");
                        break;
                    }
                } else {
                    debug!("Refresh disabled, skipping cycle");
                }

                let interval = self.manager.refresh_settings().interval;
                self.set_state(OrchestratorState::IntervalDelay);
                if !self.pause(interval, &token).await {
                    break;
                }
            }
        }

        self.set_state(OrchestratorState::Stopped);
        info!(
            cycles = self.cycles_completed(),
            "Refresh orchestrator stopped"
        );
    }

    /// Run every step once and record the report
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle = self.cycles.load(Ordering::Relaxed) + 1;
        let started_at = Utc::now();
        let start = Instant::now();

        let mut steps = Vec::with_capacity(RefreshStep::ALL.len());
        for step in RefreshStep::ALL {
            let result = self.run_step(step).await;
            let outcome = match &result {
                Ok(detail) => {
                    debug!(cycle, %step, detail = %detail, "Refresh step completed");
                    "ok"
                }
                Err(e) => {
                    error!(cycle, %step, error = %e, "Refresh step failed");
                    "error"
                }
            };
            metrics::counter!(
                "campus_cache_refresh_steps_total",
                "step" => step.as_str(),
                "outcome" => outcome
            )
            .increment(1);
            steps.push(StepOutcome { step, result });
        }

        let report = CycleReport {
            cycle,
            started_at,
            duration: start.elapsed(),
            steps,
        };
        self.cycles.fetch_add(1, Ordering::Relaxed);
        info!(
            cycle,
            duration_ms = report.duration.as_millis() as u64,
            failed = report.failed_steps().len(),
            "Refresh cycle finished"
        );

        *self.last_report.lock() = Some(report.clone());
        report
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.lock().clone()
    }

    async fn run_step(&self, step: RefreshStep) -> CacheResult<String> {
        match step {
            RefreshStep::CategoryTree => {
                let count = self.categories.refresh_category_tree().await?;
                Ok(format!("{} categories", count))
            }
            RefreshStep::ActiveProducts => {
                let count = self.products.refresh_active_products().await?;
                Ok(format!("{} active products", count))
            }
            RefreshStep::ConfigSnapshots => {
                let changed = self.config.refresh_snapshots().await?;
                Ok(if changed {
                    "cache policy updated".to_string()
                } else {
                    "unchanged".to_string()
                })
            }
            RefreshStep::UserHitRate => {
                let stats = self.users.stats();
                let gateway_hit_rate = self.manager.gateway().hit_rate();
                info!(
                    l1_entries = stats.l1_entries,
                    l1_hit_rate = stats.l1_hit_rate,
                    gateway_hit_rate,
                    "User cache hit rate"
                );
                Ok(format!("l1 hit rate {:.3}", stats.l1_hit_rate))
            }
        }
    }

    /// Sleep for `delay`; false when cancelled first
    async fn pause(&self, delay: Duration, token: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn set_state(&self, state: OrchestratorState) {
        self.state.send_replace(state);
    }
}
