//! Poll loop
//!
//! One [`Watchdog`] owns all process-lifetime state: the cached session, the
//! failure tracker and the cumulative statistics. Each cycle scans for
//! tagged objects, then calls the grouping procedure once per discovered,
//! non-suppressed application, in scan order. Cycles never overlap.
//!
//! Nothing inside a cycle is fatal:
//!
//! - session failures skip the cycle and are retried on the next one
//! - scan failures yield an empty application list and leave the tracker alone
//! - grouping failures are recorded against the application; siblings still run

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::QueryError;
use crate::graph::{GraphSession, SessionProvider};
use crate::grouping::{DEFAULT_PROCEDURE, GroupingInvoker};
use crate::scanner::{TagScanner, discover};
use crate::tracker::{DEFAULT_FAILURE_THRESHOLD, FailureOutcome, FailureTracker};

/// Poll loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Sleep between the end of one cycle and the start of the next
    pub refresh_interval: Duration,
    /// Substring a tag must contain
    pub tag_prefix: String,
    /// Failures tolerated before an application is suppressed
    pub failure_threshold: u32,
    /// Upper bound for each database call
    pub call_timeout: Option<Duration>,
    /// Grouping procedure
    pub procedure: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(5_000),
            tag_prefix: "Dmg_".to_string(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            call_timeout: None,
            procedure: DEFAULT_PROCEDURE.to_string(),
        }
    }
}

/// Outcome of a single cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// 1-based cycle number
    pub cycle: u64,
    /// Applications returned by the scan, deduplicated
    pub discovered: Vec<String>,
    /// Applications handed to the grouping procedure
    pub invoked: Vec<String>,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Applications skipped because they are suppressed
    pub skipped: Vec<String>,
    /// Applications suppressed during this cycle
    pub newly_suppressed: Vec<String>,
    pub scan_failed: bool,
    pub session_failed: bool,
}

/// Cumulative health counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogStats {
    pub cycles: u64,
    pub session_failures: u64,
    pub scan_failures: u64,
    /// Scan failures since the last successful scan
    pub consecutive_scan_failures: u64,
    pub invocations: u64,
    pub invocation_failures: u64,
}

/// The tag watchdog
pub struct Watchdog {
    config: WatchdogConfig,
    provider: Arc<dyn SessionProvider>,
    session: Option<Arc<dyn GraphSession>>,
    scanner: TagScanner,
    invoker: GroupingInvoker,
    tracker: FailureTracker,
    stats: WatchdogStats,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("config", &self.config)
            .field("connected", &self.session.is_some())
            .field("tracker", &self.tracker)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Watchdog {
    #[must_use]
    pub fn new(config: WatchdogConfig, provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            scanner: TagScanner::new(config.tag_prefix.clone()),
            invoker: GroupingInvoker::new(config.procedure.clone()),
            tracker: FailureTracker::new(config.failure_threshold),
            config,
            provider,
            session: None,
            stats: WatchdogStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    #[must_use]
    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    #[must_use]
    pub fn stats(&self) -> WatchdogStats {
        self.stats
    }

    /// Whether a session is currently cached
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Run cycles until `shutdown` flips to `true` (or its sender goes away).
    ///
    /// A cycle that is already running when shutdown is signalled is allowed
    /// to finish; only the sleep between cycles is interrupted.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> WatchdogStats {
        info!(
            refresh_ms = u64::try_from(self.config.refresh_interval.as_millis()).unwrap_or(u64::MAX),
            tag_prefix = %self.config.tag_prefix,
            threshold = self.config.failure_threshold,
            procedure = %self.config.procedure,
            "Watchdog started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            let report = self.run_cycle().await;
            debug!(
                cycle = report.cycle,
                discovered = report.discovered.len(),
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                skipped = report.skipped.len(),
                "Poll cycle finished"
            );
            if sleep_or_shutdown(self.config.refresh_interval, &mut shutdown).await {
                break;
            }
        }

        info!(
            cycles = self.stats.cycles,
            suppressed = self.tracker.suppressed_count(),
            "Watchdog stopped"
        );
        self.stats
    }

    /// Execute one scan-and-group cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.stats.cycles += 1;
        let mut report = CycleReport {
            cycle: self.stats.cycles,
            ..CycleReport::default()
        };

        let session = match self.session().await {
            Ok(session) => session,
            Err(err) => {
                self.stats.session_failures += 1;
                report.session_failed = true;
                error!(
                    cycle = report.cycle,
                    error = %err,
                    "Failed to open a Neo4j session; retrying next cycle"
                );
                return report;
            }
        };

        match bounded(self.config.call_timeout, self.scanner.scan(session.as_ref())).await {
            Ok(hits) => {
                self.stats.consecutive_scan_failures = 0;
                report.discovered = discover(&hits);
            }
            Err(err) => {
                self.stats.scan_failures += 1;
                self.stats.consecutive_scan_failures += 1;
                report.scan_failed = true;
                self.log_scan_failure(report.cycle, &err);
            }
        }

        for application in &report.discovered {
            if self.tracker.is_suppressed(application) {
                debug!(application = %application, "Skipping suppressed application");
                report.skipped.push(application.clone());
                continue;
            }

            self.stats.invocations += 1;
            report.invoked.push(application.clone());
            let call = self.invoker.invoke(session.as_ref(), application);
            match bounded(self.config.call_timeout, call).await {
                Ok(()) => {
                    info!(application = %application, "Tags grouped");
                    report.succeeded.push(application.clone());
                }
                Err(err) => {
                    self.stats.invocation_failures += 1;
                    report.failed.push(application.clone());
                    let outcome = self.tracker.record_failure(application);
                    self.log_grouping_failure(application, &err, outcome);
                    if outcome.newly_suppressed() {
                        report.newly_suppressed.push(application.clone());
                    }
                }
            }
        }

        report
    }

    async fn session(&mut self) -> Result<Arc<dyn GraphSession>, crate::error::ConnectionError> {
        if let Some(session) = &self.session {
            return Ok(Arc::clone(session));
        }
        let session = self.provider.connect().await?;
        self.session = Some(Arc::clone(&session));
        Ok(session)
    }

    fn log_scan_failure(&self, cycle: u64, err: &QueryError) {
        let consecutive = self.stats.consecutive_scan_failures;
        if consecutive >= u64::from(self.config.failure_threshold.max(1)) {
            error!(
                cycle,
                consecutive,
                error = %err,
                "Tag scan keeps failing; no application is being grouped"
            );
        } else {
            warn!(
                cycle,
                consecutive,
                error = %err,
                "Failed to check if tags are present in the database"
            );
        }
    }

    fn log_grouping_failure(&self, application: &str, err: &QueryError, outcome: FailureOutcome) {
        let threshold = self.tracker.threshold();
        let failures = outcome.failures();
        match outcome {
            FailureOutcome::Warned { .. } => warn!(
                application,
                failures,
                threshold,
                error = %err,
                "Grouping failed"
            ),
            FailureOutcome::Suppressed { .. } => error!(
                application,
                failures,
                threshold,
                error = %err,
                "Application suppressed after too many failures"
            ),
            FailureOutcome::AlreadySuppressed { .. } => debug!(
                application,
                failures,
                error = %err,
                "Grouping failed for a suppressed application"
            ),
        }
    }
}

/// Apply an optional timeout to a database call; expiry is a call failure
async fn bounded<T, F>(limit: Option<Duration>, call: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, QueryError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| QueryError::Timeout(limit))?,
        None => call.await,
    }
}

/// Sleep for `interval`; returns `true` when shutdown was requested instead
async fn sleep_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    return true;
                }
            }
        }
    }
}
