//! Lifecycle owner for the monitoring loops.
//!
//! Constructed once at process start and shared by reference; owns the fill
//! detector, the stop-loss manager, the placer, and the rolling error buffer.
//! `start` spawns two polling loops (detection, stop management + cleanup)
//! that run until `stop` or `emergency_stop` signals them through a watch
//! channel. Read queries work whether or not the loops are running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ladder_core::config::{ManagerConfig, PlannerConfig};
use ladder_core::{ActionAudit, PositionState, TradeRecommendation};
use ladder_exchange_gate::FuturesExchange;
use ladder_execution::{PlacementOutcome, PositionPlacer};
use ladder_store::PositionStore;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::detector::FillDetector;
use crate::errors::{ErrorBuffer, ErrorEntry, Result};
use crate::stop_loss::StopLossManager;

/// Snapshot returned by the status query.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    /// Loops running in this process.
    pub running: bool,
    /// Persisted monitoring flag; true while any instance has the loops up.
    pub monitoring_active: bool,
    pub active_positions: i64,
    pub unprocessed_fills: i64,
    pub last_check: Option<DateTime<Utc>>,
    pub recent_errors: Vec<ErrorEntry>,
}

/// A position together with its audit trail.
#[derive(Debug, Clone)]
pub struct PositionDetails {
    pub position: PositionState,
    pub audits: Vec<ActionAudit>,
}

pub struct Orchestrator {
    store: PositionStore,
    placer: PositionPlacer,
    detector: Arc<FillDetector>,
    stop_loss: Arc<StopLossManager>,
    errors: Arc<ErrorBuffer>,
    config: ManagerConfig,
    running: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        exchange: Arc<dyn FuturesExchange>,
        store: PositionStore,
        planner: PlannerConfig,
        config: ManagerConfig,
    ) -> Self {
        let errors = Arc::new(ErrorBuffer::new(config.error_buffer_size));
        let detector = Arc::new(FillDetector::new(
            Arc::clone(&exchange),
            store.clone(),
            Arc::clone(&errors),
        ));
        let stop_loss = Arc::new(StopLossManager::new(
            Arc::clone(&exchange),
            store.clone(),
            config.clone(),
            Arc::clone(&errors),
        ));
        let placer = PositionPlacer::new(exchange, store.clone(), planner);
        Self {
            store,
            placer,
            detector,
            stop_loss,
            errors,
            config,
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Opens a new position. Failures are recorded in the error buffer
    /// before propagating, at critical severity when the position was left
    /// unprotected.
    ///
    /// # Errors
    ///
    /// Propagates the underlying [`ladder_execution::ExecutionError`].
    pub async fn place_position(&self, rec: &TradeRecommendation) -> Result<PlacementOutcome> {
        match self.placer.place_multi_tier_position(rec).await {
            Ok(outcome) => {
                info!(
                    position_id = %outcome.position_id,
                    contract = rec.contract,
                    strategy = %outcome.strategy,
                    "position opened"
                );
                Ok(outcome)
            }
            Err(e) => {
                let context = format!("place position {}", rec.contract);
                if e.is_critical() {
                    error!(contract = rec.contract, error = %e, "placement left position unprotected");
                    self.errors.critical(context, e.to_string());
                } else {
                    warn!(contract = rec.contract, error = %e, "placement failed");
                    self.errors.warn(context, e.to_string());
                }
                Err(e.into())
            }
        }
    }

    /// Starts the monitoring loops. Idempotent: calling while already
    /// running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a store error if the monitoring flag cannot be persisted; the
    /// loops are not started in that case.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("monitoring already running");
            return Ok(());
        }

        if let Err(e) = self.store.set_monitoring_active(true).await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        let (tx, rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);

        let period = Duration::from_secs(self.config.check_interval_secs);
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(detection_loop(
            Arc::clone(&self.detector),
            Arc::clone(&self.errors),
            period,
            rx.clone(),
        )));
        tasks.push(tokio::spawn(management_loop(
            Arc::clone(&self.stop_loss),
            self.store.clone(),
            period,
            rx,
        )));
        drop(tasks);

        info!(interval_secs = self.config.check_interval_secs, "monitoring started");
        Ok(())
    }

    /// Signals both loops to end after their current iteration and waits for
    /// them. In-flight exchange calls are never interrupted.
    ///
    /// # Errors
    ///
    /// Returns a store error if the monitoring flag cannot be persisted.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.store.set_monitoring_active(false).await?;
        info!("monitoring stopped");
        Ok(())
    }

    /// Operator halt: clears the running flag immediately, aborts the loops
    /// instead of waiting for them, and force-writes the monitoring state.
    ///
    /// # Errors
    ///
    /// Returns a store error if the monitoring flag cannot be persisted.
    pub async fn emergency_stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.store.set_monitoring_active(false).await?;
        warn!("emergency stop: all automated mutation halted");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Read-only status snapshot, safe while stopped.
    ///
    /// # Errors
    ///
    /// Returns a store error if the counters cannot be read.
    pub async fn system_status(&self) -> Result<SystemStatus> {
        let monitoring = self.store.monitoring_state().await?;
        Ok(SystemStatus {
            running: self.is_running(),
            monitoring_active: monitoring.is_active,
            active_positions: self.store.active_position_count().await?,
            unprocessed_fills: self.store.unprocessed_fill_count().await?,
            last_check: monitoring.last_check,
            recent_errors: self.errors.recent(),
        })
    }

    /// One position and its audit trail.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    pub async fn position_details(&self, id: uuid::Uuid) -> Result<Option<PositionDetails>> {
        let Some(position) = self.store.get_position(id).await? else {
            return Ok(None);
        };
        let audits = self.store.audits_for_position(id).await?;
        Ok(Some(PositionDetails { position, audits }))
    }

    /// All non-terminal positions with their audit trails.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails.
    pub async fn active_position_details(&self) -> Result<Vec<PositionDetails>> {
        let positions = self.store.active_positions().await?;
        let mut details = Vec::with_capacity(positions.len());
        for position in positions {
            let audits = self.store.audits_for_position(position.id).await?;
            details.push(PositionDetails { position, audits });
        }
        Ok(details)
    }
}

/// Polls for finished orders every `period`. One failed cycle is buffered
/// and the loop continues; only the shutdown signal ends it.
async fn detection_loop(
    detector: Arc<FillDetector>,
    errors: Arc<ErrorBuffer>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match detector.detect_fills().await {
                    Ok(n) if n > 0 => info!(fills = n, "detection cycle journaled new fills"),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "detection cycle failed");
                        errors.warn("fill detection cycle", e.to_string());
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("detection loop stopping");
                break;
            }
        }
    }
}

/// Applies pending fills, then the cleanup pass: refreshes the monitoring
/// row with the current tracked count. Critical stop-management failures are
/// already buffered by the manager; the loop logs and keeps going.
async fn management_loop(
    stop_loss: Arc<StopLossManager>,
    store: PositionStore,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match stop_loss.process_pending_fills().await {
                    Ok(n) if n > 0 => info!(fills = n, "applied fill events"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "stop management cycle failed"),
                }
                match store.active_position_count().await {
                    Ok(active) => {
                        debug!(active, "management cycle complete");
                        if let Err(e) = store.record_check(active).await {
                            warn!(error = %e, "failed to record check timestamp");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to count active positions"),
                }
            }
            _ = shutdown.changed() => {
                debug!("management loop stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ladder_core::{AccountScope, Direction, PositionPhase, SettleCurrency};
    use ladder_exchange_gate::{ContractSpec, PaperExchange};
    use rust_decimal_macros::dec;

    fn btc_spec() -> ContractSpec {
        ContractSpec {
            name: "BTC_USDT".to_string(),
            last_price: dec!(50000),
            quanto_multiplier: dec!(0.0001),
            order_price_round: dec!(0.1),
            leverage_max: dec!(100),
        }
    }

    fn recommendation() -> TradeRecommendation {
        TradeRecommendation {
            contract: "BTC_USDT".to_string(),
            direction: Direction::Long,
            stop_price: dec!(49000),
            take_profit_price: dec!(52000),
            notional: dec!(1000),
            leverage: 10,
            scope: AccountScope {
                credential_ref: "main".to_string(),
                settle: SettleCurrency::Usdt,
            },
        }
    }

    async fn orchestrator(paper: &Arc<PaperExchange>) -> Arc<Orchestrator> {
        paper.set_contract_spec(btc_spec());
        let store = PositionStore::new_in_memory().await.unwrap();
        Arc::new(Orchestrator::new(
            Arc::clone(paper) as Arc<dyn FuturesExchange>,
            store,
            PlannerConfig::default(),
            ManagerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_clears_state() {
        let paper = Arc::new(PaperExchange::new());
        let orch = orchestrator(&paper).await;

        orch.start().await.unwrap();
        orch.start().await.unwrap();
        assert!(orch.is_running());
        assert_eq!(orch.tasks.lock().len(), 2);
        assert!(orch.store.monitoring_state().await.unwrap().is_active);

        orch.stop().await.unwrap();
        assert!(!orch.is_running());
        assert!(orch.tasks.lock().is_empty());
        assert!(!orch.store.monitoring_state().await.unwrap().is_active);

        // Stopping again is harmless.
        orch.stop().await.unwrap();
    }

    #[tokio::test]
    async fn emergency_stop_halts_without_waiting() {
        let paper = Arc::new(PaperExchange::new());
        let orch = orchestrator(&paper).await;

        orch.start().await.unwrap();
        orch.emergency_stop().await.unwrap();
        assert!(!orch.is_running());
        assert!(!orch.store.monitoring_state().await.unwrap().is_active);
    }

    #[tokio::test]
    async fn status_reads_are_safe_while_stopped() {
        let paper = Arc::new(PaperExchange::new());
        let orch = orchestrator(&paper).await;

        let status = orch.system_status().await.unwrap();
        assert!(!status.running);
        assert!(!status.monitoring_active);
        assert_eq!(status.active_positions, 0);
        assert_eq!(status.unprocessed_fills, 0);
        assert!(status.recent_errors.is_empty());
    }

    #[tokio::test]
    async fn status_surfaces_the_persisted_monitoring_flag() {
        let paper = Arc::new(PaperExchange::new());
        paper.set_contract_spec(btc_spec());
        let store = PositionStore::new_in_memory().await.unwrap();
        let runner = Arc::new(Orchestrator::new(
            Arc::clone(&paper) as Arc<dyn FuturesExchange>,
            store.clone(),
            PlannerConfig::default(),
            ManagerConfig::default(),
        ));
        // A second instance over the same store, as `ladder status` would be.
        let observer = Arc::new(Orchestrator::new(
            Arc::clone(&paper) as Arc<dyn FuturesExchange>,
            store,
            PlannerConfig::default(),
            ManagerConfig::default(),
        ));

        runner.start().await.unwrap();
        let status = observer.system_status().await.unwrap();
        assert!(!status.running);
        assert!(status.monitoring_active);

        runner.stop().await.unwrap();
        assert!(!observer.system_status().await.unwrap().monitoring_active);
    }

    #[tokio::test]
    async fn placement_failure_lands_in_the_error_buffer() {
        let paper = Arc::new(PaperExchange::new());
        let orch = orchestrator(&paper).await;

        paper.fail_next("place_market_order", 1);
        assert!(orch.place_position(&recommendation()).await.is_err());

        let status = orch.system_status().await.unwrap();
        assert_eq!(status.recent_errors.len(), 1);
        assert_eq!(
            status.recent_errors[0].severity,
            crate::errors::Severity::Warning
        );
    }

    #[tokio::test]
    async fn position_details_include_the_audit_trail() {
        let paper = Arc::new(PaperExchange::new());
        let orch = orchestrator(&paper).await;
        paper.set_position("BTC_USDT", 200, dec!(50000));

        let outcome = orch.place_position(&recommendation()).await.unwrap();

        let details = orch
            .position_details(outcome.position_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.position.phase, PositionPhase::Initial);
        assert!(!details.audits.is_empty());

        let all = orch.active_position_details().await.unwrap();
        assert_eq!(all.len(), 1);

        assert!(orch.position_details(uuid::Uuid::new_v4()).await.unwrap().is_none());
    }

    // Real clock: sqlite queries run on a plain OS thread, and a paused
    // tokio clock auto-advances past the pool's acquire timeout before
    // that thread can respond. The 30s cycles below elapse in real time.
    #[tokio::test]
    async fn running_loops_carry_a_fill_through_to_the_stop_move() {
        let paper = Arc::new(PaperExchange::new());
        let orch = orchestrator(&paper).await;
        paper.set_position("BTC_USDT", 200, dec!(50000));

        let outcome = orch.place_position(&recommendation()).await.unwrap();
        paper.mark_trigger_finished(&outcome.tier_order_ids[0], "succeeded");

        orch.start().await.unwrap();
        // Several virtual 30s cycles: detection journals the fill, then the
        // management loop applies it.
        tokio::time::sleep(Duration::from_secs(120)).await;
        orch.stop().await.unwrap();

        let details = orch
            .position_details(outcome.position_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.position.phase, PositionPhase::Tp1Filled);
        assert_eq!(details.position.remaining_size, 100);
        assert_eq!(details.position.current_stop_price, dec!(50025.0));

        let status = orch.system_status().await.unwrap();
        assert_eq!(status.unprocessed_fills, 0);
        assert!(status.last_check.is_some());
    }
}
