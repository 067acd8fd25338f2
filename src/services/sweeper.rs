//! Background sweep supervisor.
//!
//! Three idempotent loops share one task: lease/reservation expiry, gate
//! evaluation, and context-cache GC. Gate evaluation additionally runs on
//! task events from the bus, so checkpoints open promptly rather than on the
//! next tick. Sweeps log failures and re-enter their loop; they never
//! surface errors to callers.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapters::sqlite::project_repository;
use crate::domain::errors::CoreResult;
use crate::domain::models::CoreConfig;

use super::context::ContextService;
use super::event_log::EventLog;
use super::gate_engine::GateEngine;
use super::scheduler::Scheduler;

pub struct Sweeper {
    pool: SqlitePool,
    events: EventLog,
    scheduler: Arc<Scheduler>,
    gates: Arc<GateEngine>,
    context: Arc<ContextService>,
    config: Arc<CoreConfig>,
}

impl Sweeper {
    pub fn new(
        pool: SqlitePool,
        events: EventLog,
        scheduler: Arc<Scheduler>,
        gates: Arc<GateEngine>,
        context: Arc<ContextService>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self { pool, events, scheduler, gates, context, config }
    }

    /// Spawn the supervisor. Send `true` on the returned channel (or drop
    /// it) to stop.
    pub fn spawn(self) -> (JoinHandle<()>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        (handle, shutdown_tx)
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut sweep_tick =
            tokio::time::interval(Duration::from_secs(self.config.sweep.interval_seconds.max(1)));
        let mut gate_tick =
            tokio::time::interval(Duration::from_secs(self.config.gate_tick_seconds.max(1)));
        let mut bus = self.events.subscribe();

        loop {
            tokio::select! {
                _ = sweep_tick.tick() => {
                    self.sweep_once().await;
                }
                _ = gate_tick.tick() => {
                    self.evaluate_gates().await;
                }
                event = bus.recv() => {
                    match event {
                        Ok(record) if record.entity_type == "task" => {
                            if let Err(e) = self.gates.evaluate_project(record.project_id).await {
                                warn!(error = %e, project_id = %record.project_id,
                                    "gate evaluation on task event failed");
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            // The tick re-evaluates everything; lost
                            // notifications only cost latency.
                            debug!(skipped, "event bus lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One pass of every expiry sweep. Public so embedders and tests can
    /// drive sweeps deterministically without the timer.
    pub async fn sweep_once(&self) {
        if let Err(e) = self.scheduler.sweep_expired_leases().await {
            warn!(error = %e, "lease expiry sweep failed");
        }
        if let Err(e) = self.scheduler.sweep_expired_reservations().await {
            warn!(error = %e, "reservation expiry sweep failed");
        }
        match self.context.gc_cache().await {
            Ok(evicted) if evicted > 0 => debug!(evicted, "context cache GC"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "context cache GC failed"),
        }
    }

    /// Evaluate gate rules across all active projects.
    pub async fn evaluate_gates(&self) {
        let projects = match self.active_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                warn!(error = %e, "could not list projects for gate tick");
                return;
            }
        };
        for project in projects {
            if let Err(e) = self.gates.evaluate_project(project).await {
                warn!(error = %e, project_id = %project, "gate tick evaluation failed");
            }
        }
    }

    async fn active_projects(&self) -> CoreResult<Vec<uuid::Uuid>> {
        let mut conn = self.pool.acquire().await?;
        Ok(project_repository::list(&mut conn)
            .await?
            .into_iter()
            .filter(|p| p.accepts_mutations())
            .map(|p| p.id)
            .collect())
    }
}
