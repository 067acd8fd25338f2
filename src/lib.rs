//! Tascade: task-orchestration substrate for distributed AI agents.
//!
//! Project work is a dependency-aware DAG; execution is coordinated through
//! a claim/reservation scheduler with lease fencing; replans apply atomically
//! with impact analysis and hold invalidation; high-risk transitions are
//! gated behind auditable review evidence; and an append-only event stream
//! binds it all together. The crate exposes typed operations only. The
//! transport shell, tool adapters, and consoles live elsewhere and consume
//! these engines.

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

use std::sync::Arc;

use sqlx::SqlitePool;

use adapters::sqlite::{create_pool, Migrator, PoolConfig};
use domain::errors::{CoreError, CoreResult};
use domain::models::CoreConfig;
use domain::ports::{system_clock, Clock};
use services::{
    AuthService, ContextService, DagService, EventLog, GateEngine, LifecycleEngine, ReplanEngine,
    Scheduler, Sweeper,
};

pub use domain::errors::{CoreError as Error, CoreResult as Result};
pub use domain::models;

/// The assembled core: every engine over one store.
pub struct Core {
    pub config: Arc<CoreConfig>,
    pub pool: SqlitePool,
    pub events: EventLog,
    pub dag: DagService,
    pub scheduler: Arc<Scheduler>,
    pub lifecycle: LifecycleEngine,
    pub replan: ReplanEngine,
    pub gates: Arc<GateEngine>,
    pub context: Arc<ContextService>,
    pub auth: AuthService,
    clock: Arc<dyn Clock>,
}

impl Core {
    /// Open (or create) the configured database, run migrations, and wire
    /// the engines.
    pub async fn open(config: CoreConfig) -> CoreResult<Self> {
        let pool = create_pool(
            &config.database.path,
            Some(PoolConfig {
                max_connections: config.database.max_connections,
                ..PoolConfig::default()
            }),
        )
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;
        Self::with_pool(pool, config, system_clock()).await
    }

    /// Assemble the engines over an existing pool. Tests use this with an
    /// in-memory pool and a manual clock.
    pub async fn with_pool(
        pool: SqlitePool,
        config: CoreConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        Migrator::new(pool.clone())
            .run()
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        let config = Arc::new(config);
        let events = EventLog::new(pool.clone());
        let dag = DagService::new(pool.clone(), events.clone(), clock.clone());
        let scheduler = Arc::new(Scheduler::new(
            pool.clone(),
            events.clone(),
            clock.clone(),
            config.clone(),
        ));
        let lifecycle = LifecycleEngine::new(pool.clone(), events.clone(), clock.clone());
        let replan = ReplanEngine::new(pool.clone(), events.clone(), clock.clone());
        let gates = Arc::new(GateEngine::new(pool.clone(), events.clone(), clock.clone()));
        let context = Arc::new(ContextService::new(pool.clone(), clock.clone(), config.clone()));
        let auth = AuthService::new(pool.clone(), events.clone(), clock.clone());

        Ok(Self {
            config,
            pool,
            events,
            dag,
            scheduler,
            lifecycle,
            replan,
            gates,
            context,
            auth,
            clock,
        })
    }

    /// Build the background sweep supervisor for this core.
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.pool.clone(),
            self.events.clone(),
            self.scheduler.clone(),
            self.gates.clone(),
            self.context.clone(),
            self.config.clone(),
        )
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}
