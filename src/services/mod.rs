//! Engine services: the seven core components plus the sweep supervisor.
//!
//! Each engine owns a pool clone and performs every externally visible
//! mutation inside one transaction that also appends events; the broadcast
//! bus is notified after commit. Engines do not share in-process state; all
//! cross-request ordering derives from the store.

pub mod authorization;
pub mod context;
pub mod dag_service;
pub mod event_log;
pub mod gate_engine;
pub mod lifecycle;
pub mod replan;
pub mod scheduler;
pub mod sweeper;

pub use authorization::{AuthService, IssuedKey};
pub use context::{ContextGraph, ContextNode, ContextService};
pub use dag_service::DagService;
pub use event_log::EventLog;
pub use gate_engine::{GateEngine, NewGateDecision, NewGateRule};
pub use lifecycle::LifecycleEngine;
pub use replan::{AppliedChangeSet, ReplanEngine};
pub use scheduler::{ClaimGrant, ClaimRequest, Scheduler};
pub use sweeper::Sweeper;
