//! Bounded context retrieval (C2): the ancestor/dependent subgraph around a
//! task, capped at depth 5 in each direction, with optional memoization.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::adapters::sqlite::{context_repository, edge_repository, task_repository};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{Capability, CoreConfig, Principal, TaskState, MAX_CONTEXT_DEPTH};
use crate::domain::ports::Clock;

/// One node of the bounded subgraph. `depth` is hops from the target task;
/// ancestors and dependents count separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextNode {
    pub task_id: Uuid,
    pub short_id: String,
    pub title: String,
    pub state: TaskState,
    pub priority: i32,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextGraph {
    pub task_id: Uuid,
    pub short_id: String,
    pub ancestor_depth: u32,
    pub dependent_depth: u32,
    pub ancestors: Vec<ContextNode>,
    pub dependents: Vec<ContextNode>,
    pub computed_at: DateTime<Utc>,
}

pub struct ContextService {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    config: Arc<CoreConfig>,
}

impl ContextService {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, config: Arc<CoreConfig>) -> Self {
        Self { pool, clock, config }
    }

    /// Bounded subgraph around `task_id`. Depths default to (2, 1) and cap
    /// at 5. Depth 0 returns only the target. `bypass_cache` forces a fresh
    /// walk.
    pub async fn task_context(
        &self,
        principal: &Principal,
        task_id: Uuid,
        ancestor_depth: Option<u32>,
        dependent_depth: Option<u32>,
        bypass_cache: bool,
    ) -> CoreResult<ContextGraph> {
        let ancestor_depth = ancestor_depth.unwrap_or(self.config.context.default_ancestor_depth);
        let dependent_depth =
            dependent_depth.unwrap_or(self.config.context.default_dependent_depth);
        if ancestor_depth > MAX_CONTEXT_DEPTH || dependent_depth > MAX_CONTEXT_DEPTH {
            return Err(CoreError::InvalidArgument(format!(
                "context depth exceeds cap of {MAX_CONTEXT_DEPTH}"
            )));
        }

        let mut conn = self.pool.acquire().await?;
        let task = task_repository::get(&mut conn, task_id).await?;
        principal.require(Capability::ProjectRead, Some(task.project_id))?;

        if !bypass_cache {
            if let Some(cached) =
                context_repository::fetch(&mut conn, task_id, ancestor_depth, dependent_depth).await?
            {
                return Ok(serde_json::from_value(cached.subgraph)?);
            }
        }

        let now = self.clock.now();
        let ancestors = walk(&mut conn, task_id, ancestor_depth, Direction::Ancestors).await?;
        let dependents = walk(&mut conn, task_id, dependent_depth, Direction::Dependents).await?;

        let graph = ContextGraph {
            task_id,
            short_id: task.short_id,
            ancestor_depth,
            dependent_depth,
            ancestors,
            dependents,
            computed_at: now,
        };
        context_repository::store(
            &mut conn,
            task_id,
            task.project_id,
            ancestor_depth,
            dependent_depth,
            &serde_json::to_value(&graph)?,
            &now.to_rfc3339(),
        )
        .await?;
        Ok(graph)
    }

    /// Evict cache entries older than the configured TTL. Returns rows
    /// dropped; used by the background sweep.
    pub async fn gc_cache(&self) -> CoreResult<u64> {
        let cutoff = self.clock.now() - Duration::seconds(self.config.context.cache_ttl_seconds);
        let mut conn = self.pool.acquire().await?;
        context_repository::evict_older_than(&mut conn, &cutoff.to_rfc3339()).await
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Direction {
    Ancestors,
    Dependents,
}

/// Breadth-first walk up (ancestors) or down (dependents) to `max_depth`
/// hops. Nodes are recorded at their first (shallowest) depth; ordering is
/// (depth, short_id) for stability.
async fn walk(
    conn: &mut SqliteConnection,
    start: Uuid,
    max_depth: u32,
    direction: Direction,
) -> CoreResult<Vec<ContextNode>> {
    let mut nodes = Vec::new();
    let mut seen: HashSet<Uuid> = HashSet::from([start]);
    let mut frontier = vec![start];

    for depth in 1..=max_depth {
        let mut next = Vec::new();
        for task_id in frontier {
            let neighbor_ids: Vec<Uuid> = match direction {
                Direction::Ancestors => edge_repository::incoming(conn, task_id)
                    .await?
                    .into_iter()
                    .map(|e| e.from_task_id)
                    .collect(),
                Direction::Dependents => edge_repository::outgoing(conn, task_id)
                    .await?
                    .into_iter()
                    .map(|e| e.to_task_id)
                    .collect(),
            };
            for neighbor in neighbor_ids {
                if !seen.insert(neighbor) {
                    continue;
                }
                let task = task_repository::get(conn, neighbor).await?;
                nodes.push(ContextNode {
                    task_id: task.id,
                    short_id: task.short_id,
                    title: task.title,
                    state: task.state,
                    priority: task.priority,
                    depth,
                });
                next.push(neighbor);
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    nodes.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.short_id.cmp(&b.short_id)));
    Ok(nodes)
}
