//! Event log service (C1).
//!
//! Events are appended inside the mutating operation's transaction and
//! become durable with it; in-process subscribers are notified strictly
//! after commit, in commit order. The durable log is the source of truth:
//! broadcast lag drops lose nothing.

use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::adapters::sqlite::event_repository;
use crate::domain::errors::CoreResult;
use crate::domain::models::{EventEntity, EventRecord};

const BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventLog {
    pool: SqlitePool,
    sender: broadcast::Sender<EventRecord>,
}

impl EventLog {
    pub fn new(pool: SqlitePool) -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { pool, sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Publish committed events to in-process subscribers. Call only after
    /// the enclosing transaction has committed.
    pub fn publish_all(&self, records: Vec<EventRecord>) {
        for record in records {
            // No receivers is fine; the durable log already has the event.
            let _ = self.sender.send(record);
        }
    }

    /// Project stream in commit order, starting after `since`.
    pub async fn events_since(
        &self,
        project_id: Uuid,
        since: i64,
        limit: u32,
    ) -> CoreResult<Vec<EventRecord>> {
        let mut conn = self.pool.acquire().await?;
        event_repository::list_since(&mut conn, project_id, since, limit).await
    }

    /// Filtered projection by entity kind (e.g. the task event stream).
    pub async fn entity_stream(
        &self,
        project_id: Uuid,
        entity: EventEntity,
        since: i64,
        limit: u32,
    ) -> CoreResult<Vec<EventRecord>> {
        let mut conn = self.pool.acquire().await?;
        event_repository::list_for_entity_kind(&mut conn, project_id, entity.as_str(), since, limit)
            .await
    }

    pub async fn events_for_entity(
        &self,
        entity: EventEntity,
        entity_id: &str,
    ) -> CoreResult<Vec<EventRecord>> {
        let mut conn = self.pool.acquire().await?;
        event_repository::list_for_entity(&mut conn, entity.as_str(), entity_id).await
    }
}
