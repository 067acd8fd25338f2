//! Leases and reservations: the two hold types on a task.
//!
//! A lease is an exclusive, TTL-bounded hold acquired by claiming; its
//! fencing counter is the authoritative anti-replay token. A reservation is
//! a directed assignment that keeps a task out of the general pull queue
//! until the assignee claims it or the TTL lapses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// TTL bounds shared by leases and reservations, in seconds.
pub const MIN_TTL_SECONDS: i64 = 60;
pub const MAX_TTL_SECONDS: i64 = 86_400;
pub const DEFAULT_LEASE_TTL_SECONDS: i64 = 900;
pub const DEFAULT_RESERVATION_TTL_SECONDS: i64 = 1_800;

pub fn clamp_ttl(ttl_seconds: i64) -> i64 {
    ttl_seconds.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Active,
    Expired,
    Released,
    /// Terminal hand-off: the work completed under this lease.
    Consumed,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Released => "released",
            Self::Consumed => "consumed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "released" => Some(Self::Released),
            "consumed" => Some(Self::Consumed),
            _ => None,
        }
    }
}

/// Exclusive hold on a task by one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: Uuid,
    /// Opaque token presented on heartbeat/release and fenced mutations.
    pub token: String,
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub agent_id: String,
    pub status: LeaseStatus,
    /// Snapshot of the task's fencing counter at grant time; must still
    /// match for every write under this lease.
    pub fencing_counter: i64,
    pub ttl_seconds: i64,
    pub expires_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lease {
    pub fn grant(
        task_id: Uuid,
        project_id: Uuid,
        agent_id: impl Into<String>,
        fencing_counter: i64,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = clamp_ttl(ttl_seconds);
        Self {
            id: Uuid::new_v4(),
            token: Uuid::new_v4().simple().to_string(),
            task_id,
            project_id,
            agent_id: agent_id.into(),
            status: LeaseStatus::Active,
            fencing_counter,
            ttl_seconds: ttl,
            expires_at: now + Duration::seconds(ttl),
            heartbeat_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Extend the hold to `now + ttl`. Only valid on active leases.
    pub fn extend(&mut self, now: DateTime<Utc>) {
        self.heartbeat_at = now;
        self.expires_at = now + Duration::seconds(self.ttl_seconds);
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Expired,
    Released,
    /// The assignee claimed the task.
    Consumed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Released => "released",
            Self::Consumed => "consumed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "released" => Some(Self::Released),
            "consumed" => Some(Self::Consumed),
            _ => None,
        }
    }
}

/// Directed assignment of a task to a specific agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub assignee_agent_id: String,
    pub status: ReservationStatus,
    pub ttl_seconds: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn assign(
        task_id: Uuid,
        project_id: Uuid,
        assignee: impl Into<String>,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = clamp_ttl(ttl_seconds);
        Self {
            id: Uuid::new_v4(),
            task_id,
            project_id,
            assignee_agent_id: assignee.into(),
            status: ReservationStatus::Active,
            ttl_seconds: ttl,
            expires_at: now + Duration::seconds(ttl),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_clamped_to_bounds() {
        assert_eq!(clamp_ttl(5), MIN_TTL_SECONDS);
        assert_eq!(clamp_ttl(1_000_000), MAX_TTL_SECONDS);
        assert_eq!(clamp_ttl(1_800), 1_800);
    }

    #[test]
    fn lease_expiry_and_extension() {
        let now = Utc::now();
        let mut lease = Lease::grant(Uuid::new_v4(), Uuid::new_v4(), "agent-1", 1, 900, now);
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + Duration::seconds(900)));

        let later = now + Duration::seconds(600);
        lease.extend(later);
        assert!(!lease.is_expired(now + Duration::seconds(900)));
        assert_eq!(lease.expires_at, later + Duration::seconds(900));
    }

    #[test]
    fn tokens_are_unique_per_grant() {
        let now = Utc::now();
        let a = Lease::grant(Uuid::new_v4(), Uuid::new_v4(), "a", 1, 900, now);
        let b = Lease::grant(Uuid::new_v4(), Uuid::new_v4(), "a", 1, 900, now);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn reservation_expiry_boundary() {
        let now = Utc::now();
        let r = Reservation::assign(Uuid::new_v4(), Uuid::new_v4(), "agent-2", 60, now);
        assert!(!r.is_expired(now + Duration::seconds(59)));
        assert!(r.is_expired(now + Duration::seconds(60)));
    }
}
