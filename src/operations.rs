//! Journal of multi-call brokerage actions.
//!
//! Placing a Capital.com trade takes two vendor calls (submit, then confirm)
//! and closing a position takes two (read, then offsetting order). Each run is
//! recorded here so a half-finished action can be found and reconciled.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    PlaceTrade,
    ClosePosition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OperationState {
    Started,
    #[serde(rename_all = "camelCase")]
    Placed { deal_reference: String },
    #[serde(rename_all = "camelCase")]
    Confirmed { deal_id: String },
    #[serde(rename_all = "camelCase")]
    PositionRead { direction: String, size: f64 },
    #[serde(rename_all = "camelCase")]
    OffsetSent { deal_reference: String },
    Closed,
    Failed { stage: String, reason: String },
}

impl OperationState {
    pub fn name(&self) -> &'static str {
        match self {
            OperationState::Started => "started",
            OperationState::Placed { .. } => "placed",
            OperationState::Confirmed { .. } => "confirmed",
            OperationState::PositionRead { .. } => "position_read",
            OperationState::OffsetSent { .. } => "offset_sent",
            OperationState::Closed => "closed",
            OperationState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Confirmed { .. } | OperationState::Closed | OperationState::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: Uuid,
    pub identity: String,
    pub kind: OperationKind,
    #[serde(flatten)]
    pub state: OperationState,
    /// Last state before a failure, so callers know how far the action got.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_after: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct OperationJournal {
    records: RwLock<HashMap<Uuid, OperationRecord>>,
    retention: Duration,
}

impl Default for OperationJournal {
    fn default() -> Self {
        Self::new(Duration::hours(1))
    }
}

impl OperationJournal {
    pub fn new(retention: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub async fn begin(&self, identity: &str, kind: OperationKind) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut records = self.records.write().await;
        // unresolved records stay until they reach a terminal state
        records.retain(|_, r| !r.state.is_terminal() || now - r.updated_at < self.retention);
        records.insert(
            id,
            OperationRecord {
                id,
                identity: identity.to_string(),
                kind,
                state: OperationState::Started,
                failed_after: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub async fn advance(&self, id: Uuid, state: OperationState) {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            tracing::warn!(operation = %id, "Advancing an unknown operation");
            return;
        };
        tracing::debug!(
            operation = %id,
            from = record.state.name(),
            to = state.name(),
            "Operation state change"
        );
        if matches!(state, OperationState::Failed { .. }) {
            record.failed_after = Some(record.state.name().to_string());
        }
        record.state = state;
        record.updated_at = Utc::now();
    }

    pub async fn fail(&self, id: Uuid, stage: &str, reason: impl Into<String>) {
        self.advance(
            id,
            OperationState::Failed {
                stage: stage.to_string(),
                reason: reason.into(),
            },
        )
        .await;
    }

    #[cfg(test)]
    async fn get(&self, id: Uuid) -> Option<OperationRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// Records for one identity, newest first.
    pub async fn for_identity(&self, identity: &str) -> Vec<OperationRecord> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.identity == identity)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}
