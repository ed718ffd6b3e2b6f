use tracing::info;
use ulid::Ulid;

use crate::calendar::now_ms;
use crate::limits::*;
use crate::model::*;

use super::{validate_span, Engine, EngineError};

impl Engine {
    pub async fn add_blocked_time(
        &self,
        resource_id: Ulid,
        span: Span,
        status: BlockStatus,
        reason: Option<String>,
        recurrence: Option<Recurrence>,
    ) -> Result<BlockedTime, EngineError> {
        validate_span(&span)?;
        if span.is_empty() {
            return Err(EngineError::InvalidSpan(span));
        }
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        if let Some(rec) = recurrence {
            if rec.interval == 0 {
                return Err(EngineError::Invalid("recurrence interval must be at least 1".into()));
            }
            if rec.until.is_some_and(|u| u < span.start) {
                return Err(EngineError::Invalid("recurrence ends before it starts".into()));
            }
            if span.duration_ms() > rec.step_ms() {
                return Err(EngineError::Invalid("recurring block is longer than its period".into()));
            }
        }

        let blocked = BlockedTime {
            id: Ulid::new(),
            resource_id,
            span,
            status,
            reason,
            recurrence,
            created_at: now_ms(),
        };
        self.store.put_blocked_time(blocked.clone()).await?;
        info!(
            "blocked [{}, {}) on {resource_id} ({:?}{})",
            span.start,
            span.end,
            status,
            if recurrence.is_some() { ", recurring" } else { "" }
        );
        Ok(blocked)
    }

    pub async fn remove_blocked_time(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.store.remove_blocked_time(id).await? {
            return Err(EngineError::NotFound(id));
        }
        info!("removed blocked time {id}");
        Ok(())
    }

    /// Concrete blocked occurrences overlapping `window`, by start.
    pub async fn blocked_times(&self, resource_id: Ulid, window: Span) -> Result<Vec<BlockedOccurrence>, EngineError> {
        validate_span(&window)?;
        let blocked = self.store.blocked_times_overlapping(resource_id, window).await?;
        let mut out: Vec<BlockedOccurrence> = blocked
            .iter()
            .flat_map(|b| {
                b.occurrences(&window).into_iter().map(|span| BlockedOccurrence {
                    blocked_id: b.id,
                    span,
                    status: b.status,
                    reason: b.reason.clone(),
                })
            })
            .collect();
        out.sort_by_key(|o| o.span.start);
        Ok(out)
    }
}
