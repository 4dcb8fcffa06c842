use std::sync::Arc;

use tracing::warn;

use crate::DomainResult;
use crate::conversation::{ConversationKind, ConversationRef, EPOCH_MS, ReadMarkerRow};
use crate::error::DomainError;
use crate::ports::read_markers::ReadMarkerRows;

/// Watermark access for one read-marker family. Upserts are idempotent and
/// clamped: a watermark never moves backward, and a caller racing an
/// identical or older timestamp observes the stored maximum.
#[derive(Clone)]
pub struct ReadMarkerStore {
    rows: Arc<dyn ReadMarkerRows>,
}

impl ReadMarkerStore {
    pub fn new(rows: Arc<dyn ReadMarkerRows>) -> Self {
        Self { rows }
    }

    pub async fn get(
        &self,
        user_id: &str,
        conversation: &ConversationRef,
    ) -> DomainResult<Option<i64>> {
        let row = self.rows.select(user_id, conversation).await?;
        Ok(row.map(|row| row.last_read_at_ms))
    }

    /// Watermark with the absent-marker default applied: no row means epoch,
    /// i.e. everything unread.
    pub async fn watermark(
        &self,
        user_id: &str,
        conversation: &ConversationRef,
    ) -> DomainResult<i64> {
        Ok(self.get(user_id, conversation).await?.unwrap_or(EPOCH_MS))
    }

    /// Upsert built from row primitives because one storage family rejects
    /// native on-conflict upsert inconsistently: update first, insert on
    /// zero rows, and retry the update once when the insert loses a race to
    /// a concurrent duplicate. Returns the effective stored watermark.
    pub async fn upsert(
        &self,
        user_id: &str,
        conversation: &ConversationRef,
        read_at_ms: i64,
    ) -> DomainResult<i64> {
        if let Some(existing) = self.rows.select(user_id, conversation).await? {
            if existing.last_read_at_ms >= read_at_ms {
                return Ok(existing.last_read_at_ms);
            }
        }

        let updated = self.rows.update(user_id, conversation, read_at_ms).await?;
        if updated > 0 {
            return Ok(read_at_ms);
        }

        let row = ReadMarkerRow {
            user_id: user_id.to_string(),
            conversation: conversation.clone(),
            last_read_at_ms: read_at_ms,
        };
        match self.rows.insert(&row).await {
            Ok(stored) => Ok(stored.last_read_at_ms),
            Err(DomainError::Conflict) => {
                warn!(
                    kind = conversation.kind().as_str(),
                    conversation_id = conversation.conversation_id(),
                    "read marker insert lost a race, retrying update"
                );
                let retried = self.rows.update(user_id, conversation, read_at_ms).await?;
                if retried > 0 {
                    return Ok(read_at_ms);
                }
                Err(DomainError::Unavailable(
                    "read marker upsert failed after retry".to_string(),
                ))
            }
            Err(err) => Err(err),
        }
    }
}

/// One marker store per conversation family, since each family persists its
/// watermarks in a different shape.
#[derive(Clone)]
pub struct FamilyReadMarkers {
    pub group: ReadMarkerStore,
    pub legacy_direct: ReadMarkerStore,
    pub direct: ReadMarkerStore,
}

impl FamilyReadMarkers {
    pub fn for_kind(&self, kind: ConversationKind) -> &ReadMarkerStore {
        match kind {
            ConversationKind::Group => &self.group,
            ConversationKind::LegacyDirect => &self.legacy_direct,
            ConversationKind::Direct => &self.direct,
        }
    }
}
