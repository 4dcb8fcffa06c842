use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub const PREVIEW_MAX_CHARS: usize = 60;
pub const FALLBACK_DISPLAY_NAME: &str = "Unknown user";

/// Watermark value used when no read marker exists for a conversation.
pub const EPOCH_MS: i64 = 0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Group,
    LegacyDirect,
    Direct,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::LegacyDirect => "legacy_direct",
            Self::Direct => "direct",
        }
    }
}

/// Globally unique conversation address. Ids are unique only within one
/// storage family, so the family tag is part of the key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConversationRef {
    Group(String),
    LegacyDirect(String),
    Direct(String),
}

impl ConversationRef {
    pub fn kind(&self) -> ConversationKind {
        match self {
            Self::Group(_) => ConversationKind::Group,
            Self::LegacyDirect(_) => ConversationKind::LegacyDirect,
            Self::Direct(_) => ConversationKind::Direct,
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Group(id) | Self::LegacyDirect(id) | Self::Direct(id) => id,
        }
    }

    pub fn sort_key(&self) -> (&'static str, &str) {
        (self.kind().as_str(), self.conversation_id())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub conversation: ConversationRef,
    pub sender_id: String,
    pub body: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupConversation {
    pub group_id: String,
    pub display_name: String,
    pub member_user_ids: Vec<String>,
}

/// Conversation row shared by the legacy-direct and direct families. The
/// families stay separate storage instances; only the row shape is common.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectConversationRecord {
    pub conversation_id: String,
    pub participant_a: String,
    pub participant_b: String,
}

impl DirectConversationRecord {
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.participant_a == user_id {
            Some(&self.participant_b)
        } else if self.participant_b == user_id {
            Some(&self.participant_a)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Approved,
    Pending,
    Rejected,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadMarkerRow {
    pub user_id: String,
    pub conversation: ConversationRef,
    pub last_read_at_ms: i64,
}

/// One row of the merged inbox. Derived on every aggregator pass, never
/// persisted or patched incrementally.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboxEntry {
    pub conversation: ConversationRef,
    pub title: String,
    pub counterpart_name: Option<String>,
    pub preview: String,
    pub last_message_at_ms: Option<i64>,
    pub unread_count: usize,
}

impl InboxEntry {
    pub fn kind(&self) -> ConversationKind {
        self.conversation.kind()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboxView {
    pub entries: Vec<InboxEntry>,
    pub total_unread: usize,
}

impl InboxView {
    pub fn from_entries(mut entries: Vec<InboxEntry>) -> Self {
        sort_entries(&mut entries);
        let total_unread = entries.iter().map(|entry| entry.unread_count).sum();
        Self {
            entries,
            total_unread,
        }
    }
}

pub fn message_preview(body: &str) -> String {
    body.chars().take(PREVIEW_MAX_CHARS).collect()
}

/// Newest first; entries without a timestamp sort last. Ties fall back to
/// the conversation key so a pass over identical data is deterministic.
pub fn sort_entries(entries: &mut [InboxEntry]) {
    entries.sort_by(|a, b| match (a.last_message_at_ms, b.last_message_at_ms) {
        (Some(lhs), Some(rhs)) => rhs
            .cmp(&lhs)
            .then_with(|| a.conversation.sort_key().cmp(&b.conversation.sort_key())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.conversation.sort_key().cmp(&b.conversation.sort_key()),
    });
}
