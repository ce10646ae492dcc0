use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{BroadcastId, MessageId, UserId};

/// Chat message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Emoji,
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "emoji" => Ok(Self::Emoji),
            _ => Err(format!("Unknown message kind: {s}")),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Emoji => write!(f, "emoji"),
        }
    }
}

// Database mapping: MessageKind -> SMALLINT (1=text, 2=emoji)
impl sqlx::Type<sqlx::Postgres> for MessageKind {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i16 as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for MessageKind {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let val: i16 = match self {
            Self::Text => 1,
            Self::Emoji => 2,
        };
        <i16 as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&val, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for MessageKind {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let val = <i16 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match val {
            1 => Ok(Self::Text),
            2 => Ok(Self::Emoji),
            _ => Err(format!("Invalid MessageKind value: {val}").into()),
        }
    }
}

/// A chat message within a broadcast
///
/// Ordering key is `(created_at, id)`; the id breaks ties when two
/// messages land in the same timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub broadcast_id: BroadcastId,
    pub user_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Maximum content length in characters
    pub const MAX_CONTENT_CHARS: usize = 500;

    #[must_use]
    pub fn new(broadcast_id: BroadcastId, user_id: UserId, kind: MessageKind, content: String) -> Self {
        Self {
            id: MessageId::new(),
            broadcast_id,
            user_id,
            kind,
            content,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_message_kind_parse() {
        assert_eq!(MessageKind::from_str("text").unwrap(), MessageKind::Text);
        assert_eq!(MessageKind::from_str("EMOJI").unwrap(), MessageKind::Emoji);
        assert!(MessageKind::from_str("sticker").is_err());
    }

    #[test]
    fn test_new_message() {
        let msg = ChatMessage::new(
            BroadcastId::new(),
            UserId::new(),
            MessageKind::Text,
            "hello".to_string(),
        );
        assert_eq!(msg.id.as_str().len(), 12);
        assert_eq!(msg.kind, MessageKind::Text);
    }
}
