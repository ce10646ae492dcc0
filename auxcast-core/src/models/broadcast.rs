use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::id::{BroadcastId, UserId};

/// Broadcast lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
    Live,
    Ended,
}

impl std::fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

// Database mapping: BroadcastStatus -> SMALLINT (1=live, 2=ended)
impl sqlx::Type<sqlx::Postgres> for BroadcastStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i16 as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for BroadcastStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let val: i16 = match self {
            Self::Live => 1,
            Self::Ended => 2,
        };
        <i16 as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&val, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for BroadcastStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let val = <i16 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match val {
            1 => Ok(Self::Live),
            2 => Ok(Self::Ended),
            _ => Err(format!("Invalid BroadcastStatus value: {val}").into()),
        }
    }
}

/// Why a broadcast transitioned to `Ended`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Curator ended the broadcast explicitly
    Stopped,
    /// Heartbeat lease expired and the sweeper ended it
    LivenessExpired,
}

impl EndReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::LivenessExpired => "liveness_expired",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A curator's broadcast session
///
/// Liveness has two parts: the stored `status` and the heartbeat lease.
/// A broadcast with `status == Live` whose `last_heartbeat_at` is older
/// than the liveness threshold is a zombie and must be treated as not
/// live by readers until the sweeper ends it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: BroadcastId,
    pub curator_id: UserId,
    pub caption: String,
    pub status: BroadcastStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: DateTime<Utc>,
    /// High-water mark of concurrent listeners, never decreases while live
    pub peak_listeners: i32,
    pub message_count: i64,
}

impl Broadcast {
    /// Maximum caption length in characters
    pub const MAX_CAPTION_CHARS: usize = 50;

    #[must_use]
    pub fn new(curator_id: UserId, caption: String) -> Self {
        let now = Utc::now();
        Self {
            id: BroadcastId::new(),
            curator_id,
            caption,
            status: BroadcastStatus::Live,
            started_at: now,
            ended_at: None,
            last_heartbeat_at: now,
            peak_listeners: 0,
            message_count: 0,
        }
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.status == BroadcastStatus::Ended
    }

    /// Whether the heartbeat lease is still valid at `now`
    #[must_use]
    pub fn lease_valid_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat_at) <= threshold
    }

    /// Liveness check: stored status AND an unexpired heartbeat lease
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.status == BroadcastStatus::Live && self.lease_valid_at(now, threshold)
    }
}
