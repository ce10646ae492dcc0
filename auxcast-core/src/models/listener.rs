use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{BroadcastId, UserId};

/// Listener membership in a broadcast
///
/// At most one row per (broadcast, user); joins are idempotent upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerPresence {
    pub broadcast_id: BroadcastId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

impl ListenerPresence {
    #[must_use]
    pub fn new(broadcast_id: BroadcastId, user_id: UserId) -> Self {
        Self {
            broadcast_id,
            user_id,
            joined_at: Utc::now(),
        }
    }
}

/// Follow edge in the social graph: `follower_id` follows `curator_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Follow {
    pub follower_id: UserId,
    pub curator_id: UserId,
    pub created_at: DateTime<Utc>,
}
