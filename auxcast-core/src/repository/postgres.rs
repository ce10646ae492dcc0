use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    models::{
        Broadcast, BroadcastId, ChatMessage, ListenerPresence, MessageId, User, UserId,
    },
    Result,
};

use super::Store;

/// PostgreSQL-backed durable store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_user(&self, row: &PgRow) -> Result<User> {
        Ok(User {
            id: UserId::from_string(row.try_get("id")?),
            display_name: row.try_get("display_name")?,
            genre_tags: row.try_get("genre_tags")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_broadcast(&self, row: &PgRow) -> Result<Broadcast> {
        Ok(Broadcast {
            id: BroadcastId::from_string(row.try_get("id")?),
            curator_id: UserId::from_string(row.try_get("curator_id")?),
            caption: row.try_get("caption")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            last_heartbeat_at: row.try_get("last_heartbeat_at")?,
            peak_listeners: row.try_get("peak_listeners")?,
            message_count: row.try_get("message_count")?,
        })
    }

    fn row_to_message(&self, row: &PgRow) -> Result<ChatMessage> {
        Ok(ChatMessage {
            id: MessageId::from_string(row.try_get("id")?),
            broadcast_id: BroadcastId::from_string(row.try_get("broadcast_id")?),
            user_id: UserId::from_string(row.try_get("user_id")?),
            kind: row.try_get("kind")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_listener(&self, row: &PgRow) -> Result<ListenerPresence> {
        Ok(ListenerPresence {
            broadcast_id: BroadcastId::from_string(row.try_get("broadcast_id")?),
            user_id: UserId::from_string(row.try_get("user_id")?),
            joined_at: row.try_get("joined_at")?,
        })
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore").finish()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> Result<User> {
        let row = sqlx::query(
            r"
            INSERT INTO users (id, display_name, genre_tags, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, display_name, genre_tags, created_at
            ",
        )
        .bind(user.id.as_str())
        .bind(&user.display_name)
        .bind(&user.genre_tags)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await?;

        self.row_to_user(&row)
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            r"
            SELECT id, display_name, genre_tags, created_at
            FROM users
            WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let id_strings: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        let rows = sqlx::query(
            r"
            SELECT id, display_name, genre_tags, created_at
            FROM users
            WHERE id = ANY($1)
            ",
        )
        .bind(&id_strings)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_user(row)).collect()
    }

    async fn insert_follow(&self, follower: &UserId, curator: &UserId) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO follows (follower_id, curator_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (follower_id, curator_id) DO NOTHING
            ",
        )
        .bind(follower.as_str())
        .bind(curator.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_follow(&self, follower: &UserId, curator: &UserId) -> Result<bool> {
        let result = sqlx::query(
            r"
            DELETE FROM follows
            WHERE follower_id = $1 AND curator_id = $2
            ",
        )
        .bind(follower.as_str())
        .bind(curator.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn following(&self, follower: &UserId) -> Result<Vec<UserId>> {
        let rows = sqlx::query(
            r"
            SELECT curator_id
            FROM follows
            WHERE follower_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(follower.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(UserId::from_string(row.try_get("curator_id")?)))
            .collect()
    }

    async fn followers(&self, curator: &UserId) -> Result<Vec<UserId>> {
        let rows = sqlx::query(
            r"
            SELECT follower_id
            FROM follows
            WHERE curator_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(curator.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(UserId::from_string(row.try_get("follower_id")?)))
            .collect()
    }

    async fn follower_count(&self, curator: &UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM follows WHERE curator_id = $1
            ",
        )
        .bind(curator.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn follower_counts(&self, curators: &[UserId]) -> Result<HashMap<UserId, i64>> {
        if curators.is_empty() {
            return Ok(HashMap::new());
        }

        let id_strings: Vec<String> = curators.iter().map(|id| id.as_str().to_string()).collect();
        let rows = sqlx::query(
            r"
            SELECT curator_id, COUNT(*) AS follower_count
            FROM follows
            WHERE curator_id = ANY($1)
            GROUP BY curator_id
            ",
        )
        .bind(&id_strings)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let curator_id: String = row.try_get("curator_id")?;
            let count: i64 = row.try_get("follower_count")?;
            counts.insert(UserId::from_string(curator_id), count);
        }
        Ok(counts)
    }

    async fn second_degree_curators(&self, viewer: &UserId) -> Result<Vec<UserId>> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT f2.curator_id
            FROM follows f1
            JOIN follows f2 ON f2.follower_id = f1.curator_id
            WHERE f1.follower_id = $1
              AND f2.curator_id <> $1
              AND f2.curator_id NOT IN (
                  SELECT curator_id FROM follows WHERE follower_id = $1
              )
            ",
        )
        .bind(viewer.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(UserId::from_string(row.try_get("curator_id")?)))
            .collect()
    }

    async fn insert_broadcast(&self, broadcast: &Broadcast) -> Result<Broadcast> {
        // The partial unique index broadcasts_live_curator_idx turns a
        // concurrent duplicate start into a 23505, mapped to AlreadyLive.
        let row = sqlx::query(
            r"
            INSERT INTO broadcasts (
                id, curator_id, caption, status,
                started_at, ended_at, last_heartbeat_at,
                peak_listeners, message_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING
                id, curator_id, caption, status,
                started_at, ended_at, last_heartbeat_at,
                peak_listeners, message_count
            ",
        )
        .bind(broadcast.id.as_str())
        .bind(broadcast.curator_id.as_str())
        .bind(&broadcast.caption)
        .bind(broadcast.status)
        .bind(broadcast.started_at)
        .bind(broadcast.ended_at)
        .bind(broadcast.last_heartbeat_at)
        .bind(broadcast.peak_listeners)
        .bind(broadcast.message_count)
        .fetch_one(&self.pool)
        .await?;

        self.row_to_broadcast(&row)
    }

    async fn get_broadcast(&self, id: &BroadcastId) -> Result<Option<Broadcast>> {
        let row = sqlx::query(
            r"
            SELECT
                id, curator_id, caption, status,
                started_at, ended_at, last_heartbeat_at,
                peak_listeners, message_count
            FROM broadcasts
            WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_broadcast(&row)?)),
            None => Ok(None),
        }
    }

    async fn live_broadcast_for_curator(&self, curator: &UserId) -> Result<Option<Broadcast>> {
        let row = sqlx::query(
            r"
            SELECT
                id, curator_id, caption, status,
                started_at, ended_at, last_heartbeat_at,
                peak_listeners, message_count
            FROM broadcasts
            WHERE curator_id = $1 AND status = 1
            ",
        )
        .bind(curator.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_broadcast(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_live_broadcasts(&self) -> Result<Vec<Broadcast>> {
        let rows = sqlx::query(
            r"
            SELECT
                id, curator_id, caption, status,
                started_at, ended_at, last_heartbeat_at,
                peak_listeners, message_count
            FROM broadcasts
            WHERE status = 1
            ORDER BY started_at DESC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_broadcast(row)).collect()
    }

    async fn list_lease_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<Broadcast>> {
        let rows = sqlx::query(
            r"
            SELECT
                id, curator_id, caption, status,
                started_at, ended_at, last_heartbeat_at,
                peak_listeners, message_count
            FROM broadcasts
            WHERE status = 1 AND last_heartbeat_at < $1
            ",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_broadcast(row)).collect()
    }

    async fn touch_heartbeat(&self, id: &BroadcastId, now: DateTime<Utc>) -> Result<bool> {
        // GREATEST keeps last_heartbeat_at monotonic under racing beats
        let result = sqlx::query(
            r"
            UPDATE broadcasts
            SET last_heartbeat_at = GREATEST(last_heartbeat_at, $2)
            WHERE id = $1 AND status = 1
            ",
        )
        .bind(id.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn end_broadcast(&self, id: &BroadcastId, ended_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE broadcasts
            SET status = 2, ended_at = $2
            WHERE id = $1 AND status = 1
            ",
        )
        .bind(id.as_str())
        .bind(ended_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn raise_peak_listeners(&self, id: &BroadcastId, observed: i32) -> Result<()> {
        sqlx::query(
            r"
            UPDATE broadcasts
            SET peak_listeners = GREATEST(peak_listeners, $2)
            WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .bind(observed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_message_count(&self, id: &BroadcastId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE broadcasts
            SET message_count = message_count + 1
            WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO broadcast_listeners (broadcast_id, user_id, joined_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (broadcast_id, user_id) DO NOTHING
            ",
        )
        .bind(broadcast_id.as_str())
        .bind(user_id.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<bool> {
        let result = sqlx::query(
            r"
            DELETE FROM broadcast_listeners
            WHERE broadcast_id = $1 AND user_id = $2
            ",
        )
        .bind(broadcast_id.as_str())
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_listeners(&self, broadcast_id: &BroadcastId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM broadcast_listeners WHERE broadcast_id = $1
            ",
        )
        .bind(broadcast_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_listeners(&self, broadcast_id: &BroadcastId) -> Result<Vec<ListenerPresence>> {
        let rows = sqlx::query(
            r"
            SELECT broadcast_id, user_id, joined_at
            FROM broadcast_listeners
            WHERE broadcast_id = $1
            ORDER BY joined_at ASC
            ",
        )
        .bind(broadcast_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_listener(row)).collect()
    }

    async fn clear_listeners(&self, broadcast_id: &BroadcastId) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM broadcast_listeners WHERE broadcast_id = $1
            ",
        )
        .bind(broadcast_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<ChatMessage> {
        let row = sqlx::query(
            r"
            INSERT INTO chat_messages (id, broadcast_id, user_id, kind, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, broadcast_id, user_id, kind, content, created_at
            ",
        )
        .bind(message.id.as_str())
        .bind(message.broadcast_id.as_str())
        .bind(message.user_id.as_str())
        .bind(message.kind)
        .bind(&message.content)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await?;

        self.row_to_message(&row)
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<ChatMessage>> {
        let row = sqlx::query(
            r"
            SELECT id, broadcast_id, user_id, kind, content, created_at
            FROM chat_messages
            WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_message(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_message(&self, id: &MessageId) -> Result<bool> {
        let result = sqlx::query(
            r"
            DELETE FROM chat_messages WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_messages(&self, broadcast_id: &BroadcastId, limit: i64) -> Result<Vec<ChatMessage>> {
        // Latest N selected newest-first, then flipped to oldest-first
        let rows = sqlx::query(
            r"
            SELECT id, broadcast_id, user_id, kind, content, created_at
            FROM (
                SELECT id, broadcast_id, user_id, kind, content, created_at
                FROM chat_messages
                WHERE broadcast_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
            ) latest
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(broadcast_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_message(row)).collect()
    }

    async fn list_messages_after(
        &self,
        broadcast_id: &BroadcastId,
        after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r"
            SELECT id, broadcast_id, user_id, kind, content, created_at
            FROM chat_messages
            WHERE broadcast_id = $1 AND created_at > $2
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            ",
        )
        .bind(broadcast_id.as_str())
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_message(row)).collect()
    }

    async fn prune_messages(&self, keep_per_broadcast: i64) -> Result<u64> {
        if keep_per_broadcast <= 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            r"
            DELETE FROM chat_messages
            WHERE id IN (
                SELECT id FROM (
                    SELECT id,
                           ROW_NUMBER() OVER (
                               PARTITION BY broadcast_id
                               ORDER BY created_at DESC, id DESC
                           ) AS rn
                    FROM chat_messages
                ) ranked
                WHERE rn > $1
            )
            ",
        )
        .bind(keep_per_broadcast)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
