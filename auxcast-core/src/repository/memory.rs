use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
    models::{
        Broadcast, BroadcastId, BroadcastStatus, ChatMessage, ListenerPresence, MessageId, User,
        UserId,
    },
    Error, Result,
};

use super::Store;

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    /// (follower_id, curator_id) -> created_at
    follows: HashMap<(String, String), DateTime<Utc>>,
    broadcasts: HashMap<String, Broadcast>,
    /// broadcast_id -> user_id -> joined_at
    listeners: HashMap<String, HashMap<String, DateTime<Utc>>>,
    messages: Vec<ChatMessage>,
}

/// In-memory store for tests and single-node dev
///
/// Semantics mirror `PgStore` exactly, including the at-most-one-live
/// constraint the partial unique index enforces in Postgres.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sort_messages(messages: &mut [ChatMessage]) {
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<User> {
        let mut inner = self.inner.write();
        if inner.users.contains_key(user.id.as_str()) {
            return Err(Error::Conflict("duplicate user id".to_string()));
        }
        inner.users.insert(user.id.as_str().to_string(), user.clone());
        Ok(user.clone())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.inner.read().users.get(id.as_str()).cloned())
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.users.get(id.as_str()).cloned())
            .collect())
    }

    async fn insert_follow(&self, follower: &UserId, curator: &UserId) -> Result<bool> {
        let key = (follower.as_str().to_string(), curator.as_str().to_string());
        let mut inner = self.inner.write();
        if inner.follows.contains_key(&key) {
            return Ok(false);
        }
        inner.follows.insert(key, Utc::now());
        Ok(true)
    }

    async fn delete_follow(&self, follower: &UserId, curator: &UserId) -> Result<bool> {
        let key = (follower.as_str().to_string(), curator.as_str().to_string());
        Ok(self.inner.write().follows.remove(&key).is_some())
    }

    async fn following(&self, follower: &UserId) -> Result<Vec<UserId>> {
        let inner = self.inner.read();
        let mut edges: Vec<(&DateTime<Utc>, &String)> = inner
            .follows
            .iter()
            .filter(|((f, _), _)| f == follower.as_str())
            .map(|((_, c), at)| (at, c))
            .collect();
        edges.sort_by(|a, b| b.0.cmp(a.0).then_with(|| a.1.cmp(b.1)));
        Ok(edges
            .into_iter()
            .map(|(_, c)| UserId::from_string(c.clone()))
            .collect())
    }

    async fn followers(&self, curator: &UserId) -> Result<Vec<UserId>> {
        let inner = self.inner.read();
        let mut edges: Vec<(&DateTime<Utc>, &String)> = inner
            .follows
            .iter()
            .filter(|((_, c), _)| c == curator.as_str())
            .map(|((f, _), at)| (at, f))
            .collect();
        edges.sort_by(|a, b| b.0.cmp(a.0).then_with(|| a.1.cmp(b.1)));
        Ok(edges
            .into_iter()
            .map(|(_, f)| UserId::from_string(f.clone()))
            .collect())
    }

    async fn follower_count(&self, curator: &UserId) -> Result<i64> {
        let inner = self.inner.read();
        Ok(inner
            .follows
            .keys()
            .filter(|(_, c)| c == curator.as_str())
            .count() as i64)
    }

    async fn follower_counts(&self, curators: &[UserId]) -> Result<HashMap<UserId, i64>> {
        let inner = self.inner.read();
        let mut counts = HashMap::new();
        for curator in curators {
            let n = inner
                .follows
                .keys()
                .filter(|(_, c)| c == curator.as_str())
                .count() as i64;
            if n > 0 {
                counts.insert(curator.clone(), n);
            }
        }
        Ok(counts)
    }

    async fn second_degree_curators(&self, viewer: &UserId) -> Result<Vec<UserId>> {
        let inner = self.inner.read();
        let direct: Vec<&String> = inner
            .follows
            .keys()
            .filter(|(f, _)| f == viewer.as_str())
            .map(|(_, c)| c)
            .collect();

        let mut result: Vec<String> = inner
            .follows
            .keys()
            .filter(|(f, _)| direct.iter().any(|d| *d == f))
            .map(|(_, c)| c.clone())
            .filter(|c| c != viewer.as_str() && !direct.iter().any(|d| *d == c))
            .collect();
        result.sort();
        result.dedup();
        Ok(result.into_iter().map(UserId::from_string).collect())
    }

    async fn insert_broadcast(&self, broadcast: &Broadcast) -> Result<Broadcast> {
        let mut inner = self.inner.write();
        // Same constraint the broadcasts_live_curator_idx partial index
        // enforces in Postgres
        if broadcast.status == BroadcastStatus::Live
            && inner.broadcasts.values().any(|b| {
                b.curator_id == broadcast.curator_id && b.status == BroadcastStatus::Live
            })
        {
            return Err(Error::AlreadyLive);
        }
        inner
            .broadcasts
            .insert(broadcast.id.as_str().to_string(), broadcast.clone());
        Ok(broadcast.clone())
    }

    async fn get_broadcast(&self, id: &BroadcastId) -> Result<Option<Broadcast>> {
        Ok(self.inner.read().broadcasts.get(id.as_str()).cloned())
    }

    async fn live_broadcast_for_curator(&self, curator: &UserId) -> Result<Option<Broadcast>> {
        let inner = self.inner.read();
        Ok(inner
            .broadcasts
            .values()
            .find(|b| b.curator_id == *curator && b.status == BroadcastStatus::Live)
            .cloned())
    }

    async fn list_live_broadcasts(&self) -> Result<Vec<Broadcast>> {
        let inner = self.inner.read();
        let mut live: Vec<Broadcast> = inner
            .broadcasts
            .values()
            .filter(|b| b.status == BroadcastStatus::Live)
            .cloned()
            .collect();
        live.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(live)
    }

    async fn list_lease_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<Broadcast>> {
        let inner = self.inner.read();
        Ok(inner
            .broadcasts
            .values()
            .filter(|b| b.status == BroadcastStatus::Live && b.last_heartbeat_at < cutoff)
            .cloned()
            .collect())
    }

    async fn touch_heartbeat(&self, id: &BroadcastId, now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.broadcasts.get_mut(id.as_str()) {
            Some(b) if b.status == BroadcastStatus::Live => {
                b.last_heartbeat_at = b.last_heartbeat_at.max(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn end_broadcast(&self, id: &BroadcastId, ended_at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.broadcasts.get_mut(id.as_str()) {
            Some(b) if b.status == BroadcastStatus::Live => {
                b.status = BroadcastStatus::Ended;
                b.ended_at = Some(ended_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn raise_peak_listeners(&self, id: &BroadcastId, observed: i32) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(b) = inner.broadcasts.get_mut(id.as_str()) {
            b.peak_listeners = b.peak_listeners.max(observed);
        }
        Ok(())
    }

    async fn increment_message_count(&self, id: &BroadcastId) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(b) = inner.broadcasts.get_mut(id.as_str()) {
            b.message_count += 1;
        }
        Ok(())
    }

    async fn upsert_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<bool> {
        let mut inner = self.inner.write();
        let members = inner
            .listeners
            .entry(broadcast_id.as_str().to_string())
            .or_default();
        if members.contains_key(user_id.as_str()) {
            return Ok(false);
        }
        members.insert(user_id.as_str().to_string(), Utc::now());
        Ok(true)
    }

    async fn remove_listener(&self, broadcast_id: &BroadcastId, user_id: &UserId) -> Result<bool> {
        let mut inner = self.inner.write();
        Ok(inner
            .listeners
            .get_mut(broadcast_id.as_str())
            .is_some_and(|members| members.remove(user_id.as_str()).is_some()))
    }

    async fn count_listeners(&self, broadcast_id: &BroadcastId) -> Result<i64> {
        let inner = self.inner.read();
        Ok(inner
            .listeners
            .get(broadcast_id.as_str())
            .map_or(0, |members| members.len() as i64))
    }

    async fn list_listeners(&self, broadcast_id: &BroadcastId) -> Result<Vec<ListenerPresence>> {
        let inner = self.inner.read();
        let mut listeners: Vec<ListenerPresence> = inner
            .listeners
            .get(broadcast_id.as_str())
            .map(|members| {
                members
                    .iter()
                    .map(|(user_id, joined_at)| ListenerPresence {
                        broadcast_id: broadcast_id.clone(),
                        user_id: UserId::from_string(user_id.clone()),
                        joined_at: *joined_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        listeners.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.as_str().cmp(b.user_id.as_str()))
        });
        Ok(listeners)
    }

    async fn clear_listeners(&self, broadcast_id: &BroadcastId) -> Result<u64> {
        let mut inner = self.inner.write();
        Ok(inner
            .listeners
            .remove(broadcast_id.as_str())
            .map_or(0, |members| members.len() as u64))
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<ChatMessage> {
        self.inner.write().messages.push(message.clone());
        Ok(message.clone())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<ChatMessage>> {
        let inner = self.inner.read();
        Ok(inner.messages.iter().find(|m| m.id == *id).cloned())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<bool> {
        let mut inner = self.inner.write();
        let before = inner.messages.len();
        inner.messages.retain(|m| m.id != *id);
        Ok(inner.messages.len() < before)
    }

    async fn list_messages(&self, broadcast_id: &BroadcastId, limit: i64) -> Result<Vec<ChatMessage>> {
        let inner = self.inner.read();
        let mut messages: Vec<ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| m.broadcast_id == *broadcast_id)
            .cloned()
            .collect();
        Self::sort_messages(&mut messages);
        // Keep the newest `limit`, preserving oldest-first order
        let skip = messages.len().saturating_sub(limit.max(0) as usize);
        Ok(messages.split_off(skip))
    }

    async fn list_messages_after(
        &self,
        broadcast_id: &BroadcastId,
        after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let inner = self.inner.read();
        let mut messages: Vec<ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| m.broadcast_id == *broadcast_id && m.created_at > after)
            .cloned()
            .collect();
        Self::sort_messages(&mut messages);
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }

    async fn prune_messages(&self, keep_per_broadcast: i64) -> Result<u64> {
        if keep_per_broadcast <= 0 {
            return Ok(0);
        }

        let mut inner = self.inner.write();
        let mut by_broadcast: HashMap<String, Vec<ChatMessage>> = HashMap::new();
        for message in inner.messages.drain(..) {
            by_broadcast
                .entry(message.broadcast_id.as_str().to_string())
                .or_default()
                .push(message);
        }

        let mut removed = 0u64;
        let mut kept = Vec::new();
        for (_, mut messages) in by_broadcast {
            Self::sort_messages(&mut messages);
            let skip = messages.len().saturating_sub(keep_per_broadcast as usize);
            removed += skip as u64;
            kept.extend(messages.split_off(skip));
        }
        inner.messages = kept;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;
    use chrono::Duration;

    #[tokio::test]
    async fn test_at_most_one_live_per_curator() {
        let store = MemoryStore::new();
        let curator = UserId::new();

        store
            .insert_broadcast(&Broadcast::new(curator.clone(), "one".to_string()))
            .await
            .unwrap();

        let err = store
            .insert_broadcast(&Broadcast::new(curator.clone(), "two".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyLive));
    }

    #[tokio::test]
    async fn test_end_broadcast_cas() {
        let store = MemoryStore::new();
        let broadcast = Broadcast::new(UserId::new(), "cas".to_string());
        store.insert_broadcast(&broadcast).await.unwrap();

        assert!(store.end_broadcast(&broadcast.id, Utc::now()).await.unwrap());
        // Second caller loses the race
        assert!(!store.end_broadcast(&broadcast.id, Utc::now()).await.unwrap());

        let stored = store.get_broadcast(&broadcast.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BroadcastStatus::Ended);
        assert!(stored.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_never_moves_backward() {
        let store = MemoryStore::new();
        let broadcast = Broadcast::new(UserId::new(), "hb".to_string());
        store.insert_broadcast(&broadcast).await.unwrap();

        let ahead = broadcast.last_heartbeat_at + Duration::seconds(60);
        assert!(store.touch_heartbeat(&broadcast.id, ahead).await.unwrap());

        let behind = broadcast.last_heartbeat_at - Duration::seconds(60);
        assert!(store.touch_heartbeat(&broadcast.id, behind).await.unwrap());

        let stored = store.get_broadcast(&broadcast.id).await.unwrap().unwrap();
        assert_eq!(stored.last_heartbeat_at, ahead);
    }

    #[tokio::test]
    async fn test_heartbeat_on_ended_broadcast_is_rejected() {
        let store = MemoryStore::new();
        let broadcast = Broadcast::new(UserId::new(), "hb".to_string());
        store.insert_broadcast(&broadcast).await.unwrap();
        store.end_broadcast(&broadcast.id, Utc::now()).await.unwrap();

        assert!(!store.touch_heartbeat(&broadcast.id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_listener_upsert_idempotent() {
        let store = MemoryStore::new();
        let broadcast_id = BroadcastId::new();
        let user = UserId::new();

        assert!(store.upsert_listener(&broadcast_id, &user).await.unwrap());
        assert!(!store.upsert_listener(&broadcast_id, &user).await.unwrap());
        assert_eq!(store.count_listeners(&broadcast_id).await.unwrap(), 1);

        assert!(store.remove_listener(&broadcast_id, &user).await.unwrap());
        assert!(!store.remove_listener(&broadcast_id, &user).await.unwrap());
    }

    #[tokio::test]
    async fn test_message_ordering_with_id_tiebreak() {
        let store = MemoryStore::new();
        let broadcast_id = BroadcastId::new();
        let author = UserId::new();
        let at = Utc::now();

        // Same created_at, ids force the order
        for id in ["bbbbbbbbbbbb", "aaaaaaaaaaaa", "cccccccccccc"] {
            let mut msg = ChatMessage::new(
                broadcast_id.clone(),
                author.clone(),
                MessageKind::Text,
                format!("msg {id}"),
            );
            msg.id = MessageId::from_string(id.to_string());
            msg.created_at = at;
            store.insert_message(&msg).await.unwrap();
        }

        let messages = store.list_messages(&broadcast_id, 10).await.unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["aaaaaaaaaaaa", "bbbbbbbbbbbb", "cccccccccccc"]);
    }

    #[tokio::test]
    async fn test_list_messages_keeps_newest() {
        let store = MemoryStore::new();
        let broadcast_id = BroadcastId::new();
        let author = UserId::new();
        let base = Utc::now();

        for i in 0..5 {
            let mut msg = ChatMessage::new(
                broadcast_id.clone(),
                author.clone(),
                MessageKind::Text,
                format!("msg {i}"),
            );
            msg.created_at = base + Duration::seconds(i);
            store.insert_message(&msg).await.unwrap();
        }

        let messages = store.list_messages(&broadcast_id, 2).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "msg 3");
        assert_eq!(messages[1].content, "msg 4");
    }

    #[tokio::test]
    async fn test_prune_messages() {
        let store = MemoryStore::new();
        let b1 = BroadcastId::new();
        let b2 = BroadcastId::new();
        let author = UserId::new();
        let base = Utc::now();

        for i in 0..6 {
            let mut msg = ChatMessage::new(b1.clone(), author.clone(), MessageKind::Text, format!("a{i}"));
            msg.created_at = base + Duration::seconds(i);
            store.insert_message(&msg).await.unwrap();
        }
        for i in 0..2 {
            let mut msg = ChatMessage::new(b2.clone(), author.clone(), MessageKind::Text, format!("b{i}"));
            msg.created_at = base + Duration::seconds(i);
            store.insert_message(&msg).await.unwrap();
        }

        let removed = store.prune_messages(3).await.unwrap();
        assert_eq!(removed, 3);

        let kept = store.list_messages(&b1, 10).await.unwrap();
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].content, "a3");
        // Broadcast under the keep threshold is untouched
        assert_eq!(store.list_messages(&b2, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_second_degree_excludes_direct_and_self() {
        let store = MemoryStore::new();
        let viewer = UserId::new();
        let friend = UserId::new();
        let direct = UserId::new();
        let second = UserId::new();

        store.insert_follow(&viewer, &friend).await.unwrap();
        store.insert_follow(&viewer, &direct).await.unwrap();
        store.insert_follow(&friend, &second).await.unwrap();
        store.insert_follow(&friend, &direct).await.unwrap();
        store.insert_follow(&friend, &viewer).await.unwrap();

        let result = store.second_degree_curators(&viewer).await.unwrap();
        assert_eq!(result, vec![second.clone()].into_iter().collect::<Vec<_>>());
    }
}
