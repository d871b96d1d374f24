//! In-memory session store implementation.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::traits::{Session, SessionFilter, SessionKey, SessionStore, TranscriptEntry};

/// Session store backed by mutex-protected hash maps. Lost on restart.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionKey, Session>>,
    transcripts: Mutex<HashMap<SessionKey, Vec<TranscriptEntry>>>,
    /// Entries kept per transcript; older ones are dropped on append.
    max_transcript_entries: Option<usize>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            transcripts: Mutex::new(HashMap::new()),
            max_transcript_entries: None,
        }
    }

    /// Store that keeps only the newest `max_entries` transcript entries per session.
    pub fn with_transcript_cap(max_entries: usize) -> Self {
        Self {
            max_transcript_entries: Some(max_entries),
            ..Self::new()
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, key: &SessionKey) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            key: key.clone(),
            created_at: now,
            last_activity: now,
            model: None,
            turns: 0,
        };

        self.sessions.lock().insert(key.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>> {
        Ok(self.sessions.lock().get(key).cloned())
    }

    async fn update_activity(&self, key: &SessionKey, model: Option<&str>) -> Result<()> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(key) {
            Some(session) => {
                session.last_activity = Utc::now();
                session.turns = session.turns.saturating_add(1);
                if let Some(model) = model {
                    session.model = Some(model.to_string());
                }
                Ok(())
            }
            None => bail!("session not found: {}:{}", key.agent_id, key.context),
        }
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let sessions = self.sessions.lock();
        let mut results: Vec<Session> = sessions
            .values()
            .filter(|s| {
                filter
                    .agent_id
                    .as_ref()
                    .map_or(true, |agent_id| s.key.agent_id == *agent_id)
                    && filter
                        .context
                        .as_ref()
                        .map_or(true, |context| s.key.context == *context)
                    && filter.since.map_or(true, |since| s.last_activity >= since)
            })
            .cloned()
            .collect();
        drop(sessions);

        results.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }

        Ok(results)
    }

    async fn delete(&self, key: &SessionKey) -> Result<()> {
        self.sessions.lock().remove(key);
        self.transcripts.lock().remove(key);
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<usize> {
        let removed = {
            let mut sessions = self.sessions.lock();
            let before = sessions.len();
            sessions.retain(|key, _| key.context != thread_id);
            before - sessions.len()
        };
        self.transcripts
            .lock()
            .retain(|key, _| key.context != thread_id);
        Ok(removed)
    }

    async fn append_transcript(&self, key: &SessionKey, entry: TranscriptEntry) -> Result<()> {
        let mut transcripts = self.transcripts.lock();
        let entries = transcripts.entry(key.clone()).or_default();
        entries.push(entry);
        if let Some(max) = self.max_transcript_entries {
            let excess = entries.len().saturating_sub(max);
            entries.drain(..excess);
        }
        Ok(())
    }

    async fn get_transcript(
        &self,
        key: &SessionKey,
        limit: Option<usize>,
    ) -> Result<Vec<TranscriptEntry>> {
        let transcripts = self.transcripts.lock();
        let Some(entries) = transcripts.get(key) else {
            return Ok(Vec::new());
        };

        let start = limit.map_or(0, |n| entries.len().saturating_sub(n));
        Ok(entries[start..].to_vec())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SessionKey {
        SessionKey::new("weather", "thread-1")
    }

    #[tokio::test]
    async fn create_and_get_session() {
        let store = InMemorySessionStore::new();
        let key = test_key();

        let created = store.create(&key).await.unwrap();
        assert_eq!(created.key.agent_id, "weather");
        assert_eq!(created.turns, 0);

        let fetched = store.get(&key).await.unwrap();
        assert_eq!(fetched.unwrap().key.context, "thread-1");
    }

    #[tokio::test]
    async fn get_returns_none_for_missing_session() {
        let store = InMemorySessionStore::new();
        assert!(store.get(&test_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_activity_counts_turns_and_records_model() {
        let store = InMemorySessionStore::new();
        let key = test_key();
        let created = store.create(&key).await.unwrap();

        store.update_activity(&key, Some("gpt-4o-mini")).await.unwrap();
        store.update_activity(&key, None).await.unwrap();

        let updated = store.get(&key).await.unwrap().unwrap();
        assert!(updated.last_activity >= created.last_activity);
        assert_eq!(updated.turns, 2);
        assert_eq!(updated.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn update_activity_fails_for_missing_session() {
        let store = InMemorySessionStore::new();
        assert!(store.update_activity(&test_key(), None).await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_session_and_transcript() {
        let store = InMemorySessionStore::new();
        let key = test_key();
        store.create(&key).await.unwrap();
        store
            .append_transcript(&key, TranscriptEntry::user("hello"))
            .await
            .unwrap();

        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(store.get_transcript(&key, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_thread_only_touches_that_thread() {
        let store = InMemorySessionStore::new();
        let weather = SessionKey::new("weather", "t1");
        let news = SessionKey::new("news", "t1");
        let other = SessionKey::new("weather", "t2");
        for key in [&weather, &news, &other] {
            store.create(key).await.unwrap();
            store
                .append_transcript(key, TranscriptEntry::user("hi"))
                .await
                .unwrap();
        }

        assert_eq!(store.delete_thread("t1").await.unwrap(), 2);
        assert!(store.get(&weather).await.unwrap().is_none());
        assert!(store.get_transcript(&news, None).await.unwrap().is_empty());
        assert!(store.get(&other).await.unwrap().is_some());
        assert_eq!(store.get_transcript(&other, None).await.unwrap().len(), 1);

        assert_eq!(store.delete_thread("t1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_filters_by_agent_and_thread() {
        let store = InMemorySessionStore::new();
        store.create(&SessionKey::new("weather", "t1")).await.unwrap();
        store.create(&SessionKey::new("news", "t1")).await.unwrap();
        store.create(&SessionKey::new("news", "t2")).await.unwrap();

        let filter = SessionFilter {
            agent_id: Some("news".to_string()),
            ..Default::default()
        };
        assert_eq!(store.list(&filter).await.unwrap().len(), 2);

        let thread = store.list(&SessionFilter::thread("t1")).await.unwrap();
        assert_eq!(thread.len(), 2);
        assert!(thread.iter().all(|s| s.key.context == "t1"));

        let limited = SessionFilter {
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(store.list(&limited).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transcript_limit_returns_most_recent_in_order() {
        let store = InMemorySessionStore::new();
        let key = test_key();

        for i in 0..5 {
            store
                .append_transcript(&key, TranscriptEntry::user(format!("message {i}")))
                .await
                .unwrap();
        }

        assert_eq!(store.get_transcript(&key, None).await.unwrap().len(), 5);

        let last_two = store.get_transcript(&key, Some(2)).await.unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].content, "message 3");
        assert_eq!(last_two[1].content, "message 4");

        assert!(store.get_transcript(&key, Some(0)).await.unwrap().is_empty());
        assert_eq!(store.get_transcript(&key, Some(50)).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn transcript_cap_drops_oldest_entries() {
        let store = InMemorySessionStore::with_transcript_cap(3);
        let key = test_key();

        for i in 0..10 {
            store
                .append_transcript(&key, TranscriptEntry::user(format!("message {i}")))
                .await
                .unwrap();
        }

        let entries = store.get_transcript(&key, None).await.unwrap();
        let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["message 7", "message 8", "message 9"]);
    }

    #[tokio::test]
    async fn uncapped_store_keeps_everything() {
        let store = InMemorySessionStore::new();
        let key = test_key();
        for _ in 0..100 {
            store
                .append_transcript(&key, TranscriptEntry::assistant("ok"))
                .await
                .unwrap();
        }
        assert_eq!(store.get_transcript(&key, None).await.unwrap().len(), 100);
    }
}
