//! Conversation sessions and the keyed store that holds them.

use crate::ConversationItem;
use crate::error::SessionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A named conversation that outlives a single run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<ConversationItem>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Mark the session as modified now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// The canonical JSON record of this session.
    pub fn to_record(&self) -> Result<Value, SessionError> {
        serde_json::to_value(self).map_err(|e| SessionError::Serialization(e.to_string()))
    }

    /// Rebuild a session from its record. Message order is preserved.
    pub fn from_record(record: &Value) -> Result<Self, SessionError> {
        Self::deserialize(record).map_err(|e| SessionError::InvalidRecord(e.to_string()))
    }
}

/// A keyed session store.
///
/// Implementations are the synchronization boundary: runners on different
/// tasks may call any method concurrently without external locking.
pub trait SessionStore: Send + Sync {
    /// Insert or replace the session with `session.id`.
    fn store(&self, session: Session) -> Result<(), SessionError>;

    fn retrieve(&self, id: &str) -> Result<Option<Session>, SessionError>;

    /// Remove a session, returning it if it existed.
    fn delete(&self, id: &str) -> Result<Option<Session>, SessionError>;

    fn exists(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.retrieve(id)?.is_some())
    }

    /// Stored session ids, sorted.
    fn list(&self) -> Result<Vec<String>, SessionError>;

    fn clear(&self) -> Result<(), SessionError>;
}

/// Process-local [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionStore for MemorySessionStore {
    fn store(&self, session: Session) -> Result<(), SessionError> {
        self.write().insert(session.id.clone(), session);
        Ok(())
    }

    fn retrieve(&self, id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.read().get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.write().remove(id))
    }

    fn exists(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.read().contains_key(id))
    }

    fn list(&self) -> Result<Vec<String>, SessionError> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn clear(&self) -> Result<(), SessionError> {
        self.write().clear();
        Ok(())
    }
}
