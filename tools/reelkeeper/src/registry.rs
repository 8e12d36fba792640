use crate::errors::ReelError;
use crate::identity::TestIdentity;
use crate::types::{VideoSession, UNKNOWN_NODE_HOST};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// What the caller knows when a browser session begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStart {
    pub remote_session_id: Option<String>,
    pub node_host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub session: VideoSession,
    /// A previous session under the same key, presumed abandoned.
    pub replaced: Option<VideoSession>,
}

/// In-flight sessions for one run, keyed by normalized test identity.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<TestIdentity, VideoSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        identity: &str,
        start: SessionStart,
        start_time: SystemTime,
    ) -> Result<Registration, ReelError> {
        let test_identity = TestIdentity::parse(identity)?;
        let session = VideoSession {
            test_identity: test_identity.clone(),
            remote_session_id: start
                .remote_session_id
                .map(|id| id.trim().to_string())
                .unwrap_or_default(),
            start_time,
            node_host: start
                .node_host
                .map(|host| host.trim().to_string())
                .filter(|host| !host.is_empty())
                .unwrap_or_else(|| UNKNOWN_NODE_HOST.to_string()),
        };
        let replaced = self.lock().insert(test_identity, session.clone());
        Ok(Registration { session, replaced })
    }

    pub fn get(&self, identity: &TestIdentity) -> Option<VideoSession> {
        self.lock().get(identity).cloned()
    }

    /// Idempotent; returns the session only on the call that removed it.
    pub fn remove(&self, identity: &TestIdentity) -> Option<VideoSession> {
        self.lock().remove(identity)
    }

    /// Removes `session` only if it is still the registered entry for its
    /// identity, so a re-registration during correlation survives.
    pub fn release(&self, session: &VideoSession) -> bool {
        let mut sessions = self.lock();
        if sessions.get(&session.test_identity) != Some(session) {
            return false;
        }
        sessions.remove(&session.test_identity).is_some()
    }

    /// Point-in-time copy ordered by identity.
    pub fn snapshot(&self) -> Vec<VideoSession> {
        let mut sessions = self.lock().values().cloned().collect::<Vec<_>>();
        sessions.sort_by(|a, b| a.test_identity.cmp(&b.test_identity));
        sessions
    }

    /// identity -> remote session id, for debugging surfaces.
    pub fn active_sessions(&self) -> BTreeMap<String, String> {
        self.lock()
            .iter()
            .map(|(identity, session)| {
                (identity.to_string(), session.remote_session_id.clone())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TestIdentity, VideoSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
