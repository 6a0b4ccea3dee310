//! Active sessions keyed by call id.

use super::orchestrator::{spawn_session, SessionHandle};
use super::output::OutputSender;
use super::CallServices;
use callrelay_types::AudioProfile;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Entry {
    handle: SessionHandle,
    profile: AudioProfile,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub call_id: String,
    pub session_id: Uuid,
    pub profile: AudioProfile,
    pub started_at: DateTime<Utc>,
}

/// Tracks one session per call id. A session removes its own entry when it
/// tears down; a stale removal (from a session that was already replaced) is
/// ignored.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Entry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns and registers a session. An existing session for the same call
    /// id is stopped and replaced.
    pub async fn open(
        &self,
        call_id: &str,
        profile: AudioProfile,
        services: Arc<CallServices>,
        output: Arc<OutputSender>,
    ) -> SessionHandle {
        let registry = self.clone();
        let release_id = call_id.to_string();
        // Held across the spawn so the session's own release cannot run
        // before its entry exists.
        let mut sessions = self.sessions.write().await;
        let handle = spawn_session(
            call_id,
            profile,
            services,
            output,
            Some(Box::new(move |session_id: Uuid| {
                async move { registry.release(&release_id, session_id).await }.boxed()
            })),
        );

        let previous = sessions.insert(
            call_id.to_string(),
            Entry {
                handle: handle.clone(),
                profile,
                started_at: Utc::now(),
            },
        );
        drop(sessions);
        if let Some(previous) = previous {
            tracing::info!(call_id = %call_id, "replaced existing session for call");
            previous.handle.stop();
        }
        handle
    }

    /// Removes the entry for `call_id` if it still belongs to `session_id`.
    pub async fn release(&self, call_id: &str, session_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        match sessions.get(call_id) {
            Some(entry) if entry.handle.session_id() == session_id => {
                sessions.remove(call_id);
            }
            _ => {} // stale or already removed
        }
    }

    pub async fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(call_id)
            .map(|entry| entry.handle.clone())
    }

    /// Active sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(call_id, entry)| SessionSummary {
                call_id: call_id.clone(),
                session_id: entry.handle.session_id(),
                profile: entry.profile,
                started_at: entry.started_at,
            })
            .collect();
        out.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.call_id.cmp(&b.call_id))
        });
        out
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Asks every session to tear down. Used on server shutdown.
    pub async fn stop_all(&self) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .read()
            .await
            .values()
            .map(|entry| entry.handle.clone())
            .collect();
        if !handles.is_empty() {
            tracing::info!(count = handles.len(), "stopping active sessions");
        }
        for handle in handles {
            handle.stop();
        }
    }
}
