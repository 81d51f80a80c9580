use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use super::session::ConnectionSession;

pub type SharedSession = Arc<Mutex<ConnectionSession>>;

/// Sessions known to the application and the one currently active. Owned
/// by the caller; sessions never reach into it.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
    active: Arc<RwLock<Option<String>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its label, replacing any previous one.
    pub async fn add(&self, session: ConnectionSession) -> SharedSession {
        let label = session.label().to_string();
        let shared = Arc::new(Mutex::new(session));
        self.sessions
            .write()
            .await
            .insert(label.clone(), shared.clone());
        info!("Registered connection {}", label);
        shared
    }

    pub async fn remove(&self, label: &str) -> Option<SharedSession> {
        let removed = self.sessions.write().await.remove(label);
        if removed.is_some() {
            let mut active = self.active.write().await;
            if active.as_deref() == Some(label) {
                *active = None;
            }
            info!("Removed connection {}", label);
        }
        removed
    }

    pub async fn get(&self, label: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(label).cloned()
    }

    /// Marks a registered session active. Unknown labels are ignored.
    pub async fn set_active(&self, label: &str) -> bool {
        if !self.sessions.read().await.contains_key(label) {
            return false;
        }
        *self.active.write().await = Some(label.to_string());
        true
    }

    pub async fn active_label(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    pub async fn active(&self) -> Option<SharedSession> {
        let label = self.active_label().await?;
        self.get(&label).await
    }

    pub async fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        labels.sort();
        labels
    }

    pub async fn connected_labels(&self) -> Vec<String> {
        let sessions: Vec<(String, SharedSession)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(label, session)| (label.clone(), session.clone()))
            .collect();

        let mut connected = Vec::new();
        for (label, session) in sessions {
            if session.lock().await.is_connected() {
                connected.push(label);
            }
        }
        connected.sort();
        connected
    }
}
