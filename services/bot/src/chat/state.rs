//! services/bot/src/chat/state.rs
//!
//! Defines the application's shared state and the registry of live conversations.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::adapters::staging::Staging;
use pdfbot_core::domain::{ChatId, Session};
use pdfbot_core::ports::{ChatTransport, ConversionService};
use pdfbot_core::validation::Limits;

//=========================================================================================
// AppState (Shared Across All Chats)
//=========================================================================================

/// The shared application state, created once at startup and passed to the engine.
#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<dyn ChatTransport>,
    pub gateway: Arc<dyn ConversionService>,
    pub staging: Staging,
    pub limits: Limits,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        gateway: Arc<dyn ConversionService>,
        staging: Staging,
        limits: Limits,
    ) -> Self {
        Self {
            transport,
            gateway,
            staging,
            limits,
            sessions: Arc::new(SessionRegistry::default()),
        }
    }
}

//=========================================================================================
// SessionRegistry (One Session per Chat)
//=========================================================================================

/// Live sessions keyed by chat. The lock is only held while a transition is computed.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<ChatId, Session>>,
}

impl SessionRegistry {
    pub async fn lock(&self) -> MutexGuard<'_, HashMap<ChatId, Session>> {
        self.inner.lock().await
    }

    /// Removes the chat's session, but only if it is still the session `id`.
    /// A newer session that replaced it stays untouched.
    pub async fn remove_if(&self, chat_id: ChatId, id: Uuid) -> Option<Session> {
        let mut sessions = self.inner.lock().await;
        match sessions.get(&chat_id) {
            Some(session) if session.id == id => sessions.remove(&chat_id),
            _ => None,
        }
    }

    /// A snapshot of the chat's session.
    pub async fn get(&self, chat_id: ChatId) -> Option<Session> {
        self.inner.lock().await.get(&chat_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
