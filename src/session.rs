#![forbid(unsafe_code)]

//! Long-lived application state: the authentication snapshot and the
//! scroll-mode preference. Built once at bootstrap and handed to whoever
//! needs it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::{AppEvent, EventBus};
use crate::query::QueryParams;
use crate::return_url::return_url_from_query;
use crate::storage::{LOCAL_ROOT_KEY, NamespacedStorage, StorageBackend};

const AUTH_FIELD: &str = "auth";
const SCROLL_MODE_FIELD: &str = "scroll_mode";

/// Whether reaching the end of a list loads more automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollMode {
    #[default]
    Auto,
    Manual,
}

impl ScrollMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "automatic" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: u64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl AuthSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Local-storage backed store for state that outlives a single list view.
pub struct AppStore {
    storage: NamespacedStorage,
    events: EventBus,
}

impl AppStore {
    pub fn new(backend: Arc<dyn StorageBackend>, events: EventBus) -> Self {
        Self {
            storage: NamespacedStorage::new(backend, LOCAL_ROOT_KEY),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn auth(&self) -> AuthSnapshot {
        self.storage.get_item(AUTH_FIELD).unwrap_or_default()
    }

    pub fn access_token(&self) -> Option<String> {
        self.auth().access_token
    }

    /// Records a successful login and returns the sanitized redirect target
    /// taken from the login page query.
    pub fn complete_login(&self, snapshot: AuthSnapshot, login_query: &QueryParams) -> String {
        tracing::info!(
            user = snapshot.user.as_ref().map(|user| user.username.as_str()),
            "login completed"
        );
        self.storage.set_item(AUTH_FIELD, &snapshot);
        return_url_from_query(login_query)
    }

    pub fn logout(&self) {
        self.storage.remove_item(AUTH_FIELD);
    }

    /// Drops the stored credentials and tells the shell to prompt for a new
    /// login.
    pub fn expire_session(&self) {
        self.logout();
        self.events.publish(AppEvent::AuthRequired);
    }

    pub fn scroll_mode(&self) -> ScrollMode {
        self.storage
            .get_item(SCROLL_MODE_FIELD)
            .unwrap_or_default()
    }

    pub fn set_scroll_mode(&self, mode: ScrollMode) {
        self.storage.set_item(SCROLL_MODE_FIELD, &mode);
    }
}
