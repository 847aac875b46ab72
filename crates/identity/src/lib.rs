//! Identity-store client for the brigade back office.
//!
//! Wraps the hosted auth service: sign up, sign in, sign out, session
//! refresh, and a broadcast stream of session changes that the session
//! resolver subscribes to for the lifetime of the process.

use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::broadcast;

/// Error type
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing session")]
    MissingSession,
}

/// Identity as the auth service reports it. The application-level profile
/// row is a separate table keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Session issued by the identity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub token_type: String,
    pub user: AuthUser,
}

impl Session {
    /// Check if the session has expired.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64;
                now >= expires_at
            }
            None => false,
        }
    }

    fn stamp_expiry(&mut self) {
        if self.expires_at.is_none() {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::from_secs(0))
                .as_secs() as i64;
            self.expires_at = Some(now + self.expires_in);
        }
    }
}

/// Session lifecycle events, published on sign-in, token refresh and
/// sign-out. Subscribers re-resolve their view of "who is logged in" on
/// every event.
#[derive(Debug, Clone)]
pub enum SessionChange {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

/// Identity client
pub struct IdentityClient {
    url: String,
    key: String,
    http_client: Client,
    current_session: Arc<RwLock<Option<Session>>>,
    changes: broadcast::Sender<SessionChange>,
}

impl IdentityClient {
    /// Create a new identity client.
    pub fn new(url: &str, key: &str, http_client: Client) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            url: url.to_string(),
            key: key.to_string(),
            http_client,
            current_session: Arc::new(RwLock::new(None)),
            changes,
        }
    }

    /// Receiver for session lifecycle events. Each call returns an
    /// independent receiver; events published before the call are not
    /// replayed.
    pub fn on_session_change(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    /// Register a new identity. The backing store provisions the matching
    /// profile row via its own trigger the moment the identity exists.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Session, IdentityError> {
        let url = format!("{}/auth/v1/signup", self.url);

        let mut payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        if let Some(data) = metadata {
            payload["data"] = data;
        }

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(IdentityError::ApiError(error_text));
        }

        let mut session: Session = response.json().await?;
        session.stamp_expiry();
        self.store_session(session.clone());
        self.publish(SessionChange::SignedIn(session.clone()));

        Ok(session)
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.url);

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            // Bad credentials surface as-is; callers show the message and
            // never retry silently.
            let error_text = response.text().await?;
            return Err(IdentityError::ApiError(error_text));
        }

        let mut session: Session = response.json().await?;
        session.stamp_expiry();
        self.store_session(session.clone());
        self.publish(SessionChange::SignedIn(session.clone()));

        Ok(session)
    }

    /// Current session, if any.
    pub fn get_session(&self) -> Option<Session> {
        let read_guard = self.current_session.read().unwrap();
        read_guard.clone()
    }

    /// Access token of the current session, if any.
    pub fn access_token(&self) -> Option<String> {
        self.get_session().map(|s| s.access_token)
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh_session(&self) -> Result<Session, IdentityError> {
        let session = self.get_session().ok_or(IdentityError::MissingSession)?;

        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.url);

        let payload = serde_json::json!({
            "refresh_token": session.refresh_token,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(IdentityError::ApiError(error_text));
        }

        let mut new_session: Session = response.json().await?;
        new_session.stamp_expiry();
        self.store_session(new_session.clone());
        self.publish(SessionChange::TokenRefreshed(new_session.clone()));

        Ok(new_session)
    }

    /// Sign out and clear the local session.
    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        let session = self.get_session().ok_or(IdentityError::MissingSession)?;

        let url = format!("{}/auth/v1/logout", self.url);

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(IdentityError::ApiError(error_text));
        }

        {
            let mut write_guard = self.current_session.write().unwrap();
            *write_guard = None;
        }
        self.publish(SessionChange::SignedOut);

        Ok(())
    }

    fn store_session(&self, session: Session) {
        let mut write_guard = self.current_session.write().unwrap();
        *write_guard = Some(session);
    }

    fn publish(&self, change: SessionChange) {
        debug!("publishing session change: {:?}", change_kind(&change));
        if self.changes.send(change).is_err() {
            // No live subscribers yet; the resolver attaches at startup, so
            // this only happens in short-lived tool contexts.
            warn!("session change dropped: no subscribers");
        }
    }
}

fn change_kind(change: &SessionChange) -> &'static str {
    match change {
        SessionChange::SignedIn(_) => "signed_in",
        SessionChange::TokenRefreshed(_) => "token_refreshed",
        SessionChange::SignedOut => "signed_out",
    }
}
