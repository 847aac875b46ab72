//! Session resolution scenarios: sign-in, sign-out, role changes and
//! fail-closed behavior on lookup trouble.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use brigade::access::can_access;
use brigade::models::{Profile, Role};
use brigade::session::{ProfileSource, SessionResolver};
use brigade::{Backoffice, Error, IdentityClient};

fn profile(id: &str, role: Role) -> Profile {
    Profile {
        id: id.to_string(),
        email: "staff@example.com".to_string(),
        display_name: Some("Staff".to_string()),
        role,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

/// Profile source with switchable behavior: a role, no row at all, or a
/// hard failure.
#[derive(Default)]
struct MockProfiles {
    lookups: AtomicUsize,
    role: Mutex<Option<Role>>,
    fail: AtomicBool,
}

impl MockProfiles {
    fn with_role(role: Role) -> Arc<Self> {
        let profiles = Self::default();
        *profiles.role.lock().unwrap() = Some(role);
        Arc::new(profiles)
    }

    fn set_role(&self, role: Option<Role>) {
        *self.role.lock().unwrap() = role;
    }
}

#[async_trait]
impl ProfileSource for MockProfiles {
    async fn profile_for(
        &self,
        identity_id: &str,
        _access_token: &str,
    ) -> Result<Option<Profile>, Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::validation("profiles table unreachable"));
        }
        Ok(self.role.lock().unwrap().map(|role| profile(identity_id, role)))
    }
}

async fn identity_with_sign_in(server: &MockServer) -> Arc<IdentityClient> {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "jwt-token",
            "refresh_token": "refresh-token",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": {
                "id": "user-1",
                "email": "staff@example.com",
                "user_metadata": {},
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            }
        })))
        .mount(server)
        .await;

    Arc::new(IdentityClient::new(&server.uri(), "anon_key", Client::new()))
}

#[tokio::test]
async fn facade_hands_out_one_shared_resolver() {
    let office = Backoffice::new("http://localhost:54321", "anon_key");

    let first = office.session_resolver();
    let second = office.session_resolver();
    assert!(Arc::ptr_eq(&first, &second));

    // A publication through one handle is visible through the other's
    // subscription: one slot, one writer.
    let mut watched = second.watch();
    first.resolve().await;
    watched.changed().await.unwrap();
    assert!(watched.borrow().is_none());
}

#[tokio::test]
async fn no_session_resolves_unauthenticated() {
    let server = MockServer::start().await;
    let identity = identity_with_sign_in(&server).await;
    let profiles = MockProfiles::with_role(Role::Admin);

    let resolver = SessionResolver::new(identity, profiles.clone());
    assert!(resolver.resolve().await.is_none());
    // Without a session there is nothing to look up.
    assert_eq!(profiles.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sign_in_event_resolves_the_profile() {
    let server = MockServer::start().await;
    let identity = identity_with_sign_in(&server).await;
    let profiles = MockProfiles::with_role(Role::Admin);

    let resolver = SessionResolver::new(identity.clone(), profiles.clone());
    resolver.start();
    let mut watched = resolver.watch();

    identity
        .sign_in_with_password("staff@example.com", "secret")
        .await
        .unwrap();

    watched.changed().await.unwrap();
    let resolved = watched.borrow().clone();
    assert_eq!(resolved.as_ref().map(|p| p.role), Some(Role::Admin));
    assert!(can_access(resolved.as_ref(), Role::Admin));
}

#[tokio::test]
async fn duplicate_start_does_not_stack_listeners() {
    let server = MockServer::start().await;
    let identity = identity_with_sign_in(&server).await;
    let profiles = MockProfiles::with_role(Role::Admin);

    let resolver = SessionResolver::new(identity.clone(), profiles.clone());
    resolver.start();
    resolver.start();
    resolver.start();
    let mut watched = resolver.watch();

    identity
        .sign_in_with_password("staff@example.com", "secret")
        .await
        .unwrap();
    watched.changed().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(profiles.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_profile_row_fails_closed() {
    let server = MockServer::start().await;
    let identity = identity_with_sign_in(&server).await;
    let profiles = Arc::new(MockProfiles::default());

    identity
        .sign_in_with_password("staff@example.com", "secret")
        .await
        .unwrap();

    let resolver = SessionResolver::new(identity, profiles);
    let resolved = resolver.resolve().await;

    assert!(resolved.is_none());
    assert!(!can_access(resolved.as_ref(), Role::Customer));
}

#[tokio::test]
async fn lookup_failure_fails_closed() {
    let server = MockServer::start().await;
    let identity = identity_with_sign_in(&server).await;
    let profiles = MockProfiles::with_role(Role::Superadmin);
    profiles.fail.store(true, Ordering::SeqCst);

    identity
        .sign_in_with_password("staff@example.com", "secret")
        .await
        .unwrap();

    let resolver = SessionResolver::new(identity, profiles.clone());
    assert!(resolver.resolve().await.is_none());
    assert!(resolver.current().is_none());

    // Once the lookup recovers the same session resolves again.
    profiles.fail.store(false, Ordering::SeqCst);
    let resolved = resolver.resolve().await;
    assert_eq!(resolved.map(|p| p.role), Some(Role::Superadmin));
}

#[tokio::test]
async fn role_downgrade_shows_up_on_refresh() {
    let server = MockServer::start().await;
    let identity = identity_with_sign_in(&server).await;
    let profiles = MockProfiles::with_role(Role::Admin);

    identity
        .sign_in_with_password("staff@example.com", "secret")
        .await
        .unwrap();

    let resolver = SessionResolver::new(identity, profiles.clone());
    let before = resolver.resolve().await;
    assert!(can_access(before.as_ref(), Role::Admin));

    profiles.set_role(Some(Role::Customer));
    let after = resolver.resolve().await;
    assert!(!can_access(after.as_ref(), Role::Admin));
    assert!(can_access(after.as_ref(), Role::Customer));
}

#[tokio::test]
async fn sign_out_event_clears_the_profile() {
    let server = MockServer::start().await;
    let identity = identity_with_sign_in(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    let profiles = MockProfiles::with_role(Role::Admin);

    let resolver = SessionResolver::new(identity.clone(), profiles);
    resolver.start();
    let mut watched = resolver.watch();

    identity
        .sign_in_with_password("staff@example.com", "secret")
        .await
        .unwrap();
    watched.changed().await.unwrap();
    assert!(watched.borrow().is_some());

    identity.sign_out().await.unwrap();
    watched.changed().await.unwrap();
    assert!(watched.borrow().is_none());
}
