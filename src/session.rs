//! Session resolution: identity store session to application profile.
//!
//! The identity store only says *who* is signed in; the `profiles` table
//! says what they may do. The resolver joins the two and publishes the
//! result on a watch channel so screens can re-render on every sign-in,
//! sign-out or token refresh. Any failure along the way resolves to
//! "no profile": access decisions fail closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{broadcast, watch};

use brigade_identity::IdentityClient;

use crate::error::Result;
use crate::models::Profile;

/// Source of profile rows. The production implementation is the
/// `profiles` table gateway; tests substitute their own.
#[async_trait]
pub trait ProfileSource: Send + Sync + 'static {
    /// Fetch the profile row for an identity, using that identity's own
    /// access token so the row policy applies to the right user.
    async fn profile_for(&self, identity_id: &str, access_token: &str)
        -> Result<Option<Profile>>;
}

pub struct SessionResolver {
    identity: Arc<IdentityClient>,
    profiles: Arc<dyn ProfileSource>,
    current: watch::Sender<Option<Profile>>,
    listener_started: AtomicBool,
}

impl SessionResolver {
    pub fn new(identity: Arc<IdentityClient>, profiles: Arc<dyn ProfileSource>) -> Arc<Self> {
        let (current, _) = watch::channel(None);
        Arc::new(Self {
            identity,
            profiles,
            current,
            listener_started: AtomicBool::new(false),
        })
    }

    /// Last resolved profile, if any.
    pub fn current(&self) -> Option<Profile> {
        self.current.borrow().clone()
    }

    /// Subscribe to profile changes. The receiver immediately holds the
    /// current value.
    pub fn watch(&self) -> watch::Receiver<Option<Profile>> {
        self.current.subscribe()
    }

    /// Resolve the current identity session to a profile and publish the
    /// outcome. No session, no profile row, or a lookup failure all
    /// resolve to `None`.
    pub async fn resolve(&self) -> Option<Profile> {
        let resolved = match self.identity.get_session() {
            None => {
                debug!("no identity session, resolving unauthenticated");
                None
            }
            Some(session) => {
                match self
                    .profiles
                    .profile_for(&session.user.id, &session.access_token)
                    .await
                {
                    Ok(Some(profile)) => Some(profile),
                    Ok(None) => {
                        warn!(
                            "identity {} has no profile row, failing closed",
                            session.user.id
                        );
                        None
                    }
                    Err(e) => {
                        warn!("profile lookup failed ({}), failing closed", e);
                        None
                    }
                }
            }
        };

        self.current.send_replace(resolved.clone());
        resolved
    }

    /// Start re-resolving on every identity event (sign-in, sign-out,
    /// token refresh). Idempotent: later calls are no-ops, so remounting
    /// screens never stack up duplicate listeners.
    pub fn start(self: &Arc<Self>) {
        if self.listener_started.swap(true, Ordering::SeqCst) {
            debug!("session listener already running");
            return;
        }

        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            let mut events = resolver.identity.on_session_change();
            loop {
                match events.recv().await {
                    Ok(_) => {
                        debug!("identity event received, re-resolving profile");
                        resolver.resolve().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("missed {} identity events, re-resolving once", missed);
                        resolver.resolve().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
