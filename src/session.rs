//! Session provider seam
//!
//! The coordinator reads the current session to build a tenant scope and
//! listens for auth events to keep the cache from leaking across users.

use std::fmt;
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::model::{CompanyId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: UserId,
    pub full_name: Option<String>,
    /// Absent for users who have not joined a company yet
    pub company_id: Option<CompanyId>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub email: Option<String>,
    pub access_token: String,
    pub profile: Profile,
}

impl Session {
    pub fn new(profile: Profile, access_token: impl Into<String>) -> Self {
        Self {
            user_id: profile.id,
            email: None,
            access_token: access_token.into(),
            profile,
        }
    }

    pub fn company_id(&self) -> Option<CompanyId> {
        self.profile.company_id
    }
}

// Keep tokens out of logs
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .field("profile", &self.profile)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(UserId),
    SignedOut,
    TokenRefreshed,
}

pub trait SessionProvider: Send + Sync {
    fn current(&self) -> Option<Session>;
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// In-process session state, driven by whatever performs authentication
#[derive(Debug)]
pub struct SessionHandle {
    state: watch::Sender<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        let (events, _) = broadcast::channel(16);
        Self { state, events }
    }

    pub fn signed_in(session: Session) -> Self {
        let handle = Self::new();
        handle.state.send_replace(Some(session));
        handle
    }

    pub fn sign_in(&self, session: Session) {
        let user_id = session.user_id;
        self.state.send_replace(Some(session));
        info!(user.id = %user_id, "Signed in");
        // No subscribers is fine
        let _ = self.events.send(AuthEvent::SignedIn(user_id));
    }

    pub fn sign_out(&self) {
        if self.state.send_replace(None).is_some() {
            info!("Signed out");
            let _ = self.events.send(AuthEvent::SignedOut);
        }
    }

    pub fn refresh_token(&self, access_token: impl Into<String>) {
        let access_token = access_token.into();
        let refreshed = self.state.send_if_modified(|state| match state {
            Some(session) => {
                session.access_token = access_token;
                true
            }
            None => false,
        });
        if refreshed {
            let _ = self.events.send(AuthEvent::TokenRefreshed);
        }
    }
}

impl SessionProvider for SessionHandle {
    fn current(&self) -> Option<Session> {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
