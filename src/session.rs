use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::api::{ApiError, UserProfile};
use crate::credentials::{Credential, CredentialStore};
use crate::data::AuthService;

pub const ALREADY_EXISTS_DETAIL: &str = "REGISTER_USER_ALREADY_EXISTS";

/// Messages are user-facing; render them with `to_string()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Please log in to continue.")]
    Unauthenticated,
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("This email is already registered.")]
    AlreadyRegistered,
    #[error("Registration failed. Please try again.")]
    RegistrationFailed,
    #[error("Could not save your session: {0}")]
    Storage(String),
}

/// Why the session is sending the user back to the login screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    /// No credential was stored when one was needed.
    LoginRequired,
    /// The server refused the stored credential.
    SessionExpired,
    /// The user asked to sign out.
    SignedOut,
}

/// Where the session goes when it needs the user to sign in again.
pub trait Navigator: Send + Sync {
    fn to_login(&self, reason: Redirect);
}

/// Gates every data operation on the presence of a credential.
pub struct Guard {
    credentials: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
}

impl Guard {
    pub fn new(credentials: Arc<dyn CredentialStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            credentials,
            navigator,
        }
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.get().is_some()
    }

    /// Redirects and aborts when no credential is stored.
    pub fn ensure_authenticated(&self) -> Result<Credential, SessionError> {
        match self.credentials.get() {
            Some(credential) => Ok(credential),
            None => {
                info!("session: no credential, redirecting to login");
                self.navigator.to_login(Redirect::LoginRequired);
                Err(SessionError::Unauthenticated)
            }
        }
    }

    /// The server refused the stored credential mid-session.
    pub fn reject(&self) {
        warn!("session: credential rejected, clearing");
        self.drop_credential();
        self.navigator.to_login(Redirect::SessionExpired);
    }

    pub fn sign_out(&self) {
        info!("session: signing out");
        self.drop_credential();
        self.navigator.to_login(Redirect::SignedOut);
    }

    /// Routes authentication failures to the guard. Returns `true` when the
    /// error was one of them and a redirect happened.
    pub fn absorb(&self, err: &ApiError) -> bool {
        match err {
            ApiError::AuthRejected => {
                self.reject();
                true
            }
            ApiError::Unauthenticated => {
                self.navigator.to_login(Redirect::LoginRequired);
                true
            }
            _ => false,
        }
    }

    fn store(&self, credential: Credential) -> Result<(), SessionError> {
        self.credentials
            .set(credential)
            .map_err(|err| SessionError::Storage(format!("{err:#}")))
    }

    fn drop_credential(&self) {
        if let Err(err) = self.credentials.clear() {
            warn!(error = %format!("{err:#}"), "session: clear credential failed");
        }
    }
}

/// Login, registration and identity on top of the guard.
pub struct Manager {
    auth: Arc<dyn AuthService>,
    guard: Arc<Guard>,
    /// Profile together with the credential it was loaded for.
    identity: RwLock<Option<(Credential, UserProfile)>>,
}

impl Manager {
    pub fn new(auth: Arc<dyn AuthService>, guard: Arc<Guard>) -> Self {
        Self {
            auth,
            guard,
            identity: RwLock::new(None),
        }
    }

    pub fn guard(&self) -> &Arc<Guard> {
        &self.guard
    }

    pub fn login(&self, email: &str, password: &str) -> Result<(), SessionError> {
        let credential = match self.auth.login(email.trim(), password) {
            Ok(credential) => credential,
            Err(err) => {
                warn!(error = %err, "session: login failed");
                return Err(SessionError::InvalidCredentials);
            }
        };
        self.guard.store(credential)?;
        *self.identity.write() = None;
        info!("session: logged in");
        Ok(())
    }

    pub fn register(&self, email: &str, password: &str) -> Result<(), SessionError> {
        self.auth
            .register(email.trim(), password)
            .map_err(|err| {
                warn!(error = %err, "session: registration failed");
                registration_error(&err)
            })
    }

    pub fn logout(&self) {
        *self.identity.write() = None;
        self.guard.sign_out();
    }

    /// Identity of the signed-in user, loaded once per credential. `None`
    /// when signed out or when the lookup fails.
    pub fn current_user(&self) -> Option<UserProfile> {
        let Some(credential) = self.guard.credentials().get() else {
            *self.identity.write() = None;
            return None;
        };
        if let Some((owner, profile)) = self.identity.read().as_ref() {
            if *owner == credential {
                return Some(profile.clone());
            }
        }
        match self.auth.current_user() {
            Ok(profile) => {
                *self.identity.write() = Some((credential, profile.clone()));
                Some(profile)
            }
            Err(err) => {
                warn!(error = %err, "session: identity lookup failed");
                if err.is_auth_rejected() {
                    self.guard.reject();
                }
                None
            }
        }
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.current_user().map(|profile| profile.id)
    }
}

pub fn registration_error(err: &ApiError) -> SessionError {
    if err.detail() == Some(ALREADY_EXISTS_DETAIL) {
        SessionError::AlreadyRegistered
    } else {
        SessionError::RegistrationFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_detail_maps_to_specific_message() {
        let err = ApiError::RequestFailed {
            status: 400,
            detail: Some(ALREADY_EXISTS_DETAIL.into()),
        };
        assert_eq!(
            registration_error(&err).to_string(),
            "This email is already registered."
        );
    }

    #[test]
    fn other_failures_collapse_to_generic_message() {
        let cases = [
            ApiError::RequestFailed {
                status: 400,
                detail: Some("REGISTER_INVALID_PASSWORD".into()),
            },
            ApiError::RequestFailed {
                status: 500,
                detail: None,
            },
            ApiError::AuthRejected,
        ];
        for err in cases {
            assert_eq!(
                registration_error(&err).to_string(),
                "Registration failed. Please try again."
            );
        }
    }
}
