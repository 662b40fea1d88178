//! Session Management
//!
//! The [`SessionManager`] runs the login handshake on connections whose
//! physical session is new, and again when the server reports an expired
//! session.
//!
//! # Single Flight
//!
//! At most one handshake is in progress per client. Callers that need a login
//! while one is running wait for it and observe the same outcome instead of
//! starting their own. Because pooled connections each need their own
//! handshake, a caller that waited on a handshake for another connection
//! starts its own afterwards.
//!
//! The handshake runs as its own task, so it completes (and releases the
//! connection) even when every caller waiting on it was cancelled.
//! [`SessionManager::reset`] aborts it.
//!
//! # Login Strategy
//!
//! What goes on the wire is decided by a [`LoginStrategy`]. The default
//! [`PasswordLogin`] sends the identity with a SHA-256 hash of the secret and
//! accepts an optional sealed session key in the response.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use remoting_common::auth::{hash_secret, open_session_key};
use remoting_common::{Credentials, RemotingError, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::cluster::SessionHook;
use crate::connection::Connection;
use crate::exchange::Exchange;

/// Login lifecycle of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    LoggedOut,
    LoggingIn,
    LoggedIn,
}

/// Builds login arguments and interprets the login response.
pub trait LoginStrategy: Send + Sync {
    fn build_args(&self, credentials: Option<&Credentials>) -> Result<Value>;

    /// Extracts the session key, if the response carries one.
    fn on_response(&self, credentials: Option<&Credentials>, response: &Value) -> Result<Option<Vec<u8>>>;
}

/// Identity plus hashed secret.
///
/// Request: `{"user": identity, "password": hex(sha256(secret))}`.
/// Response: any object; a string field `key` holds the session key sealed
/// with the secret.
#[derive(Debug, Default, Clone, Copy)]
pub struct PasswordLogin;

impl LoginStrategy for PasswordLogin {
    fn build_args(&self, credentials: Option<&Credentials>) -> Result<Value> {
        let credentials = credentials.ok_or_else(|| {
            RemotingError::Configuration("Login requires credentials".to_string())
        })?;
        credentials.validate()?;

        Ok(json!({
            "user": credentials.identity,
            "password": hash_secret(&credentials.secret),
        }))
    }

    fn on_response(&self, credentials: Option<&Credentials>, response: &Value) -> Result<Option<Vec<u8>>> {
        let Some(sealed) = response.get("key").and_then(Value::as_str) else {
            return Ok(None);
        };
        let credentials = credentials.ok_or_else(|| {
            RemotingError::Configuration("Login requires credentials".to_string())
        })?;
        open_session_key(&credentials.secret, sealed).map(Some)
    }
}

/// Result of one completed handshake.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Connection the handshake ran on
    pub connection: u64,
    /// Physical session it authenticated
    pub session: u64,
    pub response: Value,
}

type FlightFuture = Shared<BoxFuture<'static, Result<LoginOutcome>>>;

struct Flight {
    id: u64,
    future: FlightFuture,
    task: AbortHandle,
}

struct SessionShared {
    exchange: Exchange,
    strategy: Arc<dyn LoginStrategy>,
    credentials: Option<Credentials>,
    login_action: String,
    enabled: bool,
    state: RwLock<LoginState>,
    key: RwLock<Option<Vec<u8>>>,
    response: RwLock<Option<Value>>,
    epoch: AtomicU64,
    flight_ids: AtomicU64,
    flight: Mutex<Option<Flight>>,
}

/// Login state machine of one client.
pub struct SessionManager {
    shared: Arc<SessionShared>,
}

impl SessionManager {
    /// Creates a manager. Login is enabled when `credentials` are given or a
    /// custom `strategy` is supplied.
    pub(crate) fn new(
        exchange: Exchange,
        login_action: impl Into<String>,
        credentials: Option<Credentials>,
        strategy: Option<Arc<dyn LoginStrategy>>,
    ) -> Self {
        let enabled = credentials.is_some() || strategy.is_some();
        let strategy = strategy.unwrap_or_else(|| Arc::new(PasswordLogin));

        Self {
            shared: Arc::new(SessionShared {
                exchange,
                strategy,
                credentials,
                login_action: login_action.into(),
                enabled,
                state: RwLock::new(LoginState::LoggedOut),
                key: RwLock::new(None),
                response: RwLock::new(None),
                epoch: AtomicU64::new(0),
                flight_ids: AtomicU64::new(0),
                flight: Mutex::new(None),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled
    }

    pub fn state(&self) -> LoginState {
        *self.shared.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session key of the latest successful login.
    pub fn session_key(&self) -> Option<Vec<u8>> {
        self.shared.key.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Response value of the latest successful login.
    pub fn last_response(&self) -> Option<Value> {
        self.shared.response.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Logs in on `conn`, joining a handshake already in progress.
    pub async fn login(&self, conn: &Arc<Connection>) -> Result<LoginOutcome> {
        if !self.is_enabled() {
            return Err(RemotingError::Configuration("Login is not configured".to_string()));
        }
        self.join_or_start(conn).await
    }

    /// Makes sure `session` on `conn` has completed login.
    pub async fn ensure(&self, conn: &Arc<Connection>, session: u64) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        // Each round either returns or waits for a handshake to finish
        while conn.logged_in_session() < session {
            self.join_or_start(conn).await?;
        }
        Ok(())
    }

    /// Logs in again after the server reported an expired session.
    ///
    /// `observed_logins` is the connection's login count seen before the
    /// failing request; if it moved since, someone else already renewed the
    /// session and nothing is sent.
    pub async fn relogin(&self, conn: &Arc<Connection>, observed_logins: u64) -> Result<()> {
        while conn.login_count() == observed_logins {
            self.join_or_start(conn).await?;
        }
        Ok(())
    }

    /// Aborts any unfinished handshake and forgets key and response.
    pub fn reset(&self) {
        let flight = self.shared.flight.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(flight) = flight {
            debug!(flight = flight.id, "Aborting login in progress");
            flight.task.abort();
        }
        self.shared.set_key(None);
        *self.shared.response.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.shared.set_state(LoginState::LoggedOut);
    }

    async fn join_or_start(&self, conn: &Arc<Connection>) -> Result<LoginOutcome> {
        let future = {
            let mut slot = self.shared.flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(flight) => {
                    debug!(flight = flight.id, connection = conn.id(), "Joining login in progress");
                    flight.future.clone()
                }
                None => {
                    let id = self.shared.flight_ids.fetch_add(1, Ordering::Relaxed) + 1;
                    let task = tokio::spawn(SessionShared::fly(
                        Arc::clone(&self.shared),
                        Arc::clone(conn),
                        id,
                    ));
                    let abort = task.abort_handle();
                    let future = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(RemotingError::Authentication(format!("Login interrupted: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(Flight {
                        id,
                        future: future.clone(),
                        task: abort,
                    });
                    future
                }
            }
        };

        future.await
    }
}

#[async_trait]
impl SessionHook for SessionManager {
    async fn on_new_session(&self, conn: &Arc<Connection>, session: u64) -> Result<()> {
        self.ensure(conn, session).await
    }
}

impl SessionShared {
    fn set_state(&self, state: LoginState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn set_key(&self, key: Option<Vec<u8>>) {
        self.exchange.encoder().set_key(key.as_deref());
        *self.key.write().unwrap_or_else(PoisonError::into_inner) = key;
    }

    /// Body of the handshake task; empties the flight slot when done.
    async fn fly(self: Arc<Self>, conn: Arc<Connection>, id: u64) -> Result<LoginOutcome> {
        let outcome = self.handshake(&conn).await;

        let mut slot = self.flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|flight| flight.id == id) {
            *slot = None;
        }
        outcome
    }

    async fn handshake(&self, conn: &Arc<Connection>) -> Result<LoginOutcome> {
        self.set_state(LoginState::LoggingIn);
        // The handshake itself travels unprotected
        self.set_key(None);

        match self.exchange_login(conn).await {
            Ok((session, response, key)) => {
                let has_key = key.is_some();
                self.set_key(key);
                *self.response.write().unwrap_or_else(PoisonError::into_inner) = Some(response.clone());
                conn.mark_logged_in(session);
                let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
                self.set_state(LoginState::LoggedIn);

                info!(
                    endpoint = conn.endpoint(),
                    connection = conn.id(),
                    session,
                    epoch,
                    has_key,
                    "Logged in"
                );
                Ok(LoginOutcome {
                    connection: conn.id(),
                    session,
                    response,
                })
            }
            Err(e) => {
                self.set_state(LoginState::LoggedOut);
                warn!(endpoint = conn.endpoint(), connection = conn.id(), error = %e, "Login failed");
                Err(match e {
                    RemotingError::Configuration(_) | RemotingError::Authentication(_) => e,
                    other => RemotingError::Authentication(format!(
                        "{} on {} failed: {}",
                        self.login_action,
                        conn.endpoint(),
                        other
                    )),
                })
            }
        }
    }

    async fn exchange_login(&self, conn: &Connection) -> Result<(u64, Value, Option<Vec<u8>>)> {
        let args = self.strategy.build_args(self.credentials.as_ref())?;
        let session = conn.open().await?;
        let response = self.exchange.call(conn, session, &self.login_action, &args).await?;
        let key = self.strategy.on_response(self.credentials.as_ref(), &response)?;
        Ok((session, response, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remoting_common::auth::seal_session_key;

    #[test]
    fn test_password_login_args() {
        let credentials = Credentials::new("alice", "pw");
        let args = PasswordLogin.build_args(Some(&credentials)).unwrap();
        assert_eq!(args["user"], "alice");
        assert_eq!(args["password"], hash_secret("pw"));
        assert_ne!(args["password"], "pw");
    }

    #[test]
    fn test_password_login_requires_identity() {
        let err = PasswordLogin
            .build_args(Some(&Credentials::new("  ", "pw")))
            .unwrap_err();
        assert!(matches!(err, RemotingError::Configuration(_)));

        let err = PasswordLogin.build_args(None).unwrap_err();
        assert!(matches!(err, RemotingError::Configuration(_)));
    }

    #[test]
    fn test_password_login_opens_sealed_key() {
        let credentials = Credentials::new("alice", "pw");
        let sealed = seal_session_key("pw", b"session-key").unwrap();

        let key = PasswordLogin
            .on_response(Some(&credentials), &json!({"token": "t", "key": sealed}))
            .unwrap();
        assert_eq!(key.as_deref(), Some(&b"session-key"[..]));

        let none = PasswordLogin
            .on_response(Some(&credentials), &json!({"token": "t"}))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_password_login_rejects_key_sealed_with_other_secret() {
        let credentials = Credentials::new("alice", "pw");
        let sealed = seal_session_key("other", b"session-key").unwrap();
        assert!(PasswordLogin
            .on_response(Some(&credentials), &json!({"key": sealed}))
            .is_err());
    }

    #[tokio::test]
    async fn test_disabled_without_credentials_or_strategy() {
        let exchange = Exchange::new(Arc::new(remoting_common::JsonEncoder::new()));
        let manager = SessionManager::new(exchange, "Login", None, None);
        assert!(!manager.is_enabled());
        assert_eq!(manager.state(), LoginState::LoggedOut);
        assert!(manager.session_key().is_none());
    }
}
