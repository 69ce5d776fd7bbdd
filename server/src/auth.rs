//! Shared-secret handshake that gates every connection
//!
//! A freshly accepted connection is `Pending` until it presents a token.
//! Only `Accepted` connections are allowed into the roster; `Rejected`
//! ones are ignored until the network layer closes them after the grace
//! delay.

use log::{debug, info, warn};
use rand::Rng;
use shared::{AuthCode, TOKEN_ALPHABET, TOKEN_LENGTH};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Pending,
    Accepted,
    Rejected,
}

/// Whether the session can take another participant right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Open,
    InProgress,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Accept,
    Reject { code: AuthCode, reason: String },
}

/// Generates a session token from the unambiguous alphabet.
pub fn generate_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

pub struct TokenAuthenticator {
    token: String,
    grace_delay: Duration,
    connections: HashMap<u32, AuthState>,
}

impl TokenAuthenticator {
    pub fn new(token: impl Into<String>, grace_delay: Duration) -> Self {
        Self {
            token: token.into(),
            grace_delay,
            connections: HashMap::new(),
        }
    }

    pub fn with_random_token(grace_delay: Duration) -> Self {
        Self::new(generate_token(&mut rand::thread_rng()), grace_delay)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// How long a rejected connection stays open so the rejection can flush.
    pub fn grace_delay(&self) -> Duration {
        self.grace_delay
    }

    /// Tracks a new transport connection awaiting its token.
    pub fn register(&mut self, connection_id: u32) {
        self.connections.insert(connection_id, AuthState::Pending);
    }

    pub fn forget(&mut self, connection_id: u32) {
        self.connections.remove(&connection_id);
    }

    pub fn state(&self, connection_id: u32) -> Option<AuthState> {
        self.connections.get(&connection_id).copied()
    }

    pub fn is_accepted(&self, connection_id: u32) -> bool {
        self.state(connection_id) == Some(AuthState::Accepted)
    }

    /// Marks a previously accepted connection as rejected, e.g. after a kick.
    pub fn revoke(&mut self, connection_id: u32) {
        if let Some(state) = self.connections.get_mut(&connection_id) {
            *state = AuthState::Rejected;
        }
    }

    /// Gives up on a connection that never presented a token. Returns `false`
    /// when the connection already finished its handshake.
    pub fn expire(&mut self, connection_id: u32) -> bool {
        match self.connections.get_mut(&connection_id) {
            Some(state) if *state == AuthState::Pending => {
                warn!("Connection {} sent no token in time", connection_id);
                *state = AuthState::Rejected;
                true
            }
            _ => false,
        }
    }

    /// Decides a pending connection's handshake.
    ///
    /// Returns `None` for connections that are unknown or no longer pending,
    /// so a replayed request never produces a second response. The token is
    /// checked before admission so a wrong token is always reported as such.
    pub fn evaluate(
        &mut self,
        connection_id: u32,
        claimed: &str,
        admission: Admission,
    ) -> Option<AuthDecision> {
        match self.state(connection_id) {
            Some(AuthState::Pending) => {}
            Some(state) => {
                debug!(
                    "Ignoring auth request from connection {} in state {:?}",
                    connection_id, state
                );
                return None;
            }
            None => return None,
        }

        let decision = if claimed.trim() != self.token {
            AuthDecision::Reject {
                code: AuthCode::InvalidToken,
                reason: "Invalid token".to_string(),
            }
        } else {
            match admission {
                Admission::Open => AuthDecision::Accept,
                Admission::InProgress => AuthDecision::Reject {
                    code: AuthCode::SessionInProgress,
                    reason: "A race is already in progress".to_string(),
                },
                Admission::Full => AuthDecision::Reject {
                    code: AuthCode::ServerFull,
                    reason: "Server full".to_string(),
                },
            }
        };

        let state = match &decision {
            AuthDecision::Accept => {
                info!("Connection {} authenticated", connection_id);
                AuthState::Accepted
            }
            AuthDecision::Reject { code, .. } => {
                warn!("Connection {} rejected: {:?}", connection_id, code);
                AuthState::Rejected
            }
        };
        self.connections.insert(connection_id, state);

        Some(decision)
    }
}
