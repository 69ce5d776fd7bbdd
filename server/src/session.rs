//! Session context wiring the authenticator, roster and coordinator together
//!
//! One [`SessionContext`] is constructed per hosted session and handed to the
//! network layer; there is no global state. Every entry point takes a
//! transport event and returns the [`Effect`]s to perform, in order.

use crate::auth::{AuthDecision, AuthState, TokenAuthenticator};
use crate::config::RaceSettings;
use crate::coordinator::{RaceCoordinator, ReadyOutcome, SessionState};
use crate::roster::{Identity, RemovalReason, Roster, RosterEvent};
use log::{debug, info, warn};
use shared::{AuthCode, Packet};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;

/// Work for the network layer
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send to one connection
    Send { player_id: u32, packet: Packet },
    /// Send to every admitted participant at the time the effect is applied
    Broadcast(Packet),
    /// Close the connection once `after` has elapsed
    Close { player_id: u32, after: Duration },
    /// Feed `AuthDeadline { player_id }` back in once `after` has elapsed
    AuthDeadline { player_id: u32, after: Duration },
    /// Feed `CountdownElapsed { epoch }` back in once `after` has elapsed
    ScheduleRaceStart { epoch: u64, after: Duration },
}

pub struct SessionContext {
    authenticator: TokenAuthenticator,
    roster: Roster,
    coordinator: RaceCoordinator,
    /// Addresses of connections that have not been admitted yet
    pending: HashMap<u32, SocketAddr>,
}

impl SessionContext {
    pub fn new(token: impl Into<String>, settings: RaceSettings) -> Self {
        let authenticator = TokenAuthenticator::new(token, settings.auth_grace);
        Self::with_authenticator(authenticator, settings)
    }

    pub fn with_authenticator(authenticator: TokenAuthenticator, settings: RaceSettings) -> Self {
        Self {
            authenticator,
            roster: Roster::new(settings.max_players),
            coordinator: RaceCoordinator::new(settings),
            pending: HashMap::new(),
        }
    }

    pub fn token(&self) -> &str {
        self.authenticator.token()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn coordinator(&self) -> &RaceCoordinator {
        &self.coordinator
    }

    pub fn state(&self) -> SessionState {
        self.coordinator.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RosterEvent> {
        self.roster.subscribe()
    }

    pub fn on_connect(&mut self, player_id: u32, addr: SocketAddr) -> Vec<Effect> {
        debug!("Connection {} from {} awaiting token", player_id, addr);
        self.authenticator.register(player_id);
        self.pending.insert(player_id, addr);
        vec![Effect::AuthDeadline {
            player_id,
            after: self.coordinator.settings().auth_timeout,
        }]
    }

    /// Closes the connection if it still has not presented a token.
    pub fn on_auth_deadline(&mut self, player_id: u32) -> Vec<Effect> {
        if !self.authenticator.expire(player_id) {
            return Vec::new();
        }
        self.pending.remove(&player_id);
        vec![Effect::Close {
            player_id,
            after: Duration::ZERO,
        }]
    }

    pub fn on_packet(&mut self, player_id: u32, packet: Packet) -> Vec<Effect> {
        match self.authenticator.state(player_id) {
            Some(AuthState::Pending) => match packet {
                Packet::AuthRequest { token } => self.authenticate(player_id, &token),
                other => {
                    debug!(
                        "Ignoring {} from unauthenticated connection {}",
                        other.kind(),
                        player_id
                    );
                    Vec::new()
                }
            },
            Some(AuthState::Accepted) => self.handle_participant_packet(player_id, packet),
            Some(AuthState::Rejected) | None => {
                debug!("Ignoring {} from closing connection {}", packet.kind(), player_id);
                Vec::new()
            }
        }
    }

    pub fn on_disconnect(&mut self, player_id: u32) -> Vec<Effect> {
        self.pending.remove(&player_id);
        self.authenticator.forget(player_id);
        self.remove_participant(player_id, RemovalReason::Disconnected)
    }

    pub fn on_countdown_elapsed(&mut self, epoch: u64) -> Vec<Effect> {
        self.coordinator.countdown_elapsed(epoch)
    }

    /// Final broadcasts before the server stops.
    pub fn shutdown(&mut self) -> Vec<Effect> {
        let mut effects = self.coordinator.force_close();
        effects.push(Effect::Broadcast(Packet::Disconnected {
            reason: "Server shutting down".to_string(),
        }));
        effects
    }

    fn authenticate(&mut self, player_id: u32, token: &str) -> Vec<Effect> {
        let admission = self.coordinator.admission(&self.roster);
        let Some(decision) = self.authenticator.evaluate(player_id, token, admission) else {
            return Vec::new();
        };

        match decision {
            AuthDecision::Accept => {
                let addr = self
                    .pending
                    .remove(&player_id)
                    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));

                if self.roster.admit(Identity::new(player_id, addr)).is_none() {
                    self.authenticator.revoke(player_id);
                    return self.reject(player_id, AuthCode::ServerFull, "Server full".to_string());
                }

                vec![
                    Effect::Send {
                        player_id,
                        packet: Packet::AuthResponse {
                            code: AuthCode::Success,
                            message: "Welcome".to_string(),
                            player_id: Some(player_id),
                        },
                    },
                    self.roster_update(),
                ]
            }
            AuthDecision::Reject { code, reason } => self.reject(player_id, code, reason),
        }
    }

    fn reject(&mut self, player_id: u32, code: AuthCode, reason: String) -> Vec<Effect> {
        self.pending.remove(&player_id);
        vec![
            Effect::Send {
                player_id,
                packet: Packet::AuthResponse {
                    code,
                    message: reason,
                    player_id: None,
                },
            },
            Effect::Close {
                player_id,
                after: self.authenticator.grace_delay(),
            },
        ]
    }

    fn handle_participant_packet(&mut self, player_id: u32, packet: Packet) -> Vec<Effect> {
        match packet {
            Packet::SetPlayerName { name } => {
                if self.roster.set_name(player_id, &name) {
                    vec![self.roster_update()]
                } else {
                    Vec::new()
                }
            }

            Packet::SelectVehicle { vehicle } => {
                if self.state() == SessionState::Lobby && self.roster.set_vehicle(player_id, vehicle)
                {
                    vec![self.roster_update()]
                } else {
                    Vec::new()
                }
            }

            Packet::PlayerReady => match self.coordinator.mark_ready(player_id, &self.roster) {
                ReadyOutcome::Ignored => Vec::new(),
                ReadyOutcome::Waiting { .. } => vec![self.roster_update()],
                ReadyOutcome::CountdownStarted(mut effects) => {
                    effects.insert(0, self.roster_update());
                    effects
                }
            },

            Packet::ReportFinish { elapsed_time } => {
                self.coordinator
                    .report_finish(player_id, elapsed_time, &self.roster)
            }

            Packet::KickPlayer { player_id: target } => self.kick(player_id, target),

            Packet::ReturnToLobby => {
                let mut effects = self.coordinator.return_to_lobby(player_id, &self.roster);
                if !effects.is_empty() {
                    effects.push(self.roster_update());
                }
                effects
            }

            Packet::Leave => {
                info!("Player {} left the session", player_id);
                self.authenticator.revoke(player_id);
                let mut effects = self.remove_participant(player_id, RemovalReason::Disconnected);
                effects.push(Effect::Close {
                    player_id,
                    after: Duration::ZERO,
                });
                effects
            }

            Packet::AuthRequest { .. } => {
                debug!("Player {} is already authenticated", player_id);
                Vec::new()
            }

            other => {
                warn!("Unexpected {} from player {}", other.kind(), player_id);
                Vec::new()
            }
        }
    }

    fn kick(&mut self, requester: u32, target: u32) -> Vec<Effect> {
        let Some(kicked) = self.roster.kick(requester, target) else {
            return Vec::new();
        };
        self.authenticator.revoke(kicked.player_id);

        let mut effects = vec![
            Effect::Send {
                player_id: target,
                packet: Packet::Disconnected {
                    reason: "Kicked by host".to_string(),
                },
            },
            Effect::Close {
                player_id: target,
                after: self.authenticator.grace_delay(),
            },
        ];
        effects.extend(self.coordinator.participant_left(target, &self.roster));
        effects.push(self.roster_update());
        effects
    }

    fn remove_participant(&mut self, player_id: u32, reason: RemovalReason) -> Vec<Effect> {
        if self.roster.remove(player_id, reason).is_none() {
            return Vec::new();
        }

        let mut effects = self.coordinator.participant_left(player_id, &self.roster);
        effects.insert(0, self.roster_update());
        effects
    }

    fn roster_update(&self) -> Effect {
        Effect::Broadcast(Packet::RosterUpdate {
            players: self.roster.player_infos(self.coordinator.ready_set()),
        })
    }
}
