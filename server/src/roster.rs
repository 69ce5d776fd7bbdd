//! Server-authoritative registry of admitted participants
//!
//! The roster owns every admitted [`Identity`] and keeps their ordinals
//! compact: after any membership change ordinals are `0..len` in admission
//! order, and ordinal 0 is the host. Presentation layers observe changes by
//! subscribing to [`RosterEvent`]s instead of polling.

use log::{debug, info};
use shared::{PlayerInfo, HOST_NAME, MAX_NAME_LEN};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// A connected, authenticated participant
#[derive(Debug, Clone)]
pub struct Identity {
    /// Connection handle, never reused within a server process
    pub player_id: u32,
    /// Network address of the connection
    pub addr: SocketAddr,
    pub name: String,
    /// Position in admission order, recomputed on every membership change
    pub ordinal: u32,
    /// Vehicle chosen in the lobby
    pub vehicle: u32,
    /// Set once the identity has been given the reserved host name
    pub reserved_name: bool,
    pub joined_at: Instant,
}

impl Identity {
    pub fn new(player_id: u32, addr: SocketAddr) -> Self {
        Self {
            player_id,
            addr,
            name: format!("Player {}", player_id),
            ordinal: 0,
            vehicle: 0,
            reserved_name: false,
            joined_at: Instant::now(),
        }
    }

    pub fn is_host(&self) -> bool {
        self.ordinal == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Disconnected,
    Kicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    Admitted { player_id: u32, ordinal: u32 },
    Removed { player_id: u32, reason: RemovalReason },
    Renamed { player_id: u32, name: String },
}

pub struct Roster {
    /// Admitted identities in admission order
    identities: Vec<Identity>,
    max_players: usize,
    events: broadcast::Sender<RosterEvent>,
}

impl Roster {
    pub fn new(max_players: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identities: Vec::new(),
            max_players,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RosterEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RosterEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Appends an identity and returns its ordinal.
    ///
    /// Returns `None` if the roster is full or the id is already present.
    /// The first identity admitted into an empty roster becomes the host and
    /// receives the reserved host name.
    pub fn admit(&mut self, mut identity: Identity) -> Option<u32> {
        if self.is_full() || self.contains(identity.player_id) {
            return None;
        }

        if self.identities.is_empty() {
            identity.name = HOST_NAME.to_string();
            identity.reserved_name = true;
        }

        let player_id = identity.player_id;
        info!(
            "Player {} ({}) admitted from {}",
            player_id, identity.name, identity.addr
        );
        self.identities.push(identity);
        self.recompute_ordinals();

        let ordinal = self.get(player_id).map(|i| i.ordinal)?;
        self.publish(RosterEvent::Admitted { player_id, ordinal });
        Some(ordinal)
    }

    /// Removes an identity, returning it if it was present.
    pub fn remove(&mut self, player_id: u32, reason: RemovalReason) -> Option<Identity> {
        let index = self
            .identities
            .iter()
            .position(|identity| identity.player_id == player_id)?;

        let identity = self.identities.remove(index);
        info!("Player {} ({}) removed: {:?}", player_id, identity.name, reason);
        self.recompute_ordinals();
        self.publish(RosterEvent::Removed { player_id, reason });
        Some(identity)
    }

    /// Assigns ordinals `0..len` in roster order.
    pub fn recompute_ordinals(&mut self) {
        for (ordinal, identity) in self.identities.iter_mut().enumerate() {
            identity.ordinal = ordinal as u32;
        }
    }

    /// Removes `target` on behalf of `requester`.
    ///
    /// Only the host may kick, and never itself.
    pub fn kick(&mut self, requester: u32, target: u32) -> Option<Identity> {
        if self.host_id() != Some(requester) {
            debug!("Player {} is not the host, kick ignored", requester);
            return None;
        }
        if requester == target {
            debug!("Host cannot kick itself");
            return None;
        }
        self.remove(target, RemovalReason::Kicked)
    }

    /// Applies a display name. Whoever was admitted as host keeps the reserved
    /// name, and nobody else may claim it. A participant promoted to host later
    /// can still rename.
    pub fn set_name(&mut self, player_id: u32, name: &str) -> bool {
        let name = sanitize_name(name);
        let Some(name) = name else {
            return false;
        };
        if name.eq_ignore_ascii_case(HOST_NAME) {
            return false;
        }

        let Some(identity) = self.get_mut(player_id) else {
            return false;
        };
        if identity.reserved_name || identity.name == name {
            return false;
        }

        identity.name = name.clone();
        self.publish(RosterEvent::Renamed { player_id, name });
        true
    }

    pub fn set_vehicle(&mut self, player_id: u32, vehicle: u32) -> bool {
        match self.get_mut(player_id) {
            Some(identity) => {
                identity.vehicle = vehicle;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, player_id: u32) -> Option<&Identity> {
        self.identities
            .iter()
            .find(|identity| identity.player_id == player_id)
    }

    fn get_mut(&mut self, player_id: u32) -> Option<&mut Identity> {
        self.identities
            .iter_mut()
            .find(|identity| identity.player_id == player_id)
    }

    pub fn contains(&self, player_id: u32) -> bool {
        self.get(player_id).is_some()
    }

    pub fn host_id(&self) -> Option<u32> {
        self.identities.first().map(|identity| identity.player_id)
    }

    pub fn player_ids(&self) -> Vec<u32> {
        self.identities
            .iter()
            .map(|identity| identity.player_id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }

    /// Lobby snapshot for clients, flagging who has signaled ready.
    pub fn player_infos(&self, ready: &BTreeSet<u32>) -> Vec<PlayerInfo> {
        self.identities
            .iter()
            .map(|identity| PlayerInfo {
                player_id: identity.player_id,
                ordinal: identity.ordinal,
                name: identity.name.clone(),
                vehicle: identity.vehicle,
                ready: ready.contains(&identity.player_id),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.identities.len() >= self.max_players
    }
}

/// Trims and truncates a requested name, rejecting empty ones.
fn sanitize_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_NAME_LEN).collect())
}
