//! Read-only mirror of the server's session state

use crate::progress::TrackLayout;
use log::{debug, info};
use shared::{Packet, PlayerInfo, RankingEntry, SpawnAssignment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Lobby,
    Countdown,
    Racing,
    /// Local participant crossed the line, waiting for the others
    Finished,
    Results,
    /// Connection lost; back to the join screen
    PreRace,
}

#[derive(Debug, Clone)]
pub struct LobbyView {
    local_player_id: u32,
    phase: ClientPhase,
    players: Vec<PlayerInfo>,
    layout: TrackLayout,
    spawns: Vec<SpawnAssignment>,
    countdown: Option<u32>,
    ranking: Vec<RankingEntry>,
    disconnect_reason: Option<String>,
}

impl LobbyView {
    pub fn new(local_player_id: u32) -> Self {
        Self {
            local_player_id,
            phase: ClientPhase::Lobby,
            players: Vec::new(),
            layout: TrackLayout::default(),
            spawns: Vec::new(),
            countdown: None,
            ranking: Vec::new(),
            disconnect_reason: None,
        }
    }

    /// Folds a server packet into the mirror. Returns false for packets that
    /// carry no session state.
    pub fn apply(&mut self, packet: &Packet) -> bool {
        if self.phase == ClientPhase::PreRace {
            return false;
        }

        match packet {
            Packet::RosterUpdate { players } => {
                self.players = players.clone();
            }
            Packet::RaceSetup {
                total_laps,
                total_checkpoints,
                spawns,
            } => {
                self.layout = TrackLayout {
                    total_checkpoints: *total_checkpoints,
                    total_laps: *total_laps,
                };
                self.spawns = spawns.clone();
            }
            Packet::StartCountdown { seconds } => {
                info!("Race starts in {}s", seconds);
                self.countdown = Some(*seconds);
                self.phase = ClientPhase::Countdown;
            }
            Packet::StartRace => {
                self.countdown = None;
                self.phase = ClientPhase::Racing;
            }
            Packet::ShowFinalResults { ranking } => {
                self.ranking = ranking.clone();
                self.phase = ClientPhase::Results;
            }
            Packet::SessionReset => {
                self.spawns.clear();
                self.ranking.clear();
                self.countdown = None;
                self.phase = ClientPhase::Lobby;
            }
            Packet::Disconnected { reason } => {
                self.connection_lost(reason);
            }
            other => {
                debug!("{} does not change the lobby view", other.kind());
                return false;
            }
        }
        true
    }

    pub fn mark_finished(&mut self) {
        if self.phase == ClientPhase::Racing {
            self.phase = ClientPhase::Finished;
        }
    }

    pub fn connection_lost(&mut self, reason: &str) {
        self.phase = ClientPhase::PreRace;
        self.disconnect_reason = Some(reason.to_string());
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn local_player_id(&self) -> u32 {
        self.local_player_id
    }

    pub fn players(&self) -> &[PlayerInfo] {
        &self.players
    }

    pub fn local_player(&self) -> Option<&PlayerInfo> {
        self.players
            .iter()
            .find(|p| p.player_id == self.local_player_id)
    }

    pub fn is_host(&self) -> bool {
        self.local_player().map_or(false, |p| p.ordinal == 0)
    }

    pub fn layout(&self) -> TrackLayout {
        self.layout
    }

    pub fn spawns(&self) -> &[SpawnAssignment] {
        &self.spawns
    }

    pub fn local_spawn(&self) -> Option<&SpawnAssignment> {
        self.spawns
            .iter()
            .find(|s| s.player_id == self.local_player_id)
    }

    pub fn countdown(&self) -> Option<u32> {
        self.countdown
    }

    pub fn ranking(&self) -> &[RankingEntry] {
        &self.ranking
    }

    /// Position as published by the server
    pub fn local_position(&self) -> Option<u32> {
        self.ranking
            .iter()
            .find(|e| e.player_id == self.local_player_id)
            .map(|e| e.position)
    }

    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Transform;

    fn player(id: u32, ordinal: u32, name: &str) -> PlayerInfo {
        PlayerInfo {
            player_id: id,
            ordinal,
            name: name.to_string(),
            vehicle: 0,
            ready: false,
        }
    }

    #[test]
    fn test_roster_mirror_and_host_flag() {
        let mut view = LobbyView::new(2);
        view.apply(&Packet::RosterUpdate {
            players: vec![player(1, 0, "Host"), player(2, 1, "Ada")],
        });

        assert_eq!(view.players().len(), 2);
        assert_eq!(view.local_player().unwrap().name, "Ada");
        assert!(!view.is_host());

        // Host left, we were recompacted to ordinal 0
        view.apply(&Packet::RosterUpdate {
            players: vec![player(2, 0, "Ada")],
        });
        assert!(view.is_host());
    }

    #[test]
    fn test_phase_progression() {
        let mut view = LobbyView::new(1);
        view.apply(&Packet::RaceSetup {
            total_laps: 2,
            total_checkpoints: 4,
            spawns: vec![SpawnAssignment {
                player_id: 1,
                ordinal: 0,
                vehicle: 0,
                transform: Transform::at(-2.0, 0.0, 0.0),
            }],
        });
        assert_eq!(view.layout().total_checkpoints, 4);
        assert_eq!(
            view.local_spawn().unwrap().transform,
            Transform::at(-2.0, 0.0, 0.0)
        );

        view.apply(&Packet::StartCountdown { seconds: 10 });
        assert_eq!(view.phase(), ClientPhase::Countdown);
        assert_eq!(view.countdown(), Some(10));

        view.apply(&Packet::StartRace);
        assert_eq!(view.phase(), ClientPhase::Racing);

        view.mark_finished();
        assert_eq!(view.phase(), ClientPhase::Finished);

        view.apply(&Packet::ShowFinalResults {
            ranking: vec![RankingEntry {
                position: 1,
                player_id: 1,
                name: "Host".to_string(),
                elapsed_time: 42.0,
            }],
        });
        assert_eq!(view.phase(), ClientPhase::Results);
        assert_eq!(view.local_position(), Some(1));

        view.apply(&Packet::SessionReset);
        assert_eq!(view.phase(), ClientPhase::Lobby);
        assert!(view.ranking().is_empty());
        assert!(view.spawns().is_empty());
    }

    #[test]
    fn test_mark_finished_only_while_racing() {
        let mut view = LobbyView::new(1);
        view.mark_finished();
        assert_eq!(view.phase(), ClientPhase::Lobby);
    }

    #[test]
    fn test_disconnect_returns_to_pre_race() {
        let mut view = LobbyView::new(1);
        view.apply(&Packet::StartRace);

        assert!(view.apply(&Packet::Disconnected {
            reason: "Kicked by host".to_string()
        }));
        assert_eq!(view.phase(), ClientPhase::PreRace);
        assert_eq!(view.disconnect_reason(), Some("Kicked by host"));

        // Nothing changes the view after that
        assert!(!view.apply(&Packet::StartRace));
        assert_eq!(view.phase(), ClientPhase::PreRace);
    }

    #[test]
    fn test_client_bound_packets_only() {
        let mut view = LobbyView::new(1);
        assert!(!view.apply(&Packet::PlayerReady));
    }
}
