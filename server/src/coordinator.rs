//! Session state machine: lobby, countdown, race, results
//!
//! The coordinator is the only writer of [`SessionState`]. It never touches
//! sockets or timers itself; every operation returns the [`Effect`]s the
//! network layer must carry out, which keeps the whole machine testable
//! without a runtime. Thresholds are always evaluated against the live
//! roster passed in by the caller.

use crate::auth::Admission;
use crate::config::RaceSettings;
use crate::results::ResultAggregator;
use crate::roster::Roster;
use crate::session::Effect;
use log::{debug, info, warn};
use shared::{Packet, SpawnAssignment};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Lobby,
    CountdownToRace,
    Racing,
    Finished,
}

#[derive(Debug, PartialEq)]
pub enum ReadyOutcome {
    /// Not in the lobby, unknown participant, or already ready
    Ignored,
    Waiting { ready: usize, needed: usize },
    CountdownStarted(Vec<Effect>),
}

pub struct RaceCoordinator {
    state: SessionState,
    ready: BTreeSet<u32>,
    results: ResultAggregator,
    settings: RaceSettings,
    spawns: Vec<SpawnAssignment>,
    /// Bumped on every countdown start and reset; stale timers compare unequal
    epoch: u64,
}

impl RaceCoordinator {
    pub fn new(settings: RaceSettings) -> Self {
        if settings.spawn_points.is_empty() {
            warn!("No spawn points configured, spawn assignment disabled");
        }

        Self {
            state: SessionState::Lobby,
            ready: BTreeSet::new(),
            results: ResultAggregator::new(),
            settings,
            spawns: Vec::new(),
            epoch: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn settings(&self) -> &RaceSettings {
        &self.settings
    }

    pub fn ready_set(&self) -> &BTreeSet<u32> {
        &self.ready
    }

    pub fn is_ready(&self, player_id: u32) -> bool {
        self.ready.contains(&player_id)
    }

    pub fn spawns(&self) -> &[SpawnAssignment] {
        &self.spawns
    }

    pub fn results(&self) -> &ResultAggregator {
        &self.results
    }

    /// New participants are only taken while the lobby is open.
    pub fn admission(&self, roster: &Roster) -> Admission {
        if self.state != SessionState::Lobby {
            Admission::InProgress
        } else if roster.is_full() {
            Admission::Full
        } else {
            Admission::Open
        }
    }

    pub fn mark_ready(&mut self, player_id: u32, roster: &Roster) -> ReadyOutcome {
        if self.state != SessionState::Lobby {
            debug!("Ready from {} outside lobby ignored", player_id);
            return ReadyOutcome::Ignored;
        }
        if !roster.contains(player_id) || !self.ready.insert(player_id) {
            return ReadyOutcome::Ignored;
        }

        info!(
            "Player {} ready ({}/{})",
            player_id,
            self.ready.len(),
            roster.len()
        );

        if self.all_ready(roster) {
            ReadyOutcome::CountdownStarted(self.begin_countdown(roster))
        } else {
            ReadyOutcome::Waiting {
                ready: self.ready.len(),
                needed: roster.len(),
            }
        }
    }

    fn all_ready(&self, roster: &Roster) -> bool {
        !roster.is_empty()
            && self.ready.len() >= roster.len()
            && roster.iter().all(|identity| self.ready.contains(&identity.player_id))
    }

    fn begin_countdown(&mut self, roster: &Roster) -> Vec<Effect> {
        self.state = SessionState::CountdownToRace;
        self.ready.clear();
        self.epoch += 1;
        self.spawns = self.assign_spawns(roster);

        info!(
            "All {} participants ready, race starts in {:?}",
            roster.len(),
            self.settings.countdown
        );

        vec![
            Effect::Broadcast(Packet::RaceSetup {
                total_laps: self.settings.total_laps,
                total_checkpoints: self.settings.total_checkpoints,
                spawns: self.spawns.clone(),
            }),
            Effect::Broadcast(Packet::StartCountdown {
                seconds: self.settings.countdown_seconds(),
            }),
            Effect::ScheduleRaceStart {
                epoch: self.epoch,
                after: self.settings.countdown,
            },
        ]
    }

    /// Cycles through the spawn points in roster order.
    fn assign_spawns(&self, roster: &Roster) -> Vec<SpawnAssignment> {
        let points = &self.settings.spawn_points;
        if points.is_empty() {
            return Vec::new();
        }

        roster
            .iter()
            .map(|identity| SpawnAssignment {
                player_id: identity.player_id,
                ordinal: identity.ordinal,
                vehicle: identity.vehicle,
                transform: points[identity.ordinal as usize % points.len()],
            })
            .collect()
    }

    /// Timer continuation armed by [`Effect::ScheduleRaceStart`].
    pub fn countdown_elapsed(&mut self, epoch: u64) -> Vec<Effect> {
        if self.state != SessionState::CountdownToRace || epoch != self.epoch {
            debug!("Stale countdown (epoch {}, current {})", epoch, self.epoch);
            return Vec::new();
        }

        self.state = SessionState::Racing;
        info!("Race started");
        vec![Effect::Broadcast(Packet::StartRace)]
    }

    pub fn report_finish(
        &mut self,
        player_id: u32,
        elapsed_time: f32,
        roster: &Roster,
    ) -> Vec<Effect> {
        if self.state != SessionState::Racing {
            debug!("Finish from {} outside race ignored", player_id);
            return Vec::new();
        }
        let Some(identity) = roster.get(player_id) else {
            return Vec::new();
        };

        if !self.results.report(player_id, &identity.name, elapsed_time) {
            return Vec::new();
        }
        self.try_publish(roster)
    }

    fn try_publish(&mut self, roster: &Roster) -> Vec<Effect> {
        if roster.is_empty() || !self.results.covers(&roster.player_ids()) {
            return Vec::new();
        }
        self.publish()
    }

    fn publish(&mut self) -> Vec<Effect> {
        match self.results.publish() {
            Some(ranking) => {
                self.state = SessionState::Finished;
                info!("Race finished, {} ranked", ranking.len());
                vec![Effect::Broadcast(Packet::ShowFinalResults { ranking })]
            }
            None => Vec::new(),
        }
    }

    /// Re-evaluates thresholds after `player_id` has left the roster.
    pub fn participant_left(&mut self, player_id: u32, roster: &Roster) -> Vec<Effect> {
        self.ready.remove(&player_id);

        if roster.is_empty() {
            if self.state != SessionState::Lobby {
                info!("Everyone left, returning to lobby");
                self.reset();
            }
            return Vec::new();
        }

        match self.state {
            SessionState::Lobby if !self.ready.is_empty() && self.all_ready(roster) => {
                self.begin_countdown(roster)
            }
            SessionState::CountdownToRace => {
                info!("Countdown continues with {} participants", roster.len());
                Vec::new()
            }
            SessionState::Racing => self.try_publish(roster),
            _ => Vec::new(),
        }
    }

    /// Host request to start a new session after the results.
    pub fn return_to_lobby(&mut self, requester: u32, roster: &Roster) -> Vec<Effect> {
        if self.state != SessionState::Finished || roster.host_id() != Some(requester) {
            debug!("Return to lobby from {} ignored", requester);
            return Vec::new();
        }

        self.reset();
        info!("New session, back in lobby");
        vec![Effect::Broadcast(Packet::SessionReset)]
    }

    /// Publishes whatever has been reported when the session is torn down
    /// mid-race.
    pub fn force_close(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Racing || self.results.is_empty() {
            return Vec::new();
        }
        info!("Session closed mid-race, publishing partial results");
        self.publish()
    }

    fn reset(&mut self) {
        self.state = SessionState::Lobby;
        self.ready.clear();
        self.results.clear();
        self.spawns.clear();
        self.epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::starting_grid;
    use crate::roster::{Identity, RemovalReason};
    use shared::Transform;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn settings() -> RaceSettings {
        RaceSettings {
            countdown: Duration::from_secs(10),
            spawn_points: starting_grid(4),
            ..RaceSettings::default()
        }
    }

    fn roster_with(ids: &[u32]) -> Roster {
        let mut roster = Roster::new(8);
        for &id in ids {
            let addr = SocketAddr::from(([127, 0, 0, 1], 9000 + id as u16));
            roster.admit(Identity::new(id, addr));
        }
        roster
    }

    fn racing(ids: &[u32]) -> (RaceCoordinator, Roster) {
        let roster = roster_with(ids);
        let mut coordinator = RaceCoordinator::new(settings());
        for &id in ids {
            coordinator.mark_ready(id, &roster);
        }
        let epoch = coordinator.epoch();
        coordinator.countdown_elapsed(epoch);
        assert_eq!(coordinator.state(), SessionState::Racing);
        (coordinator, roster)
    }

    fn ranking_of(effects: &[Effect]) -> Option<Vec<String>> {
        effects.iter().find_map(|effect| match effect {
            Effect::Broadcast(Packet::ShowFinalResults { ranking }) => {
                Some(ranking.iter().map(|e| e.name.clone()).collect())
            }
            _ => None,
        })
    }

    #[test]
    fn test_initial_state() {
        let coordinator = RaceCoordinator::new(settings());
        assert_eq!(coordinator.state(), SessionState::Lobby);
        assert!(coordinator.ready_set().is_empty());
    }

    #[test]
    fn test_countdown_starts_exactly_once_when_all_ready() {
        let roster = roster_with(&[1, 2, 3]);
        let mut coordinator = RaceCoordinator::new(settings());

        assert_eq!(
            coordinator.mark_ready(1, &roster),
            ReadyOutcome::Waiting { ready: 1, needed: 3 }
        );
        // Re-signaling has no effect
        assert_eq!(coordinator.mark_ready(1, &roster), ReadyOutcome::Ignored);
        assert_eq!(
            coordinator.mark_ready(3, &roster),
            ReadyOutcome::Waiting { ready: 2, needed: 3 }
        );
        assert_eq!(coordinator.state(), SessionState::Lobby);

        let effects = match coordinator.mark_ready(2, &roster) {
            ReadyOutcome::CountdownStarted(effects) => effects,
            other => panic!("Expected countdown, got {:?}", other),
        };
        assert_eq!(coordinator.state(), SessionState::CountdownToRace);
        assert!(coordinator.ready_set().is_empty());
        assert!(effects.contains(&Effect::Broadcast(Packet::StartCountdown { seconds: 10 })));
        assert!(effects.contains(&Effect::ScheduleRaceStart {
            epoch: coordinator.epoch(),
            after: Duration::from_secs(10),
        }));

        // No re-entry once counting down
        for id in [1, 2, 3] {
            assert_eq!(coordinator.mark_ready(id, &roster), ReadyOutcome::Ignored);
        }
    }

    #[test]
    fn test_ready_from_unknown_identity_ignored() {
        let roster = roster_with(&[1]);
        let mut coordinator = RaceCoordinator::new(settings());
        assert_eq!(coordinator.mark_ready(42, &roster), ReadyOutcome::Ignored);
        assert_eq!(coordinator.state(), SessionState::Lobby);
    }

    #[test]
    fn test_spawns_follow_roster_order_and_cycle() {
        let mut settings = settings();
        settings.spawn_points = vec![Transform::at(0.0, 0.0, 0.0), Transform::at(5.0, 0.0, 0.0)];
        let roster = roster_with(&[7, 8, 9]);
        let mut coordinator = RaceCoordinator::new(settings);

        for id in [9, 8, 7] {
            coordinator.mark_ready(id, &roster);
        }

        let spawns = coordinator.spawns();
        assert_eq!(spawns.len(), 3);
        assert_eq!(spawns[0].player_id, 7);
        assert_eq!(spawns[0].transform.position, [0.0, 0.0, 0.0]);
        assert_eq!(spawns[1].transform.position, [5.0, 0.0, 0.0]);
        assert_eq!(spawns[2].transform.position, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_missing_spawn_points_disable_assignment() {
        let mut settings = settings();
        settings.spawn_points.clear();
        let roster = roster_with(&[1]);
        let mut coordinator = RaceCoordinator::new(settings);

        match coordinator.mark_ready(1, &roster) {
            ReadyOutcome::CountdownStarted(effects) => {
                assert!(effects.contains(&Effect::Broadcast(Packet::RaceSetup {
                    total_laps: shared::DEFAULT_TOTAL_LAPS,
                    total_checkpoints: shared::DEFAULT_TOTAL_CHECKPOINTS,
                    spawns: Vec::new(),
                })));
            }
            other => panic!("Expected countdown, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_countdown_ignored() {
        let roster = roster_with(&[1]);
        let mut coordinator = RaceCoordinator::new(settings());
        coordinator.mark_ready(1, &roster);

        let stale = coordinator.epoch() - 1;
        assert!(coordinator.countdown_elapsed(stale).is_empty());
        assert_eq!(coordinator.state(), SessionState::CountdownToRace);

        let effects = coordinator.countdown_elapsed(coordinator.epoch());
        assert_eq!(effects, vec![Effect::Broadcast(Packet::StartRace)]);
        assert_eq!(coordinator.state(), SessionState::Racing);

        // A second firing does nothing
        assert!(coordinator.countdown_elapsed(coordinator.epoch()).is_empty());
    }

    #[test]
    fn test_finish_rejected_before_racing() {
        let roster = roster_with(&[1]);
        let mut coordinator = RaceCoordinator::new(settings());

        assert!(coordinator.report_finish(1, 30.0, &roster).is_empty());
        coordinator.mark_ready(1, &roster);
        assert!(coordinator.report_finish(1, 30.0, &roster).is_empty());
        assert!(coordinator.results().is_empty());
    }

    #[test]
    fn test_results_published_when_all_finish() {
        let (mut coordinator, mut roster) = racing(&[1, 2, 3]);
        roster.set_name(2, "B");
        roster.set_name(3, "C");

        assert!(coordinator.report_finish(1, 61.2, &roster).is_empty());
        assert!(coordinator.report_finish(2, 58.9, &roster).is_empty());
        let effects = coordinator.report_finish(3, 58.9, &roster);

        assert_eq!(
            ranking_of(&effects),
            Some(vec!["B".to_string(), "C".to_string(), "Host".to_string()])
        );
        assert_eq!(coordinator.state(), SessionState::Finished);
    }

    #[test]
    fn test_duplicate_finish_keeps_first_time() {
        let (mut coordinator, roster) = racing(&[1, 2]);

        coordinator.report_finish(1, 40.0, &roster);
        coordinator.report_finish(1, 20.0, &roster);

        let report = coordinator.results().report_for(1).unwrap();
        assert_eq!(report.elapsed_time, 40.0);
        assert_eq!(coordinator.state(), SessionState::Racing);
    }

    #[test]
    fn test_disconnect_mid_race_does_not_block_results() {
        let (mut coordinator, mut roster) = racing(&[1, 2, 3]);

        coordinator.report_finish(1, 50.0, &roster);
        coordinator.report_finish(2, 45.0, &roster);

        roster.remove(3, RemovalReason::Disconnected);
        let effects = coordinator.participant_left(3, &roster);

        assert!(ranking_of(&effects).is_some());
        assert_eq!(coordinator.state(), SessionState::Finished);
    }

    #[test]
    fn test_departed_finisher_stays_ranked() {
        let (mut coordinator, mut roster) = racing(&[1, 2]);

        coordinator.report_finish(2, 45.0, &roster);
        roster.remove(2, RemovalReason::Disconnected);
        assert!(coordinator.participant_left(2, &roster).is_empty());

        let effects = coordinator.report_finish(1, 50.0, &roster);
        assert_eq!(
            ranking_of(&effects),
            Some(vec!["Player 2".to_string(), "Host".to_string()])
        );
    }

    #[test]
    fn test_departure_in_lobby_can_complete_readiness() {
        let mut roster = roster_with(&[1, 2, 3]);
        let mut coordinator = RaceCoordinator::new(settings());
        coordinator.mark_ready(1, &roster);
        coordinator.mark_ready(2, &roster);

        roster.remove(3, RemovalReason::Disconnected);
        let effects = coordinator.participant_left(3, &roster);

        assert_eq!(coordinator.state(), SessionState::CountdownToRace);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleRaceStart { .. })));
    }

    #[test]
    fn test_ready_mark_of_departed_is_dropped() {
        let mut roster = roster_with(&[1, 2, 3]);
        let mut coordinator = RaceCoordinator::new(settings());
        coordinator.mark_ready(3, &roster);

        roster.remove(3, RemovalReason::Disconnected);
        coordinator.participant_left(3, &roster);
        assert!(!coordinator.is_ready(3));

        coordinator.mark_ready(1, &roster);
        assert_eq!(coordinator.state(), SessionState::Lobby);
        assert!(matches!(
            coordinator.mark_ready(2, &roster),
            ReadyOutcome::CountdownStarted(_)
        ));
    }

    #[test]
    fn test_disconnect_during_countdown_continues() {
        let mut roster = roster_with(&[1, 2]);
        let mut coordinator = RaceCoordinator::new(settings());
        coordinator.mark_ready(1, &roster);
        coordinator.mark_ready(2, &roster);

        roster.remove(2, RemovalReason::Disconnected);
        assert!(coordinator.participant_left(2, &roster).is_empty());
        assert_eq!(coordinator.state(), SessionState::CountdownToRace);
        assert_eq!(coordinator.spawns().len(), 2);

        let effects = coordinator.countdown_elapsed(coordinator.epoch());
        assert_eq!(effects, vec![Effect::Broadcast(Packet::StartRace)]);

        let effects = coordinator.report_finish(1, 33.0, &roster);
        assert!(ranking_of(&effects).is_some());
    }

    #[test]
    fn test_everyone_leaving_resets_to_lobby() {
        let mut roster = roster_with(&[1]);
        let mut coordinator = RaceCoordinator::new(settings());
        coordinator.mark_ready(1, &roster);
        let countdown_epoch = coordinator.epoch();

        roster.remove(1, RemovalReason::Disconnected);
        coordinator.participant_left(1, &roster);

        assert_eq!(coordinator.state(), SessionState::Lobby);
        // The armed timer is now stale
        assert!(coordinator.countdown_elapsed(countdown_epoch).is_empty());
        assert_eq!(coordinator.state(), SessionState::Lobby);
    }

    #[test]
    fn test_return_to_lobby_host_only_after_finish() {
        let (mut coordinator, roster) = racing(&[1, 2]);

        assert!(coordinator.return_to_lobby(1, &roster).is_empty());

        coordinator.report_finish(1, 10.0, &roster);
        coordinator.report_finish(2, 11.0, &roster);
        assert_eq!(coordinator.state(), SessionState::Finished);

        assert!(coordinator.return_to_lobby(2, &roster).is_empty());
        assert_eq!(
            coordinator.return_to_lobby(1, &roster),
            vec![Effect::Broadcast(Packet::SessionReset)]
        );
        assert_eq!(coordinator.state(), SessionState::Lobby);
        assert!(coordinator.results().is_empty());
        assert!(coordinator.spawns().is_empty());
    }

    #[test]
    fn test_force_close_publishes_partial_results() {
        let (mut coordinator, roster) = racing(&[1, 2]);
        assert!(coordinator.force_close().is_empty());

        coordinator.report_finish(2, 12.5, &roster);
        let effects = coordinator.force_close();
        assert_eq!(ranking_of(&effects), Some(vec!["Player 2".to_string()]));
        assert_eq!(coordinator.state(), SessionState::Finished);
    }

    #[test]
    fn test_admission() {
        let mut roster = Roster::new(1);
        let mut coordinator = RaceCoordinator::new(settings());
        assert_eq!(coordinator.admission(&roster), Admission::Open);

        roster.admit(Identity::new(1, SocketAddr::from(([127, 0, 0, 1], 1))));
        assert_eq!(coordinator.admission(&roster), Admission::Full);

        coordinator.mark_ready(1, &roster);
        assert_eq!(coordinator.admission(&roster), Admission::InProgress);
    }
}
