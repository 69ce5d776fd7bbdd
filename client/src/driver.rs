//! Scripted stand-in for the track and vehicle, used for headless runs
//!
//! The driver waits for the lobby view to reach the racing phase and then
//! replays a clean lap for every lap of the race, spacing the checkpoint
//! crossings evenly over the configured lap time.

use crate::lobby::{ClientPhase, LobbyView};
use crate::network::TrackEvent;
use crate::progress::VehicleBody;
use log::{debug, info};
use shared::Transform;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Distance between consecutive checkpoints on the scripted track
const CHECKPOINT_SPACING: f32 = 25.0;

#[derive(Debug, Default, Clone)]
pub struct ScriptedVehicle {
    pub pose: Transform,
    pub resets: u32,
}

impl VehicleBody for ScriptedVehicle {
    fn set_pose(&mut self, transform: &Transform) {
        self.pose = *transform;
        self.resets += 1;
    }

    fn stop(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    lap_time: Duration,
}

impl ScriptedDriver {
    pub fn new(lap_time: Duration) -> Self {
        Self { lap_time }
    }

    pub fn checkpoint_transform(index: usize) -> Transform {
        Transform::at(0.0, 0.0, index as f32 * CHECKPOINT_SPACING)
    }

    /// Drives every race of the session. Returns once the client stops
    /// publishing or stops listening for track events.
    pub async fn run(
        self,
        mut view: watch::Receiver<LobbyView>,
        events: mpsc::UnboundedSender<TrackEvent>,
    ) {
        loop {
            let layout = {
                let current = view.borrow_and_update();
                match current.phase() {
                    ClientPhase::Racing => Some(current.layout()),
                    ClientPhase::PreRace => return,
                    _ => None,
                }
            };

            if let Some(layout) = layout {
                info!(
                    "Driving {} laps of {} checkpoints",
                    layout.total_laps, layout.total_checkpoints
                );
                let completed = self
                    .drive_race(layout.total_laps, layout.total_checkpoints, &events)
                    .await;
                if !completed {
                    return;
                }
                // Wait for the next session before driving again
                if !wait_for_phase_change(&mut view, ClientPhase::Racing).await {
                    return;
                }
                continue;
            }

            if view.changed().await.is_err() {
                return;
            }
        }
    }

    async fn drive_race(
        &self,
        laps: u32,
        checkpoints: usize,
        events: &mpsc::UnboundedSender<TrackEvent>,
    ) -> bool {
        let step = self.lap_time / (checkpoints as u32 + 1);

        for lap in 1..=laps {
            for index in 1..=checkpoints {
                tokio::time::sleep(step).await;
                let sent = events.send(TrackEvent::SpeedSample { speed: 30.0 }).is_ok()
                    && events
                        .send(TrackEvent::CheckpointTriggered {
                            index,
                            transform: Self::checkpoint_transform(index),
                        })
                        .is_ok();
                if !sent {
                    return false;
                }
            }

            tokio::time::sleep(step).await;
            if events.send(TrackEvent::FinishLinePassed).is_err() {
                return false;
            }
            debug!("Lap {} done", lap);
        }
        true
    }
}

/// Waits until the view leaves `phase`. False when the sender is gone.
async fn wait_for_phase_change(view: &mut watch::Receiver<LobbyView>, phase: ClientPhase) -> bool {
    loop {
        if view.borrow_and_update().phase() != phase {
            return true;
        }
        if view.changed().await.is_err() {
            return false;
        }
    }
}
