//! Per-participant checkpoint and lap validation
//!
//! The tracker runs on the client that owns the vehicle. Checkpoints must be
//! crossed strictly in order; anything else is ignored without error. A lap
//! only counts once every checkpoint of the lap has been passed, and crossing
//! the finish line after the last lap stops the clock.

use log::{debug, info};
use shared::{Transform, DEFAULT_TOTAL_CHECKPOINTS, DEFAULT_TOTAL_LAPS};

pub const DEFAULT_STUCK_SPEED: f32 = 1.0;
pub const DEFAULT_STUCK_TIMEOUT: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLayout {
    pub total_checkpoints: usize,
    pub total_laps: u32,
}

impl Default for TrackLayout {
    fn default() -> Self {
        Self {
            total_checkpoints: DEFAULT_TOTAL_CHECKPOINTS,
            total_laps: DEFAULT_TOTAL_LAPS,
        }
    }
}

/// The physical vehicle, as far as recovery is concerned
pub trait VehicleBody {
    fn set_pose(&mut self, transform: &Transform);
    /// Zeroes linear and angular velocity
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FinishLineOutcome {
    Ignored,
    LapCompleted { lap: u32 },
    Finished { elapsed_time: f32 },
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    layout: TrackLayout,
    owned_locally: bool,

    last_validated: usize,
    /// 1-indexed; slot 0 is unused
    passed: Vec<bool>,
    current_lap: u32,

    racing_enabled: bool,
    finished: bool,
    elapsed_time: f32,

    respawn_anchor: Transform,
}

impl ProgressTracker {
    pub fn new(layout: TrackLayout, owned_locally: bool) -> Self {
        Self {
            layout,
            owned_locally,
            last_validated: 0,
            passed: vec![false; layout.total_checkpoints + 1],
            current_lap: 0,
            racing_enabled: false,
            finished: false,
            elapsed_time: 0.0,
            respawn_anchor: Transform::IDENTITY,
        }
    }

    /// Uses the spawn point as the respawn anchor until the first checkpoint.
    pub fn with_spawn(mut self, spawn: Transform) -> Self {
        self.respawn_anchor = spawn;
        self
    }

    pub fn layout(&self) -> TrackLayout {
        self.layout
    }

    pub fn last_validated(&self) -> usize {
        self.last_validated
    }

    pub fn current_lap(&self) -> u32 {
        self.current_lap
    }

    pub fn is_racing(&self) -> bool {
        self.racing_enabled
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn elapsed_time(&self) -> f32 {
        self.elapsed_time
    }

    pub fn respawn_anchor(&self) -> Transform {
        self.respawn_anchor
    }

    pub fn has_passed(&self, index: usize) -> bool {
        self.passed.get(index).copied().unwrap_or(false)
    }

    pub fn all_checkpoints_passed(&self) -> bool {
        self.passed.iter().skip(1).all(|passed| *passed)
    }

    /// Starts the clock. Only the locally owned tracker reacts, and only once.
    pub fn enable_racing(&mut self) -> bool {
        if !self.owned_locally || self.racing_enabled || self.finished {
            return false;
        }

        self.racing_enabled = true;
        self.current_lap = 1;
        self.elapsed_time = 0.0;
        info!("Racing enabled, lap 1 of {}", self.layout.total_laps);
        true
    }

    pub fn tick(&mut self, dt: f32) {
        if self.racing_enabled {
            self.elapsed_time += dt;
        }
    }

    /// Accepts `index` only when it directly follows the last validated
    /// checkpoint.
    pub fn on_checkpoint_triggered(&mut self, index: usize, transform: Transform) -> bool {
        if !self.racing_enabled || self.finished {
            return false;
        }
        if index != self.last_validated + 1 || index > self.layout.total_checkpoints {
            debug!(
                "Ignoring checkpoint {} (expected {})",
                index,
                self.last_validated + 1
            );
            return false;
        }

        self.last_validated = index;
        self.passed[index] = true;
        self.respawn_anchor = transform;
        debug!("Checkpoint {}/{}", index, self.layout.total_checkpoints);
        true
    }

    pub fn on_finish_line_passed(&mut self) -> FinishLineOutcome {
        if !self.racing_enabled || self.finished || !self.all_checkpoints_passed() {
            return FinishLineOutcome::Ignored;
        }

        self.current_lap += 1;
        if self.current_lap > self.layout.total_laps {
            self.racing_enabled = false;
            self.finished = true;
            info!("Finished in {:.3}s", self.elapsed_time);
            return FinishLineOutcome::Finished {
                elapsed_time: self.elapsed_time,
            };
        }

        self.passed.iter_mut().for_each(|passed| *passed = false);
        self.last_validated = 0;
        info!("Lap {} of {}", self.current_lap, self.layout.total_laps);
        FinishLineOutcome::LapCompleted {
            lap: self.current_lap,
        }
    }

    /// Moves the vehicle back to the last anchor. Lap and checkpoint
    /// bookkeeping is untouched. Only available while racing; on the grid the
    /// vehicle already sits at its spawn.
    pub fn respawn_to_last_checkpoint(&self, body: &mut dyn VehicleBody) -> bool {
        if !self.owned_locally || !self.racing_enabled || self.finished {
            return false;
        }

        body.set_pose(&self.respawn_anchor);
        body.stop();
        debug!("Respawned at {:?}", self.respawn_anchor.position);
        true
    }
}

/// Flags a vehicle that has been crawling for too long
#[derive(Debug, Clone)]
pub struct StuckDetector {
    speed_threshold: f32,
    timeout: f32,
    slow_for: f32,
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self::new(DEFAULT_STUCK_SPEED, DEFAULT_STUCK_TIMEOUT)
    }
}

impl StuckDetector {
    pub fn new(speed_threshold: f32, timeout: f32) -> Self {
        Self {
            speed_threshold,
            timeout,
            slow_for: 0.0,
        }
    }

    /// Returns true once per stuck period, then re-arms.
    pub fn sample(&mut self, speed: f32, dt: f32) -> bool {
        if speed.abs() >= self.speed_threshold {
            self.slow_for = 0.0;
            return false;
        }

        self.slow_for += dt;
        if self.slow_for >= self.timeout {
            self.slow_for = 0.0;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.slow_for = 0.0;
    }
}
