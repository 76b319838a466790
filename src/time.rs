//! Frame timing and sub-step deltas.
//!
//! [`FrameClock`] measures wall time between presented frames. The scheduler
//! turns that into a per-sub-step delta with [`substep_delta`], according to
//! the configured [`TimeStepMode`].
//!
//! ```ignore
//! let mut clock = FrameClock::new();
//! loop {
//!     let frame_time = clock.tick();
//!     scheduler.run_frame(frame_time);
//! }
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::SimConfig;

/// How the per-sub-step delta is derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeStepMode {
    /// `time_step` split evenly over all sub-steps of a frame, scaled by
    /// `time_scale * program_speed`. Deterministic.
    #[default]
    Fixed,
    /// Real frame time split over all sub-steps, scaled by
    /// `time_scale * program_speed`, and never larger than `time_step`.
    Dynamic,
}

/// Delta time for one sub-step of the coming frame.
pub fn substep_delta(config: &SimConfig, frame_time: f32) -> f32 {
    let steps = config.steps_per_frame().max(1) as f32;
    match config.time_step_mode {
        TimeStepMode::Fixed => config.time_step / steps * config.time_scale * config.program_speed,
        TimeStepMode::Dynamic => {
            (frame_time / steps * config.time_scale * config.program_speed).min(config.time_step)
        }
    }
}

/// Wall-clock frame timer.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last_frame: Instant,
    /// Seconds between the last two ticks.
    delta_secs: f32,
    frame_count: u64,
    fps: f32,
    fps_frame_count: u64,
    fps_update_time: Instant,
    fps_update_interval: Duration,
    paused: bool,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            delta_secs: 0.0,
            frame_count: 0,
            fps: 0.0,
            fps_frame_count: 0,
            fps_update_time: now,
            fps_update_interval: Duration::from_millis(500),
            paused: false,
        }
    }

    /// Advance one frame and return the seconds since the previous tick.
    ///
    /// Returns 0 while paused.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let raw_delta = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        if self.paused {
            self.delta_secs = 0.0;
            return 0.0;
        }

        self.delta_secs = raw_delta;
        self.frame_count += 1;

        let fps_elapsed = now.duration_since(self.fps_update_time);
        if fps_elapsed >= self.fps_update_interval {
            let frames_since = self.frame_count - self.fps_frame_count;
            self.fps = frames_since as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = self.frame_count;
            self.fps_update_time = now;
        }

        self.delta_secs
    }

    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Wall time since the clock was created.
    pub fn wall_elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
