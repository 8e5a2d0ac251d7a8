//! Timing arithmetic for frame-accurate capture.
//!
//! `CaptureState` is plain data: it knows how many frames a pass produces,
//! how long the animation must run between two captures and how much timing
//! error the previous frame left behind. It never talks to the renderer; the
//! [`Scheduler`](crate::scheduler::Scheduler) feeds it measured latencies.
//!
//! All durations are milliseconds held as `f64`. Frame durations such as
//! `1000 / 30 = 33.33ms` cannot be slept exactly, so the fractional part is
//! accumulated in a carry and paid out one whole millisecond at a time.

use crate::{Error, Result};

/// Frame rate used when none is requested.
pub const DEFAULT_FPS: f64 = 30.0;

/// Immutable view of the timing record, cheap to pass to log lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSnapshot {
    pub current_frame: u64,
    pub total_frames: u64,
    pub wait: f64,
    pub virtual_wait: f64,
    pub fraction_carry: f64,
    pub last_lag: f64,
    pub last_frame_switch_lag: f64,
    pub last_wait_lag: f64,
    pub animation_time: f64,
}

#[derive(Debug)]
pub struct CaptureState {
    total_frames: u64,
    current_frame: u64,

    fps: f64,
    delay_ms: f64,
    speed: f64,
    duration_ms: f64,
    frame_duration: f64,
    frame_duration_whole: f64,
    frame_duration_fraction: f64,

    fraction_carry: f64,
    wait: f64,
    virtual_wait: f64,

    last_lag: f64,
    last_frame_switch_lag: f64,
    last_wait_lag: f64,
    last_resume_latency: f64,
    last_pause_latency: f64,
    last_wait_latency: f64,
    animation_time: f64,

    pub(crate) is_animation_paused: bool,
    pub(crate) is_ready: bool,
}

impl CaptureState {
    /// Build the timing record for a pass of `duration_ms`.
    ///
    /// `fps` defaults to 30, `delay_ms` to 0 and `speed` to `30 / fps`, so a
    /// non-default frame rate still plays the animation at its native pace.
    pub fn new(
        duration_ms: f64,
        fps: Option<f64>,
        delay_ms: Option<f64>,
        speed: Option<f64>,
    ) -> Result<Self> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(Error::InvalidParameters(format!(
                "duration must be a non-negative number of milliseconds, got {}",
                duration_ms
            )));
        }

        let fps = fps.unwrap_or(DEFAULT_FPS);
        if !fps.is_finite() || fps <= 0.0 {
            return Err(Error::InvalidParameters(format!("fps must be positive, got {}", fps)));
        }

        let delay_ms = delay_ms.unwrap_or(0.0);
        if !delay_ms.is_finite() || delay_ms < 0.0 {
            return Err(Error::InvalidParameters(format!(
                "delay must be a non-negative number of milliseconds, got {}",
                delay_ms
            )));
        }

        let speed = speed.unwrap_or(DEFAULT_FPS / fps);
        if !speed.is_finite() || speed <= 0.0 {
            return Err(Error::InvalidParameters(format!("speed must be positive, got {}", speed)));
        }

        let frame_duration = 1000.0 / fps;

        Ok(Self {
            total_frames: (duration_ms / 1000.0 * fps).floor() as u64,
            current_frame: 0,
            fps,
            delay_ms,
            speed,
            duration_ms,
            frame_duration,
            frame_duration_whole: frame_duration.floor(),
            frame_duration_fraction: frame_duration % 1.0,
            fraction_carry: 0.0,
            wait: 0.0,
            virtual_wait: 0.0,
            last_lag: 0.0,
            last_frame_switch_lag: 0.0,
            last_wait_lag: 0.0,
            last_resume_latency: 0.0,
            last_pause_latency: 0.0,
            last_wait_latency: 0.0,
            animation_time: 0.0,
            is_animation_paused: false,
            is_ready: false,
        })
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn has_next_frame(&self) -> bool {
        self.current_frame < self.total_frames
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn delay_ms(&self) -> f64 {
        self.delay_ms
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// Nominal `1000 / fps`.
    pub fn frame_duration(&self) -> f64 {
        self.frame_duration
    }

    pub fn frame_duration_whole(&self) -> f64 {
        self.frame_duration_whole
    }

    pub fn frame_duration_fraction(&self) -> f64 {
        self.frame_duration_fraction
    }

    pub fn fraction_carry(&self) -> f64 {
        self.fraction_carry
    }

    /// Animation-time wait for the current frame, lag already subtracted.
    pub fn wait(&self) -> f64 {
        self.wait
    }

    /// Wall-clock wait to request from the timer. May be zero or negative.
    pub fn virtual_wait(&self) -> f64 {
        self.virtual_wait
    }

    pub fn last_lag(&self) -> f64 {
        self.last_lag
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            current_frame: self.current_frame,
            total_frames: self.total_frames,
            wait: self.wait,
            virtual_wait: self.virtual_wait,
            fraction_carry: self.fraction_carry,
            last_lag: self.last_lag,
            last_frame_switch_lag: self.last_frame_switch_lag,
            last_wait_lag: self.last_wait_lag,
            animation_time: self.animation_time,
        }
    }

    /// Move to the next frame and compute its wait.
    ///
    /// Returns `false` without touching anything once every frame has been
    /// produced.
    pub fn advance_frame(&mut self) -> bool {
        if !self.has_next_frame() {
            return false;
        }

        self.current_frame += 1;
        if self.current_frame > 1 {
            self.fraction_carry += self.frame_duration_fraction;
        }
        self.compute_wait();
        true
    }

    fn compute_wait(&mut self) {
        self.wait = if self.current_frame == 1 {
            self.initial_delay()
        } else {
            self.frame_duration_whole + self.collect_carry()
        };

        self.virtual_wait = self.wait / self.speed - self.last_lag;
        self.wait -= self.last_lag;
    }

    /// Wait before the first capture.
    ///
    /// Without a delay the first capture lands in the middle of the first
    /// frame interval. With one, the delay is spread over whole frames plus a
    /// half-frame correction for the remainder.
    pub(crate) fn initial_delay(&self) -> f64 {
        let half = (self.frame_duration / 2.0).ceil();

        if self.delay_ms == 0.0 {
            return half;
        }

        let delay_whole = (self.delay_ms / self.frame_duration).floor();
        let take_half = (self.delay_ms % self.frame_duration).ceil();

        delay_whole + half * take_half
    }

    fn collect_carry(&mut self) -> f64 {
        if self.fraction_carry >= 1.0 {
            self.fraction_carry -= 1.0;
            1.0
        } else {
            0.0
        }
    }

    pub fn record_resume_latency(&mut self, ms: f64) {
        self.last_resume_latency = ms;
    }

    pub fn record_pause_latency(&mut self, ms: f64) {
        self.last_pause_latency = ms;
    }

    pub fn record_wait_latency(&mut self, ms: f64) {
        self.last_wait_latency = ms;
    }

    /// Fold the measured latencies of the frame just produced into the lag
    /// that the next frame's wait will subtract.
    pub fn update_lag(&mut self) {
        self.last_frame_switch_lag = self.last_resume_latency + self.last_pause_latency;
        self.last_wait_lag = self.last_wait_latency - self.virtual_wait;
        self.last_lag = self.last_frame_switch_lag + self.last_wait_lag;
        self.animation_time += self.wait + self.last_lag;
    }

    /// Rewind to frame zero for another pass. Totals are kept.
    pub fn reset(&mut self) {
        self.current_frame = 0;
        self.fraction_carry = 0.0;
        self.wait = 0.0;
        self.virtual_wait = 0.0;
        self.last_lag = 0.0;
        self.last_frame_switch_lag = 0.0;
        self.last_wait_lag = 0.0;
        self.last_resume_latency = 0.0;
        self.last_pause_latency = 0.0;
        self.last_wait_latency = 0.0;
        self.animation_time = 0.0;
    }
}
