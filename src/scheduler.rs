//! Capture scheduler: holds the animation for exactly one frame interval per
//! `advance` call and feeds measured latency back into [`CaptureState`].

use crate::state::CaptureState;
use crate::surface::{as_millis_f64, timed, AnimationControl};
use crate::{Error, Result};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// Drives the remote animation clock frame by frame.
///
/// Lifecycle: `new` (unready) -> `get_ready` -> `advance`... until it returns
/// `false`. The scheduler is the only component allowed to pause or resume
/// the animation, and `advance` takes `&mut self`, so two control commands can
/// never be in flight at once.
pub struct Scheduler {
    state: CaptureState,
    control: Arc<dyn AnimationControl>,
}

impl Scheduler {
    pub fn new(control: Arc<dyn AnimationControl>, state: CaptureState) -> Self {
        debug!("scheduler initial parameters: {:?}", state.snapshot());
        Self { state, control }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn current_frame(&self) -> u64 {
        self.state.current_frame()
    }

    pub fn total_frames(&self) -> u64 {
        self.state.total_frames()
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready
    }

    /// Pause the animation so capture starts from a known state. Idempotent.
    pub async fn get_ready(&mut self) -> Result<()> {
        if !self.state.is_ready {
            self.stop_animation().await?;
            self.state.is_ready = true;
            info!("scheduler ready, {} frames to capture", self.state.total_frames());
        }
        Ok(())
    }

    pub fn has_next_frame(&self) -> bool {
        self.state.has_next_frame()
    }

    /// Run the animation for one frame interval and pause it again.
    ///
    /// Returns `Ok(false)` once every frame has been produced. Calling this
    /// before [`get_ready`](Self::get_ready) is a usage error.
    pub async fn advance(&mut self) -> Result<bool> {
        if !self.state.is_ready {
            return Err(Error::NotReady);
        }

        if self.state.total_frames() == 0 {
            debug!("total frames is zero");
            return Ok(false);
        }

        if !self.state.advance_frame() {
            debug!("no more frames");
            return Ok(false);
        }

        debug!("frame {} wait computed: {:?}", self.state.current_frame(), self.state.snapshot());

        self.start_animation().await?;
        self.wait().await;
        self.stop_animation().await?;

        self.state.update_lag();

        debug!("frame {} prepared: {:?}", self.state.current_frame(), self.state.snapshot());

        Ok(true)
    }

    /// Rewind the frame counter and timing error for another pass.
    pub fn reset(&mut self) {
        self.state.reset();
        debug!("scheduler reset");
    }

    async fn wait(&mut self) {
        let requested = self.state.virtual_wait();
        let (_, elapsed) = timed(async {
            // Zero or negative waits must not block.
            if requested > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(requested / 1000.0)).await;
            }
        })
        .await;

        let elapsed = as_millis_f64(elapsed);
        self.state.record_wait_latency(elapsed);
        debug!("done waiting: requested {:.3}ms, took {:.3}ms", requested, elapsed);
    }

    async fn start_animation(&mut self) -> Result<()> {
        if !self.state.is_animation_paused {
            self.state.record_resume_latency(0.0);
            return Ok(());
        }

        let latency = as_millis_f64(self.control.resume().await?);
        self.state.record_resume_latency(latency);
        self.state.is_animation_paused = false;
        debug!("animation started in {:.3}ms", latency);
        Ok(())
    }

    async fn stop_animation(&mut self) -> Result<()> {
        if self.state.is_animation_paused {
            return Ok(());
        }

        let latency = as_millis_f64(self.control.pause().await?);
        if self.state.is_ready {
            self.state.record_pause_latency(latency);
        }
        self.state.is_animation_paused = true;
        debug!("animation stopped in {:.3}ms", latency);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingControl {
        pauses: AtomicUsize,
        resumes: AtomicUsize,
    }

    #[async_trait]
    impl AnimationControl for CountingControl {
        async fn pause(&self) -> Result<Duration> {
            self.pauses.fetch_add(1, Ordering::SeqCst);
            Ok(Duration::ZERO)
        }

        async fn resume(&self) -> Result<Duration> {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            Ok(Duration::ZERO)
        }
    }

    fn scheduler(duration: f64) -> (Scheduler, Arc<CountingControl>) {
        let control = Arc::new(CountingControl::default());
        let state = CaptureState::new(duration, Some(30.0), None, None).unwrap();
        (Scheduler::new(control.clone(), state), control)
    }

    #[tokio::test(start_paused = true)]
    async fn advance_before_ready_is_an_error() {
        let (mut s, control) = scheduler(1000.0);
        assert!(matches!(s.advance().await, Err(Error::NotReady)));
        assert_eq!(control.pauses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn get_ready_pauses_once() {
        let (mut s, control) = scheduler(1000.0);
        s.get_ready().await.unwrap();
        s.get_ready().await.unwrap();
        assert!(s.is_ready());
        assert_eq!(control.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(control.resumes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_never_touches_renderer() {
        let (mut s, control) = scheduler(0.0);
        s.get_ready().await.unwrap();
        let pauses = control.pauses.load(Ordering::SeqCst);

        for _ in 0..3 {
            assert!(!s.advance().await.unwrap());
        }
        assert_eq!(s.current_frame(), 0);
        assert_eq!(control.pauses.load(Ordering::SeqCst), pauses);
        assert_eq!(control.resumes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn each_frame_resumes_and_pauses_once() {
        let (mut s, control) = scheduler(100.0);
        s.get_ready().await.unwrap();

        let mut frames = 0;
        while s.advance().await.unwrap() {
            frames += 1;
        }

        assert_eq!(frames, 3);
        assert_eq!(s.current_frame(), 3);
        assert!(!s.has_next_frame());
        assert_eq!(control.resumes.load(Ordering::SeqCst), 3);
        // one from get_ready
        assert_eq!(control.pauses.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_allows_another_pass() {
        let (mut s, _control) = scheduler(100.0);
        s.get_ready().await.unwrap();
        while s.advance().await.unwrap() {}

        s.reset();
        assert_eq!(s.current_frame(), 0);
        assert_eq!(s.total_frames(), 3);
        assert!(s.advance().await.unwrap());
    }
}
