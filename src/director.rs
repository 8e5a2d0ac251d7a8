//! Capture loop.

use crate::pipeline::Screenshoter;
use crate::scheduler::Scheduler;
use crate::Result;
use log::{debug, info};

/// Alternates between advancing the animation and taking a screenshot.
///
/// Only one screenshot is in flight at a time; `capture` returns once the
/// consumer has the frame, and the consumer's work on it may overlap with the
/// next frame's wait.
pub struct Director<'a> {
    scheduler: &'a mut Scheduler,
    screenshoter: &'a Screenshoter,
}

impl<'a> Director<'a> {
    pub fn new(scheduler: &'a mut Scheduler, screenshoter: &'a Screenshoter) -> Self {
        Self {
            scheduler,
            screenshoter,
        }
    }

    /// Capture every remaining frame, then close the screenshot stream.
    ///
    /// Returns the number of frames delivered. On error the stream is closed
    /// as well so the consumer never waits on a pass that has stopped.
    pub async fn run(mut self) -> Result<u64> {
        info!(
            "capturing {} frames starting at frame {}",
            self.scheduler.total_frames(),
            self.scheduler.current_frame()
        );

        let result = self.capture_all().await;
        self.screenshoter.close();

        let frames = result?;
        info!("capture loop finished after {} frames", frames);
        Ok(frames)
    }

    async fn capture_all(&mut self) -> Result<u64> {
        let mut frames = 0;
        while self.scheduler.advance().await? {
            let index = self.screenshoter.capture().await?;
            debug!("frame {} captured as #{}", self.scheduler.current_frame(), index);
            frames += 1;
        }
        Ok(frames)
    }
}
