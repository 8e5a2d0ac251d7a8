//! End-to-end capture pass: prepare the page, run the capture loop and drain
//! frames into a sink concurrently.

use crate::director::Director;
use crate::pipeline::Screenshoter;
use crate::scheduler::Scheduler;
use crate::sink::{drain, FrameSink};
use crate::surface::{CaptureSurface, PageLoader};
use crate::{CaptureConfig, Result};
use log::{error, info};
use std::sync::Arc;

/// Outcome of a finished pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureReport {
    pub total_frames: u64,
    pub frames_captured: u64,
    pub frames_written: u64,
}

pub struct Studio {
    config: CaptureConfig,
}

impl Studio {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture the configured animation from `surface` into `sink`.
    ///
    /// The animation is paused before the URL is opened so the first frame
    /// starts from a known point. Any failure, on the capture side or in the
    /// sink, ends the pass and is returned; cleaning up partial output is left
    /// to the caller.
    pub async fn make_animation<S, K>(&self, surface: Arc<S>, sink: &mut K) -> Result<CaptureReport>
    where
        S: CaptureSurface + PageLoader + 'static,
        K: FrameSink + ?Sized,
    {
        info!("making animation of {}...", self.config.url);

        let state = self.config.capture_state()?;
        let total_frames = state.total_frames();
        let mut scheduler = Scheduler::new(surface.clone(), state);

        scheduler.get_ready().await?;
        surface.open_url(&self.config.url).await?;

        let (screenshoter, stream) = Screenshoter::new(surface);
        let director = Director::new(&mut scheduler, &screenshoter);

        let result = tokio::try_join!(director.run(), drain(stream, sink));
        scheduler.reset();

        match result {
            Ok((frames_captured, frames_written)) => {
                info!("done! {} frames captured, {} written", frames_captured, frames_written);
                Ok(CaptureReport {
                    total_frames,
                    frames_captured,
                    frames_written,
                })
            }
            Err(err) => {
                error!("animation capture failed: {}", err);
                Err(err)
            }
        }
    }
}
