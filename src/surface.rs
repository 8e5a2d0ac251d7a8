//! Capability interfaces consumed by the capture core.
//!
//! The scheduler and the screenshot pipeline never see a concrete renderer
//! client. Backends (see `async_api` for headless Chrome) implement these
//! narrow traits instead.

use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Pause/resume control over the page's animations.
///
/// Each call returns the round-trip latency of the command, which the
/// scheduler folds into the next frame's wait.
#[async_trait]
pub trait AnimationControl: Send + Sync {
    /// Freeze every animation on the page.
    async fn pause(&self) -> Result<Duration>;

    /// Let animations run again.
    async fn resume(&self) -> Result<Duration>;
}

/// Source of still images of the capture target.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Grab one image of the target. Fails with `ElementNotFound` when the
    /// target cannot be located.
    async fn grab_image(&self) -> Result<Vec<u8>>;
}

/// Navigation, used once per pass after the animation has been paused.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn open_url(&self, url: &str) -> Result<()>;
}

/// A renderer able to both drive the animation clock and extract images.
pub trait CaptureSurface: AnimationControl + ImageSource {}

impl<T: AnimationControl + ImageSource + ?Sized> CaptureSurface for T {}

/// Await `fut` and report how long it took alongside its output.
pub async fn timed<F, T>(fut: F) -> (T, Duration)
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    (out, start.elapsed())
}

/// Milliseconds as `f64`, the unit used by [`CaptureState`](crate::state::CaptureState).
pub fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
