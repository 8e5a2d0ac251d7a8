//! animcap: frame-accurate animation capture
//!
//! Drives a remote, animation-capable renderer through a fixed-length
//! animation and extracts one still image per logical frame. Pause/resume
//! commands and image extraction have unpredictable latency, so the
//! [`Scheduler`](scheduler::Scheduler) measures every control round trip and
//! carries the timing error into the next frame's wait. Captured frames then
//! represent evenly spaced points in animation time rather than in
//! wall-clock time.
//!
//! # Features
//!
//! - **Core** (always on): timing state, scheduler, single-slot screenshot
//!   pipeline, capture loop and output sinks. Backends plug in through the
//!   traits in [`surface`].
//! - **CDP Backend** (`cdp`): headless Chrome via the Chrome DevTools Protocol
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # async fn run() -> animcap::Result<()> {
//! use animcap::{CaptureConfig, TargetSelector};
//! use animcap::sink::FsSink;
//!
//! let config = CaptureConfig {
//!     url: "file:///tmp/animation.html".to_string(),
//!     target: TargetSelector::new("#root"),
//!     duration_ms: 1000.0,
//!     fps: Some(30.0),
//!     ..Default::default()
//! };
//!
//! let mut sink = FsSink::new("./screenshots");
//! let report = animcap::capture_animation(config, &mut sink).await?;
//! println!("captured {} frames", report.frames_written);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod error;
pub use error::{Error, Result};

pub mod director;
pub mod logs;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod state;
pub mod studio;
pub mod surface;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly browser API (worker-thread backed)
#[cfg(feature = "cdp")]
pub mod async_api;

#[cfg(feature = "cdp")]
pub use async_api::Browser;
pub use logs::{LogCollector, LogEntry};
pub use pipeline::{Frame, FrameStream, Screenshoter};
pub use scheduler::Scheduler;
pub use state::CaptureState;
pub use studio::{CaptureReport, Studio};
pub use surface::{AnimationControl, CaptureSurface, ImageSource, PageLoader};

/// Configuration for one capture pass
///
/// Timing fields mirror [`CaptureState::new`]: `fps` defaults to 30, `delay_ms`
/// to 0 and `speed` to `30 / fps`.
///
/// # Examples
///
/// ```
/// let cfg = animcap::CaptureConfig::default();
/// assert_eq!(cfg.effective_fps(), 30.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Page to load
    pub url: String,
    /// Element to screenshot
    pub target: TargetSelector,
    /// Length of the animation to capture, in milliseconds
    pub duration_ms: f64,
    /// Output frame rate
    pub fps: Option<f64>,
    /// Animation time to skip before the first frame, in milliseconds
    pub delay_ms: Option<f64>,
    /// Playback rate used while the animation runs between captures
    pub speed: Option<f64>,
    /// Viewport dimensions
    pub viewport: Viewport,
    /// Timeout for page loads in milliseconds
    pub timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            target: TargetSelector::default(),
            duration_ms: 1000.0,
            fps: None,
            delay_ms: None,
            speed: None,
            viewport: Viewport::default(),
            timeout_ms: 30000,
        }
    }
}

impl CaptureConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("failed to read '{}': {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn effective_fps(&self) -> f64 {
        self.fps.unwrap_or(state::DEFAULT_FPS)
    }

    pub fn effective_speed(&self) -> f64 {
        self.speed.unwrap_or(state::DEFAULT_FPS / self.effective_fps())
    }

    /// Timing record for this configuration.
    pub fn capture_state(&self) -> Result<CaptureState> {
        CaptureState::new(self.duration_ms, self.fps, self.delay_ms, self.speed)
    }

    /// Check the whole configuration before any browser work starts.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::ConfigError("url is required".into()));
        }
        if self.target.selector.trim().is_empty() {
            return Err(Error::ConfigError("target selector is required".into()));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError("viewport width/height must be non-zero".into()));
        }
        self.capture_state().map(|_| ())
    }
}

/// Element to capture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSelector {
    /// CSS selector of the element
    pub selector: String,
    /// Capture with a transparent page background
    pub omit_background: bool,
}

impl TargetSelector {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            omit_background: false,
        }
    }
}

impl Default for TargetSelector {
    fn default() -> Self {
        Self::new("body")
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Capture `config` with headless Chrome into `sink`.
#[cfg(feature = "cdp")]
pub async fn capture_animation<K>(config: CaptureConfig, sink: &mut K) -> Result<CaptureReport>
where
    K: sink::FrameSink + ?Sized,
{
    config.validate()?;
    let browser = Browser::new(config.clone()).await?;
    let page = std::sync::Arc::new(browser.new_page().await?);
    let studio = Studio::new(config);
    let result = studio.make_animation(page, sink).await;
    let closed = browser.close().await;
    let report = result?;
    closed?;
    Ok(report)
}
