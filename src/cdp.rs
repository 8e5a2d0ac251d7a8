//! Chrome DevTools Protocol adapter implementation

use crate::{CaptureConfig, Error, Result, TargetSelector};
use anyhow::Context;
use headless_chrome::protocol::cdp::{Animation, Emulation, Page, DOM};
use headless_chrome::browser::tab::Tab;
use headless_chrome::{Browser, LaunchOptions};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// Headless Chrome page used for capture (uses the `headless_chrome` crate)
///
/// This adapter launches a headless Chrome instance and manages a single tab.
/// Animation control goes through `Animation.setPlaybackRate`; a rate of 0
/// freezes every animation on the page.
pub struct CdpPage {
    browser: Browser,
    tab: Arc<Tab>,
    timeout: Duration,
}

impl CdpPage {
    pub fn launch(config: &CaptureConfig) -> Result<Self> {
        // Configure headless Chrome launch options
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        // Launch the browser
        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;

        let timeout = Duration::from_millis(config.timeout_ms);
        prepare_tab(&tab, timeout, config.target.omit_background)?;

        Ok(Self {
            browser,
            tab,
            timeout,
        })
    }

    pub fn open_url(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed (timeout {:?}): {}", self.timeout, e)))?;

        debug!("page opened: {}", url);
        Ok(())
    }

    /// Set the playback rate of every animation on the page.
    pub fn set_playback_rate(&self, rate: f64) -> Result<()> {
        self.tab
            .call_method(Animation::SetPlaybackRate { playback_rate: rate })
            .map_err(|e| Error::Control(format!("Animation.setPlaybackRate({}) failed: {}", rate, e)))?;
        Ok(())
    }

    /// PNG screenshot of the element matched by `target`.
    pub fn screenshot_element(&self, target: &TargetSelector) -> Result<Vec<u8>> {
        let element = self
            .tab
            .find_element(&target.selector)
            .map_err(|_| Error::ElementNotFound(target.selector.clone()))?;

        element
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png)
            .map_err(|e| Error::Capture(format!("Element screenshot failed: {}", e)))
    }

    pub fn close(self) -> Result<()> {
        // Drop explicitly so the child process is terminated promptly.
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}

fn prepare_tab(tab: &Tab, timeout: Duration, omit_background: bool) -> anyhow::Result<()> {
    tab.set_default_timeout(timeout);

    if omit_background {
        tab.call_method(Emulation::SetDefaultBackgroundColorOverride {
            color: Some(DOM::RGBA {
                r: 0,
                g: 0,
                b: 0,
                a: Some(0.0),
            }),
        })
        .context("Failed to clear page background")?;
    }
    Ok(())
}
