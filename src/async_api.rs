use crate::surface::{timed, AnimationControl, ImageSource, PageLoader};
use crate::{cdp, CaptureConfig, Error, Result, TargetSelector};
use async_trait::async_trait;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

enum Command {
    OpenUrl(String, oneshot::Sender<Result<()>>),
    SetPlaybackRate(f64, oneshot::Sender<Result<()>>),
    Screenshot(TargetSelector, oneshot::Sender<Result<Vec<u8>>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly browser abstraction backed by a dedicated worker thread.
///
/// The worker thread owns a synchronous `CdpPage` and executes commands sent
/// from async tasks, so callers get an async interface without the CDP
/// client having to be `Send` across threads. Commands are executed one at a
/// time in the order they were sent.
#[derive(Clone)]
pub struct Browser {
    cmd_tx: Sender<Command>,
    target: TargetSelector,
    speed: f64,
}

/// A handle to the capture page. Implements the capture capabilities, so it
/// can be handed straight to a [`Studio`](crate::Studio).
#[derive(Clone)]
pub struct Page {
    cmd_tx: Sender<Command>,
    target: TargetSelector,
    speed: f64,
}

impl Browser {
    /// Create a new browser (spawns a background thread that owns the page).
    pub async fn new(config: CaptureConfig) -> Result<Self> {
        let target = config.target.clone();
        let speed = config.effective_speed();

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx): (oneshot::Sender<Result<()>>, oneshot::Receiver<Result<()>>) =
            oneshot::channel();

        thread::spawn(move || {
            // Initialize the page on the worker thread
            let page = match cdp::CdpPage::launch(&config) {
                Ok(p) => p,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            let _ = init_tx.send(Ok(()));

            // Command loop
            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::OpenUrl(url, resp) => {
                        let _ = resp.send(page.open_url(&url));
                    }
                    Command::SetPlaybackRate(rate, resp) => {
                        let _ = resp.send(page.set_playback_rate(rate));
                    }
                    Command::Screenshot(target, resp) => {
                        let _ = resp.send(page.screenshot_element(&target));
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(page.close());
                        break;
                    }
                }
            }
        });

        // Wait for the worker to report initialization success or failure
        let init_res = init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))?;
        init_res?;

        Ok(Self {
            cmd_tx,
            target,
            speed,
        })
    }

    /// Open a page handle backed by the same worker thread.
    pub async fn new_page(&self) -> Result<Page> {
        Ok(Page {
            cmd_tx: self.cmd_tx.clone(),
            target: self.target.clone(),
            speed: self.speed,
        })
    }

    /// Shutdown the background worker and close the browser.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Close(tx));
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }
}

impl Page {
    /// Navigate to a URL
    pub async fn goto(&self, url: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::OpenUrl(url.to_string(), tx));
        rx.await
            .map_err(|e| Error::Other(format!("Goto canceled: {}", e)))?
    }

    /// Set the animation playback rate (0 pauses).
    pub async fn set_playback_rate(&self, rate: f64) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::SetPlaybackRate(rate, tx));
        rx.await
            .map_err(|e| Error::Control(format!("Playback rate change canceled: {}", e)))?
    }

    /// Screenshot the configured target element as PNG.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Screenshot(self.target.clone(), tx));
        rx.await
            .map_err(|e| Error::Capture(format!("Screenshot canceled: {}", e)))?
    }

    async fn timed_rate(&self, rate: f64) -> Result<Duration> {
        let (res, latency) = timed(self.set_playback_rate(rate)).await;
        res.map(|_| latency)
    }
}

#[async_trait]
impl AnimationControl for Page {
    async fn pause(&self) -> Result<Duration> {
        self.timed_rate(0.0).await
    }

    async fn resume(&self) -> Result<Duration> {
        self.timed_rate(self.speed).await
    }
}

#[async_trait]
impl ImageSource for Page {
    async fn grab_image(&self) -> Result<Vec<u8>> {
        self.screenshot().await
    }
}

#[async_trait]
impl PageLoader for Page {
    async fn open_url(&self, url: &str) -> Result<()> {
        self.goto(url).await
    }
}
