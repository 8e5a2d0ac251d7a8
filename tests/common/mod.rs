//! Scripted capture surface driven by tokio's paused clock.

#![allow(dead_code)]

use animcap::surface::{AnimationControl, ImageSource, PageLoader};
use animcap::{Error, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Pause,
    Resume,
    Grab,
    Open(String),
}

#[derive(Default)]
struct Clock {
    running_since: Option<Instant>,
    animation_ms: f64,
    calls: usize,
    grabs: usize,
}

/// Fake renderer with an animation clock.
///
/// The clock runs from the start of a resume command until the end of the
/// following pause command, so command latency counts as animation time.
pub struct FakeSurface {
    latencies: Vec<u64>,
    missing_at: Option<usize>,
    clock: Mutex<Clock>,
    events: Mutex<Vec<Event>>,
    captured_at: Mutex<Vec<f64>>,
}

impl FakeSurface {
    /// Every pause/resume takes `latency_ms`.
    pub fn new(latency_ms: u64) -> Self {
        Self::with_latencies(vec![latency_ms])
    }

    /// Pause/resume calls cycle through `latencies`.
    pub fn with_latencies(latencies: Vec<u64>) -> Self {
        Self {
            latencies,
            missing_at: None,
            clock: Mutex::new(Clock::default()),
            events: Mutex::new(Vec::new()),
            captured_at: Mutex::new(Vec::new()),
        }
    }

    /// The `n`th grab (1-based) fails with `ElementNotFound`.
    pub fn missing_at(mut self, n: usize) -> Self {
        self.missing_at = Some(n);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    /// Animation time (ms) at which each image was grabbed.
    pub fn captured_at(&self) -> Vec<f64> {
        self.captured_at.lock().unwrap().clone()
    }

    fn next_latency(&self) -> Duration {
        let mut clock = self.clock.lock().unwrap();
        let latency = self.latencies[clock.calls % self.latencies.len()];
        clock.calls += 1;
        Duration::from_millis(latency)
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl AnimationControl for FakeSurface {
    async fn pause(&self) -> Result<Duration> {
        self.record(Event::Pause);
        let latency = self.next_latency();
        let start = Instant::now();
        tokio::time::sleep(latency).await;

        let mut clock = self.clock.lock().unwrap();
        if let Some(since) = clock.running_since.take() {
            clock.animation_ms += since.elapsed().as_secs_f64() * 1000.0;
        }
        Ok(start.elapsed())
    }

    async fn resume(&self) -> Result<Duration> {
        self.record(Event::Resume);
        let latency = self.next_latency();
        let start = Instant::now();
        tokio::time::sleep(latency).await;

        self.clock.lock().unwrap().running_since = Some(start);
        Ok(start.elapsed())
    }
}

#[async_trait]
impl ImageSource for FakeSurface {
    async fn grab_image(&self) -> Result<Vec<u8>> {
        self.record(Event::Grab);
        let (n, at) = {
            let mut clock = self.clock.lock().unwrap();
            clock.grabs += 1;
            (clock.grabs, clock.animation_ms)
        };

        tokio::time::sleep(Duration::from_millis(3)).await;

        if self.missing_at == Some(n) {
            return Err(Error::ElementNotFound("#root".into()));
        }

        self.captured_at.lock().unwrap().push(at);
        Ok(format!("frame-{}", n).into_bytes())
    }
}

#[async_trait]
impl PageLoader for FakeSurface {
    async fn open_url(&self, url: &str) -> Result<()> {
        self.record(Event::Open(url.to_string()));
        Ok(())
    }
}
