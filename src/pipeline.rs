//! Single-slot screenshot pipeline.
//!
//! The producer ([`Screenshoter`] / [`FrameSender`]) and the consumer
//! ([`FrameStream`]) share a bounded channel of capacity one. Every frame
//! carries an acknowledgement that the consumer fires when it takes the frame,
//! and the producer does not return until that happens. The producer is
//! therefore never more than one frame ahead of the consumer, and frames are
//! observed in the order they were captured.

use crate::surface::ImageSource;
use crate::{Error, Result};
use futures::Stream;
use log::{debug, warn};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};

/// One captured image and its position in the pass (starting at 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: u64,
    pub data: Vec<u8>,
}

enum Slot {
    Frame(Frame, oneshot::Sender<()>),
    Abort(String),
}

/// Create a connected producer/consumer pair.
pub fn channel() -> (FrameSender, FrameStream) {
    let (tx, rx) = mpsc::channel(1);
    let (closed, _) = watch::channel(false);

    let sender = FrameSender {
        tx: Mutex::new(Some(tx)),
        closed,
        next_index: AtomicU64::new(0),
    };
    let stream = FrameStream { rx, finished: false };
    (sender, stream)
}

/// Producer half of the pipeline.
pub struct FrameSender {
    tx: Mutex<Option<mpsc::Sender<Slot>>>,
    closed: watch::Sender<bool>,
    next_index: AtomicU64,
}

impl FrameSender {
    fn sender(&self) -> Result<mpsc::Sender<Slot>> {
        let guard = self
            .tx
            .lock()
            .map_err(|_| Error::Other("screenshot pipeline lock poisoned".into()))?;
        guard.clone().ok_or(Error::StreamClosed)
    }

    async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        // An Err means the flag can no longer change; treat it as closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Hand one image to the consumer.
    ///
    /// Waits for the slot to be free, enqueues the image, then waits until
    /// the consumer has taken it. Returns the frame index. Fails with
    /// `StreamClosed` if either side closes the pipeline meanwhile.
    pub async fn send(&self, data: Vec<u8>) -> Result<u64> {
        let tx = self.sender()?;
        let index = self.next_index.fetch_add(1, Ordering::SeqCst) + 1;

        let permit = tokio::select! {
            permit = tx.reserve() => permit.map_err(|_| Error::StreamClosed)?,
            _ = self.wait_closed() => return Err(Error::StreamClosed),
        };

        let (ack_tx, mut ack_rx) = oneshot::channel();
        permit.send(Slot::Frame(Frame { index, data }, ack_tx));
        debug!("frame {} enqueued, waiting for consumer", index);

        tokio::select! {
            biased;
            ack = &mut ack_rx => ack.map_err(|_| Error::StreamClosed)?,
            _ = self.wait_closed() => {
                // Withdraw the frame. The consumer only keeps frames whose
                // ack went through, so a frame acked before this point is
                // still reported as drained.
                ack_rx.close();
                if ack_rx.try_recv().is_err() {
                    debug!("frame {} withdrawn, stream closed", index);
                    return Err(Error::StreamClosed);
                }
            }
        }

        debug!("frame {} drained", index);
        Ok(index)
    }

    /// Put the stream into an error state visible to the consumer, then close.
    pub async fn abort(&self, reason: String) {
        if let Ok(tx) = self.sender() {
            tokio::select! {
                permit = tx.reserve() => {
                    if let Ok(permit) = permit {
                        permit.send(Slot::Abort(reason));
                    }
                }
                _ = self.wait_closed() => {}
            }
        }
        self.close();
    }

    /// Signal end of stream. Pending and later sends fail with `StreamClosed`
    /// and their frames are never delivered.
    pub fn close(&self) {
        match self.tx.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
        self.closed.send_replace(true);
    }
}

impl Drop for FrameSender {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer half of the pipeline. Yields frames in capture order.
pub struct FrameStream {
    rx: mpsc::Receiver<Slot>,
    finished: bool,
}

impl FrameStream {
    /// Wait for the next frame. `None` once the producer closed the stream.
    pub async fn next_frame(&mut self) -> Option<Result<Frame>> {
        while !self.finished {
            match self.rx.recv().await {
                Some(slot) => {
                    if let Some(item) = self.take(slot) {
                        return Some(item);
                    }
                }
                None => self.finished = true,
            }
        }
        None
    }

    /// `None` when the producer withdrew the frame before it was taken.
    fn take(&mut self, slot: Slot) -> Option<Result<Frame>> {
        match slot {
            Slot::Frame(frame, ack) => match ack.send(()) {
                Ok(()) => Some(Ok(frame)),
                Err(()) => {
                    debug!("skipping withdrawn frame {}", frame.index);
                    None
                }
            },
            Slot::Abort(reason) => {
                self.close();
                Some(Err(Error::CaptureAborted(reason)))
            }
        }
    }

    /// Stop consuming. A producer blocked on this stream is released with
    /// `StreamClosed`.
    pub fn close(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.rx.close();

        let mut dropped = 0;
        while let Ok(slot) = self.rx.try_recv() {
            if let Slot::Frame(frame, _ack) = slot {
                warn!("dropping undelivered frame {}", frame.index);
                dropped += 1;
            }
        }
        debug!("screenshot stream closed ({} frames dropped)", dropped);
    }
}

impl Stream for FrameStream {
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        while !self.finished {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(slot)) => {
                    if let Some(item) = self.take(slot) {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(None) => self.finished = true,
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(None)
    }
}

/// Producer that extracts one image per call and pushes it down the pipeline.
pub struct Screenshoter {
    source: Arc<dyn ImageSource>,
    sender: FrameSender,
}

impl Screenshoter {
    pub fn new(source: Arc<dyn ImageSource>) -> (Self, FrameStream) {
        let (sender, stream) = channel();
        (Self { source, sender }, stream)
    }

    /// Take one screenshot and return once the consumer has it.
    ///
    /// A failed extraction aborts the stream; the consumer sees
    /// `CaptureAborted` and no partial frame is delivered.
    pub async fn capture(&self) -> Result<u64> {
        debug!("making screenshot...");
        let data = match self.source.grab_image().await {
            Ok(data) => data,
            Err(err) => {
                warn!("screenshot failed, aborting stream: {}", err);
                self.sender.abort(err.to_string()).await;
                return Err(err);
            }
        };
        self.sender.send(data).await
    }

    pub fn close(&self) {
        self.sender.close();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (tx, mut rx) = channel();

        let producer = async move {
            for i in 0..5u8 {
                tx.send(vec![i]).await.unwrap();
            }
            tx.close();
        };
        let consumer = async move {
            let mut seen = Vec::new();
            while let Some(frame) = rx.next().await {
                seen.push(frame.unwrap());
            }
            seen
        };

        let ((), seen) = tokio::join!(producer, consumer);
        let indices: Vec<u64> = seen.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        assert_eq!(seen[4].data, vec![4]);
    }

    #[tokio::test]
    async fn read_after_close_returns_none() {
        let (tx, mut rx) = channel();
        tx.close();
        assert!(rx.next_frame().await.is_none());
        assert!(rx.next_frame().await.is_none());
        assert!(matches!(tx.send(vec![1]).await, Err(Error::StreamClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn close_withdraws_unacknowledged_frame() {
        let (tx, mut rx) = channel();

        let (sent, ()) = tokio::join!(tx.send(b"frame".to_vec()), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            tx.close();
        });

        assert!(matches!(sent, Err(Error::StreamClosed)));
        // the producer was told the frame failed, so it must not show up
        assert!(rx.next_frame().await.is_none());
        assert!(rx.next_frame().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn withdrawn_frame_is_skipped_by_stream() {
        let (tx, mut rx) = channel();

        let (sent, ()) = tokio::join!(tx.send(vec![1]), async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            tx.close();
        });
        assert!(sent.is_err());
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_consumer_releases_producer() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(matches!(tx.send(vec![1]).await, Err(Error::StreamClosed)));
    }

    #[tokio::test]
    async fn abort_is_visible_to_consumer() {
        let (tx, mut rx) = channel();
        let producer = async {
            tx.abort("boom".into()).await;
        };
        let consumer = async {
            let first = rx.next_frame().await;
            let second = rx.next_frame().await;
            (first, second)
        };
        let ((), (first, second)) = tokio::join!(producer, consumer);
        assert!(matches!(first, Some(Err(Error::CaptureAborted(r))) if r == "boom"));
        assert!(second.is_none());
    }
}
