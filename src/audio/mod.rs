//! Always-on microphone capture.
//!
//! A hardware callback thread owns the device and the DSP scratch
//! buffers; the event loop pulls uniform 16kHz frames from a bounded
//! queue. The hand-off is a `tokio::sync::mpsc` channel: non-blocking
//! `try_send` on the callback side, awaited `recv` on the loop side.
//! Overflow drops the incoming frame; the DSP work for it is already
//! sunk, so dropping the oldest would only waste more.

pub mod dsp;

#[cfg(feature = "audio-cpal")]
mod capture;

use crate::config::AudioConfig;
use crate::error::Result;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

#[cfg(not(feature = "audio-cpal"))]
use crate::error::AssistantError;

/// Sample rate delivered to every consumer.
pub const PIPELINE_SAMPLE_RATE: u32 = 16_000;
/// Rate the denoiser operates at (480-sample / 10ms chunks).
pub const DENOISE_SAMPLE_RATE: u32 = 48_000;

/// One 80ms block of 16-bit mono PCM at 16kHz.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM samples; canonical length is the configured chunk size (1280).
    pub samples: Vec<i16>,
    /// When the frame left the DSP pipeline.
    pub captured_at: Instant,
}

/// Outcome of a non-blocking enqueue from the callback thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Frame is in the queue.
    Sent,
    /// Queue full; the incoming frame was dropped.
    Dropped,
    /// Consumer is gone.
    Closed,
}

/// Enqueue a frame without blocking the hardware thread.
pub(crate) fn try_enqueue(tx: &mpsc::Sender<AudioFrame>, frame: AudioFrame) -> EnqueueOutcome {
    match tx.try_send(frame) {
        Ok(()) => EnqueueOutcome::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Dropped,
        Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
    }
}

/// Handle to a running capture stream.
struct RunningCapture {
    rx: mpsc::Receiver<AudioFrame>,
    /// Dropping this ends the capture thread.
    stop_tx: std::sync::mpsc::Sender<()>,
    thread: std::thread::JoinHandle<()>,
}

/// Microphone frame source.
///
/// `start`/`stop` are idempotent; each `start` opens the device with a
/// fresh, empty queue. `read_frame` suspends while running and returns
/// `None` only after `stop`.
pub struct AudioSource {
    config: AudioConfig,
    running: Option<RunningCapture>,
}

impl AudioSource {
    /// Create a stopped source.
    #[must_use]
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    /// Whether the capture thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Open the device and begin producing frames. No-op when already
    /// running.
    ///
    /// # Errors
    ///
    /// Returns an error if no input device can be opened.
    #[cfg(feature = "audio-cpal")]
    pub async fn start(&mut self) -> Result<()> {
        use crate::error::AssistantError;

        if self.running.is_some() {
            return Ok(());
        }

        let (frame_tx, frame_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        let config = self.config.clone();
        let thread = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || capture::run(config, frame_tx, ready_tx, stop_rx))
            .map_err(|e| AssistantError::Audio(format!("cannot spawn capture thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.running = Some(RunningCapture {
                    rx: frame_rx,
                    stop_tx,
                    thread,
                });
                info!("audio capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AssistantError::Audio(
                    "capture thread exited before reporting readiness".into(),
                ))
            }
        }
    }

    /// Capture is unavailable in builds without the `audio-cpal` feature.
    #[cfg(not(feature = "audio-cpal"))]
    pub async fn start(&mut self) -> Result<()> {
        Err(AssistantError::Audio(
            "built without the audio-cpal feature".into(),
        ))
    }

    /// Halt production and close the device, dropping in-flight frames.
    /// No-op when already stopped.
    pub fn stop(&mut self) {
        if let Some(run) = self.running.take() {
            let RunningCapture {
                rx,
                stop_tx,
                thread,
            } = run;
            drop(stop_tx);
            drop(rx);
            let _ = thread.join();
            info!("audio capture stopped");
        }
    }

    /// Next frame, in capture order. Suspends while the queue is empty;
    /// yields `None` only once the source is stopped.
    pub async fn read_frame(&mut self) -> Option<AudioFrame> {
        match self.running.as_mut() {
            Some(run) => run.rx.recv().await,
            None => None,
        }
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: i16) -> AudioFrame {
        AudioFrame {
            samples: vec![tag; 4],
            captured_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn enqueue_drops_newest_on_overflow() {
        let (tx, mut rx) = mpsc::channel(2);
        assert_eq!(try_enqueue(&tx, frame(1)), EnqueueOutcome::Sent);
        assert_eq!(try_enqueue(&tx, frame(2)), EnqueueOutcome::Sent);
        // Queue full: the incoming frame is the one dropped.
        assert_eq!(try_enqueue(&tx, frame(3)), EnqueueOutcome::Dropped);

        assert_eq!(rx.recv().await.unwrap().samples[0], 1);
        assert_eq!(rx.recv().await.unwrap().samples[0], 2);
    }

    #[tokio::test]
    async fn consumer_sees_fifo_subsequence() {
        let (tx, mut rx) = mpsc::channel(8);
        let produced: Vec<i16> = (0..50).collect();
        let mut received = Vec::new();

        for &tag in &produced {
            try_enqueue(&tx, frame(tag));
            // Drain opportunistically, as the loop does.
            while let Ok(f) = rx.try_recv() {
                received.push(f.samples[0]);
            }
        }
        drop(tx);
        while let Some(f) = rx.recv().await {
            received.push(f.samples[0]);
        }

        // Received frames are a subsequence of the produced order.
        let mut it = produced.iter();
        for tag in &received {
            assert!(
                it.any(|p| p == tag),
                "frame {tag} out of order in {received:?}"
            );
        }
    }

    #[tokio::test]
    async fn enqueue_reports_closed_consumer() {
        let (tx, rx) = mpsc::channel(2);
        drop(rx);
        assert_eq!(try_enqueue(&tx, frame(1)), EnqueueOutcome::Closed);
    }

    #[tokio::test]
    async fn stopped_source_yields_none() {
        let mut source = AudioSource::new(AudioConfig::default());
        assert!(!source.is_running());
        assert!(source.read_frame().await.is_none());
        // stop on a stopped source is a no-op
        source.stop();
    }
}
