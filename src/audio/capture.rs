//! cpal capture thread.
//!
//! Opens the input device at 48kHz (10ms hardware chunks) when the
//! denoiser is active, 16kHz otherwise, falling back to the device's
//! default configuration when the preferred rate is refused. The DSP
//! pipeline self-adapts through its resamplers, so consumers always
//! see 16kHz regardless of what the hardware granted.

use crate::audio::dsp::FramePipeline;
use crate::audio::{
    AudioFrame, DENOISE_SAMPLE_RATE, EnqueueOutcome, PIPELINE_SAMPLE_RATE, try_enqueue,
};
use crate::config::AudioConfig;
use crate::error::{AssistantError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Hardware chunk when capturing at the denoiser rate: 10ms at 48kHz.
const DENOISE_HW_CHUNK: u32 = 480;

/// Thread body: open the stream, report readiness, then hold the stream
/// alive until the stop sender is dropped.
pub(crate) fn run(
    config: AudioConfig,
    frames: mpsc::Sender<AudioFrame>,
    ready: oneshot::Sender<Result<()>>,
    stop: std::sync::mpsc::Receiver<()>,
) {
    let stream = match open_stream(&config, frames) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(AssistantError::Audio(format!(
            "failed to start input stream: {e}"
        ))));
        return;
    }

    let _ = ready.send(Ok(()));

    // Parked until AudioSource::stop drops its end.
    let _ = stop.recv();
    drop(stream);
}

/// Open the capture stream, preferring the DSP-friendly rate and falling
/// back to whatever the device reports as its default.
fn open_stream(config: &AudioConfig, frames: mpsc::Sender<AudioFrame>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = select_device(&host, config.input_device_index)?;

    let device_name = match device.description() {
        Ok(d) => d.name().to_owned(),
        Err(_) => "<unknown>".into(),
    };
    info!("using input device: {device_name}");

    let denoise = config.denoise && cfg!(feature = "denoise");
    if config.denoise && !denoise {
        warn!("denoise requested but the denoise feature is not compiled in");
    }

    let (preferred_rate, preferred_chunk) = if denoise {
        (DENOISE_SAMPLE_RATE, DENOISE_HW_CHUNK)
    } else {
        (PIPELINE_SAMPLE_RATE, config.chunk_size as u32)
    };

    match build_stream(
        &device,
        config,
        preferred_rate,
        config.channels,
        cpal::BufferSize::Fixed(preferred_chunk),
        denoise,
        frames.clone(),
    ) {
        Ok(stream) => {
            info!("input stream opened at preferred rate: {preferred_rate}Hz");
            Ok(stream)
        }
        Err(e) => {
            let default_config = device.default_input_config().map_err(|err| {
                AssistantError::Audio(format!("no default input config: {err}"))
            })?;
            let fallback_rate = default_config.sample_rate();
            let fallback_channels = default_config.channels();
            warn!(
                "preferred {preferred_rate}Hz unsupported ({e}), \
                 falling back to device rate: {fallback_rate}Hz"
            );
            build_stream(
                &device,
                config,
                fallback_rate,
                fallback_channels,
                cpal::BufferSize::Default,
                denoise,
                frames,
            )
        }
    }
}

/// Pick the configured input device, or the system default.
fn select_device(host: &cpal::Host, index: Option<usize>) -> Result<cpal::Device> {
    match index {
        Some(idx) => host
            .input_devices()
            .map_err(|e| AssistantError::Audio(format!("cannot enumerate devices: {e}")))?
            .nth(idx)
            .ok_or_else(|| AssistantError::Audio(format!("no input device at index {idx}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| AssistantError::Audio("no default input device".into())),
    }
}

/// Build the input stream whose callback runs the DSP pipeline and
/// enqueues complete frames.
fn build_stream(
    device: &cpal::Device,
    config: &AudioConfig,
    rate: u32,
    channels: u16,
    buffer_size: cpal::BufferSize,
    denoise: bool,
    frames: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream> {
    let stream_config = cpal::StreamConfig {
        channels,
        sample_rate: rate,
        buffer_size,
    };

    let mut pipeline = FramePipeline::new(rate, config.chunk_size, denoise);

    // Rate-limited reporting from the callback thread.
    let dropped_full = AtomicU64::new(0);
    let last_report_ms = AtomicU64::new(0);
    let rx_closed = AtomicBool::new(false);

    device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if channels > 1 {
                    to_mono(data, channels)
                } else {
                    data.to_vec()
                };

                for samples in pipeline.process(&mono) {
                    if rx_closed.load(Ordering::Relaxed) {
                        break;
                    }
                    let frame = AudioFrame {
                        samples,
                        captured_at: Instant::now(),
                    };
                    match try_enqueue(&frames, frame) {
                        EnqueueOutcome::Sent => {}
                        EnqueueOutcome::Dropped => {
                            dropped_full.fetch_add(1, Ordering::Relaxed);
                        }
                        EnqueueOutcome::Closed => {
                            rx_closed.store(true, Ordering::Relaxed);
                        }
                    }
                }

                // Keep the logs quiet: one overflow report per 2s window.
                let now_ms = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                let last = last_report_ms.load(Ordering::Relaxed);
                if now_ms.saturating_sub(last) >= 2_000
                    && last_report_ms
                        .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                {
                    let n = dropped_full.swap(0, Ordering::Relaxed);
                    if rx_closed.load(Ordering::Relaxed) {
                        debug!("frame queue closed (consumer stopped)");
                    } else if n > 0 {
                        warn!("frame queue full, dropped {n} frames (last 2s)");
                    }
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| AssistantError::Audio(format!("failed to build input stream: {e}")))
}

/// Average interleaved channels down to mono.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_mono_averages_channels() {
        let stereo = [0.2, 0.4, -0.2, -0.4];
        let mono = to_mono(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] + 0.3).abs() < 1e-6);
    }
}
