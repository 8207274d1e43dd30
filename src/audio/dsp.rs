//! Capture-side signal processing.
//!
//! Runs inside the hardware callback thread: resample, denoise,
//! normalize, then cut the stream into fixed-size 16kHz i16 frames.
//! Everything here is allocation-light and never blocks.

use crate::audio::PIPELINE_SAMPLE_RATE;

#[cfg(feature = "denoise")]
use crate::audio::DENOISE_SAMPLE_RATE;
#[cfg(feature = "denoise")]
use nnnoiseless::DenoiseState;

/// Per-stream DSP state: resampling rates, denoiser state, and the
/// pending buffer that re-chunks arbitrary callback sizes into frames.
pub struct FramePipeline {
    source_rate: u32,
    frame_samples: usize,
    pending: Vec<i16>,
    #[cfg(feature = "denoise")]
    denoiser: Option<Box<DenoiseState<'static>>>,
}

impl FramePipeline {
    /// Create a pipeline for a stream captured at `source_rate`.
    ///
    /// `denoise` requests RNNoise suppression; it is honored only when
    /// the `denoise` feature is compiled in.
    #[must_use]
    pub fn new(source_rate: u32, frame_samples: usize, denoise: bool) -> Self {
        #[cfg(not(feature = "denoise"))]
        let _ = denoise;
        Self {
            source_rate,
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 4),
            #[cfg(feature = "denoise")]
            denoiser: if denoise { Some(DenoiseState::new()) } else { None },
        }
    }

    /// Whether the denoiser is active for this stream.
    #[must_use]
    pub fn denoising(&self) -> bool {
        #[cfg(feature = "denoise")]
        {
            self.denoiser.is_some()
        }
        #[cfg(not(feature = "denoise"))]
        {
            false
        }
    }

    /// Push raw mono samples at the source rate; returns any complete
    /// 16kHz frames of `frame_samples` samples.
    pub fn process(&mut self, input: &[f32]) -> Vec<Vec<i16>> {
        let enhanced = self.enhance(input);
        let normalized = normalize_rms(enhanced);

        self.pending
            .extend(normalized.iter().map(|&s| f32_to_i16(s)));

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            frames.push(self.pending.drain(..self.frame_samples).collect());
        }
        frames
    }

    /// Resample/denoise stage. With the denoiser: source → 48kHz →
    /// RNNoise → 16kHz. Without: source → 16kHz directly.
    fn enhance(&mut self, input: &[f32]) -> Vec<f32> {
        #[cfg(feature = "denoise")]
        if let Some(denoiser) = self.denoiser.as_mut() {
            let wide = resample_linear(input, self.source_rate, DENOISE_SAMPLE_RATE);
            let clean = denoise_chunks(denoiser, &wide);
            return resample_linear(&clean, DENOISE_SAMPLE_RATE, PIPELINE_SAMPLE_RATE);
        }
        resample_linear(input, self.source_rate, PIPELINE_SAMPLE_RATE)
    }
}

/// Run full 480-sample (10ms) chunks through RNNoise. The trailing
/// sub-chunk passes through unmodified.
///
/// RNNoise expects samples in the 16-bit range, not normalized floats.
#[cfg(feature = "denoise")]
fn denoise_chunks(denoiser: &mut DenoiseState<'static>, input: &[f32]) -> Vec<f32> {
    let chunk = DenoiseState::FRAME_SIZE;
    let full_chunks = input.len() / chunk;

    let mut output = Vec::with_capacity(input.len());
    let mut scaled = [0.0f32; DenoiseState::FRAME_SIZE];
    let mut clean = [0.0f32; DenoiseState::FRAME_SIZE];

    for i in 0..full_chunks {
        let src = &input[i * chunk..(i + 1) * chunk];
        for (dst, &s) in scaled.iter_mut().zip(src.iter()) {
            *dst = s * 32767.0;
        }
        denoiser.process_frame(&mut clean, &scaled);
        output.extend(clean.iter().map(|&s| (s / 32767.0).clamp(-1.0, 1.0)));
    }

    output.extend_from_slice(&input[full_chunks * chunk..]);
    output
}

/// Linear-interpolation resampler.
///
/// Output length is `len * dst_rate / src_rate`. For speech this is
/// sufficient quality without an anti-alias filter since speech energy
/// sits below 8kHz.
#[must_use]
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * u64::from(dst_rate) / u64::from(src_rate)) as usize;
    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}

/// RMS threshold below which normalization is skipped. Boosting
/// near-silence would only amplify hiss.
const RMS_SILENCE_FLOOR: f32 = 0.003;
/// Target RMS level after normalization.
const RMS_TARGET: f32 = 0.1;
/// Maximum gain applied by normalization.
const MAX_GAIN: f32 = 10.0;

/// Normalize the buffer toward [`RMS_TARGET`], capped at [`MAX_GAIN`],
/// clipping to [-1, 1]. Near-silent buffers pass through untouched.
#[must_use]
pub fn normalize_rms(mut samples: Vec<f32>) -> Vec<f32> {
    let rms = compute_rms(&samples);
    if rms <= RMS_SILENCE_FLOOR {
        return samples;
    }
    let gain = (RMS_TARGET / rms).min(MAX_GAIN);
    for s in samples.iter_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
    samples
}

/// RMS energy of a sample buffer.
#[must_use]
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Convert a normalized float sample to 16-bit PCM.
#[must_use]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
