//! Input level metering for the UI.
//!
//! [`InputLevel::measure`] turns the current analysis window into an RMS
//! value (the magnitude the voice-activity monitor thresholds), a peak, and
//! a small bar envelope for the level meter.
//!
//! ```rust
//! use agnes_voice::audio::InputLevel;
//!
//! let level = InputLevel::measure(&vec![0.5_f32; 1_600], 10);
//! assert_eq!(level.bars.len(), 10);
//! assert!((level.rms - 0.5).abs() < 1e-4);
//! ```

/// Level snapshot of the latest analysis window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputLevel {
    /// Root-mean-square magnitude of the whole window, in `[0.0, 1.0]`.
    pub rms: f32,
    /// Largest absolute sample.
    pub peak: f32,
    /// Per-segment RMS, clamped to `[0.0, 1.0]`, padded with zeros.
    pub bars: Vec<f32>,
}

impl InputLevel {
    pub fn measure(window: &[f32], num_bars: usize) -> Self {
        let rms = rms(window).min(1.0);
        let peak = window.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);

        let mut bars = Vec::with_capacity(num_bars);
        if num_bars > 0 && !window.is_empty() {
            let chunk_size = (window.len() / num_bars).max(1);
            bars.extend(
                window
                    .chunks(chunk_size)
                    .take(num_bars)
                    .map(|chunk| self::rms(chunk).min(1.0)),
            );
        }
        bars.resize(num_bars, 0.0);

        Self { rms, peak, bars }
    }
}

/// Root-mean-square of `samples`; `0.0` for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_sq.sqrt()
}
