// Resampler configuration: the recognized option fields, the filter design
// enums, and the quality presets that map a 0..=10 knob onto option tuples.

use crate::{Error, Result};

pub(crate) const DEFAULT_QUALITY: usize = 4;
pub(crate) const DEFAULT_CUBIC_B: f64 = 1.0;
pub(crate) const DEFAULT_CUBIC_C: f64 = 0.0;
pub(crate) const DEFAULT_FILTER_MODE_THRESHOLD: u32 = 1_048_576;
pub(crate) const DEFAULT_FILTER_OVERSAMPLE: u32 = 8;
pub(crate) const DEFAULT_MAX_PHASE_ERROR: f64 = 0.1;

/// Filter design method, cheapest to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Nearest,
    Linear,
    Cubic,
    BlackmanNuttall,
    Kaiser,
}

/// Coefficient storage strategy. `Full` keeps one quantized row per output
/// phase; `Interpolated` keeps `oversample` rows and reconstructs phases in
/// between. `Auto` picks whichever needs fewer rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Interpolated,
    Full,
    #[default]
    Auto,
}

/// How between-row coefficients are reconstructed in interpolated mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterInterpolation {
    None,
    Linear,
    #[default]
    Cubic,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    /// Samples are passed as one buffer per channel instead of interleaved.
    pub non_interleaved: bool,
}

/// The option bag. Every field is optional; unset fields fall back to the
/// per-method defaults when the filter is designed.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Normalized passband edge, 1.0 = Nyquist.
    pub cutoff: Option<f64>,
    /// Multiplier applied to the cutoff when downsampling.
    pub down_cutoff_factor: Option<f64>,
    /// Kaiser stopband suppression in dB.
    pub stop_attenuation: Option<f64>,
    /// Kaiser transition width, normalized.
    pub transition_bandwidth: Option<f64>,
    pub cubic_b: Option<f64>,
    pub cubic_c: Option<f64>,
    /// Override the designed tap count.
    pub n_taps: Option<u32>,
    pub filter_mode: Option<FilterMode>,
    /// Reserved, advisory.
    pub filter_mode_threshold: Option<u32>,
    pub filter_interpolation: Option<FilterInterpolation>,
    /// Number of precomputed phase rows in interpolated mode; power of two.
    pub filter_oversample: Option<u32>,
    /// Tolerated phase error when shrinking the phase table via partial
    /// GCD reduction. ~0 forces exact reduction.
    pub max_phase_error: Option<f64>,
}

pub(crate) struct KaiserQuality {
    pub cutoff: f64,
    pub down_cutoff_factor: f64,
    pub stop_attenuation: f64,
    pub transition_bandwidth: f64,
}

pub(crate) const KAISER_QUALITIES: [KaiserQuality; 11] = [
    KaiserQuality { cutoff: 0.860, down_cutoff_factor: 0.96511, stop_attenuation: 60.0, transition_bandwidth: 0.7 }, // 8 taps
    KaiserQuality { cutoff: 0.880, down_cutoff_factor: 0.96591, stop_attenuation: 65.0, transition_bandwidth: 0.29 }, // 16 taps
    KaiserQuality { cutoff: 0.910, down_cutoff_factor: 0.96923, stop_attenuation: 70.0, transition_bandwidth: 0.145 }, // 32 taps
    KaiserQuality { cutoff: 0.920, down_cutoff_factor: 0.97600, stop_attenuation: 80.0, transition_bandwidth: 0.105 }, // 48 taps
    KaiserQuality { cutoff: 0.940, down_cutoff_factor: 0.97979, stop_attenuation: 85.0, transition_bandwidth: 0.087 }, // 64 taps, default
    KaiserQuality { cutoff: 0.940, down_cutoff_factor: 0.98085, stop_attenuation: 95.0, transition_bandwidth: 0.077 }, // 80 taps
    KaiserQuality { cutoff: 0.945, down_cutoff_factor: 0.99471, stop_attenuation: 100.0, transition_bandwidth: 0.068 }, // 96 taps
    KaiserQuality { cutoff: 0.950, down_cutoff_factor: 1.0, stop_attenuation: 105.0, transition_bandwidth: 0.055 }, // 128 taps
    KaiserQuality { cutoff: 0.960, down_cutoff_factor: 1.0, stop_attenuation: 110.0, transition_bandwidth: 0.045 }, // 160 taps
    KaiserQuality { cutoff: 0.968, down_cutoff_factor: 1.0, stop_attenuation: 115.0, transition_bandwidth: 0.039 }, // 192 taps
    KaiserQuality { cutoff: 0.975, down_cutoff_factor: 1.0, stop_attenuation: 120.0, transition_bandwidth: 0.0305 }, // 256 taps
];

pub(crate) struct BlackmanQuality {
    pub n_taps: u32,
    pub cutoff: f64,
}

pub(crate) const BLACKMAN_QUALITIES: [BlackmanQuality; 11] = [
    BlackmanQuality { n_taps: 8, cutoff: 0.5 },
    BlackmanQuality { n_taps: 16, cutoff: 0.6 },
    BlackmanQuality { n_taps: 24, cutoff: 0.72 },
    BlackmanQuality { n_taps: 32, cutoff: 0.8 },
    BlackmanQuality { n_taps: 48, cutoff: 0.85 }, // default
    BlackmanQuality { n_taps: 64, cutoff: 0.90 },
    BlackmanQuality { n_taps: 80, cutoff: 0.92 },
    BlackmanQuality { n_taps: 96, cutoff: 0.933 },
    BlackmanQuality { n_taps: 128, cutoff: 0.950 },
    BlackmanQuality { n_taps: 148, cutoff: 0.955 },
    BlackmanQuality { n_taps: 160, cutoff: 0.960 },
];

pub(crate) const OVERSAMPLE_QUALITIES: [u32; 11] = [4, 4, 4, 8, 8, 16, 16, 16, 16, 32, 32];

impl Options {
    /// Build the option tuple for a quality preset, 0 (fastest) through
    /// 10 (best). The rates only matter for Kaiser, whose preset cutoff is
    /// scaled down when downsampling.
    pub fn for_quality(method: Method, quality: u32, in_rate: u32, out_rate: u32) -> Result<Options> {
        if quality > 10 {
            return Err(Error::InvalidArgument(format!(
                "quality must be 0..=10, got {}",
                quality
            )));
        }
        if in_rate == 0 || out_rate == 0 {
            return Err(Error::InvalidArgument("rates must be positive".into()));
        }

        let q = quality as usize;
        let mut opts = Options::default();
        match method {
            Method::Nearest => {}
            Method::Linear => {
                opts.n_taps = Some(2);
            }
            Method::Cubic => {
                opts.n_taps = Some(4);
                opts.cubic_b = Some(DEFAULT_CUBIC_B);
                opts.cubic_c = Some(DEFAULT_CUBIC_C);
            }
            Method::BlackmanNuttall => {
                let map = &BLACKMAN_QUALITIES[q];
                opts.n_taps = Some(map.n_taps);
                opts.cutoff = Some(map.cutoff);
            }
            Method::Kaiser => {
                let map = &KAISER_QUALITIES[q];
                let mut cutoff = map.cutoff;
                if out_rate < in_rate {
                    cutoff *= map.down_cutoff_factor;
                }
                opts.cutoff = Some(cutoff);
                opts.stop_attenuation = Some(map.stop_attenuation);
                opts.transition_bandwidth = Some(map.transition_bandwidth);
            }
        }
        opts.filter_oversample = Some(OVERSAMPLE_QUALITIES[q]);
        Ok(opts)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(ov) = self.filter_oversample {
            if ov == 0 || !ov.is_power_of_two() {
                return Err(Error::InvalidArgument(format!(
                    "filter oversample must be a power of two, got {}",
                    ov
                )));
            }
        }
        if let Some(n) = self.n_taps {
            if n == 0 {
                return Err(Error::InvalidArgument("tap count must be positive".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_out_of_range_is_rejected() {
        assert!(Options::for_quality(Method::Kaiser, 11, 48000, 44100).is_err());
        assert!(Options::for_quality(Method::Kaiser, 4, 0, 44100).is_err());
    }

    #[test]
    fn kaiser_preset_scales_cutoff_when_downsampling() {
        let up = Options::for_quality(Method::Kaiser, 4, 44100, 48000).unwrap();
        let down = Options::for_quality(Method::Kaiser, 4, 48000, 44100).unwrap();
        assert_eq!(up.cutoff, Some(0.940));
        assert_eq!(down.cutoff, Some(0.940 * 0.97979));
        assert_eq!(up.filter_oversample, Some(8));
    }

    #[test]
    fn presets_only_fill_method_fields() {
        let o = Options::for_quality(Method::Nearest, 0, 48000, 48000).unwrap();
        assert!(o.cutoff.is_none());
        assert!(o.n_taps.is_none());
        assert_eq!(o.filter_oversample, Some(4));
    }

    #[test]
    fn oversample_must_be_a_power_of_two() {
        let mut o = Options::default();
        o.filter_oversample = Some(12);
        assert!(o.validate().is_err());
        o.filter_oversample = Some(16);
        assert!(o.validate().is_ok());
    }
}
