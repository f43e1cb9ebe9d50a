/*
 Copyright (c) 2026 pcmrate contributors

 This file is part of pcmrate

 pcmrate is free software: you can redistribute it and/or modify it
 under the terms of the GNU General Public License as published by the
 Free Software Foundation, either version 3 of the License, or
 (at your option) any later version.

 pcmrate is distributed in the hope that it will be useful, but
 WITHOUT ANY WARRANTY; without even the implied warranty of
 MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 GNU General Public License for more details.
 You should have received a copy of the GNU General Public License
 along with pcmrate. If not, see <https://www.gnu.org/licenses/>.
*/

use log::{debug, trace};
use std::f64::consts::PI;

use crate::coeff::CoeffStore;
use crate::kernels::{self, Kernels};
use crate::options::{
    BLACKMAN_QUALITIES, DEFAULT_CUBIC_B, DEFAULT_CUBIC_C, DEFAULT_FILTER_MODE_THRESHOLD,
    DEFAULT_FILTER_OVERSAMPLE, DEFAULT_MAX_PHASE_ERROR, DEFAULT_QUALITY, KAISER_QUALITIES,
};
use crate::sample::Sample;
use crate::window::TapWindow;
use crate::{Error, FilterInterpolation, FilterMode, Flags, Method, Options, Result};

type ResampleFn<S> = fn(&mut Resampler<S>, &mut [&mut [S]], usize) -> usize;
type DeinterleaveFn<S> = fn(&mut Resampler<S>, Option<&[&[S]]>, usize);

/// Streaming polyphase FIR sample-rate converter for one PCM format.
///
/// A resampler consumes frames at `in_rate` and produces frames at
/// `out_rate`, keeping enough history between calls that consecutive
/// outputs stitch seamlessly. Interleaved callers pass a single buffer in
/// `input[0]`/`output[0]`; non-interleaved callers pass one buffer per
/// channel. All owned buffers are released on drop.
pub struct Resampler<S: Sample> {
    method: Method,
    flags: Flags,
    channels: usize,
    options: Options,

    in_rate: u32,
    out_rate: u32,
    samp_inc: u32,
    samp_frac: u32,
    samp_index: usize,
    samp_phase: u32,
    skip: usize,

    cutoff: f64,
    kaiser_beta: f64,
    cubic_b: f64,
    cubic_c: f64,

    filter_mode: FilterMode,
    filter_threshold: u32,
    filter_interpolation: FilterInterpolation,
    oversample: u32,

    n_taps: usize,
    coeff: CoeffStore<S>,
    /// FULL-mode memo: lazily designed row per output phase.
    phase_rows: Vec<Option<usize>>,
    tmpcoeff: Vec<f64>,
    qtaps: Vec<S>,

    kernels: Kernels<S>,
    resample_fn: ResampleFn<S>,
    deinterleave_fn: DeinterleaveFn<S>,

    blocks: usize,
    inc: usize,
    ostride: usize,

    sbuf: Vec<Vec<S>>,
    samples_len: usize,
    samples_avail: usize,
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn round_up_8(n: usize) -> usize {
    (n + 7) & !7
}

impl<S: Sample> Resampler<S> {
    /// Create a resampler converting `in_rate` to `out_rate` for `channels`
    /// channels of format `S`.
    pub fn new(
        method: Method,
        flags: Flags,
        channels: usize,
        in_rate: u32,
        out_rate: u32,
        options: Options,
    ) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidArgument("channel count must be positive".into()));
        }
        if in_rate == 0 || out_rate == 0 {
            return Err(Error::InvalidArgument("rates must be positive".into()));
        }

        kernels::init();

        let mut r = Resampler {
            method,
            flags,
            channels,
            options: Options::default(),
            in_rate: 0,
            out_rate: 0,
            samp_inc: 0,
            samp_frac: 0,
            samp_index: 0,
            samp_phase: 0,
            skip: 0,
            cutoff: 0.0,
            kaiser_beta: 0.0,
            cubic_b: DEFAULT_CUBIC_B,
            cubic_c: DEFAULT_CUBIC_C,
            filter_mode: FilterMode::Full,
            filter_threshold: DEFAULT_FILTER_MODE_THRESHOLD,
            filter_interpolation: FilterInterpolation::None,
            oversample: 1,
            n_taps: 0,
            coeff: CoeffStore::new(),
            phase_rows: Vec::new(),
            tmpcoeff: Vec::new(),
            qtaps: Vec::new(),
            kernels: Kernels::scalar(),
            resample_fn: resample_none_1::<S>,
            deinterleave_fn: deinterleave_channels::<S>,
            blocks: channels,
            inc: 1,
            ostride: 1,
            sbuf: Vec::new(),
            samples_len: 0,
            samples_avail: 0,
        };

        debug!(
            "method {:?}, format {:?}, channels {}",
            method,
            S::FORMAT,
            channels
        );

        r.apply_update(in_rate, out_rate, Some(&options))?;

        // half of the filter is implicit leading silence
        r.samp_index = 0;
        r.samples_avail = (r.n_taps / 2).saturating_sub(1);

        Ok(r)
    }

    /// Change the conversion rates and/or options mid-stream. A rate of 0
    /// keeps the previous value; `None` options keep the previous bag.
    /// Existing history is recentered when the filter length changes.
    pub fn update(&mut self, in_rate: u32, out_rate: u32, options: Option<&Options>) -> Result<()> {
        self.apply_update(in_rate, out_rate, options)
    }

    fn apply_update(&mut self, in_rate: u32, out_rate: u32, options: Option<&Options>) -> Result<()> {
        if let Some(o) = options {
            o.validate()?;
        }

        let in_rate = if in_rate == 0 { self.in_rate } else { in_rate };
        let out_rate = if out_rate == 0 { self.out_rate } else { out_rate };

        // rescale the current phase to the new output rate
        let samp_phase = if self.out_rate > 0 {
            (self.samp_phase as u64 * out_rate as u64 / self.out_rate as u64) as u32
        } else {
            0
        };

        let mut g = gcd(in_rate, out_rate);

        let max_error = self
            .options
            .max_phase_error
            .unwrap_or(DEFAULT_MAX_PHASE_ERROR);

        if max_error < 1.0e-8 {
            // fold the phase into the reduction so it stays exact
            g = gcd(g, samp_phase);
        } else {
            while g > 1 {
                let ph1 = samp_phase as f64 / out_rate as f64;
                let ph2 = (samp_phase / g) as f64 / (out_rate / g) as f64;
                if (ph1 - ph2).abs() < max_error {
                    break;
                }
                // back off by the smallest prime factor until the induced
                // phase error is tolerable
                let mut factor = 2;
                while g % factor != 0 {
                    factor += 1;
                }
                g /= factor;
                debug!("divide by factor {}, gcd {}", factor, g);
            }
        }

        debug!(
            "phase {}, out_rate {}, in_rate {}, gcd {}",
            samp_phase, out_rate, in_rate, g
        );

        self.samp_phase = samp_phase / g;
        self.in_rate = in_rate / g;
        self.out_rate = out_rate / g;

        if let Some(o) = options {
            self.options = o.clone();
        }

        let old_n_taps = self.n_taps;

        self.calculate_taps();

        debug!(
            "rate {}->{}, taps {}->{}",
            self.in_rate, self.out_rate, old_n_taps, self.n_taps
        );

        if old_n_taps > 0 {
            // recenter existing history on the new filter length; when the
            // filter grows, whatever was in the gap stays there
            let diff = (self.n_taps as isize - old_n_taps as isize) / 2;
            let avail = self.samples_avail;
            let grow = diff.max(0) as usize;
            self.ensure_history(self.n_taps.max(self.samp_index + avail + grow));

            let inc = self.inc;
            let mut soff = self.samp_index * inc;
            let mut doff = soff;
            let mut count = avail * inc;
            if diff < 0 {
                let cut = (-diff) as usize * inc;
                soff += cut;
                count = count.saturating_sub(cut);
            } else {
                doff += diff as usize * inc;
            }
            for buf in &mut self.sbuf {
                if soff + count <= buf.len() && doff + count <= buf.len() {
                    buf.copy_within(soff..soff + count, doff);
                }
            }
            self.samples_avail = (avail as isize + diff).max(0) as usize;
        }
        Ok(())
    }

    fn calculate_kaiser_params(&mut self) {
        let q = &KAISER_QUALITIES[DEFAULT_QUALITY];

        let mut fc = q.cutoff;
        if self.out_rate < self.in_rate {
            fc *= self
                .options
                .down_cutoff_factor
                .unwrap_or(q.down_cutoff_factor);
        }
        let fc = self.options.cutoff.unwrap_or(fc);
        let a = self.options.stop_attenuation.unwrap_or(q.stop_attenuation);
        let tr_bw = self
            .options
            .transition_bandwidth
            .unwrap_or(q.transition_bandwidth);

        trace!("Fc {}, A {}, tr_bw {}", fc, a, tr_bw);

        let beta = if a > 50.0 {
            0.1102 * (a - 8.7)
        } else if a >= 21.0 {
            0.5842 * (a - 21.0).powf(0.4) + 0.07886 * (a - 21.0)
        } else {
            0.0
        };
        // transition width in radians gives the filter order
        let dw = 2.0 * PI * tr_bw;
        let n = ((a - 8.0) / (2.285 * dw)) as i64;

        self.kaiser_beta = beta;
        self.n_taps = n.max(0) as usize + 1;
        self.cutoff = fc;

        trace!(
            "using Beta {} n_taps {} cutoff {}",
            self.kaiser_beta,
            self.n_taps,
            self.cutoff
        );
    }

    fn window(&self) -> TapWindow {
        TapWindow {
            method: self.method,
            n_taps: self.n_taps,
            cutoff: self.cutoff,
            kaiser_beta: self.kaiser_beta,
            cubic_b: self.cubic_b,
            cubic_c: self.cubic_c,
        }
    }

    fn calculate_taps(&mut self) {
        match self.method {
            Method::Nearest => {
                self.n_taps = 2;
            }
            Method::Linear => {
                self.n_taps = self.options.n_taps.unwrap_or(2) as usize;
            }
            Method::Cubic => {
                self.n_taps = self.options.n_taps.unwrap_or(4) as usize;
                self.cubic_b = self.options.cubic_b.unwrap_or(DEFAULT_CUBIC_B);
                self.cubic_c = self.options.cubic_c.unwrap_or(DEFAULT_CUBIC_C);
            }
            Method::BlackmanNuttall => {
                let q = &BLACKMAN_QUALITIES[DEFAULT_QUALITY];
                self.n_taps = self.options.n_taps.unwrap_or(q.n_taps) as usize;
                self.cutoff = self.options.cutoff.unwrap_or(q.cutoff);
            }
            Method::Kaiser => self.calculate_kaiser_params(),
        }

        let in_rate = self.in_rate;
        let out_rate = self.out_rate;

        let mut oversample = self
            .options
            .filter_oversample
            .unwrap_or(DEFAULT_FILTER_OVERSAMPLE);

        if out_rate < in_rate {
            // downsampling: narrow the passband and stretch the kernel by
            // the rate ratio, trading oversampling for tap span
            let mut mult: u64 = 2;
            self.cutoff = self.cutoff * out_rate as f64 / in_rate as f64;
            self.n_taps = (self.n_taps as u64 * in_rate as u64 / out_rate as u64) as usize;

            while oversample > 1 {
                if mult * out_rate as u64 >= in_rate as u64 {
                    break;
                }
                mult *= 2;
                oversample >>= 1;
            }
        }
        self.oversample = oversample;

        // only round up the bigger kernels; nearest, linear and cubic want
        // to stay short
        if self.n_taps > 4 {
            self.n_taps = round_up_8(self.n_taps);
        }

        trace!(
            "using n_taps {} cutoff {}, oversample {}",
            self.n_taps,
            self.cutoff,
            oversample
        );

        self.filter_threshold = self
            .options
            .filter_mode_threshold
            .unwrap_or(DEFAULT_FILTER_MODE_THRESHOLD);

        let interpolate = match self.options.filter_mode.unwrap_or(FilterMode::Auto) {
            FilterMode::Interpolated => true,
            FilterMode::Full => false,
            // a full table no bigger than the oversampled one costs nothing
            FilterMode::Auto => out_rate > oversample,
        };

        if interpolate {
            self.filter_mode = FilterMode::Interpolated;
            self.filter_interpolation =
                match self.options.filter_interpolation.unwrap_or_default() {
                    FilterInterpolation::None => FilterInterpolation::Cubic,
                    other => other,
                };
            let mult = match self.filter_interpolation {
                FilterInterpolation::Linear => 2,
                _ => 4,
            };
            let otaps = self.oversample as usize * self.n_taps + mult - 1;

            self.coeff.ensure(otaps, self.oversample as usize, mult);
            self.phase_rows.clear();

            self.tmpcoeff.clear();
            self.tmpcoeff.resize(otaps, 0.0);
            let x = 1.0 - (self.n_taps / 2) as f64;
            let weight = self
                .window()
                .fill(x, otaps, self.oversample, &mut self.tmpcoeff);

            self.qtaps.clear();
            self.qtaps.resize(otaps, S::default());
            S::quantize_taps(
                &self.tmpcoeff,
                weight / self.oversample as f64,
                &mut self.qtaps,
            );
            self.coeff
                .extract_oversampled(&self.qtaps, self.n_taps, self.oversample as usize, mult);
        } else {
            self.filter_mode = FilterMode::Full;
            self.filter_interpolation = FilterInterpolation::None;
            // every row is designed lazily on first use, so any previous
            // memo is dropped wholesale
            self.phase_rows.clear();
            self.phase_rows.resize(out_rate as usize, None);
            self.coeff.ensure(self.n_taps, out_rate as usize, 1);
            self.tmpcoeff.clear();
            self.tmpcoeff.resize(self.n_taps, 0.0);
        }

        self.samp_inc = in_rate / out_rate;
        self.samp_frac = in_rate % out_rate;

        self.ostride = if self.flags.non_interleaved {
            1
        } else {
            self.channels
        };

        self.kernels = kernels::table::<S>();

        if !self.flags.non_interleaved && self.channels == 2 && self.n_taps >= 4 {
            // both channels run in parallel over interleaved history
            self.blocks = 1;
            self.inc = self.channels;
            self.deinterleave_fn = deinterleave_copy::<S>;
            self.resample_fn = match self.filter_interpolation {
                FilterInterpolation::None => resample_none_2::<S>,
                FilterInterpolation::Linear => resample_linear_2::<S>,
                FilterInterpolation::Cubic => resample_cubic_2::<S>,
            };
        } else {
            // each channel is resampled separately
            self.blocks = self.channels;
            self.inc = 1;
            self.deinterleave_fn = deinterleave_channels::<S>;
            self.resample_fn = match self.filter_interpolation {
                FilterInterpolation::None => resample_none_1::<S>,
                FilterInterpolation::Linear => resample_linear_1::<S>,
                FilterInterpolation::Cubic => resample_cubic_1::<S>,
            };
        }
    }

    /// Lazily design and memoize the FULL-mode coefficient row for `phase`.
    fn full_row(&mut self, phase: u32) -> usize {
        let p = phase as usize;
        if let Some(row) = self.phase_rows[p] {
            return row;
        }
        let n = self.n_taps;
        let x = 1.0 - (n / 2) as f64 - phase as f64 / self.out_rate as f64;
        let w = self.window();
        let weight = w.fill(x, n, 1, &mut self.tmpcoeff);
        S::quantize_taps(&self.tmpcoeff[..n], weight, self.coeff.row_mut(p, n));
        self.phase_rows[p] = Some(p);
        p
    }

    #[inline]
    fn advance(&self, samp_index: &mut usize, samp_phase: &mut u32) {
        *samp_index += self.samp_inc as usize;
        *samp_phase += self.samp_frac;
        if *samp_phase >= self.out_rate {
            *samp_phase -= self.out_rate;
            *samp_index += 1;
        }
    }

    /// Locate the interpolated-mode coefficient row and the fractional
    /// position between it and the next, for the current phase.
    #[inline]
    fn interp_row(&self, samp_phase: u32) -> (usize, u32) {
        let pos = samp_phase as u64 * self.oversample as u64;
        let offset = (self.oversample - 1) as usize - (pos / self.out_rate as u64) as usize;
        let frac = (pos % self.out_rate as u64) as u32;
        (offset, frac)
    }

    fn ensure_history(&mut self, need: usize) {
        if self.sbuf.len() != self.blocks {
            self.sbuf = vec![Vec::new(); self.blocks];
            self.samples_len = 0;
        }
        if self.samples_len >= need {
            return;
        }
        trace!("realloc history {} -> {}", self.samples_len, need);
        for buf in &mut self.sbuf {
            buf.resize(need * self.inc, S::default());
        }
        self.samples_len = need;
    }

    /// Resample `in_frames` frames into exactly `out_frames` frames.
    ///
    /// `input`/`output` carry one interleaved buffer, or one buffer per
    /// channel in non-interleaved mode. `None` input pushes silence. The
    /// caller is expected to size the request with [`Resampler::out_frames`];
    /// when not enough input has accumulated the call is a no-op.
    pub fn resample(
        &mut self,
        input: Option<&[&[S]]>,
        in_frames: usize,
        output: &mut [&mut [S]],
        out_frames: usize,
    ) {
        if self.skip >= in_frames {
            // all of this input is discarded by the pending seek
            self.skip -= in_frames;
            return;
        }
        self.samp_index += self.skip;
        self.skip = 0;

        let samples_avail = self.samples_avail;
        self.ensure_history(in_frames + samples_avail);
        let deinterleave = self.deinterleave_fn;
        deinterleave(self, input, in_frames);
        self.samples_avail = samples_avail + in_frames;

        if self.samples_avail < self.n_taps + self.samp_index {
            // not enough samples to start
            return;
        }

        let resample = self.resample_fn;
        let consumed = resample(self, output, out_frames);

        trace!(
            "in {}, avail {}, consumed {}",
            in_frames,
            self.samples_avail,
            consumed
        );

        if consumed > 0 {
            let avail = self.samples_avail;
            if consumed <= avail {
                self.samples_avail = avail - consumed;
            } else {
                // consumed more virtual frames than we had; discard the
                // difference from future input
                self.samples_avail = 0;
                self.skip = consumed - avail;
            }
        }
    }

    /// Number of output frames that become available when `in_frames` more
    /// input frames are pushed.
    pub fn out_frames(&self, in_frames: usize) -> usize {
        let need = self.n_taps + self.samp_index + self.skip;
        let avail = self.samples_avail + in_frames;
        if avail < need {
            return 0;
        }
        let out = (avail - need) as u64 * self.out_rate as u64;
        if out < self.samp_phase as u64 {
            return 0;
        }
        (((out - self.samp_phase as u64) / self.in_rate as u64) + 1) as usize
    }

    /// Number of input frames needed to produce `out_frames` more output
    /// frames.
    pub fn in_frames(&self, out_frames: usize) -> usize {
        let frac = (self.samp_phase as u64 + out_frames as u64 * self.samp_frac as u64)
            / self.out_rate as u64;
        frac as usize + out_frames * self.samp_inc as usize
    }

    /// Maximum number of input frames buffered before output appears.
    pub fn max_latency(&self) -> usize {
        self.n_taps / 2
    }

    /// The coefficient layout in effect, FULL or INTERPOLATED; never `Auto`.
    pub fn filter_mode(&self) -> FilterMode {
        self.filter_mode
    }

    /// The phase interpolation in effect; `None` in FULL mode.
    pub fn filter_interpolation(&self) -> FilterInterpolation {
        self.filter_interpolation
    }

    /// The advisory filter-mode threshold currently configured.
    pub fn filter_mode_threshold(&self) -> u32 {
        self.filter_threshold
    }

    /// Input rate after GCD reduction.
    pub fn in_rate(&self) -> u32 {
        self.in_rate
    }

    /// Output rate after GCD reduction.
    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    /// Discard all sample history, returning to the freshly-created state.
    pub fn reset(&mut self) {
        let zero = (self.n_taps / 2) * self.inc;
        for buf in &mut self.sbuf {
            let n = zero.min(buf.len());
            buf[..n].fill(S::default());
        }
        // half of the filter is implicit leading silence
        self.samp_index = 0;
        self.samples_avail = (self.n_taps / 2).saturating_sub(1);
    }
}

fn deinterleave_channels<S: Sample>(r: &mut Resampler<S>, input: Option<&[&[S]]>, in_frames: usize) {
    let channels = r.channels;
    let planar = r.flags.non_interleaved;
    let avail = r.samples_avail;
    for (c, buf) in r.sbuf.iter_mut().enumerate() {
        let dst = &mut buf[avail..avail + in_frames];
        match input {
            None => dst.fill(S::default()),
            Some(bufs) if planar => dst.copy_from_slice(&bufs[c][..in_frames]),
            Some(bufs) => {
                let src = bufs[0];
                for (i, d) in dst.iter_mut().enumerate() {
                    *d = src[c + channels * i];
                }
            }
        }
    }
}

fn deinterleave_copy<S: Sample>(r: &mut Resampler<S>, input: Option<&[&[S]]>, in_frames: usize) {
    let inc = r.inc;
    let off = r.samples_avail * inc;
    let len = in_frames * inc;
    for (c, buf) in r.sbuf.iter_mut().enumerate() {
        let dst = &mut buf[off..off + len];
        match input {
            None => dst.fill(S::default()),
            Some(bufs) => dst.copy_from_slice(&bufs[c][..len]),
        }
    }
}

fn slide_history<S: Sample>(buf: &mut [S], index: usize, avail: usize, inc: usize) {
    let from = (index * inc).min(buf.len());
    let end = (avail * inc).min(buf.len());
    if from < end {
        buf.copy_within(from..end, 0);
    }
}

fn resample_none_1<S: Sample>(
    r: &mut Resampler<S>,
    out: &mut [&mut [S]],
    out_frames: usize,
) -> usize {
    let n_taps = r.n_taps;
    let ostride = r.ostride;
    let kernel = r.kernels.none_1;
    let avail = r.samples_avail;
    let mut samp_index = r.samp_index;
    let mut samp_phase = r.samp_phase;

    for c in 0..r.blocks {
        samp_index = r.samp_index;
        samp_phase = r.samp_phase;

        for di in 0..out_frames {
            let row = r.full_row(samp_phase);
            let ipos = samp_index;
            r.advance(&mut samp_index, &mut samp_phase);

            let taps = r.coeff.row(row, n_taps);
            let ip = &r.sbuf[c][ipos..ipos + n_taps];
            let v = kernel(ip, taps, n_taps);
            if ostride == 1 {
                out[c][di] = v;
            } else {
                out[0][di * ostride + c] = v;
            }
        }
        slide_history(&mut r.sbuf[c], samp_index, avail, 1);
    }

    let consumed = samp_index - r.samp_index;
    r.samp_index = 0;
    r.samp_phase = samp_phase;
    consumed
}

fn resample_linear_1<S: Sample>(
    r: &mut Resampler<S>,
    out: &mut [&mut [S]],
    out_frames: usize,
) -> usize {
    let n_taps = r.n_taps;
    let ostride = r.ostride;
    let kernel = r.kernels.linear_1;
    let avail = r.samples_avail;
    let mut samp_index = r.samp_index;
    let mut samp_phase = r.samp_phase;

    for c in 0..r.blocks {
        samp_index = r.samp_index;
        samp_phase = r.samp_phase;

        for di in 0..out_frames {
            let (row, frac) = r.interp_row(samp_phase);
            let ic = S::coeff_linear(frac, r.out_rate);
            let ipos = samp_index;
            r.advance(&mut samp_index, &mut samp_phase);

            let taps = r.coeff.row(row, n_taps * 2);
            let ip = &r.sbuf[c][ipos..ipos + n_taps];
            let v = kernel(ip, taps, n_taps, &ic);
            if ostride == 1 {
                out[c][di] = v;
            } else {
                out[0][di * ostride + c] = v;
            }
        }
        slide_history(&mut r.sbuf[c], samp_index, avail, 1);
    }

    let consumed = samp_index - r.samp_index;
    r.samp_index = 0;
    r.samp_phase = samp_phase;
    consumed
}

fn resample_cubic_1<S: Sample>(
    r: &mut Resampler<S>,
    out: &mut [&mut [S]],
    out_frames: usize,
) -> usize {
    let n_taps = r.n_taps;
    let ostride = r.ostride;
    let kernel = r.kernels.cubic_1;
    let avail = r.samples_avail;
    let mut samp_index = r.samp_index;
    let mut samp_phase = r.samp_phase;

    for c in 0..r.blocks {
        samp_index = r.samp_index;
        samp_phase = r.samp_phase;

        for di in 0..out_frames {
            let (row, frac) = r.interp_row(samp_phase);
            let ic = S::coeff_cubic(frac, r.out_rate);
            let ipos = samp_index;
            r.advance(&mut samp_index, &mut samp_phase);

            let taps = r.coeff.row(row, n_taps * 4);
            let ip = &r.sbuf[c][ipos..ipos + n_taps];
            let v = kernel(ip, taps, n_taps, &ic);
            if ostride == 1 {
                out[c][di] = v;
            } else {
                out[0][di * ostride + c] = v;
            }
        }
        slide_history(&mut r.sbuf[c], samp_index, avail, 1);
    }

    let consumed = samp_index - r.samp_index;
    r.samp_index = 0;
    r.samp_phase = samp_phase;
    consumed
}

fn resample_none_2<S: Sample>(
    r: &mut Resampler<S>,
    out: &mut [&mut [S]],
    out_frames: usize,
) -> usize {
    let n_taps = r.n_taps;
    let ostride = r.ostride;
    let inc = r.inc;
    let kernel = r.kernels.none_2;
    let avail = r.samples_avail;
    let mut samp_index = r.samp_index;
    let mut samp_phase = r.samp_phase;

    for di in 0..out_frames {
        let row = r.full_row(samp_phase);
        let ipos = samp_index * inc;
        r.advance(&mut samp_index, &mut samp_phase);

        let taps = r.coeff.row(row, n_taps);
        let ip = &r.sbuf[0][ipos..ipos + n_taps * inc];
        let v = kernel(ip, taps, n_taps);
        let op = &mut out[0][di * ostride..di * ostride + 2];
        op[0] = v[0];
        op[1] = v[1];
    }
    slide_history(&mut r.sbuf[0], samp_index, avail, inc);

    let consumed = samp_index - r.samp_index;
    r.samp_index = 0;
    r.samp_phase = samp_phase;
    consumed
}

fn resample_linear_2<S: Sample>(
    r: &mut Resampler<S>,
    out: &mut [&mut [S]],
    out_frames: usize,
) -> usize {
    let n_taps = r.n_taps;
    let ostride = r.ostride;
    let inc = r.inc;
    let kernel = r.kernels.linear_2;
    let avail = r.samples_avail;
    let mut samp_index = r.samp_index;
    let mut samp_phase = r.samp_phase;

    for di in 0..out_frames {
        let (row, frac) = r.interp_row(samp_phase);
        let ic = S::coeff_linear(frac, r.out_rate);
        let ipos = samp_index * inc;
        r.advance(&mut samp_index, &mut samp_phase);

        let taps = r.coeff.row(row, n_taps * 2);
        let ip = &r.sbuf[0][ipos..ipos + n_taps * inc];
        let v = kernel(ip, taps, n_taps, &ic);
        let op = &mut out[0][di * ostride..di * ostride + 2];
        op[0] = v[0];
        op[1] = v[1];
    }
    slide_history(&mut r.sbuf[0], samp_index, avail, inc);

    let consumed = samp_index - r.samp_index;
    r.samp_index = 0;
    r.samp_phase = samp_phase;
    consumed
}

fn resample_cubic_2<S: Sample>(
    r: &mut Resampler<S>,
    out: &mut [&mut [S]],
    out_frames: usize,
) -> usize {
    let n_taps = r.n_taps;
    let ostride = r.ostride;
    let inc = r.inc;
    let kernel = r.kernels.cubic_2;
    let avail = r.samples_avail;
    let mut samp_index = r.samp_index;
    let mut samp_phase = r.samp_phase;

    for di in 0..out_frames {
        let (row, frac) = r.interp_row(samp_phase);
        let ic = S::coeff_cubic(frac, r.out_rate);
        let ipos = samp_index * inc;
        r.advance(&mut samp_index, &mut samp_phase);

        let taps = r.coeff.row(row, n_taps * 4);
        let ip = &r.sbuf[0][ipos..ipos + n_taps * inc];
        let v = kernel(ip, taps, n_taps, &ic);
        let op = &mut out[0][di * ostride..di * ostride + 2];
        op[0] = v[0];
        op[1] = v[1];
    }
    slide_history(&mut r.sbuf[0], samp_index, avail, inc);

    let consumed = samp_index - r.samp_index;
    r.samp_index = 0;
    r.samp_phase = samp_phase;
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(method: Method, quality: u32, in_rate: u32, out_rate: u32) -> Options {
        Options::for_quality(method, quality, in_rate, out_rate).unwrap()
    }

    fn mono<S: Sample>(method: Method, quality: u32, in_rate: u32, out_rate: u32) -> Resampler<S> {
        Resampler::new(
            method,
            Flags::default(),
            1,
            in_rate,
            out_rate,
            opts(method, quality, in_rate, out_rate),
        )
        .unwrap()
    }

    /// Drive an interleaved stream through in fixed-size chunks, collecting
    /// everything produced.
    fn run<S: Sample>(r: &mut Resampler<S>, input: &[S], channels: usize, chunk: usize) -> Vec<S> {
        let mut produced = Vec::new();
        let total = input.len() / channels;
        let mut pos = 0;
        while pos < total {
            let frames = chunk.min(total - pos);
            let block = &input[pos * channels..(pos + frames) * channels];
            let out_frames = r.out_frames(frames);
            let mut buf = vec![S::default(); out_frames * channels];
            {
                let in_planes = [block];
                let mut out_planes = [buf.as_mut_slice()];
                r.resample(Some(&in_planes[..]), frames, &mut out_planes[..], out_frames);
            }
            produced.extend_from_slice(&buf);
            pos += frames;
        }
        produced
    }

    fn run_silence<S: Sample>(r: &mut Resampler<S>, frames_total: usize, chunk: usize) -> Vec<S> {
        let mut produced = Vec::new();
        let mut left = frames_total;
        while left > 0 {
            let frames = chunk.min(left);
            let out_frames = r.out_frames(frames);
            let mut buf = vec![S::default(); out_frames];
            {
                let mut out_planes = [buf.as_mut_slice()];
                r.resample(None, frames, &mut out_planes[..], out_frames);
            }
            produced.extend_from_slice(&buf);
            left -= frames;
        }
        produced
    }

    fn sine_f32(n: usize, freq: f64, rate: f64, amp: f64) -> Vec<f32> {
        (0..n)
            .map(|i| (amp * (2.0 * PI * freq * i as f64 / rate).sin()) as f32)
            .collect()
    }

    #[test]
    fn invalid_construction_is_rejected() {
        let o = Options::default();
        assert!(Resampler::<f32>::new(Method::Kaiser, Flags::default(), 0, 44100, 48000, o.clone())
            .is_err());
        assert!(Resampler::<f32>::new(Method::Kaiser, Flags::default(), 2, 0, 48000, o.clone())
            .is_err());
        let mut bad = Options::default();
        bad.filter_oversample = Some(3);
        assert!(Resampler::<f32>::new(Method::Kaiser, Flags::default(), 2, 44100, 48000, bad)
            .is_err());
    }

    #[test]
    fn kaiser_default_quality_designs_64_taps() {
        let r: Resampler<f32> = mono(Method::Kaiser, 4, 48000, 48000);
        assert_eq!(r.max_latency(), 32);
        assert_eq!(r.filter_mode(), FilterMode::Full);
        assert_eq!(r.filter_interpolation(), FilterInterpolation::None);
        assert_eq!(r.filter_mode_threshold(), 1_048_576);
    }

    #[test]
    fn auto_mode_uses_interpolated_tables_for_big_phase_counts() {
        let r: Resampler<f32> = mono(Method::Kaiser, 4, 44100, 48000);
        // 44100:48000 reduces to 147:160; 160 phases > 8x oversampling
        assert_eq!(r.in_rate(), 147);
        assert_eq!(r.out_rate(), 160);
        assert_eq!(r.filter_mode(), FilterMode::Interpolated);
        assert_eq!(r.filter_interpolation(), FilterInterpolation::Cubic);
    }

    #[test]
    fn dc_passes_through_at_unity_rate() {
        let mut r: Resampler<f32> = mono(Method::Kaiser, 5, 48000, 48000);
        let input = vec![1.0f32; 1000];
        let produced = run(&mut r, &input, 1, 256);
        assert!(produced.len() > 800);
        // allow the windows overlapping initial silence to settle
        for (i, &v) in produced.iter().enumerate().skip(60) {
            assert!((v - 1.0).abs() < 1e-5, "sample {} = {}", i, v);
        }
    }

    #[test]
    fn nearest_stereo_decimation_is_exact() {
        let mut r: Resampler<i16> = Resampler::new(
            Method::Nearest,
            Flags::default(),
            2,
            44100,
            22050,
            opts(Method::Nearest, 4, 44100, 22050),
        )
        .unwrap();

        // impulse train in the left channel, silence in the right
        let frames = 64;
        let mut input = vec![0i16; frames * 2];
        for j in (0..frames).step_by(4) {
            input[2 * j] = 16384;
        }
        let produced = run(&mut r, &input, 2, frames);
        assert_eq!(produced.len() % 2, 0);
        assert!(produced.len() >= 60);
        for k in 0..produced.len() / 2 {
            let expect_l = if (2 * k) % 4 == 0 { 16384 } else { 0 };
            assert_eq!(produced[2 * k], expect_l, "left frame {}", k);
            assert_eq!(produced[2 * k + 1], 0, "right frame {}", k);
        }
    }

    #[test]
    fn linear_ramp_decimation_s32_fixed_point() {
        let mut options = Options::default();
        options.n_taps = Some(2);
        let mut r: Resampler<i32> =
            Resampler::new(Method::Linear, Flags::default(), 1, 3, 2, options).unwrap();

        let input = [0i32, 1, 2, 3, 4, 5];
        let produced = run(&mut r, &input, 1, 6);
        // hand-evaluated from the quantized 3-tap triangle rows over the ramp
        assert_eq!(produced, vec![1, 2, 4]);
    }

    #[test]
    fn pushing_none_equals_pushing_zeros() {
        let prefix = sine_f32(200, 440.0, 44100.0, 0.8);

        let mut with_zeros: Resampler<f32> = mono(Method::Kaiser, 4, 44100, 48000);
        let mut with_none: Resampler<f32> = mono(Method::Kaiser, 4, 44100, 48000);

        let mut a = run(&mut with_zeros, &prefix, 1, 64);
        let mut b = run(&mut with_none, &prefix, 1, 64);

        let zeros = vec![0.0f32; 300];
        a.extend(run(&mut with_zeros, &zeros, 1, 64));
        b.extend(run_silence(&mut with_none, 300, 64));

        assert_eq!(a, b);
        // the filter tail of the sine must be present in both
        assert!(a.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn reset_is_idempotent() {
        let signal = sine_f32(300, 997.0, 44100.0, 0.5);

        let mut once: Resampler<f32> = mono(Method::Kaiser, 4, 44100, 48000);
        let mut twice: Resampler<f32> = mono(Method::Kaiser, 4, 44100, 48000);

        run(&mut once, &signal, 1, 100);
        run(&mut twice, &signal, 1, 100);
        once.reset();
        twice.reset();
        twice.reset();

        let a = run(&mut once, &signal, 1, 100);
        let b = run(&mut twice, &signal, 1, 100);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn folding_common_rate_factors_is_lossless() {
        let signal = sine_f32(600, 1000.0, 44100.0, 0.5);

        let mut small: Resampler<f32> = mono(Method::Kaiser, 4, 44100, 48000);
        let mut big: Resampler<f32> = mono(Method::Kaiser, 4, 88200, 96000);
        assert_eq!(small.in_rate(), big.in_rate());
        assert_eq!(small.out_rate(), big.out_rate());

        let a = run(&mut small, &signal, 1, 128);
        let b = run(&mut big, &signal, 1, 128);
        assert_eq!(a, b);
    }

    #[test]
    fn frame_accounting_is_consistent() {
        let configs: Vec<Resampler<f32>> = vec![
            mono(Method::Kaiser, 4, 44100, 48000),
            mono(Method::Kaiser, 4, 48000, 44100),
            mono(Method::Kaiser, 4, 48000, 48000),
            mono(Method::Linear, 4, 3, 2),
        ];
        for r in &configs {
            for n in [0usize, 1, 10, 100, 1000] {
                let o = r.out_frames(n);
                if o > 0 {
                    assert!(
                        r.in_frames(o) <= n,
                        "{}->{}: in_frames({}) = {} > {}",
                        r.in_rate(),
                        r.out_rate(),
                        o,
                        r.in_frames(o),
                        n
                    );
                }
            }
        }
    }

    #[test]
    fn starved_resampler_produces_nothing() {
        let mut r: Resampler<f32> = mono(Method::Kaiser, 5, 48000, 48001);
        assert_eq!(r.out_frames(10), 0);
        let input = vec![0.25f32; 10];
        let in_planes = [&input[..]];
        let mut empty: [f32; 0] = [];
        let mut out_planes = [&mut empty[..]];
        r.resample(Some(&in_planes[..]), 10, &mut out_planes[..], 0);
        assert_eq!(r.out_frames(0), 0);
    }

    #[test]
    fn rate_change_mid_stream_keeps_dc_continuous() {
        let mut r: Resampler<f32> = mono(Method::Kaiser, 5, 48000, 48001);
        let dc = vec![1.0f32; 500];
        let mut produced = run(&mut r, &dc, 1, 100);
        r.update(0, 96000, None).unwrap();
        produced.extend(run(&mut r, &dc, 1, 100));

        assert!(produced.len() > 1000);
        for (i, &v) in produced.iter().enumerate().skip(60) {
            assert!((v - 1.0).abs() < 0.01, "sample {} = {} after seam", i, v);
        }
    }

    #[test]
    fn planar_and_interleaved_agree() {
        use rand::Rng;

        let frames = 400;
        let mut rng = rand::thread_rng();
        let left: Vec<f32> = (0..frames).map(|_| rng.gen::<f32>() - 0.5).collect();
        let right: Vec<f32> = (0..frames).map(|_| rng.gen::<f32>() - 0.5).collect();
        let mut interleaved_in = vec![0.0f32; frames * 2];
        for i in 0..frames {
            interleaved_in[2 * i] = left[i];
            interleaved_in[2 * i + 1] = right[i];
        }

        let mut ri: Resampler<f32> = Resampler::new(
            Method::Kaiser,
            Flags::default(),
            2,
            44100,
            48000,
            opts(Method::Kaiser, 4, 44100, 48000),
        )
        .unwrap();
        let inter_out = run(&mut ri, &interleaved_in, 2, frames);

        let mut rp: Resampler<f32> = Resampler::new(
            Method::Kaiser,
            Flags {
                non_interleaved: true,
            },
            2,
            44100,
            48000,
            opts(Method::Kaiser, 4, 44100, 48000),
        )
        .unwrap();
        let out_frames = rp.out_frames(frames);
        let mut out_l = vec![0.0f32; out_frames];
        let mut out_r = vec![0.0f32; out_frames];
        {
            let in_planes = [&left[..], &right[..]];
            let mut out_planes = [out_l.as_mut_slice(), out_r.as_mut_slice()];
            rp.resample(Some(&in_planes[..]), frames, &mut out_planes[..], out_frames);
        }

        assert_eq!(inter_out.len(), out_frames * 2);
        for i in 0..out_frames {
            assert!(
                (inter_out[2 * i] - out_l[i]).abs() < 1e-6,
                "left {} differs",
                i
            );
            assert!(
                (inter_out[2 * i + 1] - out_r[i]).abs() < 1e-6,
                "right {} differs",
                i
            );
        }
    }

    #[test]
    fn sine_level_survives_downsampling() {
        let mut r: Resampler<f32> = mono(Method::Kaiser, 5, 48000, 24000);
        let signal = sine_f32(4800, 1000.0, 48000.0, 0.5);
        let produced = run(&mut r, &signal, 1, 480);
        assert!(produced.len() > 2100);

        // 75 whole periods of the 1 kHz tone at the output rate
        let seg = &produced[200..200 + 1800];
        let rms = (seg.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / seg.len() as f64)
            .sqrt();
        let expect = 0.5 / (2.0f64).sqrt();
        assert!(
            (rms - expect).abs() < 0.007,
            "rms {} vs expected {}",
            rms,
            expect
        );
    }

    #[test]
    fn cubic_upsampling_fills_requested_frames() {
        let mut options = Options::default();
        options.n_taps = Some(4);
        options.cubic_b = Some(1.0);
        options.cubic_c = Some(0.0);
        let mut r: Resampler<f64> =
            Resampler::new(Method::Cubic, Flags::default(), 1, 44100, 48000, options).unwrap();
        assert_eq!(r.filter_mode(), FilterMode::Interpolated);

        let signal: Vec<f64> = (0..4410)
            .map(|i| (2.0 * PI * 440.0 * i as f64 / 44100.0).sin())
            .collect();
        let produced = run(&mut r, &signal, 1, 441);
        // the accounting promised exactly this many frames, all filled
        assert!(produced.len() > 4700);

        let seg = &produced[400..400 + 4000];
        let rms = (seg.iter().map(|&v| v * v).sum::<f64>() / seg.len() as f64).sqrt();
        let expect = 1.0 / (2.0f64).sqrt();
        // the B-spline smooths a little; 440 Hz sits deep in the passband
        assert!((rms - expect).abs() < 0.02, "rms {}", rms);
    }
}
