// Window-method FIR tap evaluation. Each method maps a real offset x
// (in source-sample units, centered on zero) to a tap weight; a filter is
// designed by sampling the window on a regular grid and normalizing.

use std::f64::consts::PI;

use crate::options::Method;

/// Zero-order modified Bessel function of the first kind, by power series.
/// Converges quickly for the beta values used by Kaiser windows (< 40).
pub(crate) fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    let mut k = 1.0;
    loop {
        let f = half / k;
        term *= f * f;
        sum += term;
        if term < sum * 1e-14 {
            return sum;
        }
        k += 1.0;
    }
}

fn nearest_tap(x: f64) -> f64 {
    if x.abs() < 0.5 { 1.0 } else { 0.0 }
}

fn linear_tap(x: f64, n_taps: usize) -> f64 {
    let a = x.abs() / n_taps as f64;
    if a < 1.0 { 1.0 - a } else { 0.0 }
}

// Mitchell-Netravali two-parameter cubic, support scaled to n_taps/4.
fn cubic_tap(x: f64, n_taps: usize, b: f64, c: f64) -> f64 {
    let a = (x * 4.0).abs() / n_taps as f64;
    let a2 = a * a;
    let a3 = a2 * a;

    if a <= 1.0 {
        ((12.0 - 9.0 * b - 6.0 * c) * a3 + (-18.0 + 12.0 * b + 6.0 * c) * a2 + (6.0 - 2.0 * b))
            / 6.0
    } else if a <= 2.0 {
        ((-b - 6.0 * c) * a3 + (6.0 * b + 30.0 * c) * a2 + (-12.0 * b - 48.0 * c) * a
            + (8.0 * b + 24.0 * c))
            / 6.0
    } else {
        0.0
    }
}

fn blackman_nuttall_tap(x: f64, n_taps: usize, fc: f64) -> f64 {
    let y = PI * x;
    let s = if y == 0.0 { fc } else { (y * fc).sin() / y };

    let w = 2.0 * y / n_taps as f64 + PI;
    s * (0.3635819 - 0.4891775 * w.cos() + 0.1365995 * (2.0 * w).cos()
        - 0.0106411 * (3.0 * w).cos())
}

fn kaiser_tap(x: f64, n_taps: usize, fc: f64, beta: f64) -> f64 {
    let y = PI * x;
    let s = if y == 0.0 { fc } else { (y * fc).sin() / y };

    let w = 2.0 * x / n_taps as f64;
    s * bessel_i0(beta * (1.0 - w * w).max(0.0).sqrt())
}

/// The designed filter's window parameters. `n_taps` is the nominal filter
/// length the window is scaled to, which may be shorter than the number of
/// grid points evaluated when oversampling.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TapWindow {
    pub method: Method,
    pub n_taps: usize,
    pub cutoff: f64,
    pub kaiser_beta: f64,
    pub cubic_b: f64,
    pub cubic_c: f64,
}

impl TapWindow {
    fn tap(&self, x: f64) -> f64 {
        match self.method {
            Method::Nearest => nearest_tap(x),
            Method::Linear => linear_tap(x, self.n_taps),
            Method::Cubic => cubic_tap(x, self.n_taps, self.cubic_b, self.cubic_c),
            Method::BlackmanNuttall => blackman_nuttall_tap(x, self.n_taps, self.cutoff),
            Method::Kaiser => kaiser_tap(x, self.n_taps, self.cutoff, self.kaiser_beta),
        }
    }

    /// Fill `out[..count]` with taps sampled at `x + i/oversample` and return
    /// the accumulated weight for later normalization.
    pub fn fill(&self, x: f64, count: usize, oversample: u32, out: &mut [f64]) -> f64 {
        let step = 1.0 / oversample as f64;
        let mut weight = 0.0;
        for (i, o) in out[..count].iter_mut().enumerate() {
            let t = self.tap(x + i as f64 * step);
            *o = t;
            weight += t;
        }
        weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bessel_i0_basics() {
        assert_eq!(bessel_i0(0.0), 1.0);
        // I0(1) = 1.2660658..., I0(2) = 2.2795853...
        assert!((bessel_i0(1.0) - 1.2660658).abs() < 1e-6);
        assert!((bessel_i0(2.0) - 2.2795853).abs() < 1e-6);
        assert!(bessel_i0(10.0) > bessel_i0(9.0));
    }

    #[test]
    fn nearest_is_a_box() {
        assert_eq!(nearest_tap(0.0), 1.0);
        assert_eq!(nearest_tap(0.49), 1.0);
        assert_eq!(nearest_tap(0.5), 0.0);
        assert_eq!(nearest_tap(-3.0), 0.0);
    }

    #[test]
    fn linear_is_a_triangle() {
        assert_eq!(linear_tap(0.0, 2), 1.0);
        assert_eq!(linear_tap(1.0, 2), 0.5);
        assert_eq!(linear_tap(2.0, 2), 0.0);
        assert_eq!(linear_tap(-1.0, 2), linear_tap(1.0, 2));
    }

    #[test]
    fn cubic_support_ends_at_two() {
        // b=1, c=0 is the cubic B-spline
        assert!(cubic_tap(0.0, 4, 1.0, 0.0) > 0.0);
        assert_eq!(cubic_tap(2.1, 4, 1.0, 0.0), 0.0);
        // even symmetry
        let l = cubic_tap(-0.7, 4, 1.0, 0.0);
        let r = cubic_tap(0.7, 4, 1.0, 0.0);
        assert!((l - r).abs() < 1e-12);
    }

    #[test]
    fn sinc_windows_at_zero_equal_cutoff() {
        assert!((blackman_nuttall_tap(0.0, 32, 0.85) - 0.85).abs() < 1e-7);
        let k = kaiser_tap(0.0, 32, 0.94, 9.0);
        assert!((k - 0.94 * bessel_i0(9.0)).abs() < 1e-7);
    }

    #[test]
    fn kaiser_window_is_symmetric() {
        let w = TapWindow {
            method: Method::Kaiser,
            n_taps: 16,
            cutoff: 0.9,
            kaiser_beta: 7.0,
            cubic_b: 0.0,
            cubic_c: 0.0,
        };
        for i in 1..8 {
            let l = w.tap(-(i as f64));
            let r = w.tap(i as f64);
            assert!((l - r).abs() < 1e-12, "asymmetry at {}", i);
        }
    }
}
