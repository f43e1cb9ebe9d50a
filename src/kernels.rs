// Kernel dispatch. The resampler binds one inner-product function per
// (interpolation, channel-shape) at update time; the bound set starts from
// the portable scalar implementations on the Sample trait and a one-shot
// CPU feature probe may swap in accelerated variants for the float formats.

use std::sync::OnceLock;

use log::debug;

use crate::sample::Sample;

/// Inner-product kernels for one sample format. `*_1` reads `n` mono
/// samples, `*_2` reads `n` frames of two interleaved channels.
#[derive(Clone, Copy)]
pub struct Kernels<S: Sample> {
    pub none_1: fn(&[S], &[S], usize) -> S,
    pub linear_1: fn(&[S], &[S], usize, &[S; 4]) -> S,
    pub cubic_1: fn(&[S], &[S], usize, &[S; 4]) -> S,
    pub none_2: fn(&[S], &[S], usize) -> [S; 2],
    pub linear_2: fn(&[S], &[S], usize, &[S; 4]) -> [S; 2],
    pub cubic_2: fn(&[S], &[S], usize, &[S; 4]) -> [S; 2],
}

impl<S: Sample> Kernels<S> {
    pub fn scalar() -> Self {
        Self {
            none_1: S::ip_none,
            linear_1: S::ip_linear,
            cubic_1: S::ip_cubic,
            none_2: S::ip_none_x2,
            linear_2: S::ip_linear_x2,
            cubic_2: S::ip_cubic_x2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accel {
    Scalar,
    #[cfg(target_arch = "x86_64")]
    Avx2,
}

static ACCEL: OnceLock<Accel> = OnceLock::new();

/// Probe CPU features once per process. Idempotent; every resampler
/// construction goes through here before binding kernels.
pub(crate) fn init() -> Accel {
    *ACCEL.get_or_init(|| {
        #[cfg(target_arch = "x86_64")]
        {
            if std::is_x86_feature_detected!("avx2") {
                debug!("avx2 detected, accelerating float inner products");
                return Accel::Avx2;
            }
        }
        debug!("using scalar inner products");
        Accel::Scalar
    })
}

/// The kernel set for format `S` under the probed feature level.
pub(crate) fn table<S: Sample>() -> Kernels<S> {
    let mut k = Kernels::scalar();
    S::install_accel(&mut k, init());
    k
}

pub(crate) fn install_f32(kernels: &mut Kernels<f32>, accel: Accel) {
    match accel {
        #[cfg(target_arch = "x86_64")]
        Accel::Avx2 => {
            kernels.none_1 = |a, b, n| unsafe { avx2::ip_none_f32(a, b, n) };
        }
        _ => {}
    }
    let _ = kernels;
}

pub(crate) fn install_f64(kernels: &mut Kernels<f64>, accel: Accel) {
    match accel {
        #[cfg(target_arch = "x86_64")]
        Accel::Avx2 => {
            kernels.none_1 = |a, b, n| unsafe { avx2::ip_none_f64(a, b, n) };
        }
        _ => {}
    }
    let _ = kernels;
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use std::arch::x86_64::*;

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn ip_none_f32(a: &[f32], b: &[f32], n: usize) -> f32 {
        let vecs = n / 8;
        let mut acc = _mm256_setzero_ps();
        for v in 0..vecs {
            let x = _mm256_loadu_ps(a.as_ptr().add(v * 8));
            let c = _mm256_loadu_ps(b.as_ptr().add(v * 8));
            acc = _mm256_add_ps(acc, _mm256_mul_ps(x, c));
        }
        let mut lanes = [0f32; 8];
        _mm256_storeu_ps(lanes.as_mut_ptr(), acc);
        let mut res: f32 = lanes.iter().sum();
        for i in vecs * 8..n {
            res += a[i] * b[i];
        }
        res
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn ip_none_f64(a: &[f64], b: &[f64], n: usize) -> f64 {
        let vecs = n / 4;
        let mut acc = _mm256_setzero_pd();
        for v in 0..vecs {
            let x = _mm256_loadu_pd(a.as_ptr().add(v * 4));
            let c = _mm256_loadu_pd(b.as_ptr().add(v * 4));
            acc = _mm256_add_pd(acc, _mm256_mul_pd(x, c));
        }
        let mut lanes = [0f64; 4];
        _mm256_storeu_pd(lanes.as_mut_ptr(), acc);
        let mut res: f64 = lanes.iter().sum();
        for i in vecs * 4..n {
            res += a[i] * b[i];
        }
        res
    }
}
