// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Shared DSP building blocks for the channelizer (spec.md §4.1): a Kaiser
//! window low-pass FIR designer and a complex oscillator table for
//! frequency-shifting each station's slice of the wideband IQ stream.

use std::f64::consts::PI;

/// Zeroth-order modified Bessel function, used by the Kaiser window.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let half_x_sq = (x / 2.0) * (x / 2.0);
    for k in 1..=24 {
        term *= half_x_sq / (k as f64 * k as f64);
        sum += term;
        if term < sum * 1e-16 {
            break;
        }
    }
    sum
}

/// Design a Kaiser-windowed low-pass FIR of the given odd order.
///
/// `cutoff_hz` / `sample_rate_hz` sets the normalized cutoff; `beta` controls
/// the window's stopband attenuation (β≈6 per spec.md §4.1 step 3).
pub fn kaiser_lowpass_fir(order: usize, cutoff_hz: f64, sample_rate_hz: f64, beta: f64) -> Vec<f32> {
    let n = if order.is_multiple_of(2) { order + 1 } else { order };
    let m = (n - 1) as f64;
    let fc = (cutoff_hz / sample_rate_hz).clamp(1e-6, 0.5);
    let i0_beta = bessel_i0(beta);

    let mut taps = Vec::with_capacity(n);
    for i in 0..n {
        let k = i as f64 - m / 2.0;
        let sinc = if k == 0.0 {
            2.0 * fc
        } else {
            (2.0 * PI * fc * k).sin() / (PI * k)
        };
        let ratio = (2.0 * i as f64 / m) - 1.0;
        let window = bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / i0_beta;
        taps.push((sinc * window) as f32);
    }

    // Normalize DC gain to 1.0.
    let sum: f64 = taps.iter().map(|&t| t as f64).sum();
    if sum.abs() > 1e-12 {
        for t in &mut taps {
            *t = (*t as f64 / sum) as f32;
        }
    }
    taps
}

/// Precomputed complex exponential table for mixing a station's carrier
/// down to baseband, one entry per sample in a processing block
/// (spec.md §4.1 step 2).
#[derive(Debug, Clone)]
pub struct Nco {
    table: Vec<(f32, f32)>,
    phase: usize,
}

impl Nco {
    /// `shift_hz` is the frequency to translate *down* by (negative of the
    /// station offset from the tuned center, per spec.md step 2).
    pub fn new(shift_hz: f64, sample_rate_hz: f64, block_len: usize) -> Self {
        let mut table = Vec::with_capacity(block_len);
        let step = -2.0 * PI * shift_hz / sample_rate_hz;
        for n in 0..block_len {
            let phase = step * n as f64;
            table.push((phase.cos() as f32, phase.sin() as f32));
        }
        Self { table, phase: 0 }
    }

    /// Mix one block of `len` samples against the table, wrapping as needed.
    pub fn next_cycle(&mut self, len: usize) -> impl Iterator<Item = (f32, f32)> + '_ {
        let table_len = self.table.len().max(1);
        let start = self.phase;
        self.phase = (self.phase + len) % table_len;
        (0..len).map(move |i| self.table[(start + i) % table_len])
    }
}

/// Integer up/down resample ratio reduced to lowest terms, e.g. 160/1710 for
/// 171kHz → 16kHz (spec.md §4.3 step 1).
pub fn reduced_ratio(up: u32, down: u32) -> (u32, u32) {
    fn gcd(a: u32, b: u32) -> u32 {
        if b == 0 {
            a
        } else {
            gcd(b, a % b)
        }
    }
    let g = gcd(up, down).max(1);
    (up / g, down / g)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fir_has_unit_dc_gain() {
        let taps = kaiser_lowpass_fir(129, 100_000.0, 2_400_000.0, 6.0);
        let sum: f32 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-3, "sum was {sum}");
    }

    #[test]
    fn fir_is_symmetric() {
        let taps = kaiser_lowpass_fir(129, 100_000.0, 2_400_000.0, 6.0);
        let n = taps.len();
        for i in 0..n / 2 {
            assert!((taps[i] - taps[n - 1 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn nco_table_wraps() {
        let mut nco = Nco::new(50_000.0, 2_400_000.0, 4);
        let first: Vec<_> = nco.next_cycle(4).collect();
        let second: Vec<_> = nco.next_cycle(4).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn ratio_reduces() {
        assert_eq!(reduced_ratio(160, 1710), (16, 171));
    }
}
