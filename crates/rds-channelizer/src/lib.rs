// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Wideband IQ → N PCM channelizer (spec.md §4.1).
//!
//! Takes one 2.4 MS/s interleaved 8-bit IQ stream tuned to the mean of the
//! requested frequencies and produces one 171 kHz mono 16-bit PCM stream per
//! station: frequency shift, Kaiser low-pass, decimate by 14, FM-demodulate
//! by phase differencing. Single-station deployments bypass this crate
//! entirely and read `rtl_fm`'s PCM stdout directly (spec.md Non-goals).

use num_complex::Complex32;
use rds_core::RdsError;
use std::time::{Duration, Instant};

/// Native IQ sample rate of the capture tool; fixed, never resampled.
pub const INPUT_SAMPLE_RATE_HZ: f64 = 2_400_000.0;
/// Recommended block size (~109 ms at 2.4 MS/s).
pub const BLOCK_SAMPLES: usize = 262_144;
/// Fixed decimation factor from 2.4 MS/s down to ~171 kHz.
pub const DECIMATION: usize = 14;
/// Output PCM rate after decimation (171,428.57 Hz, within ±1% of 171 kHz).
pub const OUTPUT_SAMPLE_RATE_HZ: f64 = INPUT_SAMPLE_RATE_HZ / DECIMATION as f64;

const MIN_STATIONS: usize = 2;
const MAX_STATIONS: usize = 4;
const MAX_SPAN_HZ: f64 = 2_000_000.0;
const FIR_ORDER: usize = 129;
const FIR_CUTOFF_HZ: f64 = 100_000.0;
const FIR_BETA: f64 = 6.0;
/// Deviation-to-amplitude gain: nominal ±75 kHz maps near ±20,000.
const FM_GAIN: f32 = 20_000.0 / (std::f32::consts::PI * 0.5);

struct StationState {
    nco: rds_core::math::Nco,
    fir_history: Vec<Complex32>,
    prev_demod_sample: Complex32,
    drops: u64,
}

impl StationState {
    fn new(freq_offset_hz: f64, taps_len: usize) -> Self {
        Self {
            nco: rds_core::math::Nco::new(-freq_offset_hz, INPUT_SAMPLE_RATE_HZ, BLOCK_SAMPLES),
            fir_history: vec![Complex32::new(0.0, 0.0); taps_len.saturating_sub(1)],
            prev_demod_sample: Complex32::new(1.0, 0.0),
            drops: 0,
        }
    }
}

/// Extracts N independent FM/PCM streams from one wideband IQ stream.
pub struct Channelizer {
    center_hz: f64,
    taps: Vec<f32>,
    stations: Vec<StationState>,
    resync_byte_pending: bool,
    last_resync_log: Option<Instant>,
}

impl Channelizer {
    /// Validates the station count and span, then builds the per-station
    /// mixers and a shared low-pass filter (spec.md §4.1 "Constraints").
    pub fn new(station_freqs_hz: &[f64]) -> Result<Self, RdsError> {
        if station_freqs_hz.len() < MIN_STATIONS || station_freqs_hz.len() > MAX_STATIONS {
            return Err(RdsError::Config(format!(
                "channelizer requires {MIN_STATIONS}-{MAX_STATIONS} stations, got {}",
                station_freqs_hz.len()
            )));
        }
        let min = station_freqs_hz.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = station_freqs_hz.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;
        if span > MAX_SPAN_HZ {
            return Err(RdsError::Config(format!(
                "frequency span {:.3} MHz exceeds 2.0 MHz limit",
                span / 1_000_000.0
            )));
        }
        let center_hz = (min + max) / 2.0;
        let taps = rds_core::math::kaiser_lowpass_fir(
            FIR_ORDER,
            FIR_CUTOFF_HZ,
            INPUT_SAMPLE_RATE_HZ,
            FIR_BETA,
        );
        let stations = station_freqs_hz
            .iter()
            .map(|&f| StationState::new(f - center_hz, taps.len()))
            .collect();
        Ok(Self {
            center_hz,
            taps,
            stations,
            resync_byte_pending: false,
            last_resync_log: None,
        })
    }

    pub fn center_hz(&self) -> f64 {
        self.center_hz
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn drops(&self, station_idx: usize) -> u64 {
        self.stations[station_idx].drops
    }

    /// Records a dropped block for `station_idx` (spec.md §4.1 "Contracts" —
    /// a slow sink never blocks the channelizer). The sink itself lives in
    /// the daemon; this just keeps the counter the status endpoint reports.
    pub fn record_drop(&mut self, station_idx: usize) {
        self.stations[station_idx].drops += 1;
    }

    /// Processes one block of raw interleaved 8-bit IQ bytes, returning one
    /// PCM `Vec<i16>` per station in request order.
    pub fn process_block(&mut self, iq_bytes: &[u8]) -> Vec<Vec<i16>> {
        let mut bytes = iq_bytes;
        if self.resync_byte_pending {
            if bytes.is_empty() {
                return self.stations.iter().map(|_| Vec::new()).collect();
            }
            bytes = &bytes[1..];
            self.resync_byte_pending = false;
        }
        if !bytes.len().is_multiple_of(2) {
            bytes = &bytes[..bytes.len() - 1];
            self.resync_byte_pending = true;
            let now = Instant::now();
            let should_log = match self.last_resync_log {
                Some(t) => now.duration_since(t) >= Duration::from_secs(60),
                None => true,
            };
            if should_log {
                tracing::warn!("channelizer resync: malformed IQ read length, discarding a byte");
                self.last_resync_log = Some(now);
            }
        }

        let samples: Vec<Complex32> = bytes
            .chunks_exact(2)
            .map(|pair| {
                Complex32::new((pair[0] as f32 - 127.5) / 127.5, (pair[1] as f32 - 127.5) / 127.5)
            })
            .collect();

        let taps = &self.taps;
        self.stations
            .iter_mut()
            .map(|station| Self::process_station(station, taps, &samples))
            .collect()
    }

    fn process_station(
        station: &mut StationState,
        taps: &[f32],
        samples: &[Complex32],
    ) -> Vec<i16> {
        let mixed: Vec<Complex32> = samples
            .iter()
            .zip(station.nco.next_cycle(samples.len()))
            .map(|(s, (c, sn))| *s * Complex32::new(c, sn))
            .collect();

        let mut buffer = station.fir_history.clone();
        buffer.extend_from_slice(&mixed);

        let history_len = taps.len().saturating_sub(1);
        let filtered_count = buffer.len().saturating_sub(history_len);
        let mut out = Vec::with_capacity(filtered_count / DECIMATION + 1);
        let mut idx = 0;
        while idx < filtered_count {
            let window = &buffer[idx..idx + taps.len()];
            let mut acc = Complex32::new(0.0, 0.0);
            for (tap, s) in taps.iter().zip(window.iter()) {
                acc += s.scale(*tap);
            }
            let prod = acc * station.prev_demod_sample.conj();
            let demod = prod.arg() * FM_GAIN;
            out.push(demod.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
            station.prev_demod_sample = acc;
            idx += DECIMATION;
        }

        if buffer.len() > history_len {
            station.fir_history = buffer[buffer.len() - history_len..].to_vec();
        } else {
            station.fir_history = buffer;
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_iq(freq_hz: f64, n: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(n * 2);
        for i in 0..n {
            let phase = 2.0 * std::f64::consts::PI * freq_hz * (i as f64) / INPUT_SAMPLE_RATE_HZ;
            let re = (phase.cos() * 100.0 + 127.5).clamp(0.0, 255.0) as u8;
            let im = (phase.sin() * 100.0 + 127.5).clamp(0.0, 255.0) as u8;
            bytes.push(re);
            bytes.push(im);
        }
        bytes
    }

    #[test]
    fn rejects_too_few_stations() {
        assert!(Channelizer::new(&[100.0e6]).is_err());
    }

    #[test]
    fn rejects_too_many_stations() {
        assert!(Channelizer::new(&[100.0e6, 100.2e6, 100.4e6, 100.6e6, 100.8e6]).is_err());
    }

    #[test]
    fn rejects_wide_span() {
        assert!(Channelizer::new(&[100.0e6, 103.0e6]).is_err());
    }

    #[test]
    fn accepts_valid_span() {
        let c = Channelizer::new(&[100.0e6, 101.0e6]).unwrap();
        assert_eq!(c.center_hz(), 100.5e6);
        assert_eq!(c.station_count(), 2);
    }

    #[test]
    fn output_sample_count_matches_decimation() {
        let mut c = Channelizer::new(&[100.0e6, 101.5e6]).unwrap();
        let iq = tone_iq(100.0e6, BLOCK_SAMPLES);
        let outputs = c.process_block(&iq);
        assert_eq!(outputs.len(), 2);
        let expected = BLOCK_SAMPLES / DECIMATION;
        for out in &outputs {
            assert!((out.len() as i64 - expected as i64).abs() <= 1);
        }
    }

    #[test]
    fn odd_length_block_triggers_resync_without_panic() {
        let mut c = Channelizer::new(&[100.0e6, 101.0e6]).unwrap();
        let mut iq = tone_iq(100.0e6, 1000);
        iq.push(42);
        let outputs = c.process_block(&iq);
        assert_eq!(outputs.len(), 2);
        let next = c.process_block(&tone_iq(100.0e6, 1000));
        assert_eq!(next.len(), 2);
    }

    #[test]
    fn drops_counter_tracks_per_station() {
        let mut c = Channelizer::new(&[100.0e6, 101.0e6]).unwrap();
        c.record_drop(1);
        c.record_drop(1);
        assert_eq!(c.drops(0), 0);
        assert_eq!(c.drops(1), 2);
    }
}
