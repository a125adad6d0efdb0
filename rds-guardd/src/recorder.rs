// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Audio Recorder (spec.md §4.3): `Idle -> Recording -> Finalizing -> Idle`
//! per Station. The ring buffer is a plain `Vec<i16>` carried inside the
//! `Recording` variant itself rather than a separate "is some" flag, per
//! SPEC_FULL.md's module note.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use rds_core::{RdsError, TranscriptionJob, TranscriptionStatus};
use rds_store::EventStoreHandle;
use tokio::process::Command;

enum State {
    Idle,
    Recording { event_id: i64, started_at: DateTime<Utc>, buf: Vec<i16> },
}

/// One Recorder per Station (spec.md §3 "At most one Recording per
/// Station").
pub struct Recorder {
    pub station_pi: u32,
    sample_rate_hz: u32,
    max_recording_sec: u64,
    min_duration_sec: u64,
    state: State,
}

/// Handed to the finalize offload task on a non-discarded `stop()`.
pub struct FinalizeJob {
    pub event_id: i64,
    pub samples: Vec<i16>,
    pub sample_rate_hz: u32,
}

impl Recorder {
    pub fn new(station_pi: u32, sample_rate_hz: u32, max_recording_sec: u64, min_duration_sec: u64) -> Self {
        Self { station_pi, sample_rate_hz, max_recording_sec, min_duration_sec, state: State::Idle }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, State::Recording { .. })
    }

    /// Fails with [`RdsError::RecorderBusy`] if already recording — the
    /// rules engine's invariants should make this unreachable in practice
    /// (spec.md §7 `RecorderBusy`).
    pub fn start(&mut self, event_id: i64, now: DateTime<Utc>) -> Result<(), RdsError> {
        if self.is_recording() {
            return Err(RdsError::RecorderBusy(self.station_pi));
        }
        self.state = State::Recording { event_id, started_at: now, buf: Vec::new() };
        Ok(())
    }

    /// Appends PCM if Recording; returns `true` once `MAX_RECORDING_SEC` is
    /// exceeded so the caller can `stop()` it.
    pub fn feed(&mut self, chunk: &[i16], now: DateTime<Utc>) -> bool {
        let State::Recording { started_at, buf, .. } = &mut self.state else {
            return false;
        };
        buf.extend_from_slice(chunk);
        let elapsed = (now - *started_at).num_seconds().max(0) as u64;
        elapsed > self.max_recording_sec
    }

    /// Transitions to Finalizing and back to Idle. Returns `None` if the
    /// clip is too short or empty (discarded per spec.md §4.3 step 3),
    /// otherwise a [`FinalizeJob`] for the offload task.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<FinalizeJob> {
        let State::Recording { event_id, started_at, buf } = std::mem::replace(&mut self.state, State::Idle)
        else {
            return None;
        };
        let elapsed_sec = (now - started_at).num_milliseconds() as f64 / 1000.0;
        if buf.is_empty() || elapsed_sec < self.min_duration_sec as f64 {
            return None;
        }
        Some(FinalizeJob { event_id, samples: buf, sample_rate_hz: self.sample_rate_hz })
    }
}

/// Naive integer-ratio linear-interpolation resampler (spec.md §4.3 step 1:
/// "up 160, down 1710, or equivalent integer ratio to within 0.1%").
fn resample(samples: &[i16], up: u32, down: u32) -> Vec<i16> {
    if samples.is_empty() {
        return Vec::new();
    }
    let (up, down) = rds_core::math::reduced_ratio(up, down);
    let out_len = (samples.len() as u64 * up as u64 / down as u64) as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as u64 * down as u64 / up as u64;
        let frac = (i as u64 * down as u64 % up as u64) as f64 / up as f64;
        let a = samples[(src_pos as usize).min(samples.len() - 1)] as f64;
        let b = samples[(src_pos as usize + 1).min(samples.len() - 1)] as f64;
        out.push((a + (b - a) * frac).round() as i16);
    }
    out
}

const RECORDER_SAMPLE_RATE_HZ: u32 = 171_000;
const TRANSCRIBE_SAMPLE_RATE_HZ: u32 = 16_000;

fn write_wav(path: &Path, samples: &[i16], sample_rate_hz: u32) -> Result<(), RdsError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| RdsError::Storage(format!("wav create {}: {e}", path.display())))?;
    for &s in samples {
        writer.write_sample(s).map_err(|e| RdsError::Storage(format!("wav write: {e}")))?;
    }
    writer.finalize().map_err(|e| RdsError::Storage(format!("wav finalize: {e}")))
}

async fn encode_ogg(ffmpeg_bin: &str, wav_path: &Path, ogg_path: &Path) -> Result<(), RdsError> {
    let status = Command::new(ffmpeg_bin)
        .args(["-y", "-i"])
        .arg(wav_path)
        .args(["-c:a", "libopus"])
        .arg(ogg_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| RdsError::Storage(format!("spawning {ffmpeg_bin}: {e}")))?;
    if !status.success() {
        return Err(RdsError::Storage(format!("{ffmpeg_bin} exited with {status}")));
    }
    Ok(())
}

/// Runs the finalize pipeline (spec.md §4.3): resample, write WAV+OGG,
/// update the Event, return a queued [`TranscriptionJob`]. Any step
/// failing sets `transcription_status = error` and returns `Ok(None)` —
/// the event row is never left pointing at a file that doesn't exist.
pub async fn finalize(
    job: FinalizeJob,
    audio_dir: &Path,
    ffmpeg_bin: &str,
    store: &EventStoreHandle,
) -> Option<TranscriptionJob> {
    let wav_path = audio_dir.join(format!("{}.wav", job.event_id));
    let ogg_path = audio_dir.join(format!("{}.ogg", job.event_id));

    let resampled = {
        let samples = job.samples;
        let sample_rate_hz = job.sample_rate_hz;
        match tokio::task::spawn_blocking(move || resample(&samples, TRANSCRIBE_SAMPLE_RATE_HZ, sample_rate_hz)).await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, event_id = job.event_id, "resample task panicked");
                let _ = store.update_transcription_status(job.event_id, TranscriptionStatus::Error).await;
                return None;
            }
        }
    };

    let wav_path_clone = wav_path.clone();
    let write_result = tokio::task::spawn_blocking(move || write_wav(&wav_path_clone, &resampled, TRANSCRIBE_SAMPLE_RATE_HZ)).await;
    match write_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, event_id = job.event_id, "wav write failed");
            let _ = store.update_transcription_status(job.event_id, TranscriptionStatus::Error).await;
            return None;
        }
        Err(e) => {
            tracing::error!(error = %e, event_id = job.event_id, "wav write task panicked");
            let _ = store.update_transcription_status(job.event_id, TranscriptionStatus::Error).await;
            return None;
        }
    }

    if let Err(e) = encode_ogg(ffmpeg_bin, &wav_path, &ogg_path).await {
        tracing::error!(error = %e, event_id = job.event_id, "ogg encode failed");
        let _ = store.update_transcription_status(job.event_id, TranscriptionStatus::Error).await;
        return None;
    }

    let ogg_name = ogg_path.file_name().map(|n| n.to_string_lossy().to_string())?;
    if store.update_audio(job.event_id, ogg_name).await.is_err() {
        return None;
    }
    if store.update_transcription_status(job.event_id, TranscriptionStatus::Transcribing).await.is_err() {
        return None;
    }

    Some(TranscriptionJob {
        event_id: job.event_id,
        wav_path: PathBuf::from(&wav_path),
        enqueued_at: Utc::now(),
        attempt: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_busy_then_stop() {
        let mut rec = Recorder::new(0x9E04, RECORDER_SAMPLE_RATE_HZ, 600, 2);
        let t0 = Utc::now();
        rec.start(1, t0).unwrap();
        assert!(matches!(rec.start(1, t0), Err(RdsError::RecorderBusy(_))));
        rec.feed(&[1, 2, 3], t0);
        let job = rec.stop(t0 + chrono::Duration::seconds(3)).unwrap();
        assert_eq!(job.samples, vec![1, 2, 3]);
    }

    #[test]
    fn short_clip_is_discarded() {
        let mut rec = Recorder::new(0x9E04, RECORDER_SAMPLE_RATE_HZ, 600, 2);
        let t0 = Utc::now();
        rec.start(1, t0).unwrap();
        rec.feed(&[1, 2, 3], t0);
        assert!(rec.stop(t0 + chrono::Duration::milliseconds(500)).is_none());
    }

    #[test]
    fn feed_reports_cap_once_exceeded() {
        let mut rec = Recorder::new(0x9E04, RECORDER_SAMPLE_RATE_HZ, 600, 2);
        let t0 = Utc::now();
        rec.start(1, t0).unwrap();
        assert!(rec.feed(&[0; 8], t0 + chrono::Duration::seconds(601)));
        assert!(!rec.feed(&[0; 8], t0 + chrono::Duration::seconds(10)));
    }

    #[test]
    fn resample_preserves_length_ratio() {
        let samples: Vec<i16> = (0..1710).map(|i| (i % 100) as i16).collect();
        let out = resample(&samples, 16_000, 171_000);
        let expected = samples.len() * 16 / 171;
        assert!((out.len() as i64 - expected as i64).abs() <= 2);
    }
}
