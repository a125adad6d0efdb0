// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Domain model: Station, Event, Recording, TranscriptionJob (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const PS_LEN: usize = 8;
const LONG_PS_LEN: usize = 32;
const RADIOTEXT_LEN: usize = 64;
const MAX_EVENT_RADIOTEXT_SNAPSHOTS: usize = 8;

/// Live, mutating state for one monitored FM frequency.
///
/// Owned exclusively by the Pipeline Supervisor; other components only ever
/// see a [`StationSnapshot`] copy (spec.md §9 "Cross-thread state" — never
/// lend a live reference).
#[derive(Debug, Clone)]
pub struct Station {
    pub frequency_hz: u64,
    pub pi: Option<u32>,
    pub ps: String,
    pub long_ps: String,
    pub prog_type: Option<String>,
    pub tp: bool,
    pub ta: bool,
    pub radiotext: String,
    pub now_artist: Option<String>,
    pub now_title: Option<String>,
    pub groups_total: u64,
    /// EWMA of groups/sec over a 10s window (spec.md §4.5 health reporting).
    pub groups_per_sec: f64,
    last_group_at: Option<DateTime<Utc>>,
    /// Consecutive groups seen since the last PI change, used to gate
    /// re-opening an Event after a hardware PI glitch (spec.md §4.6).
    pub groups_since_pi_change: u32,
}

impl Station {
    pub fn new(frequency_hz: u64) -> Self {
        Self {
            frequency_hz,
            pi: None,
            ps: String::new(),
            long_ps: String::new(),
            prog_type: None,
            tp: false,
            ta: false,
            radiotext: String::new(),
            now_artist: None,
            now_title: None,
            groups_total: 0,
            groups_per_sec: 0.0,
            last_group_at: None,
            groups_since_pi_change: 0,
        }
    }

    /// Update the rolling groups/sec EWMA and total counter. Called once per
    /// decoded group.
    pub fn record_group(&mut self, now: DateTime<Utc>) {
        self.groups_total += 1;
        if let Some(last) = self.last_group_at {
            let dt = (now - last).num_milliseconds().max(1) as f64 / 1000.0;
            let inst_rate = 1.0 / dt;
            // 10s window EWMA: alpha chosen so a step input settles in ~10s.
            const ALPHA: f64 = 0.1;
            self.groups_per_sec = self.groups_per_sec * (1.0 - ALPHA) + inst_rate * ALPHA;
        }
        self.last_group_at = Some(now);
    }

    /// Apply a PI change, resetting the glitch-debounce counter.
    pub fn set_pi(&mut self, pi: u32) -> bool {
        let changed = self.pi != Some(pi);
        if changed {
            self.pi = Some(pi);
            self.groups_since_pi_change = 0;
        } else {
            self.groups_since_pi_change = self.groups_since_pi_change.saturating_add(1);
        }
        changed
    }

    /// Assemble an 0A/0B PS segment (0..=3, 2 chars each) into `ps`.
    /// Returns `true` if the assembled name changed.
    pub fn set_ps_segment(&mut self, segment: u8, chars: [char; 2]) -> bool {
        let mut buf: Vec<char> = self.ps.chars().chain(std::iter::repeat(' ')).take(PS_LEN).collect();
        let idx = (segment as usize % (PS_LEN / 2)) * 2;
        buf[idx] = chars[0];
        buf[idx + 1] = chars[1];
        let assembled: String = buf.into_iter().collect();
        let trimmed_eq = assembled.trim_end() == self.ps.trim_end();
        self.ps = assembled;
        !trimmed_eq
    }

    pub fn ps_trimmed(&self) -> &str {
        self.ps.trim_end()
    }

    pub fn set_long_ps(&mut self, text: &str) -> bool {
        let truncated: String = text.chars().take(LONG_PS_LEN).collect();
        let changed = truncated != self.long_ps;
        self.long_ps = truncated;
        changed
    }

    pub fn set_radiotext(&mut self, text: &str) -> bool {
        let truncated: String = text.chars().take(RADIOTEXT_LEN).collect();
        let changed = truncated.trim_end() != self.radiotext.trim_end();
        self.radiotext = truncated;
        changed
    }

    pub fn set_prog_type(&mut self, pty: &str) -> bool {
        let changed = self.prog_type.as_deref() != Some(pty);
        self.prog_type = Some(pty.to_string());
        changed
    }

    pub fn is_alarm(&self) -> bool {
        self.prog_type.as_deref() == Some("Alarm")
    }

    pub fn snapshot(&self) -> StationSnapshot {
        StationSnapshot {
            frequency_hz: self.frequency_hz,
            pi: self.pi,
            ps: self.ps_trimmed().to_string(),
            long_ps: self.long_ps.clone(),
            prog_type: self.prog_type.clone(),
            tp: self.tp,
            ta: self.ta,
            radiotext: self.radiotext.trim_end().to_string(),
            now_artist: self.now_artist.clone(),
            now_title: self.now_title.clone(),
            groups_total: self.groups_total,
            groups_per_sec: self.groups_per_sec,
        }
    }
}

/// Read-only copy of a [`Station`] for facade consumers (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub frequency_hz: u64,
    pub pi: Option<u32>,
    pub ps: String,
    pub long_ps: String,
    pub prog_type: Option<String>,
    pub tp: bool,
    pub ta: bool,
    pub radiotext: String,
    pub now_artist: Option<String>,
    pub now_title: Option<String>,
    pub groups_total: u64,
    pub groups_per_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Traffic,
    Emergency,
    EonTraffic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Start,
    End,
    Transcribed,
    TranscriptionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionStatus {
    None,
    Recording,
    Saving,
    Transcribing,
    Done,
    Error,
    Timeout,
}

/// Persistent record of a qualifying broadcast episode (spec.md §3 `Event`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub event_type: EventType,
    pub severity: Severity,
    pub station_pi: u32,
    pub station_ps: String,
    pub frequency_hz: u64,
    pub state: EventState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Ordered, deduplicated RT snapshots, capped at 8 (invariant in
    /// spec.md §3).
    pub radiotext: Vec<String>,
    pub data: serde_json::Value,
    pub audio_path: Option<String>,
    pub transcription: Option<String>,
    pub transcription_status: TranscriptionStatus,
    pub transcription_duration_sec: Option<f64>,
}

impl Event {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i64,
        event_type: EventType,
        severity: Severity,
        station_pi: u32,
        station_ps: String,
        frequency_hz: u64,
        started_at: DateTime<Utc>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id,
            event_type,
            severity,
            station_pi,
            station_ps,
            frequency_hz,
            state: EventState::Start,
            started_at,
            ended_at: None,
            radiotext: Vec::new(),
            data,
            audio_path: None,
            transcription: None,
            transcription_status: TranscriptionStatus::None,
            transcription_duration_sec: None,
        }
    }

    /// Append a RadioText snapshot if it's new and there's room
    /// (invariant: ≤8 distinct entries, idempotent per spec.md §8 property 7).
    pub fn push_radiotext(&mut self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        if self.radiotext.iter().any(|t| t == text) {
            return false;
        }
        if self.radiotext.len() >= MAX_EVENT_RADIOTEXT_SNAPSHOTS {
            return false;
        }
        self.radiotext.push(text.to_string());
        true
    }

    pub fn duration_sec(&self) -> Option<f64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Ephemeral in-memory ring buffer of PCM bytes while a recording is active
/// (spec.md §3 `Recording`).
#[derive(Debug, Clone)]
pub struct Recording {
    pub event_id: i64,
    pub station_pi: u32,
    pub started_at: DateTime<Utc>,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl Recording {
    pub fn new(event_id: i64, station_pi: u32, started_at: DateTime<Utc>, sample_rate: u32) -> Self {
        Self {
            event_id,
            station_pi,
            started_at,
            sample_rate,
            channels: 1,
            samples: Vec::new(),
        }
    }

    pub fn elapsed_sec(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// A queued transcription job (spec.md §3 `TranscriptionJob`).
#[derive(Debug, Clone)]
pub struct TranscriptionJob {
    pub event_id: i64,
    pub wav_path: std::path::PathBuf,
    pub enqueued_at: DateTime<Utc>,
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps_segments_assemble_in_order() {
        let mut s = Station::new(103_300_000);
        s.set_ps_segment(0, ['P', '4']);
        s.set_ps_segment(1, [' ', 'S']);
        s.set_ps_segment(2, ['t', 'h']);
        s.set_ps_segment(3, ['l', 'm']);
        assert_eq!(s.ps_trimmed(), "P4 Sthlm");
    }

    #[test]
    fn event_radiotext_caps_at_eight_and_dedupes() {
        let mut e = Event::new(
            1,
            EventType::Traffic,
            Severity::Warning,
            0x9E04,
            "P4".into(),
            103_300_000,
            Utc::now(),
            serde_json::Value::Null,
        );
        for i in 0..10 {
            e.push_radiotext(&format!("text {i}"));
        }
        assert_eq!(e.radiotext.len(), 8);
        assert!(!e.push_radiotext("text 0"));
        assert_eq!(e.radiotext.len(), 8);
    }

    #[test]
    fn radiotext_append_is_idempotent() {
        let mut e = Event::new(
            1,
            EventType::Traffic,
            Severity::Warning,
            0x9E04,
            "P4".into(),
            103_300_000,
            Utc::now(),
            serde_json::Value::Null,
        );
        assert!(e.push_radiotext("hello"));
        assert!(!e.push_radiotext("hello"));
        assert_eq!(e.radiotext, vec!["hello".to_string()]);
    }

    #[test]
    fn duration_is_none_while_active() {
        let e = Event::new(
            1,
            EventType::Traffic,
            Severity::Warning,
            0x9E04,
            "P4".into(),
            103_300_000,
            Utc::now(),
            serde_json::Value::Null,
        );
        assert!(e.is_active());
        assert_eq!(e.duration_sec(), None);
    }
}
