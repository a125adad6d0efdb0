// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Messages sent to the single-writer store worker (spec.md §4.7).

use chrono::{DateTime, Utc};
use rds_core::{Event, EventType, RdsError, Severity, TranscriptionStatus};
use tokio::sync::oneshot;

/// Parameters for a new Event row (spec.md §3 `Event`).
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub severity: Severity,
    pub station_pi: u32,
    pub station_ps: String,
    pub frequency_hz: u64,
    pub started_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Filter for `events(filter, limit, offset)` (spec.md §6 `GET /api/events`).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub since: Option<DateTime<Utc>>,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, RdsError>>;

pub(crate) enum Command {
    InsertEvent { new_event: NewEvent, reply: Reply<Event> },
    AppendRadiotext { id: i64, text: String, reply: Reply<bool> },
    EndEvent { id: i64, ended_at: DateTime<Utc>, reply: Reply<()> },
    UpdateAudio { id: i64, path: String, reply: Reply<()> },
    UpdateTranscription {
        id: i64,
        text: String,
        status: TranscriptionStatus,
        duration_sec: f64,
        reply: Reply<()>,
    },
    UpdateTranscriptionStatus { id: i64, status: TranscriptionStatus, reply: Reply<()> },
    ActiveEvents { reply: Reply<Vec<Event>> },
    Events { filter: EventFilter, limit: i64, offset: i64, reply: Reply<(i64, Vec<Event>)> },
    PurgeOlderThan { days: i64, reply: Reply<u64> },
    ClearAll { reply: Reply<()> },
}
