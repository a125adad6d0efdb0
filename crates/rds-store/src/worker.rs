// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rds_core::{Event, EventState, EventType, RdsError, Severity, TranscriptionStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{error, warn};

use crate::command::{Command, EventFilter, NewEvent};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type                  TEXT NOT NULL,
    severity                    TEXT NOT NULL,
    station_pi                  INTEGER NOT NULL,
    station_ps                  TEXT NOT NULL,
    frequency_hz                INTEGER NOT NULL,
    state                       TEXT NOT NULL,
    started_at                  TEXT NOT NULL,
    ended_at                    TEXT,
    radiotext                   TEXT NOT NULL,
    data                        TEXT NOT NULL,
    audio_path                  TEXT,
    transcription               TEXT,
    transcription_status        TEXT NOT NULL,
    transcription_duration_sec  REAL
);
CREATE INDEX IF NOT EXISTS idx_events_ended_at ON events(ended_at);
CREATE INDEX IF NOT EXISTS idx_events_station_type ON events(station_pi, event_type);
";

fn enum_to_text<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => unreachable!("store enums always serialize to a string"),
    }
}

fn text_to_enum<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, RdsError> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|e| RdsError::Storage(format!("corrupt enum column {text:?}: {e}")))
}

/// Owns the single `rusqlite` connection; every write goes through this
/// worker (spec.md §4.7 "Concurrency" — a single writer thread).
pub(crate) struct Worker {
    conn: Connection,
    audio_dir: PathBuf,
}

impl Worker {
    pub(crate) fn open(db_path: &Path, audio_dir: PathBuf) -> Result<Self, RdsError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RdsError::Storage(format!("creating db dir: {e}")))?;
        }
        std::fs::create_dir_all(&audio_dir)
            .map_err(|e| RdsError::Storage(format!("creating audio dir: {e}")))?;
        let conn = Connection::open(db_path)
            .map_err(|e| RdsError::Storage(format!("opening database: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| RdsError::Storage(format!("applying schema: {e}")))?;
        Ok(Self { conn, audio_dir })
    }

    /// Blocking command loop; run from `tokio::task::spawn_blocking`.
    pub(crate) fn run(self, mut rx: tokio::sync::mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                Command::InsertEvent { new_event, reply } => {
                    let _ = reply.send(self.insert_event(new_event));
                }
                Command::AppendRadiotext { id, text, reply } => {
                    let _ = reply.send(self.append_radiotext(id, &text));
                }
                Command::EndEvent { id, ended_at, reply } => {
                    let _ = reply.send(self.end_event(id, ended_at));
                }
                Command::UpdateAudio { id, path, reply } => {
                    let _ = reply.send(self.update_audio(id, &path));
                }
                Command::UpdateTranscription { id, text, status, duration_sec, reply } => {
                    let _ =
                        reply.send(self.update_transcription(id, &text, status, duration_sec));
                }
                Command::UpdateTranscriptionStatus { id, status, reply } => {
                    let _ = reply.send(self.update_transcription_status(id, status));
                }
                Command::ActiveEvents { reply } => {
                    let _ = reply.send(self.active_events());
                }
                Command::Events { filter, limit, offset, reply } => {
                    let _ = reply.send(self.events(&filter, limit, offset));
                }
                Command::PurgeOlderThan { days, reply } => {
                    let _ = reply.send(self.purge_older_than(days));
                }
                Command::ClearAll { reply } => {
                    let _ = reply.send(self.clear_all());
                }
            }
        }
    }

    /// Forcibly ends any row left `ended_at = null` from a prior run
    /// (spec.md §3 invariant 6, §9 "Startup recovery as idempotent step").
    pub(crate) fn close_stale_active_on_startup(&self) -> Result<(), RdsError> {
        let now = Utc::now();
        let affected = self
            .conn
            .execute(
                "UPDATE events
                 SET ended_at = ?1, state = ?2, transcription_status = ?3
                 WHERE ended_at IS NULL",
                params![
                    now,
                    enum_to_text(&EventState::End),
                    enum_to_text(&TranscriptionStatus::None),
                ],
            )
            .map_err(|e| RdsError::Storage(format!("closing stale events: {e}")))?;
        if affected > 0 {
            warn!(count = affected, "closed stale active events from a prior run");
        }
        Ok(())
    }

    fn insert_event(&self, new_event: NewEvent) -> Result<Event, RdsError> {
        self.conn
            .execute(
                "INSERT INTO events (
                    event_type, severity, station_pi, station_ps, frequency_hz,
                    state, started_at, ended_at, radiotext, data,
                    audio_path, transcription, transcription_status, transcription_duration_sec
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9, NULL, NULL, ?10, NULL)",
                params![
                    enum_to_text(&new_event.event_type),
                    enum_to_text(&new_event.severity),
                    new_event.station_pi,
                    new_event.station_ps,
                    new_event.frequency_hz,
                    enum_to_text(&EventState::Start),
                    new_event.started_at,
                    "[]",
                    new_event.data.to_string(),
                    enum_to_text(&TranscriptionStatus::None),
                ],
            )
            .map_err(|e| RdsError::Storage(format!("inserting event: {e}")))?;
        let id = self.conn.last_insert_rowid();
        self.get_event(id)?.ok_or_else(|| RdsError::Storage("insert produced no row".into()))
    }

    /// Idempotent per spec.md §8 property 7: feeding the same text twice
    /// yields a single entry.
    fn append_radiotext(&self, id: i64, text: &str) -> Result<bool, RdsError> {
        let Some(mut event) = self.get_event(id)? else {
            return Err(RdsError::Storage(format!("append_radiotext: no event {id}")));
        };
        if !event.push_radiotext(text) {
            return Ok(false);
        }
        let radiotext = serde_json::to_string(&event.radiotext)
            .map_err(|e| RdsError::Storage(format!("serializing radiotext: {e}")))?;
        self.conn
            .execute("UPDATE events SET radiotext = ?1 WHERE id = ?2", params![radiotext, id])
            .map_err(|e| RdsError::Storage(format!("updating radiotext: {e}")))?;
        Ok(true)
    }

    fn end_event(&self, id: i64, ended_at: DateTime<Utc>) -> Result<(), RdsError> {
        self.conn
            .execute(
                "UPDATE events SET state = ?1, ended_at = ?2 WHERE id = ?3",
                params![enum_to_text(&EventState::End), ended_at, id],
            )
            .map_err(|e| RdsError::Storage(format!("ending event: {e}")))?;
        Ok(())
    }

    fn update_audio(&self, id: i64, path: &str) -> Result<(), RdsError> {
        self.conn
            .execute("UPDATE events SET audio_path = ?1 WHERE id = ?2", params![path, id])
            .map_err(|e| RdsError::Storage(format!("updating audio path: {e}")))?;
        Ok(())
    }

    fn update_transcription(
        &self,
        id: i64,
        text: &str,
        status: TranscriptionStatus,
        duration_sec: f64,
    ) -> Result<(), RdsError> {
        self.conn
            .execute(
                "UPDATE events
                 SET transcription = ?1, transcription_status = ?2,
                     transcription_duration_sec = ?3, state = ?4
                 WHERE id = ?5",
                params![
                    text,
                    enum_to_text(&status),
                    duration_sec,
                    enum_to_text(&EventState::Transcribed),
                    id
                ],
            )
            .map_err(|e| RdsError::Storage(format!("updating transcription: {e}")))?;
        Ok(())
    }

    fn update_transcription_status(
        &self,
        id: i64,
        status: TranscriptionStatus,
    ) -> Result<(), RdsError> {
        self.conn
            .execute(
                "UPDATE events SET transcription_status = ?1 WHERE id = ?2",
                params![enum_to_text(&status), id],
            )
            .map_err(|e| RdsError::Storage(format!("updating transcription status: {e}")))?;
        Ok(())
    }

    fn get_event(&self, id: i64) -> Result<Option<Event>, RdsError> {
        self.conn
            .query_row("SELECT * FROM events WHERE id = ?1", params![id], row_to_event)
            .optional()
            .map_err(|e| RdsError::Storage(format!("reading event {id}: {e}")))
    }

    fn active_events(&self) -> Result<Vec<Event>, RdsError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM events WHERE ended_at IS NULL ORDER BY started_at DESC")
            .map_err(|e| RdsError::Storage(format!("preparing active_events: {e}")))?;
        let rows = stmt
            .query_map([], row_to_event)
            .map_err(|e| RdsError::Storage(format!("querying active_events: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| RdsError::Storage(format!("reading active_events rows: {e}")))
    }

    fn events(
        &self,
        filter: &EventFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<Event>), RdsError> {
        let type_filter = filter.event_type.map(|t| enum_to_text(&t));

        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM events
                 WHERE (?1 IS NULL OR event_type = ?1)
                   AND (?2 IS NULL OR started_at >= ?2)",
                params![type_filter, filter.since],
                |row| row.get(0),
            )
            .map_err(|e| RdsError::Storage(format!("counting events: {e}")))?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT * FROM events
                 WHERE (?1 IS NULL OR event_type = ?1)
                   AND (?2 IS NULL OR started_at >= ?2)
                 ORDER BY started_at DESC
                 LIMIT ?3 OFFSET ?4",
            )
            .map_err(|e| RdsError::Storage(format!("preparing events query: {e}")))?;
        let rows = stmt
            .query_map(params![type_filter, filter.since, limit, offset], row_to_event)
            .map_err(|e| RdsError::Storage(format!("querying events: {e}")))?;
        let events = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| RdsError::Storage(format!("reading events rows: {e}")))?;
        Ok((total, events))
    }

    /// Deletes rows older than `days` together with their audio files
    /// (spec.md §4.7 "Retention"), then sweeps orphan audio files older
    /// than `days + 1` that reference no surviving row.
    fn purge_older_than(&self, days: i64) -> Result<u64, RdsError> {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let mut stmt = self
            .conn
            .prepare("SELECT id, audio_path FROM events WHERE ended_at IS NOT NULL AND ended_at < ?1")
            .map_err(|e| RdsError::Storage(format!("preparing purge select: {e}")))?;
        let doomed: Vec<(i64, Option<String>)> = stmt
            .query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| RdsError::Storage(format!("querying purge candidates: {e}")))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| RdsError::Storage(format!("reading purge candidates: {e}")))?;

        let mut deleted = 0u64;
        for (id, audio_path) in &doomed {
            self.conn
                .execute("DELETE FROM events WHERE id = ?1", params![id])
                .map_err(|e| RdsError::Storage(format!("deleting event {id}: {e}")))?;
            if let Some(path) = audio_path {
                for candidate in sibling_extensions(path) {
                    if let Err(e) = std::fs::remove_file(&candidate) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %candidate.display(), error = %e, "failed to delete audio file");
                        }
                    }
                }
            }
            deleted += 1;
        }

        if let Err(e) = self.sweep_orphan_audio(days + 1) {
            error!(error = %e, "orphan audio sweep failed");
        }

        Ok(deleted)
    }

    fn sweep_orphan_audio(&self, orphan_age_days: i64) -> Result<(), RdsError> {
        let threshold = std::time::SystemTime::now()
            - std::time::Duration::from_secs((orphan_age_days.max(0) as u64) * 86_400);
        let entries = match std::fs::read_dir(&self.audio_dir) {
            Ok(entries) => entries,
            Err(e) => return Err(RdsError::Storage(format!("reading audio dir: {e}"))),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            if modified > threshold {
                continue;
            }
            let Ok(id) = stem.parse::<i64>() else { continue };
            let exists: bool = self
                .conn
                .query_row("SELECT 1 FROM events WHERE id = ?1", params![id], |_| Ok(()))
                .optional()
                .map_err(|e| RdsError::Storage(format!("checking orphan {id}: {e}")))?
                .is_some();
            if !exists {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to delete orphan audio file");
                }
            }
        }
        Ok(())
    }

    fn clear_all(&self) -> Result<(), RdsError> {
        self.conn
            .execute("DELETE FROM events", [])
            .map_err(|e| RdsError::Storage(format!("clearing events: {e}")))?;
        let entries = std::fs::read_dir(&self.audio_dir)
            .map_err(|e| RdsError::Storage(format!("reading audio dir: {e}")))?;
        for entry in entries.flatten() {
            let _ = std::fs::remove_file(entry.path());
        }
        Ok(())
    }
}

/// `<event_id>.wav` and `<event_id>.ogg` share a stem; both are removed
/// together (spec.md §3 invariant 7 "deletion is atomic per event").
fn sibling_extensions(audio_path: &str) -> Vec<PathBuf> {
    let path = PathBuf::from(audio_path);
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
        return vec![path];
    };
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    ["wav", "ogg"].iter().map(|ext| parent.join(format!("{stem}.{ext}"))).collect()
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let radiotext_json: String = row.get("radiotext")?;
    let radiotext: Vec<String> = serde_json::from_str(&radiotext_json).unwrap_or_default();
    let data_json: String = row.get("data")?;
    let data: serde_json::Value =
        serde_json::from_str(&data_json).unwrap_or(serde_json::Value::Null);

    let event_type_text: String = row.get("event_type")?;
    let severity_text: String = row.get("severity")?;
    let state_text: String = row.get("state")?;
    let transcription_status_text: String = row.get("transcription_status")?;

    Ok(Event {
        id: row.get("id")?,
        event_type: text_to_enum::<EventType>(&event_type_text)
            .unwrap_or(EventType::Traffic),
        severity: text_to_enum::<Severity>(&severity_text).unwrap_or(Severity::Info),
        station_pi: row.get::<_, i64>("station_pi")? as u32,
        station_ps: row.get("station_ps")?,
        frequency_hz: row.get::<_, i64>("frequency_hz")? as u64,
        state: text_to_enum::<EventState>(&state_text).unwrap_or(EventState::End),
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        radiotext,
        data,
        audio_path: row.get("audio_path")?,
        transcription: row.get("transcription")?,
        transcription_status: text_to_enum::<TranscriptionStatus>(&transcription_status_text)
            .unwrap_or(TranscriptionStatus::None),
        transcription_duration_sec: row.get("transcription_duration_sec")?,
    })
}
