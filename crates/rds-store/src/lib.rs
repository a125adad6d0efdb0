// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Single-writer embedded SQL event store (spec.md §4.7).
//!
//! Every write happens on one dedicated thread owning the `rusqlite`
//! connection; callers talk to it through [`EventStoreHandle`], a
//! request/oneshot-reply handle modeled on the teacher's rig task
//! (`trx-server/src/rig_task.rs`'s `RigRequest`/reply pattern) applied to
//! storage instead of CAT commands.

mod command;
mod worker;

pub use command::{EventFilter, NewEvent};

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rds_core::{Event, RdsError, TranscriptionStatus};
use tokio::sync::{mpsc, oneshot};
use tracing::error;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Cloneable, cheap handle to the store worker.
#[derive(Clone)]
pub struct EventStoreHandle {
    tx: mpsc::Sender<command::Command>,
}

impl EventStoreHandle {
    /// Opens (creating if needed) the database at `db_path`, runs
    /// `close_stale_active_on_startup` once synchronously, then starts the
    /// worker thread and returns a handle to it.
    pub async fn spawn(db_path: PathBuf, audio_dir: PathBuf) -> Result<Self, RdsError> {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let worker = tokio::task::spawn_blocking(move || {
            let worker = worker::Worker::open(&db_path, audio_dir)?;
            worker.close_stale_active_on_startup()?;
            Ok::<_, RdsError>(worker)
        })
        .await
        .map_err(|e| RdsError::Storage(format!("store worker startup panicked: {e}")))??;

        tokio::task::spawn_blocking(move || worker.run(rx));
        Ok(Self { tx })
    }

    async fn call<T: Send + 'static>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, RdsError>>) -> command::Command,
    ) -> Result<T, RdsError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RdsError::Storage("event store worker is gone".into()))?;
        reply_rx
            .await
            .map_err(|_| RdsError::Storage("event store worker dropped the reply".into()))?
    }

    pub async fn insert_event(&self, new_event: NewEvent) -> Result<Event, RdsError> {
        self.call(|reply| command::Command::InsertEvent { new_event, reply }).await
    }

    pub async fn append_radiotext(&self, id: i64, text: impl Into<String>) -> Result<bool, RdsError> {
        let text = text.into();
        self.call(|reply| command::Command::AppendRadiotext { id, text, reply }).await
    }

    pub async fn end_event(&self, id: i64, ended_at: DateTime<Utc>) -> Result<(), RdsError> {
        self.call(|reply| command::Command::EndEvent { id, ended_at, reply }).await
    }

    pub async fn update_audio(&self, id: i64, path: impl Into<String>) -> Result<(), RdsError> {
        let path = path.into();
        self.call(|reply| command::Command::UpdateAudio { id, path, reply }).await
    }

    pub async fn update_transcription(
        &self,
        id: i64,
        text: impl Into<String>,
        status: TranscriptionStatus,
        duration_sec: f64,
    ) -> Result<(), RdsError> {
        let text = text.into();
        self.call(|reply| command::Command::UpdateTranscription {
            id,
            text,
            status,
            duration_sec,
            reply,
        })
        .await
    }

    pub async fn update_transcription_status(
        &self,
        id: i64,
        status: TranscriptionStatus,
    ) -> Result<(), RdsError> {
        self.call(|reply| command::Command::UpdateTranscriptionStatus { id, status, reply })
            .await
    }

    pub async fn active_events(&self) -> Result<Vec<Event>, RdsError> {
        self.call(|reply| command::Command::ActiveEvents { reply }).await
    }

    pub async fn events(
        &self,
        filter: EventFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<Event>), RdsError> {
        self.call(|reply| command::Command::Events { filter, limit, offset, reply }).await
    }

    pub async fn purge_older_than(&self, days: i64) -> Result<u64, RdsError> {
        self.call(|reply| command::Command::PurgeOlderThan { days, reply }).await
    }

    pub async fn clear_all(&self) -> Result<(), RdsError> {
        self.call(|reply| command::Command::ClearAll { reply }).await
    }
}

/// Spawns the daily retention sweep (spec.md §4.7 "Retention"), owned by
/// the store the way the teacher gives every long-lived background concern
/// its own task spawned from `main.rs`.
pub fn spawn_retention_sweep(
    store: EventStoreHandle,
    retention_days: i64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            ticker.tick().await;
            match store.purge_older_than(retention_days).await {
                Ok(deleted) if deleted > 0 => {
                    tracing::info!(deleted, "retention sweep purged expired events")
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "retention sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rds_core::{EventType, Severity};

    async fn test_store() -> (EventStoreHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("events.db");
        let audio_dir = dir.path().join("audio");
        let store = EventStoreHandle::spawn(db_path, audio_dir).await.unwrap();
        (store, dir)
    }

    fn sample_event() -> NewEvent {
        NewEvent {
            event_type: EventType::Traffic,
            severity: Severity::Warning,
            station_pi: 0x9E04,
            station_ps: "P4 Sthlm".into(),
            frequency_hz: 103_300_000,
            started_at: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn insert_then_fetch_active() {
        let (store, _dir) = test_store().await;
        let event = store.insert_event(sample_event()).await.unwrap();
        assert!(event.id > 0);
        let active = store.active_events().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, event.id);
    }

    #[tokio::test]
    async fn append_radiotext_is_idempotent() {
        let (store, _dir) = test_store().await;
        let event = store.insert_event(sample_event()).await.unwrap();
        assert!(store.append_radiotext(event.id, "hello").await.unwrap());
        assert!(!store.append_radiotext(event.id, "hello").await.unwrap());
        let (_, events) = store.events(EventFilter::default(), 10, 0).await.unwrap();
        assert_eq!(events[0].radiotext, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn end_event_removes_it_from_active() {
        let (store, _dir) = test_store().await;
        let event = store.insert_event(sample_event()).await.unwrap();
        store.end_event(event.id, Utc::now()).await.unwrap();
        let active = store.active_events().await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn stale_active_events_are_closed_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("events.db");
        let audio_dir = dir.path().join("audio");
        {
            let store = EventStoreHandle::spawn(db_path.clone(), audio_dir.clone()).await.unwrap();
            store.insert_event(sample_event()).await.unwrap();
        }
        let store = EventStoreHandle::spawn(db_path, audio_dir).await.unwrap();
        let active = store.active_events().await.unwrap();
        assert!(active.is_empty());
        let (_, events) = store.events(EventFilter::default(), 10, 0).await.unwrap();
        assert!(events[0].ended_at.is_some());
    }

    #[tokio::test]
    async fn purge_older_than_deletes_old_ended_events() {
        let (store, _dir) = test_store().await;
        let event = store.insert_event(sample_event()).await.unwrap();
        store.end_event(event.id, Utc::now() - chrono::Duration::days(40)).await.unwrap();
        let deleted = store.purge_older_than(30).await.unwrap();
        assert_eq!(deleted, 1);
        let (total, _) = store.events(EventFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn clear_all_empties_store() {
        let (store, _dir) = test_store().await;
        store.insert_event(sample_event()).await.unwrap();
        store.clear_all().await.unwrap();
        let (total, _) = store.events(EventFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 0);
    }
}
