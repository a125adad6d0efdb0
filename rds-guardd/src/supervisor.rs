// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Pipeline Supervisor (spec.md §4.5): owns every child process, tee, and
//! per-station state; restarts the whole pipeline (never individual
//! children) on failure with a capped exponential backoff.
//!
//! Grounded on the teacher's `trx-server/src/main.rs` task-orchestration
//! pattern (watch-channel shutdown, `Vec<JoinHandle<()>>`) and
//! `trx-core::rig::controller::policies::ExponentialBackoff`, reimplemented
//! here since `trx-core` itself isn't carried forward (see DESIGN.md).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rds_channelizer::Channelizer;
use rds_core::{DecodedGroup, RdsError, Station, TranscriptionJob};
use rds_decoder::RedseaProcess;
use rds_store::EventStoreHandle;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

use crate::alert::AlertPublisher;
use crate::config::{PipelineMode, RunPlan};
use crate::recorder::Recorder;
use crate::rules::{self, EventSlot, EventTracker, Transition};
use crate::tee::Tee;

/// Minimum uptime before a restart resets the backoff counter back to the
/// base delay — a pipeline that ran cleanly for a while is treated as
/// having recovered, not as still flapping (spec.md §4.5).
const BACKOFF_RESET_AFTER_SEC: i64 = 60;

/// Consecutive restart attempts (each hitting the 30 s backoff cap without
/// an intervening `BACKOFF_RESET_AFTER_SEC` of healthy uptime) before the
/// process gives up with exit code 2 (spec.md §6 "unrecoverable pipeline
/// failure after max restart attempts").
const MAX_CONSECUTIVE_RESTARTS: u32 = 10;

/// What became of the restart loop when its task ends — `main` uses this to
/// decide the process exit code (spec.md §6 exit codes 0/2).
pub enum SupervisorOutcome {
    ShutdownRequested,
    Fatal(String),
}

/// Capped exponential restart backoff (spec.md §4.5: "1 s, 2 s, 4 s, 8 s,
/// 30 s max").
struct RestartBackoff {
    attempt: u32,
    base: Duration,
    max: Duration,
}

impl RestartBackoff {
    fn new() -> Self {
        Self { attempt: 0, base: Duration::from_secs(1), max: Duration::from_secs(30) }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_delay(&mut self) -> Duration {
        let multiplier = 2u32.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(multiplier).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    NotStarted,
    Starting,
    Running,
    Error,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StationHealth {
    pub frequency_hz: u64,
    pub pi: Option<u32>,
    pub ps: String,
    pub groups_per_sec: f64,
    pub groups_total: u64,
    pub drops: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub mode: &'static str,
    pub stations: Vec<StationHealth>,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Shared, lock-guarded status snapshot the Web/WS facade reads
/// (spec.md §9 "never lend a live reference").
#[derive(Clone)]
pub struct SharedStatus(Arc<RwLock<PipelineStatus>>);

impl SharedStatus {
    fn new(mode: &'static str) -> Self {
        Self(Arc::new(RwLock::new(PipelineStatus {
            state: PipelineState::NotStarted,
            mode,
            stations: Vec::new(),
            started_at: None,
            last_error: None,
        })))
    }

    pub fn snapshot(&self) -> PipelineStatus {
        self.0.read().unwrap().clone()
    }

    fn set_state(&self, state: PipelineState) {
        self.0.write().unwrap().state = state;
    }

    fn set_error(&self, msg: String) {
        let mut guard = self.0.write().unwrap();
        guard.state = PipelineState::Error;
        guard.last_error = Some(msg);
    }

    fn set_stations(&self, stations: Vec<StationHealth>) {
        self.0.write().unwrap().stations = stations;
    }
}

/// Spawns the restart-loop task and returns the status handle consumers
/// poll plus its `JoinHandle` for shutdown bookkeeping.
pub fn spawn(
    plan: Arc<RunPlan>,
    store: EventStoreHandle,
    alert: Arc<AlertPublisher>,
    transcribe_tx: mpsc::Sender<TranscriptionJob>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> (SharedStatus, tokio::task::JoinHandle<SupervisorOutcome>) {
    let mode = match plan.mode {
        PipelineMode::Single => "single",
        PipelineMode::Multi => "multi",
    };
    let status = SharedStatus::new(mode);
    let status_for_task = status.clone();

    let handle = tokio::spawn(async move {
        let mut backoff = RestartBackoff::new();
        let mut consecutive_restarts: u32 = 0;
        loop {
            if *shutdown_rx.borrow() {
                status_for_task.set_state(PipelineState::Stopped);
                return SupervisorOutcome::ShutdownRequested;
            }
            status_for_task.set_state(PipelineState::Starting);
            let attempt_started = Utc::now();
            let run_result = run_pipeline_once(
                &plan,
                store.clone(),
                Arc::clone(&alert),
                transcribe_tx.clone(),
                status_for_task.clone(),
                shutdown_rx.clone(),
            )
            .await;

            if *shutdown_rx.borrow() {
                status_for_task.set_state(PipelineState::Stopped);
                return SupervisorOutcome::ShutdownRequested;
            }

            if (Utc::now() - attempt_started).num_seconds() >= BACKOFF_RESET_AFTER_SEC {
                backoff.reset();
                consecutive_restarts = 0;
            }

            let error_msg = match run_result {
                Ok(()) => {
                    // Clean exit without a shutdown request only happens if
                    // every child exited 0 — still treated as a failure to
                    // restart from, since the pipeline is meant to run
                    // forever.
                    "pipeline exited unexpectedly".to_string()
                }
                Err(e) => {
                    tracing::error!(error = %e, "pipeline run failed, scheduling restart");
                    e.to_string()
                }
            };
            status_for_task.set_error(error_msg.clone());

            consecutive_restarts += 1;
            if consecutive_restarts > MAX_CONSECUTIVE_RESTARTS {
                status_for_task.set_state(PipelineState::Stopped);
                return SupervisorOutcome::Fatal(format!(
                    "giving up after {consecutive_restarts} consecutive restarts: {error_msg}"
                ));
            }

            let delay = backoff.next_delay();
            tracing::warn!(delay_sec = delay.as_secs(), attempt = consecutive_restarts, "restarting pipeline after backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        status_for_task.set_state(PipelineState::Stopped);
                        return SupervisorOutcome::ShutdownRequested;
                    }
                }
            }
        }
    });

    (status, handle)
}

/// Runs one full lifecycle of the pipeline: spawns the capture tool(s),
/// per-station `redsea` children, Audio Tees, and the rules-engine loops;
/// returns once any child exits or shutdown is requested.
async fn run_pipeline_once(
    plan: &RunPlan,
    store: EventStoreHandle,
    alert: Arc<AlertPublisher>,
    transcribe_tx: mpsc::Sender<TranscriptionJob>,
    status: SharedStatus,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), RdsError> {
    let started_at = Utc::now();
    {
        let mut guard = status.0.write().unwrap();
        guard.started_at = Some(started_at);
        guard.last_error = None;
    }

    let station_count = plan.station_freqs_hz.len();
    let mut audio_txs = Vec::with_capacity(station_count);
    let mut audio_rxs = Vec::with_capacity(station_count);
    for _ in 0..station_count {
        let (tx, rx) = mpsc::channel::<Bytes>(64);
        audio_txs.push(tx);
        audio_rxs.push(rx);
    }

    let (mut source_child, source_bin) = match plan.mode {
        PipelineMode::Single => spawn_rtl_fm(plan, audio_txs.into_iter().next().unwrap())?,
        PipelineMode::Multi => spawn_rtl_sdr_channelizer(plan, audio_txs)?,
    };

    let mut station_handles = Vec::with_capacity(station_count);
    let mut station_status: Vec<Arc<RwLock<StationHealth>>> = Vec::with_capacity(station_count);
    for (idx, (&freq_hz, audio_rx)) in plan.station_freqs_hz.iter().zip(audio_rxs).enumerate() {
        let health = Arc::new(RwLock::new(StationHealth {
            frequency_hz: freq_hz as u64,
            pi: None,
            ps: String::new(),
            groups_per_sec: 0.0,
            groups_total: 0,
            drops: 0,
        }));
        station_status.push(Arc::clone(&health));
        station_handles.push(spawn_station(
            idx,
            freq_hz as u64,
            plan,
            audio_rx,
            store.clone(),
            Arc::clone(&alert),
            transcribe_tx.clone(),
            health,
            shutdown_rx.clone(),
        )?);
    }

    status.set_state(PipelineState::Running);

    let status_poller = {
        let status = status.clone();
        let station_status = station_status.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(2));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = station_status.iter().map(|h| h.read().unwrap().clone()).collect();
                        status.set_stations(snapshot);
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    };

    tokio::select! {
        status_result = source_child.wait() => {
            status_poller.abort();
            for h in station_handles {
                h.abort();
            }
            match status_result {
                Ok(exit) if exit.success() => Ok(()),
                Ok(exit) => Err(RdsError::Pipeline(format!("{source_bin} exited with {exit}"))),
                Err(e) => Err(RdsError::Pipeline(format!("waiting on {source_bin}: {e}"))),
            }
        }
        _ = shutdown_rx.changed() => {
            status_poller.abort();
            let _ = source_child.start_kill();
            let _ = source_child.wait().await;
            let grace = Duration::from_secs(plan.shutdown_grace_sec);
            let drain = futures_util::future::join_all(station_handles);
            if tokio::time::timeout(grace, drain).await.is_err() {
                tracing::warn!("station tasks did not drain within shutdown grace period");
            }
            Ok(())
        }
    }
}

fn spawn_rtl_fm(plan: &RunPlan, audio_tx: mpsc::Sender<Bytes>) -> Result<(Child, String), RdsError> {
    let freq_hz = plan.station_freqs_hz[0] as u64;
    let mut child = Command::new(&plan.rtl_fm_bin)
        .args(["-f", &freq_hz.to_string()])
        .args(["-M", "fm"])
        .args(["-s", "171000"])
        .args(["-d", &plan.rtl_sdr_device])
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RdsError::Device(format!("spawning {}: {e}", plan.rtl_fm_bin)))?;

    let stdout = child.stdout.take().ok_or_else(|| RdsError::Device("rtl_fm stdout missing".into()))?;
    tokio::spawn(pump_raw_pcm(stdout, vec![audio_tx]));

    Ok((child, plan.rtl_fm_bin.clone()))
}

fn spawn_rtl_sdr_channelizer(
    plan: &RunPlan,
    audio_txs: Vec<mpsc::Sender<Bytes>>,
) -> Result<(Child, String), RdsError> {
    let mut child = Command::new(&plan.rtl_sdr_bin)
        .args(["-f", &(rds_channelizer::INPUT_SAMPLE_RATE_HZ as u64).to_string()])
        .args(["-s", &(rds_channelizer::INPUT_SAMPLE_RATE_HZ as u64).to_string()])
        .args(["-d", &plan.rtl_sdr_device])
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RdsError::Device(format!("spawning {}: {e}", plan.rtl_sdr_bin)))?;

    let stdout = child.stdout.take().ok_or_else(|| RdsError::Device("rtl_sdr stdout missing".into()))?;
    let mut channelizer = Channelizer::new(&plan.station_freqs_hz)?;

    tokio::spawn(async move {
        let mut reader = stdout;
        let mut buf = vec![0u8; rds_channelizer::BLOCK_SAMPLES * 2];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let pcm_per_station = channelizer.process_block(&buf[..n]);
            for (idx, pcm) in pcm_per_station.into_iter().enumerate() {
                let bytes = pcm_to_le_bytes(&pcm);
                if audio_txs[idx].try_send(bytes).is_err() {
                    channelizer.record_drop(idx);
                }
            }
        }
    });

    Ok((child, plan.rtl_sdr_bin.clone()))
}

fn pcm_to_le_bytes(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    Bytes::from(out)
}

/// Reads raw bytes straight off a single-station PCM source and forwards
/// them as chunks to the station's audio channel (spec.md §4.2 "~8 KiB
/// chunks").
async fn pump_raw_pcm(mut stdout: impl tokio::io::AsyncRead + Unpin, sinks: Vec<mpsc::Sender<Bytes>>) {
    let mut buf = vec![0u8; crate::tee::CHUNK_BYTES];
    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        for sink in &sinks {
            if sink.send(chunk.clone()).await.is_err() {
                return;
            }
        }
    }
}

/// Per-station actor: owns the `redsea` child, the Station/EventTracker/
/// Recorder triple, and drives the rules engine off decoded groups.
#[allow(clippy::too_many_arguments)]
fn spawn_station(
    idx: usize,
    freq_hz: u64,
    plan: &RunPlan,
    mut audio_rx: mpsc::Receiver<Bytes>,
    store: EventStoreHandle,
    alert: Arc<AlertPublisher>,
    transcribe_tx: mpsc::Sender<TranscriptionJob>,
    health: Arc<RwLock<StationHealth>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>, RdsError> {
    let mut redsea = RedseaProcess::spawn(&plan.redsea_bin)?;
    let mut stdin = redsea.take_stdin().ok_or_else(|| RdsError::Pipeline("redsea stdin already taken".into()))?;
    let stdout = redsea.take_stdout().ok_or_else(|| RdsError::Pipeline("redsea stdout already taken".into()))?;

    let (decoder_tx, mut decoder_rx) = mpsc::channel::<Bytes>(64);
    let (recorder_tx, mut recorder_rx) = mpsc::channel::<Bytes>(64);
    let (group_tx, mut group_rx) = mpsc::channel::<DecodedGroup>(256);

    tokio::spawn(async move {
        while let Some(chunk) = decoder_rx.recv().await {
            if stdin.write_all(&chunk).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(rds_decoder::run_line_reader(stdout, group_tx));

    let ffmpeg_bin = plan.ffmpeg_bin.clone();
    let audio_dir = plan.audio_dir.clone();
    let max_recording_sec = plan.max_recording_sec;
    let min_duration_sec = plan.min_duration_sec;

    let handle = tokio::spawn(async move {
        let mut tee = Tee::new(decoder_tx, recorder_tx);
        let mut station = Station::new(freq_hz);
        let mut tracker = EventTracker::new();
        let mut recorder = Recorder::new(0, 171_000, max_recording_sec, min_duration_sec);
        let mut active_events: HashMap<EventSlot, i64> = HashMap::new();
        let mut redsea = redsea;
        let mut eon_ticker = tokio::time::interval(Duration::from_secs(10));

        loop {
            tokio::select! {
                maybe_chunk = audio_rx.recv() => {
                    let Some(chunk) = maybe_chunk else { break };
                    for piece in chunk.chunks(crate::tee::CHUNK_BYTES) {
                        if tee.feed(Bytes::copy_from_slice(piece)).await.is_err() {
                            return;
                        }
                    }
                }
                maybe_pcm = recorder_rx.recv() => {
                    let Some(pcm_bytes) = maybe_pcm else { continue };
                    if recorder.is_recording() {
                        let samples = bytes_to_i16_le(&pcm_bytes);
                        if recorder.feed(&samples, Utc::now()) {
                            if let Some(event_id) = finalize_recording(&mut recorder, &audio_dir, &ffmpeg_bin, &store, &transcribe_tx).await {
                                let slot = active_events.iter().find(|&(_, &id)| id == event_id).map(|(s, _)| *s);
                                if let Some(slot) = slot {
                                    active_events.remove(&slot);
                                    match slot {
                                        EventSlot::Traffic => tracker.traffic_open = false,
                                        EventSlot::Emergency => tracker.emergency_open = false,
                                        EventSlot::Eon(_) => {}
                                    }
                                }
                                close_event_in_store(event_id, Utc::now(), true, &store, &alert).await;
                            }
                        }
                    }
                }
                maybe_group = group_rx.recv() => {
                    let Some(group) = maybe_group else { break };
                    {
                        let mut h = health.write().unwrap();
                        h.pi = station.pi;
                        h.ps = station.ps_trimmed().to_string();
                        h.groups_total = station.groups_total;
                        h.groups_per_sec = station.groups_per_sec;
                    }
                    if recorder.station_pi == 0 {
                        if let Some(pi) = station.pi {
                            recorder.station_pi = pi;
                        }
                    }
                    let prev_tp = station.tp;
                    let prev_radiotext = station.radiotext.clone();
                    let transitions = rules::apply(&group, &mut station, &mut tracker);
                    for t in transitions {
                        apply_transition(
                            t,
                            &group,
                            &station,
                            &mut recorder,
                            &mut active_events,
                            &store,
                            &alert,
                            &audio_dir,
                            &ffmpeg_bin,
                            &transcribe_tx,
                        )
                        .await;
                    }
                    if let Some(pty) = &station.prog_type {
                        alert.publish_pty(group.pi, pty).await;
                    }
                    alert.publish_ta(group.pi, station.ta).await;
                    // `tp`/`rt` update as RDS fields change regardless of
                    // whether any Event is open (spec.md §4.8(a), §6), so
                    // these publish off a before/after snapshot rather than
                    // any transition.
                    if station.tp != prev_tp {
                        alert.publish_tp(group.pi, station.tp).await;
                    }
                    if station.radiotext.trim_end() != prev_radiotext.trim_end() {
                        alert.publish_radiotext(group.pi, station.radiotext.trim_end()).await;
                    }
                    alert.publish_raw_group(group.pi, &group.group.to_string(), &group.to_raw_json()).await;
                }
                _ = eon_ticker.tick() => {
                    for other_pi in tracker.expired_eon(Utc::now()) {
                        if let Some(t) = rules::expire_eon(&mut tracker, other_pi) {
                            let synthetic_group = DecodedGroup {
                                pi: station.pi.unwrap_or(0),
                                group: rds_core::GroupKind::G14A,
                                tp: None,
                                prog_type: None,
                                pin: None,
                                ecc: None,
                                timestamp: Utc::now(),
                                payload: rds_core::GroupPayload::Unknown { raw: serde_json::Value::Null },
                            };
                            apply_transition(
                                t,
                                &synthetic_group,
                                &station,
                                &mut recorder,
                                &mut active_events,
                                &store,
                                &alert,
                                &audio_dir,
                                &ffmpeg_bin,
                                &transcribe_tx,
                            )
                            .await;
                        }
                    }
                }
                _ = redsea.wait() => break,
                _ = shutdown_rx.changed() => break,
            }
        }
        let _ = idx;
    });

    Ok(handle)
}

fn bytes_to_i16_le(bytes: &Bytes) -> Vec<i16> {
    bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect()
}

/// Stops the recorder (if still recording) and runs it through the
/// finalize pipeline, enqueuing a transcription job on success. Returns
/// the event id whose recording was finalized, so the caller can retire
/// whatever `EventSlot`/tracker state points at it — used both by the
/// normal `CloseEvent` transition and the `MAX_RECORDING_SEC` cap path
/// (spec.md §4.6 "OR recorder hits MAX_RECORDING_SEC").
async fn finalize_recording(
    recorder: &mut Recorder,
    audio_dir: &std::path::Path,
    ffmpeg_bin: &str,
    store: &EventStoreHandle,
    transcribe_tx: &mpsc::Sender<TranscriptionJob>,
) -> Option<i64> {
    let job = recorder.stop(Utc::now())?;
    let event_id = job.event_id;
    if let Some(transcription_job) = crate::recorder::finalize(job, audio_dir, ffmpeg_bin, store).await {
        crate::transcriber::enqueue(transcribe_tx, transcription_job, store).await;
    }
    Some(event_id)
}

/// Ends the Event row and publishes the held alert once its recording (if
/// any) has been finalized — the tail shared by both the rules-engine
/// `CloseEvent` transition and the recorder-cap path.
async fn close_event_in_store(event_id: i64, now: DateTime<Utc>, recorded: bool, store: &EventStoreHandle, alert: &Arc<AlertPublisher>) {
    if let Err(e) = store.end_event(event_id, now).await {
        tracing::error!(error = %e, "ending event failed");
    }
    match store.events(rds_store::EventFilter::default(), 200, 0).await {
        Ok((_, events)) => {
            if let Some(event) = events.into_iter().find(|e| e.id == event_id) {
                alert.publish_end(event, recorded);
            }
        }
        Err(e) => tracing::error!(error = %e, "refetching closed event failed"),
    }
}

/// Executes one rules-engine [`Transition`] against the store, recorder,
/// and alert publisher (spec.md §4.6 table, executed "in order").
#[allow(clippy::too_many_arguments)]
async fn apply_transition(
    transition: Transition,
    group: &DecodedGroup,
    station: &Station,
    recorder: &mut Recorder,
    active_events: &mut HashMap<EventSlot, i64>,
    store: &EventStoreHandle,
    alert: &Arc<AlertPublisher>,
    audio_dir: &std::path::Path,
    ffmpeg_bin: &str,
    transcribe_tx: &mpsc::Sender<TranscriptionJob>,
) {
    match transition {
        Transition::OpenEvent { slot, event_type, severity, data, start_recording } => {
            let new_event = rds_store::NewEvent {
                event_type,
                severity,
                station_pi: group.pi,
                station_ps: station.ps_trimmed().to_string(),
                frequency_hz: station.frequency_hz,
                started_at: group.timestamp,
                data,
            };
            match store.insert_event(new_event).await {
                Ok(event) => {
                    if let EventSlot::Eon(other_pi) = slot {
                        alert.publish_eon_ta(group.pi, other_pi, true).await;
                    }
                    active_events.insert(slot, event.id);
                    if start_recording {
                        if let Err(e) = recorder.start(event.id, group.timestamp) {
                            tracing::error!(error = %e, "recorder busy, skipping start");
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "inserting event failed"),
            }
        }
        Transition::CloseEvent { slot, stop_recording } => {
            if let EventSlot::Eon(other_pi) = slot {
                alert.publish_eon_ta(group.pi, other_pi, false).await;
            }
            if let Some(event_id) = active_events.remove(&slot) {
                let now = group.timestamp;
                let recorded = if stop_recording {
                    finalize_recording(recorder, audio_dir, ffmpeg_bin, store, transcribe_tx).await.is_some()
                } else {
                    false
                };
                close_event_in_store(event_id, now, recorded, store, alert).await;
            }
        }
        Transition::AppendRadiotext { slot, text } => {
            if let Some(event_id) = active_events.get(&slot) {
                if let Err(e) = store.append_radiotext(*event_id, text.clone()).await {
                    tracing::error!(error = %e, "appending radiotext failed");
                }
            }
        }
    }
}
