// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

mod alert;
mod config;
mod recorder;
mod rules;
mod supervisor;
mod tee;
mod transcriber;
mod web;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use config::RunPlan;
use supervisor::SupervisorOutcome;

const ALERT_WS_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> ExitCode {
    let plan = match RunPlan::from_env() {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("rds-guardd: {e}");
            return ExitCode::from(1);
        }
    };

    rds_app::init_logging(plan.log_level.as_deref());
    info!(mode = ?plan.mode, stations = plan.station_freqs_hz.len(), "starting rds-guardd");

    let store = match rds_store::EventStoreHandle::spawn(plan.db_path.clone(), plan.audio_dir.clone()).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to open event store");
            return ExitCode::from(1);
        }
    };
    let retention_handle = rds_store::spawn_retention_sweep(store.clone(), plan.retention_days);

    let transcribe_backend = match transcriber::build_backend(&plan.transcribe) {
        Ok(backend) => backend,
        Err(e) => {
            error!(error = %e, "failed to build transcription backend");
            return ExitCode::from(1);
        }
    };
    let (transcribe_tx, transcribe_rx) = transcriber::spawn_queue(plan.transcribe.queue_capacity);

    let (ws_tx, _ws_rx) = broadcast::channel(ALERT_WS_CHANNEL_CAPACITY);
    let (mqtt_client, mqtt_event_loop_handle) = match alert::connect(&plan.mqtt) {
        Some((client, event_loop)) => (Some(client), Some(alert::spawn_event_loop_driver(event_loop))),
        None => {
            warn!("MQTT_HOST not set, alerts will only be published over /ws/console");
            (None, None)
        }
    };
    let alert_publisher = Arc::new(alert::AlertPublisher::new(
        mqtt_client,
        plan.mqtt.topic_prefix.clone(),
        Duration::from_secs(plan.alert_hold_timeout_sec),
        plan.mqtt.publish_raw,
        ws_tx.clone(),
        store.clone(),
    ));
    let transcribe_worker = tokio::spawn(transcriber::run_worker(
        transcribe_backend,
        transcribe_rx,
        store.clone(),
        Arc::clone(&alert_publisher),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let plan = Arc::new(plan);
    let (status, supervisor_handle) = supervisor::spawn(
        Arc::clone(&plan),
        store.clone(),
        Arc::clone(&alert_publisher),
        transcribe_tx.clone(),
        shutdown_rx.clone(),
    );

    let status_ticker = {
        let alert_publisher = Arc::clone(&alert_publisher);
        let status = status.clone();
        let interval_sec = plan.mqtt.status_interval_sec.max(1);
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_sec));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = status.snapshot();
                        alert_publisher.publish_system_status(&serde_json::json!({
                            "state": snapshot.state,
                            "mode": snapshot.mode,
                            "stations": snapshot.stations,
                            "last_error": snapshot.last_error,
                        }))
                        .await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    };

    let router = web::router(store.clone(), status.clone(), ws_tx.clone(), plan.audio_dir.clone());
    let http_handle = {
        let listen = plan.http.listen.clone();
        let port = plan.http.port;
        tokio::spawn(async move {
            if let Err(e) = web::serve(&listen, port, router).await {
                error!(error = %e, "http facade exited");
            }
        })
    };

    let exit_code = tokio::select! {
        outcome = supervisor_handle => {
            match outcome {
                Ok(SupervisorOutcome::Fatal(msg)) => {
                    error!(error = %msg, "pipeline supervisor gave up, exiting");
                    Some(ExitCode::from(2))
                }
                Ok(SupervisorOutcome::ShutdownRequested) => Some(ExitCode::SUCCESS),
                Err(e) => {
                    error!(error = %e, "pipeline supervisor task panicked");
                    Some(ExitCode::from(2))
                }
            }
        }
        _ = signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            None
        }
    };

    let _ = shutdown_tx.send(true);
    http_handle.abort();
    status_ticker.abort();
    retention_handle.abort();
    if let Some(handle) = mqtt_event_loop_handle {
        handle.abort();
    }
    drop(transcribe_tx);
    let grace = Duration::from_secs(plan.shutdown_grace_sec);
    if tokio::time::timeout(grace, transcribe_worker).await.is_err() {
        warn!("transcription worker did not drain within shutdown grace period");
    }

    exit_code.unwrap_or(ExitCode::SUCCESS)
}
