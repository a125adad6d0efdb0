// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Alert Publisher (spec.md §4.8): holds the end-of-lifecycle alert for a
//! traffic/emergency Event until its transcription settles or
//! `alert_hold_timeout` elapses, then publishes exactly one `rds/alert`
//! message. Also owns the continuous per-field MQTT topics (§6) and the
//! periodic `rds/system/status` / gated `rds/system/raw` topics, since
//! they're all one outbound MQTT leg (spec.md §5 "the MQTT client is used
//! from a single publisher task").
//!
//! Grounded on SPEC_FULL.md §9's "pending-alert coordination as a per-event
//! oneshot notifier" note; the MQTT transport itself (`rumqttc`) is a new
//! dependency the pack doesn't carry (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rds_core::{Event, EventType, TranscriptionStatus};
use rds_store::EventStoreHandle;
use rumqttc::{AsyncClient, ConnectionError, Event as MqttEvent, MqttOptions, QoS};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

use crate::config::MqttConfig;

/// One line pushed to the live dashboard over `/ws/console` (spec.md §6).
#[derive(Debug, Clone, Serialize)]
pub struct WsEnvelope {
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<Utc>,
}

fn envelope(topic: impl Into<String>, payload: serde_json::Value) -> WsEnvelope {
    WsEnvelope { topic: topic.into(), payload, timestamp: Utc::now() }
}

fn event_type_topic_word(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Traffic => "traffic_announcement",
        EventType::Emergency => "emergency_broadcast",
        EventType::EonTraffic => "eon_traffic",
    }
}

/// Connects to the broker (spec.md §6 "MQTT topic tree"); returns the
/// client plus the event loop the caller must keep polling for the
/// connection to make progress (`spawn_event_loop_driver`).
pub fn connect(cfg: &MqttConfig) -> Option<(AsyncClient, rumqttc::EventLoop)> {
    let host = cfg.host.as_deref()?;
    let mut opts = MqttOptions::new(cfg.client_id.clone(), host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(30));
    Some(AsyncClient::new(opts, 64))
}

/// Drains the `rumqttc` event loop forever, logging (not panicking) on
/// transient connection errors — the broker coming and going shouldn't take
/// the rest of the pipeline down with it.
pub fn spawn_event_loop_driver(mut event_loop: rumqttc::EventLoop) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(MqttEvent::Incoming(_)) | Ok(MqttEvent::Outgoing(_)) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "mqtt event loop error, retrying");
                    if matches!(e, ConnectionError::RequestsDone) {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

pub struct AlertPublisher {
    client: Option<AsyncClient>,
    prefix: String,
    hold_timeout: Duration,
    publish_raw: bool,
    pending: Mutex<HashMap<i64, oneshot::Sender<()>>>,
    ws_tx: broadcast::Sender<WsEnvelope>,
    store: EventStoreHandle,
}

impl AlertPublisher {
    pub fn new(
        client: Option<AsyncClient>,
        prefix: String,
        hold_timeout: Duration,
        publish_raw: bool,
        ws_tx: broadcast::Sender<WsEnvelope>,
        store: EventStoreHandle,
    ) -> Self {
        Self { client, prefix, hold_timeout, publish_raw, pending: Mutex::new(HashMap::new()), ws_tx, store }
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.prefix)
    }

    async fn publish(&self, topic: &str, payload: &serde_json::Value, retain: bool) {
        if let Some(client) = &self.client {
            let bytes = payload.to_string();
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, bytes).await {
                tracing::warn!(error = %e, topic, "mqtt publish failed");
            }
        }
    }

    fn broadcast_ws(&self, topic: impl Into<String>, payload: serde_json::Value) {
        let _ = self.ws_tx.send(envelope(topic, payload));
    }

    /// Continuous per-field topics, published regardless of event state
    /// (spec.md §4.8 "(a)").
    pub async fn publish_ta(&self, pi: u32, active: bool) {
        let payload = serde_json::json!({ "active": active, "timestamp": Utc::now() });
        self.publish(&self.topic(&format!("{pi:#06x}/traffic/ta")), &payload, true).await;
        self.broadcast_ws(format!("{pi:04X}/traffic/ta"), payload);
    }

    pub async fn publish_tp(&self, pi: u32, tp: bool) {
        let payload = serde_json::json!(tp);
        self.publish(&self.topic(&format!("{pi:#06x}/traffic/tp")), &payload, true).await;
        self.broadcast_ws(format!("{pi:04X}/traffic/tp"), payload);
    }

    pub async fn publish_radiotext(&self, pi: u32, radiotext: &str) {
        let payload = serde_json::json!({ "radiotext": radiotext });
        self.publish(&self.topic(&format!("{pi:#06x}/programme/rt")), &payload, true).await;
        self.broadcast_ws(format!("{pi:04X}/programme/rt"), payload);
    }

    pub async fn publish_pty(&self, pi: u32, prog_type: &str) {
        let payload = serde_json::json!(prog_type);
        self.publish(&self.topic(&format!("{pi:#06x}/station/pty")), &payload, true).await;
        self.broadcast_ws(format!("{pi:04X}/station/pty"), payload);
    }

    pub async fn publish_eon_ta(&self, pi: u32, other_pi: u32, active: bool) {
        let payload = serde_json::json!(active);
        self.publish(&self.topic(&format!("{pi:#06x}/eon/{other_pi:#06x}/ta")), &payload, false).await;
        self.broadcast_ws(format!("{pi:04X}/eon/{other_pi:04X}/ta"), payload);
    }

    pub async fn publish_raw_group(&self, pi: u32, group: &str, raw: &serde_json::Value) {
        self.broadcast_ws(format!("{pi:04X}/{group}"), raw.clone());
        if self.publish_raw {
            self.publish(&self.topic("system/raw"), raw, false).await;
        }
    }

    pub async fn publish_system_status(&self, status: &serde_json::Value) {
        self.publish(&self.topic("system/status"), status, false).await;
    }

    /// Wakes the hold for `event_id` once its transcription settles
    /// (spec.md §9 "the Transcriber signals, the Alert Publisher awaits
    /// with timeout").
    pub fn notify_transcribed(&self, event_id: i64) {
        if let Some(tx) = self.pending.lock().unwrap().remove(&event_id) {
            let _ = tx.send(());
        }
    }

    /// Holds the end-of-lifecycle alert for `event` until transcription
    /// completes or `alert_hold_timeout` elapses, then publishes exactly
    /// one `rds/alert` message (spec.md §4.8, §8 property 3).
    pub fn publish_end(self: &std::sync::Arc<Self>, event: Event, recorded: bool) {
        let this = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let (tx, rx) = oneshot::channel();
            this.pending.lock().unwrap().insert(event.id, tx);

            let timed_out = tokio::time::timeout(this.hold_timeout, rx).await.is_err();
            this.pending.lock().unwrap().remove(&event.id);

            let (final_status, transcribed_text) = if !recorded {
                (TranscriptionStatus::None, None)
            } else if timed_out {
                (TranscriptionStatus::Timeout, None)
            } else {
                match this.refetch(event.id).await {
                    Some(e) if e.transcription_status == TranscriptionStatus::Done => {
                        (TranscriptionStatus::Done, e.transcription)
                    }
                    Some(e) => (e.transcription_status, None),
                    None => (TranscriptionStatus::Error, None),
                }
            };

            let payload = serde_json::json!({
                "event_type": event_type_topic_word(event.event_type),
                "state": "end",
                "transcribed_text": transcribed_text,
                "transcription_status": final_status,
                "station": {
                    "pi": format!("{:#06x}", event.station_pi),
                    "ps": event.station_ps,
                    "frequency": event.frequency_hz,
                },
                "duration_sec": event.duration_sec(),
                "radiotext": event.radiotext,
                "audio_available": event.audio_path.is_some(),
                "timestamp": Utc::now(),
            });
            this.publish(&this.topic("alert"), &payload, false).await;
            this.broadcast_ws("alert", payload);

            if final_status == TranscriptionStatus::Done {
                if let Some(text) = this.refetch(event.id).await.and_then(|e| e.transcription) {
                    let topic_word = event_type_topic_word(event.event_type);
                    let tpayload = serde_json::json!({
                        "event_id": event.id,
                        "transcription": text,
                        "language": "sv",
                        "duration_sec": event.duration_sec(),
                    });
                    this.publish(
                        &this.topic(&format!("{:#06x}/{topic_word}/transcription", event.station_pi)),
                        &tpayload,
                        true,
                    )
                    .await;
                    this.broadcast_ws("transcription", tpayload);
                }
            }
        });
    }

    /// Looks the event back up by id after the hold completes. There is no
    /// get-by-id query on the store (spec.md's `EventFilter` only
    /// discriminates by type/since), so this scans the most recent page —
    /// acceptable since it runs once per finished event, not per group.
    async fn refetch(&self, id: i64) -> Option<Event> {
        match self.store.events(rds_store::EventFilter::default(), 200, 0).await {
            Ok((_, events)) => events.into_iter().find(|e| e.id == id),
            Err(e) => {
                tracing::warn!(error = %e, event_id = id, "refetching event for alert publish failed");
                None
            }
        }
    }
}
