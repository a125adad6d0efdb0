// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Rules Engine (spec.md §4.6): a pure function from a decoded group to a
//! list of lifecycle transitions, matching the teacher's preference for a
//! pure state-machine core (`rig/controller/machine.rs`) driven by an
//! imperative shell — no I/O here, so it's unit-testable without a store,
//! recorder, or MQTT client in scope.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rds_core::{DecodedGroup, EventType, GroupPayload, Severity, Station};
use serde_json::json;

/// Consecutive stable groups required after a PI glitch before new Events
/// may be opened again (spec.md §4.6 "Edge policies").
const PI_STABILITY_GROUPS: u32 = 5;
/// EON traffic relays auto-expire after this long without a flip to
/// `other_network.ta = false` (spec.md §4.6, table row "Group 14A").
pub const EON_EXPIRY_SEC: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSlot {
    Traffic,
    Emergency,
    Eon(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    OpenEvent {
        slot: EventSlot,
        event_type: EventType,
        severity: Severity,
        data: serde_json::Value,
        start_recording: bool,
    },
    CloseEvent {
        slot: EventSlot,
        stop_recording: bool,
    },
    AppendRadiotext {
        slot: EventSlot,
        text: String,
    },
}

#[derive(Debug, Clone)]
struct EonState {
    ta: bool,
    opened_at: DateTime<Utc>,
}

/// Per-station bookkeeping the Rules Engine needs across calls. Tracks
/// only "is something open" — actual DB ids live with the caller
/// (spec.md §9 "Cross-thread state").
#[derive(Debug, Clone, Default)]
pub struct EventTracker {
    pub traffic_open: bool,
    pub emergency_open: bool,
    pi_glitch_cooldown: u32,
    eon: HashMap<u32, EonState>,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// EON trackers older than [`EON_EXPIRY_SEC`] with no synthesized end
    /// yet; the caller should call [`expire_eon`] for each.
    pub fn expired_eon(&self, now: DateTime<Utc>) -> Vec<u32> {
        self.eon
            .iter()
            .filter(|(_, s)| (now - s.opened_at).num_seconds() >= EON_EXPIRY_SEC)
            .map(|(pi, _)| *pi)
            .collect()
    }
}

/// Synthesizes the 120s-timeout end for an EON relay that never saw
/// `other_network.ta = false` (spec.md §4.6).
pub fn expire_eon(tracker: &mut EventTracker, other_pi: u32) -> Option<Transition> {
    tracker
        .eon
        .remove(&other_pi)
        .map(|_| Transition::CloseEvent { slot: EventSlot::Eon(other_pi), stop_recording: false })
}

fn parse_other_pi(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    trimmed.parse::<u32>().ok().or_else(|| u32::from_str_radix(trimmed, 16).ok())
}

/// Applies one decoded group to `station`/`tracker`, mutating both and
/// returning the transitions the caller (the Pipeline Supervisor) must
/// execute against the store, recorder, and alert publisher, in order.
pub fn apply(group: &DecodedGroup, station: &mut Station, tracker: &mut EventTracker) -> Vec<Transition> {
    let mut out = Vec::new();

    // PI glitch debounce first: a mid-event PI change ends whatever is
    // open and suppresses new opens until the PI has been stable again
    // (spec.md §4.6 "Edge policies").
    let had_pi = station.pi.is_some();
    let pi_changed = station.set_pi(group.pi);
    let is_glitch = had_pi && pi_changed;
    if is_glitch {
        if tracker.traffic_open {
            out.push(Transition::CloseEvent { slot: EventSlot::Traffic, stop_recording: true });
            tracker.traffic_open = false;
        }
        if tracker.emergency_open {
            out.push(Transition::CloseEvent { slot: EventSlot::Emergency, stop_recording: true });
            tracker.emergency_open = false;
        }
        tracker.pi_glitch_cooldown = PI_STABILITY_GROUPS;
    } else if tracker.pi_glitch_cooldown > 0 {
        tracker.pi_glitch_cooldown -= 1;
    }
    let opens_allowed = tracker.pi_glitch_cooldown == 0;

    station.record_group(group.timestamp);
    if let Some(tp) = group.tp {
        station.tp = tp;
    }

    let prev_ta = station.ta;
    let mut radiotext_changed = false;
    match &group.payload {
        GroupPayload::Basic { ps_segment, ps, ta } => {
            if let (Some(seg), Some(text)) = (ps_segment, ps) {
                let chars: Vec<char> = text.chars().chain(std::iter::repeat(' ')).take(2).collect();
                station.set_ps_segment(*seg, [chars[0], chars[1]]);
            }
            if let Some(ta) = ta {
                station.ta = *ta;
            }
        }
        GroupPayload::RadioText { radiotext: Some(text), .. } => {
            radiotext_changed = station.set_radiotext(text);
        }
        _ => {}
    }

    let prev_alarm = station.is_alarm();
    if let Some(pty) = &group.prog_type {
        station.set_prog_type(pty);
    }
    let now_alarm = station.is_alarm();

    // 1. ta false -> true: open traffic.
    if !prev_ta && station.ta && opens_allowed && !tracker.traffic_open {
        out.push(Transition::OpenEvent {
            slot: EventSlot::Traffic,
            event_type: EventType::Traffic,
            severity: Severity::Warning,
            data: serde_json::Value::Null,
            start_recording: true,
        });
        tracker.traffic_open = true;
    }

    // 2. ta true -> false with an open traffic Event: close it.
    if prev_ta && !station.ta && tracker.traffic_open {
        out.push(Transition::CloseEvent { slot: EventSlot::Traffic, stop_recording: true });
        tracker.traffic_open = false;
    }

    // 3. radiotext change while traffic is open.
    if radiotext_changed && tracker.traffic_open {
        out.push(Transition::AppendRadiotext {
            slot: EventSlot::Traffic,
            text: station.radiotext.trim_end().to_string(),
        });
    }

    // 4. prog_type -> Alarm: end any open traffic first (edge policy),
    //    then open emergency.
    if !prev_alarm && now_alarm {
        if tracker.traffic_open {
            out.push(Transition::CloseEvent { slot: EventSlot::Traffic, stop_recording: true });
            tracker.traffic_open = false;
        }
        if opens_allowed && !tracker.emergency_open {
            out.push(Transition::OpenEvent {
                slot: EventSlot::Emergency,
                event_type: EventType::Emergency,
                severity: Severity::Critical,
                data: serde_json::Value::Null,
                start_recording: true,
            });
            tracker.emergency_open = true;
        }
    }

    // 5. prog_type leaves Alarm while emergency is open.
    if prev_alarm && !now_alarm && tracker.emergency_open {
        out.push(Transition::CloseEvent { slot: EventSlot::Emergency, stop_recording: true });
        tracker.emergency_open = false;
    }

    // 6. 14A EON cross-reference.
    if let GroupPayload::Eon { other_network } = &group.payload {
        if let Some(other_pi) = other_network.pi.as_deref().and_then(parse_other_pi) {
            if other_pi != group.pi {
                let ta = other_network.ta.unwrap_or(false);
                match tracker.eon.entry(other_pi) {
                    Entry::Occupied(entry) if entry.get().ta && !ta => {
                        out.push(Transition::CloseEvent {
                            slot: EventSlot::Eon(other_pi),
                            stop_recording: false,
                        });
                        entry.remove();
                    }
                    Entry::Occupied(mut entry) => entry.get_mut().ta = ta,
                    Entry::Vacant(entry) if ta && opens_allowed => {
                        out.push(Transition::OpenEvent {
                            slot: EventSlot::Eon(other_pi),
                            event_type: EventType::EonTraffic,
                            severity: Severity::Info,
                            data: json!({
                                "linked_station": {
                                    "pi": format!("0x{other_pi:04X}"),
                                    "ps": other_network.ps,
                                }
                            }),
                            start_recording: false,
                        });
                        entry.insert(EonState { ta: true, opened_at: group.timestamp });
                    }
                    Entry::Vacant(_) => {}
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rds_core::{GroupKind, OtherNetwork};

    fn group(pi: u32, kind: GroupKind, payload: GroupPayload) -> DecodedGroup {
        DecodedGroup {
            pi,
            group: kind,
            tp: Some(true),
            prog_type: None,
            pin: None,
            ecc: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    #[test]
    fn ta_rising_opens_traffic_event() {
        let mut station = Station::new(103_300_000);
        let mut tracker = EventTracker::new();
        let g = group(
            0x9E04,
            GroupKind::G0A,
            GroupPayload::Basic { ps_segment: None, ps: None, ta: Some(true) },
        );
        let transitions = apply(&g, &mut station, &mut tracker);
        assert_eq!(
            transitions,
            vec![Transition::OpenEvent {
                slot: EventSlot::Traffic,
                event_type: EventType::Traffic,
                severity: Severity::Warning,
                data: serde_json::Value::Null,
                start_recording: true,
            }]
        );
        assert!(tracker.traffic_open);
    }

    #[test]
    fn ta_falling_closes_open_traffic_event() {
        let mut station = Station::new(103_300_000);
        let mut tracker = EventTracker::new();
        let open = group(
            0x9E04,
            GroupKind::G0A,
            GroupPayload::Basic { ps_segment: None, ps: None, ta: Some(true) },
        );
        apply(&open, &mut station, &mut tracker);

        let close = group(
            0x9E04,
            GroupKind::G0A,
            GroupPayload::Basic { ps_segment: None, ps: None, ta: Some(false) },
        );
        let transitions = apply(&close, &mut station, &mut tracker);
        assert_eq!(
            transitions,
            vec![Transition::CloseEvent { slot: EventSlot::Traffic, stop_recording: true }]
        );
        assert!(!tracker.traffic_open);
    }

    #[test]
    fn radiotext_change_appends_while_traffic_open() {
        let mut station = Station::new(103_300_000);
        let mut tracker = EventTracker::new();
        let open = group(
            0x9E04,
            GroupKind::G0A,
            GroupPayload::Basic { ps_segment: None, ps: None, ta: Some(true) },
        );
        apply(&open, &mut station, &mut tracker);

        let rt = group(
            0x9E04,
            GroupKind::G2A,
            GroupPayload::RadioText {
                radiotext: Some("Olycka pa E4".to_string()),
                partial_radiotext: None,
            },
        );
        let transitions = apply(&rt, &mut station, &mut tracker);
        assert_eq!(
            transitions,
            vec![Transition::AppendRadiotext {
                slot: EventSlot::Traffic,
                text: "Olycka pa E4".to_string(),
            }]
        );
    }

    #[test]
    fn alarm_takeover_ends_traffic_then_opens_emergency() {
        let mut station = Station::new(103_300_000);
        let mut tracker = EventTracker::new();
        let open_traffic = group(
            0x9E04,
            GroupKind::G0A,
            GroupPayload::Basic { ps_segment: None, ps: None, ta: Some(true) },
        );
        apply(&open_traffic, &mut station, &mut tracker);

        let mut alarm = group(0x9E04, GroupKind::G0A, GroupPayload::Unknown { raw: json!({}) });
        alarm.prog_type = Some("Alarm".to_string());
        let transitions = apply(&alarm, &mut station, &mut tracker);
        assert_eq!(
            transitions,
            vec![
                Transition::CloseEvent { slot: EventSlot::Traffic, stop_recording: true },
                Transition::OpenEvent {
                    slot: EventSlot::Emergency,
                    event_type: EventType::Emergency,
                    severity: Severity::Critical,
                    data: serde_json::Value::Null,
                    start_recording: true,
                },
            ]
        );
        assert!(!tracker.traffic_open);
        assert!(tracker.emergency_open);
    }

    #[test]
    fn eon_traffic_opens_and_closes_on_flip() {
        let mut station = Station::new(103_300_000);
        let mut tracker = EventTracker::new();
        let open = group(
            0x9E04,
            GroupKind::G14A,
            GroupPayload::Eon {
                other_network: OtherNetwork {
                    pi: Some("0xC502".to_string()),
                    ps: Some("P3".to_string()),
                    ta: Some(true),
                },
            },
        );
        let transitions = apply(&open, &mut station, &mut tracker);
        assert_eq!(transitions.len(), 1);
        assert!(matches!(
            transitions[0],
            Transition::OpenEvent { slot: EventSlot::Eon(0xC502), .. }
        ));

        let close = group(
            0x9E04,
            GroupKind::G14A,
            GroupPayload::Eon {
                other_network: OtherNetwork {
                    pi: Some("0xC502".to_string()),
                    ps: Some("P3".to_string()),
                    ta: Some(false),
                },
            },
        );
        let transitions = apply(&close, &mut station, &mut tracker);
        assert_eq!(
            transitions,
            vec![Transition::CloseEvent { slot: EventSlot::Eon(0xC502), stop_recording: false }]
        );
    }

    #[test]
    fn pi_glitch_closes_open_events_and_blocks_new_ones_until_stable() {
        let mut station = Station::new(103_300_000);
        let mut tracker = EventTracker::new();
        let first = group(
            0x9E04,
            GroupKind::G0A,
            GroupPayload::Basic { ps_segment: None, ps: None, ta: Some(true) },
        );
        apply(&first, &mut station, &mut tracker);
        assert!(tracker.traffic_open);

        let glitch = group(
            0xBEEF,
            GroupKind::G0A,
            GroupPayload::Basic { ps_segment: None, ps: None, ta: Some(true) },
        );
        let transitions = apply(&glitch, &mut station, &mut tracker);
        assert!(transitions
            .iter()
            .any(|t| matches!(t, Transition::CloseEvent { slot: EventSlot::Traffic, .. })));
        assert!(!tracker.traffic_open);

        // Same (new) PI repeats with ta rising again; should stay gated.
        for _ in 0..4 {
            let still_glitched = group(
                0xBEEF,
                GroupKind::G0A,
                GroupPayload::Basic { ps_segment: None, ps: None, ta: Some(true) },
            );
            let transitions = apply(&still_glitched, &mut station, &mut tracker);
            assert!(transitions.is_empty());
        }
    }
}
