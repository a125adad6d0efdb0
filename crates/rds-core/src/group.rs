// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The decoder's line-delimited JSON, modeled as a tagged union keyed on the
//! `group` field with a fallthrough `Unknown` variant carrying the untyped
//! map — see spec.md §9 "Dynamic dispatch of decoded groups".

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One raw line of `redsea --output json` output. Every field is optional
/// because the fields actually present depend on which RDS group produced
/// the line; unrecognized fields are kept in `extra` so `Unknown` can carry
/// them forward instead of silently dropping them.
#[derive(Debug, Clone, Deserialize, Default)]
struct RawLine {
    pi: Option<String>,
    group: Option<String>,
    ps: Option<String>,
    ps_segment: Option<u8>,
    ta: Option<bool>,
    tp: Option<bool>,
    prog_type: Option<String>,
    radiotext: Option<String>,
    partial_radiotext: Option<String>,
    other_network: Option<OtherNetwork>,
    clock_time: Option<String>,
    ptyn: Option<String>,
    pin: Option<String>,
    ecc: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// EON and AF cross-reference data carried by group 14A.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct OtherNetwork {
    pub pi: Option<String>,
    pub ps: Option<String>,
    pub ta: Option<bool>,
}

/// RDS group type identifier, e.g. `0A`, `2B`, `14A`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKind {
    G0A,
    G0B,
    G1A,
    G1B,
    G2A,
    G2B,
    G3A,
    G4A,
    G10A,
    G11A,
    G14A,
    Other(String),
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupKind::G0A => "0A",
            GroupKind::G0B => "0B",
            GroupKind::G1A => "1A",
            GroupKind::G1B => "1B",
            GroupKind::G2A => "2A",
            GroupKind::G2B => "2B",
            GroupKind::G3A => "3A",
            GroupKind::G4A => "4A",
            GroupKind::G10A => "10A",
            GroupKind::G11A => "11A",
            GroupKind::G14A => "14A",
            GroupKind::Other(s) => s,
        };
        f.write_str(s)
    }
}

impl From<&str> for GroupKind {
    fn from(s: &str) -> Self {
        match s {
            "0A" => GroupKind::G0A,
            "0B" => GroupKind::G0B,
            "1A" => GroupKind::G1A,
            "1B" => GroupKind::G1B,
            "2A" => GroupKind::G2A,
            "2B" => GroupKind::G2B,
            "3A" => GroupKind::G3A,
            "4A" => GroupKind::G4A,
            "10A" => GroupKind::G10A,
            "11A" => GroupKind::G11A,
            "14A" => GroupKind::G14A,
            other => GroupKind::Other(other.to_string()),
        }
    }
}

/// Group-specific payload. Fields that are meaningful regardless of which
/// group carried them (`pi`, `prog_type`, `tp`) live on `DecodedGroup`
/// itself rather than duplicated into every variant.
#[derive(Debug, Clone)]
pub enum GroupPayload {
    /// 0A/0B: programme service name segment, traffic flags.
    Basic {
        ps_segment: Option<u8>,
        ps: Option<String>,
        ta: Option<bool>,
    },
    /// 2A/2B: rolling RadioText.
    RadioText {
        radiotext: Option<String>,
        partial_radiotext: Option<String>,
    },
    /// 4A: CT (clock time).
    ClockTime { clock_time: Option<String> },
    /// 10A: PTYN (programme type name).
    ProgramTypeName { ptyn: Option<String> },
    /// 14A: EON (enhanced other networks) cross-reference.
    Eon { other_network: OtherNetwork },
    /// 11A: RT+ (ODA-tunneled radiotext-plus tags), best-effort parsed
    /// (spec.md §9 Open Question — fixed-AID assumption, not strict ODA).
    RtPlus { raw: serde_json::Value },
    /// Any group type/line this system doesn't interpret. Carries the full
    /// untyped map so nothing is silently lost.
    Unknown { raw: serde_json::Value },
}

/// A single decoded RDS group (spec.md §3 `DecodedGroup`).
#[derive(Debug, Clone)]
pub struct DecodedGroup {
    pub pi: u32,
    pub group: GroupKind,
    pub tp: Option<bool>,
    pub prog_type: Option<String>,
    pub pin: Option<String>,
    pub ecc: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: GroupPayload,
}

/// Parse a PI string ("0x9E04" or "9E04" or decimal) into a u32.
fn parse_pi(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    trimmed
        .parse::<u32>()
        .ok()
        .or_else(|| u32::from_str_radix(trimmed, 16).ok())
}

impl DecodedGroup {
    /// Parse one line of decoder stdout. Malformed JSON or a missing `pi`
    /// is a `DecodeError` per spec.md §7 — counted and dropped by the
    /// caller, never surfaced as a pipeline failure.
    pub fn parse_line(line: &str, now: DateTime<Utc>) -> Result<Self, crate::RdsError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(crate::RdsError::Decode("empty line".into()));
        }
        let raw: RawLine = serde_json::from_str(trimmed)
            .map_err(|e| crate::RdsError::Decode(format!("{e}")))?;
        let pi = raw
            .pi
            .as_deref()
            .and_then(parse_pi)
            .ok_or_else(|| crate::RdsError::Decode("missing or invalid pi".into()))?;
        let group_str = raw.group.clone().unwrap_or_else(|| "?".to_string());
        let group = GroupKind::from(group_str.as_str());

        let payload = match &group {
            GroupKind::G0A | GroupKind::G0B => GroupPayload::Basic {
                ps_segment: raw.ps_segment,
                ps: raw.ps.clone(),
                ta: raw.ta,
            },
            GroupKind::G2A | GroupKind::G2B => GroupPayload::RadioText {
                radiotext: raw.radiotext.clone(),
                partial_radiotext: raw.partial_radiotext.clone(),
            },
            GroupKind::G4A => GroupPayload::ClockTime {
                clock_time: raw.clock_time.clone(),
            },
            GroupKind::G10A => GroupPayload::ProgramTypeName {
                ptyn: raw.ptyn.clone(),
            },
            GroupKind::G14A => GroupPayload::Eon {
                other_network: raw.other_network.clone().unwrap_or_default(),
            },
            GroupKind::G11A => GroupPayload::RtPlus {
                raw: serde_json::Value::Object(raw.extra.clone()),
            },
            _ => GroupPayload::Unknown {
                raw: serde_json::Value::Object(raw.extra.clone()),
            },
        };

        Ok(DecodedGroup {
            pi,
            group,
            tp: raw.tp,
            prog_type: raw.prog_type.clone(),
            pin: raw.pin.clone(),
            ecc: raw.ecc.clone(),
            timestamp: now,
            payload,
        })
    }
}

impl DecodedGroup {
    /// Reconstructs a JSON view of this group for the raw-passthrough
    /// topics (spec.md §6 `rds/system/raw`, `/ws/console` `<pi>/<group_type>`).
    /// `RtPlus`/`Unknown` already carry an untyped map and pass it through;
    /// the rest synthesize an equivalent object from their typed fields.
    pub fn to_raw_json(&self) -> serde_json::Value {
        let mut obj = match &self.payload {
            GroupPayload::RtPlus { raw } | GroupPayload::Unknown { raw } => match raw {
                serde_json::Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            },
            GroupPayload::Basic { ps_segment, ps, ta } => {
                let mut m = serde_json::Map::new();
                if let Some(v) = ps_segment {
                    m.insert("ps_segment".into(), serde_json::json!(v));
                }
                if let Some(v) = ps {
                    m.insert("ps".into(), serde_json::json!(v));
                }
                if let Some(v) = ta {
                    m.insert("ta".into(), serde_json::json!(v));
                }
                m
            }
            GroupPayload::RadioText { radiotext, partial_radiotext } => {
                let mut m = serde_json::Map::new();
                if let Some(v) = radiotext {
                    m.insert("radiotext".into(), serde_json::json!(v));
                }
                if let Some(v) = partial_radiotext {
                    m.insert("partial_radiotext".into(), serde_json::json!(v));
                }
                m
            }
            GroupPayload::ClockTime { clock_time } => {
                let mut m = serde_json::Map::new();
                if let Some(v) = clock_time {
                    m.insert("clock_time".into(), serde_json::json!(v));
                }
                m
            }
            GroupPayload::ProgramTypeName { ptyn } => {
                let mut m = serde_json::Map::new();
                if let Some(v) = ptyn {
                    m.insert("ptyn".into(), serde_json::json!(v));
                }
                m
            }
            GroupPayload::Eon { other_network } => {
                let mut m = serde_json::Map::new();
                m.insert(
                    "other_network".into(),
                    serde_json::json!({
                        "pi": other_network.pi,
                        "ps": other_network.ps,
                        "ta": other_network.ta,
                    }),
                );
                m
            }
        };
        obj.insert("pi".into(), serde_json::json!(format!("{:#06x}", self.pi)));
        obj.insert("group".into(), serde_json::json!(self.group.to_string()));
        if let Some(tp) = self.tp {
            obj.insert("tp".into(), serde_json::json!(tp));
        }
        if let Some(pt) = &self.prog_type {
            obj.insert("prog_type".into(), serde_json::json!(pt));
        }
        serde_json::Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_0a_group() {
        let line = r#"{"pi":"0x9E04","group":"0A","ta":true,"tp":true,"ps":"P4 Sthlm"}"#;
        let g = DecodedGroup::parse_line(line, Utc::now()).unwrap();
        assert_eq!(g.pi, 0x9E04);
        assert_eq!(g.group, GroupKind::G0A);
        assert_eq!(g.tp, Some(true));
        match g.payload {
            GroupPayload::Basic { ta, ps, .. } => {
                assert_eq!(ta, Some(true));
                assert_eq!(ps.as_deref(), Some("P4 Sthlm"));
            }
            other => panic!("wrong payload variant: {other:?}"),
        }
    }

    #[test]
    fn parses_alarm_prog_type() {
        let line = r#"{"pi":"0x9E04","group":"0A","prog_type":"Alarm"}"#;
        let g = DecodedGroup::parse_line(line, Utc::now()).unwrap();
        assert_eq!(g.prog_type.as_deref(), Some("Alarm"));
    }

    #[test]
    fn parses_eon_group() {
        let line =
            r#"{"group":"14A","pi":"0x9E04","other_network":{"pi":"0xC502","ta":true}}"#;
        let g = DecodedGroup::parse_line(line, Utc::now()).unwrap();
        match g.payload {
            GroupPayload::Eon { other_network } => {
                assert_eq!(other_network.pi.as_deref(), Some("0xC502"));
                assert_eq!(other_network.ta, Some(true));
            }
            other => panic!("wrong payload variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_group_keeps_raw_map() {
        let line = r#"{"pi":"0x9E04","group":"99Z","weird_field":42}"#;
        let g = DecodedGroup::parse_line(line, Utc::now()).unwrap();
        assert!(matches!(g.group, GroupKind::Other(ref s) if s == "99Z"));
        match g.payload {
            GroupPayload::Unknown { raw } => {
                assert_eq!(raw.get("weird_field").and_then(|v| v.as_i64()), Some(42));
            }
            other => panic!("wrong payload variant: {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_pi() {
        let line = r#"{"group":"0A"}"#;
        assert!(DecodedGroup::parse_line(line, Utc::now()).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(DecodedGroup::parse_line("not json", Utc::now()).is_err());
    }

    #[test]
    fn raw_json_synthesizes_typed_fields() {
        let line = r#"{"pi":"0x9E04","group":"0A","ta":true,"tp":true,"ps":"P4 Sthlm","ps_segment":1}"#;
        let g = DecodedGroup::parse_line(line, Utc::now()).unwrap();
        let raw = g.to_raw_json();
        assert_eq!(raw["pi"], "0x9e04");
        assert_eq!(raw["group"], "0A");
        assert_eq!(raw["tp"], true);
        assert_eq!(raw["ps"], "P4 Sthlm");
        assert_eq!(raw["ps_segment"], 1);
    }

    #[test]
    fn raw_json_passes_through_unknown_map() {
        let line = r#"{"pi":"0x9E04","group":"99Z","weird_field":42}"#;
        let g = DecodedGroup::parse_line(line, Utc::now()).unwrap();
        let raw = g.to_raw_json();
        assert_eq!(raw["weird_field"], 42);
        assert_eq!(raw["group"], "99Z");
    }
}
