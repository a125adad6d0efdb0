// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

/// Error taxonomy shared across the pipeline (spec.md §7).
///
/// Crossing threads, these only ever appear as status flags on shared state
/// (never unwound) — see `rds-guardd::supervisor`.
#[derive(Debug, Error)]
pub enum RdsError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("malformed decoder line: {0}")]
    Decode(String),

    #[error("recorder busy for station {0:#06x}")]
    RecorderBusy(u32),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("transcription timed out after {0}s")]
    TranscriptionTimeout(u64),

    /// Sentinel returned by the `none` transcribe backend: not a failure,
    /// just "no backend configured" (spec.md §4.4, §9).
    #[error("no transcription backend configured")]
    TranscriptionSkipped,

    #[error("storage error: {0}")]
    Storage(String),
}
