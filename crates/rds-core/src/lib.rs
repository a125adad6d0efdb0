// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod error;
pub mod group;
pub mod math;
pub mod model;

pub use error::RdsError;
pub use group::{DecodedGroup, GroupKind, GroupPayload, OtherNetwork};
pub use model::{
    Event, EventState, EventType, Recording, Severity, Station, TranscriptionJob,
    TranscriptionStatus,
};

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
