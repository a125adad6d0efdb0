// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Audio Tee (spec.md §4.2): fans raw PCM chunks out to two consumers —
//! the RDS decoder (mandatory, blocking) and the Recorder (best-effort,
//! dropped under backpressure) — preserving source order on each sink.
//! Grounded on the teacher's `trx-server/src/audio.rs` channel fan-out,
//! which pairs a `broadcast::Sender` with per-consumer drop accounting.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Chunk size the spec calls out as "roughly 24ms of audio at the capture
/// rate" (spec.md §4.2).
pub const CHUNK_BYTES: usize = 8192;

#[derive(Debug, Default, Clone, Copy)]
pub struct TeeStats {
    pub chunks_forwarded: u64,
    pub recorder_chunks_dropped: u64,
}

/// Splits a raw PCM stream between a mandatory decoder sink and a
/// best-effort recorder sink.
pub struct Tee {
    decoder_tx: mpsc::Sender<Bytes>,
    recorder_tx: mpsc::Sender<Bytes>,
    stats: TeeStats,
}

impl Tee {
    pub fn new(decoder_tx: mpsc::Sender<Bytes>, recorder_tx: mpsc::Sender<Bytes>) -> Self {
        Self { decoder_tx, recorder_tx, stats: TeeStats::default() }
    }

    pub fn stats(&self) -> TeeStats {
        self.stats
    }

    /// Forwards one chunk. The decoder send blocks (backpressure is
    /// correctness: a dropped chunk there desyncs RDS group framing); the
    /// recorder send is `try_send` — a full buffer means the recorder
    /// can't keep up and the chunk is dropped rather than stalling the
    /// decoder path (spec.md §4.2 "ordering is preserved on each sink
    /// independently; drops never appear out of order, only absent").
    ///
    /// Returns `Err` once the decoder sink is gone, which is the signal
    /// the caller cascades into tearing down the rest of the pipeline for
    /// this station.
    pub async fn feed(&mut self, chunk: Bytes) -> Result<(), mpsc::error::SendError<Bytes>> {
        self.decoder_tx.send(chunk.clone()).await?;
        self.stats.chunks_forwarded += 1;
        if let Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) =
            self.recorder_tx.try_send(chunk)
        {
            self.stats.recorder_chunks_dropped += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_to_both_sinks_in_order() {
        let (dtx, mut drx) = mpsc::channel(8);
        let (rtx, mut rrx) = mpsc::channel(8);
        let mut tee = Tee::new(dtx, rtx);

        tee.feed(Bytes::from_static(b"one")).await.unwrap();
        tee.feed(Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(drx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(drx.recv().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(rrx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rrx.recv().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(tee.stats().chunks_forwarded, 2);
        assert_eq!(tee.stats().recorder_chunks_dropped, 0);
    }

    #[tokio::test]
    async fn recorder_backpressure_drops_without_blocking_decoder() {
        let (dtx, mut drx) = mpsc::channel(8);
        let (rtx, _rrx) = mpsc::channel(1);
        let mut tee = Tee::new(dtx, rtx);

        // Fill the recorder channel's single slot, then overflow it.
        tee.feed(Bytes::from_static(b"a")).await.unwrap();
        tee.feed(Bytes::from_static(b"b")).await.unwrap();

        assert_eq!(drx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(drx.recv().await.unwrap(), Bytes::from_static(b"b"));
        assert_eq!(tee.stats().recorder_chunks_dropped, 1);
    }

    #[tokio::test]
    async fn decoder_sink_closed_propagates_error() {
        let (dtx, drx) = mpsc::channel(1);
        let (rtx, _rrx) = mpsc::channel(1);
        drop(drx);
        let mut tee = Tee::new(dtx, rtx);
        assert!(tee.feed(Bytes::from_static(b"x")).await.is_err());
    }
}
