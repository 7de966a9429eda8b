//! Paced, ticker-driven audio egress.
//!
//! TTS responses arrive bursty and variably sized. Writing them straight to
//! the client socket would let the agent's audio queue race ahead of
//! real-time playback, which is what makes correct barge-in detection on the
//! client side hard. This doles audio out in fixed-size chunks on a steady
//! tick instead, and makes `clear()` (barge-in) a cheap, atomic operation: it
//! only has to drop the not-yet-sent tail of the current response.

use echoline_media::byte_queue::ByteQueue;
use tokio::time::{interval, Duration, Interval};

/// Bytes of PCM16 audio corresponding to `ms` milliseconds at `sample_rate`
/// across `channels` interleaved channels.
pub fn ms_to_bytes(ms: u64, sample_rate: u32, channels: u16) -> usize {
    ((ms * sample_rate as u64 * 2 * channels as u64) / 1000) as usize
}

/// Inverse of [`ms_to_bytes`], rounded down to whole milliseconds.
pub fn bytes_to_ms(bytes: usize, sample_rate: u32, channels: u16) -> u64 {
    (bytes as u64 * 1000) / (sample_rate as u64 * 2 * channels as u64)
}

/// Outcome of one ticker pop.
pub enum Tick {
    /// Send this chunk to the client. May be shorter than `chunk_bytes` on
    /// the last tick of a response.
    Chunk(Vec<u8>),
    /// The queue drained after a `flush()`; fire `on_flush` exactly once.
    Flushed,
    /// Nothing to do this tick.
    Idle,
}

/// Single-producer (orchestrator writes), single-consumer (ticker) egress
/// buffer. One instance per session, reused across responses.
pub struct PacedEgress {
    queue: ByteQueue,
    chunk_bytes: usize,
    chunk_ms: u64,
    /// Sticky "no more audio is coming for the current response" flag, set
    /// by `flush()` and cleared once the queue has drained past it.
    flushed: bool,
}

impl PacedEgress {
    pub fn new(chunk_ms: u64, sample_rate: u32, channels: u16) -> Self {
        Self {
            queue: ByteQueue::new(),
            chunk_bytes: ms_to_bytes(chunk_ms, sample_rate, channels).max(2),
            chunk_ms,
            flushed: false,
        }
    }

    /// Append TTS audio for the in-flight response. Clears a stale
    /// `flushed` flag from a previous response's tail.
    pub fn write(&mut self, pcm: &[u8]) {
        self.queue.append(pcm);
        self.flushed = false;
    }

    /// Mark that the in-flight response has ended; `on_flush` fires once
    /// the queue has fully drained.
    pub fn flush(&mut self) {
        self.flushed = true;
    }

    /// Barge-in: drop whatever has not yet reached the client.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    pub fn ticker(&self) -> Interval {
        interval(Duration::from_millis(self.chunk_ms.max(1)))
    }

    /// Advance one tick: pop up to a chunk's worth of audio, or report a
    /// pending flush once the queue is empty.
    pub fn tick(&mut self) -> Tick {
        let chunk = self.queue.pop(self.chunk_bytes);
        if !chunk.is_empty() {
            Tick::Chunk(chunk)
        } else if self.flushed {
            self.flushed = false;
            Tick::Flushed
        } else {
            Tick::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_to_bytes_matches_16khz_mono_pcm16() {
        assert_eq!(ms_to_bytes(100, 16_000, 1), 3200);
        assert_eq!(ms_to_bytes(1000, 16_000, 1), 32_000);
    }

    #[test]
    fn bytes_to_ms_is_the_inverse() {
        assert_eq!(bytes_to_ms(3200, 16_000, 1), 100);
        assert_eq!(bytes_to_ms(32_000, 16_000, 1), 1000);
    }

    #[test]
    fn tick_emits_chunk_bytes_sized_slices_in_fifo_order() {
        let mut egress = PacedEgress::new(100, 16_000, 1);
        let audio: Vec<u8> = (0..7000u32).map(|b| (b % 256) as u8).collect();
        egress.write(&audio);

        let mut out = Vec::new();
        loop {
            match egress.tick() {
                Tick::Chunk(c) => out.extend(c),
                Tick::Idle => break,
                Tick::Flushed => panic!("not flushed yet"),
            }
        }
        assert_eq!(out, audio);
    }

    #[test]
    fn flush_fires_exactly_once_after_queue_drains() {
        let mut egress = PacedEgress::new(100, 16_000, 1);
        egress.write(&vec![0u8; 1500]);
        egress.flush();

        assert!(matches!(egress.tick(), Tick::Chunk(_))); // 1500 bytes, one short chunk
        assert!(matches!(egress.tick(), Tick::Flushed));
        assert!(matches!(egress.tick(), Tick::Idle));
    }

    #[test]
    fn clear_drops_unsent_audio_for_barge_in() {
        let mut egress = PacedEgress::new(100, 16_000, 1);
        egress.write(&vec![1u8; 10_000]);
        egress.clear();
        assert!(matches!(egress.tick(), Tick::Idle));
    }

    #[test]
    fn write_after_flush_without_drain_cancels_the_pending_flush() {
        let mut egress = PacedEgress::new(100, 16_000, 1);
        egress.write(&vec![0u8; 100]);
        egress.flush();
        egress.write(&vec![1u8; 100]);
        // queue still has bytes from both writes; flushed was reset by the
        // second write, so we must not see a Flushed tick until it drains
        // and a new flush() is issued.
        assert!(matches!(egress.tick(), Tick::Chunk(_)));
        assert!(matches!(egress.tick(), Tick::Idle));
    }
}
