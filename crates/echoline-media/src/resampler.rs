//! Stateful PCM16 resampler for incoming mic audio.
//!
//! Mirrors the block-buffered design of the reference implementation: bytes
//! accumulate until a full block is available, at which point the block is
//! downmixed to mono, resampled, and re-quantized to i16. The final partial
//! block is flushed with `end = true` when the caller knows no more audio is
//! coming (e.g. on session teardown).

use rubato::{FftFixedIn, Resampler};

pub struct StreamingResampler {
    src_rate: u32,
    dst_rate: u32,
    src_channels: usize,
    dst_channels: usize,
    block_size_bytes: usize,
    buffer: Vec<u8>,
    resampler: FftFixedIn<f64>,
}

impl StreamingResampler {
    /// `dst_channels` is carried for interface parity with the reference
    /// implementation's constructor; only mono output (`dst_channels == 1`)
    /// is currently implemented, matching the reference's own default.
    pub fn new(src_rate: u32, dst_rate: u32, src_channels: usize, dst_channels: usize, block_size_ms: u32) -> Self {
        assert_eq!(dst_channels, 1, "multi-channel output is not yet implemented");
        let block_size_samples = (block_size_ms as usize * src_rate as usize) / 1000;
        let block_size_bytes = block_size_samples * 2 * src_channels;

        let resampler = FftFixedIn::new(
            src_rate as usize,
            dst_rate as usize,
            block_size_samples,
            2,
            1,
        )
        .expect("resampler construction parameters are always valid here");

        Self {
            src_rate,
            dst_rate,
            src_channels,
            dst_channels,
            block_size_bytes,
            buffer: Vec::new(),
            resampler,
        }
    }

    pub fn dst_channels(&self) -> usize {
        self.dst_channels
    }

    /// Feed a chunk of raw PCM16 little-endian bytes. Returns resampled PCM16
    /// bytes for every whole block now available, or an empty `Vec` if not
    /// enough audio has accumulated yet. Pass `end = true` on the final call
    /// to flush the trailing partial block.
    pub fn push(&mut self, chunk: &[u8], end: bool) -> Vec<u8> {
        self.buffer.extend_from_slice(chunk);

        let block = if end {
            std::mem::take(&mut self.buffer)
        } else {
            let num_blocks = self.buffer.len() / self.block_size_bytes;
            if num_blocks == 0 {
                return Vec::new();
            }
            let take = num_blocks * self.block_size_bytes;
            self.buffer.drain(..take).collect()
        };

        if block.is_empty() {
            return Vec::new();
        }

        self.resample_block(&block)
    }

    fn resample_block(&mut self, block: &[u8]) -> Vec<u8> {
        let samples: Vec<i16> = block
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        let mono: Vec<f64> = if self.src_channels > 1 {
            samples
                .chunks(self.src_channels)
                .map(|frame| {
                    let sum: f64 = frame.iter().map(|&s| s as f64 / 32768.0).sum();
                    sum / self.src_channels as f64
                })
                .collect()
        } else {
            samples.iter().map(|&s| s as f64 / 32768.0).collect()
        };

        if self.src_rate == self.dst_rate {
            return mono
                .iter()
                .flat_map(|&s| quantize(s).to_le_bytes())
                .collect();
        }

        let input = vec![mono];
        let output = match self.resampler.process(&input, None) {
            Ok(o) => o,
            Err(_) => return Vec::new(),
        };

        output[0].iter().flat_map(|&s| quantize(s).to_le_bytes()).collect()
    }
}

fn quantize(sample: f64) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32768.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_block_buffers_until_threshold() {
        let mut r = StreamingResampler::new(16000, 16000, 1, 1, 100);
        let half_block = vec![0u8; 1000];
        assert!(r.push(&half_block, false).is_empty());
    }

    #[test]
    fn identical_rate_passthrough_preserves_sample_count() {
        let mut r = StreamingResampler::new(16000, 16000, 1, 1, 100);
        let one_block = vec![0u8; 3200]; // 1600 samples * 2 bytes = 100ms @ 16kHz
        let out = r.push(&one_block, false);
        assert_eq!(out.len(), one_block.len());
    }

    #[test]
    fn end_flushes_trailing_partial_block() {
        let mut r = StreamingResampler::new(16000, 16000, 1, 1, 100);
        let small = vec![0u8; 400];
        let out = r.push(&small, true);
        assert_eq!(out.len(), small.len());
    }

    #[test]
    fn stereo_input_is_downmixed_to_mono() {
        let mut r = StreamingResampler::new(16000, 16000, 2, 1, 100);
        let samples: Vec<i16> = vec![1000i16; 3200]; // 1600 stereo frames
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let out = r.push(&bytes, true);
        // 1600 stereo frames downmix to 1600 mono samples = 3200 bytes
        assert_eq!(out.len(), 3200);
    }

    #[test]
    fn dst_channels_is_reported_back() {
        let r = StreamingResampler::new(16000, 16000, 2, 1, 100);
        assert_eq!(r.dst_channels(), 1);
    }
}
