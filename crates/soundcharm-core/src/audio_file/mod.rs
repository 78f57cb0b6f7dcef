//! Audio buffer service
//!
//! Turns uploaded blobs into `AudioTrack`s and cuts sub-regions out of them.
//!
//! - `decode` runs the decoder on a blocking worker so the event loop keeps
//!   handling pointer input while a long upload is decoded.
//! - `extract_region` is sample accurate: bounds are computed in seconds and
//!   rounded to whole frames, no rate conversion happens.
//! - Decoded audio at a foreign rate is resampled to `SAMPLE_RATE`.

mod decode;
mod error;
mod resample;
mod wav;

pub use decode::extension_for_mime;
pub use error::{AudioBufferError, AudioBufferResult};
pub use resample::resample_channels;
pub use wav::encode_wav;

use crate::types::{AudioTrack, SAMPLE_RATE};

/// Raw uploaded bytes with their declared MIME type
#[derive(Debug, Clone)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioBlob {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// MIME type without parameters, lowercased (`audio/webm;codecs=opus` -> `audio/webm`)
    pub fn essence(&self) -> String {
        mime_essence(&self.mime_type)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Lowercased MIME type without parameters
pub fn mime_essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Decodes blobs and trims tracks
///
/// Returned tracks are immutable and own (shared) copies of the samples;
/// the service keeps no state between calls beyond its target rate.
#[derive(Debug, Clone)]
pub struct AudioBufferService {
    target_sample_rate: u32,
}

impl Default for AudioBufferService {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBufferService {
    pub fn new() -> Self {
        Self {
            target_sample_rate: SAMPLE_RATE,
        }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Decode a blob on a blocking worker thread
    pub async fn decode(&self, blob: AudioBlob, expected_mime_type: &str) -> AudioBufferResult<AudioTrack> {
        let service = self.clone();
        let expected = expected_mime_type.to_string();
        tokio::task::spawn_blocking(move || service.decode_blocking(blob, &expected))
            .await
            .map_err(|e| AudioBufferError::DecodeFailure(format!("decode task failed: {}", e)))?
    }

    /// Decode a blob on the calling thread
    pub fn decode_blocking(&self, blob: AudioBlob, expected_mime_type: &str) -> AudioBufferResult<AudioTrack> {
        let found = blob.essence();
        let expected = mime_essence(expected_mime_type);
        if found != expected {
            log::warn!("decode: rejecting {} blob, expected {}", found, expected);
            return Err(AudioBufferError::UnsupportedFormat { expected, found });
        }

        log::info!("decode: {} bytes of {}", blob.len(), found);
        let pcm = decode::decode_bytes(blob.bytes, &found)?;

        let channels = if pcm.sample_rate != self.target_sample_rate {
            log::info!(
                "decode: resampling from {}Hz to {}Hz",
                pcm.sample_rate,
                self.target_sample_rate
            );
            resample_channels(&pcm.channels, pcm.sample_rate, self.target_sample_rate)?
        } else {
            pcm.channels
        };

        let track = AudioTrack::from_channels(self.target_sample_rate, channels);
        log::info!(
            "decode: {} channels, {} frames ({:.2}s)",
            track.channel_count(),
            track.frame_count(),
            track.duration_seconds()
        );
        Ok(track)
    }

    /// Copy the fractional region [start, end] of `track` into a new track
    ///
    /// `(0, 1)` returns the input track itself without copying.
    pub fn extract_region(&self, track: &AudioTrack, start: f64, end: f64) -> AudioBufferResult<AudioTrack> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(start) || !in_unit(end) || start > end {
            log::warn!("extract_region: invalid range [{}, {}]", start, end);
            return Err(AudioBufferError::InvalidRange { start, end });
        }

        if start == 0.0 && end == 1.0 {
            return Ok(track.clone());
        }

        let sample_rate = track.sample_rate() as f64;
        let duration = track.duration_seconds();
        let frame_count = track.frame_count();
        let start_offset = ((sample_rate * duration * start).round() as usize).min(frame_count);
        let end_offset = ((sample_rate * duration * end).round() as usize).min(frame_count);
        let length = end_offset.saturating_sub(start_offset);

        let mut channels = Vec::with_capacity(track.channel_count());
        for (index, source) in track.channels().enumerate() {
            let slice = source.get(start_offset..end_offset).ok_or_else(|| {
                AudioBufferError::TrimFailure(format!(
                    "channel {} has {} frames, cannot copy {}..{}",
                    index,
                    source.len(),
                    start_offset,
                    end_offset
                ))
            })?;
            let mut channel = Vec::with_capacity(length);
            channel.extend_from_slice(slice);
            channels.push(channel);
        }

        log::debug!(
            "extract_region: [{:.4}, {:.4}] -> frames {}..{} ({} frames)",
            start,
            end,
            start_offset,
            end_offset,
            length
        );
        Ok(AudioTrack::from_channels(track.sample_rate(), channels))
    }
}
