//! WAV encoding for the transcode hand-off

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::error::{AudioBufferError, AudioBufferResult};
use crate::types::AudioTrack;

/// Encode a track as 16-bit PCM WAV bytes
pub fn encode_wav(track: &AudioTrack) -> AudioBufferResult<Vec<u8>> {
    let spec = WavSpec {
        channels: track.channel_count() as u16,
        sample_rate: track.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let encode_err = |e: hound::Error| AudioBufferError::EncodeFailure(e.to_string());

    let mut cursor = Cursor::new(Vec::with_capacity(44 + track.frame_count() * track.channel_count() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec).map_err(encode_err)?;
        let channels: Vec<&[f32]> = track.channels().collect();
        for frame in 0..track.frame_count() {
            for channel in &channels {
                let sample = (channel[frame].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer.write_sample(sample).map_err(encode_err)?;
            }
        }
        writer.finalize().map_err(encode_err)?;
    }

    log::debug!(
        "encode_wav: {} frames, {} channels -> {} bytes",
        track.frame_count(),
        track.channel_count(),
        cursor.get_ref().len()
    );
    Ok(cursor.into_inner())
}
