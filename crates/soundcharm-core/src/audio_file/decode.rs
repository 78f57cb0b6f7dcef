//! Compressed/containered audio to PCM via symphonia

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::error::{AudioBufferError, AudioBufferResult};

/// Decoded PCM before it becomes an `AudioTrack`
pub(crate) struct DecodedPcm {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

/// File extension symphonia should assume for a MIME type
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/ogg" => Some("ogg"),
        "audio/mp4" | "audio/aac" | "audio/x-m4a" => Some("m4a"),
        "audio/webm" | "video/webm" => Some("webm"),
        "video/mp4" => Some("mp4"),
        _ => None,
    }
}

/// Decode a complete byte stream into per-channel samples
pub(crate) fn decode_bytes(bytes: Vec<u8>, mime_type: &str) -> AudioBufferResult<DecodedPcm> {
    let byte_len = bytes.len();
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    hint.mime_type(mime_type);
    if let Some(ext) = extension_for_mime(mime_type) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioBufferError::DecodeFailure(format!("probe failed: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioBufferError::DecodeFailure("no audio track found".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioBufferError::DecodeFailure(format!("no decoder: {}", e)))?;

    let mut channels: Vec<Vec<f32>> = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut sample_buf: Option<(SampleBuffer<f32>, usize)> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(Error::ResetRequired) => break,
            Err(e) => {
                return Err(AudioBufferError::DecodeFailure(format!("read packet: {}", e)));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::DecodeError(e)) => {
                log::warn!("decode: skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(AudioBufferError::DecodeFailure(e.to_string())),
        };

        let spec = *decoded.spec();
        let channel_count = spec.channels.count();
        if channels.is_empty() {
            channels = vec![Vec::new(); channel_count];
            sample_rate = spec.rate;
        }

        // Capacity is in frames and may grow between packets
        let frames = decoded.capacity();
        let needs_new = match &sample_buf {
            Some((_, capacity)) => *capacity < frames,
            None => true,
        };
        if needs_new {
            sample_buf = Some((SampleBuffer::<f32>::new(frames as u64, spec), frames));
        }

        if let Some((buf, _)) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            for frame in buf.samples().chunks_exact(channel_count) {
                for (channel, &sample) in channels.iter_mut().zip(frame) {
                    channel.push(sample);
                }
            }
        }
    }

    if channels.first().map_or(true, Vec::is_empty) {
        return Err(AudioBufferError::DecodeFailure(format!(
            "no audio frames in {} bytes of {}",
            byte_len, mime_type
        )));
    }
    if sample_rate == 0 {
        return Err(AudioBufferError::DecodeFailure("unknown sample rate".to_string()));
    }

    Ok(DecodedPcm { channels, sample_rate })
}
