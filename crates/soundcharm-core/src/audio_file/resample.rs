//! Sample rate conversion to the system rate

use rubato::{FftFixedIn, Resampler};

use super::error::{AudioBufferError, AudioBufferResult};

/// Input chunk size for the FFT resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Resample non-interleaved channels from `from` Hz to `to` Hz
///
/// The resampler's output delay is removed and the result is cut to
/// `round(frames * to / from)` frames so durations are preserved.
pub fn resample_channels(channels: &[Vec<f32>], from: u32, to: u32) -> AudioBufferResult<Vec<Vec<f32>>> {
    if from == to || channels.is_empty() {
        return Ok(channels.to_vec());
    }

    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let expected = (frames as f64 * to as f64 / from as f64).round() as usize;
    if frames == 0 {
        return Ok(vec![Vec::new(); channels.len()]);
    }

    let map_err = |e: &dyn std::fmt::Display| AudioBufferError::DecodeFailure(format!("resample {}Hz -> {}Hz: {}", from, to, e));

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, channels.len())
        .map_err(|e| map_err(&e))?;
    let delay = resampler.output_delay();

    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels.len()];
    let append = |output: &mut Vec<Vec<f32>>, chunk: Vec<Vec<f32>>| {
        for (dst, src) in output.iter_mut().zip(chunk) {
            dst.extend_from_slice(&src);
        }
    };

    let mut pos = 0;
    loop {
        let needed = resampler.input_frames_next();
        if pos + needed > frames {
            break;
        }
        let chunk: Vec<&[f32]> = channels.iter().map(|c| &c[pos..pos + needed]).collect();
        let out = resampler.process(&chunk, None).map_err(|e| map_err(&e))?;
        append(&mut output, out);
        pos += needed;
    }

    if pos < frames {
        let chunk: Vec<&[f32]> = channels.iter().map(|c| &c[pos..frames]).collect();
        let out = resampler.process_partial(Some(chunk.as_slice()), None).map_err(|e| map_err(&e))?;
        append(&mut output, out);
    }

    // Flush the delay line
    while output[0].len() < expected + delay {
        let out = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| map_err(&e))?;
        if out.first().map_or(true, Vec::is_empty) {
            break;
        }
        append(&mut output, out);
    }

    for channel in output.iter_mut() {
        let skip = delay.min(channel.len());
        channel.drain(..skip);
        channel.resize(expected, 0.0);
    }

    log::debug!(
        "resample: {} frames at {}Hz -> {} frames at {}Hz ({} channels)",
        frames,
        from,
        expected,
        to,
        channels.len()
    );

    Ok(output)
}
