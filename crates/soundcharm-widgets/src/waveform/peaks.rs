//! Peak generation utilities for waveform display
//!
//! Downsamples a track into one min/max pair per pixel column of the mono
//! mix. Columns are independent, so they are computed in parallel.

use rayon::prelude::*;
use soundcharm_core::AudioTrack;

/// Default display width for peak computation
pub const DEFAULT_WIDTH: usize = 1200;

/// Generate one (min, max) pair per column across the full track
///
/// Column boundaries are distributed proportionally, so every frame lands in
/// exactly one column even when `frames / columns` is not an integer. Tracks
/// shorter than `columns` frames repeat the nearest frame.
pub fn generate_peaks(track: &AudioTrack, columns: usize) -> Vec<(f32, f32)> {
    let len = track.frame_count();
    if len == 0 || columns == 0 {
        return Vec::new();
    }

    (0..columns)
        .into_par_iter()
        .map(|col| {
            let start = (col * len / columns).min(len - 1);
            let end = ((col + 1) * len / columns).clamp(start + 1, len);

            let mut min = f32::INFINITY;
            let mut max = f32::NEG_INFINITY;
            for frame in start..end {
                let sample = track.mono_at(frame);
                min = min.min(sample);
                max = max.max(sample);
            }
            (min, max)
        })
        .collect()
}

/// Loudest absolute value across all peaks
pub fn peak_amplitude(peaks: &[(f32, f32)]) -> f32 {
    peaks
        .iter()
        .fold(0.0f32, |acc, &(min, max)| acc.max(min.abs()).max(max.abs()))
}

/// Rescale peaks so the loudest one reaches full scale
///
/// Silence is returned unchanged.
pub fn normalize_peaks(peaks: &mut [(f32, f32)]) {
    let amplitude = peak_amplitude(peaks);
    if amplitude <= f32::EPSILON {
        return;
    }
    let gain = 1.0 / amplitude;
    for (min, max) in peaks.iter_mut() {
        *min *= gain;
        *max *= gain;
    }
}
