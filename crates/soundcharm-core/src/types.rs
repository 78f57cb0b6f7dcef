//! Common types for SoundCharm
//!
//! This module contains the fundamental data model shared by the designer:
//! decoded audio tracks, normalized regions over a track, render options and
//! the playback/phase enums that drive the renderer and the orchestrator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// System sample rate. Every decoded track is brought to this rate.
pub const SAMPLE_RATE: u32 = 44100;

/// Audio sample type (32-bit float, nominal range [-1, 1])
pub type Sample = f32;

/// Decoded PCM audio
///
/// Channel data is stored non-interleaved and shared behind an `Arc`, so
/// cloning a track is cheap and never copies samples. A track is immutable:
/// trimming produces a new track instead of mutating this one.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    sample_rate: u32,
    channels: Arc<Vec<Vec<Sample>>>,
    frame_count: usize,
}

impl AudioTrack {
    /// Create a track from per-channel sample vectors
    ///
    /// All channels are truncated to the shortest channel length so the
    /// frame count is well defined.
    pub fn from_channels(sample_rate: u32, mut channels: Vec<Vec<Sample>>) -> Self {
        let frame_count = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in channels.iter_mut() {
            channel.truncate(frame_count);
        }
        Self {
            sample_rate,
            channels: Arc::new(channels),
            frame_count,
        }
    }

    /// Create a track from interleaved samples [c0, c1, ..., c0, c1, ...]
    pub fn from_interleaved(sample_rate: u32, channel_count: usize, interleaved: &[Sample]) -> Self {
        let channel_count = channel_count.max(1);
        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self::from_channels(sample_rate, channels)
    }

    /// A silent track of the given length
    pub fn silence(sample_rate: u32, channel_count: usize, frame_count: usize) -> Self {
        Self::from_channels(sample_rate, vec![vec![0.0; frame_count]; channel_count.max(1)])
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Samples of one channel
    pub fn channel(&self, index: usize) -> Option<&[Sample]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Iterate over all channels
    pub fn channels(&self) -> impl Iterator<Item = &[Sample]> {
        self.channels.iter().map(Vec::as_slice)
    }

    /// Duration in seconds (frame_count / sample_rate)
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    /// True when both tracks point at the same sample storage
    pub fn shares_data_with(&self, other: &AudioTrack) -> bool {
        Arc::ptr_eq(&self.channels, &other.channels)
    }

    /// Mono mix of one frame (average of all channels)
    #[inline]
    pub fn mono_at(&self, frame: usize) -> Sample {
        let count = self.channels.len();
        if count == 0 {
            return 0.0;
        }
        self.channels.iter().map(|c| c[frame]).sum::<Sample>() / count as Sample
    }
}

/// Fractional selection over a track's duration
///
/// Both bounds live in [0, 1] and `start <= end` always holds.
///
/// Edit policy:
/// - `new` and `from_points` accept bounds in any order and swap them.
/// - `set_start` / `set_end` move one boundary and clamp it against the
///   other, so a boundary can never be dragged past its partner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRegion {
    start: f64,
    end: f64,
}

impl NormalizedRegion {
    /// The whole track
    pub const FULL: NormalizedRegion = NormalizedRegion { start: 0.0, end: 1.0 };

    /// Create a region, clamping both values to [0, 1] and swapping them if needed
    pub fn new(start: f64, end: f64) -> Self {
        Self::from_points(start, end)
    }

    /// Region spanned by two arbitrary points (swap policy)
    pub fn from_points(a: f64, b: f64) -> Self {
        let a = clamp_unit(a);
        let b = clamp_unit(b);
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    #[inline]
    pub fn start(&self) -> f64 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> f64 {
        self.end
    }

    #[inline]
    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_full(&self) -> bool {
        self.start <= 0.0 && self.end >= 1.0
    }

    /// Move the start boundary (clamp policy: never beyond `end`)
    pub fn set_start(&mut self, start: f64) {
        self.start = clamp_unit(start).min(self.end);
    }

    /// Move the end boundary (clamp policy: never before `start`)
    pub fn set_end(&mut self, end: f64) {
        self.end = clamp_unit(end).max(self.start);
    }

    /// Map a region expressed relative to this region back into the
    /// coordinate space this region lives in.
    ///
    /// Trimming to [0.3, 0.7] and then to [0.1, 0.9] of the result is the
    /// same as trimming the origin to `[0.3, 0.7].compose([0.1, 0.9])`.
    pub fn compose(&self, inner: NormalizedRegion) -> NormalizedRegion {
        let span = self.len();
        NormalizedRegion::new(self.start + inner.start * span, self.start + inner.end * span)
    }

    /// Bounds in seconds for a track of the given duration
    pub fn to_seconds(&self, duration: f64) -> (f64, f64) {
        (self.start * duration, self.end * duration)
    }
}

impl Default for NormalizedRegion {
    fn default() -> Self {
        Self::FULL
    }
}

#[inline]
fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Waveform drawing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Discrete bars
    #[default]
    Bar,
    /// Continuous min/max envelope
    Natural,
}

impl RenderMode {
    pub fn name(&self) -> &'static str {
        match self {
            RenderMode::Bar => "bar",
            RenderMode::Natural => "natural",
        }
    }
}

impl std::str::FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bar" | "bars" => Ok(RenderMode::Bar),
            "natural" | "wave" => Ok(RenderMode::Natural),
            other => Err(format!("unknown render mode: {}", other)),
        }
    }
}

/// Visual parameters of the waveform
///
/// `mode` and `height` affect layout (they change the drawing surface size);
/// the remaining fields only affect draw style and can be applied to a live
/// engine without a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformRenderOptions {
    /// Height as a multiple of container width (plain mode only)
    pub height: f32,
    /// Bar height (intensity) multiplier
    pub bar_height: f32,
    /// Bar width in CSS pixels
    pub bar_width: f32,
    /// Gap between bars in CSS pixels
    pub bar_gap: f32,
    /// Scale peaks to the loudest sample
    pub normalize: bool,
    pub mode: RenderMode,
}

impl Default for WaveformRenderOptions {
    fn default() -> Self {
        Self {
            height: 0.25,
            bar_height: 1.0,
            bar_width: 2.0,
            bar_gap: 1.0,
            normalize: true,
            mode: RenderMode::Bar,
        }
    }
}

impl WaveformRenderOptions {
    /// True when switching from `self` to `other` needs new layout
    pub fn layout_differs(&self, other: &WaveformRenderOptions) -> bool {
        self.mode != other.mode || (self.height - other.height).abs() > f32::EPSILON
    }

    /// Clamp values to a drawable range
    pub fn validate(&mut self) {
        self.height = self.height.clamp(0.05, 2.0);
        self.bar_height = self.bar_height.clamp(0.1, 10.0);
        self.bar_width = self.bar_width.clamp(0.5, 50.0);
        self.bar_gap = self.bar_gap.clamp(0.0, 50.0);
    }
}

/// Desired playback state, reconciled against the live engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackDirective {
    Play,
    Pause,
    #[default]
    Stop,
}

/// Page/phase of the designer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DesignerPhase {
    #[default]
    Uploader,
    Main,
    Trimmer,
    Exporter,
}

impl DesignerPhase {
    pub fn name(&self) -> &'static str {
        match self {
            DesignerPhase::Uploader => "uploader",
            DesignerPhase::Main => "main",
            DesignerPhase::Trimmer => "trimmer",
            DesignerPhase::Exporter => "exporter",
        }
    }

    /// Region markers are only visible while trimming
    pub fn shows_region_markers(&self) -> bool {
        matches!(self, DesignerPhase::Trimmer)
    }
}
