//! Waveform colour schemes
//!
//! One theme per render mode. Colours are straight (non-premultiplied) RGBA.

use image::Rgba;
use serde::{Deserialize, Serialize};
use soundcharm_core::RenderMode;

/// Colours used by the raster engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformTheme {
    /// Unplayed waveform
    pub wave: [u8; 4],
    /// Waveform left of the play position
    pub progress: [u8; 4],
    /// Region marker fill, blended over the waveform
    pub region: [u8; 4],
    /// Surface background (transparent so the piece image shows through)
    pub background: [u8; 4],
}

impl WaveformTheme {
    /// Bars: solid dark bars, gold progress
    pub const BAR: WaveformTheme = WaveformTheme {
        wave: [0x33, 0x33, 0x33, 0xff],
        progress: [0xc8, 0x9b, 0x3c, 0xff],
        region: [0x3c, 0x8c, 0xc8, 0x4c],
        background: [0, 0, 0, 0],
    };

    /// Natural: lighter envelope so the engraved outline reads well
    pub const NATURAL: WaveformTheme = WaveformTheme {
        wave: [0x55, 0x55, 0x55, 0xff],
        progress: [0xb0, 0x86, 0x2a, 0xff],
        region: [0x3c, 0x8c, 0xc8, 0x4c],
        background: [0, 0, 0, 0],
    };

    pub fn for_mode(mode: RenderMode) -> Self {
        match mode {
            RenderMode::Bar => Self::BAR,
            RenderMode::Natural => Self::NATURAL,
        }
    }

    #[inline]
    pub fn wave_rgba(&self) -> Rgba<u8> {
        Rgba(self.wave)
    }

    #[inline]
    pub fn progress_rgba(&self) -> Rgba<u8> {
        Rgba(self.progress)
    }

    #[inline]
    pub fn region_rgba(&self) -> Rgba<u8> {
        Rgba(self.region)
    }

    #[inline]
    pub fn background_rgba(&self) -> Rgba<u8> {
        Rgba(self.background)
    }
}

impl Default for WaveformTheme {
    fn default() -> Self {
        Self::BAR
    }
}

/// Theme pair selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeSet {
    pub bar: WaveformTheme,
    pub natural: WaveformTheme,
}

impl Default for ThemeSet {
    fn default() -> Self {
        Self {
            bar: WaveformTheme::BAR,
            natural: WaveformTheme::NATURAL,
        }
    }
}

impl ThemeSet {
    pub fn for_mode(&self, mode: RenderMode) -> WaveformTheme {
        match mode {
            RenderMode::Bar => self.bar,
            RenderMode::Natural => self.natural,
        }
    }
}
