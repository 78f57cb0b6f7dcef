//! Waveform rendering and pointer interaction for SoundCharm
//!
//! - **Theme**: colour schemes per render mode
//! - **Waveform**: engine capability interface, software raster engine and
//!   the renderer that owns the live engine
//! - **Pointer**: mouse/touch drags turned into seek and region-edit commands

pub mod pointer;
pub mod theme;
pub mod waveform;

pub use pointer::{
    normalized_x, nearest_boundary, Boundary, PointerCommand, PointerInput, PointerRegionController, SurfaceBounds,
    END_PREVIEW_SECONDS,
};
pub use theme::{ThemeSet, WaveformTheme};
pub use waveform::{
    generate_peaks, normalize_peaks, ApplyOutcome, DrawSurface, EngineError, EngineEvent, EngineFactory, EngineParams,
    LoadOutcome, RasterEngine, RasterEngineFactory, ReadyTiming, RenderError, RendererEvent, RendererState,
    WaveformEngine, WaveformRenderer,
};
