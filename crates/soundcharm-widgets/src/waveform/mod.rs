//! Waveform rendering components
//!
//! - **Peak generation**: downsampling tracks into per-column min/max pairs
//! - **Engine interface**: the capability trait every drawing engine implements
//! - **Raster engine**: headless software engine producing PNG snapshots
//! - **Renderer**: lifecycle owner of the single live engine
//!
//! ## Usage
//!
//! ```ignore
//! let renderer = WaveformRenderer::new(RasterEngineFactory::new(), ReadyTiming::default());
//! renderer.construct(DrawSurface::new("designer"), params).await?;
//! renderer.load_audio(track).await?;
//! renderer.set_region_markers(&[region]);
//! let png = renderer.export_image().await?;
//! ```

mod engine;
mod peaks;
mod raster;
mod renderer;

pub use engine::{
    DrawSurface, EngineError, EngineEvent, EngineEventSink, EngineFactory, EngineParams, WaveformEngine,
};
pub use peaks::{generate_peaks, normalize_peaks, peak_amplitude, DEFAULT_WIDTH};
pub use raster::{RasterEngine, RasterEngineFactory, MAX_SURFACE_DIM};
pub use renderer::{
    ApplyOutcome, LoadOutcome, ReadyTiming, RenderError, RendererEvent, RendererState, WaveformRenderer,
};
