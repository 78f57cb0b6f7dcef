//! Render engine capability interface
//!
//! The renderer drives any waveform-drawing engine through [`WaveformEngine`]:
//! load, drawn-state query, seek, play/pause/stop, region markers, style and
//! surface updates, snapshot export, event subscription and destroy. Engines
//! are created by an [`EngineFactory`] bound to a drawing surface.
//!
//! Engines report asynchronous happenings as [`EngineEvent`]s through an
//! [`EngineEventSink`]. Every event is stamped with the emitting engine's id
//! so consumers can drop events from instances that no longer exist.

use std::time::Duration;

use crossbeam::channel::Sender;
use soundcharm_core::geometry::RenderGeometry;
use soundcharm_core::{AudioTrack, WaveformRenderOptions};
use thiserror::Error;

use crate::theme::WaveformTheme;

/// Engine-level failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Engine construction failed: {0}")]
    Construction(String),

    #[error("Engine failed to load audio: {0}")]
    Load(String),

    #[error("Engine cannot produce a snapshot: {0}")]
    Snapshot(String),

    #[error("Engine does not support {0}")]
    Unsupported(&'static str),

    #[error("Engine has been destroyed")]
    Destroyed,
}

/// Signals an engine emits while alive
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    /// Audio is loaded and drawn
    Ready,
    /// Playback advanced to the given time in seconds
    AudioProcess(f64),
    /// Position changed by a seek, as a fraction of duration
    Seek(f64),
    /// Playback stopped on its own at the end of the track or range
    Finish,
}

/// Event handler registration handed to an engine
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    engine_id: u64,
    sender: Sender<(u64, EngineEvent)>,
}

impl EngineEventSink {
    pub fn new(engine_id: u64, sender: Sender<(u64, EngineEvent)>) -> Self {
        Self { engine_id, sender }
    }

    pub fn engine_id(&self) -> u64 {
        self.engine_id
    }

    pub fn emit(&self, event: EngineEvent) {
        if self.sender.send((self.engine_id, event)).is_err() {
            log::trace!("engine {}: event receiver gone, dropped {:?}", self.engine_id, event);
        }
    }
}

/// The drawing surface an engine is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawSurface {
    pub name: String,
}

impl DrawSurface {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Everything an engine needs to size and style its surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParams {
    pub geometry: RenderGeometry,
    pub options: WaveformRenderOptions,
    pub theme: WaveformTheme,
}

impl EngineParams {
    pub fn new(geometry: RenderGeometry, options: WaveformRenderOptions, theme: WaveformTheme) -> Self {
        Self {
            geometry,
            options,
            theme,
        }
    }

    /// Surface size in device pixels
    pub fn pixel_size(&self) -> (u32, u32) {
        self.geometry.pixel_size()
    }

    /// True when switching to `other` changes the drawing surface itself
    /// (size, density or draw mode) rather than just its style
    pub fn layout_differs(&self, other: &EngineParams) -> bool {
        self.geometry != other.geometry || self.options.layout_differs(&other.options)
    }
}

/// Narrow capability interface over a waveform-drawing engine
///
/// Times are in seconds, progress values are fractions of duration.
pub trait WaveformEngine: Send {
    /// Instance id, unique per factory
    fn id(&self) -> u64;

    /// Parameters the engine is currently drawing with
    fn params(&self) -> &EngineParams;

    /// Feed decoded audio. The engine signals `Ready` once drawn.
    fn load(&mut self, track: &AudioTrack) -> Result<(), EngineError>;

    /// True once the loaded audio has been drawn
    fn is_drawn(&self) -> bool;

    fn duration(&self) -> f64;

    fn current_time(&self) -> f64;

    fn is_playing(&self) -> bool;

    fn seek_to(&mut self, progress: f64);

    /// Start playback, optionally limited to `[start, end]` seconds
    fn play(&mut self, range: Option<(f64, f64)>);

    fn pause(&mut self);

    /// Pause and return to the beginning
    fn stop(&mut self);

    fn clear_regions(&mut self);

    fn add_region(&mut self, start: f64, end: f64);

    /// Apply style-only parameters to the live surface
    fn set_style(&mut self, params: &EngineParams);

    /// Whether the drawing surface can be rebuilt without reloading audio
    fn supports_surface_rebuild(&self) -> bool {
        false
    }

    /// Recreate the drawing surface with new parameters, keeping audio and
    /// transport state
    fn rebuild_surface(&mut self, _params: &EngineParams) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("surface rebuild"))
    }

    /// PNG snapshot of the current surface
    fn export_image(&mut self) -> Result<Vec<u8>, EngineError>;

    fn subscribe(&mut self, sink: EngineEventSink);

    fn unsubscribe_all(&mut self);

    fn destroy(&mut self);

    /// Advance a virtual transport. Engines with a real clock ignore this.
    fn advance(&mut self, _elapsed: Duration) {}
}

/// Creates engines bound to a drawing surface
pub trait EngineFactory: Send + Sync {
    type Engine: WaveformEngine;

    fn create(&self, surface: &DrawSurface, params: &EngineParams) -> Result<Self::Engine, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundcharm_core::geometry::{resolve_geometry, TARGET_PIXEL_WIDTH};
    use soundcharm_core::RenderMode;

    fn params(width: f32, options: WaveformRenderOptions) -> EngineParams {
        let geometry = resolve_geometry(width, &options, None, TARGET_PIXEL_WIDTH).unwrap();
        EngineParams::new(geometry, options, WaveformTheme::for_mode(options.mode))
    }

    #[test]
    fn test_style_change_keeps_layout() {
        let base = params(600.0, WaveformRenderOptions::default());
        let styled = params(
            600.0,
            WaveformRenderOptions {
                bar_width: 5.0,
                bar_gap: 3.0,
                ..Default::default()
            },
        );
        assert!(!base.layout_differs(&styled));
    }

    #[test]
    fn test_mode_and_width_change_layout() {
        let base = params(600.0, WaveformRenderOptions::default());
        let natural = params(
            600.0,
            WaveformRenderOptions {
                mode: RenderMode::Natural,
                ..Default::default()
            },
        );
        assert!(base.layout_differs(&natural));
        assert!(base.layout_differs(&params(500.0, WaveformRenderOptions::default())));
    }

    #[test]
    fn test_sink_stamps_engine_id() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let sink = EngineEventSink::new(7, tx);
        sink.emit(EngineEvent::Ready);
        assert_eq!(rx.try_recv().unwrap(), (7, EngineEvent::Ready));
    }
}
