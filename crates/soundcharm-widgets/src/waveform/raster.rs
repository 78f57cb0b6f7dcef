//! Headless software waveform engine
//!
//! Draws into an in-memory RGBA canvas sized in device pixels. Playback is a
//! virtual transport advanced with [`WaveformEngine::advance`], so the engine
//! behaves the same under test and in the command-line exporter.
//!
//! Drawing order per frame: background, waveform (progress-shaded left of the
//! play position), region markers blended on top.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use image::{ImageFormat, Rgba, RgbaImage};
use soundcharm_core::{AudioTrack, RenderMode};

use super::engine::{DrawSurface, EngineError, EngineEvent, EngineEventSink, EngineFactory, EngineParams, WaveformEngine};
use super::peaks::{generate_peaks, normalize_peaks};

/// Largest surface edge the engine will allocate
pub const MAX_SURFACE_DIM: u32 = 16_384;

/// Creates [`RasterEngine`]s with unique ids
#[derive(Debug)]
pub struct RasterEngineFactory {
    next_id: AtomicU64,
    surface_rebuild: bool,
    draw_delay: Duration,
    created: AtomicU64,
}

impl Default for RasterEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterEngineFactory {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            surface_rebuild: true,
            draw_delay: Duration::ZERO,
            created: AtomicU64::new(0),
        }
    }

    /// Engines that cannot rebuild their surface force the renderer to
    /// reconstruct the whole engine on layout changes
    pub fn with_surface_rebuild(mut self, enabled: bool) -> Self {
        self.surface_rebuild = enabled;
        self
    }

    /// Delay between a draw and the engine reporting itself drawn
    pub fn with_draw_delay(mut self, delay: Duration) -> Self {
        self.draw_delay = delay;
        self
    }

    /// Number of engines created so far
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl EngineFactory for RasterEngineFactory {
    type Engine = RasterEngine;

    fn create(&self, surface: &DrawSurface, params: &EngineParams) -> Result<RasterEngine, EngineError> {
        let (width, height) = params.pixel_size();
        if width > MAX_SURFACE_DIM || height > MAX_SURFACE_DIM {
            return Err(EngineError::Construction(format!(
                "surface {}x{} exceeds {}px",
                width, height, MAX_SURFACE_DIM
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.created.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "raster engine {}: bound to '{}' at {}x{} ({})",
            id,
            surface.name,
            width,
            height,
            params.options.mode.name()
        );

        Ok(RasterEngine {
            id,
            params: *params,
            canvas: Some(RgbaImage::from_pixel(width, height, params.theme.background_rgba())),
            track: None,
            peaks: Vec::new(),
            regions: Vec::new(),
            transport: Transport::default(),
            sinks: Vec::new(),
            surface_rebuild: self.surface_rebuild,
            draw_delay: self.draw_delay,
            drawn_at: None,
            ready_signalled: AtomicBool::new(false),
            destroyed: false,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Transport {
    position: f64,
    playing: bool,
    range_end: Option<f64>,
}

/// Software engine drawing into an RGBA canvas
pub struct RasterEngine {
    id: u64,
    params: EngineParams,
    canvas: Option<RgbaImage>,
    track: Option<AudioTrack>,
    /// One (min, max) pair per device pixel column
    peaks: Vec<(f32, f32)>,
    /// Region markers in seconds
    regions: Vec<(f64, f64)>,
    transport: Transport,
    sinks: Vec<EngineEventSink>,
    surface_rebuild: bool,
    draw_delay: Duration,
    drawn_at: Option<Instant>,
    ready_signalled: AtomicBool,
    destroyed: bool,
}

impl RasterEngine {
    /// Current canvas, if the engine is alive
    pub fn canvas(&self) -> Option<&RgbaImage> {
        self.canvas.as_ref()
    }

    pub fn regions(&self) -> &[(f64, f64)] {
        &self.regions
    }

    fn emit(&self, event: EngineEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }

    fn progress(&self) -> f64 {
        let duration = self.duration();
        if duration <= 0.0 {
            return 0.0;
        }
        (self.transport.position / duration).clamp(0.0, 1.0)
    }

    fn compute_peaks(&mut self) {
        let Some(track) = self.track.as_ref() else {
            self.peaks.clear();
            return;
        };
        let (width, _) = self.params.pixel_size();
        self.peaks = generate_peaks(track, width as usize);
        if self.params.options.normalize {
            normalize_peaks(&mut self.peaks);
        }
    }

    fn mark_drawn(&mut self) {
        self.drawn_at = Some(Instant::now());
        self.ready_signalled.store(false, Ordering::Release);
    }

    fn redraw(&mut self) {
        let progress = self.progress();
        let duration = self.duration();
        let params = self.params;
        let Some(canvas) = self.canvas.as_mut() else {
            return;
        };

        let background = params.theme.background_rgba();
        for pixel in canvas.pixels_mut() {
            *pixel = background;
        }
        if self.peaks.is_empty() {
            return;
        }

        let (width, height) = canvas.dimensions();
        let progress_px = (progress * width as f64).round() as u32;
        let mid = height as f32 / 2.0;
        let gain = params.options.bar_height;

        match params.options.mode {
            RenderMode::Bar => {
                let ratio = params.geometry.pixel_ratio;
                let bar_px = (params.options.bar_width * ratio).round().max(1.0) as u32;
                let step = ((params.options.bar_width + params.options.bar_gap) * ratio)
                    .round()
                    .max(1.0) as u32;

                let mut x = 0;
                while x < width {
                    let end = (x + bar_px).min(width);
                    let amplitude = self.peaks[x as usize..end as usize]
                        .iter()
                        .fold(0.0f32, |acc, &(min, max)| acc.max(min.abs()).max(max.abs()));
                    let half = (amplitude * gain).min(1.0) * mid;
                    let top = ((mid - half).floor().max(0.0) as u32).min(height - 1);
                    let bottom = ((mid + half).ceil() as u32).clamp(top + 1, height);
                    let color = if x < progress_px {
                        params.theme.progress_rgba()
                    } else {
                        params.theme.wave_rgba()
                    };
                    fill_rect(canvas, x, end, top, bottom, color);
                    x += step;
                }
            }
            RenderMode::Natural => {
                for x in 0..width {
                    let (min, max) = self.peaks[x as usize];
                    let top = ((mid - (max * gain).clamp(-1.0, 1.0) * mid).floor().max(0.0) as u32).min(height - 1);
                    let bottom = ((mid - (min * gain).clamp(-1.0, 1.0) * mid).ceil() as u32).clamp(top + 1, height);
                    let color = if x < progress_px {
                        params.theme.progress_rgba()
                    } else {
                        params.theme.wave_rgba()
                    };
                    fill_rect(canvas, x, x + 1, top, bottom, color);
                }
            }
        }

        if duration > 0.0 {
            let fill = params.theme.region_rgba();
            for &(start, end) in &self.regions {
                let left = ((start / duration) * width as f64).round().clamp(0.0, width as f64) as u32;
                let right = ((end / duration) * width as f64).round().clamp(0.0, width as f64) as u32;
                for x in left..right {
                    for y in 0..height {
                        blend(canvas.get_pixel_mut(x, y), fill);
                    }
                }
            }
        }
    }
}

fn fill_rect(canvas: &mut RgbaImage, x0: u32, x1: u32, y0: u32, y1: u32, color: Rgba<u8>) {
    for x in x0..x1 {
        for y in y0..y1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

/// Source-over blend of straight-alpha colours
fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return;
    }
    for c in 0..3 {
        let value = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        dst[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round() as u8;
}

impl WaveformEngine for RasterEngine {
    fn id(&self) -> u64 {
        self.id
    }

    fn params(&self) -> &EngineParams {
        &self.params
    }

    fn load(&mut self, track: &AudioTrack) -> Result<(), EngineError> {
        if self.destroyed {
            return Err(EngineError::Destroyed);
        }
        if track.is_empty() {
            return Err(EngineError::Load("track has no frames".to_string()));
        }

        self.track = Some(track.clone());
        self.transport = Transport::default();
        self.regions.clear();
        self.compute_peaks();
        self.redraw();
        self.mark_drawn();
        log::debug!(
            "raster engine {}: loaded {:.2}s into {} columns",
            self.id,
            track.duration_seconds(),
            self.peaks.len()
        );
        Ok(())
    }

    fn is_drawn(&self) -> bool {
        let drawn = match self.drawn_at {
            Some(at) => !self.destroyed && at.elapsed() >= self.draw_delay,
            None => false,
        };
        if drawn && !self.ready_signalled.swap(true, Ordering::AcqRel) {
            self.emit(EngineEvent::Ready);
        }
        drawn
    }

    fn duration(&self) -> f64 {
        self.track.as_ref().map_or(0.0, AudioTrack::duration_seconds)
    }

    fn current_time(&self) -> f64 {
        self.transport.position
    }

    fn is_playing(&self) -> bool {
        self.transport.playing
    }

    fn seek_to(&mut self, progress: f64) {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        self.transport.position = progress * self.duration();
        self.emit(EngineEvent::Seek(progress));
        self.redraw();
    }

    fn play(&mut self, range: Option<(f64, f64)>) {
        let duration = self.duration();
        if duration <= 0.0 {
            log::debug!("raster engine {}: play ignored, nothing loaded", self.id);
            return;
        }
        match range {
            Some((start, end)) => {
                let start = start.clamp(0.0, duration);
                let end = end.clamp(start, duration);
                self.transport.position = start;
                self.transport.range_end = Some(end);
            }
            None => {
                if self.transport.position >= duration {
                    self.transport.position = 0.0;
                }
                self.transport.range_end = None;
            }
        }
        self.transport.playing = true;
        self.redraw();
    }

    fn pause(&mut self) {
        self.transport.playing = false;
    }

    fn stop(&mut self) {
        self.transport = Transport::default();
        self.redraw();
    }

    fn clear_regions(&mut self) {
        if self.regions.is_empty() {
            return;
        }
        self.regions.clear();
        self.redraw();
    }

    fn add_region(&mut self, start: f64, end: f64) {
        self.regions.push((start.min(end), start.max(end)));
        self.redraw();
    }

    fn set_style(&mut self, params: &EngineParams) {
        let renormalize = params.options.normalize != self.params.options.normalize;
        self.params = *params;
        if renormalize {
            self.compute_peaks();
        }
        self.redraw();
    }

    fn supports_surface_rebuild(&self) -> bool {
        self.surface_rebuild
    }

    fn rebuild_surface(&mut self, params: &EngineParams) -> Result<(), EngineError> {
        if !self.surface_rebuild {
            return Err(EngineError::Unsupported("surface rebuild"));
        }
        if self.destroyed {
            return Err(EngineError::Destroyed);
        }
        let (width, height) = params.pixel_size();
        if width > MAX_SURFACE_DIM || height > MAX_SURFACE_DIM {
            return Err(EngineError::Construction(format!(
                "surface {}x{} exceeds {}px",
                width, height, MAX_SURFACE_DIM
            )));
        }

        self.params = *params;
        self.canvas = Some(RgbaImage::from_pixel(width, height, params.theme.background_rgba()));
        self.compute_peaks();
        self.redraw();
        if self.track.is_some() {
            self.mark_drawn();
        }
        log::debug!("raster engine {}: surface rebuilt at {}x{}", self.id, width, height);
        Ok(())
    }

    fn export_image(&mut self) -> Result<Vec<u8>, EngineError> {
        if self.destroyed {
            return Err(EngineError::Destroyed);
        }
        let canvas = match (&self.canvas, self.drawn_at) {
            (Some(canvas), Some(_)) => canvas,
            _ => return Err(EngineError::Snapshot("nothing drawn".to_string())),
        };

        let mut bytes = Cursor::new(Vec::new());
        canvas
            .write_to(&mut bytes, ImageFormat::Png)
            .map_err(|e| EngineError::Snapshot(e.to_string()))?;
        Ok(bytes.into_inner())
    }

    fn subscribe(&mut self, sink: EngineEventSink) {
        self.sinks.push(sink);
    }

    fn unsubscribe_all(&mut self) {
        self.sinks.clear();
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        // Handlers still registered at this point receive a final finish
        if !self.sinks.is_empty() {
            log::debug!("raster engine {}: destroyed with {} live handlers", self.id, self.sinks.len());
            self.emit(EngineEvent::Finish);
        }
        self.sinks.clear();
        self.canvas = None;
        self.track = None;
        self.peaks.clear();
        self.regions.clear();
        self.transport = Transport::default();
        self.drawn_at = None;
        self.destroyed = true;
    }

    fn advance(&mut self, elapsed: Duration) {
        if !self.transport.playing {
            return;
        }
        let end = self.transport.range_end.unwrap_or_else(|| self.duration());
        self.transport.position += elapsed.as_secs_f64();
        if self.transport.position >= end {
            self.transport.position = end;
            self.transport.playing = false;
            self.transport.range_end = None;
            self.emit(EngineEvent::AudioProcess(end));
            self.emit(EngineEvent::Finish);
        } else {
            self.emit(EngineEvent::AudioProcess(self.transport.position));
        }
        self.redraw();
    }
}
