//! Waveform renderer
//!
//! Owns the single live render engine and its lifecycle:
//!
//! ```text
//! Uninitialized -> Constructed -> Ready -> Destroyed
//!                       ^                      |
//!                       +---- construct -------+
//! ```
//!
//! ## Serialization
//!
//! Every operation that can replace or reload the engine (`construct`,
//! `load_audio`, `apply_render_options`, `export_image`, `teardown`) runs
//! behind one async mutex, so a rebuild never interleaves with another.
//! `load_audio` and `apply_render_options` also take a ticket; a call whose
//! ticket is no longer the latest when it reaches the engine does nothing.
//!
//! ## Drag path
//!
//! `seek`, `set_region_markers`, `reconcile_playback` and `tick` are
//! synchronous. They record the desired state and apply it only when the
//! engine is Ready and not busy; otherwise the state is applied right after
//! the in-flight rebuild finishes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use soundcharm_core::{AudioTrack, NormalizedRegion, PlaybackDirective};
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::time::Instant;

use super::engine::{DrawSurface, EngineError, EngineEvent, EngineEventSink, EngineFactory, EngineParams, WaveformEngine};

/// Renderer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// The engine failed during construction or load. The instance has been
    /// torn down; a fresh `construct` is required.
    #[error("Render engine failure during {operation}: {source}")]
    RenderEngineFailure {
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("Renderer not ready for {0}")]
    NotReady(&'static str),

    #[error("Export failed: {0}")]
    ExportFailure(String),
}

/// Renderer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RendererState {
    #[default]
    Uninitialized,
    Constructed,
    Ready,
    Destroyed,
}

/// What `apply_render_options` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No engine existed; one was constructed
    Constructed,
    /// Live parameters already matched
    Unchanged,
    /// Style-only change applied to the live surface
    StyleUpdated,
    /// Drawing surface rebuilt, audio kept
    SurfaceRebuilt,
    /// Engine torn down, reconstructed and reloaded
    Reconstructed,
    /// A newer call arrived before this one reached the engine
    Superseded,
}

/// What `load_audio` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Superseded,
}

/// Events from the live engine, already filtered and translated
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RendererEvent {
    Ready,
    /// Play position as a fraction of duration
    Position(f64),
    Seeked(f64),
    /// Playback reached the end of the track or play window
    Finished,
}

/// Readiness polling parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadyTiming {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ReadyTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// State the engine should reflect, kept across rebuilds
#[derive(Default)]
struct Desired {
    surface: Option<DrawSurface>,
    track: Option<AudioTrack>,
    markers: Vec<NormalizedRegion>,
    directive: PlaybackDirective,
    play_window: Option<NormalizedRegion>,
    position: f64,
    live_engine: Option<u64>,
}

/// Lifecycle owner of one render engine
pub struct WaveformRenderer<F: EngineFactory> {
    factory: F,
    timing: ReadyTiming,
    live: AsyncMutex<Option<F::Engine>>,
    desired: Mutex<Desired>,
    state_tx: watch::Sender<RendererState>,
    events_tx: Sender<(u64, EngineEvent)>,
    events_rx: Receiver<(u64, EngineEvent)>,
    options_ticket: AtomicU64,
    load_ticket: AtomicU64,
}

type Slot<'a, E> = AsyncMutexGuard<'a, Option<E>>;

impl<F: EngineFactory> WaveformRenderer<F> {
    pub fn new(factory: F, timing: ReadyTiming) -> Self {
        let (state_tx, _) = watch::channel(RendererState::Uninitialized);
        let (events_tx, events_rx) = channel::unbounded();
        Self {
            factory,
            timing,
            live: AsyncMutex::new(None),
            desired: Mutex::new(Desired::default()),
            state_tx,
            events_tx,
            events_rx,
            options_ticket: AtomicU64::new(0),
            load_ticket: AtomicU64::new(0),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn state(&self) -> RendererState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle state changes
    pub fn subscribe_state(&self) -> watch::Receiver<RendererState> {
        self.state_tx.subscribe()
    }

    /// Wait until the engine is Ready, up to the configured timeout
    pub async fn ready(&self) -> Result<(), RenderError> {
        let mut rx = self.state_tx.subscribe();
        let ready = matches!(
            tokio::time::timeout(self.timing.timeout, rx.wait_for(|s| *s == RendererState::Ready)).await,
            Ok(Ok(_))
        );
        if ready {
            Ok(())
        } else {
            Err(RenderError::NotReady("ready"))
        }
    }

    /// Id of the live engine instance
    pub fn engine_id(&self) -> Option<u64> {
        self.desired().live_engine
    }

    /// Last known play position as a fraction of duration
    pub fn position(&self) -> f64 {
        self.desired().position
    }

    /// Parameters of the live engine
    pub async fn live_params(&self) -> Option<EngineParams> {
        self.live.lock().await.as_ref().map(|engine| *engine.params())
    }

    /// Create an engine bound to `surface`, destroying any live one first
    pub async fn construct(&self, surface: DrawSurface, params: EngineParams) -> Result<(), RenderError> {
        self.desired().surface = Some(surface);
        let mut slot = self.live.lock().await;
        self.construct_locked(&mut slot, params)
    }

    /// Feed a track to the live engine and wait for it to be drawn
    pub async fn load_audio(&self, track: AudioTrack) -> Result<LoadOutcome, RenderError> {
        let ticket = self.load_ticket.fetch_add(1, Ordering::AcqRel) + 1;
        {
            let mut desired = self.desired();
            desired.track = Some(track.clone());
            desired.position = 0.0;
        }

        let mut slot = self.live.lock().await;
        if self.load_ticket.load(Ordering::Acquire) != ticket {
            log::debug!("load_audio: ticket {} superseded", ticket);
            return Ok(LoadOutcome::Superseded);
        }

        log::info!(
            "load_audio: {:.2}s, {} channels into engine {:?}",
            track.duration_seconds(),
            track.channel_count(),
            self.engine_id()
        );
        self.load_locked(&mut slot, &track, 0.0).await?;
        Ok(LoadOutcome::Loaded)
    }

    /// Bring the live engine in line with `params`
    ///
    /// Style-only changes are applied in place. Layout changes rebuild the
    /// drawing surface when the engine supports it, otherwise the engine is
    /// reconstructed and the current track reloaded. Either way the play
    /// position is restored before returning.
    pub async fn apply_render_options(&self, params: EngineParams) -> Result<ApplyOutcome, RenderError> {
        let ticket = self.options_ticket.fetch_add(1, Ordering::AcqRel) + 1;

        let mut slot = self.live.lock().await;
        if self.options_ticket.load(Ordering::Acquire) != ticket {
            log::debug!("apply_render_options: ticket {} superseded", ticket);
            return Ok(ApplyOutcome::Superseded);
        }

        if slot.is_none() {
            self.construct_locked(&mut slot, params)?;
            let track = self.desired().track.clone();
            if let Some(track) = track {
                self.load_locked(&mut slot, &track, 0.0).await?;
            }
            return Ok(ApplyOutcome::Constructed);
        }
        let Some(engine) = slot.as_mut() else {
            return Err(RenderError::NotReady("apply_render_options"));
        };

        let live = *engine.params();
        if live == params {
            return Ok(ApplyOutcome::Unchanged);
        }

        if !live.layout_differs(&params) {
            log::debug!("apply_render_options: style update on engine {}", engine.id());
            engine.set_style(&params);
            return Ok(ApplyOutcome::StyleUpdated);
        }

        let position = progress_of(engine);
        let has_audio = engine.duration() > 0.0;
        log::info!(
            "apply_render_options: {} -> {} at {}x{}, position {:.3}",
            live.options.mode.name(),
            params.options.mode.name(),
            params.pixel_size().0,
            params.pixel_size().1,
            position
        );

        if engine.supports_surface_rebuild() {
            let rebuilt = engine.rebuild_surface(&params);
            if let Err(e) = rebuilt {
                return Err(self.fail_locked(&mut slot, "apply_render_options", e));
            }
            if has_audio {
                self.set_state(RendererState::Constructed);
                self.await_drawn(&mut slot, "apply_render_options").await?;
                if let Some(engine) = slot.as_mut() {
                    self.restore(engine, position, true);
                }
                self.set_state(RendererState::Ready);
            }
            return Ok(ApplyOutcome::SurfaceRebuilt);
        }

        self.construct_locked(&mut slot, params)?;
        let track = self.desired().track.clone();
        if let Some(track) = track {
            self.load_locked(&mut slot, &track, position).await?;
        }
        Ok(ApplyOutcome::Reconstructed)
    }

    /// Redraw region markers from `regions`. An empty list clears them.
    pub fn set_region_markers(&self, regions: &[NormalizedRegion]) {
        self.desired().markers = regions.to_vec();
        self.with_ready_engine("set_region_markers", |engine| apply_markers(engine, regions));
    }

    /// Move the play position to `progress` (fraction of duration)
    pub fn seek(&self, progress: f64) {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        self.desired().position = progress;
        self.with_ready_engine("seek", |engine| engine.seek_to(progress));
    }

    /// Make the engine's transport match `directive`
    ///
    /// With a play window, playback is restarted inside
    /// `[start * duration, end * duration]`.
    pub fn reconcile_playback(&self, directive: PlaybackDirective, play_window: Option<NormalizedRegion>) {
        {
            let mut desired = self.desired();
            desired.directive = directive;
            desired.play_window = play_window;
        }
        let applied = self.with_ready_engine("reconcile_playback", |engine| {
            apply_playback(engine, directive, play_window, false);
            progress_of(engine)
        });
        if let Some(position) = applied {
            self.desired().position = position;
        }
    }

    /// Advance the engine's transport
    pub fn tick(&self, elapsed: Duration) {
        self.with_ready_engine("tick", |engine| engine.advance(elapsed));
    }

    /// Drain engine events, dropping those from instances no longer live
    pub fn pump_events(&self) -> Vec<RendererEvent> {
        let mut out = Vec::new();
        for (engine_id, event) in self.events_rx.try_iter() {
            let mut desired = self.desired();
            if desired.live_engine != Some(engine_id) {
                log::debug!("pump_events: dropped {:?} from stale engine {}", event, engine_id);
                continue;
            }
            match event {
                EngineEvent::Ready => out.push(RendererEvent::Ready),
                EngineEvent::AudioProcess(seconds) => {
                    let duration = desired.track.as_ref().map_or(0.0, AudioTrack::duration_seconds);
                    let progress = if duration > 0.0 {
                        (seconds / duration).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    desired.position = progress;
                    out.push(RendererEvent::Position(progress));
                }
                EngineEvent::Seek(progress) => {
                    desired.position = progress;
                    out.push(RendererEvent::Seeked(progress));
                }
                EngineEvent::Finish => {
                    desired.directive = PlaybackDirective::Pause;
                    desired.play_window = None;
                    out.push(RendererEvent::Finished);
                }
            }
        }
        out
    }

    /// Seek to the start and snapshot the surface as PNG
    pub async fn export_image(&self) -> Result<Vec<u8>, RenderError> {
        let mut slot = self.live.lock().await;
        if self.state() != RendererState::Ready {
            log::error!("export_image: renderer is {:?}", self.state());
            return Err(RenderError::ExportFailure(format!("renderer is {:?}", self.state())));
        }
        let engine = slot
            .as_mut()
            .ok_or_else(|| RenderError::ExportFailure("no live engine".to_string()))?;

        engine.seek_to(0.0);
        self.desired().position = 0.0;

        let png = engine.export_image().map_err(|e| {
            log::error!("export_image: engine {} snapshot failed: {}", engine.id(), e);
            RenderError::ExportFailure(e.to_string())
        })?;
        log::info!("export_image: {} bytes from engine {}", png.len(), engine.id());
        Ok(png)
    }

    /// Unregister handlers and destroy the live engine
    pub async fn teardown(&self) {
        let mut slot = self.live.lock().await;
        if let Some(engine) = slot.take() {
            self.teardown_engine(engine);
        }
        let dropped = self.events_rx.try_iter().count();
        if dropped > 0 {
            log::debug!("teardown: discarded {} pending events", dropped);
        }
    }

    // =========================================================================
    // Locked helpers
    // =========================================================================

    fn construct_locked(&self, slot: &mut Slot<'_, F::Engine>, params: EngineParams) -> Result<(), RenderError> {
        if let Some(old) = slot.take() {
            self.teardown_engine(old);
        }

        let surface = self
            .desired()
            .surface
            .get_or_insert_with(|| DrawSurface::new("waveform"))
            .clone();
        let mut engine = self.factory.create(&surface, &params).map_err(|e| {
            log::error!("construct: engine creation on '{}' failed: {}", surface.name, e);
            RenderError::RenderEngineFailure {
                operation: "construct",
                source: e,
            }
        })?;

        let id = engine.id();
        engine.subscribe(EngineEventSink::new(id, self.events_tx.clone()));
        self.desired().live_engine = Some(id);
        **slot = Some(engine);
        self.set_state(RendererState::Constructed);
        log::info!("construct: engine {} on '{}'", id, surface.name);
        Ok(())
    }

    async fn load_locked(
        &self,
        slot: &mut Slot<'_, F::Engine>,
        track: &AudioTrack,
        position: f64,
    ) -> Result<(), RenderError> {
        let Some(engine) = slot.as_mut() else {
            return Err(RenderError::NotReady("load_audio"));
        };
        self.set_state(RendererState::Constructed);
        let loaded = engine.load(track);
        if let Err(e) = loaded {
            return Err(self.fail_locked(slot, "load_audio", e));
        }

        self.await_drawn(slot, "load_audio").await?;
        if let Some(engine) = slot.as_mut() {
            self.restore(engine, position, true);
        }
        self.set_state(RendererState::Ready);
        Ok(())
    }

    /// Poll the engine's drawn flag until it is set or the timeout passes
    async fn await_drawn(&self, slot: &mut Slot<'_, F::Engine>, operation: &'static str) -> Result<(), RenderError> {
        let deadline = Instant::now() + self.timing.timeout;
        loop {
            match slot.as_ref() {
                Some(engine) if engine.is_drawn() => return Ok(()),
                Some(_) => {}
                None => return Err(RenderError::NotReady(operation)),
            }
            if Instant::now() >= deadline {
                let error = EngineError::Load(format!("not drawn within {:?}", self.timing.timeout));
                return Err(self.fail_locked(slot, operation, error));
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }

    /// Reapply position, markers and playback to a freshly drawn engine.
    /// Position goes first so the surface never shows position 0.
    fn restore(&self, engine: &mut F::Engine, position: f64, resume: bool) {
        engine.seek_to(position);
        let (markers, directive, window) = {
            let mut desired = self.desired();
            desired.position = position;
            (desired.markers.clone(), desired.directive, desired.play_window)
        };
        apply_markers(engine, &markers);
        apply_playback(engine, directive, window, resume);
    }

    fn fail_locked(&self, slot: &mut Slot<'_, F::Engine>, operation: &'static str, error: EngineError) -> RenderError {
        log::error!("{}: engine {:?} failed: {}", operation, self.engine_id(), error);
        if let Some(engine) = slot.take() {
            self.teardown_engine(engine);
        }
        RenderError::RenderEngineFailure {
            operation,
            source: error,
        }
    }

    /// Handlers are removed before destroy so residual events never arrive
    fn teardown_engine(&self, mut engine: F::Engine) {
        let id = engine.id();
        engine.unsubscribe_all();
        engine.destroy();
        {
            let mut desired = self.desired();
            if desired.live_engine == Some(id) {
                desired.live_engine = None;
            }
        }
        self.set_state(RendererState::Destroyed);
        log::info!("teardown: engine {} destroyed", id);
    }

    fn with_ready_engine<R>(&self, operation: &str, f: impl FnOnce(&mut F::Engine) -> R) -> Option<R> {
        if self.state() != RendererState::Ready {
            log::trace!("{}: renderer {:?}, deferred", operation, self.state());
            return None;
        }
        match self.live.try_lock() {
            Ok(mut slot) => slot.as_mut().map(f),
            Err(_) => {
                log::trace!("{}: renderer busy, deferred", operation);
                None
            }
        }
    }

    fn set_state(&self, state: RendererState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            log::debug!("renderer: {:?} -> {:?}", previous, state);
        }
    }

    fn desired(&self) -> MutexGuard<'_, Desired> {
        self.desired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn progress_of<E: WaveformEngine>(engine: &E) -> f64 {
    let duration = engine.duration();
    if duration <= 0.0 {
        return 0.0;
    }
    (engine.current_time() / duration).clamp(0.0, 1.0)
}

fn apply_markers<E: WaveformEngine>(engine: &mut E, regions: &[NormalizedRegion]) {
    let duration = engine.duration();
    engine.clear_regions();
    for region in regions {
        let (start, end) = region.to_seconds(duration);
        engine.add_region(start, end);
    }
}

/// `resume` continues from the current position when it lies inside the
/// window; otherwise a windowed play restarts at the window start.
fn apply_playback<E: WaveformEngine>(
    engine: &mut E,
    directive: PlaybackDirective,
    window: Option<NormalizedRegion>,
    resume: bool,
) {
    match directive {
        PlaybackDirective::Play => match window {
            Some(window) => {
                let (start, end) = window.to_seconds(engine.duration());
                let now = engine.current_time();
                let from = if resume && now >= start && now < end { now } else { start };
                engine.play(Some((from, end)));
            }
            None => {
                if !engine.is_playing() {
                    engine.play(None);
                }
            }
        },
        PlaybackDirective::Pause => {
            if engine.is_playing() {
                engine.pause();
            }
        }
        PlaybackDirective::Stop => {
            if engine.is_playing() {
                engine.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::WaveformTheme;
    use crate::waveform::raster::RasterEngineFactory;
    use soundcharm_core::geometry::{resolve_geometry, TARGET_PIXEL_WIDTH};
    use soundcharm_core::{RenderMode, WaveformRenderOptions, SAMPLE_RATE};

    fn params(mode: RenderMode) -> EngineParams {
        let options = WaveformRenderOptions {
            mode,
            ..Default::default()
        };
        let geometry = resolve_geometry(300.0, &options, None, TARGET_PIXEL_WIDTH).unwrap();
        EngineParams::new(geometry, options, WaveformTheme::for_mode(mode))
    }

    fn tone(seconds: f64) -> AudioTrack {
        let frames = (SAMPLE_RATE as f64 * seconds) as usize;
        let data = (0..frames).map(|i| (i as f32 * 0.03).sin() * 0.8).collect();
        AudioTrack::from_channels(SAMPLE_RATE, vec![data])
    }

    fn timing() -> ReadyTiming {
        ReadyTiming {
            timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(2),
        }
    }

    async fn ready_renderer(factory: RasterEngineFactory) -> WaveformRenderer<RasterEngineFactory> {
        let renderer = WaveformRenderer::new(factory, timing());
        renderer
            .construct(DrawSurface::new("test"), params(RenderMode::Bar))
            .await
            .unwrap();
        assert_eq!(renderer.state(), RendererState::Constructed);
        assert_eq!(renderer.load_audio(tone(2.0)).await.unwrap(), LoadOutcome::Loaded);
        renderer.ready().await.unwrap();
        renderer
    }

    #[tokio::test]
    async fn test_construct_load_ready() {
        let renderer = ready_renderer(RasterEngineFactory::new()).await;
        assert_eq!(renderer.state(), RendererState::Ready);
        assert!(renderer.pump_events().contains(&RendererEvent::Ready));
        assert_eq!(renderer.live_params().await, Some(params(RenderMode::Bar)));
    }

    #[tokio::test]
    async fn test_ready_times_out_without_engine() {
        let renderer = WaveformRenderer::new(RasterEngineFactory::new(), timing());
        assert_eq!(renderer.ready().await, Err(RenderError::NotReady("ready")));
    }

    #[tokio::test]
    async fn test_load_failure_tears_engine_down() {
        let renderer = WaveformRenderer::new(RasterEngineFactory::new(), timing());
        renderer
            .construct(DrawSurface::new("test"), params(RenderMode::Bar))
            .await
            .unwrap();

        let err = renderer
            .load_audio(AudioTrack::silence(SAMPLE_RATE, 1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::RenderEngineFailure { operation: "load_audio", .. }));
        assert_eq!(renderer.state(), RendererState::Destroyed);
        assert!(renderer.live_params().await.is_none());

        // Retry through a fresh construct
        renderer
            .construct(DrawSurface::new("test"), params(RenderMode::Bar))
            .await
            .unwrap();
        assert_eq!(renderer.load_audio(tone(1.0)).await.unwrap(), LoadOutcome::Loaded);
    }

    #[tokio::test]
    async fn test_style_change_applies_in_place() {
        let renderer = ready_renderer(RasterEngineFactory::new()).await;
        let mut styled = params(RenderMode::Bar);
        styled.options.bar_width = 4.0;

        assert_eq!(renderer.apply_render_options(styled).await.unwrap(), ApplyOutcome::StyleUpdated);
        assert_eq!(renderer.apply_render_options(styled).await.unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(renderer.factory().created_count(), 1);
        assert_eq!(renderer.live_params().await, Some(styled));
    }

    #[tokio::test]
    async fn test_surface_rebuild_restores_position() {
        let renderer = ready_renderer(RasterEngineFactory::new()).await;
        renderer.seek(0.4);

        let outcome = renderer.apply_render_options(params(RenderMode::Natural)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::SurfaceRebuilt);
        assert_eq!(renderer.factory().created_count(), 1);
        assert_eq!(renderer.state(), RendererState::Ready);
        assert!((renderer.position() - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_reconstruct_reloads_and_restores_position() {
        let renderer = ready_renderer(RasterEngineFactory::new().with_surface_rebuild(false)).await;
        let first_engine = renderer.engine_id();
        renderer.seek(0.4);
        renderer.pump_events();

        let outcome = renderer.apply_render_options(params(RenderMode::Natural)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Reconstructed);
        assert_eq!(renderer.factory().created_count(), 2);
        assert_ne!(renderer.engine_id(), first_engine);

        // The first event from the new engine is the restored seek, never position 0
        let events = renderer.pump_events();
        let first_seek = events.iter().find_map(|e| match e {
            RendererEvent::Seeked(p) => Some(*p),
            _ => None,
        });
        assert_eq!(first_seek, Some(0.4));
        assert!((renderer.position() - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rapid_option_changes_settle_on_last() {
        let factory = RasterEngineFactory::new()
            .with_surface_rebuild(false)
            .with_draw_delay(Duration::from_millis(20));
        let renderer = ready_renderer(factory).await;

        // A reload is in flight while bar -> natural -> bar arrives
        let (load, to_natural, to_bar) = tokio::join!(
            renderer.load_audio(tone(2.0)),
            renderer.apply_render_options(params(RenderMode::Natural)),
            renderer.apply_render_options(params(RenderMode::Bar)),
        );
        assert_eq!(load.unwrap(), LoadOutcome::Loaded);
        assert_eq!(to_natural.unwrap(), ApplyOutcome::Superseded);
        assert_eq!(to_bar.unwrap(), ApplyOutcome::Unchanged);

        assert_eq!(renderer.live_params().await, Some(params(RenderMode::Bar)));
        assert_eq!(renderer.factory().created_count(), 1);
        assert_eq!(renderer.state(), RendererState::Ready);
    }

    #[tokio::test]
    async fn test_export_mid_playback_matches_start_state() {
        let playing = ready_renderer(RasterEngineFactory::new()).await;
        playing.reconcile_playback(PlaybackDirective::Play, None);
        playing.seek(0.4);
        playing.tick(Duration::from_millis(100));
        assert!(playing.position() > 0.4 - 1e-9);
        let mid_playback = playing.export_image().await.unwrap();
        assert_eq!(playing.position(), 0.0);

        let fresh = ready_renderer(RasterEngineFactory::new()).await;
        let baseline = fresh.export_image().await.unwrap();
        assert_eq!(mid_playback, baseline);
    }

    #[tokio::test]
    async fn test_export_requires_ready() {
        let renderer = WaveformRenderer::new(RasterEngineFactory::new(), timing());
        assert!(matches!(renderer.export_image().await, Err(RenderError::ExportFailure(_))));
    }

    #[tokio::test]
    async fn test_markers_redraw_and_clear() {
        let renderer = ready_renderer(RasterEngineFactory::new()).await;
        let baseline = renderer.export_image().await.unwrap();

        renderer.set_region_markers(&[NormalizedRegion::new(0.25, 0.75)]);
        assert_ne!(renderer.export_image().await.unwrap(), baseline);

        renderer.set_region_markers(&[]);
        assert_eq!(renderer.export_image().await.unwrap(), baseline);
    }

    #[tokio::test]
    async fn test_markers_set_during_rebuild_are_applied_after() {
        let factory = RasterEngineFactory::new().with_draw_delay(Duration::from_millis(20));
        let renderer = ready_renderer(factory).await;
        let baseline = renderer.export_image().await.unwrap();

        let marked = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            // Renderer is mid-load here; the call must return immediately
            renderer.set_region_markers(&[NormalizedRegion::new(0.1, 0.3)]);
        };
        let (load, ()) = tokio::join!(renderer.load_audio(tone(2.0)), marked);
        load.unwrap();

        assert_ne!(renderer.export_image().await.unwrap(), baseline);
    }

    #[tokio::test]
    async fn test_windowed_playback_finishes() {
        let renderer = ready_renderer(RasterEngineFactory::new()).await;
        renderer.pump_events();
        renderer.reconcile_playback(PlaybackDirective::Play, Some(NormalizedRegion::new(0.5, 0.75)));
        assert!((renderer.position() - 0.5).abs() < 1e-9);

        renderer.tick(Duration::from_millis(300));
        renderer.tick(Duration::from_millis(300));
        let events = renderer.pump_events();
        assert_eq!(events.last(), Some(&RendererEvent::Finished));
        assert!((renderer.position() - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_teardown_drops_residual_events() {
        let renderer = ready_renderer(RasterEngineFactory::new()).await;
        renderer.reconcile_playback(PlaybackDirective::Play, None);
        renderer.tick(Duration::from_millis(50));

        renderer.teardown().await;
        assert_eq!(renderer.state(), RendererState::Destroyed);
        assert!(renderer.pump_events().is_empty());
        assert!(renderer.engine_id().is_none());

        // Drag-path calls on a destroyed renderer are no-ops
        renderer.seek(0.5);
        renderer.set_region_markers(&[]);
        renderer.tick(Duration::from_millis(10));
        assert!(renderer.pump_events().is_empty());
    }

    #[tokio::test]
    async fn test_reconstruct_replaces_previous_instance() {
        let renderer = ready_renderer(RasterEngineFactory::new()).await;
        renderer.pump_events();
        renderer
            .construct(DrawSurface::new("test"), params(RenderMode::Bar))
            .await
            .unwrap();
        assert_eq!(renderer.factory().created_count(), 2);
        assert_eq!(renderer.state(), RendererState::Constructed);
        assert!(renderer.pump_events().is_empty());
    }
}
