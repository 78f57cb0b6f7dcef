//! Domain layer for the SoundCharm designer
//!
//! [`DesignerOrchestrator`] owns the services and the session state and is
//! the only thing the UI (or the command-line driver) talks to:
//!
//! - Drives the phase machine `uploader -> main <-> trimmer`, `main -> exporter`
//! - Decodes uploads, transcoding foreign formats first
//! - Keeps the renderer showing the right track, markers and options
//! - Turns pointer input into seeks and region edits
//! - Produces the export bundle (waveform PNG + trimmed audio)
//!
//! Observable changes go out twice: as [`DesignerAction`]s through the
//! injected store and as [`DesignerEvent`]s on the returned channel. A failed
//! operation rolls the session back to the phase it started from and emits
//! [`DesignerEvent::Failed`].

mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use soundcharm_core::audio_file::{
    encode_wav, extension_for_mime, mime_essence, AudioBlob, AudioBufferError, AudioBufferService,
};
use soundcharm_core::catalog::{CatalogError, JewelryCatalog};
use soundcharm_core::geometry::{resolve_geometry, GeometryError, RenderGeometry};
use soundcharm_core::transcode::{TranscodeArgs, TranscodeError, TranscodeOutput, TranscodeRequest, Transcoder};
use soundcharm_core::{AudioTrack, DesignerPhase, NormalizedRegion, PlaybackDirective, WaveformRenderOptions};
use soundcharm_widgets::{
    DrawSurface, EngineFactory, EngineParams, PointerCommand, PointerInput, PointerRegionController, RenderError,
    RendererEvent, RendererState, SurfaceBounds, WaveformRenderer,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::DesignerConfig;
use crate::export::ExportBundle;
use crate::store::{ActionDispatch, DesignerAction};

pub use state::SessionState;

/// Extension of the exported audio deliverable
pub const EXPORT_AUDIO_EXTENSION: &str = "mp3";

/// Designer errors
#[derive(Error, Debug)]
pub enum DesignerError {
    #[error(transparent)]
    Audio(#[from] AudioBufferError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("Export failed: {0}")]
    ExportFailure(String),

    #[error("{operation} is not allowed in the {phase:?} phase")]
    InvalidTransition {
        operation: &'static str,
        phase: DesignerPhase,
    },

    #[error("Unknown jewelry piece: {0}")]
    UnknownPiece(String),

    #[error("No track loaded")]
    NoTrack,

    /// A newer operation of the same kind replaced this one. Not a failure.
    #[error("Superseded by a newer operation")]
    StaleOperationIgnored,

    #[error("Designer session is closed")]
    SessionClosed,
}

impl DesignerError {
    pub fn is_stale(&self) -> bool {
        matches!(self, DesignerError::StaleOperationIgnored)
    }
}

/// Notifications for the UI
#[derive(Debug, Clone, PartialEq)]
pub enum DesignerEvent {
    PhaseChanged {
        from: DesignerPhase,
        to: DesignerPhase,
    },
    /// A new active track is on display. `region` is its span within the
    /// uploaded audio.
    TrackLoaded {
        duration_seconds: f64,
        region: NormalizedRegion,
    },
    /// The trimmer selection moved
    RegionChanged(NormalizedRegion),
    PlaybackFinished,
    Exported {
        image_bytes: usize,
        audio_bytes: usize,
    },
    Failed {
        operation: &'static str,
        message: String,
    },
}

/// What a failed operation restores
struct Checkpoint {
    phase: DesignerPhase,
    active: Option<AudioTrack>,
    active_region: NormalizedRegion,
    selected_region: NormalizedRegion,
}

/// Coordinates one designer session
pub struct DesignerOrchestrator<F: EngineFactory> {
    // ═══════════════════════════════════════════════════════════════════════
    // Services
    // ═══════════════════════════════════════════════════════════════════════

    audio: AudioBufferService,

    catalog: JewelryCatalog,

    transcoder: Arc<dyn Transcoder>,

    renderer: WaveformRenderer<F>,

    /// Surface the renderer draws on
    surface: DrawSurface,

    // ═══════════════════════════════════════════════════════════════════════
    // Session
    // ═══════════════════════════════════════════════════════════════════════

    state: Mutex<SessionState>,

    pointer: Mutex<PointerRegionController>,

    /// Bumped per upload; results of older uploads are discarded
    upload_generation: AtomicU64,

    // ═══════════════════════════════════════════════════════════════════════
    // Outputs
    // ═══════════════════════════════════════════════════════════════════════

    store: Arc<dyn ActionDispatch>,

    events: mpsc::UnboundedSender<DesignerEvent>,

    // ═══════════════════════════════════════════════════════════════════════
    // Configuration
    // ═══════════════════════════════════════════════════════════════════════

    config: DesignerConfig,
}

impl<F: EngineFactory> DesignerOrchestrator<F> {
    // ═══════════════════════════════════════════════════════════════════════
    // Construction
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a designer session in the uploader phase
    ///
    /// Returns the orchestrator and the receiving end of its event channel.
    pub fn new(
        config: DesignerConfig,
        factory: F,
        catalog: JewelryCatalog,
        transcoder: Arc<dyn Transcoder>,
        store: Arc<dyn ActionDispatch>,
    ) -> (Self, mpsc::UnboundedReceiver<DesignerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let renderer = WaveformRenderer::new(factory, config.engine.timing());
        let state = SessionState::new(config.render.options, config.render.container_width);
        let pointer = PointerRegionController::new(config.trimmer.end_preview_seconds);

        log::info!(
            "designer: {} pieces in catalog, expecting {} uploads",
            catalog.len(),
            config.decode.expected_mime_type
        );

        let orchestrator = Self {
            audio: AudioBufferService::new(),
            catalog,
            transcoder,
            renderer,
            surface: DrawSurface::new("soundcharm-waveform"),
            state: Mutex::new(state),
            pointer: Mutex::new(pointer),
            upload_generation: AtomicU64::new(0),
            store,
            events,
            config,
        };
        (orchestrator, events_rx)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    pub fn phase(&self) -> DesignerPhase {
        self.state().phase
    }

    pub fn config(&self) -> &DesignerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &JewelryCatalog {
        &self.catalog
    }

    pub fn renderer(&self) -> &WaveformRenderer<F> {
        &self.renderer
    }

    /// Copy of the session state
    pub fn session(&self) -> SessionState {
        self.state().clone()
    }

    /// Geometry the waveform is currently laid out with
    pub fn geometry(&self) -> Result<RenderGeometry, DesignerError> {
        Ok(self.engine_params()?.geometry)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Upload
    // ═══════════════════════════════════════════════════════════════════════

    /// Decode an uploaded blob and move to the main phase
    ///
    /// Blobs not of the configured MIME type are transcoded first. When a
    /// newer upload starts before this one finishes, this one returns
    /// [`DesignerError::StaleOperationIgnored`] and changes nothing.
    pub async fn upload(&self, blob: AudioBlob) -> Result<(), DesignerError> {
        self.check_phase("upload", &[DesignerPhase::Uploader])?;
        let generation = self.upload_generation.fetch_add(1, Ordering::AcqRel) + 1;
        log::info!(
            "upload: generation {}, {} bytes of {}",
            generation,
            blob.len(),
            blob.mime_type
        );

        let decoded = self.decode_upload(blob).await;
        if !self.is_current_upload(generation) {
            return Err(DesignerError::StaleOperationIgnored);
        }
        let track = match decoded {
            Ok(track) => track,
            Err(e) => {
                self.report("upload", &e);
                return Err(e);
            }
        };
        self.check_phase("upload", &[DesignerPhase::Uploader])?;

        self.state().install_upload(track.clone());
        if let Err(e) = self.show_current().await {
            self.state().clear_audio();
            self.report("upload", &e);
            return Err(e);
        }
        if !self.is_current_upload(generation) {
            self.discard_upload(&track).await;
            return Err(DesignerError::StaleOperationIgnored);
        }

        self.enter_phase(DesignerPhase::Main);
        self.announce_track(&track, NormalizedRegion::FULL);
        Ok(())
    }

    fn is_current_upload(&self, generation: u64) -> bool {
        let current = self.upload_generation.load(Ordering::Acquire);
        if current != generation {
            log::debug!("upload: generation {} superseded by {}", generation, current);
            return false;
        }
        true
    }

    /// Undo the install of a superseded upload unless a newer track already
    /// replaced it
    async fn discard_upload(&self, track: &AudioTrack) {
        let installed = {
            let mut state = self.state();
            let installed = state.origin.as_ref().is_some_and(|origin| origin.shares_data_with(track));
            if installed {
                state.clear_audio();
            }
            installed
        };
        if installed {
            log::debug!("upload: dropping superseded track of {:.2}s", track.duration_seconds());
            self.renderer.teardown().await;
        }
    }

    async fn decode_upload(&self, blob: AudioBlob) -> Result<AudioTrack, DesignerError> {
        let expected = self.config.decode.expected_mime_type.as_str();
        let blob = if blob.essence() == mime_essence(expected) {
            blob
        } else {
            self.normalize_upload(blob).await?
        };
        Ok(self.audio.decode(blob, expected).await?)
    }

    async fn normalize_upload(&self, blob: AudioBlob) -> Result<AudioBlob, DesignerError> {
        let expected = mime_essence(&self.config.decode.expected_mime_type);
        let found = blob.essence();
        log::info!("upload: transcoding {} to {}", found, expected);

        let request = TranscodeRequest {
            input_extension: extension_for_mime(&found).unwrap_or("bin").to_string(),
            output_extension: extension_for_mime(&expected).unwrap_or(EXPORT_AUDIO_EXTENSION).to_string(),
            input: blob.bytes,
            args: TranscodeArgs::normalize_upload(),
        };
        let bytes = self.run_transcoder(request).await?.into_bytes()?;
        Ok(AudioBlob::new(bytes, expected))
    }

    async fn run_transcoder(&self, request: TranscodeRequest) -> Result<TranscodeOutput, TranscodeError> {
        let transcoder = Arc::clone(&self.transcoder);
        tokio::task::spawn_blocking(move || transcoder.transcode(&request))
            .await
            .map_err(|e| TranscodeError::Worker(e.to_string()))?
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Trimming
    // ═══════════════════════════════════════════════════════════════════════

    /// Show the whole upload with the active region selected for editing
    pub async fn enter_trimmer(&self) -> Result<(), DesignerError> {
        self.check_phase("enter_trimmer", &[DesignerPhase::Main])?;
        let checkpoint = self.checkpoint();

        let selected = {
            let mut state = self.state();
            state.selected_region = state.active_region;
            state.selected_region
        };
        self.pointer_ctl().set_region(selected);
        self.enter_phase(DesignerPhase::Trimmer);

        if let Err(e) = self.show_current().await {
            self.roll_back("enter_trimmer", checkpoint, &e).await;
            return Err(e);
        }
        self.store.dispatch(DesignerAction::SelectedRegionChanged(selected));
        Ok(())
    }

    /// Replace the trimmer selection
    pub fn set_selected_region(&self, region: NormalizedRegion) -> Result<(), DesignerError> {
        self.check_phase("set_selected_region", &[DesignerPhase::Trimmer])?;
        self.pointer_ctl().set_region(region);
        self.select_region(region);
        Ok(())
    }

    /// Cut the upload to the trimmer selection and return to main
    pub async fn confirm_trim(&self) -> Result<(), DesignerError> {
        self.check_phase("confirm_trim", &[DesignerPhase::Trimmer])?;
        let region = self.state().selected_region;
        self.apply_trim("confirm_trim", region).await
    }

    /// Trim the active track by a region relative to it
    ///
    /// The result is still cut from the original upload, so repeated trims
    /// never lose samples to rounding.
    pub async fn trim_active(&self, relative: NormalizedRegion) -> Result<(), DesignerError> {
        self.check_phase("trim_active", &[DesignerPhase::Main])?;
        let region = self.state().active_region.compose(relative);
        self.apply_trim("trim_active", region).await
    }

    /// Leave the trimmer without changing the active track
    pub async fn cancel_trim(&self) -> Result<(), DesignerError> {
        self.check_phase("cancel_trim", &[DesignerPhase::Trimmer])?;
        let checkpoint = self.checkpoint();
        {
            let mut state = self.state();
            state.selected_region = state.active_region;
        }
        self.enter_phase(DesignerPhase::Main);

        if let Err(e) = self.show_current().await {
            self.roll_back("cancel_trim", checkpoint, &e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Make the full upload the active track again
    pub async fn revert_trim(&self) -> Result<(), DesignerError> {
        self.check_phase("revert_trim", &[DesignerPhase::Main])?;
        let checkpoint = self.checkpoint();
        let origin = {
            let mut state = self.state();
            let origin = state.origin.clone().ok_or(DesignerError::NoTrack)?;
            state.active = Some(origin.clone());
            state.active_region = NormalizedRegion::FULL;
            state.selected_region = NormalizedRegion::FULL;
            origin
        };

        if let Err(e) = self.show_current().await {
            self.roll_back("revert_trim", checkpoint, &e).await;
            return Err(e);
        }
        self.announce_track(&origin, NormalizedRegion::FULL);
        Ok(())
    }

    async fn apply_trim(&self, operation: &'static str, region: NormalizedRegion) -> Result<(), DesignerError> {
        let checkpoint = self.checkpoint();
        let origin = self.state().origin.clone().ok_or(DesignerError::NoTrack)?;

        // A selection that rounds to no frames is rejected before the engine sees it
        let extracted = self
            .audio
            .extract_region(&origin, region.start(), region.end())
            .and_then(|track| {
                if track.is_empty() {
                    Err(AudioBufferError::InvalidRange {
                        start: region.start(),
                        end: region.end(),
                    })
                } else {
                    Ok(track)
                }
            });
        let trimmed = match extracted {
            Ok(track) => track,
            Err(e) => {
                let e = DesignerError::from(e);
                self.report(operation, &e);
                return Err(e);
            }
        };
        log::info!(
            "{}: [{:.4}, {:.4}] of {:.2}s -> {:.2}s",
            operation,
            region.start(),
            region.end(),
            origin.duration_seconds(),
            trimmed.duration_seconds()
        );

        {
            let mut state = self.state();
            state.active = Some(trimmed.clone());
            state.active_region = region;
            state.selected_region = region;
        }
        self.enter_phase(DesignerPhase::Main);

        if let Err(e) = self.show_current().await {
            self.roll_back(operation, checkpoint, &e).await;
            return Err(e);
        }
        self.announce_track(&trimmed, region);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Presentation
    // ═══════════════════════════════════════════════════════════════════════

    /// Place the waveform on a jewelry piece, or back on the plain surface
    pub async fn select_piece(&self, name: Option<&str>) -> Result<(), DesignerError> {
        self.check_phase("select_piece", &[DesignerPhase::Main])?;
        if let Some(name) = name {
            if self.catalog.get(name).is_none() {
                let e = DesignerError::UnknownPiece(name.to_string());
                self.report("select_piece", &e);
                return Err(e);
            }
        }
        let piece = name.map(str::to_string);
        self.update_presentation("select_piece", |state| state.piece = piece.clone())
            .await?;
        self.store.dispatch(DesignerAction::PieceSelected(piece));
        Ok(())
    }

    /// Change waveform options; the live engine follows
    pub async fn set_render_options(&self, mut options: WaveformRenderOptions) -> Result<(), DesignerError> {
        self.check_open()?;
        options.validate();
        self.update_presentation("set_render_options", |state| state.options = options)
            .await?;
        self.store.dispatch(DesignerAction::RenderOptionsChanged(options));
        Ok(())
    }

    /// The waveform container was resized
    pub async fn set_container_width(&self, width: f32) -> Result<(), DesignerError> {
        self.check_open()?;
        self.update_presentation("set_container_width", |state| state.container_width = width)
            .await
    }

    async fn update_presentation(
        &self,
        operation: &'static str,
        mutate: impl FnOnce(&mut SessionState),
    ) -> Result<(), DesignerError> {
        let previous = {
            let mut state = self.state();
            let previous = (state.piece.clone(), state.options, state.container_width);
            mutate(&mut state);
            previous
        };

        let result: Result<(), DesignerError> = async {
            let params = self.engine_params()?;
            if self.renderer_live() {
                let outcome = self.renderer.apply_render_options(params).await?;
                log::debug!("{}: {:?}", operation, outcome);
            }
            Ok(())
        }
        .await;

        if let Err(e) = &result {
            {
                let mut state = self.state();
                state.piece = previous.0;
                state.options = previous.1;
                state.container_width = previous.2;
            }
            self.report(operation, e);
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Playback & Pointer
    // ═══════════════════════════════════════════════════════════════════════

    /// Play, pause or stop. In the trimmer playback is limited to the
    /// selection.
    pub fn set_playback(&self, directive: PlaybackDirective) -> Result<(), DesignerError> {
        self.check_phase("set_playback", &[DesignerPhase::Main, DesignerPhase::Trimmer])?;
        let window = match directive {
            PlaybackDirective::Play => self.state().play_window(),
            _ => None,
        };
        self.apply_playback(directive, window);
        Ok(())
    }

    /// Feed raw pointer input; returns the commands it produced
    pub fn pointer(&self, input: PointerInput, bounds: SurfaceBounds) -> Result<Vec<PointerCommand>, DesignerError> {
        self.check_phase("pointer", &[DesignerPhase::Main, DesignerPhase::Trimmer])?;
        let commands = self.pointer_ctl().handle(input, bounds);
        for command in &commands {
            self.apply_command(*command);
        }
        Ok(commands)
    }

    fn apply_command(&self, command: PointerCommand) {
        match command {
            PointerCommand::Seek(progress) => self.renderer.seek(progress),
            PointerCommand::Play => self.apply_playback(PlaybackDirective::Play, None),
            PointerCommand::Stop => self.apply_playback(PlaybackDirective::Stop, None),
            PointerCommand::SetRegion(region) => self.select_region(region),
            PointerCommand::PlayRange(window) => self.apply_playback(PlaybackDirective::Play, Some(window)),
        }
    }

    fn apply_playback(&self, directive: PlaybackDirective, window: Option<NormalizedRegion>) {
        self.state().playback = directive;
        self.renderer.reconcile_playback(directive, window);
        self.store.dispatch(DesignerAction::PlaybackChanged(directive));
    }

    fn select_region(&self, region: NormalizedRegion) {
        self.state().selected_region = region;
        self.renderer.set_region_markers(&[region]);
        self.store.dispatch(DesignerAction::SelectedRegionChanged(region));
        self.emit(DesignerEvent::RegionChanged(region));
    }

    /// Advance the render engine's transport
    pub fn tick(&self, elapsed: Duration) {
        self.renderer.tick(elapsed);
    }

    /// Drain renderer events and react to them
    pub fn pump(&self) -> Vec<RendererEvent> {
        let events = self.renderer.pump_events();
        for event in &events {
            if *event == RendererEvent::Finished {
                self.state().playback = PlaybackDirective::Pause;
                self.store.dispatch(DesignerAction::PlaybackChanged(PlaybackDirective::Pause));
                self.emit(DesignerEvent::PlaybackFinished);
            }
        }
        events
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Export
    // ═══════════════════════════════════════════════════════════════════════

    /// Produce the waveform image and the trimmed, encoded audio
    ///
    /// On success the session stays in the exporter phase until
    /// [`finish_export`](Self::finish_export). On failure it returns to main
    /// with everything intact.
    pub async fn export(&self) -> Result<ExportBundle, DesignerError> {
        self.check_phase("export", &[DesignerPhase::Main])?;
        self.enter_phase(DesignerPhase::Exporter);

        match self.build_export().await {
            Ok(bundle) => {
                self.emit(DesignerEvent::Exported {
                    image_bytes: bundle.image_png.len(),
                    audio_bytes: bundle.audio.len(),
                });
                Ok(bundle)
            }
            Err(e) => {
                let e = DesignerError::ExportFailure(e.to_string());
                self.report("export", &e);
                self.enter_phase(DesignerPhase::Main);
                Err(e)
            }
        }
    }

    async fn build_export(&self) -> Result<ExportBundle, DesignerError> {
        let image_png = self.renderer.export_image().await?;

        let (origin, region) = {
            let state = self.state();
            (state.origin.clone().ok_or(DesignerError::NoTrack)?, state.active_region)
        };
        let trimmed = self.audio.extract_region(&origin, region.start(), region.end())?;
        let wav = tokio::task::spawn_blocking(move || encode_wav(&trimmed))
            .await
            .map_err(|e| AudioBufferError::EncodeFailure(e.to_string()))??;

        let request = TranscodeRequest {
            input: wav,
            input_extension: "wav".to_string(),
            output_extension: EXPORT_AUDIO_EXTENSION.to_string(),
            args: TranscodeArgs::deliverable(self.config.export.channels, self.config.export.bitrate_kbps),
        };
        let audio = self.run_transcoder(request).await?.into_bytes()?;

        Ok(ExportBundle {
            image_png,
            audio,
            audio_extension: EXPORT_AUDIO_EXTENSION.to_string(),
        })
    }

    /// Leave the exporter
    pub fn finish_export(&self) -> Result<(), DesignerError> {
        self.check_phase("finish_export", &[DesignerPhase::Exporter])?;
        self.enter_phase(DesignerPhase::Main);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session
    // ═══════════════════════════════════════════════════════════════════════

    /// Drop all audio and go back to the uploader
    pub async fn start_over(&self) -> Result<(), DesignerError> {
        self.check_phase(
            "start_over",
            &[DesignerPhase::Main, DesignerPhase::Trimmer, DesignerPhase::Exporter],
        )?;
        self.upload_generation.fetch_add(1, Ordering::AcqRel);
        self.renderer.teardown().await;
        self.state().clear_audio();
        self.enter_phase(DesignerPhase::Uploader);
        self.store.dispatch(DesignerAction::TrackCleared);
        Ok(())
    }

    /// Destroy the render engine and reject further operations
    pub async fn close(&self) {
        if self.state().closed {
            return;
        }
        self.upload_generation.fetch_add(1, Ordering::AcqRel);
        self.renderer.teardown().await;
        {
            let mut state = self.state();
            state.closed = true;
            state.clear_audio();
        }
        self.pointer_ctl().arm(DesignerPhase::Uploader);
        log::info!("designer: session closed");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pointer_ctl(&self) -> MutexGuard<'_, PointerRegionController> {
        self.pointer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_open(&self) -> Result<(), DesignerError> {
        if self.state().closed {
            return Err(DesignerError::SessionClosed);
        }
        Ok(())
    }

    fn check_phase(&self, operation: &'static str, allowed: &[DesignerPhase]) -> Result<(), DesignerError> {
        let state = self.state();
        if state.closed {
            return Err(DesignerError::SessionClosed);
        }
        if !allowed.contains(&state.phase) {
            log::warn!("{}: not allowed in {}", operation, state.phase.name());
            return Err(DesignerError::InvalidTransition {
                operation,
                phase: state.phase,
            });
        }
        Ok(())
    }

    fn enter_phase(&self, to: DesignerPhase) {
        let from = std::mem::replace(&mut self.state().phase, to);
        self.pointer_ctl().arm(to);
        if from == to {
            return;
        }
        log::info!("phase: {} -> {}", from.name(), to.name());
        self.store.dispatch(DesignerAction::PhaseChanged(to));
        self.emit(DesignerEvent::PhaseChanged { from, to });
    }

    fn announce_track(&self, track: &AudioTrack, region: NormalizedRegion) {
        let duration_seconds = track.duration_seconds();
        self.store.dispatch(DesignerAction::TrackLoaded {
            duration_seconds,
            region,
        });
        self.emit(DesignerEvent::TrackLoaded {
            duration_seconds,
            region,
        });
    }

    fn emit(&self, event: DesignerEvent) {
        if self.events.send(event).is_err() {
            log::trace!("designer: event receiver dropped");
        }
    }

    fn report(&self, operation: &'static str, error: &DesignerError) {
        if error.is_stale() {
            log::debug!("{}: {}", operation, error);
            return;
        }
        log::error!("{}: {}", operation, error);
        let message = error.to_string();
        self.store.dispatch(DesignerAction::ErrorRaised(message.clone()));
        self.emit(DesignerEvent::Failed { operation, message });
    }

    fn checkpoint(&self) -> Checkpoint {
        let state = self.state();
        Checkpoint {
            phase: state.phase,
            active: state.active.clone(),
            active_region: state.active_region,
            selected_region: state.selected_region,
        }
    }

    async fn roll_back(&self, operation: &'static str, checkpoint: Checkpoint, error: &DesignerError) {
        self.report(operation, error);
        {
            let mut state = self.state();
            state.active = checkpoint.active;
            state.active_region = checkpoint.active_region;
            state.selected_region = checkpoint.selected_region;
        }
        self.pointer_ctl().set_region(checkpoint.selected_region);
        self.enter_phase(checkpoint.phase);
        if let Err(e) = self.show_current().await {
            log::warn!("{}: could not restore display: {}", operation, e);
        }
    }

    fn renderer_live(&self) -> bool {
        matches!(
            self.renderer.state(),
            RendererState::Constructed | RendererState::Ready
        )
    }

    fn engine_params(&self) -> Result<EngineParams, DesignerError> {
        let (options, width, piece) = {
            let state = self.state();
            (state.options, state.container_width, state.piece.clone())
        };
        let piece = piece.as_deref().and_then(|name| self.catalog.get(name));
        let geometry = resolve_geometry(width, &options, piece, self.config.render.target_pixel_width)?;
        let theme = self.config.render.themes.for_mode(options.mode);
        Ok(EngineParams::new(geometry, options, theme))
    }

    /// Make the renderer show the track, markers and options of the current
    /// phase, stopped at the start
    async fn show_current(&self) -> Result<(), DesignerError> {
        let (track, markers, selected) = {
            let state = self.state();
            let track = state.displayed_track().cloned().ok_or(DesignerError::NoTrack)?;
            (track, state.markers(), state.selected_region)
        };

        let params = self.engine_params()?;
        if self.renderer_live() {
            self.renderer.apply_render_options(params).await?;
        } else {
            self.renderer.construct(self.surface.clone(), params).await?;
        }

        {
            let mut pointer = self.pointer_ctl();
            pointer.set_duration(track.duration_seconds());
            pointer.set_region(selected);
        }
        self.renderer.load_audio(track).await?;
        self.renderer.set_region_markers(&markers);
        self.apply_playback(PlaybackDirective::Stop, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WatchStore;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use soundcharm_core::RenderMode;
    use soundcharm_core::SAMPLE_RATE;
    use soundcharm_widgets::RasterEngineFactory;
    use std::io::Cursor;

    const WAV: &str = "audio/wav";

    /// Scripted transcoder: hands back WAV bytes for upload normalisation and
    /// a fake MP3 for exports
    struct ScriptedTranscoder {
        exit_status: i32,
        upload_wav: Vec<u8>,
        requests: Mutex<Vec<TranscodeRequest>>,
    }

    impl ScriptedTranscoder {
        fn new(exit_status: i32) -> Arc<Self> {
            Arc::new(Self {
                exit_status,
                upload_wav: wav_bytes(1.0),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<TranscodeRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Transcoder for ScriptedTranscoder {
        fn transcode(&self, request: &TranscodeRequest) -> Result<TranscodeOutput, TranscodeError> {
            self.requests.lock().unwrap().push(request.clone());
            let bytes = match request.output_extension.as_str() {
                "wav" => self.upload_wav.clone(),
                _ => b"ID3\x04fake-mp3".to_vec(),
            };
            Ok(TranscodeOutput {
                exit_status: self.exit_status,
                bytes,
            })
        }
    }

    fn wav_bytes(seconds: f64) -> Vec<u8> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            let frames = (SAMPLE_RATE as f64 * seconds) as usize;
            for i in 0..frames {
                writer.write_sample(((i as f32 * 0.02).sin() * 16000.0) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn wav_blob(seconds: f64) -> AudioBlob {
        AudioBlob::new(wav_bytes(seconds), WAV)
    }

    fn test_config() -> DesignerConfig {
        let mut config = DesignerConfig::default();
        config.decode.expected_mime_type = WAV.to_string();
        config.render.container_width = 300.0;
        config.engine.ready_timeout_ms = 1000;
        config.engine.ready_poll_interval_ms = 2;
        config
    }

    struct Harness {
        designer: DesignerOrchestrator<RasterEngineFactory>,
        events: mpsc::UnboundedReceiver<DesignerEvent>,
        store: Arc<WatchStore>,
        transcoder: Arc<ScriptedTranscoder>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_transcoder(ScriptedTranscoder::new(0))
        }

        fn with_transcoder(transcoder: Arc<ScriptedTranscoder>) -> Self {
            Self::with_parts(transcoder, RasterEngineFactory::new())
        }

        fn with_parts(transcoder: Arc<ScriptedTranscoder>, factory: RasterEngineFactory) -> Self {
            let store = Arc::new(WatchStore::default());
            let (designer, events) = DesignerOrchestrator::new(
                test_config(),
                factory,
                JewelryCatalog::builtin().unwrap(),
                transcoder.clone(),
                store.clone(),
            );
            Self {
                designer,
                events,
                store,
                transcoder,
            }
        }

        async fn uploaded(seconds: f64) -> Self {
            let harness = Self::new();
            harness.designer.upload(wav_blob(seconds)).await.unwrap();
            harness
        }

        fn drain(&mut self) -> Vec<DesignerEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn active_duration(&self) -> f64 {
            self.designer.session().active.unwrap().duration_seconds()
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-3, "{} != {}", actual, expected);
    }

    #[tokio::test]
    async fn test_upload_enters_main() {
        let mut h = Harness::new();
        h.designer.upload(wav_blob(2.0)).await.unwrap();

        assert_eq!(h.designer.phase(), DesignerPhase::Main);
        assert_eq!(h.designer.renderer().state(), RendererState::Ready);
        assert_close(h.active_duration(), 2.0);

        let snapshot = h.store.snapshot();
        assert_eq!(snapshot.phase, DesignerPhase::Main);
        assert_close(snapshot.duration_seconds.unwrap(), 2.0);

        let events = h.drain();
        assert!(events.contains(&DesignerEvent::PhaseChanged {
            from: DesignerPhase::Uploader,
            to: DesignerPhase::Main
        }));
        assert!(events.iter().any(|e| matches!(e, DesignerEvent::TrackLoaded { .. })));
        assert!(h.transcoder.requests().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_upload_is_transcoded() {
        let mut h = Harness::new();
        h.designer
            .upload(AudioBlob::new(vec![0u8; 64], "audio/webm;codecs=opus"))
            .await
            .unwrap();

        let requests = h.transcoder.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].input_extension, "webm");
        assert_eq!(requests[0].output_extension, "wav");
        assert_eq!(requests[0].args, TranscodeArgs::normalize_upload());
        assert_close(h.active_duration(), 1.0);
        assert!(!h.drain().iter().any(|e| matches!(e, DesignerEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn test_failed_transcode_stays_in_uploader() {
        let mut h = Harness::with_transcoder(ScriptedTranscoder::new(1));
        let err = h
            .designer
            .upload(AudioBlob::new(vec![0u8; 64], "audio/webm"))
            .await
            .unwrap_err();

        assert!(matches!(err, DesignerError::Transcode(TranscodeError::NonZeroExit { .. })));
        assert_eq!(h.designer.phase(), DesignerPhase::Uploader);
        assert!(h
            .drain()
            .iter()
            .any(|e| matches!(e, DesignerEvent::Failed { operation: "upload", .. })));
        assert!(h.store.snapshot().last_error.is_some());
    }

    #[tokio::test]
    async fn test_undecodable_upload_stays_in_uploader() {
        let h = Harness::new();
        let err = h
            .designer
            .upload(AudioBlob::new(vec![0x13; 4096], WAV))
            .await
            .unwrap_err();

        assert!(matches!(err, DesignerError::Audio(AudioBufferError::DecodeFailure(_))));
        assert_eq!(h.designer.phase(), DesignerPhase::Uploader);
        assert!(h.designer.session().origin.is_none());
    }

    #[tokio::test]
    async fn test_superseded_upload_is_ignored() {
        let h = Harness::new();
        let (first, second) = tokio::join!(h.designer.upload(wav_blob(3.0)), h.designer.upload(wav_blob(1.0)));

        assert!(first.unwrap_err().is_stale());
        second.unwrap();
        assert_close(h.active_duration(), 1.0);
        assert_eq!(h.designer.phase(), DesignerPhase::Main);
    }

    #[tokio::test]
    async fn test_superseded_upload_does_not_linger() {
        // Slow draws keep the first upload inside the renderer long enough
        // for the second one to start
        let factory = RasterEngineFactory::new().with_draw_delay(Duration::from_millis(50));
        let h = Harness::with_parts(ScriptedTranscoder::new(0), factory);

        let newer = async {
            while h.designer.session().origin.is_none() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            h.designer.upload(AudioBlob::new(vec![0x13; 4096], WAV)).await
        };
        let (first, second) = tokio::join!(h.designer.upload(wav_blob(2.0)), newer);

        assert!(first.unwrap_err().is_stale());
        assert!(matches!(
            second.unwrap_err(),
            DesignerError::Audio(AudioBufferError::DecodeFailure(_))
        ));
        assert_eq!(h.designer.phase(), DesignerPhase::Uploader);
        let session = h.designer.session();
        assert!(session.origin.is_none());
        assert!(session.active.is_none());
        assert_eq!(h.designer.renderer().engine_id(), None);
        assert_ne!(h.designer.renderer().state(), RendererState::Ready);
    }

    #[tokio::test]
    async fn test_empty_selection_is_rejected_before_rendering() {
        let mut h = Harness::uploaded(4.0).await;
        h.designer.enter_trimmer().await.unwrap();
        let engine = h.designer.renderer().engine_id();
        let created = h.designer.renderer().factory().created_count();
        h.drain();

        h.designer.set_selected_region(NormalizedRegion::new(0.5, 0.5)).unwrap();
        let err = h.designer.confirm_trim().await.unwrap_err();

        assert!(matches!(err, DesignerError::Audio(AudioBufferError::InvalidRange { .. })));
        assert_eq!(h.designer.phase(), DesignerPhase::Trimmer);
        assert_eq!(h.designer.renderer().engine_id(), engine);
        assert_eq!(h.designer.renderer().factory().created_count(), created);
        assert_eq!(h.designer.renderer().state(), RendererState::Ready);
        assert_close(h.active_duration(), 4.0);

        let events = h.drain();
        assert!(!events.iter().any(|e| matches!(e, DesignerEvent::PhaseChanged { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, DesignerEvent::Failed { operation: "confirm_trim", .. })));

        // A zero-length relative trim from main is rejected the same way
        h.designer.cancel_trim().await.unwrap();
        let err = h
            .designer
            .trim_active(NormalizedRegion::new(0.3, 0.3))
            .await
            .unwrap_err();
        assert!(matches!(err, DesignerError::Audio(AudioBufferError::InvalidRange { .. })));
        assert_eq!(h.designer.phase(), DesignerPhase::Main);
        assert_close(h.active_duration(), 4.0);
    }

    #[tokio::test]
    async fn test_trims_compose_against_upload() {
        let h = Harness::uploaded(10.0).await;

        h.designer.enter_trimmer().await.unwrap();
        assert_eq!(h.designer.phase(), DesignerPhase::Trimmer);
        h.designer.set_selected_region(NormalizedRegion::new(0.3, 0.7)).unwrap();
        h.designer.confirm_trim().await.unwrap();
        assert_eq!(h.designer.phase(), DesignerPhase::Main);
        assert_close(h.active_duration(), 4.0);

        // Second trim relative to the 4s track: [0.1, 0.9] of it
        h.designer.trim_active(NormalizedRegion::new(0.1, 0.9)).await.unwrap();
        let session = h.designer.session();
        assert!((session.active_region.start() - 0.34).abs() < 1e-9);
        assert!((session.active_region.end() - 0.66).abs() < 1e-9);
        assert_close(h.active_duration(), 3.2);
        assert_eq!(h.store.snapshot().active_region, session.active_region);
    }

    #[tokio::test]
    async fn test_trimmer_starts_from_active_region() {
        let h = Harness::uploaded(4.0).await;
        h.designer.trim_active(NormalizedRegion::new(0.25, 0.75)).await.unwrap();

        h.designer.enter_trimmer().await.unwrap();
        let session = h.designer.session();
        assert_eq!(session.selected_region, NormalizedRegion::new(0.25, 0.75));
        // The trimmer shows the whole upload
        assert_close(session.displayed_track().unwrap().duration_seconds(), 4.0);
        assert_eq!(h.store.snapshot().selected_region, NormalizedRegion::new(0.25, 0.75));

        h.designer.set_selected_region(NormalizedRegion::new(0.0, 0.5)).unwrap();
        h.designer.cancel_trim().await.unwrap();
        let session = h.designer.session();
        assert_eq!(session.active_region, NormalizedRegion::new(0.25, 0.75));
        assert_close(h.active_duration(), 2.0);
    }

    #[tokio::test]
    async fn test_revert_restores_full_upload() {
        let h = Harness::uploaded(4.0).await;
        h.designer.trim_active(NormalizedRegion::new(0.5, 1.0)).await.unwrap();
        assert_close(h.active_duration(), 2.0);

        h.designer.revert_trim().await.unwrap();
        let session = h.designer.session();
        assert!(session.active_region.is_full());
        assert!(session.active.unwrap().shares_data_with(session.origin.as_ref().unwrap()));
        assert_eq!(h.designer.phase(), DesignerPhase::Main);
    }

    #[tokio::test]
    async fn test_invalid_transitions_rejected() {
        let h = Harness::new();
        assert!(matches!(
            h.designer.export().await,
            Err(DesignerError::InvalidTransition {
                operation: "export",
                phase: DesignerPhase::Uploader
            })
        ));
        assert!(h.designer.enter_trimmer().await.is_err());

        h.designer.upload(wav_blob(1.0)).await.unwrap();
        assert!(matches!(
            h.designer.confirm_trim().await,
            Err(DesignerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.designer.upload(wav_blob(1.0)).await,
            Err(DesignerError::InvalidTransition { .. })
        ));
        assert!(h.designer.finish_export().is_err());
        assert_eq!(h.designer.phase(), DesignerPhase::Main);
    }

    #[tokio::test]
    async fn test_trim_drag_updates_selection() {
        let mut h = Harness::uploaded(10.0).await;
        h.designer.enter_trimmer().await.unwrap();
        h.designer.set_selected_region(NormalizedRegion::new(0.1, 0.2)).unwrap();
        h.drain();

        let bounds = SurfaceBounds {
            left: 0.0,
            width: 1000.0,
        };
        h.designer
            .pointer(PointerInput::MouseDown { client_x: 200.0 }, bounds)
            .unwrap();
        h.designer
            .pointer(PointerInput::MouseMove { client_x: 400.0 }, bounds)
            .unwrap();
        let commands = h
            .designer
            .pointer(PointerInput::MouseUp { client_x: 600.0 }, bounds)
            .unwrap();

        let expected = NormalizedRegion::new(0.1, 0.6);
        assert!(matches!(commands.last(), Some(PointerCommand::PlayRange(_))));
        assert_eq!(h.designer.session().selected_region, expected);
        assert_eq!(h.store.snapshot().selected_region, expected);
        assert_eq!(h.store.snapshot().playback, PlaybackDirective::Play);
        assert!(h.drain().contains(&DesignerEvent::RegionChanged(expected)));
    }

    #[tokio::test]
    async fn test_seek_drag_in_main() {
        let h = Harness::uploaded(2.0).await;
        let bounds = SurfaceBounds {
            left: 100.0,
            width: 200.0,
        };
        h.designer
            .pointer(PointerInput::TouchStart { client_x: 150.0 }, bounds)
            .unwrap();
        assert!((h.designer.renderer().position() - 0.25).abs() < 1e-9);
        assert!(h.designer.session().selected_region.is_full());
    }

    #[tokio::test]
    async fn test_playback_finish_pauses() {
        let mut h = Harness::uploaded(1.0).await;
        h.designer.pump();
        h.designer.set_playback(PlaybackDirective::Play).unwrap();
        assert_eq!(h.store.snapshot().playback, PlaybackDirective::Play);

        h.designer.tick(Duration::from_millis(600));
        h.designer.tick(Duration::from_millis(600));
        let events = h.designer.pump();

        assert_eq!(events.last(), Some(&RendererEvent::Finished));
        assert_eq!(h.store.snapshot().playback, PlaybackDirective::Pause);
        assert!(h.drain().contains(&DesignerEvent::PlaybackFinished));
    }

    #[tokio::test]
    async fn test_piece_selection_resizes_surface() {
        let h = Harness::uploaded(1.0).await;

        let err = h.designer.select_piece(Some("Tiara of Nowhere")).await.unwrap_err();
        assert!(matches!(err, DesignerError::UnknownPiece(_)));
        assert!(h.designer.session().piece.is_none());

        h.designer.select_piece(Some("Heart Locket")).await.unwrap();
        let geometry = h.designer.geometry().unwrap();
        assert!(geometry.is_jewelry());
        let live = h.designer.renderer().live_params().await.unwrap();
        assert_eq!(live.geometry, geometry);
        assert_eq!(h.store.snapshot().piece.as_deref(), Some("Heart Locket"));

        h.designer.select_piece(None).await.unwrap();
        assert!(!h.designer.geometry().unwrap().is_jewelry());
    }

    #[tokio::test]
    async fn test_render_options_follow_through() {
        let h = Harness::uploaded(1.0).await;
        let options = WaveformRenderOptions {
            mode: RenderMode::Natural,
            ..Default::default()
        };
        h.designer.set_render_options(options).await.unwrap();

        let live = h.designer.renderer().live_params().await.unwrap();
        assert_eq!(live.options.mode, RenderMode::Natural);
        assert_eq!(h.store.snapshot().options.mode, RenderMode::Natural);
        assert_eq!(h.designer.renderer().state(), RendererState::Ready);
    }

    #[tokio::test]
    async fn test_bad_container_width_rolls_back() {
        let mut h = Harness::uploaded(1.0).await;
        let err = h.designer.set_container_width(0.0).await.unwrap_err();
        assert!(matches!(err, DesignerError::Geometry(_)));
        assert_eq!(h.designer.session().container_width, 300.0);
        assert!(h
            .drain()
            .iter()
            .any(|e| matches!(e, DesignerEvent::Failed { operation: "set_container_width", .. })));
    }

    #[tokio::test]
    async fn test_export_bundle() {
        let mut h = Harness::uploaded(2.0).await;
        h.designer.trim_active(NormalizedRegion::new(0.0, 0.5)).await.unwrap();

        let bundle = h.designer.export().await.unwrap();
        assert_eq!(h.designer.phase(), DesignerPhase::Exporter);
        assert_eq!(&bundle.image_png[..4], &[0x89, b'P', b'N', b'G']);
        assert_eq!(bundle.audio_extension, "mp3");
        assert!(bundle.audio.starts_with(b"ID3"));

        let requests = h.transcoder.requests();
        let request = requests.last().unwrap();
        assert_eq!(request.args, TranscodeArgs::deliverable(1, 128));
        assert_eq!(request.input_extension, "wav");
        // 1s of mono 16-bit audio plus the 44-byte header
        assert_eq!(request.input.len(), 44 + SAMPLE_RATE as usize * 2);

        assert!(h.drain().iter().any(|e| matches!(e, DesignerEvent::Exported { .. })));
        h.designer.finish_export().unwrap();
        assert_eq!(h.designer.phase(), DesignerPhase::Main);
    }

    #[tokio::test]
    async fn test_failed_export_keeps_session() {
        let mut h = Harness::with_transcoder(ScriptedTranscoder::new(1));
        // Uploads need no transcoding, so only the export hits the failing tool
        h.designer.upload(wav_blob(2.0)).await.unwrap();
        h.designer.trim_active(NormalizedRegion::new(0.25, 0.75)).await.unwrap();
        h.drain();

        let err = h.designer.export().await.unwrap_err();
        assert!(matches!(err, DesignerError::ExportFailure(_)));
        assert_eq!(h.designer.phase(), DesignerPhase::Main);
        assert_eq!(h.designer.session().active_region, NormalizedRegion::new(0.25, 0.75));
        assert_close(h.active_duration(), 1.0);

        let events = h.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, DesignerEvent::Failed { operation: "export", .. })));
        assert_eq!(
            events.last(),
            Some(&DesignerEvent::PhaseChanged {
                from: DesignerPhase::Exporter,
                to: DesignerPhase::Main
            })
        );

        // The export can be retried
        assert!(matches!(h.designer.export().await, Err(DesignerError::ExportFailure(_))));
        assert_eq!(h.designer.phase(), DesignerPhase::Main);
    }

    #[tokio::test]
    async fn test_start_over_and_close() {
        let h = Harness::uploaded(1.0).await;
        h.designer.start_over().await.unwrap();
        assert_eq!(h.designer.phase(), DesignerPhase::Uploader);
        assert_eq!(h.designer.renderer().state(), RendererState::Destroyed);
        assert!(h.designer.session().origin.is_none());
        assert_eq!(h.store.snapshot().duration_seconds, None);

        h.designer.upload(wav_blob(1.0)).await.unwrap();
        assert_eq!(h.designer.renderer().state(), RendererState::Ready);

        h.designer.close().await;
        assert_eq!(h.designer.renderer().state(), RendererState::Destroyed);
        assert!(matches!(
            h.designer.set_playback(PlaybackDirective::Play),
            Err(DesignerError::SessionClosed)
        ));
        assert!(matches!(
            h.designer.upload(wav_blob(1.0)).await,
            Err(DesignerError::SessionClosed)
        ));
    }
}
