//! Domain-level state of one designer session
//!
//! Holds the decoded audio and the editing choices made on it. Engine and
//! surface state live in the renderer.

use soundcharm_core::{AudioTrack, DesignerPhase, NormalizedRegion, PlaybackDirective, WaveformRenderOptions};

/// State of the current designer session
#[derive(Debug, Clone)]
pub struct SessionState {
    // ═══════════════════════════════════════════════════════════════════════
    // Flow
    // ═══════════════════════════════════════════════════════════════════════

    pub phase: DesignerPhase,

    /// Set once the session is closed; every later operation is rejected
    pub closed: bool,

    // ═══════════════════════════════════════════════════════════════════════
    // Audio
    // ═══════════════════════════════════════════════════════════════════════

    /// Audio exactly as uploaded and decoded. Never modified.
    pub origin: Option<AudioTrack>,

    /// Audio currently shown outside the trimmer: `origin` cut to
    /// `active_region`
    pub active: Option<AudioTrack>,

    /// Span of `active` within `origin`
    pub active_region: NormalizedRegion,

    /// Region being edited in the trimmer, relative to `origin`
    pub selected_region: NormalizedRegion,

    // ═══════════════════════════════════════════════════════════════════════
    // Presentation
    // ═══════════════════════════════════════════════════════════════════════

    /// Catalog name of the chosen jewelry piece
    pub piece: Option<String>,

    pub options: WaveformRenderOptions,

    /// Layout width of the waveform container in CSS pixels
    pub container_width: f32,

    pub playback: PlaybackDirective,
}

impl SessionState {
    pub fn new(options: WaveformRenderOptions, container_width: f32) -> Self {
        Self {
            phase: DesignerPhase::Uploader,
            closed: false,
            origin: None,
            active: None,
            active_region: NormalizedRegion::FULL,
            selected_region: NormalizedRegion::FULL,
            piece: None,
            options,
            container_width,
            playback: PlaybackDirective::Stop,
        }
    }

    /// Install a freshly decoded upload as both origin and active track
    pub fn install_upload(&mut self, track: AudioTrack) {
        self.active = Some(track.clone());
        self.origin = Some(track);
        self.active_region = NormalizedRegion::FULL;
        self.selected_region = NormalizedRegion::FULL;
        self.playback = PlaybackDirective::Stop;
    }

    /// Drop all audio and editing state, keeping presentation choices
    pub fn clear_audio(&mut self) {
        self.origin = None;
        self.active = None;
        self.active_region = NormalizedRegion::FULL;
        self.selected_region = NormalizedRegion::FULL;
        self.playback = PlaybackDirective::Stop;
    }

    /// Track the renderer should show in the current phase
    pub fn displayed_track(&self) -> Option<&AudioTrack> {
        match self.phase {
            DesignerPhase::Trimmer => self.origin.as_ref(),
            _ => self.active.as_ref(),
        }
    }

    /// Region markers visible in the current phase
    pub fn markers(&self) -> Vec<NormalizedRegion> {
        if self.phase.shows_region_markers() {
            vec![self.selected_region]
        } else {
            Vec::new()
        }
    }

    /// Playback window for the current phase
    pub fn play_window(&self) -> Option<NormalizedRegion> {
        match self.phase {
            DesignerPhase::Trimmer => Some(self.selected_region),
            _ => None,
        }
    }
}
