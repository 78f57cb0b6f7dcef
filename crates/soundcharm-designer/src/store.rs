//! Application state store
//!
//! The designer never owns UI state directly. Every observable change is
//! dispatched as a [`DesignerAction`] through an injected [`ActionDispatch`]
//! capability. [`WatchStore`] is the in-process implementation: it folds
//! actions into a [`DesignerSnapshot`] and publishes each new snapshot on a
//! tokio watch channel.

use soundcharm_core::{DesignerPhase, NormalizedRegion, PlaybackDirective, WaveformRenderOptions};
use tokio::sync::watch;

/// Observable state changes
#[derive(Debug, Clone, PartialEq)]
pub enum DesignerAction {
    PhaseChanged(DesignerPhase),
    /// A track is shown. `region` is its span within the uploaded audio.
    TrackLoaded {
        duration_seconds: f64,
        region: NormalizedRegion,
    },
    TrackCleared,
    SelectedRegionChanged(NormalizedRegion),
    PieceSelected(Option<String>),
    RenderOptionsChanged(WaveformRenderOptions),
    PlaybackChanged(PlaybackDirective),
    ErrorRaised(String),
}

/// Capability for publishing state changes
pub trait ActionDispatch: Send + Sync {
    fn dispatch(&self, action: DesignerAction);
}

impl<F> ActionDispatch for F
where
    F: Fn(DesignerAction) + Send + Sync,
{
    fn dispatch(&self, action: DesignerAction) {
        self(action)
    }
}

/// Folded view of every action dispatched so far
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DesignerSnapshot {
    pub phase: DesignerPhase,
    /// Duration of the track on display, if any
    pub duration_seconds: Option<f64>,
    /// Span of the active track within the uploaded audio
    pub active_region: NormalizedRegion,
    /// Region being edited in the trimmer
    pub selected_region: NormalizedRegion,
    pub piece: Option<String>,
    pub options: WaveformRenderOptions,
    pub playback: PlaybackDirective,
    pub last_error: Option<String>,
}

impl DesignerSnapshot {
    pub fn reduce(&mut self, action: DesignerAction) {
        match action {
            DesignerAction::PhaseChanged(phase) => {
                self.phase = phase;
                self.last_error = None;
            }
            DesignerAction::TrackLoaded {
                duration_seconds,
                region,
            } => {
                self.duration_seconds = Some(duration_seconds);
                self.active_region = region;
                self.selected_region = region;
            }
            DesignerAction::TrackCleared => {
                self.duration_seconds = None;
                self.active_region = NormalizedRegion::FULL;
                self.selected_region = NormalizedRegion::FULL;
                self.playback = PlaybackDirective::Stop;
            }
            DesignerAction::SelectedRegionChanged(region) => self.selected_region = region,
            DesignerAction::PieceSelected(piece) => self.piece = piece,
            DesignerAction::RenderOptionsChanged(options) => self.options = options,
            DesignerAction::PlaybackChanged(playback) => self.playback = playback,
            DesignerAction::ErrorRaised(message) => self.last_error = Some(message),
        }
    }
}

/// Snapshot store backed by a watch channel
#[derive(Debug)]
pub struct WatchStore {
    tx: watch::Sender<DesignerSnapshot>,
}

impl Default for WatchStore {
    fn default() -> Self {
        Self::new(DesignerSnapshot::default())
    }
}

impl WatchStore {
    pub fn new(initial: DesignerSnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<DesignerSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> DesignerSnapshot {
        self.tx.borrow().clone()
    }
}

impl ActionDispatch for WatchStore {
    fn dispatch(&self, action: DesignerAction) {
        log::trace!("dispatch: {:?}", action);
        self.tx.send_modify(|snapshot| snapshot.reduce(action));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_reduce_track_lifecycle() {
        let store = WatchStore::default();
        let region = NormalizedRegion::new(0.2, 0.6);
        store.dispatch(DesignerAction::TrackLoaded {
            duration_seconds: 4.0,
            region,
        });
        store.dispatch(DesignerAction::PlaybackChanged(PlaybackDirective::Play));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.duration_seconds, Some(4.0));
        assert_eq!(snapshot.active_region, region);
        assert_eq!(snapshot.selected_region, region);

        store.dispatch(DesignerAction::TrackCleared);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.duration_seconds, None);
        assert!(snapshot.active_region.is_full());
        assert_eq!(snapshot.playback, PlaybackDirective::Stop);
    }

    #[test]
    fn test_phase_change_clears_error() {
        let store = WatchStore::default();
        store.dispatch(DesignerAction::ErrorRaised("boom".to_string()));
        assert_eq!(store.snapshot().last_error.as_deref(), Some("boom"));

        store.dispatch(DesignerAction::PhaseChanged(DesignerPhase::Main));
        assert_eq!(store.snapshot().last_error, None);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = WatchStore::default();
        let mut rx = store.subscribe();
        store.dispatch(DesignerAction::PhaseChanged(DesignerPhase::Trimmer));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, DesignerPhase::Trimmer);
    }

    #[test]
    fn test_closure_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let dispatch = move |action: DesignerAction| sink.lock().unwrap().push(action);

        dispatch.dispatch(DesignerAction::PieceSelected(Some("Heart Locket".to_string())));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
