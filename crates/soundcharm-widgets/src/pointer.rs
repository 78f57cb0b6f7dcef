//! Pointer/touch drag handling over the waveform surface
//!
//! Mouse and touch input are reduced to one start/move/end protocol over a
//! normalized x position. What a drag does depends on the armed mode:
//!
//! - **Seek** (main phase): press seeks, move seeks and plays, release seeks.
//! - **Trim** (trimmer phase): press picks the nearer region boundary and
//!   locks it for the drag; move stops playback and drags that boundary;
//!   release previews audio around the edited boundary. On a collapsed
//!   region the boundary is picked by the direction of the first move.
//!
//! The controller never touches the renderer. It returns [`PointerCommand`]s
//! which the owner applies through the renderer's non-blocking drag path.

use soundcharm_core::{DesignerPhase, NormalizedRegion};

/// Preview length after the end boundary is dragged, in seconds
pub const END_PREVIEW_SECONDS: f64 = 1.5;

/// Distances closer than this are treated as equal when picking a boundary
const TIE_EPSILON: f64 = 1e-9;

/// Raw input over the surface, in client coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerInput {
    MouseDown { client_x: f64 },
    MouseMove { client_x: f64 },
    MouseUp { client_x: f64 },
    TouchStart { client_x: f64 },
    TouchMove { client_x: f64 },
    TouchEnd { client_x: f64 },
}

/// Horizontal placement of the surface in client coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceBounds {
    pub left: f64,
    pub width: f64,
}

/// Work for the renderer resulting from a drag step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerCommand {
    /// Seek to a fraction of the duration
    Seek(f64),
    /// Start (or keep) unbounded playback
    Play,
    Stop,
    /// The selected region changed
    SetRegion(NormalizedRegion),
    /// Play only inside this window of the track
    PlayRange(NormalizedRegion),
}

/// Region boundary edited by a trim drag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointerMode {
    Seek,
    Trim,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    boundary: Option<Boundary>,
    edited: bool,
}

/// `clamp((client_x - left) / width, 0, 1)`. A zero-width surface maps to 0.
pub fn normalized_x(client_x: f64, bounds: SurfaceBounds) -> f64 {
    if !(bounds.width > 0.0) || !client_x.is_finite() {
        return 0.0;
    }
    ((client_x - bounds.left) / bounds.width).clamp(0.0, 1.0)
}

/// Pick the boundary of `region` to edit for a press at `x`
///
/// The end wins only when it is strictly closer; exact ties (within
/// floating point noise) go to the start. A collapsed region picks by side
/// so the drag can always open it up.
pub fn nearest_boundary(region: NormalizedRegion, x: f64) -> Boundary {
    if region.start() == region.end() {
        return if x > region.end() { Boundary::End } else { Boundary::Start };
    }
    let to_start = (x - region.start()).abs();
    let to_end = (x - region.end()).abs();
    if to_end < to_start - TIE_EPSILON {
        Boundary::End
    } else {
        Boundary::Start
    }
}

/// Converts drags into seek or region-edit commands
#[derive(Debug, Clone)]
pub struct PointerRegionController {
    mode: Option<PointerMode>,
    region: NormalizedRegion,
    duration: f64,
    end_preview_seconds: f64,
    drag: Option<Drag>,
}

impl Default for PointerRegionController {
    fn default() -> Self {
        Self::new(END_PREVIEW_SECONDS)
    }
}

impl PointerRegionController {
    pub fn new(end_preview_seconds: f64) -> Self {
        Self {
            mode: None,
            region: NormalizedRegion::FULL,
            duration: 0.0,
            end_preview_seconds: end_preview_seconds.max(0.0),
            drag: None,
        }
    }

    /// Arm the mode belonging to `phase`; other phases disarm input.
    /// Any drag in progress is abandoned.
    pub fn arm(&mut self, phase: DesignerPhase) {
        self.mode = match phase {
            DesignerPhase::Main => Some(PointerMode::Seek),
            DesignerPhase::Trimmer => Some(PointerMode::Trim),
            DesignerPhase::Uploader | DesignerPhase::Exporter => None,
        };
        self.drag = None;
        log::debug!("pointer: armed {:?} for {}", self.mode, phase.name());
    }

    pub fn is_armed(&self) -> bool {
        self.mode.is_some()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Replace the selected region (trim mode)
    pub fn set_region(&mut self, region: NormalizedRegion) {
        self.region = region;
    }

    pub fn region(&self) -> NormalizedRegion {
        self.region
    }

    /// Duration of the active track, used for the end preview window
    pub fn set_duration(&mut self, seconds: f64) {
        self.duration = seconds.max(0.0);
    }

    /// Boundary locked by the current trim drag
    pub fn active_boundary(&self) -> Option<Boundary> {
        self.drag.and_then(|d| d.boundary)
    }

    /// Dispatch raw mouse or touch input
    pub fn handle(&mut self, input: PointerInput, bounds: SurfaceBounds) -> Vec<PointerCommand> {
        match input {
            PointerInput::MouseDown { client_x } | PointerInput::TouchStart { client_x } => {
                self.on_drag_start(normalized_x(client_x, bounds))
            }
            PointerInput::MouseMove { client_x } | PointerInput::TouchMove { client_x } => {
                self.on_drag_move(normalized_x(client_x, bounds))
            }
            PointerInput::MouseUp { client_x } | PointerInput::TouchEnd { client_x } => {
                self.on_drag_end(normalized_x(client_x, bounds))
            }
        }
    }

    pub fn on_drag_start(&mut self, x: f64) -> Vec<PointerCommand> {
        match self.mode {
            None => Vec::new(),
            Some(PointerMode::Seek) => {
                self.drag = Some(Drag {
                    boundary: None,
                    edited: false,
                });
                vec![PointerCommand::Seek(x)]
            }
            Some(PointerMode::Trim) => {
                // Collapsed: both boundaries sit under the press, wait for a direction
                let boundary = if self.region.start() == self.region.end() {
                    None
                } else {
                    Some(nearest_boundary(self.region, x))
                };
                log::debug!(
                    "pointer: trim drag on {:?} of [{:.4}, {:.4}] at {:.4}",
                    boundary,
                    self.region.start(),
                    self.region.end(),
                    x
                );
                self.drag = Some(Drag { boundary, edited: false });
                Vec::new()
            }
        }
    }

    pub fn on_drag_move(&mut self, x: f64) -> Vec<PointerCommand> {
        let Some(drag) = self.drag else {
            return Vec::new();
        };
        match (self.mode, self.locked_boundary(drag, x)) {
            (Some(PointerMode::Seek), _) => vec![PointerCommand::Seek(x), PointerCommand::Play],
            (Some(PointerMode::Trim), Some(boundary)) => {
                self.move_boundary(boundary, x);
                self.drag = Some(Drag {
                    boundary: Some(boundary),
                    edited: true,
                });
                vec![PointerCommand::Stop, PointerCommand::SetRegion(self.region)]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_drag_end(&mut self, x: f64) -> Vec<PointerCommand> {
        // A release without a tracked press is ignored
        let Some(drag) = self.drag.take() else {
            return Vec::new();
        };
        let boundary = match self.mode {
            Some(PointerMode::Trim) => Some(self.locked_boundary(drag, x).unwrap_or(Boundary::Start)),
            _ => drag.boundary,
        };
        match (self.mode, boundary) {
            (Some(PointerMode::Seek), _) => vec![PointerCommand::Seek(x)],
            (Some(PointerMode::Trim), Some(boundary)) => {
                let before = self.region;
                self.move_boundary(boundary, x);

                let mut commands = Vec::with_capacity(3);
                if self.region != before || drag.edited {
                    commands.push(PointerCommand::Stop);
                    commands.push(PointerCommand::SetRegion(self.region));
                }
                commands.push(PointerCommand::PlayRange(self.preview_window(boundary)));
                commands
            }
            _ => Vec::new(),
        }
    }

    /// Playback window after editing `boundary`: the whole region from its
    /// start, or the last `end_preview_seconds` before its end
    pub fn preview_window(&self, boundary: Boundary) -> NormalizedRegion {
        match boundary {
            Boundary::Start => self.region,
            Boundary::End => {
                if self.duration <= 0.0 {
                    return self.region;
                }
                let lead = self.end_preview_seconds / self.duration;
                let start = (self.region.end() - lead).max(self.region.start());
                NormalizedRegion::new(start, self.region.end())
            }
        }
    }

    /// Boundary the drag edits, deciding it from the direction of `x` when
    /// the press landed on a collapsed region
    fn locked_boundary(&self, drag: Drag, x: f64) -> Option<Boundary> {
        if drag.boundary.is_some() || self.mode != Some(PointerMode::Trim) {
            return drag.boundary;
        }
        let point = self.region.start();
        if x > point {
            Some(Boundary::End)
        } else if x < point {
            Some(Boundary::Start)
        } else {
            None
        }
    }

    fn move_boundary(&mut self, boundary: Boundary, x: f64) {
        match boundary {
            Boundary::Start => self.region.set_start(x),
            Boundary::End => self.region.set_end(x),
        }
    }
}
