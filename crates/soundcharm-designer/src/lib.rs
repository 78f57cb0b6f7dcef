//! SoundCharm designer library
//!
//! Exposes the designer domain so it can be driven by a UI shell or by the
//! `soundcharm` command-line exporter.

pub mod config;
pub mod domain;
pub mod export;
pub mod store;

pub use config::DesignerConfig;
pub use domain::{DesignerError, DesignerEvent, DesignerOrchestrator, SessionState};
pub use export::ExportBundle;
pub use store::{ActionDispatch, DesignerAction, DesignerSnapshot, WatchStore};
