//! SoundCharm Core - Audio model, decoding and geometry for the waveform designer

pub mod audio_file;
pub mod catalog;
pub mod config;
pub mod geometry;
pub mod transcode;
pub mod types;

pub use types::*;
