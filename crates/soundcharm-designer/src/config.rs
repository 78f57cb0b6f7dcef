//! Global configuration for the SoundCharm designer
//!
//! Configuration is stored as YAML in the platform config directory.
//! Default location: ~/.config/soundcharm/config.yaml

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use soundcharm_core::geometry::TARGET_PIXEL_WIDTH;
use soundcharm_core::WaveformRenderOptions;
use soundcharm_widgets::{ReadyTiming, ThemeSet, END_PREVIEW_SECONDS};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignerConfig {
    /// Waveform surface sizing and look
    pub render: RenderConfig,
    /// Upload decoding
    pub decode: DecodeConfig,
    /// Region trimmer interaction
    pub trimmer: TrimmerConfig,
    /// Deliverable encoding and naming
    pub export: ExportConfig,
    /// Render engine readiness polling
    pub engine: EngineConfig,
}

impl Default for DesignerConfig {
    fn default() -> Self {
        Self {
            render: RenderConfig::default(),
            decode: DecodeConfig::default(),
            trimmer: TrimmerConfig::default(),
            export: ExportConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl DesignerConfig {
    /// Clamp every section to usable values
    pub fn validate(&mut self) {
        self.render.validate();
        self.trimmer.validate();
        self.export.validate();
        self.engine.validate();
    }
}

/// Render configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Device-pixel width the drawing surface aims for
    pub target_pixel_width: f32,
    /// Initial layout width of the waveform container in CSS pixels
    pub container_width: f32,
    /// Initial waveform options
    pub options: WaveformRenderOptions,
    /// Colours per render mode
    pub themes: ThemeSet,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_pixel_width: TARGET_PIXEL_WIDTH,
            container_width: 600.0,
            options: WaveformRenderOptions::default(),
            themes: ThemeSet::default(),
        }
    }
}

impl RenderConfig {
    pub fn validate(&mut self) {
        if !self.target_pixel_width.is_finite() || self.target_pixel_width < 100.0 {
            self.target_pixel_width = TARGET_PIXEL_WIDTH;
        }
        if !self.container_width.is_finite() || self.container_width <= 0.0 {
            self.container_width = 600.0;
        }
        self.options.validate();
    }
}

/// Decode configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// MIME type uploads are decoded as. Other types are transcoded first.
    pub expected_mime_type: String,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            expected_mime_type: String::from("audio/mpeg"),
        }
    }
}

/// Trimmer configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimmerConfig {
    /// Seconds of audio previewed before the end boundary after a trim drag
    pub end_preview_seconds: f64,
}

impl Default for TrimmerConfig {
    fn default() -> Self {
        Self {
            end_preview_seconds: END_PREVIEW_SECONDS,
        }
    }
}

impl TrimmerConfig {
    pub fn validate(&mut self) {
        if !self.end_preview_seconds.is_finite() {
            self.end_preview_seconds = END_PREVIEW_SECONDS;
        }
        self.end_preview_seconds = self.end_preview_seconds.clamp(0.1, 30.0);
    }
}

/// Export configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Constant bitrate of the exported audio in kbit/s
    pub bitrate_kbps: u32,
    /// Channel count of the exported audio
    pub channels: u16,
    /// Output file name template (without extension)
    ///
    /// Supports placeholders:
    /// - {name}: File stem of the uploaded audio
    ///
    /// Example: "{name}-charm" produces "song-charm.png" and "song-charm.mp3"
    pub name_format: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 128,
            channels: 1,
            name_format: String::from("{name}-charm"),
        }
    }
}

impl ExportConfig {
    pub fn validate(&mut self) {
        self.bitrate_kbps = self.bitrate_kbps.clamp(32, 320);
        self.channels = self.channels.clamp(1, 2);
        if self.name_format.trim().is_empty() {
            self.name_format = String::from("{name}-charm");
        }
    }

    /// Output file stem for an upload named `name`
    pub fn file_stem(&self, name: &str) -> String {
        self.name_format.replace("{name}", name)
    }
}

/// Engine configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Give up waiting for the engine to draw after this long
    pub ready_timeout_ms: u64,
    /// Interval between drawn-state checks
    pub ready_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let timing = ReadyTiming::default();
        Self {
            ready_timeout_ms: timing.timeout.as_millis() as u64,
            ready_poll_interval_ms: timing.poll_interval.as_millis() as u64,
        }
    }
}

impl EngineConfig {
    pub fn validate(&mut self) {
        self.ready_poll_interval_ms = self.ready_poll_interval_ms.clamp(1, 1000);
        self.ready_timeout_ms = self.ready_timeout_ms.max(self.ready_poll_interval_ms);
    }

    pub fn timing(&self) -> ReadyTiming {
        ReadyTiming {
            timeout: Duration::from_millis(self.ready_timeout_ms),
            poll_interval: Duration::from_millis(self.ready_poll_interval_ms),
        }
    }
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    soundcharm_core::config::default_config_path("config.yaml")
}

/// Load and validate configuration
///
/// Missing or malformed files fall back to defaults.
pub fn load_config(path: &Path) -> DesignerConfig {
    let (mut config, source): (DesignerConfig, _) = soundcharm_core::config::load_config_with_source(path);
    config.validate();
    log::info!(
        "load_config: {} config, expecting {}, exporting {}ch @ {}kbps",
        if source.is_default() { "default" } else { "file" },
        config.decode.expected_mime_type,
        config.export.channels,
        config.export.bitrate_kbps
    );
    config
}
