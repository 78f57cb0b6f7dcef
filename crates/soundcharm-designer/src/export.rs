//! Export deliverables

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// The two files produced by an export: waveform image and trimmed audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBundle {
    /// PNG snapshot of the waveform
    pub image_png: Vec<u8>,
    /// Encoded audio of the active region
    pub audio: Vec<u8>,
    /// File extension of `audio`, e.g. `mp3`
    pub audio_extension: String,
}

impl ExportBundle {
    /// Write `<base_name>.png` and `<base_name>.<audio_extension>` into `dir`
    ///
    /// Returns the image and audio paths.
    pub fn write_to(&self, dir: &Path, base_name: &str) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create export directory {:?}", dir))?;

        let image_path = dir.join(format!("{}.png", base_name));
        let audio_path = dir.join(format!("{}.{}", base_name, self.audio_extension));

        std::fs::write(&image_path, &self.image_png)
            .with_context(|| format!("Failed to write image {:?}", image_path))?;
        std::fs::write(&audio_path, &self.audio).with_context(|| format!("Failed to write audio {:?}", audio_path))?;

        log::info!(
            "export: wrote {:?} ({} bytes) and {:?} ({} bytes)",
            image_path,
            self.image_png.len(),
            audio_path,
            self.audio.len()
        );
        Ok((image_path, audio_path))
    }
}
