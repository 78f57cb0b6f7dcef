//! SoundCharm - turn a song into a waveform charm
//!
//! Headless driver for the designer: uploads an audio file, optionally trims
//! it and places it on a jewelry piece, then writes the waveform PNG and the
//! trimmed MP3.
//!
//! ## Usage
//!
//! ```text
//! soundcharm <audio-file> [--out DIR] [--trim START:END] [--piece NAME]
//!            [--mode bar|natural] [--config PATH] [--ffmpeg PATH]
//! soundcharm --list-pieces
//! ```
//!
//! `--trim` takes fractions of the track, e.g. `--trim 0.25:0.75`. It may be
//! repeated; each trim applies to the result of the previous one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use soundcharm_core::audio_file::AudioBlob;
use soundcharm_core::catalog::JewelryCatalog;
use soundcharm_core::transcode::FfmpegTranscoder;
use soundcharm_core::{NormalizedRegion, RenderMode};
use soundcharm_designer::{config, DesignerOrchestrator, WatchStore};
use soundcharm_widgets::RasterEngineFactory;

/// Parsed command line
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    input: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    trims: Vec<NormalizedRegion>,
    piece: Option<String>,
    mode: Option<RenderMode>,
    config_path: Option<PathBuf>,
    ffmpeg: Option<PathBuf>,
    list_pieces: bool,
}

impl CliArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = CliArgs::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| args.next().ok_or_else(|| anyhow!("{} needs a value", flag));
            match arg.as_str() {
                "--out" => parsed.out_dir = Some(PathBuf::from(value("--out")?)),
                "--trim" => parsed.trims.push(parse_trim(&value("--trim")?)?),
                "--piece" => parsed.piece = Some(value("--piece")?),
                "--mode" => parsed.mode = Some(value("--mode")?.parse().map_err(|e: String| anyhow!(e))?),
                "--config" => parsed.config_path = Some(PathBuf::from(value("--config")?)),
                "--ffmpeg" => parsed.ffmpeg = Some(PathBuf::from(value("--ffmpeg")?)),
                "--list-pieces" => parsed.list_pieces = true,
                flag if flag.starts_with("--") => bail!("unknown flag {}", flag),
                _ if parsed.input.is_none() => parsed.input = Some(PathBuf::from(&arg)),
                _ => bail!("unexpected argument {}", arg),
            }
        }
        Ok(parsed)
    }
}

fn parse_trim(value: &str) -> Result<NormalizedRegion> {
    let (start, end) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("trim must look like START:END, got {}", value))?;
    let start: f64 = start.trim().parse().with_context(|| format!("bad trim start {}", start))?;
    let end: f64 = end.trim().parse().with_context(|| format!("bad trim end {}", end))?;
    if !(0.0..=1.0).contains(&start) || !(0.0..=1.0).contains(&end) || start >= end {
        bail!("trim bounds must satisfy 0 <= start < end <= 1, got {}", value);
    }
    Ok(NormalizedRegion::new(start, end))
}

/// MIME type browsers report for a file extension
fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" | "oga" => "audio/ogg",
        "m4a" | "aac" => "audio/mp4",
        "webm" => "audio/webm",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = CliArgs::parse(std::env::args().skip(1))?;
    let catalog = JewelryCatalog::builtin()?;

    if args.list_pieces {
        for name in catalog.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let input = args
        .input
        .clone()
        .ok_or_else(|| anyhow!("usage: soundcharm <audio-file> [--out DIR] [--trim START:END] [--piece NAME]"))?;

    let config_path = args.config_path.clone().unwrap_or_else(config::default_config_path);
    let mut config = config::load_config(&config_path);
    if let Some(mode) = args.mode {
        config.render.options.mode = mode;
    }
    let file_stem = config.export.file_stem(
        input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("soundcharm"),
    );

    let transcoder = args.ffmpeg.clone().map(FfmpegTranscoder::new).unwrap_or_default();
    let store = Arc::new(WatchStore::default());
    let (designer, mut events) = DesignerOrchestrator::new(
        config,
        RasterEngineFactory::new(),
        catalog,
        Arc::new(transcoder),
        store.clone(),
    );

    log::info!("soundcharm starting on {:?}", input);
    let bytes = std::fs::read(&input).with_context(|| format!("Failed to read {:?}", input))?;
    designer.upload(AudioBlob::new(bytes, mime_for_path(&input))).await?;

    for trim in &args.trims {
        designer.trim_active(*trim).await?;
    }
    if let Some(piece) = args.piece.as_deref() {
        designer.select_piece(Some(piece)).await?;
    }

    let bundle = designer.export().await?;
    let out_dir = args.out_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let (image_path, audio_path) = bundle.write_to(&out_dir, &file_stem)?;
    designer.finish_export()?;

    let snapshot = store.snapshot();
    println!(
        "{:.2}s of audio, region [{:.3}, {:.3}]",
        snapshot.duration_seconds.unwrap_or(0.0),
        snapshot.active_region.start(),
        snapshot.active_region.end()
    );
    println!("image: {}", image_path.display());
    println!("audio: {}", audio_path.display());

    designer.close().await;
    while let Ok(event) = events.try_recv() {
        log::debug!("event: {:?}", event);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full_command_line() {
        let parsed = CliArgs::parse(args(&[
            "song.mp3", "--trim", "0.25:0.75", "--trim", "0:0.5", "--piece", "Heart Locket", "--mode", "natural",
            "--out", "charms",
        ]))
        .unwrap();

        assert_eq!(parsed.input, Some(PathBuf::from("song.mp3")));
        assert_eq!(
            parsed.trims,
            vec![NormalizedRegion::new(0.25, 0.75), NormalizedRegion::new(0.0, 0.5)]
        );
        assert_eq!(parsed.piece.as_deref(), Some("Heart Locket"));
        assert_eq!(parsed.mode, Some(RenderMode::Natural));
        assert_eq!(parsed.out_dir, Some(PathBuf::from("charms")));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(CliArgs::parse(args(&["a.mp3", "--trim", "0.8:0.2"])).is_err());
        assert!(CliArgs::parse(args(&["a.mp3", "--trim"])).is_err());
        assert!(CliArgs::parse(args(&["a.mp3", "--frobnicate"])).is_err());
        assert!(CliArgs::parse(args(&["a.mp3", "b.mp3"])).is_err());
        assert!(CliArgs::parse(args(&["--mode", "sparkles"])).is_err());
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("x/Song.MP3")), "audio/mpeg");
        assert_eq!(mime_for_path(Path::new("take.webm")), "audio/webm");
        assert_eq!(mime_for_path(Path::new("noext")), "application/octet-stream");
    }
}
