//! Render geometry resolution
//!
//! Computes the drawing surface size and pixel density for either a plain
//! waveform or a waveform overlaid on a jewelry piece. Pure function of its
//! inputs: same inputs, same output, no hidden state.

use thiserror::Error;

use crate::catalog::JewelryPiece;
use crate::types::WaveformRenderOptions;

/// Pixel width of plain-mode exports, independent of on-screen size
pub const TARGET_PIXEL_WIDTH: f32 = 1200.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Container width must be positive and finite, got {0}")]
    InvalidContainerWidth(f32),
}

/// Absolute positioning of the waveform surface over a piece image,
/// in percent of the piece image box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayPlacement {
    pub left_pct: f32,
    pub top_pct: f32,
    pub width_pct: f32,
    pub height_pct: f32,
    pub rotation_deg: f32,
}

/// Layout of the drawing surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderGeometry {
    /// Container width in CSS pixels
    pub container_width: f32,
    /// Surface height in CSS pixels
    pub height: f32,
    /// Device pixels per CSS pixel
    pub pixel_ratio: f32,
    /// Present in jewelry mode only
    pub overlay: Option<OverlayPlacement>,
}

impl RenderGeometry {
    /// Surface size in device pixels
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            (self.container_width * self.pixel_ratio).round().max(1.0) as u32,
            (self.height * self.pixel_ratio).round().max(1.0) as u32,
        )
    }

    pub fn is_jewelry(&self) -> bool {
        self.overlay.is_some()
    }
}

/// Resolve geometry for the current container and target
///
/// - Plain: `height = width * options.height`, `ratio = target_pixel_width / width`
/// - Jewelry: `height = width * res.height / res.width`, `ratio = res.width / width`,
///   overlay taken straight from the piece's stored percentages
pub fn resolve_geometry(
    container_width: f32,
    options: &WaveformRenderOptions,
    piece: Option<&JewelryPiece>,
    target_pixel_width: f32,
) -> Result<RenderGeometry, GeometryError> {
    if !container_width.is_finite() || container_width <= 0.0 {
        return Err(GeometryError::InvalidContainerWidth(container_width));
    }

    let geometry = match piece {
        None => RenderGeometry {
            container_width,
            height: container_width * options.height,
            pixel_ratio: target_pixel_width / container_width,
            overlay: None,
        },
        Some(piece) => {
            let g = &piece.geometry;
            let res = g.target_resolution;
            RenderGeometry {
                container_width,
                height: container_width * (res.height as f32 / res.width as f32),
                pixel_ratio: res.width as f32 / container_width,
                overlay: Some(OverlayPlacement {
                    left_pct: g.left,
                    top_pct: g.top,
                    width_pct: g.width,
                    height_pct: g.height,
                    rotation_deg: g.rotation,
                }),
            }
        }
    };

    Ok(geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::JewelryCatalog;

    #[test]
    fn test_plain_geometry() {
        let options = WaveformRenderOptions {
            height: 0.5,
            ..Default::default()
        };
        let g = resolve_geometry(600.0, &options, None, TARGET_PIXEL_WIDTH).unwrap();
        assert_eq!(g.height, 300.0);
        assert_eq!(g.pixel_ratio, 2.0);
        assert_eq!(g.pixel_size(), (1200, 600));
        assert!(g.overlay.is_none());
    }

    #[test]
    fn test_jewelry_geometry() {
        let catalog = JewelryCatalog::builtin().unwrap();
        let piece = catalog.get("Heart Locket").unwrap();
        let g = resolve_geometry(550.0, &WaveformRenderOptions::default(), Some(piece), TARGET_PIXEL_WIDTH)
            .unwrap();

        assert!((g.height - 180.0).abs() < 1e-3);
        assert!((g.pixel_ratio - 2.0).abs() < 1e-6);
        assert_eq!(g.pixel_size(), (1100, 360));

        let overlay = g.overlay.unwrap();
        assert_eq!(overlay.left_pct, 22.5);
        assert_eq!(overlay.top_pct, 41.0);
        assert_eq!(overlay.width_pct, 55.0);
        assert_eq!(overlay.height_pct, 18.0);
    }

    #[test]
    fn test_jewelry_ignores_height_multiplier() {
        let catalog = JewelryCatalog::builtin().unwrap();
        let piece = catalog.get("Bar Necklace").unwrap();
        let tall = WaveformRenderOptions {
            height: 1.5,
            ..Default::default()
        };
        let a = resolve_geometry(400.0, &tall, Some(piece), TARGET_PIXEL_WIDTH).unwrap();
        let b = resolve_geometry(400.0, &WaveformRenderOptions::default(), Some(piece), TARGET_PIXEL_WIDTH)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_resolution_is_pure() {
        let catalog = JewelryCatalog::builtin().unwrap();
        let options = WaveformRenderOptions::default();
        for piece in [None, catalog.get("Cuff Bracelet")] {
            let first = resolve_geometry(733.0, &options, piece, TARGET_PIXEL_WIDTH).unwrap();
            let second = resolve_geometry(733.0, &options, piece, TARGET_PIXEL_WIDTH).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_zero_width_rejected() {
        let options = WaveformRenderOptions::default();
        assert_eq!(
            resolve_geometry(0.0, &options, None, TARGET_PIXEL_WIDTH),
            Err(GeometryError::InvalidContainerWidth(0.0))
        );
        assert!(resolve_geometry(f32::NAN, &options, None, TARGET_PIXEL_WIDTH).is_err());
    }
}
