//! Jewelry piece catalog
//!
//! Static reference data keyed by piece name. The built-in table is compiled
//! into the binary from `assets/catalog.yaml`; a custom catalog can be loaded
//! from any YAML document with the same shape.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BUILTIN_CATALOG: &str = include_str!("../assets/catalog.yaml");

/// Catalog loading errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Duplicate piece name: {0}")]
    DuplicateName(String),

    #[error("Piece {name} has an invalid target resolution {width}x{height}")]
    InvalidResolution { name: String, width: u32, height: u32 },
}

/// Pixel size of a piece's engraving area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResolution {
    pub width: u32,
    pub height: u32,
}

/// Placement of the waveform on the piece image (percent of the image box)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PieceGeometry {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    /// Degrees, clockwise
    #[serde(default)]
    pub rotation: f32,
    pub target_resolution: TargetResolution,
}

/// A catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JewelryPiece {
    pub name: String,
    pub image: PathBuf,
    pub preview: PathBuf,
    pub geometry: PieceGeometry,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    pieces: Vec<JewelryPiece>,
}

/// Name -> piece table
#[derive(Debug, Clone, Default)]
pub struct JewelryCatalog {
    pieces: BTreeMap<String, JewelryPiece>,
}

impl JewelryCatalog {
    /// The catalog shipped with the application
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    /// Parse a catalog document
    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument = serde_yaml::from_str(yaml)?;
        let mut pieces = BTreeMap::new();

        for piece in document.pieces {
            let res = piece.geometry.target_resolution;
            if res.width == 0 || res.height == 0 {
                return Err(CatalogError::InvalidResolution {
                    name: piece.name,
                    width: res.width,
                    height: res.height,
                });
            }
            if pieces.contains_key(&piece.name) {
                return Err(CatalogError::DuplicateName(piece.name));
            }
            pieces.insert(piece.name.clone(), piece);
        }

        log::debug!("catalog: loaded {} pieces", pieces.len());
        Ok(Self { pieces })
    }

    pub fn get(&self, name: &str) -> Option<&JewelryPiece> {
        self.pieces.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pieces.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}
