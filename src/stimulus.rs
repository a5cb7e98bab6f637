//! Stimulus identity.
//!
//! A stimulus is either a geometric shape drawn by the display adapter or an
//! image file. It is a closed tagged variant with a uniform [`Stimulus::display_name`]
//! accessor; nothing in the core inspects stimulus identity any other way.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Geometric shapes the display adapter knows how to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Circle,
    Square,
    Triangle,
    Star,
}

impl ShapeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ShapeKind::Circle => "circle",
            ShapeKind::Square => "square",
            ShapeKind::Triangle => "triangle",
            ShapeKind::Star => "star",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "circle" => Some(ShapeKind::Circle),
            "square" => Some(ShapeKind::Square),
            "triangle" => Some(ShapeKind::Triangle),
            "star" => Some(ShapeKind::Star),
            _ => None,
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One presentable stimulus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stimulus {
    Shape(ShapeKind),
    Image(PathBuf),
}

impl Stimulus {
    /// Human-readable name used in logs, progress text and video filenames.
    pub fn display_name(&self) -> String {
        match self {
            Stimulus::Shape(kind) => kind.name().to_string(),
            Stimulus::Image(path) => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string()),
        }
    }
}

impl fmt::Display for Stimulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}
