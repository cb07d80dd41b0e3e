use crate::utils::error::{Result, SheetError};
use crate::utils::validation::{validate_range, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A4 sheet, portrait.
pub const PAGE_WIDTH_MM: f64 = 210.0;
pub const PAGE_HEIGHT_MM: f64 = 297.0;

/// Standard trading-card trim size.
pub const CARD_WIDTH_MM: f64 = 63.0;
pub const CARD_HEIGHT_MM: f64 = 88.0;

/// The finalized design fixes the grid at 3x3.
pub const COLUMNS: usize = 3;
pub const ROWS: usize = 3;
pub const CARDS_PER_PAGE: usize = COLUMNS * ROWS;

/// Print settings for one generation run. Immutable once the engine is
/// constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintSettings {
    #[serde(default = "default_true")]
    pub bleed_enabled: bool,
    #[serde(default = "default_bleed_mm")]
    pub bleed_mm: f64,

    #[serde(default = "default_true")]
    pub crop_marks: bool,
    #[serde(default = "default_crop_length_mm")]
    pub crop_length_mm: f64,
    #[serde(default = "default_crop_offset_mm")]
    pub crop_offset_mm: f64,
    #[serde(default = "default_crop_thickness_mm")]
    pub crop_thickness_mm: f64,

    #[serde(default = "default_safe_margin_mm")]
    pub safe_margin_mm: f64,

    #[serde(default)]
    pub back_pages: bool,
    #[serde(default)]
    pub mirror_backs: bool,
    /// Card-back image; unreadable or missing is a soft failure (back
    /// pages come out blank).
    #[serde(default)]
    pub back_image: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_bleed_mm() -> f64 {
    1.0
}
fn default_crop_length_mm() -> f64 {
    3.0
}
fn default_crop_offset_mm() -> f64 {
    1.0
}
fn default_crop_thickness_mm() -> f64 {
    0.2
}
fn default_safe_margin_mm() -> f64 {
    5.0
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            bleed_enabled: true,
            bleed_mm: default_bleed_mm(),
            crop_marks: true,
            crop_length_mm: default_crop_length_mm(),
            crop_offset_mm: default_crop_offset_mm(),
            crop_thickness_mm: default_crop_thickness_mm(),
            safe_margin_mm: default_safe_margin_mm(),
            back_pages: false,
            mirror_backs: false,
            back_image: None,
        }
    }
}

impl PrintSettings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SheetError::Config {
            message: format!("cannot read settings file {}: {}", path.display(), e),
        })?;
        let settings: PrintSettings = toml::from_str(&content).map_err(|e| SheetError::Config {
            message: format!("cannot parse settings file {}: {}", path.display(), e),
        })?;
        settings.validate()?;
        Ok(settings)
    }
}

impl Validate for PrintSettings {
    fn validate(&self) -> Result<()> {
        validate_range("bleed_mm", self.bleed_mm, 0.0, 5.0)?;
        validate_range("crop_length_mm", self.crop_length_mm, 1.0, 10.0)?;
        validate_range("crop_offset_mm", self.crop_offset_mm, 0.5, 5.0)?;
        validate_range("crop_thickness_mm", self.crop_thickness_mm, 0.05, 1.0)?;
        validate_range("safe_margin_mm", self.safe_margin_mm, 0.0, 25.0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PrintSettings::default().validate().unwrap();
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let settings: PrintSettings = toml::from_str(
            r#"
            bleed_mm = 0.5
            back_pages = true
            "#,
        )
        .unwrap();
        assert_eq!(settings.bleed_mm, 0.5);
        assert!(settings.back_pages);
        assert!(settings.crop_marks);
        assert_eq!(settings.safe_margin_mm, 5.0);
    }

    #[test]
    fn rejects_out_of_range_bleed() {
        let settings = PrintSettings {
            bleed_mm: 9.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
