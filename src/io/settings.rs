use crate::core::rasterize::{ThresholdDirection, ThresholdSpec};
use crate::io::detector::DetectorModel;
use crate::io::raw::MaskPolarity;
use crate::types::{
    validate_pixel_size, GapFillError, GapFillResult, Intensity, LengthUnit, Offset,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

/// Session settings document.
///
/// A flat key/value mapping of offsets, units, intensity limits, detector and
/// file paths. Unknown keys are ignored on import and missing keys take their
/// defaults, so older or partial documents still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Offsets are in pixels (`true`) or millimeters (`false`).
    ///
    /// A document without this key is read in pixels, even though settings
    /// written by the older desktop tool assumed millimeters when it was
    /// absent. Documents from that tool always carry the key, so only
    /// hand-written files are affected.
    pub use_pixel: bool,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub detector: DetectorModel,
    /// Pixel pitch override in millimeters; the detector's pitch otherwise
    pub pixel_size: Option<f64>,
    pub vmax: Intensity,
    /// Side of `vmax` to mask; `None` keeps `vmax` as a display limit only
    pub vmax_mask: Option<ThresholdDirection>,
    pub mask_above: Option<Intensity>,
    pub mask_below: Option<Intensity>,
    /// Flat-field array file, empty for unity gain
    pub flatfield: String,
    /// Detector/custom mask file, empty for the detector's gap layout
    pub mask: String,
    /// How non-zero bytes in the mask file are read
    pub mask_polarity: MaskPolarity,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_pixel: true,
            x1: 3.0,
            y1: -4.0,
            x2: 6.0,
            y2: -8.0,
            detector: DetectorModel::Eiger1M,
            pixel_size: None,
            vmax: 2000.0,
            vmax_mask: None,
            mask_above: None,
            mask_below: None,
            flatfield: String::new(),
            mask: String::new(),
            mask_polarity: MaskPolarity::Auto,
        }
    }
}

impl Settings {
    pub fn from_json_str(json: &str) -> GapFillResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> GapFillResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> GapFillResult<Self> {
        let path = path.as_ref();
        log::info!("Loading settings from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> GapFillResult<()> {
        let path = path.as_ref();
        log::info!("Saving settings to {}", path.display());
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn offset_unit(&self) -> LengthUnit {
        if self.use_pixel {
            LengthUnit::Pixel
        } else {
            LengthUnit::Millimeter
        }
    }

    pub fn pixel_size_mm(&self) -> f64 {
        self.pixel_size.unwrap_or_else(|| self.detector.pixel_size_mm())
    }

    /// Move1 and Move2 offsets resolved to pixels
    pub fn offsets(&self) -> GapFillResult<(Offset, Offset)> {
        let unit = self.offset_unit();
        let pixel_size = self.pixel_size_mm();
        Ok((
            Offset::from_unit(self.x1, self.y1, unit, pixel_size)?,
            Offset::from_unit(self.x2, self.y2, unit, pixel_size)?,
        ))
    }

    /// Switch the stored offsets to pixel (`true`) or millimeter units
    pub fn convert_units(&mut self, use_pixel: bool) -> GapFillResult<()> {
        if use_pixel == self.use_pixel {
            return Ok(());
        }
        let pixel_size = self.pixel_size_mm();
        validate_pixel_size(pixel_size)?;

        let factor = if use_pixel { 1.0 / pixel_size } else { pixel_size };
        for value in [&mut self.x1, &mut self.y1, &mut self.x2, &mut self.y2] {
            *value *= factor;
        }
        self.use_pixel = use_pixel;
        Ok(())
    }

    pub fn threshold_spec(&self) -> ThresholdSpec {
        ThresholdSpec {
            vmax: self.vmax_mask.map(|direction| (self.vmax, direction)),
            mask_above: self.mask_above,
            mask_below: self.mask_below,
        }
    }

    pub fn flatfield_path(&self) -> Option<&Path> {
        non_empty_path(&self.flatfield)
    }

    pub fn mask_path(&self) -> Option<&Path> {
        non_empty_path(&self.mask)
    }
}

fn non_empty_path(text: &str) -> Option<&Path> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| Path::new(trimmed))
}

fn offset_pattern() -> GapFillResult<&'static Regex> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:e[+-]?\d+)?)\s*(px|pixels?|mm)?\s*$")
        })
        .as_ref()
        .map_err(|e| GapFillError::InvalidParameter(format!("Regex error: {}", e)))
}

/// Parse an offset field such as `"3"`, `"-4.5"`, `"0.225 mm"` or `"12px"`
/// into pixels. A bare number is read in `default_unit`.
pub fn parse_offset_component(
    text: &str,
    default_unit: LengthUnit,
    pixel_size_mm: f64,
) -> GapFillResult<f64> {
    let captures = offset_pattern()?.captures(text).ok_or_else(|| {
        GapFillError::InvalidParameter(format!("Invalid offset value: {:?}", text))
    })?;
    let value: f64 = captures[1]
        .parse()
        .map_err(|e| GapFillError::InvalidParameter(format!("Invalid offset value {:?}: {}", text, e)))?;

    let unit = match captures.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(suffix) if suffix == "mm" => LengthUnit::Millimeter,
        Some(_) => LengthUnit::Pixel,
        None => default_unit,
    };

    match unit {
        LengthUnit::Pixel => Ok(value),
        LengthUnit::Millimeter => {
            validate_pixel_size(pixel_size_mm)?;
            Ok(value / pixel_size_mm)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_partial_document_uses_defaults() {
        let settings = Settings::from_json_str(
            r#"{ "x1": 1.5, "detector": "Pilatus300K-W", "theme": "dark", "cmap": "jet" }"#,
        )
        .unwrap();

        assert_eq!(settings.x1, 1.5);
        assert_eq!(settings.y1, -4.0);
        assert_eq!(settings.detector, DetectorModel::Pilatus300KW);
        assert_eq!(settings.vmax, 2000.0);
        assert!(settings.flatfield_path().is_none());
    }

    #[test]
    fn test_unknown_detector_is_an_error() {
        let err = Settings::from_json_str(r#"{ "detector": "Mythen" }"#).unwrap_err();
        assert!(matches!(err, GapFillError::Settings(_)));
    }

    #[test]
    fn test_millimeter_offsets_resolve_to_pixels() {
        let settings = Settings {
            use_pixel: false,
            x1: 0.225,
            y1: -0.3,
            x2: 0.45,
            y2: -0.6,
            ..Settings::default()
        };
        let (move1, move2) = settings.offsets().unwrap();
        assert_relative_eq!(move1.dx, 3.0, epsilon = 1e-9);
        assert_relative_eq!(move1.dy, -4.0, epsilon = 1e-9);
        assert_relative_eq!(move2.dx, 6.0, epsilon = 1e-9);
        assert_relative_eq!(move2.dy, -8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unit_toggle_round_trip() {
        let mut settings = Settings {
            detector: DetectorModel::Pilatus1M,
            ..Settings::default()
        };
        settings.convert_units(false).unwrap();
        assert_relative_eq!(settings.x1, 3.0 * 0.172, epsilon = 1e-12);
        assert!(!settings.use_pixel);

        settings.convert_units(true).unwrap();
        assert_relative_eq!(settings.x1, 3.0, epsilon = 1e-12);
        assert_relative_eq!(settings.y2, -8.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_pixel_size_rejected() {
        let mut settings = Settings {
            pixel_size: Some(0.0),
            ..Settings::default()
        };
        assert!(settings.convert_units(false).is_err());
        settings.use_pixel = false;
        assert!(settings.offsets().is_err());
    }

    #[test]
    fn test_threshold_spec_from_settings() {
        let settings = Settings {
            vmax: 500.0,
            vmax_mask: Some(ThresholdDirection::Above),
            mask_below: Some(0.0),
            ..Settings::default()
        };
        let spec = settings.threshold_spec();
        assert_eq!(spec.vmax, Some((500.0, ThresholdDirection::Above)));
        assert_eq!(spec.mask_below, Some(0.0));
        assert!(!Settings::default().threshold_spec().is_active());
    }

    #[test]
    fn test_parse_offset_component() {
        assert_eq!(parse_offset_component("3", LengthUnit::Pixel, 0.075).unwrap(), 3.0);
        assert_eq!(parse_offset_component(" -4.5 px", LengthUnit::Millimeter, 0.075).unwrap(), -4.5);
        assert_relative_eq!(
            parse_offset_component("0.225 mm", LengthUnit::Pixel, 0.075).unwrap(),
            3.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            parse_offset_component("0.344", LengthUnit::Millimeter, 0.172).unwrap(),
            2.0,
            epsilon = 1e-9
        );
        assert!(parse_offset_component("three", LengthUnit::Pixel, 0.075).is_err());
        assert!(parse_offset_component("1 mm", LengthUnit::Pixel, 0.0).is_err());
    }

    #[test]
    fn test_offset_pattern_is_compiled_once() {
        let first = offset_pattern().unwrap();
        let second = offset_pattern().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_document_without_use_pixel_is_read_in_pixels() {
        let settings = Settings::from_json_str(r#"{ "x1": 2.0, "y1": 1.0, "x2": 4.0, "y2": 2.0 }"#)
            .unwrap();
        assert!(settings.use_pixel);
        assert_eq!(settings.offset_unit(), LengthUnit::Pixel);

        let (move1, move2) = settings.offsets().unwrap();
        assert_eq!((move1.dx, move1.dy), (2.0, 1.0));
        assert_eq!((move2.dx, move2.dy), (4.0, 2.0));

        let explicit = Settings::from_json_str(r#"{ "use_pixel": false, "x1": 0.15 }"#).unwrap();
        let (move1, _) = explicit.offsets().unwrap();
        assert_relative_eq!(move1.dx, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mask_polarity_defaults_to_auto() {
        assert_eq!(Settings::default().mask_polarity, MaskPolarity::Auto);
        let settings = Settings::from_json_str(r#"{ "mask_polarity": "ValidPositive" }"#).unwrap();
        assert_eq!(settings.mask_polarity, MaskPolarity::ValidPositive);
    }
}
