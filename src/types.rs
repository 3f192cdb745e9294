use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Real-valued detector intensity
pub type Intensity = f32;

/// 2D intensity raster (rows = y, cols = x)
pub type Raster = Array2<Intensity>;

/// 2D validity bitmap, `true` = usable pixel
pub type ValidityMask = Array2<bool>;

/// Raster shape as `(rows, cols)`, the same order as `Array2::dim()`
pub type Shape = (usize, usize);

/// Role a frame plays in a gap-fill session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameRole {
    /// Reference exposure; defines the output coordinate system
    Original,
    /// First shifted exposure
    Move1,
    /// Second shifted exposure
    Move2,
    /// Composite output
    GapFilled,
}

impl FrameRole {
    /// Roles that can hold an input exposure, in compositing priority order
    pub const SOURCES: [FrameRole; 3] = [FrameRole::Original, FrameRole::Move1, FrameRole::Move2];
}

impl std::fmt::Display for FrameRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameRole::Original => write!(f, "Original"),
            FrameRole::Move1 => write!(f, "Move1"),
            FrameRole::Move2 => write!(f, "Move2"),
            FrameRole::GapFilled => write!(f, "GapFilled"),
        }
    }
}

/// An immutable raster + validity mask pair in detector coordinates.
///
/// Raster and mask are shared behind `Arc`, so cloning a frame or routing it
/// to another slot never copies pixel data. Mask edits produce a new frame
/// through [`Frame::with_mask`] that keeps pointing at the same raster.
#[derive(Debug, Clone)]
pub struct Frame {
    raster: Arc<Raster>,
    mask: Arc<ValidityMask>,
    role: FrameRole,
}

impl Frame {
    /// Pair a raster with its mask; both must have the same shape
    pub fn new(raster: Raster, mask: ValidityMask, role: FrameRole) -> GapFillResult<Self> {
        Self::from_shared(Arc::new(raster), Arc::new(mask), role)
    }

    /// Frame whose every pixel is usable
    pub fn all_valid(raster: Raster, role: FrameRole) -> Self {
        let mask = Array2::from_elem(raster.dim(), true);
        Self {
            raster: Arc::new(raster),
            mask: Arc::new(mask),
            role,
        }
    }

    /// All-invalid frame of the given shape; raster holds the 0.0 sentinel
    pub fn empty(shape: Shape, role: FrameRole) -> Self {
        Self {
            raster: Arc::new(Array2::zeros(shape)),
            mask: Arc::new(Array2::from_elem(shape, false)),
            role,
        }
    }

    pub fn from_shared(
        raster: Arc<Raster>,
        mask: Arc<ValidityMask>,
        role: FrameRole,
    ) -> GapFillResult<Self> {
        ensure_shape("frame mask", raster.dim(), mask.dim())?;
        Ok(Self { raster, mask, role })
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn mask(&self) -> &ValidityMask {
        &self.mask
    }

    pub fn shared_raster(&self) -> Arc<Raster> {
        Arc::clone(&self.raster)
    }

    pub fn shared_mask(&self) -> Arc<ValidityMask> {
        Arc::clone(&self.mask)
    }

    pub fn role(&self) -> FrameRole {
        self.role
    }

    pub fn shape(&self) -> Shape {
        self.raster.dim()
    }

    pub fn width(&self) -> usize {
        self.raster.ncols()
    }

    pub fn height(&self) -> usize {
        self.raster.nrows()
    }

    /// Same raster paired with a different mask
    pub fn with_mask(&self, mask: ValidityMask) -> GapFillResult<Self> {
        ensure_shape("replacement mask", self.shape(), mask.dim())?;
        Ok(Self {
            raster: Arc::clone(&self.raster),
            mask: Arc::new(mask),
            role: self.role,
        })
    }

    /// Same pixel data under another role
    pub fn with_role(&self, role: FrameRole) -> Self {
        Self {
            raster: Arc::clone(&self.raster),
            mask: Arc::clone(&self.mask),
            role,
        }
    }

    pub fn valid_pixels(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    pub fn invalid_pixels(&self) -> usize {
        self.mask.len() - self.valid_pixels()
    }

    /// True when both frames point at the same raster and mask allocations
    pub fn shares_data_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.raster, &other.raster) && Arc::ptr_eq(&self.mask, &other.mask)
    }
}

/// Unit an offset value is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthUnit {
    Pixel,
    Millimeter,
}

/// Detector displacement of a Move exposure relative to Original, in pixels.
///
/// Positive values mean the detector center moved right (`dx`) or down
/// (`dy`). A zero offset on a Move frame means "not set".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    pub dx: f64,
    pub dy: f64,
}

impl Offset {
    pub const ZERO: Offset = Offset { dx: 0.0, dy: 0.0 };

    pub fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    /// Convert a physical displacement using the detector pixel size
    pub fn from_millimeters(dx_mm: f64, dy_mm: f64, pixel_size_mm: f64) -> GapFillResult<Self> {
        validate_pixel_size(pixel_size_mm)?;
        Ok(Self {
            dx: dx_mm / pixel_size_mm,
            dy: dy_mm / pixel_size_mm,
        })
    }

    pub fn from_unit(dx: f64, dy: f64, unit: LengthUnit, pixel_size_mm: f64) -> GapFillResult<Self> {
        match unit {
            LengthUnit::Pixel => Ok(Self::new(dx, dy)),
            LengthUnit::Millimeter => Self::from_millimeters(dx, dy, pixel_size_mm),
        }
    }

    pub fn to_millimeters(&self, pixel_size_mm: f64) -> GapFillResult<(f64, f64)> {
        validate_pixel_size(pixel_size_mm)?;
        Ok((self.dx * pixel_size_mm, self.dy * pixel_size_mm))
    }

    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }

    /// Whole-pixel offset, if both components are integral
    pub fn as_integer(&self) -> Option<(isize, isize)> {
        if self.dx.fract() == 0.0 && self.dy.fract() == 0.0 {
            Some((self.dx as isize, self.dy as isize))
        } else {
            None
        }
    }

    pub fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite()
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}) px", self.dx, self.dy)
    }
}

pub(crate) fn validate_pixel_size(pixel_size_mm: f64) -> GapFillResult<()> {
    if !pixel_size_mm.is_finite() || pixel_size_mm <= 0.0 {
        return Err(GapFillError::InvalidParameter(format!(
            "Pixel size must be a positive length, got {}",
            pixel_size_mm
        )));
    }
    Ok(())
}

/// Fail with `ShapeMismatch` unless `found == expected`
pub fn ensure_shape(context: &str, expected: Shape, found: Shape) -> GapFillResult<()> {
    if expected != found {
        return Err(GapFillError::ShapeMismatch {
            context: context.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

/// Error types for gap-fill processing
#[derive(Debug, thiserror::Error)]
pub enum GapFillError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shape mismatch in {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: String,
        expected: Shape,
        found: Shape,
    },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Missing source: {0}")]
    MissingSource(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),
}

/// Result type for gap-fill operations
pub type GapFillResult<T> = Result<T, GapFillError>;
