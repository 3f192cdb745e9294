use crate::types::{
    ensure_shape, Frame, FrameRole, GapFillResult, Intensity, Raster, ValidityMask,
};
use ndarray::{Array2, Zip};
use num_traits::ToPrimitive;

/// Flat-field corrected raster and the pixels the gain map left usable
#[derive(Debug, Clone)]
pub struct CorrectedRaster {
    pub raster: Raster,
    /// `false` where the flat field was zero, negative or not a number
    pub valid: ValidityMask,
}

/// Per-pixel gain correction applied once, at load time
#[derive(Debug, Clone, Default)]
pub struct FlatFieldCorrector {
    flat_field: Option<Raster>,
}

impl FlatFieldCorrector {
    /// Corrector dividing by the given gain map
    pub fn new(flat_field: Raster) -> Self {
        Self {
            flat_field: Some(flat_field),
        }
    }

    /// Unity gain: the raw raster passes through unchanged
    pub fn unity() -> Self {
        Self { flat_field: None }
    }

    pub fn flat_field(&self) -> Option<&Raster> {
        self.flat_field.as_ref()
    }

    /// Divide `raw` by the flat field.
    ///
    /// Pixels whose gain is not strictly positive come out as 0.0 and are
    /// flagged invalid. Raw samples not representable as `f32` become NaN.
    pub fn correct<T>(&self, raw: &Array2<T>) -> GapFillResult<CorrectedRaster>
    where
        T: ToPrimitive,
    {
        let Some(flat) = &self.flat_field else {
            return Ok(CorrectedRaster {
                raster: to_raster(raw),
                valid: Array2::from_elem(raw.dim(), true),
            });
        };

        ensure_shape("flat field", raw.dim(), flat.dim())?;
        log::debug!("Applying flat-field correction to {:?} raster", raw.dim());

        let raster = Zip::from(raw)
            .and(flat)
            .map_collect(|raw_val, &gain| apply_gain(raw_val, gain));
        let valid = flat.mapv(|gain| gain > 0.0);

        Ok(CorrectedRaster { raster, valid })
    }

    /// Parallel flat-field correction using Rayon (if available)
    #[cfg(feature = "parallel")]
    pub fn correct_parallel<T>(&self, raw: &Array2<T>) -> GapFillResult<CorrectedRaster>
    where
        T: ToPrimitive + Sync,
    {
        let Some(flat) = &self.flat_field else {
            return self.correct(raw);
        };

        ensure_shape("flat field", raw.dim(), flat.dim())?;
        log::debug!("Applying parallel flat-field correction to {:?} raster", raw.dim());

        let raster = Zip::from(raw)
            .and(flat)
            .par_map_collect(|raw_val, &gain| apply_gain(raw_val, gain));
        let valid = Zip::from(flat).par_map_collect(|&gain| gain > 0.0);

        Ok(CorrectedRaster { raster, valid })
    }

    /// Build a frame from a raw exposure.
    ///
    /// The frame mask is the flat-field validity ANDed with the detector mask
    /// (if any), so gain-map holes behave like detector gaps downstream.
    pub fn load_frame<T>(
        &self,
        raw: &Array2<T>,
        detector_mask: Option<&ValidityMask>,
        role: FrameRole,
    ) -> GapFillResult<Frame>
    where
        T: ToPrimitive + Sync,
    {
        log::info!("Loading {} exposure ({}x{})", role, raw.nrows(), raw.ncols());

        #[cfg(feature = "parallel")]
        let corrected = self.correct_parallel(raw)?;
        #[cfg(not(feature = "parallel"))]
        let corrected = self.correct(raw)?;

        let CorrectedRaster { raster, mut valid } = corrected;
        if let Some(detector) = detector_mask {
            ensure_shape("detector mask", raster.dim(), detector.dim())?;
            Zip::from(&mut valid)
                .and(detector)
                .for_each(|v, &d| *v = *v && d);
        }

        let frame = Frame::new(raster, valid, role)?;
        log::debug!(
            "{} exposure loaded with {} invalid pixels",
            role,
            frame.invalid_pixels()
        );
        Ok(frame)
    }
}

#[inline]
fn apply_gain<T: ToPrimitive>(raw: &T, gain: Intensity) -> Intensity {
    if gain > 0.0 {
        raw.to_f32().unwrap_or(f32::NAN) / gain
    } else {
        0.0
    }
}

/// Convert any primitive numeric array to an `f32` raster
pub fn to_raster<T: ToPrimitive>(raw: &Array2<T>) -> Raster {
    raw.map(|v| v.to_f32().unwrap_or(f32::NAN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_flat_field_division() {
        let raw = array![[100u16, 200], [300, 400]];
        let flat = array![[2.0f32, 4.0], [0.5, 1.0]];

        let corrected = FlatFieldCorrector::new(flat).correct(&raw).unwrap();

        assert_relative_eq!(corrected.raster[[0, 0]], 50.0);
        assert_relative_eq!(corrected.raster[[0, 1]], 50.0);
        assert_relative_eq!(corrected.raster[[1, 0]], 600.0);
        assert_relative_eq!(corrected.raster[[1, 1]], 400.0);
        assert!(corrected.valid.iter().all(|&v| v));
    }

    #[test]
    fn test_zero_gain_forces_zero_and_invalid() {
        let raw = array![[1.0e6f32, 7.0], [f32::MAX, 3.0]];
        let flat = array![[0.0f32, 1.0], [-1.0, f32::NAN]];

        let corrected = FlatFieldCorrector::new(flat).correct(&raw).unwrap();

        assert_eq!(corrected.raster[[0, 0]], 0.0);
        assert!(!corrected.valid[[0, 0]]);
        assert_eq!(corrected.raster[[1, 0]], 0.0);
        assert!(!corrected.valid[[1, 0]]);
        assert_eq!(corrected.raster[[1, 1]], 0.0);
        assert!(!corrected.valid[[1, 1]]);
        assert!(corrected.valid[[0, 1]]);
    }

    #[test]
    fn test_flat_field_shape_mismatch() {
        let raw = Array2::<f32>::zeros((3, 3));
        let flat = Array2::<f32>::ones((3, 4));
        assert!(FlatFieldCorrector::new(flat).correct(&raw).is_err());
    }

    #[test]
    fn test_load_frame_folds_detector_mask() {
        let raw = Array2::from_elem((2, 2), 10i32);
        let mut flat = Array2::<f32>::ones((2, 2));
        flat[[0, 1]] = 0.0;
        let mut detector = Array2::from_elem((2, 2), true);
        detector[[1, 0]] = false;

        let frame = FlatFieldCorrector::new(flat)
            .load_frame(&raw, Some(&detector), FrameRole::Original)
            .unwrap();

        assert_eq!(frame.mask(), &array![[true, false], [false, true]]);
        assert_eq!(frame.raster()[[0, 1]], 0.0);
        assert_eq!(frame.raster()[[1, 1]], 10.0);
    }

    #[test]
    fn test_unity_gain_passthrough() {
        let raw = array![[1u8, 2], [3, 4]];
        let corrected = FlatFieldCorrector::unity().correct(&raw).unwrap();
        assert_eq!(corrected.raster, array![[1.0f32, 2.0], [3.0, 4.0]]);
        assert!(corrected.valid.iter().all(|&v| v));
    }
}
