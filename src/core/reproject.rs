use crate::types::{Frame, GapFillError, GapFillResult, Intensity, Offset, Raster, ValidityMask};
use ndarray::{Array2, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};

/// How an offset maps output pixels to source pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OffsetSense {
    /// `aligned[y, x] = source[y + dy, x + dx]`
    #[default]
    Forward,
    /// `aligned[y, x] = source[y - dy, x - dx]`
    Inverse,
}

impl OffsetSense {
    fn sign(self) -> f64 {
        match self {
            OffsetSense::Forward => 1.0,
            OffsetSense::Inverse => -1.0,
        }
    }
}

/// Resamples frames into the Original's coordinate system
#[derive(Debug, Clone, Copy)]
pub struct Reprojector {
    sense: OffsetSense,
    parallel: bool,
}

impl Default for Reprojector {
    fn default() -> Self {
        Self::new(OffsetSense::default())
    }
}

impl Reprojector {
    pub fn new(sense: OffsetSense) -> Self {
        Self {
            sense,
            parallel: cfg!(feature = "parallel"),
        }
    }

    /// Enable or disable row-parallel execution (requires the `parallel`
    /// feature; results are identical either way)
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel && cfg!(feature = "parallel");
        self
    }

    pub fn sense(&self) -> OffsetSense {
        self.sense
    }

    /// Align `frame` to the Original using `offset`.
    ///
    /// Output pixels whose source falls outside the frame are invalid with a
    /// 0.0 raster value. Sub-pixel offsets interpolate bilinearly, and an
    /// output pixel is valid only if every source tap with non-zero weight is
    /// valid.
    pub fn reproject(&self, frame: &Frame, offset: Offset) -> GapFillResult<Frame> {
        if !offset.is_finite() {
            return Err(GapFillError::InvalidParameter(format!(
                "Offset {} is not finite",
                offset
            )));
        }
        if offset.is_zero() {
            return Ok(frame.clone());
        }
        // Past a full frame plus one tap no source pixel can land in range
        let (rows, cols) = frame.shape();
        if offset.dx.abs() >= cols as f64 + 1.0 || offset.dy.abs() >= rows as f64 + 1.0 {
            log::debug!(
                "Offset {} moves {} entirely outside the {}x{} frame",
                offset,
                frame.role(),
                rows,
                cols
            );
            return Ok(Frame::empty(frame.shape(), frame.role()));
        }

        let sign = self.sense.sign();
        let sampler = match offset.as_integer() {
            Some((dx, dy)) => Sampler::Integer {
                dx: dx * sign as isize,
                dy: dy * sign as isize,
            },
            None => Sampler::Bilinear {
                dx: offset.dx * sign,
                dy: offset.dy * sign,
            },
        };
        log::debug!(
            "Reprojecting {} by {} ({:?}, {:?})",
            frame.role(),
            offset,
            self.sense,
            sampler
        );

        let shape = frame.shape();
        let mut raster: Raster = Array2::zeros(shape);
        let mut mask: ValidityMask = Array2::from_elem(shape, false);
        let source = Source {
            raster: frame.raster(),
            mask: frame.mask(),
        };

        if self.parallel {
            self.fill_parallel(&source, &sampler, &mut raster, &mut mask);
        } else {
            for (y, (r, m)) in raster
                .axis_iter_mut(Axis(0))
                .zip(mask.axis_iter_mut(Axis(0)))
                .enumerate()
            {
                fill_row(&source, &sampler, y, r, m);
            }
        }

        let aligned = Frame::new(raster, mask, frame.role())?;
        log::debug!(
            "Aligned {} keeps {} of {} valid pixels",
            frame.role(),
            aligned.valid_pixels(),
            frame.valid_pixels()
        );
        Ok(aligned)
    }

    #[cfg(feature = "parallel")]
    fn fill_parallel(
        &self,
        source: &Source<'_>,
        sampler: &Sampler,
        raster: &mut Raster,
        mask: &mut ValidityMask,
    ) {
        use rayon::prelude::*;

        raster
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(mask.axis_iter_mut(Axis(0)).into_par_iter())
            .enumerate()
            .for_each(|(y, (r, m))| fill_row(source, sampler, y, r, m));
    }

    #[cfg(not(feature = "parallel"))]
    fn fill_parallel(
        &self,
        source: &Source<'_>,
        sampler: &Sampler,
        raster: &mut Raster,
        mask: &mut ValidityMask,
    ) {
        for (y, (r, m)) in raster
            .axis_iter_mut(Axis(0))
            .zip(mask.axis_iter_mut(Axis(0)))
            .enumerate()
        {
            fill_row(source, sampler, y, r, m);
        }
    }
}

struct Source<'a> {
    raster: &'a Raster,
    mask: &'a ValidityMask,
}

impl Source<'_> {
    /// Value at signed indices if in bounds and valid
    #[inline]
    fn valid_at(&self, y: isize, x: isize) -> Option<Intensity> {
        let (rows, cols) = self.raster.dim();
        if y < 0 || x < 0 || y as usize >= rows || x as usize >= cols {
            return None;
        }
        let idx = [y as usize, x as usize];
        if self.mask[idx] {
            Some(self.raster[idx])
        } else {
            None
        }
    }
}

/// Source-space displacement already multiplied by the offset sense
#[derive(Debug, Clone, Copy)]
enum Sampler {
    Integer { dx: isize, dy: isize },
    Bilinear { dx: f64, dy: f64 },
}

impl Sampler {
    fn sample(&self, source: &Source<'_>, y: usize, x: usize) -> Option<Intensity> {
        match *self {
            Sampler::Integer { dx, dy } => source.valid_at(y as isize + dy, x as isize + dx),
            Sampler::Bilinear { dx, dy } => {
                let sx = x as f64 + dx;
                let sy = y as f64 + dy;
                let x0 = sx.floor();
                let y0 = sy.floor();
                let fx = sx - x0;
                let fy = sy - y0;
                let (x0, y0) = (x0 as isize, y0 as isize);

                let taps = [
                    (y0, x0, (1.0 - fx) * (1.0 - fy)),
                    (y0, x0 + 1, fx * (1.0 - fy)),
                    (y0 + 1, x0, (1.0 - fx) * fy),
                    (y0 + 1, x0 + 1, fx * fy),
                ];

                let mut acc = 0.0f64;
                for (ty, tx, weight) in taps {
                    if weight == 0.0 {
                        continue;
                    }
                    acc += weight * source.valid_at(ty, tx)? as f64;
                }
                Some(acc as Intensity)
            }
        }
    }
}

fn fill_row(
    source: &Source<'_>,
    sampler: &Sampler,
    y: usize,
    mut raster_row: ArrayViewMut1<'_, Intensity>,
    mut mask_row: ArrayViewMut1<'_, bool>,
) {
    for x in 0..raster_row.len() {
        if let Some(value) = sampler.sample(source, y, x) {
            raster_row[x] = value;
            mask_row[x] = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameRole;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn ramp(rows: usize, cols: usize) -> Frame {
        let raster = Array2::from_shape_fn((rows, cols), |(y, x)| (y * 10 + x) as f32);
        Frame::all_valid(raster, FrameRole::Move1)
    }

    #[test]
    fn test_zero_offset_is_identity() {
        let frame = ramp(4, 5);
        let aligned = Reprojector::default().reproject(&frame, Offset::ZERO).unwrap();
        assert!(aligned.shares_data_with(&frame));
    }

    #[test]
    fn test_integer_forward_shift() {
        let frame = ramp(3, 4);
        let aligned = Reprojector::new(OffsetSense::Forward)
            .with_parallel(false)
            .reproject(&frame, Offset::new(1.0, -1.0))
            .unwrap();

        // aligned[y, x] = source[y - 1, x + 1]
        assert_eq!(aligned.mask().row(0).to_vec(), vec![false; 4]);
        assert_eq!(aligned.raster()[[1, 0]], 1.0);
        assert_eq!(aligned.raster()[[2, 2]], 13.0);
        assert!(!aligned.mask()[[1, 3]]);
        assert_eq!(aligned.raster()[[1, 3]], 0.0);
        assert_eq!(aligned.valid_pixels(), 6);
        assert_eq!(aligned.role(), FrameRole::Move1);
    }

    #[test]
    fn test_inverse_sense_out_of_bounds_invalid() {
        let frame = ramp(4, 4);
        let (dx, dy) = (2isize, 1isize);
        let aligned = Reprojector::new(OffsetSense::Inverse)
            .reproject(&frame, Offset::new(dx as f64, dy as f64))
            .unwrap();

        for ((y, x), &valid) in aligned.mask().indexed_iter() {
            let sx = x as isize - dx;
            let sy = y as isize - dy;
            let in_bounds = (0..4).contains(&sx) && (0..4).contains(&sy);
            assert_eq!(valid, in_bounds);
            if in_bounds {
                assert_eq!(aligned.raster()[[y, x]], frame.raster()[[sy as usize, sx as usize]]);
            }
        }
    }

    #[test]
    fn test_masked_source_pixels_stay_masked() {
        let mut mask = Array2::from_elem((3, 3), true);
        mask[[1, 2]] = false;
        let frame = Frame::new(Array2::ones((3, 3)), mask, FrameRole::Move2).unwrap();

        let aligned = Reprojector::default()
            .reproject(&frame, Offset::new(1.0, 0.0))
            .unwrap();
        assert!(!aligned.mask()[[1, 1]]);
        assert!(aligned.mask()[[1, 0]]);
    }

    #[test]
    fn test_subpixel_bilinear_interpolation() {
        let frame = Frame::all_valid(array![[0.0f32, 10.0, 20.0], [30.0, 40.0, 50.0]], FrameRole::Move1);
        let aligned = Reprojector::default()
            .reproject(&frame, Offset::new(0.5, 0.0))
            .unwrap();

        assert_relative_eq!(aligned.raster()[[0, 0]], 5.0);
        assert_relative_eq!(aligned.raster()[[1, 1]], 45.0);
        // Right-hand tap falls off the frame
        assert!(!aligned.mask()[[0, 2]]);
        assert!(aligned.mask()[[0, 1]]);
    }

    #[test]
    fn test_subpixel_mask_is_conservative() {
        let mut mask = Array2::from_elem((3, 3), true);
        mask[[1, 1]] = false;
        let frame = Frame::new(Array2::ones((3, 3)), mask, FrameRole::Move1).unwrap();

        let aligned = Reprojector::default()
            .reproject(&frame, Offset::new(0.25, 0.25))
            .unwrap();

        // Every output pixel touching source (1, 1) is invalid
        assert!(!aligned.mask()[[0, 0]]);
        assert!(!aligned.mask()[[0, 1]]);
        assert!(!aligned.mask()[[1, 0]]);
        assert!(!aligned.mask()[[1, 1]]);
        assert_eq!(aligned.raster()[[0, 0]], 0.0);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut mask = Array2::from_elem((17, 23), true);
        mask[[5, 7]] = false;
        mask[[12, 3]] = false;
        let raster = Array2::from_shape_fn((17, 23), |(y, x)| ((y * 31 + x * 7) % 13) as f32);
        let frame = Frame::new(raster, mask, FrameRole::Move2).unwrap();

        for offset in [Offset::new(3.0, -2.0), Offset::new(-1.3, 2.7)] {
            let seq = Reprojector::default().with_parallel(false).reproject(&frame, offset).unwrap();
            let par = Reprojector::default().with_parallel(true).reproject(&frame, offset).unwrap();
            assert_eq!(seq.raster(), par.raster());
            assert_eq!(seq.mask(), par.mask());
        }
    }

    #[test]
    fn test_non_finite_offset_rejected() {
        let frame = ramp(2, 2);
        assert!(Reprojector::default()
            .reproject(&frame, Offset::new(f64::NAN, 0.0))
            .is_err());
    }

    #[test]
    fn test_offset_beyond_frame_gives_empty_frame() {
        let frame = ramp(3, 4);
        let cases = [
            (OffsetSense::Forward, Offset::new(1e300, 0.0)),
            (OffsetSense::Inverse, Offset::new(-1e300, 0.0)),
            (OffsetSense::Forward, Offset::new(0.5, 1e300)),
            (OffsetSense::Inverse, Offset::new(f64::MAX, -f64::MAX)),
        ];

        for (sense, offset) in cases {
            for parallel in [false, true] {
                let aligned = Reprojector::new(sense)
                    .with_parallel(parallel)
                    .reproject(&frame, offset)
                    .unwrap();
                assert_eq!(aligned.shape(), (3, 4));
                assert_eq!(aligned.role(), FrameRole::Move1);
                assert_eq!(aligned.valid_pixels(), 0);
                assert!(aligned.raster().iter().all(|&v| v == 0.0));
            }
        }
    }

    #[test]
    fn test_offset_of_one_frame_width_keeps_nothing() {
        let frame = ramp(3, 4);
        let aligned = Reprojector::default()
            .reproject(&frame, Offset::new(4.0, 0.0))
            .unwrap();
        assert_eq!(aligned.valid_pixels(), 0);

        let aligned = Reprojector::default()
            .reproject(&frame, Offset::new(3.5, 0.0))
            .unwrap();
        assert_eq!(aligned.valid_pixels(), 0);

        let aligned = Reprojector::default()
            .reproject(&frame, Offset::new(3.0, 0.0))
            .unwrap();
        assert_eq!(aligned.valid_pixels(), 3);
        assert_eq!(aligned.raster()[[2, 0]], 23.0);
    }
}
