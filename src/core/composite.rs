use crate::types::{
    ensure_shape, Frame, FrameRole, GapFillResult, Intensity, Raster, Shape, ValidityMask,
};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Which input supplied an output pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelSource {
    Original,
    Move1,
    Move2,
    /// No input was valid; the output pixel is residual
    Unfilled,
}

/// Statistics for one compositing pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeReport {
    pub total_pixels: usize,
    pub from_original: usize,
    pub from_move1: usize,
    pub from_move2: usize,
    pub residual_pixels: usize,
    /// Percentage of output pixels holding real data
    pub coverage_percent: f64,
    /// True when no input contributed a single valid pixel
    pub missing_source: bool,
    /// Number of Move frames that took part
    pub moves_used: usize,
    pub processing_time: String,
}

/// Gap-filled output with its provenance
#[derive(Debug, Clone)]
pub struct Composite {
    /// Output frame (role `GapFilled`); its mask is the residual valid set
    pub frame: Frame,
    /// Per-pixel record of which input was used
    pub provenance: Array2<PixelSource>,
    pub report: CompositeReport,
}

impl Composite {
    /// `false` wherever no input could fill the pixel
    pub fn residual_mask(&self) -> &ValidityMask {
        self.frame.mask()
    }

    pub fn is_complete(&self) -> bool {
        self.report.residual_pixels == 0
    }
}

/// Fixed-priority per-pixel arbitration: Original, then Move1, then Move2.
///
/// Move frames must already be reprojected into the Original's coordinates
/// and carry their effective masks.
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    parallel: bool,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            parallel: cfg!(feature = "parallel"),
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel && cfg!(feature = "parallel");
        self
    }

    pub fn compose(
        &self,
        original: &Frame,
        move1: Option<&Frame>,
        move2: Option<&Frame>,
    ) -> GapFillResult<Composite> {
        let shape = original.shape();
        log::info!(
            "🧩 Compositing {}x{} frame with {} move exposure(s)",
            shape.0,
            shape.1,
            move1.iter().chain(move2.iter()).count()
        );

        for (name, frame) in [("Move1 frame", move1), ("Move2 frame", move2)] {
            if let Some(frame) = frame {
                ensure_shape(name, shape, frame.shape())?;
            }
        }

        let absent = AbsentInput::new(shape);
        let (m1_raster, m1_mask) = absent.or(move1);
        let (m2_raster, m2_mask) = absent.or(move2);

        let (provenance, raster) = if self.parallel {
            compose_parallel(original, m1_raster, m1_mask, m2_raster, m2_mask)
        } else {
            let provenance = Zip::from(original.mask())
                .and(m1_mask)
                .and(m2_mask)
                .map_collect(|&o, &a, &b| arbitrate(o, a, b));
            let raster = Zip::from(&provenance)
                .and(original.raster())
                .and(m1_raster)
                .and(m2_raster)
                .map_collect(|&s, &o, &a, &b| pick(s, o, a, b));
            (provenance, raster)
        };

        let mask = provenance.mapv(|s| s != PixelSource::Unfilled);
        let report = build_report(&provenance, move1.iter().chain(move2.iter()).count());

        if report.missing_source {
            log::warn!("No valid source pixels; gap-filled output is entirely invalid");
        } else if report.residual_pixels > 0 {
            log::warn!("{} pixels remain unfilled after compositing", report.residual_pixels);
        }
        log::debug!(
            "Pixel sources: original={}, move1={}, move2={}",
            report.from_original,
            report.from_move1,
            report.from_move2
        );
        log::info!("✅ Compositing completed: {:.1}% coverage", report.coverage_percent);

        Ok(Composite {
            frame: Frame::new(raster, mask, FrameRole::GapFilled)?,
            provenance,
            report,
        })
    }
}

#[inline]
fn arbitrate(original: bool, move1: bool, move2: bool) -> PixelSource {
    if original {
        PixelSource::Original
    } else if move1 {
        PixelSource::Move1
    } else if move2 {
        PixelSource::Move2
    } else {
        PixelSource::Unfilled
    }
}

#[inline]
fn pick(source: PixelSource, original: Intensity, move1: Intensity, move2: Intensity) -> Intensity {
    match source {
        PixelSource::Original => original,
        PixelSource::Move1 => move1,
        PixelSource::Move2 => move2,
        PixelSource::Unfilled => 0.0,
    }
}

#[cfg(feature = "parallel")]
fn compose_parallel(
    original: &Frame,
    m1_raster: &Raster,
    m1_mask: &ValidityMask,
    m2_raster: &Raster,
    m2_mask: &ValidityMask,
) -> (Array2<PixelSource>, Raster) {
    let provenance = Zip::from(original.mask())
        .and(m1_mask)
        .and(m2_mask)
        .par_map_collect(|&o, &a, &b| arbitrate(o, a, b));
    let raster = Zip::from(&provenance)
        .and(original.raster())
        .and(m1_raster)
        .and(m2_raster)
        .par_map_collect(|&s, &o, &a, &b| pick(s, o, a, b));
    (provenance, raster)
}

#[cfg(not(feature = "parallel"))]
fn compose_parallel(
    original: &Frame,
    m1_raster: &Raster,
    m1_mask: &ValidityMask,
    m2_raster: &Raster,
    m2_mask: &ValidityMask,
) -> (Array2<PixelSource>, Raster) {
    let provenance = Zip::from(original.mask())
        .and(m1_mask)
        .and(m2_mask)
        .map_collect(|&o, &a, &b| arbitrate(o, a, b));
    let raster = Zip::from(&provenance)
        .and(original.raster())
        .and(m1_raster)
        .and(m2_raster)
        .map_collect(|&s, &o, &a, &b| pick(s, o, a, b));
    (provenance, raster)
}

/// Stand-in arrays for an absent Move frame: never valid
struct AbsentInput {
    raster: Raster,
    mask: ValidityMask,
}

impl AbsentInput {
    fn new(shape: Shape) -> Self {
        Self {
            raster: Array2::zeros(shape),
            mask: Array2::from_elem(shape, false),
        }
    }

    fn or<'a>(&'a self, frame: Option<&'a Frame>) -> (&'a Raster, &'a ValidityMask) {
        match frame {
            Some(frame) => (frame.raster(), frame.mask()),
            None => (&self.raster, &self.mask),
        }
    }
}

fn build_report(provenance: &Array2<PixelSource>, moves_used: usize) -> CompositeReport {
    let (mut from_original, mut from_move1, mut from_move2, mut residual) = (0, 0, 0, 0);
    for source in provenance.iter() {
        match source {
            PixelSource::Original => from_original += 1,
            PixelSource::Move1 => from_move1 += 1,
            PixelSource::Move2 => from_move2 += 1,
            PixelSource::Unfilled => residual += 1,
        }
    }
    let total = provenance.len();
    let coverage_percent = if total > 0 {
        (total - residual) as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    CompositeReport {
        total_pixels: total,
        from_original,
        from_move1,
        from_move2,
        residual_pixels: residual,
        coverage_percent,
        missing_source: residual == total,
        moves_used,
        processing_time: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    }
}
