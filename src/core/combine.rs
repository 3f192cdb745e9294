use crate::types::{ensure_shape, GapFillResult, Shape, ValidityMask};
use ndarray::{Array2, Zip};

/// Merges mask layers into one effective validity mask.
///
/// A pixel is usable only if every present layer marks it valid; absent
/// layers count as all-valid.
#[derive(Debug, Clone, Copy)]
pub struct MaskCombinator {
    shape: Shape,
}

impl MaskCombinator {
    pub fn new(shape: Shape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Effective mask from the detector, custom and threshold layers
    pub fn combine(
        &self,
        detector: Option<&ValidityMask>,
        custom: Option<&ValidityMask>,
        threshold: Option<&ValidityMask>,
    ) -> GapFillResult<ValidityMask> {
        self.combine_layers(&[detector, custom, threshold])
    }

    /// Effective mask from any number of optional layers
    pub fn combine_layers(&self, layers: &[Option<&ValidityMask>]) -> GapFillResult<ValidityMask> {
        let mut effective = Array2::from_elem(self.shape, true);

        for (index, layer) in layers.iter().enumerate() {
            let Some(layer) = layer else {
                continue;
            };
            ensure_shape(&format!("mask layer {}", index), self.shape, layer.dim())?;
            Zip::from(&mut effective)
                .and(*layer)
                .for_each(|e, &l| *e = *e && l);
        }

        log::debug!(
            "Combined {} mask layers: {} invalid pixels",
            layers.iter().filter(|l| l.is_some()).count(),
            effective.iter().filter(|&&v| !v).count()
        );
        Ok(effective)
    }
}
