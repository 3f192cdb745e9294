//! Custom mask as an edit log.
//!
//! Each user action is a [`MaskEdit`] value. The current bitmap is the result
//! of replaying the log over a base mask, which makes undo/redo a matter of
//! moving edits between two stacks.

use crate::core::rasterize::{
    EditMode, Ellipse, MaskRasterizer, Point, Polygon, Rectangle, Smudge, SmudgeStroke,
};
use crate::types::{ensure_shape, GapFillResult, Shape, ValidityMask};
use std::sync::Arc;

/// One recorded mask edit
#[derive(Debug, Clone, PartialEq)]
pub enum MaskEdit {
    Ellipse { ellipse: Ellipse, mode: EditMode },
    Rectangle { rectangle: Rectangle, mode: EditMode },
    Polygon { polygon: Polygon, mode: EditMode },
    Smudge { smudge: Smudge, mode: EditMode },
    /// Merge a derived layer (e.g. a threshold mask) into the custom mask
    CommitLayer { layer: Arc<ValidityMask> },
    /// Reset every pixel to valid
    Clear,
}

impl MaskEdit {
    /// Check geometry and shapes without touching any bitmap
    pub fn validate(&self, shape: Shape) -> GapFillResult<()> {
        match self {
            MaskEdit::Ellipse { ellipse, .. } => ellipse.validate(),
            MaskEdit::Rectangle { rectangle, .. } => rectangle.validate(),
            MaskEdit::Polygon { polygon, .. } => polygon.validate(),
            MaskEdit::Smudge { smudge, .. } => smudge.validate(),
            MaskEdit::CommitLayer { layer } => ensure_shape("committed layer", shape, layer.dim()),
            MaskEdit::Clear => Ok(()),
        }
    }

    /// Apply to `mask`, returning the number of pixels changed
    pub fn apply(&self, mask: &mut ValidityMask) -> GapFillResult<usize> {
        match self {
            MaskEdit::Ellipse { ellipse, mode } => MaskRasterizer::apply_ellipse(mask, ellipse, *mode),
            MaskEdit::Rectangle { rectangle, mode } => {
                MaskRasterizer::apply_rectangle(mask, rectangle, *mode)
            }
            MaskEdit::Polygon { polygon, mode } => MaskRasterizer::apply_polygon(mask, polygon, *mode),
            MaskEdit::Smudge { smudge, mode } => MaskRasterizer::apply_smudge(mask, smudge, *mode),
            MaskEdit::CommitLayer { layer } => MaskRasterizer::commit_layer(mask, layer),
            MaskEdit::Clear => {
                let changed = mask.iter().filter(|&&v| !v).count();
                mask.fill(true);
                Ok(changed)
            }
        }
    }
}

/// Replay `edits` over `base`
pub fn render(base: &ValidityMask, edits: &[MaskEdit]) -> GapFillResult<ValidityMask> {
    let mut mask = base.clone();
    for edit in edits {
        edit.apply(&mut mask)?;
    }
    Ok(mask)
}

/// Editable custom mask for one frame
#[derive(Debug, Clone)]
pub struct MaskEditor {
    base: ValidityMask,
    edits: Vec<MaskEdit>,
    redo: Vec<MaskEdit>,
    current: ValidityMask,
    stroke: Option<SmudgeStroke>,
}

impl MaskEditor {
    /// Editor over an all-valid base of the given shape
    pub fn new(shape: Shape) -> Self {
        Self::with_base(MaskRasterizer::blank(shape))
    }

    pub fn with_base(base: ValidityMask) -> Self {
        Self {
            current: base.clone(),
            base,
            edits: Vec::new(),
            redo: Vec::new(),
            stroke: None,
        }
    }

    pub fn shape(&self) -> Shape {
        self.base.dim()
    }

    /// Bitmap after all recorded edits (plus a live stroke, if any)
    pub fn current(&self) -> &ValidityMask {
        &self.current
    }

    pub fn edits(&self) -> &[MaskEdit] {
        &self.edits
    }

    pub fn can_undo(&self) -> bool {
        !self.edits.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Record and apply an edit. Invalid edits are rejected before any state
    /// changes.
    pub fn apply(&mut self, edit: MaskEdit) -> GapFillResult<usize> {
        if let Err(e) = edit.validate(self.shape()) {
            log::warn!("Rejected mask edit: {}", e);
            return Err(e);
        }
        self.cancel_smudge()?;
        let changed = edit.apply(&mut self.current)?;
        self.edits.push(edit);
        self.redo.clear();
        Ok(changed)
    }

    pub fn ellipse(&mut self, ellipse: Ellipse, mode: EditMode) -> GapFillResult<usize> {
        self.apply(MaskEdit::Ellipse { ellipse, mode })
    }

    pub fn rectangle(&mut self, corner1: Point, corner2: Point, mode: EditMode) -> GapFillResult<usize> {
        self.apply(MaskEdit::Rectangle {
            rectangle: Rectangle::new(corner1, corner2),
            mode,
        })
    }

    pub fn polygon(&mut self, polygon: Polygon, mode: EditMode) -> GapFillResult<usize> {
        self.apply(MaskEdit::Polygon { polygon, mode })
    }

    pub fn commit_layer(&mut self, layer: ValidityMask) -> GapFillResult<usize> {
        self.apply(MaskEdit::CommitLayer {
            layer: Arc::new(layer),
        })
    }

    pub fn clear(&mut self) -> GapFillResult<usize> {
        self.apply(MaskEdit::Clear)
    }

    /// Start a freehand stroke; the first disc is painted right away
    pub fn begin_smudge(&mut self, start: Point, radius: f64, mode: EditMode) -> GapFillResult<()> {
        self.cancel_smudge()?;
        let stroke = SmudgeStroke::begin(&mut self.current, start, radius, mode)?;
        self.stroke = Some(stroke);
        Ok(())
    }

    /// Paint the segment to `point` for live preview. No-op without an active
    /// stroke.
    pub fn extend_smudge(&mut self, point: Point) -> GapFillResult<usize> {
        match self.stroke.as_mut() {
            Some(stroke) => stroke.extend(&mut self.current, point),
            None => Ok(0),
        }
    }

    /// Record the active stroke as a single undoable edit
    pub fn finish_smudge(&mut self) -> bool {
        let Some(stroke) = self.stroke.take() else {
            return false;
        };
        let mode = stroke.mode();
        self.edits.push(MaskEdit::Smudge {
            smudge: stroke.into_smudge(),
            mode,
        });
        self.redo.clear();
        true
    }

    /// Drop the active stroke and repaint without it
    pub fn cancel_smudge(&mut self) -> GapFillResult<()> {
        if self.stroke.take().is_some() {
            self.current = render(&self.base, &self.edits)?;
        }
        Ok(())
    }

    pub fn undo(&mut self) -> GapFillResult<bool> {
        self.cancel_smudge()?;
        let Some(edit) = self.edits.pop() else {
            return Ok(false);
        };
        self.redo.push(edit);
        self.current = render(&self.base, &self.edits)?;
        Ok(true)
    }

    pub fn redo(&mut self) -> GapFillResult<bool> {
        self.cancel_smudge()?;
        let Some(edit) = self.redo.pop() else {
            return Ok(false);
        };
        edit.apply(&mut self.current)?;
        self.edits.push(edit);
        Ok(true)
    }

    /// Start over from an imported mask; history is discarded
    pub fn replace_base(&mut self, base: ValidityMask) -> GapFillResult<()> {
        ensure_shape("imported mask", self.shape(), base.dim())?;
        self.current = base.clone();
        self.base = base;
        self.edits.clear();
        self.redo.clear();
        self.stroke = None;
        Ok(())
    }
}
