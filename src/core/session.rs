use crate::core::combine::MaskCombinator;
use crate::core::composite::{Composite, Compositor};
use crate::core::flatfield::FlatFieldCorrector;
use crate::core::mask_edit::MaskEditor;
use crate::core::rasterize::ThresholdSpec;
use crate::core::reproject::{OffsetSense, Reprojector};
use crate::core::routing::{FrameSlots, Route};
use crate::io::detector::DetectorModel;
use crate::io::raw::{self, RawPixelType};
use crate::io::settings::{parse_offset_component, Settings};
use crate::types::{
    ensure_shape, validate_pixel_size, Frame, FrameRole, GapFillError, GapFillResult, LengthUnit,
    Offset, Raster, Shape, ValidityMask,
};
use num_traits::ToPrimitive;

/// Gap-fill session parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GapFillConfig {
    /// Native raster shape shared by every frame in the session
    pub shape: Shape,
    /// Detector pixel pitch, used for millimeter offsets
    pub pixel_size_mm: f64,
    /// How Move offsets map output pixels to source pixels
    pub offset_sense: OffsetSense,
    /// Threshold limits applied on every gap-fill run
    pub threshold: ThresholdSpec,
    /// Row-parallel reprojection and compositing (needs the `parallel` feature)
    pub parallel: bool,
}

impl Default for GapFillConfig {
    fn default() -> Self {
        Self::for_detector(DetectorModel::Eiger1M)
    }
}

impl GapFillConfig {
    pub fn new(shape: Shape, pixel_size_mm: f64) -> Self {
        Self {
            shape,
            pixel_size_mm,
            offset_sense: OffsetSense::default(),
            threshold: ThresholdSpec::default(),
            parallel: cfg!(feature = "parallel"),
        }
    }

    pub fn for_detector(model: DetectorModel) -> Self {
        Self::new(model.shape(), model.pixel_size_mm())
    }

    /// Detector shape, pixel pitch and thresholds from a settings document
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            pixel_size_mm: settings.pixel_size_mm(),
            threshold: settings.threshold_spec(),
            ..Self::for_detector(settings.detector)
        }
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_offset_sense(mut self, sense: OffsetSense) -> Self {
        self.offset_sense = sense;
        self
    }

    pub fn with_threshold(mut self, threshold: ThresholdSpec) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn validate(&self) -> GapFillResult<()> {
        if self.shape.0 == 0 || self.shape.1 == 0 {
            return Err(GapFillError::InvalidParameter(format!(
                "Raster shape must be non-empty, got {:?}",
                self.shape
            )));
        }
        validate_pixel_size(self.pixel_size_mm)
    }
}

/// Why a Move frame did not take part in a gap-fill run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptySlot,
    OffsetNotSet,
}

/// Result of one "Gap Fill" run
#[derive(Debug, Clone)]
pub struct GapFillOutcome {
    pub composite: Composite,
    /// Move roles that were reprojected and composited
    pub used: Vec<FrameRole>,
    pub skipped: Vec<(FrameRole, SkipReason)>,
}

/// Everything the "Gap Fill" action works from: frame slots, per-frame custom
/// masks, Move offsets and the instrument-level mask and flat field.
#[derive(Debug, Clone)]
pub struct GapFillSession {
    config: GapFillConfig,
    slots: FrameSlots,
    detector_mask: Option<ValidityMask>,
    corrector: FlatFieldCorrector,
    editors: [MaskEditor; 3],
    move1_offset: Offset,
    move2_offset: Offset,
}

fn source_index(role: FrameRole) -> GapFillResult<usize> {
    match role {
        FrameRole::Original => Ok(0),
        FrameRole::Move1 => Ok(1),
        FrameRole::Move2 => Ok(2),
        FrameRole::GapFilled => Err(GapFillError::InvalidParameter(
            "GapFilled is an output role, not an input slot".to_string(),
        )),
    }
}

impl GapFillSession {
    pub fn new(config: GapFillConfig) -> GapFillResult<Self> {
        config.validate()?;
        let shape = config.shape;
        log::info!(
            "Creating gap-fill session: {}x{} pixels, {} mm pitch",
            shape.0,
            shape.1,
            config.pixel_size_mm
        );

        Ok(Self {
            slots: FrameSlots::new(shape),
            detector_mask: None,
            corrector: FlatFieldCorrector::unity(),
            editors: [
                MaskEditor::new(shape),
                MaskEditor::new(shape),
                MaskEditor::new(shape),
            ],
            move1_offset: Offset::ZERO,
            move2_offset: Offset::ZERO,
            config,
        })
    }

    /// Session configured from a settings document.
    ///
    /// The detector mask comes from the settings' mask file when one is named
    /// (one byte per pixel, read with the settings' mask polarity), otherwise
    /// from the detector's gap layout.
    /// A named flat-field file is read as little-endian `f32`.
    pub fn from_settings(settings: &Settings) -> GapFillResult<Self> {
        let mut session = Self::new(GapFillConfig::from_settings(settings))?;
        let shape = session.config.shape;

        let detector_mask = match settings.mask_path() {
            Some(path) => raw::import_mask(path, shape, settings.mask_polarity)?,
            None => settings.detector.detector_mask(),
        };
        session.set_detector_mask(Some(detector_mask))?;

        if let Some(path) = settings.flatfield_path() {
            let flat = raw::read_raster(path, shape, RawPixelType::F32)?;
            session.set_flat_field(Some(flat))?;
        }

        let (move1, move2) = settings.offsets()?;
        session.set_offset(FrameRole::Move1, move1)?;
        session.set_offset(FrameRole::Move2, move2)?;
        Ok(session)
    }

    pub fn config(&self) -> &GapFillConfig {
        &self.config
    }

    pub fn shape(&self) -> Shape {
        self.config.shape
    }

    pub fn set_threshold(&mut self, threshold: ThresholdSpec) {
        self.config.threshold = threshold;
    }

    pub fn set_offset_sense(&mut self, sense: OffsetSense) {
        self.config.offset_sense = sense;
    }

    pub fn slots(&self) -> &FrameSlots {
        &self.slots
    }

    pub fn frame(&self, role: FrameRole) -> Option<&Frame> {
        self.slots.get(role)
    }

    pub fn detector_mask(&self) -> Option<&ValidityMask> {
        self.detector_mask.as_ref()
    }

    /// Instrument mask folded into every exposure loaded afterwards
    pub fn set_detector_mask(&mut self, mask: Option<ValidityMask>) -> GapFillResult<()> {
        if let Some(mask) = &mask {
            ensure_shape("detector mask", self.config.shape, mask.dim())?;
        }
        self.detector_mask = mask;
        Ok(())
    }

    /// Gain map for subsequent loads; `None` means unity gain
    pub fn set_flat_field(&mut self, flat_field: Option<Raster>) -> GapFillResult<()> {
        self.corrector = match flat_field {
            Some(flat) => {
                ensure_shape("flat field", self.config.shape, flat.dim())?;
                FlatFieldCorrector::new(flat)
            }
            None => FlatFieldCorrector::unity(),
        };
        Ok(())
    }

    /// Flat-field correct a raw exposure and put it in the slot for `role`
    pub fn load_exposure<T>(&mut self, raw: &ndarray::Array2<T>, role: FrameRole) -> GapFillResult<()>
    where
        T: ToPrimitive + Sync,
    {
        source_index(role)?;
        ensure_shape("raw exposure", self.config.shape, raw.dim())?;
        let frame = self
            .corrector
            .load_frame(raw, self.detector_mask.as_ref(), role)?;
        self.slots.set(role, frame)
    }

    /// Correct a raw exposure without assigning it, for use with [`Route`]
    pub fn correct_exposure<T>(&self, raw: &ndarray::Array2<T>) -> GapFillResult<Frame>
    where
        T: ToPrimitive + Sync,
    {
        ensure_shape("raw exposure", self.config.shape, raw.dim())?;
        self.corrector
            .load_frame(raw, self.detector_mask.as_ref(), FrameRole::Original)
    }

    pub fn route(&mut self, route: Route) -> GapFillResult<()> {
        self.slots.route(route)
    }

    pub fn distribute(&mut self, frames: Vec<Frame>) -> GapFillResult<()> {
        self.slots.distribute(frames)
    }

    pub fn offset(&self, role: FrameRole) -> Offset {
        match role {
            FrameRole::Move1 => self.move1_offset,
            FrameRole::Move2 => self.move2_offset,
            _ => Offset::ZERO,
        }
    }

    /// Set a Move offset in pixels. The Original's offset is fixed at zero.
    pub fn set_offset(&mut self, role: FrameRole, offset: Offset) -> GapFillResult<()> {
        if !offset.is_finite() {
            return Err(GapFillError::InvalidParameter(format!(
                "Offset {} for {} is not finite",
                offset, role
            )));
        }
        match role {
            FrameRole::Move1 => self.move1_offset = offset,
            FrameRole::Move2 => self.move2_offset = offset,
            FrameRole::Original if offset.is_zero() => {}
            _ => {
                return Err(GapFillError::InvalidParameter(format!(
                    "{} has no adjustable offset",
                    role
                )))
            }
        }
        log::debug!("{} offset set to {}", role, offset);
        Ok(())
    }

    /// Set a Move offset from text fields such as `"0.225 mm"` or `"-4"`
    pub fn set_offset_text(
        &mut self,
        role: FrameRole,
        dx: &str,
        dy: &str,
        default_unit: LengthUnit,
    ) -> GapFillResult<()> {
        let pixel_size = self.config.pixel_size_mm;
        let offset = Offset::new(
            parse_offset_component(dx, default_unit, pixel_size)?,
            parse_offset_component(dy, default_unit, pixel_size)?,
        );
        self.set_offset(role, offset)
    }

    pub fn editor(&self, role: FrameRole) -> GapFillResult<&MaskEditor> {
        Ok(&self.editors[source_index(role)?])
    }

    /// Custom-mask editor for an input role
    pub fn editor_mut(&mut self, role: FrameRole) -> GapFillResult<&mut MaskEditor> {
        Ok(&mut self.editors[source_index(role)?])
    }

    /// Merge the current threshold layer of `role`'s raster into its custom
    /// mask as one undoable edit
    pub fn commit_threshold(&mut self, role: FrameRole) -> GapFillResult<usize> {
        let index = source_index(role)?;
        let frame = self
            .slots
            .get(role)
            .ok_or_else(|| GapFillError::MissingSource(format!("{} slot is empty", role)))?;
        match self.config.threshold.layer(frame.raster()) {
            Some(layer) => self.editors[index].commit_layer(layer),
            None => Ok(0),
        }
    }

    /// Frame mask ∧ detector mask ∧ custom mask ∧ threshold layer for
    /// `role`, or `None` when its slot is empty.
    ///
    /// The detector mask is applied here as well as at load time, so a mask
    /// set after the exposure was loaded still takes effect.
    pub fn effective_mask(&self, role: FrameRole) -> GapFillResult<Option<ValidityMask>> {
        let index = source_index(role)?;
        let Some(frame) = self.slots.get(role) else {
            return Ok(None);
        };
        let threshold = self.config.threshold.layer(frame.raster());
        let combinator = MaskCombinator::new(self.config.shape);
        combinator
            .combine_layers(&[
                Some(frame.mask()),
                self.detector_mask.as_ref(),
                Some(self.editors[index].current()),
                threshold.as_ref(),
            ])
            .map(Some)
    }

    fn effective_frame(&self, role: FrameRole) -> GapFillResult<Option<Frame>> {
        match (self.slots.get(role), self.effective_mask(role)?) {
            (Some(frame), Some(mask)) => frame.with_mask(mask).map(Some),
            _ => Ok(None),
        }
    }

    /// Run the gap-fill pipeline: combine masks, reproject the Move frames
    /// into the Original's coordinates and composite them by priority.
    pub fn gap_fill(&self) -> GapFillResult<GapFillOutcome> {
        log::info!("🔗 Starting gap fill");
        let shape = self.config.shape;

        let original = match self.effective_frame(FrameRole::Original)? {
            Some(frame) => frame,
            None => {
                log::warn!("Original slot is empty; output will be entirely invalid");
                Frame::empty(shape, FrameRole::Original)
            }
        };

        let reprojector =
            Reprojector::new(self.config.offset_sense).with_parallel(self.config.parallel);
        let mut aligned: [Option<Frame>; 2] = [None, None];
        let mut used = Vec::new();
        let mut skipped = Vec::new();

        for (slot, role) in [FrameRole::Move1, FrameRole::Move2].into_iter().enumerate() {
            let Some(frame) = self.effective_frame(role)? else {
                log::debug!("{} slot is empty; skipping", role);
                skipped.push((role, SkipReason::EmptySlot));
                continue;
            };
            let offset = self.offset(role);
            if offset.is_zero() {
                log::warn!("{} offset is not set; skipping {} frame", role, role);
                skipped.push((role, SkipReason::OffsetNotSet));
                continue;
            }
            log::info!("Reprojecting {} by {}", role, offset);
            aligned[slot] = Some(reprojector.reproject(&frame, offset)?);
            used.push(role);
        }

        let [move1, move2] = &aligned;
        let composite = Compositor::new()
            .with_parallel(self.config.parallel)
            .compose(&original, move1.as_ref(), move2.as_ref())?;

        Ok(GapFillOutcome {
            composite,
            used,
            skipped,
        })
    }

    /// Empty every slot and reset the custom masks
    pub fn reset(&mut self) {
        let shape = self.config.shape;
        self.slots.clear();
        self.editors = [
            MaskEditor::new(shape),
            MaskEditor::new(shape),
            MaskEditor::new(shape),
        ];
    }
}
