use crate::types::{ensure_shape, Frame, FrameRole, GapFillError, GapFillResult, Shape};

/// Where a route copies its frame to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Original,
    Move1,
    Move2,
    /// Every input slot receives the same frame
    All,
}

impl RouteTarget {
    fn roles(self) -> &'static [FrameRole] {
        match self {
            RouteTarget::Original => &[FrameRole::Original],
            RouteTarget::Move1 => &[FrameRole::Move1],
            RouteTarget::Move2 => &[FrameRole::Move2],
            RouteTarget::All => &FrameRole::SOURCES,
        }
    }
}

/// Where a route takes its frame from
#[derive(Debug, Clone)]
pub enum RouteSource {
    /// Frame currently held in another slot
    Slot(FrameRole),
    /// Freshly loaded exposure
    Exposure(Frame),
}

/// "Send to ..." as a value: copy `source` into `target`, overwriting it
#[derive(Debug, Clone)]
pub struct Route {
    pub source: RouteSource,
    pub target: RouteTarget,
}

impl Route {
    pub fn new(source: RouteSource, target: RouteTarget) -> Self {
        Self { source, target }
    }

    pub fn exposure(frame: Frame, target: RouteTarget) -> Self {
        Self::new(RouteSource::Exposure(frame), target)
    }

    pub fn slot(role: FrameRole, target: RouteTarget) -> Self {
        Self::new(RouteSource::Slot(role), target)
    }
}

/// The three input slots of a session, all of one shape
#[derive(Debug, Clone)]
pub struct FrameSlots {
    shape: Shape,
    original: Option<Frame>,
    move1: Option<Frame>,
    move2: Option<Frame>,
}

impl FrameSlots {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            original: None,
            move1: None,
            move2: None,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn get(&self, role: FrameRole) -> Option<&Frame> {
        match role {
            FrameRole::Original => self.original.as_ref(),
            FrameRole::Move1 => self.move1.as_ref(),
            FrameRole::Move2 => self.move2.as_ref(),
            FrameRole::GapFilled => None,
        }
    }

    fn slot_mut(&mut self, role: FrameRole) -> GapFillResult<&mut Option<Frame>> {
        match role {
            FrameRole::Original => Ok(&mut self.original),
            FrameRole::Move1 => Ok(&mut self.move1),
            FrameRole::Move2 => Ok(&mut self.move2),
            FrameRole::GapFilled => Err(GapFillError::InvalidParameter(
                "GapFilled is an output role, not an input slot".to_string(),
            )),
        }
    }

    /// Put `frame` into the slot for `role`, retagging it
    pub fn set(&mut self, role: FrameRole, frame: Frame) -> GapFillResult<()> {
        ensure_shape(&format!("{} slot", role), self.shape, frame.shape())?;
        *self.slot_mut(role)? = Some(frame.with_role(role));
        Ok(())
    }

    pub fn take(&mut self, role: FrameRole) -> Option<Frame> {
        self.slot_mut(role).ok().and_then(Option::take)
    }

    /// Execute a route. Pixel data is shared, never copied.
    pub fn route(&mut self, route: Route) -> GapFillResult<()> {
        let frame = match route.source {
            RouteSource::Exposure(frame) => frame,
            RouteSource::Slot(role) => self.get(role).cloned().ok_or_else(|| {
                GapFillError::MissingSource(format!("{} slot is empty", role))
            })?,
        };
        ensure_shape("routed frame", self.shape, frame.shape())?;

        log::debug!("Routing {} frame to {:?}", frame.role(), route.target);
        for &role in route.target.roles() {
            self.set(role, frame.clone())?;
        }
        Ok(())
    }

    /// Multi-selection send: first frame to Original, second to Move1, third
    /// to Move2. Move slots without a frame are cleared.
    pub fn distribute(&mut self, frames: Vec<Frame>) -> GapFillResult<()> {
        if frames.is_empty() {
            return Err(GapFillError::MissingSource(
                "No exposures selected".to_string(),
            ));
        }
        for frame in &frames {
            ensure_shape("distributed frame", self.shape, frame.shape())?;
        }
        if frames.len() > FrameRole::SOURCES.len() {
            log::warn!(
                "{} exposures selected; only the first {} are used",
                frames.len(),
                FrameRole::SOURCES.len()
            );
        }

        let mut frames = frames.into_iter();
        for role in FrameRole::SOURCES {
            match frames.next() {
                Some(frame) => self.set(role, frame)?,
                None => {
                    self.take(role);
                }
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.original = None;
        self.move1 = None;
        self.move2 = None;
    }
}
