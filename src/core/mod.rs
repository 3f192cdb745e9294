//! Core gap-filling modules

pub mod flatfield;
pub mod rasterize;
pub mod mask_edit;
pub mod combine;
pub mod reproject;
pub mod composite;
pub mod routing;
pub mod session;

// Re-export main types
pub use flatfield::{CorrectedRaster, FlatFieldCorrector};
pub use rasterize::{
    EditMode, Ellipse, MaskRasterizer, Point, Polygon, PolygonBuilder, Rectangle, Smudge,
    SmudgeStroke, ThresholdDirection, ThresholdSpec,
};
pub use mask_edit::{MaskEdit, MaskEditor};
pub use combine::MaskCombinator;
pub use reproject::{OffsetSense, Reprojector};
pub use composite::{Composite, CompositeReport, Compositor, PixelSource};
pub use routing::{FrameSlots, Route, RouteSource, RouteTarget};
pub use session::{GapFillConfig, GapFillOutcome, GapFillSession, SkipReason};
