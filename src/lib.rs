//! gapfiller: detector gap filling from shifted exposures
//!
//! Hybrid pixel detectors lose data in the gaps between their modules. Taking
//! extra exposures with the detector displaced by a few pixels and compositing
//! them back into the reference frame recovers those pixels. This library
//! covers the processing side of that workflow: flat-field correction, mask
//! editing, offset reprojection and priority compositing.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types
pub use types::{
    Frame, FrameRole, GapFillError, GapFillResult, Intensity, LengthUnit, Offset, Raster, Shape,
    ValidityMask,
};

pub use core::{Compositor, FlatFieldCorrector, GapFillConfig, GapFillSession, MaskCombinator, Reprojector};
pub use io::{DetectorModel, Settings};
