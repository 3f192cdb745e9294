//! I/O modules for detector layouts, raw array files and session settings

pub mod detector;
pub mod raw;
pub mod settings;

pub use detector::{DetectorModel, GapLayout};
pub use raw::{MaskEncoding, MaskPolarity, RawPixelType};
pub use settings::{parse_offset_component, Settings};
