use crate::types::{GapFillError, Shape, ValidityMask};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Hybrid pixel detectors with known module gap layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectorModel {
    Eiger1M,
    Eiger4M,
    Eiger9M,
    Eiger16M,
    Pilatus1M,
    Pilatus2M,
    Pilatus300K,
    #[serde(rename = "Pilatus300K-W")]
    Pilatus300KW,
}

/// Module gap geometry: native shape plus inclusive row and column bands
#[derive(Debug, Clone, Copy)]
pub struct GapLayout {
    pub shape: Shape,
    pub row_gaps: &'static [(usize, usize)],
    pub col_gaps: &'static [(usize, usize)],
}

const EIGER_PIXEL_MM: f64 = 0.075;
const PILATUS_PIXEL_MM: f64 = 0.172;

impl DetectorModel {
    pub const ALL: [DetectorModel; 8] = [
        DetectorModel::Eiger1M,
        DetectorModel::Eiger4M,
        DetectorModel::Eiger9M,
        DetectorModel::Eiger16M,
        DetectorModel::Pilatus1M,
        DetectorModel::Pilatus2M,
        DetectorModel::Pilatus300K,
        DetectorModel::Pilatus300KW,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DetectorModel::Eiger1M => "Eiger1M",
            DetectorModel::Eiger4M => "Eiger4M",
            DetectorModel::Eiger9M => "Eiger9M",
            DetectorModel::Eiger16M => "Eiger16M",
            DetectorModel::Pilatus1M => "Pilatus1M",
            DetectorModel::Pilatus2M => "Pilatus2M",
            DetectorModel::Pilatus300K => "Pilatus300K",
            DetectorModel::Pilatus300KW => "Pilatus300K-W",
        }
    }

    /// Pixel pitch in millimeters
    pub fn pixel_size_mm(&self) -> f64 {
        match self {
            DetectorModel::Eiger1M
            | DetectorModel::Eiger4M
            | DetectorModel::Eiger9M
            | DetectorModel::Eiger16M => EIGER_PIXEL_MM,
            _ => PILATUS_PIXEL_MM,
        }
    }

    pub fn gap_layout(&self) -> GapLayout {
        match self {
            DetectorModel::Eiger1M => GapLayout {
                shape: (1065, 1030),
                row_gaps: &[(514, 550)],
                col_gaps: &[],
            },
            DetectorModel::Eiger4M => GapLayout {
                shape: (2167, 2070),
                row_gaps: &[(514, 550), (1065, 1101), (1616, 1652)],
                col_gaps: &[(1030, 1039)],
            },
            DetectorModel::Eiger9M => GapLayout {
                shape: (3269, 3110),
                row_gaps: &[(514, 550), (1065, 1101), (1616, 1652), (2167, 2203), (2718, 2754)],
                col_gaps: &[(1030, 1039), (2070, 2079)],
            },
            DetectorModel::Eiger16M => GapLayout {
                shape: (4371, 4150),
                row_gaps: &[
                    (514, 550),
                    (1065, 1101),
                    (1616, 1652),
                    (2167, 2203),
                    (2718, 2754),
                    (3269, 3305),
                    (3820, 3856),
                ],
                col_gaps: &[(1030, 1039), (2070, 2079), (3109, 3119)],
            },
            DetectorModel::Pilatus1M => GapLayout {
                shape: (1043, 981),
                row_gaps: &[(195, 211), (407, 423), (619, 635), (831, 847)],
                col_gaps: &[(487, 493)],
            },
            DetectorModel::Pilatus2M => GapLayout {
                shape: (1679, 1475),
                row_gaps: &[
                    (195, 211),
                    (407, 423),
                    (619, 635),
                    (831, 847),
                    (1043, 1059),
                    (1255, 1271),
                    (1467, 1483),
                ],
                col_gaps: &[(487, 493), (981, 987)],
            },
            DetectorModel::Pilatus300K => GapLayout {
                shape: (619, 487),
                row_gaps: &[(195, 211), (407, 423)],
                col_gaps: &[],
            },
            DetectorModel::Pilatus300KW => GapLayout {
                shape: (195, 1475),
                row_gaps: &[],
                col_gaps: &[(487, 493), (981, 987)],
            },
        }
    }

    pub fn shape(&self) -> Shape {
        self.gap_layout().shape
    }

    /// Validity mask with every module gap row and column invalid
    pub fn detector_mask(&self) -> ValidityMask {
        let layout = self.gap_layout();
        let mut mask = Array2::from_elem(layout.shape, true);
        for &(start, end) in layout.row_gaps {
            mask.slice_mut(s![start..=end, ..]).fill(false);
        }
        for &(start, end) in layout.col_gaps {
            mask.slice_mut(s![.., start..=end]).fill(false);
        }
        log::debug!(
            "Generated {} detector mask with {} gap pixels",
            self.name(),
            mask.iter().filter(|&&v| !v).count()
        );
        mask
    }
}

impl std::fmt::Display for DetectorModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DetectorModel {
    type Err = GapFillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        DetectorModel::ALL
            .into_iter()
            .find(|model| model.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| GapFillError::InvalidParameter(format!("Unknown detector: {}", s)))
    }
}
