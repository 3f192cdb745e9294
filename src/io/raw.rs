//! Raw little-endian array files.
//!
//! Rasters and masks are stored without a header; the caller supplies the
//! shape (normally the detector's native resolution) and the pixel type.

use crate::types::{GapFillError, GapFillResult, Raster, Shape, ValidityMask};
use ndarray::Array2;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Sample type of a raw raster file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawPixelType {
    U8,
    U16,
    U32,
    I16,
    I32,
    F32,
    F64,
}

impl RawPixelType {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            RawPixelType::U8 => 1,
            RawPixelType::U16 | RawPixelType::I16 => 2,
            RawPixelType::U32 | RawPixelType::I32 | RawPixelType::F32 => 4,
            RawPixelType::F64 => 8,
        }
    }

    fn decode(&self, bytes: &[u8]) -> f32 {
        match self {
            RawPixelType::U8 => bytes[0] as f32,
            RawPixelType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            RawPixelType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            RawPixelType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            RawPixelType::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            RawPixelType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            RawPixelType::F64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(buf) as f32
            }
        }
    }
}

/// How a stored 0/1 mask byte maps to validity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskEncoding {
    /// 1 = masked (bad) pixel, 0 = usable
    #[default]
    InvalidIsOne,
    /// 1 = usable pixel, 0 = masked
    ValidIsOne,
}

/// How to interpret a numeric mask array on import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskPolarity {
    /// Positive values are masked
    InvalidPositive,
    /// Positive values are usable
    ValidPositive,
    /// Positive values are masked, unless that would mask more than half of
    /// the detector, in which case the polarity is flipped
    #[default]
    Auto,
}

fn read_bytes(path: &Path, expected_len: usize) -> GapFillResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(expected_len);
    File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() != expected_len {
        return Err(GapFillError::InvalidFormat(format!(
            "{} holds {} bytes, expected {}",
            path.display(),
            bytes.len(),
            expected_len
        )));
    }
    Ok(bytes)
}

/// Decode a raw byte buffer into a raster of `shape`
pub fn decode_raster(bytes: &[u8], shape: Shape, pixel_type: RawPixelType) -> GapFillResult<Raster> {
    let bpp = pixel_type.bytes_per_pixel();
    let expected = shape.0 * shape.1 * bpp;
    if bytes.len() != expected {
        return Err(GapFillError::InvalidFormat(format!(
            "Raw buffer holds {} bytes, expected {} for {:?} {:?}",
            bytes.len(),
            expected,
            shape,
            pixel_type
        )));
    }
    let values: Vec<f32> = bytes.chunks_exact(bpp).map(|c| pixel_type.decode(c)).collect();
    Array2::from_shape_vec(shape, values)
        .map_err(|e| GapFillError::InvalidFormat(format!("Shape error: {}", e)))
}

pub fn read_raster<P: AsRef<Path>>(
    path: P,
    shape: Shape,
    pixel_type: RawPixelType,
) -> GapFillResult<Raster> {
    let path = path.as_ref();
    log::debug!("Reading {:?} raster {:?} from {}", pixel_type, shape, path.display());
    let bytes = read_bytes(path, shape.0 * shape.1 * pixel_type.bytes_per_pixel())?;
    decode_raster(&bytes, shape, pixel_type)
}

/// Write a raster as little-endian `f32`
pub fn write_raster<P: AsRef<Path>>(path: P, raster: &Raster) -> GapFillResult<()> {
    let path = path.as_ref();
    log::debug!("Writing {:?} raster to {}", raster.dim(), path.display());
    let mut writer = BufWriter::new(File::create(path)?);
    for value in raster.iter() {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a mask as one 0/1 byte per pixel
pub fn write_mask<P: AsRef<Path>>(path: P, mask: &ValidityMask, encoding: MaskEncoding) -> GapFillResult<()> {
    let path = path.as_ref();
    log::debug!("Writing {:?} mask to {} ({:?})", mask.dim(), path.display(), encoding);
    let bytes: Vec<u8> = mask
        .iter()
        .map(|&valid| match encoding {
            MaskEncoding::InvalidIsOne => u8::from(!valid),
            MaskEncoding::ValidIsOne => u8::from(valid),
        })
        .collect();
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a one-byte-per-pixel mask; any non-zero byte counts as 1
pub fn read_mask<P: AsRef<Path>>(path: P, shape: Shape, encoding: MaskEncoding) -> GapFillResult<ValidityMask> {
    let path = path.as_ref();
    let bytes = read_bytes(path, shape.0 * shape.1)?;
    let values: Vec<bool> = bytes
        .into_iter()
        .map(|b| match encoding {
            MaskEncoding::InvalidIsOne => b == 0,
            MaskEncoding::ValidIsOne => b != 0,
        })
        .collect();
    Array2::from_shape_vec(shape, values)
        .map_err(|e| GapFillError::InvalidFormat(format!("Shape error: {}", e)))
}

/// Turn an arbitrary numeric array (e.g. an imported mask image) into a
/// validity mask
pub fn mask_from_values<T: ToPrimitive>(values: &Array2<T>, polarity: MaskPolarity) -> ValidityMask {
    let positive = values.map(|v| v.to_f64().map_or(false, |v| v > 0.0));
    match polarity {
        MaskPolarity::InvalidPositive => positive.mapv(|p| !p),
        MaskPolarity::ValidPositive => positive,
        MaskPolarity::Auto => {
            let masked = positive.iter().filter(|&&p| p).count();
            if masked * 2 > positive.len() {
                log::info!("Imported mask marks most pixels; treating positive values as usable");
                positive
            } else {
                positive.mapv(|p| !p)
            }
        }
    }
}

/// Read a one-byte-per-pixel mask file whose polarity may be unknown
pub fn import_mask<P: AsRef<Path>>(path: P, shape: Shape, polarity: MaskPolarity) -> GapFillResult<ValidityMask> {
    let path = path.as_ref();
    log::info!("📂 Importing mask {} ({:?} polarity)", path.display(), polarity);
    let values = read_raster(path, shape, RawPixelType::U8)?;
    Ok(mask_from_values(&values, polarity))
}
