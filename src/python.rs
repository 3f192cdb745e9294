//! Python bindings for the gap-filling core (`python` feature)

use crate::core::{
    Compositor, FlatFieldCorrector, OffsetSense, PixelSource, Reprojector, ThresholdDirection,
    ThresholdSpec,
};
use crate::io::DetectorModel;
use crate::types::{Frame, FrameRole, GapFillError, Offset};
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn to_py_err(err: GapFillError) -> PyErr {
    match err {
        GapFillError::Io(e) => PyIOError::new_err(e.to_string()),
        GapFillError::ShapeMismatch { .. }
        | GapFillError::InvalidGeometry(_)
        | GapFillError::InvalidParameter(_)
        | GapFillError::InvalidFormat(_)
        | GapFillError::Settings(_) => PyValueError::new_err(err.to_string()),
        GapFillError::MissingSource(_) => PyRuntimeError::new_err(err.to_string()),
    }
}

/// Convert PyReadonlyArray2 to ndarray Array2
fn numpy_to_array2<T>(arr: PyReadonlyArray2<T>) -> ndarray::Array2<T>
where
    T: Copy + numpy::Element,
{
    arr.as_array().to_owned()
}

fn parse_direction(direction: &str) -> PyResult<ThresholdDirection> {
    match direction.to_lowercase().as_str() {
        "above" => Ok(ThresholdDirection::Above),
        "below" => Ok(ThresholdDirection::Below),
        _ => Err(PyValueError::new_err(format!(
            "Invalid threshold direction: {}",
            direction
        ))),
    }
}

fn parse_sense(sense: &str) -> PyResult<OffsetSense> {
    match sense.to_lowercase().as_str() {
        "forward" => Ok(OffsetSense::Forward),
        "inverse" => Ok(OffsetSense::Inverse),
        _ => Err(PyValueError::new_err(format!("Invalid offset sense: {}", sense))),
    }
}

/// Divide a raw frame by a flat field; returns `data` and `mask`
#[pyfunction]
#[pyo3(signature = (raw, flat_field=None, detector_mask=None))]
fn correct_flat_field(
    py: Python,
    raw: PyReadonlyArray2<f64>,
    flat_field: Option<PyReadonlyArray2<f32>>,
    detector_mask: Option<PyReadonlyArray2<bool>>,
) -> PyResult<PyObject> {
    let raw = numpy_to_array2(raw);
    let corrector = match flat_field {
        Some(flat) => FlatFieldCorrector::new(numpy_to_array2(flat)),
        None => FlatFieldCorrector::unity(),
    };
    let detector_mask = detector_mask.map(numpy_to_array2);

    let frame = corrector
        .load_frame(&raw, detector_mask.as_ref(), FrameRole::Original)
        .map_err(to_py_err)?;

    let result = PyDict::new(py);
    result.set_item("data", frame.raster().to_pyarray(py))?;
    result.set_item("mask", frame.mask().to_pyarray(py))?;
    Ok(result.into())
}

/// Validity mask of a known detector's module gaps
#[pyfunction]
fn detector_mask(py: Python, detector: String) -> PyResult<PyObject> {
    let model: DetectorModel = detector.parse().map_err(to_py_err)?;
    let result = PyDict::new(py);
    result.set_item("mask", model.detector_mask().to_pyarray(py))?;
    result.set_item("pixel_size_mm", model.pixel_size_mm())?;
    Ok(result.into())
}

/// Threshold layer for a raster (`direction` is "above" or "below")
#[pyfunction]
#[pyo3(signature = (data, vmax, direction="above"))]
fn threshold_mask(
    py: Python,
    data: PyReadonlyArray2<f32>,
    vmax: f32,
    direction: &str,
) -> PyResult<PyObject> {
    let raster = numpy_to_array2(data);
    let spec = ThresholdSpec::vmax(vmax, parse_direction(direction)?);
    let mask = spec
        .layer(&raster)
        .unwrap_or_else(|| ndarray::Array2::from_elem(raster.dim(), true));
    Ok(mask.to_pyarray(py).into())
}

/// Composite Original with up to two shifted exposures.
///
/// Each exposure is passed as (data, mask); offsets are (dx, dy) in pixels.
#[pyfunction]
#[pyo3(signature = (original, original_mask, move1=None, move2=None, offset1=(0.0, 0.0), offset2=(0.0, 0.0), sense="forward"))]
#[allow(clippy::too_many_arguments)]
fn gap_fill(
    py: Python,
    original: PyReadonlyArray2<f32>,
    original_mask: PyReadonlyArray2<bool>,
    move1: Option<(PyReadonlyArray2<f32>, PyReadonlyArray2<bool>)>,
    move2: Option<(PyReadonlyArray2<f32>, PyReadonlyArray2<bool>)>,
    offset1: (f64, f64),
    offset2: (f64, f64),
    sense: &str,
) -> PyResult<PyObject> {
    let original = Frame::new(
        numpy_to_array2(original),
        numpy_to_array2(original_mask),
        FrameRole::Original,
    )
    .map_err(to_py_err)?;
    let reprojector = Reprojector::new(parse_sense(sense)?);

    let mut aligned = Vec::with_capacity(2);
    for (role, input, (dx, dy)) in [
        (FrameRole::Move1, move1, offset1),
        (FrameRole::Move2, move2, offset2),
    ] {
        let offset = Offset::new(dx, dy);
        let frame = match input {
            Some((data, mask)) if !offset.is_zero() => {
                let frame = Frame::new(numpy_to_array2(data), numpy_to_array2(mask), role)
                    .map_err(to_py_err)?;
                Some(reprojector.reproject(&frame, offset).map_err(to_py_err)?)
            }
            _ => None,
        };
        aligned.push(frame);
    }

    let composite = Compositor::new()
        .compose(&original, aligned[0].as_ref(), aligned[1].as_ref())
        .map_err(to_py_err)?;
    let provenance = composite.provenance.mapv(|s| match s {
        PixelSource::Original => 0u8,
        PixelSource::Move1 => 1,
        PixelSource::Move2 => 2,
        PixelSource::Unfilled => 255,
    });

    let result = PyDict::new(py);
    result.set_item("data", composite.frame.raster().to_pyarray(py))?;
    result.set_item("mask", composite.frame.mask().to_pyarray(py))?;
    result.set_item("provenance", provenance.to_pyarray(py))?;
    result.set_item("residual_pixels", composite.report.residual_pixels)?;
    result.set_item("coverage_percent", composite.report.coverage_percent)?;
    result.set_item("missing_source", composite.report.missing_source)?;
    result.set_item("processing_time", composite.report.processing_time)?;
    Ok(result.into())
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(correct_flat_field, m)?)?;
    m.add_function(wrap_pyfunction!(detector_mask, m)?)?;
    m.add_function(wrap_pyfunction!(threshold_mask, m)?)?;
    m.add_function(wrap_pyfunction!(gap_fill, m)?)?;
    Ok(())
}
