use crate::types::{GapFillError, GapFillResult, Intensity, Raster, ValidityMask};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Point in pixel coordinates (`x` = column, `y` = row)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Whether an edit removes pixels from use or restores them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditMode {
    /// Covered pixels become invalid
    Mask,
    /// Covered pixels become valid again
    Erase,
}

impl EditMode {
    /// Validity value written to covered pixels
    fn validity(self) -> bool {
        matches!(self, EditMode::Erase)
    }
}

/// Axis-aligned ellipse
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    pub center: Point,
    pub radius_x: f64,
    pub radius_y: f64,
}

impl Ellipse {
    pub fn new(center: Point, radius_x: f64, radius_y: f64) -> Self {
        Self {
            center,
            radius_x,
            radius_y,
        }
    }

    pub fn circle(center: Point, radius: f64) -> Self {
        Self::new(center, radius, radius)
    }

    /// Ellipse inscribed in the box dragged from `start` to `end`.
    ///
    /// With `force_circle` (the shift modifier) the drag is squared off to the
    /// larger of the two extents, keeping the start corner fixed.
    pub fn from_drag(start: Point, end: Point, force_circle: bool) -> Self {
        let dx = end.x - start.x;
        let dy = end.y - start.y;

        if force_circle {
            let side = dx.abs().max(dy.abs());
            let square_end = Point::new(start.x + side * dx.signum(), start.y + side * dy.signum());
            let center = Point::new((start.x + square_end.x) / 2.0, (start.y + square_end.y) / 2.0);
            Self::circle(center, side / 2.0)
        } else {
            let center = Point::new((start.x + end.x) / 2.0, (start.y + end.y) / 2.0);
            Self::new(center, dx.abs() / 2.0, dy.abs() / 2.0)
        }
    }

    pub fn validate(&self) -> GapFillResult<()> {
        if !self.center.is_finite() {
            return Err(GapFillError::InvalidGeometry(
                "Ellipse center is not finite".to_string(),
            ));
        }
        if !(self.radius_x.is_finite() && self.radius_y.is_finite())
            || self.radius_x <= 0.0
            || self.radius_y <= 0.0
        {
            return Err(GapFillError::InvalidGeometry(format!(
                "Ellipse radii must be positive, got ({}, {})",
                self.radius_x, self.radius_y
            )));
        }
        Ok(())
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        let nx = (x - self.center.x) / self.radius_x;
        let ny = (y - self.center.y) / self.radius_y;
        nx * nx + ny * ny <= 1.0
    }
}

/// Axis-aligned rectangle given by two opposite corners in any order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub corner1: Point,
    pub corner2: Point,
}

impl Rectangle {
    pub fn new(corner1: Point, corner2: Point) -> Self {
        Self { corner1, corner2 }
    }

    pub fn validate(&self) -> GapFillResult<()> {
        if !(self.corner1.is_finite() && self.corner2.is_finite()) {
            return Err(GapFillError::InvalidGeometry(
                "Rectangle corners must be finite".to_string(),
            ));
        }
        Ok(())
    }

    fn min(&self) -> Point {
        Point::new(self.corner1.x.min(self.corner2.x), self.corner1.y.min(self.corner2.y))
    }

    fn max(&self) -> Point {
        Point::new(self.corner1.x.max(self.corner2.x), self.corner1.y.max(self.corner2.y))
    }
}

/// Closed polygon, rasterized with the even-odd rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> GapFillResult<Self> {
        let polygon = Self { vertices };
        polygon.validate()?;
        Ok(polygon)
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn validate(&self) -> GapFillResult<()> {
        if self.vertices.len() < 3 {
            return Err(GapFillError::InvalidGeometry(format!(
                "Need at least 3 points to close a polygon, got {}",
                self.vertices.len()
            )));
        }
        if !self.vertices.iter().all(Point::is_finite) {
            return Err(GapFillError::InvalidGeometry(
                "Polygon vertices must be finite".to_string(),
            ));
        }
        Ok(())
    }

    fn contains(&self, px: f64, py: f64) -> bool {
        let v = &self.vertices;
        let mut inside = false;
        let mut j = v.len() - 1;
        for i in 0..v.len() {
            let (a, b) = (v[i], v[j]);
            if (a.y > py) != (b.y > py) && px < (b.x - a.x) * (py - a.y) / (b.y - a.y) + a.x {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    fn bounds(&self) -> (Point, Point) {
        let mut min = Point::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in &self.vertices {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        (min, max)
    }
}

/// Accumulates polygon vertices one click at a time
#[derive(Debug, Clone, Default)]
pub struct PolygonBuilder {
    vertices: Vec<Point>,
}

impl PolygonBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_vertex(&mut self, point: Point) {
        self.vertices.push(point);
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    /// Close the polygon (double-click). With fewer than three vertices the
    /// builder is left as is so the user can keep clicking.
    pub fn close(&mut self) -> GapFillResult<Polygon> {
        let polygon = Polygon {
            vertices: self.vertices.clone(),
        };
        polygon.validate()?;
        self.vertices.clear();
        Ok(polygon)
    }

    /// Abandon an unfinished polygon
    pub fn clear(&mut self) {
        self.vertices.clear();
    }
}

/// Freehand stroke: every pixel within `radius` of the polyline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Smudge {
    pub points: Vec<Point>,
    pub radius: f64,
}

impl Smudge {
    pub fn validate(&self) -> GapFillResult<()> {
        validate_radius(self.radius)?;
        if self.points.is_empty() {
            return Err(GapFillError::InvalidGeometry(
                "Smudge stroke has no points".to_string(),
            ));
        }
        if !self.points.iter().all(Point::is_finite) {
            return Err(GapFillError::InvalidGeometry(
                "Smudge points must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_radius(radius: f64) -> GapFillResult<()> {
    if !radius.is_finite() || radius <= 0.0 {
        return Err(GapFillError::InvalidGeometry(format!(
            "Smudge radius must be positive, got {}",
            radius
        )));
    }
    Ok(())
}

/// Smudge stroke rasterized segment by segment as the pointer moves
#[derive(Debug, Clone)]
pub struct SmudgeStroke {
    smudge: Smudge,
    mode: EditMode,
}

impl SmudgeStroke {
    /// Start a stroke and paint the disc under the first point
    pub fn begin(
        mask: &mut ValidityMask,
        start: Point,
        radius: f64,
        mode: EditMode,
    ) -> GapFillResult<Self> {
        let smudge = Smudge {
            points: vec![start],
            radius,
        };
        smudge.validate()?;
        paint_segment(mask, start, start, radius, mode.validity());
        Ok(Self { smudge, mode })
    }

    /// Append a drag point and paint the new segment immediately
    pub fn extend(&mut self, mask: &mut ValidityMask, point: Point) -> GapFillResult<usize> {
        if !point.is_finite() {
            return Err(GapFillError::InvalidGeometry(
                "Smudge points must be finite".to_string(),
            ));
        }
        let last = *self.smudge.points.last().unwrap_or(&point);
        self.smudge.points.push(point);
        Ok(paint_segment(mask, last, point, self.smudge.radius, self.mode.validity()))
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn smudge(&self) -> &Smudge {
        &self.smudge
    }

    pub fn into_smudge(self) -> Smudge {
        self.smudge
    }
}

/// Direction of a threshold limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdDirection {
    /// Intensities strictly above the limit are masked
    Above,
    /// Intensities strictly below the limit are masked
    Below,
}

/// Intensity limits that derive a threshold mask from a raster
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThresholdSpec {
    /// Vmax limit and the side of it that gets masked
    pub vmax: Option<(Intensity, ThresholdDirection)>,
    /// Independent "mask above" limit
    pub mask_above: Option<Intensity>,
    /// Independent "mask below" limit
    pub mask_below: Option<Intensity>,
}

impl ThresholdSpec {
    pub fn vmax(vmax: Intensity, direction: ThresholdDirection) -> Self {
        Self {
            vmax: Some((vmax, direction)),
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.vmax.is_some() || self.mask_above.is_some() || self.mask_below.is_some()
    }

    /// Fresh threshold layer for `raster`, or `None` when no limit is set
    pub fn layer(&self, raster: &Raster) -> Option<ValidityMask> {
        if !self.is_active() {
            return None;
        }
        let above = self
            .vmax
            .filter(|(_, d)| *d == ThresholdDirection::Above)
            .map(|(v, _)| v)
            .into_iter()
            .chain(self.mask_above)
            .reduce(Intensity::min);
        let below = self
            .vmax
            .filter(|(_, d)| *d == ThresholdDirection::Below)
            .map(|(v, _)| v)
            .into_iter()
            .chain(self.mask_below)
            .reduce(Intensity::max);

        Some(raster.mapv(|v| {
            let too_high = above.map_or(false, |limit| v > limit);
            let too_low = below.map_or(false, |limit| v < limit);
            !(too_high || too_low)
        }))
    }
}

/// Geometry-to-bitmap rasterization.
///
/// Pixel `(x, y)` is sampled at its integer index coordinates. Every `apply_*`
/// call validates its geometry before touching the mask, and returns the
/// number of pixels whose validity changed.
pub struct MaskRasterizer;

impl MaskRasterizer {
    pub fn apply_ellipse(
        mask: &mut ValidityMask,
        ellipse: &Ellipse,
        mode: EditMode,
    ) -> GapFillResult<usize> {
        ellipse.validate()?;
        let c = ellipse.center;
        let (rx, ry) = (ellipse.radius_x, ellipse.radius_y);
        Ok(paint_region(
            mask,
            Point::new(c.x - rx, c.y - ry),
            Point::new(c.x + rx, c.y + ry),
            mode.validity(),
            |x, y| ellipse.contains(x, y),
        ))
    }

    pub fn apply_rectangle(
        mask: &mut ValidityMask,
        rectangle: &Rectangle,
        mode: EditMode,
    ) -> GapFillResult<usize> {
        rectangle.validate()?;
        Ok(paint_region(
            mask,
            rectangle.min(),
            rectangle.max(),
            mode.validity(),
            |_, _| true,
        ))
    }

    pub fn apply_polygon(
        mask: &mut ValidityMask,
        polygon: &Polygon,
        mode: EditMode,
    ) -> GapFillResult<usize> {
        polygon.validate()?;
        let (min, max) = polygon.bounds();
        Ok(paint_region(mask, min, max, mode.validity(), |x, y| {
            polygon.contains(x, y)
        }))
    }

    pub fn apply_smudge(
        mask: &mut ValidityMask,
        smudge: &Smudge,
        mode: EditMode,
    ) -> GapFillResult<usize> {
        smudge.validate()?;
        let value = mode.validity();
        let points = &smudge.points;

        if points.len() == 1 {
            return Ok(paint_segment(mask, points[0], points[0], smudge.radius, value));
        }
        Ok(points
            .windows(2)
            .map(|w| paint_segment(mask, w[0], w[1], smudge.radius, value))
            .sum())
    }

    /// Fresh threshold layer; `raster` values on the masked side of `vmax`
    /// become invalid
    pub fn threshold(raster: &Raster, vmax: Intensity, direction: ThresholdDirection) -> ValidityMask {
        match direction {
            ThresholdDirection::Above => raster.mapv(|v| !(v > vmax)),
            ThresholdDirection::Below => raster.mapv(|v| !(v < vmax)),
        }
    }

    /// Mark every pixel invalid in `layer` invalid in `mask` as well
    pub fn commit_layer(mask: &mut ValidityMask, layer: &ValidityMask) -> GapFillResult<usize> {
        crate::types::ensure_shape("committed layer", mask.dim(), layer.dim())?;
        let mut changed = 0;
        Zip::from(mask).and(layer).for_each(|m, &l| {
            if *m && !l {
                *m = false;
                changed += 1;
            }
        });
        Ok(changed)
    }

    /// All-valid bitmap
    pub fn blank(shape: (usize, usize)) -> ValidityMask {
        Array2::from_elem(shape, true)
    }
}

/// Integer pixel indices covered by `[min, max]` along an axis of length `len`
fn pixel_span(min: f64, max: f64, len: usize) -> Option<RangeInclusive<usize>> {
    if len == 0 {
        return None;
    }
    let lo = min.ceil().max(0.0);
    let hi = max.floor().min((len - 1) as f64);
    if lo > hi {
        return None;
    }
    Some(lo as usize..=hi as usize)
}

fn paint_region<F>(mask: &mut ValidityMask, min: Point, max: Point, value: bool, inside: F) -> usize
where
    F: Fn(f64, f64) -> bool,
{
    let (rows, cols) = mask.dim();
    let (Some(ys), Some(xs)) = (pixel_span(min.y, max.y, rows), pixel_span(min.x, max.x, cols))
    else {
        return 0;
    };

    let mut changed = 0;
    for y in ys {
        for x in xs.clone() {
            if inside(x as f64, y as f64) {
                let px = &mut mask[[y, x]];
                if *px != value {
                    *px = value;
                    changed += 1;
                }
            }
        }
    }
    changed
}

/// Capsule of half-width `radius` around the segment `a`-`b`
fn paint_segment(mask: &mut ValidityMask, a: Point, b: Point, radius: f64, value: bool) -> usize {
    let min = Point::new(a.x.min(b.x) - radius, a.y.min(b.y) - radius);
    let max = Point::new(a.x.max(b.x) + radius, a.y.max(b.y) + radius);
    let r2 = radius * radius;
    paint_region(mask, min, max, value, |x, y| {
        segment_distance_sq(Point::new(x, y), a, b) <= r2
    })
}

fn segment_distance_sq(p: Point, a: Point, b: Point) -> f64 {
    let (abx, aby) = (b.x - a.x, b.y - a.y);
    let len2 = abx * abx + aby * aby;
    let t = if len2 > 0.0 {
        (((p.x - a.x) * abx + (p.y - a.y) * aby) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (dx, dy) = (a.x + t * abx - p.x, a.y + t * aby - p.y);
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn invalid_set(mask: &ValidityMask) -> Vec<(usize, usize)> {
        mask.indexed_iter()
            .filter(|(_, &v)| !v)
            .map(|(idx, _)| idx)
            .collect()
    }

    #[test]
    fn test_circle_rasterization() {
        let mut mask = MaskRasterizer::blank((7, 7));
        let changed =
            MaskRasterizer::apply_ellipse(&mut mask, &Ellipse::circle(Point::new(3.0, 3.0), 1.0), EditMode::Mask)
                .unwrap();

        assert_eq!(changed, 5);
        assert_eq!(invalid_set(&mask), vec![(2, 3), (3, 2), (3, 3), (3, 4), (4, 3)]);
    }

    #[test]
    fn test_ellipse_uses_independent_radii() {
        let mut mask = MaskRasterizer::blank((5, 9));
        MaskRasterizer::apply_ellipse(
            &mut mask,
            &Ellipse::new(Point::new(4.0, 2.0), 3.0, 0.5),
            EditMode::Mask,
        )
        .unwrap();

        // Only row 2 lies within the half-pixel vertical radius
        assert_eq!(invalid_set(&mask), (1..=7).map(|x| (2, x)).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_radius_ellipse_rejected_without_mutation() {
        let mut mask = MaskRasterizer::blank((4, 4));
        let err = MaskRasterizer::apply_ellipse(
            &mut mask,
            &Ellipse::new(Point::new(1.0, 1.0), 0.0, 2.0),
            EditMode::Mask,
        )
        .unwrap_err();

        assert!(matches!(err, GapFillError::InvalidGeometry(_)));
        assert!(mask.iter().all(|&v| v));
    }

    #[test]
    fn test_drag_with_circle_modifier() {
        let ellipse = Ellipse::from_drag(Point::new(10.0, 10.0), Point::new(16.0, 12.0), true);
        assert_eq!(ellipse.radius_x, ellipse.radius_y);
        assert_eq!(ellipse.radius_x, 3.0);
        assert_eq!(ellipse.center, Point::new(13.0, 13.0));

        let free = Ellipse::from_drag(Point::new(10.0, 10.0), Point::new(4.0, 12.0), false);
        assert_eq!(free.center, Point::new(7.0, 11.0));
        assert_eq!((free.radius_x, free.radius_y), (3.0, 1.0));
    }

    #[test]
    fn test_rectangle_is_inclusive_and_order_free() {
        let mut mask = MaskRasterizer::blank((4, 5));
        let rect = Rectangle::new(Point::new(3.0, 2.0), Point::new(1.0, 1.0));
        let changed = MaskRasterizer::apply_rectangle(&mut mask, &rect, EditMode::Mask).unwrap();

        assert_eq!(changed, 6);
        assert_eq!(
            mask,
            array![
                [true, true, true, true, true],
                [true, false, false, false, true],
                [true, false, false, false, true],
                [true, true, true, true, true],
            ]
        );
    }

    #[test]
    fn test_rectangle_clipped_to_bitmap() {
        let mut mask = MaskRasterizer::blank((3, 3));
        let rect = Rectangle::new(Point::new(-10.0, -10.0), Point::new(0.5, 50.0));
        MaskRasterizer::apply_rectangle(&mut mask, &rect, EditMode::Mask).unwrap();
        assert_eq!(invalid_set(&mask), vec![(0, 0), (1, 0), (2, 0)]);
    }

    #[test]
    fn test_polygon_even_odd_fill() {
        let mut mask = MaskRasterizer::blank((5, 5));
        let triangle = Polygon::new(vec![
            Point::new(0.5, 0.5),
            Point::new(4.5, 0.5),
            Point::new(0.5, 4.5),
        ])
        .unwrap();
        MaskRasterizer::apply_polygon(&mut mask, &triangle, EditMode::Mask).unwrap();

        // Pixels strictly under the hypotenuse x + y < 5
        for ((y, x), &valid) in mask.indexed_iter() {
            let inside = x >= 1 && y >= 1 && x + y < 5;
            assert_eq!(valid, !inside, "pixel ({}, {})", x, y);
        }
    }

    #[test]
    fn test_polygon_builder_requires_three_vertices() {
        let mut builder = PolygonBuilder::new();
        builder.push_vertex(Point::new(0.0, 0.0));
        builder.push_vertex(Point::new(2.0, 0.0));

        assert!(matches!(builder.close(), Err(GapFillError::InvalidGeometry(_))));
        assert_eq!(builder.vertices().len(), 2);

        builder.push_vertex(Point::new(2.0, 2.0));
        let polygon = builder.close().unwrap();
        assert_eq!(polygon.vertices().len(), 3);
        assert!(builder.vertices().is_empty());
    }

    #[test]
    fn test_smudge_covers_path() {
        let mut mask = MaskRasterizer::blank((5, 10));
        let smudge = Smudge {
            points: vec![Point::new(1.0, 2.0), Point::new(8.0, 2.0)],
            radius: 1.0,
        };
        MaskRasterizer::apply_smudge(&mut mask, &smudge, EditMode::Mask).unwrap();

        for x in 1..=8 {
            assert!(!mask[[1, x]] && !mask[[2, x]] && !mask[[3, x]]);
        }
        assert!(mask[[0, 4]] && mask[[4, 4]]);
        assert!(!mask[[2, 0]] && !mask[[2, 9]]);
        assert!(mask[[1, 0]] && mask[[3, 9]]);
    }

    #[test]
    fn test_incremental_stroke_matches_batch() {
        let points = vec![Point::new(1.0, 1.0), Point::new(6.0, 3.0), Point::new(2.0, 7.0)];

        let mut live = MaskRasterizer::blank((9, 9));
        let mut stroke = SmudgeStroke::begin(&mut live, points[0], 1.5, EditMode::Mask).unwrap();
        for &p in &points[1..] {
            stroke.extend(&mut live, p).unwrap();
        }

        let mut batch = MaskRasterizer::blank((9, 9));
        MaskRasterizer::apply_smudge(&mut batch, stroke.smudge(), EditMode::Mask).unwrap();

        assert_eq!(live, batch);
    }

    #[test]
    fn test_erase_after_mask_restores() {
        let mut mask = MaskRasterizer::blank((6, 6));
        let rect = Rectangle::new(Point::new(0.0, 0.0), Point::new(5.0, 5.0));
        let circle = Ellipse::circle(Point::new(2.0, 2.0), 1.0);

        MaskRasterizer::apply_rectangle(&mut mask, &rect, EditMode::Mask).unwrap();
        let restored = MaskRasterizer::apply_ellipse(&mut mask, &circle, EditMode::Erase).unwrap();
        assert_eq!(restored, 5);
        assert!(mask[[2, 2]] && mask[[1, 2]]);

        // Re-masking twice is the same as once
        assert_eq!(MaskRasterizer::apply_ellipse(&mut mask, &circle, EditMode::Mask).unwrap(), 5);
        assert_eq!(MaskRasterizer::apply_ellipse(&mut mask, &circle, EditMode::Mask).unwrap(), 0);
        assert!(mask.iter().all(|&v| !v));
    }

    #[test]
    fn test_threshold_directions() {
        let raster = array![[0.0f32, 5.0], [10.0, 15.0]];

        let above = MaskRasterizer::threshold(&raster, 10.0, ThresholdDirection::Above);
        assert_eq!(above, array![[true, true], [true, false]]);

        let below = MaskRasterizer::threshold(&raster, 10.0, ThresholdDirection::Below);
        assert_eq!(below, array![[false, false], [true, true]]);
    }

    #[test]
    fn test_threshold_spec_combines_limits() {
        let raster = array![[-1.0f32, 0.0, 500.0, 20000.0]];
        let spec = ThresholdSpec {
            vmax: Some((2000.0, ThresholdDirection::Above)),
            mask_above: Some(10000.0),
            mask_below: Some(0.0),
        };

        let layer = spec.layer(&raster).unwrap();
        assert_eq!(layer, array![[false, true, true, false]]);
        assert!(ThresholdSpec::default().layer(&raster).is_none());
    }
}
