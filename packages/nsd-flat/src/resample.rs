//! Rasterization of flat-surface samples onto a fixed pixel grid.
//!
//! A [`Resampler`] is fitted once per subject from the 2D flat coordinates of
//! the ROI vertices. Grids are `height x width` arrays with a lower origin:
//! row 0 is the bottom edge of the bounding box.
//!
//! Aggregation: a cell that receives several vertices takes their mean. A cell
//! inside the raster mask that receives none takes the value of the nearest
//! vertex. Cells outside the mask are NaN until [`Resampler::apply_mask`].

use nalgebra::Point2;
use ndarray::{Array2, ArrayView1, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{NsdFlatError, Result};

/// Axis-aligned rectangle in flat-surface millimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
}

impl Bbox {
    pub fn new(left: f64, right: f64, bottom: f64, top: f64) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.left, self.right, self.bottom, self.top]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.right <= self.left || self.top <= self.bottom {
            return Err(NsdFlatError::Config(format!(
                "invalid raster bounding box {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// Grid dimensions `(width, height)` in pixels for `pixel_size`
    pub fn grid_size(&self, pixel_size: f64) -> (usize, usize) {
        (
            (self.width() / pixel_size).round() as usize,
            (self.height() / pixel_size).round() as usize,
        )
    }
}

/// A fitted surface-to-grid mapping
#[derive(Debug, Clone)]
pub struct Resampler {
    pixel_size: f64,
    rect: Bbox,
    width: usize,
    height: usize,
    num_points: usize,
    /// Vertices feeding each cell, row-major over `height x width`
    sources: Vec<Vec<usize>>,
    /// Cells that received at least one vertex directly
    populated: usize,
    mask: Array2<bool>,
}

impl Resampler {
    /// Fit a grid of `pixel_size` over `rect` to the ROI points.
    ///
    /// `points` are the flat coordinates of the ROI vertices, in mask order.
    pub fn fit(pixel_size: f64, rect: Bbox, points: &[Point2<f64>]) -> Result<Self> {
        if !(pixel_size > 0.0) {
            return Err(NsdFlatError::Config(format!(
                "pixel size must be positive, got {}",
                pixel_size
            )));
        }
        rect.validate()?;
        if points.is_empty() {
            return Err(NsdFlatError::Shape("cannot fit a resampler to an empty ROI".to_string()));
        }
        if let Some(bad) = points.iter().position(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(NsdFlatError::Shape(format!(
                "flat coordinate of ROI point {} is not finite",
                bad
            )));
        }

        let (width, height) = rect.grid_size(pixel_size);
        if width == 0 || height == 0 {
            return Err(NsdFlatError::Config(format!(
                "raster grid {}x{} is empty",
                width, height
            )));
        }

        let mut sources: Vec<Vec<usize>> = vec![Vec::new(); width * height];
        let mut outside = 0usize;
        for (i, p) in points.iter().enumerate() {
            let col = ((p.x - rect.left) / pixel_size).floor();
            let row = ((p.y - rect.bottom) / pixel_size).floor();
            if col < 0.0 || row < 0.0 || col >= width as f64 || row >= height as f64 {
                outside += 1;
                continue;
            }
            sources[row as usize * width + col as usize].push(i);
        }
        if outside > 0 {
            log::warn!(
                "{} of {} ROI points fall outside the raster bounding box",
                outside,
                points.len()
            );
        }
        let populated = sources.iter().filter(|s| !s.is_empty()).count();

        let hull = convex_hull(points);
        let mask = Array2::from_shape_fn((height, width), |(row, col)| {
            if !sources[row * width + col].is_empty() {
                return true;
            }
            let center = Point2::new(
                rect.left + (col as f64 + 0.5) * pixel_size,
                rect.bottom + (row as f64 + 0.5) * pixel_size,
            );
            contains(&hull, &center)
        });

        // Masked cells without a vertex borrow the nearest one
        let holes: Vec<usize> = (0..width * height)
            .filter(|&cell| sources[cell].is_empty() && mask[[cell / width, cell % width]])
            .collect();
        let nearest: Vec<(usize, usize)> = holes
            .par_iter()
            .map(|&cell| {
                let center = Point2::new(
                    rect.left + ((cell % width) as f64 + 0.5) * pixel_size,
                    rect.bottom + ((cell / width) as f64 + 0.5) * pixel_size,
                );
                (cell, nearest_point(points, &center))
            })
            .collect();
        for (cell, vertex) in nearest {
            sources[cell].push(vertex);
        }

        log::debug!(
            "Resampler fit: {}x{} grid, {} populated cells, {} filled by nearest vertex",
            width,
            height,
            populated,
            holes.len()
        );

        Ok(Self {
            pixel_size,
            rect,
            width,
            height,
            num_points: points.len(),
            sources,
            populated,
            mask,
        })
    }

    pub fn pixel_size(&self) -> f64 {
        self.pixel_size
    }

    pub fn rect(&self) -> Bbox {
        self.rect
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of ROI points the resampler was fitted to
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    /// Cells with at least one vertex landing in them
    pub fn populated_cells(&self) -> usize {
        self.populated
    }

    /// Raster mask, `true` inside the patch footprint (lower origin)
    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    /// Vertices feeding the cell at (`row`, `col`)
    pub fn cell_sources(&self, row: usize, col: usize) -> &[usize] {
        &self.sources[row * self.width + col]
    }

    /// Map per-vertex values onto the grid.
    pub fn transform(&self, values: ArrayView1<f32>) -> Result<Array2<f32>> {
        if values.len() != self.num_points {
            return Err(NsdFlatError::Shape(format!(
                "activity row has {} values, resampler was fitted to {} points",
                values.len(),
                self.num_points
            )));
        }

        let grid = self
            .sources
            .iter()
            .map(|cell| {
                if cell.is_empty() {
                    return f32::NAN;
                }
                let sum: f64 = cell.iter().map(|&i| values[i] as f64).sum();
                (sum / cell.len() as f64) as f32
            })
            .collect::<Vec<f32>>();

        Array2::from_shape_vec((self.height, self.width), grid)
            .map_err(|e| NsdFlatError::Shape(e.to_string()))
    }

    /// Replace every pixel outside the raster mask with `fill_value`.
    pub fn apply_mask(&self, mut grid: Array2<f32>, fill_value: f32) -> Result<Array2<f32>> {
        if grid.dim() != self.mask.dim() {
            return Err(NsdFlatError::Shape(format!(
                "grid of shape {:?} does not match raster mask {:?}",
                grid.dim(),
                self.mask.dim()
            )));
        }
        Zip::from(&mut grid).and(&self.mask).for_each(|value, &inside| {
            if !inside {
                *value = fill_value;
            }
        });
        Ok(grid)
    }
}

/// Index of the point closest to `target`; ties go to the lower index.
fn nearest_point(points: &[Point2<f64>], target: &Point2<f64>) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, p) in points.iter().enumerate() {
        let dist = nalgebra::distance_squared(p, target);
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

fn cross(o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull in counter-clockwise order (Andrew's monotone chain).
///
/// Collinear points are dropped; fewer than three distinct points give a degenerate hull.
pub fn convex_hull(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut sorted: Vec<Point2<f64>> = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let mut lower: Vec<Point2<f64>> = Vec::new();
    for p in &sorted {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }
    let mut upper: Vec<Point2<f64>> = Vec::new();
    for p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Whether `p` lies inside or on a counter-clockwise convex polygon.
pub fn contains(hull: &[Point2<f64>], p: &Point2<f64>) -> bool {
    if hull.len() < 3 {
        return false;
    }
    hull.iter()
        .zip(hull.iter().cycle().skip(1))
        .all(|(a, b)| cross(a, b, p) >= -1e-12)
}
