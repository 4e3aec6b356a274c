//! External force field: where the edges are, and which way to move.
//!
//! From an 8-bit scalar image this module builds a smoothed,
//! `[0, 1]`-normalized gradient-magnitude map ("edge strength") and
//! then the spatial gradient of that map. The gradient points toward
//! increasing edge strength, so contour points sampled on it are
//! pulled onto strong image edges.
//!
//! # Axis-order contract
//!
//! [`VectorField`] stores its two components in array-axis order:
//! component [`ROW_AXIS`] is the derivative down the rows (image y),
//! component [`COLUMN_AXIS`] is the derivative across the columns
//! (image x). Contours store points as `(x, y)`, so the relaxer reads
//! the components in swapped order, column component first. Both sides
//! must keep this convention; changing either one alone flips the
//! force onto the wrong axis.

use image::GrayImage;

use crate::blur;
use crate::types::{Dimensions, RefineError};

/// Index of the derivative along rows (the image y direction).
pub const ROW_AXIS: usize = 0;

/// Index of the derivative along columns (the image x direction).
pub const COLUMN_AXIS: usize = 1;

/// A per-pixel 2-component force, shared read-only by every contour
/// relaxed on the same image.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    dimensions: Dimensions,
    components: [Vec<f64>; 2],
}

impl VectorField {
    /// Build a field from row-major component grids in axis order.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::InvalidConfig`] if either grid does not
    /// hold exactly `width * height` values.
    pub fn from_components(
        dimensions: Dimensions,
        along_rows: Vec<f64>,
        along_columns: Vec<f64>,
    ) -> Result<Self, RefineError> {
        let expected = dimensions.area();
        if along_rows.len() != expected || along_columns.len() != expected {
            return Err(RefineError::InvalidConfig(format!(
                "vector field grids must hold {expected} values, got {} and {}",
                along_rows.len(),
                along_columns.len()
            )));
        }
        Ok(Self {
            dimensions,
            components: [along_rows, along_columns],
        })
    }

    /// Size of the image the field was built from.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Row-major values of one component ([`ROW_AXIS`] or
    /// [`COLUMN_AXIS`]).
    #[must_use]
    pub fn component(&self, axis: usize) -> &[f64] {
        &self.components[axis]
    }

    /// Value of component `axis` at pixel `(x, y)`.
    ///
    /// Callers must pass in-bounds indices.
    #[must_use]
    pub fn at(&self, axis: usize, x: usize, y: usize) -> f64 {
        self.components[axis][y * self.dimensions.width as usize + x]
    }
}

/// Smoothed, normalized gradient magnitude of `image`, row-major.
///
/// Blurs with the fixed 17×17 Gaussian, takes Scharr derivatives along
/// both axes, and min-max normalizes their magnitude to `[0, 1]`. A
/// uniform magnitude normalizes to all zeros.
#[must_use]
pub fn edge_strength(image: &GrayImage, sigma: f32) -> Vec<f64> {
    let blurred = blur::gaussian_blur_fixed(image, sigma);
    let gx = imageproc::gradients::horizontal_scharr(&blurred);
    let gy = imageproc::gradients::vertical_scharr(&blurred);

    let mut magnitude: Vec<f64> = gx
        .pixels()
        .zip(gy.pixels())
        .map(|(dx, dy)| f64::from(dx.0[0]).hypot(f64::from(dy.0[0])))
        .collect();
    normalize_unit(&mut magnitude);
    magnitude
}

/// Build the external force field for `image`.
///
/// Computed once per image and reused for every polygon on it.
#[must_use]
pub fn edge_field(image: &GrayImage, sigma: f32) -> VectorField {
    let dimensions = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    let strength = edge_strength(image, sigma);
    gradient(&strength, dimensions)
}

/// Spatial gradient of a row-major grid.
///
/// Central differences in the interior, one-sided differences on the
/// borders, zero along an axis of length one.
#[must_use]
pub fn gradient(values: &[f64], dimensions: Dimensions) -> VectorField {
    let w = dimensions.width as usize;
    let h = dimensions.height as usize;
    debug_assert_eq!(values.len(), w * h, "grid size mismatch");

    let along_rows = axis_gradient(h, w, |i, j| values[i * w + j], |i, j| i * w + j);
    let along_columns = axis_gradient(w, h, |i, j| values[j * w + i], |i, j| j * w + i);

    VectorField {
        dimensions,
        components: [along_rows, along_columns],
    }
}

/// Differentiate along an axis of length `n`, for each of `lanes`
/// lines perpendicular to it. `value(i, lane)` reads position `i` of a
/// lane; `offset(i, lane)` is where its derivative is stored.
fn axis_gradient(
    n: usize,
    lanes: usize,
    value: impl Fn(usize, usize) -> f64,
    offset: impl Fn(usize, usize) -> usize,
) -> Vec<f64> {
    let mut out = vec![0.0; n * lanes];
    if n < 2 {
        return out;
    }
    for lane in 0..lanes {
        out[offset(0, lane)] = value(1, lane) - value(0, lane);
        out[offset(n - 1, lane)] = value(n - 1, lane) - value(n - 2, lane);
        for i in 1..n - 1 {
            out[offset(i, lane)] = (value(i + 1, lane) - value(i - 1, lane)) / 2.0;
        }
    }
    out
}

/// Min-max normalize in place to `[0, 1]`; constant input becomes zeros.
fn normalize_unit(values: &mut [f64]) {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    for v in values.iter_mut() {
        *v = if range > 0.0 { (*v - min) / range } else { 0.0 };
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    /// 40x40 image, black left of x = 20, white from x = 20 on.
    fn vertical_edge_image() -> GrayImage {
        GrayImage::from_fn(40, 40, |x, _y| {
            if x < 20 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn gradient_matches_central_and_one_sided_differences() {
        // f(x) = x^2 on a single row: [0, 1, 4, 9, 16].
        let values = [0.0, 1.0, 4.0, 9.0, 16.0];
        let field = gradient(&values, dims(5, 1));
        assert_eq!(field.component(COLUMN_AXIS), &[1.0, 2.0, 4.0, 6.0, 7.0]);
        // Single row: nothing to differentiate vertically.
        assert!(field.component(ROW_AXIS).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn gradient_along_rows_uses_row_axis() {
        // f(x, y) = 3y on a 2x3 grid.
        let values = [0.0, 0.0, 3.0, 3.0, 6.0, 6.0];
        let field = gradient(&values, dims(2, 3));
        assert!(field.component(ROW_AXIS).iter().all(|&v| (v - 3.0).abs() < 1e-12));
        assert!(field.component(COLUMN_AXIS).iter().all(|&v| v == 0.0));
        assert!((field.at(ROW_AXIS, 1, 2) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn strength_is_normalized() {
        let strength = edge_strength(&vertical_edge_image(), 3.0);
        let max = strength.iter().copied().fold(f64::MIN, f64::max);
        let min = strength.iter().copied().fold(f64::MAX, f64::min);
        assert!((max - 1.0).abs() < 1e-12);
        assert!(min.abs() < 1e-12);
    }

    #[test]
    fn strength_peaks_at_the_edge() {
        let strength = edge_strength(&vertical_edge_image(), 3.0);
        let row = &strength[20 * 40..21 * 40];
        let peak = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((18..=21).contains(&peak), "peak at column {peak}");
    }

    #[test]
    fn uniform_image_has_no_force() {
        let img = GrayImage::from_pixel(20, 20, image::Luma([90]));
        let field = edge_field(&img, 3.0);
        assert!(field.component(ROW_AXIS).iter().all(|&v| v == 0.0));
        assert!(field.component(COLUMN_AXIS).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn force_points_toward_the_edge() {
        let field = edge_field(&vertical_edge_image(), 3.0);
        // Left of the edge the force pushes right, right of it pushes left.
        assert!(field.at(COLUMN_AXIS, 14, 20) > 0.0);
        assert!(field.at(COLUMN_AXIS, 25, 20) < 0.0);
        // A vertical edge exerts no vertical force mid-image.
        assert!(field.at(ROW_AXIS, 14, 20).abs() < 1e-9);
    }

    #[test]
    fn field_dimensions_match_image() {
        let img = GrayImage::new(13, 7);
        let field = edge_field(&img, 2.0);
        assert_eq!(field.dimensions(), dims(13, 7));
        assert_eq!(field.component(ROW_AXIS).len(), 91);
    }

    #[test]
    fn from_components_checks_sizes() {
        let ok = VectorField::from_components(dims(2, 2), vec![0.0; 4], vec![1.0; 4]);
        assert!(ok.is_ok());
        let bad = VectorField::from_components(dims(2, 2), vec![0.0; 3], vec![1.0; 4]);
        assert!(matches!(bad, Err(RefineError::InvalidConfig(_))));
    }
}
