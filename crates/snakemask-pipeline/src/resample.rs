//! Contour resampling: turn a hand-drawn outline into a closed loop of
//! near-evenly spaced points.
//!
//! The outline is closed by joining its last vertex back to the first.
//! Each edge of length `len` receives `n = round(len / spacing)`
//! samples at parameters `t = i / n` for `i` in `0..n`, so every
//! emitted spacing along that edge is exactly `len / n`. The edge's end
//! vertex is emitted as the start of the following edge, which keeps
//! shared vertices from being duplicated.
//!
//! An edge shorter than half the spacing gets `n = 0` and contributes
//! no points of its own; the loop simply continues from its endpoint.

use crate::types::{Contour, Point};

/// Resample a polygon outline into a closed contour with point spacing
/// close to `spacing`.
///
/// `points` may be open or already closed (first vertex repeated at the
/// end); the zero-length closing edge of a closed outline contributes
/// nothing. Returns an empty contour for an empty outline or a
/// non-positive `spacing`.
///
/// # Examples
///
/// ```
/// use snakemask_pipeline::Point;
/// use snakemask_pipeline::resample::resample_closed;
///
/// let square = [
///     Point::new(0.0, 0.0),
///     Point::new(10.0, 0.0),
///     Point::new(10.0, 10.0),
///     Point::new(0.0, 10.0),
/// ];
/// let contour = resample_closed(&square, 2.0);
/// // 40 px perimeter / 2 px spacing.
/// assert_eq!(contour.len(), 20);
/// ```
#[must_use]
pub fn resample_closed(points: &[Point], spacing: f64) -> Contour {
    if points.is_empty() || spacing <= 0.0 || !spacing.is_finite() {
        return Contour::new(Vec::new());
    }

    let edges = points
        .iter()
        .zip(points.iter().skip(1).chain(points.first()));

    let mut result = Vec::new();
    for (&a, &b) in edges {
        let n = sample_count(a.distance(b), spacing);
        #[allow(clippy::cast_precision_loss)]
        let n_f = n as f64;
        for i in 0..n {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f64 / n_f;
            result.push(Point::new(
                (b.x - a.x).mul_add(t, a.x),
                (b.y - a.y).mul_add(t, a.y),
            ));
        }
    }

    Contour::new(result)
}

/// Number of samples an edge of `length` receives.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_count(length: f64, spacing: f64) -> usize {
    let n = (length / spacing).round();
    if n.is_finite() && n > 0.0 { n as usize } else { 0 }
}

/// Total length of the closed loop through `points`.
#[must_use]
pub fn perimeter(points: &[Point]) -> f64 {
    points
        .iter()
        .zip(points.iter().skip(1).chain(points.first()))
        .map(|(a, b)| a.distance(*b))
        .sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn poly(coords: &[(f64, f64)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    /// Distances between consecutive loop points, including last→first.
    fn loop_spacings(contour: &Contour) -> Vec<f64> {
        let pts = contour.points();
        pts.iter()
            .zip(pts.iter().skip(1).chain(pts.first()))
            .map(|(a, b)| a.distance(*b))
            .collect()
    }

    #[test]
    fn empty_outline_returns_empty() {
        assert!(resample_closed(&[], 1.0).is_empty());
    }

    #[test]
    fn non_positive_spacing_returns_empty() {
        let square = poly(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]);
        assert!(resample_closed(&square, 0.0).is_empty());
        assert!(resample_closed(&square, -1.0).is_empty());
    }

    #[test]
    fn open_outline_is_closed() {
        let square = poly(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let contour = resample_closed(&square, 1.0);
        assert_eq!(contour.len(), 40);
        // The closing edge (0,10)→(0,0) is sampled too.
        assert!(contour.points().contains(&Point::new(0.0, 5.0)));
        for s in loop_spacings(&contour) {
            assert!((s - 1.0).abs() < 1e-9, "spacing {s}");
        }
    }

    #[test]
    fn explicitly_closed_outline_matches_open_one() {
        let open = poly(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let mut closed = open.clone();
        closed.push(Point::new(0.0, 0.0));
        assert_eq!(resample_closed(&open, 2.0), resample_closed(&closed, 2.0));
    }

    #[test]
    fn vertices_are_not_duplicated() {
        let tri = poly(&[(0.0, 0.0), (9.0, 0.0), (0.0, 12.0)]);
        let contour = resample_closed(&tri, 3.0);
        for s in loop_spacings(&contour) {
            assert!(s > 1e-9, "duplicate point in loop");
        }
        assert_eq!(contour.points()[0], Point::new(0.0, 0.0));
    }

    #[test]
    fn spacing_within_tolerance_on_irregular_polygon() {
        let outline = poly(&[
            (12.0, 3.0),
            (57.5, 8.25),
            (71.0, 44.0),
            (40.3, 66.6),
            (5.0, 41.0),
        ]);
        let d = 2.0;
        let contour = resample_closed(&outline, d);
        assert!(contour.len() >= 5);
        for s in loop_spacings(&contour) {
            assert!((s - d).abs() <= 0.2 * d, "spacing {s} outside 20% of {d}");
        }
    }

    #[test]
    fn count_follows_loop_length() {
        let outline = poly(&[(0.0, 0.0), (30.0, 0.0), (30.0, 40.0)]);
        let contour = resample_closed(&outline, 1.0);
        // 30 + 40 + 50.
        assert_eq!(contour.len(), 120);
        assert!((perimeter(&outline) - 120.0).abs() < 1e-12);
    }

    #[test]
    fn short_edge_contributes_nothing() {
        // The 0.2 px edge between the first two vertices rounds to zero
        // samples; its endpoint starts the next edge.
        let outline = poly(&[(0.0, 0.0), (0.2, 0.0), (10.2, 0.0), (10.2, 10.0)]);
        let contour = resample_closed(&outline, 1.0);
        assert_eq!(contour.points()[0], Point::new(0.2, 0.0));
        assert!(!contour.points().contains(&Point::new(0.0, 0.0)));
        assert_eq!(contour.len(), 10 + 10 + 14);
    }

    #[test]
    fn tiny_outline_collapses_below_stencil_size() {
        let outline = poly(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]);
        let contour = resample_closed(&outline, 1.0);
        assert!(contour.len() < crate::types::MIN_CONTOUR_POINTS);
    }
}
