//! Iterative contour relaxation under elastic and edge forces.
//!
//! A [`Relaxer`] is a two-state machine. While [`RelaxState::Active`]
//! each [`step`](Relaxer::step):
//!
//! 1. snaps every point to a pixel index (clamped into the image,
//!    truncated by default, so sub-pixel precision is dropped here),
//! 2. samples the external force at those pixels,
//! 3. moves all points at once: `x' = (I + τA)^-1 (x + τF)`.
//!
//! After the configured number of iterations it becomes
//! [`RelaxState::Done`]. There is no convergence test: the iteration
//! budget is the only stopping rule.
//!
//! Force sampling follows the axis-order contract documented in
//! [`crate::edge_field`]: the column component drives x and the row
//! component drives y.

use nalgebra::DMatrix;

use crate::edge_field::{COLUMN_AXIS, ROW_AXIS, VectorField};
use crate::elastic::RelaxationOperator;
use crate::types::{Contour, PixelSnap, Point, RefineError};

/// Where a relaxation run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxState {
    /// Iterations remain.
    Active {
        /// Iterations left to run.
        remaining: usize,
    },
    /// The iteration budget is spent.
    Done,
}

/// Per-run knobs that are not part of the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaxParams {
    /// Number of iterations K.
    pub iterations: usize,
    /// Coordinate-to-pixel conversion when sampling the field.
    pub pixel_snap: PixelSnap,
    /// Record the snapped contour every `record_every` iterations
    /// (0 disables recording).
    pub record_every: usize,
}

impl RelaxParams {
    /// `iterations` iterations with truncating snap and no recording.
    #[must_use]
    pub const fn new(iterations: usize) -> Self {
        Self {
            iterations,
            pixel_snap: PixelSnap::Truncate,
            record_every: 0,
        }
    }
}

/// Outcome of a finished relaxation.
#[derive(Debug, Clone, PartialEq)]
pub struct Relaxed {
    /// Final points, clamped into the image.
    pub contour: Contour,
    /// Iterations actually run.
    pub iterations: usize,
    /// Point samples that fell outside the image and were clamped.
    pub clamped_samples: usize,
    /// Snapped contours recorded during the run (empty unless
    /// recording was enabled).
    pub trajectory: Vec<Contour>,
}

/// A contour being relaxed on one image.
///
/// Borrows the shared force field and operator; owns only its own
/// point positions.
#[derive(Debug)]
pub struct Relaxer<'a> {
    field: &'a VectorField,
    operator: &'a RelaxationOperator,
    params: RelaxParams,
    /// N×2: column 0 holds x, column 1 holds y.
    positions: DMatrix<f64>,
    state: RelaxState,
    completed: usize,
    clamped_samples: usize,
    trajectory: Vec<Contour>,
}

impl<'a> Relaxer<'a> {
    /// Start relaxing `contour`.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::InvalidConfig`] if the operator was built
    /// for a different point count or the field is empty.
    pub fn new(
        contour: &Contour,
        field: &'a VectorField,
        operator: &'a RelaxationOperator,
        params: RelaxParams,
    ) -> Result<Self, RefineError> {
        if contour.len() != operator.size() {
            return Err(RefineError::InvalidConfig(format!(
                "operator built for {} points, contour has {}",
                operator.size(),
                contour.len()
            )));
        }
        if field.dimensions().area() == 0 {
            return Err(RefineError::InvalidConfig(
                "force field is empty".to_string(),
            ));
        }

        let pts = contour.points();
        let positions = DMatrix::from_fn(pts.len(), 2, |i, axis| {
            if axis == 0 { pts[i].x } else { pts[i].y }
        });

        let state = if params.iterations == 0 {
            RelaxState::Done
        } else {
            RelaxState::Active {
                remaining: params.iterations,
            }
        };

        let mut relaxer = Self {
            field,
            operator,
            params,
            positions,
            state,
            completed: 0,
            clamped_samples: 0,
            trajectory: Vec::new(),
        };
        if params.record_every > 0 {
            let snapped = relaxer.snapped();
            relaxer.trajectory.push(snapped);
        }
        Ok(relaxer)
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RelaxState {
        self.state
    }

    /// Iterations completed so far.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.completed
    }

    /// Run one iteration. Does nothing once [`RelaxState::Done`].
    pub fn step(&mut self) -> RelaxState {
        let RelaxState::Active { remaining } = self.state else {
            return self.state;
        };

        let tau = self.operator.time_step();
        let mut rhs = self.positions.clone();
        for i in 0..rhs.nrows() {
            let (xi, yi) = self.sample_index(i);
            // Swapped read: column derivative is the x force.
            let fx = self.field.at(COLUMN_AXIS, xi, yi);
            let fy = self.field.at(ROW_AXIS, xi, yi);
            rhs[(i, 0)] = tau.mul_add(fx, rhs[(i, 0)]);
            rhs[(i, 1)] = tau.mul_add(fy, rhs[(i, 1)]);
        }
        self.positions = self.operator.apply(&rhs);

        let index = self.completed;
        self.completed += 1;
        if self.params.record_every > 0 && index % self.params.record_every == 0 {
            let snapped = self.snapped();
            self.trajectory.push(snapped);
        }

        self.state = if remaining > 1 {
            RelaxState::Active {
                remaining: remaining - 1,
            }
        } else {
            RelaxState::Done
        };
        self.state
    }

    /// Current points clamped into the image, without snapping.
    #[must_use]
    pub fn contour(&self) -> Contour {
        let dims = self.field.dimensions();
        let max_x = f64::from(dims.width.saturating_sub(1));
        let max_y = f64::from(dims.height.saturating_sub(1));
        Contour::new(
            self.positions
                .row_iter()
                .map(|row| Point::new(clamp(row[0], max_x), clamp(row[1], max_y)))
                .collect(),
        )
    }

    /// Step until [`RelaxState::Done`] and return the result.
    #[must_use]
    pub fn run(mut self) -> Relaxed {
        while matches!(self.step(), RelaxState::Active { .. }) {}
        self.finish()
    }

    /// Stop where the relaxer is and return the result.
    #[must_use]
    pub fn finish(self) -> Relaxed {
        Relaxed {
            contour: self.contour(),
            iterations: self.completed,
            clamped_samples: self.clamped_samples,
            trajectory: self.trajectory,
        }
    }

    /// Pixel index used to sample the field for point `i`.
    fn sample_index(&mut self, i: usize) -> (usize, usize) {
        let dims = self.field.dimensions();
        let x = self.positions[(i, 0)];
        let y = self.positions[(i, 1)];
        if !in_range(x, dims.width) || !in_range(y, dims.height) {
            self.clamped_samples += 1;
        }
        let snap = self.params.pixel_snap;
        (snap.index(x, dims.width), snap.index(y, dims.height))
    }

    /// Current points snapped to pixel indices.
    #[allow(clippy::cast_precision_loss)]
    fn snapped(&self) -> Contour {
        let dims = self.field.dimensions();
        let snap = self.params.pixel_snap;
        Contour::new(
            self.positions
                .row_iter()
                .map(|row| {
                    Point::new(
                        snap.index(row[0], dims.width) as f64,
                        snap.index(row[1], dims.height) as f64,
                    )
                })
                .collect(),
        )
    }
}

/// Relax `contour` for `params.iterations` iterations.
///
/// # Errors
///
/// See [`Relaxer::new`].
pub fn relax(
    contour: &Contour,
    field: &VectorField,
    operator: &RelaxationOperator,
    params: RelaxParams,
) -> Result<Relaxed, RefineError> {
    Ok(Relaxer::new(contour, field, operator, params)?.run())
}

fn in_range(value: f64, extent: u32) -> bool {
    value >= 0.0 && value <= f64::from(extent.saturating_sub(1))
}

fn clamp(value: f64, max: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, max) }
}
