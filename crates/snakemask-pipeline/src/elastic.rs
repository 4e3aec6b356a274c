//! Internal (elastic) energy of a closed contour and the implicit
//! relaxation operator built from it.
//!
//! Tension α penalizes stretching (first differences), rigidity β
//! penalizes bending (second differences). Discretized on a closed loop
//! of N points, their combined energy gradient is the circulant
//! pentadiagonal matrix `A` whose rows are cyclic shifts of
//!
//! ```text
//! [β, -α-4β, 2α+6β, -α-4β, β]
//! ```
//!
//! centered on the diagonal. One semi-implicit step with time step τ
//! solves `(I + τA) x' = x + τF`, so the relaxer keeps the dense inverse
//! `(I + τA)^-1` and applies it every iteration.
//!
//! The matrices are dense: contours stay in the low hundreds of points,
//! where a dense LU inverse is cheap next to the iteration loop.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::types::{MIN_CONTOUR_POINTS, RefineError};

/// Eigenvalues of `I + τA` closer to zero than this are treated as
/// singular.
const SINGULAR_EPSILON: f64 = 1e-9;

/// The five-entry band shared by every row of the elastic matrix.
#[must_use]
pub fn stencil(tension: f64, rigidity: f64) -> [f64; 5] {
    let off1 = -tension - 4.0 * rigidity;
    let center = 2.0f64.mul_add(tension, 6.0 * rigidity);
    [rigidity, off1, center, off1, rigidity]
}

/// Circulant pentadiagonal matrix of the elastic energy gradient for a
/// closed contour.
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticMatrix {
    tension: f64,
    rigidity: f64,
    matrix: DMatrix<f64>,
}

impl ElasticMatrix {
    /// Build the N×N matrix for a contour of `size` points.
    ///
    /// Row `i` is the zero-padded stencil rotated right by `i - 2`, so
    /// the stencil's center lands on the diagonal and the outer entries
    /// wrap around the corners (periodic boundary).
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::TooFewPoints`] if `size` is below
    /// [`MIN_CONTOUR_POINTS`].
    pub fn new(tension: f64, rigidity: f64, size: usize) -> Result<Self, RefineError> {
        if size < MIN_CONTOUR_POINTS {
            return Err(RefineError::TooFewPoints {
                count: size,
                minimum: MIN_CONTOUR_POINTS,
            });
        }

        let mut template = vec![0.0; size];
        template[..5].copy_from_slice(&stencil(tension, rigidity));

        let matrix = DMatrix::from_fn(size, size, |row, col| {
            template[(col + size + 2 - row) % size]
        });

        Ok(Self {
            tension,
            rigidity,
            matrix,
        })
    }

    /// Contour size N.
    #[must_use]
    pub fn size(&self) -> usize {
        self.matrix.nrows()
    }

    /// The dense matrix.
    #[must_use]
    pub const fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Eigenvalues of `I + τA`.
    ///
    /// `A` is circulant and symmetric, so its eigenvalues are the
    /// stencil's symbol `2α(1 - cos θ) + 4β(1 - cos θ)^2` at
    /// `θ = 2πk / N`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn implicit_eigenvalues(&self, time_step: f64) -> Vec<f64> {
        let n = self.size();
        (0..n)
            .map(|k| {
                let theta = 2.0 * std::f64::consts::PI * k as f64 / n as f64;
                let c = 1.0 - theta.cos();
                let lambda = (2.0 * self.tension).mul_add(c, 4.0 * self.rigidity * c * c);
                time_step.mul_add(lambda, 1.0)
            })
            .collect()
    }

    /// Invert `I + τA` into the semi-implicit relaxation operator.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::SingularOperator`] if `I + τA` has a
    /// (numerically) zero eigenvalue, the LU inverse fails, or the
    /// inverse is not finite.
    pub fn relaxation_operator(&self, time_step: f64) -> Result<RelaxationOperator, RefineError> {
        let n = self.size();
        let singular = || RefineError::SingularOperator {
            tension: self.tension,
            rigidity: self.rigidity,
            time_step,
            size: n,
        };

        if self
            .implicit_eigenvalues(time_step)
            .iter()
            .any(|mu| !mu.is_finite() || mu.abs() < SINGULAR_EPSILON)
        {
            return Err(singular());
        }

        let system = DMatrix::<f64>::identity(n, n) + self.matrix.scale(time_step);
        let inverse = system.lu().try_inverse().ok_or_else(singular)?;
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err(singular());
        }

        Ok(RelaxationOperator {
            tension: self.tension,
            rigidity: self.rigidity,
            time_step,
            matrix: inverse,
        })
    }
}

/// `(I + τA)^-1` for one contour size, applied once per iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaxationOperator {
    tension: f64,
    rigidity: f64,
    time_step: f64,
    matrix: DMatrix<f64>,
}

impl RelaxationOperator {
    /// Build the operator for a contour of `size` points.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::TooFewPoints`] for `size` below
    /// [`MIN_CONTOUR_POINTS`] and [`RefineError::SingularOperator`]
    /// when `I + τA` cannot be inverted.
    pub fn new(
        tension: f64,
        rigidity: f64,
        time_step: f64,
        size: usize,
    ) -> Result<Self, RefineError> {
        ElasticMatrix::new(tension, rigidity, size)?.relaxation_operator(time_step)
    }

    /// Contour size N this operator applies to.
    #[must_use]
    pub fn size(&self) -> usize {
        self.matrix.nrows()
    }

    /// Time step τ the operator was built with.
    #[must_use]
    pub const fn time_step(&self) -> f64 {
        self.time_step
    }

    /// `(tension, rigidity, time_step)` the operator was built with.
    #[must_use]
    pub const fn parameters(&self) -> (f64, f64, f64) {
        (self.tension, self.rigidity, self.time_step)
    }

    /// The dense inverse.
    #[must_use]
    pub const fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Multiply an N×2 matrix of point coordinates.
    #[must_use]
    pub fn apply(&self, positions: &DMatrix<f64>) -> DMatrix<f64> {
        &self.matrix * positions
    }
}

/// Relaxation operators keyed by contour size, built on first use.
///
/// All contours of one run share (α, β, τ), so every contour with the
/// same point count can reuse one operator.
#[derive(Debug)]
pub struct OperatorCache {
    tension: f64,
    rigidity: f64,
    time_step: f64,
    operators: HashMap<usize, Arc<RelaxationOperator>>,
}

impl OperatorCache {
    /// An empty cache for one parameter set.
    #[must_use]
    pub fn new(tension: f64, rigidity: f64, time_step: f64) -> Self {
        Self {
            tension,
            rigidity,
            time_step,
            operators: HashMap::new(),
        }
    }

    /// Operator for contours of `size` points.
    ///
    /// # Errors
    ///
    /// Propagates [`RelaxationOperator::new`] errors; failures are not
    /// cached.
    pub fn get(&mut self, size: usize) -> Result<Arc<RelaxationOperator>, RefineError> {
        if let Some(op) = self.operators.get(&size) {
            return Ok(Arc::clone(op));
        }
        let op = Arc::new(RelaxationOperator::new(
            self.tension,
            self.rigidity,
            self.time_step,
            size,
        )?);
        tracing::debug!(size, "built relaxation operator");
        self.operators.insert(size, Arc::clone(&op));
        Ok(op)
    }

    /// Number of distinct sizes built so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Returns `true` if nothing has been built yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}
