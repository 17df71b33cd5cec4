//! Least-squares cost problems.
//!
//! A [`CostProblem`] is what a [`RobotModel`][crate::robot::RobotModel]
//! builds for one set of targets: a residual vector over the joint space that
//! is zero at the optimum, its Jacobian, and an optional projection back into
//! the feasible set.

use nalgebra::{DMatrix, DVector};

/// Perturbation used by [`finite_difference_jacobian`].
pub const FINITE_DIFFERENCE_STEP: f32 = 1e-3;

/// A nonlinear least-squares problem over a fixed-length joint vector.
pub trait CostProblem: Send {
    /// Length of the joint vector this problem is defined over.
    fn dof(&self) -> usize;

    /// Weighted residual at `q`.  The optimizer minimises `‖residual‖²`.
    fn residual(&self, q: &[f32]) -> DVector<f32>;

    /// `∂residual / ∂q` at `q` (rows = residual length, columns = `dof`).
    ///
    /// Defaults to forward finite differences; override with an analytic
    /// Jacobian where one is available.
    fn jacobian(&self, q: &[f32]) -> DMatrix<f32> {
        finite_difference_jacobian(self, q)
    }

    /// Project `q` back into the feasible set (e.g. joint limits).
    fn clamp(&self, _q: &mut [f32]) {}
}

/// Forward-difference Jacobian of `problem` at `q`.
pub fn finite_difference_jacobian<P: CostProblem + ?Sized>(problem: &P, q: &[f32]) -> DMatrix<f32> {
    let r0 = problem.residual(q);
    let mut jacobian = DMatrix::zeros(r0.len(), q.len());
    let mut probe = q.to_vec();

    for i in 0..q.len() {
        probe[i] = q[i] + FINITE_DIFFERENCE_STEP;
        let column = (problem.residual(&probe) - &r0) / FINITE_DIFFERENCE_STEP;
        jacobian.set_column(i, &column);
        probe[i] = q[i];
    }

    jacobian
}

/// A [`CostProblem`] backed by a residual closure.
///
/// Handy for robot models whose cost has no convenient analytic Jacobian.
pub struct FnCostProblem<F> {
    dof: usize,
    residual: F,
    bounds: Option<(Vec<f32>, Vec<f32>)>,
}

impl<F> FnCostProblem<F>
where
    F: Fn(&[f32]) -> DVector<f32> + Send,
{
    pub fn new(dof: usize, residual: F) -> Self {
        Self {
            dof,
            residual,
            bounds: None,
        }
    }

    /// Clamp iterates into `[lower, upper]`.
    pub fn with_bounds(mut self, lower: Vec<f32>, upper: Vec<f32>) -> Self {
        self.bounds = Some((lower, upper));
        self
    }
}

impl<F> CostProblem for FnCostProblem<F>
where
    F: Fn(&[f32]) -> DVector<f32> + Send,
{
    fn dof(&self) -> usize {
        self.dof
    }

    fn residual(&self, q: &[f32]) -> DVector<f32> {
        (self.residual)(q)
    }

    fn clamp(&self, q: &mut [f32]) {
        if let Some((lower, upper)) = &self.bounds {
            for ((v, lo), hi) in q.iter_mut().zip(lower.iter()).zip(upper.iter()) {
                *v = v.clamp(*lo, *hi);
            }
        }
    }
}
