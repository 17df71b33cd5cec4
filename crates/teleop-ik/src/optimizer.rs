//! Pluggable numerical optimizers.
//!
//! The IK core never depends on a specific algorithm: it hands a
//! [`CostProblem`] and a warm-start seed to any [`Optimizer`] together with an
//! [`OptimizerConfig`] that carries the convergence criteria and iteration
//! budget.  [`DlsOptimizer`] is the built-in damped least-squares
//! (Levenberg-Marquardt style) implementation.

use nalgebra::{DMatrix, DVector};
use teleop_types::{ModelError, SolveError};

use crate::problem::CostProblem;

/// Convergence criteria and iteration budget for one optimizer run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    /// Maximum iterations.  Acts as the solve timeout.
    pub max_iterations: u32,
    /// Converged when `‖residual‖` falls below this value.
    pub tolerance: f32,
    /// Stationary when the next step would move the joints less than this.
    pub step_tolerance: f32,
    /// Stationary when the best available step lowers `‖residual‖` by less
    /// than this fraction of its current value.
    pub cost_tolerance: f32,
    /// Damping factor (lambda) each iteration starts from. Higher = more
    /// robust near singularities, but slower convergence.
    pub damping: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-4,
            step_tolerance: 1e-6,
            cost_tolerance: 1e-3,
            damping: 0.01,
        }
    }
}

/// Which criterion ended a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// The residual norm met [`OptimizerConfig::tolerance`].
    Residual,
    /// No step from the current iterate lowers the residual by more than
    /// [`OptimizerConfig::cost_tolerance`], or every candidate step is
    /// shorter than [`OptimizerConfig::step_tolerance`].  The targets are not
    /// exactly reachable and this is the closest configuration found.
    Stationary,
}

/// Outcome of a successful optimizer run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerReport {
    /// Solved joint vector.
    pub solution: Vec<f32>,
    /// Iterations used.
    pub iterations: u32,
    /// Residual norm at `solution`.
    pub residual_norm: f32,
    pub convergence: Convergence,
}

/// A numerical minimiser for [`CostProblem`]s.
///
/// Implementations must be deterministic: the same problem, seed and config
/// always produce the same result.
pub trait Optimizer: Send + Sync {
    /// Minimise `problem` starting from `seed`.
    ///
    /// # Errors
    ///
    /// - [`SolveError::Convergence`] when the budget is exhausted without
    ///   meeting either tolerance.
    /// - [`SolveError::Numerical`] when a residual, Jacobian or iterate turns
    ///   non-finite.
    /// - [`SolveError::Model`] when `seed` does not match `problem.dof()`.
    fn minimize(
        &self,
        problem: &dyn CostProblem,
        seed: &[f32],
        config: &OptimizerConfig,
    ) -> Result<OptimizerReport, SolveError>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Damped Least Squares optimizer.
///
/// Each iteration takes `dq = -Jᵀ (J Jᵀ + λ² I)⁻¹ r` and projects the result
/// through [`CostProblem::clamp`].  A step is only accepted when it lowers
/// `‖r‖`; otherwise λ grows and the step is recomputed.  λ restarts from
/// [`OptimizerConfig::damping`] every iteration, so whether an iterate is
/// final depends on that iterate alone: re-running from a returned solution
/// hands it back unchanged.
///
/// The convergence test runs before any step, so a seed that already
/// satisfies the tolerance is returned untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DlsOptimizer;

/// Damping retries per iteration before the iterate is declared stationary.
const MAX_DAMPING_RETRIES: u32 = 6;
const DAMPING_GROWTH: f32 = 10.0;
/// Lower bound on λ once a step has been rejected.
const MIN_RETRY_DAMPING: f32 = 1e-3;

impl DlsOptimizer {
    pub const fn new() -> Self {
        Self
    }
}

impl Optimizer for DlsOptimizer {
    fn minimize(
        &self,
        problem: &dyn CostProblem,
        seed: &[f32],
        config: &OptimizerConfig,
    ) -> Result<OptimizerReport, SolveError> {
        let n = problem.dof();
        if seed.len() != n {
            return Err(ModelError::DimensionMismatch {
                expected: n,
                got: seed.len(),
            }
            .into());
        }

        let mut current = Iterate::at(problem, seed.to_vec())?;

        for iteration in 0..config.max_iterations {
            if current.residual_norm < config.tolerance {
                return Ok(current.into_report(iteration, Convergence::Residual));
            }

            let jacobian = problem.jacobian(&current.q);
            if jacobian.shape() != (current.residual.len(), n) {
                return Err(SolveError::Numerical(format!(
                    "jacobian is {:?}, expected ({}, {n})",
                    jacobian.shape(),
                    current.residual.len()
                )));
            }
            ensure_finite(jacobian.iter(), "jacobian")?;

            match improve(problem, &current, &jacobian, config, iteration)? {
                Some(next) => current = next,
                None => return Ok(current.into_report(iteration, Convergence::Stationary)),
            }
        }

        Err(SolveError::Convergence {
            iterations: config.max_iterations,
            residual: current.residual_norm,
        })
    }
}

/// A joint vector with its residual.
struct Iterate {
    q: Vec<f32>,
    residual: DVector<f32>,
    residual_norm: f32,
}

impl Iterate {
    fn at(problem: &dyn CostProblem, q: Vec<f32>) -> Result<Self, SolveError> {
        let residual = problem.residual(&q);
        ensure_finite(residual.iter(), "residual")?;
        let residual_norm = residual.norm();
        Ok(Self {
            q,
            residual,
            residual_norm,
        })
    }

    fn into_report(self, iterations: u32, convergence: Convergence) -> OptimizerReport {
        OptimizerReport {
            solution: self.q,
            iterations,
            residual_norm: self.residual_norm,
            convergence,
        }
    }
}

/// Find a step from `current` that lowers the residual norm.
///
/// Returns `None` when `current` is stationary.
fn improve(
    problem: &dyn CostProblem,
    current: &Iterate,
    jacobian: &DMatrix<f32>,
    config: &OptimizerConfig,
    iteration: u32,
) -> Result<Option<Iterate>, SolveError> {
    let mut lambda = config.damping;
    for _ in 0..=MAX_DAMPING_RETRIES {
        let Some(dq) = damped_step(jacobian, &current.residual, lambda * lambda) else {
            // Singular even with damping.
            return Err(SolveError::Convergence {
                iterations: iteration,
                residual: current.residual_norm,
            });
        };
        ensure_finite(dq.iter(), "step")?;

        let mut q: Vec<f32> = current.q.iter().zip(dq.iter()).map(|(a, d)| a + d).collect();
        problem.clamp(&mut q);
        ensure_finite(q.iter(), "iterate")?;

        let step_norm = q
            .iter()
            .zip(current.q.iter())
            .map(|(now, before)| (now - before) * (now - before))
            .sum::<f32>()
            .sqrt();
        if step_norm < config.step_tolerance {
            return Ok(None);
        }

        let candidate = Iterate::at(problem, q)?;
        if candidate.residual_norm < current.residual_norm {
            let gain = current.residual_norm - candidate.residual_norm;
            if gain <= config.cost_tolerance * current.residual_norm {
                return Ok(None);
            }
            return Ok(Some(candidate));
        }
        lambda = (lambda * DAMPING_GROWTH).max(MIN_RETRY_DAMPING);
    }
    Ok(None)
}

/// `-Jᵀ (J Jᵀ + λ² I)⁻¹ r`, or `None` when the damped system is singular.
fn damped_step(
    jacobian: &DMatrix<f32>,
    residual: &DVector<f32>,
    lambda_sq: f32,
) -> Option<DVector<f32>> {
    let m = jacobian.nrows();
    let damped = jacobian * jacobian.transpose() + DMatrix::identity(m, m) * lambda_sq;
    let damped_inv = damped.try_inverse()?;
    Some(-(jacobian.transpose() * (damped_inv * residual)))
}

fn ensure_finite<'a>(
    mut values: impl Iterator<Item = &'a f32>,
    what: &str,
) -> Result<(), SolveError> {
    if values.all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SolveError::Numerical(format!("{what} contains NaN or Inf")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::FnCostProblem;
    use approx::assert_relative_eq;

    fn linear_problem(goal: [f32; 3]) -> impl CostProblem {
        FnCostProblem::new(3, move |q: &[f32]| {
            DVector::from_vec(vec![q[0] - goal[0], q[1] - goal[1], q[2] - goal[2]])
        })
    }

    #[test]
    fn converges_on_linear_problem() {
        let problem = linear_problem([0.5, -0.2, 1.0]);
        let report = DlsOptimizer::new()
            .minimize(&problem, &[0.0; 3], &OptimizerConfig::default())
            .unwrap();
        assert_eq!(report.convergence, Convergence::Residual);
        assert!(report.residual_norm < 1e-4);
        assert_relative_eq!(report.solution[0], 0.5, epsilon = 1e-4);
        assert_relative_eq!(report.solution[1], -0.2, epsilon = 1e-4);
        assert_relative_eq!(report.solution[2], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn converged_seed_is_returned_untouched() {
        let problem = linear_problem([0.5, -0.2, 1.0]);
        let seed = [0.5, -0.2, 1.0];
        let report = DlsOptimizer::new()
            .minimize(&problem, &seed, &OptimizerConfig::default())
            .unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.solution, seed.to_vec());
    }

    #[test]
    fn identical_inputs_give_identical_outputs() {
        let problem = FnCostProblem::new(2, |q: &[f32]| {
            DVector::from_vec(vec![q[0].sin() - 0.4, q[0] * q[1] - 0.1])
        });
        let config = OptimizerConfig::default();
        let a = DlsOptimizer::new().minimize(&problem, &[0.1, 0.1], &config);
        let b = DlsOptimizer::new().minimize(&problem, &[0.1, 0.1], &config);
        assert_eq!(a, b);
    }

    #[test]
    fn unreachable_target_stops_at_stationary_point() {
        // Bounds keep q0 from reaching the goal at 2.0.
        let problem = FnCostProblem::new(1, |q: &[f32]| DVector::from_vec(vec![q[0] - 2.0]))
            .with_bounds(vec![-1.0], vec![1.0]);
        let report = DlsOptimizer::new()
            .minimize(&problem, &[0.0], &OptimizerConfig::default())
            .unwrap();
        assert_eq!(report.convergence, Convergence::Stationary);
        assert_relative_eq!(report.solution[0], 1.0);
        assert_relative_eq!(report.residual_norm, 1.0);
    }

    /// Planar two-link arm (unit links) whose tip should sit at `goal`.
    fn planar_arm(goal: [f32; 2]) -> impl CostProblem {
        FnCostProblem::new(2, move |q: &[f32]| {
            let x = q[0].cos() + (q[0] + q[1]).cos();
            let y = q[0].sin() + (q[0] + q[1]).sin();
            DVector::from_vec(vec![x - goal[0], y - goal[1]])
        })
    }

    #[test]
    fn out_of_reach_goal_settles_on_closest_configuration() {
        // Tip can reach 2.0 at most; the goal is ~3.04 away.
        let problem = planar_arm([3.0, 0.5]);
        let report = DlsOptimizer::new()
            .minimize(&problem, &[0.3, 0.6], &OptimizerConfig::default())
            .unwrap();
        assert_eq!(report.convergence, Convergence::Stationary);
        assert!(report.iterations < OptimizerConfig::default().max_iterations);
        let distance = (3.0f32 * 3.0 + 0.5 * 0.5).sqrt();
        assert_relative_eq!(report.residual_norm, distance - 2.0, epsilon = 2e-2);
        assert_relative_eq!(report.solution[0], 0.5f32.atan2(3.0), epsilon = 5e-2);
    }

    #[test]
    fn restarting_from_stationary_solution_returns_it_unchanged() {
        let problem = planar_arm([3.0, 0.5]);
        let config = OptimizerConfig::default();
        let first = DlsOptimizer::new()
            .minimize(&problem, &[0.3, 0.6], &config)
            .unwrap();
        let again = DlsOptimizer::new()
            .minimize(&problem, &first.solution, &config)
            .unwrap();
        assert_eq!(again.solution, first.solution);
        assert_eq!(again.iterations, 0);
        assert_eq!(again.convergence, Convergence::Stationary);
    }

    #[test]
    fn accepted_steps_never_raise_the_residual() {
        // An undamped Gauss-Newton step from q = 2 overshoots to q ≈ -3.5,
        // where |atan q| is larger than at the seed.
        let problem = FnCostProblem::new(1, |q: &[f32]| DVector::from_vec(vec![q[0].atan()]));
        let seed = [2.0];
        let mut previous = problem.residual(&seed).norm();
        for budget in 1..6 {
            let config = OptimizerConfig {
                max_iterations: budget,
                damping: 0.0,
                ..OptimizerConfig::default()
            };
            let residual = match DlsOptimizer::new().minimize(&problem, &seed, &config) {
                Ok(report) => report.residual_norm,
                Err(SolveError::Convergence { residual, .. }) => residual,
                Err(other) => panic!("unexpected error: {other:?}"),
            };
            assert!(residual <= previous, "budget {budget}: {residual} > {previous}");
            previous = residual;
        }

        let config = OptimizerConfig {
            damping: 0.0,
            ..OptimizerConfig::default()
        };
        let report = DlsOptimizer::new().minimize(&problem, &seed, &config).unwrap();
        assert_eq!(report.convergence, Convergence::Residual);
    }

    #[test]
    fn exhausted_budget_is_convergence_error() {
        let problem = linear_problem([10.0, 10.0, 10.0]);
        let config = OptimizerConfig {
            max_iterations: 1,
            damping: 5.0,
            ..OptimizerConfig::default()
        };
        let err = DlsOptimizer::new()
            .minimize(&problem, &[0.0; 3], &config)
            .unwrap_err();
        match err {
            SolveError::Convergence {
                iterations,
                residual,
            } => {
                assert_eq!(iterations, 1);
                assert!(residual > 1.0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn nan_residual_is_numerical_error() {
        let problem = FnCostProblem::new(1, |_q: &[f32]| DVector::from_vec(vec![f32::NAN]));
        let err = DlsOptimizer::new()
            .minimize(&problem, &[0.0], &OptimizerConfig::default())
            .unwrap_err();
        assert!(matches!(err, SolveError::Numerical(_)));
    }

    #[test]
    fn residual_turning_infinite_mid_solve_is_numerical_error() {
        // Finite at the seed, infinite once q0 moves away from zero.
        let problem = FnCostProblem::new(1, |q: &[f32]| {
            if q[0] == 0.0 {
                DVector::from_vec(vec![1.0])
            } else {
                DVector::from_vec(vec![f32::INFINITY])
            }
        });
        let err = DlsOptimizer::new()
            .minimize(&problem, &[0.0], &OptimizerConfig::default())
            .unwrap_err();
        assert!(matches!(err, SolveError::Numerical(_)));
    }

    #[test]
    fn seed_length_mismatch_is_model_error() {
        let problem = linear_problem([0.0; 3]);
        let err = DlsOptimizer::new()
            .minimize(&problem, &[0.0; 2], &OptimizerConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            SolveError::Model(ModelError::DimensionMismatch {
                expected: 3,
                got: 2
            })
        );
    }

    #[test]
    fn zero_damping_on_rank_deficient_problem_fails_cleanly() {
        // A constant residual row makes J Jᵀ singular without damping.
        let problem = FnCostProblem::new(1, |q: &[f32]| DVector::from_vec(vec![q[0] - 1.0, 0.0]));
        let config = OptimizerConfig {
            damping: 0.0,
            ..OptimizerConfig::default()
        };
        let err = DlsOptimizer::new()
            .minimize(&problem, &[0.0], &config)
            .unwrap_err();
        assert!(matches!(err, SolveError::Convergence { iterations: 0, .. }));
    }
}
