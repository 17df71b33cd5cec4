//! The stateful IK solver.
//!
//! [`IkSolver`] turns a [`TargetSet`] into a [`JointConfiguration`] on every
//! control-loop tick.  It owns the warm start (the last good configuration),
//! seeds the optimizer with it, and never lets a failure escape `solve`:
//! model errors, non-convergence and non-finite results are recorded, the
//! solver reports [`SolverHealth::Degraded`], and the last good configuration
//! is served again.

use std::sync::Arc;

use parking_lot::Mutex;
use teleop_types::{
    FailureRecord, JointConfiguration, JointDescriptor, ModelError, ResolvedTargets,
    SolveError, SolverHealth, TargetSet,
};
use tracing::{debug, info, warn};

use crate::guard::{run_optimizer, GuardedRobot};
use crate::optimizer::{DlsOptimizer, Optimizer, OptimizerConfig, OptimizerReport};
use crate::robot::RobotModel;
use crate::warmup::{neutral_targets, warmup_with, WarmupResult};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Settings for one [`IkSolver`].
#[derive(Debug, Clone, PartialEq)]
pub struct IkSolverConfig {
    /// Convergence criteria and iteration budget for every solve.
    pub optimizer: OptimizerConfig,
    /// Run [`warmup_with`] during construction.
    pub warmup_on_init: bool,
    /// Poses substituted for missing targets.  When `None`, the robot's own
    /// end-effector poses at the seed configuration are used if it can
    /// report them, identity poses otherwise.
    pub neutral_targets: Option<ResolvedTargets>,
}

impl Default for IkSolverConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            warmup_on_init: true,
            neutral_targets: None,
        }
    }
}

/// Counters describing the solver's history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolveStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Failures since the last success.
    pub consecutive_failures: u64,
    /// Optimizer iterations used by the last successful solve.
    pub last_iterations: Option<u32>,
}

// ────────────────────────────────────────────────────────────────────────────
// Solver
// ────────────────────────────────────────────────────────────────────────────

struct SolverState {
    warm_start: JointConfiguration,
    health: SolverHealth,
    last_error: Option<FailureRecord>,
    stats: SolveStats,
}

/// Real-time IK solver bound to one robot model.
///
/// `solve` takes `&self`; the warm-start state sits behind an exclusive lock
/// so concurrent callers serialise instead of racing.  The joint vector
/// length is fixed at construction.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use teleop_ik::chain_robot::{ChainRobot, CostWeights};
/// use teleop_ik::solver::IkSolver;
/// use teleop_types::{JointConfiguration, TargetSet};
///
/// let robot = Arc::new(ChainRobot::upper_body(CostWeights::new(1.0, 0.5)));
/// let solver = IkSolver::new(robot, Some(JointConfiguration::zeros(8)));
/// let q = solver.solve(&TargetSet::new());
/// assert_eq!(q, solver.last_good());
/// ```
pub struct IkSolver {
    robot: Arc<dyn RobotModel>,
    optimizer: Box<dyn Optimizer>,
    config: IkSolverConfig,
    descriptor: Option<JointDescriptor>,
    neutral: ResolvedTargets,
    dof: usize,
    warmup: Option<WarmupResult>,
    state: Mutex<SolverState>,
}

impl IkSolver {
    /// Create a solver with default settings and the built-in
    /// [`DlsOptimizer`].
    ///
    /// `fallback` is served when the robot cannot supply a usable default
    /// configuration.  Construction never fails: an unusable robot yields a
    /// solver in [`SolverHealth::Degraded`].
    pub fn new(robot: Arc<dyn RobotModel>, fallback: Option<JointConfiguration>) -> Self {
        Self::with_config(robot, fallback, IkSolverConfig::default())
    }

    pub fn with_config(
        robot: Arc<dyn RobotModel>,
        fallback: Option<JointConfiguration>,
        config: IkSolverConfig,
    ) -> Self {
        Self::with_optimizer(robot, fallback, config, Box::new(DlsOptimizer::new()))
    }

    /// Create a solver around a custom optimizer.
    pub fn with_optimizer(
        robot: Arc<dyn RobotModel>,
        fallback: Option<JointConfiguration>,
        config: IkSolverConfig,
        optimizer: Box<dyn Optimizer>,
    ) -> Self {
        let guarded = GuardedRobot::new(robot.as_ref());
        let robot_name = guarded.name();

        let descriptor = match guarded.joint_descriptor() {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(robot = %robot_name, error = %e, "Joint descriptor unavailable");
                None
            }
        };

        let (warm_start, health, last_error) =
            match validate_default(guarded.default_configuration(), descriptor.as_ref()) {
                Ok(q) => (q, SolverHealth::Ready, None),
                Err(e) => {
                    let seed = choose_fallback(fallback, descriptor.as_ref(), &robot_name);
                    warn!(
                        robot = %robot_name,
                        error = %e,
                        dof = seed.len(),
                        "Default configuration unavailable; starting DEGRADED on fallback"
                    );
                    (seed, SolverHealth::Degraded, Some(FailureRecord::now(e.into())))
                }
            };

        let dof = descriptor.as_ref().map_or(warm_start.len(), JointDescriptor::dof);
        let neutral = match &config.neutral_targets {
            Some(t) if t.is_finite() => *t,
            _ => neutral_targets(&guarded, &warm_start),
        };

        let warmup = config
            .warmup_on_init
            .then(|| warmup_with(robot.as_ref(), optimizer.as_ref(), &config.optimizer));

        info!(
            robot = %robot_name,
            optimizer = optimizer.name(),
            dof,
            state = %health,
            "IK solver initialised"
        );

        Self {
            robot,
            optimizer,
            config,
            descriptor,
            neutral,
            dof,
            warmup,
            state: Mutex::new(SolverState {
                warm_start,
                health,
                last_error,
                stats: SolveStats::default(),
            }),
        }
    }

    /// Solve for `targets`, seeded with the current warm start.
    ///
    /// Always returns a configuration: the new solution on success, the last
    /// good configuration otherwise.  Missing targets are filled from the
    /// neutral set.
    pub fn solve(&self, targets: &TargetSet) -> JointConfiguration {
        let mut state = self.state.lock();
        state.stats.attempts += 1;

        let resolved = targets.resolve(&self.neutral);
        match self.attempt(&resolved, &state.warm_start) {
            Ok(report) => {
                if state.health == SolverHealth::Degraded {
                    info!(
                        after_failures = state.stats.consecutive_failures,
                        "IK solver recovered"
                    );
                }
                debug!(
                    iterations = report.iterations,
                    residual = report.residual_norm,
                    convergence = ?report.convergence,
                    "IK solve ok"
                );
                let q = JointConfiguration::new(report.solution);
                state.warm_start = q.clone();
                state.health = SolverHealth::Ready;
                state.stats.successes += 1;
                state.stats.consecutive_failures = 0;
                state.stats.last_iterations = Some(report.iterations);
                q
            }
            Err(error) => {
                if state.health == SolverHealth::Ready {
                    warn!(kind = error.kind(), error = %error, "IK solve failed; serving last good configuration");
                } else {
                    debug!(kind = error.kind(), error = %error, "IK solve still failing");
                }
                state.health = SolverHealth::Degraded;
                state.stats.failures += 1;
                state.stats.consecutive_failures += 1;
                state.last_error = Some(FailureRecord::now(error));
                state.warm_start.clone()
            }
        }
    }

    fn attempt(
        &self,
        targets: &ResolvedTargets,
        seed: &JointConfiguration,
    ) -> Result<OptimizerReport, SolveError> {
        if !targets.is_finite() {
            return Err(SolveError::Numerical("target pose contains NaN or Inf".to_string()));
        }

        let problem = GuardedRobot::new(self.robot.as_ref()).build_cost_problem(targets)?;
        if problem.dof() != self.dof {
            return Err(ModelError::DimensionMismatch {
                expected: self.dof,
                got: problem.dof(),
            }
            .into());
        }

        let report = run_optimizer(
            self.optimizer.as_ref(),
            problem.as_ref(),
            seed.as_slice(),
            &self.config.optimizer,
        )?;
        if report.solution.len() != self.dof || !report.solution.iter().all(|v| v.is_finite()) {
            return Err(SolveError::Numerical(
                "optimizer returned an unusable solution".to_string(),
            ));
        }
        Ok(report)
    }

    /// [`SolverHealth::Ready`] after a successful solve (or a usable robot
    /// default), [`SolverHealth::Degraded`] otherwise.
    pub fn current_state(&self) -> SolverHealth {
        self.state.lock().health
    }

    /// The most recent failure, if any.
    pub fn last_error(&self) -> Option<FailureRecord> {
        self.state.lock().last_error.clone()
    }

    /// The configuration the next solve will be seeded with.
    pub fn last_good(&self) -> JointConfiguration {
        self.state.lock().warm_start.clone()
    }

    pub fn stats(&self) -> SolveStats {
        self.state.lock().stats.clone()
    }

    /// Joint vector length, fixed for the solver's lifetime.
    pub fn dof(&self) -> usize {
        self.dof
    }

    pub fn neutral_targets(&self) -> &ResolvedTargets {
        &self.neutral
    }

    pub fn descriptor(&self) -> Option<&JointDescriptor> {
        self.descriptor.as_ref()
    }

    /// Outcome of the construction-time warm-up, if it ran.
    pub fn warmup_result(&self) -> Option<&WarmupResult> {
        self.warmup.as_ref()
    }

    pub fn config(&self) -> &IkSolverConfig {
        &self.config
    }
}

/// Accept the robot default only if it is finite and matches the descriptor.
fn validate_default(
    default: Result<JointConfiguration, ModelError>,
    descriptor: Option<&JointDescriptor>,
) -> Result<JointConfiguration, ModelError> {
    let q = default?;
    if !q.is_finite() {
        return Err(ModelError::failed("default_configuration", "contains NaN or Inf"));
    }
    if let Some(d) = descriptor {
        if d.dof() != q.len() {
            return Err(ModelError::DimensionMismatch {
                expected: d.dof(),
                got: q.len(),
            });
        }
    }
    Ok(q)
}

/// Caller fallback if it fits the descriptor, otherwise the descriptor's own
/// fallback.  Without a descriptor the caller fallback is taken as-is.
fn choose_fallback(
    fallback: Option<JointConfiguration>,
    descriptor: Option<&JointDescriptor>,
    robot_name: &str,
) -> JointConfiguration {
    match (fallback, descriptor) {
        (Some(q), Some(d)) if q.len() == d.dof() && q.is_finite() => q,
        (Some(q), Some(d)) => {
            warn!(
                robot = %robot_name,
                expected = d.dof(),
                got = q.len(),
                "Ignoring unusable fallback configuration"
            );
            d.fallback_configuration()
        }
        (None, Some(d)) => d.fallback_configuration(),
        (Some(q), None) => q,
        (None, None) => JointConfiguration::zeros(0),
    }
}
