//! One-time solver warm-up.
//!
//! The first solve against a fresh robot model tends to be slow (lazy
//! allocations, caches, first-touch of the model's internals).  [`warmup`]
//! runs one throwaway solve at the robot's neutral pose so that cost is paid
//! before the control loop starts.  It never fails outward: every error,
//! including a panic inside the model, is reported in the [`WarmupResult`].

use std::fmt;
use std::time::{Duration, Instant};

use teleop_types::{JointConfiguration, ModelError, ResolvedTargets};
use tracing::{info, warn};

use crate::guard::{run_optimizer, GuardedRobot};
use crate::optimizer::{DlsOptimizer, Optimizer, OptimizerConfig};
use crate::robot::RobotModel;

/// The step at which a warm-up attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupStage {
    /// Neither the default configuration nor the descriptor fallback was
    /// usable.
    Seed,
    BuildCostProblem,
    Solve,
}

impl fmt::Display for WarmupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarmupStage::Seed => "seed",
            WarmupStage::BuildCostProblem => "build_cost_problem",
            WarmupStage::Solve => "solve",
        };
        f.write_str(s)
    }
}

/// Outcome of a warm-up attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmupResult {
    /// `true` when the warm-up solve completed.
    pub success: bool,
    /// Last error seen, if any.  May be set on success when the default
    /// configuration was unusable and the descriptor fallback was used.
    pub error: Option<String>,
    /// Where the attempt stopped, on failure.
    pub failed_stage: Option<WarmupStage>,
    /// Wall-clock time spent.
    pub elapsed: Duration,
    /// Optimizer iterations, when the solve ran to completion.
    pub iterations: Option<u32>,
}

impl WarmupResult {
    fn failed(stage: WarmupStage, error: impl fmt::Display, started: Instant) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            failed_stage: Some(stage),
            elapsed: started.elapsed(),
            iterations: None,
        }
    }
}

/// Warm up `robot` with the built-in [`DlsOptimizer`] and default settings.
///
/// # Example
///
/// ```rust
/// use teleop_ik::chain_robot::{ChainRobot, CostWeights};
/// use teleop_ik::warmup::warmup;
///
/// let robot = ChainRobot::upper_body(CostWeights::new(1.0, 0.5));
/// let result = warmup(&robot);
/// assert!(result.success);
/// ```
pub fn warmup(robot: &dyn RobotModel) -> WarmupResult {
    warmup_with(robot, &DlsOptimizer::new(), &OptimizerConfig::default())
}

/// Warm up `robot` with an explicit optimizer and configuration.
///
/// Stateless and idempotent: calling it again repeats the same work and
/// yields the same `success` / `error` outcome.
pub fn warmup_with(
    robot: &dyn RobotModel,
    optimizer: &dyn Optimizer,
    config: &OptimizerConfig,
) -> WarmupResult {
    let started = Instant::now();
    let guarded = GuardedRobot::new(robot);
    let robot_name = guarded.name();
    let mut last_error: Option<String> = None;

    let seed = match guarded.default_configuration() {
        Ok(q) if q.is_finite() => q,
        outcome => {
            let err = match outcome {
                Ok(_) => ModelError::failed("default_configuration", "contains NaN or Inf"),
                Err(e) => e,
            };
            last_error = Some(err.to_string());
            match guarded.joint_descriptor() {
                Ok(descriptor) => descriptor.fallback_configuration(),
                Err(desc_err) => {
                    warn!(robot = %robot_name, stage = %WarmupStage::Seed, error = %desc_err, "IK warm-up failed");
                    return WarmupResult::failed(WarmupStage::Seed, desc_err, started);
                }
            }
        }
    };

    let targets = neutral_targets(&guarded, &seed);

    let problem = match guarded.build_cost_problem(&targets) {
        Ok(p) => p,
        Err(e) => {
            warn!(robot = %robot_name, stage = %WarmupStage::BuildCostProblem, error = %e, "IK warm-up failed");
            return WarmupResult::failed(WarmupStage::BuildCostProblem, e, started);
        }
    };

    if problem.dof() != seed.len() {
        let e = ModelError::DimensionMismatch {
            expected: problem.dof(),
            got: seed.len(),
        };
        warn!(robot = %robot_name, stage = %WarmupStage::BuildCostProblem, error = %e, "IK warm-up failed");
        return WarmupResult::failed(WarmupStage::BuildCostProblem, e, started);
    }

    match run_optimizer(optimizer, problem.as_ref(), seed.as_slice(), config) {
        Ok(report) => {
            let elapsed = started.elapsed();
            info!(
                robot = %robot_name,
                optimizer = optimizer.name(),
                iterations = report.iterations,
                elapsed_ms = elapsed.as_secs_f64() * 1e3,
                "IK warm-up complete"
            );
            WarmupResult {
                success: true,
                error: last_error,
                failed_stage: None,
                elapsed,
                iterations: Some(report.iterations),
            }
        }
        Err(e) => {
            warn!(robot = %robot_name, stage = %WarmupStage::Solve, error = %e, "IK warm-up failed");
            WarmupResult::failed(WarmupStage::Solve, e, started)
        }
    }
}

/// Targets the robot already satisfies at `seed` when it can report them,
/// otherwise identity poses.
pub(crate) fn neutral_targets(robot: &GuardedRobot<'_>, seed: &JointConfiguration) -> ResolvedTargets {
    match robot.end_effector_poses(seed) {
        Ok(t) if t.is_finite() => t,
        _ => ResolvedTargets::identity(),
    }
}
