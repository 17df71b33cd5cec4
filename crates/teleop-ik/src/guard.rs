//! Single call sites for everything the core does not control.
//!
//! Each [`RobotModel`] operation and each optimizer run goes through exactly
//! one function here.  Panics are caught with `catch_unwind` and turned into
//! ordinary errors so they are recorded like any other failure.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use teleop_types::{
    JointConfiguration, JointDescriptor, ModelError, ResolvedTargets, SolveError,
};

use crate::optimizer::{Optimizer, OptimizerConfig, OptimizerReport};
use crate::problem::CostProblem;
use crate::robot::RobotModel;

/// Borrowed view of a robot model whose calls never panic outward.
pub(crate) struct GuardedRobot<'a> {
    robot: &'a dyn RobotModel,
}

impl<'a> GuardedRobot<'a> {
    pub(crate) fn new(robot: &'a dyn RobotModel) -> Self {
        Self { robot }
    }

    pub(crate) fn default_configuration(&self) -> Result<JointConfiguration, ModelError> {
        guarded("default_configuration", || self.robot.default_configuration())
    }

    pub(crate) fn joint_descriptor(&self) -> Result<JointDescriptor, ModelError> {
        guarded("joint_descriptor", || self.robot.joint_descriptor())
    }

    pub(crate) fn build_cost_problem(
        &self,
        targets: &ResolvedTargets,
    ) -> Result<Box<dyn CostProblem>, ModelError> {
        guarded("build_cost_problem", || {
            self.robot
                .build_cost_problem(&targets.left_wrist, &targets.right_wrist, &targets.head)
        })
    }

    pub(crate) fn end_effector_poses(
        &self,
        q: &JointConfiguration,
    ) -> Result<ResolvedTargets, ModelError> {
        guarded("end_effector_poses", || self.robot.end_effector_poses(q))
    }

    pub(crate) fn name(&self) -> String {
        guarded("name", || Ok(self.robot.name().to_string()))
            .unwrap_or_else(|_| "<unnamed robot>".to_string())
    }
}

/// Run `optimizer` on `problem`, converting a panic inside either into
/// [`SolveError::Numerical`].
pub(crate) fn run_optimizer(
    optimizer: &dyn Optimizer,
    problem: &dyn CostProblem,
    seed: &[f32],
    config: &OptimizerConfig,
) -> Result<OptimizerReport, SolveError> {
    panic::catch_unwind(AssertUnwindSafe(|| optimizer.minimize(problem, seed, config)))
        .unwrap_or_else(|payload| {
            Err(SolveError::Numerical(format!(
                "optimizer panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
}

fn guarded<T>(
    operation: &str,
    call: impl FnOnce() -> Result<T, ModelError>,
) -> Result<T, ModelError> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        Err(ModelError::Panicked {
            operation: operation.to_string(),
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
