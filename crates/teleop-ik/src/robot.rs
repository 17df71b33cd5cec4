//! The [`RobotModel`] capability.
//!
//! A robot model is supplied by the caller and treated as opaque: the IK core
//! only ever asks it for a default configuration, a joint descriptor, and a
//! cost problem for a given set of targets.  Every one of these calls is
//! fallible, and the core routes each through a single guarded call site that
//! also absorbs panics raised inside the model.

use teleop_types::{JointConfiguration, JointDescriptor, ModelError, Pose, ResolvedTargets};

use crate::problem::CostProblem;

/// Kinematic and cost capability required of any robot driven by the IK core.
///
/// Implementations must be reentrant: one model may be shared by several
/// [`IkSolver`][crate::solver::IkSolver]s through an `Arc` and called from
/// different threads without additional synchronisation.
pub trait RobotModel: Send + Sync {
    /// The robot's rest configuration.  Must be side-effect free.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if the model cannot produce one.
    fn default_configuration(&self) -> Result<JointConfiguration, ModelError>;

    /// Describe the joint space (dimension, names, bounds).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if the model cannot describe itself.
    fn joint_descriptor(&self) -> Result<JointDescriptor, ModelError>;

    /// Build the optimization problem that places the left wrist, right wrist
    /// and head at the given targets.  Must be a pure function of its inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if the problem cannot be built.
    fn build_cost_problem(
        &self,
        left: &Pose,
        right: &Pose,
        head: &Pose,
    ) -> Result<Box<dyn CostProblem>, ModelError>;

    /// Forward kinematics for the three tracked frames at `q`.
    ///
    /// Optional: used to derive neutral targets that the robot already
    /// satisfies at its default configuration.  The default implementation
    /// reports [`ModelError::Unsupported`].
    fn end_effector_poses(&self, _q: &JointConfiguration) -> Result<ResolvedTargets, ModelError> {
        Err(ModelError::Unsupported("end_effector_poses".to_string()))
    }

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
