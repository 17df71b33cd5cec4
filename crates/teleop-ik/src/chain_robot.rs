//! A [`RobotModel`] built from three serial chains.
//!
//! [`ChainRobot`] concatenates a left-arm, right-arm and head chain into one
//! joint vector (in that order).  Its cost problem stacks a weighted 6-row
//! pose residual per chain, plus optional rest-posture rows, and supplies the
//! analytic Jacobian from [`KinematicChain::geometric_jacobian`].

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Vector3};
use teleop_types::{JointConfiguration, JointDescriptor, ModelError, Pose, ResolvedTargets};

use crate::chain::{origin, ChainJoint, KinematicChain};
use crate::problem::CostProblem;
use crate::robot::RobotModel;

/// Residual rows contributed by one chain (3 position + 3 orientation).
const ROWS_PER_CHAIN: usize = 6;

/// Relative weights of the cost terms.
///
/// There is no `Default`: the right balance depends on the robot and the
/// operator, so callers always choose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    /// Wrist position weight.
    pub position: f32,
    /// Wrist orientation weight.
    pub orientation: f32,
    /// Head position weight.
    pub head_position: f32,
    /// Head orientation weight.
    pub head_orientation: f32,
    /// Pull towards the default configuration.  `0.0` disables the term.
    pub rest: f32,
}

impl CostWeights {
    /// Same weights for wrists and head, no rest term.
    pub fn new(position: f32, orientation: f32) -> Self {
        Self {
            position,
            orientation,
            head_position: position,
            head_orientation: orientation,
            rest: 0.0,
        }
    }

    pub fn with_head(mut self, position: f32, orientation: f32) -> Self {
        self.head_position = position;
        self.head_orientation = orientation;
        self
    }

    pub fn with_rest(mut self, rest: f32) -> Self {
        self.rest = rest;
        self
    }
}

/// Left arm, right arm and head chains sharing one base frame.
#[derive(Debug, Clone)]
pub struct ChainRobot {
    name: String,
    left: Arc<KinematicChain>,
    right: Arc<KinematicChain>,
    head: Arc<KinematicChain>,
    default: JointConfiguration,
    weights: CostWeights,
}

impl ChainRobot {
    /// Assemble a robot from its three chains.  The default configuration is
    /// all zeros, clamped into the joint limits.
    pub fn new(
        name: impl Into<String>,
        left: KinematicChain,
        right: KinematicChain,
        head: KinematicChain,
        weights: CostWeights,
    ) -> Self {
        let mut robot = Self {
            name: name.into(),
            left: Arc::new(left),
            right: Arc::new(right),
            head: Arc::new(head),
            default: JointConfiguration::zeros(0),
            weights,
        };
        let mut zeros = vec![0.0; robot.dof()];
        robot.clamp(&mut zeros);
        robot.default = JointConfiguration::new(zeros);
        robot
    }

    /// Replace the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DimensionMismatch`] if `q` has the wrong length.
    pub fn with_default_configuration(mut self, q: JointConfiguration) -> Result<Self, ModelError> {
        if q.len() != self.dof() {
            return Err(ModelError::DimensionMismatch {
                expected: self.dof(),
                got: q.len(),
            });
        }
        self.default = q;
        Ok(self)
    }

    /// A generic 8-DOF humanoid upper body: two 3-DOF arms (shoulder yaw,
    /// shoulder pitch, elbow pitch) and a 2-DOF neck (yaw, pitch).
    ///
    /// Robot frame: x forward, y left, z up, base on the floor.
    pub fn upper_body(weights: CostWeights) -> Self {
        Self::new(
            "upper_body",
            arm("left", 0.2),
            arm("right", -0.2),
            KinematicChain::new(
                vec![
                    ChainJoint::revolute("neck_yaw", origin([0.0, 0.0, 1.6], [0.0; 3]), Vector3::z(), -1.4, 1.4),
                    ChainJoint::revolute("neck_pitch", origin([0.0; 3], [0.0; 3]), Vector3::y(), -0.6, 0.8),
                ],
                origin([0.1, 0.0, 0.1], [0.0; 3]),
            ),
            weights,
        )
    }

    pub fn weights(&self) -> CostWeights {
        self.weights
    }

    pub fn dof(&self) -> usize {
        self.left.dof() + self.right.dof() + self.head.dof()
    }

    fn chains(&self) -> [&Arc<KinematicChain>; 3] {
        [&self.left, &self.right, &self.head]
    }

    fn clamp(&self, q: &mut [f32]) {
        let mut offset = 0;
        for chain in self.chains() {
            let end = offset + chain.dof();
            chain.clamp_joints(&mut q[offset..end]);
            offset = end;
        }
    }
}

fn arm(side: &str, shoulder_y: f32) -> KinematicChain {
    KinematicChain::new(
        vec![
            ChainJoint::revolute(
                format!("{side}_shoulder_yaw"),
                origin([0.0, shoulder_y, 1.4], [0.0; 3]),
                Vector3::z(),
                -1.6,
                1.6,
            ),
            ChainJoint::revolute(format!("{side}_shoulder_pitch"), origin([0.0; 3], [0.0; 3]), Vector3::y(), -2.0, 2.0),
            ChainJoint::revolute(format!("{side}_elbow"), origin([0.3, 0.0, 0.0], [0.0; 3]), Vector3::y(), -2.4, 0.2),
        ],
        origin([0.25, 0.0, 0.0], [0.0; 3]),
    )
}

impl RobotModel for ChainRobot {
    fn default_configuration(&self) -> Result<JointConfiguration, ModelError> {
        Ok(self.default.clone())
    }

    fn joint_descriptor(&self) -> Result<JointDescriptor, ModelError> {
        let joints = self.chains().into_iter().flat_map(|c| c.joints().iter());
        let mut names = Vec::with_capacity(self.dof());
        let mut lower = Vec::with_capacity(self.dof());
        let mut upper = Vec::with_capacity(self.dof());
        for joint in joints {
            names.push(joint.name.clone());
            lower.push(joint.lower_limit);
            upper.push(joint.upper_limit);
        }
        JointDescriptor::new(names, lower, upper)
    }

    fn build_cost_problem(
        &self,
        left: &Pose,
        right: &Pose,
        head: &Pose,
    ) -> Result<Box<dyn CostProblem>, ModelError> {
        let weights = self.weights;
        if ![weights.position, weights.orientation, weights.head_position, weights.head_orientation, weights.rest]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0)
        {
            return Err(ModelError::failed(
                "build_cost_problem",
                format!("cost weights must be finite and non-negative: {weights:?}"),
            ));
        }

        let rest = (weights.rest > 0.0).then(|| self.default.as_slice().to_vec());
        Ok(Box::new(ChainCostProblem {
            terms: [
                ChainTerm::new(&self.left, left, weights.position, weights.orientation),
                ChainTerm::new(&self.right, right, weights.position, weights.orientation),
                ChainTerm::new(&self.head, head, weights.head_position, weights.head_orientation),
            ],
            dof: self.dof(),
            rest,
            rest_weight: weights.rest,
        }))
    }

    fn end_effector_poses(&self, q: &JointConfiguration) -> Result<ResolvedTargets, ModelError> {
        if q.len() != self.dof() {
            return Err(ModelError::DimensionMismatch {
                expected: self.dof(),
                got: q.len(),
            });
        }
        let q = q.as_slice();
        let (l, rest) = q.split_at(self.left.dof());
        let (r, h) = rest.split_at(self.right.dof());
        Ok(ResolvedTargets {
            left_wrist: Pose::from(self.left.forward_kinematics(l)),
            right_wrist: Pose::from(self.right.forward_kinematics(r)),
            head: Pose::from(self.head.forward_kinematics(h)),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cost problem
// ────────────────────────────────────────────────────────────────────────────

struct ChainTerm {
    chain: Arc<KinematicChain>,
    target: Pose,
    position_weight: f32,
    orientation_weight: f32,
}

impl ChainTerm {
    fn new(chain: &Arc<KinematicChain>, target: &Pose, position_weight: f32, orientation_weight: f32) -> Self {
        Self {
            chain: Arc::clone(chain),
            target: *target,
            position_weight,
            orientation_weight,
        }
    }
}

struct ChainCostProblem {
    terms: [ChainTerm; 3],
    dof: usize,
    rest: Option<Vec<f32>>,
    rest_weight: f32,
}

impl ChainCostProblem {
    fn rows(&self) -> usize {
        ROWS_PER_CHAIN * self.terms.len() + self.rest.as_ref().map_or(0, |_| self.dof)
    }
}

impl CostProblem for ChainCostProblem {
    fn dof(&self) -> usize {
        self.dof
    }

    fn residual(&self, q: &[f32]) -> DVector<f32> {
        let mut r = DVector::zeros(self.rows());
        let mut offset = 0;

        for (k, term) in self.terms.iter().enumerate() {
            let n = term.chain.dof();
            let ee = term.chain.forward_kinematics(&q[offset..offset + n]);
            let position_error = ee.translation.vector - term.target.translation();
            // Rotation taking the target orientation to the current one.
            let orientation_error = (ee.rotation * term.target.rotation().inverse()).scaled_axis();

            let row = k * ROWS_PER_CHAIN;
            r.fixed_rows_mut::<3>(row)
                .copy_from(&(position_error * term.position_weight));
            r.fixed_rows_mut::<3>(row + 3)
                .copy_from(&(orientation_error * term.orientation_weight));
            offset += n;
        }

        if let Some(rest) = &self.rest {
            let base = ROWS_PER_CHAIN * self.terms.len();
            for (i, (qi, di)) in q.iter().zip(rest.iter()).enumerate() {
                r[base + i] = self.rest_weight * (qi - di);
            }
        }

        r
    }

    fn jacobian(&self, q: &[f32]) -> DMatrix<f32> {
        let mut jacobian = DMatrix::zeros(self.rows(), self.dof);
        let mut offset = 0;

        for (k, term) in self.terms.iter().enumerate() {
            let n = term.chain.dof();
            let block = term.chain.geometric_jacobian(&q[offset..offset + n]);
            let row = k * ROWS_PER_CHAIN;
            for j in 0..n {
                for i in 0..3 {
                    jacobian[(row + i, offset + j)] = term.position_weight * block[(i, j)];
                    jacobian[(row + 3 + i, offset + j)] = term.orientation_weight * block[(3 + i, j)];
                }
            }
            offset += n;
        }

        if self.rest.is_some() {
            let base = ROWS_PER_CHAIN * self.terms.len();
            for i in 0..self.dof {
                jacobian[(base + i, i)] = self.rest_weight;
            }
        }

        jacobian
    }

    fn clamp(&self, q: &mut [f32]) {
        let mut offset = 0;
        for term in &self.terms {
            let end = offset + term.chain.dof();
            term.chain.clamp_joints(&mut q[offset..end]);
            offset = end;
        }
    }
}
