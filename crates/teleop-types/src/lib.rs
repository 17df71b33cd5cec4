//! `teleop-types` – shared data model for the XR teleoperation IK stack.
//!
//! Every other crate in the workspace speaks in these types: the pose bridge
//! produces [`TargetSet`]s, the IK core consumes them together with a robot's
//! [`JointDescriptor`] and emits [`JointConfiguration`]s, and failures are
//! expressed through [`ModelError`] / [`SolveError`].

use std::fmt;

use chrono::{DateTime, Utc};
use nalgebra::{Isometry3, Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest tolerated deviation of `RᵀR` from identity when importing a
/// homogeneous matrix.
const ROTATION_TOLERANCE: f32 = 1e-3;

// ────────────────────────────────────────────────────────────────────────────
// Pose
// ────────────────────────────────────────────────────────────────────────────

/// A rigid 3-D transform (position + orientation).
///
/// Immutable once constructed.  The orientation is always a unit quaternion.
/// Imports from untrusted data ([`Pose::from_matrix`], deserialisation) also
/// reject non-finite values; [`Pose::is_finite`] checks poses built in code.
///
/// Serialised as `{ "translation": [x, y, z], "rotation": [i, j, k, w] }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PoseRepr", into = "PoseRepr")]
pub struct Pose {
    isometry: Isometry3<f32>,
}

/// Wire form of [`Pose`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PoseRepr {
    translation: [f32; 3],
    rotation: [f32; 4],
}

impl From<Pose> for PoseRepr {
    fn from(pose: Pose) -> Self {
        let t = pose.translation();
        let q = pose.rotation();
        Self {
            translation: [t.x, t.y, t.z],
            rotation: [q.i, q.j, q.k, q.w],
        }
    }
}

impl TryFrom<PoseRepr> for Pose {
    type Error = PoseError;

    fn try_from(repr: PoseRepr) -> Result<Self, PoseError> {
        if repr.translation.iter().chain(repr.rotation.iter()).any(|v| !v.is_finite()) {
            return Err(PoseError::NonFinite);
        }
        let [i, j, k, w] = repr.rotation;
        let quaternion = nalgebra::Quaternion::new(w, i, j, k);
        let norm = quaternion.norm();
        if (norm - 1.0).abs() > ROTATION_TOLERANCE {
            return Err(PoseError::NotUnitQuaternion { norm });
        }
        let [x, y, z] = repr.translation;
        Ok(Self::new(
            Vector3::new(x, y, z),
            UnitQuaternion::from_quaternion(quaternion),
        ))
    }
}

impl Pose {
    /// Build a pose from a translation and a unit quaternion.
    pub fn new(translation: Vector3<f32>, rotation: UnitQuaternion<f32>) -> Self {
        Self {
            isometry: Isometry3::from_parts(Translation3::from(translation), rotation),
        }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            isometry: Isometry3::identity(),
        }
    }

    /// A pure translation.
    pub fn from_translation(x: f32, y: f32, z: f32) -> Self {
        Self::new(Vector3::new(x, y, z), UnitQuaternion::identity())
    }

    /// Import a 4×4 homogeneous transform.
    ///
    /// # Errors
    ///
    /// Returns [`PoseError`] when the matrix contains non-finite entries, its
    /// bottom row is not `0 0 0 1`, or its upper-left block is not a proper
    /// rotation.
    pub fn from_matrix(m: &Matrix4<f32>) -> Result<Self, PoseError> {
        if m.iter().any(|v| !v.is_finite()) {
            return Err(PoseError::NonFinite);
        }
        let bottom = [m[(3, 0)], m[(3, 1)], m[(3, 2)], m[(3, 3)] - 1.0];
        if bottom.iter().any(|v| v.abs() > 1e-6) {
            return Err(PoseError::NotHomogeneous);
        }

        let r: Matrix3<f32> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let deviation = (r.transpose() * r - Matrix3::identity()).norm();
        if deviation > ROTATION_TOLERANCE || r.determinant() <= 0.0 {
            return Err(PoseError::NotRotation { deviation });
        }

        let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
        Ok(Self::new(Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]), rotation))
    }

    /// Import a column-major 4×4 matrix, the layout used by
    /// `XRRigidTransform.matrix`.
    ///
    /// # Errors
    ///
    /// Same as [`Pose::from_matrix`].
    pub fn from_column_major(values: &[f32; 16]) -> Result<Self, PoseError> {
        Self::from_matrix(&Matrix4::from_column_slice(values))
    }

    /// Homogeneous 4×4 representation.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        self.isometry.to_homogeneous()
    }

    pub fn isometry(&self) -> &Isometry3<f32> {
        &self.isometry
    }

    pub fn translation(&self) -> Vector3<f32> {
        self.isometry.translation.vector
    }

    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.isometry.rotation
    }

    /// `true` when every component of the translation and rotation is finite.
    pub fn is_finite(&self) -> bool {
        self.isometry.translation.vector.iter().all(|v| v.is_finite())
            && self.isometry.rotation.coords.iter().all(|v| v.is_finite())
    }

    /// Compose two poses: `self * other`.
    pub fn compose(&self, other: &Pose) -> Pose {
        Pose {
            isometry: self.isometry * other.isometry,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<Isometry3<f32>> for Pose {
    fn from(isometry: Isometry3<f32>) -> Self {
        Self { isometry }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Targets
// ────────────────────────────────────────────────────────────────────────────

/// The three Cartesian targets streamed from the XR device each tick.
///
/// Every slot is optional on the wire; [`TargetSet::resolve`] fills missing
/// slots from a neutral set so the optimizer never sees an absent target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSet {
    pub left_wrist: Option<Pose>,
    pub right_wrist: Option<Pose>,
    pub head: Option<Pose>,
}

impl TargetSet {
    /// An empty target set (every slot resolves to neutral).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_left_wrist(mut self, pose: Pose) -> Self {
        self.left_wrist = Some(pose);
        self
    }

    pub fn with_right_wrist(mut self, pose: Pose) -> Self {
        self.right_wrist = Some(pose);
        self
    }

    pub fn with_head(mut self, pose: Pose) -> Self {
        self.head = Some(pose);
        self
    }

    /// `true` when all three targets are present.
    pub fn is_complete(&self) -> bool {
        self.left_wrist.is_some() && self.right_wrist.is_some() && self.head.is_some()
    }

    /// Fill every missing slot from `neutral`.
    pub fn resolve(&self, neutral: &ResolvedTargets) -> ResolvedTargets {
        ResolvedTargets {
            left_wrist: self.left_wrist.unwrap_or(neutral.left_wrist),
            right_wrist: self.right_wrist.unwrap_or(neutral.right_wrist),
            head: self.head.unwrap_or(neutral.head),
        }
    }
}

impl From<ResolvedTargets> for TargetSet {
    fn from(t: ResolvedTargets) -> Self {
        Self {
            left_wrist: Some(t.left_wrist),
            right_wrist: Some(t.right_wrist),
            head: Some(t.head),
        }
    }
}

/// A [`TargetSet`] with every slot filled in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTargets {
    pub left_wrist: Pose,
    pub right_wrist: Pose,
    pub head: Pose,
}

impl ResolvedTargets {
    /// Three identity poses.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_finite(&self) -> bool {
        self.left_wrist.is_finite() && self.right_wrist.is_finite() && self.head.is_finite()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Joint space
// ────────────────────────────────────────────────────────────────────────────

/// An ordered, fixed-length joint vector.
///
/// Only meaningful relative to the robot model that produced its
/// [`JointDescriptor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointConfiguration(Vec<f32>);

impl JointConfiguration {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// A zero vector of length `dof`.
    pub fn zeros(dof: usize) -> Self {
        Self(vec![0.0; dof])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `true` when no entry is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Largest element-wise absolute difference, or `None` when the lengths
    /// differ.
    pub fn max_abs_diff(&self, other: &JointConfiguration) -> Option<f32> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f32::max),
        )
    }
}

impl From<Vec<f32>> for JointConfiguration {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl AsRef<[f32]> for JointConfiguration {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Describes the joint space a robot model optimizes over: joint names in
/// vector order and their position bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointDescriptor {
    names: Vec<String>,
    lower: Vec<f32>,
    upper: Vec<f32>,
}

impl JointDescriptor {
    /// Build a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidDescriptor`] when the three vectors have
    /// different lengths, a bound is NaN, or a lower bound exceeds its upper
    /// bound.
    pub fn new(names: Vec<String>, lower: Vec<f32>, upper: Vec<f32>) -> Result<Self, ModelError> {
        if names.len() != lower.len() || names.len() != upper.len() {
            return Err(ModelError::InvalidDescriptor(format!(
                "{} names, {} lower bounds, {} upper bounds",
                names.len(),
                lower.len(),
                upper.len()
            )));
        }
        for (i, (lo, hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(ModelError::InvalidDescriptor(format!(
                    "joint '{}' has bounds [{lo}, {hi}]",
                    names[i]
                )));
            }
        }
        Ok(Self { names, lower, upper })
    }

    /// A descriptor whose joints have no position limits.
    pub fn unbounded(names: Vec<String>) -> Self {
        let n = names.len();
        Self {
            names,
            lower: vec![f32::NEG_INFINITY; n],
            upper: vec![f32::INFINITY; n],
        }
    }

    /// Degree-of-freedom count.
    pub fn dof(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn lower(&self) -> &[f32] {
        &self.lower
    }

    pub fn upper(&self) -> &[f32] {
        &self.upper
    }

    /// Clamp `q` into the joint bounds in place. Extra entries are untouched.
    pub fn clamp(&self, q: &mut [f32]) {
        for ((v, lo), hi) in q.iter_mut().zip(self.lower.iter()).zip(self.upper.iter()) {
            *v = v.clamp(*lo, *hi);
        }
    }

    /// `true` when `q` has this descriptor's length and lies within bounds.
    pub fn contains(&self, q: &JointConfiguration) -> bool {
        q.len() == self.dof()
            && q.as_slice()
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(v, (lo, hi))| *v >= *lo && *v <= *hi)
    }

    /// The configuration served when a robot cannot supply its own default:
    /// zero, clamped into each joint's bounds.
    pub fn fallback_configuration(&self) -> JointConfiguration {
        let mut q = vec![0.0; self.dof()];
        self.clamp(&mut q);
        JointConfiguration::new(q)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Health
// ────────────────────────────────────────────────────────────────────────────

/// Operating state of an IK solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SolverHealth {
    /// Holding a valid last-good configuration from a successful solve (or
    /// the robot's own default).
    Ready,
    /// The last attempt failed; serving a stale or fallback configuration.
    Degraded,
}

impl fmt::Display for SolverHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverHealth::Ready => write!(f, "READY"),
            SolverHealth::Degraded => write!(f, "DEGRADED"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Failure reported by (or on behalf of) a robot model.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelError {
    #[error("Robot model failed in {operation}: {details}")]
    Failed { operation: String, details: String },

    #[error("Robot model panicked in {operation}: {message}")]
    Panicked { operation: String, message: String },

    #[error("Robot model dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Robot model does not support {0}")]
    Unsupported(String),

    #[error("Invalid joint descriptor: {0}")]
    InvalidDescriptor(String),
}

impl ModelError {
    /// Shorthand for [`ModelError::Failed`].
    pub fn failed(operation: impl Into<String>, details: impl fmt::Display) -> Self {
        Self::Failed {
            operation: operation.into(),
            details: details.to_string(),
        }
    }
}

/// Every way a solve (or warm-up) can fail. None of these escape the solver;
/// they are recorded and mapped to [`SolverHealth::Degraded`].
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SolveError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("No convergence after {iterations} iterations (residual {residual})")]
    Convergence { iterations: u32, residual: f32 },

    #[error("Numerical error: {0}")]
    Numerical(String),
}

impl SolveError {
    /// Short label for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SolveError::Model(_) => "model",
            SolveError::Convergence { .. } => "convergence",
            SolveError::Numerical(_) => "numerical",
        }
    }
}

/// Errors produced while importing a pose.
#[derive(Error, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PoseError {
    #[error("Pose contains NaN or Inf")]
    NonFinite,

    #[error("Pose matrix bottom row is not [0 0 0 1]")]
    NotHomogeneous,

    #[error("Pose matrix is not a proper rotation (deviation {deviation})")]
    NotRotation { deviation: f32 },

    #[error("Pose rotation is not a unit quaternion (norm {norm})")]
    NotUnitQuaternion { norm: f32 },
}

/// A recorded solve failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub error: SolveError,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    /// Stamp `error` with the current time.
    pub fn now(error: SolveError) -> Self {
        Self {
            error,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn pose_json_roundtrip() {
        let pose = Pose::new(
            Vector3::new(0.1, -0.2, 1.5),
            UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2),
        );
        let json = serde_json::to_string(&pose).unwrap();
        assert!(json.contains("\"translation\""));
        let back: Pose = serde_json::from_str(&json).unwrap();
        assert_relative_eq!(back.translation(), pose.translation(), epsilon = 1e-6);
        assert_relative_eq!(back.rotation().coords, pose.rotation().coords, epsilon = 1e-6);
    }

    #[test]
    fn deserialising_rejects_non_rigid_pose() {
        let scaled = r#"{"translation":[0,0,0],"rotation":[0,0,0,2]}"#;
        let err = serde_json::from_str::<Pose>(scaled).unwrap_err();
        assert!(err.to_string().contains("unit quaternion"), "{err}");

        // JSON has no NaN literal; an overflowing number parses to infinity.
        let infinite = r#"{"translation":[1e39,0,0],"rotation":[0,0,0,1]}"#;
        assert!(serde_json::from_str::<Pose>(infinite).is_err());
    }

    #[test]
    fn pose_from_identity_matrix() {
        let pose = Pose::from_matrix(&Matrix4::identity()).unwrap();
        assert_eq!(pose, Pose::identity());
    }

    #[test]
    fn pose_matrix_roundtrip_preserves_translation_and_rotation() {
        let rotation = UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2);
        let pose = Pose::new(Vector3::new(0.3, -0.2, 1.1), rotation);
        let back = Pose::from_matrix(&pose.to_matrix()).unwrap();
        assert_relative_eq!(back.translation().x, 0.3, epsilon = 1e-6);
        assert_relative_eq!(back.translation().z, 1.1, epsilon = 1e-6);
        assert!(back.rotation().angle_to(&rotation) < 1e-5);
    }

    #[test]
    fn pose_from_column_major_reads_translation_from_last_column() {
        let mut values = [0.0; 16];
        values[0] = 1.0;
        values[5] = 1.0;
        values[10] = 1.0;
        values[15] = 1.0;
        values[12] = 1.0;
        values[13] = 2.0;
        values[14] = 3.0;
        let pose = Pose::from_column_major(&values).unwrap();
        assert_relative_eq!(pose.translation().x, 1.0);
        assert_relative_eq!(pose.translation().y, 2.0);
        assert_relative_eq!(pose.translation().z, 3.0);
    }

    #[test]
    fn pose_rejects_non_finite_matrix() {
        let mut m = Matrix4::identity();
        m[(0, 3)] = f32::NAN;
        assert_eq!(Pose::from_matrix(&m), Err(PoseError::NonFinite));
    }

    #[test]
    fn pose_rejects_bad_bottom_row() {
        let mut m = Matrix4::identity();
        m[(3, 0)] = 0.5;
        assert_eq!(Pose::from_matrix(&m), Err(PoseError::NotHomogeneous));
    }

    #[test]
    fn pose_rejects_scaled_rotation_block() {
        let mut m = Matrix4::identity();
        m[(0, 0)] = 2.0;
        assert!(matches!(
            Pose::from_matrix(&m),
            Err(PoseError::NotRotation { .. })
        ));
    }

    #[test]
    fn pose_rejects_reflection() {
        let mut m = Matrix4::identity();
        m[(2, 2)] = -1.0;
        assert!(matches!(
            Pose::from_matrix(&m),
            Err(PoseError::NotRotation { .. })
        ));
    }

    #[test]
    fn target_set_resolve_fills_missing_slots() {
        let neutral = ResolvedTargets {
            left_wrist: Pose::from_translation(0.0, 0.3, 0.0),
            right_wrist: Pose::from_translation(0.0, -0.3, 0.0),
            head: Pose::from_translation(0.0, 0.0, 0.5),
        };
        let given = Pose::from_translation(0.4, 0.3, 0.1);
        let resolved = TargetSet::new().with_left_wrist(given).resolve(&neutral);
        assert_eq!(resolved.left_wrist, given);
        assert_eq!(resolved.right_wrist, neutral.right_wrist);
        assert_eq!(resolved.head, neutral.head);
    }

    #[test]
    fn target_set_completeness() {
        assert!(!TargetSet::new().is_complete());
        assert!(TargetSet::from(ResolvedTargets::identity()).is_complete());
    }

    #[test]
    fn joint_configuration_max_abs_diff() {
        let a = JointConfiguration::new(vec![0.0, 1.0, -1.0]);
        let b = JointConfiguration::new(vec![0.1, 1.0, -1.5]);
        assert_relative_eq!(a.max_abs_diff(&b).unwrap(), 0.5);
        assert!(a.max_abs_diff(&JointConfiguration::zeros(2)).is_none());
    }

    #[test]
    fn joint_configuration_detects_non_finite() {
        assert!(JointConfiguration::zeros(3).is_finite());
        assert!(!JointConfiguration::new(vec![0.0, f32::INFINITY]).is_finite());
    }

    #[test]
    fn descriptor_rejects_mismatched_lengths() {
        let err = JointDescriptor::new(vec!["a".into(), "b".into()], vec![0.0], vec![1.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidDescriptor(_)));
    }

    #[test]
    fn descriptor_rejects_inverted_bounds() {
        let err = JointDescriptor::new(vec!["elbow".into()], vec![1.0], vec![-1.0]).unwrap_err();
        assert!(err.to_string().contains("elbow"));
    }

    #[test]
    fn descriptor_fallback_is_zero_clamped_into_bounds() {
        let d = JointDescriptor::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![-1.0, 0.2, -3.0],
            vec![1.0, 1.0, -0.5],
        )
        .unwrap();
        let q = d.fallback_configuration();
        assert_eq!(q.as_slice(), &[0.0, 0.2, -0.5]);
        assert!(d.contains(&q));
    }

    #[test]
    fn unbounded_descriptor_fallback_is_zero_vector() {
        let d = JointDescriptor::unbounded(vec!["a".into(), "b".into()]);
        assert_eq!(d.fallback_configuration(), JointConfiguration::zeros(2));
    }

    #[test]
    fn solver_health_display_and_serde() {
        assert_eq!(SolverHealth::Ready.to_string(), "READY");
        assert_eq!(SolverHealth::Degraded.to_string(), "DEGRADED");
        let json = serde_json::to_string(&SolverHealth::Degraded).unwrap();
        assert_eq!(json, "\"DEGRADED\"");
    }

    #[test]
    fn joint_configuration_serializes_as_plain_array() {
        let q = JointConfiguration::new(vec![0.5, -0.25]);
        assert_eq!(serde_json::to_string(&q).unwrap(), "[0.5,-0.25]");
    }

    #[test]
    fn solve_error_kinds_and_display() {
        let model: SolveError = ModelError::failed("build_cost_problem", "boom").into();
        assert_eq!(model.kind(), "model");
        assert!(model.to_string().contains("build_cost_problem"));

        let conv = SolveError::Convergence {
            iterations: 50,
            residual: 0.25,
        };
        assert_eq!(conv.kind(), "convergence");
        assert!(conv.to_string().contains("50 iterations"));

        assert_eq!(SolveError::Numerical("NaN".into()).kind(), "numerical");
    }

    #[test]
    fn failure_record_roundtrip() {
        let record = FailureRecord::now(SolveError::Numerical("Inf in step".into()));
        let json = serde_json::to_string(&record).unwrap();
        let back: FailureRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.error, record.error);
        assert_eq!(back.at, record.at);
    }
}
