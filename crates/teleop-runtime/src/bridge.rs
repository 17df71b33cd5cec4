//! XR frame → IK target conversion.
//!
//! The transport layer hands over raw [`XrFrame`]s: WebXR rigid transforms
//! as column-major 4×4 matrices in the XR reference space (y up, −z
//! forward).  [`PoseBridge`] turns them into a [`TargetSet`] in the robot
//! base frame (z up, x forward).  [`PoseSource`] and [`JointSink`] are the
//! seams the control loop talks to.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use teleop_types::{JointConfiguration, Pose, PoseError, SolverHealth, TargetSet};
use thiserror::Error;
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum BridgeError {
    #[error("Invalid {slot} pose: {source}")]
    InvalidPose {
        slot: &'static str,
        #[source]
        source: PoseError,
    },

    #[error("Unknown input mode '{0}' (expected 'controller' or 'hand')")]
    UnknownInputMode(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Frames
// ────────────────────────────────────────────────────────────────────────────

/// Which per-hand pose drives the wrist target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Motion-controller grip pose.
    #[default]
    Controller,
    /// Tracked-hand wrist joint.
    Hand,
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMode::Controller => write!(f, "controller"),
            InputMode::Hand => write!(f, "hand"),
        }
    }
}

impl FromStr for InputMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "controller" => Ok(InputMode::Controller),
            "hand" => Ok(InputMode::Hand),
            other => Err(BridgeError::UnknownInputMode(other.to_string())),
        }
    }
}

/// Poses reported for one hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HandFrame {
    /// Controller grip space.
    pub grip: Option<[f32; 16]>,
    /// Hand-tracking wrist joint.
    pub wrist: Option<[f32; 16]>,
}

/// One XR sample.  Every matrix is column-major in the XR reference space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct XrFrame {
    /// Viewer (head) pose.
    pub head: Option<[f32; 16]>,
    pub left: HandFrame,
    pub right: HandFrame,
}

// ────────────────────────────────────────────────────────────────────────────
// Bridge
// ────────────────────────────────────────────────────────────────────────────

/// Rotation taking WebXR axes (x right, y up, −z forward) to robot axes
/// (x forward, y left, z up).
pub fn webxr_to_robot() -> Isometry3<f32> {
    #[rustfmt::skip]
    let r = Matrix3::new(
        0.0, 0.0, -1.0,
        -1.0, 0.0, 0.0,
        0.0, 1.0, 0.0,
    );
    Isometry3::from_parts(
        Translation3::identity(),
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r)),
    )
}

/// Converts [`XrFrame`]s into [`TargetSet`]s.
///
/// # Example
///
/// ```rust
/// use teleop_runtime::bridge::{InputMode, PoseBridge, XrFrame};
///
/// let bridge = PoseBridge::new(InputMode::Controller);
/// // Head 1.6 m above the XR floor origin.
/// #[rustfmt::skip]
/// let head = [
///     1.0, 0.0, 0.0, 0.0,
///     0.0, 1.0, 0.0, 0.0,
///     0.0, 0.0, 1.0, 0.0,
///     0.0, 1.6, 0.0, 1.0,
/// ];
/// let frame = XrFrame { head: Some(head), ..XrFrame::default() };
/// let targets = bridge.frame_to_targets(&frame).unwrap();
/// assert!((targets.head.unwrap().translation().z - 1.6).abs() < 1e-6);
/// assert!(targets.left_wrist.is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PoseBridge {
    mode: InputMode,
    xr_to_robot: Isometry3<f32>,
}

impl PoseBridge {
    /// A bridge using the standard WebXR → robot axis change.
    pub fn new(mode: InputMode) -> Self {
        Self::with_transform(mode, webxr_to_robot())
    }

    /// A bridge with an explicit XR-space → robot-base transform (e.g. to
    /// place the operator's floor origin somewhere in the robot frame).
    pub fn with_transform(mode: InputMode, xr_to_robot: Isometry3<f32>) -> Self {
        Self { mode, xr_to_robot }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Convert one frame.  Absent poses stay `None`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidPose`] if a present matrix is not a
    /// finite rigid transform.
    pub fn frame_to_targets(&self, frame: &XrFrame) -> Result<TargetSet, BridgeError> {
        let hand = |h: &HandFrame| match self.mode {
            InputMode::Controller => h.grip,
            InputMode::Hand => h.wrist,
        };
        Ok(TargetSet {
            left_wrist: self.convert("left_wrist", hand(&frame.left))?,
            right_wrist: self.convert("right_wrist", hand(&frame.right))?,
            head: self.convert("head", frame.head)?,
        })
    }

    fn convert(&self, slot: &'static str, raw: Option<[f32; 16]>) -> Result<Option<Pose>, BridgeError> {
        let Some(values) = raw else {
            return Ok(None);
        };
        let pose = Pose::from_column_major(&values)
            .map_err(|source| BridgeError::InvalidPose { slot, source })?;
        // Re-express both the position and the local axes in robot terms.
        let axes = Isometry3::from_parts(Translation3::identity(), self.xr_to_robot.rotation.inverse());
        Ok(Some(Pose::from(self.xr_to_robot * pose.isometry() * axes)))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loop seams
// ────────────────────────────────────────────────────────────────────────────

/// Produces at most one [`TargetSet`] per control tick.
pub trait PoseSource: Send {
    /// The most recent targets, or `None` when nothing new has arrived.
    fn next_targets(&mut self) -> Option<TargetSet>;
}

/// Consumes each tick's joint configuration.
pub trait JointSink: Send {
    fn publish(&mut self, q: &JointConfiguration, health: SolverHealth);
}

/// Single-slot mailbox between a transport thread and the control loop.
///
/// `submit` overwrites any frame not yet taken, so the loop always sees the
/// newest sample and never a backlog.
#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<XrFrame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, replacing any pending one.  Returns `true` if a pending
    /// frame was dropped.
    pub fn submit(&self, frame: XrFrame) -> bool {
        self.inner.lock().replace(frame).is_some()
    }

    pub fn take(&self) -> Option<XrFrame> {
        self.inner.lock().take()
    }
}

/// [`PoseSource`] that converts frames from a [`FrameSlot`].
///
/// A malformed frame is logged and skipped; the tick sees no new targets.
pub struct BridgedSource {
    slot: FrameSlot,
    bridge: PoseBridge,
}

impl BridgedSource {
    pub fn new(slot: FrameSlot, bridge: PoseBridge) -> Self {
        Self { slot, bridge }
    }
}

impl PoseSource for BridgedSource {
    fn next_targets(&mut self) -> Option<TargetSet> {
        let frame = self.slot.take()?;
        match self.bridge.frame_to_targets(&frame) {
            Ok(targets) => Some(targets),
            Err(e) => {
                warn!(error = %e, "Dropping malformed XR frame");
                None
            }
        }
    }
}
