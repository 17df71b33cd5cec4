//! Serial kinematic chains.
//!
//! A [`KinematicChain`] is an ordered list of actuated joints from a base
//! frame to an end-effector frame.  It stores the static transforms (origins)
//! and joint axes needed for forward kinematics and the geometric Jacobian.

use nalgebra::{DMatrix, Isometry3, Translation3, UnitQuaternion, UnitVector3, Vector3};

/// Build a static transform from a translation and roll-pitch-yaw angles
/// (extrinsic XYZ, the URDF `<origin>` convention).
pub fn origin(xyz: [f32; 3], rpy: [f32; 3]) -> Isometry3<f32> {
    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}

/// A single joint in the kinematic chain.
#[derive(Debug, Clone)]
pub struct ChainJoint {
    pub name: String,
    /// Static transform from the previous joint frame to this joint frame.
    pub origin: Isometry3<f32>,
    /// Joint axis in the joint's local frame.
    pub axis: UnitVector3<f32>,
    /// Whether this is a prismatic joint (false = revolute).
    pub is_prismatic: bool,
    /// Lower position limit (rad or m).
    pub lower_limit: f32,
    /// Upper position limit (rad or m).
    pub upper_limit: f32,
}

impl ChainJoint {
    /// A revolute joint rotating about `axis`.
    pub fn revolute(
        name: impl Into<String>,
        origin: Isometry3<f32>,
        axis: Vector3<f32>,
        lower_limit: f32,
        upper_limit: f32,
    ) -> Self {
        Self {
            name: name.into(),
            origin,
            axis: UnitVector3::new_normalize(axis),
            is_prismatic: false,
            lower_limit,
            upper_limit,
        }
    }

    /// A prismatic joint sliding along `axis`.
    pub fn prismatic(
        name: impl Into<String>,
        origin: Isometry3<f32>,
        axis: Vector3<f32>,
        lower_limit: f32,
        upper_limit: f32,
    ) -> Self {
        Self {
            is_prismatic: true,
            ..Self::revolute(name, origin, axis, lower_limit, upper_limit)
        }
    }
}

/// An ordered kinematic chain from base to end-effector.
#[derive(Debug, Clone)]
pub struct KinematicChain {
    joints: Vec<ChainJoint>,
    /// Transform from the last joint frame to the end-effector frame.
    ee_offset: Isometry3<f32>,
}

impl KinematicChain {
    pub fn new(joints: Vec<ChainJoint>, ee_offset: Isometry3<f32>) -> Self {
        Self { joints, ee_offset }
    }

    /// Number of actuated degrees of freedom.
    pub fn dof(&self) -> usize {
        self.joints.len()
    }

    /// Joint names in chain order.
    pub fn joint_names(&self) -> Vec<&str> {
        self.joints.iter().map(|j| j.name.as_str()).collect()
    }

    pub fn joints(&self) -> &[ChainJoint] {
        &self.joints
    }

    pub fn ee_offset(&self) -> &Isometry3<f32> {
        &self.ee_offset
    }

    /// Compute forward kinematics: joint positions -> end-effector pose in the
    /// base frame.
    ///
    /// # Panics
    ///
    /// Panics if `q.len() != self.dof()`.
    pub fn forward_kinematics(&self, q: &[f32]) -> Isometry3<f32> {
        assert_eq!(q.len(), self.dof(), "q.len() must equal chain DOF");

        let mut transform = Isometry3::identity();
        for (joint, &position) in self.joints.iter().zip(q.iter()) {
            transform *= joint.origin;
            transform *= joint_transform(&joint.axis, joint.is_prismatic, position);
        }
        transform * self.ee_offset
    }

    /// Per-joint frames for Jacobian computation.
    ///
    /// Returns (joint_origins_in_base, joint_axes_in_base, ee_pose).
    pub fn joint_frames(&self, q: &[f32]) -> (Vec<Vector3<f32>>, Vec<Vector3<f32>>, Isometry3<f32>) {
        assert_eq!(q.len(), self.dof(), "q.len() must equal chain DOF");

        let mut transform = Isometry3::identity();
        let mut origins = Vec::with_capacity(self.dof());
        let mut axes = Vec::with_capacity(self.dof());

        for (joint, &position) in self.joints.iter().zip(q.iter()) {
            transform *= joint.origin;
            // Joint origin and axis are taken before the joint's own motion.
            origins.push(transform.translation.vector);
            axes.push(transform.rotation * joint.axis.into_inner());
            transform *= joint_transform(&joint.axis, joint.is_prismatic, position);
        }

        (origins, axes, transform * self.ee_offset)
    }

    /// Geometric Jacobian (6 × dof): linear rows first, then angular rows.
    pub fn geometric_jacobian(&self, q: &[f32]) -> DMatrix<f32> {
        let (origins, axes, ee) = self.joint_frames(q);
        let ee_pos = ee.translation.vector;
        let mut jacobian = DMatrix::zeros(6, self.dof());

        for (i, joint) in self.joints.iter().enumerate() {
            let z_i = &axes[i];
            if joint.is_prismatic {
                jacobian[(0, i)] = z_i.x;
                jacobian[(1, i)] = z_i.y;
                jacobian[(2, i)] = z_i.z;
            } else {
                // Linear velocity: z_i x (ee_pos - o_i)
                let cross = z_i.cross(&(ee_pos - origins[i]));
                jacobian[(0, i)] = cross.x;
                jacobian[(1, i)] = cross.y;
                jacobian[(2, i)] = cross.z;
                jacobian[(3, i)] = z_i.x;
                jacobian[(4, i)] = z_i.y;
                jacobian[(5, i)] = z_i.z;
            }
        }

        jacobian
    }

    /// Clamp joint positions to their limits.
    pub fn clamp_joints(&self, q: &mut [f32]) {
        for (v, joint) in q.iter_mut().zip(self.joints.iter()) {
            *v = v.clamp(joint.lower_limit, joint.upper_limit);
        }
    }
}

/// Transform for a single joint at a given position.
fn joint_transform(axis: &UnitVector3<f32>, is_prismatic: bool, position: f32) -> Isometry3<f32> {
    if is_prismatic {
        Isometry3::from_parts(
            Translation3::from(axis.into_inner() * position),
            UnitQuaternion::identity(),
        )
    } else {
        Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_axis_angle(axis, position),
        )
    }
}
