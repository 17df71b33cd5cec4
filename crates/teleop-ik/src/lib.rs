//! `teleop-ik` – real-time inverse kinematics for XR teleoperation.
//!
//! Turns three streamed Cartesian targets (left wrist, right wrist, head) into
//! a joint configuration for an arbitrary, externally supplied robot model,
//! without ever letting a model or solver failure reach the control loop.
//!
//! # Modules
//!
//! - [`robot`] – [`RobotModel`][robot::RobotModel]: the capability every robot
//!   must provide (default configuration, joint descriptor, cost builder).
//! - [`problem`] – [`CostProblem`][problem::CostProblem]: the least-squares
//!   problem a robot builds for one set of targets.
//! - [`optimizer`] – [`Optimizer`][optimizer::Optimizer] and the damped
//!   least-squares [`DlsOptimizer`][optimizer::DlsOptimizer].
//! - [`warmup`](mod@warmup) – [`warmup`][warmup::warmup]: a one-time, failure-absorbing
//!   solve that pays first-use costs before the loop starts.
//! - [`solver`] – [`IkSolver`][solver::IkSolver]: the stateful core that owns
//!   the warm start and falls back to the last good configuration.
//! - [`chain`] / [`chain_robot`] – a serial-chain robot model
//!   ([`ChainRobot`][chain_robot::ChainRobot]) with analytic Jacobians.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use teleop_ik::chain_robot::{ChainRobot, CostWeights};
//! use teleop_ik::solver::IkSolver;
//! use teleop_types::{SolverHealth, TargetSet};
//!
//! let robot = Arc::new(ChainRobot::upper_body(CostWeights::new(1.0, 0.5)));
//! let solver = IkSolver::new(robot, None);
//!
//! // An empty target set resolves to the neutral pose.
//! let q = solver.solve(&TargetSet::new());
//! assert_eq!(q.len(), solver.dof());
//! assert_eq!(solver.current_state(), SolverHealth::Ready);
//! ```

pub mod chain;
pub mod chain_robot;
mod guard;
pub mod optimizer;
pub mod problem;
pub mod robot;
pub mod solver;
pub mod warmup;

pub use chain::{ChainJoint, KinematicChain};
pub use chain_robot::{ChainRobot, CostWeights};
pub use optimizer::{Convergence, DlsOptimizer, Optimizer, OptimizerConfig, OptimizerReport};
pub use problem::{CostProblem, FnCostProblem};
pub use robot::RobotModel;
pub use solver::{IkSolver, IkSolverConfig, SolveStats};
pub use warmup::{warmup, warmup_with, WarmupResult, WarmupStage};
