//! `teleop-runtime` – glue between the XR pose stream and the IK core.
//!
//! # Modules
//!
//! - [`bridge`] – [`PoseBridge`][bridge::PoseBridge]: converts WebXR frames
//!   (column-major matrices, y up) into robot-frame
//!   [`TargetSet`][teleop_types::TargetSet]s, plus the
//!   [`PoseSource`][bridge::PoseSource] / [`JointSink`][bridge::JointSink]
//!   seams and a single-slot [`FrameSlot`][bridge::FrameSlot] mailbox.
//! - [`teleop_loop`] – [`TeleopLoop`][teleop_loop::TeleopLoop]: the
//!   fixed-rate tick that solves the newest targets and publishes the result.
//! - [`health`] – [`SolveWatchdog`][health::SolveWatchdog]: reports the link
//!   as stale when the joint stream has frozen.
//! - [`config`] – [`TeleopConfig`][config::TeleopConfig]: TOML settings
//!   vault with `TELEOP_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with optional OTLP export.

pub mod bridge;
pub mod config;
pub mod health;
pub mod teleop_loop;
pub mod telemetry;

pub use bridge::{BridgeError, BridgedSource, FrameSlot, InputMode, JointSink, PoseBridge, PoseSource, XrFrame};
pub use config::{ConfigError, TeleopConfig};
pub use health::{LinkHealth, SolveWatchdog};
pub use teleop_loop::{TeleopLoop, TickOutcome};
