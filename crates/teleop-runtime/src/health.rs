//! [`SolveWatchdog`] – IK link health monitor.
//!
//! The control loop reports every solve outcome to the watchdog.  The link is
//! *stale* once no solve has succeeded within the deadline, which is what a
//! frozen joint stream looks like from the outside.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use teleop_types::SolverHealth;

/// Health of the pose → joint link as seen by external supervisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkHealth {
    /// Recent successful solve and the solver is READY.
    Healthy,
    /// The solver is DEGRADED but a solve succeeded within the deadline.
    Degraded,
    /// No successful solve within the deadline.
    Stale,
}

/// Tracks the last successful solve and classifies link health.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use teleop_runtime::health::{LinkHealth, SolveWatchdog};
/// use teleop_types::SolverHealth;
///
/// let mut wd = SolveWatchdog::new(Duration::from_secs(1));
/// wd.record(SolverHealth::Ready);
/// assert_eq!(wd.health(), LinkHealth::Healthy);
/// ```
#[derive(Debug, Clone)]
pub struct SolveWatchdog {
    deadline: Duration,
    last_success: Instant,
    last_state: SolverHealth,
}

impl SolveWatchdog {
    /// Create a watchdog for a READY solver.  The deadline starts counting
    /// now.
    pub fn new(deadline: Duration) -> Self {
        Self::with_state(deadline, SolverHealth::Ready)
    }

    /// Create a watchdog for a solver currently in `state`.
    pub fn with_state(deadline: Duration, state: SolverHealth) -> Self {
        Self {
            deadline,
            last_success: Instant::now(),
            last_state: state,
        }
    }

    /// Record the solver state after a solve.  A READY state counts as a
    /// successful solve and resets the deadline.
    pub fn record(&mut self, state: SolverHealth) {
        self.last_state = state;
        if state == SolverHealth::Ready {
            self.last_success = Instant::now();
        }
    }

    /// Update the solver state without a solve, e.g. on an idle tick.  Does
    /// not reset the deadline.
    pub fn observe(&mut self, state: SolverHealth) {
        self.last_state = state;
    }

    pub fn health(&self) -> LinkHealth {
        if self.last_success.elapsed() > self.deadline {
            LinkHealth::Stale
        } else if self.last_state == SolverHealth::Degraded {
            LinkHealth::Degraded
        } else {
            LinkHealth::Healthy
        }
    }

    /// Time since the last successful solve.
    pub fn since_last_success(&self) -> Duration {
        self.last_success.elapsed()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}
