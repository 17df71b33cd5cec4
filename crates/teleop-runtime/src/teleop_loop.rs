//! [`TeleopLoop`] – the fixed-rate pose → joint control loop.
//!
//! Each tick pulls at most one [`TargetSet`][teleop_types::TargetSet] from
//! the [`PoseSource`], solves it, forwards the configuration to the
//! [`JointSink`], and feeds the [`SolveWatchdog`].  Pending target sets are
//! never queued: the source is expected to hand over only the newest one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use teleop_ik::IkSolver;
use teleop_types::SolverHealth;
use tracing::{debug, info, warn};

use crate::bridge::{JointSink, PoseSource};
use crate::health::{LinkHealth, SolveWatchdog};

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No new targets; nothing was published.
    Idle { link: LinkHealth },
    /// Targets were solved and a configuration was published.
    Solved { state: SolverHealth, link: LinkHealth },
}

impl TickOutcome {
    pub fn link(&self) -> LinkHealth {
        match self {
            TickOutcome::Idle { link } | TickOutcome::Solved { link, .. } => *link,
        }
    }
}

/// Drives an [`IkSolver`] from a [`PoseSource`] into a [`JointSink`].
pub struct TeleopLoop<S, K> {
    solver: Arc<IkSolver>,
    source: S,
    sink: K,
    watchdog: SolveWatchdog,
    last_link: LinkHealth,
    ticks: u64,
}

impl<S: PoseSource, K: JointSink> TeleopLoop<S, K> {
    pub fn new(solver: Arc<IkSolver>, source: S, sink: K, stale_after: Duration) -> Self {
        let watchdog = SolveWatchdog::with_state(stale_after, solver.current_state());
        let last_link = watchdog.health();
        Self {
            solver,
            source,
            sink,
            watchdog,
            last_link,
            ticks: 0,
        }
    }

    /// Run one tick.
    pub fn tick(&mut self) -> TickOutcome {
        self.ticks += 1;
        let outcome = match self.source.next_targets() {
            Some(targets) => {
                let q = self.solver.solve(&targets);
                let state = self.solver.current_state();
                self.watchdog.record(state);
                self.sink.publish(&q, state);
                TickOutcome::Solved {
                    state,
                    link: self.watchdog.health(),
                }
            }
            None => {
                self.watchdog.observe(self.solver.current_state());
                TickOutcome::Idle {
                    link: self.watchdog.health(),
                }
            }
        };
        self.note_link(outcome.link());
        outcome
    }

    /// Tick every `period` until `stop` is set.  Returns the number of ticks
    /// run.
    pub fn run(&mut self, period: Duration, stop: &AtomicBool) -> u64 {
        info!(period_ms = period.as_secs_f64() * 1e3, "Teleop loop started");
        let started = self.ticks;
        let mut next = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            self.tick();
            next += period;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                // Overran the period; don't try to catch up.
                debug!(overrun_ms = (now - next).as_secs_f64() * 1e3, "Tick overran its period");
                next = now;
            }
        }
        let ran = self.ticks - started;
        info!(ticks = ran, "Teleop loop stopped");
        ran
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn watchdog(&self) -> &SolveWatchdog {
        &self.watchdog
    }

    pub fn solver(&self) -> &Arc<IkSolver> {
        &self.solver
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    fn note_link(&mut self, link: LinkHealth) {
        if link == self.last_link {
            return;
        }
        match link {
            LinkHealth::Stale => warn!(
                since_ms = self.watchdog.since_last_success().as_millis() as u64,
                "IK link stale: joint stream frozen"
            ),
            LinkHealth::Degraded => warn!("IK link degraded"),
            LinkHealth::Healthy => info!("IK link healthy"),
        }
        self.last_link = link;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use teleop_ik::{ChainRobot, CostProblem, CostWeights, RobotModel};
    use teleop_types::{JointConfiguration, JointDescriptor, ModelError, Pose, TargetSet};

    struct ScriptedSource(VecDeque<Option<TargetSet>>);

    impl PoseSource for ScriptedSource {
        fn next_targets(&mut self) -> Option<TargetSet> {
            self.0.pop_front().flatten()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        published: Vec<(JointConfiguration, SolverHealth)>,
        stop_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl JointSink for RecordingSink {
        fn publish(&mut self, q: &JointConfiguration, health: SolverHealth) {
            self.published.push((q.clone(), health));
            if let Some((n, stop)) = &self.stop_after
                && self.published.len() >= *n
            {
                stop.store(true, Ordering::Relaxed);
            }
        }
    }

    fn solver() -> Arc<IkSolver> {
        Arc::new(IkSolver::new(
            Arc::new(ChainRobot::upper_body(CostWeights::new(1.0, 0.5))),
            None,
        ))
    }

    #[test]
    fn tick_solves_and_publishes() {
        let solver = solver();
        let source = ScriptedSource(VecDeque::from(vec![Some(TargetSet::new()), None]));
        let mut lp = TeleopLoop::new(solver.clone(), source, RecordingSink::default(), Duration::from_secs(1));

        let first = lp.tick();
        assert_eq!(
            first,
            TickOutcome::Solved {
                state: SolverHealth::Ready,
                link: LinkHealth::Healthy
            }
        );
        assert_eq!(lp.tick(), TickOutcome::Idle { link: LinkHealth::Healthy });
        assert_eq!(lp.sink().published.len(), 1);
        assert_eq!(lp.sink().published[0].0.len(), solver.dof());
        assert_eq!(lp.ticks(), 2);
    }

    #[test]
    fn failing_solves_degrade_then_go_stale() {
        let solver = solver();
        let bad = TargetSet::new().with_head(Pose::from_translation(f32::NAN, 0.0, 0.0));
        let source = ScriptedSource(VecDeque::from(vec![Some(bad), Some(bad)]));
        let mut lp = TeleopLoop::new(solver, source, RecordingSink::default(), Duration::from_millis(20));

        assert_eq!(lp.tick().link(), LinkHealth::Degraded);
        thread::sleep(Duration::from_millis(30));
        let outcome = lp.tick();
        assert_eq!(
            outcome,
            TickOutcome::Solved {
                state: SolverHealth::Degraded,
                link: LinkHealth::Stale
            }
        );
        // The frozen configuration is still published.
        let published = &lp.sink().published;
        assert_eq!(published[0].0, published[1].0);
    }

    /// Every operation fails.
    struct BrokenRobot;

    impl RobotModel for BrokenRobot {
        fn default_configuration(&self) -> Result<JointConfiguration, ModelError> {
            Err(ModelError::failed("default_configuration", "offline"))
        }

        fn joint_descriptor(&self) -> Result<JointDescriptor, ModelError> {
            Err(ModelError::failed("joint_descriptor", "offline"))
        }

        fn build_cost_problem(
            &self,
            _left: &Pose,
            _right: &Pose,
            _head: &Pose,
        ) -> Result<Box<dyn CostProblem>, ModelError> {
            Err(ModelError::failed("build_cost_problem", "offline"))
        }
    }

    #[test]
    fn idle_ticks_report_degraded_solver() {
        let solver = Arc::new(IkSolver::new(Arc::new(BrokenRobot), Some(JointConfiguration::zeros(3))));
        assert_eq!(solver.current_state(), SolverHealth::Degraded);
        let source = ScriptedSource(VecDeque::from(vec![None, None]));
        let mut lp = TeleopLoop::new(solver, source, RecordingSink::default(), Duration::from_secs(1));

        assert_eq!(lp.tick(), TickOutcome::Idle { link: LinkHealth::Degraded });
        assert_eq!(lp.tick(), TickOutcome::Idle { link: LinkHealth::Degraded });
        assert!(lp.sink().published.is_empty());
    }

    #[test]
    fn idle_tick_picks_up_solver_state_changes() {
        let solver = solver();
        let bad = TargetSet::new().with_head(Pose::from_translation(f32::NAN, 0.0, 0.0));
        let source = ScriptedSource(VecDeque::from(vec![None]));
        let mut lp = TeleopLoop::new(solver.clone(), source, RecordingSink::default(), Duration::from_secs(1));

        // Another caller degrades the shared solver between ticks.
        solver.solve(&bad);
        assert_eq!(lp.tick(), TickOutcome::Idle { link: LinkHealth::Degraded });
    }

    #[test]
    fn run_stops_when_flag_is_set() {
        let robot = ChainRobot::upper_body(CostWeights::new(1.0, 0.5));
        let neutral = robot
            .end_effector_poses(&robot.default_configuration().unwrap())
            .unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let sink = RecordingSink {
            published: Vec::new(),
            stop_after: Some((3, stop.clone())),
        };
        let source = ScriptedSource((0..10).map(|_| Some(TargetSet::from(neutral))).collect());
        let mut lp = TeleopLoop::new(solver(), source, sink, Duration::from_secs(1));

        let ran = lp.run(Duration::from_millis(1), &stop);
        assert_eq!(ran, 3);
        assert!(lp.sink().published.iter().all(|(_, h)| *h == SolverHealth::Ready));
    }
}
