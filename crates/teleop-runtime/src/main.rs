//! `teleop-sim` – runs the teleop loop against a simulated operator.
//!
//! A producer thread plays the role of the XR transport: it submits a frame
//! at 90 Hz in which both hands trace small circles in front of a standing
//! operator.  The control loop solves the newest frame every 10 ms for the
//! upper-body reference robot and logs the joint stream.
//!
//! Usage: `teleop-sim [seconds]` (default 5).  Ctrl-C stops early.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use teleop_ik::{ChainRobot, CostWeights, IkSolver};
use teleop_runtime::bridge::{BridgedSource, FrameSlot, HandFrame, JointSink, PoseBridge, XrFrame};
use teleop_runtime::config;
use teleop_runtime::teleop_loop::TeleopLoop;
use teleop_runtime::telemetry;
use teleop_types::{JointConfiguration, SolverHealth};
use tracing::{debug, error, info, warn};

const FRAME_PERIOD: Duration = Duration::from_micros(11_111);
const TICK_PERIOD: Duration = Duration::from_millis(10);

/// Logs every published configuration at debug level.
#[derive(Default)]
struct LogSink {
    published: u64,
    degraded: u64,
}

impl JointSink for LogSink {
    fn publish(&mut self, q: &JointConfiguration, health: SolverHealth) {
        self.published += 1;
        if health == SolverHealth::Degraded {
            self.degraded += 1;
        }
        debug!(state = %health, q = ?q.as_slice(), "joints");
    }
}

fn main() {
    let _guard = telemetry::init_tracing("teleop-sim");

    let seconds: u64 = match std::env::args().nth(1).map(|a| a.parse()) {
        None => 5,
        Some(Ok(s)) => s,
        Some(Err(e)) => {
            error!(error = %e, "Expected a duration in seconds");
            std::process::exit(2);
        }
    };

    let (cfg, load_error) = config::load_or_default();
    if let Some(e) = load_error {
        warn!(error = %e, "Falling back to default settings");
    }
    info!(?cfg, "Settings loaded");

    let stop = Arc::new(AtomicBool::new(false));
    let stop_ctrlc = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || stop_ctrlc.store(true, Ordering::Relaxed)) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let robot = Arc::new(ChainRobot::upper_body(CostWeights::new(1.0, 0.3).with_rest(0.01)));
    let solver = Arc::new(IkSolver::with_config(robot, None, cfg.solver_config()));
    if let Some(w) = solver.warmup_result() {
        info!(success = w.success, elapsed_ms = w.elapsed.as_secs_f64() * 1e3, "Warm-up");
    }

    let slot = FrameSlot::new();
    let producer = {
        let slot = slot.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let started = Instant::now();
            while !stop.load(Ordering::Relaxed) {
                slot.submit(simulated_frame(started.elapsed().as_secs_f32()));
                thread::sleep(FRAME_PERIOD);
            }
        })
    };

    let timer = {
        let stop = stop.clone();
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(seconds);
            while !stop.load(Ordering::Relaxed) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(50));
            }
            stop.store(true, Ordering::Relaxed);
        })
    };

    let source = BridgedSource::new(slot, PoseBridge::new(cfg.bridge.input_mode));
    let mut teleop = TeleopLoop::new(solver.clone(), source, LogSink::default(), cfg.stale_after());
    let ticks = teleop.run(TICK_PERIOD, &stop);

    join_worker("producer", producer);
    join_worker("timer", timer);

    let stats = solver.stats();
    info!(
        ticks,
        published = teleop.sink().published,
        degraded = teleop.sink().degraded,
        attempts = stats.attempts,
        failures = stats.failures,
        state = %solver.current_state(),
        "Simulation finished"
    );
}

/// Join a simulation thread, logging a panic instead of propagating it.
/// Returns `false` when the thread panicked.
fn join_worker(name: &str, handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(_) => {
            warn!(thread = name, "Simulation thread panicked");
            false
        }
    }
}

/// Operator standing at the XR origin, hands circling 40 cm in front.
fn simulated_frame(t: f32) -> XrFrame {
    let (s, c) = (t * 1.5).sin_cos();
    XrFrame {
        head: Some(at(0.0, 1.6, 0.0)),
        left: HandFrame {
            grip: Some(at(-0.25 + 0.05 * s, 1.2 + 0.05 * c, -0.4)),
            wrist: Some(at(-0.25 + 0.05 * s, 1.2 + 0.05 * c, -0.35)),
        },
        right: HandFrame {
            grip: Some(at(0.25 - 0.05 * s, 1.2 + 0.05 * c, -0.4)),
            wrist: Some(at(0.25 - 0.05 * s, 1.2 + 0.05 * c, -0.35)),
        },
    }
}

/// Column-major identity-orientation transform at `(x, y, z)`.
#[rustfmt::skip]
fn at(x: f32, y: f32, z: f32) -> [f32; 16] {
    [
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        x,   y,   z,   1.0,
    ]
}
