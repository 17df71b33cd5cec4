//! Configuration vault – reads/writes `~/.teleop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use teleop_ik::{IkSolverConfig, OptimizerConfig};
use thiserror::Error;

use crate::bridge::InputMode;

/// Errors raised while loading or saving the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// `[solver]` table: convergence criteria and warm-up policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    #[serde(default = "default_step_tolerance")]
    pub step_tolerance: f32,
    #[serde(default = "default_cost_tolerance")]
    pub cost_tolerance: f32,
    #[serde(default = "default_damping")]
    pub damping: f32,
    #[serde(default = "default_true")]
    pub warmup_on_init: bool,
}

/// `[bridge]` table: XR input handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeSection {
    /// Which per-hand pose drives the wrist targets.
    #[serde(default)]
    pub input_mode: InputMode,
    /// Report the link as stale after this long without a successful solve.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

/// Persisted teleoperation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeleopConfig {
    #[serde(default)]
    pub solver: SolverSection,
    #[serde(default)]
    pub bridge: BridgeSection,
}

fn default_max_iterations() -> u32 {
    OptimizerConfig::default().max_iterations
}
fn default_tolerance() -> f32 {
    OptimizerConfig::default().tolerance
}
fn default_step_tolerance() -> f32 {
    OptimizerConfig::default().step_tolerance
}
fn default_cost_tolerance() -> f32 {
    OptimizerConfig::default().cost_tolerance
}
fn default_damping() -> f32 {
    OptimizerConfig::default().damping
}
fn default_true() -> bool {
    true
}
fn default_stale_after_ms() -> u64 {
    500
}

impl Default for SolverSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            step_tolerance: default_step_tolerance(),
            cost_tolerance: default_cost_tolerance(),
            damping: default_damping(),
            warmup_on_init: default_true(),
        }
    }
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            input_mode: InputMode::default(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl TeleopConfig {
    /// Reject settings the solver cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.solver;
        if s.max_iterations == 0 {
            return Err(ConfigError::Invalid("solver.max_iterations must be > 0".into()));
        }
        if !(s.tolerance.is_finite() && s.tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "solver.tolerance must be positive, got {}",
                s.tolerance
            )));
        }
        if !(s.step_tolerance.is_finite() && s.step_tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "solver.step_tolerance must be positive, got {}",
                s.step_tolerance
            )));
        }
        if !(s.cost_tolerance.is_finite() && s.cost_tolerance >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "solver.cost_tolerance must be non-negative, got {}",
                s.cost_tolerance
            )));
        }
        if !(s.damping.is_finite() && s.damping >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "solver.damping must be non-negative, got {}",
                s.damping
            )));
        }
        if self.bridge.stale_after_ms == 0 {
            return Err(ConfigError::Invalid("bridge.stale_after_ms must be > 0".into()));
        }
        Ok(())
    }

    /// The solver settings described by the `[solver]` table.
    pub fn solver_config(&self) -> IkSolverConfig {
        IkSolverConfig {
            optimizer: OptimizerConfig {
                max_iterations: self.solver.max_iterations,
                tolerance: self.solver.tolerance,
                step_tolerance: self.solver.step_tolerance,
                cost_tolerance: self.solver.cost_tolerance,
                damping: self.solver.damping,
            },
            warmup_on_init: self.solver.warmup_on_init,
            neutral_targets: None,
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.bridge.stale_after_ms)
    }
}

/// Return the path to `~/.teleop/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".teleop").join("config.toml")
}

/// Load the config from the default location.  Returns `None` if the file
/// does not exist.
pub fn load() -> Result<Option<TeleopConfig>, ConfigError> {
    load_from(&config_path())
}

/// Load, apply `TELEOP_*` overrides, and validate the config at `path`.
/// Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<TeleopConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: TeleopConfig = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Load the config from the default location, falling back to defaults.
///
/// See [`load_or_default_from`].
pub fn load_or_default() -> (TeleopConfig, Option<ConfigError>) {
    load_or_default_from(&config_path())
}

/// Load the config at `path`, falling back to defaults.
///
/// When the file is missing, `TELEOP_*` overrides are applied to the
/// defaults.  The returned config has always passed
/// [`TeleopConfig::validate`]; the error, if any, is why the plain defaults
/// were used instead.
pub fn load_or_default_from(path: &Path) -> (TeleopConfig, Option<ConfigError>) {
    match load_from(path) {
        Ok(Some(cfg)) => (cfg, None),
        Ok(None) => {
            let mut cfg = TeleopConfig::default();
            apply_env_overrides(&mut cfg);
            validated_or_default(cfg)
        }
        Err(e) => (TeleopConfig::default(), Some(e)),
    }
}

fn validated_or_default(cfg: TeleopConfig) -> (TeleopConfig, Option<ConfigError>) {
    match cfg.validate() {
        Ok(()) => (cfg, None),
        Err(e) => (TeleopConfig::default(), Some(e)),
    }
}

/// Apply `TELEOP_*` environment variable overrides to `cfg`.
///
/// Values that do not parse are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `TELEOP_MAX_ITERATIONS` | `solver.max_iterations` |
/// | `TELEOP_TOLERANCE` | `solver.tolerance` |
/// | `TELEOP_DAMPING` | `solver.damping` |
/// | `TELEOP_INPUT_MODE` | `bridge.input_mode` (`controller` / `hand`) |
pub fn apply_env_overrides(cfg: &mut TeleopConfig) {
    if let Ok(v) = std::env::var("TELEOP_MAX_ITERATIONS")
        && let Ok(n) = v.parse::<u32>()
    {
        cfg.solver.max_iterations = n;
    }
    if let Ok(v) = std::env::var("TELEOP_TOLERANCE")
        && let Ok(t) = v.parse::<f32>()
    {
        cfg.solver.tolerance = t;
    }
    if let Ok(v) = std::env::var("TELEOP_DAMPING")
        && let Ok(d) = v.parse::<f32>()
    {
        cfg.solver.damping = d;
    }
    if let Ok(v) = std::env::var("TELEOP_INPUT_MODE")
        && let Ok(mode) = v.parse::<InputMode>()
    {
        cfg.bridge.input_mode = mode;
    }
}

/// Save the config to the default location.
pub fn save(cfg: &TeleopConfig) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

/// Save the config to `path`, creating parent directories as needed.
pub fn save_to(cfg: &TeleopConfig, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let raw = toml::to_string_pretty(cfg)?;
    fs::write(path, raw).map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = TeleopConfig::default();
        cfg.solver.step_tolerance = 1e-5;
        cfg.solver.warmup_on_init = false;
        cfg.bridge.stale_after_ms = 250;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.solver.step_tolerance, 1e-5);
        assert!(!loaded.solver.warmup_on_init);
        assert_eq!(loaded.bridge.stale_after_ms, 250);
        assert_eq!(loaded.stale_after(), Duration::from_millis(250));
    }

    #[test]
    fn config_path_points_to_teleop_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".teleop"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bridge]\nstale_after_ms = 900\n").unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.bridge.stale_after_ms, 900);
        assert_eq!(cfg.solver.step_tolerance, OptimizerConfig::default().step_tolerance);
        assert!(cfg.solver.warmup_on_init);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[solver\nmax_iterations = ").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn invalid_values_are_rejected_on_load() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bridge]\nstale_after_ms = 0\n").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_bad_solver_settings() {
        let mut cfg = TeleopConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.solver.tolerance = 0.0;
        assert!(cfg.validate().is_err());

        cfg = TeleopConfig::default();
        cfg.solver.damping = -0.1;
        assert!(cfg.validate().is_err());

        cfg = TeleopConfig::default();
        cfg.solver.cost_tolerance = f32::NAN;
        assert!(cfg.validate().is_err());

        cfg = TeleopConfig::default();
        cfg.solver.max_iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_or_default_uses_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let (cfg, error) = load_or_default_from(&path);
        assert!(error.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_or_default_replaces_invalid_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[solver]\ntolerance = -1.0\n").unwrap();
        let (cfg, error) = load_or_default_from(&path);
        assert!(matches!(error, Some(ConfigError::Invalid(_))));
        assert_eq!(cfg, TeleopConfig::default());
    }

    #[test]
    fn overridden_defaults_are_validated() {
        let mut cfg = TeleopConfig::default();
        cfg.solver.max_iterations = 0;
        let (cfg, error) = validated_or_default(cfg);
        assert!(matches!(error, Some(ConfigError::Invalid(_))));
        assert_eq!(cfg.solver.max_iterations, OptimizerConfig::default().max_iterations);

        let mut cfg = TeleopConfig::default();
        cfg.solver.tolerance = -1.0;
        let (cfg, error) = validated_or_default(cfg);
        assert!(error.is_some());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn solver_config_carries_solver_table() {
        let mut cfg = TeleopConfig::default();
        cfg.solver.max_iterations = 42;
        cfg.solver.damping = 0.2;
        cfg.solver.cost_tolerance = 1e-2;
        let solver = cfg.solver_config();
        assert_eq!(solver.optimizer.cost_tolerance, 1e-2);
        assert_eq!(solver.optimizer.max_iterations, 42);
        assert_eq!(solver.optimizer.damping, 0.2);
        assert!(solver.warmup_on_init);
        assert!(solver.neutral_targets.is_none());
    }

    #[test]
    fn input_mode_serialises_lowercase() {
        let mut cfg = TeleopConfig::default();
        cfg.bridge.input_mode = InputMode::Hand;
        let raw = toml::to_string_pretty(&cfg).unwrap();
        assert!(raw.contains("input_mode = \"hand\""));
    }

    #[test]
    fn apply_env_overrides_changes_tolerance() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("TELEOP_TOLERANCE", "0.001") };
        let mut cfg = TeleopConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.solver.tolerance, 0.001);
        unsafe { std::env::remove_var("TELEOP_TOLERANCE") };
    }

    #[test]
    fn apply_env_overrides_changes_damping() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("TELEOP_DAMPING", "0.05") };
        let mut cfg = TeleopConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.solver.damping, 0.05);
        unsafe { std::env::remove_var("TELEOP_DAMPING") };
    }

    #[test]
    fn apply_env_overrides_changes_input_mode() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("TELEOP_INPUT_MODE", "hand") };
        let mut cfg = TeleopConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bridge.input_mode, InputMode::Hand);
        unsafe { std::env::remove_var("TELEOP_INPUT_MODE") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_iterations() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("TELEOP_MAX_ITERATIONS", "lots") };
        let mut cfg = TeleopConfig::default();
        let original = cfg.solver.max_iterations;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.solver.max_iterations, original);
        unsafe { std::env::remove_var("TELEOP_MAX_ITERATIONS") };
    }
}
