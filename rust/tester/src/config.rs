//! Test run configuration.
//!
//! A [`TestConfig`] is a flat set of key/value settings read once when the
//! engine is built. It loads from JSON or TOML and can be assembled in code
//! with the `with_*` setters.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tangle_runtime::{SchedulerConfig, StrategyKind};

/// Errors loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("read {path}: {source}")]
    Read {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Malformed JSON.
    #[error("parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    /// Malformed TOML.
    #[error("parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    /// Neither format parsed a file without a known extension.
    #[error("parse config {0}: unsupported extension, expected .json or .toml")]
    UnknownFormat(PathBuf),
    /// A setting is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Exploration strategy selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Uniform random scheduling.
    #[default]
    Random,
    /// Probabilistic concurrency testing.
    Pct {
        /// Priority change points per iteration.
        #[serde(default = "default_switch_points")]
        switch_points: usize,
    },
    /// PCT prefix followed by random scheduling.
    FairPct {
        /// Priority change points per iteration.
        #[serde(default = "default_switch_points")]
        switch_points: usize,
    },
    /// Exhaustive depth-first search.
    Dfs,
    /// Replay a recorded schedule.
    Replay {
        /// Schedule file written by an earlier run.
        path: PathBuf,
    },
}

impl StrategyConfig {
    /// Runtime strategy kind; `None` for replay.
    #[must_use]
    pub fn kind(&self) -> Option<StrategyKind> {
        match self {
            Self::Random => Some(StrategyKind::Random),
            Self::Pct { switch_points } => Some(StrategyKind::Pct {
                switch_points: *switch_points,
            }),
            Self::FairPct { switch_points } => Some(StrategyKind::FairPct {
                switch_points: *switch_points,
            }),
            Self::Dfs => Some(StrategyKind::Dfs),
            Self::Replay { .. } => None,
        }
    }
}

fn default_switch_points() -> usize {
    3
}

fn default_name() -> String {
    "tangle".to_owned()
}

fn default_iterations() -> u64 {
    100
}

fn default_seed() -> u64 {
    42
}

fn default_max_fair_steps() -> u64 {
    100_000
}

fn default_max_unfair_steps() -> u64 {
    10_000
}

/// Settings for one test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Test name, used for artifact file names.
    #[serde(default = "default_name")]
    pub name: String,
    /// Iterations to run.
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Master seed.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Exploration strategy.
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Step bound under fair strategies.
    #[serde(default = "default_max_fair_steps")]
    pub max_fair_steps: u64,
    /// Step bound under unfair strategies.
    #[serde(default = "default_max_unfair_steps")]
    pub max_unfair_steps: u64,
    /// Consecutive hot steps tolerated; half of `max_fair_steps` when unset.
    #[serde(default)]
    pub liveness_temperature_threshold: Option<u64>,
    /// Detect fair hot cycles.
    #[serde(default)]
    pub enable_cycle_detection: bool,
    /// Steps before cycle detection starts recording.
    #[serde(default)]
    pub cycle_detection_threshold: u64,
    /// Report reaching the step bound as a bug.
    #[serde(default)]
    pub consider_depth_bound_hit_as_bug: bool,
    /// Keep exploring after the first bug.
    #[serde(default)]
    pub continue_after_bug: bool,
    /// Where schedule and log artifacts of failing iterations go.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Wall-clock budget per iteration before it is declared uncontrolled.
    #[serde(default)]
    pub uncontrolled_timeout_ms: Option<u64>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            iterations: default_iterations(),
            seed: default_seed(),
            strategy: StrategyConfig::default(),
            max_fair_steps: default_max_fair_steps(),
            max_unfair_steps: default_max_unfair_steps(),
            liveness_temperature_threshold: None,
            enable_cycle_detection: false,
            cycle_detection_threshold: 0,
            consider_depth_bound_hit_as_bug: false,
            continue_after_bug: false,
            output_dir: None,
            uncontrolled_timeout_ms: None,
        }
    }
}

impl TestConfig {
    /// Load a configuration from JSON or TOML.
    ///
    /// The format follows the extension; files without a known extension
    /// are tried as JSON, then TOML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(std::ffi::OsStr::to_str) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("toml") => Ok(toml::from_str(&content)?),
            _ => serde_json::from_str(&content)
                .or_else(|_| toml::from_str(&content))
                .map_err(|_| ConfigError::UnknownFormat(path.to_path_buf())),
        }
    }

    /// Check that the settings describe a runnable test.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "name '{}' cannot be used as a file name",
                self.name
            )));
        }
        if self.iterations == 0 {
            return Err(ConfigError::Invalid("iterations must be positive".into()));
        }
        if self.max_fair_steps == 0 || self.max_unfair_steps == 0 {
            return Err(ConfigError::Invalid("step bounds must be positive".into()));
        }
        if let Some(threshold) = self.liveness_temperature_threshold {
            if threshold == 0 || threshold > self.max_fair_steps {
                return Err(ConfigError::Invalid(format!(
                    "liveness temperature threshold {threshold} must be in 1..={}",
                    self.max_fair_steps
                )));
            }
        }
        if self.enable_cycle_detection && self.cycle_detection_threshold >= self.max_fair_steps {
            return Err(ConfigError::Invalid(format!(
                "cycle detection threshold {} leaves no steps below the bound of {}",
                self.cycle_detection_threshold, self.max_fair_steps
            )));
        }
        match &self.strategy {
            StrategyConfig::Pct { switch_points } | StrategyConfig::FairPct { switch_points }
                if *switch_points == 0 =>
            {
                Err(ConfigError::Invalid("pct needs at least one switch point".into()))
            }
            StrategyConfig::Replay { path } if path.as_os_str().is_empty() => {
                Err(ConfigError::Invalid("replay needs a schedule path".into()))
            }
            _ => Ok(()),
        }
    }

    /// Per-iteration limits for the controlled runtime.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_fair_steps: self.max_fair_steps,
            max_unfair_steps: self.max_unfair_steps,
            liveness_temperature_threshold: self.liveness_temperature_threshold,
            cycle_detection: self.enable_cycle_detection,
            cycle_detection_threshold: self.cycle_detection_threshold,
            consider_depth_bound_hit_as_bug: self.consider_depth_bound_hit_as_bug,
            record_log: true,
        }
    }

    /// Set the test name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the iteration count.
    #[must_use]
    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the master seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the fair step bound.
    #[must_use]
    pub fn with_max_fair_steps(mut self, steps: u64) -> Self {
        self.max_fair_steps = steps;
        self
    }

    /// Set the unfair step bound.
    #[must_use]
    pub fn with_max_unfair_steps(mut self, steps: u64) -> Self {
        self.max_unfair_steps = steps;
        self
    }

    /// Set the hot-step threshold.
    #[must_use]
    pub fn with_liveness_temperature_threshold(mut self, steps: u64) -> Self {
        self.liveness_temperature_threshold = Some(steps);
        self
    }

    /// Enable cycle detection after `threshold` steps.
    #[must_use]
    pub fn with_cycle_detection(mut self, threshold: u64) -> Self {
        self.enable_cycle_detection = true;
        self.cycle_detection_threshold = threshold;
        self
    }

    /// Treat reaching the step bound as a bug.
    #[must_use]
    pub fn with_depth_bound_as_bug(mut self, enabled: bool) -> Self {
        self.consider_depth_bound_hit_as_bug = enabled;
        self
    }

    /// Keep exploring after the first bug.
    #[must_use]
    pub fn with_continue_after_bug(mut self, enabled: bool) -> Self {
        self.continue_after_bug = enabled;
        self
    }

    /// Write artifacts of failing iterations to `dir`.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Run every iteration under a wall-clock watchdog.
    #[must_use]
    pub fn with_uncontrolled_timeout_ms(mut self, millis: u64) -> Self {
        self.uncontrolled_timeout_ms = Some(millis);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults_when_keys_missing() {
        let config: TestConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(config, TestConfig::default());
        assert_eq!(config.scheduler_config().temperature_threshold(), 50_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_strategy() {
        let config: TestConfig = toml::from_str(
            r#"
            iterations = 500
            seed = 7

            [strategy]
            kind = "fair_pct"
            switch_points = 5
            "#,
        )
        .expect("parse");
        assert_eq!(config.iterations, 500);
        assert_eq!(
            config.strategy.kind(),
            Some(StrategyKind::FairPct { switch_points: 5 })
        );
    }

    #[test]
    fn test_pct_switch_points_default() {
        let config: TestConfig =
            serde_json::from_str(r#"{"strategy": {"kind": "pct"}}"#).expect("parse");
        assert_eq!(config.strategy, StrategyConfig::Pct { switch_points: 3 });
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let zero = TestConfig::default().with_iterations(0);
        assert_matches!(zero.validate(), Err(ConfigError::Invalid(_)));

        let threshold = TestConfig::default()
            .with_max_fair_steps(10)
            .with_liveness_temperature_threshold(11);
        assert_matches!(threshold.validate(), Err(ConfigError::Invalid(_)));

        let pct = TestConfig::default().with_strategy(StrategyConfig::Pct { switch_points: 0 });
        assert_matches!(pct.validate(), Err(ConfigError::Invalid(_)));

        let name = TestConfig::default().with_name("a/b");
        assert_matches!(name.validate(), Err(ConfigError::Invalid(_)));
    }

    #[test]
    fn test_scheduler_config_mirrors_settings() {
        let config = TestConfig::default()
            .with_max_fair_steps(400)
            .with_max_unfair_steps(40)
            .with_cycle_detection(10)
            .with_depth_bound_as_bug(true);
        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.step_bound(true), 400);
        assert_eq!(scheduler.step_bound(false), 40);
        assert!(scheduler.cycle_detection);
        assert_eq!(scheduler.cycle_detection_threshold, 10);
        assert!(scheduler.consider_depth_bound_hit_as_bug);
    }
}
