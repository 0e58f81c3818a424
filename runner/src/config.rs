use crate::{
    harness::{Mode, PerfOptions, Tolerance},
    task::Variant,
    transport::{Collectives, Rank},
};
use globset::{GlobBuilder, GlobMatcher};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};

/// environment variable overriding `elected_rank`
pub const ELECTED_RANK_ENV: &str = "TASKLAB_ELECTED_RANK";
/// environment variable overriding `world_size`
pub const WORLD_SIZE_ENV: &str = "TASKLAB_WORLD_SIZE";

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Globs were invalid")]
    InvalidGlobs(#[from] globset::Error),
    #[error("Failed to read settings")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse settings")]
    Parse(#[from] serde_yaml::Error),
    #[error("Environment override {name}={value} is not a valid number")]
    InvalidOverride { name: String, value: String },
    #[error("Parameter {exercise}.parameter.{name} has the wrong type")]
    InvalidParameter { exercise: String, name: String },
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    // size of the in-process world the harness launches
    #[serde(default = "default_world_size")]
    pub world_size: usize,
    // rank whose output is trusted for single rank tasks
    #[serde(default)]
    pub elected_rank: Rank,
    #[serde(default)]
    pub mode: ModeConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub collectives: Collectives,
    // bound on every receive in milliseconds, unbounded if missing
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub fixtures: FixtureConfig,
    // exercises to run, keyed by task id
    #[serde(default)]
    pub exercises: BTreeMap<String, ExerciseConfig>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModeConfig {
    #[default]
    Functional,
    Performance,
}

impl FromStr for ModeConfig {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "functional" => Ok(Self::Functional),
            "performance" | "perf" => Ok(Self::Performance),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PerformanceConfig {
    #[serde(default = "default_repetitions")]
    pub repetitions: usize,
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            repetitions: default_repetitions(),
            budget_ms: default_budget_ms(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FixtureConfig {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    pub path: Option<PathBuf>,
    #[serde(default = "default_fixture_glob")]
    pub glob: String,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            path: None,
            glob: default_fixture_glob(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ExerciseConfig {
    // variants to run, an empty list falls back to every registered variant
    #[serde(default)]
    pub variants: Vec<Variant>,
    // tolerance for cases that don't bring their own
    pub tolerance: Option<Tolerance>,
    // free form exercise parameters, read once while the registry is built
    #[serde(default)]
    pub parameter: BTreeMap<String, serde_yaml::Value>,
}

impl ExerciseConfig {
    pub fn parameter_u64(&self, exercise: &str, name: &str) -> Result<Option<u64>, ConfigErrors> {
        match self.parameter.get(name) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| ConfigErrors::InvalidParameter {
                    exercise: exercise.to_string(),
                    name: name.to_string(),
                }),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigErrors;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Ok(serde_yaml::from_str(source)?)
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        fs::read_to_string(path)?.parse()
    }

    /// Apply environment overrides through `lookup` (usually `std::env::var`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigErrors>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |name: &str| -> Result<Option<usize>, ConfigErrors> {
            match lookup(name) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigErrors::InvalidOverride {
                        name: name.to_string(),
                        value,
                    }),
            }
        };

        if let Some(rank) = parse(ELECTED_RANK_ENV)? {
            self.elected_rank = rank;
        }
        if let Some(size) = parse(WORLD_SIZE_ENV)? {
            self.world_size = size;
        }

        Ok(())
    }

    pub fn harness_mode(&self) -> Mode {
        match self.mode {
            ModeConfig::Functional => Mode::Functional,
            ModeConfig::Performance => Mode::Performance(PerfOptions {
                repetitions: self.performance.repetitions,
                budget: Duration::from_millis(self.performance.budget_ms),
            }),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn compile_glob(&self) -> Result<GlobMatcher, ConfigErrors> {
        Ok(GlobBuilder::new(&self.fixtures.glob)
            .build()?
            .compile_matcher())
    }

    /// Variants configured for `task_id`, falling back to `registered`
    pub fn variants_for(&self, task_id: &str, registered: &[Variant]) -> Vec<Variant> {
        match self.exercises.get(task_id) {
            Some(config) if !config.variants.is_empty() => config.variants.clone(),
            _ => registered.to_vec(),
        }
    }

    /// Check everything at once and log every problem, returns whether any error was found
    pub fn preflight_checks(&mut self, known_tasks: &[&str]) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.world_size == 0 {
            error!("world_size must be at least 1");
            contains_error = true;
        } else if self.elected_rank >= self.world_size {
            error!(
                "elected_rank {} is outside of a world of size {}",
                self.elected_rank, self.world_size
            );
            contains_error = true;
        }

        if self.mode == ModeConfig::Performance && self.performance.repetitions == 0 {
            error!("performance.repetitions cannot be 0 in performance mode");
            contains_error = true;
        }

        if let Err(error) = self.compile_glob() {
            error!("fixtures.glob '{}' is invalid: {error}", self.fixtures.glob);
            contains_error = true;
        }

        if let Some(ref path) = self.fixtures.path {
            if !self.fixtures.paths.is_empty() {
                warn!("fixtures contains both 'path' and 'paths'. This will be treated as if 'path' is a member of 'paths'");
            }
            // merge path into paths if neccessary
            if !self.fixtures.paths.contains(path) {
                self.fixtures.paths.push(path.clone());
            }
        }

        if self.fixtures.paths.is_empty() {
            error!("fixtures contains neither 'path' nor 'paths', there is nothing to test");
            contains_error = true;
        }

        for path in self.fixtures.paths.iter().filter(|path| !path.exists()) {
            error!("Fixture path {} does not exist", path.to_string_lossy());
            contains_error = true;
        }

        for (name, exercise) in self.exercises.iter_mut() {
            if !known_tasks.contains(&name.as_str()) {
                error!("exercises.{name} is not a registered task");
                contains_error = true;
            }

            if exercise.variants.is_empty() {
                warn!("Exercise {name} has an empty set of selected variants. Falling back to all registered variants");
            } else if exercise.variants.iter().duplicates().next().is_some() {
                warn!("Exercise {name} lists a variant twice, duplicates are dropped");
                exercise.variants = exercise.variants.iter().copied().unique().collect();
            }
        }

        if self.exercises.is_empty() {
            warn!("No exercise selected, falling back to every registered task");
        }

        contains_error
    }
}

fn default_world_size() -> usize {
    1
}

fn default_repetitions() -> usize {
    10
}

fn default_budget_ms() -> u64 {
    2000
}

fn default_fixture_glob() -> String {
    "*.yaml".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: &str = r#"
world_size: 4
elected_rank: 1
mode: performance
performance:
  repetitions: 3
collectives:
  broadcast: linear
fixtures:
  path: fixtures
exercises:
  elementwise-sum:
    variants: [sequential, distributed, distributed]
    tolerance: { absolute: 0.5 }
    parameter:
      root: 2
"#;

    #[test]
    fn parses_settings() {
        let settings: Settings = SETTINGS.parse().unwrap();

        assert_eq!(settings.world_size, 4);
        assert_eq!(settings.elected_rank, 1);
        assert_eq!(
            settings.collectives.broadcast,
            crate::transport::collectives::BroadcastStrategy::Linear
        );
        assert_eq!(settings.performance.budget_ms, 2000);
        assert!(matches!(
            settings.harness_mode(),
            Mode::Performance(PerfOptions { repetitions: 3, .. })
        ));

        let exercise = &settings.exercises["elementwise-sum"];
        assert_eq!(exercise.parameter_u64("elementwise-sum", "root").unwrap(), Some(2));
        assert_eq!(exercise.tolerance, Some(Tolerance::absolute(0.5)));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            "world_size: 2\nworld: 3\n".parse::<Settings>(),
            Err(ConfigErrors::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides() {
        let mut settings: Settings = SETTINGS.parse().unwrap();
        settings
            .apply_overrides(|name| match name {
                ELECTED_RANK_ENV => Some("3".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(settings.elected_rank, 3);
        assert_eq!(settings.world_size, 4);

        assert!(matches!(
            settings.apply_overrides(|_| Some("many".to_string())),
            Err(ConfigErrors::InvalidOverride { .. })
        ));
    }

    #[test]
    fn preflight_reports_every_problem() {
        let directory = tempfile::tempdir().unwrap();
        let mut settings: Settings = SETTINGS.parse().unwrap();
        settings.fixtures.path = Some(directory.path().to_path_buf());

        assert!(!settings.preflight_checks(&["elementwise-sum"]));
        assert_eq!(settings.fixtures.paths, vec![directory.path().to_path_buf()]);
        assert_eq!(
            settings.exercises["elementwise-sum"].variants,
            Variant::ALL.to_vec()
        );

        settings.elected_rank = 4;
        settings.exercises.insert("unknown".to_string(), ExerciseConfig::default());
        assert!(settings.preflight_checks(&["elementwise-sum"]));
    }

    #[test]
    fn variants_fall_back_to_registered() {
        let settings: Settings = "fixtures: { path: fixtures }".parse().unwrap();

        assert_eq!(
            settings.variants_for("anything", &[Variant::Sequential]),
            vec![Variant::Sequential]
        );
    }
}
