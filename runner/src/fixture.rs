//! Loading of yaml test fixtures.
//!
//! Every fixture file names the task it belongs to and a list of cases whose
//! input and expectation are kept untyped until the exercise asks for them.

use crate::{
    config::{ConfigErrors, Settings},
    harness::{Approx, Expected, TestCase, Tolerance},
};
use globset::GlobMatcher;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("No fixture paths were given")]
    NoPaths,
    #[error("Invalid fixture configuration")]
    Config(#[from] ConfigErrors),
    #[error("Failed to walk fixture directories")]
    Walk(#[from] ignore::Error),
    #[error("Failed to read fixture {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Fixture {} is not valid yaml", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Case {task}/{case} doesn't match the types of the task")]
    Case {
        task: String,
        case: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FixtureFile {
    pub task: String,
    #[serde(default)]
    pub cases: Vec<RawCase>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RawCase {
    pub name: String,
    pub input: serde_yaml::Value,
    pub expected: serde_yaml::Value,
    pub tolerance: Option<Tolerance>,
}

impl RawCase {
    /// Deserialize input and expectation into the types of `task`.
    /// The case tolerance wins over `default_tolerance`.
    pub fn typed<I, O>(
        &self,
        task: &str,
        default_tolerance: Option<Tolerance>,
    ) -> Result<Arc<TestCase<I, O>>, FixtureError>
    where
        I: DeserializeOwned,
        O: DeserializeOwned + Approx,
    {
        let wrap = |source| FixtureError::Case {
            task: task.to_string(),
            case: self.name.clone(),
            source,
        };

        let input = serde_yaml::from_value(self.input.clone()).map_err(wrap)?;
        let expected = serde_yaml::from_value(self.expected.clone()).map_err(wrap)?;
        let tolerance = self
            .tolerance
            .or(default_tolerance)
            .unwrap_or(Tolerance::EXACT);

        Ok(TestCase::new(
            self.name.clone(),
            input,
            Expected::within(expected, tolerance),
        ))
    }
}

/// map of task id -> raw cases, in file then declaration order
pub type FixtureMap = BTreeMap<String, Vec<RawCase>>;

#[derive(Debug, Clone)]
pub struct FixtureLoader {
    paths: Vec<PathBuf>,
    glob: GlobMatcher,
}

impl FixtureLoader {
    pub fn new(paths: Vec<PathBuf>, glob: GlobMatcher) -> Self {
        Self { paths, glob }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, FixtureError> {
        let mut paths = settings.fixtures.paths.clone();
        if let Some(path) = &settings.fixtures.path {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }

        Ok(Self::new(paths, settings.compile_glob()?))
    }

    /// every file below the configured paths whose name matches the glob, sorted
    pub fn files(&self) -> Result<Vec<PathBuf>, FixtureError> {
        let (first, others) = self.paths.split_first().ok_or(FixtureError::NoPaths)?;
        let mut builder = WalkBuilder::new(first);

        debug!("Filtering with glob: {:?}", self.glob.glob());
        // add other paths
        others.iter().for_each(|path| {
            builder.add(path);
        });

        let entries = builder.build().collect::<Result<Vec<_>, _>>()?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_file()))
            .map(DirEntry::into_path)
            .filter(|path| {
                path.file_name()
                    .map_or(false, |name| self.glob.is_match(Path::new(name)))
            })
            .sorted()
            .dedup()
            .collect_vec())
    }

    pub fn load(&self) -> Result<FixtureMap, FixtureError> {
        let mut fixtures = FixtureMap::new();

        for path in self.files()? {
            let file = read_fixture(&path)?;
            if file.cases.is_empty() {
                warn!(path = ?path, task = %file.task, "Fixture has no cases");
            }

            debug!(path = ?path, task = %file.task, cases = file.cases.len(), "Loaded fixture");
            fixtures.entry(file.task).or_default().extend(file.cases);
        }

        info!(
            tasks = fixtures.len(),
            cases = fixtures.values().map(Vec::len).sum::<usize>(),
            "Loaded fixtures"
        );

        Ok(fixtures)
    }
}

pub fn read_fixture(path: &Path) -> Result<FixtureFile, FixtureError> {
    let source = fs::read_to_string(path).map_err(|source| FixtureError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&source).map_err(|source| FixtureError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use globset::Glob;

    const SUM: &str = r#"
task: elementwise-sum
cases:
  - name: ones
    input: [1, 1, 1]
    expected: 3
"#;

    const INTEGRAL: &str = r#"
task: trapezoid-integration
cases:
  - name: square
    input: { lower: 0.0, upper: 1.0, intervals: 100 }
    expected: 0.3333
    tolerance: { absolute: 0.001 }
"#;

    fn loader(paths: Vec<PathBuf>) -> FixtureLoader {
        FixtureLoader::new(paths, Glob::new("*.yaml").unwrap().compile_matcher())
    }

    #[test]
    fn walks_and_groups_by_task() {
        let directory = tempfile::tempdir().unwrap();
        fs::create_dir(directory.path().join("nested")).unwrap();
        fs::write(directory.path().join("sum.yaml"), SUM).unwrap();
        fs::write(directory.path().join("nested/more_sum.yaml"), SUM).unwrap();
        fs::write(directory.path().join("integral.yaml"), INTEGRAL).unwrap();
        fs::write(directory.path().join("notes.txt"), "task: nope").unwrap();

        let fixtures = loader(vec![directory.path().to_path_buf()]).load().unwrap();

        assert_eq!(fixtures.len(), 2);
        assert_eq!(fixtures["elementwise-sum"].len(), 2);
        assert_eq!(fixtures["trapezoid-integration"][0].name, "square");
    }

    #[test]
    fn typed_cases_pick_the_closest_tolerance() {
        let file: FixtureFile = serde_yaml::from_str(INTEGRAL).unwrap();
        let case = file.cases[0]
            .typed::<BTreeMap<String, f64>, f64>(&file.task, Some(Tolerance::absolute(1.0)))
            .unwrap();

        assert!(case.expected.check(&0.334));
        assert!(!case.expected.check(&0.5));
        assert_eq!(case.input["intervals"], 100.0);

        let file: FixtureFile = serde_yaml::from_str(SUM).unwrap();
        let case = file.cases[0]
            .typed::<Vec<i64>, i64>(&file.task, None)
            .unwrap();

        assert_eq!(case.input, vec![1, 1, 1]);
        assert!(case.expected.check(&3));
    }

    #[test]
    fn mistyped_case_names_the_case() {
        let file: FixtureFile = serde_yaml::from_str(SUM).unwrap();

        assert!(matches!(
            file.cases[0].typed::<String, i64>(&file.task, None),
            Err(FixtureError::Case { case, .. }) if case == "ones"
        ));
    }

    #[test]
    fn broken_fixture_reports_path() {
        let directory = tempfile::tempdir().unwrap();
        fs::write(directory.path().join("broken.yaml"), "task: [").unwrap();

        assert!(matches!(
            loader(vec![directory.path().to_path_buf()]).load(),
            Err(FixtureError::Parse { .. })
        ));
        assert!(matches!(loader(Vec::new()).load(), Err(FixtureError::NoPaths)));
    }
}
