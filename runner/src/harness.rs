pub mod compare;
mod functional;
mod performance;


pub use compare::{Approx, Tolerance};
pub use performance::{PerfOptions, PerfStats};

use crate::{
    driver::{LifecycleError, Phase},
    registry::{Constructor, Registry, RegistryError, Requirement},
    task::Variant,
    transport::{Communicator, Rank, TransportError},
};
use itertools::iproduct;
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, instrument};

/// Fatal harness failures, the world is in an unknown state afterwards
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Task lifecycle failed")]
    Lifecycle(#[from] LifecycleError),
    #[error("Harness communication failed")]
    Transport(#[from] TransportError),
}

pub type Predicate<O> = Arc<dyn Fn(&O) -> bool + Send + Sync>;

/// What an authoritative output has to satisfy
pub enum Expected<O> {
    Equals { value: O, tolerance: Tolerance },
    Satisfies(Predicate<O>),
}

impl<O: fmt::Debug> fmt::Debug for Expected<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { value, tolerance } => f
                .debug_struct("Equals")
                .field("value", value)
                .field("tolerance", tolerance)
                .finish(),
            Self::Satisfies(_) => f.write_str("Satisfies(..)"),
        }
    }
}

impl<O: Approx> Expected<O> {
    pub fn exactly(value: O) -> Self {
        Self::Equals {
            value,
            tolerance: Tolerance::EXACT,
        }
    }

    pub fn within(value: O, tolerance: Tolerance) -> Self {
        Self::Equals { value, tolerance }
    }

    pub fn satisfies<F>(predicate: F) -> Self
    where
        F: Fn(&O) -> bool + Send + Sync + 'static,
    {
        Self::Satisfies(Arc::new(predicate))
    }

    pub fn check(&self, output: &O) -> bool {
        match self {
            Self::Equals { value, tolerance } => output.approx_eq(value, tolerance),
            Self::Satisfies(predicate) => predicate(output),
        }
    }
}

/// Fixture plus expectation, shared read-only by every variant
#[derive(Debug)]
pub struct TestCase<I, O> {
    pub name: String,
    pub input: I,
    pub expected: Expected<O>,
}

impl<I, O> TestCase<I, O> {
    pub fn new(name: impl Into<String>, input: I, expected: Expected<O>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            input,
            expected,
        })
    }
}

/// One executable (task, variant, case) combination
pub struct HarnessParameter<I, O> {
    pub task_id: String,
    pub variant: Variant,
    pub requirement: Requirement,
    pub constructor: Constructor<I, O>,
    pub case: Arc<TestCase<I, O>>,
}

impl<I, O> HarnessParameter<I, O> {
    pub fn label(&self) -> String {
        format!("{}/{} {}", self.task_id, self.variant, self.case.name)
    }
}

impl<I, O> fmt::Debug for HarnessParameter<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessParameter")
            .field("task_id", &self.task_id)
            .field("variant", &self.variant)
            .field("requirement", &self.requirement)
            .field("case", &self.case.name)
            .finish()
    }
}

/// Cross product of `variants` and `cases`; an unregistered variant fails here,
/// before any rank does work
pub fn expand<I: 'static, O: 'static>(
    registry: &Registry,
    task_id: &str,
    variants: &[Variant],
    cases: &[Arc<TestCase<I, O>>],
) -> Result<Vec<HarnessParameter<I, O>>, RegistryError> {
    let resolved = variants
        .iter()
        .map(|variant| {
            Ok((
                *variant,
                registry.constructor::<I, O>(task_id, *variant)?,
                registry
                    .requirement(task_id, *variant)
                    .cloned()
                    .unwrap_or_default(),
            ))
        })
        .collect::<Result<Vec<_>, RegistryError>>()?;

    Ok(iproduct!(resolved.iter(), cases.iter())
        .map(
            |((variant, constructor, requirement), case)| HarnessParameter {
                task_id: task_id.to_string(),
                variant: *variant,
                requirement: requirement.clone(),
                constructor: constructor.clone(),
                case: case.clone(),
            },
        )
        .collect())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// `validate` rejected the input
    InvalidInput,
    /// a later phase returned `false`
    TaskReported(Phase),
    /// authoritative output didn't satisfy the expectation
    Mismatch { actual: String },
}

impl Failure {
    fn from_phase(phase: Phase) -> Self {
        match phase {
            Phase::Validate => Self::InvalidInput,
            phase => Self::TaskReported(phase),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "input rejected by validate"),
            Self::TaskReported(phase) => write!(f, "task reported failure in {phase}"),
            Self::Mismatch { actual } => write!(f, "unexpected output {actual}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed(Failure),
    Skipped(String),
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Progress of one harness invocation, only used for tracing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HarnessState {
    Selecting,
    Instantiating,
    Running,
    Reconciling,
    Comparing,
    Reporting,
}

/// Result of one parameter on one rank
#[derive(Clone, Debug, PartialEq)]
pub struct CaseReport {
    pub task_id: String,
    pub variant: Variant,
    pub case: String,
    pub rank: Rank,
    pub authoritative: bool,
    pub verdict: Verdict,
    pub run_time: Option<Duration>,
    pub stats: Option<PerfStats>,
}

impl CaseReport {
    fn new<I, O>(parameter: &HarnessParameter<I, O>, rank: Rank) -> Self {
        Self {
            task_id: parameter.task_id.clone(),
            variant: parameter.variant,
            case: parameter.case.name.clone(),
            rank,
            authoritative: false,
            verdict: Verdict::Passed,
            run_time: None,
            stats: None,
        }
    }

    /// Fold the reports of one case from every rank into a single verdict.
    /// Only authoritative ranks are trusted: any authoritative failure fails the case.
    pub fn merge<R: IntoIterator<Item = CaseReport>>(reports: R) -> Option<CaseReport> {
        let reports = reports.into_iter().collect::<Vec<_>>();

        reports
            .iter()
            .find(|report| report.authoritative && report.verdict.is_failed())
            .or_else(|| {
                reports
                    .iter()
                    .find(|report| report.authoritative && report.verdict.is_passed())
            })
            .cloned()
            .or_else(|| reports.into_iter().next())
    }
}

impl fmt::Display for CaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &self.verdict {
            Verdict::Passed => "PASS",
            Verdict::Failed(_) => "FAIL",
            Verdict::Skipped(_) => "SKIP",
        };
        write!(f, "[{status}] {}/{} {}", self.task_id, self.variant, self.case)?;

        match &self.verdict {
            Verdict::Failed(failure) => write!(f, ": {failure} (rank {})", self.rank)?,
            Verdict::Skipped(reason) => write!(f, ": {reason}")?,
            Verdict::Passed => {}
        }

        if let Some(stats) = &self.stats {
            write!(f, " {stats}")?;
        } else if let Some(run_time) = self.run_time {
            write!(f, " ({run_time:?})")?;
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    Functional,
    Performance(PerfOptions),
}

/// Drives harness parameters on one rank; every rank of the world runs the same
/// parameters in the same order
#[derive(Clone, Debug)]
pub struct Harness {
    mode: Mode,
    elected_rank: Rank,
}

impl Harness {
    pub fn new(mode: Mode, elected_rank: Rank) -> Self {
        Self { mode, elected_rank }
    }

    pub fn functional(elected_rank: Rank) -> Self {
        Self::new(Mode::Functional, elected_rank)
    }

    pub fn performance(elected_rank: Rank, options: PerfOptions) -> Self {
        Self::new(Mode::Performance(options), elected_rank)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn elected_rank(&self) -> Rank {
        self.elected_rank
    }

    #[instrument(
        skip_all,
        level = "debug",
        fields(rank = comm.rank(), parameter = %parameter.label())
    )]
    pub fn execute<I, O>(
        &self,
        parameter: &HarnessParameter<I, O>,
        comm: &Communicator<'_>,
    ) -> Result<CaseReport, HarnessError>
    where
        I: Clone,
        O: Approx + Clone + Default + fmt::Debug,
    {
        match self.mode {
            Mode::Functional => Ok(functional::run_checked(self, parameter, comm)?.report),
            Mode::Performance(options) => {
                performance::run_measured(self, parameter, comm, &options)
            }
        }
    }

    pub fn execute_all(
        &self,
        parameters: &[Box<dyn Runnable>],
        comm: &Communicator<'_>,
    ) -> Result<Vec<CaseReport>, HarnessError> {
        parameters
            .iter()
            .map(|parameter| parameter.execute(self, comm))
            .collect()
    }
}

/// Type erased harness parameter, lets suites of different input/output types
/// share one run loop
pub trait Runnable: Send + Sync {
    fn label(&self) -> String;

    fn execute(&self, harness: &Harness, comm: &Communicator<'_>)
        -> Result<CaseReport, HarnessError>;
}

impl<I, O> Runnable for HarnessParameter<I, O>
where
    I: Clone + Send + Sync,
    O: Approx + Clone + Default + fmt::Debug + Send + Sync,
{
    fn label(&self) -> String {
        HarnessParameter::label(self)
    }

    fn execute(
        &self,
        harness: &Harness,
        comm: &Communicator<'_>,
    ) -> Result<CaseReport, HarnessError> {
        harness.execute(self, comm)
    }
}

/// Counts over merged reports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn record(&mut self, report: &CaseReport) {
        match report.verdict {
            Verdict::Passed => self.passed += 1,
            Verdict::Failed(_) => self.failed += 1,
            Verdict::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn log(&self) {
        info!(
            passed = self.passed,
            failed = self.failed,
            skipped = self.skipped,
            "Finished {} cases",
            self.total()
        );
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed, self.failed, self.skipped
        )
    }
}
