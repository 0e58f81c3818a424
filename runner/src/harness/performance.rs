use super::{
    functional::{self, Checked},
    Approx, CaseReport, Failure, Harness, HarnessError, HarnessParameter, Verdict,
};
use crate::{driver::Phase, driver::Stage, transport::Communicator};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Debug},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

/// When to stop repeating `run`, whichever limit is hit first
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PerfOptions {
    pub repetitions: usize,
    pub budget: Duration,
}

impl Default for PerfOptions {
    fn default() -> Self {
        Self {
            repetitions: 10,
            budget: Duration::from_secs(2),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PerfStats {
    pub samples: usize,
    pub min: Duration,
    pub median: Duration,
    pub mean: Duration,
    pub max: Duration,
}

impl PerfStats {
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let middle = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[middle - 1] + sorted[middle]) / 2
        } else {
            sorted[middle]
        };

        Some(Self {
            samples: sorted.len(),
            min: sorted[0],
            median,
            mean: sorted.iter().sum::<Duration>() / sorted.len() as u32,
            max: sorted[sorted.len() - 1],
        })
    }
}

impl fmt::Display for PerfStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(n={} median={:?} mean={:?} min={:?} max={:?})",
            self.samples, self.median, self.mean, self.min, self.max
        )
    }
}

/// One full, checked lifecycle followed by repeated `run` calls.
///
/// The elected rank decides after every sample whether to go on and broadcasts
/// that decision, so all ranks call `run` the same number of times.
pub(super) fn run_measured<I, O>(
    harness: &Harness,
    parameter: &HarnessParameter<I, O>,
    comm: &Communicator<'_>,
    options: &PerfOptions,
) -> Result<CaseReport, HarnessError>
where
    I: Clone,
    O: Approx + Clone + Default + Debug,
{
    let Checked { mut report, lifecycle } = functional::run_checked(harness, parameter, comm)?;
    let Some(mut lifecycle) = lifecycle else {
        return Ok(report);
    };

    let ready = report.verdict.is_passed() && lifecycle.stage() == Stage::PostProcessed;
    if !comm.all_reduce(ready, |a, b| a && b)? {
        debug!(case = %parameter.label(), "Correctness check failed somewhere, not measuring");
        return Ok(report);
    }

    let mut samples = report.run_time.into_iter().collect::<Vec<_>>();
    let mut rerun_failed = false;
    let started = Instant::now();

    loop {
        let mut more = samples.len() < options.repetitions && started.elapsed() < options.budget;
        comm.broadcast(&mut more, harness.elected_rank())?;
        if !more {
            break;
        }

        let (passed, elapsed) = lifecycle.rerun(comm)?;
        if !passed && !rerun_failed {
            warn!(rank = comm.rank(), case = %parameter.label(), "Repeated run reported failure");
            rerun_failed = true;
        }
        samples.push(elapsed);
    }

    if rerun_failed && report.authoritative {
        report.verdict = Verdict::Failed(Failure::TaskReported(Phase::Run));
    }

    report.stats = PerfStats::from_samples(&samples);
    if let Some(stats) = &report.stats {
        info!(case = %parameter.label(), rank = comm.rank(), "Measured {stats}");
    }

    Ok(report)
}
