use super::{
    Approx, CaseReport, Failure, Harness, HarnessError, HarnessParameter, HarnessState, Verdict,
};
use crate::{
    driver::{Driver, Lifecycle},
    reconcile::reconcile,
    transport::Communicator,
};
use std::fmt::Debug;
use tracing::{debug, warn};

/// Report of a completed correctness check plus the lifecycle it ran on,
/// `lifecycle` is `None` for skipped parameters
pub(super) struct Checked<I, O> {
    pub report: CaseReport,
    pub lifecycle: Option<Lifecycle<I, O>>,
}

/// select → instantiate → run lifecycle → reconcile → compare → report
pub(super) fn run_checked<I, O>(
    harness: &Harness,
    parameter: &HarnessParameter<I, O>,
    comm: &Communicator<'_>,
) -> Result<Checked<I, O>, HarnessError>
where
    I: Clone,
    O: Approx + Clone + Default + Debug,
{
    let world = comm.info();
    let mut report = CaseReport::new(parameter, world.rank);

    debug!(state = ?HarnessState::Selecting, requirement = %parameter.requirement);
    if !parameter.requirement.is_met(world.size) {
        report.verdict = Verdict::Skipped(format!(
            "requires {}, world has {} ranks",
            parameter.requirement, world.size
        ));

        return Ok(Checked {
            report,
            lifecycle: None,
        });
    }

    debug!(state = ?HarnessState::Instantiating);
    let mut lifecycle = Lifecycle::new((parameter.constructor)(parameter.case.input.clone()));

    debug!(state = ?HarnessState::Running);
    let execution = Driver.execute(&mut lifecycle, comm)?;
    report.run_time = execution.run_time;

    debug!(state = ?HarnessState::Reconciling);
    let reconciled = reconcile(lifecycle.task(), world.rank, harness.elected_rank());
    report.authoritative = reconciled.authoritative;

    debug!(state = ?HarnessState::Comparing, authoritative = reconciled.authoritative);
    report.verdict = match execution.failed {
        Some(phase) if reconciled.authoritative => Verdict::Failed(Failure::from_phase(phase)),
        Some(phase) => {
            // only authoritative verdicts are trusted, keep the local failure visible in the log
            warn!(
                rank = world.rank,
                %phase,
                case = %parameter.label(),
                "Task failed on a non-authoritative rank"
            );
            Verdict::Passed
        }
        None if !reconciled.authoritative => Verdict::Passed,
        None => {
            if parameter.case.expected.check(&reconciled.output) {
                Verdict::Passed
            } else {
                Verdict::Failed(Failure::Mismatch {
                    actual: format!("{:?}", reconciled.output),
                })
            }
        }
    };

    debug!(state = ?HarnessState::Reporting, verdict = ?report.verdict);

    Ok(Checked {
        report,
        lifecycle: Some(lifecycle),
    })
}
