use crate::{
    task::{BoxedTask, Convention},
    transport::{Communicator, TransportError, WorldInfo},
};
use std::{
    fmt,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, instrument};

/// Lifecycle states, strictly ordered
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Created,
    Validated,
    PreProcessed,
    Ran,
    PostProcessed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Validate,
    PreProcess,
    Run,
    PostProcess,
}

impl Phase {
    /// stage a task has to be in before this phase may be called
    fn requires(self) -> Stage {
        match self {
            Self::Validate => Stage::Created,
            Self::PreProcess => Stage::Validated,
            Self::Run => Stage::PreProcessed,
            Self::PostProcess => Stage::Ran,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validate => "validate",
            Self::PreProcess => "pre_process",
            Self::Run => "run",
            Self::PostProcess => "post_process",
        })
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Phase {phase} called while the task is {stage:?}")]
    OutOfOrder { phase: Phase, stage: Stage },
    #[error("Communication failed during {phase}")]
    Transport {
        phase: Phase,
        #[source]
        source: TransportError,
    },
}

/// Owns one task instance and only lets its phases run in order.
///
/// A phase returning `false` leaves the stage untouched, so nothing after it
/// can be called anymore.
pub struct Lifecycle<I, O> {
    task: BoxedTask<I, O>,
    stage: Stage,
}

impl<I, O> fmt::Debug for Lifecycle<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("stage", &self.stage)
            .field("convention", &self.task.convention())
            .finish()
    }
}

impl<I, O> Lifecycle<I, O> {
    pub fn new(task: BoxedTask<I, O>) -> Self {
        Self {
            task,
            stage: Stage::Created,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn convention(&self) -> Convention {
        self.task.convention()
    }

    pub fn output(&self) -> &O {
        self.task.output()
    }

    pub fn task(&self) -> &dyn crate::task::Task<Input = I, Output = O> {
        self.task.as_ref()
    }

    fn enter(&self, phase: Phase) -> Result<(), LifecycleError> {
        if self.stage == phase.requires() {
            Ok(())
        } else {
            Err(LifecycleError::OutOfOrder {
                phase,
                stage: self.stage,
            })
        }
    }

    fn advance(&mut self, passed: bool, next: Stage) -> bool {
        if passed {
            self.stage = next;
        }
        passed
    }

    pub fn validate(&mut self, world: WorldInfo) -> Result<bool, LifecycleError> {
        self.enter(Phase::Validate)?;
        let passed = self.task.validate(world);

        Ok(self.advance(passed, Stage::Validated))
    }

    pub fn pre_process(&mut self, comm: &Communicator<'_>) -> Result<bool, LifecycleError> {
        self.enter(Phase::PreProcess)?;
        let passed = self
            .task
            .pre_process(comm)
            .map_err(|source| LifecycleError::Transport {
                phase: Phase::PreProcess,
                source,
            })?;

        Ok(self.advance(passed, Stage::PreProcessed))
    }

    /// run the computation, only the call itself is timed
    pub fn run(&mut self, comm: &Communicator<'_>) -> Result<(bool, Duration), LifecycleError> {
        self.enter(Phase::Run)?;
        let (passed, elapsed) = self.timed_run(comm)?;

        Ok((self.advance(passed, Stage::Ran), elapsed))
    }

    /// repeat `run` on a task that already completed its lifecycle
    pub fn rerun(&mut self, comm: &Communicator<'_>) -> Result<(bool, Duration), LifecycleError> {
        if self.stage < Stage::Ran {
            return Err(LifecycleError::OutOfOrder {
                phase: Phase::Run,
                stage: self.stage,
            });
        }

        self.timed_run(comm)
    }

    fn timed_run(&mut self, comm: &Communicator<'_>) -> Result<(bool, Duration), LifecycleError> {
        let start = Instant::now();
        let passed = self
            .task
            .run(comm)
            .map_err(|source| LifecycleError::Transport {
                phase: Phase::Run,
                source,
            })?;

        Ok((passed, start.elapsed()))
    }

    pub fn post_process(&mut self) -> Result<bool, LifecycleError> {
        self.enter(Phase::PostProcess)?;
        let passed = self.task.post_process();

        Ok(self.advance(passed, Stage::PostProcessed))
    }
}

/// Outcome of driving one lifecycle on one rank
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Execution {
    pub stage: Stage,
    /// first phase that returned `false`
    pub failed: Option<Phase>,
    pub run_time: Option<Duration>,
}

impl Execution {
    pub fn succeeded(&self) -> bool {
        self.failed.is_none()
    }
}

/// Runs the phases of a [`Lifecycle`] in order and stops at the first failure.
///
/// No barriers are added between phases, cross-rank ordering comes from the
/// collectives inside the task.
#[derive(Clone, Copy, Debug, Default)]
pub struct Driver;

impl Driver {
    #[instrument(skip_all, level = "debug", fields(rank = comm.rank()))]
    pub fn execute<I, O>(
        &self,
        lifecycle: &mut Lifecycle<I, O>,
        comm: &Communicator<'_>,
    ) -> Result<Execution, LifecycleError> {
        let failed = |lifecycle: &Lifecycle<I, O>, phase: Phase, run_time: Option<Duration>| {
            debug!(%phase, "Task reported failure");

            Execution {
                stage: lifecycle.stage(),
                failed: Some(phase),
                run_time,
            }
        };

        if !lifecycle.validate(comm.info())? {
            return Ok(failed(lifecycle, Phase::Validate, None));
        }
        debug!("Validated");

        if !lifecycle.pre_process(comm)? {
            return Ok(failed(lifecycle, Phase::PreProcess, None));
        }
        debug!("Pre-processed");

        let (passed, elapsed) = lifecycle.run(comm)?;
        if !passed {
            return Ok(failed(lifecycle, Phase::Run, Some(elapsed)));
        }
        debug!(elapsed_ns = elapsed.as_nanos() as u64, "Ran");

        if !lifecycle.post_process()? {
            return Ok(failed(lifecycle, Phase::PostProcess, Some(elapsed)));
        }
        debug!("Post-processed");

        Ok(Execution {
            stage: lifecycle.stage(),
            failed: None,
            run_time: Some(elapsed),
        })
    }
}
