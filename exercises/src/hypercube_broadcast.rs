use crate::{
    suite::{Suite, TypedSuite},
    ExerciseError,
};
use tasklab_runner::{
    config::{ConfigErrors, Settings},
    BoxedTask, Communicator, Convention, LocalTask, Rank, RegistryBuilder, Requirement,
    Sequential, Task, TransportError, Variant, WorldInfo,
};
use tracing::debug;

pub const TASK_ID: &str = "hypercube-broadcast";
/// overrides `parameter.root` of this exercise
pub const ROOT_ENV: &str = "TASKLAB_HYPERCUBE_ROOT";

const TAG_EXCHANGE: u32 = 1;

pub type Input = Vec<i64>;
pub type Output = Vec<i64>;

#[derive(Debug, Clone)]
pub struct SequentialCopy {
    input: Input,
    output: Output,
}

impl SequentialCopy {
    pub fn new(input: Input) -> Self {
        Self {
            input,
            output: Vec::new(),
        }
    }
}

impl LocalTask for SequentialCopy {
    type Input = Input;
    type Output = Output;

    fn validate(&self) -> bool {
        true
    }

    fn run(&mut self) -> bool {
        self.output.clone_from(&self.input);
        true
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

/// Dimension ordered exchange over a hypercube: in step `d` every rank that
/// already holds the payload hands it to its neighbour across dimension `d`.
/// Only the root's input is ever sent.
#[derive(Debug, Clone)]
pub struct HypercubeBroadcast {
    input: Input,
    output: Output,
    root: Rank,
}

impl HypercubeBroadcast {
    pub fn new(input: Input, root: Rank) -> Self {
        Self {
            input,
            output: Vec::new(),
            root,
        }
    }
}

impl Task for HypercubeBroadcast {
    type Input = Input;
    type Output = Output;

    fn convention(&self) -> Convention {
        Convention::Broadcast
    }

    fn validate(&self, world: WorldInfo) -> bool {
        world.size.is_power_of_two() && self.root < world.size
    }

    fn pre_process(&mut self, _comm: &Communicator<'_>) -> Result<bool, TransportError> {
        Ok(true)
    }

    fn run(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError> {
        let dimensions = comm.world_size().trailing_zeros();
        // rank relative to the root, the root is 0
        let relative = comm.rank() ^ self.root;

        let mut payload = (relative == 0).then(|| self.input.clone());
        for dimension in 0..dimensions {
            let mask = 1usize << dimension;
            let partner = comm.rank() ^ mask;

            if relative < mask {
                if let Some(payload) = &payload {
                    comm.send(payload, partner, TAG_EXCHANGE)?;
                }
            } else if relative < mask << 1 {
                payload = Some(comm.recv(partner, TAG_EXCHANGE)?);
            }
        }

        match payload {
            Some(payload) => {
                self.output = payload;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn post_process(&mut self) -> bool {
        true
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

/// `TASKLAB_HYPERCUBE_ROOT`, then `parameter.root`, then rank 0
pub fn configured_root(
    settings: &Settings,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<Rank, ConfigErrors> {
    if let Some(value) = env(ROOT_ENV) {
        return value
            .trim()
            .parse()
            .map_err(|_| ConfigErrors::InvalidOverride {
                name: ROOT_ENV.to_string(),
                value,
            });
    }

    let root = match settings.exercises.get(TASK_ID) {
        Some(exercise) => exercise.parameter_u64(TASK_ID, "root")?.unwrap_or(0),
        None => 0,
    };

    Ok(root as Rank)
}

pub fn register(
    builder: &mut RegistryBuilder,
    settings: &Settings,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ExerciseError> {
    let root = configured_root(settings, env)?;
    debug!(root, "Hypercube root");

    builder
        .register(TASK_ID, Variant::Sequential, Requirement::Any, |input: Input| {
            Sequential::boxed(SequentialCopy::new(input))
        })?
        .register(
            TASK_ID,
            Variant::Distributed,
            Requirement::PowerOfTwo,
            move |input: Input| {
                Box::new(HypercubeBroadcast::new(input, root)) as BoxedTask<Input, Output>
            },
        )?;

    Ok(())
}

pub fn suite() -> Box<dyn Suite> {
    TypedSuite::<Input, Output>::boxed(TASK_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklab_runner::{transport::Collectives, Driver, Lifecycle, LocalWorld};

    fn broadcast(size: usize, root: Rank) -> Vec<Output> {
        LocalWorld::new(size)
            .run(|transport| {
                let comm = Communicator::new(transport, Collectives::default());
                // only the root's input may travel
                let input = if comm.rank() == root { vec![7, 8, 9] } else { vec![-1] };
                let mut lifecycle = Lifecycle::new(
                    Box::new(HypercubeBroadcast::new(input, root)) as BoxedTask<Input, Output>
                );
                assert!(Driver.execute(&mut lifecycle, &comm).unwrap().succeeded());
                lifecycle.output().clone()
            })
            .unwrap()
    }

    #[test]
    fn reaches_every_rank_from_any_root() {
        for size in [1, 2, 4, 8] {
            for root in 0..size {
                assert_eq!(broadcast(size, root), vec![vec![7, 8, 9]; size]);
            }
        }
    }

    #[test]
    fn rejects_other_world_sizes() {
        let task = HypercubeBroadcast::new(vec![1], 0);

        assert!(!task.validate(WorldInfo { rank: 0, size: 3 }));
        assert!(task.validate(WorldInfo { rank: 0, size: 4 }));
        assert!(!HypercubeBroadcast::new(vec![1], 4).validate(WorldInfo { rank: 0, size: 4 }));
    }

    #[test]
    fn root_from_environment_then_parameter() {
        let settings: Settings = "exercises:\n  hypercube-broadcast:\n    parameter: { root: 3 }\n"
            .parse()
            .unwrap();

        assert_eq!(configured_root(&settings, &|_| None).unwrap(), 3);
        let env = |name: &str| (name == ROOT_ENV).then(|| "1".to_string());
        assert_eq!(configured_root(&settings, &env).unwrap(), 1);
        assert!(configured_root(&settings, &|_| Some("north".to_string())).is_err());
        assert_eq!(configured_root(&"{}".parse().unwrap(), &|_| None).unwrap(), 0);
    }
}
