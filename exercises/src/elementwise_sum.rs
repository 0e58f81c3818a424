use crate::suite::{Suite, TypedSuite};
use tasklab_runner::{
    config::Settings, BoxedTask, Communicator, Convention, LocalTask, Rank, RegistryBuilder,
    RegistryError, Requirement, Sequential, Task, TransportError, Variant, WorldInfo,
};

pub const TASK_ID: &str = "elementwise-sum";

pub type Input = Vec<i64>;
pub type Output = i64;

#[derive(Debug, Clone)]
pub struct SequentialSum {
    input: Input,
    output: Output,
}

impl SequentialSum {
    pub fn new(input: Input) -> Self {
        Self { input, output: 0 }
    }
}

impl LocalTask for SequentialSum {
    type Input = Input;
    type Output = Output;

    fn validate(&self) -> bool {
        !self.input.is_empty()
    }

    fn run(&mut self) -> bool {
        self.output = self.input.iter().fold(0, |sum, value| sum.wrapping_add(*value));
        true
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

/// Block-partitioned sum, reduced on `root`
#[derive(Debug, Clone)]
pub struct DistributedSum {
    input: Input,
    output: Output,
    root: Rank,
}

impl DistributedSum {
    pub fn new(input: Input, root: Rank) -> Self {
        Self {
            input,
            output: 0,
            root,
        }
    }
}

impl Task for DistributedSum {
    type Input = Input;
    type Output = Output;

    fn convention(&self) -> Convention {
        Convention::SingleRankAuthoritative
    }

    fn validate(&self, world: WorldInfo) -> bool {
        !self.input.is_empty() && self.root < world.size
    }

    fn pre_process(&mut self, _comm: &Communicator<'_>) -> Result<bool, TransportError> {
        Ok(true)
    }

    fn run(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError> {
        let block = comm.scatter_blocks(&self.input, self.root)?;
        let partial = block.iter().fold(0i64, |sum, value| sum.wrapping_add(*value));

        self.output = comm
            .reduce(partial, self.root, i64::wrapping_add)?
            .unwrap_or_default();

        Ok(true)
    }

    fn post_process(&mut self) -> bool {
        true
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

pub fn register(builder: &mut RegistryBuilder, settings: &Settings) -> Result<(), RegistryError> {
    let root = settings.elected_rank;

    builder
        .register(TASK_ID, Variant::Sequential, Requirement::Any, |input: Input| {
            Sequential::boxed(SequentialSum::new(input))
        })?
        .register(TASK_ID, Variant::Distributed, Requirement::Any, move |input: Input| {
            Box::new(DistributedSum::new(input, root)) as BoxedTask<Input, Output>
        })?;

    Ok(())
}

pub fn suite() -> Box<dyn Suite> {
    TypedSuite::<Input, Output>::boxed(TASK_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklab_runner::{transport::Collectives, Driver, Lifecycle, LocalWorld};

    fn run_distributed(size: usize, root: Rank, input: &Input) -> Vec<Output> {
        LocalWorld::new(size)
            .run(|transport| {
                let comm = Communicator::new(transport, Collectives::default());
                let mut lifecycle = Lifecycle::new(
                    Box::new(DistributedSum::new(input.clone(), root)) as BoxedTask<Input, Output>
                );
                assert!(Driver.execute(&mut lifecycle, &comm).unwrap().succeeded());
                *lifecycle.output()
            })
            .unwrap()
    }

    #[test]
    fn ones_sum_to_their_count() {
        for size in [2, 5] {
            let outputs = run_distributed(size, 0, &vec![1; 5]);

            assert_eq!(outputs[0], 5);
            assert!(outputs[1..].iter().all(|output| *output == 0));
        }
    }

    #[test]
    fn result_lands_on_root() {
        let outputs = run_distributed(3, 2, &vec![4, -1, 7, 3]);

        assert_eq!(outputs, vec![0, 0, 13]);
    }

    #[test]
    fn more_ranks_than_items() {
        assert_eq!(run_distributed(4, 0, &vec![9])[0], 9);
    }

    #[test]
    fn empty_input_is_rejected() {
        let task = DistributedSum::new(Vec::new(), 0);

        assert!(!task.validate(WorldInfo { rank: 0, size: 1 }));
        assert!(!SequentialSum::new(Vec::new()).validate());
    }
}
