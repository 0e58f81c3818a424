use crate::suite::{Suite, TypedSuite};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::cmp::Ordering;
use tasklab_runner::{
    config::Settings,
    harness::{Approx, Tolerance},
    transport::block_partition,
    BoxedTask, Communicator, Convention, LocalTask, Rank, RegistryBuilder, RegistryError,
    Requirement, Sequential, Task, TransportError, Variant, WorldInfo,
};

pub const TASK_ID: &str = "lexicographic-compare";

pub type Input = (String, String);
pub type Output = CompareResult;

/// Sign of a byte-wise comparison, serialized as `-1`, `0` or `1`
#[derive(Serialize_repr, Deserialize_repr, PartialEq, Eq, Debug, Clone, Copy, Default)]
#[repr(i8)]
pub enum CompareResult {
    Less = -1,
    #[default]
    Equal = 0,
    Greater = 1,
}

impl From<Ordering> for CompareResult {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Self::Less,
            Ordering::Equal => Self::Equal,
            Ordering::Greater => Self::Greater,
        }
    }
}

impl Approx for CompareResult {
    fn approx_eq(&self, expected: &Self, _tolerance: &Tolerance) -> bool {
        self == expected
    }
}

#[derive(Debug, Clone)]
pub struct SequentialCompare {
    input: Input,
    output: Output,
}

impl SequentialCompare {
    pub fn new(input: Input) -> Self {
        Self {
            input,
            output: Output::default(),
        }
    }
}

impl LocalTask for SequentialCompare {
    type Input = Input;
    type Output = Output;

    fn validate(&self) -> bool {
        true
    }

    fn run(&mut self) -> bool {
        let (left, right) = &self.input;
        self.output = left.as_bytes().cmp(right.as_bytes()).into();
        true
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

/// Every rank searches its block of the common prefix for the first
/// difference; the smallest position wins.
#[derive(Debug, Clone)]
pub struct DistributedCompare {
    input: Input,
    output: Output,
    root: Rank,
    lengths: (usize, usize),
}

impl DistributedCompare {
    pub fn new(input: Input, root: Rank) -> Self {
        Self {
            input,
            output: Output::default(),
            root,
            lengths: (0, 0),
        }
    }
}

impl Task for DistributedCompare {
    type Input = Input;
    type Output = Output;

    fn convention(&self) -> Convention {
        Convention::Broadcast
    }

    fn validate(&self, world: WorldInfo) -> bool {
        self.root < world.size
    }

    fn pre_process(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError> {
        let mut lengths = (self.input.0.len(), self.input.1.len());
        comm.broadcast(&mut lengths, self.root)?;
        self.lengths = lengths;

        Ok(true)
    }

    fn run(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError> {
        let common = self.lengths.0.min(self.lengths.1);
        let (left, right) = (self.input.0.as_bytes(), self.input.1.as_bytes());
        let left = comm.scatter_blocks(&left[..common.min(left.len())], self.root)?;
        let right = comm.scatter_blocks(&right[..common.min(right.len())], self.root)?;
        let offset = block_partition(common, comm.world_size(), comm.rank()).start;

        // (position, ordering at position), usize::MAX if the block is identical
        let local = left
            .iter()
            .zip(right.iter())
            .position(|(a, b)| a != b)
            .map_or((usize::MAX, CompareResult::Equal), |index| {
                (offset + index, left[index].cmp(&right[index]).into())
            });

        let (position, ordering) = comm.all_reduce(local, |a, b| if a.0 <= b.0 { a } else { b })?;
        self.output = if position == usize::MAX {
            self.lengths.0.cmp(&self.lengths.1).into()
        } else {
            ordering
        };

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
            Sequential::boxed(SequentialCompare::new(input))
        })?
        .register(TASK_ID, Variant::Distributed, Requirement::Any, move |input: Input| {
            Box::new(DistributedCompare::new(input, root)) as BoxedTask<Input, Output>
        })?;

    Ok(())
}

pub fn suite() -> Box<dyn Suite> {
    TypedSuite::<Input, Output>::boxed(TASK_ID)
}
