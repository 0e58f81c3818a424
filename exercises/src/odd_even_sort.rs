use crate::suite::{Suite, TypedSuite};
use itertools::Itertools;
use tasklab_runner::{
    config::Settings, BoxedTask, Communicator, Convention, LocalTask, Rank, RegistryBuilder,
    RegistryError, Requirement, Sequential, Task, TransportError, Variant, WorldInfo,
};

pub const TASK_ID: &str = "odd-even-sort";

const TAG_SPLIT: u32 = 2;
/// pads the input to equally sized blocks, sorts behind every real value
const PADDING: i64 = i64::MAX;

pub type Input = Vec<i64>;
pub type Output = Vec<i64>;

#[derive(Debug, Clone)]
pub struct SequentialSort {
    input: Input,
    output: Output,
}

impl SequentialSort {
    pub fn new(input: Input) -> Self {
        Self {
            input,
            output: Vec::new(),
        }
    }
}

impl LocalTask for SequentialSort {
    type Input = Input;
    type Output = Output;

    fn validate(&self) -> bool {
        true
    }

    fn run(&mut self) -> bool {
        self.output.clone_from(&self.input);
        self.output.sort_unstable();
        true
    }

    fn post_process(&mut self) -> bool {
        self.output.windows(2).all(|pair| pair[0] <= pair[1])
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

/// Odd-even transposition sort over blocks with merge-split between neighbours,
/// gathered on `root`.
#[derive(Debug, Clone)]
pub struct OddEvenSort {
    input: Input,
    output: Output,
    root: Rank,
    len: usize,
}

impl OddEvenSort {
    pub fn new(input: Input, root: Rank) -> Self {
        Self {
            input,
            output: Vec::new(),
            root,
            len: 0,
        }
    }
}

/// keep the lower or upper half of two sorted blocks of equal length
fn merge_split(mine: &[i64], theirs: &[i64], keep_lower: bool) -> Vec<i64> {
    let merged = mine.iter().merge(theirs.iter()).copied();

    if keep_lower {
        merged.take(mine.len()).collect()
    } else {
        merged.skip(theirs.len()).collect()
    }
}

impl Task for OddEvenSort {
    type Input = Input;
    type Output = Output;

    fn convention(&self) -> Convention {
        Convention::SingleRankAuthoritative
    }

    fn validate(&self, world: WorldInfo) -> bool {
        self.root < world.size
    }

    fn pre_process(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError> {
        let mut len = self.input.len();
        comm.broadcast(&mut len, self.root)?;
        self.len = len;

        Ok(true)
    }

    fn run(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError> {
        let size = comm.world_size();
        let rank = comm.rank();
        let block_len = (self.len + size - 1) / size;

        let padded = if rank == self.root {
            let mut padded = self.input.clone();
            padded.resize(block_len * size, PADDING);
            padded
        } else {
            Vec::new()
        };

        let mut block = comm.scatter_blocks(&padded, self.root)?;
        block.sort_unstable();

        for phase in 0..size {
            let partner = if (phase + rank) % 2 == 0 {
                rank.checked_add(1).filter(|partner| *partner < size)
            } else {
                rank.checked_sub(1)
            };

            if let Some(partner) = partner {
                let theirs: Vec<i64> = comm.sendrecv(&block, partner, TAG_SPLIT)?;
                block = merge_split(&block, &theirs, rank < partner);
            }
        }

        self.output = match comm.gather(&block, self.root)? {
            Some(blocks) => blocks.into_iter().flatten().take(self.len).collect(),
            None => Vec::new(),
        };

        Ok(true)
    }

    fn post_process(&mut self) -> bool {
        self.output.windows(2).all(|pair| pair[0] <= pair[1])
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

pub fn register(builder: &mut RegistryBuilder, settings: &Settings) -> Result<(), RegistryError> {
    let root = settings.elected_rank;

    builder
        .register(TASK_ID, Variant::Sequential, Requirement::Any, |input: Input| {
            Sequential::boxed(SequentialSort::new(input))
        })?
        .register(TASK_ID, Variant::Distributed, Requirement::Any, move |input: Input| {
            Box::new(OddEvenSort::new(input, root)) as BoxedTask<Input, Output>
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

    fn sort(size: usize, root: Rank, input: &Input) -> Vec<Output> {
        LocalWorld::new(size)
            .run(|transport| {
                let comm = Communicator::new(transport, Collectives::default());
                let mut lifecycle = Lifecycle::new(
                    Box::new(OddEvenSort::new(input.clone(), root)) as BoxedTask<Input, Output>
                );
                assert!(Driver.execute(&mut lifecycle, &comm).unwrap().succeeded());
                lifecycle.output().clone()
            })
            .unwrap()
    }

    #[test]
    fn merge_split_keeps_halves() {
        assert_eq!(merge_split(&[1, 4, 9], &[2, 3, 10], true), vec![1, 2, 3]);
        assert_eq!(merge_split(&[2, 3, 10], &[1, 4, 9], false), vec![4, 9, 10]);
    }

    #[test]
    fn sorts_for_every_world_size() {
        let input = vec![9, -3, 7, 7, 0, 12, -8, 5, 1, 4, 4];
        let mut expected = input.clone();
        expected.sort();

        for size in 1..=6 {
            let outputs = sort(size, 0, &input);

            assert_eq!(outputs[0], expected, "world size {size}");
            assert!(outputs[1..].iter().all(Vec::is_empty));
        }
    }

    #[test]
    fn reversed_input_on_other_root() {
        let input = (0..20).rev().collect::<Vec<_>>();

        assert_eq!(sort(4, 3, &input)[3], (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn empty_and_short_inputs() {
        assert_eq!(sort(3, 0, &Vec::new())[0], Vec::<i64>::new());
        assert_eq!(sort(4, 0, &vec![2, 1])[0], vec![1, 2]);
    }
}
