use crate::suite::{Suite, TypedSuite};
use tasklab_runner::{
    config::Settings, BoxedTask, Communicator, Convention, LocalTask, Rank, RegistryBuilder,
    RegistryError, Requirement, Sequential, Task, TransportError, Variant, WorldInfo,
};

pub const TASK_ID: &str = "matrix-column-max";

/// row major, every row has the same length
pub type Input = Vec<Vec<i64>>;
pub type Output = Vec<i64>;

fn is_rectangular(matrix: &Input) -> bool {
    matrix.first().map_or(false, |first| {
        !first.is_empty() && matrix.iter().all(|row| row.len() == first.len())
    })
}

/// fold rows into `maxima` element-wise
fn column_max<'a>(maxima: Vec<i64>, rows: impl IntoIterator<Item = &'a Vec<i64>>) -> Vec<i64> {
    rows.into_iter().fold(maxima, |mut maxima, row| {
        maxima
            .iter_mut()
            .zip(row)
            .for_each(|(max, value)| *max = (*max).max(*value));
        maxima
    })
}

#[derive(Debug, Clone)]
pub struct SequentialColumnMax {
    input: Input,
    output: Output,
}

impl SequentialColumnMax {
    pub fn new(input: Input) -> Self {
        Self {
            input,
            output: Vec::new(),
        }
    }
}

impl LocalTask for SequentialColumnMax {
    type Input = Input;
    type Output = Output;

    fn validate(&self) -> bool {
        is_rectangular(&self.input)
    }

    fn run(&mut self) -> bool {
        let columns = self.input[0].len();
        self.output = column_max(vec![i64::MIN; columns], &self.input);
        true
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

/// Row blocks per rank, partial maxima reduced element-wise on `root`
#[derive(Debug, Clone)]
pub struct DistributedColumnMax {
    input: Input,
    output: Output,
    root: Rank,
    columns: usize,
}

impl DistributedColumnMax {
    pub fn new(input: Input, root: Rank) -> Self {
        Self {
            input,
            output: Vec::new(),
            root,
            columns: 0,
        }
    }
}

impl Task for DistributedColumnMax {
    type Input = Input;
    type Output = Output;

    fn convention(&self) -> Convention {
        Convention::SingleRankAuthoritative
    }

    fn validate(&self, world: WorldInfo) -> bool {
        is_rectangular(&self.input) && self.root < world.size
    }

    fn pre_process(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError> {
        let mut columns = self.input.first().map_or(0, Vec::len);
        comm.broadcast(&mut columns, self.root)?;
        self.columns = columns;

        Ok(columns > 0)
    }

    fn run(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError> {
        let rows = comm.scatter_blocks(&self.input, self.root)?;
        let partial = column_max(vec![i64::MIN; self.columns], &rows);

        self.output = comm
            .reduce(partial, self.root, |a, b| column_max(a, [&b]))?
            .unwrap_or_default();

        Ok(true)
    }

    fn post_process(&mut self) -> bool {
        self.output.is_empty() || self.output.len() == self.columns
    }

    fn output(&self) -> &Output {
        &self.output
    }
}

pub fn register(builder: &mut RegistryBuilder, settings: &Settings) -> Result<(), RegistryError> {
    let root = settings.elected_rank;

    builder
        .register(TASK_ID, Variant::Sequential, Requirement::Any, |input: Input| {
            Sequential::boxed(SequentialColumnMax::new(input))
        })?
        .register(
            TASK_ID,
            Variant::Distributed,
            Requirement::MinRanks(2),
            move |input: Input| {
                Box::new(DistributedColumnMax::new(input, root)) as BoxedTask<Input, Output>
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

    fn matrix() -> Input {
        vec![
            vec![1, -5, 3],
            vec![4, -2, 0],
            vec![-7, -9, 8],
            vec![2, -3, 8],
            vec![0, -1, -4],
        ]
    }

    #[test]
    fn sequential_maxima() {
        let mut task = SequentialColumnMax::new(matrix());
        assert!(task.validate() && task.run());

        assert_eq!(*task.output(), vec![4, -1, 8]);
    }

    #[test]
    fn distributed_matches_for_more_and_fewer_ranks_than_rows() {
        for size in [2, 3, 5, 8] {
            let outputs = LocalWorld::new(size)
                .run(|transport| {
                    let comm = Communicator::new(transport, Collectives::default());
                    let mut lifecycle = Lifecycle::new(
                        Box::new(DistributedColumnMax::new(matrix(), 1)) as BoxedTask<Input, Output>
                    );
                    assert!(Driver.execute(&mut lifecycle, &comm).unwrap().succeeded());
                    lifecycle.output().clone()
                })
                .unwrap();

            assert_eq!(outputs[1], vec![4, -1, 8], "world size {size}");
            assert!(outputs[0].is_empty());
        }
    }

    #[test]
    fn ragged_matrices_are_rejected() {
        assert!(!is_rectangular(&vec![vec![1, 2], vec![3]]));
        assert!(!is_rectangular(&Vec::new()));
        assert!(!is_rectangular(&vec![Vec::new()]));
    }
}
