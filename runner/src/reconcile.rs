//! Turn the per-rank output of a finished task into something comparable.
//!
//! Which ranks are authoritative follows from the task's [`Convention`] alone.
//! Non-authoritative ranks always report `Output::default()`, whatever the
//! task left behind there.

use crate::{
    task::{Convention, Task},
    transport::Rank,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Reconciled<O> {
    pub output: O,
    /// only authoritative outputs are compared against the expectation
    pub authoritative: bool,
}

pub fn is_authoritative(convention: Convention, my_rank: Rank, elected_rank: Rank) -> bool {
    match convention {
        Convention::SingleRankAuthoritative => my_rank == elected_rank,
        Convention::Broadcast => true,
    }
}

pub fn reconcile<T>(task: &T, my_rank: Rank, elected_rank: Rank) -> Reconciled<T::Output>
where
    T: Task + ?Sized,
    T::Output: Clone + Default,
{
    if is_authoritative(task.convention(), my_rank, elected_rank) {
        Reconciled {
            output: task.output().clone(),
            authoritative: true,
        }
    } else {
        Reconciled {
            output: T::Output::default(),
            authoritative: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Communicator, TransportError, WorldInfo};

    /// holds a fixed output, pretends to be distributed
    struct Fixed(Convention, Vec<u8>);

    impl Task for Fixed {
        type Input = ();
        type Output = Vec<u8>;

        fn convention(&self) -> Convention {
            self.0
        }

        fn validate(&self, _world: WorldInfo) -> bool {
            true
        }

        fn pre_process(&mut self, _comm: &Communicator<'_>) -> Result<bool, TransportError> {
            Ok(true)
        }

        fn run(&mut self, _comm: &Communicator<'_>) -> Result<bool, TransportError> {
            Ok(true)
        }

        fn post_process(&mut self) -> bool {
            true
        }

        fn output(&self) -> &Vec<u8> {
            &self.1
        }
    }

    #[test]
    fn single_rank_has_exactly_one_authority() {
        let task = Fixed(Convention::SingleRankAuthoritative, vec![1, 2, 3]);
        let reconciled = (0..4)
            .map(|rank| reconcile(&task, rank, 2))
            .collect::<Vec<_>>();

        assert_eq!(reconciled.iter().filter(|r| r.authoritative).count(), 1);
        assert_eq!(reconciled[2].output, vec![1, 2, 3]);
        assert!(reconciled
            .iter()
            .filter(|r| !r.authoritative)
            .all(|r| r.output.is_empty()));
    }

    #[test]
    fn broadcast_makes_every_rank_authoritative() {
        let task = Fixed(Convention::Broadcast, vec![7]);

        assert!((0..3)
            .map(|rank| reconcile(&task, rank, 0))
            .all(|r| r.authoritative && r.output == vec![7]));
    }
}
