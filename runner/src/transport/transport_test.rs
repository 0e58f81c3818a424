use super::{
    block_partition,
    collectives::{AllReduceStrategy, BroadcastStrategy, ReduceStrategy, ScatterStrategy},
    local::LocalWorld,
    Collectives, Communicator, TransportError, RESERVED_TAG_BASE,
};
use std::time::Duration;

fn strategy_sets() -> Vec<Collectives> {
    vec![
        Collectives::default(),
        Collectives::linear(),
        Collectives {
            broadcast: BroadcastStrategy::Linear,
            scatter: ScatterStrategy::RecursiveHalving,
            reduce: ReduceStrategy::BinomialTree,
            all_reduce: AllReduceStrategy::ReduceBroadcast,
            ..Collectives::default()
        },
    ]
}

#[test]
pub fn block_partition_gives_remainder_to_lowest_ranks() {
    let blocks = (0..3).map(|rank| block_partition(8, 3, rank)).collect::<Vec<_>>();

    assert_eq!(blocks, vec![0..3, 3..6, 6..8]);
}

#[test]
pub fn block_partition_with_more_ranks_than_items() {
    let blocks = (0..4).map(|rank| block_partition(2, 4, rank)).collect::<Vec<_>>();

    assert_eq!(blocks, vec![0..1, 1..2, 2..2, 2..2]);
}

#[test]
pub fn point_to_point_is_fifo_per_tag() {
    let results = LocalWorld::new(2)
        .run(|transport| {
            let comm = Communicator::new(transport, Collectives::default());
            if comm.rank() == 0 {
                for value in 0..5u32 {
                    comm.send(&value, 1, 7).unwrap();
                }
                comm.send(&99u32, 1, 3).unwrap();
                Vec::new()
            } else {
                // the other tag can be received first without disturbing order
                let mut values = vec![comm.recv::<u32>(0, 3).unwrap()];
                values.extend((0..5).map(|_| comm.recv::<u32>(0, 7).unwrap()));
                values
            }
        })
        .unwrap();

    assert_eq!(results[1], vec![99, 0, 1, 2, 3, 4]);
}

#[test]
pub fn reserved_tags_are_rejected() {
    let endpoints = LocalWorld::new(1).endpoints();
    let comm = Communicator::new(&endpoints[0], Collectives::default());

    assert!(matches!(
        comm.send(&1u8, 0, RESERVED_TAG_BASE),
        Err(TransportError::ReservedTag(_))
    ));
}

#[test]
pub fn broadcast_from_every_root() {
    for collectives in strategy_sets() {
        for size in 1..=7 {
            for root in 0..size {
                let results = LocalWorld::new(size)
                    .run(|transport| {
                        let comm = Communicator::new(transport, collectives);
                        let mut value = if comm.rank() == root {
                            format!("from {root}")
                        } else {
                            String::new()
                        };
                        comm.broadcast(&mut value, root).unwrap();
                        value
                    })
                    .unwrap();

                assert!(results.iter().all(|value| *value == format!("from {root}")));
            }
        }
    }
}

#[test]
pub fn scatter_and_gather_round_trip_every_root() {
    for collectives in strategy_sets() {
        for size in 1..=8 {
            for root in 0..size {
                let results = LocalWorld::new(size)
                    .run(|transport| {
                        let comm = Communicator::new(transport, collectives);
                        let items = if comm.rank() == root {
                            (0..size).map(|rank| rank * 10).collect()
                        } else {
                            Vec::new()
                        };

                        let own: usize = comm.scatter(items, root).unwrap();
                        assert_eq!(own, comm.rank() * 10);

                        comm.gather(&(own + 1), root).unwrap()
                    })
                    .unwrap();

                for (rank, gathered) in results.into_iter().enumerate() {
                    if rank == root {
                        let expected = (0..size).map(|rank| rank * 10 + 1).collect::<Vec<_>>();
                        assert_eq!(gathered, Some(expected));
                    } else {
                        assert_eq!(gathered, None);
                    }
                }
            }
        }
    }
}

#[test]
pub fn scatter_rejects_wrong_item_count_on_root() {
    let endpoints = LocalWorld::new(1).endpoints();
    let comm = Communicator::new(&endpoints[0], Collectives::default());

    assert!(matches!(
        comm.scatter(vec![1u8, 2u8], 0),
        Err(TransportError::SizeMismatch {
            expected: 1,
            got: 2
        })
    ));
}

#[test]
pub fn scatter_blocks_splits_contiguously() {
    let results = LocalWorld::new(3)
        .run(|transport| {
            let comm = Communicator::new(transport, Collectives::default());
            let data = if comm.rank() == 0 {
                (1..=7).collect::<Vec<i32>>()
            } else {
                Vec::new()
            };

            comm.scatter_blocks(&data, 0).unwrap()
        })
        .unwrap();

    assert_eq!(results, vec![vec![1, 2, 3], vec![4, 5], vec![6, 7]]);
}

#[test]
pub fn reductions_keep_rank_order() {
    // string concatenation is associative but not commutative
    for collectives in strategy_sets() {
        for size in 1..=8 {
            let expected = (0..size).map(|rank| rank.to_string()).collect::<String>();

            let results = LocalWorld::new(size)
                .run(|transport| {
                    let comm = Communicator::new(transport, collectives);
                    let root = size - 1;
                    let reduced = comm
                        .reduce(comm.rank().to_string(), root, |a, b| a + &b)
                        .unwrap();
                    let all = comm
                        .all_reduce(comm.rank().to_string(), |a, b| a + &b)
                        .unwrap();

                    (reduced, all)
                })
                .unwrap();

            for (rank, (reduced, all)) in results.into_iter().enumerate() {
                if rank == size - 1 {
                    assert_eq!(reduced.as_deref(), Some(expected.as_str()));
                } else {
                    assert_eq!(reduced, None);
                }
                assert_eq!(all, expected);
            }
        }
    }
}

#[test]
pub fn all_gather_and_barrier() {
    let results = LocalWorld::new(5)
        .run(|transport| {
            let comm = Communicator::new(transport, Collectives::default());
            comm.barrier().unwrap();
            let gathered = comm.all_gather(&(comm.rank() as u8)).unwrap();
            comm.barrier().unwrap();
            gathered
        })
        .unwrap();

    assert!(results.iter().all(|gathered| *gathered == vec![0, 1, 2, 3, 4]));
}

#[test]
pub fn receive_times_out_when_peer_never_sends() {
    let results = LocalWorld::new(2)
        .with_timeout(Duration::from_millis(50))
        .run(|transport| {
            let comm = Communicator::new(transport, Collectives::default());
            if comm.rank() == 1 {
                // keep rank 0 around so the receive can only end by timing out
                std::thread::sleep(Duration::from_millis(200));
                None
            } else {
                Some(comm.recv::<u8>(1, 0))
            }
        })
        .unwrap();

    assert!(matches!(
        results[0],
        Some(Err(TransportError::Timeout { src: 1, .. }))
    ));
}

#[test]
pub fn receive_from_departed_rank_fails() {
    let results = LocalWorld::new(2)
        .run(|transport| {
            let comm = Communicator::new(transport, Collectives::default());
            if comm.rank() == 0 {
                Some(comm.recv::<u8>(1, 0))
            } else {
                None
            }
        })
        .unwrap();

    assert!(matches!(
        results[0],
        Some(Err(TransportError::Disconnected(1)))
    ));
}
