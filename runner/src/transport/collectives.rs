//! Hand-rolled collective algorithms on top of point-to-point messages.
//!
//! Every strategy of one collective must produce the same observable result
//! for every world size, so they can be swapped through the settings without
//! touching any task. Root based trees work on ranks relative to the root,
//! reductions always combine in ascending rank order.

use super::{Communicator, Rank, Tag, TransportError, RESERVED_TAG_BASE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const TAG_BROADCAST: Tag = RESERVED_TAG_BASE;
const TAG_SCATTER: Tag = RESERVED_TAG_BASE + 1;
const TAG_GATHER: Tag = RESERVED_TAG_BASE + 2;
const TAG_REDUCE: Tag = RESERVED_TAG_BASE + 3;
const TAG_ALL_REDUCE: Tag = RESERVED_TAG_BASE + 4;
const TAG_BARRIER: Tag = RESERVED_TAG_BASE + 5;

/// Selected strategy per collective
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Collectives {
    pub broadcast: BroadcastStrategy,
    pub scatter: ScatterStrategy,
    pub gather: GatherStrategy,
    pub reduce: ReduceStrategy,
    pub all_reduce: AllReduceStrategy,
}

impl Collectives {
    /// root sends/receives everything itself, used as the reference in tests
    pub fn linear() -> Self {
        Self {
            broadcast: BroadcastStrategy::Linear,
            scatter: ScatterStrategy::Linear,
            gather: GatherStrategy::Linear,
            reduce: ReduceStrategy::Linear,
            all_reduce: AllReduceStrategy::ReduceBroadcast,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStrategy {
    Linear,
    #[default]
    BinomialTree,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScatterStrategy {
    Linear,
    #[default]
    RecursiveHalving,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatherStrategy {
    #[default]
    Linear,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReduceStrategy {
    Linear,
    #[default]
    BinomialTree,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllReduceStrategy {
    ReduceBroadcast,
    #[default]
    RecursiveDoubling,
}

fn send_value<T: Serialize>(
    comm: &Communicator<'_>,
    dest: Rank,
    tag: Tag,
    value: &T,
) -> Result<(), TransportError> {
    comm.send_raw(dest, tag, bincode::serialize(value)?)
}

fn recv_value<T: DeserializeOwned>(
    comm: &Communicator<'_>,
    src: Rank,
    tag: Tag,
) -> Result<T, TransportError> {
    Ok(bincode::deserialize(&comm.recv_raw(src, tag)?)?)
}

/// rank relative to `root`, the root itself is 0
fn relative(rank: Rank, root: Rank, size: usize) -> Rank {
    (rank + size - root) % size
}

fn absolute(vrank: Rank, root: Rank, size: usize) -> Rank {
    (vrank + root) % size
}

impl BroadcastStrategy {
    /// `payload` is only read on `root`, every rank returns the root's payload
    pub(crate) fn run(
        self,
        comm: &Communicator<'_>,
        payload: Option<Vec<u8>>,
        root: Rank,
    ) -> Result<Vec<u8>, TransportError> {
        match self {
            Self::Linear => broadcast_linear(comm, payload, root),
            Self::BinomialTree => broadcast_binomial(comm, payload, root),
        }
    }
}

fn broadcast_linear(
    comm: &Communicator<'_>,
    payload: Option<Vec<u8>>,
    root: Rank,
) -> Result<Vec<u8>, TransportError> {
    if comm.rank() != root {
        return comm.recv_raw(root, TAG_BROADCAST);
    }

    let payload = payload.unwrap_or_default();
    for dest in (0..comm.world_size()).filter(|dest| *dest != root) {
        comm.send_raw(dest, TAG_BROADCAST, payload.clone())?;
    }

    Ok(payload)
}

fn broadcast_binomial(
    comm: &Communicator<'_>,
    payload: Option<Vec<u8>>,
    root: Rank,
) -> Result<Vec<u8>, TransportError> {
    let size = comm.world_size();
    let vrank = relative(comm.rank(), root, size);
    let mut payload = if vrank == 0 {
        payload.unwrap_or_default()
    } else {
        Vec::new()
    };

    // receive from the parent: the rank with our lowest set bit cleared
    let mut mask = 1;
    while mask < size {
        if vrank & mask != 0 {
            payload = comm.recv_raw(absolute(vrank - mask, root, size), TAG_BROADCAST)?;
            break;
        }
        mask <<= 1;
    }

    // forward to the children below that bit
    mask >>= 1;
    while mask > 0 {
        if vrank + mask < size {
            comm.send_raw(
                absolute(vrank + mask, root, size),
                TAG_BROADCAST,
                payload.clone(),
            )?;
        }
        mask >>= 1;
    }

    Ok(payload)
}

impl ScatterStrategy {
    /// `payloads` holds one entry per rank (in rank order) and is only read on `root`
    pub(crate) fn run(
        self,
        comm: &Communicator<'_>,
        payloads: Option<Vec<Vec<u8>>>,
        root: Rank,
    ) -> Result<Vec<u8>, TransportError> {
        if comm.rank() == root {
            let got = payloads.as_ref().map_or(0, Vec::len);
            if got != comm.world_size() {
                return Err(TransportError::SizeMismatch {
                    expected: comm.world_size(),
                    got,
                });
            }
        }

        match self {
            Self::Linear => scatter_linear(comm, payloads, root),
            Self::RecursiveHalving => scatter_recursive_halving(comm, payloads, root),
        }
    }
}

fn scatter_linear(
    comm: &Communicator<'_>,
    payloads: Option<Vec<Vec<u8>>>,
    root: Rank,
) -> Result<Vec<u8>, TransportError> {
    if comm.rank() != root {
        return comm.recv_raw(root, TAG_SCATTER);
    }

    let mut own = Vec::new();
    for (dest, payload) in payloads.unwrap_or_default().into_iter().enumerate() {
        if dest == root {
            own = payload;
        } else {
            comm.send_raw(dest, TAG_SCATTER, payload)?;
        }
    }

    Ok(own)
}

fn scatter_recursive_halving(
    comm: &Communicator<'_>,
    payloads: Option<Vec<Vec<u8>>>,
    root: Rank,
) -> Result<Vec<u8>, TransportError> {
    let size = comm.world_size();
    let vrank = relative(comm.rank(), root, size);

    // `held[i]` belongs to relative rank `vrank + i`
    let (mut held, mut mask): (Vec<Vec<u8>>, usize) = if vrank == 0 {
        let mut payloads = payloads.unwrap_or_default();
        payloads.rotate_left(root);

        (payloads, size.next_power_of_two())
    } else {
        let mask = vrank & vrank.wrapping_neg();
        let parent = absolute(vrank - mask, root, size);

        (recv_value(comm, parent, TAG_SCATTER)?, mask)
    };

    mask >>= 1;
    while mask > 0 {
        if mask < held.len() {
            let subtree = held.split_off(mask);
            send_value(comm, absolute(vrank + mask, root, size), TAG_SCATTER, &subtree)?;
        }
        mask >>= 1;
    }

    held.into_iter()
        .next()
        .ok_or(TransportError::SizeMismatch {
            expected: 1,
            got: 0,
        })
}

impl GatherStrategy {
    /// returns all payloads in rank order on `root`, `None` elsewhere
    pub(crate) fn run(
        self,
        comm: &Communicator<'_>,
        payload: Vec<u8>,
        root: Rank,
    ) -> Result<Option<Vec<Vec<u8>>>, TransportError> {
        match self {
            Self::Linear => gather_linear(comm, payload, root),
        }
    }
}

fn gather_linear(
    comm: &Communicator<'_>,
    payload: Vec<u8>,
    root: Rank,
) -> Result<Option<Vec<Vec<u8>>>, TransportError> {
    if comm.rank() != root {
        comm.send_raw(root, TAG_GATHER, payload)?;
        return Ok(None);
    }

    let mut own = Some(payload);
    let mut gathered = Vec::with_capacity(comm.world_size());
    for src in 0..comm.world_size() {
        if src == root {
            gathered.push(own.take().unwrap_or_default());
        } else {
            gathered.push(comm.recv_raw(src, TAG_GATHER)?);
        }
    }

    Ok(Some(gathered))
}

impl ReduceStrategy {
    pub(crate) fn run<T, F>(
        self,
        comm: &Communicator<'_>,
        value: T,
        root: Rank,
        op: &F,
    ) -> Result<Option<T>, TransportError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        match self {
            Self::Linear => reduce_linear(comm, value, root, op),
            Self::BinomialTree => reduce_binomial(comm, value, root, op),
        }
    }
}

fn reduce_linear<T, F>(
    comm: &Communicator<'_>,
    value: T,
    root: Rank,
    op: &F,
) -> Result<Option<T>, TransportError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(T, T) -> T,
{
    if comm.rank() != root {
        send_value(comm, root, TAG_REDUCE, &value)?;
        return Ok(None);
    }

    let mut own = Some(value);
    let mut acc: Option<T> = None;
    for src in 0..comm.world_size() {
        let operand = if src == root {
            own.take()
        } else {
            Some(recv_value(comm, src, TAG_REDUCE)?)
        };

        acc = match (acc, operand) {
            (Some(acc), Some(operand)) => Some(op(acc, operand)),
            (None, operand) => operand,
            (acc, None) => acc,
        };
    }

    Ok(acc)
}

/// binomial tree towards rank 0 (keeps ascending operand order), then hand off to `root`
fn reduce_binomial<T, F>(
    comm: &Communicator<'_>,
    value: T,
    root: Rank,
    op: &F,
) -> Result<Option<T>, TransportError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(T, T) -> T,
{
    let rank = comm.rank();
    let size = comm.world_size();
    let mut partial = Some(value);

    let mut mask = 1;
    while mask < size {
        if rank & mask != 0 {
            if let Some(acc) = partial.take() {
                send_value(comm, rank - mask, TAG_REDUCE, &acc)?;
            }
            break;
        }

        if rank + mask < size {
            let upper: T = recv_value(comm, rank + mask, TAG_REDUCE)?;
            partial = partial.map(|lower| op(lower, upper));
        }
        mask <<= 1;
    }

    if root == 0 {
        return Ok(partial.filter(|_| rank == 0));
    }

    if rank == 0 {
        if let Some(total) = partial {
            send_value(comm, root, TAG_REDUCE, &total)?;
        }
        Ok(None)
    } else if rank == root {
        Ok(Some(recv_value(comm, 0, TAG_REDUCE)?))
    } else {
        Ok(None)
    }
}

impl AllReduceStrategy {
    pub(crate) fn run<T, F>(
        self,
        comm: &Communicator<'_>,
        value: T,
        op: &F,
    ) -> Result<T, TransportError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        match self {
            Self::ReduceBroadcast => all_reduce_reduce_broadcast(comm, value, op),
            Self::RecursiveDoubling => all_reduce_recursive_doubling(comm, value, op),
        }
    }
}

fn all_reduce_reduce_broadcast<T, F>(
    comm: &Communicator<'_>,
    value: T,
    op: &F,
) -> Result<T, TransportError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(T, T) -> T,
{
    let collectives = comm.collectives();
    let reduced = collectives.reduce.run(comm, value, 0, op)?;
    let payload = reduced
        .map(|total| bincode::serialize(&total))
        .transpose()?;

    let payload = collectives.broadcast.run(comm, payload, 0)?;

    Ok(bincode::deserialize(&payload)?)
}

/// Recursive doubling; for non power of two worlds the lowest `2 * rem` ranks first
/// fold pairwise so the exchange runs over a power of two. Partners combine the
/// lower block first, so both sides end with bit-identical values.
fn all_reduce_recursive_doubling<T, F>(
    comm: &Communicator<'_>,
    value: T,
    op: &F,
) -> Result<T, TransportError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(T, T) -> T,
{
    let rank = comm.rank();
    let size = comm.world_size();
    if size == 1 {
        return Ok(value);
    }

    let pow2 = if size.is_power_of_two() {
        size
    } else {
        size.next_power_of_two() >> 1
    };
    let rem = size - pow2;
    let mut acc = value;

    let folded_rank = if rank < 2 * rem {
        if rank % 2 == 0 {
            send_value(comm, rank + 1, TAG_ALL_REDUCE, &acc)?;
            None
        } else {
            let lower: T = recv_value(comm, rank - 1, TAG_ALL_REDUCE)?;
            acc = op(lower, acc);
            Some(rank / 2)
        }
    } else {
        Some(rank - rem)
    };

    if let Some(folded_rank) = folded_rank {
        let mut mask = 1;
        while mask < pow2 {
            let partner_folded = folded_rank ^ mask;
            let partner = if partner_folded < rem {
                partner_folded * 2 + 1
            } else {
                partner_folded + rem
            };

            send_value(comm, partner, TAG_ALL_REDUCE, &acc)?;
            let other: T = recv_value(comm, partner, TAG_ALL_REDUCE)?;
            acc = if partner_folded < folded_rank {
                op(other, acc)
            } else {
                op(acc, other)
            };
            mask <<= 1;
        }
    }

    if rank < 2 * rem {
        if rank % 2 == 0 {
            acc = recv_value(comm, rank + 1, TAG_ALL_REDUCE)?;
        } else {
            send_value(comm, rank - 1, TAG_ALL_REDUCE, &acc)?;
        }
    }

    Ok(acc)
}

pub(crate) fn dissemination_barrier(comm: &Communicator<'_>) -> Result<(), TransportError> {
    let rank = comm.rank();
    let size = comm.world_size();

    let mut distance = 1;
    while distance < size {
        comm.send_raw((rank + distance) % size, TAG_BARRIER, Vec::new())?;
        comm.recv_raw((rank + size - distance) % size, TAG_BARRIER)?;
        distance <<= 1;
    }

    Ok(())
}
