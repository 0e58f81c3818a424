pub mod collectives;
pub mod local;

#[cfg(test)]
mod transport_test;

pub use collectives::Collectives;

use serde::{de::DeserializeOwned, Serialize};
use std::{ops::Range, time::Duration};
use thiserror::Error;
use tracing::trace;

/// 0-based index of a process inside its world
pub type Rank = usize;
/// message tag, FIFO delivery is guaranteed per (source, destination, tag)
pub type Tag = u32;

/// tags at or above this value are used by the collective strategies
pub const RESERVED_TAG_BASE: Tag = 1 << 30;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Rank {rank} is outside of a world of size {world_size}")]
    InvalidRank { rank: Rank, world_size: usize },
    #[error("Tag {0} is reserved for collectives")]
    ReservedTag(Tag),
    #[error("Failed to encode or decode a message")]
    Codec(#[from] bincode::Error),
    #[error("Timed out after {timeout:?} waiting on rank {src} (tag {tag})")]
    Timeout {
        src: Rank,
        tag: Tag,
        timeout: Duration,
    },
    #[error("Rank {0} left the world")]
    Disconnected(Rank),
    #[error("Collective expected {expected} items but got {got}")]
    SizeMismatch { expected: usize, got: usize },
    #[error("Failed to start rank thread")]
    Spawn(#[from] std::io::Error),
}

/// Point-to-point capability every world has to provide.
///
/// `send` must be buffered: it returns once the payload is handed to the
/// transport, it never waits for the matching `recv`. Collectives are built on
/// top of these two calls by [`Collectives`].
pub trait Transport: Send + Sync {
    fn rank(&self) -> Rank;
    fn world_size(&self) -> usize;
    fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<(), TransportError>;
    fn recv(&self, src: Rank, tag: Tag) -> Result<Vec<u8>, TransportError>;
}

/// Read-only view of the rank context, handed to phases that must not communicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldInfo {
    pub rank: Rank,
    pub size: usize,
}

impl WorldInfo {
    pub fn is_root(&self, root: Rank) -> bool {
        self.rank == root
    }
}

/// Contiguous block of `len` items owned by `rank`, the remainder goes to the lowest ranks.
pub fn block_partition(len: usize, world_size: usize, rank: Rank) -> Range<usize> {
    if world_size == 0 {
        return 0..0;
    }

    let base = len / world_size;
    let remainder = len % world_size;
    let start = rank * base + rank.min(remainder);
    let size = base + usize::from(rank < remainder);

    start.min(len)..(start + size).min(len)
}

/// Typed front of a [`Transport`].
///
/// Values travel as bincode encoded serde data. The communicator is cheap to
/// copy and borrows the transport, so it can't outlive the world it was made for.
#[derive(Clone, Copy)]
pub struct Communicator<'a> {
    transport: &'a dyn Transport,
    collectives: Collectives,
}

impl std::fmt::Debug for Communicator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank())
            .field("world_size", &self.world_size())
            .field("collectives", &self.collectives)
            .finish()
    }
}

impl<'a> Communicator<'a> {
    pub fn new(transport: &'a dyn Transport, collectives: Collectives) -> Self {
        Self {
            transport,
            collectives,
        }
    }

    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    pub fn world_size(&self) -> usize {
        self.transport.world_size()
    }

    pub fn info(&self) -> WorldInfo {
        WorldInfo {
            rank: self.rank(),
            size: self.world_size(),
        }
    }

    pub fn collectives(&self) -> Collectives {
        self.collectives
    }

    fn check_rank(&self, rank: Rank) -> Result<(), TransportError> {
        if rank < self.world_size() {
            Ok(())
        } else {
            Err(TransportError::InvalidRank {
                rank,
                world_size: self.world_size(),
            })
        }
    }

    pub(crate) fn send_raw(
        &self,
        dest: Rank,
        tag: Tag,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.check_rank(dest)?;
        trace!(src = self.rank(), dest, tag, bytes = payload.len(), "send");

        self.transport.send(dest, tag, payload)
    }

    pub(crate) fn recv_raw(&self, src: Rank, tag: Tag) -> Result<Vec<u8>, TransportError> {
        self.check_rank(src)?;
        let payload = self.transport.recv(src, tag)?;
        trace!(src, dest = self.rank(), tag, bytes = payload.len(), "recv");

        Ok(payload)
    }

    pub fn send<T: Serialize>(
        &self,
        value: &T,
        dest: Rank,
        tag: Tag,
    ) -> Result<(), TransportError> {
        if tag >= RESERVED_TAG_BASE {
            return Err(TransportError::ReservedTag(tag));
        }

        self.send_raw(dest, tag, bincode::serialize(value)?)
    }

    pub fn recv<T: DeserializeOwned>(&self, src: Rank, tag: Tag) -> Result<T, TransportError> {
        if tag >= RESERVED_TAG_BASE {
            return Err(TransportError::ReservedTag(tag));
        }

        Ok(bincode::deserialize(&self.recv_raw(src, tag)?)?)
    }

    /// send `value` to `partner` and receive its counterpart, safe in both directions
    /// since sends are buffered
    pub fn sendrecv<T: Serialize + DeserializeOwned>(
        &self,
        value: &T,
        partner: Rank,
        tag: Tag,
    ) -> Result<T, TransportError> {
        self.send(value, partner, tag)?;
        self.recv(partner, tag)
    }

    /// overwrite `value` on every rank with the value held by `root`
    pub fn broadcast<T: Serialize + DeserializeOwned>(
        &self,
        value: &mut T,
        root: Rank,
    ) -> Result<(), TransportError> {
        self.check_rank(root)?;
        let payload = if self.rank() == root {
            Some(bincode::serialize(value)?)
        } else {
            None
        };

        let received = self.collectives.broadcast.run(self, payload, root)?;
        if self.rank() != root {
            *value = bincode::deserialize(&received)?;
        }

        Ok(())
    }

    /// hand item `i` of `items` (only read on `root`) to rank `i`
    pub fn scatter<T: Serialize + DeserializeOwned>(
        &self,
        items: Vec<T>,
        root: Rank,
    ) -> Result<T, TransportError> {
        self.check_rank(root)?;
        let payloads = if self.rank() == root {
            if items.len() != self.world_size() {
                return Err(TransportError::SizeMismatch {
                    expected: self.world_size(),
                    got: items.len(),
                });
            }

            Some(
                items
                    .iter()
                    .map(bincode::serialize)
                    .collect::<Result<Vec<_>, _>>()?,
            )
        } else {
            None
        };

        let own = self.collectives.scatter.run(self, payloads, root)?;

        Ok(bincode::deserialize(&own)?)
    }

    /// scatter `data` (only read on `root`) in contiguous blocks, see [`block_partition`]
    pub fn scatter_blocks<T: Clone + Serialize + DeserializeOwned>(
        &self,
        data: &[T],
        root: Rank,
    ) -> Result<Vec<T>, TransportError> {
        let blocks = if self.rank() == root {
            (0..self.world_size())
                .map(|rank| data[block_partition(data.len(), self.world_size(), rank)].to_vec())
                .collect()
        } else {
            Vec::new()
        };

        self.scatter(blocks, root)
    }

    /// collect one value per rank on `root`, in rank order
    pub fn gather<T: Serialize + DeserializeOwned>(
        &self,
        value: &T,
        root: Rank,
    ) -> Result<Option<Vec<T>>, TransportError> {
        self.check_rank(root)?;

        match self
            .collectives
            .gather
            .run(self, bincode::serialize(value)?, root)?
        {
            Some(payloads) => Ok(Some(
                payloads
                    .iter()
                    .map(|payload| bincode::deserialize(payload))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            None => Ok(None),
        }
    }

    pub fn all_gather<T: Serialize + DeserializeOwned>(
        &self,
        value: &T,
    ) -> Result<Vec<T>, TransportError> {
        let mut gathered = self.gather(value, 0)?.unwrap_or_default();
        self.broadcast(&mut gathered, 0)?;

        Ok(gathered)
    }

    /// combine one value per rank on `root`; operands are combined in ascending rank
    /// order so `op` only has to be associative
    pub fn reduce<T, F>(&self, value: T, root: Rank, op: F) -> Result<Option<T>, TransportError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        self.check_rank(root)?;
        self.collectives.reduce.run(self, value, root, &op)
    }

    /// like [`Communicator::reduce`] but every rank ends up with the bit-identical result
    pub fn all_reduce<T, F>(&self, value: T, op: F) -> Result<T, TransportError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        self.collectives.all_reduce.run(self, value, &op)
    }

    pub fn barrier(&self) -> Result<(), TransportError> {
        collectives::dissemination_barrier(self)
    }
}
