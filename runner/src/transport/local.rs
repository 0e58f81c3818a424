//! In-process world: one thread per rank, per-rank mailboxes.
//!
//! Used by the CLI to launch a world without an MPI runner and by the tests.

use super::{Rank, Tag, Transport, TransportError};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    panic,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, error};

#[derive(Debug)]
struct Envelope {
    src: Rank,
    tag: Tag,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    signal: Condvar,
}

#[derive(Debug)]
struct Shared {
    mailboxes: Vec<Mailbox>,
    departed: Vec<AtomicBool>,
    timeout: Option<Duration>,
}

/// Endpoint of one rank, leaving the world (dropping it) wakes up everybody
/// that is still waiting on this rank
#[derive(Debug)]
pub struct LocalTransport {
    rank: Rank,
    shared: Arc<Shared>,
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.mailboxes.len()
    }

    fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<(), TransportError> {
        let mailbox = self
            .shared
            .mailboxes
            .get(dest)
            .ok_or(TransportError::InvalidRank {
                rank: dest,
                world_size: self.world_size(),
            })?;

        if self.shared.departed[dest].load(Ordering::Acquire) {
            return Err(TransportError::Disconnected(dest));
        }

        mailbox.queue.lock().push_back(Envelope {
            src: self.rank,
            tag,
            payload,
        });
        mailbox.signal.notify_all();

        Ok(())
    }

    fn recv(&self, src: Rank, tag: Tag) -> Result<Vec<u8>, TransportError> {
        if src >= self.world_size() {
            return Err(TransportError::InvalidRank {
                rank: src,
                world_size: self.world_size(),
            });
        }

        let mailbox = &self.shared.mailboxes[self.rank];
        let deadline = self.shared.timeout.map(|timeout| Instant::now() + timeout);
        let mut queue = mailbox.queue.lock();

        loop {
            if let Some(position) = queue
                .iter()
                .position(|envelope| envelope.src == src && envelope.tag == tag)
            {
                if let Some(envelope) = queue.remove(position) {
                    return Ok(envelope.payload);
                }
            }

            if self.shared.departed[src].load(Ordering::Acquire) {
                return Err(TransportError::Disconnected(src));
            }

            match deadline {
                Some(deadline) => {
                    if mailbox.signal.wait_until(&mut queue, deadline).timed_out()
                        && !queue
                            .iter()
                            .any(|envelope| envelope.src == src && envelope.tag == tag)
                    {
                        return Err(TransportError::Timeout {
                            src,
                            tag,
                            timeout: self.shared.timeout.unwrap_or_default(),
                        });
                    }
                }
                None => mailbox.signal.wait(&mut queue),
            }
        }
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.shared.departed[self.rank].store(true, Ordering::Release);

        // take every lock so no waiter misses the wake up between its check and wait
        for mailbox in self.shared.mailboxes.iter() {
            let _queue = mailbox.queue.lock();
            mailbox.signal.notify_all();
        }
    }
}

/// Fixed size set of in-process ranks
#[derive(Debug, Clone)]
pub struct LocalWorld {
    size: usize,
    timeout: Option<Duration>,
}

impl LocalWorld {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            timeout: None,
        }
    }

    /// bound every receive, a stuck collective turns into `TransportError::Timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// fresh, connected endpoints for every rank
    pub fn endpoints(&self) -> Vec<LocalTransport> {
        let shared = Arc::new(Shared {
            mailboxes: (0..self.size).map(|_| Mailbox::default()).collect(),
            departed: (0..self.size).map(|_| AtomicBool::new(false)).collect(),
            timeout: self.timeout,
        });

        (0..self.size)
            .map(|rank| LocalTransport {
                rank,
                shared: shared.clone(),
            })
            .collect()
    }

    /// Run `body` once per rank on its own thread and return the results in rank order.
    /// A panicking rank is re-raised after every other rank has finished.
    pub fn run<R, F>(&self, body: F) -> Result<Vec<R>, TransportError>
    where
        R: Send,
        F: Fn(&LocalTransport) -> R + Sync,
    {
        debug!(world_size = self.size, "Starting local world");
        let body = &body;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.size);
            for endpoint in self.endpoints() {
                let handle = thread::Builder::new()
                    .name(format!("rank-{}", endpoint.rank))
                    .spawn_scoped(scope, move || body(&endpoint))?;
                handles.push(handle);
            }

            let mut results = Vec::with_capacity(handles.len());
            let mut panicked = None;
            for (rank, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(result) => results.push(result),
                    Err(payload) => {
                        error!(rank, "Rank panicked");
                        panicked.get_or_insert(payload);
                    }
                }
            }

            if let Some(payload) = panicked {
                panic::resume_unwind(payload);
            }

            Ok(results)
        })
    }
}
