//! The four phase contract shared by every exercise.
//!
//! A task is constructed with its input, then driven through
//! `validate → pre_process → run → post_process`. Each phase reports a
//! task level failure by returning `false`; a transport error is fatal.

use crate::transport::{Communicator, TransportError, WorldInfo};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Sequential,
    Distributed,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Sequential, Variant::Distributed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Distributed => "distributed",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown variant '{0}', expected 'sequential' or 'distributed'")]
pub struct UnknownVariant(pub String);

impl FromStr for Variant {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "sequential" | "seq" => Ok(Self::Sequential),
            "distributed" | "mpi" => Ok(Self::Distributed),
            _ => Err(UnknownVariant(value.to_string())),
        }
    }
}

/// Which ranks hold the final output after `run`
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Convention {
    /// only the elected rank holds the result, all others keep the default output
    SingleRankAuthoritative,
    /// every rank holds an identical copy
    Broadcast,
}

/// Lifecycle contract the driver runs for both variants.
///
/// Every rank has to call `pre_process` and `run` unconditionally, any
/// collective skipped by a subset of ranks deadlocks the world. `run` must
/// recompute the output from the owned input so it can be repeated.
pub trait Task: Send {
    type Input;
    type Output;

    fn convention(&self) -> Convention;

    /// pure check of the stored input, may look at the world but must not communicate
    fn validate(&self, world: WorldInfo) -> bool;

    fn pre_process(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError>;

    fn run(&mut self, comm: &Communicator<'_>) -> Result<bool, TransportError>;

    /// cheap consistency check, must not communicate
    fn post_process(&mut self) -> bool;

    fn output(&self) -> &Self::Output;
}

pub type BoxedTask<I, O> = Box<dyn Task<Input = I, Output = O>>;

/// Single process flavour of [`Task`], every rank computes the full result locally.
pub trait LocalTask: Send {
    type Input;
    type Output;

    fn validate(&self) -> bool;

    fn pre_process(&mut self) -> bool {
        true
    }

    fn run(&mut self) -> bool;

    fn post_process(&mut self) -> bool {
        true
    }

    fn output(&self) -> &Self::Output;
}

/// Adapter that lets a [`LocalTask`] be driven like any other task
#[derive(Debug, Clone)]
pub struct Sequential<T>(pub T);

impl<T: LocalTask> Sequential<T> {
    pub fn boxed(task: T) -> BoxedTask<T::Input, T::Output>
    where
        T: 'static,
    {
        Box::new(Self(task))
    }
}

impl<T: LocalTask> Task for Sequential<T> {
    type Input = T::Input;
    type Output = T::Output;

    fn convention(&self) -> Convention {
        Convention::Broadcast
    }

    fn validate(&self, _world: WorldInfo) -> bool {
        self.0.validate()
    }

    fn pre_process(&mut self, _comm: &Communicator<'_>) -> Result<bool, TransportError> {
        Ok(self.0.pre_process())
    }

    fn run(&mut self, _comm: &Communicator<'_>) -> Result<bool, TransportError> {
        Ok(self.0.run())
    }

    fn post_process(&mut self) -> bool {
        self.0.post_process()
    }

    fn output(&self) -> &Self::Output {
        self.0.output()
    }
}
