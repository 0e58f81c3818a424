//! Reference exercises for the task harness, each with a sequential and a
//! distributed variant of the same computation.

pub mod elementwise_sum;
pub mod hypercube_broadcast;
pub mod lexicographic_compare;
pub mod matrix_column_max;
pub mod odd_even_sort;
pub mod suite;
pub mod trapezoid_integration;

use suite::Suite;
use tasklab_runner::{config::ConfigErrors, config::Settings, RegistryBuilder, RegistryError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExerciseError {
    #[error("Exercise registration failed")]
    Registry(#[from] RegistryError),
    #[error("Exercise parameters are invalid")]
    Config(#[from] ConfigErrors),
}

/// Register both variants of every exercise. Parameters and environment
/// overrides are read here, once.
pub fn register_all(
    builder: &mut RegistryBuilder,
    settings: &Settings,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ExerciseError> {
    elementwise_sum::register(builder, settings)?;
    lexicographic_compare::register(builder, settings)?;
    hypercube_broadcast::register(builder, settings, env)?;
    odd_even_sort::register(builder, settings)?;
    trapezoid_integration::register(builder, settings)?;
    matrix_column_max::register(builder, settings)?;

    Ok(())
}

pub fn suites() -> Vec<Box<dyn Suite>> {
    vec![
        elementwise_sum::suite(),
        lexicographic_compare::suite(),
        hypercube_broadcast::suite(),
        odd_even_sort::suite(),
        trapezoid_integration::suite(),
        matrix_column_max::suite(),
    ]
}

/// every exercise id, in registration order
pub fn task_ids() -> Vec<&'static str> {
    suites().iter().map(|suite| suite.task_id()).collect()
}
