use globset::GlobMatcher;
use serde::de::DeserializeOwned;
use std::{fmt::Debug, marker::PhantomData};
use tasklab_runner::{
    config::Settings,
    fixture::{FixtureError, FixtureMap, RawCase},
    harness::{expand, Approx, Runnable, Tolerance},
    Registry, RegistryError, Variant,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SuiteError {
    #[error("Fixture doesn't fit its task")]
    Fixture(#[from] FixtureError),
    #[error("Harness parameters couldn't be expanded")]
    Registry(#[from] RegistryError),
}

/// Turns untyped fixture cases of one task into runnable harness parameters
pub trait Suite: Send + Sync {
    fn task_id(&self) -> &'static str;

    fn parameters(
        &self,
        registry: &Registry,
        variants: &[Variant],
        cases: &[RawCase],
        tolerance: Option<Tolerance>,
    ) -> Result<Vec<Box<dyn Runnable>>, SuiteError>;
}

/// [`Suite`] for an exercise with input `I` and output `O`
pub struct TypedSuite<I, O> {
    task_id: &'static str,
    types: PhantomData<fn(I) -> O>,
}

impl<I, O> TypedSuite<I, O> {
    pub fn new(task_id: &'static str) -> Self {
        Self {
            task_id,
            types: PhantomData,
        }
    }

    pub fn boxed(task_id: &'static str) -> Box<dyn Suite>
    where
        Self: Suite + 'static,
    {
        Box::new(Self::new(task_id))
    }
}

impl<I, O> Suite for TypedSuite<I, O>
where
    I: DeserializeOwned + Clone + Send + Sync + 'static,
    O: DeserializeOwned + Approx + Clone + Default + Debug + Send + Sync + 'static,
{
    fn task_id(&self) -> &'static str {
        self.task_id
    }

    fn parameters(
        &self,
        registry: &Registry,
        variants: &[Variant],
        cases: &[RawCase],
        tolerance: Option<Tolerance>,
    ) -> Result<Vec<Box<dyn Runnable>>, SuiteError> {
        let cases = cases
            .iter()
            .map(|case| case.typed::<I, O>(self.task_id, tolerance))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(expand(registry, self.task_id, variants, &cases)?
            .into_iter()
            .map(|parameter| Box::new(parameter) as Box<dyn Runnable>)
            .collect())
    }
}

/// Every harness parameter selected by `settings` and `filter`, in suite then
/// fixture order. Every rank has to run the result in this exact order.
pub fn plan(
    suites: &[Box<dyn Suite>],
    registry: &Registry,
    settings: &Settings,
    fixtures: &FixtureMap,
    filter: Option<&GlobMatcher>,
) -> Result<Vec<Box<dyn Runnable>>, SuiteError> {
    let mut parameters = Vec::new();

    for task in fixtures.keys() {
        if !suites.iter().any(|suite| suite.task_id() == task) {
            warn!(task = %task, "Fixture belongs to no known exercise, ignored");
        }
    }

    for suite in suites {
        let task_id = suite.task_id();
        if !settings.exercises.is_empty() && !settings.exercises.contains_key(task_id) {
            debug!(task_id, "Not selected in settings");
            continue;
        }
        if filter.map_or(false, |filter| !filter.is_match(task_id)) {
            debug!(task_id, "Filtered out");
            continue;
        }

        let Some(cases) = fixtures.get(task_id) else {
            warn!(task_id, "Exercise has no fixtures");
            continue;
        };

        let variants = settings.variants_for(task_id, &registry.variants(task_id));
        let tolerance = settings
            .exercises
            .get(task_id)
            .and_then(|exercise| exercise.tolerance);
        let selected = suite.parameters(registry, &variants, cases, tolerance)?;

        info!(task_id, parameters = selected.len(), "Planned exercise");
        parameters.extend(selected);
    }

    Ok(parameters)
}
