use crate::task::{BoxedTask, Variant};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::{
    any::{type_name, Any},
    collections::BTreeMap,
    fmt,
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info};

/// Shared constructor closure of one (task, variant) pair
pub type Constructor<I, O> = Arc<dyn Fn(I) -> BoxedTask<I, O> + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Task {task_id} has no {variant} variant registered")]
    Unregistered { task_id: String, variant: Variant },
    #[error("Task {task_id} ({variant}) was already registered")]
    Duplicate { task_id: String, variant: Variant },
    #[error("Task {task_id} ({variant}) is registered for {registered}, not {requested}")]
    TypeMismatch {
        task_id: String,
        variant: Variant,
        registered: &'static str,
        requested: &'static str,
    },
    #[error("A process-wide registry was already installed")]
    AlreadyInstalled,
}

/// World sizes a variant can run on
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    #[default]
    Any,
    MinRanks(usize),
    PowerOfTwo,
    AllOf(Vec<Requirement>),
}

impl Requirement {
    pub fn is_met(&self, world_size: usize) -> bool {
        match self {
            Self::Any => world_size >= 1,
            Self::MinRanks(minimum) => world_size >= *minimum,
            Self::PowerOfTwo => world_size.is_power_of_two(),
            Self::AllOf(requirements) => requirements
                .iter()
                .all(|requirement| requirement.is_met(world_size)),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any world size"),
            Self::MinRanks(minimum) => write!(f, "at least {minimum} ranks"),
            Self::PowerOfTwo => write!(f, "a power of two world size"),
            Self::AllOf(requirements) => {
                let mut first = true;
                for requirement in requirements {
                    if !first {
                        write!(f, " and ")?;
                    }
                    write!(f, "{requirement}")?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

struct Entry {
    requirement: Requirement,
    // holds a `Constructor<I, O>`
    constructor: Box<dyn Any + Send + Sync>,
    signature: &'static str,
}

fn signature<I, O>() -> &'static str {
    type_name::<fn(I) -> O>()
}

type Key = (String, Variant);

/// Collects registrations before the registry is frozen
#[derive(Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<Key, Entry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I, O, F>(
        &mut self,
        task_id: &str,
        variant: Variant,
        requirement: Requirement,
        constructor: F,
    ) -> Result<&mut Self, RegistryError>
    where
        I: 'static,
        O: 'static,
        F: Fn(I) -> BoxedTask<I, O> + Send + Sync + 'static,
    {
        let key = (task_id.to_string(), variant);
        if self.entries.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                task_id: key.0,
                variant,
            });
        }

        debug!(task_id, %variant, %requirement, "Registered task");
        let constructor: Constructor<I, O> = Arc::new(constructor);
        self.entries.insert(
            key,
            Entry {
                requirement,
                constructor: Box::new(constructor),
                signature: signature::<I, O>(),
            },
        );

        Ok(self)
    }

    pub fn build(self) -> Registry {
        info!(entries = self.entries.len(), "Registry built");

        Registry {
            entries: self.entries,
        }
    }
}

static GLOBAL: OnceCell<Registry> = OnceCell::new();

/// Frozen map of (task id, variant) to constructor, safe to share between ranks
pub struct Registry {
    entries: BTreeMap<Key, Entry>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|((task_id, variant), entry)| {
                (format!("{task_id}/{variant}"), &entry.requirement)
            }))
            .finish()
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// make this registry the process-wide one, only possible once
    pub fn install(self) -> Result<&'static Registry, RegistryError> {
        GLOBAL
            .set(self)
            .map_err(|_| RegistryError::AlreadyInstalled)?;

        GLOBAL.get().ok_or(RegistryError::AlreadyInstalled)
    }

    pub fn global() -> Option<&'static Registry> {
        GLOBAL.get()
    }

    fn entry(&self, task_id: &str, variant: Variant) -> Result<&Entry, RegistryError> {
        self.entries
            .get(&(task_id.to_string(), variant))
            .ok_or_else(|| RegistryError::Unregistered {
                task_id: task_id.to_string(),
                variant,
            })
    }

    pub fn constructor<I: 'static, O: 'static>(
        &self,
        task_id: &str,
        variant: Variant,
    ) -> Result<Constructor<I, O>, RegistryError> {
        let entry = self.entry(task_id, variant)?;

        entry
            .constructor
            .downcast_ref::<Constructor<I, O>>()
            .cloned()
            .ok_or_else(|| RegistryError::TypeMismatch {
                task_id: task_id.to_string(),
                variant,
                registered: entry.signature,
                requested: signature::<I, O>(),
            })
    }

    pub fn instantiate<I: 'static, O: 'static>(
        &self,
        task_id: &str,
        variant: Variant,
        input: I,
    ) -> Result<BoxedTask<I, O>, RegistryError> {
        let constructor = self.constructor::<I, O>(task_id, variant)?;

        Ok(constructor(input))
    }

    pub fn requirement(&self, task_id: &str, variant: Variant) -> Option<&Requirement> {
        self.entry(task_id, variant)
            .ok()
            .map(|entry| &entry.requirement)
    }

    /// `false` for unregistered pairs as well
    pub fn supports(&self, task_id: &str, variant: Variant, world_size: usize) -> bool {
        self.requirement(task_id, variant)
            .map_or(false, |requirement| requirement.is_met(world_size))
    }

    pub fn task_ids(&self) -> Vec<&str> {
        let mut ids = self
            .entries
            .keys()
            .map(|(task_id, _)| task_id.as_str())
            .collect::<Vec<_>>();
        ids.dedup();
        ids
    }

    pub fn variants(&self, task_id: &str) -> Vec<Variant> {
        self.entries
            .keys()
            .filter(|(id, _)| id == task_id)
            .map(|(_, variant)| *variant)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{LocalTask, Sequential};

    struct Echo(String);

    impl LocalTask for Echo {
        type Input = String;
        type Output = String;

        fn validate(&self) -> bool {
            !self.0.is_empty()
        }

        fn run(&mut self) -> bool {
            true
        }

        fn output(&self) -> &String {
            &self.0
        }
    }

    fn registry() -> Registry {
        let mut builder = Registry::builder();
        builder
            .register("echo", Variant::Sequential, Requirement::Any, |input: String| {
                Sequential::boxed(Echo(input))
            })
            .unwrap()
            .register(
                "echo",
                Variant::Distributed,
                Requirement::PowerOfTwo,
                |input: String| Sequential::boxed(Echo(input)),
            )
            .unwrap();
        builder.build()
    }

    #[test]
    fn instantiates_registered_pairs() {
        let registry = registry();
        let task = registry
            .instantiate::<String, String>("echo", Variant::Sequential, "hi".to_string())
            .unwrap();

        assert_eq!(task.output(), "hi");
        assert_eq!(registry.task_ids(), vec!["echo"]);
        assert_eq!(registry.variants("echo"), Variant::ALL.to_vec());
    }

    #[test]
    fn unknown_pairs_are_errors() {
        let registry = registry();

        assert!(matches!(
            registry.instantiate::<String, String>("missing", Variant::Sequential, String::new()),
            Err(RegistryError::Unregistered { .. })
        ));
    }

    #[test]
    fn wrong_types_are_errors() {
        let registry = registry();

        assert!(matches!(
            registry.constructor::<i32, String>("echo", Variant::Sequential),
            Err(RegistryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut builder = Registry::builder();
        builder
            .register("echo", Variant::Sequential, Requirement::Any, |input: String| {
                Sequential::boxed(Echo(input))
            })
            .unwrap();

        assert!(matches!(
            builder.register("echo", Variant::Sequential, Requirement::Any, |input: String| {
                Sequential::boxed(Echo(input))
            }),
            Err(RegistryError::Duplicate { .. })
        ));
    }

    #[test]
    fn supports_follows_requirements() {
        let registry = registry();

        assert!(registry.supports("echo", Variant::Sequential, 3));
        assert!(!registry.supports("echo", Variant::Distributed, 3));
        assert!(registry.supports("echo", Variant::Distributed, 4));
        assert!(!registry.supports("missing", Variant::Distributed, 4));
    }

    #[test]
    fn requirements_combine() {
        let requirement =
            Requirement::AllOf(vec![Requirement::MinRanks(3), Requirement::PowerOfTwo]);

        assert!(!requirement.is_met(2));
        assert!(!requirement.is_met(3));
        assert!(requirement.is_met(4));
        assert_eq!(
            requirement.to_string(),
            "at least 3 ranks and a power of two world size"
        );
    }
}
