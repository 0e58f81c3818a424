use tasklab_runner::{
    Communicator, Driver, Lifecycle, LocalTask, LocalWorld, Registry, RegistryError, Requirement,
    Sequential, Variant,
};
use tasklab_runner::transport::Collectives;

struct Upper {
    input: String,
    output: String,
}

impl LocalTask for Upper {
    type Input = String;
    type Output = String;

    fn validate(&self) -> bool {
        self.input.is_ascii()
    }

    fn run(&mut self) -> bool {
        self.output = self.input.to_ascii_uppercase();
        true
    }

    fn output(&self) -> &String {
        &self.output
    }
}

fn registry() -> Registry {
    let mut builder = Registry::builder();
    builder
        .register("upper", Variant::Sequential, Requirement::Any, |input: String| {
            Sequential::boxed(Upper {
                input,
                output: String::new(),
            })
        })
        .unwrap();
    builder.build()
}

#[test]
fn installed_registry_is_shared_by_every_rank() {
    let installed = registry().install().unwrap();
    assert!(matches!(
        registry().install(),
        Err(RegistryError::AlreadyInstalled)
    ));
    assert_eq!(installed.len(), 1);

    let outputs = LocalWorld::new(3)
        .run(|transport| {
            let comm = Communicator::new(transport, Collectives::default());
            let registry = Registry::global().unwrap();
            let task = registry
                .instantiate::<String, String>("upper", Variant::Sequential, "rank".to_string())
                .unwrap();

            let mut lifecycle = Lifecycle::new(task);
            let execution = Driver.execute(&mut lifecycle, &comm).unwrap();
            assert!(execution.succeeded());
            lifecycle.output().clone()
        })
        .unwrap();

    assert_eq!(outputs, vec!["RANK"; 3]);
}
