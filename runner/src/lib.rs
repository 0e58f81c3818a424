pub mod config;
pub mod driver;
pub mod fixture;
pub mod harness;
pub mod reconcile;
pub mod registry;
pub mod task;
pub mod transport;

pub use driver::{Driver, Lifecycle, LifecycleError, Phase, Stage};
pub use harness::{
    CaseReport, Expected, Harness, HarnessError, HarnessParameter, Mode, Runnable, Summary,
    TestCase, Verdict,
};
pub use registry::{Registry, RegistryBuilder, RegistryError, Requirement};
pub use task::{BoxedTask, Convention, LocalTask, Sequential, Task, Variant};
pub use transport::{
    local::{LocalTransport, LocalWorld},
    Communicator, Rank, Tag, Transport, TransportError, WorldInfo,
};
