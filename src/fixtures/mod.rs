//! Fixture definitions, registries and the factory contract.

pub mod args;
pub mod builtins;
pub mod factory;
pub mod registry;

pub use args::{ArgError, FixtureArgs, FixtureValue};
pub use builtins::{TestInfo, WorkerInfo};
pub use factory::{FactoryFn, Yielder};
pub use registry::{Fingerprint, FixtureDefinition, Fixtures, Layer, Registry, ReservedName, UnionConflict};
