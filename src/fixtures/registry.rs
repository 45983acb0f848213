//! Immutable fixture registries.
//!
//! A [`Registry`] maps fixture names to [`FixtureDefinition`]s. Every `define_*`/`extend` call
//! returns a *new* registry layered on top of the receiver, so registries can be shared freely
//! between files and declarations. Each layer is identified by the source location that created it
//! plus a process-wide serial; the sorted layer set is the registry's [`Fingerprint`], which decides
//! whether two tests may share a worker.
//!
//! ## Notes
//! - Overriding a name keeps the original insertion slot, so plan ordering stays stable.
//! - [`Registry::union`] never fails eagerly. Colliding names are recorded as conflicts and reported
//!   for every test bound to the union; [`Registry::try_union`] is the eager variant.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use tessera_core::conventions::{TEST_INFO, WORKER_INFO, is_automatic_name, is_builtin};
use tessera_core::{Location, Scope};
use tessera_syntax::{ExtractError, IntoParams, ParamRequest};

use super::args::FixtureArgs;
use super::factory::{FactoryFn, Yielder, factory_fn, value_fn};
use crate::errors::RunError;

// Serials 1 and 2 are the built-in definitions.
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(16);

const TEST_INFO_ID: u64 = 1;
const WORKER_INFO_ID: u64 = 2;

fn next_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// Definitions
// ============================================================================

/// How a definition produces its value.
#[derive(Clone)]
pub(crate) enum FixtureBody {
    Factory(FactoryFn),
    Parameter { description: String, default: String },
    TestInfo,
    WorkerInfo,
}

impl fmt::Debug for FixtureBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureBody::Factory(_) => f.write_str("Factory"),
            FixtureBody::Parameter { default, .. } => write!(f, "Parameter({default:?})"),
            FixtureBody::TestInfo => f.write_str("TestInfo"),
            FixtureBody::WorkerInfo => f.write_str("WorkerInfo"),
        }
    }
}

/// A named fixture: scope, declared dependencies and how to produce the value.
#[derive(Debug, Clone)]
pub struct FixtureDefinition {
    id: u64,
    name: String,
    scope: Scope,
    automatic: bool,
    params: Result<Vec<ParamRequest>, ExtractError>,
    pub(crate) body: FixtureBody,
    location: Location,
}

impl FixtureDefinition {
    /// A factory-backed definition. The signature is analysed now; a bad signature is kept and
    /// reported when a test depends on this fixture.
    #[track_caller]
    pub fn new<F, Fut>(name: impl Into<String>, scope: Scope, signature: impl IntoParams, factory: F) -> Self
    where
        F: Fn(FixtureArgs, Yielder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = miette::Result<()>> + Send + 'static,
    {
        let name = name.into();
        Self {
            id: next_serial(),
            automatic: is_automatic_name(&name),
            name,
            scope,
            params: signature.into_params(),
            body: FixtureBody::Factory(factory_fn(factory)),
            location: Location::caller(),
        }
    }

    /// Mark the definition automatic regardless of its name.
    pub fn automatic(mut self) -> Self {
        self.automatic = true;
        self
    }

    fn builtin(id: u64, name: &str, scope: Scope, body: FixtureBody) -> Self {
        Self {
            id,
            name: name.to_string(),
            scope,
            automatic: false,
            params: Ok(Vec::new()),
            body,
            location: Location::new("<builtin>", 0, 0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_automatic(&self) -> bool {
        self.automatic
    }

    pub fn params(&self) -> Result<&[ParamRequest], &ExtractError> {
        self.params.as_deref()
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Description and default for parameter definitions.
    pub fn parameter(&self) -> Option<(&str, &str)> {
        match &self.body {
            FixtureBody::Parameter {
                description,
                default,
            } => Some((description, default)),
            _ => None,
        }
    }
}

/// Builder collecting a group of factories for one `define_*` call.
///
/// ## Examples
/// ```rust
/// use tessera::{Fixtures, Registry};
///
/// let registry = Registry::base().define_test_fixtures(
///     Fixtures::new()
///         .value("asdf", "async ()", |_| async { Ok(123_i32) })
///         .fixture("conn", "async ({ asdf })", |args, y| async move {
///             let n = *args.get::<i32>("asdf")?;
///             y.provide(n * 2).await;
///             Ok(())
///         }),
/// );
/// assert!(registry.get("conn").is_some());
/// ```
#[derive(Debug, Default)]
pub struct Fixtures {
    decls: Vec<Decl>,
}

#[derive(Debug)]
struct Decl {
    name: String,
    automatic: bool,
    params: Result<Vec<ParamRequest>, ExtractError>,
    factory: FixtureBody,
    location: Location,
}

impl Fixtures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory that yields once through its [`Yielder`] and may run teardown afterwards.
    #[track_caller]
    pub fn fixture<F, Fut>(self, name: impl Into<String>, signature: impl IntoParams, factory: F) -> Self
    where
        F: Fn(FixtureArgs, Yielder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = miette::Result<()>> + Send + 'static,
    {
        self.push(name.into(), false, signature, FixtureBody::Factory(factory_fn(factory)))
    }

    /// Add an automatic factory: part of every plan of its scope without being requested.
    #[track_caller]
    pub fn automatic<F, Fut>(self, name: impl Into<String>, signature: impl IntoParams, factory: F) -> Self
    where
        F: Fn(FixtureArgs, Yielder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = miette::Result<()>> + Send + 'static,
    {
        self.push(name.into(), true, signature, FixtureBody::Factory(factory_fn(factory)))
    }

    /// Add a factory without teardown whose result is the fixture value.
    #[track_caller]
    pub fn value<F, Fut, T>(self, name: impl Into<String>, signature: impl IntoParams, make: F) -> Self
    where
        F: Fn(FixtureArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = miette::Result<T>> + Send + 'static,
        T: std::any::Any + Send + Sync,
    {
        self.push(name.into(), false, signature, FixtureBody::Factory(value_fn(make)))
    }

    #[track_caller]
    fn push(mut self, name: String, automatic: bool, signature: impl IntoParams, factory: FixtureBody) -> Self {
        self.decls.push(Decl {
            automatic: automatic || is_automatic_name(&name),
            name,
            params: signature.into_params(),
            factory,
            location: Location::caller(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    fn into_definitions(self, scope: Scope) -> impl Iterator<Item = FixtureDefinition> {
        self.decls.into_iter().map(move |decl| FixtureDefinition {
            id: next_serial(),
            name: decl.name,
            scope,
            automatic: decl.automatic,
            params: decl.params,
            body: decl.factory,
            location: decl.location,
        })
    }
}

// ============================================================================
// Registry
// ============================================================================

/// One `define_*`/`extend` step: where it happened and a unique serial.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Layer {
    pub location: Location,
    pub serial: u64,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.location, self.serial)
    }
}

/// Identity of a registry's layer set. Equal fingerprints may share a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn of(layers: &BTreeSet<Layer>) -> Self {
        let mut hasher = Sha256::new();
        for layer in layers {
            hasher.update(layer.to_string().as_bytes());
            hasher.update(b"\n");
        }
        let digest = hex::encode(hasher.finalize());
        Fingerprint(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A name defined differently by both operands of a union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionConflict {
    pub name: String,
    pub location: Location,
}

/// A user definition that tried to replace a built-in fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedName {
    pub name: String,
    pub location: Location,
}

#[derive(Debug)]
struct Inner {
    fixtures: IndexMap<String, Arc<FixtureDefinition>>,
    layers: BTreeSet<Layer>,
    conflicts: Vec<UnionConflict>,
    reserved: Vec<ReservedName>,
    fingerprint: Fingerprint,
}

/// Immutable, cheaply clonable fixture registry.
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::base()
    }
}

impl Registry {
    fn from_parts(
        fixtures: IndexMap<String, Arc<FixtureDefinition>>,
        layers: BTreeSet<Layer>,
        conflicts: Vec<UnionConflict>,
        reserved: Vec<ReservedName>,
    ) -> Self {
        let fingerprint = Fingerprint::of(&layers);
        Self {
            inner: Arc::new(Inner {
                fixtures,
                layers,
                conflicts,
                reserved,
                fingerprint,
            }),
        }
    }

    /// The root registry holding only the built-in `test_info` and `worker_info` fixtures.
    pub fn base() -> Self {
        let mut fixtures = IndexMap::new();
        for def in [
            FixtureDefinition::builtin(TEST_INFO_ID, TEST_INFO, Scope::Test, FixtureBody::TestInfo),
            FixtureDefinition::builtin(WORKER_INFO_ID, WORKER_INFO, Scope::Worker, FixtureBody::WorkerInfo),
        ] {
            fixtures.insert(def.name.clone(), Arc::new(def));
        }
        Self::from_parts(fixtures, BTreeSet::new(), Vec::new(), Vec::new())
    }

    /// Layer `defs` on top of this registry. Redefined names keep their slot.
    ///
    /// Built-in names cannot be redefined: such a definition is dropped and recorded, and every
    /// test bound to the result reports it.
    #[track_caller]
    pub fn extend(&self, defs: impl IntoIterator<Item = FixtureDefinition>) -> Registry {
        let layer = Layer {
            location: Location::caller(),
            serial: next_serial(),
        };
        let mut fixtures = self.inner.fixtures.clone();
        let mut reserved = self.inner.reserved.clone();
        for def in defs {
            if is_builtin(&def.name) {
                tracing::warn!(fixture = %def.name, location = %def.location, "built-in fixture cannot be redefined");
                reserved.push(ReservedName {
                    name: def.name,
                    location: def.location,
                });
                continue;
            }
            tracing::trace!(fixture = %def.name, scope = %def.scope, "define");
            fixtures.insert(def.name.clone(), Arc::new(def));
        }
        let mut layers = self.inner.layers.clone();
        layers.insert(layer);
        Self::from_parts(fixtures, layers, self.inner.conflicts.clone(), reserved)
    }

    #[track_caller]
    pub fn define_fixtures(&self, scope: Scope, fixtures: Fixtures) -> Registry {
        self.extend(fixtures.into_definitions(scope))
    }

    #[track_caller]
    pub fn define_test_fixtures(&self, fixtures: Fixtures) -> Registry {
        self.define_fixtures(Scope::Test, fixtures)
    }

    #[track_caller]
    pub fn define_worker_fixtures(&self, fixtures: Fixtures) -> Registry {
        self.define_fixtures(Scope::Worker, fixtures)
    }

    /// Define a worker-scoped string parameter. Its value comes from the run configuration
    /// (`--param name=value`) and falls back to `default`.
    #[track_caller]
    pub fn define_parameter(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        default: impl Into<String>,
    ) -> Registry {
        let name = name.into();
        let def = FixtureDefinition {
            id: next_serial(),
            automatic: false,
            name,
            scope: Scope::Worker,
            params: Ok(Vec::new()),
            body: FixtureBody::Parameter {
                description: description.into(),
                default: default.into(),
            },
            location: Location::caller(),
        };
        self.extend([def])
    }

    /// Combine two registries. Names present on both sides with different definitions become
    /// conflicts reported for every test bound to the result.
    #[track_caller]
    pub fn union(&self, other: &Registry) -> Registry {
        let location = Location::caller();
        let mut fixtures = self.inner.fixtures.clone();
        let mut conflicts = self.inner.conflicts.clone();
        for conflict in &other.inner.conflicts {
            if !conflicts.contains(conflict) {
                conflicts.push(conflict.clone());
            }
        }
        for (name, def) in &other.inner.fixtures {
            match fixtures.get(name) {
                Some(existing) if existing.id != def.id => conflicts.push(UnionConflict {
                    name: name.clone(),
                    location: location.clone(),
                }),
                Some(_) => {}
                None => {
                    fixtures.insert(name.clone(), def.clone());
                }
            }
        }
        let mut reserved = self.inner.reserved.clone();
        for entry in &other.inner.reserved {
            if !reserved.contains(entry) {
                reserved.push(entry.clone());
            }
        }
        let layers = self.inner.layers.union(&other.inner.layers).cloned().collect();
        Self::from_parts(fixtures, layers, conflicts, reserved)
    }

    /// [`Registry::union`] that fails on the first conflicting name.
    ///
    /// ## Errors
    /// [`RunError::UnionConflict`] for the first name defined differently on both sides.
    #[track_caller]
    pub fn try_union(&self, other: &Registry) -> Result<Registry, RunError> {
        for (name, def) in &other.inner.fixtures {
            if self.get(name).is_some_and(|existing| existing.id != def.id) {
                return Err(RunError::UnionConflict {
                    name: name.clone(),
                    location: Location::caller(),
                });
            }
        }
        Ok(self.union(other))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<FixtureDefinition>> {
        self.inner.fixtures.get(name)
    }

    /// Insertion index of `name`, used as the plan tie-breaker.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.inner.fixtures.get_index_of(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FixtureDefinition>> {
        self.inner.fixtures.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.fixtures.keys().map(String::as_str)
    }

    /// Automatic definitions of `scope`, in registry order.
    pub fn automatic(&self, scope: Scope) -> impl Iterator<Item = &Arc<FixtureDefinition>> {
        self.iter().filter(move |def| def.automatic && def.scope == scope)
    }

    pub fn len(&self) -> usize {
        self.inner.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fixtures.is_empty()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.inner.fingerprint
    }

    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.inner.layers.iter()
    }

    /// Definitions rejected because they reused a built-in name.
    pub fn reserved(&self) -> &[ReservedName] {
        &self.inner.reserved
    }

    pub fn conflicts(&self) -> &[UnionConflict] {
        &self.inner.conflicts
    }
}
