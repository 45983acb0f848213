//! Dependency resolution: from a declaration's requests to an ordered instantiation plan.
//!
//! The plan is the transitive closure of the requested fixtures plus every automatic fixture of
//! the active scopes, ordered so each fixture comes after its dependencies. Ties are broken by the
//! registry insertion order, which keeps plans deterministic across runs.
//!
//! ## Notes
//! - A cycle is detected with an explicit DFS path and reported as `a -> b -> a`.
//! - A worker fixture may not depend on a test fixture.
//! - Without an active test scope (worker-level resolution) test fixtures are unavailable.

use std::collections::{BTreeSet, HashMap, HashSet};

use tessera_core::{Location, Scope};
use tessera_syntax::ParamRequest;

use crate::errors::{Requester, RunError};
use crate::fixtures::{FixtureDefinition, Registry};

/// One fixture to instantiate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub name: String,
    pub scope: Scope,
}

/// Ordered instantiation plan. Teardown runs in the reverse order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPlan {
    steps: Vec<PlanStep>,
}

impl ResolvedPlan {
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.name.as_str())
    }

    pub fn teardown_order(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().rev()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Walk<'r> {
    registry: &'r Registry,
    test_scope_active: bool,
    marks: HashMap<String, Mark>,
    path: Vec<String>,
    deps: HashMap<String, Vec<String>>,
}

impl<'r> Walk<'r> {
    fn visit(&mut self, name: &str, requester: &Requester, location: &Location) -> Result<(), RunError> {
        match self.marks.get(name) {
            Some(Mark::Done) => {
                // Scope is checked on every edge into `name`.
                if let Some(def) = self.registry.get(name) {
                    self.check_scope(def, requester, location)?;
                }
                return Ok(());
            }
            Some(Mark::Visiting) => {
                let start = self.path.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle = self.path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(RunError::CyclicDependency {
                    cycle,
                    location: location.clone(),
                });
            }
            None => {}
        }

        let registry = self.registry;
        let def = registry.get(name).ok_or_else(|| RunError::UnknownFixture {
            requester: requester.clone(),
            name: name.to_string(),
            location: location.clone(),
        })?;
        self.check_scope(def, requester, location)?;

        let params = def.params().map_err(|error| RunError::Signature {
            requester: Requester::Fixture(def.name().to_string()),
            error: error.clone(),
            location: def.location().clone(),
        })?;

        self.marks.insert(name.to_string(), Mark::Visiting);
        self.path.push(name.to_string());
        let fixture = Requester::Fixture(name.to_string());
        let mut deps: Vec<String> = Vec::new();
        for param in params {
            self.visit(&param.name, &fixture, def.location())?;
            if !deps.contains(&param.name) {
                deps.push(param.name.clone());
            }
        }
        self.path.pop();
        self.marks.insert(name.to_string(), Mark::Done);
        self.deps.insert(name.to_string(), deps);
        Ok(())
    }

    fn check_scope(&self, def: &FixtureDefinition, requester: &Requester, location: &Location) -> Result<(), RunError> {
        if def.scope() != Scope::Test {
            return Ok(());
        }
        match requester {
            Requester::Fixture(parent) => {
                let parent_scope = self.registry.get(parent).map(|p| p.scope());
                if parent_scope == Some(Scope::Worker) {
                    return Err(RunError::ScopeMismatch {
                        fixture: parent.clone(),
                        dependency: def.name().to_string(),
                        location: location.clone(),
                    });
                }
            }
            Requester::Test if !self.test_scope_active => {
                return Err(RunError::ScopeMismatch {
                    fixture: "<worker>".to_string(),
                    dependency: def.name().to_string(),
                    location: location.clone(),
                });
            }
            Requester::Test => {}
        }
        Ok(())
    }
}

/// Resolve `requests` against `registry` into an ordered plan.
///
/// `origin` is the declaration the requests came from; it locates errors raised for the requests
/// themselves.
///
/// ## Errors
/// [`RunError::UnknownFixture`], [`RunError::CyclicDependency`], [`RunError::ScopeMismatch`], or
/// [`RunError::Signature`] when a reachable fixture has an invalid signature.
#[tracing::instrument(skip_all, fields(requested = requests.len(), test_scope_active))]
pub fn resolve(
    requests: &[ParamRequest],
    registry: &Registry,
    test_scope_active: bool,
    origin: &Location,
) -> Result<ResolvedPlan, RunError> {
    let mut walk = Walk {
        registry,
        test_scope_active,
        marks: HashMap::new(),
        path: Vec::new(),
        deps: HashMap::new(),
    };

    for request in requests {
        walk.visit(&request.name, &Requester::Test, origin)?;
    }
    let mut active = vec![Scope::Worker];
    if test_scope_active {
        active.push(Scope::Test);
    }
    let automatic: Vec<String> = registry
        .iter()
        .filter(|def| def.is_automatic() && active.contains(&def.scope()))
        .map(|def| def.name().to_string())
        .collect();
    for name in &automatic {
        let location = registry.get(name).map(|d| d.location().clone()).unwrap_or_else(|| origin.clone());
        walk.visit(name, &Requester::Test, &location)?;
    }

    Ok(order(registry, &walk.deps))
}

/// Kahn's algorithm with the registry index as tie-breaker.
fn order(registry: &Registry, deps: &HashMap<String, Vec<String>>) -> ResolvedPlan {
    let index = |name: &str| registry.position(name).unwrap_or(usize::MAX);
    let mut pending: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, list) in deps {
        pending.insert(name.as_str(), list.len());
        for dep in list {
            dependents.entry(dep.as_str()).or_default().push(name.as_str());
        }
    }

    let mut ready: BTreeSet<(usize, &str)> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| (index(*name), *name))
        .collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut steps = Vec::with_capacity(deps.len());

    while let Some(next) = ready.pop_first() {
        let (_, name) = next;
        if !placed.insert(name) {
            continue;
        }
        if let Some(def) = registry.get(name) {
            steps.push(PlanStep {
                name: name.to_string(),
                scope: def.scope(),
            });
        }
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert((index(*dependent), *dependent));
                }
            }
        }
    }

    ResolvedPlan { steps }
}
