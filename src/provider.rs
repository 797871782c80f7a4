//! Attribute providers: pluggable resolvers the evaluation context falls
//! back to when a designator names an attribute the request did not carry.
//! Providers declare the keys they can supply and the keys they depend on;
//! dependency cycles between providers are rejected at configuration time.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::context::EvaluationContext;
use crate::errors::{IndeterminateError, PolicyError};
use crate::value::{AttributeKey, Bag};

/// A policy information point. Implementations must be safe to invoke
/// concurrently across requests; within one request the context guards
/// against re-entrant resolution of the same key.
pub trait AttributeProvider: Send + Sync {
    fn id(&self) -> &str;

    /// The attribute keys this provider can supply.
    fn supported_keys(&self) -> Vec<AttributeKey>;

    /// Keys this provider reads through the context while resolving its
    /// own. Used only for the configuration-time cycle check.
    fn dependencies(&self) -> Vec<AttributeKey> {
        Vec::new()
    }

    /// Resolve one supported key. May consult `ctx` for declared
    /// dependencies. An I/O failure or deadline expiry is reported as a
    /// processing-error Indeterminate, which the caller treats as a
    /// missing attribute unless the designator requires presence.
    fn resolve(
        &self,
        key: &AttributeKey,
        ctx: &mut EvaluationContext,
    ) -> Result<Bag, IndeterminateError>;
}

/// Reject provider sets whose declared dependencies form a cycle. Each
/// provider is a node; an edge runs to every provider that supplies one of
/// its declared dependency keys.
pub fn check_dependency_cycles(
    providers: &[Arc<dyn AttributeProvider>],
) -> Result<(), PolicyError> {
    let mut supplier_of: HashMap<AttributeKey, usize> = HashMap::new();
    for (i, p) in providers.iter().enumerate() {
        for key in p.supported_keys() {
            // First registration wins, matching resolution order.
            supplier_of.entry(key).or_insert(i);
        }
    }

    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    for start in 0..providers.len() {
        if !visited.contains(&start) {
            dfs_cycle_check(start, providers, &supplier_of, &mut visited, &mut in_stack)?;
        }
    }
    Ok(())
}

fn dfs_cycle_check(
    index: usize,
    providers: &[Arc<dyn AttributeProvider>],
    supplier_of: &HashMap<AttributeKey, usize>,
    visited: &mut HashSet<usize>,
    in_stack: &mut HashSet<usize>,
) -> Result<(), PolicyError> {
    visited.insert(index);
    in_stack.insert(index);

    for dep in providers[index].dependencies() {
        if let Some(&next) = supplier_of.get(&dep) {
            if in_stack.contains(&next) {
                return Err(PolicyError::ProviderCycle(format!(
                    "{} -> {}",
                    providers[index].id(),
                    providers[next].id()
                )));
            }
            if !visited.contains(&next) {
                dfs_cycle_check(next, providers, supplier_of, visited, in_stack)?;
            }
        }
    }

    in_stack.remove(&index);
    Ok(())
}

/// Reference provider: a fixed table of attributes configured at load
/// time.
pub struct StaticAttributeProvider {
    id: String,
    attributes: HashMap<AttributeKey, Bag>,
}

impl StaticAttributeProvider {
    pub fn new(id: impl Into<String>, attributes: HashMap<AttributeKey, Bag>) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }
}

impl AttributeProvider for StaticAttributeProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn supported_keys(&self) -> Vec<AttributeKey> {
        self.attributes.keys().cloned().collect()
    }

    fn resolve(
        &self,
        key: &AttributeKey,
        _ctx: &mut EvaluationContext,
    ) -> Result<Bag, IndeterminateError> {
        Ok(self
            .attributes
            .get(key)
            .cloned()
            .unwrap_or_else(|| Bag::empty(key.datatype)))
    }
}

/// Test instrumentation: wraps a static table and counts resolutions, so
/// tests can observe which attributes the engine actually asked for.
pub struct CountingAttributeProvider {
    inner: StaticAttributeProvider,
    resolutions: AtomicUsize,
}

impl CountingAttributeProvider {
    pub fn new(id: impl Into<String>, attributes: HashMap<AttributeKey, Bag>) -> Self {
        Self {
            inner: StaticAttributeProvider::new(id, attributes),
            resolutions: AtomicUsize::new(0),
        }
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

impl AttributeProvider for CountingAttributeProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn supported_keys(&self) -> Vec<AttributeKey> {
        self.inner.supported_keys()
    }

    fn resolve(
        &self,
        key: &AttributeKey,
        ctx: &mut EvaluationContext,
    ) -> Result<Bag, IndeterminateError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(key, ctx)
    }
}
