//! Policy reference resolution: XACML numeric version ordering, version
//! match constraints, the provider contract used for per-request
//! resolution, and the in-memory policy store that backs both static
//! linking and the default dynamic provider.
//!
//! Depth and cycle enforcement for dynamic references lives on the
//! evaluation context's reference chain; static enforcement happens while
//! the loader links the tree.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::errors::{IndeterminateError, PolicyError};
use crate::policy::{Policy, PolicySet};

/// A policy version: dot-separated unsigned integers, ordered as a tuple
/// with implicit zero padding (`1.0` equals `1.0.0`, `1.2` sorts before
/// `1.10`).
#[derive(Debug, Clone)]
pub struct PolicyVersion(Vec<u64>);

impl PolicyVersion {
    pub fn parse(lexical: &str) -> Result<Self, PolicyError> {
        let components: Result<Vec<u64>, _> =
            lexical.split('.').map(|part| part.parse::<u64>()).collect();
        match components {
            Ok(parts) if !parts.is_empty() => Ok(Self(parts)),
            _ => Err(PolicyError::InvalidPolicy(format!(
                "invalid version `{lexical}`: expected dot-separated integers"
            ))),
        }
    }

    fn component(&self, index: usize) -> u64 {
        self.0.get(index).copied().unwrap_or(0)
    }
}

impl std::fmt::Display for PolicyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

impl Ord for PolicyVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for PolicyVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PolicyVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PolicyVersion {}

/// A version match pattern: components are integers, `*` (any single
/// component), with an optional trailing `+` (any suffix).
#[derive(Debug, Clone, Default)]
pub struct VersionPattern {
    components: Vec<Option<u64>>,
    open_suffix: bool,
}

impl VersionPattern {
    pub fn parse(lexical: &str) -> Result<Self, PolicyError> {
        let mut components = Vec::new();
        let mut open_suffix = false;
        let parts: Vec<&str> = lexical.split('.').collect();
        for (i, part) in parts.iter().enumerate() {
            match *part {
                "*" => components.push(None),
                "+" if i == parts.len() - 1 => open_suffix = true,
                number => components.push(Some(number.parse::<u64>().map_err(|_| {
                    PolicyError::InvalidPolicy(format!(
                        "invalid version pattern `{lexical}`"
                    ))
                })?)),
            }
        }
        Ok(Self {
            components,
            open_suffix,
        })
    }

    pub fn matches(&self, version: &PolicyVersion) -> bool {
        if !self.open_suffix && version.0.len() > self.components.len() {
            // Trailing version components beyond the pattern must be zero
            // (1.0 equals 1.0.0).
            if version.0[self.components.len()..].iter().any(|c| *c != 0) {
                return false;
            }
        }
        for (i, component) in self.components.iter().enumerate() {
            match component {
                Some(required) if version.component(i) != *required => return false,
                _ => {}
            }
        }
        true
    }
}

/// The `Version` / `EarliestVersion` / `LatestVersion` triple carried by a
/// policy reference.
#[derive(Debug, Clone, Default)]
pub struct VersionConstraints {
    pub version: Option<VersionPattern>,
    pub earliest: Option<PolicyVersion>,
    pub latest: Option<PolicyVersion>,
}

impl VersionConstraints {
    pub fn unconstrained() -> Self {
        Self::default()
    }

    pub fn matches(&self, version: &PolicyVersion) -> bool {
        if let Some(pattern) = &self.version {
            if !pattern.matches(version) {
                return false;
            }
        }
        if let Some(earliest) = &self.earliest {
            if version < earliest {
                return false;
            }
        }
        if let Some(latest) = &self.latest {
            if version > latest {
                return false;
            }
        }
        true
    }
}

/// Per-request policy resolution for dynamic `Policy(Set)IdReference`s.
/// Implementations may block on I/O; they must honor the request deadline
/// and report failures as processing errors.
pub trait RefPolicyProvider: Send + Sync {
    fn policy(
        &self,
        id: &str,
        constraints: &VersionConstraints,
    ) -> Result<Option<Arc<Policy>>, IndeterminateError>;

    fn policy_set(
        &self,
        id: &str,
        constraints: &VersionConstraints,
    ) -> Result<Option<Arc<PolicySet>>, IndeterminateError>;
}

/// In-memory store of loaded policies, versioned per id. Backs static
/// linking at load time and serves as the default dynamic provider.
#[derive(Debug, Default)]
pub struct PolicyStore {
    policies: HashMap<String, BTreeMap<PolicyVersion, Arc<Policy>>>,
    policy_sets: HashMap<String, BTreeMap<PolicyVersion, Arc<PolicySet>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_policy(&mut self, policy: Arc<Policy>) -> Result<(), PolicyError> {
        let versions = self.policies.entry(policy.id.clone()).or_default();
        if versions.contains_key(&policy.version) {
            return Err(PolicyError::InvalidPolicy(format!(
                "duplicate policy `{}` version {}",
                policy.id, policy.version
            )));
        }
        versions.insert(policy.version.clone(), policy);
        Ok(())
    }

    pub fn add_policy_set(&mut self, set: Arc<PolicySet>) -> Result<(), PolicyError> {
        let versions = self.policy_sets.entry(set.id.clone()).or_default();
        if versions.contains_key(&set.version) {
            return Err(PolicyError::InvalidPolicy(format!(
                "duplicate policy set `{}` version {}",
                set.id, set.version
            )));
        }
        versions.insert(set.version.clone(), set);
        Ok(())
    }

    /// The newest version satisfying the constraints, per XACML version
    /// ordering.
    pub fn latest_policy(
        &self,
        id: &str,
        constraints: &VersionConstraints,
    ) -> Option<Arc<Policy>> {
        self.policies.get(id).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|(v, _)| constraints.matches(v))
                .map(|(_, p)| p.clone())
        })
    }

    pub fn latest_policy_set(
        &self,
        id: &str,
        constraints: &VersionConstraints,
    ) -> Option<Arc<PolicySet>> {
        self.policy_sets.get(id).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|(v, _)| constraints.matches(v))
                .map(|(_, ps)| ps.clone())
        })
    }

    pub fn policy_count(&self) -> usize {
        self.policies.values().map(BTreeMap::len).sum::<usize>()
            + self.policy_sets.values().map(BTreeMap::len).sum::<usize>()
    }
}

impl RefPolicyProvider for PolicyStore {
    fn policy(
        &self,
        id: &str,
        constraints: &VersionConstraints,
    ) -> Result<Option<Arc<Policy>>, IndeterminateError> {
        Ok(self.latest_policy(id, constraints))
    }

    fn policy_set(
        &self,
        id: &str,
        constraints: &VersionConstraints,
    ) -> Result<Option<Arc<PolicySet>>, IndeterminateError> {
        Ok(self.latest_policy_set(id, constraints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combining::CombiningAlgRegistry;
    use crate::policy::Target;

    fn version(s: &str) -> PolicyVersion {
        PolicyVersion::parse(s).unwrap()
    }

    fn make_policy(id: &str, v: &str) -> Arc<Policy> {
        let algs = CombiningAlgRegistry::standard();
        Arc::new(Policy {
            id: id.into(),
            version: version(v),
            target: Target::default(),
            variables: Vec::new(),
            algorithm: algs.get("deny-overrides").unwrap(),
            rules: Vec::new(),
            pep_actions: Vec::new(),
        })
    }

    #[test]
    fn test_version_ordering_is_numeric() {
        assert!(version("1.2") < version("1.10"));
        assert!(version("2.0") > version("1.9.9"));
        assert_eq!(version("1.0"), version("1.0.0"));
    }

    #[test]
    fn test_version_parse_rejects_garbage() {
        assert!(PolicyVersion::parse("1.a").is_err());
        assert!(PolicyVersion::parse("").is_err());
    }

    #[test]
    fn test_version_pattern_wildcards() {
        let any_minor = VersionPattern::parse("1.*").unwrap();
        assert!(any_minor.matches(&version("1.7")));
        assert!(!any_minor.matches(&version("2.0")));
        assert!(!any_minor.matches(&version("1.7.1")));

        let open = VersionPattern::parse("1.+").unwrap();
        assert!(open.matches(&version("1.7.3")));
        assert!(!open.matches(&version("2.0")));
    }

    #[test]
    fn test_constraints_bounds() {
        let constraints = VersionConstraints {
            version: None,
            earliest: Some(version("1.5")),
            latest: Some(version("2.0")),
        };
        assert!(!constraints.matches(&version("1.4")));
        assert!(constraints.matches(&version("1.5")));
        assert!(constraints.matches(&version("2.0")));
        assert!(!constraints.matches(&version("2.0.1")));
    }

    #[test]
    fn test_store_selects_newest_matching() {
        let mut store = PolicyStore::new();
        store.add_policy(make_policy("P", "1.0")).unwrap();
        store.add_policy(make_policy("P", "1.5")).unwrap();
        store.add_policy(make_policy("P", "2.0")).unwrap();

        let newest = store
            .latest_policy("P", &VersionConstraints::unconstrained())
            .unwrap();
        assert_eq!(newest.version, version("2.0"));

        let bounded = store
            .latest_policy(
                "P",
                &VersionConstraints {
                    version: None,
                    earliest: None,
                    latest: Some(version("1.9")),
                },
            )
            .unwrap();
        assert_eq!(bounded.version, version("1.5"));
    }

    #[test]
    fn test_store_rejects_duplicate_versions() {
        let mut store = PolicyStore::new();
        store.add_policy(make_policy("P", "1.0")).unwrap();
        assert!(store.add_policy(make_policy("P", "1.0")).is_err());
    }
}
