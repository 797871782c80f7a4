//! Per-request evaluation context: the attribute store seeded from the
//! request, per-category content, the variable-definition memo, the
//! missing-attribute status trail, and the fallthrough to registered
//! attribute providers. A context lives for exactly one individual
//! decision request and is never shared between requests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value as Json;

use crate::content::PathCache;
use crate::errors::{IndeterminateError, MissingAttributeDetail};
use crate::expression::{Resolved, VariableDef};
use crate::provider::AttributeProvider;
use crate::reference::RefPolicyProvider;
use crate::value::{AttributeKey, Bag};

pub struct EvaluationContext {
    attributes: HashMap<AttributeKey, Bag>,
    content: HashMap<String, Json>,
    variables: HashMap<String, Result<Resolved, IndeterminateError>>,
    missing: Vec<MissingAttributeDetail>,
    providers: Vec<Arc<dyn AttributeProvider>>,
    /// Keys currently being resolved by a provider; guards against
    /// re-entrant resolution the configuration-time cycle check missed.
    resolving: HashSet<AttributeKey>,
    strict_issuer: bool,
    paths: Option<Arc<PathCache>>,
    ref_provider: Option<Arc<dyn RefPolicyProvider>>,
    max_ref_depth: usize,
    ref_chain: Vec<String>,
}

impl EvaluationContext {
    pub fn new(attributes: HashMap<AttributeKey, Bag>, content: HashMap<String, Json>) -> Self {
        Self {
            attributes,
            content,
            variables: HashMap::new(),
            missing: Vec::new(),
            providers: Vec::new(),
            resolving: HashSet::new(),
            strict_issuer: false,
            paths: None,
            ref_provider: None,
            max_ref_depth: 0,
            ref_chain: Vec::new(),
        }
    }

    /// A context with no request data, no providers, and no content
    /// paths. Used for load-time constant folding.
    pub fn detached() -> Self {
        Self::new(HashMap::new(), HashMap::new())
    }

    pub fn with_providers(mut self, providers: Vec<Arc<dyn AttributeProvider>>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_strict_issuer(mut self, strict: bool) -> Self {
        self.strict_issuer = strict;
        self
    }

    pub fn with_paths(mut self, paths: Option<Arc<PathCache>>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_ref_provider(
        mut self,
        provider: Option<Arc<dyn RefPolicyProvider>>,
        max_depth: usize,
    ) -> Self {
        self.ref_provider = provider;
        self.max_ref_depth = max_depth;
        self
    }

    // ─── Attribute lookup ───────────────────────────────────────────────

    /// Resolve an attribute bag: request store first, then registered
    /// providers in registration order, then the empty bag. Store results
    /// are cached so repeated designator evaluation is observably
    /// consistent.
    pub fn attribute(&mut self, key: &AttributeKey) -> Result<Bag, IndeterminateError> {
        // XACML issuer matching: a designator without an issuer matches
        // attributes from any issuer, unless strict mode is on. The match
        // is the union over every issuer, the issuer-less entry included,
        // so an exact hit alone is not enough in lenient mode.
        if !self.strict_issuer && key.issuer.is_none() {
            let mut matching: Vec<&AttributeKey> = self
                .attributes
                .keys()
                .filter(|stored| {
                    stored.category == key.category
                        && stored.attribute_id == key.attribute_id
                        && stored.datatype == key.datatype
                })
                .collect();
            if !matching.is_empty() {
                matching.sort_by(|a, b| a.issuer.cmp(&b.issuer));
                let mut merged = Bag::empty(key.datatype);
                for stored in matching {
                    merged.extend(&self.attributes[stored]);
                }
                // Not cached under the bare key: a cached union would be
                // folded in again on the next lookup and double-count.
                return Ok(merged);
            }
        } else if let Some(bag) = self.attributes.get(key) {
            return Ok(bag.clone());
        }

        let provider = self
            .providers
            .iter()
            .find(|p| {
                p.supported_keys()
                    .iter()
                    .any(|supplied| keys_match(key, supplied, self.strict_issuer))
            })
            .cloned();

        if let Some(provider) = provider {
            if !self.resolving.insert(key.clone()) {
                return Err(IndeterminateError::processing(format!(
                    "re-entrant resolution of attribute {key}"
                )));
            }
            let result = provider.resolve(key, self);
            self.resolving.remove(key);
            let bag = result.map_err(|e| e.at(format!("attribute provider `{}`", provider.id())))?;
            if bag.datatype() != key.datatype {
                return Err(IndeterminateError::processing(format!(
                    "attribute provider `{}` returned a bag of {}, expected {}",
                    provider.id(),
                    bag.datatype(),
                    key.datatype
                )));
            }
            self.attributes.insert(key.clone(), bag.clone());
            return Ok(bag);
        }

        let empty = Bag::empty(key.datatype);
        self.attributes.insert(key.clone(), empty.clone());
        Ok(empty)
    }

    /// Insert an attribute into the store. Providers use this to publish
    /// derived attributes; request content is never rewritten.
    pub fn insert_attribute(&mut self, key: AttributeKey, bag: Bag) {
        self.attributes.insert(key, bag);
    }

    pub fn content(&self, category: &str) -> Option<&Json> {
        self.content.get(category)
    }

    pub fn paths(&self) -> Result<&Arc<PathCache>, IndeterminateError> {
        self.paths.as_ref().ok_or_else(|| {
            IndeterminateError::processing("content paths are not enabled on this engine")
        })
    }

    // ─── Variable memo ──────────────────────────────────────────────────

    /// Evaluate a variable definition at most once per request; the memo
    /// stores failures too, so every reference observes the same result.
    pub fn variable(&mut self, def: &Arc<VariableDef>) -> Result<Resolved, IndeterminateError> {
        if let Some(cached) = self.variables.get(&def.scope_key) {
            return cached.clone();
        }
        let result = def
            .expr
            .evaluate(self)
            .map_err(|e| e.at(format!("variable `{}`", def.id)));
        self.variables.insert(def.scope_key.clone(), result.clone());
        result
    }

    // ─── Status trail ───────────────────────────────────────────────────

    pub fn note_missing(&mut self, detail: MissingAttributeDetail) {
        if !self.missing.contains(&detail) {
            self.missing.push(detail);
        }
    }

    pub fn missing_details(&self) -> &[MissingAttributeDetail] {
        &self.missing
    }

    // ─── Policy reference chain ─────────────────────────────────────────

    pub fn ref_provider(&self) -> Option<Arc<dyn RefPolicyProvider>> {
        self.ref_provider.clone()
    }

    /// Enter a dynamically resolved policy reference: enforces the depth
    /// limit and rejects revisits of a policy already on the chain.
    pub fn push_reference(&mut self, id: &str) -> Result<(), IndeterminateError> {
        if self.ref_chain.iter().any(|entry| entry == id) {
            return Err(IndeterminateError::processing(format!(
                "cyclic policy reference: {} -> {id}",
                self.ref_chain.join(" -> ")
            )));
        }
        if self.ref_chain.len() >= self.max_ref_depth {
            return Err(IndeterminateError::processing(format!(
                "policy reference depth exceeded at `{id}` (limit {})",
                self.max_ref_depth
            )));
        }
        self.ref_chain.push(id.to_string());
        Ok(())
    }

    pub fn pop_reference(&mut self) {
        self.ref_chain.pop();
    }
}

fn keys_match(requested: &AttributeKey, supplied: &AttributeKey, strict: bool) -> bool {
    requested.category == supplied.category
        && requested.attribute_id == supplied.attribute_id
        && requested.datatype == supplied.datatype
        && (requested.issuer == supplied.issuer || (!strict && requested.issuer.is_none()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticAttributeProvider;
    use crate::value::{ids, DataType, Value};

    fn subject_key(id: &str) -> AttributeKey {
        AttributeKey::new(ids::SUBJECT_CATEGORY, id, DataType::String)
    }

    #[test]
    fn test_attribute_from_request_store() {
        let key = subject_key(ids::SUBJECT_ID);
        let mut attrs = HashMap::new();
        attrs.insert(key.clone(), Bag::singleton(Value::String("alice".into())));
        let mut ctx = EvaluationContext::new(attrs, HashMap::new());
        let bag = ctx.attribute(&key).unwrap();
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_unknown_attribute_resolves_to_empty_bag() {
        let mut ctx = EvaluationContext::detached();
        let bag = ctx.attribute(&subject_key("nothing")).unwrap();
        assert!(bag.is_empty());
    }

    #[test]
    fn test_lenient_issuer_match_merges_issued_attributes() {
        let issued_a = subject_key("role").with_issuer("idp-a");
        let issued_b = subject_key("role").with_issuer("idp-b");
        let mut attrs = HashMap::new();
        attrs.insert(issued_a, Bag::singleton(Value::String("doctor".into())));
        attrs.insert(issued_b, Bag::singleton(Value::String("admin".into())));
        let mut ctx = EvaluationContext::new(attrs, HashMap::new());
        let bag = ctx.attribute(&subject_key("role")).unwrap();
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn test_lenient_union_includes_unissued_entry() {
        // The same attribute present both without an issuer and from an
        // issuer: a bare designator gets the union of both, not just the
        // exact-key hit.
        let mut attrs = HashMap::new();
        attrs.insert(
            subject_key("role"),
            Bag::singleton(Value::String("nurse".into())),
        );
        attrs.insert(
            subject_key("role").with_issuer("idp-a"),
            Bag::singleton(Value::String("doctor".into())),
        );
        let mut ctx = EvaluationContext::new(attrs, HashMap::new());
        let bag = ctx.attribute(&subject_key("role")).unwrap();
        assert_eq!(bag.len(), 2);
        assert!(bag.contains(&Value::String("nurse".into())));
        assert!(bag.contains(&Value::String("doctor".into())));
        // Repeated lookups return the same union, never a double-counted
        // one.
        assert_eq!(ctx.attribute(&subject_key("role")).unwrap().len(), 2);
    }

    #[test]
    fn test_strict_issuer_match_requires_absent_issuer() {
        let issued = subject_key("role").with_issuer("idp-a");
        let mut attrs = HashMap::new();
        attrs.insert(issued, Bag::singleton(Value::String("doctor".into())));
        let mut ctx =
            EvaluationContext::new(attrs, HashMap::new()).with_strict_issuer(true);
        let bag = ctx.attribute(&subject_key("role")).unwrap();
        assert!(bag.is_empty());
    }

    #[test]
    fn test_provider_fallthrough_and_caching() {
        let key = subject_key("clearance");
        let mut supplied = HashMap::new();
        supplied.insert(key.clone(), Bag::singleton(Value::String("secret".into())));
        let provider: Arc<dyn AttributeProvider> =
            Arc::new(StaticAttributeProvider::new("pip", supplied));
        let mut ctx = EvaluationContext::detached().with_providers(vec![provider]);
        assert_eq!(ctx.attribute(&key).unwrap().len(), 1);
        // Second lookup is served from the store.
        assert_eq!(ctx.attribute(&key).unwrap().len(), 1);
    }

    #[test]
    fn test_reference_chain_depth_and_cycles() {
        struct NoProvider;
        impl RefPolicyProvider for NoProvider {
            fn policy(
                &self,
                _id: &str,
                _constraints: &crate::reference::VersionConstraints,
            ) -> Result<Option<Arc<crate::policy::Policy>>, IndeterminateError> {
                Ok(None)
            }
            fn policy_set(
                &self,
                _id: &str,
                _constraints: &crate::reference::VersionConstraints,
            ) -> Result<Option<Arc<crate::policy::PolicySet>>, IndeterminateError> {
                Ok(None)
            }
        }

        let mut ctx = EvaluationContext::detached()
            .with_ref_provider(Some(Arc::new(NoProvider)), 2);
        ctx.push_reference("A").unwrap();
        let cycle = ctx.push_reference("A").unwrap_err();
        assert!(cycle.message.contains("cyclic"));
        ctx.push_reference("B").unwrap();
        let depth = ctx.push_reference("C").unwrap_err();
        assert!(depth.message.contains("depth"));
    }
}
