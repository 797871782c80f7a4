//! Policy document loading: parses KDL policy documents into the typed,
//! statically checked policy tree. All load-time validation happens here:
//! unknown functions/datatypes/algorithms, expression type errors,
//! variable scoping and depth, reference resolution with cycle and depth
//! enforcement, and constant folding.
//!
//! Document shape:
//!
//! ```kdl
//! policy "P1" version="1.0" algorithm="deny-overrides" {
//!     target {
//!         any-of {
//!             all-of {
//!                 match function="string-equal" value="J. Hibbert" \
//!                       category="subject" attribute="urn:...:subject-id"
//!             }
//!         }
//!     }
//!     variable "v" { apply "and" { boolean true; boolean true } }
//!     rule "r1" effect="deny" {
//!         condition { variable-ref "v" }
//!         obligation "urn:example:obligation:log" applies-to="deny" {
//!             assignment attribute="reason" { string "denied" }
//!         }
//!     }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::combining::CombiningAlgRegistry;
use crate::content::PathCache;
use crate::errors::PolicyError;
use crate::expression::{
    AttributeDesignator, AttributeSelector, Expression, VariableDef,
};
use crate::function::{FunctionKind, FunctionRegistry};
use crate::policy::{
    AllOf, AnyOf, AttributeAssignmentExpr, Effect, MatchExpr, PepActionExpr, PepActionKind,
    Policy, PolicyChild, PolicyReference, PolicySet, Rule, RootPolicy, Target,
};
use crate::reference::{PolicyStore, PolicyVersion, VersionConstraints, VersionPattern};
use crate::value::{ids, AttributeKey, DataType, Value};

/// Everything a load produces: the versioned store (which doubles as the
/// dynamic reference provider) and the selected root.
#[derive(Debug)]
pub struct LoadedPolicies {
    pub store: Arc<PolicyStore>,
    pub root: RootPolicy,
}

/// Load-time knobs; registries are shared, immutable after init.
pub struct PolicyLoader<'a> {
    pub functions: &'a FunctionRegistry,
    pub algorithms: &'a CombiningAlgRegistry,
    /// `None` disables selectors and path expressions at load.
    pub paths: Option<Arc<PathCache>>,
    pub max_policy_set_ref_depth: usize,
    pub max_variable_ref_depth: usize,
    /// When true, every reference is resolved and linked at load; cycles
    /// and depth violations are load errors. When false, references stay
    /// in the tree and resolve per request.
    pub static_references: bool,
}

impl<'a> PolicyLoader<'a> {
    /// Load all `.kdl` policy documents from a directory, in file-name
    /// order. The root is `root_id` when given, else the first top-level
    /// policy or policy set.
    pub fn load_dir(
        &self,
        dir: &Path,
        root_id: Option<&str>,
    ) -> Result<LoadedPolicies, PolicyError> {
        if !dir.is_dir() {
            return Err(PolicyError::InvalidPolicy(format!(
                "policies directory `{}` does not exist or is not a directory",
                dir.display()
            )));
        }

        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "kdl")
                    .unwrap_or(false)
            })
            .collect();
        entries.sort_by_key(|e| e.path());

        let mut sources = Vec::new();
        for entry in entries {
            let path = entry.path();
            let contents =
                std::fs::read_to_string(&path).map_err(|source| PolicyError::PolicyLoad {
                    path: path.display().to_string(),
                    source,
                })?;
            sources.push(contents);
        }

        let loaded = self.load_documents(&sources, root_id)?;
        tracing::info!(
            files = sources.len(),
            policies = loaded.store.policy_count(),
            root = loaded.root.id(),
            "Loaded authorization policies"
        );
        Ok(loaded)
    }

    /// Load from in-memory document sources.
    pub fn load_documents(
        &self,
        sources: &[String],
        root_id: Option<&str>,
    ) -> Result<LoadedPolicies, PolicyError> {
        let mut documents = Vec::new();
        for source in sources {
            let doc: KdlDocument = source
                .parse()
                .map_err(|e: kdl::KdlError| PolicyError::KdlParse(e.to_string()))?;
            documents.push(doc);
        }

        let mut top_level: Vec<&KdlNode> = Vec::new();
        for doc in &documents {
            for node in doc.nodes() {
                match node.name().value() {
                    "policy" | "policy-set" => top_level.push(node),
                    other => {
                        tracing::warn!("ignoring unknown top-level KDL node `{other}`");
                    }
                }
            }
        }
        if top_level.is_empty() {
            return Err(PolicyError::InvalidPolicy(
                "no policies defined in any document".into(),
            ));
        }

        // Every policy(-set) id declared anywhere, for distinguishing a
        // dangling reference from a not-yet-buildable one.
        let mut declared: HashSet<String> = HashSet::new();
        for node in &top_level {
            collect_declared_ids(node, &mut declared);
        }

        let mut store = PolicyStore::new();
        let mut set_depths: HashMap<String, usize> = HashMap::new();

        // Policies carry no references; build them all first.
        for node in top_level.iter().filter(|n| n.name().value() == "policy") {
            let policy = self.build_policy(node)?;
            store.add_policy(policy)?;
        }

        // Policy sets may reference each other across documents; build to
        // a fixpoint, deferring sets whose reference targets are not
        // built yet. A stalled fixpoint is a reference cycle.
        let mut pending: Vec<&KdlNode> = top_level
            .iter()
            .filter(|n| n.name().value() == "policy-set")
            .copied()
            .collect();
        while !pending.is_empty() {
            let mut deferred = Vec::new();
            let mut progressed = false;
            for node in pending {
                match self.build_policy_set(node, &mut store, &mut set_depths) {
                    Ok(()) => progressed = true,
                    Err(BuildError::Defer(missing)) => {
                        if !declared.contains(&missing) {
                            return Err(PolicyError::UnresolvedReference(missing));
                        }
                        deferred.push(node);
                    }
                    Err(BuildError::Fail(e)) => return Err(e),
                }
            }
            if !progressed && !deferred.is_empty() {
                let ids: Vec<String> = deferred
                    .iter()
                    .filter_map(|n| first_string_arg(n))
                    .collect();
                return Err(PolicyError::ReferenceCycle(ids.join(" -> ")));
            }
            pending = deferred;
        }

        // Root selection: named, or the first top-level declaration.
        let root_node = match root_id {
            Some(id) => top_level
                .iter()
                .find(|n| first_string_arg(n).as_deref() == Some(id))
                .ok_or_else(|| {
                    PolicyError::InvalidPolicy(format!("root policy `{id}` not found"))
                })?,
            None => &top_level[0],
        };
        let root_ref_id = first_string_arg(root_node).ok_or_else(|| {
            PolicyError::InvalidPolicy("root policy node requires an id argument".into())
        })?;
        let root = if root_node.name().value() == "policy-set" {
            RootPolicy::PolicySet(
                store
                    .latest_policy_set(&root_ref_id, &VersionConstraints::unconstrained())
                    .ok_or_else(|| PolicyError::UnresolvedReference(root_ref_id.clone()))?,
            )
        } else {
            RootPolicy::Policy(
                store
                    .latest_policy(&root_ref_id, &VersionConstraints::unconstrained())
                    .ok_or_else(|| PolicyError::UnresolvedReference(root_ref_id.clone()))?,
            )
        };

        Ok(LoadedPolicies {
            store: Arc::new(store),
            root,
        })
    }

    // ─── Policies ───────────────────────────────────────────────────────

    fn build_policy(&self, node: &KdlNode) -> Result<Arc<Policy>, PolicyError> {
        let id = first_string_arg(node).ok_or_else(|| {
            PolicyError::InvalidPolicy(
                "policy node requires an id argument (e.g. policy \"P1\")".into(),
            )
        })?;
        let version = PolicyVersion::parse(prop_str(node, "version").unwrap_or("1.0"))?;
        let algorithm_name = req_prop_str(node, "algorithm", &id)?;
        let algorithm = self.algorithms.get(algorithm_name).ok_or_else(|| {
            PolicyError::UnknownAlgorithm(algorithm_name.to_string())
        })?;
        if algorithm.is_policy_only() {
            return Err(PolicyError::InvalidPolicy(format!(
                "policy `{id}` cannot use the policy-set-only algorithm `{algorithm_name}`"
            )));
        }

        let mut target = Target::default();
        let mut variables: Vec<Arc<VariableDef>> = Vec::new();
        let mut scope: HashMap<String, (Arc<VariableDef>, usize)> = HashMap::new();
        let mut rules = Vec::new();
        let mut pep_actions = Vec::new();

        if let Some(children) = node.children() {
            for child in children.nodes() {
                match child.name().value() {
                    "target" => target = self.build_target(child, &scope)?,
                    "variable" => {
                        let var_id = first_string_arg(child).ok_or_else(|| {
                            PolicyError::InvalidPolicy(format!(
                                "variable node in policy `{id}` requires a name argument"
                            ))
                        })?;
                        if scope.contains_key(&var_id) {
                            return Err(PolicyError::InvalidPolicy(format!(
                                "duplicate variable `{var_id}` in policy `{id}`"
                            )));
                        }
                        let expr = self.build_single_expression(child, &scope)?.fold()?;
                        let depth = 1 + referenced_variable_depth(&expr, &scope);
                        if depth > self.max_variable_ref_depth {
                            return Err(PolicyError::VariableDepthExceeded(
                                var_id,
                                self.max_variable_ref_depth,
                            ));
                        }
                        let def = Arc::new(VariableDef {
                            id: var_id.clone(),
                            scope_key: format!("{id}/{var_id}"),
                            meta: expr.meta(),
                            expr,
                        });
                        variables.push(def.clone());
                        scope.insert(var_id, (def, depth));
                    }
                    "rule" => rules.push(self.build_rule(child, &id, &scope)?),
                    "obligation" | "advice" => {
                        pep_actions.push(self.build_pep_action(child, &scope)?)
                    }
                    other => {
                        return Err(PolicyError::InvalidPolicy(format!(
                            "unexpected child `{other}` in policy `{id}`"
                        )))
                    }
                }
            }
        }

        Ok(Arc::new(Policy {
            id,
            version,
            target,
            variables,
            algorithm,
            rules,
            pep_actions,
        }))
    }

    fn build_rule(
        &self,
        node: &KdlNode,
        policy_id: &str,
        scope: &VariableScope,
    ) -> Result<Rule, PolicyError> {
        let id = first_string_arg(node).ok_or_else(|| {
            PolicyError::InvalidPolicy(format!(
                "rule node in policy `{policy_id}` requires an id argument"
            ))
        })?;
        let effect = match req_prop_str(node, "effect", &id)? {
            "permit" => Effect::Permit,
            "deny" => Effect::Deny,
            other => {
                return Err(PolicyError::InvalidPolicy(format!(
                    "rule `{id}` has invalid effect `{other}` (expected permit or deny)"
                )))
            }
        };

        let mut target = Target::default();
        let mut condition = None;
        let mut pep_actions = Vec::new();
        if let Some(children) = node.children() {
            for child in children.nodes() {
                match child.name().value() {
                    "target" => target = self.build_target(child, scope)?,
                    "condition" => {
                        let expr = self.build_single_expression(child, scope)?.fold()?;
                        let meta = expr.meta();
                        if meta.is_bag || meta.datatype != DataType::Boolean {
                            return Err(PolicyError::TypeMismatch(format!(
                                "condition of rule `{id}` must be a non-bag boolean, got {meta}"
                            )));
                        }
                        condition = Some(expr);
                    }
                    "obligation" | "advice" => {
                        pep_actions.push(self.build_pep_action(child, scope)?)
                    }
                    other => {
                        return Err(PolicyError::InvalidPolicy(format!(
                            "unexpected child `{other}` in rule `{id}`"
                        )))
                    }
                }
            }
        }

        Ok(Rule {
            id,
            effect,
            target,
            condition,
            pep_actions,
        })
    }

    // ─── Policy sets ────────────────────────────────────────────────────

    fn build_policy_set(
        &self,
        node: &KdlNode,
        store: &mut PolicyStore,
        depths: &mut HashMap<String, usize>,
    ) -> Result<(), BuildError> {
        // Nested declarations are staged locally and committed only when
        // the whole top-level set builds; a deferred build leaves the
        // store untouched, so the next fixpoint round can retry cleanly.
        let mut staged = StagedPolicies::default();
        let (set, depth) = self.build_policy_set_inner(node, store, depths, &mut staged)?;
        for policy in staged.policies {
            store.add_policy(policy).map_err(BuildError::Fail)?;
        }
        for (nested, nested_depth) in staged.sets {
            depths.insert(nested.id.clone(), nested_depth);
            store.add_policy_set(nested).map_err(BuildError::Fail)?;
        }
        depths.insert(set.id.clone(), depth);
        store.add_policy_set(set).map_err(BuildError::Fail)?;
        Ok(())
    }

    fn build_policy_set_inner(
        &self,
        node: &KdlNode,
        store: &PolicyStore,
        depths: &HashMap<String, usize>,
        staged: &mut StagedPolicies,
    ) -> Result<(Arc<PolicySet>, usize), BuildError> {
        let id = first_string_arg(node).ok_or_else(|| {
            BuildError::Fail(PolicyError::InvalidPolicy(
                "policy-set node requires an id argument".into(),
            ))
        })?;
        let version = PolicyVersion::parse(prop_str(node, "version").unwrap_or("1.0"))
            .map_err(BuildError::Fail)?;
        let algorithm_name = req_prop_str(node, "algorithm", &id).map_err(BuildError::Fail)?;
        let algorithm = self
            .algorithms
            .get_policy_alg(algorithm_name)
            .ok_or_else(|| {
                BuildError::Fail(PolicyError::UnknownAlgorithm(algorithm_name.to_string()))
            })?;

        let empty_scope = VariableScope::new();
        let mut target = Target::default();
        let mut children_out: Vec<PolicyChild> = Vec::new();
        let mut pep_actions = Vec::new();
        let mut ref_depth = 0usize;

        if let Some(children) = node.children() {
            for child in children.nodes() {
                match child.name().value() {
                    "target" => {
                        target = self
                            .build_target(child, &empty_scope)
                            .map_err(BuildError::Fail)?
                    }
                    "policy" => {
                        let policy = self.build_policy(child).map_err(BuildError::Fail)?;
                        staged.policies.push(policy.clone());
                        children_out.push(PolicyChild::Policy(policy));
                    }
                    "policy-set" => {
                        let (nested, nested_depth) =
                            self.build_policy_set_inner(child, store, depths, staged)?;
                        staged.sets.push((nested.clone(), nested_depth));
                        ref_depth = ref_depth.max(nested_depth);
                        children_out.push(PolicyChild::PolicySet(nested));
                    }
                    "policy-ref" | "policy-set-ref" => {
                        let reference = build_reference(child).map_err(BuildError::Fail)?;
                        let is_set = child.name().value() == "policy-set-ref";
                        if self.static_references {
                            let (resolved, chain_depth) = self.resolve_static(
                                &reference, is_set, store, depths, staged,
                            )?;
                            if chain_depth > self.max_policy_set_ref_depth {
                                return Err(BuildError::Fail(
                                    PolicyError::ReferenceDepthExceeded(
                                        reference.id.clone(),
                                        self.max_policy_set_ref_depth,
                                    ),
                                ));
                            }
                            ref_depth = ref_depth.max(chain_depth);
                            children_out.push(resolved);
                        } else {
                            children_out.push(if is_set {
                                PolicyChild::PolicySetRef(reference)
                            } else {
                                PolicyChild::PolicyRef(reference)
                            });
                        }
                    }
                    "obligation" | "advice" => pep_actions.push(
                        self.build_pep_action(child, &empty_scope)
                            .map_err(BuildError::Fail)?,
                    ),
                    other => {
                        return Err(BuildError::Fail(PolicyError::InvalidPolicy(format!(
                            "unexpected child `{other}` in policy set `{id}`"
                        ))))
                    }
                }
            }
        }

        Ok((
            Arc::new(PolicySet {
                id,
                version,
                target,
                algorithm,
                children: children_out,
                pep_actions,
            }),
            ref_depth,
        ))
    }

    /// Resolve one reference against the store plus what this top-level
    /// build has staged so far. A missing but declared target defers the
    /// enclosing set.
    fn resolve_static(
        &self,
        reference: &PolicyReference,
        is_set: bool,
        store: &PolicyStore,
        depths: &HashMap<String, usize>,
        staged: &StagedPolicies,
    ) -> Result<(PolicyChild, usize), BuildError> {
        if is_set {
            let target = store
                .latest_policy_set(&reference.id, &reference.constraints)
                .map(|target| {
                    let below = depths.get(&target.id).copied().unwrap_or(0);
                    (target, below)
                })
                .or_else(|| {
                    staged
                        .sets
                        .iter()
                        .filter(|(s, _)| {
                            s.id == reference.id && reference.constraints.matches(&s.version)
                        })
                        .max_by(|(a, _), (b, _)| a.version.cmp(&b.version))
                        .map(|(s, depth)| (s.clone(), *depth))
                });
            match target {
                Some((target, below)) => Ok((PolicyChild::PolicySet(target), below + 1)),
                None => Err(BuildError::Defer(reference.id.clone())),
            }
        } else {
            let target = store
                .latest_policy(&reference.id, &reference.constraints)
                .or_else(|| {
                    staged
                        .policies
                        .iter()
                        .filter(|p| {
                            p.id == reference.id && reference.constraints.matches(&p.version)
                        })
                        .max_by(|a, b| a.version.cmp(&b.version))
                        .cloned()
                });
            match target {
                Some(target) => Ok((PolicyChild::Policy(target), 1)),
                None => Err(BuildError::Defer(reference.id.clone())),
            }
        }
    }

    // ─── Targets ────────────────────────────────────────────────────────

    fn build_target(
        &self,
        node: &KdlNode,
        scope: &VariableScope,
    ) -> Result<Target, PolicyError> {
        let mut any_ofs = Vec::new();
        if let Some(children) = node.children() {
            for any_of_node in children.nodes() {
                if any_of_node.name().value() != "any-of" {
                    return Err(PolicyError::InvalidPolicy(format!(
                        "unexpected child `{}` in target (expected `any-of`)",
                        any_of_node.name().value()
                    )));
                }
                let mut all_ofs = Vec::new();
                if let Some(all_of_nodes) = any_of_node.children() {
                    for all_of_node in all_of_nodes.nodes() {
                        if all_of_node.name().value() != "all-of" {
                            return Err(PolicyError::InvalidPolicy(format!(
                                "unexpected child `{}` in any-of (expected `all-of`)",
                                all_of_node.name().value()
                            )));
                        }
                        let mut matches = Vec::new();
                        if let Some(match_nodes) = all_of_node.children() {
                            for match_node in match_nodes.nodes() {
                                if match_node.name().value() != "match" {
                                    return Err(PolicyError::InvalidPolicy(format!(
                                        "unexpected child `{}` in all-of (expected `match`)",
                                        match_node.name().value()
                                    )));
                                }
                                matches.push(self.build_match(match_node, scope)?);
                            }
                        }
                        all_ofs.push(AllOf { matches });
                    }
                }
                any_ofs.push(AnyOf { all_ofs });
            }
        }
        Ok(Target { any_ofs })
    }

    fn build_match(
        &self,
        node: &KdlNode,
        _scope: &VariableScope,
    ) -> Result<MatchExpr, PolicyError> {
        let function_name = req_prop_str(node, "function", "match")?;
        let function = self
            .functions
            .get(function_name)
            .ok_or_else(|| PolicyError::UnknownFunction(function_name.to_string()))?;
        let sig = &function.signature;
        let valid = matches!(function.kind(), FunctionKind::Eager(_))
            && sig.variadic.is_none()
            && sig.params.len() == 2
            && !sig.params[0].is_bag
            && !sig.params[1].is_bag
            && sig.returns.datatype == DataType::Boolean
            && !sig.returns.is_bag;
        if !valid {
            return Err(PolicyError::TypeMismatch(format!(
                "match function `{function_name}` must be a boolean predicate over two primitive values"
            )));
        }

        let literal_type = sig.params[0].datatype;
        let source_type = sig.params[1].datatype;

        let lexical = req_prop_str(node, "value", "match")?;
        let literal = Value::parse(literal_type, lexical)
            .map_err(|e| PolicyError::from_lexical(literal_type, lexical, &e))?;

        if let Some(declared) = prop_str(node, "datatype") {
            let declared = DataType::resolve(declared)
                .ok_or_else(|| PolicyError::UnknownDatatype(declared.to_string()))?;
            if declared != source_type {
                return Err(PolicyError::TypeMismatch(format!(
                    "match on `{function_name}` expects a {source_type} attribute, got {declared}"
                )));
            }
        }

        let category = ids::resolve_category(req_prop_str(node, "category", "match")?);
        let must_be_present = prop_bool(node, "must-be-present").unwrap_or(false);

        let source = if let Some(path) = prop_str(node, "path") {
            self.check_paths_enabled(path)?;
            Expression::Selector(AttributeSelector {
                category,
                path: path.to_string(),
                context_selector_id: prop_str(node, "context-selector-id")
                    .map(str::to_string),
                datatype: source_type,
                must_be_present,
            })
        } else {
            let attribute_id = req_prop_str(node, "attribute", "match")?;
            Expression::Designator(AttributeDesignator {
                key: AttributeKey {
                    category,
                    attribute_id: attribute_id.to_string(),
                    datatype: source_type,
                    issuer: prop_str(node, "issuer").map(str::to_string),
                },
                must_be_present,
            })
        };

        Ok(MatchExpr {
            function,
            literal,
            source,
        })
    }

    // ─── PEP actions ────────────────────────────────────────────────────

    fn build_pep_action(
        &self,
        node: &KdlNode,
        scope: &VariableScope,
    ) -> Result<PepActionExpr, PolicyError> {
        let kind = match node.name().value() {
            "obligation" => PepActionKind::Obligation,
            _ => PepActionKind::Advice,
        };
        let id = first_string_arg(node).ok_or_else(|| {
            PolicyError::InvalidPolicy("obligation/advice node requires an id argument".into())
        })?;
        let applies_to = match req_prop_str(node, "applies-to", &id)? {
            "permit" => Effect::Permit,
            "deny" => Effect::Deny,
            other => {
                return Err(PolicyError::InvalidPolicy(format!(
                    "obligation/advice `{id}` has invalid applies-to `{other}`"
                )))
            }
        };

        let mut assignments = Vec::new();
        if let Some(children) = node.children() {
            for child in children.nodes() {
                if child.name().value() != "assignment" {
                    return Err(PolicyError::InvalidPolicy(format!(
                        "unexpected child `{}` in obligation/advice `{id}`",
                        child.name().value()
                    )));
                }
                let attribute_id = req_prop_str(child, "attribute", &id)?.to_string();
                let expr = self.build_single_expression(child, scope)?.fold()?;
                assignments.push(AttributeAssignmentExpr {
                    attribute_id,
                    category: prop_str(child, "category").map(str::to_string),
                    issuer: prop_str(child, "issuer").map(str::to_string),
                    expr,
                });
            }
        }

        Ok(PepActionExpr {
            kind,
            id,
            applies_to,
            assignments,
        })
    }

    // ─── Expressions ────────────────────────────────────────────────────

    /// A node whose children hold exactly one expression.
    fn build_single_expression(
        &self,
        node: &KdlNode,
        scope: &VariableScope,
    ) -> Result<Expression, PolicyError> {
        let children = node
            .children()
            .map(KdlDocument::nodes)
            .unwrap_or_default();
        if children.len() != 1 {
            return Err(PolicyError::InvalidPolicy(format!(
                "`{}` requires exactly one expression child, got {}",
                node.name().value(),
                children.len()
            )));
        }
        self.build_expression(&children[0], scope)
    }

    fn build_expression(
        &self,
        node: &KdlNode,
        scope: &VariableScope,
    ) -> Result<Expression, PolicyError> {
        match node.name().value() {
            "string" => {
                let v = first_string_arg(node).ok_or_else(|| {
                    PolicyError::InvalidPolicy("string literal requires an argument".into())
                })?;
                Ok(Expression::Literal(Value::String(v)))
            }
            "boolean" => match first_arg(node).and_then(KdlValue::as_bool) {
                Some(b) => Ok(Expression::Literal(Value::Boolean(b))),
                None => Err(PolicyError::InvalidPolicy(
                    "boolean literal requires a true/false argument".into(),
                )),
            },
            "integer" => match first_arg(node).and_then(KdlValue::as_i64) {
                Some(n) => Ok(Expression::Literal(Value::Integer(n))),
                None => Err(PolicyError::InvalidPolicy(
                    "integer literal requires an integer argument".into(),
                )),
            },
            "double" => match first_arg(node).and_then(KdlValue::as_f64) {
                Some(d) => Ok(Expression::Literal(Value::Double(d))),
                None => Err(PolicyError::InvalidPolicy(
                    "double literal requires a number argument".into(),
                )),
            },
            "value" => {
                let lexical = first_string_arg(node).ok_or_else(|| {
                    PolicyError::InvalidPolicy("value literal requires an argument".into())
                })?;
                let datatype_name = req_prop_str(node, "datatype", "value")?;
                let datatype = DataType::resolve(datatype_name)
                    .ok_or_else(|| PolicyError::UnknownDatatype(datatype_name.to_string()))?;
                if datatype == DataType::XPathExpression {
                    self.check_paths_enabled(&lexical)?;
                }
                let value = Value::parse(datatype, &lexical)
                    .map_err(|e| PolicyError::from_lexical(datatype, &lexical, &e))?;
                Ok(Expression::Literal(value))
            }
            "attribute" => {
                let datatype_name = req_prop_str(node, "datatype", "attribute")?;
                let datatype = DataType::resolve(datatype_name)
                    .ok_or_else(|| PolicyError::UnknownDatatype(datatype_name.to_string()))?;
                Ok(Expression::Designator(AttributeDesignator {
                    key: AttributeKey {
                        category: ids::resolve_category(req_prop_str(
                            node,
                            "category",
                            "attribute",
                        )?),
                        attribute_id: req_prop_str(node, "id", "attribute")?.to_string(),
                        datatype,
                        issuer: prop_str(node, "issuer").map(str::to_string),
                    },
                    must_be_present: prop_bool(node, "must-be-present").unwrap_or(false),
                }))
            }
            "selector" => {
                let path = req_prop_str(node, "path", "selector")?;
                self.check_paths_enabled(path)?;
                let datatype_name = req_prop_str(node, "datatype", "selector")?;
                let datatype = DataType::resolve(datatype_name)
                    .ok_or_else(|| PolicyError::UnknownDatatype(datatype_name.to_string()))?;
                Ok(Expression::Selector(AttributeSelector {
                    category: ids::resolve_category(req_prop_str(
                        node, "category", "selector",
                    )?),
                    path: path.to_string(),
                    context_selector_id: prop_str(node, "context-selector-id")
                        .map(str::to_string),
                    datatype,
                    must_be_present: prop_bool(node, "must-be-present").unwrap_or(false),
                }))
            }
            "variable-ref" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    PolicyError::InvalidPolicy("variable-ref requires a name argument".into())
                })?;
                match scope.get(&name) {
                    Some((def, _)) => Ok(Expression::VariableReference(def.clone())),
                    None => Err(PolicyError::UndefinedVariable(name)),
                }
            }
            "function" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    PolicyError::InvalidPolicy("function reference requires a name".into())
                })?;
                let function = self
                    .functions
                    .get(&name)
                    .ok_or(PolicyError::UnknownFunction(name))?;
                Ok(Expression::FunctionRef(function))
            }
            "apply" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    PolicyError::InvalidPolicy("apply requires a function name".into())
                })?;
                let function = self
                    .functions
                    .get(&name)
                    .ok_or(PolicyError::UnknownFunction(name))?;
                let mut args = Vec::new();
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        args.push(self.build_expression(child, scope)?);
                    }
                }
                Expression::apply(function, args)
            }
            other => Err(PolicyError::InvalidPolicy(format!(
                "unknown expression node `{other}`"
            ))),
        }
    }

    fn check_paths_enabled(&self, path: &str) -> Result<(), PolicyError> {
        match &self.paths {
            Some(cache) => {
                // Compile at load: syntax errors surface here, and the
                // compiled form is already cached for evaluation.
                cache.compiled(path, &[])?;
                Ok(())
            }
            None => Err(PolicyError::ContentPathsDisabled(format!(
                "path `{path}` requires pdp.enable_content_paths"
            ))),
        }
    }
}

type VariableScope = HashMap<String, (Arc<VariableDef>, usize)>;

/// Declarations built while assembling one top-level policy set, held
/// back from the store until the whole set succeeds.
#[derive(Default)]
struct StagedPolicies {
    policies: Vec<Arc<Policy>>,
    sets: Vec<(Arc<PolicySet>, usize)>,
}

enum BuildError {
    /// The reference target exists somewhere in the loaded documents but
    /// is not built yet; retry this set in the next fixpoint round.
    Defer(String),
    Fail(PolicyError),
}

fn build_reference(node: &KdlNode) -> Result<PolicyReference, PolicyError> {
    let id = first_string_arg(node).ok_or_else(|| {
        PolicyError::InvalidPolicy("policy reference requires an id argument".into())
    })?;
    let mut constraints = VersionConstraints::unconstrained();
    if let Some(pattern) = prop_str(node, "version") {
        constraints.version = Some(VersionPattern::parse(pattern)?);
    }
    if let Some(earliest) = prop_str(node, "earliest-version") {
        constraints.earliest = Some(PolicyVersion::parse(earliest)?);
    }
    if let Some(latest) = prop_str(node, "latest-version") {
        constraints.latest = Some(PolicyVersion::parse(latest)?);
    }
    Ok(PolicyReference { id, constraints })
}

/// Longest chain of variable definitions reachable from this expression.
fn referenced_variable_depth(expr: &Expression, scope: &VariableScope) -> usize {
    match expr {
        Expression::VariableReference(def) => scope
            .values()
            .find(|(candidate, _)| Arc::ptr_eq(candidate, def))
            .map(|(_, depth)| *depth)
            .unwrap_or(0),
        Expression::Apply(apply) => apply
            .args
            .iter()
            .map(|arg| referenced_variable_depth(arg, scope))
            .max()
            .unwrap_or(0),
        _ => 0,
    }
}

fn collect_declared_ids(node: &KdlNode, declared: &mut HashSet<String>) {
    if matches!(node.name().value(), "policy" | "policy-set") {
        if let Some(id) = first_string_arg(node) {
            declared.insert(id);
        }
    }
    if let Some(children) = node.children() {
        for child in children.nodes() {
            collect_declared_ids(child, declared);
        }
    }
}

// ─── KDL helpers ────────────────────────────────────────────────────────

fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn first_string_arg(node: &KdlNode) -> Option<String> {
    first_arg(node).and_then(KdlValue::as_string).map(str::to_string)
}

fn prop_str<'n>(node: &'n KdlNode, name: &str) -> Option<&'n str> {
    node.get(name).and_then(|v| v.value().as_string())
}

fn prop_bool(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.value().as_bool())
}

fn req_prop_str<'n>(
    node: &'n KdlNode,
    name: &str,
    context: &str,
) -> Result<&'n str, PolicyError> {
    prop_str(node, name).ok_or_else(|| {
        PolicyError::InvalidPolicy(format!(
            "`{}` node in `{context}` is missing the `{name}` property",
            node.name().value()
        ))
    })
}
