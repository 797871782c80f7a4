//! The policy tree and its evaluator: targets, rules, policies, policy
//! sets, and the obligation/advice expressions gated by effect. Policies
//! are built once by the loader, statically linked, and immutable during
//! evaluation.

use std::sync::Arc;

use crate::combining::CombiningAlg;
use crate::context::EvaluationContext;
use crate::errors::IndeterminateError;
use crate::expression::{Expression, Resolved, VariableDef};
use crate::function::FunctionDef;
use crate::reference::{PolicyVersion, VersionConstraints};
use crate::value::Value;

/// A rule's effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Permit,
    Deny,
}

impl Effect {
    pub fn extended(self) -> ExtendedEffect {
        match self {
            Effect::Permit => ExtendedEffect::Permit,
            Effect::Deny => ExtendedEffect::Deny,
        }
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::Permit => f.write_str("Permit"),
            Effect::Deny => f.write_str("Deny"),
        }
    }
}

/// The effect an Indeterminate source would have produced: `{P}`, `{D}`,
/// or `{P,D}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedEffect {
    Permit,
    Deny,
    Both,
}

/// Outcome of one rule/policy/policy-set evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Permit,
    Deny,
    NotApplicable,
    Indeterminate {
        effect: ExtendedEffect,
        error: IndeterminateError,
    },
}

impl Decision {
    pub fn is_applicable(&self) -> bool {
        !matches!(self, Decision::NotApplicable)
    }
}

/// Identifies a policy or policy set that contributed to a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyIdEntry {
    pub is_set: bool,
    pub id: String,
    pub version: String,
}

/// A decision together with its PEP actions and the identifiers of the
/// policies that produced it. Indeterminate and NotApplicable results
/// never carry obligations or advice.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionResult {
    pub decision: Decision,
    pub obligations: Vec<PepAction>,
    pub advice: Vec<PepAction>,
    pub policy_ids: Vec<PolicyIdEntry>,
}

impl DecisionResult {
    pub fn not_applicable() -> Self {
        Self {
            decision: Decision::NotApplicable,
            obligations: Vec::new(),
            advice: Vec::new(),
            policy_ids: Vec::new(),
        }
    }

    pub fn with_effect(effect: Effect, obligations: Vec<PepAction>, advice: Vec<PepAction>) -> Self {
        let decision = match effect {
            Effect::Permit => Decision::Permit,
            Effect::Deny => Decision::Deny,
        };
        Self {
            decision,
            obligations,
            advice,
            policy_ids: Vec::new(),
        }
    }

    pub fn indeterminate(effect: ExtendedEffect, error: IndeterminateError) -> Self {
        Self {
            decision: Decision::Indeterminate { effect, error },
            obligations: Vec::new(),
            advice: Vec::new(),
            policy_ids: Vec::new(),
        }
    }
}

// ─── PEP actions ────────────────────────────────────────────────────────

/// Whether a PEP action is an obligation (must be discharged) or advice
/// (may be ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PepActionKind {
    Obligation,
    Advice,
}

/// An obligation or advice expression, evaluated only after its owner has
/// produced the matching decision.
#[derive(Debug)]
pub struct PepActionExpr {
    pub kind: PepActionKind,
    pub id: String,
    pub applies_to: Effect,
    pub assignments: Vec<AttributeAssignmentExpr>,
}

#[derive(Debug)]
pub struct AttributeAssignmentExpr {
    pub attribute_id: String,
    pub category: Option<String>,
    pub issuer: Option<String>,
    pub expr: Expression,
}

/// A fully evaluated PEP action surfaced in the response.
#[derive(Debug, Clone, PartialEq)]
pub struct PepAction {
    pub id: String,
    pub assignments: Vec<AttributeAssignment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeAssignment {
    pub attribute_id: String,
    pub category: Option<String>,
    pub issuer: Option<String>,
    pub value: Value,
}

/// Evaluate the PEP action expressions whose `applies_to` matches the
/// decided effect, preserving document order. A bag-valued assignment
/// expression contributes one assignment per element. Any failure aborts
/// the whole batch: the caller downgrades the decision and emits nothing.
pub fn evaluate_pep_actions(
    exprs: &[PepActionExpr],
    effect: Effect,
    ctx: &mut EvaluationContext,
) -> Result<(Vec<PepAction>, Vec<PepAction>), IndeterminateError> {
    let mut obligations = Vec::new();
    let mut advice = Vec::new();
    for action_expr in exprs.iter().filter(|e| e.applies_to == effect) {
        let mut assignments = Vec::new();
        for assign in &action_expr.assignments {
            let resolved = assign.expr.evaluate(ctx).map_err(|e| {
                e.at(format!(
                    "obligation/advice `{}` assignment `{}`",
                    action_expr.id, assign.attribute_id
                ))
            })?;
            let mut push = |value: Value| {
                assignments.push(AttributeAssignment {
                    attribute_id: assign.attribute_id.clone(),
                    category: assign.category.clone(),
                    issuer: assign.issuer.clone(),
                    value,
                })
            };
            match resolved {
                Resolved::Value(v) => push(v),
                Resolved::Bag(b) => b.iter().cloned().for_each(push),
            }
        }
        let action = PepAction {
            id: action_expr.id.clone(),
            assignments,
        };
        match action_expr.kind {
            PepActionKind::Obligation => obligations.push(action),
            PepActionKind::Advice => advice.push(action),
        }
    }
    Ok((obligations, advice))
}

// ─── Targets ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match,
    NoMatch,
    Indeterminate(IndeterminateError),
}

/// A disjunction of `AnyOf` groups; an empty target always matches.
#[derive(Debug, Default)]
pub struct Target {
    pub any_ofs: Vec<AnyOf>,
}

/// OR of `AllOf` conjunctions.
#[derive(Debug)]
pub struct AnyOf {
    pub all_ofs: Vec<AllOf>,
}

/// AND of individual matches.
#[derive(Debug)]
pub struct AllOf {
    pub matches: Vec<MatchExpr>,
}

/// One target match: a literal value paired with an attribute source
/// under an equality-like predicate.
#[derive(Debug)]
pub struct MatchExpr {
    pub function: Arc<FunctionDef>,
    pub literal: Value,
    pub source: Expression,
}

impl MatchExpr {
    pub fn evaluate(&self, ctx: &mut EvaluationContext) -> MatchOutcome {
        let bag = match self.source.evaluate(ctx) {
            Ok(resolved) => match resolved.expect_bag() {
                Ok(bag) => bag.clone(),
                Err(e) => return MatchOutcome::Indeterminate(e),
            },
            Err(e) => return MatchOutcome::Indeterminate(e),
        };
        let mut pending: Option<IndeterminateError> = None;
        for element in &bag {
            let call = self
                .function
                .call_values(&[
                    Resolved::Value(self.literal.clone()),
                    Resolved::Value(element.clone()),
                ])
                .and_then(|r| r.boolean());
            match call {
                Ok(true) => return MatchOutcome::Match,
                Ok(false) => {}
                Err(e) => {
                    if pending.is_none() {
                        pending = Some(e);
                    }
                }
            }
        }
        match pending {
            Some(err) => MatchOutcome::Indeterminate(err),
            None => MatchOutcome::NoMatch,
        }
    }
}

impl AllOf {
    /// Conjunctive: any NoMatch wins, then any Indeterminate, else Match.
    fn evaluate(&self, ctx: &mut EvaluationContext) -> MatchOutcome {
        let mut pending: Option<IndeterminateError> = None;
        for m in &self.matches {
            match m.evaluate(ctx) {
                MatchOutcome::NoMatch => return MatchOutcome::NoMatch,
                MatchOutcome::Indeterminate(e) => {
                    if pending.is_none() {
                        pending = Some(e);
                    }
                }
                MatchOutcome::Match => {}
            }
        }
        match pending {
            Some(err) => MatchOutcome::Indeterminate(err),
            None => MatchOutcome::Match,
        }
    }
}

impl AnyOf {
    /// Disjunctive: any Match wins, then any Indeterminate, else NoMatch.
    fn evaluate(&self, ctx: &mut EvaluationContext) -> MatchOutcome {
        let mut pending: Option<IndeterminateError> = None;
        for all_of in &self.all_ofs {
            match all_of.evaluate(ctx) {
                MatchOutcome::Match => return MatchOutcome::Match,
                MatchOutcome::Indeterminate(e) => {
                    if pending.is_none() {
                        pending = Some(e);
                    }
                }
                MatchOutcome::NoMatch => {}
            }
        }
        match pending {
            Some(err) => MatchOutcome::Indeterminate(err),
            None => MatchOutcome::NoMatch,
        }
    }
}

impl Target {
    /// Conjunctive over `AnyOf` children; the empty target matches.
    pub fn evaluate(&self, ctx: &mut EvaluationContext) -> MatchOutcome {
        let mut pending: Option<IndeterminateError> = None;
        for any_of in &self.any_ofs {
            match any_of.evaluate(ctx) {
                MatchOutcome::NoMatch => return MatchOutcome::NoMatch,
                MatchOutcome::Indeterminate(e) => {
                    if pending.is_none() {
                        pending = Some(e);
                    }
                }
                MatchOutcome::Match => {}
            }
        }
        match pending {
            Some(err) => MatchOutcome::Indeterminate(err),
            None => MatchOutcome::Match,
        }
    }
}

// ─── Rules ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Rule {
    pub id: String,
    pub effect: Effect,
    pub target: Target,
    pub condition: Option<Expression>,
    pub pep_actions: Vec<PepActionExpr>,
}

impl Rule {
    pub fn evaluate(&self, ctx: &mut EvaluationContext) -> DecisionResult {
        match self.target.evaluate(ctx) {
            MatchOutcome::NoMatch => return DecisionResult::not_applicable(),
            MatchOutcome::Indeterminate(e) => {
                return DecisionResult::indeterminate(
                    self.effect.extended(),
                    e.at(format!("rule `{}` target", self.id)),
                )
            }
            MatchOutcome::Match => {}
        }

        if let Some(condition) = &self.condition {
            match condition.evaluate(ctx).and_then(|r| r.boolean()) {
                Ok(false) => return DecisionResult::not_applicable(),
                Ok(true) => {}
                Err(e) => {
                    return DecisionResult::indeterminate(
                        self.effect.extended(),
                        e.at(format!("rule `{}` condition", self.id)),
                    )
                }
            }
        }

        match evaluate_pep_actions(&self.pep_actions, self.effect, ctx) {
            Ok((obligations, advice)) => {
                DecisionResult::with_effect(self.effect, obligations, advice)
            }
            Err(e) => DecisionResult::indeterminate(self.effect.extended(), e),
        }
    }

    pub fn match_target(&self, ctx: &mut EvaluationContext) -> MatchOutcome {
        self.target.evaluate(ctx)
    }
}

// ─── Policies ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Policy {
    pub id: String,
    pub version: PolicyVersion,
    pub target: Target,
    pub variables: Vec<Arc<VariableDef>>,
    pub algorithm: Arc<CombiningAlg>,
    pub rules: Vec<Rule>,
    pub pep_actions: Vec<PepActionExpr>,
}

impl Policy {
    fn id_entry(&self) -> PolicyIdEntry {
        PolicyIdEntry {
            is_set: false,
            id: self.id.clone(),
            version: self.version.to_string(),
        }
    }

    pub fn match_target(&self, ctx: &mut EvaluationContext) -> MatchOutcome {
        self.target.evaluate(ctx)
    }

    pub fn evaluate(&self, ctx: &mut EvaluationContext) -> DecisionResult {
        let target = self.target.evaluate(ctx);
        if matches!(target, MatchOutcome::NoMatch) {
            return DecisionResult::not_applicable();
        }

        let children: Vec<&dyn Combinable> =
            self.rules.iter().map(|r| r as &dyn Combinable).collect();
        let combined = self.algorithm.combine(ctx, &children);

        let mut result = match target {
            // An Indeterminate target downgrades the combined decision to
            // the extended Indeterminate of its would-be effect.
            MatchOutcome::Indeterminate(e) => match combined.decision {
                Decision::Permit => {
                    DecisionResult::indeterminate(ExtendedEffect::Permit, e)
                }
                Decision::Deny => DecisionResult::indeterminate(ExtendedEffect::Deny, e),
                Decision::NotApplicable => DecisionResult::not_applicable(),
                Decision::Indeterminate { effect, .. } => {
                    DecisionResult::indeterminate(effect, e)
                }
            },
            MatchOutcome::Match => combined,
            MatchOutcome::NoMatch => unreachable!(),
        };

        // Own PEP actions join the surviving children's, gated by effect.
        let effect = match result.decision {
            Decision::Permit => Some(Effect::Permit),
            Decision::Deny => Some(Effect::Deny),
            _ => None,
        };
        if let Some(effect) = effect {
            match evaluate_pep_actions(&self.pep_actions, effect, ctx) {
                Ok((obligations, advice)) => {
                    result.obligations.extend(obligations);
                    result.advice.extend(advice);
                }
                Err(e) => {
                    result = DecisionResult::indeterminate(
                        effect.extended(),
                        e.at(format!("policy `{}`", self.id)),
                    );
                }
            }
        }

        if result.decision.is_applicable() {
            result.policy_ids.insert(0, self.id_entry());
        }
        result
    }
}

/// A policy set's child: an inline policy or policy set, or a reference
/// left unresolved for per-request resolution.
#[derive(Debug)]
pub enum PolicyChild {
    Policy(Arc<Policy>),
    PolicySet(Arc<PolicySet>),
    PolicyRef(PolicyReference),
    PolicySetRef(PolicyReference),
}

/// A `Policy(Set)IdReference` with its version constraints. In static
/// mode these are resolved and replaced at load; in dynamic mode they are
/// resolved per request through the configured provider, guarded by the
/// context's reference chain.
#[derive(Debug)]
pub struct PolicyReference {
    pub id: String,
    pub constraints: VersionConstraints,
}

impl PolicyChild {
    fn evaluate_reference(
        reference: &PolicyReference,
        is_set: bool,
        ctx: &mut EvaluationContext,
    ) -> DecisionResult {
        let Some(provider) = ctx.ref_provider() else {
            return DecisionResult::indeterminate(
                ExtendedEffect::Both,
                IndeterminateError::processing(format!(
                    "no reference policy provider configured for `{}`",
                    reference.id
                )),
            );
        };
        if let Err(e) = ctx.push_reference(&reference.id) {
            return DecisionResult::indeterminate(ExtendedEffect::Both, e);
        }
        let result = if is_set {
            match provider.policy_set(&reference.id, &reference.constraints) {
                Ok(Some(target)) => target.evaluate(ctx),
                Ok(None) => DecisionResult::indeterminate(
                    ExtendedEffect::Both,
                    IndeterminateError::processing(format!(
                        "unresolved policy set reference `{}`",
                        reference.id
                    )),
                ),
                Err(e) => DecisionResult::indeterminate(ExtendedEffect::Both, e),
            }
        } else {
            match provider.policy(&reference.id, &reference.constraints) {
                Ok(Some(target)) => target.evaluate(ctx),
                Ok(None) => DecisionResult::indeterminate(
                    ExtendedEffect::Both,
                    IndeterminateError::processing(format!(
                        "unresolved policy reference `{}`",
                        reference.id
                    )),
                ),
                Err(e) => DecisionResult::indeterminate(ExtendedEffect::Both, e),
            }
        };
        ctx.pop_reference();
        result
    }
}

/// Anything a combining algorithm can iterate: rules inside a policy, or
/// a policy set's children.
pub trait Combinable {
    fn evaluate(&self, ctx: &mut EvaluationContext) -> DecisionResult;
    fn match_target(&self, ctx: &mut EvaluationContext) -> MatchOutcome;
    fn label(&self) -> &str;
}

impl Combinable for Rule {
    fn evaluate(&self, ctx: &mut EvaluationContext) -> DecisionResult {
        Rule::evaluate(self, ctx)
    }

    fn match_target(&self, ctx: &mut EvaluationContext) -> MatchOutcome {
        Rule::match_target(self, ctx)
    }

    fn label(&self) -> &str {
        &self.id
    }
}

impl Combinable for PolicyChild {
    fn evaluate(&self, ctx: &mut EvaluationContext) -> DecisionResult {
        match self {
            PolicyChild::Policy(p) => p.evaluate(ctx),
            PolicyChild::PolicySet(ps) => ps.evaluate(ctx),
            PolicyChild::PolicyRef(r) => Self::evaluate_reference(r, false, ctx),
            PolicyChild::PolicySetRef(r) => Self::evaluate_reference(r, true, ctx),
        }
    }

    fn match_target(&self, ctx: &mut EvaluationContext) -> MatchOutcome {
        match self {
            PolicyChild::Policy(p) => p.match_target(ctx),
            PolicyChild::PolicySet(ps) => ps.match_target(ctx),
            PolicyChild::PolicyRef(r) | PolicyChild::PolicySetRef(r) => {
                let is_set = matches!(self, PolicyChild::PolicySetRef(_));
                let Some(provider) = ctx.ref_provider() else {
                    return MatchOutcome::Indeterminate(IndeterminateError::processing(
                        format!("no reference policy provider configured for `{}`", r.id),
                    ));
                };
                let outcome = if is_set {
                    provider
                        .policy_set(&r.id, &r.constraints)
                        .map(|t| t.map(|ps| ps.match_target(ctx)))
                } else {
                    provider
                        .policy(&r.id, &r.constraints)
                        .map(|t| t.map(|p| p.match_target(ctx)))
                };
                match outcome {
                    Ok(Some(m)) => m,
                    Ok(None) => MatchOutcome::Indeterminate(IndeterminateError::processing(
                        format!("unresolved policy reference `{}`", r.id),
                    )),
                    Err(e) => MatchOutcome::Indeterminate(e),
                }
            }
        }
    }

    fn label(&self) -> &str {
        match self {
            PolicyChild::Policy(p) => &p.id,
            PolicyChild::PolicySet(ps) => &ps.id,
            PolicyChild::PolicyRef(r) | PolicyChild::PolicySetRef(r) => &r.id,
        }
    }
}

#[derive(Debug)]
pub struct PolicySet {
    pub id: String,
    pub version: PolicyVersion,
    pub target: Target,
    pub algorithm: Arc<CombiningAlg>,
    pub children: Vec<PolicyChild>,
    pub pep_actions: Vec<PepActionExpr>,
}

impl PolicySet {
    fn id_entry(&self) -> PolicyIdEntry {
        PolicyIdEntry {
            is_set: true,
            id: self.id.clone(),
            version: self.version.to_string(),
        }
    }

    pub fn match_target(&self, ctx: &mut EvaluationContext) -> MatchOutcome {
        self.target.evaluate(ctx)
    }

    pub fn evaluate(&self, ctx: &mut EvaluationContext) -> DecisionResult {
        let target = self.target.evaluate(ctx);
        if matches!(target, MatchOutcome::NoMatch) {
            return DecisionResult::not_applicable();
        }

        let children: Vec<&dyn Combinable> =
            self.children.iter().map(|c| c as &dyn Combinable).collect();
        let combined = self.algorithm.combine(ctx, &children);

        let mut result = match target {
            MatchOutcome::Indeterminate(e) => match combined.decision {
                Decision::Permit => {
                    DecisionResult::indeterminate(ExtendedEffect::Permit, e)
                }
                Decision::Deny => DecisionResult::indeterminate(ExtendedEffect::Deny, e),
                Decision::NotApplicable => DecisionResult::not_applicable(),
                Decision::Indeterminate { effect, .. } => {
                    DecisionResult::indeterminate(effect, e)
                }
            },
            MatchOutcome::Match => combined,
            MatchOutcome::NoMatch => unreachable!(),
        };

        let effect = match result.decision {
            Decision::Permit => Some(Effect::Permit),
            Decision::Deny => Some(Effect::Deny),
            _ => None,
        };
        if let Some(effect) = effect {
            match evaluate_pep_actions(&self.pep_actions, effect, ctx) {
                Ok((obligations, advice)) => {
                    result.obligations.extend(obligations);
                    result.advice.extend(advice);
                }
                Err(e) => {
                    result = DecisionResult::indeterminate(
                        effect.extended(),
                        e.at(format!("policy set `{}`", self.id)),
                    );
                }
            }
        }

        if result.decision.is_applicable() {
            result.policy_ids.insert(0, self.id_entry());
        }
        result
    }
}

/// The engine's root: a single policy or policy set.
#[derive(Debug)]
pub enum RootPolicy {
    Policy(Arc<Policy>),
    PolicySet(Arc<PolicySet>),
}

impl RootPolicy {
    pub fn id(&self) -> &str {
        match self {
            RootPolicy::Policy(p) => &p.id,
            RootPolicy::PolicySet(ps) => &ps.id,
        }
    }

    pub fn evaluate(&self, ctx: &mut EvaluationContext) -> DecisionResult {
        match self {
            RootPolicy::Policy(p) => p.evaluate(ctx),
            RootPolicy::PolicySet(ps) => ps.evaluate(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combining::CombiningAlgRegistry;
    use crate::expression::AttributeDesignator;
    use crate::function::FunctionRegistry;
    use crate::value::{ids, AttributeKey, Bag, DataType};
    use std::collections::HashMap;

    fn subject_id_key() -> AttributeKey {
        AttributeKey::new(ids::SUBJECT_CATEGORY, ids::SUBJECT_ID, DataType::String)
    }

    fn subject_match(literal: &str, must_be_present: bool) -> MatchExpr {
        let reg = FunctionRegistry::standard();
        MatchExpr {
            function: reg.get("string-equal").unwrap(),
            literal: Value::String(literal.into()),
            source: Expression::Designator(AttributeDesignator {
                key: subject_id_key(),
                must_be_present,
            }),
        }
    }

    fn target_matching(literal: &str, must_be_present: bool) -> Target {
        Target {
            any_ofs: vec![AnyOf {
                all_ofs: vec![AllOf {
                    matches: vec![subject_match(literal, must_be_present)],
                }],
            }],
        }
    }

    fn ctx_with_subject(name: &str) -> EvaluationContext {
        let mut attrs = HashMap::new();
        attrs.insert(
            subject_id_key(),
            Bag::singleton(Value::String(name.into())),
        );
        EvaluationContext::new(attrs, HashMap::new())
    }

    fn deny_rule(target: Target) -> Rule {
        Rule {
            id: "r1".into(),
            effect: Effect::Deny,
            target,
            condition: None,
            pep_actions: Vec::new(),
        }
    }

    #[test]
    fn test_rule_target_match_produces_effect() {
        let rule = deny_rule(target_matching("J. Hibbert", true));
        let mut ctx = ctx_with_subject("J. Hibbert");
        assert_eq!(rule.evaluate(&mut ctx).decision, Decision::Deny);
    }

    #[test]
    fn test_rule_target_no_match_is_not_applicable() {
        let rule = deny_rule(target_matching("J. Hibbert", true));
        let mut ctx = ctx_with_subject("H. Simpson");
        assert_eq!(rule.evaluate(&mut ctx).decision, Decision::NotApplicable);
    }

    #[test]
    fn test_rule_missing_attribute_is_extended_indeterminate() {
        let rule = deny_rule(target_matching("J. Hibbert", true));
        let mut ctx = EvaluationContext::detached();
        match rule.evaluate(&mut ctx).decision {
            Decision::Indeterminate { effect, error } => {
                assert_eq!(effect, ExtendedEffect::Deny);
                assert_eq!(error.code, crate::errors::StatusCode::MissingAttribute);
                assert!(error.missing.iter().any(|d| d.attribute_id == ids::SUBJECT_ID));
            }
            other => panic!("expected Indeterminate{{D}}, got {other:?}"),
        }
    }

    #[test]
    fn test_rule_missing_optional_attribute_is_no_match() {
        let rule = deny_rule(target_matching("J. Hibbert", false));
        let mut ctx = EvaluationContext::detached();
        assert_eq!(rule.evaluate(&mut ctx).decision, Decision::NotApplicable);
    }

    #[test]
    fn test_empty_target_always_matches() {
        let mut ctx = EvaluationContext::detached();
        assert_eq!(Target::default().evaluate(&mut ctx), MatchOutcome::Match);
    }

    #[test]
    fn test_target_conjunct_narrows() {
        // Adding an AllOf conjunct can only narrow the target.
        let wide = target_matching("J. Hibbert", false);
        let mut narrowed = target_matching("J. Hibbert", false);
        narrowed.any_ofs[0].all_ofs[0]
            .matches
            .push(subject_match("someone else", false));

        let mut ctx = ctx_with_subject("J. Hibbert");
        assert_eq!(wide.evaluate(&mut ctx), MatchOutcome::Match);
        assert_eq!(narrowed.evaluate(&mut ctx), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_condition_false_is_not_applicable() {
        let rule = Rule {
            id: "r".into(),
            effect: Effect::Permit,
            target: Target::default(),
            condition: Some(Expression::Literal(Value::Boolean(false))),
            pep_actions: Vec::new(),
        };
        let mut ctx = EvaluationContext::detached();
        assert_eq!(rule.evaluate(&mut ctx).decision, Decision::NotApplicable);
    }

    #[test]
    fn test_failing_obligation_downgrades_rule_and_emits_nothing() {
        let failing = AttributeAssignmentExpr {
            attribute_id: "why".into(),
            category: None,
            issuer: None,
            expr: Expression::Designator(AttributeDesignator {
                key: AttributeKey::new(ids::SUBJECT_CATEGORY, "absent", DataType::String),
                must_be_present: true,
            }),
        };
        let rule = Rule {
            id: "r".into(),
            effect: Effect::Permit,
            target: Target::default(),
            condition: None,
            pep_actions: vec![PepActionExpr {
                kind: PepActionKind::Obligation,
                id: "urn:example:obligation:log".into(),
                applies_to: Effect::Permit,
                assignments: vec![failing],
            }],
        };
        let mut ctx = EvaluationContext::detached();
        let result = rule.evaluate(&mut ctx);
        assert!(matches!(
            result.decision,
            Decision::Indeterminate {
                effect: ExtendedEffect::Permit,
                ..
            }
        ));
        assert!(result.obligations.is_empty());
        assert!(result.advice.is_empty());
    }

    #[test]
    fn test_pep_actions_gated_by_effect() {
        let on_deny = PepActionExpr {
            kind: PepActionKind::Obligation,
            id: "urn:example:obligation:alert".into(),
            applies_to: Effect::Deny,
            assignments: Vec::new(),
        };
        let rule = Rule {
            id: "r".into(),
            effect: Effect::Permit,
            target: Target::default(),
            condition: None,
            pep_actions: vec![on_deny],
        };
        let mut ctx = EvaluationContext::detached();
        let result = rule.evaluate(&mut ctx);
        assert_eq!(result.decision, Decision::Permit);
        assert!(result.obligations.is_empty()); // deny obligation not emitted on permit
    }

    #[test]
    fn test_policy_collects_id_when_applicable() {
        let algs = CombiningAlgRegistry::standard();
        let policy = Policy {
            id: "P1".into(),
            version: PolicyVersion::parse("1.0").unwrap(),
            target: Target::default(),
            variables: Vec::new(),
            algorithm: algs.get("first-applicable").unwrap(),
            rules: vec![Rule {
                id: "r".into(),
                effect: Effect::Permit,
                target: Target::default(),
                condition: None,
                pep_actions: Vec::new(),
            }],
            pep_actions: Vec::new(),
        };
        let mut ctx = EvaluationContext::detached();
        let result = policy.evaluate(&mut ctx);
        assert_eq!(result.decision, Decision::Permit);
        assert_eq!(result.policy_ids.len(), 1);
        assert_eq!(result.policy_ids[0].id, "P1");
    }
}
