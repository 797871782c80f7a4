//! Rule- and policy-combining algorithms. Each algorithm folds an ordered
//! list of children into one decision, propagating PEP actions only from
//! children whose decision matches the final effect, and eliding further
//! evaluation once the outcome is dominated.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::EvaluationContext;
use crate::errors::IndeterminateError;
use crate::policy::{
    Combinable, Decision, DecisionResult, Effect, ExtendedEffect, MatchOutcome, PepAction,
    PolicyIdEntry,
};

pub const RULE_ALG_3_0: &str = "urn:oasis:names:tc:xacml:3.0:rule-combining-algorithm:";
pub const RULE_ALG_1_0: &str = "urn:oasis:names:tc:xacml:1.0:rule-combining-algorithm:";
pub const POLICY_ALG_3_0: &str = "urn:oasis:names:tc:xacml:3.0:policy-combining-algorithm:";
pub const POLICY_ALG_1_0: &str = "urn:oasis:names:tc:xacml:1.0:policy-combining-algorithm:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombiningKind {
    DenyOverrides,
    PermitOverrides,
    FirstApplicable,
    OnlyOneApplicable,
    DenyUnlessPermit,
    PermitUnlessDeny,
    OnPermitApplySecond,
}

#[derive(Debug)]
pub struct CombiningAlg {
    pub id: String,
    pub kind: CombiningKind,
}

/// Only policy sets may use `only-one-applicable`; `on-permit-apply-second`
/// is likewise a policy-combining algorithm.
impl CombiningAlg {
    pub fn is_policy_only(&self) -> bool {
        matches!(
            self.kind,
            CombiningKind::OnlyOneApplicable | CombiningKind::OnPermitApplySecond
        )
    }

    pub fn combine(
        &self,
        ctx: &mut EvaluationContext,
        children: &[&dyn Combinable],
    ) -> DecisionResult {
        match self.kind {
            CombiningKind::DenyOverrides => overrides(ctx, children, Effect::Deny),
            CombiningKind::PermitOverrides => overrides(ctx, children, Effect::Permit),
            CombiningKind::FirstApplicable => first_applicable(ctx, children),
            CombiningKind::OnlyOneApplicable => only_one_applicable(ctx, children),
            CombiningKind::DenyUnlessPermit => unless(ctx, children, Effect::Permit),
            CombiningKind::PermitUnlessDeny => unless(ctx, children, Effect::Deny),
            CombiningKind::OnPermitApplySecond => on_permit_apply_second(ctx, children),
        }
    }
}

fn finalize(mut result: DecisionResult, ids: Vec<PolicyIdEntry>) -> DecisionResult {
    result.policy_ids = ids;
    result
}

fn indeterminate(
    effect: ExtendedEffect,
    error: IndeterminateError,
    ids: Vec<PolicyIdEntry>,
) -> DecisionResult {
    finalize(DecisionResult::indeterminate(effect, error), ids)
}

/// deny-overrides / permit-overrides: the dominant effect short-circuits;
/// the opposite effect wins only if no Indeterminate could still have
/// produced the dominant one.
fn overrides(
    ctx: &mut EvaluationContext,
    children: &[&dyn Combinable],
    dominant: Effect,
) -> DecisionResult {
    let other = match dominant {
        Effect::Deny => Effect::Permit,
        Effect::Permit => Effect::Deny,
    };

    let mut ids: Vec<PolicyIdEntry> = Vec::new();
    let mut other_obligations: Vec<PepAction> = Vec::new();
    let mut other_advice: Vec<PepAction> = Vec::new();
    let mut saw_other = false;
    let mut indet_dominant: Option<IndeterminateError> = None;
    let mut indet_other: Option<IndeterminateError> = None;
    let mut indet_both: Option<IndeterminateError> = None;
    fn note(slot: &mut Option<IndeterminateError>, e: IndeterminateError) {
        if slot.is_none() {
            *slot = Some(e);
        }
    }

    for child in children {
        let result = child.evaluate(ctx);
        ids.extend(result.policy_ids.iter().cloned());
        match result.decision.clone() {
            Decision::Permit if dominant == Effect::Permit => return finalize(result, ids),
            Decision::Deny if dominant == Effect::Deny => return finalize(result, ids),
            Decision::Permit | Decision::Deny => {
                saw_other = true;
                other_obligations.extend(result.obligations);
                other_advice.extend(result.advice);
            }
            Decision::NotApplicable => {}
            Decision::Indeterminate { effect, error } => match effect {
                ExtendedEffect::Both => note(&mut indet_both, error),
                e if e == dominant.extended() => note(&mut indet_dominant, error),
                _ => note(&mut indet_other, error),
            },
        }
    }

    if let Some(e) = indet_both {
        return indeterminate(ExtendedEffect::Both, e, ids);
    }
    if let Some(e) = indet_dominant {
        let effect = if saw_other || indet_other.is_some() {
            ExtendedEffect::Both
        } else {
            dominant.extended()
        };
        return indeterminate(effect, e, ids);
    }
    if saw_other {
        return finalize(
            DecisionResult::with_effect(other, other_obligations, other_advice),
            ids,
        );
    }
    if let Some(e) = indet_other {
        return indeterminate(other.extended(), e, ids);
    }
    DecisionResult::not_applicable()
}

/// Document order; the first non-NotApplicable child decides.
fn first_applicable(ctx: &mut EvaluationContext, children: &[&dyn Combinable]) -> DecisionResult {
    let mut ids: Vec<PolicyIdEntry> = Vec::new();
    for child in children {
        let result = child.evaluate(ctx);
        ids.extend(result.policy_ids.iter().cloned());
        if result.decision.is_applicable() {
            return finalize(result, ids);
        }
    }
    DecisionResult::not_applicable()
}

/// Exactly one child may be applicable by target; that child decides.
fn only_one_applicable(
    ctx: &mut EvaluationContext,
    children: &[&dyn Combinable],
) -> DecisionResult {
    let mut selected: Option<&dyn Combinable> = None;
    for child in children {
        match child.match_target(ctx) {
            MatchOutcome::NoMatch => {}
            MatchOutcome::Indeterminate(e) => {
                return DecisionResult::indeterminate(ExtendedEffect::Both, e)
            }
            MatchOutcome::Match => {
                if let Some(previous) = selected {
                    return DecisionResult::indeterminate(
                        ExtendedEffect::Both,
                        IndeterminateError::processing(format!(
                            "more than one applicable policy: `{}` and `{}`",
                            previous.label(),
                            child.label()
                        )),
                    );
                }
                selected = Some(*child);
            }
        }
    }
    match selected {
        Some(child) => child.evaluate(ctx),
        None => DecisionResult::not_applicable(),
    }
}

/// deny-unless-permit / permit-unless-deny: the dominant effect
/// short-circuits; everything else collapses to the default effect.
/// Never Indeterminate, never NotApplicable.
fn unless(
    ctx: &mut EvaluationContext,
    children: &[&dyn Combinable],
    dominant: Effect,
) -> DecisionResult {
    let default = match dominant {
        Effect::Permit => Effect::Deny,
        Effect::Deny => Effect::Permit,
    };
    let mut ids: Vec<PolicyIdEntry> = Vec::new();
    let mut default_obligations: Vec<PepAction> = Vec::new();
    let mut default_advice: Vec<PepAction> = Vec::new();
    for child in children {
        let result = child.evaluate(ctx);
        ids.extend(result.policy_ids.iter().cloned());
        match result.decision.clone() {
            Decision::Permit if dominant == Effect::Permit => return finalize(result, ids),
            Decision::Deny if dominant == Effect::Deny => return finalize(result, ids),
            Decision::Permit | Decision::Deny => {
                default_obligations.extend(result.obligations);
                default_advice.extend(result.advice);
            }
            _ => {}
        }
    }
    finalize(
        DecisionResult::with_effect(default, default_obligations, default_advice),
        ids,
    )
}

/// Three-child gate: the first child selects the second on Permit, the
/// third (when present) on Deny or NotApplicable.
fn on_permit_apply_second(
    ctx: &mut EvaluationContext,
    children: &[&dyn Combinable],
) -> DecisionResult {
    if !(2..=3).contains(&children.len()) {
        return DecisionResult::indeterminate(
            ExtendedEffect::Both,
            IndeterminateError::processing(format!(
                "on-permit-apply-second requires 2 or 3 children, got {}",
                children.len()
            )),
        );
    }
    let first = children[0].evaluate(ctx);
    let mut ids = first.policy_ids.clone();
    match first.decision {
        Decision::Permit => {
            let result = children[1].evaluate(ctx);
            ids.extend(result.policy_ids.iter().cloned());
            finalize(result, ids)
        }
        Decision::Deny | Decision::NotApplicable => match children.get(2) {
            Some(third) => {
                let result = third.evaluate(ctx);
                ids.extend(result.policy_ids.iter().cloned());
                finalize(result, ids)
            }
            None => DecisionResult::not_applicable(),
        },
        Decision::Indeterminate { error, .. } => {
            indeterminate(ExtendedEffect::Both, error, ids)
        }
    }
}

// ─── Registry ───────────────────────────────────────────────────────────

/// Process-wide registry of combining algorithms by URI, built once and
/// shared read-only.
pub struct CombiningAlgRegistry {
    by_id: HashMap<String, Arc<CombiningAlg>>,
}

impl CombiningAlgRegistry {
    pub fn empty() -> Self {
        Self {
            by_id: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut reg = Self::empty();
        let both_levels: [(&str, CombiningKind); 6] = [
            ("deny-overrides", CombiningKind::DenyOverrides),
            ("ordered-deny-overrides", CombiningKind::DenyOverrides),
            ("permit-overrides", CombiningKind::PermitOverrides),
            ("ordered-permit-overrides", CombiningKind::PermitOverrides),
            ("deny-unless-permit", CombiningKind::DenyUnlessPermit),
            ("permit-unless-deny", CombiningKind::PermitUnlessDeny),
        ];
        for (name, kind) in both_levels {
            for prefix in [RULE_ALG_3_0, POLICY_ALG_3_0] {
                reg.register(CombiningAlg {
                    id: format!("{prefix}{name}"),
                    kind,
                });
            }
        }
        // Legacy identifiers kept for policies written against the older
        // algorithm URIs.
        for (name, kind) in [
            ("deny-overrides", CombiningKind::DenyOverrides),
            ("ordered-deny-overrides", CombiningKind::DenyOverrides),
            ("permit-overrides", CombiningKind::PermitOverrides),
            ("ordered-permit-overrides", CombiningKind::PermitOverrides),
        ] {
            for prefix in [RULE_ALG_1_0, POLICY_ALG_1_0] {
                reg.register(CombiningAlg {
                    id: format!("{prefix}{name}"),
                    kind,
                });
            }
        }
        for prefix in [RULE_ALG_1_0, POLICY_ALG_1_0] {
            reg.register(CombiningAlg {
                id: format!("{prefix}first-applicable"),
                kind: CombiningKind::FirstApplicable,
            });
        }
        reg.register(CombiningAlg {
            id: format!("{POLICY_ALG_1_0}only-one-applicable"),
            kind: CombiningKind::OnlyOneApplicable,
        });
        reg.register(CombiningAlg {
            id: format!("{POLICY_ALG_3_0}on-permit-apply-second"),
            kind: CombiningKind::OnPermitApplySecond,
        });
        reg
    }

    pub fn register(&mut self, alg: CombiningAlg) {
        self.by_id.insert(alg.id.clone(), Arc::new(alg));
    }

    /// Lookup by full URI, or by short name across the standard prefixes
    /// (rule-level first).
    pub fn get(&self, name: &str) -> Option<Arc<CombiningAlg>> {
        if let Some(alg) = self.by_id.get(name) {
            return Some(alg.clone());
        }
        if !name.contains(':') {
            for prefix in [RULE_ALG_3_0, RULE_ALG_1_0, POLICY_ALG_3_0, POLICY_ALG_1_0] {
                if let Some(alg) = self.by_id.get(&format!("{prefix}{name}")) {
                    return Some(alg.clone());
                }
            }
        }
        None
    }

    /// Lookup restricted to policy-combining URIs, for policy sets.
    pub fn get_policy_alg(&self, name: &str) -> Option<Arc<CombiningAlg>> {
        if let Some(alg) = self.by_id.get(name) {
            return Some(alg.clone());
        }
        if !name.contains(':') {
            for prefix in [POLICY_ALG_3_0, POLICY_ALG_1_0] {
                if let Some(alg) = self.by_id.get(&format!("{prefix}{name}")) {
                    return Some(alg.clone());
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// A child with a fixed outcome that records whether it was evaluated.
    struct Fixed {
        label: &'static str,
        result: DecisionResult,
        target: MatchOutcome,
        evaluated: Cell<usize>,
    }

    impl Fixed {
        fn new(label: &'static str, result: DecisionResult) -> Self {
            Self {
                label,
                result,
                target: MatchOutcome::Match,
                evaluated: Cell::new(0),
            }
        }

        fn not_applicable(label: &'static str) -> Self {
            let mut fixed = Self::new(label, DecisionResult::not_applicable());
            fixed.target = MatchOutcome::NoMatch;
            fixed
        }

        fn permit(label: &'static str) -> Self {
            Self::new(label, DecisionResult::with_effect(Effect::Permit, vec![], vec![]))
        }

        fn deny(label: &'static str) -> Self {
            Self::new(label, DecisionResult::with_effect(Effect::Deny, vec![], vec![]))
        }

        fn indeterminate(label: &'static str, effect: ExtendedEffect) -> Self {
            Self::new(
                label,
                DecisionResult::indeterminate(
                    effect,
                    IndeterminateError::processing("boom"),
                ),
            )
        }
    }

    impl Combinable for Fixed {
        fn evaluate(&self, _ctx: &mut EvaluationContext) -> DecisionResult {
            self.evaluated.set(self.evaluated.get() + 1);
            self.result.clone()
        }

        fn match_target(&self, _ctx: &mut EvaluationContext) -> MatchOutcome {
            self.target.clone()
        }

        fn label(&self) -> &str {
            self.label
        }
    }

    fn combine(kind: CombiningKind, children: &[&Fixed]) -> DecisionResult {
        let alg = CombiningAlg {
            id: "test".into(),
            kind,
        };
        let refs: Vec<&dyn Combinable> = children.iter().map(|c| *c as &dyn Combinable).collect();
        let mut ctx = EvaluationContext::detached();
        alg.combine(&mut ctx, &refs)
    }

    #[test]
    fn test_deny_overrides_deny_wins_and_short_circuits() {
        let a = Fixed::permit("a");
        let b = Fixed::deny("b");
        let c = Fixed::permit("c");
        let result = combine(CombiningKind::DenyOverrides, &[&a, &b, &c]);
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(c.evaluated.get(), 0); // dominated, elided
    }

    #[test]
    fn test_deny_overrides_permit_when_no_deny() {
        let a = Fixed::not_applicable("a");
        let b = Fixed::permit("b");
        let result = combine(CombiningKind::DenyOverrides, &[&a, &b]);
        assert_eq!(result.decision, Decision::Permit);
    }

    #[test]
    fn test_deny_overrides_indeterminate_d_with_permit_is_both() {
        let a = Fixed::indeterminate("a", ExtendedEffect::Deny);
        let b = Fixed::permit("b");
        let result = combine(CombiningKind::DenyOverrides, &[&a, &b]);
        match result.decision {
            Decision::Indeterminate { effect, .. } => assert_eq!(effect, ExtendedEffect::Both),
            other => panic!("expected Indeterminate{{DP}}, got {other:?}"),
        }
    }

    #[test]
    fn test_deny_overrides_indeterminate_d_alone() {
        let a = Fixed::indeterminate("a", ExtendedEffect::Deny);
        let b = Fixed::not_applicable("b");
        let result = combine(CombiningKind::DenyOverrides, &[&a, &b]);
        match result.decision {
            Decision::Indeterminate { effect, .. } => assert_eq!(effect, ExtendedEffect::Deny),
            other => panic!("expected Indeterminate{{D}}, got {other:?}"),
        }
    }

    #[test]
    fn test_permit_overrides_symmetry() {
        let a = Fixed::deny("a");
        let b = Fixed::permit("b");
        let c = Fixed::deny("c");
        let result = combine(CombiningKind::PermitOverrides, &[&a, &b, &c]);
        assert_eq!(result.decision, Decision::Permit);
        assert_eq!(c.evaluated.get(), 0);
    }

    #[test]
    fn test_first_applicable_takes_first_decisive_child() {
        let a = Fixed::not_applicable("a");
        let b = Fixed::permit("b");
        let c = Fixed::deny("c");
        let result = combine(CombiningKind::FirstApplicable, &[&a, &b, &c]);
        assert_eq!(result.decision, Decision::Permit);
        assert_eq!(c.evaluated.get(), 0); // never reached
    }

    #[test]
    fn test_only_one_applicable_selects_single_match() {
        let a = Fixed::not_applicable("a");
        let b = Fixed::deny("b");
        let result = combine(CombiningKind::OnlyOneApplicable, &[&a, &b]);
        assert_eq!(result.decision, Decision::Deny);
    }

    #[test]
    fn test_only_one_applicable_rejects_two_matches() {
        let a = Fixed::permit("a");
        let b = Fixed::deny("b");
        let result = combine(CombiningKind::OnlyOneApplicable, &[&a, &b]);
        match result.decision {
            Decision::Indeterminate { effect, error } => {
                assert_eq!(effect, ExtendedEffect::Both);
                assert!(error.message.contains("more than one"));
            }
            other => panic!("expected Indeterminate, got {other:?}"),
        }
        assert_eq!(a.evaluated.get(), 0); // targets only, no full evaluation
        assert_eq!(b.evaluated.get(), 0);
    }

    #[test]
    fn test_deny_unless_permit_never_indeterminate() {
        let a = Fixed::indeterminate("a", ExtendedEffect::Both);
        let b = Fixed::not_applicable("b");
        let result = combine(CombiningKind::DenyUnlessPermit, &[&a, &b]);
        assert_eq!(result.decision, Decision::Deny);

        let c = Fixed::permit("c");
        let result = combine(CombiningKind::DenyUnlessPermit, &[&a, &c]);
        assert_eq!(result.decision, Decision::Permit);
    }

    #[test]
    fn test_permit_unless_deny_short_circuits_on_deny() {
        let a = Fixed::deny("a");
        let b = Fixed::permit("b");
        let result = combine(CombiningKind::PermitUnlessDeny, &[&a, &b]);
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(b.evaluated.get(), 0);
    }

    #[test]
    fn test_on_permit_apply_second_gates() {
        let gate = Fixed::permit("gate");
        let second = Fixed::deny("second");
        let third = Fixed::permit("third");
        let result =
            combine(CombiningKind::OnPermitApplySecond, &[&gate, &second, &third]);
        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(third.evaluated.get(), 0);

        let no_gate = Fixed::not_applicable("gate");
        let result =
            combine(CombiningKind::OnPermitApplySecond, &[&no_gate, &second, &third]);
        assert_eq!(result.decision, Decision::Permit); // third child applies
        assert_eq!(second.evaluated.get(), 1); // from the first combine only
    }

    #[test]
    fn test_registry_lookup() {
        let reg = CombiningAlgRegistry::standard();
        assert!(reg
            .get("urn:oasis:names:tc:xacml:3.0:rule-combining-algorithm:deny-overrides")
            .is_some());
        assert!(reg.get("first-applicable").is_some());
        assert_eq!(
            reg.get("only-one-applicable").unwrap().kind,
            CombiningKind::OnlyOneApplicable
        );
        assert!(reg.get("no-such-algorithm").is_none());
    }

    #[test]
    fn test_obligations_flow_only_from_matching_children() {
        let obligation = PepAction {
            id: "urn:example:obligation:log".into(),
            assignments: vec![],
        };
        let permit_with_obligation = Fixed::new(
            "p",
            DecisionResult::with_effect(Effect::Permit, vec![obligation.clone()], vec![]),
        );
        let deny_with_obligation = Fixed::new(
            "d",
            DecisionResult::with_effect(
                Effect::Deny,
                vec![PepAction {
                    id: "urn:example:obligation:alert".into(),
                    assignments: vec![],
                }],
                vec![],
            ),
        );
        let result = combine(
            CombiningKind::PermitOverrides,
            &[&deny_with_obligation, &permit_with_obligation],
        );
        assert_eq!(result.decision, Decision::Permit);
        assert_eq!(result.obligations, vec![obligation]); // deny's obligation dropped
    }
}
