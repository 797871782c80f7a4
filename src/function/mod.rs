//! The function registry: every function the expression language can
//! apply, identified by URI, with a typed signature checked at policy
//! load. Three call strategies exist: eager first-order application,
//! short-circuit logical connectives, and the higher-order bag functions.

mod standard;

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::EvaluationContext;
use crate::errors::{IndeterminateError, PolicyError};
use crate::expression::{Expression, Resolved, TypeMeta};
use crate::value::{Bag, DataType, Value};

pub const XACML_1_0_FUNCTION: &str = "urn:oasis:names:tc:xacml:1.0:function:";
pub const XACML_2_0_FUNCTION: &str = "urn:oasis:names:tc:xacml:2.0:function:";
pub const XACML_3_0_FUNCTION: &str = "urn:oasis:names:tc:xacml:3.0:function:";

/// Eager first-order implementation: all arguments are evaluated before
/// the call.
pub type EagerFn =
    Arc<dyn Fn(&[Resolved]) -> Result<Resolved, IndeterminateError> + Send + Sync>;

/// Short-circuit logical connectives.
#[derive(Debug, Clone, Copy)]
pub enum LogicalOp {
    And,
    Or,
    Nof,
}

/// Higher-order bag functions; the first argument at every call site is a
/// function reference.
#[derive(Debug, Clone, Copy)]
pub enum HigherOrderOp {
    AnyOf,
    AllOf,
    AnyOfAny,
    AllOfAny,
    AnyOfAll,
    AllOfAll,
    Map,
}

pub enum FunctionKind {
    Eager(EagerFn),
    Logical(LogicalOp),
    HigherOrder(HigherOrderOp),
}

/// Call signature: fixed leading parameters, an optional variadic tail,
/// and the return type.
#[derive(Debug, Clone)]
pub struct Signature {
    pub params: Vec<TypeMeta>,
    pub variadic: Option<TypeMeta>,
    pub min_variadic: usize,
    pub returns: TypeMeta,
}

impl Signature {
    pub fn fixed(params: Vec<TypeMeta>, returns: TypeMeta) -> Self {
        Self {
            params,
            variadic: None,
            min_variadic: 0,
            returns,
        }
    }

    pub fn variadic(
        params: Vec<TypeMeta>,
        tail: TypeMeta,
        min_tail: usize,
        returns: TypeMeta,
    ) -> Self {
        Self {
            params,
            variadic: Some(tail),
            min_variadic: min_tail,
            returns,
        }
    }
}

pub struct FunctionDef {
    pub id: String,
    pub signature: Signature,
    kind: FunctionKind,
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef").field("id", &self.id).finish()
    }
}

impl FunctionDef {
    pub fn new(id: impl Into<String>, signature: Signature, kind: FunctionKind) -> Self {
        Self {
            id: id.into(),
            signature,
            kind,
        }
    }

    /// The URI fragment after the last colon, used in diagnostics.
    pub fn short_id(&self) -> &str {
        self.id.rsplit(':').next().unwrap_or(&self.id)
    }

    pub fn kind(&self) -> &FunctionKind {
        &self.kind
    }

    /// Static validation of a call site: arity and the type of every
    /// argument expression. Returns the call's static return type.
    pub fn typecheck(&self, args: &[Expression]) -> Result<TypeMeta, PolicyError> {
        match &self.kind {
            FunctionKind::Eager(_) => self.typecheck_eager(args),
            FunctionKind::Logical(op) => self.typecheck_logical(*op, args),
            FunctionKind::HigherOrder(op) => self.typecheck_higher_order(*op, args),
        }
    }

    fn arity_error(&self, args: &[Expression]) -> PolicyError {
        PolicyError::TypeMismatch(format!(
            "function `{}` called with {} arguments",
            self.short_id(),
            args.len()
        ))
    }

    fn arg_error(&self, index: usize, expected: TypeMeta, actual: TypeMeta) -> PolicyError {
        PolicyError::TypeMismatch(format!(
            "function `{}` argument {} must be {expected}, got {actual}",
            self.short_id(),
            index + 1
        ))
    }

    fn typecheck_eager(&self, args: &[Expression]) -> Result<TypeMeta, PolicyError> {
        let sig = &self.signature;
        let min = sig.params.len() + sig.min_variadic;
        if args.len() < min || (sig.variadic.is_none() && args.len() != sig.params.len()) {
            return Err(self.arity_error(args));
        }
        for (i, arg) in args.iter().enumerate() {
            if matches!(arg, Expression::FunctionRef(_)) {
                return Err(PolicyError::TypeMismatch(format!(
                    "function `{}` does not take a function reference",
                    self.short_id()
                )));
            }
            let expected = sig
                .params
                .get(i)
                .copied()
                .or(sig.variadic)
                .ok_or_else(|| self.arity_error(args))?;
            if arg.meta() != expected {
                return Err(self.arg_error(i, expected, arg.meta()));
            }
        }
        Ok(sig.returns)
    }

    fn typecheck_logical(
        &self,
        op: LogicalOp,
        args: &[Expression],
    ) -> Result<TypeMeta, PolicyError> {
        let boolean = TypeMeta::value(DataType::Boolean);
        let data_args = match op {
            LogicalOp::And | LogicalOp::Or => args,
            LogicalOp::Nof => {
                let first = args.first().ok_or_else(|| self.arity_error(args))?;
                if first.meta() != TypeMeta::value(DataType::Integer) {
                    return Err(self.arg_error(
                        0,
                        TypeMeta::value(DataType::Integer),
                        first.meta(),
                    ));
                }
                &args[1..]
            }
        };
        for (i, arg) in data_args.iter().enumerate() {
            if arg.meta() != boolean {
                return Err(self.arg_error(i, boolean, arg.meta()));
            }
        }
        Ok(boolean)
    }

    fn typecheck_higher_order(
        &self,
        op: HigherOrderOp,
        args: &[Expression],
    ) -> Result<TypeMeta, PolicyError> {
        let Some(Expression::FunctionRef(inner)) = args.first() else {
            return Err(PolicyError::TypeMismatch(format!(
                "function `{}` requires a function reference as its first argument",
                self.short_id()
            )));
        };
        if !matches!(inner.kind, FunctionKind::Eager(_)) || inner.signature.variadic.is_some() {
            return Err(PolicyError::TypeMismatch(format!(
                "function `{}` cannot iterate the non-first-order function `{}`",
                self.short_id(),
                inner.short_id()
            )));
        }
        let inner_params = &inner.signature.params;
        let boolean = TypeMeta::value(DataType::Boolean);

        let expect = |index: usize, expected: TypeMeta| -> Result<(), PolicyError> {
            let actual = args[index].meta();
            if actual != expected {
                Err(self.arg_error(index, expected, actual))
            } else {
                Ok(())
            }
        };

        match op {
            HigherOrderOp::Map => {
                if args.len() != 2 || inner_params.len() != 1 {
                    return Err(self.arity_error(args));
                }
                if inner_params[0].is_bag || inner.signature.returns.is_bag {
                    return Err(PolicyError::TypeMismatch(format!(
                        "`map` requires a primitive-to-primitive function, got `{}`",
                        inner.short_id()
                    )));
                }
                expect(1, TypeMeta::bag(inner_params[0].datatype))?;
                Ok(TypeMeta::bag(inner.signature.returns.datatype))
            }
            HigherOrderOp::AnyOf | HigherOrderOp::AllOf => {
                if args.len() != 3 || inner_params.len() != 2 {
                    return Err(self.arity_error(args));
                }
                if inner.signature.returns != boolean {
                    return Err(PolicyError::TypeMismatch(format!(
                        "`{}` requires a boolean predicate, got `{}`",
                        self.short_id(),
                        inner.short_id()
                    )));
                }
                expect(1, inner_params[0])?;
                expect(2, TypeMeta::bag(inner_params[1].datatype))?;
                Ok(boolean)
            }
            HigherOrderOp::AnyOfAny
            | HigherOrderOp::AllOfAny
            | HigherOrderOp::AnyOfAll
            | HigherOrderOp::AllOfAll => {
                if args.len() != 3 || inner_params.len() != 2 {
                    return Err(self.arity_error(args));
                }
                if inner.signature.returns != boolean {
                    return Err(PolicyError::TypeMismatch(format!(
                        "`{}` requires a boolean predicate, got `{}`",
                        self.short_id(),
                        inner.short_id()
                    )));
                }
                expect(1, TypeMeta::bag(inner_params[0].datatype))?;
                expect(2, TypeMeta::bag(inner_params[1].datatype))?;
                Ok(boolean)
            }
        }
    }

    /// Evaluate a call site. Argument evaluation order is left to right;
    /// the strategy (eager, short-circuit, iterating) is the function's.
    pub fn invoke(
        &self,
        ctx: &mut EvaluationContext,
        args: &[Expression],
    ) -> Result<Resolved, IndeterminateError> {
        match &self.kind {
            FunctionKind::Eager(f) => {
                let mut resolved = Vec::with_capacity(args.len());
                for (i, arg) in args.iter().enumerate() {
                    resolved.push(arg.evaluate(ctx).map_err(|e| {
                        e.at(format!("function `{}` argument {}", self.short_id(), i + 1))
                    })?);
                }
                f(&resolved).map_err(|e| e.at(format!("function `{}`", self.short_id())))
            }
            FunctionKind::Logical(op) => self.invoke_logical(*op, ctx, args),
            FunctionKind::HigherOrder(op) => self.invoke_higher_order(*op, ctx, args),
        }
    }

    /// First-order application over already-resolved values; used by the
    /// higher-order iterators and by target matches.
    pub(crate) fn call_values(&self, values: &[Resolved]) -> Result<Resolved, IndeterminateError> {
        match &self.kind {
            FunctionKind::Eager(f) => f(values),
            _ => Err(IndeterminateError::processing(format!(
                "function `{}` is not first-order",
                self.short_id()
            ))),
        }
    }

    fn invoke_logical(
        &self,
        op: LogicalOp,
        ctx: &mut EvaluationContext,
        args: &[Expression],
    ) -> Result<Resolved, IndeterminateError> {
        let boolean = |b: bool| Ok(Resolved::Value(Value::Boolean(b)));
        match op {
            // `and`: false dominates Indeterminate; `or` symmetric.
            LogicalOp::And => {
                let mut pending: Option<IndeterminateError> = None;
                for arg in args {
                    match arg.evaluate(ctx).and_then(|r| r.boolean()) {
                        Ok(false) => return boolean(false),
                        Ok(true) => {}
                        Err(e) => {
                            if pending.is_none() {
                                pending = Some(e);
                            }
                        }
                    }
                }
                match pending {
                    Some(err) => Err(err),
                    None => boolean(true),
                }
            }
            LogicalOp::Or => {
                let mut pending: Option<IndeterminateError> = None;
                for arg in args {
                    match arg.evaluate(ctx).and_then(|r| r.boolean()) {
                        Ok(true) => return boolean(true),
                        Ok(false) => {}
                        Err(e) => {
                            if pending.is_none() {
                                pending = Some(e);
                            }
                        }
                    }
                }
                match pending {
                    Some(err) => Err(err),
                    None => boolean(false),
                }
            }
            LogicalOp::Nof => {
                let required = args[0].evaluate(ctx)?.expect_value()?.as_integer()?;
                if required < 0 {
                    return Err(IndeterminateError::processing(
                        "n-of requires a non-negative count",
                    ));
                }
                let required = required as usize;
                let rest = &args[1..];
                if required > rest.len() {
                    return Err(IndeterminateError::processing(format!(
                        "n-of requires {required} of only {} arguments",
                        rest.len()
                    )));
                }
                let mut trues = 0usize;
                let mut errors = 0usize;
                let mut pending: Option<IndeterminateError> = None;
                for (i, arg) in rest.iter().enumerate() {
                    match arg.evaluate(ctx).and_then(|r| r.boolean()) {
                        Ok(true) => trues += 1,
                        Ok(false) => {}
                        Err(e) => {
                            errors += 1;
                            if pending.is_none() {
                                pending = Some(e);
                            }
                        }
                    }
                    if trues >= required {
                        return boolean(true);
                    }
                    let remaining = rest.len() - i - 1;
                    if trues + errors + remaining < required {
                        return boolean(false);
                    }
                }
                // Some errored argument could still have satisfied the
                // count, so the outcome is unknowable.
                match pending {
                    Some(err) => Err(err),
                    None => boolean(false),
                }
            }
        }
    }

    fn invoke_higher_order(
        &self,
        op: HigherOrderOp,
        ctx: &mut EvaluationContext,
        args: &[Expression],
    ) -> Result<Resolved, IndeterminateError> {
        let Expression::FunctionRef(inner) = &args[0] else {
            return Err(IndeterminateError::processing(
                "higher-order call without a function reference",
            ));
        };
        let boolean = |b: bool| Ok(Resolved::Value(Value::Boolean(b)));

        let predicate = |a: &Value, b: &Value| -> Result<bool, IndeterminateError> {
            inner
                .call_values(&[Resolved::Value(a.clone()), Resolved::Value(b.clone())])?
                .boolean()
        };

        match op {
            HigherOrderOp::Map => {
                let bag = args[1].evaluate(ctx)?;
                let bag = bag.expect_bag()?;
                let mut out = Vec::with_capacity(bag.len());
                for element in bag {
                    let mapped =
                        inner.call_values(&[Resolved::Value(element.clone())])?;
                    out.push(mapped.expect_value()?.clone());
                }
                Ok(Resolved::Bag(Bag::of(
                    self.signature_return_elem(inner),
                    out,
                )?))
            }
            HigherOrderOp::AnyOf | HigherOrderOp::AllOf => {
                let value = args[1].evaluate(ctx)?;
                let value = value.expect_value()?;
                let bag = args[2].evaluate(ctx)?;
                let bag = bag.expect_bag()?;
                let mut pending = None;
                for element in bag {
                    match predicate(value, element) {
                        Ok(true) if matches!(op, HigherOrderOp::AnyOf) => return boolean(true),
                        Ok(false) if matches!(op, HigherOrderOp::AllOf) => {
                            return boolean(false)
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if pending.is_none() {
                                pending = Some(e);
                            }
                        }
                    }
                }
                match (pending, op) {
                    (Some(err), _) => Err(err),
                    (None, HigherOrderOp::AnyOf) => boolean(false),
                    (None, _) => boolean(true),
                }
            }
            HigherOrderOp::AnyOfAny
            | HigherOrderOp::AllOfAny
            | HigherOrderOp::AnyOfAll
            | HigherOrderOp::AllOfAll => {
                let first = args[1].evaluate(ctx)?;
                let first = first.expect_bag()?;
                let second = args[2].evaluate(ctx)?;
                let second = second.expect_bag()?;
                fn note(e: IndeterminateError, pending: &mut Option<IndeterminateError>) {
                    if pending.is_none() {
                        *pending = Some(e);
                    }
                }
                // Nesting order: outer loop over the first bag, inner over
                // the second.
                match op {
                    HigherOrderOp::AnyOfAny => {
                        let mut pending = None;
                        for a in first {
                            for b in second {
                                match predicate(a, b) {
                                    Ok(true) => return boolean(true),
                                    Ok(false) => {}
                                    Err(e) => note(e, &mut pending),
                                }
                            }
                        }
                        pending.map_or_else(|| boolean(false), Err)
                    }
                    HigherOrderOp::AllOfAll => {
                        let mut pending = None;
                        for a in first {
                            for b in second {
                                match predicate(a, b) {
                                    Ok(false) => return boolean(false),
                                    Ok(true) => {}
                                    Err(e) => note(e, &mut pending),
                                }
                            }
                        }
                        pending.map_or_else(|| boolean(true), Err)
                    }
                    HigherOrderOp::AllOfAny => {
                        for a in first {
                            let mut matched = false;
                            let mut element_err = None;
                            for b in second {
                                match predicate(a, b) {
                                    Ok(true) => {
                                        matched = true;
                                        break;
                                    }
                                    Ok(false) => {}
                                    Err(e) => note(e, &mut element_err),
                                }
                            }
                            if !matched {
                                return match element_err {
                                    Some(err) => Err(err),
                                    None => boolean(false),
                                };
                            }
                        }
                        boolean(true)
                    }
                    HigherOrderOp::AnyOfAll => {
                        let mut pending = None;
                        for a in first {
                            let mut all = true;
                            for b in second {
                                match predicate(a, b) {
                                    Ok(true) => {}
                                    Ok(false) => {
                                        all = false;
                                        break;
                                    }
                                    Err(e) => {
                                        all = false;
                                        note(e, &mut pending);
                                        break;
                                    }
                                }
                            }
                            if all {
                                return boolean(true);
                            }
                        }
                        pending.map_or_else(|| boolean(false), Err)
                    }
                    _ => unreachable!(),
                }
            }
        }
    }

    fn signature_return_elem(&self, inner: &FunctionDef) -> DataType {
        inner.signature.returns.datatype
    }
}

/// Process-wide registry, built once and shared read-only.
pub struct FunctionRegistry {
    by_id: HashMap<String, Arc<FunctionDef>>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            by_id: HashMap::new(),
        }
    }

    /// The standard XACML function library.
    pub fn standard() -> Self {
        let mut reg = Self::empty();
        standard::install(&mut reg);
        reg
    }

    pub fn register(&mut self, def: FunctionDef) {
        self.by_id.insert(def.id.clone(), Arc::new(def));
    }

    /// Lookup by full URI, or by short name across the standard URI
    /// prefixes.
    pub fn get(&self, name: &str) -> Option<Arc<FunctionDef>> {
        if let Some(def) = self.by_id.get(name) {
            return Some(def.clone());
        }
        if !name.contains(':') {
            for prefix in [XACML_1_0_FUNCTION, XACML_2_0_FUNCTION, XACML_3_0_FUNCTION] {
                if let Some(def) = self.by_id.get(&format!("{prefix}{name}")) {
                    return Some(def.clone());
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
