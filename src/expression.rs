//! The typed expression tree evaluated inside targets, conditions,
//! variable definitions, and PEP action assignments. Trees are statically
//! type-checked when policies load; run-time type errors in this module
//! indicate an engine bug and surface as processing errors, never panics.

use serde_json::Value as Json;
use std::sync::Arc;

use crate::context::EvaluationContext;
use crate::errors::{IndeterminateError, MissingAttributeDetail, PolicyError};
use crate::function::FunctionDef;
use crate::value::{AttributeKey, Bag, DataType, Value};

/// Static type of an expression node: a primitive datatype plus bag-ness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMeta {
    pub datatype: DataType,
    pub is_bag: bool,
}

impl TypeMeta {
    pub fn value(datatype: DataType) -> Self {
        Self {
            datatype,
            is_bag: false,
        }
    }

    pub fn bag(datatype: DataType) -> Self {
        Self {
            datatype,
            is_bag: true,
        }
    }
}

impl std::fmt::Display for TypeMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_bag {
            write!(f, "bag<{}>", self.datatype)
        } else {
            write!(f, "{}", self.datatype)
        }
    }
}

/// A successfully evaluated expression: either one primitive value or a
/// bag of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Value(Value),
    Bag(Bag),
}

impl Resolved {
    pub fn meta(&self) -> TypeMeta {
        match self {
            Resolved::Value(v) => TypeMeta::value(v.datatype()),
            Resolved::Bag(b) => TypeMeta::bag(b.datatype()),
        }
    }

    pub fn expect_value(&self) -> Result<&Value, IndeterminateError> {
        match self {
            Resolved::Value(v) => Ok(v),
            Resolved::Bag(_) => Err(IndeterminateError::processing(
                "internal type confusion: expected a primitive value, got a bag",
            )),
        }
    }

    pub fn expect_bag(&self) -> Result<&Bag, IndeterminateError> {
        match self {
            Resolved::Bag(b) => Ok(b),
            Resolved::Value(_) => Err(IndeterminateError::processing(
                "internal type confusion: expected a bag, got a primitive value",
            )),
        }
    }

    pub fn boolean(&self) -> Result<bool, IndeterminateError> {
        self.expect_value()?.as_boolean()
    }
}

/// Reference by name to request attributes.
#[derive(Debug, Clone)]
pub struct AttributeDesignator {
    pub key: AttributeKey,
    pub must_be_present: bool,
}

impl AttributeDesignator {
    fn missing_detail(&self) -> MissingAttributeDetail {
        MissingAttributeDetail {
            category: self.key.category.clone(),
            attribute_id: self.key.attribute_id.clone(),
            datatype: self.key.datatype,
            issuer: self.key.issuer.clone(),
        }
    }

    pub fn evaluate(&self, ctx: &mut EvaluationContext) -> Result<Resolved, IndeterminateError> {
        match ctx.attribute(&self.key) {
            Ok(bag) => {
                if bag.is_empty() && self.must_be_present {
                    let detail = self.missing_detail();
                    ctx.note_missing(detail.clone());
                    Err(IndeterminateError::missing_attribute(detail))
                } else {
                    Ok(Resolved::Bag(bag))
                }
            }
            // A provider failure counts as a missing attribute unless the
            // designator requires presence.
            Err(err) => {
                if self.must_be_present {
                    let detail = self.missing_detail();
                    ctx.note_missing(detail.clone());
                    Err(err)
                } else {
                    Ok(Resolved::Bag(Bag::empty(self.key.datatype)))
                }
            }
        }
    }
}

/// Path-based extraction from per-category request content.
#[derive(Debug, Clone)]
pub struct AttributeSelector {
    pub category: String,
    pub path: String,
    pub context_selector_id: Option<String>,
    pub datatype: DataType,
    pub must_be_present: bool,
}

impl AttributeSelector {
    fn missing_detail(&self) -> MissingAttributeDetail {
        MissingAttributeDetail {
            category: self.category.clone(),
            attribute_id: self.path.clone(),
            datatype: self.datatype,
            issuer: None,
        }
    }

    pub fn evaluate(&self, ctx: &mut EvaluationContext) -> Result<Resolved, IndeterminateError> {
        let nodes = self.select_nodes(ctx);
        let bag = match nodes {
            Ok(nodes) => {
                let mut values = Vec::with_capacity(nodes.len());
                for node in nodes {
                    values.push(node_to_value(self.datatype, &node)?);
                }
                Bag::of(self.datatype, values)?
            }
            Err(err) => {
                if self.must_be_present {
                    let detail = self.missing_detail();
                    ctx.note_missing(detail.clone());
                    return Err(err);
                }
                Bag::empty(self.datatype)
            }
        };
        if bag.is_empty() && self.must_be_present {
            let detail = self.missing_detail();
            ctx.note_missing(detail.clone());
            return Err(IndeterminateError::missing_attribute(detail));
        }
        Ok(Resolved::Bag(bag))
    }

    fn select_nodes(&self, ctx: &mut EvaluationContext) -> Result<Vec<Json>, IndeterminateError> {
        let root = match &self.context_selector_id {
            Some(selector_id) => {
                let key = AttributeKey::new(
                    self.category.clone(),
                    selector_id.clone(),
                    DataType::XPathExpression,
                );
                let bag = ctx.attribute(&key)?;
                let path_value = bag.one_and_only()?.as_path_expression()?.clone();
                let content = ctx.content(&self.category).cloned().unwrap_or(Json::Null);
                let compiled = ctx.paths()?.compiled_at_runtime(&path_value.path)?;
                let mut nodes = compiled.select(&content)?;
                if nodes.len() != 1 {
                    return Err(IndeterminateError::processing(format!(
                        "context selector `{selector_id}` must select exactly one node, got {}",
                        nodes.len()
                    )));
                }
                nodes.remove(0)
            }
            None => ctx.content(&self.category).cloned().unwrap_or(Json::Null),
        };
        let compiled = ctx.paths()?.compiled_at_runtime(&self.path)?;
        compiled.select(&root)
    }
}

fn node_to_value(datatype: DataType, node: &Json) -> Result<Value, IndeterminateError> {
    let lexical = match node {
        Json::String(s) => s.clone(),
        Json::Number(n) => n.to_string(),
        Json::Bool(b) => b.to_string(),
        other => {
            return Err(IndeterminateError::processing(format!(
                "selected node is not a scalar: {other}"
            )))
        }
    };
    Value::parse(datatype, &lexical)
}

/// A named expression shared by the rules of one policy. Evaluated at most
/// once per request through the context's memo; `scope_key` is unique
/// across the whole policy tree.
#[derive(Debug)]
pub struct VariableDef {
    pub id: String,
    pub scope_key: String,
    pub expr: Expression,
    pub meta: TypeMeta,
}

/// The expression tree. Closed-world: dispatch is by tag, not by
/// inheritance.
#[derive(Debug, Clone)]
pub enum Expression {
    Literal(Value),
    /// Produced only by constant folding of bag-valued static subtrees.
    BagLiteral(Bag),
    Designator(AttributeDesignator),
    Selector(AttributeSelector),
    VariableReference(Arc<VariableDef>),
    Apply(Arc<ApplyExpr>),
    /// Function reference argument of a higher-order apply; evaluating it
    /// directly is rejected by the static type check.
    FunctionRef(Arc<FunctionDef>),
}

/// A function application, type-checked at construction.
#[derive(Debug)]
pub struct ApplyExpr {
    pub function: Arc<FunctionDef>,
    pub args: Vec<Expression>,
    pub returns: TypeMeta,
}

impl ApplyExpr {
    pub fn new(function: Arc<FunctionDef>, args: Vec<Expression>) -> Result<Self, PolicyError> {
        let returns = function.typecheck(&args)?;
        Ok(Self {
            function,
            args,
            returns,
        })
    }
}

impl Expression {
    pub fn apply(function: Arc<FunctionDef>, args: Vec<Expression>) -> Result<Self, PolicyError> {
        Ok(Expression::Apply(Arc::new(ApplyExpr::new(function, args)?)))
    }

    pub fn meta(&self) -> TypeMeta {
        match self {
            Expression::Literal(v) => TypeMeta::value(v.datatype()),
            Expression::BagLiteral(b) => TypeMeta::bag(b.datatype()),
            Expression::Designator(d) => TypeMeta::bag(d.key.datatype),
            Expression::Selector(s) => TypeMeta::bag(s.datatype),
            Expression::VariableReference(def) => def.meta,
            Expression::Apply(apply) => apply.returns,
            Expression::FunctionRef(f) => f.signature.returns,
        }
    }

    pub fn evaluate(&self, ctx: &mut EvaluationContext) -> Result<Resolved, IndeterminateError> {
        match self {
            Expression::Literal(v) => Ok(Resolved::Value(v.clone())),
            Expression::BagLiteral(b) => Ok(Resolved::Bag(b.clone())),
            Expression::Designator(d) => d.evaluate(ctx),
            Expression::Selector(s) => s.evaluate(ctx),
            Expression::VariableReference(def) => ctx.variable(def),
            Expression::Apply(apply) => apply.function.invoke(ctx, &apply.args),
            Expression::FunctionRef(f) => Err(IndeterminateError::processing(format!(
                "function reference `{}` evaluated outside a higher-order apply",
                f.id
            ))),
        }
    }

    /// True when the subtree has no free designators, selectors, or
    /// variable references, so its value is the same in every request.
    pub fn is_static(&self) -> bool {
        match self {
            Expression::Literal(_) | Expression::BagLiteral(_) | Expression::FunctionRef(_) => {
                true
            }
            Expression::Designator(_)
            | Expression::Selector(_)
            | Expression::VariableReference(_) => false,
            Expression::Apply(apply) => apply.args.iter().all(Expression::is_static),
        }
    }

    /// Constant folding: evaluate static apply subtrees once at load time
    /// and replace them with literals. A static subtree that fails to
    /// evaluate is a load error.
    pub fn fold(self) -> Result<Expression, PolicyError> {
        match self {
            Expression::Apply(apply) => {
                let folded_args: Vec<Expression> = apply
                    .args
                    .iter()
                    .cloned()
                    .map(Expression::fold)
                    .collect::<Result<_, _>>()?;
                let refolded = Arc::new(ApplyExpr {
                    function: apply.function.clone(),
                    args: folded_args,
                    returns: apply.returns,
                });
                let expr = Expression::Apply(refolded);
                if !expr.is_static() {
                    return Ok(expr);
                }
                let mut ctx = EvaluationContext::detached();
                match expr.evaluate(&mut ctx) {
                    Ok(Resolved::Value(v)) => Ok(Expression::Literal(v)),
                    Ok(Resolved::Bag(b)) => Ok(Expression::BagLiteral(b)),
                    Err(err) => Err(PolicyError::InvalidPolicy(format!(
                        "constant expression fails to evaluate: {err}"
                    ))),
                }
            }
            other => Ok(other),
        }
    }
}
