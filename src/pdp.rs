//! The PDP façade: per-request orchestration. A decision request is
//! filtered into individual requests, each context is seeded with the
//! PDP-issued clock attributes from one sample, the decision cache is
//! consulted, the root policy evaluates, and results pass through the
//! result filter.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Timelike, Utc};
use dashmap::DashMap;
use serde_json::Value as Json;

use crate::content::PathCache;
use crate::context::EvaluationContext;
use crate::errors::{IndeterminateError, MissingAttributeDetail, PolicyError, StatusCode};
use crate::policy::{Decision, DecisionResult, PepAction, RootPolicy};
use crate::provider::{check_dependency_cycles, AttributeProvider};
use crate::reference::RefPolicyProvider;
use crate::request::{
    AssignmentItem, DecisionRequest, DecisionResponse, IndividualRequest, MissingDetailItem,
    PepActionItem, PolicyIdItem, RequestCategory, ResponseDecision, ResultItem, StatusItem,
};
use crate::value::temporal::DateTimeValue;
use crate::value::{ids, AttributeKey, Bag, DataType, Value};

// ─── Request filter ─────────────────────────────────────────────────────

/// Turns one decision request into its individual decision requests.
/// `Lax` merges duplicate attribute keys into one bag; `Strict` rejects
/// them. Multiple-decision splitting is out of scope: both filters
/// produce exactly one individual request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFilter {
    Lax,
    Strict,
}

impl RequestFilter {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "lax" => Some(RequestFilter::Lax),
            "strict" => Some(RequestFilter::Strict),
            _ => None,
        }
    }

    pub fn filter(
        &self,
        request: &DecisionRequest,
    ) -> Result<Vec<IndividualRequest>, IndeterminateError> {
        let mut attributes: HashMap<AttributeKey, Bag> = HashMap::new();
        let mut content: HashMap<String, Json> = HashMap::new();
        let mut echo: Vec<RequestCategory> = Vec::new();

        for category in &request.category {
            let category_uri = ids::resolve_category(&category.category_id);

            if let Some(doc) = &category.content {
                if content.insert(category_uri.clone(), doc.clone()).is_some() {
                    return Err(IndeterminateError::syntax(format!(
                        "duplicate content for category `{category_uri}`"
                    )));
                }
            }

            let mut echoed = Vec::new();
            for attribute in &category.attribute {
                let datatype =
                    DataType::resolve(&attribute.data_type).ok_or_else(|| {
                        IndeterminateError::syntax(format!(
                            "unknown datatype `{}` on attribute `{}`",
                            attribute.data_type, attribute.attribute_id
                        ))
                    })?;
                let mut values = Vec::with_capacity(attribute.value.len());
                for raw in &attribute.value {
                    values.push(Value::parse(datatype, &scalar_lexical(raw)?)?);
                }
                let bag = Bag::of(datatype, values)?;
                let key = AttributeKey {
                    category: category_uri.clone(),
                    attribute_id: attribute.attribute_id.clone(),
                    datatype,
                    issuer: attribute.issuer.clone(),
                };
                match attributes.get_mut(&key) {
                    None => {
                        attributes.insert(key, bag);
                    }
                    Some(existing) => match self {
                        RequestFilter::Lax => existing.extend(&bag),
                        RequestFilter::Strict => {
                            return Err(IndeterminateError::syntax(format!(
                                "duplicate attribute `{}` in category `{category_uri}`",
                                attribute.attribute_id
                            )))
                        }
                    },
                }
                if attribute.include_in_result {
                    echoed.push(attribute.clone());
                }
            }
            if !echoed.is_empty() {
                echo.push(RequestCategory {
                    category_id: category_uri,
                    content: None,
                    attribute: echoed,
                });
            }
        }

        Ok(vec![IndividualRequest {
            attributes,
            content,
            echo,
            return_policy_id_list: request.return_policy_id_list,
        }])
    }
}

fn scalar_lexical(value: &Json) -> Result<String, IndeterminateError> {
    match value {
        Json::String(s) => Ok(s.clone()),
        Json::Number(n) => Ok(n.to_string()),
        Json::Bool(b) => Ok(b.to_string()),
        other => Err(IndeterminateError::syntax(format!(
            "attribute value must be a scalar, got {other}"
        ))),
    }
}

// ─── Result filter ──────────────────────────────────────────────────────

/// Post-evaluation result processing. The default filter passes results
/// through unchanged and does not support combined decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFilter {
    Default,
}

impl ResultFilter {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "default" => Some(ResultFilter::Default),
            _ => None,
        }
    }

    pub fn supports_combined_decision(&self) -> bool {
        false
    }

    pub fn filter(&self, results: Vec<ResultItem>) -> Vec<ResultItem> {
        results
    }
}

// ─── Decision cache ─────────────────────────────────────────────────────

/// External decision cache contract: one slot per input request, misses
/// as `None`; computed results are written back after evaluation. The
/// engine never interprets cache semantics beyond same-key reuse.
pub trait DecisionCache: Send + Sync {
    fn get_all(&self, requests: &[IndividualRequest]) -> Vec<Option<ResultItem>>;
    fn put_all(&self, fresh: &[(IndividualRequest, ResultItem)]);
}

/// Reference in-memory cache keyed by the canonical request key.
#[derive(Default)]
pub struct MemoryDecisionCache {
    entries: DashMap<String, ResultItem>,
}

impl MemoryDecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DecisionCache for MemoryDecisionCache {
    fn get_all(&self, requests: &[IndividualRequest]) -> Vec<Option<ResultItem>> {
        requests
            .iter()
            .map(|r| self.entries.get(&r.cache_key()).map(|e| e.value().clone()))
            .collect()
    }

    fn put_all(&self, fresh: &[(IndividualRequest, ResultItem)]) {
        for (request, result) in fresh {
            self.entries.insert(request.cache_key(), result.clone());
        }
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────

/// The evaluation engine: stateless across requests and safe to share
/// behind an `Arc` for parallel evaluation.
pub struct PdpEngine {
    root: RootPolicy,
    request_filter: RequestFilter,
    result_filter: ResultFilter,
    providers: Vec<Arc<dyn AttributeProvider>>,
    ref_provider: Option<Arc<dyn RefPolicyProvider>>,
    max_ref_depth: usize,
    strict_issuer: bool,
    paths: Option<Arc<PathCache>>,
    cache: Option<Arc<dyn DecisionCache>>,
}

impl PdpEngine {
    pub fn new(root: RootPolicy) -> Self {
        Self {
            root,
            request_filter: RequestFilter::Lax,
            result_filter: ResultFilter::Default,
            providers: Vec::new(),
            ref_provider: None,
            max_ref_depth: 10,
            strict_issuer: false,
            paths: None,
            cache: None,
        }
    }

    pub fn with_request_filter(mut self, filter: RequestFilter) -> Self {
        self.request_filter = filter;
        self
    }

    pub fn with_result_filter(mut self, filter: ResultFilter) -> Self {
        self.result_filter = filter;
        self
    }

    pub fn with_providers(
        mut self,
        providers: Vec<Arc<dyn AttributeProvider>>,
    ) -> Result<Self, PolicyError> {
        check_dependency_cycles(&providers)?;
        self.providers = providers;
        Ok(self)
    }

    pub fn with_ref_provider(
        mut self,
        provider: Arc<dyn RefPolicyProvider>,
        max_depth: usize,
    ) -> Self {
        self.ref_provider = Some(provider);
        self.max_ref_depth = max_depth;
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

    pub fn with_cache(mut self, cache: Arc<dyn DecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn root_id(&self) -> &str {
        self.root.id()
    }

    /// Evaluate one decision request to a response. Never fails: every
    /// error becomes an Indeterminate result with its status.
    pub fn evaluate(&self, request: &DecisionRequest) -> DecisionResponse {
        if request.combined_decision && !self.result_filter.supports_combined_decision() {
            return DecisionResponse {
                response: vec![error_result(IndeterminateError::syntax(
                    "unsupported feature: combined decision",
                ))],
            };
        }

        let individuals = match self.request_filter.filter(request) {
            Ok(individuals) => individuals,
            Err(e) => {
                tracing::info!(error = %e, "Rejected malformed decision request");
                return DecisionResponse {
                    response: vec![error_result(e)],
                };
            }
        };

        // One clock sample per request; current-date and current-time are
        // projections of the same instant.
        let issued = issued_attributes(now_to_millis());

        let results = match &self.cache {
            Some(cache) => {
                let cached = cache.get_all(&individuals);
                if cached.len() != individuals.len() {
                    tracing::error!(
                        expected = individuals.len(),
                        got = cached.len(),
                        "Invalid decision cache result"
                    );
                    return DecisionResponse {
                        response: vec![error_result(IndeterminateError::processing(
                            "internal error: invalid decision cache result",
                        ))],
                    };
                }
                let mut results = Vec::with_capacity(individuals.len());
                let mut fresh = Vec::new();
                for (individual, hit) in individuals.iter().zip(cached) {
                    match hit {
                        Some(result) => results.push(result),
                        None => {
                            let result = self.evaluate_individual(individual, &issued);
                            fresh.push((individual.clone(), result.clone()));
                            results.push(result);
                        }
                    }
                }
                cache.put_all(&fresh);
                results
            }
            None => individuals
                .iter()
                .map(|individual| self.evaluate_individual(individual, &issued))
                .collect(),
        };

        DecisionResponse {
            response: self.result_filter.filter(results),
        }
    }

    fn evaluate_individual(
        &self,
        individual: &IndividualRequest,
        issued: &HashMap<AttributeKey, Bag>,
    ) -> ResultItem {
        // Request-supplied values take precedence over PDP-issued ones.
        let mut attributes = issued.clone();
        attributes.extend(
            individual
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let mut ctx = EvaluationContext::new(attributes, individual.content.clone())
            .with_providers(self.providers.clone())
            .with_strict_issuer(self.strict_issuer)
            .with_paths(self.paths.clone())
            .with_ref_provider(self.ref_provider.clone(), self.max_ref_depth);

        let result = self.root.evaluate(&mut ctx);
        tracing::debug!(
            root = self.root.id(),
            decision = ?result.decision,
            "Evaluated individual decision request"
        );
        result_item(individual, result, ctx.missing_details())
    }
}

/// Assemble an engine from settings: build the shared registries, load
/// and link the policy directory, and wire the configured filters,
/// providers, and cache.
pub fn build_engine(settings: &crate::settings::Settings) -> Result<PdpEngine, PolicyError> {
    use crate::content::DotPathEngine;
    use crate::loader::PolicyLoader;
    use crate::provider::StaticAttributeProvider;

    let functions = crate::function::FunctionRegistry::standard();
    let algorithms = crate::combining::CombiningAlgRegistry::standard();
    tracing::info!(
        functions = functions.len(),
        "Initialized standard registries"
    );

    let paths = settings
        .pdp
        .enable_content_paths
        .then(|| Arc::new(PathCache::new(Arc::new(DotPathEngine))));

    let loader = PolicyLoader {
        functions: &functions,
        algorithms: &algorithms,
        paths: paths.clone(),
        max_policy_set_ref_depth: settings.pdp.max_policy_set_ref_depth,
        max_variable_ref_depth: settings.pdp.max_variable_reference_depth,
        static_references: settings.pdp.static_references,
    };
    let loaded = loader.load_dir(
        &settings.policies.dir,
        settings.policies.root_id.as_deref(),
    )?;

    let request_filter =
        RequestFilter::from_name(&settings.pdp.request_filter).ok_or_else(|| {
            PolicyError::InvalidPolicy(format!(
                "unknown request filter `{}`",
                settings.pdp.request_filter
            ))
        })?;
    let result_filter =
        ResultFilter::from_name(&settings.pdp.result_filter).ok_or_else(|| {
            PolicyError::InvalidPolicy(format!(
                "unknown result filter `{}`",
                settings.pdp.result_filter
            ))
        })?;

    let mut providers: Vec<Arc<dyn AttributeProvider>> = Vec::new();
    for provider in &settings.pdp.attribute_providers {
        if provider.provider_type != "static" {
            return Err(PolicyError::InvalidPolicy(format!(
                "unknown attribute provider type `{}`",
                provider.provider_type
            )));
        }
        let mut attributes = HashMap::new();
        for attr in &provider.attributes {
            let datatype = DataType::resolve(&attr.datatype)
                .ok_or_else(|| PolicyError::UnknownDatatype(attr.datatype.clone()))?;
            let mut values = Vec::with_capacity(attr.values.len());
            for lexical in &attr.values {
                values.push(
                    Value::parse(datatype, lexical)
                        .map_err(|e| PolicyError::from_lexical(datatype, lexical, &e))?,
                );
            }
            let key = AttributeKey {
                category: ids::resolve_category(&attr.category),
                attribute_id: attr.id.clone(),
                datatype,
                issuer: attr.issuer.clone(),
            };
            attributes.insert(
                key,
                Bag::of(datatype, values)
                    .map_err(|e| PolicyError::InvalidPolicy(e.to_string()))?,
            );
        }
        providers.push(Arc::new(StaticAttributeProvider::new(
            provider.id.clone(),
            attributes,
        )));
    }

    let mut engine = PdpEngine::new(loaded.root)
        .with_request_filter(request_filter)
        .with_result_filter(result_filter)
        .with_strict_issuer(settings.pdp.strict_attribute_issuer_match)
        .with_paths(paths)
        .with_ref_provider(loaded.store.clone(), settings.pdp.max_policy_set_ref_depth)
        .with_providers(providers)?;

    match settings.pdp.decision_cache.as_str() {
        "none" => {}
        "memory" => engine = engine.with_cache(Arc::new(MemoryDecisionCache::new())),
        other => {
            return Err(PolicyError::InvalidPolicy(format!(
                "unknown decision cache `{other}`"
            )))
        }
    }

    Ok(engine)
}

fn now_to_millis() -> DateTimeValue {
    let now = Utc::now();
    let truncated = now
        .with_nanosecond((now.nanosecond() / 1_000_000) * 1_000_000)
        .unwrap_or(now);
    DateTimeValue::new(truncated.naive_utc(), Some(0))
}

/// The PDP-issued environment attributes, all derived from one instant.
fn issued_attributes(sample: DateTimeValue) -> HashMap<AttributeKey, Bag> {
    let mut issued = HashMap::new();
    issued.insert(
        AttributeKey::new(
            ids::ENVIRONMENT_CATEGORY,
            ids::CURRENT_DATETIME,
            DataType::DateTime,
        ),
        Bag::singleton(Value::DateTime(sample.clone())),
    );
    issued.insert(
        AttributeKey::new(ids::ENVIRONMENT_CATEGORY, ids::CURRENT_DATE, DataType::Date),
        Bag::singleton(Value::Date(sample.date_part())),
    );
    issued.insert(
        AttributeKey::new(ids::ENVIRONMENT_CATEGORY, ids::CURRENT_TIME, DataType::Time),
        Bag::singleton(Value::Time(sample.time_part())),
    );
    issued
}

fn error_result(error: IndeterminateError) -> ResultItem {
    ResultItem {
        decision: ResponseDecision::Indeterminate,
        status: status_from(&error, &[]),
        obligations: Vec::new(),
        associated_advice: Vec::new(),
        attributes: Vec::new(),
        policy_id_list: None,
    }
}

fn status_from(error: &IndeterminateError, extra_missing: &[MissingAttributeDetail]) -> StatusItem {
    let mut details: Vec<MissingAttributeDetail> = error.missing.clone();
    for detail in extra_missing {
        if !details.contains(detail) {
            details.push(detail.clone());
        }
    }
    StatusItem {
        code: error.code.uri().to_string(),
        message: Some(error.message.clone()),
        missing_attribute_detail: details
            .into_iter()
            .map(|d| MissingDetailItem {
                category: d.category,
                attribute_id: d.attribute_id,
                data_type: d.datatype.uri().to_string(),
                issuer: d.issuer,
            })
            .collect(),
    }
}

fn pep_items(actions: &[PepAction]) -> Vec<PepActionItem> {
    actions
        .iter()
        .map(|action| PepActionItem {
            id: action.id.clone(),
            attribute_assignment: action
                .assignments
                .iter()
                .map(|a| AssignmentItem {
                    attribute_id: a.attribute_id.clone(),
                    value: a.value.print(),
                    data_type: a.value.datatype().uri().to_string(),
                    category: a.category.clone(),
                    issuer: a.issuer.clone(),
                })
                .collect(),
        })
        .collect()
}

fn result_item(
    individual: &IndividualRequest,
    result: DecisionResult,
    missing: &[MissingAttributeDetail],
) -> ResultItem {
    let (decision, status) = match &result.decision {
        Decision::Permit => (ResponseDecision::Permit, StatusItem::ok()),
        Decision::Deny => (ResponseDecision::Deny, StatusItem::ok()),
        Decision::NotApplicable => (ResponseDecision::NotApplicable, StatusItem::ok()),
        Decision::Indeterminate { error, .. } => {
            debug_assert_ne!(error.code, StatusCode::Ok);
            (ResponseDecision::Indeterminate, status_from(error, missing))
        }
    };
    ResultItem {
        decision,
        status,
        obligations: pep_items(&result.obligations),
        associated_advice: pep_items(&result.advice),
        attributes: individual.echo.clone(),
        policy_id_list: individual.return_policy_id_list.then(|| {
            result
                .policy_ids
                .iter()
                .map(|entry| PolicyIdItem {
                    kind: if entry.is_set { "PolicySet" } else { "Policy" }.to_string(),
                    id: entry.id.clone(),
                    version: entry.version.clone(),
                })
                .collect()
        }),
    }
}
