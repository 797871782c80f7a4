//! The semantic decision request and response model. This is the shape
//! the engine works with after wire parsing: categorized named attributes
//! with lexical values, optional per-category content, and the response
//! with status, PEP actions, echoed attributes, and the policy identifier
//! list.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::value::{AttributeKey, Bag};

// ─── Request ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub return_policy_id_list: bool,
    #[serde(default)]
    pub combined_decision: bool,
    #[serde(default)]
    pub category: Vec<RequestCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCategory {
    /// Full category URI or one of the short names (`subject`, `resource`,
    /// `action`, `environment`).
    pub category_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Json>,
    #[serde(default)]
    pub attribute: Vec<RequestAttribute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAttribute {
    pub attribute_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Datatype URI or short name; defaults to string.
    #[serde(default = "default_data_type")]
    pub data_type: String,
    /// Lexical values; JSON scalars are accepted and printed to their
    /// lexical form before parsing.
    pub value: Vec<Json>,
    #[serde(default)]
    pub include_in_result: bool,
}

fn default_data_type() -> String {
    "string".to_string()
}

/// One atomic evaluation input, produced by the request filter.
#[derive(Debug, Clone)]
pub struct IndividualRequest {
    pub attributes: HashMap<AttributeKey, Bag>,
    pub content: HashMap<String, Json>,
    /// Categories with the attributes to echo back (`include_in_result`).
    pub echo: Vec<RequestCategory>,
    pub return_policy_id_list: bool,
}

impl IndividualRequest {
    /// Canonical key for the decision cache: category, id, datatype,
    /// issuer, and printed values, sorted. Two semantically equal
    /// requests produce the same key.
    pub fn cache_key(&self) -> String {
        let mut entries: Vec<String> = self
            .attributes
            .iter()
            .map(|(key, bag)| {
                let mut values: Vec<String> = bag.iter().map(|v| v.print()).collect();
                values.sort();
                format!("{key}=[{}]", values.join(","))
            })
            .collect();
        entries.sort();
        let mut content_keys: Vec<String> = self
            .content
            .iter()
            .map(|(category, content)| format!("{category}~{content}"))
            .collect();
        content_keys.sort();
        entries.extend(content_keys);
        entries.join(";")
    }
}

// ─── Response ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DecisionResponse {
    pub response: Vec<ResultItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResponseDecision {
    Permit,
    Deny,
    NotApplicable,
    Indeterminate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultItem {
    pub decision: ResponseDecision,
    pub status: StatusItem,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<PepActionItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub associated_advice: Vec<PepActionItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<RequestCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id_list: Option<Vec<PolicyIdItem>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusItem {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_attribute_detail: Vec<MissingDetailItem>,
}

impl StatusItem {
    pub fn ok() -> Self {
        Self {
            code: crate::errors::StatusCode::Ok.uri().to_string(),
            message: None,
            missing_attribute_detail: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingDetailItem {
    pub category: String,
    pub attribute_id: String,
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PepActionItem {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attribute_assignment: Vec<AssignmentItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentItem {
    pub attribute_id: String,
    pub value: String,
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyIdItem {
    pub kind: String,
    pub id: String,
    pub version: String,
}
