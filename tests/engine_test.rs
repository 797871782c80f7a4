//! End-to-end engine tests: KDL policy documents in, decision responses
//! out.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use meridian::combining::CombiningAlgRegistry;
use meridian::content::{DotPathEngine, PathCache};
use meridian::function::FunctionRegistry;
use meridian::loader::PolicyLoader;
use meridian::pdp::PdpEngine;
use meridian::provider::{AttributeProvider, CountingAttributeProvider};
use meridian::request::{DecisionRequest, ResponseDecision};
use meridian::value::{ids, AttributeKey, Bag, DataType, Value};

const MISSING_ATTRIBUTE: &str = "urn:oasis:names:tc:xacml:1.0:status:missing-attribute";
const PROCESSING_ERROR: &str = "urn:oasis:names:tc:xacml:1.0:status:processing-error";

struct TestPdp {
    functions: FunctionRegistry,
    algorithms: CombiningAlgRegistry,
    static_references: bool,
    enable_paths: bool,
}

impl Default for TestPdp {
    fn default() -> Self {
        Self {
            functions: FunctionRegistry::standard(),
            algorithms: CombiningAlgRegistry::standard(),
            static_references: true,
            enable_paths: false,
        }
    }
}

impl TestPdp {
    fn dynamic() -> Self {
        Self {
            static_references: false,
            ..Self::default()
        }
    }

    fn with_paths() -> Self {
        Self {
            enable_paths: true,
            ..Self::default()
        }
    }

    fn engine(&self, documents: &[&str]) -> PdpEngine {
        let paths = self
            .enable_paths
            .then(|| Arc::new(PathCache::new(Arc::new(DotPathEngine))));
        let loader = PolicyLoader {
            functions: &self.functions,
            algorithms: &self.algorithms,
            paths: paths.clone(),
            max_policy_set_ref_depth: 10,
            max_variable_ref_depth: 10,
            static_references: self.static_references,
        };
        let sources: Vec<String> = documents.iter().map(|d| d.to_string()).collect();
        let loaded = loader.load_documents(&sources, None).expect("policies load");
        PdpEngine::new(loaded.root)
            .with_paths(paths)
            .with_ref_provider(loaded.store, 10)
    }
}

fn subject_request(name: &str) -> DecisionRequest {
    serde_json::from_value(json!({
        "category": [{
            "category_id": "subject",
            "attribute": [{
                "attribute_id": ids::SUBJECT_ID,
                "value": [name]
            }]
        }]
    }))
    .unwrap()
}

fn empty_request() -> DecisionRequest {
    serde_json::from_value(json!({ "category": [] })).unwrap()
}

const HIBBERT_POLICY: &str = r#"
policy "hibbert" version="1.0" algorithm="deny-overrides" {
    rule "deny-hibbert" effect="deny" {
        target {
            any-of {
                all-of {
                    match function="string-equal" value="J. Hibbert" \
                          category="subject" \
                          attribute="urn:oasis:names:tc:xacml:1.0:subject:subject-id" \
                          must-be-present=true
                }
            }
        }
    }
}
"#;

#[test]
fn test_matching_subject_denied() {
    let engine = TestPdp::default().engine(&[HIBBERT_POLICY]);
    let response = engine.evaluate(&subject_request("J. Hibbert"));
    assert_eq!(response.response[0].decision, ResponseDecision::Deny);

    let response = engine.evaluate(&subject_request("H. Simpson"));
    assert_eq!(response.response[0].decision, ResponseDecision::NotApplicable);
}

#[test]
fn test_missing_required_attribute_reports_detail() {
    let engine = TestPdp::default().engine(&[HIBBERT_POLICY]);
    let result = &engine.evaluate(&empty_request()).response[0];
    assert_eq!(result.decision, ResponseDecision::Indeterminate);
    assert_eq!(result.status.code, MISSING_ATTRIBUTE);
    assert!(result
        .status
        .missing_attribute_detail
        .iter()
        .any(|d| d.attribute_id == ids::SUBJECT_ID));
}

#[test]
fn test_first_applicable_elides_later_children() {
    // P1 is NotApplicable, P2 permits: P3 must never be evaluated, which
    // is observable because only the attribute provider can supply the
    // attribute P3's target needs.
    let documents = r#"
policy-set "root" algorithm="first-applicable" {
    policy "P1" algorithm="first-applicable" {
        rule "r1" effect="permit" {
            target {
                any-of {
                    all-of {
                        match function="string-equal" value="never-matches" \
                              category="subject" \
                              attribute="urn:oasis:names:tc:xacml:1.0:subject:subject-id"
                    }
                }
            }
        }
    }
    policy "P2" algorithm="first-applicable" {
        rule "r2" effect="permit"
    }
    policy "P3" algorithm="first-applicable" {
        rule "r3" effect="deny" {
            target {
                any-of {
                    all-of {
                        match function="string-equal" value="secret" \
                              category="subject" attribute="clearance" \
                              must-be-present=true
                    }
                }
            }
        }
    }
}
"#;
    let clearance_key = AttributeKey::new(ids::SUBJECT_CATEGORY, "clearance", DataType::String);
    let mut supplied = HashMap::new();
    supplied.insert(
        clearance_key,
        Bag::singleton(Value::String("secret".into())),
    );
    let provider = Arc::new(CountingAttributeProvider::new("pip", supplied));

    let engine = TestPdp::default()
        .engine(&[documents])
        .with_providers(vec![provider.clone() as Arc<dyn AttributeProvider>])
        .unwrap();
    let response = engine.evaluate(&subject_request("anyone"));
    assert_eq!(response.response[0].decision, ResponseDecision::Permit);
    assert_eq!(provider.resolutions(), 0, "P3's designators must not be queried");
}

#[test]
fn test_arithmetic_condition() {
    let documents = r#"
policy "age-check" algorithm="first-applicable" {
    rule "old-enough" effect="permit" {
        condition {
            apply "integer-greater-than-or-equal" {
                apply "integer-subtract" {
                    apply "integer-one-and-only" {
                        attribute category="subject" id="age" datatype="integer" \
                                  must-be-present=true
                    }
                    apply "integer-one-and-only" {
                        attribute category="environment" id="bart-age" datatype="integer" \
                                  must-be-present=true
                    }
                }
                integer 5
            }
        }
    }
}
"#;
    let engine = TestPdp::default().engine(&[documents]);
    let request: DecisionRequest = serde_json::from_value(json!({
        "category": [
            {
                "category_id": "subject",
                "attribute": [{ "attribute_id": "age", "data_type": "integer", "value": [17] }]
            },
            {
                "category_id": "environment",
                "attribute": [{ "attribute_id": "bart-age", "data_type": "integer", "value": [10] }]
            }
        ]
    }))
    .unwrap();
    let response = engine.evaluate(&request);
    assert_eq!(response.response[0].decision, ResponseDecision::Permit);

    // 12 - 10 < 5: not applicable
    let request: DecisionRequest = serde_json::from_value(json!({
        "category": [
            {
                "category_id": "subject",
                "attribute": [{ "attribute_id": "age", "data_type": "integer", "value": [12] }]
            },
            {
                "category_id": "environment",
                "attribute": [{ "attribute_id": "bart-age", "data_type": "integer", "value": [10] }]
            }
        ]
    }))
    .unwrap();
    let response = engine.evaluate(&request);
    assert_eq!(response.response[0].decision, ResponseDecision::NotApplicable);
}

#[test]
fn test_variable_evaluated_once_per_request() {
    // Three rules reference the same variable; the attribute behind it is
    // supplied only by the counting provider, so the resolution count
    // shows how often the variable expression actually ran.
    let documents = r#"
policy "memoized" algorithm="deny-overrides" {
    variable "is-doctor" {
        apply "string-is-in" {
            string "doctor"
            attribute category="subject" id="role" datatype="string"
        }
    }
    rule "r1" effect="permit" { condition { variable-ref "is-doctor" } }
    rule "r2" effect="permit" { condition { variable-ref "is-doctor" } }
    rule "r3" effect="permit" { condition { variable-ref "is-doctor" } }
}
"#;
    let role_key = AttributeKey::new(ids::SUBJECT_CATEGORY, "role", DataType::String);
    let mut supplied = HashMap::new();
    supplied.insert(role_key, Bag::singleton(Value::String("nurse".into())));
    let provider = Arc::new(CountingAttributeProvider::new("pip", supplied));

    let engine = TestPdp::default()
        .engine(&[documents])
        .with_providers(vec![provider.clone() as Arc<dyn AttributeProvider>])
        .unwrap();
    // All three rules' conditions are false, so every rule evaluates and
    // references the variable.
    let response = engine.evaluate(&empty_request());
    assert_eq!(response.response[0].decision, ResponseDecision::NotApplicable);
    assert_eq!(provider.resolutions(), 1, "variable must be evaluated exactly once");
}

#[test]
fn test_lenient_issuer_designator_unions_across_issuers() {
    // `role` arrives both without an issuer and issued by idp-a; an
    // issuer-less designator must see the union of both bags.
    let documents = r#"
policy "role-check" algorithm="first-applicable" {
    rule "doctors-only" effect="permit" {
        condition {
            apply "string-is-in" {
                string "doctor"
                attribute category="subject" id="role" datatype="string"
            }
        }
    }
}
"#;
    let engine = TestPdp::default().engine(&[documents]);
    let request: DecisionRequest = serde_json::from_value(json!({
        "category": [{
            "category_id": "subject",
            "attribute": [
                { "attribute_id": "role", "value": ["nurse"] },
                { "attribute_id": "role", "issuer": "idp-a", "value": ["doctor"] }
            ]
        }]
    }))
    .unwrap();
    let response = engine.evaluate(&request);
    assert_eq!(response.response[0].decision, ResponseDecision::Permit);
}

#[test]
fn test_dynamic_reference_cycle_is_processing_error() {
    let documents = r#"
policy-set "A" algorithm="deny-overrides" {
    policy-set-ref "B"
}
policy-set "B" algorithm="deny-overrides" {
    policy-set-ref "A"
}
"#;
    let engine = TestPdp::dynamic().engine(&[documents]);
    let result = &engine.evaluate(&empty_request()).response[0];
    assert_eq!(result.decision, ResponseDecision::Indeterminate);
    assert_eq!(result.status.code, PROCESSING_ERROR);
    assert!(result
        .status
        .message
        .as_deref()
        .unwrap()
        .contains("cyclic"));
}

#[test]
fn test_deny_overrides_forces_deny() {
    let documents = r#"
policy "mixed" algorithm="deny-overrides" {
    rule "allow" effect="permit"
    rule "forbid" effect="deny"
}
"#;
    let engine = TestPdp::default().engine(&[documents]);
    let response = engine.evaluate(&empty_request());
    assert_eq!(response.response[0].decision, ResponseDecision::Deny);
}

#[test]
fn test_obligations_surface_with_assignments() {
    let documents = r#"
policy "audited" algorithm="first-applicable" {
    rule "allow" effect="permit" {
        obligation "urn:example:obligation:log" applies-to="permit" {
            assignment attribute="reason" { string "granted by audit policy" }
        }
        advice "urn:example:advice:notify" applies-to="permit"
    }
}
"#;
    let engine = TestPdp::default().engine(&[documents]);
    let result = &engine.evaluate(&empty_request()).response[0];
    assert_eq!(result.decision, ResponseDecision::Permit);
    assert_eq!(result.obligations.len(), 1);
    assert_eq!(result.obligations[0].id, "urn:example:obligation:log");
    assert_eq!(
        result.obligations[0].attribute_assignment[0].value,
        "granted by audit policy"
    );
    assert_eq!(result.associated_advice.len(), 1);
}

#[test]
fn test_no_obligations_on_indeterminate() {
    // The rule permits, but its obligation needs an attribute that is
    // absent: the decision downgrades and nothing is emitted.
    let documents = r#"
policy "broken-obligation" algorithm="first-applicable" {
    rule "allow" effect="permit" {
        obligation "urn:example:obligation:tag" applies-to="permit" {
            assignment attribute="who" {
                apply "string-one-and-only" {
                    attribute category="subject" \
                              id="urn:oasis:names:tc:xacml:1.0:subject:subject-id" \
                              datatype="string" must-be-present=true
                }
            }
        }
    }
}
"#;
    let engine = TestPdp::default().engine(&[documents]);
    let result = &engine.evaluate(&empty_request()).response[0];
    assert_eq!(result.decision, ResponseDecision::Indeterminate);
    assert!(result.obligations.is_empty());
    assert!(result.associated_advice.is_empty());
}

#[test]
fn test_policy_id_list_when_requested() {
    let documents = r#"
policy-set "root" algorithm="first-applicable" {
    policy "inner" version="2.1" algorithm="first-applicable" {
        rule "allow" effect="permit"
    }
}
"#;
    let engine = TestPdp::default().engine(&[documents]);
    let request: DecisionRequest = serde_json::from_value(json!({
        "return_policy_id_list": true,
        "category": []
    }))
    .unwrap();
    let result = &engine.evaluate(&request).response[0];
    let ids: Vec<(&str, &str)> = result
        .policy_id_list
        .as_ref()
        .unwrap()
        .iter()
        .map(|item| (item.kind.as_str(), item.id.as_str()))
        .collect();
    assert_eq!(ids, vec![("PolicySet", "root"), ("Policy", "inner")]);
    assert_eq!(result.policy_id_list.as_ref().unwrap()[1].version, "2.1");
}

#[test]
fn test_selector_reads_request_content() {
    let documents = r#"
policy "content-based" algorithm="first-applicable" {
    rule "self-access" effect="permit" {
        condition {
            apply "string-equal" {
                apply "string-one-and-only" {
                    attribute category="subject" \
                              id="urn:oasis:names:tc:xacml:1.0:subject:subject-id" \
                              datatype="string" must-be-present=true
                }
                apply "string-one-and-only" {
                    selector category="resource" path="record.patient" datatype="string" \
                             must-be-present=true
                }
            }
        }
    }
}
"#;
    let engine = TestPdp::with_paths().engine(&[documents]);
    let request: DecisionRequest = serde_json::from_value(json!({
        "category": [
            {
                "category_id": "subject",
                "attribute": [{ "attribute_id": ids::SUBJECT_ID, "value": ["bart"] }]
            },
            {
                "category_id": "resource",
                "content": { "record": { "patient": "bart" } },
                "attribute": []
            }
        ]
    }))
    .unwrap();
    let response = engine.evaluate(&request);
    assert_eq!(response.response[0].decision, ResponseDecision::Permit);

    let other: DecisionRequest = serde_json::from_value(json!({
        "category": [
            {
                "category_id": "subject",
                "attribute": [{ "attribute_id": ids::SUBJECT_ID, "value": ["homer"] }]
            },
            {
                "category_id": "resource",
                "content": { "record": { "patient": "bart" } },
                "attribute": []
            }
        ]
    }))
    .unwrap();
    let response = engine.evaluate(&other);
    assert_eq!(response.response[0].decision, ResponseDecision::NotApplicable);
}

#[test]
fn test_current_time_attributes_are_available() {
    // The PDP seeds current-dateTime/date/time from one clock sample; a
    // policy comparing current-date to a far-future bound permits.
    let documents = r#"
policy "before-3000" algorithm="first-applicable" {
    rule "allow" effect="permit" {
        condition {
            apply "date-less-than" {
                apply "date-one-and-only" {
                    attribute category="environment" \
                              id="urn:oasis:names:tc:xacml:1.0:environment:current-date" \
                              datatype="date" must-be-present=true
                }
                value "3000-01-01" datatype="date"
            }
        }
    }
}
"#;
    let engine = TestPdp::default().engine(&[documents]);
    let response = engine.evaluate(&empty_request());
    assert_eq!(response.response[0].decision, ResponseDecision::Permit);
}

#[test]
fn test_responses_are_deterministic() {
    let engine = TestPdp::default().engine(&[HIBBERT_POLICY]);
    let request = subject_request("J. Hibbert");
    let first = serde_json::to_string(&engine.evaluate(&request)).unwrap();
    let second = serde_json::to_string(&engine.evaluate(&request)).unwrap();
    assert_eq!(first, second);
}
