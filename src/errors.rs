use miette::Diagnostic;
use thiserror::Error;

use crate::value::DataType;

/// XACML standard status code URIs surfaced on every `Indeterminate` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    MissingAttribute,
    SyntaxError,
    ProcessingError,
}

impl StatusCode {
    pub fn uri(self) -> &'static str {
        match self {
            StatusCode::Ok => "urn:oasis:names:tc:xacml:1.0:status:ok",
            StatusCode::MissingAttribute => {
                "urn:oasis:names:tc:xacml:1.0:status:missing-attribute"
            }
            StatusCode::SyntaxError => "urn:oasis:names:tc:xacml:1.0:status:syntax-error",
            StatusCode::ProcessingError => {
                "urn:oasis:names:tc:xacml:1.0:status:processing-error"
            }
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.uri())
    }
}

/// Names the attribute a designator or selector required but could not find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingAttributeDetail {
    pub category: String,
    pub attribute_id: String,
    pub datatype: DataType,
    pub issuer: Option<String>,
}

/// Run-time evaluation failure. Every evaluation function in the engine
/// returns either a value or one of these; nothing in the evaluation path
/// panics.
#[derive(Debug, Clone, PartialEq)]
pub struct IndeterminateError {
    pub code: StatusCode,
    pub message: String,
    pub missing: Vec<MissingAttributeDetail>,
}

impl IndeterminateError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::SyntaxError,
            message: message.into(),
            missing: Vec::new(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::ProcessingError,
            message: message.into(),
            missing: Vec::new(),
        }
    }

    pub fn missing_attribute(detail: MissingAttributeDetail) -> Self {
        Self {
            code: StatusCode::MissingAttribute,
            message: format!(
                "missing attribute `{}` (category `{}`)",
                detail.attribute_id, detail.category
            ),
            missing: vec![detail],
        }
    }

    /// Prefix the message with the evaluation site that observed the error.
    pub fn at(mut self, site: impl std::fmt::Display) -> Self {
        self.message = format!("{site}: {}", self.message);
        self
    }
}

impl std::fmt::Display for IndeterminateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.message, self.code.uri())
    }
}

impl std::error::Error for IndeterminateError {}

/// Load-time failure: the policy document, expression tree, or engine
/// configuration is invalid. Surfaced once, before any request is served.
#[derive(Debug, Error, Diagnostic)]
pub enum PolicyError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(meridian::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(meridian::kdl_parse),
        help("Check your KDL file syntax — see https://kdl.dev for the specification")
    )]
    KdlParse(String),

    #[error("Invalid policy: {0}")]
    #[diagnostic(code(meridian::invalid_policy))]
    InvalidPolicy(String),

    #[error("Unknown function `{0}`")]
    #[diagnostic(
        code(meridian::unknown_function),
        help("Function ids are XACML function URIs or their standard short names")
    )]
    UnknownFunction(String),

    #[error("Unknown datatype `{0}`")]
    #[diagnostic(code(meridian::unknown_datatype))]
    UnknownDatatype(String),

    #[error("Unknown combining algorithm `{0}`")]
    #[diagnostic(code(meridian::unknown_algorithm))]
    UnknownAlgorithm(String),

    #[error("Type error: {0}")]
    #[diagnostic(
        code(meridian::type_error),
        help("Expression trees are statically typed; check argument datatypes and bag-ness against the function signature")
    )]
    TypeMismatch(String),

    #[error("Invalid {datatype} literal `{lexical}`: {message}")]
    #[diagnostic(code(meridian::invalid_literal))]
    InvalidValue {
        datatype: String,
        lexical: String,
        message: String,
    },

    #[error("Undefined variable `{0}`")]
    #[diagnostic(
        code(meridian::undefined_variable),
        help("Variables must be defined before the first rule that references them; forward references are not allowed")
    )]
    UndefinedVariable(String),

    #[error("Variable reference chain starting at `{0}` exceeds the configured depth limit {1}")]
    #[diagnostic(code(meridian::variable_depth))]
    VariableDepthExceeded(String, usize),

    #[error("Cyclic policy reference: {0}")]
    #[diagnostic(code(meridian::reference_cycle))]
    ReferenceCycle(String),

    #[error("Policy reference chain at `{0}` exceeds the configured depth limit {1}")]
    #[diagnostic(code(meridian::reference_depth))]
    ReferenceDepthExceeded(String, usize),

    #[error("Unresolved policy reference `{0}`")]
    #[diagnostic(
        code(meridian::unresolved_reference),
        help("Every statically linked Policy(Set)IdReference must name a policy present in the loaded set, with a version matching the reference constraints")
    )]
    UnresolvedReference(String),

    #[error("Cyclic attribute provider dependency: {0}")]
    #[diagnostic(code(meridian::provider_cycle))]
    ProviderCycle(String),

    #[error("Content paths are disabled: {0}")]
    #[diagnostic(
        code(meridian::content_paths_disabled),
        help("Set `pdp.enable_content_paths = true` to allow selectors and path expressions")
    )]
    ContentPathsDisabled(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(meridian::io))]
    Io(#[from] std::io::Error),
}

impl PolicyError {
    /// Maps a lexical-validation failure raised during evaluation of a
    /// literal at load time into its load-time form.
    pub fn from_lexical(datatype: DataType, lexical: &str, err: &IndeterminateError) -> Self {
        PolicyError::InvalidValue {
            datatype: datatype.short_name().to_string(),
            lexical: lexical.to_string(),
            message: err.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_uris() {
        assert_eq!(
            StatusCode::MissingAttribute.uri(),
            "urn:oasis:names:tc:xacml:1.0:status:missing-attribute"
        );
        assert_eq!(
            StatusCode::SyntaxError.uri(),
            "urn:oasis:names:tc:xacml:1.0:status:syntax-error"
        );
        assert_eq!(
            StatusCode::ProcessingError.uri(),
            "urn:oasis:names:tc:xacml:1.0:status:processing-error"
        );
    }

    #[test]
    fn test_missing_attribute_carries_detail() {
        let err = IndeterminateError::missing_attribute(MissingAttributeDetail {
            category: "urn:oasis:names:tc:xacml:1.0:subject-category:access-subject".into(),
            attribute_id: "urn:oasis:names:tc:xacml:1.0:subject:subject-id".into(),
            datatype: DataType::String,
            issuer: None,
        });
        assert_eq!(err.code, StatusCode::MissingAttribute);
        assert_eq!(err.missing.len(), 1);
        assert!(err.message.contains("subject-id"));
    }

    #[test]
    fn test_at_prefixes_site() {
        let err = IndeterminateError::processing("divide by zero").at("rule `r1`");
        assert_eq!(err.message, "rule `r1`: divide by zero");
    }
}
