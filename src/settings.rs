use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub policies: Policies,
    pub pdp: Pdp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policies {
    /// Directory of `.kdl` policy documents, loaded in file-name order.
    pub dir: PathBuf,
    /// Root policy(-set) id; defaults to the first top-level declaration.
    pub root_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pdp {
    /// Max length of a Policy(Set)IdReference chain.
    pub max_policy_set_ref_depth: usize,
    /// Max length of a VariableDefinition reference chain.
    pub max_variable_reference_depth: usize,
    /// When false, selectors and path expressions are rejected at load.
    pub enable_content_paths: bool,
    /// When true, a designator without an Issuer only matches attributes
    /// without an Issuer. The lenient default is the standard behavior.
    pub strict_attribute_issuer_match: bool,
    /// When true (default), all policy references are resolved and linked
    /// at load time; when false they resolve per request.
    pub static_references: bool,
    /// `lax` or `strict`.
    pub request_filter: String,
    /// `default`.
    pub result_filter: String,
    /// `none` or `memory`.
    pub decision_cache: String,
    #[serde(default)]
    pub attribute_providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub id: String,
    /// Currently only `static` is built in.
    pub provider_type: String,
    #[serde(default)]
    pub attributes: Vec<StaticAttributeSetting>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticAttributeSetting {
    pub category: String,
    pub id: String,
    #[serde(default = "default_datatype")]
    pub datatype: String,
    pub issuer: Option<String>,
    pub values: Vec<String>,
}

fn default_datatype() -> String {
    "string".to_string()
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("policies"),
            root_id: None,
        }
    }
}

impl Default for Pdp {
    fn default() -> Self {
        Self {
            max_policy_set_ref_depth: 10,
            max_variable_reference_depth: 10,
            enable_content_paths: true,
            strict_attribute_issuer_match: false,
            static_references: true,
            request_filter: "lax".to_string(),
            result_filter: "default".to_string(),
            decision_cache: "none".to_string(),
            attribute_providers: Vec::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let defaults = Pdp::default();
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default(
                "policies.dir",
                Policies::default().dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default(
                "pdp.max_policy_set_ref_depth",
                defaults.max_policy_set_ref_depth as i64,
            )
            .into_diagnostic()?
            .set_default(
                "pdp.max_variable_reference_depth",
                defaults.max_variable_reference_depth as i64,
            )
            .into_diagnostic()?
            .set_default("pdp.enable_content_paths", defaults.enable_content_paths)
            .into_diagnostic()?
            .set_default(
                "pdp.strict_attribute_issuer_match",
                defaults.strict_attribute_issuer_match,
            )
            .into_diagnostic()?
            .set_default("pdp.static_references", defaults.static_references)
            .into_diagnostic()?
            .set_default("pdp.request_filter", defaults.request_filter)
            .into_diagnostic()?
            .set_default("pdp.result_filter", defaults.result_filter)
            .into_diagnostic()?
            .set_default("pdp.decision_cache", defaults.decision_cache)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: MERIDIAN__SERVER__PORT=9090, etc.
        builder =
            builder.add_source(config::Environment::with_prefix("MERIDIAN").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let settings: Settings = cfg.try_deserialize().into_diagnostic()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.pdp.max_policy_set_ref_depth, 10);
        assert!(!settings.pdp.strict_attribute_issuer_match);
        assert!(settings.pdp.static_references);
        assert_eq!(settings.pdp.request_filter, "lax");
        assert_eq!(settings.pdp.decision_cache, "none");
    }
}
