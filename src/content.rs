//! Content-path evaluation: the injected capability attribute selectors
//! use to extract nodes from per-category request content, plus the shared
//! compiled-path cache.
//!
//! The engine itself never interprets path syntax; it compiles paths
//! through a `PathEngine` and evaluates the compiled form against a
//! category's content document. The built-in engine understands
//! dot-separated field paths over JSON content; richer engines can be
//! injected at configuration time.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value as Json;

use crate::errors::{IndeterminateError, PolicyError};

/// Compiles path expressions. Compilation failures surface at policy load
/// time as syntax errors.
pub trait PathEngine: Send + Sync {
    fn id(&self) -> &str;

    fn compile(
        &self,
        path: &str,
        namespaces: &[(String, String)],
    ) -> Result<Arc<dyn CompiledPath>, PolicyError>;
}

/// A compiled path expression; evaluation returns the selected node
/// sequence in document order.
pub trait CompiledPath: Send + Sync {
    fn select(&self, content: &Json) -> Result<Vec<Json>, IndeterminateError>;
}

/// Shared cache of compiled paths keyed by `(expression, namespace
/// bindings)`. This is the only shared mutable structure in the engine;
/// the per-key entry lock gives single-flight compilation under
/// concurrent requests.
pub struct PathCache {
    engine: Arc<dyn PathEngine>,
    compiled: DashMap<(String, Vec<(String, String)>), Arc<dyn CompiledPath>>,
}

impl PathCache {
    pub fn new(engine: Arc<dyn PathEngine>) -> Self {
        Self {
            engine,
            compiled: DashMap::new(),
        }
    }

    pub fn engine_id(&self) -> &str {
        self.engine.id()
    }

    pub fn compiled(
        &self,
        path: &str,
        namespaces: &[(String, String)],
    ) -> Result<Arc<dyn CompiledPath>, PolicyError> {
        let key = (path.to_string(), namespaces.to_vec());
        if let Some(hit) = self.compiled.get(&key) {
            return Ok(hit.clone());
        }
        match self.compiled.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let compiled = self.engine.compile(path, namespaces)?;
                entry.insert(compiled.clone());
                Ok(compiled)
            }
        }
    }

    /// Runtime variant for paths that arrive as attribute values rather
    /// than policy text: compile errors become evaluation errors.
    pub fn compiled_at_runtime(
        &self,
        path: &str,
    ) -> Result<Arc<dyn CompiledPath>, IndeterminateError> {
        self.compiled(path, &[])
            .map_err(|e| IndeterminateError::syntax(e.to_string()))
    }
}

// ─── Built-in dot-path engine ───────────────────────────────────────────

/// Default path engine: dot-separated field access over JSON content.
/// `order.items.sku` selects every `sku` under `order.items`, expanding
/// arrays encountered along the way into the node sequence.
pub struct DotPathEngine;

impl PathEngine for DotPathEngine {
    fn id(&self) -> &str {
        "dot-path"
    }

    fn compile(
        &self,
        path: &str,
        _namespaces: &[(String, String)],
    ) -> Result<Arc<dyn CompiledPath>, PolicyError> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PolicyError::InvalidPolicy(format!(
                "invalid content path `{path}`: empty segment"
            )));
        }
        Ok(Arc::new(DotPath { segments }))
    }
}

struct DotPath {
    segments: Vec<String>,
}

impl CompiledPath for DotPath {
    fn select(&self, content: &Json) -> Result<Vec<Json>, IndeterminateError> {
        let mut nodes = vec![content.clone()];
        for segment in &self.segments {
            let mut next = Vec::new();
            for node in &nodes {
                match node {
                    Json::Object(map) => {
                        if let Some(child) = map.get(segment.as_str()) {
                            next.push(child.clone());
                        }
                    }
                    // A numeric segment indexes into an array; any other
                    // segment descends into each element.
                    Json::Array(items) => {
                        if let Ok(index) = segment.parse::<usize>() {
                            if let Some(child) = items.get(index) {
                                next.push(child.clone());
                            }
                        } else {
                            for element in items {
                                if let Json::Object(map) = element {
                                    if let Some(child) = map.get(segment.as_str()) {
                                        next.push(child.clone());
                                    }
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            nodes = next;
        }
        // The selected sequence is the nodes themselves; a trailing array
        // contributes its elements, not one array node.
        let mut out = Vec::new();
        for node in nodes {
            match node {
                Json::Array(items) => out.extend(items),
                other => out.push(other),
            }
        }
        Ok(out)
    }
}
