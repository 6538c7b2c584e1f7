//! Template registry, validation, and compilation.

use std::collections::HashMap;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use troupe_models::{TaskTemplate, TemplateNode};

use crate::error::{EngineError, Result};

/// A validated template with its execution order.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub template: TaskTemplate,
    /// Node indices in topological order.
    pub order: Vec<usize>,
    pub checksum: String,
}

/// Content hash over the canonical node serialization.
pub fn checksum(template: &TaskTemplate) -> String {
    let canonical =
        serde_json::to_vec(&template.nodes).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&template.name);
    hasher.update(&template.version);
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

/// Validate a template (unique ids, known dependencies, acyclic) and fix its
/// execution order. A stored checksum that disagrees with the content is
/// fatal: registry drift must never run silently.
pub fn compile(template: &TaskTemplate) -> Result<CompiledTemplate> {
    if template.nodes.is_empty() {
        return Err(EngineError::Template("template has no nodes".into()));
    }

    let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();
    let mut graph: DiGraph<usize, ()> = DiGraph::new();

    for (position, node) in template.nodes.iter().enumerate() {
        if node.id.is_empty() {
            return Err(EngineError::Template("node with empty id".into()));
        }
        if index_of.contains_key(node.id.as_str()) {
            return Err(EngineError::Template(format!(
                "duplicate node id: {}",
                node.id
            )));
        }
        index_of.insert(node.id.as_str(), graph.add_node(position));
    }

    for node in &template.nodes {
        let to = index_of[node.id.as_str()];
        for dep in &node.depends_on {
            let Some(&from) = index_of.get(dep.as_str()) else {
                return Err(EngineError::Template(format!(
                    "node {} depends on unknown id {}",
                    node.id, dep
                )));
            };
            graph.add_edge(from, to, ());
        }
    }

    let sorted = toposort(&graph, None)
        .map_err(|_| EngineError::Template("template contains a cycle".into()))?;
    let order: Vec<usize> = sorted.into_iter().map(|ix| graph[ix]).collect();

    let computed = checksum(template);
    if let Some(stored) = &template.checksum {
        if stored != &computed {
            return Err(EngineError::Template(format!(
                "template {} checksum mismatch: stored {stored}, computed {computed}",
                template.name
            )));
        }
    }

    Ok(CompiledTemplate {
        template: template.clone(),
        order,
        checksum: computed,
    })
}

/// In-memory template registry keyed by name and version.
#[derive(Default)]
pub struct TemplateRegistry {
    templates: DashMap<(String, String), TaskTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, stamping its content checksum.
    pub fn register(&self, mut template: TaskTemplate) {
        template.checksum = Some(checksum(&template));
        self.templates.insert(template.key(), template);
    }

    /// Resolve by name and optional version; no version means the highest
    /// registered version string.
    pub fn resolve(&self, name: &str, version: Option<&str>) -> Option<TaskTemplate> {
        match version {
            Some(version) => self
                .templates
                .get(&(name.to_string(), version.to_string()))
                .map(|t| t.clone()),
            None => self
                .templates
                .iter()
                .filter(|entry| entry.key().0 == name)
                .max_by(|a, b| a.key().1.cmp(&b.key().1))
                .map(|entry| entry.value().clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_.-]+)\}").expect("valid regex"));

/// Substitute `{node_id_results}` from prior node outputs and `{field}` from
/// node context into a prompt template. Unknown placeholders are left as-is.
pub fn substitute(
    template_str: &str,
    node_results: &HashMap<String, String>,
    context: &Map<String, Value>,
) -> String {
    PLACEHOLDER_RE
        .replace_all(template_str, |captures: &regex::Captures<'_>| {
            let key = &captures[1];
            if let Some(node_id) = key.strip_suffix("_results") {
                if let Some(result) = node_results.get(node_id) {
                    return result.clone();
                }
            }
            if let Some(value) = context.get(key) {
                return match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
            }
            captures[0].to_string()
        })
        .into_owned()
}

/// Sanitize one `parallel_by` axis value into an id fragment.
fn sanitize_axis_value(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Expand a node along its `parallel_by` axis: a list in the node context
/// becomes N sibling nodes with sanitized ids `<axis>_<i>_<value>` and the
/// axis field bound per sibling.
pub fn expand_parallel_by(node: &TemplateNode) -> Vec<TemplateNode> {
    let Some(axis) = node.metadata.get("parallel_by").and_then(Value::as_str) else {
        return vec![node.clone()];
    };
    let Some(values) = node.context.get(axis).and_then(Value::as_array) else {
        return vec![node.clone()];
    };
    if values.is_empty() {
        return vec![node.clone()];
    }

    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let mut sibling = node.clone();
            sibling.id = format!("{axis}_{i}_{}", sanitize_axis_value(&rendered));
            sibling
                .context
                .insert(axis.to_string(), value.clone());
            sibling.metadata.remove("parallel_by");
            sibling
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use troupe_models::TemplateNodeKind;

    fn node(id: &str, deps: &[&str]) -> TemplateNode {
        let mut node = TemplateNode::new(id, TemplateNodeKind::Simple);
        node.depends_on = deps.iter().map(|d| d.to_string()).collect();
        node
    }

    fn template(nodes: Vec<TemplateNode>) -> TaskTemplate {
        TaskTemplate {
            name: "t".into(),
            version: "1".into(),
            nodes,
            ..Default::default()
        }
    }

    #[test]
    fn compile_orders_topologically() {
        let compiled = compile(&template(vec![
            node("c", &["b"]),
            node("a", &[]),
            node("b", &["a"]),
        ]))
        .unwrap();
        let ids: Vec<&str> = compiled
            .order
            .iter()
            .map(|&i| compiled.template.nodes[i].id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn compile_rejects_cycles_and_duplicates() {
        let cycle = template(vec![node("a", &["b"]), node("b", &["a"])]);
        assert!(matches!(compile(&cycle), Err(EngineError::Template(_))));

        let dupes = template(vec![node("a", &[]), node("a", &[])]);
        assert!(matches!(compile(&dupes), Err(EngineError::Template(_))));

        let missing = template(vec![node("a", &["ghost"])]);
        assert!(matches!(compile(&missing), Err(EngineError::Template(_))));
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        let mut t = template(vec![node("a", &[])]);
        t.checksum = Some("deadbeef".into());
        let error = compile(&t).unwrap_err();
        assert!(error.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn checksum_is_stable_and_content_sensitive() {
        let t1 = template(vec![node("a", &[])]);
        let t2 = template(vec![node("a", &[])]);
        assert_eq!(checksum(&t1), checksum(&t2));

        let t3 = template(vec![node("b", &[])]);
        assert_ne!(checksum(&t1), checksum(&t3));
    }

    #[test]
    fn registry_resolves_latest_version() {
        let registry = TemplateRegistry::new();
        let mut v1 = template(vec![node("a", &[])]);
        v1.version = "1".into();
        let mut v2 = template(vec![node("a", &[])]);
        v2.version = "2".into();
        registry.register(v1);
        registry.register(v2);

        assert_eq!(registry.resolve("t", None).unwrap().version, "2");
        assert_eq!(registry.resolve("t", Some("1")).unwrap().version, "1");
        assert!(registry.resolve("missing", None).is_none());
    }

    #[test]
    fn substitution_resolves_results_and_fields() {
        let mut node_results = HashMap::new();
        node_results.insert("gather".to_string(), "42 sources".to_string());
        let mut context = Map::new();
        context.insert("region".to_string(), json!("EMEA"));

        let rendered = substitute(
            "Summarize {gather_results} for {region}; keep {unknown}.",
            &node_results,
            &context,
        );
        assert_eq!(rendered, "Summarize 42 sources for EMEA; keep {unknown}.");
    }

    #[test]
    fn parallel_by_expands_with_sanitized_ids() {
        let mut node = TemplateNode::new("probe", TemplateNodeKind::Simple);
        node.metadata
            .insert("parallel_by".to_string(), json!("market"));
        node.context
            .insert("market".to_string(), json!(["US-East", "eu west"]));

        let expanded = expand_parallel_by(&node);
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].id, "market_0_us_east");
        assert_eq!(expanded[1].id, "market_1_eu_west");
        assert_eq!(expanded[0].context["market"], json!("US-East"));
        assert!(expanded[0].metadata.get("parallel_by").is_none());
    }

    #[test]
    fn nodes_without_axis_pass_through() {
        let node = TemplateNode::new("solo", TemplateNodeKind::Simple);
        assert_eq!(expand_parallel_by(&node).len(), 1);
    }
}
