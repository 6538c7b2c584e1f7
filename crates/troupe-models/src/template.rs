//! Task templates: pre-compiled DAGs of heterogeneous nodes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a template node executes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemplateNodeKind {
    /// One-shot agent call with the node's tool allowlist.
    #[default]
    Simple,
    /// Named cognitive strategy, subject to budget degradation.
    Cognitive,
    /// Inline DAG: aggregate dependencies or run `metadata.tasks`.
    Dag,
    /// Child supervisor workflow.
    Supervisor,
}

/// One node in a template DAG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateNode {
    /// Unique within the template.
    pub id: String,
    #[serde(default)]
    pub kind: TemplateNodeKind,
    #[serde(default)]
    pub description: String,
    /// Node ids that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub tool_allowlist: Vec<String>,
    /// Strategy name for cognitive nodes.
    #[serde(default)]
    pub strategy: Option<String>,
    /// Token ceiling; cognitive nodes degrade below strategy thresholds.
    #[serde(default)]
    pub budget_max: Option<u64>,
    /// Node-kind specific payload (`tasks`, `prompt_template`,
    /// `parallel_by`, `max_concurrency`, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Values available to `{field}` substitution in `prompt_template`.
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub require_approval: Option<bool>,
}

impl TemplateNode {
    pub fn new(id: impl Into<String>, kind: TemplateNodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            ..Default::default()
        }
    }
}

/// A named, versioned template. The checksum pins registry content; a
/// mismatch between request and registry is fatal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<TemplateNode>,
    /// Hex sha256 of the canonical node serialization.
    #[serde(default)]
    pub checksum: Option<String>,
}

impl TaskTemplate {
    pub fn key(&self) -> (String, String) {
        (self.name.clone(), self.version.clone())
    }
}
