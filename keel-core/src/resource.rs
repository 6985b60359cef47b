//! Resource - Declared resources and their deployed counterparts

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource group a declared resource belongs to (e.g., "jobs", "pipelines")
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceGroup {
    Jobs,
    Pipelines,
    Models,
    Experiments,
    ModelServingEndpoints,
    RegisteredModels,
    QualityMonitors,
    Schemas,
    Volumes,
    Clusters,
    Dashboards,
    Apps,
    SecretScopes,
}

impl ResourceGroup {
    /// Every group the configuration schema defines
    pub const ALL: [ResourceGroup; 13] = [
        ResourceGroup::Jobs,
        ResourceGroup::Pipelines,
        ResourceGroup::Models,
        ResourceGroup::Experiments,
        ResourceGroup::ModelServingEndpoints,
        ResourceGroup::RegisteredModels,
        ResourceGroup::QualityMonitors,
        ResourceGroup::Schemas,
        ResourceGroup::Volumes,
        ResourceGroup::Clusters,
        ResourceGroup::Dashboards,
        ResourceGroup::Apps,
        ResourceGroup::SecretScopes,
    ];

    /// Key used for this group in configuration files and resource databases
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceGroup::Jobs => "jobs",
            ResourceGroup::Pipelines => "pipelines",
            ResourceGroup::Models => "models",
            ResourceGroup::Experiments => "experiments",
            ResourceGroup::ModelServingEndpoints => "model_serving_endpoints",
            ResourceGroup::RegisteredModels => "registered_models",
            ResourceGroup::QualityMonitors => "quality_monitors",
            ResourceGroup::Schemas => "schemas",
            ResourceGroup::Volumes => "volumes",
            ResourceGroup::Clusters => "clusters",
            ResourceGroup::Dashboards => "dashboards",
            ResourceGroup::Apps => "apps",
            ResourceGroup::SecretScopes => "secret_scopes",
        }
    }

    /// Resource type used for this group in the graph (terraform) state
    pub fn graph_type(&self) -> &'static str {
        match self {
            ResourceGroup::Jobs => "databricks_job",
            ResourceGroup::Pipelines => "databricks_pipeline",
            ResourceGroup::Models => "databricks_mlflow_model",
            ResourceGroup::Experiments => "databricks_mlflow_experiment",
            ResourceGroup::ModelServingEndpoints => "databricks_model_serving",
            ResourceGroup::RegisteredModels => "databricks_registered_model",
            ResourceGroup::QualityMonitors => "databricks_quality_monitor",
            ResourceGroup::Schemas => "databricks_schema",
            ResourceGroup::Volumes => "databricks_volume",
            ResourceGroup::Clusters => "databricks_cluster",
            ResourceGroup::Dashboards => "databricks_dashboard",
            ResourceGroup::Apps => "databricks_app",
            ResourceGroup::SecretScopes => "databricks_secret_scope",
        }
    }

    /// Parse a group from its configuration key
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == key)
    }

    /// Map a graph state resource type back to its group
    pub fn from_graph_type(resource_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|g| g.graph_type() == resource_type)
    }
}

impl fmt::Display for ResourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for a resource within a deployment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub group: ResourceGroup,
    /// Resource name (key under the group in configuration)
    pub name: String,
}

impl ResourceKey {
    pub fn new(group: ResourceGroup, name: impl Into<String>) -> Self {
        Self {
            group,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// What the remote side reports as deployed for one resource
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteResource {
    /// Remote identifier (job id, pipeline id, ...)
    pub id: String,
    pub etag: Option<String>,
}

impl RemoteResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// Snapshot of everything currently deployed, keyed by group and name.
///
/// Built fresh from the authoritative remote state on every run.
pub type ExportedResources = BTreeMap<ResourceKey, RemoteResource>;

/// Outcome of reconciling a declared resource against the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModifiedStatus {
    /// Deployed and still declared
    #[default]
    #[serde(rename = "")]
    Unchanged,
    /// Declared but not deployed yet
    #[serde(rename = "created")]
    Created,
    /// Deployed but no longer declared
    #[serde(rename = "deleted")]
    Deleted,
}

impl ModifiedStatus {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, ModifiedStatus::Unchanged)
    }
}

impl fmt::Display for ModifiedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModifiedStatus::Unchanged => f.write_str("unchanged"),
            ModifiedStatus::Created => f.write_str("created"),
            ModifiedStatus::Deleted => f.write_str("deleted"),
        }
    }
}

/// A declared resource in the configuration tree
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceNode {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "ModifiedStatus::is_unchanged")]
    pub modified_status: ModifiedStatus,
    /// User-declared fields, kept verbatim
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ResourceNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// The resource container of the configuration: group -> name -> node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources {
    groups: BTreeMap<ResourceGroup, BTreeMap<String, ResourceNode>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource, replacing any node with the same key
    pub fn insert(&mut self, group: ResourceGroup, name: impl Into<String>, node: ResourceNode) {
        self.group_mut(group).insert(name.into(), node);
    }

    pub fn with_resource(
        mut self,
        group: ResourceGroup,
        name: impl Into<String>,
        node: ResourceNode,
    ) -> Self {
        self.insert(group, name, node);
        self
    }

    /// Group container, if present
    pub fn group(&self, group: ResourceGroup) -> Option<&BTreeMap<String, ResourceNode>> {
        self.groups.get(&group)
    }

    /// Group container, created empty when absent
    pub fn group_mut(&mut self, group: ResourceGroup) -> &mut BTreeMap<String, ResourceNode> {
        self.groups.entry(group).or_default()
    }

    pub fn get(&self, group: ResourceGroup, name: &str) -> Option<&ResourceNode> {
        self.groups.get(&group).and_then(|nodes| nodes.get(name))
    }

    /// Iterate every declared node across all groups
    pub fn iter(&self) -> impl Iterator<Item = (ResourceGroup, &str, &ResourceNode)> {
        self.groups.iter().flat_map(|(group, nodes)| {
            nodes
                .iter()
                .map(move |(name, node)| (*group, name.as_str(), node))
        })
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ResourceNode> {
        self.groups.values_mut().flat_map(|nodes| nodes.values_mut())
    }

    /// Number of declared resources
    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
