//! Export - Build the map of deployed resources from remote state
//!
//! Two representations are understood:
//!
//! - **Graph state** (terraform engine): `resources[]` entries with a `type`,
//!   `name`, `mode` and `instances[].attributes`.
//! - **Resource database** (direct engine): a flat `state` object keyed by
//!   `resources.<group>.<name>` holding `__id__` and an optional `etag`.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::resource::{ExportedResources, RemoteResource, ResourceGroup, ResourceKey};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to parse {what}: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid resource key in resource database: {0}")]
    InvalidKey(String),
}

#[derive(Deserialize)]
struct GraphState {
    #[serde(default)]
    resources: Vec<GraphResource>,
}

#[derive(Deserialize)]
struct GraphResource {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    mode: String,
    #[serde(default)]
    instances: Vec<GraphInstance>,
}

#[derive(Deserialize)]
struct GraphInstance {
    #[serde(default)]
    attributes: InstanceAttributes,
}

#[derive(Deserialize, Default)]
struct InstanceAttributes {
    #[serde(default)]
    id: String,
    #[serde(default)]
    etag: Option<String>,
}

/// Build the exported map from graph (terraform) state bytes
pub fn from_graph_state(bytes: &[u8]) -> Result<ExportedResources, ExportError> {
    let state: GraphState = serde_json::from_slice(bytes).map_err(|source| ExportError::Parse {
        what: "graph state",
        source,
    })?;

    let mut exported = ExportedResources::new();
    for resource in state.resources {
        if resource.mode != "managed" {
            continue;
        }

        let Some(group) = ResourceGroup::from_graph_type(&resource.resource_type) else {
            warn!(
                "Skipping unsupported resource type in state: {}.{}",
                resource.resource_type, resource.name
            );
            continue;
        };

        let Some(instance) = resource.instances.into_iter().next() else {
            debug!("{}.{} has no instances", resource.resource_type, resource.name);
            continue;
        };

        exported.insert(
            ResourceKey::new(group, resource.name),
            RemoteResource {
                id: instance.attributes.id,
                etag: instance.attributes.etag,
            },
        );
    }

    Ok(exported)
}

#[derive(Deserialize)]
struct ResourceDatabase {
    #[serde(default)]
    state: BTreeMap<String, DatabaseEntry>,
}

#[derive(Deserialize)]
struct DatabaseEntry {
    #[serde(rename = "__id__")]
    id: String,
    #[serde(default)]
    etag: Option<String>,
}

/// Build the exported map from a direct-engine resource database
pub fn from_resource_database(bytes: &[u8]) -> Result<ExportedResources, ExportError> {
    let db: ResourceDatabase = serde_json::from_slice(bytes).map_err(|source| ExportError::Parse {
        what: "resource database",
        source,
    })?;

    let mut exported = ExportedResources::new();
    for (key, entry) in db.state {
        let mut parts = key.splitn(3, '.');
        let (Some("resources"), Some(group), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ExportError::InvalidKey(key.clone()));
        };

        // Nested keys (e.g. permissions) belong to their parent resource
        if name.contains('.') {
            continue;
        }

        let Some(group) = ResourceGroup::from_key(group) else {
            warn!("Skipping unsupported resource group in state: {}", key);
            continue;
        };

        exported.insert(
            ResourceKey::new(group, name),
            RemoteResource {
                id: entry.id,
                etag: entry.etag,
            },
        );
    }

    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_state_managed_resources() {
        let state = serde_json::json!({
            "version": 4,
            "serial": 7,
            "lineage": "aaaa",
            "resources": [
                {
                    "mode": "managed",
                    "type": "databricks_job",
                    "name": "test_job",
                    "instances": [{"attributes": {"id": "1"}}]
                },
                {
                    "mode": "managed",
                    "type": "databricks_dashboard",
                    "name": "overview",
                    "instances": [{"attributes": {"id": "d1", "etag": "42"}}]
                },
                {
                    "mode": "data",
                    "type": "databricks_job",
                    "name": "lookup",
                    "instances": [{"attributes": {"id": "9"}}]
                }
            ]
        });
        let exported = from_graph_state(state.to_string().as_bytes()).unwrap();

        assert_eq!(exported.len(), 2);
        assert_eq!(
            exported[&ResourceKey::new(ResourceGroup::Jobs, "test_job")],
            RemoteResource::new("1")
        );
        assert_eq!(
            exported[&ResourceKey::new(ResourceGroup::Dashboards, "overview")],
            RemoteResource::new("d1").with_etag("42")
        );
    }

    #[test]
    fn graph_state_skips_unknown_types() {
        let state = serde_json::json!({
            "resources": [
                {
                    "mode": "managed",
                    "type": "databricks_permissions",
                    "name": "job_test_job",
                    "instances": [{"attributes": {"id": "/jobs/1"}}]
                },
                {
                    "mode": "managed",
                    "type": "databricks_pipeline",
                    "name": "empty",
                    "instances": []
                }
            ]
        });
        let exported = from_graph_state(state.to_string().as_bytes()).unwrap();
        assert!(exported.is_empty());
    }

    #[test]
    fn graph_state_without_resources() {
        let exported = from_graph_state(br#"{"serial": 1, "lineage": "x"}"#).unwrap();
        assert!(exported.is_empty());
    }

    #[test]
    fn graph_state_invalid_json() {
        assert!(matches!(
            from_graph_state(b"not json"),
            Err(ExportError::Parse { .. })
        ));
    }

    #[test]
    fn resource_database_entries() {
        let db = serde_json::json!({
            "state": {
                "resources.jobs.test_job": {"__id__": "1", "state": {}},
                "resources.pipelines.ingest": {"__id__": "p-1"},
                "resources.jobs.test_job.permissions": {"__id__": "/jobs/1"},
                "resources.widgets.w": {"__id__": "w"}
            }
        });
        let exported = from_resource_database(db.to_string().as_bytes()).unwrap();

        assert_eq!(exported.len(), 2);
        assert_eq!(
            exported[&ResourceKey::new(ResourceGroup::Jobs, "test_job")].id,
            "1"
        );
        assert_eq!(
            exported[&ResourceKey::new(ResourceGroup::Pipelines, "ingest")].id,
            "p-1"
        );
    }

    #[test]
    fn resource_database_rejects_malformed_key() {
        let db = serde_json::json!({"state": {"jobs.test_job": {"__id__": "1"}}});
        let result = from_resource_database(db.to_string().as_bytes());
        assert!(matches!(result, Err(ExportError::InvalidKey(key)) if key == "jobs.test_job"));
    }
}
