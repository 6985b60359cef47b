//! Reconcile - Merge what is deployed into what is declared
//!
//! Takes the exported map of deployed resources and fills in remote ids and
//! per-resource modified status on the configuration tree. Every node ends in
//! exactly one of unchanged, created or deleted. Pure; performs no I/O.

use crate::resource::{ExportedResources, ModifiedStatus, ResourceNode, Resources};

/// Merge `remote` into `resources` in place.
///
/// Running it again on its own output with the same `remote` changes nothing.
pub fn reconcile(remote: &ExportedResources, resources: &mut Resources) {
    for (key, state) in remote {
        let nodes = resources.group_mut(key.group);
        match nodes.get_mut(&key.name) {
            Some(node) => node.id = state.id.clone(),
            None => {
                nodes.insert(
                    key.name.clone(),
                    ResourceNode {
                        id: state.id.clone(),
                        modified_status: ModifiedStatus::Deleted,
                        ..Default::default()
                    },
                );
            }
        }
    }

    for node in resources.iter_mut() {
        if node.id.is_empty() && node.modified_status.is_unchanged() {
            node.modified_status = ModifiedStatus::Created;
        }
    }
}

/// Count of resources per modified status after reconciliation
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub unchanged: usize,
    pub created: usize,
    pub deleted: usize,
}

impl ReconcileSummary {
    pub fn from_resources(resources: &Resources) -> Self {
        let mut summary = Self::default();
        for (_, _, node) in resources.iter() {
            match node.modified_status {
                ModifiedStatus::Unchanged => summary.unchanged += 1,
                ModifiedStatus::Created => summary.created += 1,
                ModifiedStatus::Deleted => summary.deleted += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} deployed, {} to delete",
            self.created, self.unchanged, self.deleted
        )
    }
}
