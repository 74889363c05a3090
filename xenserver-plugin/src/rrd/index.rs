//! Per-entity parameter → column lookup tables
//!
//! Rebuilt from the legend every cycle: VMs come and go between queries, so
//! a previous cycle's columns are never reused.

use super::legend::{ColumnDescriptor, Scope};
use super::RrdError;
use std::collections::BTreeMap;

/// Parameter table for one host or VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReport {
    pub uuid: String,
    pub params: BTreeMap<String, usize>,
}

impl EntityReport {
    fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            params: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportIndex {
    vms: BTreeMap<String, EntityReport>,
    host: Option<EntityReport>,
}

impl ReportIndex {
    /// Index every column. Host columns must all carry one uuid, which must
    /// equal `expected_host` when one is given.
    pub fn build(descriptors: &[ColumnDescriptor], expected_host: Option<&str>) -> Result<Self, RrdError> {
        let mut index = Self::default();
        if let Some(uuid) = expected_host {
            index.host = Some(EntityReport::new(uuid));
        }

        for (column, descriptor) in descriptors.iter().enumerate() {
            index.insert(column, descriptor)?;
        }

        // a pinned host that reported nothing this cycle
        if index.host.as_ref().is_some_and(|h| h.params.is_empty()) {
            index.host = None;
        }
        Ok(index)
    }

    /// Record one column. A duplicate parameter overwrites the earlier column.
    pub(crate) fn insert(&mut self, column: usize, descriptor: &ColumnDescriptor) -> Result<(), RrdError> {
        match descriptor.scope {
            Scope::Vm => {
                self.vms
                    .entry(descriptor.entity_id.clone())
                    .or_insert_with(|| EntityReport::new(&descriptor.entity_id))
                    .params
                    .insert(descriptor.param.clone(), column);
            }
            Scope::Host => {
                let host = self
                    .host
                    .get_or_insert_with(|| EntityReport::new(&descriptor.entity_id));
                if host.uuid != descriptor.entity_id {
                    return Err(RrdError::HostIdentityMismatch {
                        expected: host.uuid.clone(),
                        found: descriptor.entity_id.clone(),
                    });
                }
                host.params.insert(descriptor.param.clone(), column);
            }
        }
        Ok(())
    }

    pub fn host(&self) -> Option<&EntityReport> {
        self.host.as_ref()
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host.as_ref().map(|h| h.uuid.as_str())
    }

    /// VM reports ordered by uuid
    pub fn vms(&self) -> impl Iterator<Item = &EntityReport> {
        self.vms.values()
    }
}
