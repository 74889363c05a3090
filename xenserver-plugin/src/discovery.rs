//! Entity naming for a connected XenServer host
//!
//! This module handles:
//! - Host uuid → hostname
//! - VM uuid → name label (the control domain becomes `<hostname>_control-domain`)
//! - Fallback to the raw uuid for anything unknown

use crate::xapi::{XapiClient, XapiError};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityNameMap {
    hostname: String,
    host_uuid: String,
    names: HashMap<String, String>,
}

impl EntityNameMap {
    /// Query the host and VM records for a fresh session
    pub async fn discover(client: &XapiClient, session: &str) -> Result<Self, XapiError> {
        let host_ref = client
            .host_refs(session)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| XapiError::Protocol {
                method: "host.get_all".to_string(),
                reason: "no host returned".to_string(),
            })?;

        let host_uuid = client.host_uuid(session, &host_ref).await?;
        let hostname = client.host_hostname(session, &host_ref).await?;
        let mut map = Self::new(&host_uuid, &hostname);

        for vm in client.vm_records(session).await? {
            map.add_vm(&vm.uuid, &vm.name_label, vm.is_control_domain);
        }

        info!(host = %map.hostname, host_uuid = %map.host_uuid, vms = map.names.len().saturating_sub(1), "Discovered entities");
        Ok(map)
    }

    pub fn new(host_uuid: &str, hostname: &str) -> Self {
        let mut names = HashMap::new();
        names.insert(host_uuid.to_string(), hostname.to_string());
        Self {
            hostname: hostname.to_string(),
            host_uuid: host_uuid.to_string(),
            names,
        }
    }

    pub fn add_vm(&mut self, uuid: &str, name_label: &str, is_control_domain: bool) {
        let name = if is_control_domain {
            format!("{}_control-domain", self.hostname)
        } else {
            name_label.to_string()
        };
        debug!(uuid, name = %name, "VM name");
        self.names.insert(uuid.to_string(), name);
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn host_uuid(&self) -> &str {
        &self.host_uuid
    }

    /// Human readable name, or the uuid itself when unknown
    pub fn name_of<'a>(&'a self, uuid: &'a str) -> &'a str {
        self.names.get(uuid).map(String::as_str).unwrap_or(uuid)
    }
}
