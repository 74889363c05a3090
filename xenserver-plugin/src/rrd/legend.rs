//! Legend entries: `<cf>:<host|vm>:<uuid>:<param>`

use super::RrdError;
use std::fmt;
use std::str::FromStr;

/// Which report a column belongs to. The control domain counts as a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    Host,
    Vm,
}

impl Scope {
    pub fn tag(self) -> &'static str {
        match self {
            Scope::Host => "host",
            Scope::Vm => "vm",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Consolidation function, e.g. `AVERAGE`
    pub cf: String,
    pub scope: Scope,
    pub entity_id: String,
    pub param: String,
}

impl FromStr for ColumnDescriptor {
    type Err = RrdError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = entry.split(':').collect();
        let [cf, scope, entity_id, param] = fields.as_slice() else {
            return Err(RrdError::MalformedLegend {
                entry: entry.to_string(),
                fields: fields.len(),
            });
        };

        let scope = match *scope {
            "host" => Scope::Host,
            "vm" => Scope::Vm,
            other => {
                return Err(RrdError::UnknownScope {
                    entry: entry.to_string(),
                    scope: other.to_string(),
                })
            }
        };

        Ok(Self {
            cf: cf.to_string(),
            scope,
            entity_id: entity_id.to_string(),
            param: param.to_string(),
        })
    }
}

/// Parse every legend entry, in column order
pub fn resolve<S: AsRef<str>>(legend: &[S]) -> Result<Vec<ColumnDescriptor>, RrdError> {
    legend.iter().map(|entry| entry.as_ref().parse()).collect()
}
