//! Ansible-style host inventories
//!
//! Every `<organization>_hosts.yml` in the inventory directory lists hosts
//! under `all.children.<group>.hosts`. Encrypted values (`!vault`) and other
//! custom tags are carried as opaque tagged values and never interpreted.

use serde::Serialize;
use serde_yaml::Value;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{KubehopError, KubehopResult};

const INVENTORY_SUFFIX: &str = "_hosts.yml";
const VPN_FLAG: &str = "argocd_use_socks5_proxy";

/// How the operator's machine reaches the host's private network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NetworkPolicy {
    Direct,
    /// Needs an sshuttle session covering `range`
    Sshuttle { range: String },
}

/// One selectable host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostTarget {
    pub organization: String,
    pub alias: String,
    pub group: String,
    pub requires_vpn: bool,
    pub network: NetworkPolicy,
}

impl HostTarget {
    pub fn context(&self) -> KubehopResult<Context> {
        Context::for_host(&self.organization, &self.alias)
    }

    /// Short markers shown next to the host in pickers
    pub fn indicators(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.requires_vpn {
            out.push("[VPN]".to_string());
        }
        if let NetworkPolicy::Sshuttle { range } = &self.network {
            out.push(format!("[sshuttle {}]", range));
        }
        out
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.alias, self.group)?;
        for indicator in self.indicators() {
            write!(f, " {}", indicator)?;
        }
        Ok(())
    }
}

/// Hosts of one organization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub organization: String,
    pub path: PathBuf,
    pub hosts: Vec<HostTarget>,
}

/// Load every inventory in `dir`, sorted by organization
///
/// Unparseable files are skipped with a warning. Having no inventory at all
/// is [`KubehopError::NoInventories`].
pub async fn load_inventories(dir: &Path) -> KubehopResult<Vec<Inventory>> {
    if !dir.is_dir() {
        return Err(KubehopError::NoInventories(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| KubehopError::io(format!("reading {}", dir.display()), e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| KubehopError::io("reading inventory entry", e))?
    {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(org) = name.strip_suffix(INVENTORY_SUFFIX) {
            if !org.is_empty() {
                files.push((org.to_string(), path.clone()));
            }
        }
    }
    files.sort();

    let mut inventories = Vec::new();
    for (organization, path) in files {
        let content = match fs::read(&path).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                continue;
            }
        };
        let doc: Value = match serde_yaml::from_slice(&content) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to load {}: {}", path.display(), e);
                continue;
            }
        };
        let hosts = extract_hosts(&organization, &doc);
        debug!("{}: {} hosts", organization, hosts.len());
        inventories.push(Inventory {
            organization,
            path,
            hosts,
        });
    }

    if inventories.is_empty() {
        return Err(KubehopError::NoInventories(dir.to_path_buf()));
    }
    Ok(inventories)
}

/// Hosts of every group, in file order
pub fn extract_hosts(organization: &str, doc: &Value) -> Vec<HostTarget> {
    let all = doc.get("all");
    let global_vars = all.and_then(|a| a.get("vars"));
    let Some(children) = all.and_then(|a| a.get("children")).and_then(Value::as_mapping) else {
        return Vec::new();
    };

    let mut hosts: Vec<HostTarget> = Vec::new();
    for (group_name, group) in children {
        let Some(group_name) = group_name.as_str() else {
            continue;
        };
        let group_vars = group.get("vars");
        let Some(members) = group.get("hosts").and_then(Value::as_mapping) else {
            continue;
        };

        for (alias, host_vars) in members {
            let Some(alias) = alias.as_str() else {
                continue;
            };
            let host_vars = Some(host_vars).filter(|v| !v.is_null());

            let requires_vpn = [host_vars, group_vars, global_vars]
                .into_iter()
                .flatten()
                .find_map(|vars| vars.get(VPN_FLAG))
                .is_some_and(is_truthy);

            let target = HostTarget {
                organization: organization.to_string(),
                alias: alias.to_string(),
                group: group_name.to_string(),
                requires_vpn,
                network: network_policy(host_vars),
            };
            // A host listed under several groups keeps its first position
            // and takes the last group's settings
            match hosts.iter_mut().find(|h| h.alias == target.alias) {
                Some(existing) => *existing = target,
                None => hosts.push(target),
            }
        }
    }
    hosts
}

fn network_policy(host_vars: Option<&Value>) -> NetworkPolicy {
    let Some(vars) = host_vars else {
        return NetworkPolicy::Direct;
    };

    let declared = vars.get("network_type").and_then(Value::as_str);
    if declared == Some("sshuttle") {
        if let Some(range) = vars.get("network_range").and_then(Value::as_str) {
            return NetworkPolicy::Sshuttle {
                range: range.to_string(),
            };
        }
    }
    if declared == Some("direct") {
        return NetworkPolicy::Direct;
    }

    vars.get("ansible_host")
        .and_then(Value::as_str)
        .and_then(|h| h.parse::<Ipv4Addr>().ok())
        .filter(Ipv4Addr::is_private)
        .map(|ip| {
            let [a, b, c, _] = ip.octets();
            NetworkPolicy::Sshuttle {
                range: format!("{}.{}.{}.0/24", a, b, c),
            }
        })
        .unwrap_or(NetworkPolicy::Direct)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1" | "on"),
        Value::Tagged(tagged) => is_truthy(&tagged.value),
        _ => false,
    }
}
