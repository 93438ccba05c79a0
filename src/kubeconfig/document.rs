//! Kubeconfig documents and endpoint rewriting

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{KubehopError, KubehopResult};

/// A kubeconfig, keeping unknown keys intact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub clusters: Vec<NamedEntry>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub contexts: Vec<NamedEntry>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<NamedEntry>,

    #[serde(rename = "current-context", default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,

    #[serde(flatten)]
    pub extra: Mapping,
}

/// kubectl writes `clusters: null` once the last entry is deleted
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<NamedEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<NamedEntry>>::deserialize(deserializer)?.unwrap_or_default())
}

/// `{name, <payload>}` item of the clusters/contexts/users lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEntry {
    pub name: String,

    #[serde(flatten)]
    pub rest: Mapping,
}

impl Kubeconfig {
    pub fn parse(content: &[u8]) -> KubehopResult<Self> {
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_yaml::from_slice(content)
            .map_err(|e| KubehopError::MalformedDocument(e.to_string()))
    }

    pub fn to_yaml(&self) -> KubehopResult<String> {
        let mut doc = self.clone();
        doc.api_version.get_or_insert_with(|| "v1".to_string());
        doc.kind.get_or_insert_with(|| "Config".to_string());
        Ok(serde_yaml::to_string(&doc)?)
    }

    pub fn cluster(&self, name: &str) -> Option<&NamedEntry> {
        self.clusters.iter().find(|e| e.name == name)
    }

    pub fn user(&self, name: &str) -> Option<&NamedEntry> {
        self.users.iter().find(|e| e.name == name)
    }

    pub fn context(&self, name: &str) -> Option<&NamedEntry> {
        self.contexts.iter().find(|e| e.name == name)
    }

    /// Server URL of a named cluster
    pub fn server_of(&self, cluster: &str) -> Option<&str> {
        self.cluster(cluster)?
            .rest
            .get("cluster")?
            .get("server")?
            .as_str()
    }
}

/// Where the rewritten kubeconfig sends API traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Through a local tunnel on this port
    Tunnel { local_port: u16 },
    /// Straight to the node's internal address
    Direct { host: Ipv4Addr, port: u16 },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tunnel { local_port } => write!(f, "https://127.0.0.1:{}", local_port),
            Self::Direct { host, port } => write!(f, "https://{}:{}", host, port),
        }
    }
}

/// Replace `clusters[0].cluster.server` with the endpoint URL
///
/// Everything else in the document is carried over unchanged.
pub fn rewrite_server(content: &[u8], endpoint: &Endpoint) -> KubehopResult<Vec<u8>> {
    let mut doc: Value = serde_yaml::from_slice(content)
        .map_err(|e| KubehopError::MalformedDocument(e.to_string()))?;

    let server = doc
        .get_mut("clusters")
        .and_then(Value::as_sequence_mut)
        .and_then(|clusters| clusters.first_mut())
        .and_then(|cluster| cluster.get_mut("cluster"))
        .and_then(|cluster| cluster.get_mut("server"))
        .ok_or_else(|| {
            KubehopError::MalformedDocument("missing clusters[0].cluster.server".to_string())
        })?;

    if !server.is_string() {
        return Err(KubehopError::MalformedDocument(
            "clusters[0].cluster.server is not a string".to_string(),
        ));
    }
    *server = Value::String(endpoint.to_string());

    Ok(serde_yaml::to_string(&doc)?.into_bytes())
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Shape of the file k3s writes to /etc/rancher/k3s/k3s.yaml
    pub const K3S_YAML: &str = r#"apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: Q0EtREFUQQ==
    server: https://127.0.0.1:6443
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
kind: Config
preferences: {}
users:
- name: default
  user:
    client-certificate-data: Q0VSVA==
    client-key-data: S0VZ
"#;
}
