//! Work keys: the `namespace/name` strings that flow through the queue.

use std::fmt;
use std::str::FromStr;

use kube::Resource;
use serde::{Deserialize, Serialize};

use crate::Ingress;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("object has no meta: {0}")]
    NoMeta(String),
    #[error("object has no name")]
    MissingName,
    #[error("unexpected key format: {0:?}")]
    Malformed(String),
    #[error("key {0:?} does not name a namespaced object")]
    NotNamespaced(String),
}

/// Identifies the target of one reconciliation.
///
/// Renders as `"<namespace>/<name>"`, or as a bare `"<name>"` for cluster-scoped
/// objects. Both parts are non-empty and neither contains a `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkKey {
    namespace: Option<String>,
    name: String,
}

impl WorkKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Result<Self, KeyError> {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        if name.is_empty() || name.contains('/') || namespace.is_some_and(|ns| ns.contains('/')) {
            let raw = match namespace {
                Some(ns) => format!("{ns}/{name}"),
                None => name.to_string(),
            };
            return Err(KeyError::Malformed(raw));
        }
        Ok(Self { namespace: namespace.map(str::to_string), name: name.to_string() })
    }

    /// Parse either form of key.
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let mut parts = key.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => {
                Ok(Self { namespace: None, name: name.to_string() })
            }
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                Ok(Self { namespace: Some(ns.to_string()), name: name.to_string() })
            }
            _ => Err(KeyError::Malformed(key.to_string())),
        }
    }

    /// Parse a key that must carry a namespace.
    pub fn parse_namespaced(key: &str) -> Result<Self, KeyError> {
        let parsed = Self::parse(key)?;
        if parsed.namespace.is_none() {
            return Err(KeyError::NotNamespaced(key.to_string()));
        }
        Ok(parsed)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for WorkKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<WorkKey> for String {
    fn from(key: WorkKey) -> Self {
        key.to_string()
    }
}

/// Derives the canonical work key of a value.
pub trait KeyFunc {
    fn work_key(&self) -> Result<WorkKey, KeyError>;
}

impl<K: Resource> KeyFunc for K {
    fn work_key(&self) -> Result<WorkKey, KeyError> {
        let meta = self.meta();
        let name = meta.name.as_deref().filter(|n| !n.is_empty()).ok_or(KeyError::MissingName)?;
        WorkKey::new(meta.namespace.as_deref(), name)
    }
}

impl<K: Resource> KeyFunc for Ingress<K> {
    fn work_key(&self) -> Result<WorkKey, KeyError> {
        match self {
            Ingress::Object(obj) => obj.work_key(),
            Ingress::Tombstone(t) => WorkKey::parse(&t.key),
            Ingress::Foreign(what) => Err(KeyError::NoMeta(what.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::ReplicaSet;
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn rs(ns: Option<&str>, name: Option<&str>) -> ReplicaSet {
        ReplicaSet {
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                namespace: ns.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn parse_accepts_both_forms() {
        let k = WorkKey::parse("default/web").unwrap();
        assert_eq!(k.namespace(), Some("default"));
        assert_eq!(k.name(), "web");
        assert_eq!(k.to_string(), "default/web");

        let bare = WorkKey::parse("node-1").unwrap();
        assert_eq!(bare.namespace(), None);
        assert_eq!(bare.to_string(), "node-1");
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        for bad in ["", "/", "a/", "/b", "a/b/c", "a//b"] {
            assert_eq!(WorkKey::parse(bad), Err(KeyError::Malformed(bad.to_string())), "{bad:?}");
        }
    }

    #[test]
    fn namespaced_parse_rejects_bare_names() {
        assert!(WorkKey::parse_namespaced("valid/key").is_ok());
        assert_eq!(
            WorkKey::parse_namespaced("invalid.key"),
            Err(KeyError::NotNamespaced("invalid.key".to_string()))
        );
    }

    #[test]
    fn object_keys() {
        assert_eq!(rs(Some("testNamespace"), Some("testName")).work_key().unwrap().to_string(), "testNamespace/testName");
        assert_eq!(rs(Some(""), Some("rs")).work_key().unwrap().to_string(), "rs");
        assert_eq!(rs(Some("ns"), None).work_key(), Err(KeyError::MissingName));

        let cluster_scoped = Namespace {
            metadata: ObjectMeta { name: Some("prod".into()), ..Default::default() },
            ..Default::default()
        };
        assert_eq!(cluster_scoped.work_key().unwrap().to_string(), "prod");
    }

    #[test]
    fn ingress_keys() {
        let live: Ingress<ReplicaSet> = rs(Some("default"), Some("rs")).into();
        assert_eq!(live.work_key().unwrap().to_string(), "default/rs");

        // the tombstone key wins over the embedded object
        let gone = Ingress::tombstone("default/old", Some(rs(Some("default"), Some("rs"))));
        assert_eq!(gone.work_key().unwrap().to_string(), "default/old");

        let undecodable: Ingress<ReplicaSet> = Ingress::tombstone("default/rs", None);
        assert_eq!(undecodable.work_key().unwrap().to_string(), "default/rs");

        let foreign: Ingress<ReplicaSet> = Ingress::foreign("Invalid Object");
        assert_eq!(foreign.work_key(), Err(KeyError::NoMeta("Invalid Object".to_string())));
    }
}
