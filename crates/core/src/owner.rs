//! Owner kinds and controller owner references.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use serde::{Deserialize, Serialize};

use crate::DispatchError;

/// Parent kinds whose children are routed back to them.
///
/// New kinds are added here; every `match` on this enum then flags the call
/// sites that need a lister and queue for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerKind {
    Rollout,
    Experiment,
}

impl OwnerKind {
    pub const ALL: [OwnerKind; 2] = [OwnerKind::Rollout, OwnerKind::Experiment];

    /// Kind string as it appears in `ownerReferences[].kind`.
    pub const fn as_str(self) -> &'static str {
        match self {
            OwnerKind::Rollout => "Rollout",
            OwnerKind::Experiment => "Experiment",
        }
    }

    /// Parse a kind that is fixed at build time.
    ///
    /// # Panics
    ///
    /// Panics when `kind` is not one of [`OwnerKind::ALL`]. That is a wiring bug,
    /// not a runtime condition.
    pub fn must_parse(kind: &str) -> Self {
        match kind.parse() {
            Ok(k) => k,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn matches(self, owner: &OwnerReference) -> bool {
        owner.kind == self.as_str()
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OwnerKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DispatchError::UnknownOwnerKind(s.to_string()))
    }
}

/// The owner reference marked as managing controller, if any.
///
/// The API server allows at most one; should an object carry several, the
/// first one wins.
pub fn controller_ref<K: Resource>(obj: &K) -> Option<&OwnerReference> {
    obj.meta()
        .owner_references
        .as_deref()?
        .iter()
        .find(|r| r.controller == Some(true))
}
