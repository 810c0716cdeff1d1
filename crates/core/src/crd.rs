//! Custom resources reconciled by the controllers.
//!
//! Only the fields the dispatch layer and its logs touch are modelled; the
//! rest of each spec is preserved by the API server and ignored here.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "argoproj.io", version = "v1alpha1", kind = "Rollout", namespaced, shortname = "ro")]
#[serde(rename_all = "camelCase")]
pub struct RolloutSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub paused: bool,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "argoproj.io", version = "v1alpha1", kind = "Experiment", namespaced, shortname = "exp")]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSpec {
    /// e.g. "1h"; unset runs until every template completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_deadline_seconds: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn kinds_match_owner_kind_strings() {
        assert_eq!(Rollout::kind(&()), crate::OwnerKind::Rollout.as_str());
        assert_eq!(Experiment::kind(&()), crate::OwnerKind::Experiment.as_str());
        assert_eq!(Rollout::api_version(&()), "argoproj.io/v1alpha1");
    }

    #[test]
    fn spec_deserializes_from_camel_case() {
        let spec: ExperimentSpec = serde_json::from_value(serde_json::json!({
            "duration": "5m",
            "progressDeadlineSeconds": 30,
        }))
        .unwrap();
        assert_eq!(spec.duration.as_deref(), Some("5m"));
        assert_eq!(spec.progress_deadline_seconds, Some(30));
    }
}
