use crate::types::AttributeMap;
use k8s_openapi::Resource;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use tracing::debug;

use super::{ATTR_OWNER_REFERENCES, decode_string_array};

/// Owner kinds that count as a workload.
const WORKLOAD_KINDS: [&str; 6] = [
    Deployment::KIND,
    StatefulSet::KIND,
    DaemonSet::KIND,
    Job::KIND,
    CronJob::KIND,
    ReplicaSet::KIND,
];

/// The workload owning the resource a report is about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadInfo {
    pub name: String,
    pub kind: String,
    pub namespace: String,
    pub uid: String,
}

pub fn is_workload_kind(kind: &str) -> bool {
    WORKLOAD_KINDS.contains(&kind)
}

/// Resolve the owning workload from `metadata.ownerReferences`, falling back
/// to the usual `<workload>-<hash>-<random>` pod naming scheme.
pub fn extract_workload_info(attrs: &AttributeMap, pod_name: &str, namespace: &str) -> WorkloadInfo {
    let mut info = WorkloadInfo {
        namespace: namespace.to_string(),
        ..Default::default()
    };

    if let Some(refs) = attrs.get(ATTR_OWNER_REFERENCES).and_then(decode_string_array) {
        for raw in &refs {
            let Ok(owner) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw)
            else {
                debug!("Skipping undecodable owner reference");
                continue;
            };
            let field = |key: &str| owner.get(key).and_then(|v| v.as_str());
            match field("kind") {
                Some(kind) if is_workload_kind(kind) => {
                    info.kind = kind.to_string();
                    info.name = field("name").unwrap_or_default().to_string();
                    info.uid = field("uid").unwrap_or_default().to_string();
                    break;
                }
                _ => continue,
            }
        }
    }

    if info.name.is_empty() && !pod_name.is_empty() {
        let parts = split_pod_name(pod_name);
        if parts.len() >= 2 {
            let name = parts[..parts.len() - 2].join("-");
            if !name.is_empty() {
                debug!("Inferred workload {} from pod name {}", name, pod_name);
                info.name = name;
                if info.kind.is_empty() {
                    info.kind = Deployment::KIND.to_string();
                }
            }
        }
    }

    info
}

/// Split a pod name on hyphens, dropping empty tokens.
pub fn split_pod_name(pod_name: &str) -> Vec<&str> {
    pod_name.split('-').filter(|p| !p.is_empty()).collect()
}
