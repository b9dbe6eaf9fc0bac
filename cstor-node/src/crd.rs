//! Custom resources in the `openebs.io/v1alpha1` group.
//!
//! - [`CStorPool`] - a pool built from block devices (cluster scoped)
//! - [`CStorVolumeReplica`] - a thin volume inside the active pool
//! - [`CStorVolume`] - an iSCSI target served by istgt
//!
//! All three share [`CStorResource`], which gives the generic queue,
//! informer and controller code uniform access to spec, status and scope.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use cstor_engine::{PoolDefinition, TargetDefinition};
use kube::{Api, Client, CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Annotation on a replica naming the pool it was scheduled to.
pub const POOL_GUID_ANNOTATION: &str = "cstor-pool-guid";

/// Label on a replica carrying the UID of its CStorPool.
pub const POOL_UID_LABEL: &str = "cstorpool.openebs.io/uid";

// ============================================================================
// Phase
// ============================================================================

/// Reconciler-observed state written to `.status.phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    #[default]
    Init,
    Online,
    Offline,
    DeletionFailed,
    Invalid,
    /// Sentinel: suppresses the status write for this cycle.
    Ignore,
    Failed,
    /// Any phase written by another component.
    #[serde(other)]
    Unknown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "Init",
            Phase::Online => "Online",
            Phase::Offline => "Offline",
            Phase::DeletionFailed => "DeletionFailed",
            Phase::Invalid => "Invalid",
            Phase::Ignore => "Ignore",
            Phase::Failed => "Failed",
            Phase::Unknown => "Unknown",
        }
    }

    /// Whether a reconcile outcome with this phase writes status.
    pub fn writes_status(&self) -> bool {
        !matches!(self, Phase::Ignore | Phase::Unknown)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CStorPool
// ============================================================================

/// Declared pool: devices plus pool tool attributes.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "CStorPool",
    plural = "cstorpools",
    shortname = "csp",
    status = "CStorPoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolSpec {
    #[serde(default)]
    pub disks: DiskAttr,
    #[serde(default)]
    pub pool_spec: CStorPoolAttr,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskAttr {
    #[serde(default)]
    pub disk_list: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolAttr {
    #[serde(default)]
    pub pool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<String>,
    /// striped, mirrored, raidz or raidz2.
    #[serde(default)]
    pub pool_type: String,
    #[serde(default)]
    pub over_provisioning: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl CStorPool {
    pub fn definition(&self) -> PoolDefinition {
        PoolDefinition {
            pool_name: self.spec.pool_spec.pool_name.clone(),
            disks: self.spec.disks.disk_list.clone(),
            cache_file: self.spec.pool_spec.cache_file.clone(),
            pool_type: self.spec.pool_spec.pool_type.clone(),
        }
    }
}

// ============================================================================
// CStorVolumeReplica
// ============================================================================

/// Declared thin volume inside whichever pool is active on the node.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "CStorVolumeReplica",
    plural = "cstorvolumereplicas",
    shortname = "cvr",
    namespaced,
    status = "CStorVolumeReplicaStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CStorVolumeReplicaSpec {
    /// Dataset leaf name.
    #[serde(default)]
    pub vol_name: String,
    #[serde(default)]
    pub capacity: String,
    #[serde(default, rename = "targetIP")]
    pub target_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CStorVolumeReplicaStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl CStorVolumeReplica {
    /// Intended pool identity from the scheduling annotation.
    pub fn pool_guid(&self) -> Option<&str> {
        self.annotations().get(POOL_GUID_ANNOTATION).map(String::as_str)
    }
}

// ============================================================================
// CStorVolume
// ============================================================================

/// Declared iSCSI target.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "CStorVolume",
    plural = "cstorvolumes",
    shortname = "cv",
    namespaced,
    status = "CStorVolumeStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CStorVolumeSpec {
    #[serde(default)]
    pub volume_name: String,
    #[serde(default)]
    pub capacity: String,
    #[serde(default, rename = "targetIP")]
    pub target_ip: String,
    #[serde(default)]
    pub target_port: String,
    #[serde(default)]
    pub iqn: String,
    #[serde(default)]
    pub target_portal: String,
    #[serde(default)]
    pub node_base: String,
    #[serde(default)]
    pub replication_factor: u32,
    #[serde(default)]
    pub consistency_factor: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CStorVolumeStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CStorVolume {
    pub fn target(&self) -> TargetDefinition {
        TargetDefinition {
            uid: self.uid().unwrap_or_default(),
            volume_name: self.spec.volume_name.clone(),
            capacity: self.spec.capacity.clone(),
            target_ip: self.spec.target_ip.clone(),
            replication_factor: self.spec.replication_factor,
            consistency_factor: self.spec.consistency_factor,
        }
    }
}

// ============================================================================
// Shared access
// ============================================================================

/// Uniform view over the three custom resources.
pub trait CStorResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Spec: PartialEq;
    type Status: PartialEq;

    fn spec(&self) -> &Self::Spec;
    fn status(&self) -> Option<&Self::Status>;
    fn phase(&self) -> Option<Phase>;

    /// Stamp a new phase. `message` is kept only by kinds that carry one.
    fn set_phase(&mut self, phase: Phase, now: DateTime<Utc>, message: Option<String>);

    /// API handle for this kind. `None` watches every namespace.
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

impl CStorResource for CStorPool {
    type Spec = CStorPoolSpec;
    type Status = CStorPoolStatus;

    fn spec(&self) -> &CStorPoolSpec {
        &self.spec
    }

    fn status(&self) -> Option<&CStorPoolStatus> {
        self.status.as_ref()
    }

    fn phase(&self) -> Option<Phase> {
        self.status.as_ref().map(|s| s.phase)
    }

    fn set_phase(&mut self, phase: Phase, now: DateTime<Utc>, _message: Option<String>) {
        let status = self.status.get_or_insert_with(Default::default);
        status.phase = phase;
        status.last_update_time = Some(now);
    }

    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

impl CStorResource for CStorVolumeReplica {
    type Spec = CStorVolumeReplicaSpec;
    type Status = CStorVolumeReplicaStatus;

    fn spec(&self) -> &CStorVolumeReplicaSpec {
        &self.spec
    }

    fn status(&self) -> Option<&CStorVolumeReplicaStatus> {
        self.status.as_ref()
    }

    fn phase(&self) -> Option<Phase> {
        self.status.as_ref().map(|s| s.phase)
    }

    fn set_phase(&mut self, phase: Phase, now: DateTime<Utc>, _message: Option<String>) {
        let status = self.status.get_or_insert_with(Default::default);
        status.phase = phase;
        status.last_update_time = Some(now);
    }

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}

impl CStorResource for CStorVolume {
    type Spec = CStorVolumeSpec;
    type Status = CStorVolumeStatus;

    fn spec(&self) -> &CStorVolumeSpec {
        &self.spec
    }

    fn status(&self) -> Option<&CStorVolumeStatus> {
        self.status.as_ref()
    }

    fn phase(&self) -> Option<Phase> {
        self.status.as_ref().map(|s| s.phase)
    }

    fn set_phase(&mut self, phase: Phase, now: DateTime<Utc>, message: Option<String>) {
        let status = self.status.get_or_insert_with(Default::default);
        if status.phase != phase || status.last_transition_time.is_none() {
            status.last_transition_time = Some(now);
        }
        status.phase = phase;
        status.last_update_time = Some(now);
        status.message = message;
    }

    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}

/// Queue key of an object: `namespace/name`, or `name` when cluster scoped.
pub fn object_key<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    let name = meta.name.as_deref().unwrap_or_default();
    match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

/// Split a queue key back into namespace and name.
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_deserializes_from_manifest() {
        let pool: CStorPool = serde_json::from_value(serde_json::json!({
            "apiVersion": "openebs.io/v1alpha1",
            "kind": "CStorPool",
            "metadata": { "name": "pool-a", "uid": "1234" },
            "spec": {
                "disks": { "diskList": ["/dev/sdb"] },
                "poolSpec": { "poolName": "cp1", "cacheFile": "/tmp/cp1.cache", "poolType": "striped" }
            },
            "status": { "phase": "Pending" }
        }))
        .unwrap();

        let def = pool.definition();
        assert_eq!(def.pool_name, "cp1");
        assert_eq!(def.disks, vec!["/dev/sdb"]);
        assert_eq!(def.cache_file.as_deref(), Some("/tmp/cp1.cache"));
        assert_eq!(pool.phase(), Some(Phase::Unknown));
        assert_eq!(object_key(&pool), "pool-a");
    }

    #[test]
    fn test_volume_target_and_transition_time() {
        let mut cv = CStorVolume::new(
            "v1",
            CStorVolumeSpec {
                volume_name: "v1".into(),
                capacity: "5G".into(),
                target_ip: "10.0.0.1".into(),
                replication_factor: 3,
                consistency_factor: 2,
                ..Default::default()
            },
        );
        cv.metadata.namespace = Some("openebs".into());
        cv.metadata.uid = Some("x".into());

        assert_eq!(cv.target().uid, "x");
        assert_eq!(object_key(&cv), "openebs/v1");

        let t0 = Utc::now();
        cv.set_phase(Phase::Online, t0, None);
        let t1 = t0 + chrono::Duration::seconds(5);
        cv.set_phase(Phase::Online, t1, None);
        let status = cv.status.as_ref().unwrap();
        assert_eq!(status.last_transition_time, Some(t0));
        assert_eq!(status.last_update_time, Some(t1));

        let json = serde_json::to_value(&cv).unwrap();
        assert_eq!(json["spec"]["targetIP"], "10.0.0.1");
        assert_eq!(json["status"]["phase"], "Online");
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("openebs/cvr-1"), (Some("openebs"), "cvr-1"));
        assert_eq!(split_key("pool-a"), (None, "pool-a"));
    }
}
