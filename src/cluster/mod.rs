use crate::config::ResourceBudget;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub mod kube;
pub mod retry;

#[cfg(test)]
pub mod fake;

/// Name of the workload and service object inside every instance namespace.
/// The namespace itself carries the identity, so the inner names are fixed.
pub const WORKLOAD_NAME: &str = "challenge";
pub const SERVICE_NAME: &str = "challenge";

/// Desired shape of the single-replica workload for one instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub image: String,
    pub ports: Vec<u16>,
    pub env: Vec<(String, String)>,
    pub budget: ResourceBudget,
}

/// Observed namespace state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespaceState {
    Absent,
    /// Exists and is not being deleted
    Active {
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    },
    /// Deletion requested, cascade still in progress
    Terminating,
}

/// One owned namespace as seen by a label-scoped listing.
#[derive(Clone, Debug)]
pub struct InstanceNamespace {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub terminating: bool,
}

/// Observed workload readiness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub container_states: Vec<ContainerState>,
    /// Pod names backing the workload, for log harvesting
    pub pods: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Waiting { reason: String },
    Terminated { exit_code: i32, reason: String },
}

/// Observed network-exposure endpoint. External address allocation can lag
/// pod readiness, so `Pending` is a normal transient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointState {
    Pending,
    Ready {
        address: String,
        /// (external port, target port) pairs
        ports: Vec<(u16, u16)>,
    },
}

/// Thin verbs over the orchestrator, each idempotent or safely retryable.
///
/// All authoritative instance state lives behind this trait; the lifecycle
/// manager addresses it purely by deterministic namespace name. Tests swap
/// in a recording fake.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Create the namespace if absent; "already exists" is success.
    async fn ensure_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Create or replace the single-replica workload for the namespace.
    async fn apply_workload(&self, namespace: &str, spec: &WorkloadSpec) -> Result<()>;

    /// Create or replace the externally-reachable service for the namespace.
    async fn expose_service(&self, namespace: &str, ports: &[u16]) -> Result<()>;

    async fn get_namespace(&self, name: &str) -> Result<NamespaceState>;

    /// Errors with `NotFound` when the workload object is absent.
    async fn get_workload_status(&self, namespace: &str) -> Result<WorkloadStatus>;

    /// Errors with `NotFound` when the service object is absent.
    async fn get_service_endpoint(&self, namespace: &str) -> Result<EndpointState>;

    /// Cascading delete. Returns whether the namespace existed; "not found"
    /// is success.
    async fn delete_namespace(&self, name: &str) -> Result<bool>;

    async fn list_instance_namespaces(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<InstanceNamespace>>;

    /// Event messages for one object, newest last. Diagnostics only.
    async fn get_events(&self, namespace: &str, object: &str) -> Result<Vec<String>>;

    /// Tail of one pod's logs. Diagnostics only.
    async fn get_logs(&self, namespace: &str, pod: &str, tail_lines: i64) -> Result<String>;
}
