//! Recording fake adapter for lifecycle and janitor tests. Observed state is
//! scripted by the test; every verb appends to a call log so ordering and
//! idempotency can be asserted.

use super::{
    ClusterOps, ContainerState, EndpointState, InstanceNamespace, NamespaceState, WorkloadSpec,
    WorkloadStatus,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Clone, Debug, Default)]
pub struct FakeNamespace {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub workload: Option<WorkloadStatus>,
    pub endpoint: Option<EndpointState>,
    pub terminating: bool,
}

#[derive(Default)]
pub struct FakeCluster {
    calls: Mutex<Vec<String>>,
    namespaces: Mutex<BTreeMap<String, FakeNamespace>>,
    fail_deletes: Mutex<BTreeSet<String>>,
    events: Mutex<BTreeMap<String, Vec<String>>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, verb: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(verb))
            .count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.namespaces.lock().unwrap().contains_key(name)
    }

    /// Seed a namespace directly, bypassing the call log.
    pub fn seed_namespace(&self, name: &str, ns: FakeNamespace) {
        self.namespaces
            .lock()
            .unwrap()
            .insert(name.to_string(), ns);
    }

    pub fn set_workload(&self, name: &str, status: WorkloadStatus) {
        if let Some(ns) = self.namespaces.lock().unwrap().get_mut(name) {
            ns.workload = Some(status);
        }
    }

    pub fn set_endpoint(&self, name: &str, endpoint: EndpointState) {
        if let Some(ns) = self.namespaces.lock().unwrap().get_mut(name) {
            ns.endpoint = Some(endpoint);
        }
    }

    pub fn set_events(&self, name: &str, events: Vec<String>) {
        self.events.lock().unwrap().insert(name.to_string(), events);
    }

    /// Make deletes of one namespace fail with a transient error.
    pub fn fail_delete(&self, name: &str) {
        self.fail_deletes.lock().unwrap().insert(name.to_string());
    }

    /// Put a namespace into the deletion-in-progress state.
    pub fn set_terminating(&self, name: &str) {
        if let Some(ns) = self.namespaces.lock().unwrap().get_mut(name) {
            ns.terminating = true;
        }
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn ensure_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        self.record(format!("ensure_namespace {name}"));
        self.namespaces
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| FakeNamespace {
                labels,
                annotations,
                created_at: Some(Utc::now()),
                ..Default::default()
            });
        Ok(())
    }

    async fn apply_workload(&self, namespace: &str, spec: &WorkloadSpec) -> Result<()> {
        self.record(format!("apply_workload {namespace} {}", spec.image));
        let mut namespaces = self.namespaces.lock().unwrap();
        let ns = namespaces
            .get_mut(namespace)
            .ok_or_else(|| Error::ProvisioningFailed(format!("namespace {namespace} missing")))?;
        // a freshly applied workload starts unready
        ns.workload = Some(WorkloadStatus {
            desired_replicas: 1,
            ready_replicas: 0,
            container_states: vec![ContainerState::Waiting {
                reason: "ContainerCreating".to_string(),
            }],
            pods: vec!["challenge-0".to_string()],
        });
        Ok(())
    }

    async fn expose_service(&self, namespace: &str, _ports: &[u16]) -> Result<()> {
        self.record(format!("expose_service {namespace}"));
        let mut namespaces = self.namespaces.lock().unwrap();
        let ns = namespaces
            .get_mut(namespace)
            .ok_or_else(|| Error::ProvisioningFailed(format!("namespace {namespace} missing")))?;
        if ns.endpoint.is_none() {
            ns.endpoint = Some(EndpointState::Pending);
        }
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceState> {
        self.record(format!("get_namespace {name}"));
        Ok(match self.namespaces.lock().unwrap().get(name) {
            Some(ns) if ns.terminating => NamespaceState::Terminating,
            Some(ns) => NamespaceState::Active {
                labels: ns.labels.clone(),
                annotations: ns.annotations.clone(),
            },
            None => NamespaceState::Absent,
        })
    }

    async fn get_workload_status(&self, namespace: &str) -> Result<WorkloadStatus> {
        self.record(format!("get_workload_status {namespace}"));
        self.namespaces
            .lock()
            .unwrap()
            .get(namespace)
            .and_then(|ns| ns.workload.clone())
            .ok_or_else(|| Error::NotFound(format!("workload in {namespace}")))
    }

    async fn get_service_endpoint(&self, namespace: &str) -> Result<EndpointState> {
        self.record(format!("get_service_endpoint {namespace}"));
        self.namespaces
            .lock()
            .unwrap()
            .get(namespace)
            .and_then(|ns| ns.endpoint.clone())
            .ok_or_else(|| Error::NotFound(format!("service in {namespace}")))
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        self.record(format!("delete_namespace {name}"));
        if self.fail_deletes.lock().unwrap().contains(name) {
            return Err(Error::ClusterUnavailable(format!(
                "injected failure deleting {name}"
            )));
        }
        Ok(self.namespaces.lock().unwrap().remove(name).is_some())
    }

    async fn list_instance_namespaces(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<InstanceNamespace>> {
        self.record("list_instance_namespaces".to_string());
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, ns)| {
                selector
                    .iter()
                    .all(|(k, v)| ns.labels.get(k).map(|have| have == v).unwrap_or(false))
            })
            .map(|(name, ns)| InstanceNamespace {
                name: name.clone(),
                labels: ns.labels.clone(),
                annotations: ns.annotations.clone(),
                created_at: ns.created_at,
                terminating: ns.terminating,
            })
            .collect())
    }

    async fn get_events(&self, namespace: &str, _object: &str) -> Result<Vec<String>> {
        self.record(format!("get_events {namespace}"));
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_logs(&self, namespace: &str, pod: &str, _tail_lines: i64) -> Result<String> {
        self.record(format!("get_logs {namespace} {pod}"));
        Ok(String::new())
    }
}
