use super::{
    ContainerState, EndpointState, InstanceNamespace, NamespaceState, WorkloadSpec,
    WorkloadStatus, SERVICE_NAME, WORKLOAD_NAME,
};
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Container, ContainerPort, EnvVar, Event, Namespace, Pod, PodSpec, PodTemplateSpec,
            ResourceRequirements, SecurityContext, Service, ServicePort, ServiceSpec,
        },
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::LabelSelector},
};
use kube::{
    api::{Api, DeleteParams, ListParams, LogParams, ObjectMeta, PostParams},
    config::{
        AuthInfo, Cluster, Context, KubeConfigOptions, Kubeconfig, NamedAuthInfo, NamedCluster,
        NamedContext,
    },
    Client,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

const APP_NAME_LABEL: &str = "app.kubernetes.io/name";

/// Kubernetes-backed implementation of the adapter verbs.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Build a client for the configured cluster.
    ///
    /// An explicit endpoint plus bearer token takes precedence; otherwise
    /// in-cluster or kubeconfig inference applies. Failures here are
    /// configuration errors, fatal at startup.
    pub async fn connect(config: &ManagerConfig) -> Result<Self> {
        let client = match (&config.cluster_endpoint, &config.cluster_token) {
            (Some(endpoint), Some(token)) => {
                let kubeconfig = Kubeconfig {
                    clusters: vec![NamedCluster {
                        name: config.cluster_name.clone(),
                        cluster: Some(Cluster {
                            server: Some(endpoint.clone()),
                            certificate_authority_data: config.cluster_ca_data.clone(),
                            ..Default::default()
                        }),
                    }],
                    auth_infos: vec![NamedAuthInfo {
                        name: "instancer".to_string(),
                        auth_info: Some(AuthInfo {
                            token: Some(token.clone().into()),
                            ..Default::default()
                        }),
                    }],
                    contexts: vec![NamedContext {
                        name: config.cluster_name.clone(),
                        context: Some(Context {
                            cluster: config.cluster_name.clone(),
                            user: Some("instancer".to_string()),
                            ..Default::default()
                        }),
                    }],
                    current_context: Some(config.cluster_name.clone()),
                    ..Default::default()
                };

                let kube_config =
                    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| Error::Config(format!("cluster credentials: {e}")))?;
                Client::try_from(kube_config)
                    .map_err(|e| Error::Config(format!("cluster client: {e}")))?
            }
            _ => Client::try_default()
                .await
                .map_err(|e| Error::Config(format!("cluster inference: {e}")))?,
        };

        Ok(Self { client })
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl super::ClusterOps for KubeCluster {
    async fn ensure_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };

        match self.namespaces().create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!("Created namespace {}", name);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                info!("Namespace {} already exists", name);
                Ok(())
            }
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn apply_workload(&self, namespace: &str, spec: &WorkloadSpec) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = build_workload(namespace, spec);

        match api.create(&PostParams::default(), &deployment).await {
            Ok(_) => {
                info!("Created workload in {}", namespace);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                // Replace needs the live resourceVersion; everything else
                // server-assigned is left unset on the desired object.
                let existing = api.get(WORKLOAD_NAME).await.map_err(Error::from_kube)?;
                let mut desired = deployment;
                desired.metadata.resource_version = existing.metadata.resource_version;
                api.replace(WORKLOAD_NAME, &PostParams::default(), &desired)
                    .await
                    .map_err(Error::from_kube)?;
                info!("Replaced workload in {}", namespace);
                Ok(())
            }
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn expose_service(&self, namespace: &str, ports: &[u16]) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = build_service(namespace, ports);

        match api.create(&PostParams::default(), &service).await {
            Ok(_) => {
                info!("Created service in {}", namespace);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                let existing = api.get(SERVICE_NAME).await.map_err(Error::from_kube)?;
                let mut desired = service;
                desired.metadata.resource_version = existing.metadata.resource_version;
                // clusterIP is immutable once allocated
                if let (Some(desired_spec), Some(existing_spec)) =
                    (desired.spec.as_mut(), existing.spec.as_ref())
                {
                    desired_spec.cluster_ip = existing_spec.cluster_ip.clone();
                }
                api.replace(SERVICE_NAME, &PostParams::default(), &desired)
                    .await
                    .map_err(Error::from_kube)?;
                info!("Replaced service in {}", namespace);
                Ok(())
            }
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceState> {
        match self.namespaces().get(name).await {
            Ok(ns) => {
                if ns.metadata.deletion_timestamp.is_some() {
                    Ok(NamespaceState::Terminating)
                } else {
                    Ok(NamespaceState::Active {
                        labels: ns.metadata.labels.unwrap_or_default(),
                        annotations: ns.metadata.annotations.unwrap_or_default(),
                    })
                }
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(NamespaceState::Absent),
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn get_workload_status(&self, namespace: &str) -> Result<WorkloadStatus> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api.get(WORKLOAD_NAME).await.map_err(Error::from_kube)?;

        let desired_replicas = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(0);
        let ready_replicas = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);

        let pods_api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&format!("{}={}", APP_NAME_LABEL, WORKLOAD_NAME));
        let pod_list = pods_api.list(&lp).await.map_err(Error::from_kube)?;

        let mut container_states = Vec::new();
        let mut pods = Vec::new();
        for pod in pod_list.items {
            if let Some(name) = pod.metadata.name {
                pods.push(name);
            }
            let statuses = pod
                .status
                .and_then(|s| s.container_statuses)
                .unwrap_or_default();
            for cs in statuses {
                let Some(state) = cs.state else { continue };
                if let Some(terminated) = state.terminated {
                    container_states.push(ContainerState::Terminated {
                        exit_code: terminated.exit_code,
                        reason: terminated.reason.unwrap_or_default(),
                    });
                } else if let Some(waiting) = state.waiting {
                    container_states.push(ContainerState::Waiting {
                        reason: waiting.reason.unwrap_or_default(),
                    });
                } else if state.running.is_some() {
                    container_states.push(ContainerState::Running);
                }
            }
        }

        Ok(WorkloadStatus {
            desired_replicas,
            ready_replicas,
            container_states,
            pods,
        })
    }

    async fn get_service_endpoint(&self, namespace: &str) -> Result<EndpointState> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = api.get(SERVICE_NAME).await.map_err(Error::from_kube)?;

        let ingress = service
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|ingress| ingress.first());

        let address = match ingress.and_then(|i| i.ip.clone().or_else(|| i.hostname.clone())) {
            Some(address) => address,
            None => return Ok(EndpointState::Pending),
        };

        let ports = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|p| (p.port as u16, p.port as u16))
                    .collect()
            })
            .unwrap_or_default();

        Ok(EndpointState::Ready { address, ports })
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        match self.namespaces().delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleting namespace {}", name);
                Ok(true)
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("Namespace {} already deleted", name);
                Ok(false)
            }
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn list_instance_namespaces(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<InstanceNamespace>> {
        let selector_string = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let lp = ListParams::default().labels(&selector_string);

        let list = self.namespaces().list(&lp).await.map_err(Error::from_kube)?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| {
                let name = ns.metadata.name?;
                Some(InstanceNamespace {
                    name,
                    labels: ns.metadata.labels.unwrap_or_default(),
                    annotations: ns.metadata.annotations.unwrap_or_default(),
                    created_at: ns.metadata.creation_timestamp.map(|t| t.0),
                    terminating: ns.metadata.deletion_timestamp.is_some(),
                })
            })
            .collect())
    }

    async fn get_events(&self, namespace: &str, object: &str) -> Result<Vec<String>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().fields(&format!("involvedObject.name={}", object));
        let list = api.list(&lp).await.map_err(Error::from_kube)?;
        Ok(list.items.into_iter().filter_map(|e| e.message).collect())
    }

    async fn get_logs(&self, namespace: &str, pod: &str, tail_lines: i64) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        api.logs(pod, &params).await.map_err(Error::from_kube)
    }
}

fn workload_selector_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_NAME_LABEL.to_string(), WORKLOAD_NAME.to_string());
    labels
}

fn build_workload(namespace: &str, spec: &WorkloadSpec) -> Deployment {
    let mut env_vars: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();
    env_vars.push(EnvVar {
        name: "CHALLENGE_NAMESPACE".to_string(),
        value: Some(namespace.to_string()),
        ..Default::default()
    });

    let ports = spec
        .ports
        .iter()
        .map(|&p| ContainerPort {
            container_port: p as i32,
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: WORKLOAD_NAME.to_string(),
        image: Some(spec.image.clone()),
        env: Some(env_vars),
        ports: Some(ports),
        resources: Some(build_resources(spec)),
        security_context: Some(SecurityContext {
            privileged: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut pod_labels = workload_selector_labels();
    pod_labels.insert(
        crate::challenge::MANAGED_BY_LABEL.to_string(),
        crate::challenge::MANAGED_BY.to_string(),
    );

    let pod_template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            enable_service_links: Some(false),
            automount_service_account_token: Some(false),
            termination_grace_period_seconds: Some(0),
            ..Default::default()
        }),
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(WORKLOAD_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(workload_selector_labels()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(workload_selector_labels()),
                ..Default::default()
            },
            template: pod_template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_resources(spec: &WorkloadSpec) -> ResourceRequirements {
    let mut limits = BTreeMap::new();
    let mut requests = BTreeMap::new();

    limits.insert("cpu".to_string(), Quantity(spec.budget.cpu_limit.clone()));
    requests.insert("cpu".to_string(), Quantity(spec.budget.cpu_request.clone()));
    limits.insert(
        "memory".to_string(),
        Quantity(spec.budget.memory_limit.clone()),
    );
    requests.insert(
        "memory".to_string(),
        Quantity(spec.budget.memory_request.clone()),
    );

    ResourceRequirements {
        limits: Some(limits),
        requests: Some(requests),
        ..Default::default()
    }
}

fn build_service(namespace: &str, ports: &[u16]) -> Service {
    let service_ports = ports
        .iter()
        .map(|&p| ServicePort {
            name: Some(format!("port-{p}")),
            port: p as i32,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(workload_selector_labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            // the instance must be reachable from outside the cluster
            type_: Some("LoadBalancer".to_string()),
            selector: Some(workload_selector_labels()),
            ports: Some(service_ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}
