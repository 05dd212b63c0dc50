use crate::{
    challenge::{self, ChallengeDefinition, InstanceKey},
    cluster::{retry, ClusterOps, NamespaceState, WorkloadSpec, WORKLOAD_NAME},
    config::ManagerConfig,
    error::{Error, Result},
    resolver::{self, Resolution},
    telemetry::Metrics,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub mod status;

pub use status::InstanceStatus;

/// Result of a start request.
#[derive(Clone, Debug)]
pub enum StartOutcome {
    /// The challenge deploys nothing; valid, not an error
    NoInfrastructure,
    /// Provisioning began; poll status to observe readiness
    Provisioning {
        instance_ref: String,
        expires_at: DateTime<Utc>,
    },
    /// An instance for this key already exists; no second one was created
    AlreadyActive {
        instance_ref: String,
        report: StatusReport,
    },
}

#[derive(Clone, Debug)]
pub struct StatusReport {
    pub status: InstanceStatus,
    pub address: Option<String>,
    pub reason: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Terminating,
    AlreadyAbsent,
}

/// The per-key instance state machine.
///
/// All authoritative state lives in the orchestrator, addressed by the
/// deterministic namespace name, so concurrent calls for the same key race
/// harmlessly over idempotent verbs and no in-process locking is needed.
pub struct LifecycleManager {
    cluster: Arc<dyn ClusterOps>,
    config: Arc<ManagerConfig>,
    metrics: Arc<Metrics>,
}

impl LifecycleManager {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        config: Arc<ManagerConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cluster,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn namespace_for(&self, challenge_id: &str, candidate_id: &str) -> (InstanceKey, String) {
        let key = InstanceKey::new(challenge_id, candidate_id);
        let namespace = key.namespace_name(&self.config.namespace_prefix);
        (key, namespace)
    }

    /// Provision an instance for (challenge, candidate), or report the one
    /// that already exists. Returns as soon as the objects are created;
    /// callers poll `status` to observe readiness.
    #[instrument(skip(self, challenge), fields(challenge = %challenge.id, candidate = %candidate_id))]
    pub async fn start(
        &self,
        challenge: &ChallengeDefinition,
        candidate_id: &str,
        requested_minutes: Option<i64>,
    ) -> Result<StartOutcome> {
        let resolved = match resolver::resolve(challenge) {
            Resolution::NoInfrastructure => {
                info!("challenge requires no instance");
                return Ok(StartOutcome::NoInfrastructure);
            }
            Resolution::Resolved(resolved) => resolved,
        };

        let (key, namespace) = self.namespace_for(&challenge.id, candidate_id);

        match retry::with_backoff("get_namespace", || self.cluster.get_namespace(&namespace))
            .await?
        {
            NamespaceState::Active { .. } => {
                let report = self.observe(&namespace).await?;
                info!(%namespace, status = report.status.as_str(), "instance already exists");
                return Ok(StartOutcome::AlreadyActive {
                    instance_ref: namespace,
                    report,
                });
            }
            NamespaceState::Terminating => {
                // the previous instance is still being torn down; the caller
                // retries once it settles to absent
                info!(%namespace, "previous instance still terminating");
                return Ok(StartOutcome::AlreadyActive {
                    instance_ref: namespace,
                    report: StatusReport {
                        status: InstanceStatus::Terminating,
                        address: None,
                        reason: None,
                    },
                });
            }
            NamespaceState::Absent => {}
        }

        if self.config.single_instance_per_candidate {
            self.stop_other_instances(candidate_id, &namespace).await?;
        }

        let minutes = requested_minutes
            .unwrap_or(self.config.default_duration_minutes)
            .clamp(1, self.config.max_duration_minutes);
        let now = Utc::now();
        let expires_at = now + chrono::Duration::minutes(minutes);

        let mut labels = challenge::ownership_labels(&key);
        labels.insert(
            challenge::POD_SECURITY_LABEL.to_string(),
            challenge::POD_SECURITY_LEVEL.to_string(),
        );
        let mut annotations = BTreeMap::new();
        annotations.insert(
            challenge::CREATED_AT_ANNOTATION.to_string(),
            now.to_rfc3339(),
        );
        annotations.insert(
            challenge::EXPIRES_AT_ANNOTATION.to_string(),
            expires_at.to_rfc3339(),
        );

        let workload = WorkloadSpec {
            image: resolved.image,
            ports: resolved.ports.clone(),
            env: resolved.env,
            budget: self.config.budget.clone(),
        };

        // namespace before workload before service: a service must never
        // outlive the namespace scope or point at a workload that cannot
        // exist yet
        retry::with_backoff("ensure_namespace", || {
            self.cluster
                .ensure_namespace(&namespace, labels.clone(), annotations.clone())
        })
        .await?;
        retry::with_backoff("apply_workload", || {
            self.cluster.apply_workload(&namespace, &workload)
        })
        .await?;
        retry::with_backoff("expose_service", || {
            self.cluster.expose_service(&namespace, &resolved.ports)
        })
        .await?;

        self.metrics.record_start();
        info!(%namespace, image = %workload.image, %expires_at, "instance provisioning started");

        Ok(StartOutcome::Provisioning {
            instance_ref: namespace,
            expires_at,
        })
    }

    /// Observe the current instance state for (challenge, candidate).
    /// Never mutates anything.
    #[instrument(skip(self), fields(challenge = %challenge_id, candidate = %candidate_id))]
    pub async fn status(&self, challenge_id: &str, candidate_id: &str) -> Result<StatusReport> {
        let (_, namespace) = self.namespace_for(challenge_id, candidate_id);

        match retry::with_backoff("get_namespace", || self.cluster.get_namespace(&namespace))
            .await?
        {
            NamespaceState::Absent => Ok(StatusReport {
                status: InstanceStatus::Absent,
                address: None,
                reason: None,
            }),
            NamespaceState::Terminating => Ok(StatusReport {
                status: InstanceStatus::Terminating,
                address: None,
                reason: None,
            }),
            NamespaceState::Active { .. } => self.observe(&namespace).await,
        }
    }

    /// Tear down the instance for (challenge, candidate). Safe at any
    /// lifecycle point and idempotent; deletion cascades asynchronously on
    /// the orchestrator side.
    #[instrument(skip(self), fields(challenge = %challenge_id, candidate = %candidate_id))]
    pub async fn stop(&self, challenge_id: &str, candidate_id: &str) -> Result<StopOutcome> {
        let (_, namespace) = self.namespace_for(challenge_id, candidate_id);
        self.stop_namespace(&namespace).await
    }

    /// Delete one instance namespace. The janitor reclaims through this same
    /// path, so forced expiry and caller-requested stop behave identically.
    pub async fn stop_namespace(&self, namespace: &str) -> Result<StopOutcome> {
        let existed =
            retry::with_backoff("delete_namespace", || self.cluster.delete_namespace(namespace))
                .await?;

        if existed {
            self.metrics.record_stop();
            info!(%namespace, "instance teardown requested");
            Ok(StopOutcome::Terminating)
        } else {
            debug!(%namespace, "instance already absent");
            Ok(StopOutcome::AlreadyAbsent)
        }
    }

    /// Project the observed workload and endpoint for an existing namespace.
    async fn observe(&self, namespace: &str) -> Result<StatusReport> {
        let workload = match retry::with_backoff("get_workload_status", || {
            self.cluster.get_workload_status(namespace)
        })
        .await
        {
            Ok(workload) => Some(workload),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let endpoint = match retry::with_backoff("get_service_endpoint", || {
            self.cluster.get_service_endpoint(namespace)
        })
        .await
        {
            Ok(endpoint) => Some(endpoint),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let projection = status::project(workload.as_ref(), endpoint.as_ref());
        let mut report = StatusReport {
            status: projection.status,
            address: projection.address,
            reason: projection.reason,
        };

        if report.status == InstanceStatus::Degraded {
            self.enrich_degraded(namespace, workload.as_ref(), &mut report)
                .await;
        }

        Ok(report)
    }

    /// Best-effort diagnostics for a degraded instance; failures here never
    /// fail the status call.
    async fn enrich_degraded(
        &self,
        namespace: &str,
        workload: Option<&crate::cluster::WorkloadStatus>,
        report: &mut StatusReport,
    ) {
        if let Ok(events) = self.cluster.get_events(namespace, WORKLOAD_NAME).await {
            if let Some(last) = events.last() {
                report.reason = Some(match report.reason.take() {
                    Some(reason) => format!("{reason}; {last}"),
                    None => last.clone(),
                });
            }
        }

        if let Some(pod) = workload.and_then(|w| w.pods.first()) {
            if let Ok(tail) = self.cluster.get_logs(namespace, pod, 20).await {
                if !tail.is_empty() {
                    debug!(%namespace, %pod, "degraded workload log tail:\n{tail}");
                }
            }
        }
    }

    /// Enforce the one-instance-per-candidate capacity policy: every other
    /// live namespace owned by this candidate is stopped before the new one
    /// is provisioned. Ordering is mandatory, so failures abort the start.
    async fn stop_other_instances(&self, candidate_id: &str, keep: &str) -> Result<()> {
        let selector = challenge::candidate_selector(candidate_id);
        let owned = retry::with_backoff("list_instance_namespaces", || {
            self.cluster.list_instance_namespaces(&selector)
        })
        .await?;

        for other in owned {
            if other.name == keep || other.terminating {
                continue;
            }
            info!(
                namespace = %other.name,
                candidate = %candidate_id,
                "stopping candidate's previous instance before provisioning"
            );
            self.stop_namespace(&other.name).await?;
        }

        Ok(())
    }
}
