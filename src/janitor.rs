use crate::{
    challenge,
    cluster::{retry, ClusterOps, InstanceNamespace},
    config::ManagerConfig,
    error::{Error, Result},
    lifecycle::LifecycleManager,
    telemetry::Metrics,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclaimReason {
    Expired,
    Stuck,
}

impl ReclaimReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReclaimReason::Expired => "expired",
            ReclaimReason::Stuck => "stuck",
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub reclaimed: Vec<(String, ReclaimReason)>,
    pub failures: Vec<(String, Error)>,
}

/// Background expiry sweeper. Scans every namespace carrying the ownership
/// label and reclaims instances past their expiry or stuck provisioning,
/// through the same stop path a caller-requested teardown uses.
pub struct Janitor {
    manager: Arc<LifecycleManager>,
    cluster: Arc<dyn ClusterOps>,
    config: Arc<ManagerConfig>,
    metrics: Arc<Metrics>,
}

impl Janitor {
    pub fn new(
        manager: Arc<LifecycleManager>,
        cluster: Arc<dyn ClusterOps>,
        config: Arc<ManagerConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            manager,
            cluster,
            config,
            metrics,
        }
    }

    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.sweep().await {
                Ok(report) => {
                    if !report.reclaimed.is_empty() || !report.failures.is_empty() {
                        info!(
                            reclaimed = report.reclaimed.len(),
                            failed = report.failures.len(),
                            "sweep finished"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, "sweep could not list instances");
                    self.metrics.record_error();
                }
            }
        }
    }

    /// One pass over all owned namespaces. A failure reclaiming one instance
    /// is recorded and the sweep continues with the rest.
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.metrics.record_sweep();

        let selector = challenge::managed_selector();
        let namespaces = retry::with_backoff("list_instance_namespaces", || {
            self.cluster.list_instance_namespaces(&selector)
        })
        .await?;

        let now = Utc::now();
        let mut report = SweepReport::default();

        for ns in namespaces {
            if ns.terminating {
                continue;
            }

            let reason = match self.classify(&ns, now).await {
                Ok(Some(reason)) => reason,
                Ok(None) => continue,
                Err(e) => {
                    warn!(namespace = %ns.name, error = %e, "could not classify instance, skipping");
                    report.failures.push((ns.name, e));
                    continue;
                }
            };

            info!(namespace = %ns.name, reason = reason.as_str(), "reclaiming instance");
            match self.manager.stop_namespace(&ns.name).await {
                Ok(_) => {
                    self.metrics.record_reclaimed();
                    report.reclaimed.push((ns.name, reason));
                }
                Err(e) => {
                    error!(namespace = %ns.name, error = %e, "failed to reclaim instance");
                    self.metrics.record_error();
                    report.failures.push((ns.name, e));
                }
            }
        }

        Ok(report)
    }

    async fn classify(
        &self,
        ns: &InstanceNamespace,
        now: DateTime<Utc>,
    ) -> Result<Option<ReclaimReason>> {
        let expires_at = annotation_time(ns, challenge::EXPIRES_AT_ANNOTATION);
        if let Some(expires_at) = expires_at {
            if now > expires_at {
                return Ok(Some(ReclaimReason::Expired));
            }
        }

        let created_at = annotation_time(ns, challenge::CREATED_AT_ANNOTATION).or(ns.created_at);
        let stuck_after = chrono::Duration::minutes(self.config.stuck_threshold_minutes);
        let age_exceeded = match created_at {
            Some(created_at) => now - created_at > stuck_after,
            // a namespace of unknowable age cannot be trusted to expire
            None => true,
        };
        if !age_exceeded {
            return Ok(None);
        }

        // Past the stuck threshold: an instance without a usable expiry
        // annotation can never be reclaimed by the expiry rule, and one that
        // never became ready is abandoned capacity either way.
        if expires_at.is_none() {
            return Ok(Some(ReclaimReason::Stuck));
        }

        let ready = match retry::with_backoff("get_workload_status", || {
            self.cluster.get_workload_status(&ns.name)
        })
        .await
        {
            Ok(workload) => {
                workload.desired_replicas > 0
                    && workload.ready_replicas == workload.desired_replicas
            }
            Err(Error::NotFound(_)) => false,
            Err(e) => return Err(e),
        };

        if ready {
            Ok(None)
        } else {
            Ok(Some(ReclaimReason::Stuck))
        }
    }
}

fn annotation_time(ns: &InstanceNamespace, key: &str) -> Option<DateTime<Utc>> {
    ns.annotations
        .get(key)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
}
