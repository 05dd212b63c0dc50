use crate::cluster::{ContainerState, EndpointState, WorkloadStatus};
use serde::Serialize;

/// Public instance status, the only shape callers ever see.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Absent,
    Provisioning,
    Running,
    Degraded,
    Terminating,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Absent => "absent",
            InstanceStatus::Provisioning => "provisioning",
            InstanceStatus::Running => "running",
            InstanceStatus::Degraded => "degraded",
            InstanceStatus::Terminating => "terminating",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Projection {
    pub status: InstanceStatus,
    pub address: Option<String>,
    pub reason: Option<String>,
}

/// Reduce raw orchestrator observations into the public status.
///
/// Total over every representable input; an unrecognized combination maps to
/// degraded rather than erroring. Namespace-level absent/terminating is
/// decided by the caller before projection.
pub fn project(workload: Option<&WorkloadStatus>, endpoint: Option<&EndpointState>) -> Projection {
    let Some(workload) = workload else {
        return absent();
    };
    if workload.desired_replicas == 0 {
        return absent();
    }

    if let Some(reason) = failure_reason(&workload.container_states) {
        return Projection {
            status: InstanceStatus::Degraded,
            address: None,
            reason: Some(reason),
        };
    }

    if workload.desired_replicas == 1 && workload.ready_replicas == 1 {
        return match endpoint {
            Some(EndpointState::Ready { address, ports }) => Projection {
                status: InstanceStatus::Running,
                address: Some(reachable_address(address, ports)),
                reason: None,
            },
            // external address allocation can lag pod readiness
            Some(EndpointState::Pending) | None => Projection {
                status: InstanceStatus::Provisioning,
                address: None,
                reason: None,
            },
        };
    }

    if workload.ready_replicas < workload.desired_replicas {
        return Projection {
            status: InstanceStatus::Provisioning,
            address: None,
            reason: None,
        };
    }

    Projection {
        status: InstanceStatus::Degraded,
        address: None,
        reason: Some("unknown state".to_string()),
    }
}

fn absent() -> Projection {
    Projection {
        status: InstanceStatus::Absent,
        address: None,
        reason: None,
    }
}

fn failure_reason(states: &[ContainerState]) -> Option<String> {
    for state in states {
        match state {
            ContainerState::Terminated { exit_code, reason } if *exit_code != 0 => {
                return Some(format!(
                    "container terminated: {} (exit {})",
                    if reason.is_empty() { "unknown" } else { reason },
                    exit_code
                ));
            }
            ContainerState::Waiting { reason }
                if matches!(
                    reason.as_str(),
                    "CrashLoopBackOff"
                        | "ImagePullBackOff"
                        | "ErrImagePull"
                        | "CreateContainerError"
                        | "CreateContainerConfigError"
                ) =>
            {
                return Some(format!("container waiting: {}", reason));
            }
            _ => {}
        }
    }
    None
}

fn reachable_address(address: &str, ports: &[(u16, u16)]) -> String {
    match ports.first() {
        Some((external, _)) => format!("{}:{}", address, external),
        None => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(desired: i32, ready: i32, states: Vec<ContainerState>) -> WorkloadStatus {
        WorkloadStatus {
            desired_replicas: desired,
            ready_replicas: ready,
            container_states: states,
            pods: vec![],
        }
    }

    fn ready_endpoint() -> EndpointState {
        EndpointState::Ready {
            address: "10.0.0.5".to_string(),
            ports: vec![(80, 80)],
        }
    }

    #[test]
    fn missing_workload_is_absent() {
        assert_eq!(project(None, None).status, InstanceStatus::Absent);
        assert_eq!(
            project(None, Some(&ready_endpoint())).status,
            InstanceStatus::Absent
        );
    }

    #[test]
    fn zero_desired_replicas_is_absent() {
        let w = workload(0, 0, vec![]);
        assert_eq!(project(Some(&w), None).status, InstanceStatus::Absent);
    }

    #[test]
    fn unready_replicas_are_provisioning() {
        let w = workload(
            1,
            0,
            vec![ContainerState::Waiting {
                reason: "ContainerCreating".to_string(),
            }],
        );
        assert_eq!(
            project(Some(&w), Some(&EndpointState::Pending)).status,
            InstanceStatus::Provisioning
        );
    }

    #[test]
    fn ready_with_ready_endpoint_is_running_with_address() {
        let w = workload(1, 1, vec![ContainerState::Running]);
        let p = project(Some(&w), Some(&ready_endpoint()));
        assert_eq!(p.status, InstanceStatus::Running);
        assert_eq!(p.address.as_deref(), Some("10.0.0.5:80"));
    }

    #[test]
    fn ready_with_pending_endpoint_is_still_provisioning() {
        let w = workload(1, 1, vec![ContainerState::Running]);
        let p = project(Some(&w), Some(&EndpointState::Pending));
        assert_eq!(p.status, InstanceStatus::Provisioning);
        assert_eq!(p.address, None);
    }

    #[test]
    fn nonzero_exit_is_degraded_with_reason() {
        let w = workload(
            1,
            1,
            vec![ContainerState::Terminated {
                exit_code: 137,
                reason: "OOMKilled".to_string(),
            }],
        );
        let p = project(Some(&w), Some(&ready_endpoint()));
        assert_eq!(p.status, InstanceStatus::Degraded);
        let reason = p.reason.expect("degraded carries a reason");
        assert!(reason.contains("OOMKilled") && reason.contains("137"));
    }

    #[test]
    fn restart_backoff_is_degraded() {
        let w = workload(
            1,
            0,
            vec![ContainerState::Waiting {
                reason: "CrashLoopBackOff".to_string(),
            }],
        );
        let p = project(Some(&w), None);
        assert_eq!(p.status, InstanceStatus::Degraded);
    }

    #[test]
    fn clean_exit_zero_is_not_degraded() {
        let w = workload(
            1,
            0,
            vec![ContainerState::Terminated {
                exit_code: 0,
                reason: "Completed".to_string(),
            }],
        );
        assert_eq!(project(Some(&w), None).status, InstanceStatus::Provisioning);
    }

    #[test]
    fn unrecognized_combination_is_degraded_not_a_panic() {
        let w = workload(2, 2, vec![ContainerState::Running]);
        let p = project(Some(&w), Some(&ready_endpoint()));
        assert_eq!(p.status, InstanceStatus::Degraded);
        assert_eq!(p.reason.as_deref(), Some("unknown state"));
    }

    /// Every tuple from a bounded enumeration of representable observations
    /// projects to one of the five statuses.
    #[test]
    fn projection_is_total() {
        let state_sets: Vec<Vec<ContainerState>> = vec![
            vec![],
            vec![ContainerState::Running],
            vec![ContainerState::Waiting {
                reason: "ContainerCreating".to_string(),
            }],
            vec![ContainerState::Waiting {
                reason: "ImagePullBackOff".to_string(),
            }],
            vec![ContainerState::Terminated {
                exit_code: 1,
                reason: "Error".to_string(),
            }],
            vec![ContainerState::Terminated {
                exit_code: 0,
                reason: "Completed".to_string(),
            }],
            vec![
                ContainerState::Running,
                ContainerState::Terminated {
                    exit_code: 2,
                    reason: String::new(),
                },
            ],
        ];
        let endpoints = [
            None,
            Some(EndpointState::Pending),
            Some(ready_endpoint()),
            Some(EndpointState::Ready {
                address: "lb.example.net".to_string(),
                ports: vec![],
            }),
        ];

        for desired in [0, 1, 2] {
            for ready in [0, 1, 2] {
                for states in &state_sets {
                    for endpoint in &endpoints {
                        let w = workload(desired, ready, states.clone());
                        let p = project(Some(&w), endpoint.as_ref());
                        assert!(matches!(
                            p.status,
                            InstanceStatus::Absent
                                | InstanceStatus::Provisioning
                                | InstanceStatus::Running
                                | InstanceStatus::Degraded
                        ));
                        if p.status == InstanceStatus::Degraded {
                            assert!(p.reason.is_some());
                        }
                    }
                }
            }
        }
    }
}
