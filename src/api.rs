use crate::{
    challenge::ChallengeDefinition,
    error::Error,
    lifecycle::{LifecycleManager, StartOutcome, StopOutcome},
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// The single instance endpoint is parameterized by an action field rather
/// than split over routes; the application layer sends one shape.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    GetStatus,
    Stop,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRequest {
    pub action: Action,
    /// The full challenge record travels with the request; challenge
    /// metadata is owned by the application database, not by this service.
    pub challenge: ChallengeDefinition,
    pub candidate_id: String,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InstanceResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl InstanceResponse {
    fn bare(status: &str) -> Self {
        Self {
            status: status.to_string(),
            instance_ref: None,
            address: None,
            expires_at: None,
            reason: None,
        }
    }
}

pub fn router(manager: Arc<LifecycleManager>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/instance", post(handle_instance))
        .with_state(manager)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn handle_instance(
    State(manager): State<Arc<LifecycleManager>>,
    Json(request): Json<InstanceRequest>,
) -> Result<Json<InstanceResponse>, ApiError> {
    match dispatch(&manager, request).await {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            manager.metrics().record_error();
            Err(ApiError(err))
        }
    }
}

async fn dispatch(
    manager: &LifecycleManager,
    request: InstanceRequest,
) -> Result<InstanceResponse, Error> {
    let response = match request.action {
        Action::Start => {
            let outcome = manager
                .start(
                    &request.challenge,
                    &request.candidate_id,
                    request.duration_minutes,
                )
                .await?;
            match outcome {
                StartOutcome::NoInfrastructure => InstanceResponse::bare("no_infrastructure"),
                StartOutcome::Provisioning {
                    instance_ref,
                    expires_at,
                } => InstanceResponse {
                    status: "provisioning".to_string(),
                    instance_ref: Some(instance_ref),
                    address: None,
                    expires_at: Some(expires_at),
                    reason: None,
                },
                StartOutcome::AlreadyActive {
                    instance_ref,
                    report,
                } => InstanceResponse {
                    status: report.status.as_str().to_string(),
                    instance_ref: Some(instance_ref),
                    address: report.address,
                    expires_at: None,
                    reason: report.reason,
                },
            }
        }
        Action::GetStatus => {
            let report = manager
                .status(&request.challenge.id, &request.candidate_id)
                .await?;
            InstanceResponse {
                status: report.status.as_str().to_string(),
                instance_ref: None,
                address: report.address,
                expires_at: None,
                reason: report.reason,
            }
        }
        Action::Stop => {
            let outcome = manager
                .stop(&request.challenge.id, &request.candidate_id)
                .await?;
            InstanceResponse::bare(match outcome {
                StopOutcome::Terminating => "terminating",
                StopOutcome::AlreadyAbsent => "absent",
            })
        }
    };

    Ok(response)
}

/// Failures at this boundary are generic for candidates; the typed reason
/// goes to the logs.
pub struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "instance request failed");
        let status = match self.0 {
            Error::ClusterUnavailable(_) | Error::ProvisioningFailed(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_) | Error::NotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": "could not complete the instance request, try again"
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_deserialize_from_wire_names() {
        for (raw, expected) in [
            ("\"start\"", Action::Start),
            ("\"get_status\"", Action::GetStatus),
            ("\"stop\"", Action::Stop),
        ] {
            let action: Action = serde_json::from_str(raw).unwrap();
            assert_eq!(action, expected);
        }
    }

    #[test]
    fn response_omits_unset_fields() {
        let body = serde_json::to_value(InstanceResponse::bare("absent")).unwrap();
        assert_eq!(body, serde_json::json!({ "status": "absent" }));
    }

    #[test]
    fn request_accepts_minimal_challenge_record() {
        let raw = serde_json::json!({
            "action": "get_status",
            "challenge": { "id": "chall-1", "name": "Web 100" },
            "candidateId": "cand-1"
        });
        let request: InstanceRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.action, Action::GetStatus);
        assert_eq!(request.challenge.id, "chall-1");
        assert!(request.duration_minutes.is_none());
    }

    #[test]
    fn status_request_needs_only_the_challenge_id() {
        let raw = serde_json::json!({
            "action": "get_status",
            "challenge": { "id": "chall-1" },
            "candidateId": "cand-1"
        });
        let request: InstanceRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.challenge.id, "chall-1");
        assert!(request.challenge.name.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_requests_increment_the_error_counter() {
        use crate::challenge::InstanceKey;
        use crate::cluster::fake::{FakeCluster, FakeNamespace};
        use crate::config::{ManagerConfig, ResourceBudget};
        use crate::telemetry::Metrics;
        use std::sync::atomic::Ordering;

        let config = ManagerConfig {
            cluster_endpoint: None,
            cluster_token: None,
            cluster_ca_data: None,
            cluster_name: "instancer".to_string(),
            namespace_prefix: "ci".to_string(),
            budget: ResourceBudget::default(),
            default_duration_minutes: 60,
            max_duration_minutes: 240,
            sweep_interval_secs: 120,
            stuck_threshold_minutes: 15,
            single_instance_per_candidate: true,
            bind_addr: "127.0.0.1:0".to_string(),
        };

        let fake = Arc::new(FakeCluster::new());
        let namespace = InstanceKey::new("chall-1", "cand-1").namespace_name("ci");
        fake.seed_namespace(&namespace, FakeNamespace::default());
        fake.fail_delete(&namespace);

        let metrics = Arc::new(Metrics::default());
        let manager = Arc::new(LifecycleManager::new(
            fake,
            Arc::new(config),
            metrics.clone(),
        ));

        let challenge: ChallengeDefinition =
            serde_json::from_value(serde_json::json!({ "id": "chall-1" })).unwrap();
        let request = InstanceRequest {
            action: Action::Stop,
            challenge,
            candidate_id: "cand-1".to_string(),
            duration_minutes: None,
        };

        let result = handle_instance(State(manager), Json(request)).await;
        assert!(result.is_err());
        assert_eq!(metrics.errors.load(Ordering::Relaxed), 1);
    }
}
