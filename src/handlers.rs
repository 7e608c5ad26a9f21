use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use serde_json::Value;
use tracing::error;

use crate::engine::{self, GraceEngine, Verdict};
use crate::metrics::{GuardMetrics, PatchLabels, RequestLabels, ResponseLabels, WebhookLabels};
use crate::response::{self, ReviewEnvelope};

pub struct AppState {
    pub engine: GraceEngine,
    pub metrics: GuardMetrics,
}

pub type SharedState = Arc<AppState>;

#[derive(Clone, Copy)]
enum WebhookKind {
    Mutate,
    Validate,
}

impl WebhookKind {
    fn as_str(self) -> &'static str {
        match self {
            WebhookKind::Mutate => "mutate",
            WebhookKind::Validate => "validate",
        }
    }
}

pub async fn handle_mutate(
    state: State<SharedState>,
    body: Json<Value>,
) -> Result<Json<ReviewEnvelope>, StatusCode> {
    handle_admission(state, body, WebhookKind::Mutate)
}

pub async fn handle_validate(
    state: State<SharedState>,
    body: Json<Value>,
) -> Result<Json<ReviewEnvelope>, StatusCode> {
    handle_admission(state, body, WebhookKind::Validate)
}

/// Shared request pipeline: decode the review, extract the grace period, run
/// the engine for the endpoint's webhook kind, encode the response. Shape
/// violations bail out with HTTP 500; the cluster's failurePolicy decides
/// whether that blocks the object.
fn handle_admission(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
    kind: WebhookKind,
) -> Result<Json<ReviewEnvelope>, StatusCode> {
    let start = Instant::now();
    let wh = kind.as_str();

    let review: AdmissionReview<DynamicObject> = serde_json::from_value(body).map_err(|e| {
        error!(webhook = wh, "failed to deserialize AdmissionReview: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let req: AdmissionRequest<DynamicObject> = review.try_into().map_err(|e| {
        error!(webhook = wh, "AdmissionReview carries no request: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    record_request(&state, &req, wh);

    let current = engine::extract_grace_period(req.object.as_ref()).map_err(|e| {
        error!(uid = %req.uid, webhook = wh, "malformed object under review: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let verdict = match kind {
        WebhookKind::Mutate => state.engine.decide_mutation(&req.uid, current),
        WebhookKind::Validate => state.engine.decide_validation(&req.uid, current),
    };

    record_patches(&state, &verdict);
    record_response(&state, verdict.allowed, wh);

    let envelope = response::encode(&req.uid, verdict).map_err(|e| {
        error!(uid = %req.uid, webhook = wh, "failed to encode admission response: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    state
        .metrics
        .admission_request_duration_seconds
        .get_or_create(&WebhookLabels { webhook: wh })
        .observe(start.elapsed().as_secs_f64());

    Ok(Json(envelope))
}

fn record_request(state: &AppState, req: &AdmissionRequest<DynamicObject>, webhook: &'static str) {
    let operation = format!("{:?}", req.operation).to_uppercase();
    let resource = req.resource.resource.clone();

    state
        .metrics
        .admission_requests_total
        .get_or_create(&RequestLabels {
            operation,
            resource,
            webhook,
        })
        .inc();
}

fn record_response(state: &AppState, allowed: bool, webhook: &'static str) {
    state
        .metrics
        .admission_responses_total
        .get_or_create(&ResponseLabels {
            allowed: if allowed { "true" } else { "false" },
            webhook,
        })
        .inc();
}

fn record_patches(state: &AppState, verdict: &Verdict) {
    let Some(patch) = &verdict.patch else { return };
    for op in &patch.0 {
        state
            .metrics
            .patches_total
            .get_or_create(&PatchLabels {
                op: engine::op_label(op),
            })
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::registry::Registry;
    use serde_json::json;

    fn test_state() -> SharedState {
        let mut registry = Registry::default();
        Arc::new(AppState {
            engine: GraceEngine::new(31_556_952),
            metrics: GuardMetrics::new(&mut registry),
        })
    }

    fn admission_body(pod_spec: Value) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "apps", "version": "v1", "kind": "Deployment"},
                "resource": {"group": "apps", "version": "v1", "resource": "deployments"},
                "operation": "CREATE",
                "userInfo": {"username": "kubernetes-admin"},
                "object": {
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "metadata": {"name": "demo", "namespace": "default"},
                    "spec": {
                        "replicas": 1,
                        "template": {
                            "metadata": {"labels": {"app": "demo"}},
                            "spec": pod_spec,
                        },
                    },
                },
            },
        })
    }

    fn run(body: Value, kind: WebhookKind) -> Result<Json<ReviewEnvelope>, StatusCode> {
        handle_admission(State(test_state()), Json(body), kind)
    }

    #[test]
    fn test_mutate_defaults_missing_grace_period() {
        let body = admission_body(json!({
            "containers": [{"name": "app", "image": "nginx:1.29"}],
        }));
        let Json(envelope) = run(body, WebhookKind::Mutate).unwrap();

        assert_eq!(envelope.response.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert!(envelope.response.allowed);
        assert_eq!(envelope.response.patch_type.as_deref(), Some("JSONPatch"));

        let patch: Value =
            serde_json::from_slice(&envelope.response.patch.unwrap().0).unwrap();
        assert_eq!(
            patch,
            json!([{
                "op": "add",
                "path": "/spec/template/spec/terminationGracePeriodSeconds",
                "value": 31_556_952,
            }])
        );
    }

    #[test]
    fn test_mutate_overrides_existing_grace_period() {
        let body = admission_body(json!({
            "containers": [{"name": "app", "image": "nginx:1.29"}],
            "terminationGracePeriodSeconds": 10,
        }));
        let Json(envelope) = run(body, WebhookKind::Mutate).unwrap();

        assert!(envelope.response.allowed);
        let patch: Value =
            serde_json::from_slice(&envelope.response.patch.unwrap().0).unwrap();
        assert_eq!(patch[0]["op"], "replace");
        assert_eq!(patch[0]["value"], json!(31_556_952));
    }

    #[test]
    fn test_validate_denies_value_at_floor() {
        let body = admission_body(json!({"terminationGracePeriodSeconds": 30}));
        let Json(envelope) = run(body, WebhookKind::Validate).unwrap();

        assert!(!envelope.response.allowed);
        let status = envelope.response.status.unwrap();
        assert_eq!(status.code, Some(403));
        assert!(envelope.response.patch.is_none());
    }

    #[test]
    fn test_validate_allows_value_above_floor() {
        let body = admission_body(json!({"terminationGracePeriodSeconds": 31}));
        let Json(envelope) = run(body, WebhookKind::Validate).unwrap();
        assert!(envelope.response.allowed);
    }

    #[test]
    fn test_validate_allows_absent_value() {
        let body = admission_body(json!({"containers": []}));
        let Json(envelope) = run(body, WebhookKind::Validate).unwrap();
        assert!(envelope.response.allowed);
    }

    #[test]
    fn test_malformed_object_is_a_server_error() {
        let mut body = admission_body(json!({}));
        body["request"]["object"]["spec"]
            .as_object_mut()
            .unwrap()
            .remove("template");

        let err = run(body, WebhookKind::Mutate).unwrap_err();
        assert_eq!(err, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_envelope_without_request_is_a_server_error() {
        let body = json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
        });
        let err = run(body, WebhookKind::Validate).unwrap_err();
        assert_eq!(err, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
