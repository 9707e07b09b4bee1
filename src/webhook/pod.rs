//! Pod Mutation Webhook
//!
//! Handles AdmissionReview requests for Pods, filling in default CPU/memory
//! requests and limits on containers that do not declare them.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use k8s_openapi::api::core::v1::Pod;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, SerializePatchError},
    DynamicObject, TypeMeta,
};
use tracing::{debug, error, info, warn};

use super::WebhookState;

/// Kind handled by this webhook; anything else is allowed unchanged
pub const POD_KIND: &str = "Pod";

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The admission review request was invalid or malformed
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// The embedded object could not be read as a Pod
    #[error("invalid pod: {0}")]
    InvalidPod(String),

    /// An error occurred while serializing the admission response
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The computed patch could not be attached to the response
    #[error("patch serialization error: {0}")]
    Patch(#[from] SerializePatchError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            WebhookError::InvalidReview(_) | WebhookError::InvalidPod(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            WebhookError::Serialization(_) | WebhookError::Patch(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

/// Handle mutating admission review for Pods
///
/// This handler:
/// 1. Decodes the AdmissionReview envelope
/// 2. Checks the request namespace and the Pod's labels against the policy
/// 3. Builds a JSON patch for the resource entries the containers lack
/// 4. Returns the admission response
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let encoded = handle_review(&state, &body)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], encoded).into_response())
}

/// Run one admission review from request bytes to response bytes
///
/// Fails only when no UID can be recovered from the request, or when the
/// response cannot be serialized.
pub fn handle_review(state: &WebhookState, body: &[u8]) -> Result<Vec<u8>, WebhookError> {
    let response = match decode_review(body) {
        Ok(request) => review(state, &request)?,
        Err(e) => match recover_denial(body, &e) {
            Some(denial) => {
                warn!(uid = %denial.uid, error = %e, "Denying malformed admission request");
                denial
            }
            None => {
                error!(error = %e, "Failed to parse admission request");
                return Err(e);
            }
        },
    };

    encode_review(response)
}

/// Decode the AdmissionReview envelope into its request
pub fn decode_review(body: &[u8]) -> Result<AdmissionRequest<DynamicObject>, WebhookError> {
    let review: AdmissionReview<DynamicObject> =
        serde_json::from_slice(body).map_err(|e| WebhookError::InvalidReview(e.to_string()))?;
    review
        .try_into()
        .map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
            WebhookError::InvalidReview(e.to_string())
        })
}

/// Read the admitted object as a Pod
///
/// Pods submitted without `metadata.namespace` take the request namespace.
pub fn decode_pod(object: &DynamicObject, namespace: Option<&str>) -> Result<Pod, WebhookError> {
    let value = serde_json::to_value(object).map_err(|e| WebhookError::InvalidPod(e.to_string()))?;
    let mut pod: Pod =
        serde_json::from_value(value).map_err(|e| WebhookError::InvalidPod(e.to_string()))?;

    if pod.metadata.namespace.as_deref().is_none_or(str::is_empty) {
        pod.metadata.namespace = namespace.map(str::to_string);
    }
    Ok(pod)
}

/// Decide on a single admission request
pub fn review(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<AdmissionResponse, WebhookError> {
    let uid = request.uid.as_str();

    if request.kind.kind != POD_KIND {
        debug!(uid = %uid, kind = %request.kind.kind, "Not a Pod, allowing unchanged");
        return Ok(AdmissionResponse::from(request));
    }

    let namespace = request.namespace.as_deref().unwrap_or_default();
    if !state.policy.in_scope(namespace) {
        debug!(uid = %uid, namespace = %namespace, "Namespace out of scope, allowing unchanged");
        return Ok(AdmissionResponse::from(request));
    }

    let object = match &request.object {
        Some(obj) => obj,
        None => {
            debug!(uid = %uid, "No pod object in request, allowing unchanged");
            return Ok(AdmissionResponse::from(request));
        }
    };

    let pod = match decode_pod(object, request.namespace.as_deref()) {
        Ok(pod) => pod,
        Err(e) => {
            warn!(uid = %uid, error = %e, "Failed to decode pod, denying");
            return Ok(AdmissionResponse::from(request).deny(e.to_string()));
        }
    };

    if !state.policy.matches(&pod) {
        debug!(
            uid = %uid,
            pod = ?pod.metadata.name,
            "Labels do not match policy, allowing unchanged"
        );
        return Ok(AdmissionResponse::from(request));
    }

    let patch = match state.patcher.build(&pod, &state.policy.defaults) {
        Ok(Some(patch)) => patch,
        Ok(None) => {
            debug!(uid = %uid, pod = ?pod.metadata.name, "Resources already set, allowing unchanged");
            return Ok(AdmissionResponse::from(request));
        }
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to build patch");
            return Err(e.into());
        }
    };

    info!(
        uid = %uid,
        pod = ?pod.metadata.name,
        namespace = %namespace,
        patch_ops = patch.0.len(),
        "Applying resource defaults to pod"
    );

    AdmissionResponse::from(request)
        .with_patch(patch)
        .map_err(|e| {
            error!(uid = %uid, error = %e, "Failed to serialize patch");
            WebhookError::from(e)
        })
}

/// Serialize a response as a full AdmissionReview
pub fn encode_review(response: AdmissionResponse) -> Result<Vec<u8>, WebhookError> {
    Ok(serde_json::to_vec(&response.into_review())?)
}

/// Build a denial for a request that failed to decode but still carries a UID
fn recover_denial(body: &[u8], reason: &WebhookError) -> Option<AdmissionResponse> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let uid = value.pointer("/request/uid")?.as_str()?;
    if uid.is_empty() {
        return None;
    }

    let mut response = AdmissionResponse::invalid(reason);
    response.uid = uid.to_string();
    if let (Some(api_version), Some(kind)) = (
        value.get("apiVersion").and_then(|v| v.as_str()),
        value.get("kind").and_then(|v| v.as_str()),
    ) {
        response.types = TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        };
    }
    Some(response)
}
