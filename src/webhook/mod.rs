//! Mutating Admission Webhook
//!
//! Intercepts Pod create/update requests and fills in default CPU/memory
//! requests and limits for Pods selected by the [`Policy`].
//!
//! Routes:
//! - `POST /mutate-pod` - AdmissionReview for Pods
//! - `POST /mutate` - alias of `/mutate-pod`
//! - `GET /healthz` - liveness/readiness probe

pub mod pod;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::patch::{PatchBuilder, PatchMode};
use crate::policy::Policy;

pub use pod::WebhookError;

/// Path registered in the MutatingWebhookConfiguration
pub const MUTATE_POD_PATH: &str = "/mutate-pod";

/// Shorter alias for [`MUTATE_POD_PATH`]
pub const MUTATE_PATH: &str = "/mutate";

/// Shared state for webhook handlers
///
/// Built once at startup and never mutated, so handlers read it concurrently
/// without locking.
#[derive(Debug)]
pub struct WebhookState {
    /// Which Pods are defaulted and with what
    pub policy: Policy,
    /// Patch encoding
    pub patcher: Box<dyn PatchBuilder>,
}

impl WebhookState {
    /// Create webhook state using the builder for `mode`
    pub fn new(policy: Policy, mode: PatchMode) -> Self {
        Self {
            policy,
            patcher: mode.builder(),
        }
    }
}

/// Create the webhook router with all mutation endpoints
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_POD_PATH, post(pod::mutate_handler))
        .route(MUTATE_PATH, post(pod::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
