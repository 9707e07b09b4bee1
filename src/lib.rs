//! Resource defaulter - mutating admission webhook for Pod resources
//!
//! The webhook is called by the API server for Pod admission. Pods in the
//! configured namespace that match the label predicate get default CPU and
//! memory requests/limits added to every container that does not set them.
//! Values the user supplied are never changed.
//!
//! # Request flow
//!
//! ```text
//! AdmissionReview ──► decode ──► namespace/labels ──► patch ──► AdmissionReview
//!                                      │                           ▲
//!                                      └──── no match: allow ──────┘
//! ```
//!
//! # Modules
//!
//! - [`config`] - Environment/CLI configuration
//! - [`policy`] - Namespace and label matching, selector parsing
//! - [`patch`] - Missing-resource detection and JSON Patch construction
//! - [`quantity`] - CPU/memory quantity formatting
//! - [`webhook`] - AdmissionReview handling and HTTP routes
//! - [`server`] - HTTPS listener
//! - [`telemetry`] - Tracing setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod patch;
pub mod policy;
pub mod quantity;
pub mod server;
pub mod telemetry;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default HTTPS port
pub const DEFAULT_PORT: u16 = 8080;

/// Default certificate path, where the serving Secret is mounted
pub const DEFAULT_TLS_CERT_FILE: &str = "/tls/tls.crt";

/// Default private key path, where the serving Secret is mounted
pub const DEFAULT_TLS_KEY_FILE: &str = "/tls/tls.key";
