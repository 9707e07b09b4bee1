//! Process configuration
//!
//! Every setting is read from the environment (the way the webhook is
//! deployed) and can be overridden with a command-line flag. Empty values are
//! treated as unset.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::warn;

use crate::error::Error;
use crate::patch::{PatchMode, ResourceDefaults};
use crate::policy::{LabelMatch, LabelSelector, Policy};
use crate::server::ServerConfig;
use crate::{DEFAULT_PORT, DEFAULT_TLS_CERT_FILE, DEFAULT_TLS_KEY_FILE};

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines (default)
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Resource defaulter - fills in missing Pod CPU/memory requests and limits
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "resource-defaulter", version, about, long_about = None)]
pub struct Config {
    /// Namespace whose Pods are defaulted
    #[arg(long, env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Label selector Pods must match, e.g. `tier=backend,env in (prod)`
    #[arg(long, env = "LABEL_SELECTOR")]
    pub label_selector: Option<String>,

    /// Label key Pods must carry (used with --label-value)
    #[arg(long, env = "LABEL_KEY")]
    pub label_key: Option<String>,

    /// Value required for --label-key
    #[arg(long, env = "LABEL_VALUE")]
    pub label_value: Option<String>,

    /// Default CPU request in millicores
    #[arg(long, env = "CPU_REQUEST")]
    pub cpu_request: Option<String>,

    /// Default CPU limit in millicores
    #[arg(long, env = "CPU_LIMIT")]
    pub cpu_limit: Option<String>,

    /// Default memory request in bytes
    #[arg(long, env = "MEMORY_REQUEST")]
    pub memory_request: Option<String>,

    /// Default memory limit in bytes
    #[arg(long, env = "MEMORY_LIMIT")]
    pub memory_limit: Option<String>,

    /// How defaults are encoded in the admission patch
    #[arg(long, env = "PATCH_MODE", value_enum, default_value_t = PatchMode::Add)]
    pub patch_mode: PatchMode,

    /// HTTPS port
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// PEM certificate served by the webhook
    #[arg(long, env = "TLS_CERT_FILE", default_value = DEFAULT_TLS_CERT_FILE)]
    pub tls_cert_file: PathBuf,

    /// PEM private key for --tls-cert-file
    #[arg(long, env = "TLS_KEY_FILE", default_value = DEFAULT_TLS_KEY_FILE)]
    pub tls_key_file: PathBuf,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Config {
    /// Build the admission policy
    ///
    /// Fails when the namespace is missing, the selector does not parse, or
    /// the label predicate is ambiguous. Unparseable quantity defaults are
    /// not an error: each one is reported and then ignored.
    pub fn policy(&self) -> Result<Policy, Error> {
        let namespace = non_empty(&self.namespace)
            .ok_or_else(|| Error::config("NAMESPACE must be set to the namespace to default"))?;

        let defaults = ResourceDefaults {
            cpu_request: non_empty(&self.cpu_request),
            cpu_limit: non_empty(&self.cpu_limit),
            memory_request: non_empty(&self.memory_request),
            memory_limit: non_empty(&self.memory_limit),
        };
        for (field, e) in defaults.invalid_fields() {
            warn!(field = %field, error = %e, "Default will never be applied");
        }
        if defaults.is_empty() {
            warn!("No resource defaults configured; matching Pods will not be patched");
        }

        Ok(Policy::new(namespace)
            .with_label_match(self.label_match()?)
            .with_defaults(defaults))
    }

    fn label_match(&self) -> Result<LabelMatch, Error> {
        let selector = non_empty(&self.label_selector);
        let key = non_empty(&self.label_key);
        let value = self.label_value.clone().map(|v| v.trim().to_string());

        match (selector, key, value) {
            (Some(_), Some(_), _) => Err(Error::config(
                "LABEL_SELECTOR and LABEL_KEY are mutually exclusive",
            )),
            (Some(expression), None, _) => {
                Ok(LabelMatch::Selector(LabelSelector::parse(&expression)?))
            }
            (None, Some(key), Some(value)) => {
                // Reuse selector validation for the key and value syntax
                LabelSelector::parse(&format!("{}={}", key, value))?;
                Ok(LabelMatch::Pair { key, value })
            }
            (None, Some(_), None) => Err(Error::config("LABEL_KEY requires LABEL_VALUE")),
            (None, None, Some(v)) if !v.is_empty() => {
                Err(Error::config("LABEL_VALUE requires LABEL_KEY"))
            }
            (None, None, _) => Ok(LabelMatch::default()),
        }
    }

    /// Build the HTTPS listener configuration
    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], self.port)),
            cert_file: self.tls_cert_file.clone(),
            key_file: self.tls_key_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["resource-defaulter"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_deployment_layout() {
        let cfg = config(&["--namespace", "prod", "--port", "8080"]);
        assert_eq!(cfg.tls_cert_file, PathBuf::from("/tls/tls.crt"));
        assert_eq!(cfg.tls_key_file, PathBuf::from("/tls/tls.key"));
        assert_eq!(cfg.patch_mode, PatchMode::Add);
        assert_eq!(cfg.log_format, LogFormat::Text);

        let server = cfg.server();
        assert_eq!(server.addr.port(), 8080);
    }

    #[test]
    fn namespace_is_required() {
        let err = Config::default().policy().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = config(&["--namespace", "  "]).policy().unwrap_err();
        assert!(err.to_string().contains("NAMESPACE"));
    }

    #[test]
    fn no_predicate_matches_whole_namespace() {
        let policy = config(&["--namespace", "prod"]).policy().unwrap();
        assert_eq!(policy.namespace, "prod");
        assert_eq!(policy.label_match, LabelMatch::default());
    }

    #[test]
    fn selector_is_parsed_at_startup() {
        let policy = config(&["--namespace", "prod", "--label-selector", "tier=backend"])
            .policy()
            .unwrap();
        assert!(matches!(policy.label_match, LabelMatch::Selector(_)));

        let err = config(&["--namespace", "prod", "--label-selector", "tier in ()"])
            .policy()
            .unwrap_err();
        assert!(matches!(err, Error::Selector(_)));
    }

    #[test]
    fn label_pair() {
        let policy = config(&[
            "--namespace",
            "prod",
            "--label-key",
            "tier",
            "--label-value",
            "backend",
        ])
        .policy()
        .unwrap();
        assert_eq!(
            policy.label_match,
            LabelMatch::Pair {
                key: "tier".into(),
                value: "backend".into()
            }
        );
    }

    #[test]
    fn label_pair_halves_and_conflicts_are_rejected() {
        let err = config(&["--namespace", "prod", "--label-key", "tier"])
            .policy()
            .unwrap_err();
        assert!(err.to_string().contains("LABEL_VALUE"));

        let err = config(&["--namespace", "prod", "--label-value", "backend"])
            .policy()
            .unwrap_err();
        assert!(err.to_string().contains("LABEL_KEY"));

        let err = config(&[
            "--namespace",
            "prod",
            "--label-selector",
            "tier=backend",
            "--label-key",
            "tier",
            "--label-value",
            "backend",
        ])
        .policy()
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));

        let err = config(&[
            "--namespace",
            "prod",
            "--label-key",
            "not a key",
            "--label-value",
            "x",
        ])
        .policy()
        .unwrap_err();
        assert!(matches!(err, Error::Selector(_)));
    }

    #[test]
    fn quantities_are_kept_raw_and_empty_ones_dropped() {
        let policy = config(&[
            "--namespace",
            "prod",
            "--cpu-request",
            "100",
            "--cpu-limit",
            "",
            "--memory-limit",
            "not-a-number",
        ])
        .policy()
        .unwrap();

        assert_eq!(policy.defaults.cpu_request.as_deref(), Some("100"));
        assert_eq!(policy.defaults.cpu_limit, None);
        assert_eq!(policy.defaults.memory_limit.as_deref(), Some("not-a-number"));
    }

    #[test]
    fn patch_mode_and_log_format_parse() {
        let cfg = config(&[
            "--namespace",
            "prod",
            "--patch-mode",
            "replace",
            "--log-format",
            "json",
            "--port",
            "9443",
        ]);
        assert_eq!(cfg.patch_mode, PatchMode::Replace);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.server().addr.port(), 9443);
    }
}
