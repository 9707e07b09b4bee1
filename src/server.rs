//! HTTPS server for the webhook

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use crate::error::Error;
use crate::webhook::{webhook_router, WebhookState};

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// TLS certificate PEM file
    pub cert_file: PathBuf,
    /// TLS private key PEM file
    pub key_file: PathBuf,
}

/// Load the certificate/key pair for the listener
pub async fn load_tls(config: &ServerConfig) -> Result<RustlsConfig, Error> {
    RustlsConfig::from_pem_file(&config.cert_file, &config.key_file)
        .await
        .map_err(|e| {
            Error::tls(format!(
                "failed to load {} / {}: {}",
                config.cert_file.display(),
                config.key_file.display(),
                e
            ))
        })
}

/// Serve the webhook until the process is stopped
pub async fn start_server(config: ServerConfig, state: Arc<WebhookState>) -> Result<(), Error> {
    let app = webhook_router(state);
    let tls_config = load_tls(&config).await?;

    info!(addr = %config.addr, "Starting webhook HTTPS server");

    axum_server::bind_rustls(config.addr, tls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::server(format!("{}: {}", config.addr, e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_certificate_is_a_tls_error() {
        let config = ServerConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            cert_file: PathBuf::from("/nonexistent/tls.crt"),
            key_file: PathBuf::from("/nonexistent/tls.key"),
        };

        let err = load_tls(&config).await.unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
        assert!(err.to_string().contains("/nonexistent/tls.crt"));
    }
}
