//! Resource defaulter - Pod resource defaults admission webhook

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use resource_defaulter::config::Config;
use resource_defaulter::server::start_server;
use resource_defaulter::telemetry::init_tracing;
use resource_defaulter::webhook::WebhookState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider before any TLS config is built
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let config = Config::parse();
    init_tracing(config.log_format)?;

    // Selector and label errors stop the process here, before serving
    let policy = config.policy()?;
    info!(
        namespace = %policy.namespace,
        label_match = ?policy.label_match,
        defaults = ?policy.defaults,
        patch_mode = ?config.patch_mode,
        "Loaded admission policy"
    );

    let state = Arc::new(WebhookState::new(policy, config.patch_mode));
    start_server(config.server(), state).await?;

    Ok(())
}
