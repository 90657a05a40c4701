//! Authgate server binary.
//! Used by: binary entrypoint.

use authgate::config::GateConfig;
use authgate::{server, state, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();

    let config = GateConfig::from_env()?;
    let addr = config.bind_addr.clone();
    tracing::info!(
        issuer = %config.issuer,
        algorithm = ?config.algorithm,
        credential_source = ?config.credential_source,
        "starting authgate on {}",
        addr
    );

    let state = state::build_state(config)?;
    server::run(state, &addr).await?;
    Ok(())
}
