use anyhow::{Context, Result};
use tracing::info;

use engagement_updater::clients::MoClientFactory;
use engagement_updater::{server, telemetry, with_context};
use updater_common::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;
    telemetry::init(&settings.log_level)?;

    info!(
        version = %settings.commit_tag,
        hash = %settings.commit_sha,
        "Starting {}", settings.service_name
    );
    settings.log_redacted();

    let factory = MoClientFactory::new(&settings)?;
    with_context(settings, &factory, server::run).await?;

    info!("Shut down cleanly");
    Ok(())
}
