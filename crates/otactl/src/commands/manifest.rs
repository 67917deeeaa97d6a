//! `otactl manifest <url>`

use anyhow::Result;
use meshota_core::ManifestStore;
use meshota_core::source::HttpManifestSource;
use std::sync::Arc;
use tracing::debug;

use crate::commands::Context;
use crate::error::CliError;
use crate::output;

pub async fn execute(url: &str, ctx: &Context) -> Result<()> {
    let config = ctx.config.manifest.clone();
    let source = HttpManifestSource::new(&config).map_err(CliError::from)?;
    let store = ManifestStore::open(Arc::new(source), config)
        .await
        .map_err(CliError::from)?;

    debug!("Looking up manifest {}", url);
    let lookup = store.get_manifest(url).await.map_err(CliError::from)?;
    if let Some(error) = &lookup.stale {
        tracing::warn!("Serving cached manifest for {}: {}", url, error);
    }
    output::print_manifest(&lookup, ctx.json);
    Ok(())
}
