//! `otactl check`

use anyhow::Result;
use meshota_core::OtaCoordinator;

use crate::commands::{Context, IdentityArgs};
use crate::error::CliError;
use crate::output;

pub async fn execute(args: &IdentityArgs, ctx: &Context) -> Result<()> {
    let registry = args.registry()?;
    let coordinator = OtaCoordinator::from_config(registry, &ctx.config)
        .await
        .map_err(CliError::from)?;

    let device = args.device();
    let availability = coordinator
        .check_availability(&device)
        .await
        .map_err(CliError::from)?;
    output::print_availability(&device.device_id, &availability, ctx.json);
    Ok(())
}
